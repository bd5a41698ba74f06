//! Data models for the harvest pipeline.
//!
//! Adapters turn raw source payloads into one of the draft types below; the
//! reconciliation steps only ever see drafts.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use armp_common::{Affiliation, AuthorMention, Organization, PageCursor, PublicationType, SourceSystem};

/// A raw payload as returned by a source, before normalisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    /// Source-native record id, when the payload carries one.
    pub source_id: Option<String>,
    pub payload: serde_json::Value,
}

impl RawRecord {
    pub fn new(source_id: Option<String>, payload: serde_json::Value) -> Self {
        Self { source_id, payload }
    }

    /// The native id for log lines and error reports.
    pub fn native_id(&self) -> &str {
        self.source_id.as_deref().unwrap_or("<no-id>")
    }
}

/// One page of raw records plus the cursor of the page after it.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<RawRecord>,
    pub next_cursor: Option<PageCursor>,
}

/// What a harvest job is scoped to.
#[derive(Debug, Clone)]
pub struct SourceScope {
    pub organization: Organization,
}

impl SourceScope {
    pub fn new(organization: Organization) -> Self {
        Self { organization }
    }

    pub fn organization_id(&self) -> &str {
        &self.organization.id
    }
}

/// Represents a publication sighting before identity resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicationDraft {
    pub source: SourceSystem,
    pub source_record_id: String,
    /// Normalised DOI.
    pub doi: Option<String>,
    pub title: String,
    pub abstract_text: Option<String>,
    pub publication_date: Option<NaiveDate>,
    pub publication_year: Option<i32>,
    pub publication_type: PublicationType,
    pub authors: Vec<AuthorMention>,
    pub journal: Option<String>,
    pub publisher: Option<String>,
    pub license: Option<String>,
    pub open_access: bool,
    pub organization_id: String,
}

impl PublicationDraft {
    /// A draft carrying only the required fields.
    pub fn new(source: SourceSystem, source_record_id: &str, title: &str, organization_id: &str) -> Self {
        Self {
            source,
            source_record_id: source_record_id.to_string(),
            doi: None,
            title: title.to_string(),
            abstract_text: None,
            publication_date: None,
            publication_year: None,
            publication_type: PublicationType::Other,
            authors: Vec::new(),
            journal: None,
            publisher: None,
            license: None,
            open_access: false,
            organization_id: organization_id.to_string(),
        }
    }

    /// Whether this sighting counts as the richer source in a merge.
    pub fn is_rich(&self) -> bool {
        self.abstract_text.is_some() || self.journal.is_some()
    }
}

/// A researcher profile from an identifier registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearcherProfile {
    pub source: SourceSystem,
    /// Normalised ORCID iD; also the source-native id.
    pub global_id: String,
    pub display_name: String,
    pub other_names: Vec<String>,
    pub organization_id: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub affiliations: Vec<Affiliation>,
}

/// A funded project from a funding registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDraft {
    pub source: SourceSystem,
    pub grant_number: String,
    pub title: String,
    pub abstract_text: Option<String>,
    pub funder: String,
    pub funding_amount: Option<f64>,
    pub currency: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub principal_investigator: Option<AuthorMention>,
    pub keywords: Vec<String>,
    /// Normalised DOIs the funder reports as outputs.
    pub publication_dois: Vec<String>,
    pub url: Option<String>,
    pub organization_id: String,
}

/// Output of [`SourceAdapter::normalize`](crate::sources::SourceAdapter::normalize).
#[derive(Debug, Clone)]
pub enum NormalizedRecord {
    Publication(PublicationDraft),
    Researcher(ResearcherProfile),
    Project(ProjectDraft),
}
