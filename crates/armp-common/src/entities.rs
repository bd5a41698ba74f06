/// Canonical record types of the research catalog.
/// These are the shapes the catalog gateway stores and the query service reads.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ArmpError;

// ---------------------------------------------------------------------------
// Source systems
// ---------------------------------------------------------------------------

/// External systems records are harvested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSystem {
    OpenAire,
    Crossref,
    Orcid,
    Fwf,
}

impl SourceSystem {
    pub const ALL: [SourceSystem; 4] = [
        SourceSystem::OpenAire,
        SourceSystem::Crossref,
        SourceSystem::Orcid,
        SourceSystem::Fwf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSystem::OpenAire => "openaire",
            SourceSystem::Crossref => "crossref",
            SourceSystem::Orcid    => "orcid",
            SourceSystem::Fwf      => "fwf",
        }
    }
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceSystem {
    type Err = ArmpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openaire" => Ok(SourceSystem::OpenAire),
            "crossref" => Ok(SourceSystem::Crossref),
            "orcid"    => Ok(SourceSystem::Orcid),
            "fwf"      => Ok(SourceSystem::Fwf),
            other      => Err(ArmpError::UnknownSource(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Publication
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationType {
    Article,
    Book,
    Dataset,
    Software,
    #[default]
    Other,
}

impl PublicationType {
    /// Map a source-native type label (Crossref `type`, OpenAIRE `documenttype`).
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().replace(' ', "-").as_str() {
            "journal-article" | "article" | "proceedings-article" | "conference-paper"
            | "review" | "research-article" => PublicationType::Article,
            "book" | "book-chapter" | "monograph" | "edited-book" | "reference-book" => {
                PublicationType::Book
            }
            "dataset" | "data-set" => PublicationType::Dataset,
            "software" => PublicationType::Software,
            _ => PublicationType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PublicationType::Article  => "article",
            PublicationType::Book     => "book",
            PublicationType::Dataset  => "dataset",
            PublicationType::Software => "software",
            PublicationType::Other    => "other",
        }
    }
}

/// A free-text author string as it appeared on a publication, plus the
/// author's global identifier when the source supplied one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorMention {
    pub name: String,
    #[serde(default)]
    pub global_id: Option<String>,
}

impl AuthorMention {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), global_id: None }
    }

    pub fn with_global_id(mut self, global_id: impl Into<String>) -> Self {
        self.global_id = Some(global_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publication {
    pub id: Uuid,
    /// Normalised DOI (lowercase, no resolver prefix).
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
    /// ROR id of the organization the record was harvested for.
    pub organization_id: String,
    pub sources: BTreeSet<SourceSystem>,
    /// Source-native record ids, kept for provenance.
    pub source_record_ids: BTreeMap<SourceSystem, String>,
    pub harvested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by the store on every accepted write.
    pub version: u64,
}

// ---------------------------------------------------------------------------
// Researcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Researcher {
    pub id: Uuid,
    /// Normalised ORCID iD.
    pub global_id: Option<String>,
    pub display_name: String,
    pub organization_id: String,
    pub aliases: BTreeSet<String>,
    /// Derived from authorship edges; maintained by the store.
    pub publication_count: u64,
    /// Researchers this record was ambiguously tied with when it was created.
    #[serde(default)]
    pub review_candidates: Vec<Uuid>,
    /// Research interests from the researcher's registry profile.
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    /// Employment and education history from the registry profile.
    #[serde(default)]
    pub affiliations: Vec<Affiliation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Researcher {
    pub fn new(display_name: &str, organization_id: &str, global_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            global_id,
            display_name: display_name.to_string(),
            organization_id: organization_id.to_string(),
            aliases: BTreeSet::from([display_name.to_string()]),
            publication_count: 0,
            review_candidates: Vec::new(),
            keywords: BTreeSet::new(),
            affiliations: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffiliationKind {
    Employment,
    Education,
}

/// One position held or degree studied for, as listed on a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affiliation {
    pub kind: AffiliationKind,
    pub organization: String,
    pub department: Option<String>,
    /// Role title for employment, degree for education.
    pub role: Option<String>,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
}

impl Affiliation {
    /// Same kind, same organization (ignoring case) and same start year.
    pub fn same_entry(&self, other: &Affiliation) -> bool {
        self.kind == other.kind
            && self.start_year == other.start_year
            && self.organization.trim().to_lowercase() == other.organization.trim().to_lowercase()
    }
}

// ---------------------------------------------------------------------------
// Project / Organization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub grant_number: String,
    pub title: String,
    pub abstract_text: Option<String>,
    pub funder: String,
    pub funding_amount: Option<f64>,
    pub currency: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub principal_investigator: Option<AuthorMention>,
    pub organization_id: Option<String>,
    pub keywords: Vec<String>,
    /// DOIs the funder lists as outputs of the grant.
    pub publication_dois: Vec<String>,
    pub url: Option<String>,
    pub source: SourceSystem,
    pub harvested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    /// ROR identifier, e.g. `03prydq77`.
    pub id: String,
    pub name: String,
    pub city: Option<String>,
    pub country: String,
    pub website: Option<String>,
}

// ---------------------------------------------------------------------------
// Association edges
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authorship {
    pub publication_id: Uuid,
    pub researcher_id: Uuid,
    /// Zero-based position in the author list.
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectPublication {
    pub project_id: Uuid,
    pub publication_id: Uuid,
    /// 1.0 for funder-declared links, keyword overlap otherwise.
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// Harvest jobs and checkpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    /// Ended early but resumable: cancelled by an operator, or a page that
    /// could not be fetched or skipped. The cursor is where the next run starts.
    Stopped,
    Aborted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending   => "pending",
            JobStatus::Running   => "running",
            JobStatus::Completed => "completed",
            JobStatus::Stopped   => "stopped",
            JobStatus::Aborted   => "aborted",
        }
    }

    /// Whether a checkpoint in this state should be continued rather than restarted.
    pub fn is_resumable(&self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::Stopped | JobStatus::Aborted)
    }
}

/// Position within a source's result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PageCursor {
    /// Record offset or page index; the following position can be computed
    /// without a response.
    Offset(u64),
    /// Opaque deep-paging token issued by the source.
    Token(String),
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageCursor::Offset(n) => write!(f, "offset:{n}"),
            PageCursor::Token(t)  => write!(f, "token:{t}"),
        }
    }
}

/// Identity of a harvest job: one source harvested for one organization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub source: SourceSystem,
    pub organization_id: String,
}

impl JobKey {
    pub fn new(source: SourceSystem, organization_id: impl Into<String>) -> Self {
        Self { source, organization_id: organization_id.into() }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.organization_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub fetched: u64,
    pub stored_new: u64,
    pub merged: u64,
    pub errors: u64,
    #[serde(default)]
    pub ambiguous_mentions: u64,
}

impl JobCounts {
    pub fn absorb(&mut self, other: &JobCounts) {
        self.fetched += other.fetched;
        self.stored_new += other.stored_new;
        self.merged += other.merged;
        self.errors += other.errors;
        self.ambiguous_mentions += other.ambiguous_mentions;
    }
}

/// Persisted progress of a harvest job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestCheckpoint {
    pub key: JobKey,
    /// 1-based run number for this key.
    pub run: u32,
    pub status: JobStatus,
    /// Cursor of the first page not yet committed; `None` before the first
    /// page or once the result set is exhausted.
    pub cursor: Option<PageCursor>,
    pub pages_committed: u64,
    pub counts: JobCounts,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl HarvestCheckpoint {
    pub fn start(key: JobKey, run: u32) -> Self {
        let now = Utc::now();
        Self {
            key,
            run,
            status: JobStatus::Pending,
            cursor: None,
            pages_committed: 0,
            counts: JobCounts::default(),
            started_at: now,
            updated_at: now,
            completed_at: None,
            last_error: None,
        }
    }
}
