//! FWF (Austrian Science Fund) project registry.
//!
//! API: https://elise.fwf.ac.at/api/projects?institutionRor=<ror>
//! Paged by `offset`/`limit`.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use armp_common::{normalize_doi, normalize_orcid, AuthorMention, PageCursor, SourceSystem};

use super::{json_str, parse_partial_date, SourceAdapter, SourceClient, SourceSettings};
use crate::error::SourceError;
use crate::models::{NormalizedRecord, Page, ProjectDraft, RawRecord, SourceScope};

const FUNDER: &str = "FWF";
const DEFAULT_CURRENCY: &str = "EUR";
const PROJECT_PAGE_URL: &str = "https://www.fwf.ac.at/en/research-radar/projects";

pub struct FwfAdapter {
    client: SourceClient,
    limit: u32,
}

impl FwfAdapter {
    pub fn new(settings: &SourceSettings) -> Result<Self, SourceError> {
        Ok(Self {
            client: SourceClient::new(SourceSystem::Fwf, settings)?,
            limit: settings.page_size.max(1),
        })
    }

    fn offset_of(&self, cursor: Option<&PageCursor>) -> Result<u64, SourceError> {
        match cursor {
            None => Ok(0),
            Some(PageCursor::Offset(n)) => Ok(*n),
            Some(other) => Err(SourceError::Config {
                system: SourceSystem::Fwf,
                message: format!("offset-paged source given cursor {other}"),
            }),
        }
    }
}

#[async_trait]
impl SourceAdapter for FwfAdapter {
    fn system(&self) -> SourceSystem {
        SourceSystem::Fwf
    }

    #[instrument(skip(self, scope), fields(org = %scope.organization_id()))]
    async fn fetch_page(&self, scope: &SourceScope, cursor: Option<&PageCursor>) -> Result<Page, SourceError> {
        let offset = self.offset_of(cursor)?;
        let body = self
            .client
            .get_json(
                "projects",
                &[
                    ("institutionRor", scope.organization_id().to_string()),
                    ("offset", offset.to_string()),
                    ("limit", self.limit.to_string()),
                ],
            )
            .await?;

        let records: Vec<RawRecord> = body["data"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|item| RawRecord::new(json_str(&item["projectNumber"]), item.clone()))
                    .collect()
            })
            .unwrap_or_default();

        debug!(n = records.len(), offset, "FWF page");
        let next_cursor = (records.len() as u64 >= u64::from(self.limit))
            .then(|| PageCursor::Offset(offset + u64::from(self.limit)));
        Ok(Page { records, next_cursor })
    }

    fn normalize(&self, raw: &RawRecord, scope: &SourceScope) -> Result<NormalizedRecord, SourceError> {
        item_to_project(&raw.payload, scope.organization_id())
            .map(NormalizedRecord::Project)
            .map_err(|reason| SourceError::malformed(SourceSystem::Fwf, raw.native_id(), reason))
    }

    fn skip_page(&self, cursor: Option<&PageCursor>) -> Option<PageCursor> {
        let offset = self.offset_of(cursor).ok()?;
        Some(PageCursor::Offset(offset + u64::from(self.limit)))
    }
}

// ── Conversion ─────────────────────────────────────────────────────────────

/// Keywords arrive either as an array or as one `;`-separated string.
fn keywords(v: &Value) -> Vec<String> {
    let raw: Vec<String> = match v {
        Value::Array(items) => items.iter().filter_map(json_str).collect(),
        Value::String(s) => s.split(';').map(|k| k.trim().to_string()).collect(),
        _ => Vec::new(),
    };
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for k in raw.into_iter().filter(|k| !k.is_empty()) {
        if !out.contains(&k) {
            out.push(k);
        }
    }
    out
}

fn funding_amount(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

/// DOIs of reported outputs; entries may be bare strings or `{ "doi": ... }`.
fn publication_dois(v: &Value) -> Vec<String> {
    let mut dois: Vec<String> = v
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().or_else(|| item["doi"].as_str()))
                .filter_map(normalize_doi)
                .collect()
        })
        .unwrap_or_default();
    dois.sort();
    dois.dedup();
    dois
}

fn item_to_project(item: &Value, organization_id: &str) -> Result<ProjectDraft, String> {
    let grant_number = json_str(&item["projectNumber"]).ok_or("missing projectNumber")?;
    let title = json_str(&item["titleEnglish"])
        .or_else(|| json_str(&item["titleGerman"]))
        .ok_or("missing title")?;

    let principal_investigator = json_str(&item["pi"]["name"]).map(|name| {
        let pi = AuthorMention::new(name);
        match item["pi"]["orcid"].as_str().and_then(normalize_orcid) {
            Some(orcid) => pi.with_global_id(orcid),
            None => pi,
        }
    });

    Ok(ProjectDraft {
        source: SourceSystem::Fwf,
        url: Some(format!("{PROJECT_PAGE_URL}/{grant_number}")),
        grant_number,
        title,
        abstract_text: json_str(&item["abstractEnglish"]).or_else(|| json_str(&item["abstractGerman"])),
        funder: FUNDER.to_string(),
        funding_amount: funding_amount(&item["fundingAmount"]),
        currency: Some(json_str(&item["currency"]).unwrap_or_else(|| DEFAULT_CURRENCY.to_string())),
        start_date: json_str(&item["startDate"]).and_then(|d| parse_partial_date(&d).0),
        end_date: json_str(&item["endDate"]).and_then(|d| parse_partial_date(&d).0),
        principal_investigator,
        keywords: keywords(&item["keywords"]),
        publication_dois: publication_dois(&item["publications"]),
        organization_id: organization_id.to_string(),
    })
}
