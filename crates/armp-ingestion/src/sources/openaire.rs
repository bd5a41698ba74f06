//! OpenAIRE Graph publication search.
//!
//! API: https://api.openaire.eu/graph/publications
//! Filter: `keywords=hasAuthor(affiliation_id="<ror>")`, paged by `from`/`size`.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use armp_common::{normalize_doi, AuthorMention, PageCursor, PublicationType, SourceSystem};

use super::{json_str, parse_partial_date, SourceAdapter, SourceClient, SourceSettings};
use crate::error::SourceError;
use crate::models::{NormalizedRecord, Page, PublicationDraft, RawRecord, SourceScope};

pub struct OpenAireAdapter {
    client: SourceClient,
    page_size: u32,
}

impl OpenAireAdapter {
    pub fn new(settings: &SourceSettings) -> Result<Self, SourceError> {
        Ok(Self {
            client: SourceClient::new(SourceSystem::OpenAire, settings)?,
            page_size: settings.page_size.max(1),
        })
    }
}

fn offset_of(system: SourceSystem, cursor: Option<&PageCursor>) -> Result<u64, SourceError> {
    match cursor {
        None => Ok(0),
        Some(PageCursor::Offset(n)) => Ok(*n),
        Some(other) => Err(SourceError::Config {
            system,
            message: format!("offset-paged source given cursor {other}"),
        }),
    }
}

#[async_trait]
impl SourceAdapter for OpenAireAdapter {
    fn system(&self) -> SourceSystem {
        SourceSystem::OpenAire
    }

    #[instrument(skip(self, scope), fields(org = %scope.organization_id()))]
    async fn fetch_page(&self, scope: &SourceScope, cursor: Option<&PageCursor>) -> Result<Page, SourceError> {
        let from = offset_of(self.system(), cursor)?;
        let body = self
            .client
            .get_json(
                "publications",
                &[
                    ("keywords", format!("hasAuthor(affiliation_id=\"{}\")", scope.organization_id())),
                    ("size", self.page_size.to_string()),
                    ("from", from.to_string()),
                    ("format", "json".to_string()),
                ],
            )
            .await?;

        let records: Vec<RawRecord> = body["response"]["results"]
            .as_array()
            .map(|results| {
                results
                    .iter()
                    .map(|r| {
                        let payload = r.get("result").cloned().unwrap_or_else(|| r.clone());
                        RawRecord::new(json_str(&payload["id"]), payload)
                    })
                    .collect()
            })
            .unwrap_or_default();

        debug!(n = records.len(), from, "OpenAIRE page");
        let next_cursor = (records.len() as u64 >= u64::from(self.page_size))
            .then(|| PageCursor::Offset(from + u64::from(self.page_size)));
        Ok(Page { records, next_cursor })
    }

    fn normalize(&self, raw: &RawRecord, scope: &SourceScope) -> Result<NormalizedRecord, SourceError> {
        result_to_draft(&raw.payload, scope.organization_id())
            .map(NormalizedRecord::Publication)
            .map_err(|reason| SourceError::malformed(SourceSystem::OpenAire, raw.native_id(), reason))
    }

    fn skip_page(&self, cursor: Option<&PageCursor>) -> Option<PageCursor> {
        let from = offset_of(self.system(), cursor).ok()?;
        Some(PageCursor::Offset(from + u64::from(self.page_size)))
    }
}

// ── Conversion ─────────────────────────────────────────────────────────────

/// First `value` of a `[{"value": ...}]` list.
fn first_value(v: &Value) -> Option<String> {
    v.as_array()?.iter().find_map(|item| json_str(&item["value"]))
}

fn result_to_draft(result: &Value, organization_id: &str) -> Result<PublicationDraft, String> {
    let id = json_str(&result["id"]).ok_or("missing record id")?;
    let title = first_value(&result["title"]).ok_or("missing title")?;

    let mut draft = PublicationDraft::new(SourceSystem::OpenAire, &id, &title, organization_id);
    draft.abstract_text = first_value(&result["description"]);

    draft.doi = result["pid"].as_array().and_then(|pids| {
        pids.iter()
            .filter(|p| p["classid"].as_str() == Some("doi"))
            .find_map(|p| p["value"].as_str().and_then(normalize_doi))
    });

    draft.authors = result["author"]
        .as_array()
        .map(|authors| {
            authors
                .iter()
                .filter_map(|a| json_str(&a["fullname"]))
                .map(AuthorMention::new)
                .collect()
        })
        .unwrap_or_default();

    if let Some(raw) = json_str(&result["publicationdate"]) {
        (draft.publication_date, draft.publication_year) = parse_partial_date(&raw);
    }
    if draft.publication_year.is_none() {
        if let Some(raw) = json_str(&result["relevantdate"]) {
            draft.publication_year = parse_partial_date(&raw).1;
        }
    }

    draft.publication_type = json_str(&result["documenttype"])
        .map(|t| PublicationType::from_label(&t))
        .unwrap_or_default();
    draft.journal = json_str(&result["journal"]["content"]);
    draft.publisher = json_str(&result["publisher"]);
    draft.open_access = result["openAccessColor"].as_str() == Some("gold");
    draft.license = result["instances"]
        .as_array()
        .and_then(|instances| instances.iter().find_map(|i| json_str(&i["license"])));

    Ok(draft)
}
