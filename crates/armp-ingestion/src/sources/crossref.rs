//! Crossref works search by organization affiliation.
//!
//! API: https://api.crossref.org/works?query.affiliation=<name>
//! Deep paging uses Crossref's opaque `cursor` token, starting at `*`.
//! Polite pool: set `mailto` (see Crossref etiquette)

use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument};

use armp_common::{normalize_doi, normalize_orcid, AuthorMention, PageCursor, PublicationType, SourceSystem};

use super::{json_str, SourceAdapter, SourceClient, SourceSettings};
use crate::error::SourceError;
use crate::models::{NormalizedRecord, Page, PublicationDraft, RawRecord, SourceScope};

const FIRST_CURSOR: &str = "*";

pub struct CrossrefAdapter {
    client: SourceClient,
    rows: u32,
    mailto: Option<String>,
}

impl CrossrefAdapter {
    pub fn new(settings: &SourceSettings) -> Result<Self, SourceError> {
        Ok(Self {
            client: SourceClient::new(SourceSystem::Crossref, settings)?,
            // Crossref caps rows at 1000
            rows: settings.page_size.clamp(1, 1000),
            mailto: settings.mailto.clone(),
        })
    }
}

#[async_trait]
impl SourceAdapter for CrossrefAdapter {
    fn system(&self) -> SourceSystem {
        SourceSystem::Crossref
    }

    #[instrument(skip(self, scope), fields(org = %scope.organization_id()))]
    async fn fetch_page(&self, scope: &SourceScope, cursor: Option<&PageCursor>) -> Result<Page, SourceError> {
        let token = match cursor {
            None => FIRST_CURSOR.to_string(),
            Some(PageCursor::Token(t)) => t.clone(),
            Some(other) => {
                return Err(SourceError::Config {
                    system: SourceSystem::Crossref,
                    message: format!("token-paged source given cursor {other}"),
                })
            }
        };

        let mut query = vec![
            ("query.affiliation", scope.organization.name.clone()),
            ("rows", self.rows.to_string()),
            ("cursor", token),
        ];
        if let Some(mailto) = &self.mailto {
            query.push(("mailto", mailto.clone()));
        }

        let body = self.client.get_json("works", &query).await?;
        let message = &body["message"];

        let records: Vec<RawRecord> = message["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|item| RawRecord::new(json_str(&item["DOI"]), item.clone()))
                    .collect()
            })
            .unwrap_or_default();

        debug!(n = records.len(), "Crossref page");
        // Crossref keeps handing out a cursor after the last item; an empty
        // page is the end marker.
        let next_cursor = if records.is_empty() {
            None
        } else {
            json_str(&message["next-cursor"]).map(PageCursor::Token)
        };
        Ok(Page { records, next_cursor })
    }

    fn normalize(&self, raw: &RawRecord, scope: &SourceScope) -> Result<NormalizedRecord, SourceError> {
        work_to_draft(&raw.payload, scope.organization_id())
            .map(NormalizedRecord::Publication)
            .map_err(|reason| SourceError::malformed(SourceSystem::Crossref, raw.native_id(), reason))
    }
}

// ── Conversion ─────────────────────────────────────────────────────────────

fn jats_tags() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").unwrap_or_else(|e| panic!("jats regex: {e}")))
}

/// Crossref abstracts are JATS XML snippets; keep the text only.
fn strip_jats(raw: &str) -> Option<String> {
    let text = jats_tags().replace_all(raw, " ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

/// First date-parts entry of a Crossref date object.
fn date_parts(v: &Value) -> Option<(i32, Option<NaiveDate>)> {
    let parts = v["date-parts"].as_array()?.first()?.as_array()?;
    let year = i32::try_from(parts.first()?.as_i64()?).ok()?;
    let month = parts.get(1).and_then(Value::as_u64).and_then(|m| u32::try_from(m).ok());
    let day = parts.get(2).and_then(Value::as_u64).and_then(|d| u32::try_from(d).ok());
    let date = match (month, day) {
        (Some(m), Some(d)) => NaiveDate::from_ymd_opt(year, m, d),
        _ => None,
    };
    Some((year, date))
}

fn work_to_draft(work: &Value, organization_id: &str) -> Result<PublicationDraft, String> {
    let doi_raw = json_str(&work["DOI"]).ok_or("missing DOI")?;
    let doi = normalize_doi(&doi_raw).ok_or_else(|| format!("invalid DOI {doi_raw}"))?;

    let title = work["title"]
        .as_array()
        .and_then(|t| t.iter().find_map(json_str))
        .ok_or("missing title")?;

    let mut draft = PublicationDraft::new(SourceSystem::Crossref, &doi, &title, organization_id);
    draft.doi = Some(doi);
    draft.abstract_text = work["abstract"].as_str().and_then(strip_jats);

    draft.authors = work["author"]
        .as_array()
        .map(|authors| {
            authors
                .iter()
                .filter_map(|a| {
                    let given = a["given"].as_str().unwrap_or("").trim();
                    let family = a["family"].as_str().unwrap_or("").trim();
                    let name = match (given.is_empty(), family.is_empty()) {
                        (_, true) => json_str(&a["name"])?,
                        (true, false) => family.to_string(),
                        (false, false) => format!("{given} {family}"),
                    };
                    let mention = AuthorMention::new(name);
                    Some(match a["ORCID"].as_str().and_then(normalize_orcid) {
                        Some(orcid) => mention.with_global_id(orcid),
                        None => mention,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let dated = ["published-online", "published-print", "published", "issued"]
        .iter()
        .find_map(|field| date_parts(&work[*field]));
    if let Some((year, date)) = dated {
        draft.publication_year = Some(year);
        draft.publication_date = date;
    }

    draft.publication_type = json_str(&work["type"])
        .map(|t| PublicationType::from_label(&t))
        .unwrap_or_default();
    draft.journal = work["container-title"].as_array().and_then(|j| j.iter().find_map(json_str));
    draft.publisher = json_str(&work["publisher"]);

    let licenses: Vec<String> = work["license"]
        .as_array()
        .map(|l| l.iter().filter_map(|lic| json_str(&lic["URL"])).collect())
        .unwrap_or_default();
    draft.open_access = licenses.iter().any(|url| {
        let url = url.to_lowercase();
        url.contains("open") || url.contains("cc-by") || url.contains("creativecommons")
    });
    draft.license = licenses.into_iter().next();

    Ok(draft)
}
