//! ORCID public API: researchers affiliated with an organization.
//!
//! API: https://pub.orcid.org/v3.0/expanded-search/?q=ror-org-id:"<ror url>"
//! Paged by `start`/`rows`. Public API limit is 24 requests per second.
//!
//! Each search hit is enriched from `/{orcid}/employments`, `/educations`
//! and `/keywords`. Those sections are optional: a failed section is logged
//! and the profile is kept without it.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use armp_common::{normalize_orcid, Affiliation, AffiliationKind, PageCursor, SourceSystem};

use super::{json_str, SourceAdapter, SourceClient, SourceSettings};
use crate::error::SourceError;
use crate::models::{NormalizedRecord, Page, RawRecord, ResearcherProfile, SourceScope};

/// Profile sections fetched per researcher, stored in the raw payload
/// under the same keys.
const PROFILE_SECTIONS: [&str; 3] = ["employments", "educations", "keywords"];

pub struct OrcidAdapter {
    client: SourceClient,
    rows: u32,
}

impl OrcidAdapter {
    pub fn new(settings: &SourceSettings) -> Result<Self, SourceError> {
        Ok(Self {
            client: SourceClient::new(SourceSystem::Orcid, settings)?,
            // expanded-search serves at most 1000 rows per request
            rows: settings.page_size.clamp(1, 1000),
        })
    }

    fn start_of(&self, cursor: Option<&PageCursor>) -> Result<u64, SourceError> {
        match cursor {
            None => Ok(0),
            Some(PageCursor::Offset(n)) => Ok(*n),
            Some(other) => Err(SourceError::Config {
                system: SourceSystem::Orcid,
                message: format!("offset-paged source given cursor {other}"),
            }),
        }
    }

    async fn enrich(&self, payload: &mut Value) {
        let Some(id) = json_str(&payload["orcid-id"]).and_then(|raw| normalize_orcid(&raw)) else {
            return;
        };
        for section in PROFILE_SECTIONS {
            match self.client.get_json(&format!("{id}/{section}"), &[]).await {
                Ok(body) => {
                    if let Some(obj) = payload.as_object_mut() {
                        obj.insert(section.to_string(), body);
                    }
                }
                Err(e) => debug!(orcid = %id, section, error = %e, "Profile section unavailable"),
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for OrcidAdapter {
    fn system(&self) -> SourceSystem {
        SourceSystem::Orcid
    }

    #[instrument(skip(self, scope), fields(org = %scope.organization_id()))]
    async fn fetch_page(&self, scope: &SourceScope, cursor: Option<&PageCursor>) -> Result<Page, SourceError> {
        let start = self.start_of(cursor)?;
        let body = self
            .client
            .get_json(
                "expanded-search/",
                &[
                    ("q", format!("ror-org-id:\"https://ror.org/{}\"", scope.organization_id())),
                    ("start", start.to_string()),
                    ("rows", self.rows.to_string()),
                ],
            )
            .await?;

        let hits: Vec<Value> = body["expanded-result"].as_array().cloned().unwrap_or_default();
        let mut records = Vec::with_capacity(hits.len());
        for mut hit in hits {
            self.enrich(&mut hit).await;
            records.push(RawRecord::new(json_str(&hit["orcid-id"]), hit));
        }

        let next = start + records.len() as u64;
        let total = body["num-found"].as_u64();
        debug!(n = records.len(), start, total, "ORCID page");

        let more = match total {
            Some(total) => !records.is_empty() && next < total,
            None => records.len() as u64 >= u64::from(self.rows),
        };
        Ok(Page {
            records,
            next_cursor: more.then_some(PageCursor::Offset(next)),
        })
    }

    fn normalize(&self, raw: &RawRecord, scope: &SourceScope) -> Result<NormalizedRecord, SourceError> {
        result_to_profile(&raw.payload, scope.organization_id())
            .map(NormalizedRecord::Researcher)
            .map_err(|reason| SourceError::malformed(SourceSystem::Orcid, raw.native_id(), reason))
    }

    fn skip_page(&self, cursor: Option<&PageCursor>) -> Option<PageCursor> {
        let start = self.start_of(cursor).ok()?;
        Some(PageCursor::Offset(start + u64::from(self.rows)))
    }
}

// ── Conversion ─────────────────────────────────────────────────────────────

fn result_to_profile(result: &Value, organization_id: &str) -> Result<ResearcherProfile, String> {
    let raw_id = json_str(&result["orcid-id"]).ok_or("missing orcid-id")?;
    let global_id = normalize_orcid(&raw_id).ok_or_else(|| format!("invalid ORCID iD {raw_id}"))?;

    let given = json_str(&result["given-names"]);
    let family = json_str(&result["family-names"]);
    let full_name = match (given, family) {
        (Some(g), Some(f)) => Some(format!("{g} {f}")),
        (g, f) => g.or(f),
    };
    let credit_name = json_str(&result["credit-name"]);

    let display_name = credit_name
        .clone()
        .or_else(|| full_name.clone())
        .ok_or("profile has no public name")?;

    let mut other_names: Vec<String> = result["other-name"]
        .as_array()
        .map(|names| names.iter().filter_map(json_str).collect())
        .unwrap_or_default();
    if let Some(full) = full_name.filter(|n| *n != display_name) {
        other_names.push(full);
    }
    other_names.retain(|n| *n != display_name);
    other_names.dedup();

    let mut affiliations = section_affiliations(&result["employments"], AffiliationKind::Employment);
    affiliations.extend(section_affiliations(&result["educations"], AffiliationKind::Education));

    Ok(ResearcherProfile {
        source: SourceSystem::Orcid,
        global_id,
        display_name,
        other_names,
        organization_id: organization_id.to_string(),
        keywords: section_keywords(&result["keywords"]),
        affiliations,
    })
}

/// `affiliation-group[].summaries[].{employment,education}-summary`
fn section_affiliations(section: &Value, kind: AffiliationKind) -> Vec<Affiliation> {
    let summary_key = match kind {
        AffiliationKind::Employment => "employment-summary",
        AffiliationKind::Education => "education-summary",
    };
    section["affiliation-group"]
        .as_array()
        .into_iter()
        .flatten()
        .flat_map(|group| group["summaries"].as_array().into_iter().flatten())
        .filter_map(|summary| {
            let s = &summary[summary_key];
            Some(Affiliation {
                kind,
                organization: json_str(&s["organization"]["name"])?,
                department: json_str(&s["department-name"]),
                role: json_str(&s["role-title"]),
                start_year: orcid_year(&s["start-date"]),
                end_year: orcid_year(&s["end-date"]),
            })
        })
        .collect()
}

/// ORCID fuzzy dates: `{"year": {"value": "2019"}, "month": ..., "day": ...}`.
fn orcid_year(date: &Value) -> Option<i32> {
    json_str(&date["year"]["value"])?.parse().ok()
}

fn section_keywords(section: &Value) -> Vec<String> {
    let mut keywords: Vec<String> = section["keyword"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|k| json_str(&k["content"]))
        .collect();
    keywords.dedup();
    keywords
}
