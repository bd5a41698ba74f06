//! Researcher disambiguation: map an author mention onto a canonical researcher.
//!
//! A global identifier (ORCID iD) is an exact key. Without one, mentions are
//! scored against the organization's researchers by name; a clear winner is
//! matched, a near tie is never merged and is flagged for review instead.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use armp_common::{Affiliation, AuthorMention, Researcher};
use armp_db::{CatalogGateway, DbError, PartitionKey, ResearcherKey};

use crate::error::HarvestError;
use crate::models::ResearcherProfile;
use crate::similarity::{meets_threshold, normalize_text, within_margin, SimilarityScorer};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisambiguationConfig {
    /// Minimum name similarity for a match.
    pub threshold: f64,
    /// A runner-up this close to the best score makes the match ambiguous.
    pub margin: f64,
    pub max_conflict_retries: u32,
}

impl Default for DisambiguationConfig {
    fn default() -> Self {
        Self { threshold: 0.90, margin: 0.03, max_conflict_retries: 5 }
    }
}

/// A person as named on a publication, project or profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ResearcherMention {
    pub name: String,
    pub global_id: Option<String>,
    pub organization_id: String,
    /// Further spellings to record as aliases.
    pub other_names: Vec<String>,
    /// Profile details; empty for mentions on publications and projects.
    pub keywords: Vec<String>,
    pub affiliations: Vec<Affiliation>,
}

impl ResearcherMention {
    pub fn new(name: &str, organization_id: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            global_id: None,
            organization_id: organization_id.to_string(),
            other_names: Vec::new(),
            keywords: Vec::new(),
            affiliations: Vec::new(),
        }
    }

    pub fn from_author(author: &AuthorMention, organization_id: &str) -> Self {
        Self {
            global_id: author.global_id.clone(),
            ..Self::new(&author.name, organization_id)
        }
    }

    pub fn from_profile(profile: &ResearcherProfile) -> Self {
        Self {
            global_id: Some(profile.global_id.clone()),
            other_names: profile.other_names.clone(),
            keywords: profile.keywords.clone(),
            affiliations: profile.affiliations.clone(),
            ..Self::new(&profile.display_name, &profile.organization_id)
        }
    }

    fn spellings(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str())
            .chain(self.other_names.iter().map(String::as_str))
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearcherAction {
    Created,
    Matched,
    /// Created because several candidates tied; flagged for manual review.
    CreatedAmbiguous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResearcherResolution {
    pub id: Uuid,
    pub action: ResearcherAction,
}

pub struct ResearcherDisambiguator {
    gateway: Arc<dyn CatalogGateway>,
    scorer: Arc<dyn SimilarityScorer>,
    config: DisambiguationConfig,
}

impl ResearcherDisambiguator {
    pub fn new(gateway: Arc<dyn CatalogGateway>, scorer: Arc<dyn SimilarityScorer>, config: DisambiguationConfig) -> Self {
        Self { gateway, scorer, config }
    }

    #[instrument(skip(self, mention), fields(name = %mention.name, global_id = ?mention.global_id))]
    pub async fn resolve(&self, mention: &ResearcherMention) -> Result<ResearcherResolution, HarvestError> {
        if mention.name.is_empty() && mention.global_id.is_none() {
            return Err(HarvestError::InvalidRecord("author mention without name or identifier".into()));
        }

        let max_attempts = self.config.max_conflict_retries.max(1);
        let mut attempt = 1;
        loop {
            let outcome = match &mention.global_id {
                Some(gid) => self.resolve_global_id(gid, mention).await,
                None => self.resolve_by_name(mention).await,
            };
            match outcome {
                Ok(resolution) => return Ok(resolution),
                Err(DbError::Conflict(key)) if attempt < max_attempts => {
                    debug!(%key, attempt, "Lost researcher write race, re-resolving");
                    attempt += 1;
                }
                Err(DbError::Conflict(key)) => {
                    return Err(HarvestError::ConflictRetriesExhausted { key, attempts: attempt });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn resolve_global_id(&self, gid: &str, mention: &ResearcherMention) -> armp_db::Result<ResearcherResolution> {
        if let Some(mut existing) = self.gateway.find_researcher_by_global_id(gid).await? {
            let id = existing.id;
            if absorb_mention(&mut existing, mention) {
                self.gateway.upsert_researcher(existing, ResearcherKey::Id(id)).await?;
            }
            return Ok(ResearcherResolution { id, action: ResearcherAction::Matched });
        }

        let mut record = Researcher::new(display_name_for(mention), &mention.organization_id, Some(gid.to_string()));
        absorb_mention(&mut record, mention);
        let outcome = self
            .gateway
            .upsert_researcher(record, ResearcherKey::GlobalId(gid.to_string()))
            .await?;
        Ok(ResearcherResolution { id: outcome.id, action: ResearcherAction::Created })
    }

    async fn resolve_by_name(&self, mention: &ResearcherMention) -> armp_db::Result<ResearcherResolution> {
        let _guard = self
            .gateway
            .lock_partition(PartitionKey::researchers(&mention.organization_id))
            .await?;

        let mut scored: Vec<(f64, Researcher)> = self
            .gateway
            .researcher_candidates(&mention.organization_id)
            .await?
            .into_iter()
            .map(|candidate| (self.best_alias_score(&mention.name, &candidate), candidate))
            .collect();
        scored.sort_by(|(a, _), (b, _)| b.total_cmp(a));

        let top = scored.first().map(|(score, _)| *score).unwrap_or(0.0);
        let mut review_candidates = Vec::new();

        if !scored.is_empty() && meets_threshold(top, self.config.threshold) {
            // The top candidate plus every runner-up less than `margin` behind it.
            let contenders: Vec<Uuid> = scored
                .iter()
                .enumerate()
                .take_while(|(i, (score, _))| *i == 0 || within_margin(*score, top, self.config.margin))
                .map(|(_, (_, r))| r.id)
                .collect();

            if contenders.len() == 1 {
                let (score, mut existing) = scored.swap_remove(0);
                let id = existing.id;
                if absorb_mention(&mut existing, mention) {
                    self.gateway.upsert_researcher(existing, ResearcherKey::Id(id)).await?;
                }
                debug!(%id, score, "Matched researcher by name");
                return Ok(ResearcherResolution { id, action: ResearcherAction::Matched });
            }

            info!(
                name = %mention.name,
                org = %mention.organization_id,
                contenders = contenders.len(),
                top,
                "Ambiguous researcher mention, creating new record for review"
            );
            review_candidates = contenders;
        }

        let mut record = Researcher::new(display_name_for(mention), &mention.organization_id, None);
        absorb_mention(&mut record, mention);
        let action = if review_candidates.is_empty() {
            ResearcherAction::Created
        } else {
            ResearcherAction::CreatedAmbiguous
        };
        record.review_candidates = review_candidates;
        let id = record.id;
        let outcome = self.gateway.upsert_researcher(record, ResearcherKey::Id(id)).await?;
        Ok(ResearcherResolution { id: outcome.id, action })
    }

    fn best_alias_score(&self, name: &str, candidate: &Researcher) -> f64 {
        std::iter::once(candidate.display_name.as_str())
            .chain(candidate.aliases.iter().map(String::as_str))
            .map(|alias| self.scorer.name_similarity(name, alias))
            .fold(0.0, f64::max)
    }
}

fn display_name_for(mention: &ResearcherMention) -> &str {
    if mention.name.is_empty() {
        mention.global_id.as_deref().unwrap_or_default()
    } else {
        &mention.name
    }
}

/// Record what the mention adds: unknown spellings as aliases, new
/// keywords, new affiliations, and fields missing from known affiliations.
/// Nothing the researcher already carries is overwritten. Returns whether
/// anything changed.
fn absorb_mention(researcher: &mut Researcher, mention: &ResearcherMention) -> bool {
    let mut changed = false;
    for spelling in mention.spellings() {
        let key = normalize_text(spelling);
        let known = researcher.aliases.iter().any(|a| normalize_text(a) == key);
        if !known {
            researcher.aliases.insert(spelling.to_string());
            changed = true;
        }
    }

    for keyword in mention.keywords.iter().map(|k| k.trim()).filter(|k| !k.is_empty()) {
        let key = normalize_text(keyword);
        let known = researcher.keywords.iter().any(|k| normalize_text(k) == key);
        if !known {
            researcher.keywords.insert(keyword.to_string());
            changed = true;
        }
    }

    for incoming in &mention.affiliations {
        match researcher.affiliations.iter_mut().find(|a| a.same_entry(incoming)) {
            Some(known) => changed |= fill_affiliation(known, incoming),
            None => {
                researcher.affiliations.push(incoming.clone());
                changed = true;
            }
        }
    }
    changed
}

fn fill_affiliation(known: &mut Affiliation, incoming: &Affiliation) -> bool {
    fn fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>) -> bool {
        if slot.is_none() && value.is_some() {
            slot.clone_from(value);
            return true;
        }
        false
    }
    let department = fill(&mut known.department, &incoming.department);
    let role = fill(&mut known.role, &incoming.role);
    let end_year = fill(&mut known.end_year, &incoming.end_year);
    department || role || end_year
}
