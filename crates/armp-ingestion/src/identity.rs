//! Publication identity resolution.
//!
//! Staged like the dedup check it grew out of:
//!   Stage 1: normalised DOI exact match
//!   Stage 2: fuzzy match within the draft's (organization, year) partition
//!   Stage 3: create a new canonical record
//!
//! Every write is a conditional upsert. A lost race comes back as a
//! conflict and the whole resolve is repeated against the current state.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use armp_common::{Publication, PublicationType};
use armp_db::{CatalogGateway, DbError, PartitionKey, PublicationKey, UpsertAction};

use crate::error::HarvestError;
use crate::models::PublicationDraft;
use crate::similarity::{author_key, meets_threshold, SimilarityScorer};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Minimum similarity for a fuzzy merge.
    pub merge_threshold: f64,
    /// Resolve attempts before a persistent write conflict is given up.
    pub max_conflict_retries: u32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self { merge_threshold: 0.90, max_conflict_retries: 5 }
    }
}

/// Outcome of resolving one draft.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub id: Uuid,
    pub action: UpsertAction,
    /// Fuzzy score of the merge target; `None` for DOI matches and creations.
    pub score: Option<f64>,
}

pub struct IdentityResolver {
    gateway: Arc<dyn CatalogGateway>,
    scorer: Arc<dyn SimilarityScorer>,
    config: IdentityConfig,
}

impl IdentityResolver {
    pub fn new(gateway: Arc<dyn CatalogGateway>, scorer: Arc<dyn SimilarityScorer>, config: IdentityConfig) -> Self {
        Self { gateway, scorer, config }
    }

    /// Resolve a draft to its canonical publication, creating or merging.
    #[instrument(skip(self, draft), fields(source = %draft.source, record = %draft.source_record_id, doi = ?draft.doi))]
    pub async fn resolve(&self, draft: &PublicationDraft) -> Result<Resolution, HarvestError> {
        if draft.title.trim().is_empty() {
            return Err(HarvestError::InvalidRecord(format!(
                "{} record {} has no title",
                draft.source, draft.source_record_id
            )));
        }

        let max_attempts = self.config.max_conflict_retries.max(1);
        let mut attempt = 1;
        loop {
            match self.try_resolve(draft).await {
                Ok(resolution) => return Ok(resolution),
                Err(DbError::Conflict(key)) if attempt < max_attempts => {
                    debug!(%key, attempt, "Lost write race, re-resolving");
                    attempt += 1;
                }
                Err(DbError::Conflict(key)) => {
                    return Err(HarvestError::ConflictRetriesExhausted { key, attempts: attempt });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn try_resolve(&self, draft: &PublicationDraft) -> armp_db::Result<Resolution> {
        // Stage 1: DOI exact match
        if let Some(doi) = &draft.doi {
            if let Some(existing) = self.gateway.find_publication_by_doi(doi).await? {
                let id = existing.id;
                let merged = merge_publication(existing, draft);
                self.gateway.upsert_publication(merged, PublicationKey::Id(id)).await?;
                debug!(%id, "Merged by DOI");
                return Ok(Resolution { id, action: UpsertAction::Merged, score: None });
            }
        }

        // Stage 2: fuzzy match inside the partition, under its advisory lock
        let partition = PartitionKey::publications(&draft.organization_id, draft.publication_year);
        let _guard = self.gateway.lock_partition(partition).await?;

        let candidates = self
            .gateway
            .publication_candidates(&draft.organization_id, draft.publication_year)
            .await?;

        let best = candidates
            .into_iter()
            .filter(|c| !carries_other_doi(draft, c))
            .map(|c| (self.scorer.publication_similarity(draft, &c), c))
            .filter(|(score, _)| meets_threshold(*score, self.config.merge_threshold))
            .max_by(|(sa, a), (sb, b)| sa.total_cmp(sb).then(a.updated_at.cmp(&b.updated_at)));

        if let Some((score, existing)) = best {
            let id = existing.id;
            let merged = merge_publication(existing, draft);
            self.gateway.upsert_publication(merged, PublicationKey::Id(id)).await?;
            debug!(%id, score, "Merged by similarity");
            return Ok(Resolution { id, action: UpsertAction::Merged, score: Some(score) });
        }

        // Stage 3: new canonical record
        let record = new_publication(draft);
        let key = match &record.doi {
            Some(doi) => PublicationKey::Doi(doi.clone()),
            None => PublicationKey::Id(record.id),
        };
        let outcome = self.gateway.upsert_publication(record, key).await?;
        Ok(Resolution { id: outcome.id, action: outcome.action, score: None })
    }
}

/// Both sides carry a DOI and they differ.
fn carries_other_doi(draft: &PublicationDraft, candidate: &Publication) -> bool {
    matches!((&draft.doi, &candidate.doi), (Some(a), Some(b)) if a != b)
}

/// A fresh canonical record for a draft, ready for an insert (version 0).
pub fn new_publication(draft: &PublicationDraft) -> Publication {
    let now = Utc::now();
    Publication {
        id: Uuid::new_v4(),
        doi: draft.doi.clone(),
        title: draft.title.trim().to_string(),
        abstract_text: draft.abstract_text.clone(),
        publication_date: draft.publication_date,
        publication_year: draft.publication_year,
        publication_type: draft.publication_type,
        authors: draft.authors.clone(),
        journal: draft.journal.clone(),
        publisher: draft.publisher.clone(),
        license: draft.license.clone(),
        open_access: draft.open_access,
        organization_id: draft.organization_id.clone(),
        sources: [draft.source].into(),
        source_record_ids: [(draft.source, draft.source_record_id.clone())].into(),
        harvested_at: now,
        updated_at: now,
        version: 0,
    }
}

// ── Merge policy ────────────────────────────────────────────────────────────

/// Fill an empty slot; replace a differing value only when `prefer_incoming`.
fn merge_field<T: PartialEq>(slot: &mut Option<T>, incoming: Option<T>, prefer_incoming: bool) {
    let Some(value) = incoming else { return };
    match slot {
        None => *slot = Some(value),
        Some(current) if prefer_incoming && *current != value => *slot = Some(value),
        Some(_) => {}
    }
}

/// Fold a draft into an existing canonical publication.
///
/// Values are never nulled. A differing value is only replaced when the
/// draft is rich (carries an abstract or journal). The DOI, organization and
/// record id of the existing record always survive.
pub fn merge_publication(mut existing: Publication, draft: &PublicationDraft) -> Publication {
    let rich = draft.is_rich();

    if existing.doi.is_none() {
        existing.doi = draft.doi.clone();
    }
    let title = draft.title.trim();
    if rich && !title.is_empty() && existing.title != title {
        existing.title = title.to_string();
    }

    merge_field(&mut existing.abstract_text, draft.abstract_text.clone(), rich);
    merge_field(&mut existing.publication_date, draft.publication_date, rich);
    merge_field(&mut existing.publication_year, draft.publication_year, rich);
    merge_field(&mut existing.journal, draft.journal.clone(), rich);
    merge_field(&mut existing.publisher, draft.publisher.clone(), rich);
    merge_field(&mut existing.license, draft.license.clone(), rich);

    if draft.publication_type != PublicationType::Other
        && (existing.publication_type == PublicationType::Other || rich)
    {
        existing.publication_type = draft.publication_type;
    }

    for mention in &draft.authors {
        let Some(key) = author_key(&mention.name) else { continue };
        match existing
            .authors
            .iter_mut()
            .find(|a| author_key(&a.name).as_deref() == Some(key.as_str()))
        {
            Some(known) => {
                if known.global_id.is_none() {
                    known.global_id = mention.global_id.clone();
                }
            }
            None => existing.authors.push(mention.clone()),
        }
    }

    existing.open_access |= draft.open_access;
    existing.sources.insert(draft.source);
    existing
        .source_record_ids
        .insert(draft.source, draft.source_record_id.clone());
    existing.updated_at = Utc::now();
    existing
}

#[cfg(test)]
mod tests {
    use super::*;
    use armp_common::{AuthorMention, SourceSystem};
    use armp_db::MemoryCatalog;
    use chrono::Duration;

    use crate::similarity::FuzzyScorer;

    const ORG: &str = "03prydq77";

    fn authored(source: SourceSystem, id: &str, title: &str, authors: &[&str]) -> PublicationDraft {
        let mut d = draft(source, id, title);
        d.authors = authors.iter().map(|a| AuthorMention::new(*a)).collect();
        d
    }

    /// Scores every pair the same.
    struct FixedScorer(f64);

    impl SimilarityScorer for FixedScorer {
        fn publication_similarity(&self, _: &PublicationDraft, _: &Publication) -> f64 {
            self.0
        }
        fn name_similarity(&self, _: &str, _: &str) -> f64 {
            0.0
        }
    }

    fn resolver(catalog: Arc<MemoryCatalog>, scorer: Arc<dyn SimilarityScorer>) -> IdentityResolver {
        IdentityResolver::new(catalog, scorer, IdentityConfig::default())
    }

    fn draft(source: SourceSystem, id: &str, title: &str) -> PublicationDraft {
        let mut d = PublicationDraft::new(source, id, title, ORG);
        d.publication_year = Some(2022);
        d
    }

    #[tokio::test]
    async fn test_doi_variants_resolve_to_one_record() {
        let catalog = Arc::new(MemoryCatalog::new(Vec::new()));
        let r = resolver(catalog.clone(), Arc::new(FixedScorer(0.0)));

        let mut a = draft(SourceSystem::Crossref, "10.1000/abc", "Alpine lakes");
        a.doi = armp_common::normalize_doi("10.1000/ABC");
        let mut b = draft(SourceSystem::OpenAire, "oa::1", "Alpine lakes (preprint)");
        b.doi = armp_common::normalize_doi("https://doi.org/10.1000/abc");

        let first = r.resolve(&a).await.unwrap();
        let second = r.resolve(&b).await.unwrap();
        assert_eq!(first.action, UpsertAction::Created);
        assert_eq!(second.action, UpsertAction::Merged);
        assert_eq!(first.id, second.id);

        let stored = catalog.get_publication(first.id).await.unwrap().unwrap();
        assert_eq!(stored.sources.len(), 2);
        assert_eq!(stored.source_record_ids[&SourceSystem::OpenAire], "oa::1");
        assert_eq!(catalog.stats().await.unwrap().publications, 1);
    }

    #[tokio::test]
    async fn test_merge_never_nulls_a_field() {
        let catalog = Arc::new(MemoryCatalog::new(Vec::new()));
        let r = resolver(catalog.clone(), Arc::new(FixedScorer(0.0)));

        let mut rich = draft(SourceSystem::Crossref, "10.1/x", "Soil carbon");
        rich.doi = Some("10.1/x".into());
        rich.abstract_text = Some("We measure soil carbon.".into());
        rich.journal = Some("Geoderma".into());
        rich.publisher = Some("Elsevier".into());
        let id = r.resolve(&rich).await.unwrap().id;

        let mut poor = draft(SourceSystem::OpenAire, "oa::2", "Soil Carbon");
        poor.doi = Some("10.1/x".into());
        poor.publisher = Some("Elsevier BV".into());
        r.resolve(&poor).await.unwrap();

        let stored = catalog.get_publication(id).await.unwrap().unwrap();
        assert_eq!(stored.abstract_text.as_deref(), Some("We measure soil carbon."));
        assert_eq!(stored.journal.as_deref(), Some("Geoderma"));
        assert_eq!(stored.publisher.as_deref(), Some("Elsevier"), "poorer source must not overwrite");
        assert_eq!(stored.title, "Soil carbon");
    }

    #[test]
    fn test_rich_draft_overwrites_differing_values() {
        let mut base = draft(SourceSystem::OpenAire, "oa::3", "Old title");
        base.publisher = Some("Old".into());
        base.authors = vec![AuthorMention::new("Smith, John")];
        let existing = new_publication(&base);

        let mut incoming = draft(SourceSystem::Crossref, "10.1/y", "New title");
        incoming.journal = Some("Nature".into());
        incoming.publisher = Some("Springer".into());
        incoming.open_access = true;
        incoming.publication_type = PublicationType::Article;
        incoming.authors = vec![
            AuthorMention::new("J. Smith").with_global_id("0000-0002-1825-0097"),
            AuthorMention::new("Maria Huber"),
        ];

        let merged = merge_publication(existing, &incoming);
        assert_eq!(merged.title, "New title");
        assert_eq!(merged.publisher.as_deref(), Some("Springer"));
        assert_eq!(merged.publication_type, PublicationType::Article);
        assert!(merged.open_access);
        assert_eq!(merged.authors.len(), 2);
        assert_eq!(merged.authors[0].name, "Smith, John");
        assert_eq!(merged.authors[0].global_id.as_deref(), Some("0000-0002-1825-0097"));
    }

    #[tokio::test]
    async fn test_fuzzy_threshold_boundary() {
        let catalog = Arc::new(MemoryCatalog::new(Vec::new()));
        let base = draft(SourceSystem::OpenAire, "oa::4", "Glacier mass balance");
        let created = resolver(catalog.clone(), Arc::new(FixedScorer(0.0))).resolve(&base).await.unwrap();

        let sighting = draft(SourceSystem::Crossref, "cr::4", "Glacier mass-balance");
        let low = resolver(catalog.clone(), Arc::new(FixedScorer(0.60))).resolve(&sighting).await.unwrap();
        assert_eq!(low.action, UpsertAction::Created);
        assert_ne!(low.id, created.id);

        let high = resolver(catalog.clone(), Arc::new(FixedScorer(0.95))).resolve(&sighting).await.unwrap();
        assert_eq!(high.action, UpsertAction::Merged);
        assert_eq!(high.score, Some(0.95));
    }

    #[tokio::test]
    async fn test_same_title_with_two_of_three_authors_merges_at_threshold() {
        let catalog = Arc::new(MemoryCatalog::new(Vec::new()));
        let r = resolver(catalog.clone(), Arc::new(FuzzyScorer::default()));

        let first = authored(
            SourceSystem::OpenAire,
            "oa::10",
            "Glacier mass balance of the Eastern Alps, 2000-2020",
            &["Anna Berger", "Lukas Gruber", "Maria Huber"],
        );
        let second = authored(
            SourceSystem::Crossref,
            "cr::10",
            "Glacier mass balance of the Eastern Alps, 2000\u{2013}2020",
            &["Berger, Anna", "L. Gruber"],
        );

        let created = r.resolve(&first).await.unwrap();
        let merged = r.resolve(&second).await.unwrap();
        assert_eq!(merged.action, UpsertAction::Merged);
        assert_eq!(merged.id, created.id);
        assert!((merged.score.unwrap() - 0.9).abs() < 1e-9);
        assert_eq!(catalog.stats().await.unwrap().publications, 1);
    }

    #[tokio::test]
    async fn test_near_duplicate_with_shared_authors_merges() {
        let catalog = Arc::new(MemoryCatalog::new(Vec::new()));
        let r = resolver(catalog.clone(), Arc::new(FuzzyScorer::default()));

        let created = r
            .resolve(&authored(
                SourceSystem::Crossref,
                "10.1/snow",
                "Snow cover trends in the Hohe Tauern: a 40-year record",
                &["Huber, Maria", "Gruber, Lukas"],
            ))
            .await
            .unwrap();
        let sighting = authored(
            SourceSystem::OpenAire,
            "oa::11",
            "Snow Cover Trends in the Hohe Tauern - A 40 Year Record.",
            &["M. Huber", "Lukas Gruber"],
        );
        let merged = r.resolve(&sighting).await.unwrap();

        assert_eq!(merged.action, UpsertAction::Merged);
        assert_eq!(merged.id, created.id);
        let stored = catalog.get_publication(created.id).await.unwrap().unwrap();
        assert_eq!(stored.authors.len(), 2);
        assert_eq!(stored.sources.len(), 2);
    }

    #[tokio::test]
    async fn test_dissimilar_titles_with_shared_authors_stay_separate() {
        let catalog = Arc::new(MemoryCatalog::new(Vec::new()));
        let r = resolver(catalog.clone(), Arc::new(FuzzyScorer::default()));
        let authors = ["Anna Berger", "Lukas Gruber"];

        let a = r
            .resolve(&authored(SourceSystem::OpenAire, "oa::12", "Glacier mass balance of the Eastern Alps", &authors))
            .await
            .unwrap();
        let b = r
            .resolve(&authored(SourceSystem::OpenAire, "oa::13", "Permafrost degradation in the Eastern Alps", &authors))
            .await
            .unwrap();

        assert_eq!(b.action, UpsertAction::Created);
        assert_ne!(a.id, b.id);
        assert_eq!(catalog.stats().await.unwrap().publications, 2);
    }

    #[tokio::test]
    async fn test_fuzzy_search_stays_inside_the_year_partition() {
        let catalog = Arc::new(MemoryCatalog::new(Vec::new()));
        let r = resolver(catalog.clone(), Arc::new(FixedScorer(1.0)));
        r.resolve(&draft(SourceSystem::OpenAire, "oa::5", "Same title")).await.unwrap();

        let mut other_year = draft(SourceSystem::Crossref, "cr::5", "Same title");
        other_year.publication_year = Some(2023);
        assert_eq!(r.resolve(&other_year).await.unwrap().action, UpsertAction::Created);
    }

    #[tokio::test]
    async fn test_ties_go_to_most_recently_updated() {
        let catalog = Arc::new(MemoryCatalog::new(Vec::new()));
        let mut older = new_publication(&draft(SourceSystem::OpenAire, "oa::6", "Twin"));
        older.updated_at = Utc::now() - Duration::days(3);
        let older_id = older.id;
        let newer = new_publication(&draft(SourceSystem::OpenAire, "oa::7", "Twin"));
        let newer_id = newer.id;
        catalog.upsert_publication(older, PublicationKey::Id(older_id)).await.unwrap();
        catalog.upsert_publication(newer, PublicationKey::Id(newer_id)).await.unwrap();

        let r = resolver(catalog.clone(), Arc::new(FixedScorer(0.97)));
        let res = r.resolve(&draft(SourceSystem::Crossref, "cr::6", "Twin")).await.unwrap();
        assert_eq!(res.id, newer_id);
    }

    #[tokio::test]
    async fn test_candidate_with_other_doi_is_never_merged() {
        let catalog = Arc::new(MemoryCatalog::new(Vec::new()));
        let r = resolver(catalog.clone(), Arc::new(FixedScorer(0.99)));

        let mut a = draft(SourceSystem::Crossref, "10.1/a", "Erratum");
        a.doi = Some("10.1/a".into());
        let mut b = draft(SourceSystem::Crossref, "10.1/b", "Erratum");
        b.doi = Some("10.1/b".into());

        let ra = r.resolve(&a).await.unwrap();
        let rb = r.resolve(&b).await.unwrap();
        assert_eq!(rb.action, UpsertAction::Created);
        assert_ne!(ra.id, rb.id);

        // A DOI-less sighting may still merge into either.
        let c = draft(SourceSystem::OpenAire, "oa::8", "Erratum");
        assert_eq!(r.resolve(&c).await.unwrap().action, UpsertAction::Merged);
    }

    #[tokio::test]
    async fn test_blank_title_is_rejected() {
        let catalog = Arc::new(MemoryCatalog::new(Vec::new()));
        let r = resolver(catalog, Arc::new(FixedScorer(0.0)));
        let err = r.resolve(&draft(SourceSystem::OpenAire, "oa::9", "  ")).await.unwrap_err();
        assert!(matches!(err, HarvestError::InvalidRecord(_)));
    }
}
