//! Association edges: authorship and project → publication.
//!
//! Edges are composite-key upserts, so replaying a page is a no-op.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use armp_common::{Authorship, Project, ProjectPublication};
use armp_db::{CatalogGateway, Edge, EdgeOutcome};

use crate::error::HarvestError;
use crate::similarity::{meets_threshold, SimilarityScorer};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Minimum keyword overlap for an inferred project link.
    pub project_link_threshold: f64,
    /// Publications up to this many years after the project end are considered.
    pub years_after_end: i32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self { project_link_threshold: 0.5, years_after_end: 2 }
    }
}

/// Edges written for one project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectLinks {
    /// Outputs the funder listed by DOI.
    pub declared: u32,
    /// Matched by title keywords.
    pub inferred: u32,
}

pub struct LinkBuilder {
    gateway: Arc<dyn CatalogGateway>,
    scorer: Arc<dyn SimilarityScorer>,
    config: LinkConfig,
}

impl LinkBuilder {
    pub fn new(gateway: Arc<dyn CatalogGateway>, scorer: Arc<dyn SimilarityScorer>, config: LinkConfig) -> Self {
        Self { gateway, scorer, config }
    }

    pub async fn link_authorship(&self, publication_id: Uuid, researcher_id: Uuid, position: u32) -> Result<EdgeOutcome, HarvestError> {
        let edge = Edge::Authorship(Authorship { publication_id, researcher_id, position });
        Ok(self.gateway.upsert_edge(edge).await?)
    }

    pub async fn link_project_publication(&self, project_id: Uuid, publication_id: Uuid, confidence: f64) -> Result<EdgeOutcome, HarvestError> {
        let edge = Edge::ProjectPublication(ProjectPublication {
            project_id,
            publication_id,
            confidence: confidence.clamp(0.0, 1.0),
        });
        Ok(self.gateway.upsert_edge(edge).await?)
    }

    /// Link a stored project to its publications: funder-declared DOIs with
    /// confidence 1.0, then title-keyword matches within the project's years.
    #[instrument(skip(self, project), fields(grant = %project.grant_number))]
    pub async fn link_project(&self, project: &Project) -> Result<ProjectLinks, HarvestError> {
        let mut links = ProjectLinks::default();
        let mut declared: HashSet<Uuid> = HashSet::new();

        for doi in &project.publication_dois {
            if let Some(publication) = self.gateway.find_publication_by_doi(doi).await? {
                self.link_project_publication(project.id, publication.id, 1.0).await?;
                declared.insert(publication.id);
                links.declared += 1;
            }
        }

        let (Some(organization_id), Some(start)) = (&project.organization_id, project.start_date) else {
            return Ok(links);
        };
        let from_year = start.year();
        let to_year = project.end_date.map_or(from_year, |end| end.year()) + self.config.years_after_end;

        let window = self.gateway.publications_between(organization_id, from_year, to_year).await?;
        for publication in window.iter().filter(|p| !declared.contains(&p.id)) {
            let confidence = self.scorer.keyword_overlap(&project.title, &publication.title);
            if meets_threshold(confidence, self.config.project_link_threshold) {
                self.link_project_publication(project.id, publication.id, confidence).await?;
                links.inferred += 1;
            }
        }

        debug!(declared = links.declared, inferred = links.inferred, "Project linked");
        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    use armp_common::{Researcher, SourceSystem};
    use armp_db::{MemoryCatalog, PublicationKey, ResearcherKey};

    use crate::identity::new_publication;
    use crate::models::PublicationDraft;
    use crate::similarity::FuzzyScorer;

    const ORG: &str = "03ak46v85";

    async fn store_publication(catalog: &MemoryCatalog, title: &str, year: i32, doi: Option<&str>) -> Uuid {
        let mut draft = PublicationDraft::new(SourceSystem::OpenAire, title, title, ORG);
        draft.publication_year = Some(year);
        draft.doi = doi.map(String::from);
        let record = new_publication(&draft);
        let id = record.id;
        catalog.upsert_publication(record, PublicationKey::Id(id)).await.unwrap();
        id
    }

    fn project(title: &str, dois: &[&str]) -> Project {
        Project {
            id: Uuid::new_v4(),
            grant_number: "P 33712".into(),
            title: title.into(),
            abstract_text: None,
            funder: "FWF".into(),
            funding_amount: None,
            currency: Some("EUR".into()),
            start_date: NaiveDate::from_ymd_opt(2019, 1, 1),
            end_date: NaiveDate::from_ymd_opt(2021, 12, 31),
            principal_investigator: None,
            organization_id: Some(ORG.into()),
            keywords: Vec::new(),
            publication_dois: dois.iter().map(|d| d.to_string()).collect(),
            url: None,
            source: SourceSystem::Fwf,
            harvested_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn builder(catalog: Arc<MemoryCatalog>) -> LinkBuilder {
        LinkBuilder::new(catalog, Arc::new(FuzzyScorer::default()), LinkConfig::default())
    }

    #[tokio::test]
    async fn test_repeated_authorship_link_is_a_noop() {
        let catalog = Arc::new(MemoryCatalog::new(Vec::new()));
        let publication = store_publication(&catalog, "Glacier runoff", 2020, None).await;
        let researcher = Researcher::new("Anna Berger", ORG, None);
        let rid = researcher.id;
        catalog.upsert_researcher(researcher, ResearcherKey::Id(rid)).await.unwrap();

        let links = builder(catalog.clone());
        assert_eq!(links.link_authorship(publication, rid, 0).await.unwrap(), EdgeOutcome::Created);
        assert_eq!(links.link_authorship(publication, rid, 0).await.unwrap(), EdgeOutcome::Unchanged);
        assert_eq!(links.link_authorship(publication, rid, 2).await.unwrap(), EdgeOutcome::Updated);

        assert_eq!(catalog.get_researcher(rid).await.unwrap().unwrap().publication_count, 1);
        let edges = catalog.authorships_for_publication(publication).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].position, 2);
    }

    #[tokio::test]
    async fn test_project_links_declared_and_keyword_matches() {
        let catalog = Arc::new(MemoryCatalog::new(Vec::new()));
        let declared = store_publication(&catalog, "Unrelated title", 2018, Some("10.5194/tc-1")).await;
        let matching = store_publication(&catalog, "Glacier runoff under warming", 2022, None).await;
        let too_late = store_publication(&catalog, "Glacier runoff revisited", 2024, None).await;
        let off_topic = store_publication(&catalog, "Urban heat islands", 2020, None).await;

        let p = project("Glacier runoff modelling", &["10.5194/tc-1", "10.9999/missing"]);
        catalog.upsert_project(p.clone()).await.unwrap();

        let links = builder(catalog.clone()).link_project(&p).await.unwrap();
        assert_eq!(links, ProjectLinks { declared: 1, inferred: 1 });

        let edges = catalog.project_publications(p.id).await.unwrap();
        let linked: HashSet<Uuid> = edges.iter().map(|e| e.publication_id).collect();
        assert!(linked.contains(&declared));
        assert!(linked.contains(&matching));
        assert!(!linked.contains(&too_late));
        assert!(!linked.contains(&off_topic));
        let declared_edge = edges.iter().find(|e| e.publication_id == declared).unwrap();
        assert_eq!(declared_edge.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_project_without_dates_only_links_declared_dois() {
        let catalog = Arc::new(MemoryCatalog::new(Vec::new()));
        store_publication(&catalog, "Glacier runoff modelling", 2020, None).await;
        let mut p = project("Glacier runoff modelling", &[]);
        p.start_date = None;
        catalog.upsert_project(p.clone()).await.unwrap();

        let links = builder(catalog).link_project(&p).await.unwrap();
        assert_eq!(links, ProjectLinks::default());
    }
}
