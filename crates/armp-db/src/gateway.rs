//! Catalog gateway contract.
//!
//! Writes keyed by a global identifier are atomic conditional upserts. A
//! caller that loses a race receives [`DbError::Conflict`] and re-resolves
//! against the current state.
//!
//! [`DbError::Conflict`]: crate::DbError::Conflict

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use armp_common::{
    Authorship, HarvestCheckpoint, JobKey, Organization, Project, ProjectPublication, Publication,
    Researcher,
};

use crate::error::Result;

// ── Keys and outcomes ───────────────────────────────────────────────────────

/// Match key for a publication write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicationKey {
    /// Insert if no record carries this normalised DOI, otherwise
    /// version-checked replace of the record that does.
    Doi(String),
    /// Insert if the id is unknown, otherwise version-checked replace.
    Id(Uuid),
}

/// Match key for a researcher write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResearcherKey {
    GlobalId(String),
    Id(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    Created,
    Merged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: Uuid,
    pub action: UpsertAction,
    /// Version of the record after the write.
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Edge {
    Authorship(Authorship),
    ProjectPublication(ProjectPublication),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOutcome {
    Created,
    /// Same composite key, different position or confidence.
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub publications: u64,
    pub researchers: u64,
    pub projects: u64,
    pub authorships: u64,
    pub project_publications: u64,
}

// ── Advisory partition locks ───────────────────────────────────────────────

/// Scope of an advisory lock held across a fuzzy resolve-then-write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PartitionKey {
    Publications { organization_id: String, year: Option<i32> },
    Researchers { organization_id: String },
}

impl PartitionKey {
    pub fn publications(organization_id: &str, year: Option<i32>) -> Self {
        PartitionKey::Publications { organization_id: organization_id.to_string(), year }
    }

    pub fn researchers(organization_id: &str) -> Self {
        PartitionKey::Researchers { organization_id: organization_id.to_string() }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::Publications { organization_id, year: Some(y) } => {
                write!(f, "publications/{organization_id}/{y}")
            }
            PartitionKey::Publications { organization_id, year: None } => {
                write!(f, "publications/{organization_id}/undated")
            }
            PartitionKey::Researchers { organization_id } => {
                write!(f, "researchers/{organization_id}")
            }
        }
    }
}

/// Held for the duration of a fuzzy resolve; released on drop.
pub struct PartitionGuard {
    key: PartitionKey,
    _guard: OwnedMutexGuard<()>,
}

impl PartitionGuard {
    pub fn new(key: PartitionKey, guard: OwnedMutexGuard<()>) -> Self {
        Self { key, _guard: guard }
    }

    pub fn key(&self) -> &PartitionKey {
        &self.key
    }
}

impl fmt::Debug for PartitionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionGuard").field("key", &self.key).finish()
    }
}

// ── Gateway trait ───────────────────────────────────────────────────────────

#[async_trait]
pub trait CatalogGateway: Send + Sync {
    // Publications

    /// Conditional upsert. `record.version` must equal the stored version
    /// for a replace, and be 0 for an insert.
    async fn upsert_publication(&self, record: Publication, key: PublicationKey) -> Result<UpsertOutcome>;

    async fn get_publication(&self, id: Uuid) -> Result<Option<Publication>>;

    async fn find_publication_by_doi(&self, doi: &str) -> Result<Option<Publication>>;

    /// Publications of one (organization, year) partition. `year = None`
    /// selects undated records.
    async fn publication_candidates(&self, organization_id: &str, year: Option<i32>) -> Result<Vec<Publication>>;

    /// Dated publications of an organization within an inclusive year range.
    async fn publications_between(&self, organization_id: &str, from_year: i32, to_year: i32) -> Result<Vec<Publication>>;

    // Researchers

    async fn upsert_researcher(&self, record: Researcher, key: ResearcherKey) -> Result<UpsertOutcome>;

    async fn get_researcher(&self, id: Uuid) -> Result<Option<Researcher>>;

    async fn find_researcher_by_global_id(&self, global_id: &str) -> Result<Option<Researcher>>;

    async fn researcher_candidates(&self, organization_id: &str) -> Result<Vec<Researcher>>;

    // Projects

    /// Upsert by grant number. An existing project only has its null fields
    /// filled in.
    async fn upsert_project(&self, project: Project) -> Result<UpsertOutcome>;

    async fn find_project_by_grant(&self, grant_number: &str) -> Result<Option<Project>>;

    // Edges

    async fn upsert_edge(&self, edge: Edge) -> Result<EdgeOutcome>;

    async fn authorships_for_publication(&self, publication_id: Uuid) -> Result<Vec<Authorship>>;

    async fn project_publications(&self, project_id: Uuid) -> Result<Vec<ProjectPublication>>;

    // Checkpoints

    async fn read_checkpoint(&self, key: &JobKey) -> Result<Option<HarvestCheckpoint>>;

    async fn write_checkpoint(&self, key: &JobKey, state: &HarvestCheckpoint) -> Result<()>;

    /// Append a finished run to the key's audit trail.
    async fn archive_run(&self, state: &HarvestCheckpoint) -> Result<()>;

    async fn run_history(&self, key: &JobKey) -> Result<Vec<HarvestCheckpoint>>;

    async fn list_checkpoints(&self) -> Result<Vec<HarvestCheckpoint>>;

    // Misc

    async fn lock_partition(&self, key: PartitionKey) -> Result<PartitionGuard>;

    async fn organization(&self, id: &str) -> Result<Option<Organization>>;

    async fn organizations(&self) -> Result<Vec<Organization>>;

    async fn stats(&self) -> Result<CatalogStats>;
}
