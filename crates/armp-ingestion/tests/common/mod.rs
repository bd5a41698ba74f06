//! Shared fixtures for the pipeline integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use serde_json::{json, Value};
use uuid::Uuid;

use armp_common::{
    organizations, AuthorMention, Authorship, HarvestCheckpoint, JobKey, Organization, PageCursor, Project,
    ProjectPublication, Publication, Researcher, SourceSystem,
};
use armp_db::{
    CatalogGateway, CatalogStats, DbError, Edge, EdgeOutcome, MemoryCatalog, PartitionGuard, PartitionKey,
    PublicationKey, ResearcherKey, UpsertOutcome,
};
use armp_ingestion::{
    AdapterRegistry, FuzzyScorer, Harvester, NormalizedRecord, Page, PipelineConfig, PublicationDraft,
    RawRecord, RetryPolicy, SourceAdapter, SourceError, SourceScope,
};

pub const ORG: &str = "03prydq77";

// ── Fixture adapter ─────────────────────────────────────────────────────────

/// Serves pre-built pages of publication payloads. Page `n` lives at
/// cursor `Offset(n)`.
pub struct FixtureAdapter {
    system: SourceSystem,
    pages: Vec<Vec<Value>>,
    /// Page index → remaining transient failures.
    failures: Mutex<HashMap<u64, u32>>,
    fetches: Mutex<Vec<u64>>,
    /// Cancel this token while serving the given page.
    cancel_on_fetch: Mutex<Option<(u64, CancellationToken)>>,
}

impl FixtureAdapter {
    pub fn new(system: SourceSystem, pages: Vec<Vec<Value>>) -> Self {
        Self {
            system,
            pages,
            failures: Mutex::new(HashMap::new()),
            fetches: Mutex::new(Vec::new()),
            cancel_on_fetch: Mutex::new(None),
        }
    }

    /// Simulate an operator cancelling while page `index` is being fetched.
    pub fn cancel_when_fetching(self, index: u64, token: CancellationToken) -> Self {
        *self.cancel_on_fetch.lock().unwrap() = Some((index, token));
        self
    }

    /// Make the next `times` fetches of page `index` fail transiently.
    pub fn fail_page(self, index: u64, times: u32) -> Self {
        self.failures.lock().unwrap().insert(index, times);
        self
    }

    /// Page indexes requested so far, in order.
    pub fn fetched_pages(&self) -> Vec<u64> {
        self.fetches.lock().unwrap().clone()
    }
}

fn page_index(cursor: Option<&PageCursor>) -> u64 {
    match cursor {
        Some(PageCursor::Offset(n)) => *n,
        _ => 0,
    }
}

#[async_trait]
impl SourceAdapter for FixtureAdapter {
    fn system(&self) -> SourceSystem {
        self.system
    }

    async fn fetch_page(&self, _scope: &SourceScope, cursor: Option<&PageCursor>) -> Result<Page, SourceError> {
        let index = page_index(cursor);
        self.fetches.lock().unwrap().push(index);
        if let Some((at, token)) = self.cancel_on_fetch.lock().unwrap().as_ref() {
            if *at == index {
                token.cancel();
            }
        }

        if let Some(left) = self.failures.lock().unwrap().get_mut(&index) {
            if *left > 0 {
                *left -= 1;
                return Err(SourceError::Transient { system: self.system, message: format!("page {index} timed out") });
            }
        }

        let Some(payloads) = self.pages.get(index as usize) else {
            return Ok(Page::default());
        };
        let records = payloads
            .iter()
            .map(|p| RawRecord::new(p["id"].as_str().map(String::from), p.clone()))
            .collect();
        let next_cursor = ((index as usize) + 1 < self.pages.len()).then(|| PageCursor::Offset(index + 1));
        Ok(Page { records, next_cursor })
    }

    fn normalize(&self, raw: &RawRecord, scope: &SourceScope) -> Result<NormalizedRecord, SourceError> {
        let p = &raw.payload;
        let title = p["title"]
            .as_str()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| SourceError::malformed(self.system, raw.native_id(), "missing title"))?;
        let mut draft = PublicationDraft::new(self.system, raw.native_id(), title, scope.organization_id());
        draft.doi = p["doi"].as_str().and_then(armp_common::normalize_doi);
        draft.publication_year = p["year"].as_i64().map(|y| y as i32);
        draft.authors = p["authors"]
            .as_array()
            .map(|a| a.iter().filter_map(|n| n.as_str()).map(AuthorMention::new).collect())
            .unwrap_or_default();
        draft.abstract_text = p["abstract"].as_str().map(String::from);
        Ok(NormalizedRecord::Publication(draft))
    }

    fn skip_page(&self, cursor: Option<&PageCursor>) -> Option<PageCursor> {
        Some(PageCursor::Offset(page_index(cursor) + 1))
    }
}

// ── Payload builders ────────────────────────────────────────────────────────

const FIRST: &[&str] = &[
    "alpine", "boreal", "coastal", "desert", "estuarine", "fluvial", "glacial", "highland", "insular",
    "jurassic", "karstic", "lacustrine", "montane",
];
const SECOND: &[&str] = &[
    "nitrogen", "ozone", "phosphorus", "quartz", "radon", "silica", "tungsten", "uranium", "vanadium",
    "wolfram", "xenon", "yttrium", "zircon",
];
const THIRD: &[&str] = &[
    "budgets", "cycles", "dynamics", "exchange", "fluxes", "gradients", "histories", "inventories",
    "journeys", "kinetics", "legacies", "mobility", "networks",
];

/// A title unique to `n` (n < 2197). Two different titles always differ in
/// at least one of three words, which keeps them well below the merge
/// threshold.
pub fn unique_title(n: usize) -> String {
    let (a, b, c) = (n / 169 % 13, n / 13 % 13, n % 13);
    format!("{} {} {} survey", FIRST[a], SECOND[b], THIRD[c])
}

pub fn publication(id: &str, n: usize, doi: Option<&str>, year: i32) -> Value {
    json!({ "id": id, "title": unique_title(n), "doi": doi, "year": year, "authors": [] })
}

/// Split payloads into pages of `size`.
pub fn paginate(records: Vec<Value>, size: usize) -> Vec<Vec<Value>> {
    records.chunks(size).map(|c| c.to_vec()).collect()
}

// ── Failure-injecting gateway ───────────────────────────────────────────────

/// Wraps a [`MemoryCatalog`] and injects store failures on demand.
pub struct FlakyCatalog {
    pub inner: MemoryCatalog,
    /// While set, publication writes fail with `Unavailable`.
    pub publication_outage: AtomicBool,
    /// Publication writes allowed before the outage starts.
    pub publication_writes_before_outage: AtomicU32,
    /// The next N checkpoint writes fail.
    pub checkpoint_failures: AtomicU32,
}

impl FlakyCatalog {
    pub fn new() -> Self {
        Self {
            inner: MemoryCatalog::new(organizations::seeded()),
            publication_outage: AtomicBool::new(false),
            publication_writes_before_outage: AtomicU32::new(u32::MAX),
            checkpoint_failures: AtomicU32::new(0),
        }
    }

    /// Fail every publication write after the first `allowed`.
    pub fn outage_after(&self, allowed: u32) {
        self.publication_writes_before_outage.store(allowed, Ordering::SeqCst);
    }

    pub fn restore(&self) {
        self.publication_outage.store(false, Ordering::SeqCst);
        self.publication_writes_before_outage.store(u32::MAX, Ordering::SeqCst);
    }

    fn publication_write_allowed(&self) -> bool {
        if self.publication_outage.load(Ordering::SeqCst) {
            return false;
        }
        let left = self.publication_writes_before_outage.load(Ordering::SeqCst);
        if left == 0 {
            self.publication_outage.store(true, Ordering::SeqCst);
            return false;
        }
        if left != u32::MAX {
            self.publication_writes_before_outage.store(left - 1, Ordering::SeqCst);
        }
        true
    }
}

#[async_trait]
impl CatalogGateway for FlakyCatalog {
    async fn upsert_publication(&self, record: Publication, key: PublicationKey) -> armp_db::Result<UpsertOutcome> {
        if !self.publication_write_allowed() {
            return Err(DbError::Unavailable("connection refused".into()));
        }
        self.inner.upsert_publication(record, key).await
    }

    async fn get_publication(&self, id: Uuid) -> armp_db::Result<Option<Publication>> {
        self.inner.get_publication(id).await
    }

    async fn find_publication_by_doi(&self, doi: &str) -> armp_db::Result<Option<Publication>> {
        self.inner.find_publication_by_doi(doi).await
    }

    async fn publication_candidates(&self, organization_id: &str, year: Option<i32>) -> armp_db::Result<Vec<Publication>> {
        self.inner.publication_candidates(organization_id, year).await
    }

    async fn publications_between(&self, organization_id: &str, from_year: i32, to_year: i32) -> armp_db::Result<Vec<Publication>> {
        self.inner.publications_between(organization_id, from_year, to_year).await
    }

    async fn upsert_researcher(&self, record: Researcher, key: ResearcherKey) -> armp_db::Result<UpsertOutcome> {
        self.inner.upsert_researcher(record, key).await
    }

    async fn get_researcher(&self, id: Uuid) -> armp_db::Result<Option<Researcher>> {
        self.inner.get_researcher(id).await
    }

    async fn find_researcher_by_global_id(&self, global_id: &str) -> armp_db::Result<Option<Researcher>> {
        self.inner.find_researcher_by_global_id(global_id).await
    }

    async fn researcher_candidates(&self, organization_id: &str) -> armp_db::Result<Vec<Researcher>> {
        self.inner.researcher_candidates(organization_id).await
    }

    async fn upsert_project(&self, project: Project) -> armp_db::Result<UpsertOutcome> {
        self.inner.upsert_project(project).await
    }

    async fn find_project_by_grant(&self, grant_number: &str) -> armp_db::Result<Option<Project>> {
        self.inner.find_project_by_grant(grant_number).await
    }

    async fn upsert_edge(&self, edge: Edge) -> armp_db::Result<EdgeOutcome> {
        self.inner.upsert_edge(edge).await
    }

    async fn authorships_for_publication(&self, publication_id: Uuid) -> armp_db::Result<Vec<Authorship>> {
        self.inner.authorships_for_publication(publication_id).await
    }

    async fn project_publications(&self, project_id: Uuid) -> armp_db::Result<Vec<ProjectPublication>> {
        self.inner.project_publications(project_id).await
    }

    async fn read_checkpoint(&self, key: &JobKey) -> armp_db::Result<Option<HarvestCheckpoint>> {
        self.inner.read_checkpoint(key).await
    }

    async fn write_checkpoint(&self, key: &JobKey, state: &HarvestCheckpoint) -> armp_db::Result<()> {
        let pending = self.checkpoint_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.checkpoint_failures.store(pending - 1, Ordering::SeqCst);
            return Err(DbError::Unavailable("checkpoint table locked".into()));
        }
        self.inner.write_checkpoint(key, state).await
    }

    async fn archive_run(&self, state: &HarvestCheckpoint) -> armp_db::Result<()> {
        self.inner.archive_run(state).await
    }

    async fn run_history(&self, key: &JobKey) -> armp_db::Result<Vec<HarvestCheckpoint>> {
        self.inner.run_history(key).await
    }

    async fn list_checkpoints(&self) -> armp_db::Result<Vec<HarvestCheckpoint>> {
        self.inner.list_checkpoints().await
    }

    async fn lock_partition(&self, key: PartitionKey) -> armp_db::Result<PartitionGuard> {
        self.inner.lock_partition(key).await
    }

    async fn organization(&self, id: &str) -> armp_db::Result<Option<Organization>> {
        self.inner.organization(id).await
    }

    async fn organizations(&self) -> armp_db::Result<Vec<Organization>> {
        self.inner.organizations().await
    }

    async fn stats(&self) -> armp_db::Result<CatalogStats> {
        self.inner.stats().await
    }
}

// ── Harness ─────────────────────────────────────────────────────────────────

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        retry: RetryPolicy::immediate(3),
        ..PipelineConfig::default()
    }
}

pub fn registry(adapters: Vec<Arc<FixtureAdapter>>) -> AdapterRegistry {
    adapters
        .into_iter()
        .map(|a| (a.system(), a as Arc<dyn SourceAdapter>))
        .collect()
}

pub fn harvester(gateway: Arc<dyn CatalogGateway>, adapters: Vec<Arc<FixtureAdapter>>) -> Harvester {
    harvester_with(gateway, adapters, test_config())
}

pub fn harvester_with(
    gateway: Arc<dyn CatalogGateway>,
    adapters: Vec<Arc<FixtureAdapter>>,
    config: PipelineConfig,
) -> Harvester {
    Harvester::new(gateway, registry(adapters), Arc::new(FuzzyScorer::default()), config)
}
