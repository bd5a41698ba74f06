//! Embedded in-process catalog.
//!
//! Every write takes the single state lock, which makes each conditional
//! upsert atomic. Partition locks are separate and purely advisory.
//!
//! With a snapshot path, each committed change is also recorded in memory
//! and appended to the journal on the next checkpoint write. The snapshot
//! itself is rewritten only on compaction: every `compact_after` journal
//! lines, after a failed append, and on [`MemoryCatalog::flush`].

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use armp_common::{
    Authorship, HarvestCheckpoint, JobKey, Organization, Project, ProjectPublication, Publication,
    Researcher,
};

use crate::error::{DbError, Result};
use crate::gateway::{
    CatalogGateway, CatalogStats, Edge, EdgeOutcome, PartitionGuard, PartitionKey,
    PublicationKey, ResearcherKey, UpsertAction, UpsertOutcome,
};
use crate::journal::{self, JournalEntry, JournalLine};
use crate::snapshot::{self, Snapshot};

/// Journal lines appended between two compactions, by default.
pub const DEFAULT_COMPACT_AFTER: u64 = 50_000;

type PartitionSlot = (String, Option<i32>);

#[derive(Default)]
pub(crate) struct CatalogState {
    pub(crate) publications: HashMap<Uuid, Publication>,
    doi_index: HashMap<String, Uuid>,
    publication_partitions: HashMap<PartitionSlot, BTreeSet<Uuid>>,
    pub(crate) researchers: HashMap<Uuid, Researcher>,
    global_id_index: HashMap<String, Uuid>,
    researcher_orgs: HashMap<String, BTreeSet<Uuid>>,
    pub(crate) projects: HashMap<Uuid, Project>,
    grant_index: HashMap<String, Uuid>,
    pub(crate) authorships: HashMap<(Uuid, Uuid), Authorship>,
    pub(crate) project_publications: HashMap<(Uuid, Uuid), ProjectPublication>,
    pub(crate) checkpoints: HashMap<JobKey, HarvestCheckpoint>,
    pub(crate) history: Vec<HarvestCheckpoint>,
    /// Sequence of the last recorded change.
    pub(crate) seq: u64,
    /// Changes not yet in the journal; `None` when nothing is persisted.
    pending: Option<Vec<JournalLine>>,
}

impl CatalogState {
    fn record(&mut self, entry: impl FnOnce() -> JournalEntry) {
        if let Some(pending) = self.pending.as_mut() {
            self.seq += 1;
            pending.push(JournalLine { seq: self.seq, entry: entry() });
        }
    }

    /// Redo one journalled change on top of a loaded snapshot.
    fn apply(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::Publication(p) => {
                if let Some(previous) = self.publications.remove(&p.id) {
                    self.unindex_publication(&previous);
                }
                self.index_publication(&p);
                self.publications.insert(p.id, p);
            }
            JournalEntry::Researcher(r) => {
                if let Some(previous) = self.researchers.remove(&r.id) {
                    self.unindex_researcher(&previous);
                }
                self.index_researcher(&r);
                self.researchers.insert(r.id, r);
            }
            JournalEntry::Project(p) => {
                self.grant_index.insert(p.grant_number.clone(), p.id);
                self.projects.insert(p.id, p);
            }
            JournalEntry::Authorship(a) => {
                let key = (a.publication_id, a.researcher_id);
                if !self.authorships.contains_key(&key) {
                    if let Some(r) = self.researchers.get_mut(&a.researcher_id) {
                        r.publication_count += 1;
                    }
                }
                self.authorships.insert(key, a);
            }
            JournalEntry::ProjectPublication(e) => {
                self.project_publications.insert((e.project_id, e.publication_id), e);
            }
            JournalEntry::Checkpoint(c) => {
                self.checkpoints.insert(c.key.clone(), c);
            }
            JournalEntry::Archived(c) => self.history.push(c),
        }
    }

    fn index_publication(&mut self, p: &Publication) {
        if let Some(doi) = &p.doi {
            self.doi_index.insert(doi.clone(), p.id);
        }
        self.publication_partitions
            .entry((p.organization_id.clone(), p.publication_year))
            .or_default()
            .insert(p.id);
    }

    fn unindex_publication(&mut self, p: &Publication) {
        if let Some(doi) = &p.doi {
            if self.doi_index.get(doi) == Some(&p.id) {
                self.doi_index.remove(doi);
            }
        }
        if let Some(ids) = self
            .publication_partitions
            .get_mut(&(p.organization_id.clone(), p.publication_year))
        {
            ids.remove(&p.id);
        }
    }

    fn index_researcher(&mut self, r: &Researcher) {
        if let Some(gid) = &r.global_id {
            self.global_id_index.insert(gid.clone(), r.id);
        }
        self.researcher_orgs
            .entry(r.organization_id.clone())
            .or_default()
            .insert(r.id);
    }

    fn unindex_researcher(&mut self, r: &Researcher) {
        if let Some(gid) = &r.global_id {
            if self.global_id_index.get(gid) == Some(&r.id) {
                self.global_id_index.remove(gid);
            }
        }
        if let Some(ids) = self.researcher_orgs.get_mut(&r.organization_id) {
            ids.remove(&r.id);
        }
    }

    /// Rebuild every secondary index from the primary maps.
    pub(crate) fn rebuild_indexes(&mut self) {
        self.doi_index.clear();
        self.publication_partitions.clear();
        self.global_id_index.clear();
        self.researcher_orgs.clear();
        self.grant_index.clear();

        let publications: Vec<Publication> = self.publications.values().cloned().collect();
        for p in &publications {
            self.index_publication(p);
        }
        let researchers: Vec<Researcher> = self.researchers.values().cloned().collect();
        for r in &researchers {
            self.index_researcher(r);
        }
        for project in self.projects.values() {
            self.grant_index.insert(project.grant_number.clone(), project.id);
        }
    }
}

/// Bookkeeping for the files, guarded by one lock so appends and
/// compactions never interleave.
#[derive(Debug, Default)]
struct JournalState {
    /// Lines in the journal file since the last compaction.
    appended: u64,
    /// An append failed part-way; the file may end in a torn line.
    needs_compaction: bool,
}

/// In-memory catalog with optional snapshot + journal persistence.
pub struct MemoryCatalog {
    state: RwLock<CatalogState>,
    organizations: HashMap<String, Organization>,
    partition_locks: Mutex<HashMap<PartitionKey, Arc<Mutex<()>>>>,
    snapshot_path: Option<PathBuf>,
    journal: Mutex<JournalState>,
    compact_after: u64,
}

impl MemoryCatalog {
    /// A purely in-memory catalog.
    pub fn new(organizations: Vec<Organization>) -> Self {
        Self {
            state: RwLock::new(CatalogState::default()),
            organizations: organizations.into_iter().map(|o| (o.id.clone(), o)).collect(),
            partition_locks: Mutex::new(HashMap::new()),
            snapshot_path: None,
            journal: Mutex::new(JournalState::default()),
            compact_after: DEFAULT_COMPACT_AFTER,
        }
    }

    /// Open a catalog backed by a snapshot file, loading it and replaying
    /// its journal if they exist.
    pub async fn open(path: impl AsRef<Path>, organizations: Vec<Organization>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut catalog = Self::new(organizations);

        let mut state = match snapshot::read(&path).await? {
            Some(state) => {
                info!(
                    path = %path.display(),
                    publications = state.publications.len(),
                    researchers = state.researchers.len(),
                    "Loaded catalog snapshot"
                );
                state
            }
            None => {
                info!(path = %path.display(), "No catalog snapshot yet, starting empty");
                CatalogState::default()
            }
        };

        let lines = journal::read(journal::path_for(&path)).await?;
        let on_file = lines.len() as u64;
        let replay: Vec<JournalLine> = lines.into_iter().filter(|l| l.seq > state.seq).collect();
        if !replay.is_empty() {
            info!(entries = replay.len(), from_seq = state.seq, "Replaying catalog journal");
        }
        for line in replay {
            state.seq = state.seq.max(line.seq);
            state.apply(line.entry);
        }
        state.pending = Some(Vec::new());

        catalog.state = RwLock::new(state);
        catalog.journal = Mutex::new(JournalState { appended: on_file, needs_compaction: false });
        catalog.snapshot_path = Some(path);
        Ok(catalog)
    }

    /// Rewrite the snapshot after this many journal lines.
    pub fn with_compact_after(mut self, lines: u64) -> Self {
        self.compact_after = lines.max(1);
        self
    }

    /// Fold everything into a fresh snapshot and empty the journal. No-op
    /// for a purely in-memory catalog.
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let mut files = self.journal.lock().await;
        self.compact(path, &mut files).await
    }

    /// Make every change recorded so far durable.
    async fn sync(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let mut files = self.journal.lock().await;
        if files.needs_compaction {
            return self.compact(path, &mut files).await;
        }

        let lines = match self.state.write().await.pending.as_mut() {
            Some(pending) => std::mem::take(pending),
            None => return Ok(()),
        };
        if !lines.is_empty() {
            let count = lines.len() as u64;
            let written = match journal::encode(&lines) {
                Ok(bytes) => journal::append(journal::path_for(path), bytes).await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                warn!(error = %e, "Journal append failed, next sync rewrites the snapshot");
                files.needs_compaction = true;
                // Ahead of anything recorded meanwhile.
                if let Some(pending) = self.state.write().await.pending.as_mut() {
                    let newer = std::mem::replace(pending, lines);
                    pending.extend(newer);
                }
                return Err(e);
            }
            files.appended += count;
        }

        if files.appended >= self.compact_after {
            self.compact(path, &mut files).await?;
        }
        Ok(())
    }

    /// The state is copied under the read lock; encoding and I/O run after
    /// it is released.
    async fn compact(&self, path: &Path, files: &mut JournalState) -> Result<()> {
        let snapshot = Snapshot::capture(&*self.state.read().await);
        let seq = snapshot.journal_seq;
        let bytes = snapshot::encode(snapshot).await?;
        snapshot::write_atomic(path.to_path_buf(), bytes).await?;

        if let Some(pending) = self.state.write().await.pending.as_mut() {
            pending.retain(|l| l.seq > seq);
        }
        journal::reset(journal::path_for(path)).await?;
        *files = JournalState::default();
        debug!(path = %path.display(), seq, "Catalog snapshot written");
        Ok(())
    }
}

fn conflict(what: impl std::fmt::Display) -> DbError {
    DbError::Conflict(what.to_string())
}

#[async_trait]
impl CatalogGateway for MemoryCatalog {
    // ── Publication operations ──────────────────────────────────────────────

    #[instrument(skip(self, record), fields(publication_id = %record.id))]
    async fn upsert_publication(&self, mut record: Publication, key: PublicationKey) -> Result<UpsertOutcome> {
        if record.title.trim().is_empty() {
            return Err(DbError::InvalidRecord(format!("publication {} has no title", record.id)));
        }

        let mut state = self.state.write().await;

        let existing_id = match &key {
            PublicationKey::Doi(doi) => {
                if record.doi.as_deref() != Some(doi.as_str()) {
                    return Err(DbError::InvalidRecord(format!(
                        "publication {} keyed by DOI {doi} carries {:?}",
                        record.id, record.doi
                    )));
                }
                state.doi_index.get(doi).copied()
            }
            PublicationKey::Id(id) => {
                if record.id != *id {
                    return Err(DbError::InvalidRecord(format!(
                        "publication {} keyed by id {id}",
                        record.id
                    )));
                }
                state.publications.contains_key(id).then_some(*id)
            }
        };

        // The DOI unique index holds for every write, not only DOI-keyed ones.
        if let Some(doi) = &record.doi {
            if let Some(owner) = state.doi_index.get(doi) {
                if Some(*owner) != existing_id {
                    return Err(conflict(format_args!("doi {doi}")));
                }
            }
        }

        match existing_id {
            None => {
                if record.version != 0 {
                    return Err(conflict(format_args!("publication {}", record.id)));
                }
                record.version = 1;
                state.index_publication(&record);
                state.record(|| JournalEntry::Publication(record.clone()));
                let id = record.id;
                state.publications.insert(id, record);
                Ok(UpsertOutcome { id, action: UpsertAction::Created, version: 1 })
            }
            Some(id) => {
                let previous = match state.publications.get(&id) {
                    Some(p) => p.clone(),
                    None => return Err(DbError::NotFound(format!("publication {id}"))),
                };
                if previous.id != record.id || previous.version != record.version {
                    return Err(conflict(format_args!("publication {id}")));
                }
                record.version = previous.version + 1;
                let version = record.version;
                state.unindex_publication(&previous);
                state.index_publication(&record);
                state.record(|| JournalEntry::Publication(record.clone()));
                state.publications.insert(id, record);
                Ok(UpsertOutcome { id, action: UpsertAction::Merged, version })
            }
        }
    }

    async fn get_publication(&self, id: Uuid) -> Result<Option<Publication>> {
        Ok(self.state.read().await.publications.get(&id).cloned())
    }

    async fn find_publication_by_doi(&self, doi: &str) -> Result<Option<Publication>> {
        let state = self.state.read().await;
        Ok(state
            .doi_index
            .get(doi)
            .and_then(|id| state.publications.get(id))
            .cloned())
    }

    async fn publication_candidates(&self, organization_id: &str, year: Option<i32>) -> Result<Vec<Publication>> {
        let state = self.state.read().await;
        let Some(ids) = state
            .publication_partitions
            .get(&(organization_id.to_string(), year))
        else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| state.publications.get(id)).cloned().collect())
    }

    async fn publications_between(&self, organization_id: &str, from_year: i32, to_year: i32) -> Result<Vec<Publication>> {
        let state = self.state.read().await;
        let mut out = Vec::new();
        for year in from_year..=to_year {
            if let Some(ids) = state
                .publication_partitions
                .get(&(organization_id.to_string(), Some(year)))
            {
                out.extend(ids.iter().filter_map(|id| state.publications.get(id)).cloned());
            }
        }
        Ok(out)
    }

    // ── Researcher operations ───────────────────────────────────────────────

    #[instrument(skip(self, record), fields(researcher_id = %record.id))]
    async fn upsert_researcher(&self, mut record: Researcher, key: ResearcherKey) -> Result<UpsertOutcome> {
        let mut state = self.state.write().await;

        let existing_id = match &key {
            ResearcherKey::GlobalId(gid) => {
                if record.global_id.as_deref() != Some(gid.as_str()) {
                    return Err(DbError::InvalidRecord(format!(
                        "researcher {} keyed by global id {gid} carries {:?}",
                        record.id, record.global_id
                    )));
                }
                state.global_id_index.get(gid).copied()
            }
            ResearcherKey::Id(id) => {
                if record.id != *id {
                    return Err(DbError::InvalidRecord(format!(
                        "researcher {} keyed by id {id}",
                        record.id
                    )));
                }
                state.researchers.contains_key(id).then_some(*id)
            }
        };

        if let Some(gid) = &record.global_id {
            if let Some(owner) = state.global_id_index.get(gid) {
                if Some(*owner) != existing_id {
                    return Err(conflict(format_args!("global id {gid}")));
                }
            }
        }

        match existing_id {
            None => {
                if record.version != 0 {
                    return Err(conflict(format_args!("researcher {}", record.id)));
                }
                record.version = 1;
                record.publication_count = 0;
                state.index_researcher(&record);
                state.record(|| JournalEntry::Researcher(record.clone()));
                let id = record.id;
                state.researchers.insert(id, record);
                Ok(UpsertOutcome { id, action: UpsertAction::Created, version: 1 })
            }
            Some(id) => {
                let previous = match state.researchers.get(&id) {
                    Some(r) => r.clone(),
                    None => return Err(DbError::NotFound(format!("researcher {id}"))),
                };
                if previous.id != record.id || previous.version != record.version {
                    return Err(conflict(format_args!("researcher {id}")));
                }
                record.version = previous.version + 1;
                // Derived from edges; callers never set it.
                record.publication_count = previous.publication_count;
                let version = record.version;
                state.unindex_researcher(&previous);
                state.index_researcher(&record);
                state.record(|| JournalEntry::Researcher(record.clone()));
                state.researchers.insert(id, record);
                Ok(UpsertOutcome { id, action: UpsertAction::Merged, version })
            }
        }
    }

    async fn get_researcher(&self, id: Uuid) -> Result<Option<Researcher>> {
        Ok(self.state.read().await.researchers.get(&id).cloned())
    }

    async fn find_researcher_by_global_id(&self, global_id: &str) -> Result<Option<Researcher>> {
        let state = self.state.read().await;
        Ok(state
            .global_id_index
            .get(global_id)
            .and_then(|id| state.researchers.get(id))
            .cloned())
    }

    async fn researcher_candidates(&self, organization_id: &str) -> Result<Vec<Researcher>> {
        let state = self.state.read().await;
        let Some(ids) = state.researcher_orgs.get(organization_id) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| state.researchers.get(id)).cloned().collect())
    }

    // ── Project operations ──────────────────────────────────────────────────

    async fn upsert_project(&self, project: Project) -> Result<UpsertOutcome> {
        if project.grant_number.trim().is_empty() {
            return Err(DbError::InvalidRecord(format!("project {} has no grant number", project.id)));
        }
        let mut state = self.state.write().await;

        let Some(id) = state.grant_index.get(&project.grant_number).copied() else {
            let id = project.id;
            state.grant_index.insert(project.grant_number.clone(), id);
            state.record(|| JournalEntry::Project(project.clone()));
            state.projects.insert(id, project);
            return Ok(UpsertOutcome { id, action: UpsertAction::Created, version: 1 });
        };

        let existing = state
            .projects
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("project {id}")))?;
        fill_missing_project_fields(existing, project);
        existing.updated_at = Utc::now();
        let merged = existing.clone();
        state.record(|| JournalEntry::Project(merged));
        Ok(UpsertOutcome { id, action: UpsertAction::Merged, version: 1 })
    }

    async fn find_project_by_grant(&self, grant_number: &str) -> Result<Option<Project>> {
        let state = self.state.read().await;
        Ok(state
            .grant_index
            .get(grant_number)
            .and_then(|id| state.projects.get(id))
            .cloned())
    }

    // ── Edge operations ─────────────────────────────────────────────────────

    async fn upsert_edge(&self, edge: Edge) -> Result<EdgeOutcome> {
        let mut state = self.state.write().await;
        match edge {
            Edge::Authorship(edge) => {
                if !state.publications.contains_key(&edge.publication_id) {
                    return Err(DbError::NotFound(format!("publication {}", edge.publication_id)));
                }
                if !state.researchers.contains_key(&edge.researcher_id) {
                    return Err(DbError::NotFound(format!("researcher {}", edge.researcher_id)));
                }
                let key = (edge.publication_id, edge.researcher_id);
                let previous = state.authorships.get(&key).cloned();
                match previous {
                    Some(prev) if prev == edge => Ok(EdgeOutcome::Unchanged),
                    Some(_) => {
                        state.record(|| JournalEntry::Authorship(edge.clone()));
                        state.authorships.insert(key, edge);
                        Ok(EdgeOutcome::Updated)
                    }
                    None => {
                        if let Some(r) = state.researchers.get_mut(&edge.researcher_id) {
                            r.publication_count += 1;
                        }
                        state.record(|| JournalEntry::Authorship(edge.clone()));
                        state.authorships.insert(key, edge);
                        Ok(EdgeOutcome::Created)
                    }
                }
            }
            Edge::ProjectPublication(edge) => {
                if !state.projects.contains_key(&edge.project_id) {
                    return Err(DbError::NotFound(format!("project {}", edge.project_id)));
                }
                if !state.publications.contains_key(&edge.publication_id) {
                    return Err(DbError::NotFound(format!("publication {}", edge.publication_id)));
                }
                let key = (edge.project_id, edge.publication_id);
                let previous = state.project_publications.get(&key).cloned();
                match previous {
                    Some(prev) if prev == edge => Ok(EdgeOutcome::Unchanged),
                    Some(_) => {
                        state.record(|| JournalEntry::ProjectPublication(edge.clone()));
                        state.project_publications.insert(key, edge);
                        Ok(EdgeOutcome::Updated)
                    }
                    None => {
                        state.record(|| JournalEntry::ProjectPublication(edge.clone()));
                        state.project_publications.insert(key, edge);
                        Ok(EdgeOutcome::Created)
                    }
                }
            }
        }
    }

    async fn authorships_for_publication(&self, publication_id: Uuid) -> Result<Vec<Authorship>> {
        let state = self.state.read().await;
        let mut edges: Vec<Authorship> = state
            .authorships
            .values()
            .filter(|a| a.publication_id == publication_id)
            .cloned()
            .collect();
        edges.sort_by_key(|a| a.position);
        Ok(edges)
    }

    async fn project_publications(&self, project_id: Uuid) -> Result<Vec<ProjectPublication>> {
        let state = self.state.read().await;
        Ok(state
            .project_publications
            .values()
            .filter(|e| e.project_id == project_id)
            .cloned()
            .collect())
    }

    // ── Checkpoints ─────────────────────────────────────────────────────────

    async fn read_checkpoint(&self, key: &JobKey) -> Result<Option<HarvestCheckpoint>> {
        Ok(self.state.read().await.checkpoints.get(key).cloned())
    }

    #[instrument(skip(self, state), fields(job = %key, status = state.status.as_str()))]
    async fn write_checkpoint(&self, key: &JobKey, state: &HarvestCheckpoint) -> Result<()> {
        if &state.key != key {
            return Err(DbError::InvalidRecord(format!(
                "checkpoint for {} written under {key}",
                state.key
            )));
        }
        {
            let mut catalog = self.state.write().await;
            catalog.record(|| JournalEntry::Checkpoint(state.clone()));
            catalog.checkpoints.insert(key.clone(), state.clone());
        }
        self.sync().await
    }

    async fn archive_run(&self, state: &HarvestCheckpoint) -> Result<()> {
        {
            let mut catalog = self.state.write().await;
            catalog.record(|| JournalEntry::Archived(state.clone()));
            catalog.history.push(state.clone());
        }
        self.sync().await
    }

    async fn run_history(&self, key: &JobKey) -> Result<Vec<HarvestCheckpoint>> {
        let state = self.state.read().await;
        Ok(state.history.iter().filter(|c| &c.key == key).cloned().collect())
    }

    async fn list_checkpoints(&self) -> Result<Vec<HarvestCheckpoint>> {
        let state = self.state.read().await;
        let mut all: Vec<HarvestCheckpoint> = state.checkpoints.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(all)
    }

    // ── Misc ────────────────────────────────────────────────────────────────

    async fn lock_partition(&self, key: PartitionKey) -> Result<PartitionGuard> {
        let slot = {
            let mut locks = self.partition_locks.lock().await;
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = slot.lock_owned().await;
        Ok(PartitionGuard::new(key, guard))
    }

    async fn organization(&self, id: &str) -> Result<Option<Organization>> {
        Ok(self.organizations.get(id).cloned())
    }

    async fn organizations(&self) -> Result<Vec<Organization>> {
        let mut orgs: Vec<Organization> = self.organizations.values().cloned().collect();
        orgs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(orgs)
    }

    async fn stats(&self) -> Result<CatalogStats> {
        let state = self.state.read().await;
        Ok(CatalogStats {
            publications: state.publications.len() as u64,
            researchers: state.researchers.len() as u64,
            projects: state.projects.len() as u64,
            authorships: state.authorships.len() as u64,
            project_publications: state.project_publications.len() as u64,
        })
    }
}

/// A re-harvested project only fills fields that were still empty.
fn fill_missing_project_fields(existing: &mut Project, incoming: Project) {
    fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
        if slot.is_none() {
            *slot = value;
        }
    }
    fill(&mut existing.abstract_text, incoming.abstract_text);
    fill(&mut existing.funding_amount, incoming.funding_amount);
    fill(&mut existing.currency, incoming.currency);
    fill(&mut existing.start_date, incoming.start_date);
    fill(&mut existing.end_date, incoming.end_date);
    fill(&mut existing.principal_investigator, incoming.principal_investigator);
    fill(&mut existing.organization_id, incoming.organization_id);
    fill(&mut existing.url, incoming.url);
    if existing.keywords.is_empty() {
        existing.keywords = incoming.keywords;
    }
    for doi in incoming.publication_dois {
        if !existing.publication_dois.contains(&doi) {
            existing.publication_dois.push(doi);
        }
    }
}
