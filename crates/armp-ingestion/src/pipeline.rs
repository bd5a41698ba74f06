//! Harvest orchestrator.
//!
//! Drives one job (source × organization) through its pages:
//!   1. Start or resume from the persisted checkpoint
//!   2. Fetch the page at the checkpoint cursor (rate limited, retried)
//!   3. Normalise, resolve and link every record on the page
//!   4. Commit the checkpoint (cursor + counts), emit a progress event
//!   5. Repeat until the source is exhausted, the quota is reached, the job
//!      is cancelled (`Stopped`) or the store fails (`Aborted`)
//!
//! The pipeline is non-destructive: record- and page-level failures are
//! logged, counted and skipped. Only store unavailability or a checkpoint
//! that cannot be written ends a job early.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use armp_common::{
    HarvestCheckpoint, JobCounts, JobKey, JobStatus, PageCursor, Project, SourceSystem,
};
use armp_db::{CatalogGateway, DbError, UpsertAction};

use crate::error::{HarvestError, SourceError};
use crate::identity::{IdentityConfig, IdentityResolver};
use crate::links::{LinkBuilder, LinkConfig};
use crate::models::{NormalizedRecord, Page, ProjectDraft, PublicationDraft, RawRecord, ResearcherProfile, SourceScope};
use crate::researchers::{DisambiguationConfig, ResearcherAction, ResearcherDisambiguator, ResearcherMention};
use crate::retry::RetryPolicy;
use crate::similarity::{author_key, SimilarityScorer};
use crate::sources::{AdapterRegistry, SourceAdapter};

// ── Job config ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub identity: IdentityConfig,
    pub researchers: DisambiguationConfig,
    pub links: LinkConfig,
    /// Backoff for page fetches.
    pub retry: RetryPolicy,
    /// Attempts for one checkpoint write before the job aborts.
    pub checkpoint_attempts: u32,
    /// Consecutive unfetchable pages skipped before a job gives up on its source.
    pub max_skipped_pages: u32,
    /// Jobs running at once in [`Harvester::run_jobs`].
    pub concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            researchers: DisambiguationConfig::default(),
            links: LinkConfig::default(),
            retry: RetryPolicy::default(),
            checkpoint_attempts: 3,
            max_skipped_pages: 5,
            concurrency: 4,
        }
    }
}

/// Parameters for a single harvest run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestJob {
    pub source: SourceSystem,
    pub organization_id: String,
    /// Stop after this many fetched records (the last page is truncated).
    pub max_records: Option<u64>,
}

impl HarvestJob {
    pub fn new(source: SourceSystem, organization_id: impl Into<String>) -> Self {
        Self { source, organization_id: organization_id.into(), max_records: None }
    }

    pub fn with_max_records(mut self, max_records: Option<u64>) -> Self {
        self.max_records = max_records;
        self
    }

    pub fn key(&self) -> JobKey {
        JobKey::new(self.source, self.organization_id.clone())
    }
}

// ── Progress events ───────────────────────────────────────────────────────────

/// Progress event emitted during a job (cloneable for broadcast).
#[derive(Debug, Clone, Serialize)]
pub struct HarvestProgress {
    pub job: String,
    pub stage: String,
    pub message: String,
    pub pages_committed: u64,
    pub counts: JobCounts,
    pub error: Option<String>,
}

// ── Result summary ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub source: SourceSystem,
    pub organization_id: String,
    pub run: u32,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_fetched: u64,
    pub total_stored_new: u64,
    pub total_merged: u64,
    pub total_errors: u64,
    pub ambiguous_mentions: u64,
    pub pages_committed: u64,
    /// Where a resumed run would continue.
    pub resume_cursor: Option<PageCursor>,
    pub error: Option<String>,
}

impl JobSummary {
    pub fn from_checkpoint(checkpoint: &HarvestCheckpoint) -> Self {
        Self {
            source: checkpoint.key.source,
            organization_id: checkpoint.key.organization_id.clone(),
            run: checkpoint.run,
            status: checkpoint.status,
            started_at: checkpoint.started_at,
            completed_at: checkpoint.completed_at,
            total_fetched: checkpoint.counts.fetched,
            total_stored_new: checkpoint.counts.stored_new,
            total_merged: checkpoint.counts.merged,
            total_errors: checkpoint.counts.errors,
            ambiguous_mentions: checkpoint.counts.ambiguous_mentions,
            pages_committed: checkpoint.pages_committed,
            resume_cursor: checkpoint.cursor.clone(),
            error: checkpoint.last_error.clone(),
        }
    }

    /// A job that failed before its first checkpoint.
    fn not_started(job: &HarvestJob, error: &HarvestError) -> Self {
        let now = Utc::now();
        Self {
            source: job.source,
            organization_id: job.organization_id.clone(),
            run: 0,
            status: JobStatus::Aborted,
            started_at: now,
            completed_at: Some(now),
            total_fetched: 0,
            total_stored_new: 0,
            total_merged: 0,
            total_errors: 1,
            ambiguous_mentions: 0,
            pages_committed: 0,
            resume_cursor: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationTotals {
    pub total_fetched: u64,
    pub total_stored_new: u64,
    pub total_merged: u64,
    pub total_errors: u64,
}

/// Structured result of a harvest invocation, printed as JSON by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestSummary {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_fetched: u64,
    pub total_stored_new: u64,
    pub total_merged: u64,
    pub total_errors: u64,
    pub per_organization: BTreeMap<String, OrganizationTotals>,
    pub jobs: Vec<JobSummary>,
}

impl HarvestSummary {
    pub fn from_jobs(started_at: DateTime<Utc>, completed_at: DateTime<Utc>, mut jobs: Vec<JobSummary>) -> Self {
        jobs.sort_by(|a, b| (&a.organization_id, a.source).cmp(&(&b.organization_id, b.source)));

        let mut per_organization: BTreeMap<String, OrganizationTotals> = BTreeMap::new();
        for job in &jobs {
            let org = per_organization.entry(job.organization_id.clone()).or_default();
            org.total_fetched += job.total_fetched;
            org.total_stored_new += job.total_stored_new;
            org.total_merged += job.total_merged;
            org.total_errors += job.total_errors;
        }

        Self {
            started_at,
            completed_at,
            total_fetched: jobs.iter().map(|j| j.total_fetched).sum(),
            total_stored_new: jobs.iter().map(|j| j.total_stored_new).sum(),
            total_merged: jobs.iter().map(|j| j.total_merged).sum(),
            total_errors: jobs.iter().map(|j| j.total_errors).sum(),
            per_organization,
            jobs,
        }
    }
}

// ── Job context ───────────────────────────────────────────────────────────────

/// Everything one running job threads through its steps. `checkpoint`
/// always mirrors the last state written to the store.
struct JobContext {
    scope: SourceScope,
    adapter: Arc<dyn SourceAdapter>,
    max_records: Option<u64>,
    checkpoint: HarvestCheckpoint,
}

impl JobContext {
    fn quota_left(&self) -> Option<u64> {
        self.max_records
            .map(|limit| limit.saturating_sub(self.checkpoint.counts.fetched))
    }
}

/// What one record contributed to the page counts.
#[derive(Debug, Default)]
struct RecordOutcome {
    created: bool,
    ambiguous: u64,
    /// Author or link steps that failed after the record itself was stored.
    partial_errors: u64,
}

// ── Pipeline orchestrator ─────────────────────────────────────────────────────

pub struct Harvester {
    gateway: Arc<dyn CatalogGateway>,
    adapters: AdapterRegistry,
    identity: IdentityResolver,
    researchers: ResearcherDisambiguator,
    links: LinkBuilder,
    config: PipelineConfig,
    progress_tx: Option<broadcast::Sender<HarvestProgress>>,
}

impl Harvester {
    pub fn new(
        gateway: Arc<dyn CatalogGateway>,
        adapters: AdapterRegistry,
        scorer: Arc<dyn SimilarityScorer>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            identity: IdentityResolver::new(gateway.clone(), scorer.clone(), config.identity.clone()),
            researchers: ResearcherDisambiguator::new(gateway.clone(), scorer.clone(), config.researchers.clone()),
            links: LinkBuilder::new(gateway.clone(), scorer, config.links.clone()),
            gateway,
            adapters,
            config,
            progress_tx: None,
        }
    }

    /// Progress events are sent via `tx` if provided.
    pub fn with_progress(mut self, tx: broadcast::Sender<HarvestProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// Run several jobs on a fixed-size pool and aggregate their summaries.
    pub async fn run_jobs(&self, jobs: Vec<HarvestJob>, cancel: &CancellationToken) -> HarvestSummary {
        let started_at = Utc::now();
        info!(jobs = jobs.len(), concurrency = self.config.concurrency, "Starting harvest");

        let summaries: Vec<JobSummary> = stream::iter(jobs)
            .map(|job| async move { self.run_job(&job, cancel).await })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let summary = HarvestSummary::from_jobs(started_at, Utc::now(), summaries);
        info!(
            fetched    = summary.total_fetched,
            stored_new = summary.total_stored_new,
            merged     = summary.total_merged,
            errors     = summary.total_errors,
            "Harvest complete"
        );
        summary
    }

    /// Run one job to completion, cancellation or abort. Never fails: the
    /// outcome is reported in the summary.
    #[instrument(skip(self, cancel), fields(job = %job.key()))]
    pub async fn run_job(&self, job: &HarvestJob, cancel: &CancellationToken) -> JobSummary {
        let mut ctx = match self.prepare(job).await {
            Ok(ctx) => ctx,
            Err(e) => {
                error!(error = %e, "Harvest job could not start");
                return JobSummary::not_started(job, &e);
            }
        };

        if let Err(e) = self.drive(&mut ctx, cancel).await {
            error!(
                error = %e,
                cursor = ?ctx.checkpoint.cursor,
                pages = ctx.checkpoint.pages_committed,
                "Harvest job aborted"
            );
            ctx.checkpoint.status = JobStatus::Aborted;
            ctx.checkpoint.last_error = Some(e.to_string());
            ctx.checkpoint.updated_at = Utc::now();
            // Best effort: the store may be the thing that failed.
            if let Err(write_err) = self.gateway.write_checkpoint(&ctx.checkpoint.key, &ctx.checkpoint).await {
                warn!(error = %write_err, "Could not record aborted status");
            }
            self.emit(&ctx, "aborted", "Job aborted");
        }

        JobSummary::from_checkpoint(&ctx.checkpoint)
    }

    // ── Job lifecycle ─────────────────────────────────────────────────────────

    async fn prepare(&self, job: &HarvestJob) -> Result<JobContext, HarvestError> {
        let adapter = self
            .adapters
            .get(&job.source)
            .cloned()
            .ok_or(HarvestError::UnsupportedSource(job.source))?;
        let organization = self
            .gateway
            .organization(&job.organization_id)
            .await?
            .ok_or_else(|| HarvestError::UnknownOrganization(job.organization_id.clone()))?;

        let key = job.key();
        let mut checkpoint = match self.gateway.read_checkpoint(&key).await? {
            Some(previous) if previous.status.is_resumable() => {
                info!(
                    run = previous.run,
                    status = previous.status.as_str(),
                    cursor = ?previous.cursor,
                    pages = previous.pages_committed,
                    "Resuming from checkpoint"
                );
                previous
            }
            Some(previous) if previous.status == JobStatus::Completed => {
                self.gateway.archive_run(&previous).await?;
                HarvestCheckpoint::start(key, previous.run + 1)
            }
            Some(previous) => HarvestCheckpoint::start(key, previous.run.max(1)),
            None => HarvestCheckpoint::start(key, 1),
        };

        checkpoint.status = JobStatus::Running;
        checkpoint.last_error = None;
        checkpoint.updated_at = Utc::now();
        self.persist(&checkpoint).await?;

        Ok(JobContext {
            scope: SourceScope::new(organization),
            adapter,
            max_records: job.max_records,
            checkpoint,
        })
    }

    async fn drive(&self, ctx: &mut JobContext, cancel: &CancellationToken) -> Result<(), HarvestError> {
        let mut skipped_in_a_row = 0u32;

        loop {
            if ctx.quota_left() == Some(0) {
                return self.finish(ctx).await;
            }
            if cancel.is_cancelled() {
                let next = ctx.checkpoint.clone();
                return self.stop(ctx, next, "Cancelled after last committed page").await;
            }

            let cursor = ctx.checkpoint.cursor.clone();
            // A page that is already fetched when the token fires is still
            // processed and committed.
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.fetch_page(&*ctx, cursor.as_ref()) => Some(result),
            };
            let Some(fetched) = fetched else {
                let next = ctx.checkpoint.clone();
                return self.stop(ctx, next, "Cancelled after last committed page").await;
            };

            let page = match fetched {
                Ok(page) => {
                    skipped_in_a_row = 0;
                    page
                }
                Err(e) => {
                    skipped_in_a_row += 1;
                    let skip_to = ctx.adapter.skip_page(cursor.as_ref());
                    let mut next = ctx.checkpoint.clone();
                    next.counts.errors += 1;
                    next.last_error = Some(e.to_string());

                    match skip_to {
                        Some(skip_to) if skipped_in_a_row < self.config.max_skipped_pages.max(1) => {
                            warn!(error = %e, cursor = ?cursor, next = %skip_to, "Page unavailable, skipping");
                            next.cursor = Some(skip_to);
                            self.commit(ctx, next).await?;
                            continue;
                        }
                        // The failed page stays the cursor so the next run retries it.
                        _ => {
                            warn!(error = %e, cursor = ?cursor, "Page unavailable, stopping with cursor retained");
                            return self.stop(ctx, next, "Page unavailable, next run resumes at this cursor").await;
                        }
                    }
                }
            };

            let Page { mut records, next_cursor } = page;
            let mut quota_reached = false;
            if let Some(left) = ctx.quota_left() {
                if records.len() as u64 >= left {
                    records.truncate(usize::try_from(left).unwrap_or(usize::MAX));
                    quota_reached = true;
                }
            }

            let page_counts = self.process_page(ctx, &records).await?;

            let mut next = ctx.checkpoint.clone();
            next.counts.absorb(&page_counts);
            next.pages_committed += 1;
            next.cursor = next_cursor;
            let done = quota_reached || next.cursor.is_none();
            if done {
                next.status = JobStatus::Completed;
                next.completed_at = Some(Utc::now());
            }
            self.commit(ctx, next).await?;

            debug!(
                pages   = ctx.checkpoint.pages_committed,
                fetched = page_counts.fetched,
                new     = page_counts.stored_new,
                merged  = page_counts.merged,
                errors  = page_counts.errors,
                "Page committed"
            );
            self.emit(ctx, "page", &format!("{} records committed", page_counts.fetched));

            if done {
                self.log_completion(ctx);
                self.emit(ctx, "complete", "Source exhausted");
                return Ok(());
            }
        }
    }

    async fn fetch_page(&self, ctx: &JobContext, cursor: Option<&PageCursor>) -> Result<Page, SourceError> {
        self.config
            .retry
            .run(
                "fetch_page",
                || ctx.adapter.fetch_page(&ctx.scope, cursor),
                SourceError::is_transient,
            )
            .await
    }

    /// Write `next` and make it the committed state.
    async fn commit(&self, ctx: &mut JobContext, mut next: HarvestCheckpoint) -> Result<(), HarvestError> {
        next.updated_at = Utc::now();
        self.persist(&next).await?;
        ctx.checkpoint = next;
        Ok(())
    }

    async fn finish(&self, ctx: &mut JobContext) -> Result<(), HarvestError> {
        let mut next = ctx.checkpoint.clone();
        next.status = JobStatus::Completed;
        next.completed_at = Some(Utc::now());
        self.commit(ctx, next).await?;
        self.log_completion(ctx);
        self.emit(ctx, "complete", "Job complete");
        Ok(())
    }

    /// End the run resumable: the next run picks up `next.cursor`.
    async fn stop(&self, ctx: &mut JobContext, mut next: HarvestCheckpoint, message: &str) -> Result<(), HarvestError> {
        next.status = JobStatus::Stopped;
        self.commit(ctx, next).await?;
        info!(
            cursor = ?ctx.checkpoint.cursor,
            pages = ctx.checkpoint.pages_committed,
            error = ?ctx.checkpoint.last_error,
            "Harvest job stopped"
        );
        self.emit(ctx, "stopped", message);
        Ok(())
    }

    /// Checkpoint writes get their own retry budget; exhausting it is fatal.
    async fn persist(&self, checkpoint: &HarvestCheckpoint) -> Result<(), HarvestError> {
        let policy = RetryPolicy {
            max_attempts: self.config.checkpoint_attempts.max(1),
            ..self.config.retry.clone()
        };
        policy
            .run(
                "write_checkpoint",
                || self.gateway.write_checkpoint(&checkpoint.key, checkpoint),
                |_: &DbError| true,
            )
            .await
            .map_err(|e| HarvestError::JobFatal(format!("checkpoint write for {} failed: {e}", checkpoint.key)))
    }

    fn log_completion(&self, ctx: &JobContext) {
        let cp = &ctx.checkpoint;
        info!(
            run        = cp.run,
            pages      = cp.pages_committed,
            fetched    = cp.counts.fetched,
            stored_new = cp.counts.stored_new,
            merged     = cp.counts.merged,
            errors     = cp.counts.errors,
            ambiguous  = cp.counts.ambiguous_mentions,
            "Harvest job complete"
        );
    }

    fn emit(&self, ctx: &JobContext, stage: &str, message: &str) {
        if let Some(ref tx) = self.progress_tx {
            let _ = tx.send(HarvestProgress {
                job: ctx.checkpoint.key.to_string(),
                stage: stage.to_string(),
                message: message.to_string(),
                pages_committed: ctx.checkpoint.pages_committed,
                counts: ctx.checkpoint.counts,
                error: ctx.checkpoint.last_error.clone(),
            });
        }
    }

    // ── Record processing ─────────────────────────────────────────────────────

    async fn process_page(&self, ctx: &JobContext, records: &[RawRecord]) -> Result<JobCounts, HarvestError> {
        let mut counts = JobCounts { fetched: records.len() as u64, ..JobCounts::default() };

        for raw in records {
            match self.process_record(ctx, raw).await {
                Ok(outcome) => {
                    if outcome.created {
                        counts.stored_new += 1;
                    } else {
                        counts.merged += 1;
                    }
                    counts.ambiguous_mentions += outcome.ambiguous;
                    counts.errors += outcome.partial_errors;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(record = raw.native_id(), error = %e, "Record skipped");
                    counts.errors += 1;
                }
            }
        }
        Ok(counts)
    }

    async fn process_record(&self, ctx: &JobContext, raw: &RawRecord) -> Result<RecordOutcome, HarvestError> {
        match ctx.adapter.normalize(raw, &ctx.scope)? {
            NormalizedRecord::Publication(draft) => self.process_publication(&draft).await,
            NormalizedRecord::Researcher(profile) => self.process_profile(&profile).await,
            NormalizedRecord::Project(draft) => self.process_project(&draft).await,
        }
    }

    async fn process_publication(&self, draft: &PublicationDraft) -> Result<RecordOutcome, HarvestError> {
        let resolution = self.identity.resolve(draft).await?;
        let mut outcome = RecordOutcome {
            created: resolution.action == UpsertAction::Created,
            ..RecordOutcome::default()
        };

        // Positions come from the canonical author list so every source
        // links the same researcher at the same position.
        let canonical = self
            .gateway
            .get_publication(resolution.id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("publication {}", resolution.id)))?;
        let mentioned: HashSet<String> = draft.authors.iter().filter_map(|a| author_key(&a.name)).collect();

        for (position, author) in canonical.authors.iter().enumerate() {
            if !author_key(&author.name).is_some_and(|k| mentioned.contains(&k)) {
                continue;
            }
            let mention = ResearcherMention::from_author(author, &canonical.organization_id);
            let step = async {
                let researcher = self.researchers.resolve(&mention).await?;
                let position = u32::try_from(position).unwrap_or(u32::MAX);
                self.links.link_authorship(resolution.id, researcher.id, position).await?;
                Ok::<_, HarvestError>(researcher.action)
            };
            match step.await {
                Ok(ResearcherAction::CreatedAmbiguous) => outcome.ambiguous += 1,
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(publication = %resolution.id, author = %author.name, error = %e, "Author not linked");
                    outcome.partial_errors += 1;
                }
            }
        }
        Ok(outcome)
    }

    async fn process_profile(&self, profile: &ResearcherProfile) -> Result<RecordOutcome, HarvestError> {
        let resolution = self.researchers.resolve(&ResearcherMention::from_profile(profile)).await?;
        Ok(RecordOutcome {
            created: resolution.action != ResearcherAction::Matched,
            ..RecordOutcome::default()
        })
    }

    async fn process_project(&self, draft: &ProjectDraft) -> Result<RecordOutcome, HarvestError> {
        let mut outcome = RecordOutcome::default();

        if let Some(pi) = &draft.principal_investigator {
            match self.researchers.resolve(&ResearcherMention::from_author(pi, &draft.organization_id)).await {
                Ok(r) if r.action == ResearcherAction::CreatedAmbiguous => outcome.ambiguous += 1,
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(grant = %draft.grant_number, error = %e, "Principal investigator not resolved");
                    outcome.partial_errors += 1;
                }
            }
        }

        let written = self.gateway.upsert_project(new_project(draft)).await?;
        outcome.created = written.action == UpsertAction::Created;

        let stored = self
            .gateway
            .find_project_by_grant(&draft.grant_number)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("project {}", draft.grant_number)))?;
        match self.links.link_project(&stored).await {
            Ok(links) => debug!(grant = %draft.grant_number, declared = links.declared, inferred = links.inferred, "Project linked"),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(grant = %draft.grant_number, error = %e, "Project links incomplete");
                outcome.partial_errors += 1;
            }
        }
        Ok(outcome)
    }
}

fn new_project(draft: &ProjectDraft) -> Project {
    let now = Utc::now();
    Project {
        id: Uuid::new_v4(),
        grant_number: draft.grant_number.clone(),
        title: draft.title.clone(),
        abstract_text: draft.abstract_text.clone(),
        funder: draft.funder.clone(),
        funding_amount: draft.funding_amount,
        currency: draft.currency.clone(),
        start_date: draft.start_date,
        end_date: draft.end_date,
        principal_investigator: draft.principal_investigator.clone(),
        organization_id: Some(draft.organization_id.clone()),
        keywords: draft.keywords.clone(),
        publication_dois: draft.publication_dois.clone(),
        url: draft.url.clone(),
        source: draft.source,
        harvested_at: now,
        updated_at: now,
    }
}
