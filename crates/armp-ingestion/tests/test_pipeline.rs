mod common;

use std::sync::Arc;

use serde_json::json;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use armp_common::{organizations, JobKey, JobStatus, PageCursor, SourceSystem};
use armp_db::{CatalogGateway, MemoryCatalog};
use armp_ingestion::{HarvestJob, PipelineConfig};

use common::{harvester, harvester_with, paginate, publication, test_config, FixtureAdapter, ORG};

fn catalog() -> Arc<MemoryCatalog> {
    Arc::new(MemoryCatalog::new(organizations::seeded()))
}

/// 50 records with DOIs followed by 50 without, spread over three years.
fn openaire_records() -> Vec<serde_json::Value> {
    (0..100)
        .map(|n| {
            let doi = (n < 50).then(|| format!("10.1000/a{n}"));
            publication(&format!("oa-{n}"), n, doi.as_deref(), 2020 + (n % 3) as i32)
        })
        .collect()
}

/// 20 records sharing DOIs with the OpenAIRE set, then 60 new ones.
fn crossref_records() -> Vec<serde_json::Value> {
    let shared = (0..20).map(|n| {
        let doi = format!("10.1000/a{n}");
        publication(&doi, n, Some(&doi), 2020 + (n % 3) as i32)
    });
    let novel = (100..160).map(|n| {
        let doi = (n % 2 == 0).then(|| format!("10.1000/b{n}"));
        publication(&format!("cr-{n}"), n, doi.as_deref(), 2021)
    });
    shared.chain(novel).collect()
}

#[tokio::test]
async fn test_two_sources_reconcile_into_one_catalog() {
    let store = catalog();
    let openaire = Arc::new(FixtureAdapter::new(SourceSystem::OpenAire, paginate(openaire_records(), 25)));
    let crossref = Arc::new(FixtureAdapter::new(SourceSystem::Crossref, paginate(crossref_records(), 20)));
    let (tx, mut rx) = broadcast::channel(64);
    let harvester = harvester(store.clone(), vec![openaire, crossref]).with_progress(tx);

    let jobs = vec![
        HarvestJob::new(SourceSystem::OpenAire, ORG),
        HarvestJob::new(SourceSystem::Crossref, ORG),
    ];
    let summary = harvester.run_jobs(jobs, &CancellationToken::new()).await;

    assert_eq!(summary.total_fetched, 180);
    assert_eq!(summary.total_merged, 20);
    assert_eq!(summary.total_stored_new, 160);
    assert_eq!(summary.total_errors, 0);
    assert_eq!(summary.per_organization[ORG].total_fetched, 180);
    assert!(summary.jobs.iter().all(|j| j.status == JobStatus::Completed));

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.publications, 160);

    let merged = store.find_publication_by_doi("10.1000/a7").await.unwrap().unwrap();
    assert!(merged.sources.contains(&SourceSystem::OpenAire));
    assert!(merged.sources.contains(&SourceSystem::Crossref));

    let mut completed = 0;
    while let Ok(event) = rx.try_recv() {
        if event.stage == "complete" {
            completed += 1;
        }
    }
    assert_eq!(completed, 2);
}

#[tokio::test]
async fn test_doi_less_sighting_merges_into_record_with_doi() {
    let store = catalog();
    let crossref = Arc::new(FixtureAdapter::new(
        SourceSystem::Crossref,
        vec![vec![json!({
            "id": "10.5281/zenodo.4411",
            "title": "Glacier mass balance of the Eastern Alps, 2000-2020",
            "doi": "10.5281/zenodo.4411",
            "year": 2021,
            "authors": ["Anna Berger", "Lukas Gruber", "Maria Huber"],
        })]],
    ));
    let openaire = Arc::new(FixtureAdapter::new(
        SourceSystem::OpenAire,
        vec![vec![json!({
            "id": "oa::glacier",
            "title": "Glacier Mass Balance of the Eastern Alps, 2000\u{2013}2020",
            "doi": null,
            "year": 2021,
            "authors": ["Berger, Anna", "L. Gruber"],
            "abstract": "Two decades of glaciological mass balance.",
        })]],
    ));
    let harvester = harvester(store.clone(), vec![crossref, openaire]);

    let first = harvester
        .run_job(&HarvestJob::new(SourceSystem::Crossref, ORG), &CancellationToken::new())
        .await;
    assert_eq!(first.total_stored_new, 1);

    let second = harvester
        .run_job(&HarvestJob::new(SourceSystem::OpenAire, ORG), &CancellationToken::new())
        .await;
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.total_merged, 1);
    assert_eq!(second.total_stored_new, 0);

    assert_eq!(store.stats().await.unwrap().publications, 1);
    let record = store.find_publication_by_doi("10.5281/zenodo.4411").await.unwrap().unwrap();
    assert_eq!(record.sources.len(), 2);
    assert_eq!(record.source_record_ids[&SourceSystem::OpenAire], "oa::glacier");
    assert_eq!(record.abstract_text.as_deref(), Some("Two decades of glaciological mass balance."));
}

#[tokio::test]
async fn test_reharvest_adds_no_duplicates() {
    let store = catalog();
    let openaire = Arc::new(FixtureAdapter::new(SourceSystem::OpenAire, paginate(openaire_records(), 25)));
    let harvester = harvester(store.clone(), vec![openaire]);
    let job = HarvestJob::new(SourceSystem::OpenAire, ORG);

    let first = harvester.run_job(&job, &CancellationToken::new()).await;
    assert_eq!(first.run, 1);
    assert_eq!(first.total_stored_new, 100);

    let second = harvester.run_job(&job, &CancellationToken::new()).await;
    assert_eq!(second.run, 2);
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.total_fetched, 100);
    assert_eq!(second.total_merged, 100);
    assert_eq!(second.total_stored_new, 0);

    assert_eq!(store.stats().await.unwrap().publications, 100);
    let history = store.run_history(&job.key()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].run, 1);
}

#[tokio::test]
async fn test_interrupted_job_resumes_at_committed_cursor() {
    let store = catalog();
    let openaire = Arc::new(FixtureAdapter::new(SourceSystem::OpenAire, paginate(openaire_records(), 25)));
    let harvester = harvester(store.clone(), vec![openaire.clone()]);
    let job = HarvestJob::new(SourceSystem::OpenAire, ORG);

    // A process that died after committing two pages.
    let mut crashed = armp_common::HarvestCheckpoint::start(JobKey::new(SourceSystem::OpenAire, ORG), 1);
    crashed.status = JobStatus::Running;
    crashed.cursor = Some(PageCursor::Offset(2));
    crashed.pages_committed = 2;
    crashed.counts.fetched = 50;
    crashed.counts.stored_new = 50;
    store.write_checkpoint(&crashed.key, &crashed).await.unwrap();

    let summary = harvester.run_job(&job, &CancellationToken::new()).await;

    assert_eq!(openaire.fetched_pages(), vec![2, 3]);
    assert_eq!(summary.run, 1);
    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.pages_committed, 4);
    assert_eq!(summary.total_fetched, 100);
    assert_eq!(summary.resume_cursor, None);
}

#[tokio::test]
async fn test_malformed_record_is_counted_not_fatal() {
    let store = catalog();
    let mut records: Vec<_> = (0..10).map(|n| publication(&format!("oa-{n}"), n, None, 2022)).collect();
    records[4] = json!({ "id": "oa-broken", "title": "   " });
    let openaire = Arc::new(FixtureAdapter::new(SourceSystem::OpenAire, paginate(records, 5)));
    let harvester = harvester(store.clone(), vec![openaire]);

    let summary = harvester
        .run_job(&HarvestJob::new(SourceSystem::OpenAire, ORG), &CancellationToken::new())
        .await;

    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.total_fetched, 10);
    assert_eq!(summary.total_errors, 1);
    assert_eq!(summary.total_stored_new, 9);
    assert_eq!(store.stats().await.unwrap().publications, 9);
}

#[tokio::test]
async fn test_transient_page_failure_is_retried() {
    let store = catalog();
    let openaire = Arc::new(
        FixtureAdapter::new(SourceSystem::OpenAire, paginate(openaire_records(), 25)).fail_page(1, 2),
    );
    let harvester = harvester(store.clone(), vec![openaire.clone()]);

    let summary = harvester
        .run_job(&HarvestJob::new(SourceSystem::OpenAire, ORG), &CancellationToken::new())
        .await;

    assert_eq!(openaire.fetched_pages(), vec![0, 1, 1, 1, 2, 3]);
    assert_eq!(summary.total_errors, 0);
    assert_eq!(summary.total_fetched, 100);
}

#[tokio::test]
async fn test_unfetchable_page_is_skipped_and_counted() {
    let store = catalog();
    let openaire = Arc::new(
        FixtureAdapter::new(SourceSystem::OpenAire, paginate(openaire_records(), 25)).fail_page(1, 100),
    );
    let harvester = harvester(store.clone(), vec![openaire.clone()]);

    let summary = harvester
        .run_job(&HarvestJob::new(SourceSystem::OpenAire, ORG), &CancellationToken::new())
        .await;

    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.total_errors, 1);
    assert_eq!(summary.total_fetched, 75);
    assert_eq!(openaire.fetched_pages(), vec![0, 1, 1, 1, 2, 3]);
    assert_eq!(store.stats().await.unwrap().publications, 75);
}

#[tokio::test]
async fn test_job_that_cannot_skip_stops_and_next_run_retries_the_page() {
    let store = catalog();
    let openaire = Arc::new(
        FixtureAdapter::new(SourceSystem::OpenAire, paginate(openaire_records(), 25)).fail_page(1, 3),
    );
    let config = PipelineConfig { max_skipped_pages: 1, ..test_config() };
    let harvester = harvester_with(store.clone(), vec![openaire.clone()], config);
    let job = HarvestJob::new(SourceSystem::OpenAire, ORG);

    let first = harvester.run_job(&job, &CancellationToken::new()).await;
    assert_eq!(first.status, JobStatus::Stopped);
    assert_eq!(first.total_fetched, 25);
    assert_eq!(first.total_errors, 1);
    assert_eq!(first.resume_cursor, Some(PageCursor::Offset(1)));
    assert!(first.error.as_deref().unwrap_or_default().contains("page 1 timed out"));
    assert!(first.completed_at.is_none());

    let second = harvester.run_job(&job, &CancellationToken::new()).await;
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.run, 1);
    assert_eq!(second.total_fetched, 100);
    assert_eq!(second.total_errors, 1);
    assert_eq!(second.error, None);
    assert_eq!(openaire.fetched_pages(), vec![0, 1, 1, 1, 1, 2, 3]);
    assert_eq!(store.stats().await.unwrap().publications, 100);
}

#[tokio::test]
async fn test_max_records_truncates_the_last_page() {
    let store = catalog();
    let openaire = Arc::new(FixtureAdapter::new(SourceSystem::OpenAire, paginate(openaire_records(), 25)));
    let harvester = harvester(store.clone(), vec![openaire.clone()]);

    let job = HarvestJob::new(SourceSystem::OpenAire, ORG).with_max_records(Some(30));
    let summary = harvester.run_job(&job, &CancellationToken::new()).await;

    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.total_fetched, 30);
    assert_eq!(openaire.fetched_pages(), vec![0, 1]);
    assert_eq!(store.stats().await.unwrap().publications, 30);
}

#[tokio::test]
async fn test_cancelled_job_stops_and_resumes() {
    let store = catalog();
    let cancel = CancellationToken::new();
    let openaire = Arc::new(
        FixtureAdapter::new(SourceSystem::OpenAire, paginate(openaire_records(), 25))
            .cancel_when_fetching(1, cancel.clone()),
    );
    let harvester = harvester(store.clone(), vec![openaire.clone()]);
    let job = HarvestJob::new(SourceSystem::OpenAire, ORG);

    // The page in flight when the token fires is still committed.
    let stopped = harvester.run_job(&job, &cancel).await;
    assert_eq!(stopped.status, JobStatus::Stopped);
    assert_eq!(stopped.pages_committed, 2);
    assert_eq!(stopped.total_fetched, 50);
    assert_eq!(stopped.resume_cursor, Some(PageCursor::Offset(2)));

    let resumed = harvester.run_job(&job, &CancellationToken::new()).await;
    assert_eq!(resumed.status, JobStatus::Completed);
    assert_eq!(resumed.run, 1);
    assert_eq!(resumed.total_fetched, 100);
    assert_eq!(openaire.fetched_pages(), vec![0, 1, 2, 3]);
    assert_eq!(store.stats().await.unwrap().publications, 100);
}

#[tokio::test]
async fn test_job_cancelled_before_start_fetches_nothing() {
    let store = catalog();
    let openaire = Arc::new(FixtureAdapter::new(SourceSystem::OpenAire, paginate(openaire_records(), 25)));
    let harvester = harvester(store.clone(), vec![openaire.clone()]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = harvester.run_job(&HarvestJob::new(SourceSystem::OpenAire, ORG), &cancel).await;

    assert_eq!(summary.status, JobStatus::Stopped);
    assert_eq!(summary.pages_committed, 0);
    assert!(openaire.fetched_pages().is_empty());
}

#[tokio::test]
async fn test_unknown_organization_is_reported() {
    let store = catalog();
    let openaire = Arc::new(FixtureAdapter::new(SourceSystem::OpenAire, Vec::new()));
    let harvester = harvester(store, vec![openaire]);

    let summary = harvester
        .run_job(&HarvestJob::new(SourceSystem::OpenAire, "00nowhere"), &CancellationToken::new())
        .await;

    assert_eq!(summary.status, JobStatus::Aborted);
    assert_eq!(summary.run, 0);
    assert_eq!(summary.error.as_deref(), Some("unknown organization: 00nowhere"));
}
