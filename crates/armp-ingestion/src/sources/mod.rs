//! Source adapters.
//!
//! One adapter per external system, selected by the closed [`SourceSystem`]
//! tag. Adapters do network I/O and payload mapping only; they never write
//! to the catalog.

pub mod client;
pub mod crossref;
pub mod fwf;
pub mod openaire;
pub mod orcid;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use armp_common::{PageCursor, SourceSystem};

use crate::error::SourceError;
use crate::models::{NormalizedRecord, Page, RawRecord, SourceScope};

pub use client::SourceClient;

/// Common interface for all harvest sources.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn system(&self) -> SourceSystem;

    /// Fetch the page at `cursor` (`None` = first page).
    async fn fetch_page(&self, scope: &SourceScope, cursor: Option<&PageCursor>) -> Result<Page, SourceError>;

    /// Map one raw payload into a draft.
    fn normalize(&self, raw: &RawRecord, scope: &SourceScope) -> Result<NormalizedRecord, SourceError>;

    /// Cursor of the page after `cursor` when it can be computed without a
    /// response. Used to skip a page whose fetch keeps failing.
    fn skip_page(&self, _cursor: Option<&PageCursor>) -> Option<PageCursor> {
        None
    }
}

/// Connection settings for one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    pub base_url: String,
    /// Records per request.
    pub page_size: u32,
    /// Minimum delay between two requests to this source.
    pub min_interval_ms: u64,
    /// Per-request timeout.
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Contact address for polite-pool access (Crossref, ORCID).
    pub mailto: Option<String>,
}

impl SourceSettings {
    pub fn defaults_for(system: SourceSystem) -> Self {
        let (base_url, page_size, min_interval_ms) = match system {
            SourceSystem::OpenAire => ("https://api.openaire.eu/graph", 100, 500),
            SourceSystem::Crossref => ("https://api.crossref.org", 200, 20),
            // 24 requests per second
            SourceSystem::Orcid    => ("https://pub.orcid.org/v3.0", 100, 42),
            SourceSystem::Fwf      => ("https://elise.fwf.ac.at/api", 100, 100),
        };
        Self {
            base_url: base_url.to_string(),
            page_size,
            min_interval_ms,
            timeout_secs: 30,
            user_agent: format!("ARMP/{} ({} harvester)", env!("CARGO_PKG_VERSION"), system),
            mailto: None,
        }
    }
}

/// Adapters by source, shared by every job on that source.
pub type AdapterRegistry = HashMap<SourceSystem, Arc<dyn SourceAdapter>>;

/// Build the live HTTP adapter for a source.
pub fn build_adapter(system: SourceSystem, settings: &SourceSettings) -> Result<Arc<dyn SourceAdapter>, SourceError> {
    let adapter: Arc<dyn SourceAdapter> = match system {
        SourceSystem::OpenAire => Arc::new(openaire::OpenAireAdapter::new(settings)?),
        SourceSystem::Crossref => Arc::new(crossref::CrossrefAdapter::new(settings)?),
        SourceSystem::Orcid    => Arc::new(orcid::OrcidAdapter::new(settings)?),
        SourceSystem::Fwf      => Arc::new(fwf::FwfAdapter::new(settings)?),
    };
    Ok(adapter)
}

/// Build adapters for every source, using `settings_for` to look up each
/// source's settings.
pub fn build_registry<F>(settings_for: F) -> Result<AdapterRegistry, SourceError>
where
    F: Fn(SourceSystem) -> SourceSettings,
{
    SourceSystem::ALL
        .iter()
        .map(|system| Ok((*system, build_adapter(*system, &settings_for(*system))?)))
        .collect()
}

// ── Shared payload helpers ──────────────────────────────────────────────────

pub(crate) fn json_str(value: &serde_json::Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Parse `YYYY-MM-DD`, `YYYY-MM` or `YYYY` (optionally with a time suffix).
pub(crate) fn parse_partial_date(raw: &str) -> (Option<chrono::NaiveDate>, Option<i32>) {
    let raw = raw.trim();
    let date_part = raw.split(['T', ' ']).next().unwrap_or(raw);
    if let Ok(date) = chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
        use chrono::Datelike;
        return (Some(date), Some(date.year()));
    }
    let year = date_part
        .get(..4)
        .and_then(|y| y.parse::<i32>().ok())
        .filter(|y| (1000..=9999).contains(y));
    (None, year)
}
