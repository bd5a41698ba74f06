//! Configuration loading for ARMP.
//! Reads armp.toml from the current directory or the path in the ARMP_CONFIG env var.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use armp_common::{organizations, Organization, SourceSystem};
use armp_ingestion::{
    DisambiguationConfig, IdentityConfig, LinkConfig, PipelineConfig, RetryPolicy, SourceSettings,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    /// Replaces the seeded organization list when non-empty.
    #[serde(default)]
    pub organizations: Vec<OrganizationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
    /// Journal lines appended before the snapshot is rewritten.
    #[serde(default = "default_compact_after")]
    pub compact_after: u64,
}

fn default_snapshot_path() -> String { "./data/catalog.json".to_string() }
fn default_compact_after() -> u64 { armp_db::DEFAULT_COMPACT_AFTER }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { snapshot_path: default_snapshot_path(), compact_after: default_compact_after() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_checkpoint_attempts")]
    pub checkpoint_attempts: u32,
    #[serde(default = "default_max_skipped_pages")]
    pub max_skipped_pages: u32,
    #[serde(default = "default_conflict_retries")]
    pub max_conflict_retries: u32,
}

fn default_concurrency()         -> usize { 4 }
fn default_max_attempts()        -> u32   { 4 }
fn default_base_delay_ms()       -> u64   { 500 }
fn default_max_delay_ms()        -> u64   { 8_000 }
fn default_checkpoint_attempts() -> u32   { 3 }
fn default_max_skipped_pages()   -> u32   { 5 }
fn default_conflict_retries()    -> u32   { 5 }

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            checkpoint_attempts: default_checkpoint_attempts(),
            max_skipped_pages: default_max_skipped_pages(),
            max_conflict_retries: default_conflict_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: f64,
    #[serde(default = "default_disambiguation_threshold")]
    pub disambiguation_threshold: f64,
    #[serde(default = "default_disambiguation_margin")]
    pub disambiguation_margin: f64,
    #[serde(default = "default_project_link_threshold")]
    pub project_link_threshold: f64,
    #[serde(default = "default_years_after_end")]
    pub years_after_end: i32,
}

fn default_merge_threshold()          -> f64 { 0.90 }
fn default_disambiguation_threshold() -> f64 { 0.90 }
fn default_disambiguation_margin()    -> f64 { 0.03 }
fn default_project_link_threshold()   -> f64 { 0.5 }
fn default_years_after_end()          -> i32 { 2 }

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            merge_threshold: default_merge_threshold(),
            disambiguation_threshold: default_disambiguation_threshold(),
            disambiguation_margin: default_disambiguation_margin(),
            project_link_threshold: default_project_link_threshold(),
            years_after_end: default_years_after_end(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub openaire: SourceOverride,
    #[serde(default)]
    pub crossref: SourceOverride,
    #[serde(default)]
    pub orcid: SourceOverride,
    #[serde(default)]
    pub fwf: SourceOverride,
}

/// Per-source settings; anything left out keeps the built-in default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceOverride {
    pub base_url: Option<String>,
    pub page_size: Option<u32>,
    pub min_interval_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
    pub mailto: Option<String>,
}

impl SourcesConfig {
    fn get(&self, system: SourceSystem) -> &SourceOverride {
        match system {
            SourceSystem::OpenAire => &self.openaire,
            SourceSystem::Crossref => &self.crossref,
            SourceSystem::Orcid    => &self.orcid,
            SourceSystem::Fwf      => &self.fwf,
        }
    }

    pub fn settings_for(&self, system: SourceSystem) -> SourceSettings {
        let o = self.get(system);
        let mut settings = SourceSettings::defaults_for(system);
        if let Some(ref url) = o.base_url { settings.base_url = url.clone(); }
        if let Some(n) = o.page_size { settings.page_size = n; }
        if let Some(ms) = o.min_interval_ms { settings.min_interval_ms = ms; }
        if let Some(secs) = o.timeout_secs { settings.timeout_secs = secs; }
        if let Some(ref ua) = o.user_agent { settings.user_agent = ua.clone(); }
        if o.mailto.is_some() { settings.mailto = o.mailto.clone(); }
        settings
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationConfig {
    pub id: String,
    pub name: String,
    pub city: Option<String>,
    #[serde(default = "default_country")]
    pub country: String,
    pub website: Option<String>,
}

fn default_country() -> String { "AT".to_string() }


impl Config {
    /// Load configuration from armp.toml.
    /// Checks ARMP_CONFIG env var first, then current directory.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("ARMP_CONFIG")
            .unwrap_or_else(|_| "armp.toml".to_string());
        Self::load_or_default(&path)
    }

    /// Built-in defaults when the file is absent. A file that exists but does
    /// not parse or validate is an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using built-in defaults");
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!(
                "Config file not found: {}\n\
                 Copy armp.example.toml to armp.toml and edit it.",
                path.display()
            );
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        config.validate().with_context(|| format!("validating {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let m = &self.matching;
        for (name, value) in [
            ("merge_threshold", m.merge_threshold),
            ("disambiguation_threshold", m.disambiguation_threshold),
            ("disambiguation_margin", m.disambiguation_margin),
            ("project_link_threshold", m.project_link_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("matching.{name} must be within 0..=1, got {value}");
            }
        }
        if self.database.compact_after == 0 {
            anyhow::bail!("database.compact_after must be at least 1");
        }
        if self.harvest.concurrency == 0 {
            anyhow::bail!("harvest.concurrency must be at least 1");
        }
        Ok(())
    }

    /// Organizations in scope: the configured list, else the seed list.
    pub fn organizations(&self) -> Vec<Organization> {
        if self.organizations.is_empty() {
            return organizations::seeded();
        }
        self.organizations
            .iter()
            .map(|o| Organization {
                id: organizations::strip_ror_prefix(&o.id).to_string(),
                name: o.name.clone(),
                city: o.city.clone(),
                country: o.country.clone(),
                website: o.website.clone(),
            })
            .collect()
    }

    pub fn pipeline(&self) -> PipelineConfig {
        let h = &self.harvest;
        let m = &self.matching;
        PipelineConfig {
            identity: IdentityConfig {
                merge_threshold: m.merge_threshold,
                max_conflict_retries: h.max_conflict_retries,
            },
            researchers: DisambiguationConfig {
                threshold: m.disambiguation_threshold,
                margin: m.disambiguation_margin,
                max_conflict_retries: h.max_conflict_retries,
            },
            links: LinkConfig {
                project_link_threshold: m.project_link_threshold,
                years_after_end: m.years_after_end,
            },
            retry: RetryPolicy {
                max_attempts: h.max_attempts,
                base_delay_ms: h.base_delay_ms,
                max_delay_ms: h.max_delay_ms,
            },
            checkpoint_attempts: h.checkpoint_attempts,
            max_skipped_pages: h.max_skipped_pages,
            concurrency: h.concurrency,
        }
    }
}
