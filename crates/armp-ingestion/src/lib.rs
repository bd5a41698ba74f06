//! armp-ingestion: harvest and record-reconciliation pipeline.
//!
//! Flow for one harvest job (source × organization):
//!   1. Fetch a page from the source adapter (rate limited, retried)
//!   2. Normalise each raw record into a draft
//!   3. Resolve publication identity (DOI first, then fuzzy match)
//!   4. Disambiguate every author mention to a canonical researcher
//!   5. Link authorship / project edges
//!   6. Commit the page checkpoint, then move to the next page

pub mod error;
pub mod identity;
pub mod links;
pub mod models;
pub mod pipeline;
pub mod researchers;
pub mod retry;
pub mod similarity;
pub mod sources;
pub mod throttle;

pub use error::{HarvestError, SourceError};
pub use identity::{IdentityConfig, IdentityResolver, Resolution};
pub use links::{LinkBuilder, LinkConfig, ProjectLinks};
pub use models::{NormalizedRecord, Page, ProjectDraft, PublicationDraft, RawRecord, ResearcherProfile, SourceScope};
pub use pipeline::{
    HarvestJob, HarvestProgress, HarvestSummary, Harvester, JobSummary, OrganizationTotals, PipelineConfig,
};
pub use researchers::{
    DisambiguationConfig, ResearcherAction, ResearcherDisambiguator, ResearcherMention, ResearcherResolution,
};
pub use retry::RetryPolicy;
pub use similarity::{FuzzyScorer, MatchWeights, SimilarityScorer};
pub use sources::{build_registry, AdapterRegistry, SourceAdapter, SourceSettings};
