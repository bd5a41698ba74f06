//! armp-common: canonical record types, identifier normalisation and the
//! seeded organization registry shared by every ARMP crate.

pub mod error;
pub mod entities;
pub mod identifiers;
pub mod organizations;

// Re-export commonly used types
pub use entities::{
    Affiliation, AffiliationKind, AuthorMention, Authorship, HarvestCheckpoint, JobCounts, JobKey, JobStatus, Organization,
    PageCursor, Project, ProjectPublication, Publication, PublicationType, Researcher,
    SourceSystem,
};
pub use error::{ArmpError, Result};
pub use identifiers::{normalize_doi, normalize_orcid};
