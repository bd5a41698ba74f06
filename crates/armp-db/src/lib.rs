//! ARMP catalog layer.
//!
//! The harvest pipeline talks to storage only through the [`CatalogGateway`]
//! trait. Identity-keyed writes are conditional upserts (insert-if-absent on
//! the key, version-checked replace on merge), so concurrent jobs can never
//! create two canonical records for one DOI or ORCID iD.
//!
//! [`MemoryCatalog`] is the embedded implementation: all state lives in
//! memory behind a single lock. When opened on a file, every checkpoint
//! write appends the changes made since the previous one to a journal, and
//! the JSON snapshot is rewritten only when the journal is compacted.
//!
//! # Example
//!
//! ```rust,no_run
//! use armp_db::{CatalogGateway, MemoryCatalog};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = MemoryCatalog::open("./data/catalog.json", armp_common::organizations::seeded()).await?;
//!     println!("{} publications", catalog.stats().await?.publications);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod gateway;
mod journal;
pub mod memory;
pub mod snapshot;

pub use error::{DbError, Result};
pub use gateway::{
    CatalogGateway, CatalogStats, Edge, EdgeOutcome, PartitionGuard, PartitionKey,
    PublicationKey, ResearcherKey, UpsertAction, UpsertOutcome,
};
pub use memory::{MemoryCatalog, DEFAULT_COMPACT_AFTER};
