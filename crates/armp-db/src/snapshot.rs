//! JSON snapshot of the embedded catalog.
//!
//! The file is written to a temporary sibling and renamed into place, so a
//! crash mid-write leaves the previous snapshot intact. Changes since the
//! last snapshot live in the journal (see `journal.rs`).

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use armp_common::{Authorship, HarvestCheckpoint, Project, ProjectPublication, Publication, Researcher};

use crate::error::{DbError, Result};
use crate::memory::CatalogState;

const FORMAT_VERSION: u32 = 1;

/// Owned copy of the catalog's primary maps, taken under the state lock and
/// encoded after it is released.
#[derive(Serialize, Deserialize)]
pub(crate) struct Snapshot {
    format_version: u32,
    #[serde(default = "Utc::now")]
    saved_at: DateTime<Utc>,
    /// Last journal sequence folded into this snapshot.
    #[serde(default)]
    pub(crate) journal_seq: u64,
    #[serde(default)]
    publications: Vec<Publication>,
    #[serde(default)]
    researchers: Vec<Researcher>,
    #[serde(default)]
    projects: Vec<Project>,
    #[serde(default)]
    authorships: Vec<Authorship>,
    #[serde(default)]
    project_publications: Vec<ProjectPublication>,
    #[serde(default)]
    checkpoints: Vec<HarvestCheckpoint>,
    #[serde(default)]
    history: Vec<HarvestCheckpoint>,
}

impl Snapshot {
    pub(crate) fn capture(state: &CatalogState) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            saved_at: Utc::now(),
            journal_seq: state.seq,
            publications: state.publications.values().cloned().collect(),
            researchers: state.researchers.values().cloned().collect(),
            projects: state.projects.values().cloned().collect(),
            authorships: state.authorships.values().cloned().collect(),
            project_publications: state.project_publications.values().cloned().collect(),
            checkpoints: state.checkpoints.values().cloned().collect(),
            history: state.history.clone(),
        }
    }

    fn into_state(self) -> CatalogState {
        let mut state = CatalogState::default();
        state.seq = self.journal_seq;
        state.publications = self.publications.into_iter().map(|p| (p.id, p)).collect();
        state.researchers = self.researchers.into_iter().map(|r| (r.id, r)).collect();
        state.projects = self.projects.into_iter().map(|p| (p.id, p)).collect();
        state.authorships = self
            .authorships
            .into_iter()
            .map(|a| ((a.publication_id, a.researcher_id), a))
            .collect();
        state.project_publications = self
            .project_publications
            .into_iter()
            .map(|e| ((e.project_id, e.publication_id), e))
            .collect();
        state.checkpoints = self
            .checkpoints
            .into_iter()
            .map(|c| (c.key.clone(), c))
            .collect();
        state.history = self.history;
        state.rebuild_indexes();
        state
    }
}

/// Serialise off the async workers; large catalogs take a while.
pub(crate) async fn encode(snapshot: Snapshot) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || serde_json::to_vec(&snapshot).map_err(DbError::from))
        .await
        .map_err(|e| DbError::Io(std::io::Error::other(e)))?
}

fn decode(bytes: &[u8]) -> Result<CatalogState> {
    let snapshot: Snapshot = serde_json::from_slice(bytes)?;
    if snapshot.format_version != FORMAT_VERSION {
        return Err(DbError::InvalidRecord(format!(
            "unsupported snapshot format {}",
            snapshot.format_version
        )));
    }
    Ok(snapshot.into_state())
}

/// Load a snapshot; `None` when the file does not exist yet.
pub(crate) async fn read(path: &Path) -> Result<Option<CatalogState>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => decode(&bytes).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) async fn write_atomic(path: PathBuf, bytes: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| DbError::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| DbError::Io(std::io::Error::other(e)))?
}
