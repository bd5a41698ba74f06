//! Append-only change journal beside the snapshot.
//!
//! Checkpoint writes append the entries recorded since the previous append,
//! one JSON object per line, and fsync. The full snapshot is only rewritten
//! on compaction. Every line carries a sequence number; the snapshot stores
//! the last sequence it contains, and replay skips anything at or below it.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use armp_common::{Authorship, HarvestCheckpoint, Project, ProjectPublication, Publication, Researcher};

use crate::error::{DbError, Result};

/// One committed change, carrying the full post-write record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "record", rename_all = "snake_case")]
pub(crate) enum JournalEntry {
    Publication(Publication),
    Researcher(Researcher),
    Project(Project),
    Authorship(Authorship),
    ProjectPublication(ProjectPublication),
    Checkpoint(HarvestCheckpoint),
    Archived(HarvestCheckpoint),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct JournalLine {
    pub seq: u64,
    pub entry: JournalEntry,
}

/// `catalog.json` → `catalog.json.journal`
pub(crate) fn path_for(snapshot: &Path) -> PathBuf {
    let mut name = snapshot.as_os_str().to_os_string();
    name.push(".journal");
    PathBuf::from(name)
}

pub(crate) fn encode(lines: &[JournalLine]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for line in lines {
        serde_json::to_writer(&mut out, line)?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Append pre-encoded lines and wait until they are on disk.
pub(crate) async fn append(path: PathBuf, bytes: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&bytes)?;
        file.sync_data()?;
        Ok(())
    })
    .await
    .map_err(|e| DbError::Io(std::io::Error::other(e)))?
}

/// Empty the journal after a compaction.
pub(crate) async fn reset(path: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let file = std::fs::File::create(&path)?;
        file.sync_all()?;
        Ok(())
    })
    .await
    .map_err(|e| DbError::Io(std::io::Error::other(e)))?
}

/// Read every complete line. A torn last line (crash mid-append) is dropped;
/// a bad line followed by good ones is corruption.
pub(crate) async fn read(path: PathBuf) -> Result<Vec<JournalLine>> {
    tokio::task::spawn_blocking(move || -> Result<Vec<JournalLine>> {
        let file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut lines = Vec::new();
        let mut torn: Option<(usize, serde_json::Error)> = None;
        for (n, raw) in BufReader::new(file).lines().enumerate() {
            let raw = raw?;
            if raw.trim().is_empty() {
                continue;
            }
            if let Some((at, e)) = torn.take() {
                return Err(DbError::InvalidRecord(format!(
                    "journal {} line {}: {e}",
                    path.display(),
                    at + 1
                )));
            }
            match serde_json::from_str::<JournalLine>(&raw) {
                Ok(line) => lines.push(line),
                Err(e) => torn = Some((n, e)),
            }
        }
        if let Some((at, e)) = torn {
            warn!(path = %path.display(), line = at + 1, error = %e, "Ignoring torn journal tail");
        }
        Ok(lines)
    })
    .await
    .map_err(|e| DbError::Io(std::io::Error::other(e)))?
}
