use std::{
    fs::{self, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::debug;

use crate::ledger::{LedgerEvent, LedgerSnapshot, LoyaltyLedger, SnapshotError};

pub const SNAPSHOT_FILE: &str = "ledger.json";
pub const EVENTS_FILE: &str = "events.jsonl";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("corrupt snapshot in {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: SnapshotError,
    },
    #[error("no ledger state in {path}")]
    Missing { path: PathBuf },
}

/// Directory-backed persistence: one snapshot file replaced atomically on
/// every commit plus an append-only event journal.
#[derive(Clone, Debug)]
pub struct LedgerStore {
    dir: PathBuf,
}

impl LedgerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    pub fn events_path(&self) -> PathBuf {
        self.dir.join(EVENTS_FILE)
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path().exists()
    }

    pub fn load(&self) -> Result<LoyaltyLedger, StoreError> {
        let path = self.snapshot_path();
        if !path.exists() {
            return Err(StoreError::Missing { path });
        }
        let bytes = fs::read(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let snapshot: LedgerSnapshot =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
                path: path.clone(),
                source,
            })?;
        let ledger =
            LoyaltyLedger::from_snapshot(snapshot).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), height = ledger.meta().height, "ledger loaded");
        Ok(ledger)
    }

    /// Writes to a sibling temp file and renames it over the snapshot so a
    /// crash never leaves a half-written state behind.
    pub fn save(&self, ledger: &LoyaltyLedger) -> Result<(), StoreError> {
        self.ensure_dir()?;
        let path = self.snapshot_path();
        let tmp = self.dir.join(format!("{SNAPSHOT_FILE}.tmp"));
        let bytes =
            serde_json::to_vec_pretty(&ledger.snapshot()).map_err(|source| StoreError::Json {
                path: path.clone(),
                source,
            })?;
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StoreError::Io { path, source }
        };
        let mut f = fs::File::create(&tmp).map_err(io_err(&tmp))?;
        f.write_all(&bytes).map_err(io_err(&tmp))?;
        f.sync_all().map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_err(&path))?;
        debug!(path = %path.display(), height = ledger.meta().height, "ledger saved");
        Ok(())
    }

    pub fn append_events(&self, events: &[LedgerEvent]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        self.ensure_dir()?;
        let path = self.events_path();
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        for event in events {
            let line = serde_json::to_string(event).map_err(|source| StoreError::Json {
                path: path.clone(),
                source,
            })?;
            writeln!(f, "{}", line).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn read_events(&self) -> Result<Vec<LedgerEvent>, StoreError> {
        let path = self.events_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(
                serde_json::from_str(&line).map_err(|source| StoreError::Json {
                    path: path.clone(),
                    source,
                })?,
            );
        }
        Ok(events)
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
                path: self.dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
