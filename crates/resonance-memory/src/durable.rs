//! Durable snapshot of the whole record set.
//!
//! Layout: a single JSON document
//! `{ "version": 1, "saved_at": "...", "records": [ {...}, ... ] }`.
//! Written to a temp file and renamed into place by one writer at a time.
//! A write that outlives its caller never replaces a newer snapshot. On
//! load each record is
//! decoded on its own, so a malformed entry is skipped instead of failing
//! the file; an unreadable or unparsable file leaves the store empty.

use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use resonance_core::{tags, Error, NewRecord, Record, RecordId, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub const SNAPSHOT_VERSION: u32 = 1;
pub const LOADER_SOURCE: &str = "loader";

#[derive(Serialize)]
struct SnapshotOut<'a> {
    version: u32,
    saved_at: DateTime<Utc>,
    records: &'a [Record],
}

#[derive(Deserialize)]
struct SnapshotIn {
    version: u32,
    #[serde(default)]
    records: Vec<serde_json::Value>,
}

/// Orders snapshot writes. Generations are handed out under `next`
/// together with the snapshot they belong to; `installed` is held by the
/// blocking writer and remembers the newest generation renamed into place.
#[derive(Default)]
pub(crate) struct PersistGuard {
    next: tokio::sync::Mutex<u64>,
    installed: Arc<Mutex<u64>>,
}

/// An entry dropped during load.
#[derive(Debug, Clone)]
pub struct SkippedEntry {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: Vec<SkippedEntry>,
    /// No durable file existed yet.
    pub missing: bool,
}

pub fn encode_snapshot(records: &[Record]) -> Result<Vec<u8>> {
    let snapshot = SnapshotOut { version: SNAPSHOT_VERSION, saved_at: Utc::now(), records };
    Ok(serde_json::to_vec_pretty(&snapshot)?)
}

/// Decode a snapshot, skipping entries that fail to parse, break a record
/// invariant, or repeat an earlier id.
pub fn decode_snapshot(bytes: &[u8], path: &Path) -> Result<(Vec<Record>, Vec<SkippedEntry>)> {
    let snapshot: SnapshotIn =
        serde_json::from_slice(bytes).map_err(|e| Error::corrupt_store(path, e.to_string()))?;
    if snapshot.version > SNAPSHOT_VERSION {
        return Err(Error::corrupt_store(
            path,
            format!("snapshot version {} is newer than supported {}", snapshot.version, SNAPSHOT_VERSION),
        ));
    }

    let mut records = Vec::with_capacity(snapshot.records.len());
    let mut skipped = Vec::new();
    let mut seen: HashSet<RecordId> = HashSet::new();

    for (index, value) in snapshot.records.into_iter().enumerate() {
        let decoded = serde_json::from_value::<Record>(value)
            .map_err(Error::from)
            .and_then(|r| r.validate().map(|_| r));
        match decoded {
            Ok(record) if !seen.insert(record.id) => skipped.push(SkippedEntry {
                index,
                reason: format!("duplicate id {}", record.id),
            }),
            Ok(record) => records.push(record),
            Err(e) => skipped.push(SkippedEntry { index, reason: e.to_string() }),
        }
    }
    Ok((records, skipped))
}

impl RecordStore {
    /// Write every record to the durable file. Returns the number written;
    /// in-memory stores write nothing.
    pub async fn persist_all(&self) -> Result<usize> {
        let Some(path) = self.path().map(Path::to_path_buf) else {
            return Ok(0);
        };

        let mut next = self.persist.next.lock().await;
        let records = self.snapshot().await;
        let bytes = encode_snapshot(&records)?;
        *next += 1;
        let generation = *next;

        let installed = self.persist.installed.clone();
        let target = path.clone();
        let written = tokio::task::spawn_blocking(move || write_snapshot(&target, &bytes, generation, &installed))
            .await
            .map_err(|e| Error::Internal(format!("snapshot writer failed: {e}")))??;
        drop(next);

        if written {
            info!("Persisted {} records to {}", records.len(), path.display());
        } else {
            debug!("Snapshot generation {} superseded before it was written", generation);
        }
        Ok(records.len())
    }

    /// Replace the store contents with the durable file.
    ///
    /// A missing file is a first boot and not an error. A corrupt or
    /// unreadable file leaves the store empty, appends a warning record,
    /// and returns the error so the caller can report it.
    pub async fn load_from_durable(&self) -> Result<LoadReport> {
        let Some(path) = self.path().map(Path::to_path_buf) else {
            return Ok(LoadReport { missing: true, ..Default::default() });
        };

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No durable state at {} — starting empty", path.display());
                self.inner.write().await.replace(Vec::new());
                return Ok(LoadReport { missing: true, ..Default::default() });
            }
            Err(e) => {
                let err = Error::corrupt_store(&path, format!("unreadable: {e}"));
                self.reset_after_failed_load(&err).await;
                return Err(err);
            }
        };

        let (records, skipped) = match decode_snapshot(&bytes, &path) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.reset_after_failed_load(&err).await;
                return Err(err);
            }
        };

        let loaded = records.len();
        let warnings: Vec<NewRecord> = skipped
            .iter()
            .map(|s| {
                warn!("Skipped malformed record #{} in {}: {}", s.index, path.display(), s.reason);
                NewRecord::new(
                    format!("skipped malformed record #{} during load: {}", s.index, s.reason),
                    LOADER_SOURCE,
                )
                .with_tags([tags::WARNING, tags::LOAD])
                .with_importance(0.6)
            })
            .collect();

        {
            let mut inner = self.inner.write().await;
            inner.replace(records);
            for warning in warnings {
                inner.push(warning);
            }
        }

        info!("Loaded {} records from {} ({} skipped)", loaded, path.display(), skipped.len());
        Ok(LoadReport { loaded, skipped, missing: false })
    }

    async fn reset_after_failed_load(&self, err: &Error) {
        warn!("{}, falling back to an empty store", err);
        let mut inner = self.inner.write().await;
        inner.replace(Vec::new());
        inner.push(
            NewRecord::new(format!("durable state unusable, started empty: {err}"), LOADER_SOURCE)
                .with_tags([tags::WARNING, tags::LOAD])
                .with_importance(0.9),
        );
    }
}

/// Write `bytes` to a temp file and rename it over `path`, unless a newer
/// generation is already installed. Returns whether the file was replaced.
fn write_snapshot(path: &Path, bytes: &[u8], generation: u64, installed: &Mutex<u64>) -> Result<bool> {
    let mut newest = installed.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if *newest >= generation {
        return Ok(false);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    *newest = generation;
    Ok(true)
}
