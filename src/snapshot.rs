//! Snapshot store: full-state captures with FIFO retention.
//!
//! A snapshot is the complete `NetworkState` serialized to one JSON file
//! under the snapshots directory, keyed by a monotonically increasing id.
//! Capture runs before every mutation commits, so the newest snapshot is
//! always the last-known-good pre-mutation state. Retention trimming happens
//! synchronously inside `capture`; the limit is floored at 1 so the most
//! recent snapshot can never be evicted by a misconfigured limit of 0.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IpamError, Result};
use crate::model::NetworkState;

pub type SnapshotId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: SnapshotId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    id: SnapshotId,
    timestamp: DateTime<Utc>,
    state: NetworkState,
}

pub struct SnapshotStore {
    dir: PathBuf,
    limit: usize,
    /// Ascending by id; the tail is the most recent capture.
    metas: Vec<SnapshotMeta>,
    next_id: SnapshotId,
}

impl SnapshotStore {
    /// Open (or create) the snapshot directory and index the captures already
    /// on disk. Files that do not parse as snapshots are left alone and
    /// logged; they become visible again as `Corrupt` only if restored by id.
    pub fn open(dir: PathBuf, limit: usize) -> Result<Self> {
        fs::create_dir_all(&dir)?;

        let mut metas = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            match read_meta(&path) {
                Some(meta) => metas.push(meta),
                None => log::warn!("Ignoring unreadable snapshot file {:?}", path),
            }
        }
        metas.sort_by_key(|m| m.id);
        let next_id = metas.last().map(|m| m.id + 1).unwrap_or(1);

        log::debug!("Snapshot store opened with {} snapshots", metas.len());
        Ok(SnapshotStore {
            dir,
            limit: limit.max(1),
            metas,
            next_id,
        })
    }

    fn path_for(&self, id: SnapshotId) -> PathBuf {
        self.dir.join(format!("snap-{:08}.json", id))
    }

    /// Serialize the full current state and persist it under a fresh id.
    /// Must complete before the mutation it precedes commits.
    pub fn capture(&mut self, state: &NetworkState) -> Result<SnapshotId> {
        let id = self.next_id;
        let timestamp = Utc::now();
        let file = SnapshotFile {
            id,
            timestamp,
            state: state.clone(),
        };
        fs::write(self.path_for(id), serde_json::to_string_pretty(&file)?)?;

        self.next_id += 1;
        self.metas.push(SnapshotMeta { id, timestamp });
        self.trim();
        log::debug!("Captured snapshot {}", id);
        Ok(id)
    }

    /// Evict oldest-first until the count is back at the limit. Eviction is
    /// best-effort: a file that refuses to delete is logged and forgotten
    /// rather than failing the capture that triggered the trim.
    fn trim(&mut self) {
        while self.metas.len() > self.limit {
            let meta = self.metas.remove(0);
            if let Err(err) = fs::remove_file(self.path_for(meta.id)) {
                log::warn!("Failed to evict snapshot {}: {}", meta.id, err);
            } else {
                log::debug!("Evicted snapshot {}", meta.id);
            }
        }
    }

    /// Deserialize a snapshot's state. `NotFound` for an unknown id,
    /// `Corrupt` when the payload does not parse; in both cases nothing else
    /// is touched.
    pub fn load(&self, id: SnapshotId) -> Result<NetworkState> {
        if !self.metas.iter().any(|m| m.id == id) {
            return Err(IpamError::NotFound {
                kind: "snapshot",
                id,
            });
        }
        let text = fs::read_to_string(self.path_for(id))?;
        let file: SnapshotFile =
            serde_json::from_str(&text).map_err(|err| IpamError::Corrupt {
                snapshot_id: id,
                reason: err.to_string(),
            })?;
        Ok(file.state)
    }

    /// Snapshot metadata, newest first.
    pub fn list(&self) -> Vec<SnapshotMeta> {
        self.metas.iter().rev().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.metas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }
}

fn read_meta(path: &std::path::Path) -> Option<SnapshotMeta> {
    // Only the header fields are needed for the index; the state graph is
    // deserialized lazily on restore.
    #[derive(Deserialize)]
    struct Header {
        id: SnapshotId,
        timestamp: DateTime<Utc>,
    }
    let text = fs::read_to_string(path).ok()?;
    let header: Header = serde_json::from_str(&text).ok()?;
    Some(SnapshotMeta {
        id: header.id,
        timestamp: header.timestamp,
    })
}
