//! Parameter snapshots and the single-slot holder used by the relay.
//!
//! # Design
//!
//! The relay keeps exactly one snapshot. Writers install a whole new
//! immutable snapshot with one pointer swap; readers load the current
//! pointer. A reader therefore sees either the old or the new
//! `(blob, metadata)` pair, never a mix of the two.
//!
//! ```text
//! subscriber thread                     request workers
//! ┌────────────────┐                    ┌────────────────┐
//! │ decode         │                    │ load()         │
//! │   ↓            │                    │   ↓            │
//! │ store(Arc) ────────> SnapshotSlot ──────> Arc<Snapshot> │
//! └────────────────┘     (ArcSwap)      └────────────────┘
//! ```

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Description of one published parameter version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterMetadata {
    /// Seconds since the Unix epoch at publish time.
    pub publish_time: f64,
    /// Learner iteration that produced the parameters.
    pub iteration: u64,
    /// Free-form note from the learner.
    pub message: String,
    /// Content hash of the blob.
    pub hash: String,
}

impl ParameterMetadata {
    /// Metadata stamped with the current time.
    pub fn now(iteration: u64, message: impl Into<String>, hash: String) -> Self {
        let publish_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            publish_time,
            iteration,
            message: message.into(),
            hash,
        }
    }
}

/// One published `(blob, metadata)` pair. Also the broadcast payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    pub blob: Vec<u8>,
    pub metadata: ParameterMetadata,
}

impl ParameterSnapshot {
    pub fn new(blob: Vec<u8>, metadata: ParameterMetadata) -> Self {
        Self { blob, metadata }
    }

    pub fn hash(&self) -> &str {
        &self.metadata.hash
    }
}

/// Holds the latest snapshot. No history is kept.
pub struct SnapshotSlot {
    current: ArcSwapOption<ParameterSnapshot>,
    /// Number of snapshots stored so far. Bumped after the swap, so once a
    /// reader sees version `n` the `n`-th snapshot (or a later one) is loaded.
    version: AtomicU64,
}

impl SnapshotSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
            version: AtomicU64::new(0),
        }
    }

    /// Replace the held snapshot.
    pub fn store(&self, snapshot: ParameterSnapshot) {
        self.current.store(Some(Arc::new(snapshot)));
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Current snapshot, if any.
    pub fn load(&self) -> Option<Arc<ParameterSnapshot>> {
        self.current.load_full()
    }

    /// Number of snapshots stored so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

impl Default for SnapshotSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(blob: &[u8], iteration: u64) -> ParameterSnapshot {
        ParameterSnapshot::new(
            blob.to_vec(),
            ParameterMetadata::now(iteration, "", crate::codec::content_hash(blob)),
        )
    }

    #[test]
    fn test_slot_basic() {
        let slot = SnapshotSlot::new();
        assert!(slot.load().is_none());
        assert_eq!(slot.version(), 0);

        slot.store(snapshot(b"v1", 1));
        assert_eq!(slot.version(), 1);
        assert_eq!(slot.load().unwrap().blob, b"v1");
    }

    #[test]
    fn test_store_overwrites() {
        let slot = SnapshotSlot::new();
        slot.store(snapshot(b"v1", 1));

        let before = slot.load().unwrap();
        slot.store(snapshot(b"v2", 2));

        // Readers holding the old snapshot keep a consistent copy.
        assert_eq!(before.blob, b"v1");
        assert_eq!(before.metadata.iteration, 1);

        let after = slot.load().unwrap();
        assert_eq!(after.blob, b"v2");
        assert_eq!(after.metadata.iteration, 2);
        assert_eq!(slot.version(), 2);
    }

    #[test]
    fn test_version_never_runs_ahead_of_store() {
        let slot = Arc::new(SnapshotSlot::new());
        let writer = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || {
                for i in 1..=500u64 {
                    slot.store(snapshot(&i.to_le_bytes(), i));
                }
            })
        };
        while slot.version() < 500 {
            let seen = slot.version();
            if seen > 0 {
                let loaded = slot.load().unwrap();
                assert!(loaded.metadata.iteration >= seen);
            }
        }
        writer.join().unwrap();
        assert_eq!(slot.load().unwrap().metadata.iteration, 500);
    }

    #[test]
    fn test_metadata_time_is_recent() {
        let meta = ParameterMetadata::now(5, "msg", "h".into());
        assert!(meta.publish_time > 1_600_000_000.0);
        assert_eq!(meta.message, "msg");
    }
}
