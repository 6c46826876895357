//! Deduplicating observation store keyed by content hash.
//!
//! The cache holds `Weak` handles only. An observation stays resolvable
//! exactly as long as something outside the cache (typically the replay
//! buffer) keeps an `Arc` to it:
//!
//! ```text
//! replay buffer ──Arc──> observation <──Weak── cache
//!                             │
//!        last Arc dropped ──> freed; lookup(hash) now returns None
//! ```
//!
//! Dead handles are never returned. They are swept lazily when the map
//! grows past twice its live size, or explicitly with [`ObservationCache::purge`].

use crate::experience::tuple::ObsHash;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

const MIN_SWEEP_THRESHOLD: usize = 64;

struct Entries<O> {
    map: HashMap<ObsHash, Weak<O>>,
    sweep_threshold: usize,
}

impl<O> Entries<O> {
    fn sweep(&mut self) -> usize {
        let before = self.map.len();
        self.map.retain(|_, weak| weak.strong_count() > 0);
        self.sweep_threshold = (self.map.len() * 2).max(MIN_SWEEP_THRESHOLD);
        before - self.map.len()
    }
}

/// Weak-valued map from observation hash to observation.
pub struct ObservationCache<O> {
    entries: Mutex<Entries<O>>,
}

impl<O> ObservationCache<O> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                sweep_threshold: MIN_SWEEP_THRESHOLD,
            }),
        }
    }

    /// Observation for `hash`, if some owner still holds it.
    pub fn lookup(&self, hash: &str) -> Option<Arc<O>> {
        self.entries.lock().map.get(hash).and_then(Weak::upgrade)
    }

    /// Register `observation` under `hash` and return the canonical copy.
    ///
    /// If a live observation is already registered for `hash`, that one is
    /// returned and `observation` is left to the caller to drop.
    pub fn insert(&self, hash: ObsHash, observation: Arc<O>) -> Arc<O> {
        let mut entries = self.entries.lock();
        if let Some(live) = entries.map.get(&hash).and_then(Weak::upgrade) {
            return live;
        }
        entries.map.insert(hash, Arc::downgrade(&observation));
        if entries.map.len() >= entries.sweep_threshold {
            entries.sweep();
        }
        observation
    }

    /// Number of live observations.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .map
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hashes of live observations.
    pub fn keys(&self) -> Vec<ObsHash> {
        self.entries
            .lock()
            .map
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(hash, _)| hash.clone())
            .collect()
    }

    /// Number of outside strong references per live observation.
    pub fn strong_counts(&self) -> HashMap<ObsHash, usize> {
        self.entries
            .lock()
            .map
            .iter()
            .filter_map(|(hash, weak)| match weak.strong_count() {
                0 => None,
                n => Some((hash.clone(), n)),
            })
            .collect()
    }

    /// Drop dead handles now. Returns how many were removed.
    pub fn purge(&self) -> usize {
        self.entries.lock().sweep()
    }
}

impl<O> Default for ObservationCache<O> {
    fn default() -> Self {
        Self::new()
    }
}
