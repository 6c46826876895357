//! Experience tuples before and after observation resolution.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Content hash identifying one observation.
pub type ObsHash = String;

/// Experience as sent by a producer: observations are referenced by hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawExperience<A, I> {
    /// One hash per frame (several for stacked-frame windows).
    pub observations: Vec<ObsHash>,
    pub action: A,
    pub reward: f32,
    pub done: bool,
    pub info: I,
}

impl<A, I> RawExperience<A, I> {
    pub fn new(observations: Vec<ObsHash>, action: A, reward: f32, done: bool, info: I) -> Self {
        Self {
            observations,
            action,
            reward,
            done,
            info,
        }
    }
}

/// Experience handed to the consumer, with observations materialized.
///
/// Equal hashes resolve to the same `Arc`, so holding a tuple keeps its
/// observations deduplicated in the cache.
#[derive(Debug, Clone)]
pub struct ExperienceTuple<O, A, I> {
    pub observations: Vec<Arc<O>>,
    pub action: A,
    pub reward: f32,
    pub done: bool,
    pub info: I,
}

impl<O, A, I> ExperienceTuple<O, A, I> {
    /// Replace the hashes of `raw` with resolved observations.
    pub(crate) fn from_raw(raw: RawExperience<A, I>, observations: Vec<Arc<O>>) -> Self {
        debug_assert_eq!(raw.observations.len(), observations.len());
        Self {
            observations,
            action: raw.action,
            reward: raw.reward,
            done: raw.done,
            info: raw.info,
        }
    }
}
