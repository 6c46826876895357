//! Experience batches and the producer-side builder.
//!
//! A batch carries raw experiences plus a side-table of the observations
//! they reference. The builder stores each distinct observation once per
//! batch, keyed by the hash of its encoded bytes.

use crate::codec;
use crate::error::Result;
use crate::experience::tuple::{ObsHash, RawExperience};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unit of transfer on the experience queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperienceBatch<O, A, I> {
    pub experiences: Vec<RawExperience<A, I>>,
    /// Observations the consumer may not have cached yet.
    pub observations: HashMap<ObsHash, O>,
}

impl<O, A, I> ExperienceBatch<O, A, I> {
    pub fn new(experiences: Vec<RawExperience<A, I>>, observations: HashMap<ObsHash, O>) -> Self {
        Self {
            experiences,
            observations,
        }
    }

    pub fn len(&self) -> usize {
        self.experiences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiences.is_empty()
    }
}

impl<O, A, I> Default for ExperienceBatch<O, A, I> {
    fn default() -> Self {
        Self::new(Vec::new(), HashMap::new())
    }
}

/// Hash an observation by its encoded bytes.
pub fn observation_hash<O: Serialize>(observation: &O) -> Result<ObsHash> {
    Ok(codec::content_hash(&codec::serialize(observation)?))
}

/// Accumulates experiences into one batch.
pub struct BatchBuilder<O, A, I> {
    batch: ExperienceBatch<O, A, I>,
}

impl<O: Serialize, A, I> BatchBuilder<O, A, I> {
    pub fn new() -> Self {
        Self {
            batch: ExperienceBatch::default(),
        }
    }

    /// Add one experience. Observations already in this batch are not
    /// stored again.
    pub fn push(&mut self, observations: Vec<O>, action: A, reward: f32, done: bool, info: I) -> Result<()> {
        let mut hashes = Vec::with_capacity(observations.len());
        for observation in observations {
            let hash = observation_hash(&observation)?;
            self.batch
                .observations
                .entry(hash.clone())
                .or_insert(observation);
            hashes.push(hash);
        }
        self.batch
            .experiences
            .push(RawExperience::new(hashes, action, reward, done, info));
        Ok(())
    }

    /// Number of experiences added so far.
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Number of distinct observations stored so far.
    pub fn unique_observations(&self) -> usize {
        self.batch.observations.len()
    }

    pub fn build(self) -> ExperienceBatch<O, A, I> {
        self.batch
    }
}

impl<O: Serialize, A, I> Default for BatchBuilder<O, A, I> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_dedups_within_batch() {
        let mut builder = BatchBuilder::<Vec<u8>, u32, ()>::new();
        // Stacked frames sliding by one: [a, b], [b, c]
        builder
            .push(vec![vec![1], vec![2]], 0, 1.0, false, ())
            .unwrap();
        builder
            .push(vec![vec![2], vec![3]], 1, 0.5, true, ())
            .unwrap();
        assert_eq!(builder.len(), 2);
        assert_eq!(builder.unique_observations(), 3);

        let batch = builder.build();
        assert_eq!(batch.experiences[0].observations[1], batch.experiences[1].observations[0]);
        assert!(batch.experiences[1].done);
    }

    #[test]
    fn test_observation_hash_matches_codec() {
        let obs = vec![1.0f32, 2.0];
        let expected = codec::content_hash(&codec::serialize(&obs).unwrap());
        assert_eq!(observation_hash(&obs).unwrap(), expected);
    }

    #[test]
    fn test_empty_batch() {
        let batch = ExperienceBatch::<Vec<u8>, u32, ()>::default();
        assert!(batch.is_empty());
        assert!(batch.observations.is_empty());
    }
}
