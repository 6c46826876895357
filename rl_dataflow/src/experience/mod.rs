//! Experience ingestion: many producers, one consumer, deduplicated
//! observations.

pub mod batch;
pub mod observation_cache;
pub mod queue;
pub mod tuple;


pub use batch::{observation_hash, BatchBuilder, ExperienceBatch};
pub use observation_cache::ObservationCache;
pub use queue::{ExperienceHandler, ExperienceQueue, QueueStats, WorkerState};
pub use tuple::{ExperienceTuple, ObsHash, RawExperience};
