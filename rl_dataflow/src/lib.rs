//! # rl_dataflow: Experience Ingestion and Parameter Distribution
//!
//! The two data paths between a learner and its agents in distributed RL:
//! experiences flow in, parameters flow out.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Learner process                             │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Agent 0 ─┐                                                         │
//! │  Agent 1 ─┼─ ExperienceBatch ─> ┌──────────────────┐                │
//! │  Agent N ─┘   (deduplicated)    │ ExperienceQueue  │                │
//! │                                 │ (bounded, FIFO)  │                │
//! │                                 └────────┬─────────┘                │
//! │                                          ▼                          │
//! │                   ObservationCache <─ dequeue worker ─> handler     │
//! │                   (weak refs)                          (replay)     │
//! │                                                                     │
//! │  ┌────────────────────┐  pub/sub   ┌────────────────┐               │
//! │  │ ParameterPublisher │ ─────────> │ ParameterRelay │               │
//! │  └────────────────────┘            │ (one snapshot) │               │
//! │                                    └───────┬────────┘               │
//! └────────────────────────────────────────────┼────────────────────────┘
//!                                req/rep pull  │  hash-gated
//!                          ┌───────────────────┼───────────────┐
//!                          ▼                   ▼               ▼
//!                   ParameterClient     ParameterClient  ParameterClient
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rl_dataflow::{ExperienceQueue, ExperienceQueueConfig};
//!
//! let queue = ExperienceQueue::new(ExperienceQueueConfig::new().with_max_size(1024))?;
//! queue.start_dequeue_thread(|experience| replay.push(experience))?;
//! queue.enqueue_batch(batch)?;
//!
//! let relay = Arc::new(ParameterRelay::new());
//! let handle = relay.start(&hub, &ParameterServerConfig::default())?;
//! ParameterPublisher::new(model, hub.clone()).publish(iteration, "")?;
//!
//! let mut client = ParameterClient::connect(agent_model, &handle.endpoint(), &ParameterClientConfig::default());
//! if client.fetch_parameter()? { /* weights changed */ }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod experience;
pub mod parameters;
pub mod transport;

// Re-export commonly used types
pub use config::{ExperienceQueueConfig, ParameterClientConfig, ParameterServerConfig};
pub use error::{DataflowError, Result};

pub use experience::{
    observation_hash, BatchBuilder, ExperienceBatch, ExperienceHandler, ExperienceQueue,
    ExperienceTuple, ObsHash, ObservationCache, QueueStats, RawExperience, WorkerState,
};

pub use parameters::{
    ModuleDict, ParameterClient, ParameterMetadata, ParameterPublisher, ParameterRelay,
    ParameterRequest, ParameterResponse, ParameterSnapshot, ParameterState, RelayHandle,
    RelayStats, StateDict,
};

pub use transport::{
    BoundedQueue, ChannelQueue, Endpoint, Publish, PubSubHub, ReqRepClient, ReqRepServer,
    Requester,
};
