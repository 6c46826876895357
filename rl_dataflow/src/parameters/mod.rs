//! Parameter distribution: learner publishes, relay caches, agents pull.

pub mod client;
pub mod module_dict;
pub mod protocol;
pub mod publisher;
pub mod relay;
pub mod snapshot;


pub use client::ParameterClient;
pub use module_dict::{ModuleDict, ParameterState, SharedModule, StateDict};
pub use protocol::{ParameterRequest, ParameterResponse};
pub use publisher::{ParameterPublisher, DEFAULT_TOPIC};
pub use relay::{ParameterRelay, RelayHandle, RelayStats};
pub use snapshot::{ParameterMetadata, ParameterSnapshot, SnapshotSlot};
