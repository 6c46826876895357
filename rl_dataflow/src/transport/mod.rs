//! Messaging primitives the dataflow core is written against.
//!
//! The core only depends on the traits here ([`BoundedQueue`], [`Publish`],
//! [`Requester`]). The channel-backed implementations run everything in one
//! process, which is what the tests and single-host deployments use; a
//! networked transport plugs in by implementing the same traits.

pub mod pubsub;
pub mod queue;
pub mod reqrep;

pub use pubsub::{Publish, PubSubHub, Subscription, DEFAULT_SUBSCRIBER_CAPACITY};
pub use queue::{BoundedQueue, ChannelQueue};
pub use reqrep::{Endpoint, ReqRepClient, ReqRepServer, Requester};
