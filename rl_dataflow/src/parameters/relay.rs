//! Parameter relay: caches the latest broadcast and answers pulls.
//!
//! ```text
//! Publisher ──pub/sub──> subscriber thread ──store──> SnapshotSlot
//!                                                        │ load
//! Client 0 ─┐                                            ▼
//! Client 1 ─┼──req/rep──> request workers ──> handle_request()
//! Client N ─┘
//! ```
//!
//! The two sides share only the snapshot slot. Pub/sub is a shortcut;
//! the pull path is what clients rely on for correctness, since any client
//! can catch up with one request.

use crate::codec;
use crate::config::ParameterServerConfig;
use crate::error::{DataflowError, Result};
use crate::parameters::protocol::{ParameterRequest, ParameterResponse};
use crate::parameters::snapshot::{ParameterSnapshot, SnapshotSlot};
use crate::transport::pubsub::{PubSubHub, Subscription};
use crate::transport::reqrep::{Endpoint, ReqRepServer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Point-in-time relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Snapshots stored. Once this reads `n`, the `n`-th snapshot or a
    /// later one is being served.
    pub updates: u64,
    /// Requests answered.
    pub requests: u64,
    /// Replies that carried a blob.
    pub blobs_sent: u64,
    /// Parameter pulls answered without a blob because nothing changed.
    pub unchanged: u64,
    /// Requests and broadcasts rejected as malformed.
    pub rejected: u64,
}

#[derive(Default)]
struct RelayCounters {
    requests: AtomicU64,
    blobs_sent: AtomicU64,
    unchanged: AtomicU64,
    rejected: AtomicU64,
}

/// Holds the latest parameter snapshot and serves it to clients.
#[derive(Default)]
pub struct ParameterRelay {
    slot: SnapshotSlot,
    counters: RelayCounters,
}

impl ParameterRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held snapshot.
    pub fn update(&self, snapshot: ParameterSnapshot) {
        log::debug!(
            "Relay snapshot updated: iteration={} hash={}",
            snapshot.metadata.iteration,
            snapshot.metadata.hash
        );
        self.slot.store(snapshot);
    }

    /// Subscriber-side handler for one encoded broadcast.
    ///
    /// A payload that fails to decode leaves the current snapshot in place.
    pub fn on_broadcast(&self, payload: &[u8]) -> Result<()> {
        match codec::deserialize::<ParameterSnapshot>(payload) {
            Ok(snapshot) => {
                self.update(snapshot);
                Ok(())
            }
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Answer one request from the current snapshot.
    pub fn handle_request(&self, request: &ParameterRequest) -> ParameterResponse {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        // One load per request: every field of the reply comes from the
        // same snapshot.
        let current = self.slot.load();

        let response = match request {
            ParameterRequest::Info => {
                ParameterResponse::Info(current.map(|s| s.metadata.clone()))
            }
            ParameterRequest::Parameter { last_hash } => match current {
                None => ParameterResponse::Parameter {
                    blob: None,
                    current_hash: String::new(),
                },
                Some(snapshot) => ParameterResponse::Parameter {
                    blob: self.blob_if_changed(&snapshot, last_hash),
                    current_hash: snapshot.metadata.hash.clone(),
                },
            },
            ParameterRequest::Both { last_hash } => match current {
                None => ParameterResponse::Both {
                    blob: None,
                    metadata: None,
                },
                Some(snapshot) => ParameterResponse::Both {
                    blob: self.blob_if_changed(&snapshot, last_hash),
                    metadata: Some(snapshot.metadata.clone()),
                },
            },
        };
        if response.has_blob() {
            self.counters.blobs_sent.fetch_add(1, Ordering::Relaxed);
        }
        response
    }

    /// Decode a wire request, answer it and encode the reply.
    ///
    /// Malformed requests fail with a protocol error and touch no state.
    pub fn handle_raw(&self, request: &[u8]) -> Result<Vec<u8>> {
        let request = ParameterRequest::decode(request).map_err(|e| {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            log::warn!("Rejecting parameter request: {}", e);
            e
        })?;
        self.handle_request(&request).encode()
    }

    /// Current snapshot, if any.
    pub fn current(&self) -> Option<Arc<ParameterSnapshot>> {
        self.slot.load()
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            updates: self.slot.version(),
            requests: self.counters.requests.load(Ordering::Relaxed),
            blobs_sent: self.counters.blobs_sent.load(Ordering::Relaxed),
            unchanged: self.counters.unchanged.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    fn blob_if_changed(&self, snapshot: &ParameterSnapshot, last_hash: &str) -> Option<Vec<u8>> {
        if snapshot.metadata.hash == last_hash {
            self.counters.unchanged.fetch_add(1, Ordering::Relaxed);
            None
        } else {
            Some(snapshot.blob.clone())
        }
    }

    /// Subscribe to `config.topic` on `hub` and start the request workers.
    pub fn start(self: Arc<Self>, hub: &PubSubHub, config: &ParameterServerConfig) -> Result<RelayHandle> {
        config.validate()?;

        let relay = Arc::clone(&self);
        let subscription = hub.subscribe(&config.topic, move |payload| {
            if let Err(e) = relay.on_broadcast(payload) {
                log::warn!("Ignoring malformed parameter broadcast: {}", e);
            }
        })?;

        let relay = Arc::clone(&self);
        let server = ReqRepServer::spawn("ps-server", config.workers, move |request| {
            relay.handle_raw(request)
        })?;

        log::debug!(
            "Parameter relay started: topic={} workers={} load_balanced={}",
            config.topic,
            server.n_workers(),
            config.load_balanced()
        );
        Ok(RelayHandle {
            relay: self,
            subscription,
            server,
        })
    }
}

/// Running relay: its subscription thread and request workers.
pub struct RelayHandle {
    relay: Arc<ParameterRelay>,
    subscription: Subscription,
    server: ReqRepServer,
}

impl RelayHandle {
    /// Address clients connect to.
    pub fn endpoint(&self) -> Endpoint {
        self.server.endpoint()
    }

    pub fn relay(&self) -> &Arc<ParameterRelay> {
        &self.relay
    }

    /// Block until both sides have shut down.
    ///
    /// The subscription ends when the hub is dropped, the workers when every
    /// client endpoint is dropped.
    pub fn join(self) -> Result<()> {
        self.subscription
            .join()
            .map_err(|_| DataflowError::Disconnected("relay subscriber panicked"))?;
        self.server
            .join()
            .map_err(|_| DataflowError::Disconnected("relay worker panicked"))
    }
}
