//! Request/reply over crossbeam channels.
//!
//! ```text
//! ReqRepClient ─┐                       ┌─> worker 0 ─┐
//! ReqRepClient ─┼──> request channel ───┼─> worker 1 ─┼──> per-request reply channel
//! ReqRepClient ─┘                       └─> worker N ─┘
//! ```
//!
//! With more than one worker the handler is invoked concurrently, so it
//! must be `Sync`.

use crate::error::{DataflowError, Result};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Reply as carried back to the client. Server-side failures travel as text.
type Reply = std::result::Result<Vec<u8>, String>;

type Envelope = (Vec<u8>, Sender<Reply>);

/// Requesting side of a request/reply transport.
pub trait Requester: Send {
    fn request(&self, payload: Vec<u8>) -> Result<Vec<u8>>;
}

/// Address of a running server. Cheap to clone; hand one to each client.
#[derive(Clone)]
pub struct Endpoint {
    tx: Sender<Envelope>,
}

impl Endpoint {
    pub fn connect(&self) -> ReqRepClient {
        ReqRepClient::new(self.clone())
    }
}

/// Blocking request/reply client.
pub struct ReqRepClient {
    endpoint: Endpoint,
    timeout: Option<Duration>,
}

impl ReqRepClient {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            timeout: None,
        }
    }

    /// Fail requests whose reply takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Requester for ReqRepClient {
    fn request(&self, payload: Vec<u8>) -> Result<Vec<u8>> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.endpoint
            .tx
            .send((payload, reply_tx))
            .map_err(|_| DataflowError::Disconnected("server is not running"))?;

        let reply = match self.timeout {
            Some(timeout) => reply_rx.recv_timeout(timeout).map_err(|e| {
                if e.is_timeout() {
                    DataflowError::Timeout(timeout)
                } else {
                    DataflowError::Disconnected("server dropped the request")
                }
            })?,
            None => reply_rx
                .recv()
                .map_err(|_| DataflowError::Disconnected("server dropped the request"))?,
        };
        reply.map_err(DataflowError::Remote)
    }
}

/// Running request/reply server.
pub struct ReqRepServer {
    endpoint: Endpoint,
    workers: Vec<JoinHandle<()>>,
}

impl ReqRepServer {
    /// Start `workers` threads answering requests with `handler`.
    ///
    /// Workers exit once every [`Endpoint`] and client has been dropped.
    pub fn spawn<H>(name: &str, workers: usize, handler: H) -> Result<Self>
    where
        H: Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded::<Envelope>();
        let handler = Arc::new(handler);
        let mut handles = Vec::with_capacity(workers.max(1));
        for worker_id in 0..workers.max(1) {
            let rx: Receiver<Envelope> = rx.clone();
            let handler = Arc::clone(&handler);
            let handle = std::thread::Builder::new()
                .name(format!("{name}-{worker_id}"))
                .spawn(move || {
                    for (request, reply_tx) in rx.iter() {
                        let reply = handler(&request).map_err(|e| e.to_string());
                        // Client may have timed out and gone away.
                        let _ = reply_tx.send(reply);
                    }
                    log::debug!("Request worker {} exiting", worker_id);
                })?;
            handles.push(handle);
        }
        Ok(Self {
            endpoint: Endpoint { tx },
            workers: handles,
        })
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    pub fn n_workers(&self) -> usize {
        self.workers.len()
    }

    /// Drop the server's own endpoint and wait for the workers to finish.
    pub fn join(self) -> std::thread::Result<()> {
        drop(self.endpoint);
        for handle in self.workers {
            handle.join()?;
        }
        Ok(())
    }
}
