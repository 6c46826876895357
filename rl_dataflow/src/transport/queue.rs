//! Bounded multi-producer/single-consumer queue.
//!
//! ```text
//! network frames ─> feeder thread ─┐
//! local producers ─────────────────┼──> bounded channel ──> consumer
//! ```
//!
//! `push` blocks once `capacity` items are outstanding; that blocking is the
//! only flow control on the ingestion path.

use crate::error::{DataflowError, Result};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::thread::JoinHandle;

/// Blocking bounded queue.
pub trait BoundedQueue<T>: Send + Sync {
    /// Push an item, blocking while the queue is full.
    fn push(&self, item: T) -> Result<()>;

    /// Pop the oldest item, blocking while the queue is empty.
    fn pop(&self) -> Result<T>;

    /// Number of items currently queued.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued items.
    fn capacity(&self) -> usize;
}

/// Bounded queue over a crossbeam channel.
pub struct ChannelQueue<T> {
    tx: Mutex<Option<Sender<T>>>,
    rx: Receiver<T>,
    capacity: usize,
}

impl<T: Send + 'static> ChannelQueue<T> {
    /// Create a queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
            capacity,
        }
    }

    /// Producer handle that can be moved to another thread.
    pub fn sender(&self) -> Result<Sender<T>> {
        self.tx
            .lock()
            .clone()
            .ok_or(DataflowError::Disconnected("queue closed"))
    }

    /// Stop accepting items from this handle.
    ///
    /// Once every producer handle is dropped, `pop` drains what is left and
    /// then returns `Disconnected`.
    pub fn close(&self) {
        self.tx.lock().take();
    }

    /// Spawn a thread that decodes inbound frames and pushes them.
    ///
    /// Frames that fail to decode are logged and dropped. The thread exits
    /// when `inbound` disconnects or the queue itself is dropped.
    pub fn spawn_feeder<F>(&self, inbound: Receiver<Vec<u8>>, decode: F) -> Result<JoinHandle<()>>
    where
        F: Fn(&[u8]) -> Result<T> + Send + 'static,
    {
        let tx = self.sender()?;
        let handle = std::thread::Builder::new()
            .name("queue-feeder".to_string())
            .spawn(move || {
                for frame in inbound.iter() {
                    let item = match decode(&frame) {
                        Ok(item) => item,
                        Err(e) => {
                            log::warn!("Dropping undecodable frame ({} bytes): {}", frame.len(), e);
                            continue;
                        }
                    };
                    if tx.send(item).is_err() {
                        break;
                    }
                }
                log::debug!("Queue feeder exiting");
            })?;
        Ok(handle)
    }
}

impl<T: Send + 'static> BoundedQueue<T> for ChannelQueue<T> {
    fn push(&self, item: T) -> Result<()> {
        // Clone the sender so a blocked push does not hold the lock.
        let tx = self.sender()?;
        tx.send(item)
            .map_err(|_| DataflowError::Disconnected("queue receiver dropped"))
    }

    fn pop(&self) -> Result<T> {
        self.rx
            .recv()
            .map_err(|_| DataflowError::Disconnected("all queue producers dropped"))
    }

    fn len(&self) -> usize {
        self.rx.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
