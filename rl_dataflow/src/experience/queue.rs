//! Experience ingestion queue with observation deduplication.
//!
//! # Data Flow
//!
//! ```text
//! Producer 0 ─┐
//! Producer 1 ─┼──> bounded queue (batches) ──> dequeue worker ──> handler
//! Producer N ─┘         (backpressure)              │
//!                                                   └──> ObservationCache
//! ```
//!
//! A single worker drains batches in FIFO order. For each batch it resolves
//! every observation hash (live cache entry first, then the batch
//! side-table), calls the handler once per experience in batch order, and
//! then drops the batch. Only observations that the handler kept alive
//! outlive the batch.

use crate::config::ExperienceQueueConfig;
use crate::error::{DataflowError, Result};
use crate::experience::batch::ExperienceBatch;
use crate::experience::observation_cache::ObservationCache;
use crate::experience::tuple::{ExperienceTuple, ObsHash, RawExperience};
use crate::transport::queue::{BoundedQueue, ChannelQueue};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Consumer of resolved experiences, usually a replay buffer.
pub trait ExperienceHandler<O, A, I> {
    /// Called once per experience, in enqueue order.
    fn handle(&mut self, experience: ExperienceTuple<O, A, I>);

    /// Called instead of `handle` for an experience that could not be
    /// resolved.
    fn on_error(&mut self, error: DataflowError) {
        log::error!("Dropping experience: {}", error);
    }
}

impl<O, A, I, F> ExperienceHandler<O, A, I> for F
where
    F: FnMut(ExperienceTuple<O, A, I>),
{
    fn handle(&mut self, experience: ExperienceTuple<O, A, I>) {
        self(experience)
    }
}

/// Lifecycle of the dequeue worker. The only transition a caller can
/// trigger is `Idle -> Running`. The worker moves to `Stopped` when the
/// queue closes or its transport fails, and back to `Idle` if the handler
/// panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Stopped,
}

/// Point-in-time counters of the dequeue worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Batches fully processed.
    pub batches: u64,
    /// Experiences delivered to the handler.
    pub experiences: u64,
    /// Observations materialized from batch side-tables.
    pub materialized: u64,
    /// Observation references satisfied without materializing.
    pub reused: u64,
    /// Experiences rejected because an observation could not be resolved.
    pub protocol_errors: u64,
    /// Failed pops other than a clean close.
    pub transport_errors: u64,
}

#[derive(Default)]
struct StatsCounters {
    batches: AtomicU64,
    experiences: AtomicU64,
    materialized: AtomicU64,
    reused: AtomicU64,
    protocol_errors: AtomicU64,
    transport_errors: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> QueueStats {
        QueueStats {
            batches: self.batches.load(Ordering::Relaxed),
            experiences: self.experiences.load(Ordering::Relaxed),
            materialized: self.materialized.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
        }
    }
}

/// Leaves the worker state consistent however the worker thread exits.
struct WorkerExit {
    state: Arc<Mutex<WorkerState>>,
}

impl Drop for WorkerExit {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if std::thread::panicking() {
            log::error!("Dequeue worker panicked; the queue is no longer drained");
            *state = WorkerState::Idle;
        } else {
            *state = WorkerState::Stopped;
        }
    }
}

/// Bounded queue of experience batches drained by one worker thread.
pub struct ExperienceQueue<O, A, I, Q = ChannelQueue<ExperienceBatch<O, A, I>>> {
    config: ExperienceQueueConfig,
    queue: Arc<Q>,
    cache: Arc<ObservationCache<O>>,
    state: Arc<Mutex<WorkerState>>,
    stats: Arc<StatsCounters>,
    _marker: std::marker::PhantomData<fn() -> (A, I)>,
}

impl<O, A, I> ExperienceQueue<O, A, I>
where
    O: Send + Sync + 'static,
    A: Send + 'static,
    I: Send + 'static,
{
    /// Create a queue backed by an in-process bounded channel.
    pub fn new(config: ExperienceQueueConfig) -> Result<Self> {
        config.validate()?;
        let queue = ChannelQueue::new(config.max_size);
        Ok(Self::with_queue(config, queue))
    }

    /// Start the thread that decodes inbound network frames into batches.
    pub fn start_enqueue_thread(&self, inbound: Receiver<Vec<u8>>) -> Result<JoinHandle<()>>
    where
        O: DeserializeOwned,
        A: DeserializeOwned,
        I: DeserializeOwned,
    {
        self.queue
            .spawn_feeder(inbound, |frame| crate::codec::deserialize(frame))
    }

    /// Stop accepting batches. The worker finishes what is queued and stops.
    pub fn close(&self) {
        self.queue.close();
    }
}

impl<O, A, I, Q> ExperienceQueue<O, A, I, Q>
where
    O: Send + Sync + 'static,
    A: Send + 'static,
    I: Send + 'static,
    Q: BoundedQueue<ExperienceBatch<O, A, I>> + 'static,
{
    /// Create a queue over any bounded transport queue.
    pub fn with_queue(config: ExperienceQueueConfig, queue: Q) -> Self {
        Self {
            config,
            queue: Arc::new(queue),
            cache: Arc::new(ObservationCache::new()),
            state: Arc::new(Mutex::new(WorkerState::Idle)),
            stats: Arc::new(StatsCounters::default()),
            _marker: std::marker::PhantomData,
        }
    }

    /// Enqueue one batch, blocking while the queue is full.
    pub fn enqueue_batch(&self, batch: ExperienceBatch<O, A, I>) -> Result<()> {
        self.queue.push(batch)
    }

    /// Spawn the single dequeue worker.
    ///
    /// Fails with [`DataflowError::AlreadyRunning`] if a worker was already
    /// started; no second thread is spawned in that case.
    ///
    /// The worker returns `Ok(())` once the queue is closed and drained, and
    /// the transport error if `pop` fails any other way; both leave the state
    /// `Stopped`. A panicking handler puts the state back to `Idle`, so a new
    /// worker can take over the queue.
    pub fn start_dequeue_thread<H>(&self, handler: H) -> Result<JoinHandle<Result<()>>>
    where
        H: ExperienceHandler<O, A, I> + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            match *state {
                WorkerState::Idle => *state = WorkerState::Running,
                WorkerState::Running => return Err(DataflowError::AlreadyRunning),
                WorkerState::Stopped => {
                    return Err(DataflowError::Config(
                        "dequeue worker has already stopped".into(),
                    ))
                }
            }
        }

        let queue = Arc::clone(&self.queue);
        let cache = Arc::clone(&self.cache);
        let stats = Arc::clone(&self.stats);
        let state = Arc::clone(&self.state);
        let spawned = std::thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || {
                let _exit = WorkerExit { state };
                let mut handler = handler;
                log::debug!("Dequeue worker started");
                loop {
                    match queue.pop() {
                        Ok(batch) => dispatch_batch(&cache, &stats, batch, &mut handler),
                        Err(DataflowError::Disconnected(reason)) => {
                            log::debug!("Dequeue worker stopped: {}", reason);
                            return Ok(());
                        }
                        Err(e) => {
                            stats.transport_errors.fetch_add(1, Ordering::Relaxed);
                            log::error!("Dequeue worker stopped on transport failure: {}", e);
                            return Err(e);
                        }
                    }
                }
            });

        match spawned {
            Ok(handle) => Ok(handle),
            Err(e) => {
                *self.state.lock() = WorkerState::Idle;
                Err(e.into())
            }
        }
    }

    /// Batches currently queued. May be stale as soon as it is read.
    pub fn size(&self) -> usize {
        self.queue.len()
    }

    /// Fraction of the queue bound currently in use.
    pub fn occupancy(&self) -> f32 {
        self.size() as f32 / self.queue.capacity() as f32
    }

    pub fn max_size(&self) -> usize {
        self.queue.capacity()
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    pub fn stats(&self) -> QueueStats {
        self.stats.snapshot()
    }

    /// Observation cache shared with the worker.
    pub fn cache(&self) -> &Arc<ObservationCache<O>> {
        &self.cache
    }
}

/// Resolve and deliver every experience of one batch.
fn dispatch_batch<O, A, I, H>(
    cache: &ObservationCache<O>,
    stats: &StatsCounters,
    batch: ExperienceBatch<O, A, I>,
    handler: &mut H,
) where
    H: ExperienceHandler<O, A, I>,
{
    let ExperienceBatch {
        experiences,
        mut observations,
    } = batch;
    // Strong refs for everything resolved in this batch, so a repeated hash
    // stays resolvable even if the handler does not retain it.
    let mut pinned: HashMap<ObsHash, Arc<O>> = HashMap::new();

    for raw in experiences {
        match resolve(cache, stats, &mut observations, &mut pinned, raw) {
            Ok(experience) => {
                handler.handle(experience);
                stats.experiences.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
                handler.on_error(e);
            }
        }
    }
    // Release the batch before reporting it as done.
    drop(pinned);
    drop(observations);
    stats.batches.fetch_add(1, Ordering::Relaxed);
}

fn resolve<O, A, I>(
    cache: &ObservationCache<O>,
    stats: &StatsCounters,
    side_table: &mut HashMap<ObsHash, O>,
    pinned: &mut HashMap<ObsHash, Arc<O>>,
    raw: RawExperience<A, I>,
) -> Result<ExperienceTuple<O, A, I>> {
    let mut resolved = Vec::with_capacity(raw.observations.len());
    for hash in &raw.observations {
        if let Some(observation) = pinned.get(hash) {
            stats.reused.fetch_add(1, Ordering::Relaxed);
            resolved.push(Arc::clone(observation));
            continue;
        }
        let observation = if let Some(live) = cache.lookup(hash) {
            stats.reused.fetch_add(1, Ordering::Relaxed);
            live
        } else if let Some(fresh) = side_table.remove(hash) {
            stats.materialized.fetch_add(1, Ordering::Relaxed);
            cache.insert(hash.clone(), Arc::new(fresh))
        } else {
            return Err(DataflowError::MissingObservation { hash: hash.clone() });
        };
        pinned.insert(hash.clone(), Arc::clone(&observation));
        resolved.push(observation);
    }
    Ok(ExperienceTuple::from_raw(raw, resolved))
}

#[cfg(test)]
mod tests {
    use super::*;

    type Obs = Vec<u8>;

    fn raw(hashes: &[&str], action: u32) -> RawExperience<u32, ()> {
        RawExperience::new(hashes.iter().map(|h| h.to_string()).collect(), action, 0.0, false, ())
    }

    #[test]
    fn test_resolve_materializes_once_per_batch() {
        let cache = ObservationCache::<Obs>::new();
        let stats = StatsCounters::default();
        let batch = ExperienceBatch::new(
            vec![raw(&["a", "b"], 0), raw(&["b", "a"], 1)],
            HashMap::from([("a".to_string(), vec![1]), ("b".to_string(), vec![2])]),
        );

        let mut seen = Vec::new();
        let mut handler = |exp: ExperienceTuple<Obs, u32, ()>| seen.push(exp);
        dispatch_batch(&cache, &stats, batch, &mut handler);

        assert_eq!(seen.len(), 2);
        assert!(Arc::ptr_eq(&seen[0].observations[0], &seen[1].observations[1]));
        assert!(Arc::ptr_eq(&seen[0].observations[1], &seen[1].observations[0]));
        let s = stats.snapshot();
        assert_eq!(s.materialized, 2);
        assert_eq!(s.reused, 2);
        assert_eq!(s.batches, 1);
    }

    #[test]
    fn test_repeated_hash_survives_unretaining_handler() {
        let cache = ObservationCache::<Obs>::new();
        let stats = StatsCounters::default();
        let batch = ExperienceBatch::new(
            vec![raw(&["a"], 0), raw(&["a"], 1)],
            HashMap::from([("a".to_string(), vec![1])]),
        );

        let mut actions = Vec::new();
        let mut handler = |exp: ExperienceTuple<Obs, u32, ()>| actions.push(exp.action);
        dispatch_batch(&cache, &stats, batch, &mut handler);

        assert_eq!(actions, vec![0, 1]);
        assert_eq!(stats.snapshot().protocol_errors, 0);
        // Nothing retained the observation past the batch.
        assert!(cache.lookup("a").is_none());
    }

    struct Recorder {
        actions: Vec<u32>,
        errors: Vec<String>,
    }

    impl ExperienceHandler<Obs, u32, ()> for Recorder {
        fn handle(&mut self, experience: ExperienceTuple<Obs, u32, ()>) {
            self.actions.push(experience.action);
        }

        fn on_error(&mut self, error: DataflowError) {
            self.errors.push(error.to_string());
        }
    }

    #[test]
    fn test_missing_observation_fails_only_that_experience() {
        let cache = ObservationCache::<Obs>::new();
        let stats = StatsCounters::default();
        let batch = ExperienceBatch::new(
            vec![raw(&["a"], 0), raw(&["ghost"], 1), raw(&["a"], 2)],
            HashMap::from([("a".to_string(), vec![1])]),
        );

        let mut recorder = Recorder {
            actions: Vec::new(),
            errors: Vec::new(),
        };
        dispatch_batch(&cache, &stats, batch, &mut recorder);

        assert_eq!(recorder.actions, vec![0, 2]);
        assert_eq!(recorder.errors.len(), 1);
        assert!(recorder.errors[0].contains("ghost"));
        assert_eq!(stats.snapshot().protocol_errors, 1);
    }
}
