//! Background fetching of quadtree children.
//!
//! ## Overview
//!
//! A [`FetchScheduler`] owns a small pool of worker threads for one
//! [`TileSource`]. The render thread hands it nodes whose children it wants;
//! a worker builds the four child templates, calls
//! [`TileSource::fetch_child`] for each, and publishes the result keyed by the
//! requesting node. The render thread polls for results once per frame and
//! never blocks on a fetch.
//!
//! ## Synchronization
//!
//! Three independent primitives keep the producer and the consumers apart:
//! - the input queue (a `crossbeam-channel`), which workers block on
//! - the results map, behind its own mutex
//! - the lifecycle state (initialized, stopped, outstanding count), behind a
//!   mutex with a condvar for shutdown and idle waits
//!
//! Workers only ever mutate freshly allocated children that no other thread
//! can see until they are published.
//!
//! There is no cancellation. Results nobody collects stay in the map until
//! [`FetchScheduler::shut_down`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use crossbeam_channel::{unbounded, Receiver, Sender};
use geotile_common::{SchedulerError, TreeError, MAX_LEVEL};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::source::TileSource;
use crate::tree::{CopyMode, NodeKey, TreeNode};

/// Default number of worker threads per scheduler.
pub const DEFAULT_WORKER_THREADS: usize = 1;

/// Scheduler configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Requested worker threads (capped at the hardware parallelism)
    pub num_threads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_threads: DEFAULT_WORKER_THREADS,
        }
    }
}

/// Observable state of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No request queued or in flight
    Idle,
    /// At least one request queued or in flight
    HasWork,
    /// Shut down; no further work is accepted
    Stopped,
}

/// The four children fetched for one request.
#[derive(Debug)]
pub struct FetchedChildren {
    /// Children in quadrant order; failed ones carry no payload
    pub children: [TreeNode; 4],
    /// Which children the source had no data for
    pub failed: [bool; 4],
}

impl FetchedChildren {
    /// Number of children the source had no data for.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed.iter().filter(|f| **f).count()
    }
}

struct FetchRequest {
    key: NodeKey,
    parent: TreeNode,
}

#[derive(Default)]
struct Lifecycle {
    initialized: bool,
    stopped: bool,
    outstanding: usize,
    sender: Option<Sender<FetchRequest>>,
    workers: Vec<JoinHandle<()>>,
}

struct Shared<S> {
    source: S,
    results: Mutex<AHashMap<NodeKey, FetchedChildren>>,
    lifecycle: Mutex<Lifecycle>,
    lifecycle_changed: Condvar,
}

/// Worker pool that fetches children off the render thread.
pub struct FetchScheduler<S: TileSource> {
    config: SchedulerConfig,
    shared: Arc<Shared<S>>,
}

impl<S: TileSource> FetchScheduler<S> {
    /// Creates a scheduler; no threads run until [`Self::initialize`].
    #[must_use]
    pub fn new(source: S, config: SchedulerConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                source,
                results: Mutex::new(AHashMap::new()),
                lifecycle: Mutex::new(Lifecycle::default()),
                lifecycle_changed: Condvar::new(),
            }),
        }
    }

    /// Creates a scheduler and starts `config.num_threads` workers.
    pub fn start(source: S, config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let scheduler = Self::new(source, config);
        scheduler.initialize(config.num_threads)?;
        Ok(scheduler)
    }

    /// Configuration the scheduler was created with.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The source workers fetch from.
    #[must_use]
    pub fn source(&self) -> &S {
        &self.shared.source
    }

    /// Spawns `min(num_threads, hardware parallelism)` workers.
    ///
    /// Does nothing if already initialized. Returns the number of workers.
    pub fn initialize(&self, num_threads: usize) -> Result<usize, SchedulerError> {
        let mut lifecycle = self.shared.lifecycle.lock();
        if lifecycle.stopped {
            return Err(SchedulerError::Stopped);
        }
        if lifecycle.initialized {
            return Ok(lifecycle.workers.len());
        }

        let hardware = thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        let count = num_threads.clamp(1, hardware);
        self.shared.source.initialize();

        let (sender, receiver) = unbounded();
        for index in 0..count {
            let shared = Arc::clone(&self.shared);
            let requests = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("geotile-fetch-{index}"))
                .spawn(move || worker_loop(&shared, &requests))?;
            lifecycle.workers.push(handle);
        }

        lifecycle.sender = Some(sender);
        lifecycle.initialized = true;
        info!("Fetch scheduler started with {count} worker(s)");
        Ok(count)
    }

    /// Queues a fetch of the children of `parent`, stored under `key`.
    ///
    /// Never blocks on fetch work. `parent` is shallow-copied, so its payload
    /// is shared with the worker rather than cloned.
    pub fn request_children(&self, key: NodeKey, parent: &TreeNode) -> Result<(), SchedulerError> {
        if parent.level() >= MAX_LEVEL {
            return Err(TreeError::DepthLimit {
                id: parent.id(),
                level: parent.level(),
            }
            .into());
        }

        let mut lifecycle = self.shared.lifecycle.lock();
        if lifecycle.stopped {
            return Err(SchedulerError::Stopped);
        }
        let Some(sender) = lifecycle.sender.as_ref() else {
            return Err(SchedulerError::NotInitialized);
        };
        let request = FetchRequest {
            key,
            parent: parent.copy(CopyMode::Shallow),
        };
        sender.send(request).map_err(|_| SchedulerError::Stopped)?;
        lifecycle.outstanding += 1;
        debug!("Requested children of node {} ({key})", parent.id());
        Ok(())
    }

    /// Removes and returns the children fetched for `key`, if ready.
    pub fn take_requested(&self, key: NodeKey) -> Option<FetchedChildren> {
        self.shared.results.lock().remove(&key)
    }

    /// Number of results waiting to be taken.
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.shared.results.lock().len()
    }

    /// Requests queued or in flight.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.lifecycle.lock().outstanding
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        let lifecycle = self.shared.lifecycle.lock();
        if lifecycle.stopped {
            SchedulerState::Stopped
        } else if lifecycle.outstanding > 0 {
            SchedulerState::HasWork
        } else {
            SchedulerState::Idle
        }
    }

    /// Blocks until no request is queued or in flight, or `timeout` passes.
    ///
    /// Returns `true` if the scheduler went idle (or stopped).
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut lifecycle = self.shared.lifecycle.lock();
        while !lifecycle.stopped && lifecycle.outstanding > 0 {
            if self
                .shared
                .lifecycle_changed
                .wait_until(&mut lifecycle, deadline)
                .timed_out()
            {
                return lifecycle.outstanding == 0;
            }
        }
        true
    }

    /// Stops all workers and drops queued requests and uncollected results.
    ///
    /// Safe to call more than once.
    pub fn shut_down(&self) {
        let (sender, workers, initialized) = {
            let mut lifecycle = self.shared.lifecycle.lock();
            if lifecycle.stopped {
                return;
            }
            lifecycle.stopped = true;
            (
                lifecycle.sender.take(),
                std::mem::take(&mut lifecycle.workers),
                lifecycle.initialized,
            )
        };
        self.shared.lifecycle_changed.notify_all();

        // Disconnecting the queue wakes every worker blocked on it.
        drop(sender);
        for worker in workers {
            if worker.join().is_err() {
                error!("Fetch worker panicked");
            }
        }

        let abandoned = {
            let mut results = self.shared.results.lock();
            let n = results.len();
            results.clear();
            n
        };
        if abandoned > 0 {
            debug!("Dropped {abandoned} uncollected fetch result(s)");
        }
        if initialized {
            self.shared.source.shut_down();
        }
        info!("Fetch scheduler stopped");
    }
}

impl<S: TileSource> Drop for FetchScheduler<S> {
    fn drop(&mut self) {
        self.shut_down();
    }
}

fn worker_loop<S: TileSource>(shared: &Shared<S>, requests: &Receiver<FetchRequest>) {
    while let Ok(request) = requests.recv() {
        if shared.lifecycle.lock().stopped {
            break;
        }

        match fetch_children(&shared.source, &request.parent) {
            Ok(fetched) => {
                shared.results.lock().insert(request.key, fetched);
            },
            Err(e) => error!("Cannot build children of node {}: {e}", request.parent.id()),
        }

        let mut lifecycle = shared.lifecycle.lock();
        lifecycle.outstanding = lifecycle.outstanding.saturating_sub(1);
        shared.lifecycle_changed.notify_all();
    }
}

fn fetch_children<S: TileSource>(source: &S, parent: &TreeNode) -> Result<FetchedChildren, TreeError> {
    let mut children = parent.child_templates()?;
    let mut failed = [false; 4];
    for (index, child) in children.iter_mut().enumerate() {
        if let Err(e) = source.fetch_child(parent, index, child) {
            debug!("Child {index} of node {}: {e}", parent.id());
            child.delete_data();
            child.mark_unavailable();
            failed[index] = true;
        }
    }
    if failed.iter().all(|f| *f) {
        warn!("Source produced no children for node {}", parent.id());
    }
    Ok(FetchedChildren { children, failed })
}
