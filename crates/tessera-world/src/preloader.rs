//! Background preloading of terrain views on a worker pool.
//!
//! Each request runs [`World::preload`] on a worker thread, with its own
//! abort flag and progress counters. Finished views are stored in the world
//! so an observer arriving near the preloaded viewpoint reuses them, and the
//! results are delivered over a bounded channel for the frame loop to drain.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use dashmap::DashMap;
use glam::Vec3;
use tessera_lod::ObserverId;
use tessera_math::Rect;

use crate::error::PreloadError;
use crate::world::{PreloadOutcome, World};

/// A viewpoint to preload.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PreloadRequest {
    pub viewpoint: Vec3,
    pub active_region: Option<Rect>,
    /// Stamped on the stored view; it expires relative to this time.
    pub timestamp: f64,
}

/// A finished (or aborted) preload.
#[derive(Clone, Debug)]
pub struct PreloadResult {
    pub id: u64,
    pub request: PreloadRequest,
    pub outcome: PreloadOutcome,
    /// The stored view, unless the preload was aborted.
    pub observer: Option<ObserverId>,
    /// Preload time in microseconds.
    pub elapsed_us: u64,
}

/// Shared state of one in-flight preload.
#[derive(Default)]
struct PreloadProgress {
    abort: AtomicBool,
    done: AtomicUsize,
    total: AtomicUsize,
}

/// Caller-side handle to a submitted preload.
#[derive(Clone)]
pub struct PreloadTicket {
    id: u64,
    progress: Arc<PreloadProgress>,
}

impl PreloadTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Ask the worker to stop after the chunk it is resolving.
    pub fn cancel(&self) {
        self.progress.abort.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.progress.abort.load(Ordering::Relaxed)
    }

    /// `(done, total)` in node-size units. The total is known once the
    /// worker has made its selection.
    pub fn progress(&self) -> (usize, usize) {
        (
            self.progress.done.load(Ordering::Relaxed),
            self.progress.total.load(Ordering::Relaxed),
        )
    }
}

struct PreloadTask {
    id: u64,
    request: PreloadRequest,
    progress: Arc<PreloadProgress>,
}

/// Runs [`World::preload`] requests on background threads.
pub struct AsyncPreloader {
    task_sender: Option<Sender<PreloadTask>>,
    result_receiver: Receiver<PreloadResult>,
    active: Arc<DashMap<u64, Arc<PreloadProgress>>>,
    in_flight: Arc<AtomicU64>,
    next_id: AtomicU64,
    workers: Vec<JoinHandle<()>>,
}

impl AsyncPreloader {
    /// Spawn `thread_count` workers sharing a queue of `queue_capacity` requests.
    pub fn new(world: Arc<World>, thread_count: usize, queue_capacity: usize) -> Result<Self, PreloadError> {
        let (task_sender, task_receiver) = bounded::<PreloadTask>(queue_capacity);
        let (result_sender, result_receiver) = bounded::<PreloadResult>(queue_capacity);
        let active: Arc<DashMap<u64, Arc<PreloadProgress>>> = Arc::new(DashMap::new());
        let in_flight = Arc::new(AtomicU64::new(0));

        let mut workers = Vec::with_capacity(thread_count);
        for index in 0..thread_count {
            let receiver = task_receiver.clone();
            let sender = result_sender.clone();
            let world = Arc::clone(&world);
            let active = Arc::clone(&active);
            let in_flight = Arc::clone(&in_flight);

            let handle = std::thread::Builder::new()
                .name(format!("terrain-preload-{index}"))
                .spawn(move || {
                    while let Ok(task) = receiver.recv() {
                        let result = run_preload(&world, &task);
                        active.remove(&task.id);
                        in_flight.fetch_sub(1, Ordering::Relaxed);
                        // The receiver only goes away with the preloader itself.
                        let _ = sender.send(result);
                    }
                })?;
            workers.push(handle);
        }

        tracing::debug!("Started {} terrain preload workers", thread_count);
        Ok(Self {
            task_sender: Some(task_sender),
            result_receiver,
            active,
            in_flight,
            next_id: AtomicU64::new(1),
            workers,
        })
    }

    /// A pool sized to the machine, leaving two cores for the frame loop.
    ///
    /// `workers == 0` picks the count from the number of CPUs.
    pub fn with_defaults(world: Arc<World>, workers: usize) -> Result<Self, PreloadError> {
        let threads = if workers == 0 {
            (num_cpus::get().max(2) - 2).max(1)
        } else {
            workers
        };
        Self::new(world, threads, 64)
    }

    /// Queue a preload. Fails when the queue is full or the workers are gone.
    pub fn submit(&self, request: PreloadRequest) -> Result<PreloadTicket, PreloadError> {
        let sender = self.task_sender.as_ref().ok_or(PreloadError::ShutDown)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let progress = Arc::new(PreloadProgress::default());

        self.active.insert(id, Arc::clone(&progress));
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let task = PreloadTask {
            id,
            request,
            progress: Arc::clone(&progress),
        };

        sender.try_send(task).map_err(|e| {
            self.in_flight.fetch_sub(1, Ordering::Relaxed);
            self.active.remove(&id);
            match e {
                TrySendError::Full(_) => {
                    tracing::warn!("Preload queue full, dropping request at {:?}", request.viewpoint);
                    PreloadError::QueueFull
                }
                TrySendError::Disconnected(_) => PreloadError::ShutDown,
            }
        })?;

        Ok(PreloadTicket { id, progress })
    }

    /// Cancel a queued or running preload by id.
    pub fn cancel(&self, id: u64) {
        if let Some(progress) = self.active.get(&id) {
            progress.abort.store(true, Ordering::Relaxed);
        }
    }

    /// Cancel everything queued or running.
    pub fn cancel_all(&self) {
        for entry in self.active.iter() {
            entry.value().abort.store(true, Ordering::Relaxed);
        }
    }

    /// Collect finished preloads. Call once per frame.
    pub fn drain_results(&self) -> Vec<PreloadResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.result_receiver.try_recv() {
            results.push(result);
        }
        results
    }

    /// Requests queued or running.
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.active.contains_key(&id)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for AsyncPreloader {
    fn drop(&mut self) {
        self.cancel_all();
        // Closing the queue ends the worker loops.
        self.task_sender = None;
        // Unblock workers waiting on a full result channel.
        while self.result_receiver.try_recv().is_ok() {}
        for handle in self.workers.drain(..) {
            while !handle.is_finished() {
                while self.result_receiver.try_recv().is_ok() {}
                std::thread::yield_now();
            }
            let _ = handle.join();
        }
    }
}

fn run_preload(world: &World, task: &PreloadTask) -> PreloadResult {
    let start = Instant::now();
    let request = task.request;
    let mut view = world.create_view();
    let outcome = world.preload(
        &mut view,
        request.viewpoint,
        request.active_region,
        &task.progress.abort,
        &task.progress.done,
        &task.progress.total,
    );
    let observer = (!outcome.aborted).then(|| world.store_view(&view, request.timestamp));

    PreloadResult {
        id: task.id,
        request,
        outcome,
        observer,
        elapsed_us: start.elapsed().as_micros() as u64,
    }
}
