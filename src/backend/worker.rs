//! Background worker pool
//!
//! All blocking protocol work runs here so the control thread only updates
//! controller flags and enqueues jobs. A fixed number of threads pull
//! [`Job`]s from one shared crossbeam channel and hand them to a
//! [`JobHandler`].
//!
//! # Ordering
//!
//! Jobs for different tree rows run fully in parallel. Jobs for the same row
//! never overlap: its controller only ever has one task queued or running,
//! and a follow-up task is submitted from inside the handler of the task it
//! follows.
//!
//! # Idle tracking
//!
//! The pool counts jobs that are queued or running. A follow-up is submitted
//! before the job that produced it is marked done, so the count only reaches
//! zero once a chain of tasks has fully settled. [`JobQueue::wait_idle`] blocks
//! on that.

use crate::error::{Result, UaBrowserError};
use crate::tree::tasks::SubscriptionTask;
use crate::types::{NodeId, TreePosition};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How often idle workers re-check the running flag
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A unit of background work
#[derive(Debug)]
pub enum Job {
    /// Subscribe or unsubscribe walk for one controller
    Subscription(SubscriptionTask),
    /// Read the description/data-type columns of a node
    LoadDescription(NodeId),
    /// Breadth-first expansion below a row
    ExpandAll { root: TreePosition, token: u64 },
    /// Create an event subscription on a notifier node
    SubscribeEvents(NodeId),
    /// Drop the event subscription of a node
    UnsubscribeEvents(NodeId),
}

impl Job {
    fn name(&self) -> &'static str {
        match self {
            Job::Subscription(_) => "subscription",
            Job::LoadDescription(_) => "load-description",
            Job::ExpandAll { .. } => "expand-all",
            Job::SubscribeEvents(_) => "subscribe-events",
            Job::UnsubscribeEvents(_) => "unsubscribe-events",
        }
    }
}

/// Executes jobs on worker threads
pub trait JobHandler: Send + Sync + 'static {
    /// Run `job`; follow-up work goes through `queue`
    fn handle(&self, job: Job, queue: &JobQueue);
}

#[derive(Debug, Default)]
struct PendingJobs {
    count: Mutex<usize>,
    idle: Condvar,
}

impl PendingJobs {
    fn add(&self) {
        *self.count.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn get(&self) -> usize {
        *self.count.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Marks a job done even if its handler panics
struct DoneGuard<'a>(&'a PendingJobs);

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.0.done();
    }
}

/// Statistics for the worker pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub submitted: u64,
    pub completed: u64,
    pub rejected: u64,
    pub pending: usize,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    rejected: AtomicU64,
}

/// Cloneable handle for submitting jobs
#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: Sender<Job>,
    pending: Arc<PendingJobs>,
    counters: Arc<Counters>,
    running: Arc<AtomicBool>,
}

impl JobQueue {
    /// Enqueue a job without blocking; false once the pool has shut down
    pub fn submit(&self, job: Job) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            tracing::warn!("Worker pool stopped, dropping {} job", job.name());
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.pending.add();
        match self.sender.send(job) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                tracing::warn!("Worker channel closed, dropping {} job", e.0.name());
                self.pending.done();
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Jobs queued or running
    pub fn pending(&self) -> usize {
        self.pending.get()
    }

    /// Block until no job is queued or running; false on timeout
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.pending.count.lock().unwrap_or_else(|e| e.into_inner());
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            count = match self.pending.idle.wait_timeout(count, deadline - now) {
                Ok((c, _)) => c,
                Err(e) => e.into_inner().0,
            };
        }
        true
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            pending: self.pending(),
        }
    }
}

/// Fixed-size pool of worker threads
pub struct WorkerPool {
    queue: JobQueue,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers feeding jobs to `handler`
    pub fn new(threads: usize, handler: Arc<dyn JobHandler>) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let queue = JobQueue {
            sender,
            pending: Arc::new(PendingJobs::default()),
            counters: Arc::new(Counters::default()),
            running: Arc::new(AtomicBool::new(true)),
        };

        let threads = threads.max(1);
        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let receiver = receiver.clone();
            let queue = queue.clone();
            let handler = handler.clone();
            let handle = std::thread::Builder::new()
                .name(format!("uabrowser-worker-{}", i))
                .spawn(move || worker_loop(i, receiver, queue, handler))
                .map_err(|e| UaBrowserError::Io(e).with_context("Failed to spawn worker thread"))?;
            handles.push(handle);
        }
        tracing::info!("Worker pool started with {} threads", threads);

        Ok(Self { queue, handles })
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    /// Stop accepting jobs and join the workers
    ///
    /// Jobs still queued are discarded.
    pub fn shutdown(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.queue.running.store(false, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(id: usize, receiver: Receiver<Job>, queue: JobQueue, handler: Arc<dyn JobHandler>) {
    tracing::debug!("Worker {} started", id);

    while queue.running.load(Ordering::SeqCst) {
        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(job) => {
                let _done = DoneGuard(&queue.pending);
                tracing::trace!("Worker {} running {} job", id, job.name());
                handler.handle(job, &queue);
                queue.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Settle the idle count for anything left behind.
    while let Ok(job) = receiver.try_recv() {
        tracing::trace!("Worker {} discarding {} job", id, job.name());
        queue.pending.done();
    }
    tracing::debug!("Worker {} stopped", id);
}
