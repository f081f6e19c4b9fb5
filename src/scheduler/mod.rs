pub mod backpressure;
pub mod balancer;
pub mod queue;
pub(crate) mod worker;

use crate::batch::Batch;
use crate::config::types::SchedulerConfig;
use crate::pipeline::PipelineContext;
use crate::verdict::Verdict;
use backpressure::BackpressureController;
use balancer::LoadBalancer;
use queue::JobQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use worker::{classify_batch, Job, WorkerHandle};

pub use balancer::WorkerStats;
pub use queue::Priority;

/// Submission failures. All of them mean "try again later".
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("backpressure: {load} jobs in flight (threshold {threshold})")]
    Backpressure { load: usize, threshold: usize },

    #[error("job queue full ({capacity} jobs)")]
    QueueFull { capacity: usize },

    #[error("scheduler stopped")]
    Stopped,
}

/// Resolves to the verdicts of one submitted batch
#[derive(Debug)]
pub struct JobHandle {
    pub id: Uuid,
    rx: oneshot::Receiver<Vec<Verdict>>,
}

impl JobHandle {
    /// Wait for the job to finish. Fails with `Stopped` if the job was dropped during shutdown.
    pub async fn wait(self) -> Result<Vec<Verdict>, SchedulerError> {
        self.rx.await.map_err(|_| SchedulerError::Stopped)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub queued: usize,
    pub workers: usize,
    pub in_flight: usize,
    pub average_load: f64,
}

struct Inner {
    config: SchedulerConfig,
    context: Arc<PipelineContext>,
    queue: Mutex<JobQueue<Job>>,
    workers: Mutex<Vec<WorkerHandle>>,
    retired: Mutex<Vec<JoinHandle<()>>>,
    balancer: LoadBalancer,
    backpressure: BackpressureController,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    next_worker_id: AtomicUsize,
    stopped: AtomicBool,
    progress: Notify,
    cancel: CancellationToken,
    scaler: Mutex<Option<JoinHandle<()>>>,
}

/// Priority queue + worker pool + load balancer + adaptive scaler +
/// backpressure controller.
///
/// Jobs submitted before `start` wait in the queue. Lock order is queue,
/// then workers.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, context: Arc<PipelineContext>) -> Self {
        let inner = Inner {
            queue: Mutex::new(JobQueue::new(config.queue_capacity.max(1))),
            balancer: LoadBalancer::new(config.strategy),
            backpressure: BackpressureController::new(config.backpressure_threshold),
            workers: Mutex::new(Vec::new()),
            retired: Mutex::new(Vec::new()),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            next_worker_id: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
            progress: Notify::new(),
            cancel: CancellationToken::new(),
            scaler: Mutex::new(None),
            config,
            context,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Spawn the initial workers and the adaptive scaler
    pub fn start(&self) {
        let config = &self.inner.config;
        let initial = config
            .initial_workers
            .clamp(config.min_workers.max(1), config.max_workers.max(1));

        for _ in 0..initial {
            self.inner.spawn_worker();
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.run_scaler().await });
        *lock(&self.inner.scaler) = Some(handle);

        info!(
            workers = initial,
            strategy = ?config.strategy,
            "Scheduler started"
        );
        self.inner.dispatch();
    }

    /// Queue a batch and try to hand it to a worker right away.
    pub fn submit(&self, batch: Batch, priority: Priority) -> Result<JobHandle, SchedulerError> {
        let inner = &self.inner;
        if inner.stopped.load(Ordering::Acquire) {
            return Err(SchedulerError::Stopped);
        }

        inner
            .backpressure
            .try_admit()
            .map_err(|load| SchedulerError::Backpressure {
                load,
                threshold: inner.backpressure.threshold(),
            })?;

        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4();
        let job = Job {
            id,
            batch,
            priority,
            submitted_at: Instant::now(),
            reply: tx,
        };

        {
            let mut queue = lock(&inner.queue);
            let capacity = queue.capacity();
            match queue.push(job, priority) {
                Ok(seq) => {
                    debug!(job_id = %id, ?priority, seq, queued = queue.len(), "Job queued");
                }
                Err(_) => {
                    inner.backpressure.release();
                    return Err(SchedulerError::QueueFull { capacity });
                }
            }
        }

        inner.submitted.fetch_add(1, Ordering::Relaxed);
        inner.dispatch();
        Ok(JobHandle { id, rx })
    }

    pub fn stats(&self) -> SchedulerStats {
        let inner = &self.inner;
        let queued = lock(&inner.queue).len();
        let workers = lock(&inner.workers).len();
        let in_flight = inner.balancer.total_load();
        SchedulerStats {
            submitted: inner.submitted.load(Ordering::Relaxed),
            completed: inner.completed.load(Ordering::Relaxed),
            failed: inner.failed.load(Ordering::Relaxed),
            rejected: inner.backpressure.rejected(),
            queued,
            workers,
            in_flight,
            average_load: inner.average_load(in_flight, queued, workers),
        }
    }

    pub fn worker_stats(&self) -> std::collections::HashMap<usize, WorkerStats> {
        self.inner.balancer.snapshot()
    }

    /// Stop accepting work, let workers drain the queue, then join them.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.stopped.store(true, Ordering::Release);
        inner.cancel.cancel();

        let scaler = lock(&inner.scaler).take();
        if let Some(handle) = scaler {
            let _ = handle.await;
        }

        loop {
            let queued = lock(&inner.queue).len();
            let workers = lock(&inner.workers).len();
            if queued == 0 || workers == 0 {
                if queued > 0 {
                    warn!(dropped = queued, "Scheduler stopped with no workers; dropping queued jobs");
                    lock(&inner.queue).drain();
                }
                break;
            }
            let _ = tokio::time::timeout(Duration::from_millis(50), inner.progress.notified()).await;
            inner.dispatch();
        }

        // Dropping the inboxes lets each worker finish what it holds and exit
        let mut tasks: Vec<JoinHandle<()>> = lock(&inner.workers).drain(..).map(|w| w.task).collect();
        tasks.append(&mut lock(&inner.retired));
        futures::future::join_all(tasks).await;

        info!(
            completed = inner.completed.load(Ordering::Relaxed),
            failed = inner.failed.load(Ordering::Relaxed),
            rejected = inner.backpressure.rejected(),
            "Scheduler stopped"
        );
    }
}

impl Inner {
    fn spawn_worker(self: &Arc<Self>) -> usize {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.worker_queue_size.max(1));
        self.balancer.register(id);

        let inner = Arc::clone(self);
        let task = tokio::spawn(async move { inner.run_worker(id, rx).await });

        lock(&self.workers).push(WorkerHandle { id, inbox: tx, task });
        debug!(worker_id = id, "Worker started");
        id
    }

    async fn run_worker(self: Arc<Self>, id: usize, mut inbox: mpsc::Receiver<Job>) {
        while let Some(job) = inbox.recv().await {
            let waited = job.submitted_at.elapsed();
            debug!(
                worker_id = id,
                job_id = %job.id,
                priority = ?job.priority,
                waited_ms = waited.as_millis() as u64,
                "Processing job"
            );

            let outcome = classify_batch(&self.context, &job.batch).await;

            self.balancer.finished(id, outcome.ok);
            self.backpressure.release();
            self.completed.fetch_add(1, Ordering::Relaxed);
            if !outcome.ok {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            // The submitter may not be waiting
            let _ = job.reply.send(outcome.verdicts);

            self.dispatch();
            self.progress.notify_waiters();
        }
        // Retired workers keep counting toward load until their inbox is drained
        self.balancer.remove(id);
        debug!(worker_id = id, "Worker stopped");
    }

    /// Move queued jobs into workers holding fewer than `worker_queue_size`
    /// jobs, highest priority first. Jobs stay in the priority queue while
    /// every worker is busy so later, more urgent jobs can overtake them.
    fn dispatch(&self) {
        let mut queue = lock(&self.queue);
        let workers = lock(&self.workers);
        let per_worker = self.config.worker_queue_size.max(1);

        while !queue.is_empty() {
            let candidates: Vec<usize> = workers
                .iter()
                .filter(|w| self.balancer.load(w.id) < per_worker)
                .map(|w| w.id)
                .collect();
            let Some(worker_id) = self.balancer.select(&candidates) else {
                break;
            };
            let Some(worker) = workers.iter().find(|w| w.id == worker_id) else {
                break;
            };
            let Some((job, priority, seq)) = queue.pop() else {
                break;
            };

            // Counted before the send so a fast worker cannot finish it first
            self.balancer.assigned(worker_id);
            match worker.inbox.try_send(job) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(job))
                | Err(mpsc::error::TrySendError::Closed(job)) => {
                    self.balancer.unassigned(worker_id);
                    queue.requeue(job, priority, seq);
                    break;
                }
            }
        }
    }

    fn average_load(&self, in_flight: usize, queued: usize, workers: usize) -> f64 {
        let capacity = workers * self.config.worker_queue_size.max(1);
        if capacity == 0 {
            return if in_flight + queued > 0 { f64::INFINITY } else { 0.0 };
        }
        (in_flight + queued) as f64 / capacity as f64
    }

    async fn run_scaler(self: Arc<Self>) {
        let mut tick = tokio::time::interval(self.config.scale_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.scale_once();
                    self.dispatch();
                }
                _ = self.cancel.cancelled() => break,
            }
        }
    }

    /// One scaler decision: add a worker, retire the least loaded one, or nothing
    fn scale_once(self: &Arc<Self>) {
        let queued = lock(&self.queue).len();
        let worker_ids: Vec<usize> = lock(&self.workers).iter().map(|w| w.id).collect();
        let in_flight = self.balancer.total_load();
        let load = self.average_load(in_flight, queued, worker_ids.len());

        if load > self.config.scale_up_threshold && worker_ids.len() < self.config.max_workers {
            let id = self.spawn_worker();
            info!(worker_id = id, workers = worker_ids.len() + 1, load, "Scaled up");
        } else if load < self.config.scale_down_threshold
            && worker_ids.len() > self.config.min_workers.max(1)
        {
            let Some(victim) = self.balancer.least_loaded(&worker_ids) else {
                return;
            };
            let removed = {
                let mut workers = lock(&self.workers);
                workers
                    .iter()
                    .position(|w| w.id == victim)
                    .map(|pos| workers.remove(pos))
            };
            if let Some(handle) = removed {
                // The inbox sender drops here; the worker drains and exits
                lock(&self.retired).push(handle.task);
                info!(worker_id = victim, workers = worker_ids.len() - 1, load, "Scaled down");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
