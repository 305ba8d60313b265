use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use log::{debug, error, info};
use tokio::sync::broadcast;

use crate::broadcast::JobProgressEvent;
use crate::error::WorkerError;
use crate::pipeline::{BroadcastProgress, NoopProgress, Pipeline, RunResult};

const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Fixed set of OS threads running jobs from a bounded queue of job ids.
///
/// The queue holds ids only; the store stays the source of truth, so a job
/// that could not be queued is still `pending` and the next sweep picks it up.
/// An id is accepted at most once until a worker takes it off the queue.
pub struct WorkerPool {
    job_sender: Sender<String>,
    queued: Arc<Mutex<HashSet<String>>>,
    result_receiver: Receiver<RunResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(
        pipeline: Arc<Pipeline>,
        worker_count: usize,
        queue_capacity: usize,
    ) -> Result<Self, WorkerError> {
        Self::with_progress_sender(pipeline, worker_count, queue_capacity, None)
    }

    /// Creates a pool whose workers publish progress on `progress_sender`.
    pub fn with_progress_sender(
        pipeline: Arc<Pipeline>,
        worker_count: usize,
        queue_capacity: usize,
        progress_sender: Option<Arc<broadcast::Sender<JobProgressEvent>>>,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }
        let (job_sender, job_receiver) = bounded::<String>(queue_capacity.max(1));
        let (result_sender, result_receiver) = unbounded::<RunResult>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let queued = Arc::new(Mutex::new(HashSet::new()));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_queued = Arc::clone(&queued);
            let worker_pipeline = Arc::clone(&pipeline);
            let sender = progress_sender.clone();

            let handle = thread::Builder::new()
                .name(format!("datamill-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        job_rx,
                        worker_queued,
                        result_tx,
                        shutdown_flag,
                        worker_pipeline,
                        sender,
                    );
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            job_sender,
            queued,
            result_receiver,
            workers,
            shutdown,
        })
    }

    /// Queues a job id without blocking. An id that is still waiting in the
    /// queue is rejected with [`WorkerError::AlreadyQueued`].
    pub fn submit(&self, job_id: &str) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        let mut queued = self.queued.lock().unwrap_or_else(PoisonError::into_inner);
        if !queued.insert(job_id.to_string()) {
            return Err(WorkerError::AlreadyQueued(job_id.to_string()));
        }
        self.job_sender
            .try_send(job_id.to_string())
            .map_err(|e| {
                queued.remove(job_id);
                match e {
                    TrySendError::Full(_) => WorkerError::QueueFull,
                    TrySendError::Disconnected(_) => WorkerError::ChannelClosed,
                }
            })
    }

    /// Number of ids waiting for a worker.
    pub fn queued_len(&self) -> usize {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn try_recv_result(&self) -> Option<RunResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result(&self) -> Option<RunResult> {
        self.result_receiver.recv().ok()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<RunResult> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Stops accepting jobs and joins every worker. A job already running
    /// finishes first; queued ids stay `pending` in the store.
    pub fn wait(self) {
        // Drop sender to signal workers to exit
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<String>,
    queued: Arc<Mutex<HashSet<String>>>,
    result_sender: Sender<RunResult>,
    shutdown: Arc<AtomicBool>,
    pipeline: Arc<Pipeline>,
    progress_sender: Option<Arc<broadcast::Sender<JobProgressEvent>>>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(RECV_TIMEOUT) {
            Ok(job_id) => {
                queued
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&job_id);
                debug!("Worker {} processing job {}", worker_id, job_id);

                let result = match progress_sender {
                    Some(ref sender) => {
                        let progress = BroadcastProgress::new(&job_id, Arc::clone(sender));
                        pipeline.run(&job_id, &progress)
                    }
                    None => pipeline.run(&job_id, &NoopProgress),
                };

                if let Err(e) = result_sender.send(result) {
                    error!("Worker {} failed to send result: {}", worker_id, e);
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
