use crate::errors::{AgentError, Result};
use crate::executor::JobExecutor;
use crate::sentry_init;
use crate::transport::DeviceTarget;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A raster print request, immutable once queued and consumed exactly once.
#[derive(Debug, Clone)]
pub struct PrintJob {
    pub id: Uuid,
    pub raster_base64: String,
    pub width: u32,
    pub height: u32,
    pub target: DeviceTarget,
    pub cash_drawer: bool,
    pub submitted_at: DateTime<Utc>,
}

impl PrintJob {
    pub fn new(
        raster_base64: String,
        width: u32,
        height: u32,
        target: DeviceTarget,
        cash_drawer: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            raster_base64,
            width,
            height,
            target,
            cash_drawer,
            submitted_at: Utc::now(),
        }
    }

    /// Time since the job was accepted, clamped at zero.
    pub fn queued_for(&self) -> std::time::Duration {
        (Utc::now() - self.submitted_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// What travels through the queue: a job, or the shutdown sentinel.
#[derive(Debug)]
pub enum QueueMessage {
    Job(PrintJob),
    Shutdown,
}

/// Lifetime counters for the worker (no per-job history is kept)
#[derive(Debug, Default)]
struct WorkerCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Producer side of the print queue; cheap to clone into HTTP handlers.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::UnboundedSender<QueueMessage>,
    counters: Arc<WorkerCounters>,
}

impl JobQueue {
    /// Enqueue a job without waiting for the device.
    pub fn submit(&self, job: PrintJob) -> Result<Uuid> {
        let id = job.id;
        self.sender
            .send(QueueMessage::Job(job))
            .map_err(|_| AgentError::QueueClosed)?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        debug!("Print job {} queued", id);
        Ok(id)
    }

    /// Push the shutdown sentinel. Jobs queued after it are never run.
    pub fn request_shutdown(&self) -> Result<()> {
        self.sender
            .send(QueueMessage::Shutdown)
            .map_err(|_| AgentError::QueueClosed)
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

/// Handle to the single consumer thread.
pub struct PrintWorker {
    queue: JobQueue,
    handle: Option<JoinHandle<()>>,
}

impl PrintWorker {
    /// Spawn the worker thread and return the producer handle alongside it.
    pub fn start(executor: Arc<dyn JobExecutor>) -> Result<(JobQueue, PrintWorker)> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(WorkerCounters::default());
        let queue = JobQueue {
            sender,
            counters: counters.clone(),
        };

        let handle = std::thread::Builder::new()
            .name("print-worker".to_string())
            .spawn(move || run_worker(receiver, executor, counters))
            .map_err(|e| AgentError::Other(anyhow::anyhow!("Failed to spawn print worker: {}", e)))?;

        let worker = PrintWorker {
            queue: queue.clone(),
            handle: Some(handle),
        };
        Ok((queue, worker))
    }

    /// Wait for the worker to exit (after the sentinel has been queued).
    pub fn join(mut self) {
        self.join_inner();
    }

    /// Queue the sentinel and wait. Blocks while a job is mid-execution.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if self.handle.is_none() {
            return;
        }
        info!("Stopping print worker");
        if self.queue.request_shutdown().is_err() {
            debug!("Print worker already stopped");
        }
        self.join_inner();
    }

    fn join_inner(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Print worker thread panicked");
            }
        }
    }
}

impl Drop for PrintWorker {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<QueueMessage>,
    executor: Arc<dyn JobExecutor>,
    counters: Arc<WorkerCounters>,
) {
    info!("Print worker started");

    while let Some(message) = receiver.blocking_recv() {
        let job = match message {
            QueueMessage::Job(job) => job,
            QueueMessage::Shutdown => {
                info!("Shutdown sentinel received");
                break;
            }
        };

        let started = Instant::now();
        info!(
            "Processing print job {} for {} (waited {}ms)",
            job.id,
            job.target,
            job.queued_for().as_millis()
        );

        // A panicking job must not take the worker down with it.
        match panic::catch_unwind(AssertUnwindSafe(|| executor.execute(&job))) {
            Ok(Ok(())) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
                debug!("Job {} finished in {:?}", job.id, started.elapsed());
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                error!("Print job {} failed: {}", job.id, e);
                sentry_init::capture_print_job_failure(
                    &job.id.to_string(),
                    &job.target.to_string(),
                    &e.to_string(),
                );
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                error!("Print job {} panicked", job.id);
            }
        }
    }

    receiver.close();
    let mut discarded = 0;
    while let Ok(message) = receiver.try_recv() {
        if let QueueMessage::Job(job) = message {
            debug!("Discarding job {} queued after shutdown", job.id);
            discarded += 1;
        }
    }
    if discarded > 0 {
        warn!("{} print job(s) discarded at shutdown", discarded);
    }

    info!("Print worker stopped");
}
