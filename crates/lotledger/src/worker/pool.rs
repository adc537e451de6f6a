use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};

use crate::error::{LedgerError, WorkerError};
use crate::orchestrator::Orchestrator;
use crate::worker::job::{JobOptions, JobStatusReport, SourceRef};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of one job run by a worker.
#[derive(Debug)]
pub struct WorkerResult {
    pub job_id: String,
    pub outcome: Result<JobStatusReport, LedgerError>,
}

pub struct WorkerPool {
    orchestrator: Arc<Orchestrator>,
    result_receiver: Receiver<WorkerResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    draining: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `worker_count` threads pulling job ids from the orchestrator's
    /// queue.
    pub fn new(orchestrator: Arc<Orchestrator>, worker_count: usize) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }

        let (result_sender, result_receiver) = bounded::<WorkerResult>(worker_count * 2);
        let shutdown = Arc::new(AtomicBool::new(false));
        let draining = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let draining_flag = Arc::clone(&draining);
            let worker_orchestrator = Arc::clone(&orchestrator);

            let handle = thread::Builder::new()
                .name(format!("ledger-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        worker_orchestrator,
                        result_tx,
                        shutdown_flag,
                        draining_flag,
                    );
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            orchestrator,
            result_receiver,
            workers,
            shutdown,
            draining,
        })
    }

    /// Enqueues a job for the workers and returns its id.
    pub fn submit(&self, source: SourceRef, options: JobOptions) -> Result<String, LedgerError> {
        if self.is_shutdown() {
            return Err(WorkerError::ChannelClosed.into());
        }
        self.orchestrator.enqueue(source, options)
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn try_recv_result(&self) -> Option<WorkerResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<WorkerResult> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    /// Stops workers after their current job; queued jobs stay pending.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Lets workers finish the queue, then joins them.
    pub fn wait(self) {
        self.draining.store(true, Ordering::Relaxed);
        // Unblocks workers stuck sending results nobody will read
        drop(self.result_receiver);

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
}

fn run_worker(
    worker_id: usize,
    orchestrator: Arc<Orchestrator>,
    result_sender: Sender<WorkerResult>,
    shutdown: Arc<AtomicBool>,
    draining: Arc<AtomicBool>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        let Some(job_id) = orchestrator.next_job(POLL_INTERVAL) else {
            if draining.load(Ordering::Relaxed) {
                break;
            }
            continue;
        };

        debug!("Worker {} processing job {}", worker_id, job_id);
        let outcome = orchestrator.run_job(&job_id);
        if let Err(e) = &outcome {
            error!("Worker {} could not run job {}: {}", worker_id, job_id, e);
        }

        if result_sender.send(WorkerResult { job_id, outcome }).is_err() {
            debug!("Worker {} result channel closed", worker_id);
            if !draining.load(Ordering::Relaxed) {
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
