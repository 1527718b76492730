//! Bounded pool of coloring workers.
//!
//! Jobs enter a shared FIFO queue; `N` OS threads compete for them, so at
//! most `N` jobs run concurrently and the rest wait in arrival order. Each
//! job gets a monotone id and a oneshot handle the control task awaits.
//! A brush panic inside the kernel is caught in the worker, so the job's
//! buffers still travel back with the failure outcome.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tokio::sync::oneshot;

use super::job::{run_color_job, ColorJobParams};
use crate::error::{CacheError, CacheResult};

/// Workers spawned when no explicit count is configured.
pub const DEFAULT_WORKERS: usize = 5;

/// Configuration for the color worker pool
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads; bounds job concurrency.
    pub workers: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
        }
    }
}

/// Monotone job identifier; responses route back over the job's own channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub u64);

/// A finished job: the params (buffers returned) plus how the kernel fared.
#[derive(Debug)]
pub struct ColorJobResponse {
    pub id: JobId,
    pub params: ColorJobParams,
    pub outcome: CacheResult<()>,
}

struct PoolRequest {
    id: JobId,
    params: ColorJobParams,
    reply: oneshot::Sender<ColorJobResponse>,
}

/// Handle for a dispatched coloring job
pub struct ColorJobHandle {
    id: JobId,
    receiver: oneshot::Receiver<ColorJobResponse>,
}

impl ColorJobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Wait for the job to complete and get the response back.
    ///
    /// Errors only when the worker thread died outright; a kernel failure
    /// comes back as a response whose `outcome` is the error, buffers intact.
    pub async fn wait(self) -> CacheResult<ColorJobResponse> {
        self.receiver
            .await
            .map_err(|_| CacheError::worker("worker dropped the job"))
    }

    /// Try to get the response if available (non-blocking)
    pub fn try_get(&mut self) -> CacheResult<Option<ColorJobResponse>> {
        match self.receiver.try_recv() {
            Ok(response) => Ok(Some(response)),
            Err(oneshot::error::TryRecvError::Empty) => Ok(None),
            Err(oneshot::error::TryRecvError::Closed) => {
                Err(CacheError::worker("worker dropped the job"))
            }
        }
    }
}

/// Bounded coloring worker pool.
pub struct ColorWorkerPool {
    sender: Option<Sender<PoolRequest>>,
    workers: Vec<JoinHandle<()>>,
    next_job_id: AtomicU64,
}

impl ColorWorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        let (sender, receiver) = unbounded::<PoolRequest>();
        let workers = (0..config.workers.max(1))
            .map(|i| {
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("color-worker-{}", i))
                    .spawn(move || worker_loop(receiver))
                    .expect("spawn color worker thread")
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
            next_job_id: AtomicU64::new(0),
        }
    }

    /// Queue a coloring job; the caller must not touch the moved buffers
    /// until the handle resolves with their return.
    pub fn push(&self, params: ColorJobParams) -> ColorJobHandle {
        let id = JobId(self.next_job_id.fetch_add(1, Ordering::Relaxed));
        let (reply, receiver) = oneshot::channel();
        let request = PoolRequest { id, params, reply };
        if let Some(sender) = &self.sender {
            // A send failure means every worker is gone; the dropped reply
            // sender resolves the handle as WorkerFailed.
            let _ = sender.send(request);
        }
        ColorJobHandle { id, receiver }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ColorWorkerPool {
    fn drop(&mut self) {
        // Disconnect the queue so workers drain and exit.
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(receiver: Receiver<PoolRequest>) {
    while let Ok(request) = receiver.recv() {
        let PoolRequest { id, mut params, reply } = request;
        let outcome = catch_unwind(AssertUnwindSafe(|| run_color_job(&mut params)))
            .unwrap_or_else(|payload| Err(CacheError::worker(panic_message(payload))));
        if let Err(err) = &outcome {
            log::warn!("color job {:?} failed: {}", id, err);
        }
        let _ = reply.send(ColorJobResponse {
            id,
            params,
            outcome,
        });
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "worker panicked".to_string()
    }
}
