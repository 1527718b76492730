//! Coloring worker pool and job payloads.

mod job;
mod pool;

pub use job::{run_color_job, ColorJobParams, COLOR_BATCH_SIZE};
pub use pool::{
    ColorJobHandle, ColorJobResponse, ColorWorkerPool, JobId, WorkerPoolConfig, DEFAULT_WORKERS,
};
