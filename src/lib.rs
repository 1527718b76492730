//! cloudbrush: point buffer cache and brush coloring pipeline.
//!
//! This crate sits between a streaming point-cloud viewer's tile loader and
//! its renderer. The loader pushes decoded octree tiles in; the cache colors
//! them through a pluggable brush pipeline on a bounded worker pool, keeps
//! running per-field histograms across everything ingested, and re-paints
//! already-cached tiles whenever new data invalidates the parameters their
//! colors were computed from. Fetching, GPU upload, and camera/UI concerns
//! stay outside, behind the `DownloadedTile` input record and the render
//! request callback.

pub mod bounds;
pub mod brush;
pub mod cache;
pub mod color;
pub mod error;
pub mod path;
pub mod schema;
pub mod stats;
pub mod worker;

pub use bounds::{GeoTransform, RenderBounds};
pub use brush::{
    Brush, BrushFactory, BrushSlots, BrushUri, BufferParams, NodeSelection,
    NodeSelectionStrategy, RampConfiguration, RampSelector, Staging, TransferDirection,
};
pub use cache::{
    CacheConfig, CacheSnapshot, DownloadedTile, PointBufferCache, PushReceipt, RenderRequest,
    Tile,
};
pub use color::{compress_color, decompress_color};
pub use error::{CacheError, CacheResult};
pub use path::TilePath;
pub use schema::{FieldType, Schema, SchemaField};
pub use stats::{accumulate, BufferStats, Histogram, BUCKET_WIDTH};
pub use worker::{ColorJobHandle, ColorWorkerPool, JobId, WorkerPoolConfig};
