//! Cached tile records and the loader-facing push payload.

use crate::bounds::{GeoTransform, RenderBounds};
use crate::brush::Staging;
use crate::path::TilePath;
use crate::schema::Schema;
use crate::stats::BufferStats;

/// One decoded tile as delivered by the network/LAZ loader.
#[derive(Debug)]
pub struct DownloadedTile {
    /// Point-interleaved records, one f32 per schema field.
    pub data: Vec<f32>,
    pub total_points: u32,
    pub schema: Schema,
    pub tree_path: TilePath,
    pub render_space_bounds: RenderBounds,
    /// Histogram for this tile only.
    pub buffer_stats: BufferStats,
    pub geo_transform: GeoTransform,
}

/// A cached octree node.
#[derive(Debug)]
pub struct Tile {
    pub path: TilePath,
    /// Raw decoded records; immutable after insert.
    pub input_buffer: Vec<f32>,
    pub schema: Schema,
    pub buffer_stats: BufferStats,
    pub render_space_bounds: RenderBounds,
    pub total_points: u32,
    /// `x,y,z,c0..c{k-1}` per point, colors packed.
    pub output_buffer: Vec<f32>,
    pub output_point_size: usize,
    /// One snapshot per brush slot, exactly `num_brushes` entries.
    pub staging_attributes: Vec<Staging>,
    /// Set after a recolor; the renderer's only safe read signal.
    pub update: bool,
    /// Cleared when a worker failure left the output zero-filled, so the
    /// renderer can show the tile uncolored instead of hiding it.
    pub colored: bool,
    pub geo_transform: GeoTransform,
}

impl Tile {
    pub fn num_brushes(&self) -> usize {
        self.output_point_size - 3
    }

    pub fn staging_for(&self, slot: usize) -> Option<&Staging> {
        self.staging_attributes.get(slot)
    }
}

/// What `push` hands back to the loader. The initial upload is the caller's,
/// so `update` is always false here.
#[derive(Debug, Clone)]
pub struct PushReceipt {
    pub path: TilePath,
    pub update: bool,
    pub total_points: u32,
    pub output_point_size: usize,
    /// Whether the initial coloring succeeded; false means the output is
    /// zero-filled and should render uncolored.
    pub colored: bool,
}
