//! Coloring job payloads and the in-worker kernel.
//!
//! A job carries everything a worker needs by value: the serialized brush
//! vector (with moved storages), the immutable input records, and the output
//! buffer to fill. The kernel reconstructs the brushes, walks points in
//! fixed batches, and packs each brush's RGB triple into one output float.

use std::mem;

use crate::brush::{
    begin_transfer_for_brushes, brushes_from_transfer, BrushesTransfer, TransferDirection,
};
use crate::color::compress_color;
use crate::error::{CacheError, CacheResult};
use crate::schema::Schema;

/// Points colored per kernel batch.
pub const COLOR_BATCH_SIZE: usize = 10_000;

/// Everything one coloring job moves into (and back out of) a worker.
#[derive(Debug)]
pub struct ColorJobParams {
    /// Slot-aligned brush package; storages are moved, not copied.
    pub brushes: BrushesTransfer,
    pub total_points: u32,
    pub input_buffer: Vec<f32>,
    pub schema: Schema,
    pub output_buffer: Vec<f32>,
    pub output_point_size: usize,
}

/// Fill `output_buffer` with `x,y,z,c0..ck` records.
///
/// Mutates the params in place so the caller gets its buffers back through
/// the same value whether the kernel succeeded or not.
pub fn run_color_job(params: &mut ColorJobParams) -> CacheResult<()> {
    let total = params.total_points as usize;
    params
        .schema
        .validate_buffer(&params.input_buffer, params.total_points)?;
    if params.output_buffer.len() != total * params.output_point_size {
        return Err(CacheError::worker(format!(
            "output buffer holds {} floats, expected {}",
            params.output_buffer.len(),
            total * params.output_point_size
        )));
    }

    let x = params.schema.require("x")?;
    let y = params.schema.require("y")?;
    let z = params.schema.require("z")?;

    let package = mem::replace(&mut params.brushes, BrushesTransfer { slots: Vec::new() });
    let mut brushes = brushes_from_transfer(package, TransferDirection::MainToWorker)?;

    let point_size = params.schema.point_size();
    let out_size = params.output_point_size;
    let mut color = [0u8; 3];

    for batch_start in (0..total).step_by(COLOR_BATCH_SIZE) {
        let batch_end = (batch_start + COLOR_BATCH_SIZE).min(total);
        for i in batch_start..batch_end {
            let point = &params.input_buffer[i * point_size..(i + 1) * point_size];
            let out = &mut params.output_buffer[i * out_size..(i + 1) * out_size];
            out[0] = point[x];
            out[1] = point[y];
            out[2] = point[z];
            for (slot, brush) in brushes.iter().enumerate() {
                if let Some(brush) = brush {
                    brush.color_point(&mut color, point);
                    out[3 + slot] = compress_color(color);
                }
            }
        }
    }

    // Send the brush storages back the way they came.
    params.brushes = begin_transfer_for_brushes(&mut brushes, TransferDirection::WorkerToMain)?;
    Ok(())
}
