//! Pluggable per-point coloring ("brushes").
//!
//! A brush turns one decoded point record into an RGB triple. Around that
//! core it carries a per-tile lifecycle: `prepare` derives color parameters
//! from the running histogram totals and neighboring tiles, `color_point`
//! runs inside a worker over every point, `unprepare` drops the per-run
//! state. The staging snapshot a brush leaves on a tile is what later tells
//! the cache that newly arrived data has drifted the tile's colors.

mod factory;
mod field;
mod imagery;
mod ramp;
mod solid;
mod uri;

pub use factory::{
    begin_transfer_for_brushes, brushes_from_transfer, deserialize_brushes,
    end_transfer_onto_brushes, serialize_brushes, BrushCtor, BrushFactory, BrushesTransfer,
    SerializedBrush, SlotTransfer,
};
pub use field::FieldColorBrush;
pub use imagery::{ImageryBrush, ImageryTexture};
pub use ramp::RampBrush;
pub use solid::ColorBrush;
pub use uri::{parse_hex_color, BrushUri};

use serde::{Deserialize, Serialize};

use crate::bounds::{GeoTransform, RenderBounds};
use crate::error::CacheResult;
use crate::schema::Schema;
use crate::stats::BufferStats;

/// Opaque per-tile snapshot a brush leaves behind after `prepare`.
/// Compared by value to detect parameter drift.
pub type Staging = serde_json::Value;

/// Backing storage moved (not copied) across the worker boundary.
pub type TransferBuffer = Vec<u8>;

/// Which way a transfer is headed. Stock brushes treat both directions the
/// same; the parameter stays for brushes with asymmetric packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    MainToWorker,
    WorkerToMain,
}

/// Which already-cached tiles a fresh insert may have invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeSelectionStrategy {
    /// This brush's parameters are tile-local; nothing else is affected.
    None,
    /// Only the ancestor chain of the inserted tile is affected.
    Ancestors,
    /// Every other cached tile is a candidate.
    All,
}

/// Strategy plus the opaque parameters `buffer_needs_recolor` compares against.
#[derive(Debug, Clone)]
pub struct NodeSelection {
    pub strategy: NodeSelectionStrategy,
    pub params: serde_json::Value,
}

impl NodeSelection {
    pub fn none() -> Self {
        Self {
            strategy: NodeSelectionStrategy::None,
            params: serde_json::Value::Null,
        }
    }
}

/// GPU color-ramp uniform a brush contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampSelector {
    None,
    ZRange,
    IntensityRange,
}

/// Ramp uniform selection with its endpoint colors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampConfiguration {
    pub selector: RampSelector,
    pub start: [u8; 3],
    pub end: [u8; 3],
}

impl RampConfiguration {
    pub fn none() -> Self {
        Self {
            selector: RampSelector::None,
            start: [0; 3],
            end: [255; 3],
        }
    }
}

/// Per-tile inputs a brush prepares against.
#[derive(Debug, Clone, Copy)]
pub struct BufferParams<'a> {
    pub schema: &'a Schema,
    /// Running pipeline-wide histogram totals, already including the tile
    /// being prepared.
    pub stats: &'a BufferStats,
    pub bounds: &'a RenderBounds,
    pub geo: &'a GeoTransform,
    pub total_points: u32,
}

/// Cross-thread packaging of one brush: value params plus moved storages.
#[derive(Debug)]
pub struct BrushTransfer {
    pub params: serde_json::Value,
    pub transfer: Vec<TransferBuffer>,
}

/// The brush contract.
///
/// `prepare`/`unprepare` bracket every coloring run. `serialize` must
/// capture prepared state by value so a worker-side `deserialize` yields a
/// brush that colors identically without re-preparing.
pub trait Brush: Send {
    fn uri(&self) -> &BrushUri;

    /// Field names this brush needs in the tile's schema to be usable.
    fn required_schema_fields(&self) -> Vec<String>;

    fn serialize(&self) -> CacheResult<serde_json::Value>;

    fn deserialize(&mut self, payload: serde_json::Value) -> CacheResult<()>;

    /// Package for a worker hop. The default covers brushes whose whole
    /// state is value-like: params are the serialized form, no storages move.
    fn begin_transfer(&mut self, _direction: TransferDirection) -> CacheResult<BrushTransfer> {
        Ok(BrushTransfer {
            params: self.serialize()?,
            transfer: Vec::new(),
        })
    }

    /// Adopt params (and returned storages) after a transfer.
    fn end_transfer(
        &mut self,
        _direction: TransferDirection,
        params: serde_json::Value,
        _buffers: Vec<TransferBuffer>,
    ) -> CacheResult<()> {
        self.deserialize(params)
    }

    /// Compute per-tile coloring parameters from the running totals, the
    /// parent's staging for this slot, and the present children's staging.
    fn prepare(
        &mut self,
        params: &BufferParams<'_>,
        parent_staging: Option<&Staging>,
        children_staging: &[Staging],
    ) -> CacheResult<()>;

    /// Snapshot of prepare-computed state retained on the tile; compared by
    /// value when a later insert probes for drift.
    fn staging_attributes(&self, params: &BufferParams<'_>) -> Staging;

    /// Declare which other tiles this insert may invalidate.
    fn node_selection_strategy(&self, params: &BufferParams<'_>) -> NodeSelection;

    /// Does `other_staging` (a cached tile's snapshot) disagree with the
    /// parameters this insert was prepared with?
    fn buffer_needs_recolor(
        &self,
        params: &BufferParams<'_>,
        strategy_params: &serde_json::Value,
        other_staging: &Staging,
    ) -> bool;

    /// Write an RGB triple for one decoded point record.
    fn color_point(&self, color: &mut [u8; 3], point: &[f32]);

    /// Release per-run state; always paired with `prepare`.
    fn unprepare(&mut self);

    fn ramp_configuration(&self) -> RampConfiguration {
        RampConfiguration::none()
    }
}

/// Brush slots as carried by a push: fixed arity, `None` is a no-op slot.
pub type BrushSlots = Vec<Option<Box<dyn Brush>>>;
