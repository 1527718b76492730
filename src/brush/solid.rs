//! Direct RGB color brush.
//!
//! Reads `red`/`green`/`blue` fields straight off the record. Sources ship
//! either 8-bit or 16-bit channels; the running histogram decides which, and
//! 16-bit values are narrowed with a `>> 8`-equivalent scale.

use serde::{Deserialize, Serialize};

use super::uri::BrushUri;
use super::{Brush, BufferParams, NodeSelection, NodeSelectionStrategy, Staging};
use crate::error::CacheResult;
use crate::stats::BUCKET_WIDTH;

const CHANNELS: [&str; 3] = ["red", "green", "blue"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PreparedColor {
    indices: [usize; 3],
    sixteen_bit: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ColorState {
    prepared: Option<PreparedColor>,
}

/// Per-point RGB fields → color, with 8/16-bit range auto-detection.
#[derive(Debug)]
pub struct ColorBrush {
    uri: BrushUri,
    prepared: Option<PreparedColor>,
}

impl ColorBrush {
    pub fn from_uri(uri: BrushUri) -> CacheResult<Self> {
        Ok(Self {
            uri,
            prepared: None,
        })
    }

    fn staging_value(&self) -> Staging {
        let sixteen_bit = self.prepared.as_ref().map(|p| p.sixteen_bit);
        serde_json::json!({ "sixteenBit": sixteen_bit })
    }
}

impl Brush for ColorBrush {
    fn uri(&self) -> &BrushUri {
        &self.uri
    }

    fn required_schema_fields(&self) -> Vec<String> {
        CHANNELS.iter().map(|c| c.to_string()).collect()
    }

    fn serialize(&self) -> CacheResult<serde_json::Value> {
        Ok(serde_json::to_value(ColorState {
            prepared: self.prepared.clone(),
        })?)
    }

    fn deserialize(&mut self, payload: serde_json::Value) -> CacheResult<()> {
        let state: ColorState = serde_json::from_value(payload)?;
        self.prepared = state.prepared;
        Ok(())
    }

    fn prepare(
        &mut self,
        params: &BufferParams<'_>,
        _parent_staging: Option<&Staging>,
        _children_staging: &[Staging],
    ) -> CacheResult<()> {
        let indices = [
            params.schema.require(CHANNELS[0])?,
            params.schema.require(CHANNELS[1])?,
            params.schema.require(CHANNELS[2])?,
        ];
        // A channel whose observed max clears the last 8-bit bucket marks the
        // whole source as 16-bit.
        let eight_bit_ceiling = u8::MAX as f64 + BUCKET_WIDTH as f64;
        let sixteen_bit = CHANNELS.iter().any(|c| {
            params
                .stats
                .range(c)
                .map(|(_, max)| max > eight_bit_ceiling)
                .unwrap_or(false)
        });
        self.prepared = Some(PreparedColor {
            indices,
            sixteen_bit,
        });
        Ok(())
    }

    fn staging_attributes(&self, _params: &BufferParams<'_>) -> Staging {
        self.staging_value()
    }

    fn node_selection_strategy(&self, _params: &BufferParams<'_>) -> NodeSelection {
        // A later tile can flip the 8/16-bit detection for the whole cloud.
        NodeSelection {
            strategy: NodeSelectionStrategy::All,
            params: self.staging_value(),
        }
    }

    fn buffer_needs_recolor(
        &self,
        _params: &BufferParams<'_>,
        strategy_params: &serde_json::Value,
        other_staging: &Staging,
    ) -> bool {
        other_staging != strategy_params
    }

    fn color_point(&self, color: &mut [u8; 3], point: &[f32]) {
        let Some(p) = &self.prepared else {
            *color = [0, 0, 0];
            return;
        };
        let scale = if p.sixteen_bit { 1.0 / 256.0 } else { 1.0 };
        for (c, &idx) in color.iter_mut().zip(p.indices.iter()) {
            *c = (point[idx] as f64 * scale).clamp(0.0, 255.0) as u8;
        }
    }

    fn unprepare(&mut self) {
        self.prepared = None;
    }
}
