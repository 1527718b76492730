//! Scalar-field ramp brush.
//!
//! Contours a scalar field (elevation or intensity) against the running
//! pipeline-wide range and lerps between two endpoint colors. The contour
//! math: `scalef = 255 / (step × (max − min))`, per point
//! `h = floor(scalef × (v − min)) × step`, then `h/255` picks along the
//! start→end ramp. With a black→white ramp the output is the gray `(h,h,h)`.

use serde::{Deserialize, Serialize};

use super::uri::BrushUri;
use super::{
    Brush, BufferParams, NodeSelection, NodeSelectionStrategy, RampConfiguration, RampSelector,
    Staging,
};
use crate::error::{CacheError, CacheResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PreparedRamp {
    min: f64,
    max: f64,
    scalef: f64,
    field_index: usize,
    /// Set when the observed range is empty; the brush paints black and
    /// stops invalidating neighbors.
    no_color: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct RampState {
    field: String,
    step: f64,
    start: [u8; 3],
    end: [u8; 3],
    prepared: Option<PreparedRamp>,
}

/// Scalar field → color ramp.
#[derive(Debug)]
pub struct RampBrush {
    uri: BrushUri,
    field: String,
    step: f64,
    start: [u8; 3],
    end: [u8; 3],
    prepared: Option<PreparedRamp>,
}

impl RampBrush {
    pub fn from_uri(uri: BrushUri) -> CacheResult<Self> {
        let field = uri.param("field").unwrap_or("z").to_string();
        let step = match uri.param("step") {
            None => 1.0,
            Some(raw) => {
                let step: i64 = raw
                    .parse()
                    .map_err(|_| CacheError::invalid_uri(uri.prefix(), "step must be an integer"))?;
                if step < 0 {
                    return Err(CacheError::invalid_uri(uri.prefix(), "step must be >= 0"));
                }
                // A zero step means "no contouring", which is a step of one.
                step.max(1) as f64
            }
        };
        let start = uri.color_param("start")?.unwrap_or([0, 0, 0]);
        let end = uri.color_param("end")?.unwrap_or([255, 255, 255]);

        Ok(Self {
            uri,
            field,
            step,
            start,
            end,
            prepared: None,
        })
    }

    fn staging_value(&self) -> Staging {
        match &self.prepared {
            Some(p) if !p.no_color => serde_json::json!({
                "field": self.field,
                "min": p.min,
                "max": p.max,
            }),
            _ => serde_json::json!({
                "field": self.field,
                "min": null,
                "max": null,
            }),
        }
    }
}

impl Brush for RampBrush {
    fn uri(&self) -> &BrushUri {
        &self.uri
    }

    fn required_schema_fields(&self) -> Vec<String> {
        vec![self.field.clone()]
    }

    fn serialize(&self) -> CacheResult<serde_json::Value> {
        Ok(serde_json::to_value(RampState {
            field: self.field.clone(),
            step: self.step,
            start: self.start,
            end: self.end,
            prepared: self.prepared.clone(),
        })?)
    }

    fn deserialize(&mut self, payload: serde_json::Value) -> CacheResult<()> {
        let state: RampState = serde_json::from_value(payload)?;
        self.field = state.field;
        self.step = state.step;
        self.start = state.start;
        self.end = state.end;
        self.prepared = state.prepared;
        Ok(())
    }

    fn prepare(
        &mut self,
        params: &BufferParams<'_>,
        _parent_staging: Option<&Staging>,
        _children_staging: &[Staging],
    ) -> CacheResult<()> {
        let field_index = params.schema.require(&self.field)?;
        let range = params.stats.range(&self.field);
        self.prepared = Some(match range {
            Some((min, max)) if min < max => PreparedRamp {
                min,
                max,
                scalef: 255.0 / (self.step * (max - min)),
                field_index,
                no_color: false,
            },
            _ => PreparedRamp {
                min: 0.0,
                max: 0.0,
                scalef: 0.0,
                field_index,
                no_color: true,
            },
        });
        Ok(())
    }

    fn staging_attributes(&self, _params: &BufferParams<'_>) -> Staging {
        self.staging_value()
    }

    fn node_selection_strategy(&self, _params: &BufferParams<'_>) -> NodeSelection {
        match &self.prepared {
            Some(p) if !p.no_color => NodeSelection {
                strategy: NodeSelectionStrategy::All,
                params: self.staging_value(),
            },
            _ => NodeSelection::none(),
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
        if p.no_color {
            *color = [0, 0, 0];
            return;
        }
        let v = point[p.field_index] as f64;
        let h = ((p.scalef * (v - p.min)).floor() * self.step).clamp(0.0, 255.0);
        let t = h / 255.0;
        for (i, c) in color.iter_mut().enumerate() {
            let lo = self.start[i] as f64;
            let hi = self.end[i] as f64;
            *c = (lo + (hi - lo) * t).round() as u8;
        }
    }

    fn unprepare(&mut self) {
        self.prepared = None;
    }

    fn ramp_configuration(&self) -> RampConfiguration {
        let selector = match self.field.as_str() {
            "z" => RampSelector::ZRange,
            "intensity" => RampSelector::IntensityRange,
            _ => RampSelector::None,
        };
        RampConfiguration {
            selector,
            start: self.start,
            end: self.end,
        }
    }
}
