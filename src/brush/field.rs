//! Categorical field brush.
//!
//! Maps an integer-coded field (LAS classification by default) onto a fixed
//! palette. Query parameters with numeric keys override palette entries,
//! e.g. `local://field-color?field=classification&6=%23cc3333`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::uri::BrushUri;
use super::{Brush, BufferParams, NodeSelection, Staging};
use crate::error::CacheResult;

/// Default colors for the common LAS classification codes.
const DEFAULT_PALETTE: &[(u32, [u8; 3])] = &[
    (0, [160, 160, 160]),  // unclassified
    (1, [190, 190, 190]),  // undetermined
    (2, [150, 110, 70]),   // ground
    (3, [130, 190, 100]),  // low vegetation
    (4, [90, 170, 80]),    // medium vegetation
    (5, [50, 140, 60]),    // high vegetation
    (6, [210, 90, 70]),    // buildings
    (7, [230, 60, 160]),   // low noise
    (8, [240, 200, 90]),   // street furniture / keypoints
    (9, [70, 130, 220]),   // water
    (11, [110, 110, 130]), // road surface
    (15, [220, 150, 40]),  // vehicles
];

const UNKNOWN_CLASS: [u8; 3] = [128, 128, 128];

#[derive(Debug, Serialize, Deserialize)]
struct FieldColorState {
    field: String,
    palette: BTreeMap<u32, [u8; 3]>,
    field_index: Option<usize>,
}

/// Categorical field → palette color.
#[derive(Debug)]
pub struct FieldColorBrush {
    uri: BrushUri,
    field: String,
    palette: BTreeMap<u32, [u8; 3]>,
    field_index: Option<usize>,
}

impl FieldColorBrush {
    pub fn from_uri(uri: BrushUri) -> CacheResult<Self> {
        let field = uri
            .param("field")
            .unwrap_or("classification")
            .to_string();
        let mut palette: BTreeMap<u32, [u8; 3]> = DEFAULT_PALETTE.iter().copied().collect();
        for key in uri.params.keys() {
            if let Ok(class) = key.parse::<u32>() {
                if let Some(color) = uri.color_param(key)? {
                    palette.insert(class, color);
                }
            }
        }
        Ok(Self {
            uri,
            field,
            palette,
            field_index: None,
        })
    }
}

impl Brush for FieldColorBrush {
    fn uri(&self) -> &BrushUri {
        &self.uri
    }

    fn required_schema_fields(&self) -> Vec<String> {
        vec![self.field.clone()]
    }

    fn serialize(&self) -> CacheResult<serde_json::Value> {
        Ok(serde_json::to_value(FieldColorState {
            field: self.field.clone(),
            palette: self.palette.clone(),
            field_index: self.field_index,
        })?)
    }

    fn deserialize(&mut self, payload: serde_json::Value) -> CacheResult<()> {
        let state: FieldColorState = serde_json::from_value(payload)?;
        self.field = state.field;
        self.palette = state.palette;
        self.field_index = state.field_index;
        Ok(())
    }

    fn prepare(
        &mut self,
        params: &BufferParams<'_>,
        _parent_staging: Option<&Staging>,
        _children_staging: &[Staging],
    ) -> CacheResult<()> {
        self.field_index = Some(params.schema.require(&self.field)?);
        Ok(())
    }

    fn staging_attributes(&self, _params: &BufferParams<'_>) -> Staging {
        // The palette is fixed per brush config; nothing drifts.
        serde_json::json!({ "field": self.field })
    }

    fn node_selection_strategy(&self, _params: &BufferParams<'_>) -> NodeSelection {
        NodeSelection::none()
    }

    fn buffer_needs_recolor(
        &self,
        _params: &BufferParams<'_>,
        _strategy_params: &serde_json::Value,
        _other_staging: &Staging,
    ) -> bool {
        false
    }

    fn color_point(&self, color: &mut [u8; 3], point: &[f32]) {
        let Some(idx) = self.field_index else {
            *color = UNKNOWN_CLASS;
            return;
        };
        let class = point[idx] as u32;
        *color = self.palette.get(&class).copied().unwrap_or(UNKNOWN_CLASS);
    }

    fn unprepare(&mut self) {
        self.field_index = None;
    }
}
