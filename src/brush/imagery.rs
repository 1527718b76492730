//! Imagery overlay brush.
//!
//! Samples an RGBA8 texture by the point's geo position within the cloud's
//! full extent. The texture bytes are the one brush-owned storage that rides
//! the transfer list instead of the params copy, so a worker hop moves them
//! without duplicating megabytes of pixels.

use serde::{Deserialize, Serialize};

use super::uri::BrushUri;
use super::{
    Brush, BrushTransfer, BufferParams, NodeSelection, Staging, TransferBuffer, TransferDirection,
};
use crate::error::{CacheError, CacheResult};

/// Decoded RGBA8 texture.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageryTexture {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl ImageryTexture {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> CacheResult<Self> {
        if pixels.len() != (width * height * 4) as usize {
            return Err(CacheError::worker(format!(
                "imagery texture {}x{} needs {} bytes, got {}",
                width,
                height,
                width * height * 4,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    fn sample(&self, nx: f64, ny: f64) -> [u8; 3] {
        let tx = ((nx * self.width as f64) as u32).min(self.width - 1);
        let ty = ((ny * self.height as f64) as u32).min(self.height - 1);
        let base = ((ty * self.width + tx) * 4) as usize;
        [
            self.pixels[base],
            self.pixels[base + 1],
            self.pixels[base + 2],
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PreparedImagery {
    x_index: usize,
    y_index: usize,
    scale: [f64; 2],
    offset: [f64; 2],
    geo_min: [f64; 2],
    geo_size: [f64; 2],
}

#[derive(Debug, Serialize, Deserialize)]
struct ImageryState {
    texture_dims: Option<(u32, u32)>,
    prepared: Option<PreparedImagery>,
    /// Pixels inline; only used by `serialize`, a worker hop moves them via
    /// the transfer list instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pixels: Option<Vec<u8>>,
}

/// External texture sampler brush.
#[derive(Debug)]
pub struct ImageryBrush {
    uri: BrushUri,
    texture: Option<ImageryTexture>,
    prepared: Option<PreparedImagery>,
}

impl ImageryBrush {
    pub fn from_uri(uri: BrushUri) -> CacheResult<Self> {
        Ok(Self {
            uri,
            texture: None,
            prepared: None,
        })
    }

    /// Install the texture the external imagery fetcher produced.
    pub fn set_texture(&mut self, texture: ImageryTexture) {
        self.texture = Some(texture);
    }
}

impl Brush for ImageryBrush {
    fn uri(&self) -> &BrushUri {
        &self.uri
    }

    fn required_schema_fields(&self) -> Vec<String> {
        vec!["x".to_string(), "y".to_string()]
    }

    fn serialize(&self) -> CacheResult<serde_json::Value> {
        Ok(serde_json::to_value(ImageryState {
            texture_dims: self.texture.as_ref().map(|t| (t.width, t.height)),
            prepared: self.prepared.clone(),
            pixels: self.texture.as_ref().map(|t| t.pixels.clone()),
        })?)
    }

    fn deserialize(&mut self, payload: serde_json::Value) -> CacheResult<()> {
        let state: ImageryState = serde_json::from_value(payload)?;
        self.prepared = state.prepared;
        self.texture = match (state.texture_dims, state.pixels) {
            (Some((w, h)), Some(pixels)) => Some(ImageryTexture::new(w, h, pixels)?),
            _ => None,
        };
        Ok(())
    }

    fn begin_transfer(&mut self, _direction: TransferDirection) -> CacheResult<BrushTransfer> {
        let dims = self.texture.as_ref().map(|t| (t.width, t.height));
        let params = serde_json::to_value(ImageryState {
            texture_dims: dims,
            prepared: self.prepared.clone(),
            pixels: None,
        })?;
        let transfer = match self.texture.take() {
            Some(t) => vec![t.pixels],
            None => Vec::new(),
        };
        Ok(BrushTransfer { params, transfer })
    }

    fn end_transfer(
        &mut self,
        _direction: TransferDirection,
        params: serde_json::Value,
        mut buffers: Vec<TransferBuffer>,
    ) -> CacheResult<()> {
        let state: ImageryState = serde_json::from_value(params)?;
        self.prepared = state.prepared;
        self.texture = match (state.texture_dims, buffers.pop()) {
            (Some((w, h)), Some(pixels)) => Some(ImageryTexture::new(w, h, pixels)?),
            _ => None,
        };
        Ok(())
    }

    fn prepare(
        &mut self,
        params: &BufferParams<'_>,
        _parent_staging: Option<&Staging>,
        _children_staging: &[Staging],
    ) -> CacheResult<()> {
        let x_index = params.schema.require("x")?;
        let y_index = params.schema.require("y")?;
        let b = &params.geo.full_geo_bounds;
        let size_x = (b[3] - b[0]).max(f64::EPSILON);
        let size_y = (b[4] - b[1]).max(f64::EPSILON);
        self.prepared = Some(PreparedImagery {
            x_index,
            y_index,
            scale: [params.geo.scale[0], params.geo.scale[1]],
            offset: [params.geo.offset[0], params.geo.offset[1]],
            geo_min: [b[0], b[1]],
            geo_size: [size_x, size_y],
        });
        Ok(())
    }

    fn staging_attributes(&self, _params: &BufferParams<'_>) -> Staging {
        serde_json::json!({
            "textureDims": self.texture.as_ref().map(|t| (t.width, t.height)),
        })
    }

    fn node_selection_strategy(&self, _params: &BufferParams<'_>) -> NodeSelection {
        // The texture is fixed per brush config; inserts do not invalidate
        // other tiles.
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
        let (Some(p), Some(tex)) = (&self.prepared, &self.texture) else {
            *color = [0, 0, 0];
            return;
        };
        // Render coordinates back to geo space before normalizing.
        let gx = point[p.x_index] as f64 * p.scale[0] + p.offset[0];
        let gy = point[p.y_index] as f64 * p.scale[1] + p.offset[1];
        let nx = ((gx - p.geo_min[0]) / p.geo_size[0]).clamp(0.0, 1.0);
        let ny = ((gy - p.geo_min[1]) / p.geo_size[1]).clamp(0.0, 1.0);
        *color = tex.sample(nx, ny);
    }

    fn unprepare(&mut self) {
        self.prepared = None;
    }
}
