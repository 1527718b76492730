//! Axis-aligned bounds for tiles in render space.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Render-space AABB carried on every tile (min xyz / max xyz).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderBounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl RenderBounds {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.to_array(),
            max: max.to_array(),
        }
    }

    /// Build from the 6-float wire layout `[min_x, min_y, min_z, max_x, max_y, max_z]`.
    pub fn from_array(v: [f32; 6]) -> Self {
        Self {
            min: [v[0], v[1], v[2]],
            max: [v[3], v[4], v[5]],
        }
    }

    pub fn to_array(&self) -> [f32; 6] {
        [
            self.min[0], self.min[1], self.min[2], self.max[0], self.max[1], self.max[2],
        ]
    }

    pub fn center(&self) -> Vec3 {
        (Vec3::from(self.min) + Vec3::from(self.max)) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        Vec3::from(self.max) - Vec3::from(self.min)
    }
}

/// Scale/offset/full-extent record the loader derives from the source file
/// header. Opaque to the cache; imagery brushes sample against the full
/// geo extent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub scale: [f64; 3],
    pub offset: [f64; 3],
    pub full_geo_bounds: [f64; 6],
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self {
            scale: [1.0; 3],
            offset: [0.0; 3],
            full_geo_bounds: [0.0, 0.0, 0.0, 1.0, 1.0, 1.0],
        }
    }
}
