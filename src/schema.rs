//! Point record schemas.
//!
//! The loader normalizes every source dimension to a 4-byte float before
//! handing a tile over, so a record is exactly one f32 per schema field,
//! point-interleaved. The schema orders those fields and is the only
//! authority on where a named value lives inside a record.

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Storage class of a normalized field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Floating,
    Unsigned,
}

/// One schema dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub dtype: FieldType,
    pub size: u32,
}

impl SchemaField {
    pub fn floating(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dtype: FieldType::Floating,
            size: 4,
        }
    }

    pub fn unsigned(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dtype: FieldType::Unsigned,
            size: 4,
        }
    }
}

/// Ordered field descriptors for one tile's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema(pub Vec<SchemaField>);

impl Schema {
    /// Floats per point record.
    pub fn point_size(&self) -> usize {
        self.0.len()
    }

    /// Index of a named field within a record.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Index lookup that surfaces the missing field by name.
    pub fn require(&self, name: &str) -> CacheResult<usize> {
        self.index_of(name)
            .ok_or_else(|| CacheError::schema_mismatch(name))
    }

    /// Check that `data` holds whole records for `total_points` points.
    pub fn validate_buffer(&self, data: &[f32], total_points: u32) -> CacheResult<()> {
        let expected = total_points as usize * self.point_size();
        if data.len() != expected {
            return Err(CacheError::schema_mismatch(format!(
                "buffer holds {} floats, schema expects {} for {} points",
                data.len(),
                expected,
                total_points
            )));
        }
        Ok(())
    }

    /// Borrow the record of point `i` out of an interleaved buffer.
    pub fn point<'a>(&self, data: &'a [f32], i: usize) -> &'a [f32] {
        let size = self.point_size();
        &data[i * size..(i + 1) * size]
    }
}

/// Reinterpret a raw little-endian byte payload (as delivered off the wire)
/// as f32 records. Fails on misaligned or partial records.
pub fn records_from_bytes(bytes: &[u8]) -> CacheResult<Vec<f32>> {
    let floats: &[f32] = bytemuck::try_cast_slice(bytes)
        .map_err(|e| CacheError::schema_mismatch(format!("byte payload not f32 records: {}", e)))?;
    Ok(floats.to_vec())
}

/// The `x,y,z` position schema every tile starts from.
pub fn position_schema() -> Schema {
    Schema(vec![
        SchemaField::floating("x"),
        SchemaField::floating("y"),
        SchemaField::floating("z"),
    ])
}
