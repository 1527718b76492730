//! Central brush registry.
//! - Single source for supported brush URIs
//! - Process-wide `(scheme, name) → constructor` table
//! - Batch helpers for the worker hop (serialize / transfer, slot-aligned)

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::uri::BrushUri;
use super::{Brush, BrushSlots, TransferBuffer, TransferDirection};
use crate::error::{CacheError, CacheResult};

/// Constructor registered for one `scheme://name` pair.
pub type BrushCtor = fn(BrushUri) -> CacheResult<Box<dyn Brush>>;

static REGISTRY: Lazy<RwLock<BTreeMap<(String, String), BrushCtor>>> = Lazy::new(|| {
    let mut map: BTreeMap<(String, String), BrushCtor> = BTreeMap::new();
    map.insert(key("local", "ramp"), |uri| {
        Ok(Box::new(super::ramp::RampBrush::from_uri(uri)?))
    });
    map.insert(key("local", "color"), |uri| {
        Ok(Box::new(super::solid::ColorBrush::from_uri(uri)?))
    });
    map.insert(key("local", "field-color"), |uri| {
        Ok(Box::new(super::field::FieldColorBrush::from_uri(uri)?))
    });
    map.insert(key("local", "imagery"), |uri| {
        Ok(Box::new(super::imagery::ImageryBrush::from_uri(uri)?))
    });
    RwLock::new(map)
});

fn key(scheme: &str, name: &str) -> (String, String) {
    (scheme.to_string(), name.to_string())
}

/// A brush captured by value: its URI plus opaque state payload. This is the
/// form that crosses the worker boundary and the form laws compare against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedBrush {
    pub uri: String,
    pub state: serde_json::Value,
}

/// One worker hop's packaging for a whole brush vector, slot-aligned.
#[derive(Debug)]
pub struct BrushesTransfer {
    pub slots: Vec<Option<SlotTransfer>>,
}

/// Per-slot transfer record: value params plus moved storages.
#[derive(Debug)]
pub struct SlotTransfer {
    pub uri: String,
    pub params: serde_json::Value,
    pub transfer: Vec<TransferBuffer>,
}

/// The process-wide brush factory.
pub struct BrushFactory;

impl BrushFactory {
    /// Instantiate a brush from its configuration URI.
    pub fn create_brush(uri: &str) -> CacheResult<Box<dyn Brush>> {
        let parsed = BrushUri::parse(uri)?;
        let registry = REGISTRY.read().expect("brush registry poisoned");
        let ctor = registry
            .get(&key(&parsed.scheme, &parsed.name))
            .ok_or_else(|| CacheError::unknown_brush(uri))?;
        ctor(parsed)
    }

    /// Register a constructor; replaces any previous binding for the pair.
    pub fn register_brush(scheme: &str, name: &str, ctor: BrushCtor) {
        REGISTRY
            .write()
            .expect("brush registry poisoned")
            .insert(key(scheme, name), ctor);
    }

    /// Remove a binding; returns whether it existed.
    pub fn deregister_brush(scheme: &str, name: &str) -> bool {
        REGISTRY
            .write()
            .expect("brush registry poisoned")
            .remove(&key(scheme, name))
            .is_some()
    }

    /// All registered `scheme://name` prefixes, sorted.
    pub fn available() -> Vec<String> {
        REGISTRY
            .read()
            .expect("brush registry poisoned")
            .keys()
            .map(|(s, n)| format!("{}://{}", s, n))
            .collect()
    }

    /// Build a brush vector from per-slot spec URIs. A slot whose spec fails
    /// degrades to `None` with a warning; if *every* requested slot fails the
    /// first error surfaces, since a push with no usable brush at all is the
    /// one failure the loader must see.
    pub fn create_brushes(specs: &[Option<&str>]) -> CacheResult<BrushSlots> {
        let mut slots: BrushSlots = Vec::with_capacity(specs.len());
        let mut first_error = None;
        let mut requested = 0;
        let mut created = 0;

        for spec in specs {
            match spec {
                None => slots.push(None),
                Some(uri) => {
                    requested += 1;
                    match Self::create_brush(uri) {
                        Ok(brush) => {
                            created += 1;
                            slots.push(Some(brush));
                        }
                        Err(err) => {
                            log::warn!("dropping brush slot '{}': {}", uri, err);
                            if first_error.is_none() {
                                first_error = Some(err);
                            }
                            slots.push(None);
                        }
                    }
                }
            }
        }

        if requested > 0 && created == 0 {
            return Err(first_error.expect("at least one failure recorded"));
        }
        Ok(slots)
    }
}

/// Capture a brush vector by value, preserving null slots and ordering.
pub fn serialize_brushes(brushes: &BrushSlots) -> CacheResult<Vec<Option<SerializedBrush>>> {
    brushes
        .iter()
        .map(|slot| {
            slot.as_ref()
                .map(|b| {
                    Ok(SerializedBrush {
                        uri: b.uri().to_string(),
                        state: b.serialize()?,
                    })
                })
                .transpose()
        })
        .collect()
}

/// Rebuild a brush vector from captured values, preserving slot alignment.
pub fn deserialize_brushes(payloads: &[Option<SerializedBrush>]) -> CacheResult<BrushSlots> {
    payloads
        .iter()
        .map(|slot| {
            slot.as_ref()
                .map(|s| {
                    let mut brush = BrushFactory::create_brush(&s.uri)?;
                    brush.deserialize(s.state.clone())?;
                    Ok(brush)
                })
                .transpose()
        })
        .collect()
}

/// Package a brush vector for a worker hop; storages are moved out of the
/// brushes, which must not be used again until `end_transfer_onto_brushes`.
pub fn begin_transfer_for_brushes(
    brushes: &mut BrushSlots,
    direction: TransferDirection,
) -> CacheResult<BrushesTransfer> {
    let slots = brushes
        .iter_mut()
        .map(|slot| {
            slot.as_mut()
                .map(|b| {
                    let hop = b.begin_transfer(direction)?;
                    Ok(SlotTransfer {
                        uri: b.uri().to_string(),
                        params: hop.params,
                        transfer: hop.transfer,
                    })
                })
                .transpose()
        })
        .collect::<CacheResult<_>>()?;
    Ok(BrushesTransfer { slots })
}

/// Adopt a transfer record back onto an existing brush vector, slot by slot.
pub fn end_transfer_onto_brushes(
    brushes: &mut BrushSlots,
    direction: TransferDirection,
    package: BrushesTransfer,
) -> CacheResult<()> {
    for (slot, incoming) in brushes.iter_mut().zip(package.slots) {
        if let (Some(brush), Some(record)) = (slot.as_mut(), incoming) {
            brush.end_transfer(direction, record.params, record.transfer)?;
        }
    }
    Ok(())
}

/// Materialize brushes worker-side from a transfer record.
pub fn brushes_from_transfer(
    package: BrushesTransfer,
    direction: TransferDirection,
) -> CacheResult<BrushSlots> {
    package
        .slots
        .into_iter()
        .map(|slot| {
            slot.map(|record| {
                let mut brush = BrushFactory::create_brush(&record.uri)?;
                brush.end_transfer(direction, record.params, record.transfer)?;
                Ok(brush)
            })
            .transpose()
        })
        .collect()
}
