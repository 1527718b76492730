//! Tree paths addressing octree tiles.
//!
//! A path is a string over the alphabet `{R, 0..7}`: `R` names the root and
//! every appended digit selects a child octant, so `R121` is a depth-3 node.
//! Prefix equals ancestor, concatenation equals child; a flat map keyed by
//! paths therefore encodes the whole hierarchy without parent/child pointers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CacheError, CacheResult};

/// Octree tile address (e.g. `R121`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TilePath(String);

impl TilePath {
    pub fn root() -> Self {
        Self("R".to_string())
    }

    /// Parse and validate a path string.
    pub fn parse(s: &str) -> CacheResult<Self> {
        let mut chars = s.chars();
        if chars.next() != Some('R') {
            return Err(CacheError::invalid_uri(s, "tree path must start with 'R'"));
        }
        if !chars.all(|c| ('0'..='7').contains(&c)) {
            return Err(CacheError::invalid_uri(s, "octant digits must be in 0..7"));
        }
        Ok(Self(s.to_string()))
    }

    /// Get child path for given octant (0-7)
    pub fn child(&self, octant: u8) -> Self {
        debug_assert!(octant < 8);
        Self(format!("{}{}", self.0, octant))
    }

    /// Get parent path, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() == 1 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_string()))
    }

    /// All eight candidate child paths, in octant order.
    pub fn children(&self) -> [Self; 8] {
        std::array::from_fn(|i| self.child(i as u8))
    }

    /// Ancestor chain from the immediate parent up to the root.
    /// `R123` yields `R12, R1, R`.
    pub fn ancestors(&self) -> impl Iterator<Item = TilePath> + '_ {
        let mut current = self.clone();
        std::iter::from_fn(move || {
            let parent = current.parent()?;
            current = parent.clone();
            Some(parent)
        })
    }

    /// Depth below the root; the root itself is depth 0.
    pub fn depth(&self) -> usize {
        self.0.len() - 1
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
