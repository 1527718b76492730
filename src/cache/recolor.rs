//! Recolor queue: serial FIFO with per-path coalescing.
//!
//! An entry names the tile to repaint, the brush slots that went stale, and
//! the running stats captured at enqueue time. Re-queueing a path merges the
//! new slots into the existing entry, refreshes the captured stats, and
//! moves the entry to the tail, so a tile impacted many times is processed
//! once, at its latest position.

use std::collections::{BTreeMap, VecDeque};

use crate::brush::SerializedBrush;
use crate::path::TilePath;
use crate::stats::BufferStats;

/// One pending recolor.
#[derive(Debug)]
pub struct RecolorEntry {
    pub path: TilePath,
    /// Stale slot → brush snapshot taken when the impact was computed.
    pub slots: BTreeMap<usize, SerializedBrush>,
    /// Running totals captured at (the latest) enqueue.
    pub stats: BufferStats,
}

#[derive(Debug, Default)]
pub struct RecolorQueue {
    entries: VecDeque<RecolorEntry>,
}

impl RecolorQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `slot` of `path` for recoloring, coalescing with any entry
    /// already pending for the same path.
    pub fn enqueue(
        &mut self,
        path: TilePath,
        slot: usize,
        brush: SerializedBrush,
        stats: BufferStats,
    ) {
        if let Some(pos) = self.entries.iter().position(|e| e.path == path) {
            let mut entry = self.entries.remove(pos).expect("position just found");
            entry.slots.insert(slot, brush);
            entry.stats = stats;
            self.entries.push_back(entry);
            return;
        }
        let mut slots = BTreeMap::new();
        slots.insert(slot, brush);
        self.entries.push_back(RecolorEntry { path, slots, stats });
    }

    /// Drop any pending entry for `path`; returns whether one existed.
    pub fn scrub(&mut self, path: &TilePath) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.path != path);
        self.entries.len() != before
    }

    pub fn pop_front(&mut self) -> Option<RecolorEntry> {
        self.entries.pop_front()
    }

    pub fn contains(&self, path: &TilePath) -> bool {
        self.entries.iter().any(|e| &e.path == path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Pending paths in drain order.
    pub fn paths(&self) -> Vec<TilePath> {
        self.entries.iter().map(|e| e.path.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
