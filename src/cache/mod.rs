//! Point buffer cache: the shared owner of every colored tile.
//!
//! `push` turns a decoded tile into a colored one: merge its histogram into
//! the running totals, prepare each brush against those totals, ship the
//! records through the worker pool under the tile's lock, snapshot what each
//! brush computed, and finally walk the cached tiles whose snapshots the new
//! data invalidated, queueing them for recolor. A single driver task drains
//! that queue serially so sibling staging reads always see a consistent
//! hierarchy.

mod lock;
mod recolor;
mod tile;

pub use lock::{TileLockGuard, TileLockTable};
pub use recolor::{RecolorEntry, RecolorQueue};
pub use tile::{DownloadedTile, PushReceipt, Tile};

use std::collections::BTreeMap;
use std::mem;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::brush::{
    end_transfer_onto_brushes, BrushFactory, BrushSlots, BrushesTransfer, BufferParams,
    NodeSelection, NodeSelectionStrategy, SerializedBrush, SlotTransfer, Staging,
    TransferDirection,
};
use crate::error::{CacheError, CacheResult};
use crate::path::TilePath;
use crate::stats::BufferStats;
use crate::worker::{ColorJobParams, ColorJobResponse, ColorWorkerPool, WorkerPoolConfig};

/// Renderer notification fired after each successful recolor.
pub type RenderRequest = Arc<dyn Fn() + Send + Sync>;

/// Configuration for the point buffer cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Coloring worker threads.
    pub workers: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            workers: crate::worker::DEFAULT_WORKERS,
        }
    }
}

/// Counts exposed for diagnostics and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheSnapshot {
    pub tiles: usize,
    pub total_points: u64,
    pub queued_recolors: usize,
    pub recolor_running: bool,
}

struct CacheState {
    tiles: BTreeMap<TilePath, Tile>,
    /// Bucket-wise sum of every cached tile's histogram. Never decremented
    /// on remove; `flush` is the only reset.
    stats: BufferStats,
    queue: RecolorQueue,
    recolor_running: bool,
}

struct CacheInner {
    state: tokio::sync::Mutex<CacheState>,
    locks: TileLockTable,
    pool: ColorWorkerPool,
    render_request: Mutex<Option<RenderRequest>>,
    /// Generation counter bumped each time the recolor driver goes idle.
    quiesce: watch::Sender<u64>,
}

/// The process's one shared tile owner. Cheap to clone; hand one handle to
/// the loader and one to the renderer.
#[derive(Clone)]
pub struct PointBufferCache {
    inner: Arc<CacheInner>,
}

impl Default for PointBufferCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl PointBufferCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                state: tokio::sync::Mutex::new(CacheState {
                    tiles: BTreeMap::new(),
                    stats: BufferStats::new(),
                    queue: RecolorQueue::new(),
                    recolor_running: false,
                }),
                locks: TileLockTable::new(),
                pool: ColorWorkerPool::new(WorkerPoolConfig {
                    workers: config.workers,
                }),
                render_request: Mutex::new(None),
                quiesce: watch::channel(0).0,
            }),
        }
    }

    /// Install the renderer's re-upload notification.
    pub fn set_render_request(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self
            .inner
            .render_request
            .lock()
            .expect("render request slot poisoned") = Some(Arc::new(callback));
    }

    /// Insert a freshly decoded tile, coloring it with `brushes`.
    ///
    /// The brush vector is prepared, shipped through a worker, snapshotted
    /// onto the tile, and unprepared again; afterwards any cached tile whose
    /// snapshot disagrees with the new running totals is queued for recolor.
    /// Individual brush failures degrade that slot to uncolored; the initial
    /// upload of the returned buffer belongs to the caller, so the receipt
    /// always carries `update == false`.
    pub async fn push(
        &self,
        downloaded: DownloadedTile,
        brushes: &mut BrushSlots,
    ) -> CacheResult<PushReceipt> {
        let DownloadedTile {
            data,
            total_points,
            schema,
            tree_path: path,
            render_space_bounds: bounds,
            buffer_stats,
            geo_transform: geo,
        } = downloaded;
        schema.validate_buffer(&data, total_points)?;

        let num_brushes = brushes.len();
        let output_point_size = 3 + num_brushes;

        // Merge this tile's histogram into the running totals before any
        // brush prepares, then look up the neighbors' snapshots.
        let (parent_staging, children_staging, stats_snapshot) = {
            let mut state = self.inner.state.lock().await;
            state.stats.merge_from(&buffer_stats);
            let parent = path
                .parent()
                .and_then(|p| state.tiles.get(&p))
                .map(|t| t.staging_attributes.clone());
            let children: Vec<Vec<Staging>> = path
                .children()
                .iter()
                .filter_map(|c| state.tiles.get(c))
                .map(|t| t.staging_attributes.clone())
                .collect();
            (parent, children, state.stats.clone())
        };

        let buffer_params = BufferParams {
            schema: &schema,
            stats: &stats_snapshot,
            bounds: &bounds,
            geo: &geo,
            total_points,
        };

        let mut active = vec![false; num_brushes];
        for (i, slot) in brushes.iter_mut().enumerate() {
            let Some(brush) = slot else { continue };
            if let Some(field) = brush
                .required_schema_fields()
                .into_iter()
                .find(|f| !schema.has_field(f))
            {
                log::debug!("brush slot {} skipped for '{}': no field '{}'", i, path, field);
                continue;
            }
            let parent = parent_staging.as_ref().and_then(|v| v.get(i));
            let kids: Vec<Staging> = children_staging
                .iter()
                .filter_map(|v| v.get(i).cloned())
                .collect();
            match brush.prepare(&buffer_params, parent, &kids) {
                Ok(()) => active[i] = true,
                Err(err) => {
                    log::debug!("brush slot {} skipped for '{}': {}", i, path, err);
                }
            }
        }

        let output = vec![0f32; total_points as usize * output_point_size];

        // Serialize mutation of this path's output buffer, then hand the
        // buffers to a worker. The guard releases on every exit below.
        let guard = self.inner.locks.lock(&path).await;

        let mut package_slots: Vec<Option<SlotTransfer>> = Vec::with_capacity(num_brushes);
        for (i, slot) in brushes.iter_mut().enumerate() {
            match slot {
                Some(brush) if active[i] => {
                    let hop = brush.begin_transfer(TransferDirection::MainToWorker)?;
                    package_slots.push(Some(SlotTransfer {
                        uri: brush.uri().to_string(),
                        params: hop.params,
                        transfer: hop.transfer,
                    }));
                }
                _ => package_slots.push(None),
            }
        }

        let job = ColorJobParams {
            brushes: BrushesTransfer {
                slots: package_slots,
            },
            total_points,
            input_buffer: data,
            schema: schema.clone(),
            output_buffer: output,
            output_point_size,
        };
        let response = self.inner.pool.push(job).wait().await;

        let (input_buffer, output_buffer, colored) = match response {
            Ok(ColorJobResponse {
                params: mut job_params,
                outcome,
                ..
            }) => {
                let returned = mem::replace(
                    &mut job_params.brushes,
                    BrushesTransfer { slots: Vec::new() },
                );
                if !returned.slots.is_empty() {
                    if let Err(err) =
                        end_transfer_onto_brushes(brushes, TransferDirection::WorkerToMain, returned)
                    {
                        log::warn!("brush transfer restore failed for '{}': {}", path, err);
                    }
                }
                match outcome {
                    Ok(()) => (job_params.input_buffer, job_params.output_buffer, true),
                    Err(err) => {
                        log::warn!("coloring '{}' failed, inserting uncolored: {}", path, err);
                        let mut output = job_params.output_buffer;
                        output.fill(0.0);
                        (job_params.input_buffer, output, false)
                    }
                }
            }
            Err(err) => {
                log::warn!("coloring '{}' lost its worker: {}", path, err);
                (
                    Vec::new(),
                    vec![0f32; total_points as usize * output_point_size],
                    false,
                )
            }
        };
        drop(guard);

        // Snapshot what each brush computed, with the same inputs it
        // prepared against, then release the per-run state.
        let mut staging_attributes = Vec::with_capacity(num_brushes);
        let mut selections: Vec<Option<(NodeSelection, SerializedBrush)>> =
            Vec::with_capacity(num_brushes);
        for (i, slot) in brushes.iter().enumerate() {
            match slot {
                Some(brush) if active[i] => {
                    staging_attributes.push(brush.staging_attributes(&buffer_params));
                    selections.push(Some((
                        brush.node_selection_strategy(&buffer_params),
                        SerializedBrush {
                            uri: brush.uri().to_string(),
                            state: brush.serialize()?,
                        },
                    )));
                }
                _ => {
                    staging_attributes.push(Staging::Null);
                    selections.push(None);
                }
            }
        }
        for (i, slot) in brushes.iter_mut().enumerate() {
            if active[i] {
                if let Some(brush) = slot {
                    brush.unprepare();
                }
            }
        }

        let tile = Tile {
            path: path.clone(),
            input_buffer,
            schema: schema.clone(),
            buffer_stats,
            render_space_bounds: bounds,
            total_points,
            output_buffer,
            output_point_size,
            staging_attributes,
            update: false,
            colored,
            geo_transform: geo.clone(),
        };

        let mut spawn_driver = false;
        {
            let mut state = self.inner.state.lock().await;
            state.tiles.insert(path.clone(), tile);

            // Walk the cached tiles each brush declared it may invalidate.
            for (i, selection) in selections.iter().enumerate() {
                let Some((selection, snapshot)) = selection else {
                    continue;
                };
                let Some(brush) = brushes[i].as_ref() else {
                    continue;
                };
                let candidates: Vec<TilePath> = match selection.strategy {
                    NodeSelectionStrategy::None => Vec::new(),
                    NodeSelectionStrategy::Ancestors => path
                        .ancestors()
                        .filter(|p| state.tiles.contains_key(p))
                        .collect(),
                    // BTreeMap iteration is lexicographic, which for this
                    // key alphabet is depth-first order.
                    NodeSelectionStrategy::All => state
                        .tiles
                        .keys()
                        .filter(|k| **k != path)
                        .cloned()
                        .collect(),
                };
                for candidate in candidates {
                    let stale = match state.tiles[&candidate].staging_for(i) {
                        None => true,
                        Some(staged) => {
                            brush.buffer_needs_recolor(&buffer_params, &selection.params, staged)
                        }
                    };
                    if stale {
                        log::debug!("queueing recolor of '{}' slot {}", candidate, i);
                        let stats = state.stats.clone();
                        state.queue.enqueue(candidate, i, snapshot.clone(), stats);
                    }
                }
            }

            if !state.queue.is_empty() && !state.recolor_running {
                state.recolor_running = true;
                spawn_driver = true;
            }
        }
        if spawn_driver {
            let cache = self.clone();
            tokio::spawn(async move { cache.drain_recolor_queue().await });
        }

        Ok(PushReceipt {
            path,
            update: false,
            total_points,
            output_point_size,
            colored,
        })
    }

    /// Drop a tile and any recolor still pending for it.
    pub async fn remove(&self, path: &TilePath) -> bool {
        let mut state = self.inner.state.lock().await;
        state.queue.scrub(path);
        let removed = state.tiles.remove(path).is_some();
        if removed {
            log::debug!("removed tile '{}'", path);
        }
        removed
    }

    /// Drop everything: tiles, pending recolors, and the running totals.
    /// In-flight worker jobs finish on their own; their results are
    /// discarded because the tiles they would update are gone.
    pub async fn flush(&self) {
        let mut state = self.inner.state.lock().await;
        let dropped = state.tiles.len();
        state.tiles.clear();
        state.queue.clear();
        state.stats = BufferStats::new();
        log::info!("flushed cache ({} tiles)", dropped);
    }

    /// Wait until the recolor queue is drained and the driver has stopped.
    pub async fn settle(&self) {
        let mut quiesced = self.inner.quiesce.subscribe();
        loop {
            // Mark the current generation before checking, so a driver that
            // goes idle in between still flips `changed`.
            let _ = quiesced.borrow_and_update();
            {
                let state = self.inner.state.lock().await;
                if state.queue.is_empty() && !state.recolor_running {
                    return;
                }
            }
            if quiesced.changed().await.is_err() {
                return;
            }
        }
    }

    pub async fn snapshot(&self) -> CacheSnapshot {
        let state = self.inner.state.lock().await;
        CacheSnapshot {
            tiles: state.tiles.len(),
            total_points: state.tiles.values().map(|t| t.total_points as u64).sum(),
            queued_recolors: state.queue.len(),
            recolor_running: state.recolor_running,
        }
    }

    pub async fn contains(&self, path: &TilePath) -> bool {
        self.inner.state.lock().await.tiles.contains_key(path)
    }

    /// Whether a recolor is pending for `path`.
    pub async fn recolor_pending(&self, path: &TilePath) -> bool {
        self.inner.state.lock().await.queue.contains(path)
    }

    /// Pending recolor paths in drain order.
    pub async fn pending_recolors(&self) -> Vec<TilePath> {
        self.inner.state.lock().await.queue.paths()
    }

    /// Running pipeline-wide histogram totals.
    pub async fn point_cloud_stats(&self) -> BufferStats {
        self.inner.state.lock().await.stats.clone()
    }

    /// Borrow a cached tile. The closure runs under the cache's state lock,
    /// so keep it short.
    pub async fn with_tile<R>(&self, path: &TilePath, f: impl FnOnce(&Tile) -> R) -> Option<R> {
        let state = self.inner.state.lock().await;
        state.tiles.get(path).map(f)
    }

    /// Borrow a tile's output buffer, the renderer's upload source.
    pub async fn with_output<R>(
        &self,
        path: &TilePath,
        f: impl FnOnce(&[f32]) -> R,
    ) -> Option<R> {
        self.with_tile(path, |t| f(&t.output_buffer)).await
    }

    /// Consume a tile's `update` flag, returning its previous value.
    pub async fn take_update(&self, path: &TilePath) -> bool {
        let mut state = self.inner.state.lock().await;
        match state.tiles.get_mut(path) {
            Some(tile) => mem::take(&mut tile.update),
            None => false,
        }
    }

    /// Serial driver: pops one entry at a time so recolors never overlap.
    async fn drain_recolor_queue(self) {
        loop {
            // Fairness yield before any lock acquisition; recolors are
            // queued from inside `push` and must not starve it.
            tokio::task::yield_now().await;
            let entry = {
                let mut state = self.inner.state.lock().await;
                match state.queue.pop_front() {
                    Some(entry) => entry,
                    None => {
                        state.recolor_running = false;
                        drop(state);
                        self.inner.quiesce.send_modify(|generation| *generation += 1);
                        return;
                    }
                }
            };
            let path = entry.path.clone();
            match self.recolor_node(entry).await {
                Ok(true) => {
                    log::debug!("recolored '{}'", path);
                    let callback = self
                        .inner
                        .render_request
                        .lock()
                        .expect("render request slot poisoned")
                        .clone();
                    if let Some(callback) = callback {
                        callback();
                    }
                }
                Ok(false) => {}
                Err(CacheError::QueueAborted(_)) => {
                    log::debug!("recolor of '{}' aborted, tile is gone", path);
                }
                Err(err) => {
                    log::warn!("recolor of '{}' failed: {}", path, err);
                }
            }
        }
    }

    /// Re-run prepare/color/unprepare on a cached tile, reusing its buffers.
    /// Returns whether the tile was actually repainted.
    async fn recolor_node(&self, entry: RecolorEntry) -> CacheResult<bool> {
        let path = entry.path;

        let (schema, bounds, geo, total_points, output_point_size, parent_staging, children_staging) = {
            let state = self.inner.state.lock().await;
            let tile = state
                .tiles
                .get(&path)
                .ok_or_else(|| CacheError::QueueAborted(path.to_string()))?;
            if tile.input_buffer.is_empty() && tile.total_points > 0 {
                // A worker death left this tile without input records.
                return Ok(false);
            }
            let parent = path
                .parent()
                .and_then(|p| state.tiles.get(&p))
                .map(|t| t.staging_attributes.clone());
            let children: Vec<Vec<Staging>> = path
                .children()
                .iter()
                .filter_map(|c| state.tiles.get(c))
                .map(|t| t.staging_attributes.clone())
                .collect();
            (
                tile.schema.clone(),
                tile.render_space_bounds,
                tile.geo_transform.clone(),
                tile.total_points,
                tile.output_point_size,
                parent,
                children,
            )
        };

        let buffer_params = BufferParams {
            schema: &schema,
            stats: &entry.stats,
            bounds: &bounds,
            geo: &geo,
            total_points,
        };

        let num_slots = output_point_size - 3;
        let mut prepared: Vec<(usize, Box<dyn crate::brush::Brush>)> = Vec::new();
        for (slot, snapshot) in &entry.slots {
            if *slot >= num_slots {
                continue;
            }
            let mut brush = match BrushFactory::create_brush(&snapshot.uri) {
                Ok(brush) => brush,
                Err(err) => {
                    log::warn!("recolor slot {} of '{}' unavailable: {}", slot, path, err);
                    continue;
                }
            };
            if let Err(err) = brush.deserialize(snapshot.state.clone()) {
                log::warn!("recolor slot {} of '{}' corrupt: {}", slot, path, err);
                continue;
            }
            let parent = parent_staging.as_ref().and_then(|v| v.get(*slot));
            let kids: Vec<Staging> = children_staging
                .iter()
                .filter_map(|v| v.get(*slot).cloned())
                .collect();
            match brush.prepare(&buffer_params, parent, &kids) {
                Ok(()) => prepared.push((*slot, brush)),
                Err(err) => {
                    log::debug!("recolor slot {} of '{}' skipped: {}", slot, path, err);
                }
            }
        }
        if prepared.is_empty() {
            return Ok(false);
        }

        let staging_updates: Vec<(usize, Staging)> = prepared
            .iter()
            .map(|(slot, brush)| (*slot, brush.staging_attributes(&buffer_params)))
            .collect();

        let mut package_slots: Vec<Option<SlotTransfer>> = Vec::new();
        package_slots.resize_with(num_slots, || None);
        for (slot, brush) in prepared.iter_mut() {
            let hop = brush.begin_transfer(TransferDirection::MainToWorker)?;
            package_slots[*slot] = Some(SlotTransfer {
                uri: brush.uri().to_string(),
                params: hop.params,
                transfer: hop.transfer,
            });
        }

        let guard = self.inner.locks.lock(&path).await;
        let (input_buffer, output_buffer) = {
            let mut state = self.inner.state.lock().await;
            let Some(tile) = state.tiles.get_mut(&path) else {
                drop(state);
                drop(guard);
                for (_, brush) in prepared.iter_mut() {
                    brush.unprepare();
                }
                return Err(CacheError::QueueAborted(path.to_string()));
            };
            (
                mem::take(&mut tile.input_buffer),
                mem::take(&mut tile.output_buffer),
            )
        };

        let job = ColorJobParams {
            brushes: BrushesTransfer {
                slots: package_slots,
            },
            total_points,
            input_buffer,
            schema: schema.clone(),
            output_buffer,
            output_point_size,
        };
        let response = self.inner.pool.push(job).wait().await;

        let result = {
            let mut state = self.inner.state.lock().await;
            match state.tiles.get_mut(&path) {
                // Removed mid-flight; the worker's result has nowhere to go.
                None => Err(CacheError::QueueAborted(path.to_string())),
                Some(tile) => match response {
                    Ok(job_response) => {
                        tile.input_buffer = job_response.params.input_buffer;
                        tile.output_buffer = job_response.params.output_buffer;
                        match job_response.outcome {
                            Ok(()) => {
                                for (slot, staging) in &staging_updates {
                                    if let Some(s) = tile.staging_attributes.get_mut(*slot) {
                                        *s = staging.clone();
                                    }
                                }
                                tile.update = true;
                                tile.colored = true;
                                Ok(true)
                            }
                            Err(err) => {
                                log::warn!("recolor job for '{}' failed: {}", path, err);
                                Ok(false)
                            }
                        }
                    }
                    Err(err) => {
                        log::warn!("recolor job for '{}' lost its worker: {}", path, err);
                        tile.input_buffer = Vec::new();
                        tile.output_buffer =
                            vec![0f32; total_points as usize * output_point_size];
                        tile.colored = false;
                        Ok(false)
                    }
                },
            }
        };
        drop(guard);
        for (_, brush) in prepared.iter_mut() {
            brush.unprepare();
        }
        result
    }
}
