//! Tests for the recolor scheduler: coalescing, cancellation, impact order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cloudbrush::{
    decompress_color, BrushFactory, BrushSlots, BrushUri, BufferStats, CacheConfig,
    DownloadedTile, GeoTransform, NodeSelection, NodeSelectionStrategy, PointBufferCache,
    RenderBounds, Schema, SchemaField, Staging, TilePath,
};

const RAMP: &str = "local://ramp?field=z&step=1&start=%23000000&end=%23ffffff";

fn position_tile(path: &str, zs: &[f32], stat_values: &[f64]) -> DownloadedTile {
    let mut data = Vec::with_capacity(zs.len() * 3);
    for &z in zs {
        data.extend_from_slice(&[0.0, 0.0, z]);
    }
    let mut buffer_stats = BufferStats::new();
    for &v in stat_values {
        buffer_stats.add("z", v);
    }
    DownloadedTile {
        data,
        total_points: zs.len() as u32,
        schema: Schema(vec![
            SchemaField::floating("x"),
            SchemaField::floating("y"),
            SchemaField::floating("z"),
        ]),
        tree_path: TilePath::parse(path).unwrap(),
        render_space_bounds: RenderBounds::from_array([0.0, 0.0, 0.0, 1.0, 1.0, 1.0]),
        buffer_stats,
        geo_transform: GeoTransform::default(),
    }
}

fn ramp_slots() -> BrushSlots {
    BrushFactory::create_brushes(&[Some(RAMP)]).unwrap()
}

fn counter_callback(cache: &PointBufferCache) -> Arc<AtomicUsize> {
    let fired = Arc::new(AtomicUsize::new(0));
    let observer = fired.clone();
    cache.set_render_request(move || {
        observer.fetch_add(1, Ordering::SeqCst);
    });
    fired
}

#[tokio::test]
async fn growing_stats_coalesce_into_one_recolor() {
    let cache = PointBufferCache::new(CacheConfig { workers: 1 });
    let fired = counter_callback(&cache);
    let mut brushes = ramp_slots();

    // R0 prepared against a 0..20 range: z=10 contours to 127.
    cache
        .push(position_tile("R0", &[0.0, 10.0], &[0.0, 10.0]), &mut brushes)
        .await
        .unwrap();
    let r0 = TilePath::parse("R0").unwrap();
    let before = cache
        .with_output(&r0, |buf| decompress_color(buf[7]))
        .await
        .unwrap();
    assert_eq!(before, [127, 127, 127]);

    // R00 stretches the global range to 0..40; R0's snapshot is now stale.
    cache
        .push(position_tile("R00", &[35.0], &[30.0]), &mut brushes)
        .await
        .unwrap();

    let snapshot = cache.snapshot().await;
    assert_eq!(snapshot.queued_recolors, 1, "R0 queued exactly once");
    assert!(cache.recolor_pending(&r0).await);

    cache.settle().await;

    assert!(cache.take_update(&r0).await, "recolored tile flagged");
    assert!(!cache.take_update(&r0).await, "flag consumed on upload");
    assert_eq!(fired.load(Ordering::SeqCst), 1, "one recolor, one callback");

    // Recomputed with scalef = 255/40: z=10 contours to 63.
    let after = cache
        .with_output(&r0, |buf| decompress_color(buf[7]))
        .await
        .unwrap();
    assert_eq!(after, [63, 63, 63]);
}

#[tokio::test]
async fn impact_completeness_after_settle() {
    let cache = PointBufferCache::default();
    let mut brushes = ramp_slots();

    cache
        .push(position_tile("R", &[0.0], &[0.0, 10.0]), &mut brushes)
        .await
        .unwrap();
    cache
        .push(position_tile("R0", &[5.0], &[20.0]), &mut brushes)
        .await
        .unwrap();
    cache
        .push(position_tile("R01", &[8.0], &[50.0]), &mut brushes)
        .await
        .unwrap();
    cache.settle().await;

    // Once the queue drains, every cached tile's snapshot agrees with the
    // final totals, so no tile would still report drift.
    let staged: Vec<Staging> = staging_of(&cache, &["R", "R0", "R01"]).await;
    assert!(staged.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(cache.snapshot().await.queued_recolors, 0);
}

async fn staging_of(cache: &PointBufferCache, paths: &[&str]) -> Vec<Staging> {
    let mut out = Vec::new();
    for p in paths {
        let path = TilePath::parse(p).unwrap();
        out.push(
            cache
                .with_tile(&path, |t| t.staging_attributes[0].clone())
                .await
                .unwrap(),
        );
    }
    out
}

#[tokio::test]
async fn remove_cancels_a_pending_recolor() {
    let cache = PointBufferCache::new(CacheConfig { workers: 1 });
    let fired = counter_callback(&cache);
    let mut brushes = ramp_slots();

    cache
        .push(position_tile("R", &[0.0], &[0.0, 10.0]), &mut brushes)
        .await
        .unwrap();
    cache
        .push(position_tile("R0", &[5.0], &[30.0]), &mut brushes)
        .await
        .unwrap();

    let r = TilePath::parse("R").unwrap();
    assert!(cache.recolor_pending(&r).await);

    // Scrub before the driver picks the entry up.
    assert!(cache.remove(&r).await);
    assert!(!cache.recolor_pending(&r).await);

    cache.settle().await;
    assert_eq!(fired.load(Ordering::SeqCst), 0, "no recolor ran for R");
    assert!(!cache.contains(&r).await);
}

/// Brush with tile-local parameters: inserts never invalidate others.
struct LocalBrush {
    uri: BrushUri,
}

impl cloudbrush::Brush for LocalBrush {
    fn uri(&self) -> &BrushUri {
        &self.uri
    }
    fn required_schema_fields(&self) -> Vec<String> {
        Vec::new()
    }
    fn serialize(&self) -> cloudbrush::CacheResult<serde_json::Value> {
        Ok(serde_json::json!({}))
    }
    fn deserialize(&mut self, _payload: serde_json::Value) -> cloudbrush::CacheResult<()> {
        Ok(())
    }
    fn prepare(
        &mut self,
        _params: &cloudbrush::BufferParams<'_>,
        _parent: Option<&Staging>,
        _children: &[Staging],
    ) -> cloudbrush::CacheResult<()> {
        Ok(())
    }
    fn staging_attributes(&self, _params: &cloudbrush::BufferParams<'_>) -> Staging {
        serde_json::json!({ "local": true })
    }
    fn node_selection_strategy(&self, _params: &cloudbrush::BufferParams<'_>) -> NodeSelection {
        NodeSelection::none()
    }
    fn buffer_needs_recolor(
        &self,
        _params: &cloudbrush::BufferParams<'_>,
        _strategy_params: &serde_json::Value,
        _other: &Staging,
    ) -> bool {
        true // must never be consulted under the None strategy
    }
    fn color_point(&self, color: &mut [u8; 3], _point: &[f32]) {
        *color = [10, 20, 30];
    }
    fn unprepare(&mut self) {}
}

#[tokio::test]
async fn none_strategy_never_queues_work() {
    BrushFactory::register_brush("test", "local", |uri| Ok(Box::new(LocalBrush { uri })));
    let cache = PointBufferCache::default();
    let mut brushes = BrushFactory::create_brushes(&[Some("test://local")]).unwrap();

    cache
        .push(position_tile("R", &[0.0], &[0.0]), &mut brushes)
        .await
        .unwrap();
    cache
        .push(position_tile("R0", &[1.0], &[10.0]), &mut brushes)
        .await
        .unwrap();

    let snapshot = cache.snapshot().await;
    assert_eq!(snapshot.queued_recolors, 0);
    assert!(!snapshot.recolor_running);
}

/// Brush that always invalidates the ancestor chain.
struct AncestorsBrush {
    uri: BrushUri,
}

impl cloudbrush::Brush for AncestorsBrush {
    fn uri(&self) -> &BrushUri {
        &self.uri
    }
    fn required_schema_fields(&self) -> Vec<String> {
        Vec::new()
    }
    fn serialize(&self) -> cloudbrush::CacheResult<serde_json::Value> {
        Ok(serde_json::json!({}))
    }
    fn deserialize(&mut self, _payload: serde_json::Value) -> cloudbrush::CacheResult<()> {
        Ok(())
    }
    fn prepare(
        &mut self,
        _params: &cloudbrush::BufferParams<'_>,
        _parent: Option<&Staging>,
        _children: &[Staging],
    ) -> cloudbrush::CacheResult<()> {
        Ok(())
    }
    fn staging_attributes(&self, _params: &cloudbrush::BufferParams<'_>) -> Staging {
        serde_json::json!({ "chain": true })
    }
    fn node_selection_strategy(&self, _params: &cloudbrush::BufferParams<'_>) -> NodeSelection {
        NodeSelection {
            strategy: NodeSelectionStrategy::Ancestors,
            params: serde_json::Value::Null,
        }
    }
    fn buffer_needs_recolor(
        &self,
        _params: &cloudbrush::BufferParams<'_>,
        _strategy_params: &serde_json::Value,
        _other: &Staging,
    ) -> bool {
        true
    }
    fn color_point(&self, color: &mut [u8; 3], _point: &[f32]) {
        *color = [1, 2, 3];
    }
    fn unprepare(&mut self) {}
}

#[tokio::test]
async fn ancestors_strategy_walks_the_chain_bottom_up() {
    BrushFactory::register_brush("test", "ancestors", |uri| {
        Ok(Box::new(AncestorsBrush { uri }))
    });
    let cache = PointBufferCache::new(CacheConfig { workers: 1 });
    let mut brushes = BrushFactory::create_brushes(&[Some("test://ancestors")]).unwrap();

    for path in ["R", "R1", "R12"] {
        cache
            .push(position_tile(path, &[0.0], &[0.0]), &mut brushes)
            .await
            .unwrap();
        cache.settle().await;
    }

    // R2 exists elsewhere in the tree and must not be touched.
    cache
        .push(position_tile("R2", &[0.0], &[0.0]), &mut brushes)
        .await
        .unwrap();
    cache.settle().await;

    cache
        .push(position_tile("R123", &[0.0], &[0.0]), &mut brushes)
        .await
        .unwrap();

    let pending: Vec<String> = cache
        .pending_recolors()
        .await
        .iter()
        .map(|p| p.to_string())
        .collect();
    assert_eq!(pending, vec!["R12", "R1", "R"], "nearest ancestor first");
    cache.settle().await;
}
