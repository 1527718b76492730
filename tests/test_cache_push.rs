//! Tests for cache insertion: coloring, invariants, and failure isolation.

use std::sync::atomic::{AtomicUsize, Ordering};

use cloudbrush::brush::SerializedBrush;
use cloudbrush::{
    decompress_color, BrushFactory, BrushSlots, BrushUri, BufferStats, CacheConfig,
    DownloadedTile, GeoTransform, NodeSelection, PointBufferCache, RenderBounds, Schema,
    SchemaField, Staging, TilePath,
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

#[tokio::test]
async fn single_ramp_tile_contours_against_global_stats() {
    let cache = PointBufferCache::new(CacheConfig { workers: 1 });
    let mut brushes = ramp_slots();

    let receipt = cache
        .push(position_tile("R", &[0.0, 5.0, 10.0, 15.0], &[0.0, 10.0, 20.0, 30.0]), &mut brushes)
        .await
        .unwrap();
    assert!(!receipt.update, "initial upload belongs to the caller");
    assert!(receipt.colored);
    assert_eq!(receipt.output_point_size, 4);

    let path = TilePath::parse("R").unwrap();
    let output = cache
        .with_output(&path, |buf| buf.to_vec())
        .await
        .unwrap();
    assert_eq!(output.len(), 4 * 4);

    // min=0, max=30+10, scalef=255/40: h = {0, 31, 63, 95}.
    for (i, (z, h)) in [(0.0f32, 0u8), (5.0, 31), (10.0, 63), (15.0, 95)]
        .into_iter()
        .enumerate()
    {
        assert_eq!(&output[i * 4..i * 4 + 3], &[0.0, 0.0, z], "position {}", i);
        assert_eq!(decompress_color(output[i * 4 + 3]), [h, h, h], "color {}", i);
    }
}

#[tokio::test]
async fn output_and_staging_invariants_hold_per_tile() {
    let cache = PointBufferCache::default();
    // Three slots: ramp, empty, categorical (which this schema cannot feed).
    let mut brushes =
        BrushFactory::create_brushes(&[Some(RAMP), None, Some("local://field-color")]).unwrap();

    cache
        .push(position_tile("R", &[1.0, 2.0], &[0.0, 10.0]), &mut brushes)
        .await
        .unwrap();

    let path = TilePath::parse("R").unwrap();
    cache
        .with_tile(&path, |tile| {
            assert_eq!(tile.output_point_size, 3 + 3);
            assert_eq!(
                tile.output_buffer.len(),
                tile.total_points as usize * tile.output_point_size
            );
            assert_eq!(
                tile.staging_attributes.len(),
                3,
                "every slot keeps a staging entry"
            );
            // The schema-starved categorical slot is present but null.
            assert_eq!(tile.staging_attributes[1], Staging::Null);
            assert_eq!(tile.staging_attributes[2], Staging::Null);
            assert_ne!(tile.staging_attributes[0], Staging::Null);
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn running_stats_equal_sum_of_cached_tiles() {
    let cache = PointBufferCache::default();
    let mut brushes = ramp_slots();

    let a = position_tile("R", &[0.0], &[0.0, 10.0]);
    let b = position_tile("R0", &[5.0], &[10.0, 35.0]);
    let mut expected = BufferStats::new();
    expected.merge_from(&a.buffer_stats);
    expected.merge_from(&b.buffer_stats);

    cache.push(a, &mut brushes).await.unwrap();
    cache.push(b, &mut brushes).await.unwrap();
    cache.settle().await;

    assert_eq!(cache.point_cloud_stats().await, expected);
}

#[tokio::test]
async fn remove_keeps_running_stats() {
    let cache = PointBufferCache::default();
    let mut brushes = ramp_slots();
    cache
        .push(position_tile("R", &[0.0], &[0.0]), &mut brushes)
        .await
        .unwrap();

    let path = TilePath::parse("R").unwrap();
    assert!(cache.remove(&path).await);
    assert!(!cache.contains(&path).await);
    // Totals only ever grow until flush; removal does not subtract.
    assert!(!cache.point_cloud_stats().await.is_empty());
}

#[tokio::test]
async fn flush_empties_tiles_queue_and_stats() {
    let cache = PointBufferCache::default();
    let mut brushes = ramp_slots();
    cache
        .push(position_tile("R", &[0.0], &[0.0, 10.0]), &mut brushes)
        .await
        .unwrap();
    cache
        .push(position_tile("R0", &[5.0], &[30.0]), &mut brushes)
        .await
        .unwrap();

    cache.flush().await;
    let snapshot = cache.snapshot().await;
    assert_eq!(snapshot.tiles, 0);
    assert_eq!(snapshot.queued_recolors, 0);
    assert!(cache.point_cloud_stats().await.is_empty());
}

/// Brush whose worker-side execution always dies.
struct PanicBrush {
    uri: BrushUri,
}

impl cloudbrush::Brush for PanicBrush {
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
        serde_json::json!({ "panic": true })
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
        false
    }
    fn color_point(&self, _color: &mut [u8; 3], _point: &[f32]) {
        panic!("forced worker failure");
    }
    fn unprepare(&mut self) {}
}

#[tokio::test]
async fn worker_failure_inserts_uncolored_and_releases_the_lock() {
    BrushFactory::register_brush("test", "panic", |uri| Ok(Box::new(PanicBrush { uri })));
    let cache = PointBufferCache::new(CacheConfig { workers: 1 });

    let mut failing = BrushFactory::create_brushes(&[Some("test://panic")]).unwrap();
    let receipt = cache
        .push(position_tile("R", &[1.0, 2.0], &[0.0, 10.0]), &mut failing)
        .await
        .unwrap();
    assert!(!receipt.colored);

    let path = TilePath::parse("R").unwrap();
    cache
        .with_tile(&path, |tile| {
            assert!(!tile.colored);
            assert!(tile.output_buffer.iter().all(|&v| v == 0.0));
            assert_eq!(tile.output_buffer.len(), 2 * 4);
        })
        .await
        .unwrap();

    // The tile lock was released on the failure path: both a re-push of the
    // same path and a sibling push proceed.
    let mut healthy = ramp_slots();
    cache
        .push(position_tile("R", &[1.0, 2.0], &[0.0, 10.0]), &mut healthy)
        .await
        .unwrap();
    let receipt = cache
        .push(position_tile("R0", &[3.0], &[20.0]), &mut healthy)
        .await
        .unwrap();
    assert!(receipt.colored);
    cache.settle().await;
}

#[tokio::test]
async fn all_invalid_brush_specs_reject_the_push_spec() {
    let result = BrushFactory::create_brushes(&[Some("local://no-such"), Some("garbage")]);
    assert!(result.is_err(), "no usable brush is the one visible failure");
}

#[tokio::test]
async fn serialized_brush_snapshots_round_trip_through_the_factory() {
    let mut brushes = ramp_slots();
    let cache = PointBufferCache::default();
    cache
        .push(position_tile("R", &[0.0], &[0.0, 10.0]), &mut brushes)
        .await
        .unwrap();

    let captured: Vec<Option<SerializedBrush>> =
        cloudbrush::brush::serialize_brushes(&brushes).unwrap();
    let rebuilt = cloudbrush::brush::deserialize_brushes(&captured).unwrap();
    assert_eq!(
        cloudbrush::brush::serialize_brushes(&rebuilt).unwrap(),
        captured
    );
}

#[tokio::test]
async fn render_callback_is_not_fired_by_plain_pushes() {
    let cache = PointBufferCache::default();
    let fired = std::sync::Arc::new(AtomicUsize::new(0));
    let observer = fired.clone();
    cache.set_render_request(move || {
        observer.fetch_add(1, Ordering::SeqCst);
    });

    let mut brushes = ramp_slots();
    cache
        .push(position_tile("R", &[0.0], &[0.0, 10.0]), &mut brushes)
        .await
        .unwrap();
    cache.settle().await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}
