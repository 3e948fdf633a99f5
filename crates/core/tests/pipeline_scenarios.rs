//! End-to-end rendering scenarios through the public API.

use std::sync::{Arc, Mutex};

use geo::{line_string, point, polygon, Area, Geometry};
use prost::Message;
use tilechain_core::builder::{FeatureRecord, TileBuilder, TileBuilderFactory};
use tilechain_core::feature::FeatureIter;
use tilechain_core::vector_tile::Tile;
use tilechain_core::{
    AttributeValue, Crs, Envelope, Error, Feature, FeatureSource, GeoJsonBuilderFactory,
    LayerStyle, MapContent, MapLayer, MemoryFeatureSource, MetatileLayout, MvtBuilderFactory,
    PaintArea, PipelineConfig, Query, ReferencedEnvelope, TileCoord, VectorTileRenderer,
};

/// Captures every record instead of encoding it.
#[derive(Debug, Default, Clone)]
struct RecordingFactory {
    screen_space: bool,
    records: Arc<Mutex<Vec<FeatureRecord>>>,
}

impl RecordingFactory {
    fn new(screen_space: bool) -> Self {
        Self {
            screen_space,
            records: Arc::default(),
        }
    }

    fn records(&self) -> Vec<FeatureRecord> {
        self.records.lock().unwrap().clone()
    }
}

struct RecordingBuilder {
    records: Arc<Mutex<Vec<FeatureRecord>>>,
    added: usize,
}

impl TileBuilder for RecordingBuilder {
    fn add_feature(&mut self, record: FeatureRecord) -> tilechain_core::Result<()> {
        self.records.lock().unwrap().push(record);
        self.added += 1;
        Ok(())
    }

    fn build(&mut self) -> tilechain_core::Result<Vec<u8>> {
        Ok(self.added.to_string().into_bytes())
    }
}

impl TileBuilderFactory for RecordingFactory {
    fn output_formats(&self) -> &'static [&'static str] {
        &["recording"]
    }

    fn mime_type(&self) -> &'static str {
        "text/plain"
    }

    fn new_builder(
        &self,
        _paint_area: PaintArea,
        _rendering_area: &ReferencedEnvelope,
    ) -> tilechain_core::Result<Box<dyn TileBuilder>> {
        Ok(Box::new(RecordingBuilder {
            records: self.records.clone(),
            added: 0,
        }))
    }

    fn transform_to_screen(&self) -> bool {
        self.screen_space
    }

    fn clip_to_map_bounds(&self) -> bool {
        false
    }
}

/// Remembers the last query it answered.
struct QueryRecordingSource {
    inner: MemoryFeatureSource,
    last_query: Mutex<Option<Query>>,
}

impl FeatureSource for QueryRecordingSource {
    fn crs(&self) -> Crs {
        self.inner.crs()
    }

    fn geometry_name(&self) -> &str {
        self.inner.geometry_name()
    }

    fn features(&self, query: &Query) -> tilechain_core::Result<FeatureIter<'_>> {
        *self.last_query.lock().unwrap() = Some(query.clone());
        self.inner.features(query)
    }
}

/// Yields one feature, then fails.
struct FailingSource;

impl FeatureSource for FailingSource {
    fn crs(&self) -> Crs {
        Crs::WebMercator
    }

    fn geometry_name(&self) -> &str {
        "geometry"
    }

    fn features(&self, _query: &Query) -> tilechain_core::Result<FeatureIter<'_>> {
        let items = vec![
            Ok(Feature::new("ok", Geometry::Point(point!(x: 10.0, y: 10.0)))),
            Err(Error::FeatureSource("connection reset".to_string())),
        ];
        Ok(Box::new(items.into_iter()))
    }
}

fn square(min_x: f64, min_y: f64, size: f64) -> Geometry<f64> {
    Geometry::Polygon(polygon![
        (x: min_x, y: min_y),
        (x: min_x + size, y: min_y),
        (x: min_x + size, y: min_y + size),
        (x: min_x, y: min_y + size),
        (x: min_x, y: min_y),
    ])
}

fn mercator_source(features: Vec<Feature>) -> Arc<dyn FeatureSource> {
    Arc::new(MemoryFeatureSource::new(Crs::WebMercator, features))
}

fn local_area(size: f64) -> ReferencedEnvelope {
    ReferencedEnvelope::new(Envelope::new(0.0, 0.0, size, size), Crs::WebMercator)
}

#[test]
fn test_crs_mode_square_is_preserved() {
    let factory = RecordingFactory::new(false);
    let renderer = VectorTileRenderer::new(Arc::new(factory.clone()), PipelineConfig::default());

    let input = square(100.0, 100.0, 100.0);
    let content = MapContent::new(local_area(1000.0), 256, 256).with_layer(MapLayer::new(
        "squares",
        mercator_source(vec![Feature::new("squares.1", input.clone())]),
    ));

    let output = renderer.render_tile(&content).unwrap();
    assert_eq!(output.as_single().unwrap().bytes, b"1".to_vec());

    let records = factory.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].layer, "squares");
    assert_eq!(records[0].feature_id, "squares.1");
    assert_eq!(records[0].geometry_name, "geometry");
    assert!(matches!(records[0].geometry, Geometry::Polygon(_)));
    assert!((records[0].geometry.unsigned_area() - 10_000.0).abs() < 1e-6);
    assert_eq!(records[0].geometry, input);
}

#[test]
fn test_two_points_in_one_pixel_yield_one_record() {
    let factory = RecordingFactory::new(true);
    let renderer = VectorTileRenderer::new(Arc::new(factory.clone()), PipelineConfig::default());

    // one meter per pixel
    let features = vec![
        Feature::new("p.1", Geometry::Point(point!(x: 10.2, y: 10.3))),
        Feature::new("p.2", Geometry::Point(point!(x: 10.6, y: 10.7))),
        Feature::new("p.3", Geometry::Point(point!(x: 100.5, y: 100.5))),
    ];
    let content = MapContent::new(local_area(256.0), 256, 256)
        .with_layer(MapLayer::new("points", mercator_source(features)));
    renderer.render_tile(&content).unwrap();

    let ids: Vec<String> = factory.records().into_iter().map(|r| r.feature_id).collect();
    assert_eq!(ids, vec!["p.1".to_string(), "p.3".to_string()]);
}

#[test]
fn test_screen_mode_flips_y() {
    let factory = RecordingFactory::new(true);
    let renderer = VectorTileRenderer::new(Arc::new(factory.clone()), PipelineConfig::default());

    let content = MapContent::new(local_area(256.0), 256, 256).with_layer(MapLayer::new(
        "points",
        mercator_source(vec![Feature::new("p", Geometry::Point(point!(x: 16.0, y: 32.0)))]),
    ));
    renderer.render_tile(&content).unwrap();

    let records = factory.records();
    let Geometry::Point(p) = records[0].geometry else {
        panic!("expected a point, got {:?}", records[0].geometry);
    };
    assert!((p.x() - 16.0).abs() < 1e-9);
    assert!((p.y() - 224.0).abs() < 1e-9);
}

#[test]
fn test_clip_override_applies_to_crs_mode() {
    let factory = RecordingFactory::new(false);
    let renderer = VectorTileRenderer::new(
        Arc::new(factory.clone()),
        PipelineConfig::default().with_clip_to_map_bounds(true),
    );

    // 1000 m over 250 px: 4 m per pixel, 48 m of padding
    let content = MapContent::new(local_area(1000.0), 250, 250).with_layer(MapLayer::new(
        "big",
        mercator_source(vec![Feature::new("big.1", square(-5000.0, -5000.0, 10_000.0))]),
    ));
    renderer.render_tile(&content).unwrap();

    let records = factory.records();
    assert_eq!(records.len(), 1);
    let area = records[0].geometry.unsigned_area();
    assert!((area - 1096.0 * 1096.0).abs() < 1.0, "clipped area was {}", area);
}

#[test]
fn test_geojson_tile_from_wgs84_source() {
    let geojson = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "id": "cities.1",
             "geometry": {"type": "Point", "coordinates": [90.0, 0.0]},
             "properties": {"name": "East", "meta": {"rank": 2}}}
        ]
    }"#;
    let source = MemoryFeatureSource::from_geojson_str(geojson, Crs::Wgs84).unwrap();
    let content = MapContent::for_tile(TileCoord::new(0, 0, 0), 256)
        .with_layer(MapLayer::new("cities", Arc::new(source)));

    let renderer = VectorTileRenderer::new(Arc::new(GeoJsonBuilderFactory), PipelineConfig::default());
    let output = renderer.render_tile(&content).unwrap();
    let tile = output.as_single().unwrap();
    assert_eq!(tile.mime_type, "application/json");

    let parsed: geojson::GeoJson = std::str::from_utf8(&tile.bytes).unwrap().parse().unwrap();
    let geojson::GeoJson::FeatureCollection(fc) = parsed else {
        panic!("expected a feature collection");
    };
    assert_eq!(fc.features.len(), 1);
    let feature = &fc.features[0];
    assert_eq!(feature.property("name"), Some(&serde_json::json!("East")));
    assert_eq!(feature.property("meta.rank"), Some(&serde_json::json!(2)));

    let geometry = Geometry::<f64>::try_from(feature.geometry.clone().unwrap()).unwrap();
    let Geometry::Point(p) = geometry else {
        panic!("expected a point");
    };
    assert!((p.x() - 10_018_754.171394622).abs() < 1e-3);
    assert!(p.y().abs() < 1e-6);
}

#[test]
fn test_mvt_tile_end_to_end() {
    let features = vec![
        Feature::new("roads.7", Geometry::LineString(geo::line_string![
            (x: 1_000_000.0, y: 1_000_000.0),
            (x: 5_000_000.0, y: 3_000_000.0),
        ]))
        .with_attribute("kind", AttributeValue::String("primary".into())),
    ];
    let content = MapContent::for_tile(TileCoord::new(1, 0, 1), 256)
        .with_layer(MapLayer::new("roads", mercator_source(features)));

    let renderer = VectorTileRenderer::new(Arc::new(MvtBuilderFactory), PipelineConfig::default());
    let output = renderer.render_tile(&content).unwrap();
    let tile = Tile::decode(output.as_single().unwrap().bytes.as_slice()).unwrap();

    assert_eq!(tile.layers.len(), 1);
    let layer = &tile.layers[0];
    assert_eq!(layer.version, 2);
    assert_eq!(layer.features.len(), 1);
    assert_eq!(layer.features[0].id, Some(7));
    assert_eq!(layer.keys, vec!["kind".to_string()]);
    assert_eq!(layer.values[0].string_value.as_deref(), Some("primary"));
}

#[test]
fn test_layer_query_uses_buffer_allow_list_and_labels() {
    let source = Arc::new(QueryRecordingSource {
        inner: MemoryFeatureSource::new(Crs::WebMercator, Vec::new()),
        last_query: Mutex::new(None),
    });
    let style = LayerStyle::default()
        .with_buffer(10.0)
        .with_attributes(["kind", "name"])
        .with_label_layer(["label"])
        .with_coalesce(true);
    let content = MapContent::new(local_area(256.0), 256, 256)
        .with_layer(MapLayer::new("l", source.clone()).with_style(style));

    let renderer = VectorTileRenderer::new(Arc::new(GeoJsonBuilderFactory), PipelineConfig::default());
    renderer.render_tile(&content).unwrap();

    let query = source.last_query.lock().unwrap().clone().unwrap();
    assert_eq!(
        query.property_names,
        Some(vec!["kind".to_string(), "label".to_string(), "name".to_string()])
    );
    assert_eq!(query.sort_by, vec!["kind".to_string(), "name".to_string()]);
    let bbox = query.bbox.unwrap();
    assert!((bbox.min_x + 10.0).abs() < 1e-6, "bbox was {:?}", bbox);
    assert!((bbox.max_y - 266.0).abs() < 1e-6, "bbox was {:?}", bbox);
}

#[test]
fn test_feature_source_errors_are_fatal() {
    let content = MapContent::new(local_area(256.0), 256, 256)
        .with_layer(MapLayer::new("broken", Arc::new(FailingSource)));
    let renderer = VectorTileRenderer::new(Arc::new(MvtBuilderFactory), PipelineConfig::default());
    let err = renderer.render_tile(&content).unwrap_err();
    assert!(matches!(err, Error::FeatureSource(_)));
}

fn quadrant_points() -> Vec<Feature> {
    let c = 10_000_000.0;
    vec![
        Feature::new("q.1", Geometry::Point(point!(x: -c, y: c))),
        Feature::new("q.2", Geometry::Point(point!(x: c, y: c))),
        Feature::new("q.3", Geometry::Point(point!(x: -c, y: -c))),
        Feature::new("q.4", Geometry::Point(point!(x: c, y: -c))),
    ]
}

#[test]
fn test_metatile_splits_features_by_subtile() {
    let layout = MetatileLayout::square(2).unwrap();
    let content = MapContent::for_metatile(TileCoord::new(0, 0, 1), layout, 256)
        .with_layer(MapLayer::new("q", mercator_source(quadrant_points())));

    let renderer = VectorTileRenderer::new(
        Arc::new(MvtBuilderFactory),
        PipelineConfig::default().with_max_metatile_memory(1 << 20),
    );
    let output = renderer.render_metatile(&content, layout).unwrap();
    let meta = output.as_metatile().unwrap();
    assert_eq!(meta.len(), 4);

    let expected = [((0, 0), 1), ((1, 0), 2), ((0, 1), 3), ((1, 1), 4)];
    for ((dx, dy), id) in expected {
        let tile = Tile::decode(meta.get(dx, dy).unwrap().bytes.as_slice()).unwrap();
        assert_eq!(tile.layers.len(), 1, "subtile ({}, {})", dx, dy);
        let ids: Vec<Option<u64>> = tile.layers[0].features.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![Some(id)], "subtile ({}, {})", dx, dy);
        assert_eq!(tile.layers[0].extent, Some(4096));
    }
}

#[test]
fn test_metatile_memory_cap_fails_the_metatile() {
    let layout = MetatileLayout::square(2).unwrap();
    let content = MapContent::for_metatile(TileCoord::new(0, 0, 1), layout, 256)
        .with_layer(MapLayer::new("q", mercator_source(quadrant_points())));

    // each point costs 64 + 3 + 16 bytes
    let renderer = VectorTileRenderer::new(
        Arc::new(MvtBuilderFactory),
        PipelineConfig::default().with_max_metatile_memory(100),
    );
    match renderer.render_metatile(&content, layout) {
        Err(Error::MemoryCapExceeded { attempted, cap }) => {
            assert_eq!(cap, 100);
            assert_eq!(attempted, 166);
        }
        other => panic!("expected MemoryCapExceeded, got {:?}", other.map(|o| o.tile_count())),
    }
}
