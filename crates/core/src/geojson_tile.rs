//! GeoJSON tile output.
//!
//! Geometries stay in the target CRS (no screen transform) and are not
//! clipped unless the pipeline config asks for it. All layers end up in a
//! single `FeatureCollection`; each feature carries its layer name in a
//! `layer` foreign member so consumers can split them again.

use geo::Geometry;
use geojson::{Feature, FeatureCollection, JsonObject, JsonValue};

use crate::builder::{FeatureRecord, TileBuilder, TileBuilderFactory};
use crate::envelope::{PaintArea, ReferencedEnvelope};
use crate::geometry::is_empty;
use crate::{Error, Result};

pub const GEOJSON_MIME_TYPE: &str = "application/json";

/// Collects features into a GeoJSON `FeatureCollection`.
#[derive(Debug, Default)]
pub struct GeoJsonTileBuilder {
    features: Vec<Feature>,
    bbox: Option<Vec<f64>>,
}

impl GeoJsonTileBuilder {
    pub fn new(rendering_area: &ReferencedEnvelope) -> Self {
        let env = &rendering_area.envelope;
        Self {
            features: Vec::new(),
            bbox: Some(vec![env.min_x, env.min_y, env.max_x, env.max_y]),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

fn to_feature(record: FeatureRecord) -> Feature {
    let geometry = match &record.geometry {
        Geometry::GeometryCollection(_) if is_empty(&record.geometry) => None,
        geom => Some(geojson::Geometry::new(geojson::Value::from(geom))),
    };

    let mut properties = JsonObject::new();
    for (name, value) in &record.properties {
        properties.insert(name.clone(), value.to_json());
    }

    let mut foreign_members = JsonObject::new();
    foreign_members.insert("layer".to_string(), JsonValue::String(record.layer));

    Feature {
        bbox: None,
        geometry,
        id: Some(geojson::feature::Id::String(record.feature_id)),
        properties: Some(properties),
        foreign_members: Some(foreign_members),
    }
}

impl TileBuilder for GeoJsonTileBuilder {
    fn add_feature(&mut self, record: FeatureRecord) -> Result<()> {
        self.features.push(to_feature(record));
        Ok(())
    }

    fn build(&mut self) -> Result<Vec<u8>> {
        let collection = FeatureCollection {
            bbox: self.bbox.clone(),
            features: std::mem::take(&mut self.features),
            foreign_members: None,
        };
        serde_json::to_vec(&collection).map_err(|e| Error::Encoding(e.to_string()))
    }
}

/// Factory for GeoJSON output in the target CRS.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoJsonBuilderFactory;

impl TileBuilderFactory for GeoJsonBuilderFactory {
    fn output_formats(&self) -> &'static [&'static str] {
        &["geojson", "json"]
    }

    fn mime_type(&self) -> &'static str {
        GEOJSON_MIME_TYPE
    }

    fn new_builder(
        &self,
        _paint_area: PaintArea,
        rendering_area: &ReferencedEnvelope,
    ) -> Result<Box<dyn TileBuilder>> {
        Ok(Box::new(GeoJsonTileBuilder::new(rendering_area)))
    }

    fn transform_to_screen(&self) -> bool {
        false
    }

    fn clip_to_map_bounds(&self) -> bool {
        false
    }
}
