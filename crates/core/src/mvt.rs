//! MVT (Mapbox Vector Tile) encoding.
//!
//! The MVT builder works in screen space: the chain has already transformed
//! and clipped every geometry into the (oversampled) paint area, so encoding
//! only has to round to integer tile units. The tile extent is the paint area
//! width, 4096 for a 256 pixel tile oversampled 16 times.
//!
//! - **Zigzag encoding**: signed deltas as unsigned varints
//! - **Command encoding**: MoveTo, LineTo, ClosePath with repeat counts
//! - **Layer encoding**: features grouped per layer with deduplicated keys/values
//!
//! Reference: <https://github.com/mapbox/vector-tile-spec>

use std::collections::HashMap;

use geo::orient::{Direction, Orient};
use geo::{Coord, Geometry, LineString, Polygon};
use prost::Message;

use crate::builder::{FeatureRecord, TileBuilder, TileBuilderFactory};
use crate::envelope::{PaintArea, ReferencedEnvelope};
use crate::feature::{Feature as SourceFeature, PropertyValue};
use crate::vector_tile::tile::{Feature, GeomType, Layer, Value};
use crate::vector_tile::Tile;
use crate::{Error, Result};

/// Default tile extent (4096 as per MVT spec)
pub const DEFAULT_EXTENT: u32 = 4096;

/// Oversampling applied by [`MvtBuilderFactory`] on each axis
pub const MVT_OVERSAMPLE: u32 = 16;

pub const MVT_MIME_TYPE: &str = "application/vnd.mapbox-vector-tile";

const CMD_MOVE_TO: u32 = 1;
const CMD_LINE_TO: u32 = 2;
const CMD_CLOSE_PATH: u32 = 7;

/// Encode a signed integer using zigzag encoding.
///
/// - 0 → 0
/// - -1 → 1
/// - 1 → 2
/// - -2 → 3
#[inline]
pub fn zigzag_encode(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

#[inline]
pub fn zigzag_decode(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

/// Pack a command with a repeat count: `(command_id | (count << 3))`
#[inline]
pub fn command_encode(command_id: u32, count: u32) -> u32 {
    (command_id & 0x7) | (count << 3)
}

/// Unpack a command into (command_id, count).
#[inline]
pub fn command_decode(command: u32) -> (u32, u32) {
    (command & 0x7, command >> 3)
}

#[inline]
fn tile_position(c: &Coord<f64>) -> (i32, i32) {
    (c.x.round() as i32, c.y.round() as i32)
}

/// Integer positions of a path with consecutive duplicates removed.
fn tile_path(coords: &[Coord<f64>]) -> Vec<(i32, i32)> {
    let mut path: Vec<(i32, i32)> = coords.iter().map(tile_position).collect();
    path.dedup();
    path
}

/// Command stream for one feature. The cursor carries over between parts.
#[derive(Debug, Default)]
struct CommandWriter {
    commands: Vec<u32>,
    cursor: (i32, i32),
}

impl CommandWriter {
    fn push_position(&mut self, (x, y): (i32, i32)) {
        self.commands.push(zigzag_encode(x - self.cursor.0));
        self.commands.push(zigzag_encode(y - self.cursor.1));
        self.cursor = (x, y);
    }

    fn points(&mut self, positions: &[(i32, i32)]) {
        if positions.is_empty() {
            return;
        }
        self.commands
            .push(command_encode(CMD_MOVE_TO, positions.len() as u32));
        for &p in positions {
            self.push_position(p);
        }
    }

    fn line(&mut self, path: &[(i32, i32)]) -> bool {
        if path.len() < 2 {
            return false;
        }
        self.commands.push(command_encode(CMD_MOVE_TO, 1));
        self.push_position(path[0]);
        self.commands
            .push(command_encode(CMD_LINE_TO, (path.len() - 1) as u32));
        for &p in &path[1..] {
            self.push_position(p);
        }
        true
    }

    /// Write a closed ring; the closing vertex is implied by ClosePath.
    fn ring(&mut self, ring: &LineString<f64>) -> bool {
        let mut path = tile_path(&ring.0);
        if path.len() > 1 && path.first() == path.last() {
            path.pop();
        }
        if path.len() < 3 {
            return false;
        }
        self.commands.push(command_encode(CMD_MOVE_TO, 1));
        self.push_position(path[0]);
        self.commands
            .push(command_encode(CMD_LINE_TO, (path.len() - 1) as u32));
        for &p in &path[1..] {
            self.push_position(p);
        }
        self.commands.push(command_encode(CMD_CLOSE_PATH, 1));
        true
    }

    /// Exterior rings get positive area in tile coordinates (Y down), holes
    /// negative. A polygon whose exterior collapses is dropped with its holes.
    fn polygon(&mut self, polygon: &Polygon<f64>) {
        let oriented = polygon.orient(Direction::Default);
        if !self.ring(oriented.exterior()) {
            return;
        }
        for interior in oriented.interiors() {
            self.ring(interior);
        }
    }
}

/// Encode a screen-space geometry into MVT commands.
///
/// Returns `None` when nothing drawable remains after rounding. Collections
/// must be split by the caller.
pub fn encode_geometry(geom: &Geometry<f64>) -> Option<(Vec<u32>, GeomType)> {
    let mut writer = CommandWriter::default();
    let geom_type = match geom {
        Geometry::Point(p) => {
            writer.points(&[tile_position(&p.0)]);
            GeomType::Point
        }
        Geometry::MultiPoint(mp) => {
            let positions: Vec<(i32, i32)> = mp.0.iter().map(|p| tile_position(&p.0)).collect();
            writer.points(&positions);
            GeomType::Point
        }
        Geometry::Line(line) => {
            writer.line(&tile_path(&[line.start, line.end]));
            GeomType::Linestring
        }
        Geometry::LineString(ls) => {
            writer.line(&tile_path(&ls.0));
            GeomType::Linestring
        }
        Geometry::MultiLineString(mls) => {
            for ls in &mls.0 {
                writer.line(&tile_path(&ls.0));
            }
            GeomType::Linestring
        }
        Geometry::Polygon(p) => {
            writer.polygon(p);
            GeomType::Polygon
        }
        Geometry::MultiPolygon(mp) => {
            for p in &mp.0 {
                writer.polygon(p);
            }
            GeomType::Polygon
        }
        Geometry::Rect(r) => {
            writer.polygon(&r.to_polygon());
            GeomType::Polygon
        }
        Geometry::Triangle(t) => {
            writer.polygon(&t.to_polygon());
            GeomType::Polygon
        }
        Geometry::GeometryCollection(_) => return None,
    };
    if writer.commands.is_empty() {
        None
    } else {
        Some((writer.commands, geom_type))
    }
}

/// Convert to MVT Value type. MVT has no null, so `Null` yields `None`.
pub fn to_mvt_value(value: &PropertyValue) -> Option<Value> {
    let value = match value {
        PropertyValue::Null => return None,
        PropertyValue::String(s) => Value {
            string_value: Some(s.clone()),
            ..Default::default()
        },
        PropertyValue::Double(d) => Value {
            double_value: Some(*d),
            ..Default::default()
        },
        PropertyValue::Int(i) => Value {
            sint_value: Some(*i),
            ..Default::default()
        },
        PropertyValue::UInt(u) => Value {
            uint_value: Some(*u),
            ..Default::default()
        },
        PropertyValue::Bool(b) => Value {
            bool_value: Some(*b),
            ..Default::default()
        },
    };
    Some(value)
}

/// Accumulates the features of one MVT layer.
#[derive(Debug)]
pub struct LayerBuilder {
    name: String,
    extent: u32,
    features: Vec<Feature>,
    keys: Vec<String>,
    key_index: HashMap<String, u32>,
    values: Vec<Value>,
    value_index: HashMap<String, u32>,
}

impl LayerBuilder {
    pub fn new(name: impl Into<String>, extent: u32) -> Self {
        Self {
            name: name.into(),
            extent,
            features: Vec::new(),
            keys: Vec::new(),
            key_index: HashMap::new(),
            values: Vec::new(),
            value_index: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    fn key(&mut self, key: &str) -> u32 {
        if let Some(&idx) = self.key_index.get(key) {
            return idx;
        }
        let idx = self.keys.len() as u32;
        self.keys.push(key.to_string());
        self.key_index.insert(key.to_string(), idx);
        idx
    }

    fn value(&mut self, value: Value) -> u32 {
        // Debug output is stable and distinguishes variants
        let value_key = format!("{:?}", value);
        if let Some(&idx) = self.value_index.get(&value_key) {
            return idx;
        }
        let idx = self.values.len() as u32;
        self.values.push(value);
        self.value_index.insert(value_key, idx);
        idx
    }

    /// Add one feature. Collections are written as one feature per member,
    /// all sharing id and tags. Returns the number of features written.
    pub fn add_feature(
        &mut self,
        id: Option<u64>,
        geometry: &Geometry<f64>,
        properties: &[(String, PropertyValue)],
    ) -> usize {
        if let Geometry::GeometryCollection(gc) = geometry {
            return gc
                .0
                .iter()
                .map(|member| self.add_feature(id, member, properties))
                .sum();
        }

        let Some((commands, geom_type)) = encode_geometry(geometry) else {
            return 0;
        };

        let mut tags = Vec::with_capacity(properties.len() * 2);
        for (key, value) in properties {
            let Some(value) = to_mvt_value(value) else {
                continue;
            };
            let key_idx = self.key(key);
            let value_idx = self.value(value);
            tags.push(key_idx);
            tags.push(value_idx);
        }

        self.features.push(Feature {
            id,
            tags,
            r#type: Some(geom_type as i32),
            geometry: commands,
        });
        1
    }

    pub fn build(self) -> Layer {
        Layer {
            version: 2,
            name: self.name,
            features: self.features,
            keys: self.keys,
            values: self.values,
            extent: Some(self.extent),
        }
    }
}

/// [`TileBuilder`] producing protobuf-encoded MVT bytes.
#[derive(Debug)]
pub struct MvtTileBuilder {
    extent: u32,
    layers: Vec<LayerBuilder>,
}

impl MvtTileBuilder {
    pub fn new(extent: u32) -> Self {
        Self {
            extent,
            layers: Vec::new(),
        }
    }

    fn layer_mut(&mut self, name: &str) -> &mut LayerBuilder {
        let idx = match self.layers.iter().position(|l| l.name() == name) {
            Some(idx) => idx,
            None => {
                self.layers.push(LayerBuilder::new(name, self.extent));
                self.layers.len() - 1
            }
        };
        &mut self.layers[idx]
    }
}

impl TileBuilder for MvtTileBuilder {
    fn add_feature(&mut self, record: FeatureRecord) -> Result<()> {
        let id = SourceFeature::numeric_id(&record.feature_id);
        let written = self
            .layer_mut(&record.layer)
            .add_feature(id, &record.geometry, &record.properties);
        if written == 0 {
            log::trace!(
                "feature {} collapsed below one tile unit, not written",
                record.feature_id
            );
        }
        Ok(())
    }

    fn build(&mut self) -> Result<Vec<u8>> {
        let layers: Vec<Layer> = std::mem::take(&mut self.layers)
            .into_iter()
            .filter(|l| !l.is_empty())
            .map(LayerBuilder::build)
            .collect();
        let tile = Tile { layers };
        Ok(tile.encode_to_vec())
    }
}

/// Factory for MVT output: screen space, clipped, oversampled 16×.
#[derive(Debug, Clone, Copy, Default)]
pub struct MvtBuilderFactory;

impl TileBuilderFactory for MvtBuilderFactory {
    fn output_formats(&self) -> &'static [&'static str] {
        &["mvt", "pbf"]
    }

    fn mime_type(&self) -> &'static str {
        MVT_MIME_TYPE
    }

    /// MVT layers carry a single extent, so the paint area must be square.
    fn new_builder(
        &self,
        paint_area: PaintArea,
        _rendering_area: &ReferencedEnvelope,
    ) -> Result<Box<dyn TileBuilder>> {
        if paint_area.width != paint_area.height {
            return Err(Error::InvalidConfig(format!(
                "MVT tiles must be square, got {}x{} pixels",
                paint_area.width, paint_area.height
            )));
        }
        Ok(Box::new(MvtTileBuilder::new(paint_area.width)))
    }

    fn should_oversample_scale(&self) -> bool {
        true
    }

    fn oversample_x(&self) -> u32 {
        MVT_OVERSAMPLE
    }

    fn oversample_y(&self) -> u32 {
        MVT_OVERSAMPLE
    }

    fn transform_to_screen(&self) -> bool {
        true
    }

    fn clip_to_map_bounds(&self) -> bool {
        true
    }
}
