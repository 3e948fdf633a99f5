//! The boundary between the pipeline and tile serialization.
//!
//! The driver turns every surviving feature into a [`FeatureRecord`] and moves
//! it into a [`TileBuilder`]. Builders only accumulate; all bytes are produced
//! by [`TileBuilder::build`]. A [`TileBuilderFactory`] describes one output
//! format: how to create builders and in which space it wants geometries.

use geo::Geometry;

use crate::envelope::{PaintArea, ReferencedEnvelope};
use crate::feature::Properties;
use crate::Result;

/// Everything a builder needs to know about one feature.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub layer: String,
    pub feature_id: String,
    pub geometry_name: String,
    /// Final geometry, in screen or target CRS space depending on the factory
    pub geometry: Geometry<f64>,
    pub properties: Properties,
}

pub trait TileBuilder: Send {
    fn add_feature(&mut self, record: FeatureRecord) -> Result<()>;

    /// Serialize everything added so far.
    fn build(&mut self) -> Result<Vec<u8>>;
}

impl<B: TileBuilder + ?Sized> TileBuilder for Box<B> {
    fn add_feature(&mut self, record: FeatureRecord) -> Result<()> {
        (**self).add_feature(record)
    }

    fn build(&mut self) -> Result<Vec<u8>> {
        (**self).build()
    }
}

pub trait TileBuilderFactory: Send + Sync {
    /// Format names this factory answers to, e.g. `["mvt", "pbf"]`
    fn output_formats(&self) -> &'static [&'static str];

    fn mime_type(&self) -> &'static str;

    /// A fresh builder for one tile, or an error if the format cannot
    /// represent `paint_area`.
    fn new_builder(
        &self,
        paint_area: PaintArea,
        rendering_area: &ReferencedEnvelope,
    ) -> Result<Box<dyn TileBuilder>>;

    /// Whether the paint area should be multiplied by the oversample factors.
    fn should_oversample_scale(&self) -> bool {
        false
    }

    fn oversample_x(&self) -> u32 {
        1
    }

    fn oversample_y(&self) -> u32 {
        1
    }

    /// Geometries in screen pixels (`true`) or in the target CRS (`false`)
    fn transform_to_screen(&self) -> bool;

    /// Default for clipping to the padded tile bounds
    fn clip_to_map_bounds(&self) -> bool;

    fn handles_format(&self, format: &str) -> bool {
        self.output_formats()
            .iter()
            .any(|f| f.eq_ignore_ascii_case(format))
            || self.mime_type().eq_ignore_ascii_case(format)
    }
}
