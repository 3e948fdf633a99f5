#![recursion_limit = "256"]
//! Core library for turning vector features into vector tiles.
//!
//! Features are pulled from a [`FeatureSource`], pushed through a per-layer
//! operation chain (projection pre-processing, sub-pixel dedup, reprojection,
//! clipping, simplification) and handed to a [`TileBuilder`] that serializes
//! them, either as Mapbox Vector Tiles in screen space or as GeoJSON in the
//! target CRS.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use tilechain_core::{
//!     Crs, MapContent, MapLayer, MemoryFeatureSource, MvtBuilderFactory, PipelineConfig,
//!     TileCoord, VectorTileRenderer,
//! };
//!
//! let geojson = std::fs::read_to_string("roads.geojson").unwrap();
//! let source = MemoryFeatureSource::from_geojson_str(&geojson, Crs::Wgs84).unwrap();
//!
//! let content = MapContent::for_tile(TileCoord::new(1, 0, 1), 256)
//!     .with_layer(MapLayer::new("roads", Arc::new(source)));
//!
//! let renderer = VectorTileRenderer::new(Arc::new(MvtBuilderFactory), PipelineConfig::default());
//! let output = renderer.render_tile(&content).unwrap();
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// Include the protobuf-generated code
pub mod vector_tile {
    include!(concat!(env!("OUT_DIR"), "/vector_tile.rs"));
}

pub mod builder;
pub mod chain;
pub mod clip;
pub mod context;
pub mod crs;
pub mod envelope;
pub mod feature;
pub mod geojson_tile;
pub mod geometry;
pub mod memory;
pub mod mvt;
pub mod output;
pub mod pipeline;
pub mod projection;
pub mod property_filter;
pub mod screenmap;
pub mod simplify;
pub mod tile;
pub mod validate;

pub use builder::{FeatureRecord, TileBuilder, TileBuilderFactory};
pub use chain::{ChainBuilder, OperationChain, Stage};
pub use context::ChainContext;
pub use crs::Crs;
pub use envelope::{Envelope, PaintArea, ReferencedEnvelope};
pub use feature::{AttributeValue, Feature, FeatureSource, MemoryFeatureSource, PropertyValue, Query};
pub use geojson_tile::GeoJsonBuilderFactory;
pub use memory::{CostModel, MemoryGuardedBuilder, MetatileMemoryBudget};
pub use mvt::MvtBuilderFactory;
pub use output::{EncodedTile, MetatileTiles, TileOutput};
pub use pipeline::{LayerStyle, MapContent, MapLayer, VectorTileRenderer};
pub use tile::{MetatileLayout, TileCoord};

/// Errors that can occur while rendering vector tiles
#[derive(Error, Debug)]
pub enum Error {
    #[error("No transform from {from} to {to}")]
    TransformResolution { from: Crs, to: Crs },

    #[error("Coordinate transform failed: {0}")]
    Transform(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Metatile memory cap exceeded: {attempted} bytes attempted, cap is {cap} bytes")]
    MemoryCapExceeded { attempted: u64, cap: u64 },

    #[error("Feature source failed: {0}")]
    FeatureSource(String),

    #[error("Tile encoding failed: {0}")]
    Encoding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Default simplification divisor
pub const DEFAULT_OVERSAMPLING_FACTOR: f64 = 2.0;

/// Rendering options shared by every request of a [`VectorTileRenderer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Divides the simplification tolerances; larger means finer output
    pub oversampling_factor: f64,
    /// Overrides the output format's clipping default when set
    pub clip_to_map_bounds: Option<bool>,
    /// Byte cap per metatile, `None` disables the memory guard
    pub max_metatile_memory: Option<u64>,
    pub cost_model: CostModel,
    /// Buffer in pixels for layers whose style sets none
    pub default_buffer: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            oversampling_factor: DEFAULT_OVERSAMPLING_FACTOR,
            clip_to_map_bounds: None,
            max_metatile_memory: None,
            cost_model: CostModel::default(),
            default_buffer: 0.0,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    /// Reject values no chain context could be built from.
    pub fn validate(&self) -> Result<()> {
        if !(self.oversampling_factor.is_finite() && self.oversampling_factor > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "oversampling_factor must be positive, got {}",
                self.oversampling_factor
            )));
        }
        if !(self.default_buffer.is_finite() && self.default_buffer >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "default_buffer must be non-negative, got {}",
                self.default_buffer
            )));
        }
        Ok(())
    }

    pub fn with_oversampling_factor(mut self, factor: f64) -> Self {
        self.oversampling_factor = factor;
        self
    }

    pub fn with_clip_to_map_bounds(mut self, clip: bool) -> Self {
        self.clip_to_map_bounds = Some(clip);
        self
    }

    pub fn with_max_metatile_memory(mut self, bytes: u64) -> Self {
        self.max_metatile_memory = Some(bytes);
        self
    }

    pub fn with_cost_model(mut self, cost_model: CostModel) -> Self {
        self.cost_model = cost_model;
        self
    }

    pub fn with_default_buffer(mut self, pixels: f64) -> Self {
        self.default_buffer = pixels;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.oversampling_factor, 2.0);
        assert_eq!(config.clip_to_map_bounds, None);
        assert_eq!(config.max_metatile_memory, None);
        assert_eq!(config.default_buffer, 0.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_json_partial() {
        let config = PipelineConfig::from_json_str(
            r#"{"max_metatile_memory": 1048576, "cost_model": {"feature_overhead": 128}}"#,
        )
        .unwrap();
        assert_eq!(config.max_metatile_memory, Some(1_048_576));
        assert_eq!(config.cost_model.feature_overhead, 128);
        assert_eq!(config.cost_model.point_bytes, CostModel::default().point_bytes);
        assert_eq!(config.oversampling_factor, DEFAULT_OVERSAMPLING_FACTOR);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let err = PipelineConfig::from_json_str(r#"{"oversampling_factor": 0.0}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let err = PipelineConfig::from_json_str(r#"{"default_buffer": -1.0}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let err = PipelineConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_config_builders() {
        let config = PipelineConfig::default()
            .with_oversampling_factor(4.0)
            .with_clip_to_map_bounds(false)
            .with_max_metatile_memory(1000)
            .with_default_buffer(8.0);
        assert_eq!(config.oversampling_factor, 4.0);
        assert_eq!(config.clip_to_map_bounds, Some(false));
        assert_eq!(config.max_metatile_memory, Some(1000));
        assert_eq!(config.default_buffer, 8.0);
    }

    #[test]
    fn test_config_file_missing() {
        let err = PipelineConfig::from_json_file("/nonexistent/tilechain.json").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_messages() {
        let err = Error::MemoryCapExceeded {
            attempted: 1200,
            cap: 1000,
        };
        assert!(err.to_string().contains("1200"));
        let err = Error::TransformResolution {
            from: Crs::Epsg(27700),
            to: Crs::WebMercator,
        };
        assert!(err.to_string().contains("EPSG:27700"));
    }
}
