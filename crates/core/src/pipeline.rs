//! Tile assembly - wires feature sources, operation chains and tile builders together.
//!
//! For every layer of a [`MapContent`] the renderer:
//! 1. Derives (or reuses, within one request) the [`ChainContext`] for the
//!    layer's source CRS and buffer
//! 2. Queries the feature source for the buffered rendering area
//! 3. Runs each feature through the layer chain and flattens its attributes
//! 4. Hands the result to the tile builder
//!
//! Metatiles query every layer once and render their subtiles in parallel,
//! each with its own chains and builder. When a memory cap is configured all
//! subtile builders charge one shared budget.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use geo::{Geometry, InteriorPoint};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::builder::{FeatureRecord, TileBuilder, TileBuilderFactory};
use crate::chain::{ChainBuilder, OperationChain};
use crate::context::{query_envelope, ChainContext, ContextKey};
use crate::crs::Crs;
use crate::envelope::{Envelope, PaintArea, ReferencedEnvelope};
use crate::feature::{flatten_attributes, Feature, FeatureIter, FeatureSource, Query};
use crate::geometry::{dominant_kind, is_empty, GeometryKind};
use crate::memory::{MemoryGuardedBuilder, MetatileMemoryBudget};
use crate::output::{EncodedTile, MetatileTiles, TileOutput};
use crate::property_filter::PropertyFilter;
use crate::tile::{MetatileLayout, TileCoord};
use crate::{Error, PipelineConfig, Result};

/// Default tile size in pixels
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Suffix of the generated label layer
pub const LABEL_LAYER_SUFFIX: &str = "_labels";

/// Per-layer rendering options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerStyle {
    /// Query and clip buffer in pixels, `None` for the configured default
    pub buffer: Option<f64>,
    /// Attribute allow-list, `None` for all attributes
    pub attributes: Option<Vec<String>>,
    /// Also emit an interior point per polygon into `<layer>_labels`
    pub generate_label_layer: bool,
    /// Attributes carried by label points
    pub label_attributes: Vec<String>,
    /// Ask the source to sort by the allow-listed attributes
    pub coalesce: bool,
}

impl LayerStyle {
    pub fn with_buffer(mut self, buffer: f64) -> Self {
        self.buffer = Some(buffer);
        self
    }

    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = Some(attributes.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_label_layer<I, S>(mut self, label_attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.generate_label_layer = true;
        self.label_attributes = label_attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }
}

/// A named layer backed by a feature source.
#[derive(Clone)]
pub struct MapLayer {
    pub name: String,
    pub source: Arc<dyn FeatureSource>,
    pub style: LayerStyle,
}

impl MapLayer {
    pub fn new(name: impl Into<String>, source: Arc<dyn FeatureSource>) -> Self {
        Self {
            name: name.into(),
            source,
            style: LayerStyle::default(),
        }
    }

    pub fn with_style(mut self, style: LayerStyle) -> Self {
        self.style = style;
        self
    }
}

impl fmt::Debug for MapLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapLayer")
            .field("name", &self.name)
            .field("source_crs", &self.source.crs())
            .field("style", &self.style)
            .finish()
    }
}

/// What to render: an area, its pixel size and the layers drawn into it.
#[derive(Debug, Clone)]
pub struct MapContent {
    pub rendering_area: ReferencedEnvelope,
    pub width: u32,
    pub height: u32,
    pub layers: Vec<MapLayer>,
}

impl MapContent {
    pub fn new(rendering_area: ReferencedEnvelope, width: u32, height: u32) -> Self {
        Self {
            rendering_area,
            width,
            height,
            layers: Vec::new(),
        }
    }

    /// Content for one XYZ tile of `tile_size` pixels.
    pub fn for_tile(tile: TileCoord, tile_size: u32) -> Self {
        Self::new(tile.rendering_area(), tile_size, tile_size)
    }

    /// Content for the metatile whose north-west tile is `origin`.
    pub fn for_metatile(origin: TileCoord, layout: MetatileLayout, tile_size: u32) -> Self {
        Self::new(
            ReferencedEnvelope::new(layout.bounds(origin), Crs::WebMercator),
            tile_size * layout.tiles_wide,
            tile_size * layout.tiles_high,
        )
    }

    pub fn with_layer(mut self, layer: MapLayer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn paint_area(&self) -> PaintArea {
        PaintArea::new(self.width, self.height)
    }
}

/// Counters for one layer of one tile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerStats {
    /// Features handed to the builder
    pub encoded: usize,
    /// Features whose geometry came out empty
    pub empty: usize,
    /// Features skipped because the chain failed
    pub skipped: usize,
    /// Label points handed to the builder
    pub labels: usize,
}

impl LayerStats {
    fn merge(&mut self, other: LayerStats) {
        self.encoded += other.encoded;
        self.empty += other.empty;
        self.skipped += other.skipped;
        self.labels += other.labels;
    }
}

/// Chain contexts of one tile, shared by layers with the same source CRS
/// and buffer. Dropped once the tile is built.
#[derive(Debug, Default)]
struct ContextCache {
    contexts: HashMap<ContextKey, Arc<ChainContext>>,
}

impl ContextCache {
    fn get_or_build<F>(&mut self, key: ContextKey, build: F) -> Result<Arc<ChainContext>>
    where
        F: FnOnce() -> Result<ChainContext>,
    {
        if let Some(context) = self.contexts.get(&key) {
            return Ok(context.clone());
        }
        let context = Arc::new(build()?);
        self.contexts.insert(key, context.clone());
        Ok(context)
    }

    fn len(&self) -> usize {
        self.contexts.len()
    }
}

/// Renders [`MapContent`] with one output format.
pub struct VectorTileRenderer {
    factory: Arc<dyn TileBuilderFactory>,
    config: PipelineConfig,
}

impl fmt::Debug for VectorTileRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorTileRenderer")
            .field("mime_type", &self.factory.mime_type())
            .field("config", &self.config)
            .finish()
    }
}

impl VectorTileRenderer {
    pub fn new(factory: Arc<dyn TileBuilderFactory>, config: PipelineConfig) -> Self {
        Self { factory, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn factory(&self) -> &Arc<dyn TileBuilderFactory> {
        &self.factory
    }

    /// Render the whole content area as a single tile.
    pub fn render_tile(&self, content: &MapContent) -> Result<TileOutput> {
        let paint = self.scaled_paint_area(content.paint_area());
        let budget = self.new_budget();

        let mut stats = LayerStats::default();
        let tile = self.render_area(
            &content.rendering_area,
            paint,
            &content.layers,
            budget,
            &mut stats,
            |_, layer, context| {
                let query = self.layer_query(layer, context.source_query_envelope()?);
                layer.source.features(&query)
            },
        )?;

        log::info!(
            "rendered tile {}x{}: {} features, {} labels, {} empty, {} skipped, {} bytes",
            content.width,
            content.height,
            stats.encoded,
            stats.labels,
            stats.empty,
            stats.skipped,
            tile.len()
        );
        Ok(TileOutput::Single(tile))
    }

    /// Render the content area as a grid of `layout` tiles.
    ///
    /// Each layer is queried once for the whole area. Any subtile failure,
    /// including an exceeded memory cap, fails the metatile.
    pub fn render_metatile(
        &self,
        content: &MapContent,
        layout: MetatileLayout,
    ) -> Result<TileOutput> {
        if content.width % layout.tiles_wide != 0 || content.height % layout.tiles_high != 0 {
            return Err(Error::InvalidConfig(format!(
                "{}x{} pixels do not split into {}x{} tiles",
                content.width, content.height, layout.tiles_wide, layout.tiles_high
            )));
        }

        let full_paint = self.scaled_paint_area(content.paint_area());
        let mut prefetched: Vec<Vec<Feature>> = Vec::with_capacity(content.layers.len());
        for layer in &content.layers {
            let bbox = query_envelope(
                &content.rendering_area,
                full_paint,
                layer.source.crs(),
                self.layer_buffer(&layer.style),
            )?;
            let query = self.layer_query(layer, bbox);
            let features = layer.source.features(&query)?.collect::<Result<Vec<_>>>()?;
            log::debug!(
                "layer {}: {} features for metatile",
                layer.name,
                features.len()
            );
            prefetched.push(features);
        }

        let subtile_paint = self.scaled_paint_area(PaintArea::new(
            content.width / layout.tiles_wide,
            content.height / layout.tiles_high,
        ));
        let crs = content.rendering_area.crs;
        let budget = self.new_budget();

        let rendered: Vec<(EncodedTile, LayerStats)> = layout
            .split(&content.rendering_area.envelope)
            .into_par_iter()
            .map(|envelope| {
                let area = ReferencedEnvelope::new(envelope, crs);
                let mut stats = LayerStats::default();
                let tile = self.render_area(
                    &area,
                    subtile_paint,
                    &content.layers,
                    budget.clone(),
                    &mut stats,
                    |index, _, context| {
                        // only what a single-tile query for this subtile would return
                        let bbox = context.source_query_envelope()?;
                        let features: FeatureIter<'_> = Box::new(
                            prefetched[index]
                                .iter()
                                .filter(move |f| {
                                    f.envelope().is_some_and(|e| bbox.intersects(&e))
                                })
                                .cloned()
                                .map(Ok),
                        );
                        Ok(features)
                    },
                )?;
                Ok((tile, stats))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut stats = LayerStats::default();
        let mut tiles = Vec::with_capacity(rendered.len());
        for (tile, tile_stats) in rendered {
            stats.merge(tile_stats);
            tiles.push(tile);
        }

        let memory = budget
            .as_ref()
            .map(|b| format!(", {} of memory budget", crate::memory::format_bytes(b.used())))
            .unwrap_or_default();
        log::info!(
            "rendered {}x{} metatile: {} features, {} labels, {} empty, {} skipped{}",
            layout.tiles_wide,
            layout.tiles_high,
            stats.encoded,
            stats.labels,
            stats.empty,
            stats.skipped,
            memory
        );

        Ok(TileOutput::Metatile(MetatileTiles::new(layout, tiles)?))
    }

    /// Render every layer into one builder.
    ///
    /// `features_for` yields the features of the layer at the given index.
    fn render_area<'f, F>(
        &self,
        area: &ReferencedEnvelope,
        paint: PaintArea,
        layers: &'f [MapLayer],
        budget: Option<Arc<MetatileMemoryBudget>>,
        stats: &mut LayerStats,
        mut features_for: F,
    ) -> Result<EncodedTile>
    where
        F: FnMut(usize, &'f MapLayer, &ChainContext) -> Result<FeatureIter<'f>>,
    {
        let mut builder = self.new_builder(paint, area, budget)?;
        let mut contexts = ContextCache::default();

        for (index, layer) in layers.iter().enumerate() {
            let buffer = self.layer_buffer(&layer.style);
            let key = ContextKey::new(
                area,
                paint,
                layer.source.crs(),
                self.config.oversampling_factor,
                buffer,
            );
            let context = contexts.get_or_build(key, || {
                self.chain_context(area, paint, layer.source.crs(), buffer)
            })?;
            let features = features_for(index, layer, context.as_ref())?;
            let layer_stats = self.encode_layer(builder.as_mut(), &context, layer, features)?;
            log::debug!(
                "layer {}: {} encoded, {} labels, {} empty, {} skipped",
                layer.name,
                layer_stats.encoded,
                layer_stats.labels,
                layer_stats.empty,
                layer_stats.skipped
            );
            stats.merge(layer_stats);
        }

        log::trace!("{} chain contexts for {} layers", contexts.len(), layers.len());
        let bytes = builder.build()?;
        Ok(EncodedTile::new(bytes, self.factory.mime_type()))
    }

    /// Run one layer's features through its chains into `builder`.
    ///
    /// Chain failures skip the feature; builder and source errors abort.
    pub fn encode_layer(
        &self,
        builder: &mut dyn TileBuilder,
        context: &ChainContext,
        layer: &MapLayer,
        features: FeatureIter<'_>,
    ) -> Result<LayerStats> {
        let mut chain = self.layer_chain(context);
        let mut label_chain = layer
            .style
            .generate_label_layer
            .then(|| self.label_chain(context));
        self.encode_features(builder, &mut chain, label_chain.as_mut(), layer, features)
    }

    /// [`VectorTileRenderer::encode_layer`] with the chains supplied by the caller.
    pub(crate) fn encode_features(
        &self,
        builder: &mut dyn TileBuilder,
        chain: &mut OperationChain,
        mut label_chain: Option<&mut OperationChain>,
        layer: &MapLayer,
        features: FeatureIter<'_>,
    ) -> Result<LayerStats> {
        let filter = PropertyFilter::from_allow_list(layer.style.attributes.as_deref());
        let label_filter = PropertyFilter::include(layer.style.label_attributes.iter().cloned());
        let label_layer = format!("{}{}", layer.name, LABEL_LAYER_SUFFIX);
        let geometry_name = layer.source.geometry_name();

        let mut stats = LayerStats::default();
        for feature in features {
            let feature = feature?;
            let Some(source_geometry) = &feature.geometry else {
                log::trace!("feature {} has no geometry", feature.id);
                stats.empty += 1;
                continue;
            };

            match chain.execute(source_geometry.clone()) {
                Ok(geometry) if is_empty(&geometry) => stats.empty += 1,
                Ok(geometry) => {
                    builder.add_feature(FeatureRecord {
                        layer: layer.name.clone(),
                        feature_id: feature.id.clone(),
                        geometry_name: geometry_name.to_string(),
                        geometry,
                        properties: flatten_attributes(&feature.attributes, geometry_name, &filter),
                    })?;
                    stats.encoded += 1;
                }
                Err(e) => {
                    log::warn!(
                        "skipping feature {} in layer {}: {}",
                        feature.id,
                        layer.name,
                        e
                    );
                    stats.skipped += 1;
                }
            }

            let Some(label_chain) = label_chain.as_mut() else {
                continue;
            };
            if dominant_kind(source_geometry) != Some(GeometryKind::Polygonal) {
                continue;
            }
            let Some(anchor) = source_geometry.interior_point() else {
                continue;
            };
            match label_chain.execute(Geometry::Point(anchor)) {
                Ok(point) if is_empty(&point) => {}
                Ok(point) => {
                    builder.add_feature(FeatureRecord {
                        layer: label_layer.clone(),
                        feature_id: feature.id.clone(),
                        geometry_name: geometry_name.to_string(),
                        geometry: point,
                        properties: flatten_attributes(
                            &feature.attributes,
                            geometry_name,
                            &label_filter,
                        ),
                    })?;
                    stats.labels += 1;
                }
                Err(e) => {
                    log::warn!(
                        "skipping label of feature {} in layer {}: {}",
                        feature.id,
                        layer.name,
                        e
                    );
                }
            }
        }
        Ok(stats)
    }

    fn screen_space(&self) -> bool {
        self.factory.transform_to_screen()
    }

    fn clip_enabled(&self) -> bool {
        self.config
            .clip_to_map_bounds
            .unwrap_or_else(|| self.factory.clip_to_map_bounds())
    }

    /// The full chain used for layer geometries.
    pub fn layer_chain(&self, context: &ChainContext) -> OperationChain {
        let screen = self.screen_space();
        ChainBuilder::new(context)
            .preprocess()
            .transform(screen)
            .clip(self.clip_enabled(), screen)
            .simplify(screen)
            .collapse_collections()
            .build()
    }

    /// Label points need no simplification.
    fn label_chain(&self, context: &ChainContext) -> OperationChain {
        let screen = self.screen_space();
        ChainBuilder::new(context)
            .preprocess()
            .transform(screen)
            .clip(self.clip_enabled(), screen)
            .build()
    }

    fn scaled_paint_area(&self, paint: PaintArea) -> PaintArea {
        if self.factory.should_oversample_scale() {
            paint.scaled(self.factory.oversample_x(), self.factory.oversample_y())
        } else {
            paint
        }
    }

    /// The layer buffer in (possibly oversampled) pixels.
    pub fn layer_buffer(&self, style: &LayerStyle) -> f64 {
        let buffer = style.buffer.unwrap_or(self.config.default_buffer);
        if self.factory.should_oversample_scale() {
            let factor = self.factory.oversample_x().max(self.factory.oversample_y());
            buffer * factor as f64
        } else {
            buffer
        }
    }

    fn layer_query(&self, layer: &MapLayer, bbox: Envelope) -> Query {
        let filter = PropertyFilter::from_allow_list(layer.style.attributes.as_deref());
        let extra: &[String] = if layer.style.generate_label_layer {
            &layer.style.label_attributes
        } else {
            &[]
        };
        let sort_by = match (&layer.style.attributes, layer.style.coalesce) {
            (Some(attributes), true) => attributes.clone(),
            _ => Vec::new(),
        };
        Query::default()
            .with_bbox(bbox)
            .with_property_names(filter.query_names(extra))
            .with_sort_by(sort_by)
    }

    fn new_budget(&self) -> Option<Arc<MetatileMemoryBudget>> {
        self.config
            .max_metatile_memory
            .map(|cap| Arc::new(MetatileMemoryBudget::new(cap)))
    }

    fn new_builder(
        &self,
        paint: PaintArea,
        area: &ReferencedEnvelope,
        budget: Option<Arc<MetatileMemoryBudget>>,
    ) -> Result<Box<dyn TileBuilder>> {
        let inner = self.factory.new_builder(paint, area)?;
        Ok(match budget {
            Some(budget) => Box::new(MemoryGuardedBuilder::new(
                inner,
                budget,
                self.config.cost_model,
            )),
            None => inner,
        })
    }

    /// Chain context for one (area, paint, source CRS, buffer) tuple.
    pub fn chain_context(
        &self,
        area: &ReferencedEnvelope,
        paint: PaintArea,
        source_crs: Crs,
        buffer: f64,
    ) -> Result<ChainContext> {
        ChainContext::new(
            area,
            paint,
            source_crs,
            self.config.oversampling_factor,
            buffer,
        )
    }
}
