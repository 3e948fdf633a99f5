//! Per-request chain configuration.
//!
//! A [`ChainContext`] holds everything the operation chain needs to know about
//! one rendering request: the transforms between source, target and screen
//! space, how large one pixel is in each of those spaces, the simplification
//! tolerances derived from that, and a screen map template.
//!
//! Contexts are built once per distinct [`ContextKey`] and are read-only
//! afterwards; every chain built from a context gets its own copy of the
//! screen map.

use std::sync::Arc;

use geo::Coord;

use crate::clip::CLIP_PIXEL_MARGIN;
use crate::crs::{
    concatenate, resolve_transform, transform_envelope, AffineTransform, CoordinateTransform, Crs,
};
use crate::envelope::{Envelope, PaintArea, ReferencedEnvelope};
use crate::projection::ProjectionHandler;
use crate::screenmap::ScreenMap;
use crate::{Error, Result};

/// Pixel span used for source-space generalization distances
pub const SOURCE_GENERALIZATION_SPAN: f64 = 0.8;

/// Pixel span used for target-space generalization distances
pub const TARGET_GENERALIZATION_SPAN: f64 = 1.0;

/// Screen-space simplification tolerance before oversampling, in pixels
pub const SCREEN_SIMPLIFICATION_PIXELS: f64 = 0.25;

#[derive(Debug, Clone)]
pub struct ChainContext {
    pub rendering_area: ReferencedEnvelope,
    pub paint_area: PaintArea,
    pub source_crs: Crs,
    pub projection_handler: Option<ProjectionHandler>,
    pub source_to_target: Arc<dyn CoordinateTransform>,
    pub target_to_screen: Arc<dyn CoordinateTransform>,
    pub source_to_screen: Arc<dyn CoordinateTransform>,
    /// Template, cloned into each chain
    pub screen_map: ScreenMap,
    /// Size of 0.8 pixels in source units, per axis
    pub source_distances: [f64; 2],
    /// Size of one pixel in target units, per axis
    pub target_distances: [f64; 2],
    pub pixel_size_in_target: f64,
    pub screen_simplification_tolerance: f64,
    pub target_simplification_tolerance: f64,
    pub buffer_pixels: f64,
    pub oversample: f64,
}

impl ChainContext {
    /// Derive the chain configuration for one rendering request.
    ///
    /// `oversample` is the simplification divisor: larger values mean finer
    /// generalization. `buffer_pixels` is the layer's query/clip buffer.
    pub fn new(
        rendering_area: &ReferencedEnvelope,
        paint_area: PaintArea,
        source_crs: Crs,
        oversample: f64,
        buffer_pixels: f64,
    ) -> Result<Self> {
        if !(oversample.is_finite() && oversample > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "oversampling factor must be positive, got {}",
                oversample
            )));
        }
        if !(buffer_pixels.is_finite() && buffer_pixels >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "buffer must be non-negative, got {}",
                buffer_pixels
            )));
        }

        let world_to_screen = AffineTransform::world_to_screen(&rendering_area.envelope, &paint_area)?;
        let projection_handler = ProjectionHandler::for_rendering(rendering_area, source_crs);

        let source_to_target = resolve_transform(source_crs, rendering_area.crs)?;
        let target_to_screen: Arc<dyn CoordinateTransform> = Arc::new(world_to_screen);
        let source_to_screen = concatenate(source_to_target.clone(), target_to_screen.clone());

        let source_distances = generalization_distances(
            source_to_screen.inverse()?.as_ref(),
            &paint_area,
            SOURCE_GENERALIZATION_SPAN,
        )?;
        let target_distances = generalization_distances(
            target_to_screen.inverse()?.as_ref(),
            &paint_area,
            TARGET_GENERALIZATION_SPAN,
        )?;

        let pixel_size_in_target = target_distances[0].max(target_distances[1]);
        let screen_simplification_tolerance = SCREEN_SIMPLIFICATION_PIXELS / oversample;
        let target_simplification_tolerance =
            target_distances[0].min(target_distances[1]) / oversample;

        let mut screen_map = ScreenMap::new(paint_area);
        screen_map.set_spans(
            source_distances[0] / oversample,
            source_distances[1] / oversample,
        );
        screen_map.set_transform(source_to_screen.clone());

        log::debug!(
            "chain context for {} from {}: pixel size {:.6}, tolerances screen={:.4} target={:.6}",
            rendering_area.crs,
            source_crs,
            pixel_size_in_target,
            screen_simplification_tolerance,
            target_simplification_tolerance
        );

        Ok(Self {
            rendering_area: *rendering_area,
            paint_area,
            source_crs,
            projection_handler,
            source_to_target,
            target_to_screen,
            source_to_screen,
            screen_map,
            source_distances,
            target_distances,
            pixel_size_in_target,
            screen_simplification_tolerance,
            target_simplification_tolerance,
            buffer_pixels,
            oversample,
        })
    }

    /// Envelope geometries are clipped to, padded by the fixed margin plus the buffer.
    ///
    /// In screen space the padding is in pixels; in CRS space it is converted
    /// with [`ChainContext::pixel_size_in_target`].
    pub fn clip_envelope(&self, screen_space: bool) -> Envelope {
        let padding = CLIP_PIXEL_MARGIN + self.buffer_pixels;
        if screen_space {
            self.paint_area.to_envelope().expanded_by(padding)
        } else {
            self.rendering_area
                .envelope
                .expanded_by(padding * self.pixel_size_in_target)
        }
    }

    /// Query envelope in source CRS: the rendering area grown by the buffer.
    pub fn source_query_envelope(&self) -> Result<Envelope> {
        padded_source_envelope(
            &self.rendering_area.envelope,
            self.buffer_pixels * self.pixel_size_in_target,
            self.source_to_target.as_ref(),
        )
    }

    pub fn key(&self) -> ContextKey {
        ContextKey::new(
            &self.rendering_area,
            self.paint_area,
            self.source_crs,
            self.oversample,
            self.buffer_pixels,
        )
    }
}

/// The envelope [`ChainContext::source_query_envelope`] would return, without
/// allocating the screen map of a full context.
pub fn query_envelope(
    rendering_area: &ReferencedEnvelope,
    paint_area: PaintArea,
    source_crs: Crs,
    buffer_pixels: f64,
) -> Result<Envelope> {
    let world_to_screen = AffineTransform::world_to_screen(&rendering_area.envelope, &paint_area)?;
    let target_distances = generalization_distances(
        &world_to_screen.inverted()?,
        &paint_area,
        TARGET_GENERALIZATION_SPAN,
    )?;
    let pixel_size_in_target = target_distances[0].max(target_distances[1]);
    let source_to_target = resolve_transform(source_crs, rendering_area.crs)?;
    padded_source_envelope(
        &rendering_area.envelope,
        buffer_pixels * pixel_size_in_target,
        source_to_target.as_ref(),
    )
}

fn padded_source_envelope(
    target: &Envelope,
    padding: f64,
    source_to_target: &dyn CoordinateTransform,
) -> Result<Envelope> {
    transform_envelope(
        &target.expanded_by(padding),
        source_to_target.inverse()?.as_ref(),
    )
}

/// Cache key for [`ChainContext`]s. Floats are compared by bit pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextKey {
    area: [u64; 4],
    target_crs: Crs,
    paint_area: PaintArea,
    source_crs: Crs,
    oversample: u64,
    buffer: u64,
}

impl ContextKey {
    pub fn new(
        rendering_area: &ReferencedEnvelope,
        paint_area: PaintArea,
        source_crs: Crs,
        oversample: f64,
        buffer_pixels: f64,
    ) -> Self {
        let env = &rendering_area.envelope;
        Self {
            area: [
                env.min_x.to_bits(),
                env.min_y.to_bits(),
                env.max_x.to_bits(),
                env.max_y.to_bits(),
            ],
            target_crs: rendering_area.crs,
            paint_area,
            source_crs,
            oversample: oversample.to_bits(),
            buffer: buffer_pixels.to_bits(),
        }
    }
}

/// Per-axis size of a `span`-pixel square in the space `screen_to_world` maps to.
///
/// The square is sampled on a 3×3 grid over the paint area and the smallest
/// extent on each axis wins. Samples the inverse cannot map are skipped.
pub fn generalization_distances(
    screen_to_world: &dyn CoordinateTransform,
    paint_area: &PaintArea,
    span: f64,
) -> Result<[f64; 2]> {
    let half = span / 2.0;
    let mut distances = [f64::INFINITY, f64::INFINITY];

    for i in 0..3 {
        for j in 0..3 {
            let x = paint_area.x as f64 + paint_area.width as f64 * i as f64 / 2.0;
            let y = paint_area.y as f64 + paint_area.height as f64 * j as f64 / 2.0;

            let mut sample = Envelope::empty();
            let mut mapped = true;
            for (cx, cy) in [
                (x - half, y - half),
                (x + half, y - half),
                (x + half, y + half),
                (x - half, y + half),
            ] {
                match screen_to_world.transform(Coord { x: cx, y: cy }) {
                    Ok(c) if c.x.is_finite() && c.y.is_finite() => {
                        sample.expand_to_include_point(c.x, c.y)
                    }
                    _ => {
                        mapped = false;
                        break;
                    }
                }
            }
            if mapped {
                distances[0] = distances[0].min(sample.width());
                distances[1] = distances[1].min(sample.height());
            }
        }
    }

    if distances.iter().all(|d| d.is_finite() && *d > 0.0) {
        Ok(distances)
    } else {
        Err(Error::Transform(format!(
            "could not sample a {} pixel span over paint area {:?}",
            span, paint_area
        )))
    }
}
