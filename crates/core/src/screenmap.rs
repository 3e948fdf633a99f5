//! Screen-space skip/coalesce map.
//!
//! Tracks, per pixel of the paint area, whether a sub-pixel geometry has
//! already been emitted there. Geometries whose source-space envelope is
//! smaller than one generalization span on both axes are candidates: the first
//! one to land on a pixel wins and is reduced to a coarse footprint, later
//! ones are dropped.
//!
//! The outcome depends on feature iteration order. There is no canonical order
//! to enforce, so which feature wins a pixel is whatever the source yields
//! first.

use std::sync::Arc;

use geo::{coord, Coord, Geometry, LineString, Polygon};

use crate::crs::CoordinateTransform;
use crate::envelope::{Envelope, PaintArea};
use crate::geometry::GeometryKind;
use crate::Result;

#[derive(Debug, Clone)]
pub struct ScreenMap {
    area: PaintArea,
    pixels: Vec<u64>,
    span_x: f64,
    span_y: f64,
    transform: Option<Arc<dyn CoordinateTransform>>,
}

impl ScreenMap {
    /// An empty map covering `area`. Spans start at zero, so nothing is
    /// simplifiable until [`ScreenMap::set_spans`] is called.
    pub fn new(area: PaintArea) -> Self {
        let cells = area.width as usize * area.height as usize;
        Self {
            area,
            pixels: vec![0; cells.div_ceil(64)],
            span_x: 0.0,
            span_y: 0.0,
            transform: None,
        }
    }

    /// Set the per-axis sizes, in source units, below which an envelope is sub-pixel.
    pub fn set_spans(&mut self, span_x: f64, span_y: f64) {
        self.span_x = span_x;
        self.span_y = span_y;
    }

    pub fn spans(&self) -> (f64, f64) {
        (self.span_x, self.span_y)
    }

    /// Bind the source → screen transform used to locate envelopes.
    pub fn set_transform(&mut self, transform: Arc<dyn CoordinateTransform>) {
        self.transform = Some(transform);
    }

    pub fn paint_area(&self) -> &PaintArea {
        &self.area
    }

    /// Whether an envelope is small enough to be represented by a single pixel.
    pub fn can_simplify(&self, envelope: &Envelope) -> bool {
        envelope.width() < self.span_x && envelope.height() < self.span_y
    }

    /// Mark the pixel under the envelope center.
    ///
    /// Returns `true` if the pixel was already taken. Envelopes that fall
    /// outside the paint area are never recorded and always return `false`.
    pub fn check_and_set(&mut self, envelope: &Envelope) -> Result<bool> {
        let (cx, cy) = envelope.center();
        let center = Coord { x: cx, y: cy };
        let screen = match &self.transform {
            Some(t) => t.transform(center)?,
            None => center,
        };
        let px = screen.x.floor();
        let py = screen.y.floor();
        if !px.is_finite() || !py.is_finite() {
            return Ok(false);
        }
        let Some(index) = self.index(px as i64, py as i64) else {
            return Ok(false);
        };
        let (word, bit) = (index / 64, index % 64);
        let mask = 1u64 << bit;
        if self.pixels[word] & mask != 0 {
            return Ok(true);
        }
        self.pixels[word] |= mask;
        Ok(false)
    }

    /// Whether a screen pixel is taken
    pub fn get(&self, x: i64, y: i64) -> bool {
        match self.index(x, y) {
            Some(index) => self.pixels[index / 64] & (1u64 << (index % 64)) != 0,
            None => false,
        }
    }

    /// Coarse stand-in for a sub-pixel geometry with the given source envelope.
    ///
    /// Lines become the envelope diagonal, polygons the envelope rectangle.
    /// Degenerate extents are widened to the span so the result stays valid.
    pub fn simplified_shape(&self, envelope: &Envelope, kind: GeometryKind) -> Geometry<f64> {
        let mut env = *envelope;
        if env.width() == 0.0 {
            env.min_x -= self.span_x / 2.0;
            env.max_x += self.span_x / 2.0;
        }
        if env.height() == 0.0 {
            env.min_y -= self.span_y / 2.0;
            env.max_y += self.span_y / 2.0;
        }
        match kind {
            GeometryKind::Lineal => Geometry::LineString(LineString::new(vec![
                coord! { x: env.min_x, y: env.min_y },
                coord! { x: env.max_x, y: env.max_y },
            ])),
            GeometryKind::Polygonal | GeometryKind::Collection => {
                Geometry::Polygon(Polygon::new(
                    LineString::new(vec![
                        coord! { x: env.min_x, y: env.min_y },
                        coord! { x: env.max_x, y: env.min_y },
                        coord! { x: env.max_x, y: env.max_y },
                        coord! { x: env.min_x, y: env.max_y },
                        coord! { x: env.min_x, y: env.min_y },
                    ]),
                    vec![],
                ))
            }
            GeometryKind::Puntal => {
                let (x, y) = envelope.center();
                Geometry::Point(geo::Point::new(x, y))
            }
        }
    }

    fn index(&self, x: i64, y: i64) -> Option<usize> {
        let col = x - self.area.x as i64;
        let row = y - self.area.y as i64;
        if col < 0 || row < 0 || col >= self.area.width as i64 || row >= self.area.height as i64
        {
            return None;
        }
        Some(row as usize * self.area.width as usize + col as usize)
    }
}
