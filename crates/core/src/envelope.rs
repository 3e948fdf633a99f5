//! Envelopes and paint rectangles.
//!
//! An [`Envelope`] is an axis-aligned box in some coordinate space (source CRS,
//! target CRS or screen pixels). A [`ReferencedEnvelope`] ties an envelope to
//! the CRS it is expressed in, and a [`PaintArea`] is the pixel rectangle a
//! tile is rendered into.

use geo::{coord, Rect};
use serde::{Deserialize, Serialize};

use crate::crs::Crs;

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    /// Create a new envelope
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Create an empty/invalid envelope, useful as the seed of [`Envelope::expand_to_include`]
    pub fn empty() -> Self {
        Self {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    /// Envelope of a `geo::Rect`
    pub fn from_rect(rect: &Rect<f64>) -> Self {
        Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }

    /// Check if this is a valid envelope
    pub fn is_valid(&self) -> bool {
        self.min_x <= self.max_x && self.min_y <= self.max_y
    }

    /// Expand this envelope to include another
    pub fn expand_to_include(&mut self, other: &Self) {
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    /// Expand this envelope to include a single coordinate
    pub fn expand_to_include_point(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    /// Return a copy grown by `distance` on every side.
    pub fn expanded_by(&self, distance: f64) -> Self {
        self.expanded_by_xy(distance, distance)
    }

    /// Return a copy grown by `dx` horizontally and `dy` vertically on each side.
    pub fn expanded_by_xy(&self, dx: f64, dy: f64) -> Self {
        Self::new(
            self.min_x - dx,
            self.min_y - dy,
            self.max_x + dx,
            self.max_y + dy,
        )
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Check whether two envelopes overlap (touching counts).
    pub fn intersects(&self, other: &Self) -> bool {
        self.max_x >= other.min_x
            && self.min_x <= other.max_x
            && self.max_y >= other.min_y
            && self.min_y <= other.max_y
    }

    /// Check whether `other` lies completely inside this envelope.
    pub fn contains(&self, other: &Self) -> bool {
        other.min_x >= self.min_x
            && other.max_x <= self.max_x
            && other.min_y >= self.min_y
            && other.max_y <= self.max_y
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Convert to a `geo::Rect`
    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.min_x, y: self.min_y },
            coord! { x: self.max_x, y: self.max_y },
        )
    }
}

/// An envelope together with the CRS its coordinates are expressed in
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferencedEnvelope {
    pub envelope: Envelope,
    pub crs: Crs,
}

impl ReferencedEnvelope {
    pub fn new(envelope: Envelope, crs: Crs) -> Self {
        Self { envelope, crs }
    }
}

/// The pixel rectangle a tile is painted into.
///
/// `x`/`y` are the top-left pixel, screen Y grows downward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaintArea {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PaintArea {
    /// A paint area anchored at the origin
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Scale the pixel dimensions, used when a builder oversamples.
    pub fn scaled(&self, factor_x: u32, factor_y: u32) -> Self {
        Self {
            x: self.x * factor_x as i32,
            y: self.y * factor_y as i32,
            width: self.width * factor_x,
            height: self.height * factor_y,
        }
    }

    /// The pixel rectangle as a floating point envelope
    pub fn to_envelope(&self) -> Envelope {
        Envelope::new(
            self.x as f64,
            self.y as f64,
            self.x as f64 + self.width as f64,
            self.y as f64 + self.height as f64,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_expand() {
        let mut env1 = Envelope::new(-10.0, -10.0, 10.0, 10.0);
        let env2 = Envelope::new(-20.0, -5.0, 5.0, 15.0);

        env1.expand_to_include(&env2);

        assert_eq!(env1.min_x, -20.0);
        assert_eq!(env1.min_y, -10.0);
        assert_eq!(env1.max_x, 10.0);
        assert_eq!(env1.max_y, 15.0);
    }

    #[test]
    fn test_envelope_empty() {
        let env = Envelope::empty();
        assert!(!env.is_valid());

        let mut env = Envelope::empty();
        env.expand_to_include_point(3.0, 4.0);
        assert!(env.is_valid());
        assert_eq!(env.width(), 0.0);
        assert_eq!(env.center(), (3.0, 4.0));
    }

    #[test]
    fn test_expanded_by() {
        let env = Envelope::new(0.0, 0.0, 10.0, 20.0).expanded_by(2.0);
        assert_eq!(env, Envelope::new(-2.0, -2.0, 12.0, 22.0));

        let env = Envelope::new(0.0, 0.0, 10.0, 20.0).expanded_by_xy(1.0, 3.0);
        assert_eq!(env, Envelope::new(-1.0, -3.0, 11.0, 23.0));
    }

    #[test]
    fn test_intersects_and_contains() {
        let env = Envelope::new(0.0, 0.0, 10.0, 10.0);
        assert!(env.intersects(&Envelope::new(10.0, 10.0, 20.0, 20.0)));
        assert!(!env.intersects(&Envelope::new(10.5, 0.0, 20.0, 20.0)));
        assert!(env.contains(&Envelope::new(1.0, 1.0, 9.0, 9.0)));
        assert!(!env.contains(&Envelope::new(1.0, 1.0, 11.0, 9.0)));
        assert!(env.contains_point(10.0, 0.0));
    }

    #[test]
    fn test_paint_area_scaled() {
        let area = PaintArea::new(256, 256).scaled(16, 16);
        assert_eq!(area.width, 4096);
        assert_eq!(area.height, 4096);
        assert_eq!(area.to_envelope(), Envelope::new(0.0, 0.0, 4096.0, 4096.0));
    }
}
