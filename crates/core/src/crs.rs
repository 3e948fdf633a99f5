//! Coordinate reference systems and coordinate transforms.
//!
//! The pipeline composes three transforms per request: source CRS → target CRS,
//! target CRS → screen, and their composition source → screen. Transforms are
//! shared as `Arc<dyn CoordinateTransform>` so a chain configuration can hand
//! the same instance to several stages.
//!
//! Only the projections the pipeline needs are implemented: geographic WGS84
//! (longitude/latitude order), spherical Web Mercator, and affine maps.

use std::fmt;
use std::sync::Arc;

use geo::{Coord, Geometry, MapCoords};
use serde::{Deserialize, Serialize};

use crate::envelope::{Envelope, PaintArea};
use crate::{Error, Result};

/// Sphere radius used by EPSG:3857
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Latitude at which Web Mercator becomes square
pub const MERCATOR_MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// A coordinate reference system understood by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Crs {
    /// EPSG:4326 with longitude/latitude axis order
    Wgs84,
    /// EPSG:3857 spherical Web Mercator
    WebMercator,
    /// Any other EPSG code. Only transformable to itself.
    Epsg(u32),
}

impl Crs {
    /// Parse an identifier like `EPSG:4326`, `epsg:3857` or `3857`.
    pub fn from_code(code: &str) -> Option<Self> {
        let trimmed = code.trim();
        let digits = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
            .unwrap_or(trimmed);
        match digits.parse::<u32>().ok()? {
            4326 => Some(Crs::Wgs84),
            3857 | 900913 => Some(Crs::WebMercator),
            other => Some(Crs::Epsg(other)),
        }
    }

    pub fn epsg_code(&self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::WebMercator => 3857,
            Crs::Epsg(code) => *code,
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Wgs84)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg_code())
    }
}

/// A point-wise coordinate transform.
pub trait CoordinateTransform: fmt::Debug + Send + Sync {
    fn transform(&self, coord: Coord<f64>) -> Result<Coord<f64>>;

    fn inverse(&self) -> Result<Arc<dyn CoordinateTransform>>;

    fn is_identity(&self) -> bool {
        false
    }
}

/// The do-nothing transform
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl CoordinateTransform for IdentityTransform {
    fn transform(&self, coord: Coord<f64>) -> Result<Coord<f64>> {
        Ok(coord)
    }

    fn inverse(&self) -> Result<Arc<dyn CoordinateTransform>> {
        Ok(Arc::new(IdentityTransform))
    }

    fn is_identity(&self) -> bool {
        true
    }
}

/// 2D affine transform
///
/// ```text
/// x' = m00 * x + m01 * y + m02
/// y' = m10 * x + m11 * y + m12
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub m00: f64,
    pub m01: f64,
    pub m02: f64,
    pub m10: f64,
    pub m11: f64,
    pub m12: f64,
}

impl AffineTransform {
    pub fn new(m00: f64, m01: f64, m02: f64, m10: f64, m11: f64, m12: f64) -> Self {
        Self {
            m00,
            m01,
            m02,
            m10,
            m11,
            m12,
        }
    }

    /// North-up world → screen mapping of `world` onto `paint`.
    ///
    /// The top-left corner of the envelope lands on the top-left pixel of the
    /// paint area, screen Y grows downward.
    pub fn world_to_screen(world: &Envelope, paint: &PaintArea) -> Result<Self> {
        if world.width() <= 0.0 || world.height() <= 0.0 || paint.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "cannot map envelope {:?} onto paint area {:?}",
                world, paint
            )));
        }
        let scale_x = paint.width as f64 / world.width();
        let scale_y = paint.height as f64 / world.height();
        Ok(Self::new(
            scale_x,
            0.0,
            paint.x as f64 - world.min_x * scale_x,
            0.0,
            -scale_y,
            paint.y as f64 + world.max_y * scale_y,
        ))
    }

    pub fn determinant(&self) -> f64 {
        self.m00 * self.m11 - self.m01 * self.m10
    }

    pub fn apply(&self, coord: Coord<f64>) -> Coord<f64> {
        Coord {
            x: self.m00 * coord.x + self.m01 * coord.y + self.m02,
            y: self.m10 * coord.x + self.m11 * coord.y + self.m12,
        }
    }

    /// Invert the matrix, failing for singular transforms.
    pub fn inverted(&self) -> Result<Self> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return Err(Error::Transform(format!(
                "affine transform {:?} is not invertible",
                self
            )));
        }
        let m00 = self.m11 / det;
        let m01 = -self.m01 / det;
        let m10 = -self.m10 / det;
        let m11 = self.m00 / det;
        Ok(Self::new(
            m00,
            m01,
            -(m00 * self.m02 + m01 * self.m12),
            m10,
            m11,
            -(m10 * self.m02 + m11 * self.m12),
        ))
    }
}

impl CoordinateTransform for AffineTransform {
    fn transform(&self, coord: Coord<f64>) -> Result<Coord<f64>> {
        Ok(self.apply(coord))
    }

    fn inverse(&self) -> Result<Arc<dyn CoordinateTransform>> {
        Ok(Arc::new(self.inverted()?))
    }
}

/// WGS84 longitude/latitude → Web Mercator meters
#[derive(Debug, Clone, Copy, Default)]
pub struct GeographicToMercator;

impl CoordinateTransform for GeographicToMercator {
    fn transform(&self, coord: Coord<f64>) -> Result<Coord<f64>> {
        if coord.y.abs() >= 90.0 {
            return Err(Error::Transform(format!(
                "latitude {} cannot be projected to Web Mercator",
                coord.y
            )));
        }
        let x = EARTH_RADIUS * coord.x.to_radians();
        let y = EARTH_RADIUS
            * (std::f64::consts::FRAC_PI_4 + coord.y.to_radians() / 2.0)
                .tan()
                .ln();
        if !x.is_finite() || !y.is_finite() {
            return Err(Error::Transform(format!(
                "non-finite projection of ({}, {})",
                coord.x, coord.y
            )));
        }
        Ok(Coord { x, y })
    }

    fn inverse(&self) -> Result<Arc<dyn CoordinateTransform>> {
        Ok(Arc::new(MercatorToGeographic))
    }
}

/// Web Mercator meters → WGS84 longitude/latitude
#[derive(Debug, Clone, Copy, Default)]
pub struct MercatorToGeographic;

impl CoordinateTransform for MercatorToGeographic {
    fn transform(&self, coord: Coord<f64>) -> Result<Coord<f64>> {
        let lng = (coord.x / EARTH_RADIUS).to_degrees();
        let lat = (2.0 * (coord.y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2)
            .to_degrees();
        Ok(Coord { x: lng, y: lat })
    }

    fn inverse(&self) -> Result<Arc<dyn CoordinateTransform>> {
        Ok(Arc::new(GeographicToMercator))
    }
}

/// `second(first(p))`
#[derive(Debug, Clone)]
pub struct ConcatenatedTransform {
    first: Arc<dyn CoordinateTransform>,
    second: Arc<dyn CoordinateTransform>,
}

impl CoordinateTransform for ConcatenatedTransform {
    fn transform(&self, coord: Coord<f64>) -> Result<Coord<f64>> {
        self.second.transform(self.first.transform(coord)?)
    }

    fn inverse(&self) -> Result<Arc<dyn CoordinateTransform>> {
        Ok(concatenate(self.second.inverse()?, self.first.inverse()?))
    }
}

/// Compose two transforms so that the result applies `first`, then `second`.
pub fn concatenate(
    first: Arc<dyn CoordinateTransform>,
    second: Arc<dyn CoordinateTransform>,
) -> Arc<dyn CoordinateTransform> {
    if first.is_identity() {
        second
    } else if second.is_identity() {
        first
    } else {
        Arc::new(ConcatenatedTransform { first, second })
    }
}

/// Find the transform path between two CRSs.
pub fn resolve_transform(from: Crs, to: Crs) -> Result<Arc<dyn CoordinateTransform>> {
    match (from, to) {
        (a, b) if a == b => Ok(Arc::new(IdentityTransform)),
        (Crs::Wgs84, Crs::WebMercator) => Ok(Arc::new(GeographicToMercator)),
        (Crs::WebMercator, Crs::Wgs84) => Ok(Arc::new(MercatorToGeographic)),
        _ => Err(Error::TransformResolution { from, to }),
    }
}

/// Apply a transform to every coordinate of a geometry.
pub fn transform_geometry(
    geom: &Geometry<f64>,
    transform: &dyn CoordinateTransform,
) -> Result<Geometry<f64>> {
    if transform.is_identity() {
        return Ok(geom.clone());
    }
    geom.try_map_coords(|c| transform.transform(c))
}

/// Transform an envelope by densifying its edges.
///
/// Non-affine transforms bend straight edges, so corners alone under-cover the
/// result; each edge is sampled at `SAMPLES` points.
pub fn transform_envelope(
    envelope: &Envelope,
    transform: &dyn CoordinateTransform,
) -> Result<Envelope> {
    const SAMPLES: usize = 8;

    if transform.is_identity() {
        return Ok(*envelope);
    }

    let mut result = Envelope::empty();
    for i in 0..=SAMPLES {
        let t = i as f64 / SAMPLES as f64;
        let x = envelope.min_x + t * envelope.width();
        let y = envelope.min_y + t * envelope.height();
        for c in [
            Coord { x, y: envelope.min_y },
            Coord { x, y: envelope.max_y },
            Coord { x: envelope.min_x, y },
            Coord { x: envelope.max_x, y },
        ] {
            let p = transform.transform(c)?;
            result.expand_to_include_point(p.x, p.y);
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::coord;

    fn assert_close(a: Coord<f64>, b: Coord<f64>, tol: f64) {
        assert!(
            (a.x - b.x).abs() < tol && (a.y - b.y).abs() < tol,
            "{:?} != {:?}",
            a,
            b
        );
    }

    #[test]
    fn test_crs_from_code() {
        assert_eq!(Crs::from_code("EPSG:4326"), Some(Crs::Wgs84));
        assert_eq!(Crs::from_code("epsg:3857"), Some(Crs::WebMercator));
        assert_eq!(Crs::from_code("900913"), Some(Crs::WebMercator));
        assert_eq!(Crs::from_code("EPSG:32633"), Some(Crs::Epsg(32633)));
        assert_eq!(Crs::from_code("nonsense"), None);
        assert_eq!(Crs::WebMercator.to_string(), "EPSG:3857");
    }

    #[test]
    fn test_world_to_screen_is_north_up() {
        let world = Envelope::new(0.0, 0.0, 100.0, 50.0);
        let paint = PaintArea::new(200, 100);
        let t = AffineTransform::world_to_screen(&world, &paint).unwrap();

        // top-left of the world is the screen origin
        assert_close(t.apply(coord! { x: 0.0, y: 50.0 }), coord! { x: 0.0, y: 0.0 }, 1e-9);
        // bottom-right of the world is the far screen corner
        assert_close(
            t.apply(coord! { x: 100.0, y: 0.0 }),
            coord! { x: 200.0, y: 100.0 },
            1e-9,
        );
    }

    #[test]
    fn test_world_to_screen_rejects_degenerate_envelope() {
        let world = Envelope::new(0.0, 0.0, 0.0, 50.0);
        assert!(AffineTransform::world_to_screen(&world, &PaintArea::new(256, 256)).is_err());
    }

    #[test]
    fn test_affine_inverse() {
        let t = AffineTransform::new(2.0, 0.5, 10.0, -0.25, -3.0, 7.0);
        let inv = t.inverted().unwrap();
        let p = coord! { x: 12.5, y: -4.0 };
        assert_close(inv.apply(t.apply(p)), p, 1e-9);
    }

    #[test]
    fn test_singular_affine_has_no_inverse() {
        let t = AffineTransform::new(1.0, 2.0, 0.0, 2.0, 4.0, 0.0);
        assert!(t.inverted().is_err());
    }

    #[test]
    fn test_mercator_round_trip() {
        let forward = GeographicToMercator;
        let p = coord! { x: 12.4964, y: 41.9028 };
        let projected = forward.transform(p).unwrap();
        let back = forward.inverse().unwrap().transform(projected).unwrap();
        assert_close(back, p, 1e-9);

        let edge = forward
            .transform(coord! { x: 180.0, y: MERCATOR_MAX_LATITUDE })
            .unwrap();
        assert!((edge.x - 20_037_508.342_789_244).abs() < 1e-3);
        assert!((edge.y - 20_037_508.342_789_244).abs() < 1e-3);
    }

    #[test]
    fn test_mercator_rejects_poles() {
        assert!(GeographicToMercator
            .transform(coord! { x: 0.0, y: 90.0 })
            .is_err());
    }

    #[test]
    fn test_resolve_transform() {
        assert!(resolve_transform(Crs::Wgs84, Crs::Wgs84)
            .unwrap()
            .is_identity());
        assert!(resolve_transform(Crs::Wgs84, Crs::WebMercator).is_ok());
        match resolve_transform(Crs::Epsg(32633), Crs::WebMercator) {
            Err(Error::TransformResolution { from, to }) => {
                assert_eq!(from, Crs::Epsg(32633));
                assert_eq!(to, Crs::WebMercator);
            }
            other => panic!("Expected TransformResolution error, got {:?}", other),
        }
    }

    #[test]
    fn test_concatenate_composes_in_order() {
        let scale: Arc<dyn CoordinateTransform> =
            Arc::new(AffineTransform::new(2.0, 0.0, 0.0, 0.0, 2.0, 0.0));
        let shift: Arc<dyn CoordinateTransform> =
            Arc::new(AffineTransform::new(1.0, 0.0, 5.0, 0.0, 1.0, 0.0));
        let composed = concatenate(scale, shift);
        let p = composed.transform(coord! { x: 1.0, y: 1.0 }).unwrap();
        assert_close(p, coord! { x: 7.0, y: 2.0 }, 1e-12);

        let back = composed.inverse().unwrap().transform(p).unwrap();
        assert_close(back, coord! { x: 1.0, y: 1.0 }, 1e-12);
    }

    #[test]
    fn test_transform_envelope_covers_projected_edges() {
        let env = Envelope::new(-10.0, 40.0, 10.0, 60.0);
        let projected = transform_envelope(&env, &GeographicToMercator).unwrap();
        let corner = GeographicToMercator
            .transform(coord! { x: -10.0, y: 60.0 })
            .unwrap();
        assert!((projected.min_x - corner.x).abs() < 1e-6);
        assert!((projected.max_y - corner.y).abs() < 1e-6);
    }
}
