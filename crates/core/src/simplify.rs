//! Distance-tolerance geometry simplification.
//!
//! Lines and polygons are reduced with Ramer-Douglas-Peucker via
//! `geo::Simplify`. The tolerance is expressed in whatever space the geometry
//! currently lives in: the chain calls this after the screen transform with a
//! pixel-derived tolerance, or in CRS units when no transform is applied.
//!
//! RDP can make a polygon ring cross itself. When that happens the polygon is
//! simplified again with the topology-preserving Visvalingam-Whyatt variant,
//! and if even that is degenerate the original polygon is kept.

use geo::{
    Geometry, GeometryCollection, LineString, MultiLineString, MultiPolygon, Polygon, Simplify,
    SimplifyVwPreserve,
};

use crate::validate::{validate_polygon, validate_polygon_topology};

/// Rings with more vertices than this only get the cheap validity check.
const TOPOLOGY_CHECK_MAX_VERTICES: usize = 1024;

/// Simplify a geometry with the given distance tolerance.
///
/// Points pass through unchanged; so does everything when `tolerance` is not
/// a positive finite number.
pub fn simplify_geometry(geom: &Geometry<f64>, tolerance: f64) -> Geometry<f64> {
    if !(tolerance.is_finite() && tolerance > 0.0) {
        return geom.clone();
    }

    match geom {
        Geometry::Point(_) | Geometry::MultiPoint(_) => geom.clone(),

        Geometry::LineString(ls) => Geometry::LineString(simplify_linestring(ls, tolerance)),
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(MultiLineString::new(
            mls.0
                .iter()
                .map(|ls| simplify_linestring(ls, tolerance))
                .collect(),
        )),

        Geometry::Polygon(poly) => Geometry::Polygon(simplify_polygon(poly, tolerance)),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(MultiPolygon::new(
            mp.0.iter()
                .map(|poly| simplify_polygon(poly, tolerance))
                .collect(),
        )),

        Geometry::GeometryCollection(gc) => Geometry::GeometryCollection(GeometryCollection(
            gc.0.iter()
                .map(|member| simplify_geometry(member, tolerance))
                .collect(),
        )),

        // Line, Rect, Triangle have nothing to remove
        other => other.clone(),
    }
}

fn simplify_linestring(ls: &LineString<f64>, tolerance: f64) -> LineString<f64> {
    // geo::Simplify panics on linestrings with fewer than 2 points
    if ls.0.len() < 3 {
        return ls.clone();
    }
    ls.simplify(&tolerance)
}

fn simplify_polygon(poly: &Polygon<f64>, tolerance: f64) -> Polygon<f64> {
    let simplified = poly.simplify(&tolerance);
    if polygon_is_acceptable(&simplified) {
        return simplified;
    }

    log::trace!(
        "RDP broke a {}-vertex ring, retrying with topology-preserving simplification",
        poly.exterior().0.len()
    );
    let preserved = poly.simplify_vw_preserve(&(tolerance * tolerance));
    if polygon_is_acceptable(&preserved) {
        preserved
    } else {
        poly.clone()
    }
}

fn polygon_is_acceptable(poly: &Polygon<f64>) -> bool {
    let vertices = poly.exterior().0.len()
        + poly.interiors().iter().map(|r| r.0.len()).sum::<usize>();
    if vertices > TOPOLOGY_CHECK_MAX_VERTICES {
        validate_polygon(poly).is_valid()
    } else {
        validate_polygon_topology(poly).is_valid()
    }
}
