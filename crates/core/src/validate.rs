//! Degenerate-geometry detection for clipped and simplified output.
//!
//! Clipping and simplification can both leave geometries that no longer
//! describe anything drawable:
//! - Polygons with fewer than 4 points (need 3 unique + closing point)
//! - LineStrings with fewer than 2 points
//! - Zero-area polygons (all points collinear or coincident)
//! - Rings that cross themselves after vertices were removed
//! - Empty geometries
//!
//! Degenerate parts are dropped rather than repaired.
//!
//! # Usage
//!
//! ```
//! use tilechain_core::validate::is_valid_geometry;
//! use geo::{Geometry, LineString, Coord};
//!
//! let line = LineString::new(vec![
//!     Coord { x: 0.0, y: 0.0 },
//!     Coord { x: 1.0, y: 1.0 },
//! ]);
//! assert!(is_valid_geometry(&Geometry::LineString(line)));
//! ```

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{Area, ConvexHull, Geometry, GeometryCollection, LineString, MultiLineString, MultiPolygon, Polygon};

/// Minimum number of points for a valid polygon ring (3 unique + closing = 4)
pub const MIN_POLYGON_RING_POINTS: usize = 4;

/// Minimum number of points for a valid linestring
pub const MIN_LINESTRING_POINTS: usize = 2;

/// Polygons with an area below this are considered degenerate.
pub const MIN_POLYGON_AREA: f64 = 1e-10;

/// Outcome of validating a geometry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(InvalidReason),
}

/// Reason why a geometry is invalid
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// Polygon ring has fewer than 4 points
    PolygonTooFewPoints {
        ring_index: usize,
        point_count: usize,
    },
    /// LineString has fewer than 2 points
    LineStringTooFewPoints { point_count: usize },
    /// Polygon has zero or near-zero area
    ZeroAreaPolygon,
    /// A polygon ring crosses itself
    SelfIntersectingRing { ring_index: usize },
    /// Geometry has no coordinates
    EmptyGeometry,
    /// MultiPolygon has no valid polygons after filtering
    NoValidPolygons,
    /// MultiLineString has no valid linestrings after filtering
    NoValidLineStrings,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, ValidationResult::Invalid(_))
    }
}

/// Check whether a geometry is drawable as-is.
pub fn is_valid_geometry(geom: &Geometry<f64>) -> bool {
    validate_geometry(geom).is_valid()
}

/// Validate a geometry and return the detailed result.
///
/// Collections are valid when at least one member is.
pub fn validate_geometry(geom: &Geometry<f64>) -> ValidationResult {
    match geom {
        Geometry::Point(_) | Geometry::Line(_) | Geometry::Rect(_) | Geometry::Triangle(_) => {
            ValidationResult::Valid
        }
        Geometry::MultiPoint(mp) => {
            if mp.0.is_empty() {
                ValidationResult::Invalid(InvalidReason::EmptyGeometry)
            } else {
                ValidationResult::Valid
            }
        }
        Geometry::LineString(ls) => validate_linestring(ls),
        Geometry::MultiLineString(mls) => validate_multi_linestring(mls),
        Geometry::Polygon(poly) => validate_polygon(poly),
        Geometry::MultiPolygon(mp) => validate_multi_polygon(mp),
        Geometry::GeometryCollection(gc) => {
            if gc.0.iter().any(is_valid_geometry) {
                ValidationResult::Valid
            } else {
                ValidationResult::Invalid(InvalidReason::EmptyGeometry)
            }
        }
    }
}

pub fn validate_linestring(ls: &LineString<f64>) -> ValidationResult {
    let point_count = ls.0.len();
    if point_count < MIN_LINESTRING_POINTS {
        ValidationResult::Invalid(InvalidReason::LineStringTooFewPoints { point_count })
    } else {
        ValidationResult::Valid
    }
}

pub fn validate_multi_linestring(mls: &MultiLineString<f64>) -> ValidationResult {
    if mls.0.is_empty() {
        return ValidationResult::Invalid(InvalidReason::EmptyGeometry);
    }
    if mls.0.iter().any(|ls| validate_linestring(ls).is_valid()) {
        ValidationResult::Valid
    } else {
        ValidationResult::Invalid(InvalidReason::NoValidLineStrings)
    }
}

/// Point counts and area only. Self-intersection is checked separately by
/// [`validate_polygon_topology`] since it is quadratic in the ring size.
pub fn validate_polygon(poly: &Polygon<f64>) -> ValidationResult {
    let counts = validate_ring_counts(poly);
    if counts.is_invalid() {
        return counts;
    }
    validate_polygon_area(poly)
}

fn validate_ring_counts(poly: &Polygon<f64>) -> ValidationResult {
    let exterior_count = poly.exterior().0.len();
    if exterior_count < MIN_POLYGON_RING_POINTS {
        return ValidationResult::Invalid(InvalidReason::PolygonTooFewPoints {
            ring_index: 0,
            point_count: exterior_count,
        });
    }

    for (idx, interior) in poly.interiors().iter().enumerate() {
        let interior_count = interior.0.len();
        if interior_count < MIN_POLYGON_RING_POINTS {
            return ValidationResult::Invalid(InvalidReason::PolygonTooFewPoints {
                ring_index: idx + 1, // exterior is ring 0
                point_count: interior_count,
            });
        }
    }

    ValidationResult::Valid
}

/// A ring crossing itself can have a net area of zero, so a collapsed polygon
/// is one whose convex hull has no area either.
fn validate_polygon_area(poly: &Polygon<f64>) -> ValidationResult {
    if poly.unsigned_area() < MIN_POLYGON_AREA
        && poly.convex_hull().unsigned_area() < MIN_POLYGON_AREA
    {
        return ValidationResult::Invalid(InvalidReason::ZeroAreaPolygon);
    }
    ValidationResult::Valid
}

pub fn validate_multi_polygon(mp: &MultiPolygon<f64>) -> ValidationResult {
    if mp.0.is_empty() {
        return ValidationResult::Invalid(InvalidReason::EmptyGeometry);
    }
    if mp.0.iter().any(|poly| validate_polygon(poly).is_valid()) {
        ValidationResult::Valid
    } else {
        ValidationResult::Invalid(InvalidReason::NoValidPolygons)
    }
}

/// Full polygon check: [`validate_polygon`] plus ring self-intersection.
///
/// Crossings are reported before area, so a bowtie is self-intersecting
/// rather than zero-area.
pub fn validate_polygon_topology(poly: &Polygon<f64>) -> ValidationResult {
    let counts = validate_ring_counts(poly);
    if counts.is_invalid() {
        return counts;
    }
    let rings = std::iter::once(poly.exterior()).chain(poly.interiors().iter());
    for (ring_index, ring) in rings.enumerate() {
        if ring_has_self_intersection(ring) {
            return ValidationResult::Invalid(InvalidReason::SelfIntersectingRing { ring_index });
        }
    }
    validate_polygon_area(poly)
}

/// Whether every polygon in `geom` is topologically sound.
///
/// Non-polygonal geometries are always sound.
pub fn is_topologically_valid(geom: &Geometry<f64>) -> bool {
    match geom {
        Geometry::Polygon(p) => validate_polygon_topology(p).is_valid(),
        Geometry::MultiPolygon(mp) => mp
            .0
            .iter()
            .all(|p| validate_polygon_topology(p).is_valid()),
        Geometry::GeometryCollection(gc) => gc.0.iter().all(is_topologically_valid),
        _ => true,
    }
}

/// Detect a closed ring crossing or overlapping itself.
///
/// Adjacent segments may only share their common vertex; any other contact
/// between two segments counts as a self-intersection.
pub fn ring_has_self_intersection(ring: &LineString<f64>) -> bool {
    let segments: Vec<geo::Line<f64>> = ring.lines().collect();
    let n = segments.len();
    if n < 3 {
        return false;
    }

    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(segments[i], segments[j]) {
                None => {}
                Some(LineIntersection::SinglePoint { .. }) if adjacent => {}
                Some(LineIntersection::SinglePoint { .. }) => return true,
                Some(LineIntersection::Collinear { intersection }) => {
                    // collinear contact of adjacent segments is a spike
                    if !adjacent || intersection.start != intersection.end {
                        return true;
                    }
                }
            }
        }
    }
    false
}

/// Filter a geometry, returning `Some(geometry)` if valid, `None` if invalid.
///
/// Multi-geometries and collections keep only their valid members; a
/// multi-geometry left with a single member is downgraded to it.
pub fn filter_valid_geometry(geom: &Geometry<f64>) -> Option<Geometry<f64>> {
    match geom {
        Geometry::MultiLineString(mls) => filter_multi_linestring(mls),
        Geometry::MultiPolygon(mp) => filter_multi_polygon(mp),
        Geometry::GeometryCollection(gc) => {
            let members: Vec<Geometry<f64>> =
                gc.0.iter().filter_map(filter_valid_geometry).collect();
            if members.is_empty() {
                None
            } else {
                Some(Geometry::GeometryCollection(GeometryCollection(members)))
            }
        }
        other if is_valid_geometry(other) => Some(other.clone()),
        _ => None,
    }
}

fn filter_multi_linestring(mls: &MultiLineString<f64>) -> Option<Geometry<f64>> {
    let mut valid_lines: Vec<LineString<f64>> = mls
        .0
        .iter()
        .filter(|ls| validate_linestring(ls).is_valid())
        .cloned()
        .collect();

    match valid_lines.len() {
        0 => None,
        1 => valid_lines.pop().map(Geometry::LineString),
        _ => Some(Geometry::MultiLineString(MultiLineString::new(valid_lines))),
    }
}

fn filter_multi_polygon(mp: &MultiPolygon<f64>) -> Option<Geometry<f64>> {
    let mut valid_polygons: Vec<Polygon<f64>> =
        mp.0.iter()
            .filter(|poly| validate_polygon(poly).is_valid())
            .cloned()
            .collect();

    match valid_polygons.len() {
        0 => None,
        1 => valid_polygons.pop().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(MultiPolygon::new(valid_polygons))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Coord, MultiPoint, Point};

    fn make_linestring(coords: &[(f64, f64)]) -> LineString<f64> {
        LineString::new(coords.iter().map(|&(x, y)| Coord { x, y }).collect())
    }

    fn make_polygon(exterior: &[(f64, f64)]) -> Polygon<f64> {
        Polygon::new(make_linestring(exterior), vec![])
    }

    fn unit_square() -> Polygon<f64> {
        make_polygon(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)])
    }

    #[test]
    fn test_points_valid_unless_empty() {
        assert!(is_valid_geometry(&Geometry::Point(Point::new(0.0, 0.0))));
        assert_eq!(
            validate_geometry(&Geometry::MultiPoint(MultiPoint::new(vec![]))),
            ValidationResult::Invalid(InvalidReason::EmptyGeometry)
        );
    }

    #[test]
    fn test_linestring_point_counts() {
        assert!(is_valid_geometry(&Geometry::LineString(make_linestring(&[
            (0.0, 0.0),
            (1.0, 1.0)
        ]))));
        assert_eq!(
            validate_geometry(&Geometry::LineString(make_linestring(&[(0.0, 0.0)]))),
            ValidationResult::Invalid(InvalidReason::LineStringTooFewPoints { point_count: 1 })
        );
    }

    #[test]
    fn test_multilinestring_all_invalid_lines() {
        let mls = Geometry::MultiLineString(MultiLineString::new(vec![
            make_linestring(&[(0.0, 0.0)]),
            make_linestring(&[(1.0, 1.0)]),
        ]));
        assert_eq!(
            validate_geometry(&mls),
            ValidationResult::Invalid(InvalidReason::NoValidLineStrings)
        );
    }

    #[test]
    fn test_polygon_too_few_points() {
        let poly = Geometry::Polygon(make_polygon(&[(0.0, 0.0), (1.0, 0.0), (0.0, 0.0)]));
        assert_eq!(
            validate_geometry(&poly),
            ValidationResult::Invalid(InvalidReason::PolygonTooFewPoints {
                ring_index: 0,
                point_count: 3
            })
        );
    }

    #[test]
    fn test_polygon_zero_area_collinear() {
        let poly = Geometry::Polygon(make_polygon(&[
            (0.0, 0.0),
            (1.0, 0.0),
            (2.0, 0.0),
            (3.0, 0.0),
            (0.0, 0.0),
        ]));
        assert_eq!(
            validate_geometry(&poly),
            ValidationResult::Invalid(InvalidReason::ZeroAreaPolygon)
        );
    }

    #[test]
    fn test_polygon_with_invalid_hole() {
        let poly = Geometry::Polygon(Polygon::new(
            make_linestring(&[
                (0.0, 0.0),
                (10.0, 0.0),
                (10.0, 10.0),
                (0.0, 10.0),
                (0.0, 0.0),
            ]),
            vec![make_linestring(&[(2.0, 2.0), (8.0, 2.0), (2.0, 2.0)])],
        ));
        assert_eq!(
            validate_geometry(&poly),
            ValidationResult::Invalid(InvalidReason::PolygonTooFewPoints {
                ring_index: 1,
                point_count: 3
            })
        );
    }

    #[test]
    fn test_bowtie_is_self_intersecting() {
        let bowtie = make_polygon(&[(0.0, 0.0), (2.0, 2.0), (2.0, 0.0), (0.0, 2.0), (0.0, 0.0)]);
        assert!(ring_has_self_intersection(bowtie.exterior()));
        assert_eq!(
            validate_polygon_topology(&bowtie),
            ValidationResult::Invalid(InvalidReason::SelfIntersectingRing { ring_index: 0 })
        );
        assert!(!is_topologically_valid(&Geometry::Polygon(bowtie)));
    }

    #[test]
    fn test_bowtie_is_not_zero_area() {
        // the two lobes cancel out in the signed area
        let bowtie = make_polygon(&[(0.0, 0.0), (2.0, 2.0), (2.0, 0.0), (0.0, 2.0), (0.0, 0.0)]);
        assert!(validate_polygon(&bowtie).is_valid());
        assert!(filter_valid_geometry(&Geometry::Polygon(bowtie)).is_some());
    }

    #[test]
    fn test_simple_ring_is_not_self_intersecting() {
        assert!(!ring_has_self_intersection(unit_square().exterior()));
        assert!(validate_polygon_topology(&unit_square()).is_valid());
        assert!(is_topologically_valid(&Geometry::LineString(make_linestring(&[
            (0.0, 0.0),
            (1.0, 1.0),
            (0.0, 1.0),
            (1.0, 0.0),
        ]))));
    }

    #[test]
    fn test_spike_is_self_intersecting() {
        // goes out to (3, 1) and straight back along the same edge
        let spiked = make_polygon(&[
            (0.0, 0.0),
            (2.0, 0.0),
            (2.0, 1.0),
            (3.0, 1.0),
            (2.0, 1.0),
            (2.0, 2.0),
            (0.0, 2.0),
            (0.0, 0.0),
        ]);
        assert!(ring_has_self_intersection(spiked.exterior()));
    }

    #[test]
    fn test_filter_multipolygon_downgrades_to_single() {
        let mp = Geometry::MultiPolygon(MultiPolygon::new(vec![
            unit_square(),
            make_polygon(&[(2.0, 2.0), (3.0, 2.0), (2.0, 2.0)]),
        ]));
        assert!(matches!(
            filter_valid_geometry(&mp),
            Some(Geometry::Polygon(_))
        ));
    }

    #[test]
    fn test_filter_multilinestring_removes_invalid() {
        let mls = Geometry::MultiLineString(MultiLineString::new(vec![
            make_linestring(&[(0.0, 0.0), (1.0, 1.0)]),
            make_linestring(&[(2.0, 2.0)]),
            make_linestring(&[(3.0, 3.0), (4.0, 4.0)]),
        ]));
        match filter_valid_geometry(&mls) {
            Some(Geometry::MultiLineString(result)) => assert_eq!(result.0.len(), 2),
            other => panic!("Expected MultiLineString, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_collection_keeps_valid_members() {
        let gc = Geometry::GeometryCollection(GeometryCollection(vec![
            Geometry::LineString(make_linestring(&[(0.0, 0.0)])),
            Geometry::Polygon(unit_square()),
        ]));
        match filter_valid_geometry(&gc) {
            Some(Geometry::GeometryCollection(members)) => assert_eq!(members.0.len(), 1),
            other => panic!("Expected collection, got {:?}", other),
        }
        let all_bad = Geometry::GeometryCollection(GeometryCollection(vec![Geometry::LineString(
            make_linestring(&[(0.0, 0.0)]),
        )]));
        assert!(filter_valid_geometry(&all_bad).is_none());
    }
}
