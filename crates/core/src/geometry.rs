//! Geometry kinds and small normalizations shared by the chain stages.
//!
//! Behaviour that depends on "what sort of geometry is this" goes through
//! [`GeometryKind`] rather than matching `geo::Geometry` variants ad hoc, so
//! every stage agrees on which variants are point-, line- or polygon-like.

use geo::{Geometry, GeometryCollection, HasDimensions};

/// Geometry family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    /// Point, MultiPoint
    Puntal,
    /// Line, LineString, MultiLineString
    Lineal,
    /// Polygon, MultiPolygon, Rect, Triangle
    Polygonal,
    /// GeometryCollection
    Collection,
}

impl GeometryKind {
    pub fn of(geom: &Geometry<f64>) -> Self {
        match geom {
            Geometry::Point(_) | Geometry::MultiPoint(_) => GeometryKind::Puntal,
            Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
                GeometryKind::Lineal
            }
            Geometry::Polygon(_)
            | Geometry::MultiPolygon(_)
            | Geometry::Rect(_)
            | Geometry::Triangle(_) => GeometryKind::Polygonal,
            Geometry::GeometryCollection(_) => GeometryKind::Collection,
        }
    }

    /// Topological dimension of the family, `None` for collections.
    pub fn dimension(&self) -> Option<u8> {
        match self {
            GeometryKind::Puntal => Some(0),
            GeometryKind::Lineal => Some(1),
            GeometryKind::Polygonal => Some(2),
            GeometryKind::Collection => None,
        }
    }
}

/// The empty-geometry sentinel returned instead of "no geometry".
pub fn empty_geometry() -> Geometry<f64> {
    Geometry::GeometryCollection(GeometryCollection(Vec::new()))
}

/// True for the sentinel and for any geometry without coordinates.
pub fn is_empty(geom: &Geometry<f64>) -> bool {
    geom.is_empty()
}

/// Highest dimension present in the geometry, `None` when it is empty.
pub fn dimension(geom: &Geometry<f64>) -> Option<u8> {
    match geom {
        Geometry::GeometryCollection(gc) => gc.0.iter().filter_map(dimension).max(),
        other if other.is_empty() => None,
        other => GeometryKind::of(other).dimension(),
    }
}

/// Kind of the highest-dimensional member, looking through collections.
pub fn dominant_kind(geom: &Geometry<f64>) -> Option<GeometryKind> {
    match dimension(geom)? {
        0 => Some(GeometryKind::Puntal),
        1 => Some(GeometryKind::Lineal),
        _ => Some(GeometryKind::Polygonal),
    }
}

/// Unwrap a multi-geometry or collection holding exactly one member.
///
/// A collection's single member is collapsed in turn, so the result never
/// needs a second pass.
pub fn collapse_singleton(geom: Geometry<f64>) -> Geometry<f64> {
    match geom {
        Geometry::MultiPoint(mut mp) if mp.0.len() == 1 => Geometry::Point(mp.0.remove(0)),
        Geometry::MultiLineString(mut mls) if mls.0.len() == 1 => {
            Geometry::LineString(mls.0.remove(0))
        }
        Geometry::MultiPolygon(mut mp) if mp.0.len() == 1 => Geometry::Polygon(mp.0.remove(0)),
        Geometry::GeometryCollection(mut gc) if gc.0.len() == 1 => {
            collapse_singleton(gc.0.remove(0))
        }
        other => other,
    }
}

/// Number of members of a multi-geometry or collection, zero for single geometries.
pub fn member_count(geom: &Geometry<f64>) -> usize {
    match geom {
        Geometry::MultiPoint(mp) => mp.0.len(),
        Geometry::MultiLineString(mls) => mls.0.len(),
        Geometry::MultiPolygon(mp) => mp.0.len(),
        Geometry::GeometryCollection(gc) => gc.0.len(),
        _ => 0,
    }
}
