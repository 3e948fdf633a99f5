//! Geometry clipping against an axis-aligned envelope.
//!
//! Clipping runs the exact boolean-ops intersection from `geo` first. If that
//! panics on a pathological input, the geometry is clipped again with the fast
//! but non-robust algorithms (Sutherland-Hodgman for rings, Liang-Barsky for
//! segments).
//!
//! Clipping a polygon against a box can leave lower-dimensional debris where
//! the polygon only touches the box (a shared vertex, a tangent edge). The
//! result is therefore filtered back down to the kind of the input: polygons
//! stay polygons, lines stay lines, points stay points. Collections are
//! clipped and filtered member by member.

use std::panic::{catch_unwind, AssertUnwindSafe};

use geo::{
    BooleanOps, BoundingRect, Coord, Geometry, GeometryCollection, LineString, MultiLineString,
    MultiPoint, MultiPolygon, Point, Polygon,
};

use crate::envelope::Envelope;
use crate::geometry::GeometryKind;
use crate::validate::{is_valid_geometry, MIN_POLYGON_AREA};

/// Fixed padding, in pixels, added around the tile before clipping.
pub const CLIP_PIXEL_MARGIN: f64 = 12.0;

/// Clip a geometry to `envelope`.
///
/// Returns `None` if nothing of the input's own kind survives.
pub fn clip_to_envelope(geom: &Geometry<f64>, envelope: &Envelope) -> Option<Geometry<f64>> {
    let rect = geom.bounding_rect()?;
    let bounds = Envelope::from_rect(&rect);

    // FAST PATH: fully inside, nothing to cut
    if envelope.contains(&bounds) {
        return Some(geom.clone());
    }
    if !envelope.intersects(&bounds) {
        return None;
    }

    let kind = GeometryKind::of(geom);
    if let Geometry::GeometryCollection(gc) = geom {
        let members: Vec<Geometry<f64>> = gc
            .0
            .iter()
            .filter_map(|member| clip_to_envelope(member, envelope))
            .collect();
        return if members.is_empty() {
            None
        } else {
            Some(Geometry::GeometryCollection(GeometryCollection(members)))
        };
    }

    let clipped = match catch_unwind(AssertUnwindSafe(|| clip_robust(geom, envelope))) {
        Ok(clipped) => clipped,
        Err(_) => {
            log::debug!("robust clipping panicked, falling back to Sutherland-Hodgman");
            clip_fast(geom, envelope)
        }
    };

    retain_kind(clipped?, kind)
}

/// Keep only the parts of `geom` matching `kind`.
///
/// Degenerate leftovers (zero-length lines, zero-area rings) are dropped too.
pub fn retain_kind(geom: Geometry<f64>, kind: GeometryKind) -> Option<Geometry<f64>> {
    match kind {
        GeometryKind::Puntal => {
            let mut points = Vec::new();
            collect_points(geom, &mut points);
            match points.len() {
                0 => None,
                1 => points.pop().map(Geometry::Point),
                _ => Some(Geometry::MultiPoint(MultiPoint(points))),
            }
        }
        GeometryKind::Lineal => {
            let mut lines = Vec::new();
            collect_lines(geom, &mut lines);
            lines.retain(|ls| ls.0.len() >= 2 && ls.0.windows(2).any(|w| w[0] != w[1]));
            match lines.len() {
                0 => None,
                1 => lines.pop().map(Geometry::LineString),
                _ => Some(Geometry::MultiLineString(MultiLineString(lines))),
            }
        }
        GeometryKind::Polygonal => {
            let mut polygons = Vec::new();
            collect_polygons(geom, &mut polygons);
            polygons.retain(|p| {
                use geo::Area;
                p.unsigned_area() > MIN_POLYGON_AREA
                    && is_valid_geometry(&Geometry::Polygon(p.clone()))
            });
            match polygons.len() {
                0 => None,
                1 => polygons.pop().map(Geometry::Polygon),
                _ => Some(Geometry::MultiPolygon(MultiPolygon(polygons))),
            }
        }
        GeometryKind::Collection => match geom {
            Geometry::GeometryCollection(gc) => {
                let members: Vec<Geometry<f64>> = gc
                    .0
                    .into_iter()
                    .filter_map(|member| {
                        let member_kind = GeometryKind::of(&member);
                        retain_kind(member, member_kind)
                    })
                    .collect();
                if members.is_empty() {
                    None
                } else {
                    Some(Geometry::GeometryCollection(GeometryCollection(members)))
                }
            }
            other => {
                let other_kind = GeometryKind::of(&other);
                retain_kind(other, other_kind)
            }
        },
    }
}

fn collect_points(geom: Geometry<f64>, out: &mut Vec<Point<f64>>) {
    match geom {
        Geometry::Point(p) => out.push(p),
        Geometry::MultiPoint(mp) => out.extend(mp.0),
        Geometry::GeometryCollection(gc) => {
            for member in gc.0 {
                collect_points(member, out);
            }
        }
        _ => {}
    }
}

fn collect_lines(geom: Geometry<f64>, out: &mut Vec<LineString<f64>>) {
    match geom {
        Geometry::Line(line) => out.push(LineString::new(vec![line.start, line.end])),
        Geometry::LineString(ls) => out.push(ls),
        Geometry::MultiLineString(mls) => out.extend(mls.0),
        Geometry::GeometryCollection(gc) => {
            for member in gc.0 {
                collect_lines(member, out);
            }
        }
        _ => {}
    }
}

fn collect_polygons(geom: Geometry<f64>, out: &mut Vec<Polygon<f64>>) {
    match geom {
        Geometry::Polygon(p) => out.push(p),
        Geometry::MultiPolygon(mp) => out.extend(mp.0),
        Geometry::Rect(r) => out.push(r.to_polygon()),
        Geometry::Triangle(t) => out.push(t.to_polygon()),
        Geometry::GeometryCollection(gc) => {
            for member in gc.0 {
                collect_polygons(member, out);
            }
        }
        _ => {}
    }
}

/// Exact clipping through `geo`'s boolean operations.
fn clip_robust(geom: &Geometry<f64>, envelope: &Envelope) -> Option<Geometry<f64>> {
    let clip_poly = envelope.to_rect().to_polygon();
    match GeometryKind::of(geom) {
        GeometryKind::Puntal => clip_points(geom, envelope),
        GeometryKind::Lineal => {
            let mut lines = Vec::new();
            collect_lines(geom.clone(), &mut lines);
            // polygon.clip(&multilinestring, invert): invert=false keeps the inside
            let clipped = clip_poly.clip(&MultiLineString(lines), false);
            if clipped.0.is_empty() {
                None
            } else {
                Some(Geometry::MultiLineString(clipped))
            }
        }
        GeometryKind::Polygonal => {
            let mut polygons = Vec::new();
            collect_polygons(geom.clone(), &mut polygons);
            let subject = MultiPolygon(polygons);
            let result: MultiPolygon<f64> = subject.intersection(&MultiPolygon(vec![clip_poly]));
            if result.0.is_empty() {
                None
            } else {
                Some(Geometry::MultiPolygon(result))
            }
        }
        GeometryKind::Collection => None,
    }
}

/// Fast, non-robust clipping.
fn clip_fast(geom: &Geometry<f64>, envelope: &Envelope) -> Option<Geometry<f64>> {
    match GeometryKind::of(geom) {
        GeometryKind::Puntal => clip_points(geom, envelope),
        GeometryKind::Lineal => {
            let mut lines = Vec::new();
            collect_lines(geom.clone(), &mut lines);
            let parts: Vec<LineString<f64>> = lines
                .iter()
                .flat_map(|ls| clip_linestring_liang_barsky(ls, envelope))
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(Geometry::MultiLineString(MultiLineString(parts)))
            }
        }
        GeometryKind::Polygonal => {
            let mut polygons = Vec::new();
            collect_polygons(geom.clone(), &mut polygons);
            let clipped: Vec<Polygon<f64>> = polygons
                .iter()
                .filter_map(|p| clip_polygon_sutherland_hodgman(p, envelope))
                .collect();
            if clipped.is_empty() {
                None
            } else {
                Some(Geometry::MultiPolygon(MultiPolygon(clipped)))
            }
        }
        GeometryKind::Collection => None,
    }
}

fn clip_points(geom: &Geometry<f64>, envelope: &Envelope) -> Option<Geometry<f64>> {
    let mut points = Vec::new();
    collect_points(geom.clone(), &mut points);
    points.retain(|p| envelope.contains_point(p.x(), p.y()));
    if points.is_empty() {
        None
    } else {
        Some(Geometry::MultiPoint(MultiPoint(points)))
    }
}

/// Clip a linestring segment by segment, joining consecutive pieces into runs.
fn clip_linestring_liang_barsky(ls: &LineString<f64>, envelope: &Envelope) -> Vec<LineString<f64>> {
    let mut parts = Vec::new();
    let mut current: Vec<Coord<f64>> = Vec::new();

    for line in ls.lines() {
        match clip_segment(line.start, line.end, envelope) {
            Some((a, b)) => {
                if current.last() != Some(&a) {
                    flush_run(&mut current, &mut parts);
                    current.push(a);
                }
                current.push(b);
            }
            None => flush_run(&mut current, &mut parts),
        }
    }
    flush_run(&mut current, &mut parts);

    parts
}

fn flush_run(current: &mut Vec<Coord<f64>>, parts: &mut Vec<LineString<f64>>) {
    if current.len() >= 2 {
        parts.push(LineString::new(std::mem::take(current)));
    } else {
        current.clear();
    }
}

/// Liang-Barsky segment clipping. Unclipped endpoints are returned bit-exact.
fn clip_segment(
    p0: Coord<f64>,
    p1: Coord<f64>,
    envelope: &Envelope,
) -> Option<(Coord<f64>, Coord<f64>)> {
    let dx = p1.x - p0.x;
    let dy = p1.y - p0.y;
    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;

    for (p, q) in [
        (-dx, p0.x - envelope.min_x),
        (dx, envelope.max_x - p0.x),
        (-dy, p0.y - envelope.min_y),
        (dy, envelope.max_y - p0.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return None;
                }
                t0 = t0.max(r);
            } else {
                if r < t0 {
                    return None;
                }
                t1 = t1.min(r);
            }
        }
    }

    let lerp = |t: f64| Coord {
        x: p0.x + t * dx,
        y: p0.y + t * dy,
    };
    let a = if t0 == 0.0 { p0 } else { lerp(t0) };
    let b = if t1 == 1.0 { p1 } else { lerp(t1) };
    Some((a, b))
}

/// Clip a polygon using the Sutherland-Hodgman algorithm.
///
/// Fast (O(n)) but assumes valid polygon geometry. May produce incorrect
/// results for self-intersecting polygons.
fn clip_polygon_sutherland_hodgman(poly: &Polygon<f64>, envelope: &Envelope) -> Option<Polygon<f64>> {
    let clipped_exterior = sutherland_hodgman_clip(poly.exterior(), envelope);
    if clipped_exterior.0.len() < 4 {
        return None;
    }

    let clipped_interiors: Vec<LineString<f64>> = poly
        .interiors()
        .iter()
        .map(|interior| sutherland_hodgman_clip(interior, envelope))
        .filter(|ring| ring.0.len() >= 4)
        .collect();

    Some(Polygon::new(clipped_exterior, clipped_interiors))
}

/// Sutherland-Hodgman ring clipping for axis-aligned rectangles.
fn sutherland_hodgman_clip(ring: &LineString<f64>, envelope: &Envelope) -> LineString<f64> {
    let mut output: Vec<Coord<f64>> = ring.0.clone();
    // the closing vertex would otherwise be visited twice
    if output.len() > 1 && output.first() == output.last() {
        output.pop();
    }

    // Left edge
    output = clip_against_edge(
        &output,
        |c| c.x >= envelope.min_x,
        |c1, c2| {
            let t = (envelope.min_x - c1.x) / (c2.x - c1.x);
            Coord {
                x: envelope.min_x,
                y: c1.y + t * (c2.y - c1.y),
            }
        },
    );

    // Right edge
    output = clip_against_edge(
        &output,
        |c| c.x <= envelope.max_x,
        |c1, c2| {
            let t = (envelope.max_x - c1.x) / (c2.x - c1.x);
            Coord {
                x: envelope.max_x,
                y: c1.y + t * (c2.y - c1.y),
            }
        },
    );

    // Bottom edge
    output = clip_against_edge(
        &output,
        |c| c.y >= envelope.min_y,
        |c1, c2| {
            let t = (envelope.min_y - c1.y) / (c2.y - c1.y);
            Coord {
                x: c1.x + t * (c2.x - c1.x),
                y: envelope.min_y,
            }
        },
    );

    // Top edge
    output = clip_against_edge(
        &output,
        |c| c.y <= envelope.max_y,
        |c1, c2| {
            let t = (envelope.max_y - c1.y) / (c2.y - c1.y);
            Coord {
                x: c1.x + t * (c2.x - c1.x),
                y: envelope.max_y,
            }
        },
    );

    if !output.is_empty() && output.first() != output.last() {
        output.push(output[0]);
    }

    LineString::new(output)
}

/// Clip polygon vertices against a single edge
fn clip_against_edge<F, I>(vertices: &[Coord<f64>], inside: F, intersect: I) -> Vec<Coord<f64>>
where
    F: Fn(&Coord<f64>) -> bool,
    I: Fn(&Coord<f64>, &Coord<f64>) -> Coord<f64>,
{
    if vertices.is_empty() {
        return Vec::new();
    }

    let mut output = Vec::with_capacity(vertices.len());

    for i in 0..vertices.len() {
        let current = &vertices[i];
        let next = &vertices[(i + 1) % vertices.len()];

        let current_inside = inside(current);
        let next_inside = inside(next);

        if current_inside {
            output.push(*current);
            if !next_inside {
                // Exiting: add intersection
                output.push(intersect(current, next));
            }
        } else if next_inside {
            // Entering: add intersection
            output.push(intersect(current, next));
        }
    }

    output
}
