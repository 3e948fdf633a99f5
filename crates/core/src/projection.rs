//! Projection handling ahead of the coordinate transform.
//!
//! Some source/target combinations have a restricted valid domain: geographic
//! data rendered in Web Mercator cannot reach the poles, and coordinates
//! outside ±180° longitude have to be wrapped back before projecting. A
//! [`ProjectionHandler`] cuts geometries down to the valid area and wraps
//! longitudes, so the transform stage only ever sees projectable input.

use geo::{BoundingRect, Geometry, MapCoords};

use crate::clip::clip_to_envelope;
use crate::crs::{Crs, MERCATOR_MAX_LATITUDE};
use crate::envelope::{Envelope, ReferencedEnvelope};
use crate::geometry::empty_geometry;

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionHandler {
    source_crs: Crs,
    /// Valid area in source coordinates
    valid_area: Envelope,
    /// Shift longitudes into [-180, 180]
    wrap_longitudes: bool,
}

impl ProjectionHandler {
    /// Resolve a handler for rendering `rendering_area` from data in `source_crs`.
    ///
    /// Returns `None` when the combination needs no special handling.
    pub fn for_rendering(rendering_area: &ReferencedEnvelope, source_crs: Crs) -> Option<Self> {
        match (source_crs, rendering_area.crs) {
            (Crs::Wgs84, Crs::WebMercator) => Some(Self {
                source_crs,
                valid_area: Envelope::new(
                    -180.0,
                    -MERCATOR_MAX_LATITUDE,
                    180.0,
                    MERCATOR_MAX_LATITUDE,
                ),
                wrap_longitudes: true,
            }),
            _ => None,
        }
    }

    pub fn source_crs(&self) -> Crs {
        self.source_crs
    }

    pub fn valid_area(&self) -> &Envelope {
        &self.valid_area
    }

    /// Bring a geometry into the projectable domain.
    ///
    /// Returns the empty sentinel when nothing of the geometry is valid.
    pub fn pre_process(&self, geom: &Geometry<f64>) -> Geometry<f64> {
        let wrapped = if self.wrap_longitudes && needs_wrap(geom) {
            log::trace!("wrapping longitudes of geometry outside [-180, 180]");
            geom.map_coords(|mut c| {
                c.x = wrap_longitude(c.x);
                c
            })
        } else {
            geom.clone()
        };

        let Some(rect) = wrapped.bounding_rect() else {
            return empty_geometry();
        };
        let bounds = Envelope::from_rect(&rect);
        if self.valid_area.contains(&bounds) {
            return wrapped;
        }
        if !self.valid_area.intersects(&bounds) {
            return empty_geometry();
        }
        clip_to_envelope(&wrapped, &self.valid_area).unwrap_or_else(empty_geometry)
    }
}

fn needs_wrap(geom: &Geometry<f64>) -> bool {
    geom.bounding_rect()
        .map(|r| r.min().x < -180.0 || r.max().x > 180.0)
        .unwrap_or(false)
}

/// Map any longitude onto [-180, 180].
pub fn wrap_longitude(lng: f64) -> f64 {
    if (-180.0..=180.0).contains(&lng) {
        return lng;
    }
    let wrapped = (lng + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && lng > 0.0 {
        180.0
    } else {
        wrapped
    }
}
