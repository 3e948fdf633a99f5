//! Tile coordinate math and utilities
//!
//! XYZ tile addressing in Web Mercator (EPSG:3857) and the metatile layout
//! used to render blocks of adjacent tiles in one pass.

use std::f64::consts::PI;

use crate::crs::{Crs, EARTH_RADIUS};
use crate::envelope::{Envelope, ReferencedEnvelope};
use crate::{Error, Result};

/// Half the width of the Web Mercator world, in meters
pub const MERCATOR_HALF_WORLD: f64 = PI * EARTH_RADIUS;

/// Maximum supported zoom level
pub const MAX_ZOOM: u8 = 30;

/// Tile coordinates: x, y, and zoom level. `y = 0` is the northern row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl TileCoord {
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Like [`TileCoord::new`], rejecting zooms above [`MAX_ZOOM`] and
    /// columns or rows outside the zoom level.
    pub fn checked(x: u32, y: u32, z: u8) -> Result<Self> {
        if z > MAX_ZOOM {
            return Err(Error::InvalidConfig(format!(
                "zoom {} above maximum {}",
                z, MAX_ZOOM
            )));
        }
        let n = tiles_at_zoom(z);
        if u64::from(x) >= n || u64::from(y) >= n {
            return Err(Error::InvalidConfig(format!(
                "tile {}/{}/{} outside the zoom level",
                z, x, y
            )));
        }
        Ok(Self { x, y, z })
    }

    /// Bounds in Web Mercator meters.
    pub fn bounds(&self) -> Envelope {
        let size = tile_size_meters(self.z);
        let min_x = -MERCATOR_HALF_WORLD + self.x as f64 * size;
        let max_y = MERCATOR_HALF_WORLD - self.y as f64 * size;
        Envelope::new(min_x, max_y - size, min_x + size, max_y)
    }

    /// Bounds in degrees (lng/lat).
    pub fn geographic_bounds(&self) -> Envelope {
        let n = tiles_at_zoom(self.z) as f64;
        let lng_min = (self.x as f64) / n * 360.0 - 180.0;
        let lng_max = (self.x as f64 + 1.0) / n * 360.0 - 180.0;

        let lat_deg = |y: f64| {
            let y_rad = PI * (1.0 - 2.0 * y / n);
            y_rad.sinh().atan().to_degrees()
        };

        Envelope::new(
            lng_min,
            lat_deg(self.y as f64 + 1.0),
            lng_max,
            lat_deg(self.y as f64),
        )
    }

    pub fn rendering_area(&self) -> ReferencedEnvelope {
        ReferencedEnvelope::new(self.bounds(), Crs::WebMercator)
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

#[inline]
pub fn tiles_at_zoom(z: u8) -> u64 {
    1u64 << z
}

/// Edge length of one tile at zoom `z`, in meters
pub fn tile_size_meters(z: u8) -> f64 {
    2.0 * MERCATOR_HALF_WORLD / tiles_at_zoom(z) as f64
}

/// Convert longitude/latitude to the tile containing it at `zoom`.
///
/// Latitudes are clamped to the Web Mercator range, the result to the grid.
pub fn lng_lat_to_tile(lng: f64, lat: f64, zoom: u8) -> TileCoord {
    let n = tiles_at_zoom(zoom) as f64;
    let max_index = n - 1.0;

    let x = ((lng + 180.0) / 360.0 * n).floor().clamp(0.0, max_index);

    let lat_rad = lat
        .clamp(
            -crate::crs::MERCATOR_MAX_LATITUDE,
            crate::crs::MERCATOR_MAX_LATITUDE,
        )
        .to_radians();
    let y = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n)
        .floor()
        .clamp(0.0, max_index);

    TileCoord::new(x as u32, y as u32, zoom)
}

/// All tiles at `zoom` touching a lng/lat envelope, row by row.
pub fn tiles_for_bbox(bbox: &Envelope, zoom: u8) -> impl Iterator<Item = TileCoord> {
    let top_left = lng_lat_to_tile(bbox.min_x, bbox.max_y, zoom);
    let bottom_right = lng_lat_to_tile(bbox.max_x, bbox.min_y, zoom);

    (top_left.y..=bottom_right.y).flat_map(move |y| {
        (top_left.x..=bottom_right.x).map(move |x| TileCoord::new(x, y, zoom))
    })
}

/// Shape of a metatile in tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetatileLayout {
    pub tiles_wide: u32,
    pub tiles_high: u32,
}

impl MetatileLayout {
    pub fn new(tiles_wide: u32, tiles_high: u32) -> Result<Self> {
        if tiles_wide == 0 || tiles_high == 0 {
            return Err(Error::InvalidConfig(format!(
                "metatile layout must be at least 1x1, got {}x{}",
                tiles_wide, tiles_high
            )));
        }
        Ok(Self {
            tiles_wide,
            tiles_high,
        })
    }

    pub fn square(size: u32) -> Result<Self> {
        Self::new(size, size)
    }

    pub fn tile_count(&self) -> usize {
        self.tiles_wide as usize * self.tiles_high as usize
    }

    /// Row-major index, `dy = 0` being the northern row.
    pub fn index(&self, dx: u32, dy: u32) -> Option<usize> {
        if dx >= self.tiles_wide || dy >= self.tiles_high {
            return None;
        }
        Some(dy as usize * self.tiles_wide as usize + dx as usize)
    }

    /// `(dx, dy)` of a flat index.
    pub fn position(&self, index: usize) -> Option<(u32, u32)> {
        if index >= self.tile_count() {
            return None;
        }
        let w = self.tiles_wide as usize;
        Some(((index % w) as u32, (index / w) as u32))
    }

    /// Split an envelope into one envelope per tile, in index order.
    ///
    /// Edges are computed from the outer bounds so neighbours share them exactly.
    pub fn split(&self, envelope: &Envelope) -> Vec<Envelope> {
        let w = self.tiles_wide as f64;
        let h = self.tiles_high as f64;
        let x_at = |i: u32| envelope.min_x + envelope.width() * i as f64 / w;
        let y_at = |j: u32| envelope.max_y - envelope.height() * j as f64 / h;

        let mut tiles = Vec::with_capacity(self.tile_count());
        for dy in 0..self.tiles_high {
            for dx in 0..self.tiles_wide {
                tiles.push(Envelope::new(x_at(dx), y_at(dy + 1), x_at(dx + 1), y_at(dy)));
            }
        }
        tiles
    }

    /// Web Mercator bounds of the metatile whose north-west tile is `origin`.
    pub fn bounds(&self, origin: TileCoord) -> Envelope {
        let size = tile_size_meters(origin.z);
        let nw = origin.bounds();
        Envelope::new(
            nw.min_x,
            nw.max_y - size * self.tiles_high as f64,
            nw.min_x + size * self.tiles_wide as f64,
            nw.max_y,
        )
    }

    /// The tile addressed by `(dx, dy)` relative to `origin`.
    pub fn tile_at(&self, origin: TileCoord, dx: u32, dy: u32) -> TileCoord {
        TileCoord::new(origin.x + dx, origin.y + dy, origin.z)
    }

    /// North-west tile of the metatile containing `tile`.
    pub fn origin_of(&self, tile: TileCoord) -> TileCoord {
        TileCoord::new(
            tile.x - tile.x % self.tiles_wide,
            tile.y - tile.y % self.tiles_high,
            tile.z,
        )
    }
}

impl Default for MetatileLayout {
    fn default() -> Self {
        Self {
            tiles_wide: 1,
            tiles_high: 1,
        }
    }
}
