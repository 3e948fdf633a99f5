//! Rendered tile payloads.
//!
//! A request yields either one encoded tile or, for metatiles, a grid of
//! them. Bytes are passed through as the builder produced them.

use crate::tile::MetatileLayout;
use crate::{Error, Result};

/// One encoded tile and its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTile {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl EncodedTile {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Tiles of one metatile, row-major with `dy = 0` the northern row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetatileTiles {
    layout: MetatileLayout,
    tiles: Vec<EncodedTile>,
}

impl MetatileTiles {
    pub fn new(layout: MetatileLayout, tiles: Vec<EncodedTile>) -> Result<Self> {
        if tiles.len() != layout.tile_count() {
            return Err(Error::InvalidConfig(format!(
                "metatile {}x{} needs {} tiles, got {}",
                layout.tiles_wide,
                layout.tiles_high,
                layout.tile_count(),
                tiles.len()
            )));
        }
        Ok(Self { layout, tiles })
    }

    pub fn layout(&self) -> MetatileLayout {
        self.layout
    }

    pub fn tiles_wide(&self) -> u32 {
        self.layout.tiles_wide
    }

    pub fn tiles_high(&self) -> u32 {
        self.layout.tiles_high
    }

    pub fn get(&self, dx: u32, dy: u32) -> Option<&EncodedTile> {
        self.layout.index(dx, dy).and_then(|i| self.tiles.get(i))
    }

    pub fn get_index(&self, index: usize) -> Option<&EncodedTile> {
        self.tiles.get(index)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// `((dx, dy), tile)` in index order
    pub fn iter(&self) -> impl Iterator<Item = ((u32, u32), &EncodedTile)> + '_ {
        let w = self.layout.tiles_wide as usize;
        self.tiles
            .iter()
            .enumerate()
            .map(move |(i, t)| (((i % w) as u32, (i / w) as u32), t))
    }

    pub fn into_tiles(self) -> Vec<EncodedTile> {
        self.tiles
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileOutput {
    Single(EncodedTile),
    Metatile(MetatileTiles),
}

impl TileOutput {
    pub fn tile_count(&self) -> usize {
        match self {
            TileOutput::Single(_) => 1,
            TileOutput::Metatile(tiles) => tiles.len(),
        }
    }

    pub fn as_single(&self) -> Option<&EncodedTile> {
        match self {
            TileOutput::Single(tile) => Some(tile),
            TileOutput::Metatile(_) => None,
        }
    }

    pub fn as_metatile(&self) -> Option<&MetatileTiles> {
        match self {
            TileOutput::Single(_) => None,
            TileOutput::Metatile(tiles) => Some(tiles),
        }
    }

    /// Total encoded size in bytes.
    pub fn total_bytes(&self) -> usize {
        match self {
            TileOutput::Single(tile) => tile.len(),
            TileOutput::Metatile(tiles) => tiles.tiles.iter().map(EncodedTile::len).sum(),
        }
    }
}
