//! Tile grid used to chunk local processing
//!
//! Work on a buffer is split into square tiles so that cancellation can be
//! observed and progress reported between tiles.

use crate::types::BoundingBox;

/// One rectangular chunk of a buffer; edge tiles may be smaller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tile {
    /// Row-major position in the grid
    pub index: usize,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Tile {
    #[must_use]
    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::new(self.x as i32, self.y as i32, self.width, self.height)
    }

    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Grid of `tile_size` x `tile_size` tiles covering a `width` x `height` buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    width: u32,
    height: u32,
    tile_size: u32,
    cols: u32,
    rows: u32,
}

impl TileGrid {
    /// A `tile_size` of zero is treated as one
    #[must_use]
    pub fn new(width: u32, height: u32, tile_size: u32) -> Self {
        let tile_size = tile_size.max(1);
        Self {
            width,
            height,
            tile_size,
            cols: width.div_ceil(tile_size),
            rows: height.div_ceil(tile_size),
        }
    }

    #[must_use]
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    #[must_use]
    pub fn cols(&self) -> u32 {
        self.cols
    }

    #[must_use]
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Number of tiles
    #[must_use]
    pub fn len(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of the tile containing pixel `(x, y)`; the pixel must be in bounds
    #[must_use]
    pub fn index_of(&self, x: u32, y: u32) -> usize {
        (y / self.tile_size) as usize * self.cols as usize + (x / self.tile_size) as usize
    }

    #[must_use]
    pub fn tile(&self, index: usize) -> Option<Tile> {
        if index >= self.len() {
            return None;
        }
        let col = (index % self.cols as usize) as u32;
        let row = (index / self.cols as usize) as u32;
        let x = col * self.tile_size;
        let y = row * self.tile_size;
        Some(Tile {
            index,
            x,
            y,
            width: self.tile_size.min(self.width - x),
            height: self.tile_size.min(self.height - y),
        })
    }

    /// Every tile in row-major order
    pub fn iter(&self) -> impl Iterator<Item = Tile> + '_ {
        (0..self.len()).filter_map(|index| self.tile(index))
    }

    /// Tiles overlapping `bounds`, in row-major order
    #[must_use]
    pub fn intersecting(&self, bounds: BoundingBox) -> Vec<Tile> {
        let clamped = bounds.clamp_to(self.width, self.height);
        if clamped.is_empty() {
            return Vec::new();
        }
        let x0 = clamped.x as u32 / self.tile_size;
        let y0 = clamped.y as u32 / self.tile_size;
        let x1 = (clamped.x as u32 + clamped.width - 1) / self.tile_size;
        let y1 = (clamped.y as u32 + clamped.height - 1) / self.tile_size;
        (y0..=y1)
            .flat_map(|row| (x0..=x1).map(move |col| row as usize * self.cols as usize + col as usize))
            .filter_map(|index| self.tile(index))
            .collect()
    }
}
