//! Seeded region growing
//!
//! Grows a 4-connected region from a seed pixel, accepting neighbors whose
//! color is close to the seed color. Pending pixels are queued per tile and
//! tiles are drained in the order they were first reached, which lets the
//! async engine stop or yield between tiles without changing the result.

use super::tiles::TileGrid;
use crate::{
    config::RegionConfig,
    error::{Result, RetouchError},
    types::{BoundingBox, ObjectMask, PixelBuffer, Point},
};
use std::collections::VecDeque;

const NEIGHBORS: [(i64, i64); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

/// A grown region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub seed: Point,
    pub seed_color: [u8; 4],
    /// Number of member pixels, never above the configured cap
    pub pixel_count: usize,
    pub bounds: BoundingBox,
    /// Membership within `bounds`
    pub mask: ObjectMask,
    /// Growth stopped at the cap rather than at the region's edge
    pub truncated: bool,
}

/// Sum of absolute R, G and B differences; alpha is ignored
#[must_use]
pub fn color_distance(a: [u8; 4], b: [u8; 4]) -> u32 {
    a.iter()
        .zip(b.iter())
        .take(3)
        .map(|(x, y)| u32::from(x.abs_diff(*y)))
        .sum()
}

/// Incremental region growth, one tile at a time
pub struct RegionGrower<'a> {
    pixels: &'a PixelBuffer,
    grid: TileGrid,
    seed: Point,
    seed_color: [u8; 4],
    threshold: u32,
    cap: usize,
    accepted: Vec<bool>,
    count: usize,
    queues: Vec<VecDeque<(u32, u32)>>,
    scheduled: Vec<bool>,
    order: VecDeque<usize>,
    min: (u32, u32),
    max: (u32, u32),
    truncated: bool,
}

impl<'a> RegionGrower<'a> {
    /// Start growth at `seed`; the seed itself is the first member
    ///
    /// # Errors
    /// `InvalidSelection` for an empty buffer or a seed outside it.
    pub fn new(pixels: &'a PixelBuffer, seed: Point, config: &RegionConfig) -> Result<Self> {
        if pixels.is_empty() {
            return Err(RetouchError::invalid_selection("cannot grow a region in an empty image"));
        }
        let seed_color = pixels
            .pixel(i64::from(seed.x), i64::from(seed.y))
            .ok_or_else(|| {
                RetouchError::invalid_selection(format!(
                    "point {} is outside the {}x{} image",
                    seed,
                    pixels.width(),
                    pixels.height()
                ))
            })?;

        let grid = TileGrid::new(pixels.width(), pixels.height(), config.tile_size);
        let mut grower = Self {
            pixels,
            grid,
            seed,
            seed_color,
            threshold: config.similarity_threshold,
            cap: config.max_region_pixels,
            accepted: vec![false; pixels.width() as usize * pixels.height() as usize],
            count: 0,
            queues: vec![VecDeque::new(); grid.len()],
            scheduled: vec![false; grid.len()],
            order: VecDeque::new(),
            min: (seed.x as u32, seed.y as u32),
            max: (seed.x as u32, seed.y as u32),
            truncated: false,
        };
        grower.accept(i64::from(seed.x), i64::from(seed.y));
        Ok(grower)
    }

    #[must_use]
    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    /// Members accepted so far
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.count
    }

    /// True once no pending pixels remain
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.order.is_empty()
    }

    /// Next tile with pending pixels, in first-discovery order
    pub fn next_tile(&mut self) -> Option<usize> {
        let tile = self.order.pop_front()?;
        if let Some(flag) = self.scheduled.get_mut(tile) {
            *flag = false;
        }
        Some(tile)
    }

    /// Expand every pending pixel of `tile`.
    ///
    /// Neighbors in the same tile are expanded in the same call; neighbors in
    /// other tiles are queued there.
    pub fn drain_tile(&mut self, tile: usize) {
        loop {
            let Some((x, y)) = self.queues.get_mut(tile).and_then(VecDeque::pop_front) else {
                return;
            };
            for (dx, dy) in NEIGHBORS {
                self.accept(i64::from(x) + dx, i64::from(y) + dy);
                if self.truncated {
                    self.clear_pending();
                    return;
                }
            }
        }
    }

    /// Run to completion
    pub fn run(&mut self) {
        while let Some(tile) = self.next_tile() {
            self.drain_tile(tile);
        }
    }

    fn clear_pending(&mut self) {
        self.queues.iter_mut().for_each(VecDeque::clear);
        self.scheduled.iter_mut().for_each(|f| *f = false);
        self.order.clear();
    }

    fn accept(&mut self, x: i64, y: i64) -> bool {
        let Some(offset) = self.pixels.offset(x, y) else {
            return false;
        };
        let index = offset / crate::types::CHANNELS;
        match self.accepted.get(index) {
            Some(false) => {},
            _ => return false,
        }
        let Some(color) = self.pixels.pixel(x, y) else {
            return false;
        };
        if color_distance(color, self.seed_color) > self.threshold {
            return false;
        }
        if self.count >= self.cap {
            self.truncated = true;
            return false;
        }

        if let Some(flag) = self.accepted.get_mut(index) {
            *flag = true;
        }
        self.count += 1;

        let (ux, uy) = (x as u32, y as u32);
        self.min = (self.min.0.min(ux), self.min.1.min(uy));
        self.max = (self.max.0.max(ux), self.max.1.max(uy));

        let tile = self.grid.index_of(ux, uy);
        if let Some(queue) = self.queues.get_mut(tile) {
            queue.push_back((ux, uy));
        }
        if let Some(flag) = self.scheduled.get_mut(tile) {
            if !*flag {
                *flag = true;
                self.order.push_back(tile);
            }
        }
        true
    }

    /// Assemble the region from the members accepted so far
    #[must_use]
    pub fn finish(self) -> Region {
        let bounds = BoundingBox::from_corners(
            Point::new(self.min.0 as i32, self.min.1 as i32),
            Point::new(self.max.0 as i32, self.max.1 as i32),
        );
        let width = self.pixels.width() as usize;
        let mut data = Vec::with_capacity(bounds.area() as usize);
        for y in self.min.1..=self.max.1 {
            for x in self.min.0..=self.max.0 {
                let member = self
                    .accepted
                    .get(y as usize * width + x as usize)
                    .copied()
                    .unwrap_or(false);
                data.push(if member { 255 } else { 0 });
            }
        }
        Region {
            seed: self.seed,
            seed_color: self.seed_color,
            pixel_count: self.count,
            bounds,
            mask: ObjectMask { bounds, data },
            truncated: self.truncated,
        }
    }
}

/// Grow the region around `seed` in one pass
///
/// # Errors
/// `InvalidSelection` for an empty buffer or a seed outside it.
pub fn grow_region(pixels: &PixelBuffer, seed: Point, config: &RegionConfig) -> Result<Region> {
    let mut grower = RegionGrower::new(pixels, seed, config)?;
    grower.run();
    Ok(grower.finish())
}
