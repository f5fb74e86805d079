//! Local region analysis engine
//!
//! Pure pixel algorithms used when no provider could serve an operation:
//! seeded region growing for detection and weighted neighborhood fill for
//! removal. The async entry points process one tile at a time, check for
//! cancellation at the start of each tile and yield to the runtime between
//! tiles.

pub mod flood_fill;
pub mod geometry;
pub mod inpaint;
pub mod tiles;

pub use flood_fill::{grow_region, Region, RegionGrower};
pub use geometry::MaskRaster;
pub use inpaint::{fill_masked, FillKernel};
pub use tiles::{Tile, TileGrid};

use crate::{
    config::RegionConfig,
    error::{Result, RetouchError},
    types::{DetectedObject, MaskPolygon, PixelBuffer, Point},
};
use tokio_util::sync::CancellationToken;

/// Label of the object produced by local detection
pub const LOCAL_DETECTION_LABEL: &str = "Detected Region";

/// Confidence assigned to locally detected regions
pub const LOCAL_DETECTION_CONFIDENCE: f32 = 0.7;

/// Tiles finished so far out of the expected total
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileProgress {
    pub completed: usize,
    pub total: usize,
}

impl TileProgress {
    /// Completed share in `[0, 1]`
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.completed as f64 / self.total as f64).min(1.0)
    }
}

/// Tile-by-tile runner for the local algorithms
#[derive(Debug, Clone)]
pub struct RegionEngine {
    config: RegionConfig,
}

impl RegionEngine {
    #[must_use]
    pub fn new(config: RegionConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    /// Grow a region from `seed` and turn it into at most one detection.
    ///
    /// A region below the minimum size yields an empty list.
    ///
    /// # Errors
    /// - `InvalidSelection` for a seed outside the buffer
    /// - `Cancelled` when the token fires between tiles
    pub async fn detect(
        &self,
        pixels: &PixelBuffer,
        seed: Point,
        token: &CancellationToken,
        on_tile: &mut (dyn FnMut(TileProgress) + Send),
    ) -> Result<Vec<DetectedObject>> {
        let mut grower = RegionGrower::new(pixels, seed, &self.config)?;
        let total = grower.grid().len();
        let mut completed = 0;

        while let Some(tile) = grower.next_tile() {
            if token.is_cancelled() {
                return Err(RetouchError::Cancelled);
            }
            grower.drain_tile(tile);
            completed += 1;
            on_tile(TileProgress {
                completed: completed.min(total),
                total,
            });
            tokio::task::yield_now().await;
        }

        let region = grower.finish();
        log::debug!(
            "Local region from {}: {} px, bounds {:?}{}",
            seed,
            region.pixel_count,
            region.bounds,
            if region.truncated { " (capped)" } else { "" }
        );

        if region.pixel_count < self.config.min_region_pixels {
            log::info!(
                "Region of {} px is below the {} px minimum; nothing detected",
                region.pixel_count,
                self.config.min_region_pixels
            );
            return Ok(Vec::new());
        }

        let object = DetectedObject::new(
            "local-0",
            LOCAL_DETECTION_LABEL,
            LOCAL_DETECTION_CONFIDENCE,
            region.bounds,
        )
        .with_mask(region.mask)
        .with_color(DetectedObject::palette_color(0));
        Ok(vec![object])
    }

    /// Fill the pixels inside `polygon`, returning an edited copy.
    ///
    /// # Errors
    /// - `InvalidSelection` for an empty buffer or a polygon covering no pixel
    /// - `Cancelled` when the token fires between tiles
    pub async fn remove(
        &self,
        pixels: &PixelBuffer,
        polygon: &MaskPolygon,
        token: &CancellationToken,
        on_tile: &mut (dyn FnMut(TileProgress) + Send),
    ) -> Result<PixelBuffer> {
        let mask = MaskRaster::rasterize(polygon, pixels.width(), pixels.height())?;
        let kernel = FillKernel::new(self.config.fill_radius);
        let grid = TileGrid::new(pixels.width(), pixels.height(), self.config.tile_size);
        let tiles = grid.intersecting(mask.bounds());
        let total = tiles.len();
        let mut working = pixels.clone();
        let mut written = 0;

        for (done, tile) in tiles.iter().enumerate() {
            if token.is_cancelled() {
                return Err(RetouchError::Cancelled);
            }
            written += inpaint::fill_tile(pixels, &mask, &kernel, tile, &mut working);
            on_tile(TileProgress {
                completed: done + 1,
                total,
            });
            tokio::task::yield_now().await;
        }

        log::debug!(
            "Filled {} of {} masked px across {} tile(s)",
            written,
            mask.count(),
            total
        );
        Ok(working)
    }
}
