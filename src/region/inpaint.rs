//! Content-aware fill of masked pixels
//!
//! Each masked pixel becomes the distance-weighted average of the unmasked
//! pixels in a circular neighborhood. Samples always come from the source
//! buffer, never from pixels filled earlier, so tiles can be processed in
//! any order.

use super::geometry::MaskRaster;
use super::tiles::Tile;
use crate::{
    error::Result,
    types::{MaskPolygon, PixelBuffer},
};

/// Neighbor offsets within `radius` and their weights `1 / (1 + distance)`
#[derive(Debug, Clone)]
pub struct FillKernel {
    taps: Vec<(i64, i64, f64)>,
}

impl FillKernel {
    #[must_use]
    pub fn new(radius: u32) -> Self {
        let r = i64::from(radius);
        let mut taps = Vec::new();
        for dy in -r..=r {
            for dx in -r..=r {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let distance = ((dx * dx + dy * dy) as f64).sqrt();
                if distance <= r as f64 {
                    taps.push((dx, dy, 1.0 / (1.0 + distance)));
                }
            }
        }
        Self { taps }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.taps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    /// Weighted average around `(x, y)` over unmasked source pixels, or `None`
    /// when no such pixel is within reach
    #[must_use]
    pub fn sample(&self, source: &PixelBuffer, mask: &MaskRaster, x: i64, y: i64) -> Option<[u8; 4]> {
        let mut sum = [0.0f64; 4];
        let mut total = 0.0;
        for &(dx, dy, weight) in &self.taps {
            let (sx, sy) = (x + dx, y + dy);
            if mask.contains(sx, sy) {
                continue;
            }
            let Some(px) = source.pixel(sx, sy) else {
                continue;
            };
            for (acc, channel) in sum.iter_mut().zip(px) {
                *acc += weight * f64::from(channel);
            }
            total += weight;
        }
        if total <= 0.0 {
            return None;
        }
        let mut out = [0u8; 4];
        for (o, acc) in out.iter_mut().zip(sum) {
            *o = (acc / total).round().clamp(0.0, 255.0) as u8;
        }
        Some(out)
    }
}

/// Fill the masked pixels of `tile`, reading `source` and writing `target`.
///
/// Returns the number of pixels written. Masked pixels with no unmasked
/// neighbor keep their current value.
pub fn fill_tile(
    source: &PixelBuffer,
    mask: &MaskRaster,
    kernel: &FillKernel,
    tile: &Tile,
    target: &mut PixelBuffer,
) -> usize {
    let area = tile.bounds();
    let bounds = mask.bounds();
    let x0 = i64::from(area.x).max(i64::from(bounds.x));
    let y0 = i64::from(area.y).max(i64::from(bounds.y));
    let x1 = area.right().min(bounds.right());
    let y1 = area.bottom().min(bounds.bottom());

    let mut written = 0;
    for y in y0..y1 {
        for x in x0..x1 {
            if !mask.contains(x, y) {
                continue;
            }
            if let Some(color) = kernel.sample(source, mask, x, y) {
                if target.set_pixel(x, y, color) {
                    written += 1;
                }
            }
        }
    }
    written
}

/// Fill every pixel inside `polygon` in one pass
///
/// # Errors
/// `InvalidSelection` for an empty buffer or a polygon covering no pixel.
pub fn fill_masked(pixels: &PixelBuffer, polygon: &MaskPolygon, radius: u32) -> Result<PixelBuffer> {
    let mask = MaskRaster::rasterize(polygon, pixels.width(), pixels.height())?;
    let kernel = FillKernel::new(radius);
    let mut output = pixels.clone();
    let whole = Tile {
        index: 0,
        x: 0,
        y: 0,
        width: pixels.width(),
        height: pixels.height(),
    };
    fill_tile(pixels, &mask, &kernel, &whole, &mut output);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point;

    fn square(x0: i32, y0: i32, x1: i32, y1: i32) -> MaskPolygon {
        MaskPolygon::new(vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ])
        .unwrap()
    }

    #[test]
    fn test_kernel_is_circular() {
        let kernel = FillKernel::new(1);
        assert_eq!(kernel.len(), 4);
        let kernel = FillKernel::new(5);
        assert!(kernel.taps.iter().all(|&(dx, dy, _)| dx * dx + dy * dy <= 25));
        assert!(kernel.taps.iter().any(|&(dx, dy, _)| (dx, dy) == (3, 4)));
    }

    #[test]
    fn test_fill_of_constant_surroundings_is_exact() {
        let color = [37, 142, 201, 255];
        let mut pixels = PixelBuffer::filled(10, 10, color);
        // 3x3 mask centred on (5, 5)
        for y in 4..7 {
            for x in 4..7 {
                pixels.set_pixel(x, y, [0, 0, 0, 0]);
            }
        }
        let filled = fill_masked(&pixels, &square(4, 4, 7, 7), 5).unwrap();
        assert_eq!(filled, PixelBuffer::filled(10, 10, color));
    }

    #[test]
    fn test_fill_does_not_mutate_source() {
        let pixels = PixelBuffer::filled(6, 6, [10, 10, 10, 255]);
        let before = pixels.clone();
        let _ = fill_masked(&pixels, &square(1, 1, 4, 4), 2).unwrap();
        assert_eq!(pixels, before);
    }

    #[test]
    fn test_pixel_without_samples_keeps_value() {
        let pixels = PixelBuffer::filled(12, 12, [80, 80, 80, 255]);
        // Radius 1 cannot reach outside a 10x10 mask from its centre
        let filled = fill_masked(&pixels, &square(1, 1, 11, 11), 1).unwrap();
        assert_eq!(filled.pixel(6, 6), Some([80, 80, 80, 255]));
    }

    #[test]
    fn test_fill_blends_neighbors() {
        // Left half black, right half white, one-pixel-wide mask on the seam
        let mut pixels = PixelBuffer::filled(10, 10, [0, 0, 0, 255]);
        for y in 0..10 {
            for x in 5..10 {
                pixels.set_pixel(x, y, [255, 255, 255, 255]);
            }
        }
        let filled = fill_masked(&pixels, &square(5, 0, 6, 10), 2).unwrap();
        let px = filled.pixel(5, 5).unwrap();
        assert!(px[0] > 0 && px[0] < 255, "expected a blend, got {px:?}");
        assert_eq!(px[3], 255);
    }

    #[test]
    fn test_mask_at_border_never_reads_outside() {
        let pixels = PixelBuffer::filled(4, 4, [9, 9, 9, 255]);
        let filled = fill_masked(&pixels, &square(-3, -3, 2, 2), 5).unwrap();
        assert_eq!(filled, pixels);
    }
}
