//! Polygon rasterization

use crate::{
    error::{Result, RetouchError},
    types::{BoundingBox, MaskPolygon},
};

/// Pixels of a buffer covered by a mask polygon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskRaster {
    width: u32,
    height: u32,
    /// Covered area, clamped to the buffer
    bounds: BoundingBox,
    covered: Vec<bool>,
    count: usize,
}

impl MaskRaster {
    /// Rasterize `polygon` over a `width` x `height` buffer with the even-odd
    /// rule at pixel centres.
    ///
    /// # Errors
    /// `InvalidSelection` for a zero-size buffer or a polygon covering no pixel.
    pub fn rasterize(polygon: &MaskPolygon, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(RetouchError::invalid_selection("cannot apply a mask to an empty image"));
        }

        let search = polygon.bounding_box().expand(1).clamp_to(width, height);
        let mut covered = vec![false; width as usize * height as usize];
        let mut count = 0;
        let (mut min_x, mut min_y) = (i64::MAX, i64::MAX);
        let (mut max_x, mut max_y) = (i64::MIN, i64::MIN);

        for y in i64::from(search.y)..search.bottom() {
            for x in i64::from(search.x)..search.right() {
                if !polygon.contains_pixel(x, y) {
                    continue;
                }
                if let Some(cell) = covered.get_mut(y as usize * width as usize + x as usize) {
                    *cell = true;
                    count += 1;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }

        if count == 0 {
            return Err(RetouchError::invalid_selection(
                "the mask does not cover any pixel of the image",
            ));
        }

        let bounds = BoundingBox::new(
            min_x as i32,
            min_y as i32,
            (max_x - min_x + 1) as u32,
            (max_y - min_y + 1) as u32,
        );
        Ok(Self {
            width,
            height,
            bounds,
            covered,
            count,
        })
    }

    #[must_use]
    pub fn contains(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return false;
        }
        self.covered
            .get(y as usize * self.width as usize + x as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Smallest box holding every covered pixel
    #[must_use]
    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    /// Number of covered pixels
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point;

    fn polygon(points: &[(i32, i32)]) -> MaskPolygon {
        MaskPolygon::new(points.iter().map(|&(x, y)| Point::new(x, y)).collect()).unwrap()
    }

    #[test]
    fn test_square_mask() {
        let raster = MaskRaster::rasterize(&polygon(&[(5, 5), (8, 5), (8, 8), (5, 8)]), 10, 10).unwrap();
        assert_eq!(raster.count(), 9);
        assert_eq!(raster.bounds(), BoundingBox::new(5, 5, 3, 3));
        assert!(raster.contains(7, 7));
        assert!(!raster.contains(8, 8));
        assert!(!raster.contains(-1, 5));
    }

    #[test]
    fn test_mask_partially_outside_is_clipped() {
        let raster =
            MaskRaster::rasterize(&polygon(&[(-5, -5), (3, -5), (3, 3), (-5, 3)]), 10, 10).unwrap();
        assert_eq!(raster.count(), 9);
        assert_eq!(raster.bounds(), BoundingBox::new(0, 0, 3, 3));
    }

    #[test]
    fn test_mask_spanning_full_coordinate_range_covers_image() {
        let huge = polygon(&[
            (i32::MIN, i32::MIN),
            (i32::MAX, i32::MIN),
            (i32::MAX, i32::MAX),
            (i32::MIN, i32::MAX),
        ]);
        let raster = MaskRaster::rasterize(&huge, 10, 10).unwrap();
        assert_eq!(raster.count(), 100);
        assert_eq!(raster.bounds(), BoundingBox::new(0, 0, 10, 10));
    }

    #[test]
    fn test_self_intersecting_polygon_uses_even_odd() {
        // Bow tie: left and right lobes are inside, top and bottom are not
        let raster =
            MaskRaster::rasterize(&polygon(&[(0, 0), (10, 10), (10, 0), (0, 10)]), 10, 10).unwrap();
        assert!(raster.contains(1, 5));
        assert!(!raster.contains(5, 1));
    }

    #[test]
    fn test_empty_coverage_is_invalid() {
        let degenerate = polygon(&[(2, 2), (6, 2), (4, 2)]);
        assert!(MaskRaster::rasterize(&degenerate, 10, 10).is_err());

        let outside = polygon(&[(50, 50), (60, 50), (60, 60)]);
        assert!(MaskRaster::rasterize(&outside, 10, 10).is_err());

        let square = polygon(&[(0, 0), (2, 0), (2, 2)]);
        assert!(MaskRaster::rasterize(&square, 0, 10).is_err());
    }
}
