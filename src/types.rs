//! Core data model shared by the orchestrator, the provider chain and the
//! local region engine.

use crate::error::{ErrorKind, Result, RetouchError};
use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of interleaved channels per pixel (R, G, B, A)
pub const CHANNELS: usize = 4;

/// Colors assigned to detected objects, indexed by position in a result list
pub const DISPLAY_PALETTE: [[u8; 4]; 8] = [
    [255, 99, 71, 160],
    [65, 105, 225, 160],
    [50, 205, 50, 160],
    [255, 215, 0, 160],
    [186, 85, 211, 160],
    [0, 206, 209, 160],
    [255, 140, 0, 160],
    [220, 20, 60, 160],
];

/// A point in buffer pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Axis-aligned rectangle in pixel coordinates.
///
/// Extents are unsigned, so `width >= 0 && height >= 0` holds by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    #[must_use]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Box spanning two inclusive corner pixels, in either order.
    ///
    /// Extents saturate at `u32::MAX` for spans covering the whole `i32` range.
    #[must_use]
    pub fn from_corners(a: Point, b: Point) -> Self {
        let (x0, x1) = (a.x.min(b.x), a.x.max(b.x));
        let (y0, y1) = (a.y.min(b.y), a.y.max(b.y));
        let span = |lo: i32, hi: i32| {
            u32::try_from(i64::from(hi) - i64::from(lo) + 1).unwrap_or(u32::MAX)
        };
        Self {
            x: x0,
            y: y0,
            width: span(x0, x1),
            height: span(y0, y1),
        }
    }

    /// Exclusive right edge
    #[must_use]
    pub fn right(&self) -> i64 {
        i64::from(self.x) + i64::from(self.width)
    }

    /// Exclusive bottom edge
    #[must_use]
    pub fn bottom(&self) -> i64 {
        i64::from(self.y) + i64::from(self.height)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    #[must_use]
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= i64::from(self.x) && x < self.right() && y >= i64::from(self.y) && y < self.bottom()
    }

    /// Intersect with a `width` x `height` buffer rooted at the origin
    #[must_use]
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let x0 = i64::from(self.x).clamp(0, i64::from(width));
        let y0 = i64::from(self.y).clamp(0, i64::from(height));
        let x1 = self.right().clamp(0, i64::from(width));
        let y1 = self.bottom().clamp(0, i64::from(height));
        Self {
            x: x0 as i32,
            y: y0 as i32,
            width: (x1 - x0).max(0) as u32,
            height: (y1 - y0).max(0) as u32,
        }
    }

    /// Grow by `margin` pixels on every side
    #[must_use]
    pub fn expand(&self, margin: u32) -> Self {
        let m = i64::from(margin);
        let x = (i64::from(self.x) - m).max(i64::from(i32::MIN));
        let y = (i64::from(self.y) - m).max(i64::from(i32::MIN));
        Self {
            x: x as i32,
            y: y as i32,
            width: (i64::from(self.width) + 2 * m).min(i64::from(u32::MAX)) as u32,
            height: (i64::from(self.height) + 2 * m).min(i64::from(u32::MAX)) as u32,
        }
    }

    /// Multiply position and extent by `factor`, rounding outward
    #[must_use]
    pub fn scale(&self, factor: f64) -> Self {
        let x0 = (f64::from(self.x) * factor).floor();
        let y0 = (f64::from(self.y) * factor).floor();
        let x1 = (self.right() as f64 * factor).ceil();
        let y1 = (self.bottom() as f64 * factor).ceil();
        Self {
            x: x0 as i32,
            y: y0 as i32,
            width: (x1 - x0).max(0.0) as u32,
            height: (y1 - y0).max(0.0) as u32,
        }
    }

    /// The four corners as a clockwise polygon
    ///
    /// # Errors
    /// Returns `InvalidSelection` when the box is empty.
    pub fn to_polygon(&self) -> Result<MaskPolygon> {
        if self.is_empty() {
            return Err(RetouchError::invalid_selection(
                "cannot build a mask from an empty bounding box",
            ));
        }
        let right = self.right().min(i64::from(i32::MAX)) as i32;
        let bottom = self.bottom().min(i64::from(i32::MAX)) as i32;
        MaskPolygon::new(vec![
            Point::new(self.x, self.y),
            Point::new(right, self.y),
            Point::new(right, bottom),
            Point::new(self.x, bottom),
        ])
    }
}

/// Closed polygon drawn by the user. Vertex order is significant; the last
/// vertex connects back to the first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point>", into = "Vec<Point>")]
pub struct MaskPolygon {
    points: Vec<Point>,
}

impl MaskPolygon {
    /// Minimum number of vertices in a valid mask
    pub const MIN_POINTS: usize = 3;

    /// # Errors
    /// Returns `InvalidSelection` for fewer than three points.
    pub fn new(points: Vec<Point>) -> Result<Self> {
        if points.len() < Self::MIN_POINTS {
            return Err(RetouchError::invalid_selection(format!(
                "mask needs at least {} points, got {}",
                Self::MIN_POINTS,
                points.len()
            )));
        }
        Ok(Self { points })
    }

    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Edges in insertion order, including the closing edge
    pub fn edges(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        let next = self.points.iter().cycle().skip(1);
        self.points.iter().copied().zip(next.copied())
    }

    /// Box covering every vertex (vertices are treated as pixel positions)
    #[must_use]
    pub fn bounding_box(&self) -> BoundingBox {
        let min_x = self.points.iter().map(|p| p.x).min().unwrap_or(0);
        let max_x = self.points.iter().map(|p| p.x).max().unwrap_or(0);
        let min_y = self.points.iter().map(|p| p.y).min().unwrap_or(0);
        let max_y = self.points.iter().map(|p| p.y).max().unwrap_or(0);
        BoundingBox::from_corners(Point::new(min_x, min_y), Point::new(max_x, max_y))
    }

    /// Even-odd containment test at the centre of pixel `(x, y)`
    #[must_use]
    pub fn contains_pixel(&self, x: i64, y: i64) -> bool {
        let px = x as f64 + 0.5;
        let py = y as f64 + 0.5;
        let mut inside = false;
        for (a, b) in self.edges() {
            let (ax, ay) = (f64::from(a.x), f64::from(a.y));
            let (bx, by) = (f64::from(b.x), f64::from(b.y));
            if (ay > py) != (by > py) {
                let cross_x = ax + (py - ay) * (bx - ax) / (by - ay);
                if px < cross_x {
                    inside = !inside;
                }
            }
        }
        inside
    }

    /// Copy with every vertex multiplied by `factor`
    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            points: self
                .points
                .iter()
                .map(|p| {
                    Point::new(
                        (f64::from(p.x) * factor).round() as i32,
                        (f64::from(p.y) * factor).round() as i32,
                    )
                })
                .collect(),
        }
    }
}

impl TryFrom<Vec<Point>> for MaskPolygon {
    type Error = RetouchError;

    fn try_from(points: Vec<Point>) -> Result<Self> {
        Self::new(points)
    }
}

impl From<MaskPolygon> for Vec<Point> {
    fn from(polygon: MaskPolygon) -> Self {
        polygon.points
    }
}

/// What the user selected on the canvas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// Closed region to remove
    Mask(MaskPolygon),
    /// Single click to detect the object under
    Point(Point),
}

/// Which operation a provider or submission serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    #[serde(alias = "detect")]
    Detection,
    #[serde(alias = "remove")]
    Removal,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Detection => write!(f, "detection"),
            Self::Removal => write!(f, "removal"),
        }
    }
}

/// Row-major RGBA8 pixel data.
///
/// Buffers are moved between pipeline stages, never shared, so a stage that
/// edits pixels in place is the only holder of them.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl PixelBuffer {
    /// # Errors
    /// Returns `InvalidConfig` when `data` is not `width * height * 4` bytes.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(RetouchError::invalid_config(format!(
                "pixel data for {}x{} must be {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Buffer with every pixel set to `color`
    #[must_use]
    pub fn filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        let data = color
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * CHANNELS)
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// True for zero-width or zero-height buffers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Size of the pixel storage in bytes
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < i64::from(self.width) && y < i64::from(self.height)
    }

    /// Byte offset of pixel `(x, y)`, or `None` outside the buffer
    #[must_use]
    pub fn offset(&self, x: i64, y: i64) -> Option<usize> {
        self.in_bounds(x, y)
            .then(|| (y as usize * self.width as usize + x as usize) * CHANNELS)
    }

    #[must_use]
    pub fn pixel(&self, x: i64, y: i64) -> Option<[u8; 4]> {
        let offset = self.offset(x, y)?;
        let px = self.data.get(offset..offset + CHANNELS)?;
        px.try_into().ok()
    }

    /// Write one pixel; returns `false` if `(x, y)` is outside the buffer
    pub fn set_pixel(&mut self, x: i64, y: i64, color: [u8; 4]) -> bool {
        let Some(offset) = self.offset(x, y) else {
            return false;
        };
        match self.data.get_mut(offset..offset + CHANNELS) {
            Some(px) => {
                px.copy_from_slice(&color);
                true
            },
            None => false,
        }
    }

    #[must_use]
    pub fn from_rgba_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
        }
    }

    /// # Errors
    /// Only fails if the internal length invariant was broken.
    pub fn into_rgba_image(self) -> Result<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.data)
            .ok_or_else(|| RetouchError::invalid_config("pixel buffer length mismatch"))
    }

    /// Borrowing conversion for encoders that need an `RgbaImage`
    ///
    /// # Errors
    /// Only fails if the internal length invariant was broken.
    pub fn to_rgba_image(&self) -> Result<RgbaImage> {
        self.clone().into_rgba_image()
    }
}

/// Per-pixel mask for a detected object, covering its bounding box.
///
/// `data` holds one byte per pixel of `bounds`, row-major; 255 marks pixels
/// belonging to the object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMask {
    pub bounds: BoundingBox,
    pub data: Vec<u8>,
}

impl ObjectMask {
    /// Whether pixel `(x, y)` (buffer coordinates) belongs to the object
    #[must_use]
    pub fn contains(&self, x: i64, y: i64) -> bool {
        if !self.bounds.contains(x, y) {
            return false;
        }
        let local_x = (x - i64::from(self.bounds.x)) as usize;
        let local_y = (y - i64::from(self.bounds.y)) as usize;
        let index = local_y * self.bounds.width as usize + local_x;
        self.data.get(index).is_some_and(|v| *v > 0)
    }

    /// Number of pixels set in the mask
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.data.iter().filter(|v| **v > 0).count()
    }
}

/// One region returned by a detection call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    /// Unique within one detection call
    pub id: String,
    pub label: String,
    /// Always within `[0, 1]`
    pub confidence: f32,
    pub bounds: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<ObjectMask>,
    pub color: [u8; 4],
}

impl DetectedObject {
    /// Confidence is clamped into `[0, 1]`; NaN becomes 0.
    #[must_use]
    pub fn new<I: Into<String>, L: Into<String>>(
        id: I,
        label: L,
        confidence: f32,
        bounds: BoundingBox,
    ) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            id: id.into(),
            label: label.into(),
            confidence,
            bounds,
            mask: None,
            color: DISPLAY_PALETTE[0],
        }
    }

    #[must_use]
    pub fn with_mask(mut self, mask: ObjectMask) -> Self {
        self.mask = Some(mask);
        self
    }

    #[must_use]
    pub fn with_color(mut self, color: [u8; 4]) -> Self {
        self.color = color;
        self
    }

    /// Palette color for the object at `index` in a result list
    #[must_use]
    pub fn palette_color(index: usize) -> [u8; 4] {
        DISPLAY_PALETTE[index % DISPLAY_PALETTE.len()]
    }
}

/// Identity of one submitted operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Payload of a successful operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutput {
    /// Edited pixels from a removal
    Removal(PixelBuffer),
    /// Regions from a detection; empty means nothing was detected
    Detection(Vec<DetectedObject>),
}

/// Where a successful result came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// Named remote provider
    Provider(String),
    /// Local region engine
    Local,
}

impl std::fmt::Display for ResultSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provider(name) => write!(f, "provider:{}", name),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Failure description carried by an unsuccessful result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFailure {
    pub kind: ErrorKind,
    /// Human-readable text for the user
    pub message: String,
    /// Technical detail for logs
    pub detail: String,
}

impl From<&RetouchError> for OperationFailure {
    fn from(error: &RetouchError) -> Self {
        let kind = error.kind();
        Self {
            kind,
            message: kind.user_message().to_string(),
            detail: error.to_string(),
        }
    }
}

/// Terminal result of one operation
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    pub id: OperationId,
    pub success: bool,
    pub output: Option<OperationOutput>,
    pub failure: Option<OperationFailure>,
    pub source: Option<ResultSource>,
    pub elapsed_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl OperationResult {
    #[must_use]
    pub fn succeeded(
        id: OperationId,
        output: OperationOutput,
        source: ResultSource,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            id,
            success: true,
            output: Some(output),
            failure: None,
            source: Some(source),
            elapsed_ms,
            completed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn failed(id: OperationId, error: &RetouchError, elapsed_ms: u64) -> Self {
        Self {
            id,
            success: false,
            output: None,
            failure: Some(OperationFailure::from(error)),
            source: None,
            elapsed_ms,
            completed_at: Utc::now(),
        }
    }

    /// Error classification, `None` on success
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.failure.as_ref().map(|f| f.kind)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.error_kind() == Some(ErrorKind::Cancelled)
    }

    #[must_use]
    pub fn pixels(&self) -> Option<&PixelBuffer> {
        match &self.output {
            Some(OperationOutput::Removal(pixels)) => Some(pixels),
            _ => None,
        }
    }

    #[must_use]
    pub fn detections(&self) -> Option<&[DetectedObject]> {
        match &self.output {
            Some(OperationOutput::Detection(objects)) => Some(objects),
            _ => None,
        }
    }

    /// Take the edited pixels out of a removal result
    #[must_use]
    pub fn into_pixels(self) -> Option<PixelBuffer> {
        match self.output {
            Some(OperationOutput::Removal(pixels)) => Some(pixels),
            _ => None,
        }
    }
}
