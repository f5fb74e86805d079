//! Normalization of provider payloads into domain results
//!
//! Detection providers answer in one of several JSON shapes; removal
//! providers answer with raw image bytes. Anything that cannot be mapped is
//! a `ProviderMalformed` error attributed to the provider.

use super::transport::{ProviderRequest, ProviderResponse};
use crate::{
    error::{Result, RetouchError},
    services::ImageIOService,
    types::{BoundingBox, DetectedObject, ObjectMask, PixelBuffer, Point},
    utils::NumericValidator,
};
use serde::Deserialize;

const DEFAULT_LABEL: &str = "object";

#[derive(Debug, Deserialize)]
struct WireBox {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    label: Option<String>,
    #[serde(alias = "confidence")]
    score: f64,
    #[serde(rename = "box")]
    bounds: WireBox,
}

#[derive(Debug, Deserialize)]
struct Segment {
    #[serde(default)]
    label: Option<String>,
    score: f64,
    /// `[x1, y1, x2, y2]`, exclusive of the far corner
    bbox: [f64; 4],
}

#[derive(Debug, Deserialize)]
struct MaskEntry {
    #[serde(default)]
    label: Option<String>,
    score: f64,
    width: u32,
    height: u32,
    /// Full-frame binary mask, row-major, non-zero marks the object
    data: Vec<u8>,
}

/// Response shapes accepted from detection providers
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DetectionPayload {
    Predictions { predictions: Vec<Prediction> },
    Segments { segments: Vec<Segment> },
    Masks { masks: Vec<MaskEntry> },
    Bare(Vec<Prediction>),
}

/// Object found by a provider, in encoded-image coordinates
struct RawDetection {
    label: String,
    score: f64,
    bounds: BoundingBox,
    mask: Option<ObjectMask>,
}

/// Decode a removal response and bring it back to the input dimensions
///
/// # Errors
/// `ProviderMalformed` for JSON bodies or bytes that do not decode as an image.
pub fn normalize_removal(
    provider: &str,
    response: &ProviderResponse,
    target: (u32, u32),
) -> Result<PixelBuffer> {
    if response.is_json() {
        let preview = String::from_utf8_lossy(&response.body);
        return Err(RetouchError::malformed(
            provider,
            format!(
                "expected image bytes, got JSON: {}",
                preview.chars().take(120).collect::<String>()
            ),
        ));
    }
    let decoded = ImageIOService::decode(&response.body)
        .map_err(|e| RetouchError::malformed(provider, e.to_string()))?;
    if decoded.is_empty() {
        return Err(RetouchError::malformed(provider, "image has no pixels"));
    }
    if decoded.dimensions() != target {
        log::debug!(
            "Provider '{}' returned {}x{}, resizing to {}x{}",
            provider,
            decoded.width(),
            decoded.height(),
            target.0,
            target.1
        );
    }
    ImageIOService::resize(&decoded, target.0, target.1)
}

/// Parse a detection response into objects in buffer coordinates
///
/// `request` is the request the response answers; its scale maps the
/// provider's coordinates back onto a buffer of `target` dimensions.
///
/// # Errors
/// `ProviderMalformed` for unknown shapes or non-finite numbers.
pub fn normalize_detection(
    provider: &str,
    response: &ProviderResponse,
    request: &ProviderRequest,
    target: (u32, u32),
) -> Result<Vec<DetectedObject>> {
    let payload: DetectionPayload = serde_json::from_slice(&response.body).map_err(|e| {
        RetouchError::malformed(provider, format!("unrecognized detection payload: {}", e))
    })?;

    let raw = parse_payload(payload, (request.width, request.height))
        .map_err(|e| RetouchError::malformed(provider, e.to_string()))?;

    let back = if request.scale > 0.0 {
        1.0 / request.scale
    } else {
        1.0
    };

    let objects = raw
        .into_iter()
        .filter_map(|det| {
            let bounds = det.bounds.scale(back).clamp_to(target.0, target.1);
            if bounds.is_empty() {
                log::debug!("Dropping '{}' from {}: box outside the image", det.label, provider);
                return None;
            }
            let mask = det.mask.map(|m| rescale_mask(&m, back, bounds));
            Some((det.label, det.score, bounds, mask))
        })
        .enumerate()
        .map(|(index, (label, score, bounds, mask))| {
            let object = DetectedObject::new(
                format!("{}-{}", provider, index),
                label,
                score as f32,
                bounds,
            )
            .with_color(DetectedObject::palette_color(index));
            match mask {
                Some(mask) => object.with_mask(mask),
                None => object,
            }
        })
        .collect();
    Ok(objects)
}

fn parse_payload(payload: DetectionPayload, frame: (u32, u32)) -> Result<Vec<RawDetection>> {
    match payload {
        DetectionPayload::Predictions { predictions } | DetectionPayload::Bare(predictions) => {
            predictions.into_iter().map(parse_prediction).collect()
        },
        DetectionPayload::Segments { segments } => segments.into_iter().map(parse_segment).collect(),
        DetectionPayload::Masks { masks } => {
            let mut out = Vec::with_capacity(masks.len());
            for entry in masks {
                if let Some(det) = parse_mask(entry, frame)? {
                    out.push(det);
                }
            }
            Ok(out)
        },
    }
}

fn parse_prediction(p: Prediction) -> Result<RawDetection> {
    let bounds = BoundingBox::new(
        NumericValidator::validate_f64_to_i32(p.bounds.x, "box.x")?,
        NumericValidator::validate_f64_to_i32(p.bounds.y, "box.y")?,
        NumericValidator::validate_f64_to_u32(p.bounds.width, "box.width")?,
        NumericValidator::validate_f64_to_u32(p.bounds.height, "box.height")?,
    );
    Ok(RawDetection {
        label: p.label.unwrap_or_else(|| DEFAULT_LABEL.to_string()),
        score: f64::from(NumericValidator::validate_confidence(p.score)?),
        bounds,
        mask: None,
    })
}

fn parse_segment(s: Segment) -> Result<RawDetection> {
    let [x1, y1, x2, y2] = s.bbox;
    let x = NumericValidator::validate_f64_to_i32(x1.min(x2), "bbox.x1")?;
    let y = NumericValidator::validate_f64_to_i32(y1.min(y2), "bbox.y1")?;
    let width = NumericValidator::validate_f64_to_u32((x2 - x1).abs(), "bbox width")?;
    let height = NumericValidator::validate_f64_to_u32((y2 - y1).abs(), "bbox height")?;
    Ok(RawDetection {
        label: s.label.unwrap_or_else(|| DEFAULT_LABEL.to_string()),
        score: f64::from(NumericValidator::validate_confidence(s.score)?),
        bounds: BoundingBox::new(x, y, width, height),
        mask: None,
    })
}

/// Full-frame mask to a cropped object mask; `None` when no pixel is set
fn parse_mask(entry: MaskEntry, frame: (u32, u32)) -> Result<Option<RawDetection>> {
    let expected = entry.width as usize * entry.height as usize;
    if entry.data.len() != expected {
        return Err(RetouchError::invalid_config(format!(
            "mask of {}x{} needs {} values, got {}",
            entry.width,
            entry.height,
            expected,
            entry.data.len()
        )));
    }
    if entry.width == 0 || entry.height == 0 {
        return Ok(None);
    }

    let mut min = Point::new(i32::MAX, i32::MAX);
    let mut max = Point::new(i32::MIN, i32::MIN);
    for (index, value) in entry.data.iter().enumerate() {
        if *value == 0 {
            continue;
        }
        let x = (index % entry.width as usize) as i32;
        let y = (index / entry.width as usize) as i32;
        min = Point::new(min.x.min(x), min.y.min(y));
        max = Point::new(max.x.max(x), max.y.max(y));
    }
    if min.x > max.x {
        return Ok(None);
    }

    let bounds = BoundingBox::from_corners(min, max);
    let mut data = Vec::with_capacity(bounds.area() as usize);
    for y in bounds.y..bounds.y + bounds.height as i32 {
        for x in bounds.x..bounds.x + bounds.width as i32 {
            let index = y as usize * entry.width as usize + x as usize;
            let set = entry.data.get(index).is_some_and(|v| *v > 0);
            data.push(if set { 255 } else { 0 });
        }
    }
    let mut mask = ObjectMask { bounds, data };

    // Masks at a different resolution than the uploaded frame are mapped onto it
    if entry.width != frame.0 && frame.0 > 0 {
        let factor = f64::from(frame.0) / f64::from(entry.width);
        let target = bounds.scale(factor);
        mask = rescale_mask(&mask, factor, target);
    }

    Ok(Some(RawDetection {
        label: entry.label.unwrap_or_else(|| DEFAULT_LABEL.to_string()),
        score: f64::from(NumericValidator::validate_confidence(entry.score)?),
        bounds: mask.bounds,
        mask: Some(mask),
    }))
}

/// Nearest-neighbor resample of `mask` (scaled by `factor`) onto `bounds`
fn rescale_mask(mask: &ObjectMask, factor: f64, bounds: BoundingBox) -> ObjectMask {
    if (factor - 1.0).abs() < f64::EPSILON && mask.bounds == bounds {
        return mask.clone();
    }
    let mut data = Vec::with_capacity(bounds.area() as usize);
    for y in 0..i64::from(bounds.height) {
        for x in 0..i64::from(bounds.width) {
            let bx = i64::from(bounds.x) + x;
            let by = i64::from(bounds.y) + y;
            let sx = ((bx as f64 + 0.5) / factor).floor() as i64;
            let sy = ((by as f64 + 0.5) / factor).floor() as i64;
            data.push(if mask.contains(sx, sy) { 255 } else { 0 });
        }
    }
    ObjectMask { bounds, data }
}
