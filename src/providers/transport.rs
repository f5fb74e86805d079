//! Wire transport to remote providers
//!
//! The coordinator talks to providers through [`ProviderTransport`] so that
//! retry and fallback logic can be exercised without a network.

use crate::{
    config::{ImageEncoding, ProviderDescriptor},
    error::{Result, RetouchError},
    services::ImageIOService,
    types::{OperationKind, PixelBuffer, Point, Selection},
};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Serialize;

/// One request, already encoded for a specific provider
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub kind: OperationKind,
    /// Encoded image bytes
    pub image: Vec<u8>,
    pub encoding: ImageEncoding,
    /// Dimensions of the encoded image
    pub width: u32,
    pub height: u32,
    /// Factor mapping buffer coordinates onto the encoded image
    pub scale: f64,
    /// Polygon vertices in encoded-image coordinates (removal)
    pub mask: Option<Vec<Point>>,
    /// Click point in encoded-image coordinates (detection)
    pub point: Option<Point>,
    /// Model identifier (detection)
    pub model: Option<String>,
}

#[derive(Serialize)]
struct WirePoint {
    x: i32,
    y: i32,
}

impl From<Point> for WirePoint {
    fn from(p: Point) -> Self {
        Self { x: p.x, y: p.y }
    }
}

impl ProviderRequest {
    /// Encode `pixels` and `selection` within the constraints of `provider`
    ///
    /// # Errors
    /// - Removal without a mask polygon
    /// - Encoder failures
    pub fn build(
        provider: &ProviderDescriptor,
        pixels: &PixelBuffer,
        selection: &Selection,
    ) -> Result<Self> {
        let (scaled, scale) = match provider.input.max_dimension {
            Some(max) => ImageIOService::downscale_to_fit(pixels, max)?,
            None => (pixels.clone(), 1.0),
        };
        let image = ImageIOService::encode(&scaled, provider.input.format)?;

        let scale_point = |p: Point| {
            Point::new(
                (f64::from(p.x) * scale).round() as i32,
                (f64::from(p.y) * scale).round() as i32,
            )
        };

        let (mask, point) = match (provider.kind, selection) {
            (OperationKind::Removal, Selection::Mask(polygon)) => {
                (Some(polygon.scaled(scale).points().to_vec()), None)
            },
            (OperationKind::Removal, Selection::Point(_)) => {
                return Err(RetouchError::invalid_selection(
                    "removal providers need a mask polygon",
                ))
            },
            (OperationKind::Detection, Selection::Point(p)) => (None, Some(scale_point(*p))),
            (OperationKind::Detection, Selection::Mask(_)) => (None, None),
        };

        Ok(Self {
            kind: provider.kind,
            image,
            encoding: provider.input.format,
            width: scaled.width(),
            height: scaled.height(),
            scale,
            mask,
            point,
            model: provider.input.model.clone(),
        })
    }

    /// [`build`](Self::build) on the blocking pool, keeping resize and
    /// encode work off the async workers
    ///
    /// # Errors
    /// Same as [`build`](Self::build), plus a panicked encoding task.
    pub async fn prepare(
        provider: &ProviderDescriptor,
        pixels: &PixelBuffer,
        selection: &Selection,
    ) -> Result<Self> {
        let provider = provider.clone();
        let pixels = pixels.clone();
        let selection = selection.clone();
        tokio::task::spawn_blocking(move || Self::build(&provider, &pixels, &selection))
            .await
            .map_err(|e| {
                RetouchError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("request encoding task failed: {}", e),
                ))
            })?
    }

    /// Multipart form as sent over HTTP
    ///
    /// # Errors
    /// Only if the MIME type or JSON fields fail to serialize.
    pub fn to_form(&self) -> Result<Form> {
        let image = Part::bytes(self.image.clone())
            .file_name(format!("image.{}", self.encoding.extension()))
            .mime_str(self.encoding.mime_type())?;
        let mut form = Form::new().part("image", image);

        if let Some(mask) = &self.mask {
            let points: Vec<WirePoint> = mask.iter().copied().map(WirePoint::from).collect();
            form = form.text("mask", serde_json::to_string(&points)?);
        }
        if let Some(model) = &self.model {
            form = form.text("model", model.clone());
        }
        if let Some(point) = self.point {
            form = form.text("point", serde_json::to_string(&WirePoint::from(point))?);
        }
        Ok(form)
    }
}

/// Raw provider answer before normalization
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl ProviderResponse {
    #[must_use]
    pub fn new(content_type: Option<&str>, body: Vec<u8>) -> Self {
        Self {
            content_type: content_type.map(str::to_string),
            body,
        }
    }

    /// JSON payload with an `application/json` content type
    #[must_use]
    pub fn json(value: &serde_json::Value) -> Self {
        Self::new(Some("application/json"), value.to_string().into_bytes())
    }

    /// Whether the body looks like JSON rather than image bytes
    #[must_use]
    pub fn is_json(&self) -> bool {
        if self
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("json"))
        {
            return true;
        }
        self.body
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|b| *b == b'{' || *b == b'[')
    }
}

/// Sends one request to one provider.
///
/// Implementations report network failures and non-success statuses as
/// `ProviderTransport` errors. Timeouts and retries are applied by the caller.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    async fn send(
        &self,
        provider: &ProviderDescriptor,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse>;
}

/// HTTP transport posting multipart forms with `reqwest`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// # Errors
    /// Failed to create the HTTP client.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("retouch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn send(
        &self,
        provider: &ProviderDescriptor,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse> {
        let mut builder = self
            .client
            .post(&provider.endpoint)
            .timeout(provider.timeout)
            .multipart(request.to_form()?);
        if let Some(token) = provider.credentials() {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RetouchError::transport(&provider.name, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetouchError::transport(
                &provider.name,
                format!("HTTP error {} from {}", status, provider.endpoint),
            ));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| RetouchError::transport(&provider.name, e.to_string()))?;

        log::debug!(
            "Provider '{}' answered {} ({} bytes)",
            provider.name,
            status,
            body.len()
        );
        Ok(ProviderResponse {
            content_type,
            body: body.to_vec(),
        })
    }
}
