//! Error types for detection and removal operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for retouch operations
pub type Result<T> = std::result::Result<T, RetouchError>;

/// Classification of a failure, independent of its technical detail.
///
/// This is what callers match on; the human-readable text lives in
/// [`ErrorKind::user_message`] and the technical detail in the error itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed selection (too few mask points, point outside the image, ...)
    InvalidSelection,
    /// Network or HTTP-level failure talking to a provider
    ProviderTransportError,
    /// Provider answered but the payload could not be understood
    ProviderResponseMalformed,
    /// Memory budget exceeded; raised before any network activity
    ResourceExhausted,
    /// Operation was cancelled by the caller
    Cancelled,
    /// Every provider failed and the local fallback rejected its input
    AllProvidersAndFallbackFailed,
    /// Configuration could not be loaded or is out of range
    InvalidConfig,
    /// Local I/O or image decoding failure outside of an operation
    Io,
}

impl ErrorKind {
    /// Message suitable for showing to an end user
    #[must_use]
    pub fn user_message(self) -> &'static str {
        match self {
            Self::InvalidSelection => {
                "The selected area is not valid. Draw a region with at least three points or click inside the image."
            },
            Self::ProviderTransportError => "The processing service could not be reached.",
            Self::ProviderResponseMalformed => {
                "The processing service returned a response that could not be read."
            },
            Self::ResourceExhausted => {
                "Not enough memory is available to start this operation. Close other work and try again."
            },
            Self::Cancelled => "The operation was cancelled.",
            Self::AllProvidersAndFallbackFailed => {
                "The image could not be processed, neither remotely nor locally."
            },
            Self::InvalidConfig => "The provider configuration is invalid.",
            Self::Io => "The image could not be read or written.",
        }
    }

    /// Whether the coordinator may retry an attempt that failed with this kind
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::ProviderTransportError | Self::ProviderResponseMalformed
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InvalidSelection => "invalid_selection",
            Self::ProviderTransportError => "provider_transport_error",
            Self::ProviderResponseMalformed => "provider_response_malformed",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Cancelled => "cancelled",
            Self::AllProvidersAndFallbackFailed => "all_providers_and_fallback_failed",
            Self::InvalidConfig => "invalid_config",
            Self::Io => "io",
        };
        f.write_str(name)
    }
}

/// Comprehensive error type for retouch operations
#[derive(Error, Debug)]
pub enum RetouchError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding or decoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// HTTP client errors raised while building or sending a request
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization errors outside of provider responses
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Selection rejected before any work started
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    /// Network or HTTP status failure from a provider
    #[error("Provider '{provider}' transport error: {message}")]
    ProviderTransport { provider: String, message: String },

    /// Provider payload that could not be normalized
    #[error("Provider '{provider}' returned a malformed response: {message}")]
    ProviderMalformed { provider: String, message: String },

    /// Memory budget exceeded
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Cooperative cancellation observed
    #[error("Operation cancelled")]
    Cancelled,

    /// Provider chain exhausted and the local fallback could not run
    #[error("All providers and the local fallback failed: {0}")]
    AllProvidersAndFallbackFailed(String),
}

impl RetouchError {
    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new invalid selection error
    pub fn invalid_selection<S: Into<String>>(msg: S) -> Self {
        Self::InvalidSelection(msg.into())
    }

    /// Create a transport error attributed to a provider
    pub fn transport<P: Into<String>, S: Into<String>>(provider: P, msg: S) -> Self {
        Self::ProviderTransport {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create a malformed-response error attributed to a provider
    pub fn malformed<P: Into<String>, S: Into<String>>(provider: P, msg: S) -> Self {
        Self::ProviderMalformed {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create a new resource exhaustion error
    pub fn resource_exhausted<S: Into<String>>(msg: S) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
    ) -> Self {
        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {})",
            parameter, value, valid_range
        ))
    }

    /// Classify this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::Image(_) => ErrorKind::Io,
            Self::Json(_) | Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::Http(_) => ErrorKind::ProviderTransportError,
            Self::InvalidSelection(_) => ErrorKind::InvalidSelection,
            Self::ProviderTransport { .. } => ErrorKind::ProviderTransportError,
            Self::ProviderMalformed { .. } => ErrorKind::ProviderResponseMalformed,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::AllProvidersAndFallbackFailed(_) => ErrorKind::AllProvidersAndFallbackFailed,
        }
    }
}
