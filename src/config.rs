//! Configuration types for the orchestrator and its collaborators

use crate::error::{Result, RetouchError};
use crate::types::OperationKind;
use crate::utils::ConfigValidator;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Durations are written to configuration files as whole milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Image encoding sent to a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageEncoding {
    /// PNG keeps the alpha channel
    #[default]
    Png,
    /// JPEG drops alpha; smaller uploads
    Jpeg,
}

impl ImageEncoding {
    #[must_use]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }
}

/// Input-format constraints a provider declares
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConstraints {
    /// Longest accepted side in pixels; larger inputs are downscaled
    pub max_dimension: Option<u32>,
    /// Encoding of the uploaded image
    pub format: ImageEncoding,
    /// Model identifier sent to detection providers
    pub model: Option<String>,
}

/// One remote inference provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub endpoint: String,
    /// Per-attempt timeout
    #[serde(with = "duration_ms", rename = "timeout_ms")]
    pub timeout: Duration,
    /// Total number of attempts made against this provider
    pub max_retries: u32,
    pub kind: OperationKind,
    #[serde(default)]
    pub input: InputConstraints,
    /// Name of the environment variable holding a bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_env: Option<String>,
}

impl ProviderDescriptor {
    /// Descriptor with a 30 second timeout and three attempts
    #[must_use]
    pub fn new<N: Into<String>, E: Into<String>>(name: N, endpoint: E, kind: OperationKind) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            kind,
            input: InputConstraints::default(),
            credentials_env: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_input(mut self, input: InputConstraints) -> Self {
        self.input = input;
        self
    }

    #[must_use]
    pub fn with_credentials_env<S: Into<String>>(mut self, var: S) -> Self {
        self.credentials_env = Some(var.into());
        self
    }

    /// Resolve the bearer token from the environment, if configured and set
    #[must_use]
    pub fn credentials(&self) -> Option<String> {
        self.credentials_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|token| !token.is_empty())
    }
}

/// Ordered provider chains, one per operation kind
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub detection: Vec<ProviderDescriptor>,
    pub removal: Vec<ProviderDescriptor>,
}

impl ProviderConfig {
    /// Providers for `kind`, in the order they are tried
    #[must_use]
    pub fn chain(&self, kind: OperationKind) -> &[ProviderDescriptor] {
        match kind {
            OperationKind::Detection => &self.detection,
            OperationKind::Removal => &self.removal,
        }
    }

    /// Default location: `<config dir>/retouch/providers.json`
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("retouch").join("providers.json"))
    }

    /// Load a provider configuration from a JSON file
    ///
    /// # Errors
    /// - File cannot be read
    /// - JSON does not match the expected shape
    /// - A descriptor is listed under the wrong kind or fails validation
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RetouchError::invalid_config(format!(
                "failed to read provider config '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate a provider configuration
    ///
    /// # Errors
    /// Same as [`ProviderConfig::from_file`], minus the I/O.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default path; an absent file yields empty chains
    ///
    /// # Errors
    /// A present but unreadable or invalid file is an error.
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(path),
            _ => {
                log::debug!("No provider configuration found; using local processing only");
                Ok(Self::default())
            },
        }
    }

    /// # Errors
    /// Returns `InvalidConfig` for the first descriptor that fails validation.
    pub fn validate(&self) -> Result<()> {
        for (expected, list) in [
            (OperationKind::Detection, &self.detection),
            (OperationKind::Removal, &self.removal),
        ] {
            for provider in list {
                if provider.kind != expected {
                    return Err(RetouchError::invalid_config(format!(
                        "provider '{}' is declared as {} but listed under {}",
                        provider.name, provider.kind, expected
                    )));
                }
                ConfigValidator::validate_provider(provider)?;
            }
        }
        Ok(())
    }
}

/// Parameters of the local region engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Maximum summed |dR|+|dG|+|dB| for a pixel to join a region
    pub similarity_threshold: u32,
    /// Upper bound on region size, in pixels
    pub max_region_pixels: usize,
    /// Regions smaller than this are reported as "no detection"
    pub min_region_pixels: usize,
    /// Neighborhood radius for content-aware fill
    pub fill_radius: u32,
    /// Side length of a processing tile
    pub tile_size: u32,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 50,
            max_region_pixels: 10_000,
            min_region_pixels: 100,
            fill_radius: 5,
            tile_size: 100,
        }
    }
}

/// Memory thresholds and sampling cadence of the resource monitor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub soft_limit_mb: f64,
    pub hard_limit_mb: f64,
    #[serde(with = "duration_ms", rename = "sample_interval_ms")]
    pub sample_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            soft_limit_mb: 384.0,
            hard_limit_mb: 512.0,
            sample_interval: Duration::from_secs(5),
        }
    }
}

/// Backoff between attempts against the same provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before retry `n` is `unit * 2^n`
    #[serde(with = "duration_ms", rename = "backoff_unit_ms")]
    pub backoff_unit: Duration,
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (zero-based)
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_unit.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_unit: Duration::from_secs(1),
        }
    }
}

/// Complete configuration for a [`crate::processor::ProcessingOrchestrator`]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub providers: ProviderConfig,
    pub region: RegionConfig,
    pub monitor: MonitorConfig,
    pub retry: RetryPolicy,
}

impl OrchestratorConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::new()
    }

    /// Validate every section
    ///
    /// # Errors
    /// Returns `InvalidConfig` describing the first out-of-range value.
    pub fn validate(&self) -> Result<()> {
        self.providers.validate()?;
        ConfigValidator::validate_region(&self.region)?;
        ConfigValidator::validate_monitor(&self.monitor)?;
        Ok(())
    }
}

/// Builder for [`OrchestratorConfig`]
#[derive(Debug, Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn providers(mut self, providers: ProviderConfig) -> Self {
        self.config.providers = providers;
        self
    }

    /// Append a provider to the chain of its kind
    #[must_use]
    pub fn provider(mut self, provider: ProviderDescriptor) -> Self {
        match provider.kind {
            OperationKind::Detection => self.config.providers.detection.push(provider),
            OperationKind::Removal => self.config.providers.removal.push(provider),
        }
        self
    }

    #[must_use]
    pub fn region(mut self, region: RegionConfig) -> Self {
        self.config.region = region;
        self
    }

    #[must_use]
    pub fn tile_size(mut self, tile_size: u32) -> Self {
        self.config.region.tile_size = tile_size;
        self
    }

    #[must_use]
    pub fn similarity_threshold(mut self, threshold: u32) -> Self {
        self.config.region.similarity_threshold = threshold;
        self
    }

    #[must_use]
    pub fn fill_radius(mut self, radius: u32) -> Self {
        self.config.region.fill_radius = radius;
        self
    }

    #[must_use]
    pub fn monitor(mut self, monitor: MonitorConfig) -> Self {
        self.config.monitor = monitor;
        self
    }

    #[must_use]
    pub fn memory_limits(mut self, soft_limit_mb: f64, hard_limit_mb: f64) -> Self {
        self.config.monitor.soft_limit_mb = soft_limit_mb;
        self.config.monitor.hard_limit_mb = hard_limit_mb;
        self
    }

    #[must_use]
    pub fn backoff_unit(mut self, unit: Duration) -> Self {
        self.config.retry.backoff_unit = unit;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// Returns `InvalidConfig` when any section fails validation.
    pub fn build(self) -> Result<OrchestratorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
