//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::Cli;
use crate::{
    config::{MonitorConfig, OrchestratorConfig, OrchestratorConfigBuilder, ProviderConfig},
    utils::ConfigValidator,
};
use anyhow::{Context, Result};
use std::time::Duration;

/// Convert CLI arguments to an [`OrchestratorConfig`]
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the orchestrator configuration, loading the provider chains from
    /// `--providers` or the default location
    pub(crate) fn from_cli(cli: &Cli) -> Result<OrchestratorConfig> {
        let providers = if cli.offline {
            ProviderConfig::default()
        } else {
            Self::load_providers(cli)?
        };
        Self::build(cli, providers)
    }

    fn load_providers(cli: &Cli) -> Result<ProviderConfig> {
        match &cli.providers {
            Some(path) => ProviderConfig::from_file(path)
                .with_context(|| format!("Invalid provider file {}", path.display())),
            None => ProviderConfig::load_default().context("Invalid default provider file"),
        }
    }

    /// Apply CLI overrides on top of `providers`
    pub(crate) fn build(cli: &Cli, providers: ProviderConfig) -> Result<OrchestratorConfig> {
        let mut builder = OrchestratorConfigBuilder::new().providers(providers);

        if let Some(tile_size) = cli.tile_size {
            builder = builder.tile_size(tile_size);
        }

        let defaults = OrchestratorConfig::default().monitor;
        let hard = cli.hard_limit_mb.unwrap_or(defaults.hard_limit_mb);
        let soft = cli.soft_limit_mb.unwrap_or(defaults.soft_limit_mb.min(hard));
        let monitor = MonitorConfig {
            soft_limit_mb: soft,
            hard_limit_mb: hard,
            ..defaults
        };
        ConfigValidator::validate_monitor(&monitor).context("Invalid memory limits")?;
        builder = builder.monitor(monitor);

        if let Some(ms) = cli.backoff_ms {
            builder = builder.backoff_unit(Duration::from_millis(ms));
        }

        builder.build().context("Invalid configuration")
    }
}
