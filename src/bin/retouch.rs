//! Retouch CLI Tool
//!
//! Command-line interface for detecting regions and removing objects from
//! images with remote providers and a local fallback.

#[cfg(feature = "cli")]
use retouch::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
