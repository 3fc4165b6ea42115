use anyhow::{Context, Result};
use leafbridge_core::GatewayConfig;
use std::path::Path;

/// Load the gateway configuration: TOML file (or defaults), then the edge
/// runtime environment on top, then validation.
pub fn load(path: Option<&Path>) -> Result<GatewayConfig> {
    let mut config = match path {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => GatewayConfig::default(),
    };
    config.apply_env();
    config.validate().context("invalid gateway configuration")?;
    Ok(config)
}
