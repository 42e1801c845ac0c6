use crate::core::{validate_all, EndpointConfig, SecondaryWebhook};
use anyhow::{Context, Result};
use std::path::Path;

/// Reads and validates the secondary webhook configuration file.
pub(crate) fn load_secondary_webhooks(path: &Path) -> Result<Vec<SecondaryWebhook>> {
    let data = std::fs::read(path)
        .with_context(|| format!("failed to read secondary webhooks from {}", path.display()))?;
    parse_secondary_webhooks(&data)
        .with_context(|| format!("invalid secondary webhooks in {}", path.display()))
}

fn parse_secondary_webhooks(data: &[u8]) -> Result<Vec<SecondaryWebhook>> {
    let configs = serde_json::from_slice::<Vec<EndpointConfig>>(data)?;
    Ok(validate_all(configs)?)
}

/// Reads the PEM bundle the platform uses to verify the proxy's certificate.
pub(crate) fn load_ca_bundle(path: &Path) -> Result<Vec<u8>> {
    let pem = std::fs::read(path)
        .with_context(|| format!("failed to read CA bundle from {}", path.display()))?;
    anyhow::ensure!(
        !pem.iter().all(u8::is_ascii_whitespace),
        "CA bundle {} is empty",
        path.display()
    );
    Ok(pem)
}
