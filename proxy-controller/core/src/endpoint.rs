use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use std::{collections::HashSet, fmt, num::NonZeroU16, str::FromStr};
use thiserror::Error;

const PEM_CERTIFICATE: &[u8] = b"-----BEGIN CERTIFICATE-----";

/// Decides how a failed or denying secondary webhook affects the request.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum FailurePolicy {
    /// Errors and denials reject the request.
    #[default]
    Fail,
    /// Errors and denials are ignored.
    Ignore,
}

/// A secondary webhook as it appears in the configuration file, before
/// validation.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    pub name: Option<String>,
    pub declarant: Option<String>,
    pub service_name: Option<String>,
    pub namespace: Option<String>,
    pub path: Option<String>,
    pub port: Option<PortValue>,
    pub ca_bundle: Option<String>,
    pub failure_policy: Option<String>,
}

/// Ports may be written either as strings or as numbers.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Number(i64),
    String(String),
}

/// A validated secondary webhook. Built once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecondaryWebhook {
    pub name: String,
    /// The name of the `ProxyValidatingType` whose rules select requests for
    /// this webhook.
    pub declarant: String,
    pub service_name: String,
    pub namespace: String,
    pub port: NonZeroU16,
    pub path: String,
    /// PEM-encoded certificates trusted for this webhook only.
    pub ca_bundle: Vec<u8>,
    pub failure_policy: FailurePolicy,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("secondary webhook {webhook}: missing required field `{field}`")]
    Missing {
        webhook: String,
        field: &'static str,
    },

    #[error("secondary webhook {webhook}: invalid port {value}: {reason}")]
    InvalidPort {
        webhook: String,
        value: String,
        reason: String,
    },

    #[error("secondary webhook {webhook}: invalid caBundle: {reason}")]
    InvalidCaBundle { webhook: String, reason: String },

    #[error("secondary webhook {webhook}: invalid failurePolicy {value:?}, expected Fail or Ignore")]
    InvalidFailurePolicy { webhook: String, value: String },

    #[error("secondary webhook {0} is defined more than once")]
    Duplicate(String),
}

/// Validates every configured webhook, failing on the first invalid entry.
pub fn validate_all(
    configs: impl IntoIterator<Item = EndpointConfig>,
) -> Result<Vec<SecondaryWebhook>, ConfigError> {
    let mut names = HashSet::new();
    let mut webhooks = Vec::new();
    for (i, config) in configs.into_iter().enumerate() {
        let webhook = config.validate(i)?;
        if !names.insert(webhook.name.clone()) {
            return Err(ConfigError::Duplicate(webhook.name));
        }
        webhooks.push(webhook);
    }
    Ok(webhooks)
}

// === impl EndpointConfig ===

impl EndpointConfig {
    /// Checks every field, naming the offending one on failure. `index` only
    /// identifies unnamed entries in error messages.
    pub fn validate(self, index: usize) -> Result<SecondaryWebhook, ConfigError> {
        let label = self
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("#{index}"));
        let required = |value: Option<String>, field: &'static str| {
            value
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::Missing {
                    webhook: label.clone(),
                    field,
                })
        };

        let service_name = required(self.service_name, "serviceName")?;
        let namespace = required(self.namespace, "namespace")?;
        let path = required(self.path, "path")?;
        let declarant = required(self.declarant, "declarant")?;
        let encoded = required(self.ca_bundle, "caBundle")?;
        let port = self.port.ok_or_else(|| ConfigError::Missing {
            webhook: label.clone(),
            field: "port",
        })?;

        let port = parse_port(&port).map_err(|reason| ConfigError::InvalidPort {
            webhook: label.clone(),
            value: port.to_string(),
            reason,
        })?;

        let ca_bundle = decode_ca_bundle(&encoded).map_err(|reason| ConfigError::InvalidCaBundle {
            webhook: label.clone(),
            reason,
        })?;

        let failure_policy = match self.failure_policy.filter(|p| !p.is_empty()) {
            None => FailurePolicy::default(),
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidFailurePolicy {
                    webhook: label.clone(),
                    value,
                })?,
        };

        let name = self
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("{service_name}.{namespace}"));

        Ok(SecondaryWebhook {
            name,
            declarant,
            service_name,
            namespace,
            port,
            path,
            ca_bundle,
            failure_policy,
        })
    }
}

fn parse_port(port: &PortValue) -> Result<NonZeroU16, String> {
    let n = match port {
        PortValue::Number(n) => u16::try_from(*n).map_err(|e| e.to_string())?,
        PortValue::String(s) => s.trim().parse::<u16>().map_err(|e| e.to_string())?,
    };
    NonZeroU16::new(n).ok_or_else(|| "port must not be zero".to_string())
}

/// Decodes the bundle and rejects one with no PEM certificate block. This is
/// only a pre-filter: the certificates themselves are parsed when the
/// webhook's HTTPS client is built, which fails with the same
/// `InvalidCaBundle` error.
fn decode_ca_bundle(encoded: &str) -> Result<Vec<u8>, String> {
    let pem = STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("not valid base64: {e}"))?;
    if !pem
        .windows(PEM_CERTIFICATE.len())
        .any(|w| w == PEM_CERTIFICATE)
    {
        return Err("no PEM certificate found".to_string());
    }
    Ok(pem)
}

// === impl PortValue ===

impl fmt::Display for PortValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => fmt::Display::fmt(n, f),
            Self::String(s) => fmt::Debug::fmt(s, f),
        }
    }
}

// === impl SecondaryWebhook ===

impl SecondaryWebhook {
    /// The in-cluster URL of the webhook's service.
    pub fn url(&self) -> String {
        format!(
            "https://{}.{}.svc:{}{}",
            self.service_name, self.namespace, self.port, self.path
        )
    }
}

// === impl FailurePolicy ===

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("fail") {
            return Ok(Self::Fail);
        }
        if s.eq_ignore_ascii_case("ignore") {
            return Ok(Self::Ignore);
        }
        Err(format!("invalid failure policy: {s}"))
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fail => f.write_str("Fail"),
            Self::Ignore => f.write_str("Ignore"),
        }
    }
}
