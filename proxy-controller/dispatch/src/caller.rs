use bytes::Bytes;
use http::{header, HeaderMap};
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;
use webhook_proxy_core::{ConfigError, SecondaryWebhook};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Delivers an admission request to a secondary webhook.
#[async_trait::async_trait]
pub trait CallWebhook {
    /// Returns `Ok` only when the webhook explicitly allowed the request.
    async fn call(
        &self,
        webhook: &SecondaryWebhook,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<(), CallError>;
}

/// The ways a secondary webhook call can end without an allowed response.
///
/// The messages complete a sentence of the form "proxied webhook NAME ...".
#[derive(Debug, Error)]
pub enum CallError {
    #[error("failed: {0}")]
    Transport(#[source] BoxError),

    #[error("failed: {0}")]
    Protocol(String),

    #[error("denied the request: {0}")]
    Denied(String),
}

/// Calls secondary webhooks over HTTPS.
///
/// Each webhook gets its own client that trusts only the certificates in
/// that webhook's CA bundle.
#[derive(Clone, Debug)]
pub struct HttpsCaller {
    clients: Arc<HashMap<String, reqwest::Client>>,
}

#[derive(Debug, Deserialize)]
struct ReviewResponse {
    response: Option<ResponseBody>,
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    #[serde(default)]
    allowed: bool,
    status: Option<ResponseStatus>,
}

#[derive(Debug, Deserialize)]
struct ResponseStatus {
    message: Option<String>,
}

// === impl HttpsCaller ===

impl HttpsCaller {
    pub fn new<'w>(
        webhooks: impl IntoIterator<Item = &'w SecondaryWebhook>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let mut clients = HashMap::new();
        for webhook in webhooks {
            let invalid = |reason: String| ConfigError::InvalidCaBundle {
                webhook: webhook.name.clone(),
                reason,
            };

            let certs = reqwest::Certificate::from_pem_bundle(&webhook.ca_bundle)
                .map_err(|e| invalid(e.to_string()))?;
            if certs.is_empty() {
                return Err(invalid("no certificates found".to_string()));
            }

            let mut builder = reqwest::Client::builder()
                .use_rustls_tls()
                .tls_built_in_root_certs(false)
                .timeout(timeout);
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
            let client = builder.build().map_err(|e| invalid(e.to_string()))?;
            clients.insert(webhook.name.clone(), client);
        }
        Ok(Self {
            clients: Arc::new(clients),
        })
    }
}

#[async_trait::async_trait]
impl CallWebhook for HttpsCaller {
    async fn call(
        &self,
        webhook: &SecondaryWebhook,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<(), CallError> {
        let client = self.clients.get(&webhook.name).ok_or_else(|| {
            CallError::Transport(format!("no client configured for {}", webhook.name).into())
        })?;

        let rsp = client
            .post(webhook.url())
            .headers(forwarded_headers(headers))
            .body(body)
            .send()
            .await
            .map_err(|e| CallError::Transport(e.into()))?;

        let status = rsp.status();
        if !status.is_success() {
            return Err(CallError::Protocol(format!("unexpected HTTP status {status}")));
        }

        read_response(rsp.bytes().await)
    }
}

/// Classifies a response body, treating one that could not be read as a
/// protocol error.
fn read_response<E: std::fmt::Display>(body: Result<Bytes, E>) -> Result<(), CallError> {
    let body = body.map_err(|e| CallError::Protocol(format!("unreadable response body: {e}")))?;
    classify(&body)
}

/// Copies the inbound headers, minus those that describe the inbound
/// connection rather than the request.
fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in [
        header::HOST,
        header::CONTENT_LENGTH,
        header::TRANSFER_ENCODING,
        header::CONNECTION,
    ] {
        forwarded.remove(name);
    }
    forwarded
}

/// Interprets a secondary webhook's response body.
fn classify(body: &[u8]) -> Result<(), CallError> {
    if body.is_empty() {
        return Err(CallError::Protocol("empty response body".to_string()));
    }
    let review = serde_json::from_slice::<ReviewResponse>(body)
        .map_err(|e| CallError::Protocol(format!("invalid AdmissionReview response: {e}")))?;
    let response = review
        .response
        .ok_or_else(|| CallError::Protocol("AdmissionReview has no response".to_string()))?;
    if response.allowed {
        return Ok(());
    }
    let message = response
        .status
        .and_then(|s| s.message)
        .unwrap_or_default();
    Err(CallError::Denied(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use std::num::NonZeroU16;

    #[test]
    fn allowed_response() {
        let body = br#"{"apiVersion":"admission.k8s.io/v1","kind":"AdmissionReview","response":{"uid":"a","allowed":true}}"#;
        assert!(classify(body).is_ok());
    }

    #[test]
    fn denied_response_carries_message() {
        let body = br#"{"response":{"uid":"a","allowed":false,"status":{"code":403,"message":"replicas must be odd"}}}"#;
        match classify(body) {
            Err(CallError::Denied(msg)) => assert_eq!(msg, "replicas must be odd"),
            res => panic!("unexpected result: {res:?}"),
        }
    }

    #[test]
    fn malformed_responses_are_protocol_errors() {
        let bodies: [&[u8]; 3] = [b"", b"not json", br#"{"kind":"AdmissionReview"}"#];
        for body in bodies {
            assert!(
                matches!(classify(body), Err(CallError::Protocol(_))),
                "{}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn unreadable_bodies_are_protocol_errors() {
        let res = read_response::<std::io::Error>(Err(std::io::ErrorKind::UnexpectedEof.into()));
        match res {
            Err(CallError::Protocol(msg)) => assert!(msg.starts_with("unreadable response body"), "{msg}"),
            res => panic!("unexpected result: {res:?}"),
        }

        let body = Bytes::from_static(br#"{"response":{"uid":"a","allowed":true}}"#);
        assert!(read_response::<std::io::Error>(Ok(body)).is_ok());
    }

    #[test]
    fn error_messages_complete_the_sentence() {
        let denied = CallError::Denied("no".to_string());
        assert_eq!(format!("proxied webhook a {denied}"), "proxied webhook a denied the request: no");
        let failed = CallError::Protocol("empty response body".to_string());
        assert_eq!(
            format!("proxied webhook a {failed}"),
            "proxied webhook a failed: empty response body"
        );
    }

    #[test]
    fn strips_connection_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("proxy.svc"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-request-id", HeaderValue::from_static("abc"));

        let forwarded = forwarded_headers(&headers);
        assert_eq!(forwarded.len(), 2);
        assert_eq!(forwarded[header::CONTENT_TYPE], "application/json");
        assert_eq!(forwarded["x-request-id"], "abc");
    }

    fn webhook(ca_bundle: &[u8]) -> SecondaryWebhook {
        SecondaryWebhook {
            name: "redis".to_string(),
            declarant: "redis-types".to_string(),
            service_name: "redis-admission".to_string(),
            namespace: "redis".to_string(),
            port: NonZeroU16::new(443).unwrap(),
            path: "/admission".to_string(),
            ca_bundle: ca_bundle.to_vec(),
            failure_policy: Default::default(),
        }
    }

    #[test]
    fn rejects_bundle_without_certificates() {
        let webhook = webhook(b"no certificates here");
        let err = HttpsCaller::new([&webhook], Duration::from_secs(8)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCaBundle { .. }), "{err}");
    }

    #[test]
    fn rejects_unparseable_certificate_block() {
        let webhook = webhook(b"-----BEGIN CERTIFICATE-----\nnot base64!\n-----END CERTIFICATE-----\n");
        let err = HttpsCaller::new([&webhook], Duration::from_secs(8)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCaBundle { .. }), "{err}");
    }
}
