//! WhatsApp gateway HTTP client.
//!
//! Outbound messages are delivered through an external gateway service
//! (anything exposing a `POST /send` that accepts a phone + message
//! JSON body). The client normalises the configured base URL and maps
//! transport failures to messages an operator can act on.

use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default timeout for gateway requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Errors from a gateway send attempt. All variants are retryable from
/// the dispatcher's point of view; the enum exists so logs can tell
/// connectivity problems from gateway-side rejections.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("cannot reach WhatsApp gateway at {0}")]
    Connect(String),
    #[error("WhatsApp gateway timed out")]
    Timeout,
    #[error("WhatsApp gateway rejected the message: {0}")]
    Rejected(String),
    #[error("{0}")]
    Other(String),
}

/// Normalise the gateway base URL: ensure a scheme, strip trailing
/// slashes and a trailing `/send` segment.
pub fn normalize_gateway_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /send (the client appends it itself)
    if url.ends_with("/send") {
        url.truncate(url.len() - 5);
    }
    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Convert a `reqwest::Error` into a gateway error.
fn friendly_error(url: &str, err: &reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        return GatewayError::Timeout;
    }
    if err.is_connect() {
        return GatewayError::Connect(url.to_string());
    }
    GatewayError::Other(err.to_string())
}

/// Configured WhatsApp gateway connection.
#[derive(Clone)]
pub struct Gateway {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl Gateway {
    /// Build a gateway client, or `None` when no URL is configured.
    pub fn new(url: &str, token: Option<String>) -> Option<Self> {
        let base_url = normalize_gateway_url(url);
        if base_url.is_empty() {
            return None;
        }
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .ok()?;
        Some(Self {
            client,
            base_url,
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    /// Read gateway configuration from the environment
    /// (`POS_WA_GATEWAY_URL`, `POS_WA_GATEWAY_TOKEN`).
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("POS_WA_GATEWAY_URL").ok()?;
        let token = std::env::var("POS_WA_GATEWAY_TOKEN").ok();
        Self::new(&url, token)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Deliver one message. The gateway is expected to answer 2xx on
    /// acceptance; any other status is surfaced with the gateway's own
    /// error text where available.
    pub async fn send_message(&self, phone: &str, message: &str) -> Result<(), GatewayError> {
        let url = format!("{}/send", self.base_url);

        let mut req = self.client.post(&url).json(&serde_json::json!({
            "phone": phone,
            "message": message,
        }));
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;

        let status = resp.status();
        if status.is_success() {
            debug!(phone = %phone, "gateway accepted message");
            return Ok(());
        }

        let body_text = resp.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<Value>(&body_text)
            .ok()
            .and_then(|json| {
                json.get("error")
                    .or_else(|| json.get("message"))
                    .and_then(Value::as_str)
                    .map(|s| s.to_string())
            })
            .unwrap_or_else(|| format!("HTTP {status}"));

        Err(GatewayError::Rejected(detail))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_scheme_and_strips_send() {
        assert_eq!(
            normalize_gateway_url("wa.example.com/send"),
            "https://wa.example.com"
        );
        assert_eq!(
            normalize_gateway_url("localhost:3000/"),
            "http://localhost:3000"
        );
        assert_eq!(
            normalize_gateway_url("https://wa.example.com///"),
            "https://wa.example.com"
        );
        assert_eq!(normalize_gateway_url("   "), "");
    }

    #[test]
    fn gateway_requires_a_url() {
        assert!(Gateway::new("", None).is_none());
        let gw = Gateway::new("wa.example.com", Some("  ".into())).expect("gateway");
        assert_eq!(gw.base_url(), "https://wa.example.com");
        assert!(gw.token.is_none(), "blank token should be dropped");
    }
}
