use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;

use super::nonce::NonceStore;
use super::payload::{AuthenticatedWebhook, EventKind, RawEnvelope};
use super::source_ip;
use crate::config::AllowedIps;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-gateway-signature";
pub const TIMESTAMP_HEADER: &str = "x-gateway-timestamp";
pub const NONCE_HEADER: &str = "x-gateway-nonce";

const MAX_NONCE_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookRejection {
    #[error("source ip {0:?} is not allowed")]
    IpNotAllowed(Option<IpAddr>),
    #[error("missing header {0}")]
    MissingHeader(&'static str),
    #[error("malformed header {0}")]
    MalformedHeader(&'static str),
    #[error("timestamp outside freshness window ({skew_secs}s skew)")]
    StaleTimestamp { skew_secs: i64 },
    #[error("nonce already used")]
    ReplayDetected,
    #[error("signature mismatch")]
    InvalidSignature,
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("event {0} is not accepted")]
    UnknownEvent(String),
    #[error("nonce store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("webhook secret is not usable")]
    Misconfigured,
}

impl WebhookRejection {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookRejection::IpNotAllowed(_) => StatusCode::FORBIDDEN,
            WebhookRejection::MissingHeader(_)
            | WebhookRejection::MalformedHeader(_)
            | WebhookRejection::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            WebhookRejection::StaleTimestamp { .. } | WebhookRejection::InvalidSignature => {
                StatusCode::UNAUTHORIZED
            }
            WebhookRejection::ReplayDetected => StatusCode::CONFLICT,
            WebhookRejection::UnknownEvent(_) => StatusCode::UNPROCESSABLE_ENTITY,
            WebhookRejection::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            WebhookRejection::Misconfigured => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            WebhookRejection::IpNotAllowed(_) => "ip_not_allowed",
            WebhookRejection::MissingHeader(_) => "missing_header",
            WebhookRejection::MalformedHeader(_) => "malformed_header",
            WebhookRejection::StaleTimestamp { .. } => "stale_timestamp",
            WebhookRejection::ReplayDetected => "replay_detected",
            WebhookRejection::InvalidSignature => "invalid_signature",
            WebhookRejection::InvalidPayload(_) => "invalid_payload",
            WebhookRejection::UnknownEvent(_) => "unknown_event",
            WebhookRejection::StoreUnavailable(_) => "store_unavailable",
            WebhookRejection::Misconfigured => "misconfigured",
        }
    }
}

/// Validates inbound gateway notifications before any business logic runs.
///
/// Checks run in a fixed order and stop at the first failure: source ip, timestamp
/// freshness, nonce reuse, HMAC signature over the raw body, then payload shape. The nonce
/// is only recorded once the signature has verified.
#[derive(Clone)]
pub struct WebhookAuthenticator {
    secret: Vec<u8>,
    allowed_ips: AllowedIps,
    trusted_proxy_depth: usize,
    tolerance: Duration,
    nonce_store: Arc<dyn NonceStore>,
}

impl WebhookAuthenticator {
    pub fn new(
        secret: impl Into<Vec<u8>>,
        allowed_ips: AllowedIps,
        trusted_proxy_depth: usize,
        tolerance_secs: i64,
        nonce_store: Arc<dyn NonceStore>,
    ) -> Self {
        Self {
            secret: secret.into(),
            allowed_ips,
            trusted_proxy_depth,
            tolerance: Duration::seconds(tolerance_secs),
            nonce_store,
        }
    }

    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        peer: Option<IpAddr>,
        now: DateTime<Utc>,
    ) -> Result<AuthenticatedWebhook, WebhookRejection> {
        let client_ip = source_ip::client_ip(headers, peer, self.trusted_proxy_depth);
        if !source_ip::is_allowed(client_ip, &self.allowed_ips) {
            return Err(WebhookRejection::IpNotAllowed(client_ip));
        }

        let timestamp = header(headers, TIMESTAMP_HEADER)?
            .parse::<i64>()
            .map_err(|_| WebhookRejection::MalformedHeader(TIMESTAMP_HEADER))?;
        let skew_secs = now.timestamp() - timestamp;
        if skew_secs.abs() > self.tolerance.num_seconds() {
            return Err(WebhookRejection::StaleTimestamp { skew_secs });
        }

        let nonce = header(headers, NONCE_HEADER)?;
        if nonce.len() > MAX_NONCE_LEN {
            return Err(WebhookRejection::MalformedHeader(NONCE_HEADER));
        }
        if self
            .nonce_store
            .seen(nonce)
            .await
            .map_err(|e| WebhookRejection::StoreUnavailable(e.0))?
        {
            return Err(WebhookRejection::ReplayDetected);
        }

        let signature = header(headers, SIGNATURE_HEADER)?;
        self.verify_signature(body, signature)?;

        let ttl = (self.tolerance * 2)
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(600));
        let recorded = self
            .nonce_store
            .record(nonce, ttl)
            .await
            .map_err(|e| WebhookRejection::StoreUnavailable(e.0))?;
        if !recorded {
            return Err(WebhookRejection::ReplayDetected);
        }

        let envelope: RawEnvelope = serde_json::from_slice(body)
            .map_err(|e| WebhookRejection::InvalidPayload(e.to_string()))?;
        let raw_event = envelope
            .event
            .ok_or_else(|| WebhookRejection::InvalidPayload("event is required".to_string()))?;
        let event = EventKind::parse(&raw_event)
            .ok_or_else(|| WebhookRejection::UnknownEvent(raw_event.clone()))?;
        let data = match envelope.data {
            Some(serde_json::Value::Object(data)) => data,
            _ => {
                return Err(WebhookRejection::InvalidPayload(
                    "data must be an object".to_string(),
                ))
            }
        };

        Ok(AuthenticatedWebhook {
            event,
            data,
            nonce: nonce.to_string(),
        })
    }

    /// Verify the signature using constant-time comparison
    fn verify_signature(&self, body: &[u8], signature_header: &str) -> Result<(), WebhookRejection> {
        let hex_signature = signature_header
            .strip_prefix("sha256=")
            .unwrap_or(signature_header);
        let expected_signature = hex::decode(hex_signature)
            .map_err(|_| WebhookRejection::MalformedHeader(SIGNATURE_HEADER))?;

        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| WebhookRejection::Misconfigured)?;
        mac.update(body);
        mac.verify_slice(&expected_signature)
            .map_err(|_| WebhookRejection::InvalidSignature)
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, WebhookRejection> {
    let value = headers
        .get(name)
        .ok_or(WebhookRejection::MissingHeader(name))?
        .to_str()
        .map_err(|_| WebhookRejection::MalformedHeader(name))?
        .trim();
    if value.is_empty() {
        return Err(WebhookRejection::MissingHeader(name));
    }
    Ok(value)
}

/// Hex HMAC-SHA256 of `body`, as the gateway sends it.
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, hmac::digest::InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
