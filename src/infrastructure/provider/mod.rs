//! Payment provider adapter.
//!
//! Outbound: invoice creation against the provider's HTTP API, with
//! bounded retries on transient failures. Inbound: webhook signature
//! verification and payload parsing. Two wire dialects are supported,
//! selected by `provider.kind` in config.

pub mod provider_a;
pub mod provider_b;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::{ProviderConfig, ProviderKind};
use crate::support::CoreResult;

pub use provider_a::ProviderA;
pub use provider_b::ProviderB;

/// Result of creating an invoice upstream.
#[derive(Debug, Clone)]
pub struct CreatedInvoice {
    pub provider_order_id: String,
    /// Payload the PWA renders as a QR code / payment link.
    pub qr_payload: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookStatus {
    Pending,
    Paid,
    Failed,
}

/// A verified, parsed webhook delivery.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub provider_order_id: String,
    pub status: WebhookStatus,
    /// Minor units; present on `Paid`.
    pub paid_amount: Option<i64>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create an invoice for `amount` minor units tied to our `order_id`.
    async fn create_invoice(
        &self,
        client_id: &str,
        order_id: &str,
        amount: i64,
    ) -> CoreResult<CreatedInvoice>;

    /// Header the provider puts its webhook signature in.
    fn signature_header(&self) -> &'static str;

    /// Verify the webhook signature over the raw body.
    fn verify_webhook(&self, payload: &[u8], signature: &str) -> bool;

    /// Parse the provider's webhook body.
    fn parse_webhook(&self, payload: &[u8]) -> CoreResult<WebhookEvent>;

    /// The exact acknowledgment body the provider expects back on 200.
    fn ack_body(&self) -> &'static str;

    fn name(&self) -> &'static str;
}

pub fn create_provider(config: &ProviderConfig) -> Arc<dyn PaymentProvider> {
    match config.kind {
        ProviderKind::ProviderA => Arc::new(ProviderA::new(config)),
        ProviderKind::ProviderB => Arc::new(ProviderB::new(config)),
    }
}

/// HMAC-SHA256 over the raw payload, hex-encoded. Both dialects sign the
/// body this way; they differ in header name and body format.
pub(crate) fn hmac_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Check a presented signature against the recomputed one. An empty
/// configured secret rejects everything.
pub(crate) fn signature_matches(secret: &str, payload: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    hmac_hex(secret, payload).eq_ignore_ascii_case(signature.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_is_deterministic_and_secret_bound() {
        let sig = hmac_hex("secret", b"payload");
        assert_eq!(sig, hmac_hex("secret", b"payload"));
        assert_ne!(sig, hmac_hex("other", b"payload"));
        assert_ne!(sig, hmac_hex("secret", b"payload2"));
    }

    #[test]
    fn signature_matches_ignores_case_and_whitespace() {
        let sig = hmac_hex("secret", b"x");
        assert!(signature_matches("secret", b"x", &sig.to_uppercase()));
        assert!(signature_matches("secret", b"x", &format!(" {sig} ")));
        assert!(!signature_matches("secret", b"x", "deadbeef"));
        assert!(!signature_matches("", b"x", &hmac_hex("", b"x")));
    }
}
