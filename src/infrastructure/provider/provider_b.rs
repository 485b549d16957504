//! Provider dialect B: form-encoded bodies, string statuses, signature
//! in the `X-Gate-Hmac` header, amounts reported in the `sum` field.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::info;

use super::{signature_matches, CreatedInvoice, PaymentProvider, WebhookEvent, WebhookStatus};
use crate::config::ProviderConfig;
use crate::support::retry::{with_backoff, RetryPolicy};
use crate::support::{CoreError, CoreResult};

pub const SIGNATURE_HEADER: &str = "X-Gate-Hmac";

pub struct ProviderB {
    http: reqwest::Client,
    base_url: String,
    secret: String,
    invoice_expiry_secs: i64,
}

impl ProviderB {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret: config.secret.clone(),
            invoice_expiry_secs: config.invoice_expiry,
        }
    }

    async fn post_payment_page(
        &self,
        client_id: &str,
        order_id: &str,
        amount: i64,
    ) -> CoreResult<(String, Option<String>)> {
        let url = format!("{}/payment-page", self.base_url);
        let form = [
            ("order", order_id.to_string()),
            ("client", client_id.to_string()),
            ("sum", amount.to_string()),
            ("lifetime", self.invoice_expiry_secs.to_string()),
        ];
        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| CoreError::ProviderFailure(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(CoreError::ProviderFailure(format!(
                "payment-page endpoint returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(CoreError::Internal(format!(
                "provider rejected payment page: {status}"
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| CoreError::ProviderFailure(e.to_string()))?;
        let fields = parse_form(text.as_bytes());
        let auth_key = fields
            .get("auth-key")
            .cloned()
            .ok_or_else(|| CoreError::ProviderFailure("response missing auth-key".into()))?;
        Ok((auth_key, fields.get("pay-url").cloned()))
    }
}

/// Minimal `k=v&k=v` decoding with percent-unescape of the characters the
/// gateway actually emits.
fn parse_form(payload: &[u8]) -> HashMap<String, String> {
    let text = String::from_utf8_lossy(payload);
    text.split('&')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            Some((k.trim().to_string(), unescape(v)))
        })
        .collect()
}

fn unescape(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    let bytes = v.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(' ');
                i += 1;
            }
            b'%' => match v
                .get(i + 1..i + 3)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                Some(byte) => {
                    out.push(byte as char);
                    i += 3;
                }
                None => {
                    out.push('%');
                    i += 1;
                }
            },
            b => {
                out.push(b as char);
                i += 1;
            }
        }
    }
    out
}

#[async_trait]
impl PaymentProvider for ProviderB {
    async fn create_invoice(
        &self,
        client_id: &str,
        order_id: &str,
        amount: i64,
    ) -> CoreResult<CreatedInvoice> {
        let (auth_key, pay_url) = with_backoff(
            RetryPolicy::default(),
            || self.post_payment_page(client_id, order_id, amount),
            CoreError::is_transient,
            "provider_b.create_invoice",
        )
        .await
        .map_err(|e| match e {
            CoreError::ProviderFailure(_) => e,
            other => CoreError::ProviderFailure(other.to_string()),
        })?;

        info!(
            order_id,
            provider_order_id = auth_key.as_str(),
            "payment page created"
        );

        Ok(CreatedInvoice {
            provider_order_id: auth_key,
            qr_payload: pay_url,
            expires_at: Utc::now() + Duration::seconds(self.invoice_expiry_secs),
        })
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> bool {
        signature_matches(&self.secret, payload, signature)
    }

    fn parse_webhook(&self, payload: &[u8]) -> CoreResult<WebhookEvent> {
        let fields = parse_form(payload);
        let order_id = fields
            .get("auth-key")
            .or_else(|| fields.get("order"))
            .cloned()
            .ok_or_else(|| {
                CoreError::InvalidArgument("webhook missing auth-key/order field".into())
            })?;

        let status = match fields.get("state").map(String::as_str) {
            Some("completed") => WebhookStatus::Paid,
            Some("processing") => WebhookStatus::Pending,
            Some("failed") | Some("cancelled") => WebhookStatus::Failed,
            other => {
                return Err(CoreError::InvalidArgument(format!(
                    "webhook state not recognized: {other:?}"
                )))
            }
        };

        let paid_amount = if status == WebhookStatus::Paid {
            let sum = fields
                .get("sum")
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| {
                    CoreError::InvalidArgument("paid webhook missing numeric sum".into())
                })?;
            Some(sum)
        } else {
            None
        };

        Ok(WebhookEvent {
            provider_order_id: order_id,
            status,
            paid_amount,
        })
    }

    fn ack_body(&self) -> &'static str {
        "state=accepted"
    }

    fn name(&self) -> &'static str {
        "provider-b"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::provider::hmac_hex;

    fn provider() -> ProviderB {
        ProviderB::new(&ProviderConfig {
            kind: crate::config::ProviderKind::ProviderB,
            secret: "b-secret".into(),
            base_url: "https://gate.test".into(),
            invoice_expiry: 300,
        })
    }

    #[test]
    fn parses_completed_webhook() {
        let body = b"auth-key=ak-9&state=completed&sum=50000";
        let event = provider().parse_webhook(body).unwrap();
        assert_eq!(event.provider_order_id, "ak-9");
        assert_eq!(event.status, WebhookStatus::Paid);
        assert_eq!(event.paid_amount, Some(50_000));
    }

    #[test]
    fn cancelled_webhook_has_no_amount() {
        let body = b"auth-key=ak-9&state=cancelled&sum=50000";
        let event = provider().parse_webhook(body).unwrap();
        assert_eq!(event.status, WebhookStatus::Failed);
        assert_eq!(event.paid_amount, None);
    }

    #[test]
    fn paid_webhook_without_sum_is_invalid() {
        let body = b"auth-key=ak-9&state=completed";
        assert!(provider().parse_webhook(body).is_err());
    }

    #[test]
    fn unknown_state_is_invalid() {
        let body = b"auth-key=ak-9&state=levitating";
        assert!(provider().parse_webhook(body).is_err());
    }

    #[test]
    fn form_unescape_handles_plus_and_percent() {
        let fields = parse_form(b"pay-url=https%3A%2F%2Fgate.test%2Fp%2F9&note=two+words");
        assert_eq!(fields["pay-url"], "https://gate.test/p/9");
        assert_eq!(fields["note"], "two words");
    }

    #[test]
    fn verifies_signature() {
        let p = provider();
        let body = b"auth-key=ak-9&state=completed&sum=1";
        let sig = hmac_hex("b-secret", body);
        assert!(p.verify_webhook(body, &sig));
        assert!(!p.verify_webhook(body, &hmac_hex("wrong", body)));
    }
}
