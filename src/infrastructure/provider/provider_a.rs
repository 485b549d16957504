//! Provider dialect A: JSON bodies, numeric webhook statuses, signature
//! in the `X-Pay-Signature` header.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{signature_matches, CreatedInvoice, PaymentProvider, WebhookEvent, WebhookStatus};
use crate::config::ProviderConfig;
use crate::support::retry::{with_backoff, RetryPolicy};
use crate::support::{CoreError, CoreResult};

pub const SIGNATURE_HEADER: &str = "X-Pay-Signature";

pub struct ProviderA {
    http: reqwest::Client,
    base_url: String,
    secret: String,
    invoice_expiry_secs: i64,
}

#[derive(Debug, Deserialize)]
struct CreateInvoiceResponse {
    invoice_id: String,
    #[serde(default)]
    pay_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookBody {
    invoice_id: String,
    /// 0 pending, 1 paid, anything else failed/cancelled.
    status: i32,
    #[serde(default)]
    paid_amount: Option<i64>,
}

impl ProviderA {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret: config.secret.clone(),
            invoice_expiry_secs: config.invoice_expiry,
        }
    }

    async fn post_invoice(
        &self,
        client_id: &str,
        order_id: &str,
        amount: i64,
    ) -> CoreResult<CreateInvoiceResponse> {
        let url = format!("{}/invoices", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&json!({
                "order_id": order_id,
                "client_ref": client_id,
                "amount": amount,
                "ttl": self.invoice_expiry_secs,
            }))
            .send()
            .await
            .map_err(|e| CoreError::ProviderFailure(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(CoreError::ProviderFailure(format!(
                "invoice endpoint returned {status}"
            )));
        }
        if !status.is_success() {
            // 4xx is permanent: retrying the same request cannot help
            return Err(CoreError::Internal(format!(
                "provider rejected invoice: {status}"
            )));
        }

        response
            .json::<CreateInvoiceResponse>()
            .await
            .map_err(|e| CoreError::ProviderFailure(format!("bad invoice response: {e}")))
    }
}

#[async_trait]
impl PaymentProvider for ProviderA {
    async fn create_invoice(
        &self,
        client_id: &str,
        order_id: &str,
        amount: i64,
    ) -> CoreResult<CreatedInvoice> {
        let created = with_backoff(
            RetryPolicy::default(),
            || self.post_invoice(client_id, order_id, amount),
            CoreError::is_transient,
            "provider_a.create_invoice",
        )
        .await
        .map_err(|e| match e {
            CoreError::ProviderFailure(_) => e,
            other => CoreError::ProviderFailure(other.to_string()),
        })?;

        info!(
            order_id,
            provider_order_id = created.invoice_id.as_str(),
            "invoice created"
        );

        Ok(CreatedInvoice {
            provider_order_id: created.invoice_id,
            qr_payload: created.pay_url,
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
        let body: WebhookBody = serde_json::from_slice(payload)
            .map_err(|e| CoreError::InvalidArgument(format!("bad webhook body: {e}")))?;

        let status = match body.status {
            0 => WebhookStatus::Pending,
            1 => WebhookStatus::Paid,
            _ => WebhookStatus::Failed,
        };

        Ok(WebhookEvent {
            provider_order_id: body.invoice_id,
            status,
            paid_amount: body.paid_amount.filter(|_| status == WebhookStatus::Paid),
        })
    }

    fn ack_body(&self) -> &'static str {
        r#"{"status":"received"}"#
    }

    fn name(&self) -> &'static str {
        "provider-a"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::provider::hmac_hex;

    fn provider() -> ProviderA {
        ProviderA::new(&ProviderConfig {
            kind: crate::config::ProviderKind::ProviderA,
            secret: "test-secret".into(),
            base_url: "https://pay.test/api".into(),
            invoice_expiry: 300,
        })
    }

    #[test]
    fn parses_paid_webhook() {
        let body = br#"{"invoice_id":"inv-1","status":1,"paid_amount":50000}"#;
        let event = provider().parse_webhook(body).unwrap();
        assert_eq!(event.provider_order_id, "inv-1");
        assert_eq!(event.status, WebhookStatus::Paid);
        assert_eq!(event.paid_amount, Some(50_000));
    }

    #[test]
    fn unpaid_webhook_carries_no_amount() {
        let body = br#"{"invoice_id":"inv-1","status":2,"paid_amount":50000}"#;
        let event = provider().parse_webhook(body).unwrap();
        assert_eq!(event.status, WebhookStatus::Failed);
        assert_eq!(event.paid_amount, None);
    }

    #[test]
    fn rejects_garbage_payload() {
        assert!(provider().parse_webhook(b"<xml/>").is_err());
    }

    #[test]
    fn verifies_signature_with_shared_secret() {
        let p = provider();
        let body = br#"{"invoice_id":"inv-1","status":1}"#;
        let sig = hmac_hex("test-secret", body);
        assert!(p.verify_webhook(body, &sig));
        assert!(!p.verify_webhook(body, "bogus"));
        assert!(!p.verify_webhook(b"tampered", &sig));
    }
}
