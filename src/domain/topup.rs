//! Balance top-up (provider invoice) entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Invoice status. `approved` is terminal and monotonic: once a top-up is
/// approved nothing (cleanup sweeps included) may revert it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopUpStatus {
    Pending,
    Approved,
    Expired,
    Failed,
}

impl TopUpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "expired" => Some(Self::Expired),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TopUp {
    pub id: String,
    pub client_id: String,
    /// Order id assigned by the payment provider at invoice creation.
    pub provider_order_id: Option<String>,
    /// Client-supplied Idempotency-Key this invoice was created under.
    pub idempotency_key: Option<String>,
    pub amount_requested: i64,
    pub amount_paid: Option<i64>,
    pub qr_payload: Option<String>,
    pub status: TopUpStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl TopUp {
    pub fn new(
        client_id: impl Into<String>,
        amount_requested: i64,
        expires_at: DateTime<Utc>,
        idempotency_key: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            client_id: client_id.into(),
            provider_order_id: None,
            idempotency_key,
            amount_requested,
            amount_paid: None,
            qr_payload: None,
            status: TopUpStatus::Pending,
            created_at: Utc::now(),
            expires_at,
            paid_at: None,
        }
    }
}
