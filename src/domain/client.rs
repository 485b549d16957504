//! Client (prepaid account) entity.

use chrono::{DateTime, Utc};

/// A mobile/PWA client with a prepaid balance.
///
/// `balance` is in minor currency units and never goes negative: every
/// debit is a conditional update that fails instead of overdrawing.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: String,
    pub balance: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl Client {
    pub fn new(id: impl Into<String>, balance: i64, currency: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            balance,
            currency: currency.into(),
            created_at: Utc::now(),
        }
    }
}
