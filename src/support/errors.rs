//! Error types shared across the control plane.
//!
//! `CoreError` is the single error vocabulary of the public contracts:
//! the lifecycle engine returns it as a value, the REST layer translates
//! it to HTTP, and the OCPP session handler translates it to `CallError`.

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {entity} with {field}={value}")]
    NotFound {
        entity: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("client already has an active charging session")]
    ClientBusy,

    #[error("connector {connector_id} on station {station_id} is busy")]
    ConnectorBusy {
        station_id: String,
        connector_id: i32,
    },

    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: i64, required: i64 },

    #[error("station {0} is unavailable")]
    StationUnavailable(String),

    #[error("payment provider failure: {0}")]
    ProviderFailure(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, field: &'static str, value: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            field,
            value: value.into(),
        }
    }

    /// Stable machine-readable code used in REST error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::ClientBusy => "client_busy",
            Self::ConnectorBusy { .. } => "connector_busy",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::StationUnavailable(_) => "station_unavailable",
            Self::ProviderFailure(_) => "provider_failure",
            Self::Timeout(_) => "timeout",
            Self::Database(_) | Self::Internal(_) => "internal",
        }
    }

    /// Whether retrying the operation may succeed (connection blips,
    /// provider hiccups). Drives the provider adapter's retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Database(sea_orm::DbErr::Conn(_))
                | Self::Database(sea_orm::DbErr::ConnectionAcquire(_))
                | Self::ProviderFailure(_)
                | Self::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(CoreError::ClientBusy.code(), "client_busy");
        assert_eq!(
            CoreError::InsufficientFunds {
                balance: 50,
                required: 100
            }
            .code(),
            "insufficient_funds"
        );
        assert_eq!(
            CoreError::not_found("Session", "id", "abc").code(),
            "not_found"
        );
    }

    #[test]
    fn provider_failures_are_transient() {
        assert!(CoreError::ProviderFailure("502".into()).is_transient());
        assert!(!CoreError::ClientBusy.is_transient());
    }
}
