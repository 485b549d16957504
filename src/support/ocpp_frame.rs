//! OCPP-J transport framing.
//!
//! Frames are JSON arrays tagged by a leading message type id:
//!
//! - **Call**       `[2, "<uniqueId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<uniqueId>", {<payload>}]`
//! - **CallError**  `[4, "<uniqueId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`

use serde_json::Value;
use std::fmt;
use thiserror::Error;

const MSG_TYPE_CALL: u64 = 2;
const MSG_TYPE_CALL_RESULT: u64 = 3;
const MSG_TYPE_CALL_ERROR: u64 = 4;

/// OCPP-J error codes used in `CallError` frames.
pub mod error_code {
    pub const NOT_IMPLEMENTED: &str = "NotImplemented";
    pub const FORMATION_VIOLATION: &str = "FormationViolation";
    pub const PROTOCOL_ERROR: &str = "ProtocolError";
    pub const INTERNAL_ERROR: &str = "InternalError";
    pub const SECURITY_ERROR: &str = "SecurityError";
}

/// A parsed OCPP-J frame.
#[derive(Debug, Clone)]
pub enum OcppFrame {
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    CallResult {
        unique_id: String,
        payload: Value,
    },
    CallError {
        unique_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

impl OcppFrame {
    /// Parse raw JSON text into a frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let arr: Vec<Value> =
            serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;

        let msg_type = arr
            .first()
            .and_then(Value::as_u64)
            .ok_or(FrameError::MissingMessageType)?;

        let unique_id = arr
            .get(1)
            .and_then(Value::as_str)
            .ok_or(FrameError::BadField("uniqueId must be a string"))?
            .to_string();

        match msg_type {
            MSG_TYPE_CALL => {
                if arr.len() < 4 {
                    return Err(FrameError::Truncated {
                        expected: 4,
                        got: arr.len(),
                    });
                }
                let action = arr[2]
                    .as_str()
                    .ok_or(FrameError::BadField("action must be a string"))?
                    .to_string();
                Ok(Self::Call {
                    unique_id,
                    action,
                    payload: arr[3].clone(),
                })
            }
            MSG_TYPE_CALL_RESULT => Ok(Self::CallResult {
                unique_id,
                payload: arr
                    .get(2)
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Default::default())),
            }),
            MSG_TYPE_CALL_ERROR => Ok(Self::CallError {
                unique_id,
                error_code: arr
                    .get(2)
                    .and_then(Value::as_str)
                    .unwrap_or(error_code::INTERNAL_ERROR)
                    .to_string(),
                error_description: arr
                    .get(3)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                error_details: arr
                    .get(4)
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Default::default())),
            }),
            other => Err(FrameError::UnknownMessageType(other)),
        }
    }

    /// Serialize the frame to wire text.
    pub fn to_wire(&self) -> String {
        let arr = match self {
            Self::Call {
                unique_id,
                action,
                payload,
            } => Value::Array(vec![
                MSG_TYPE_CALL.into(),
                unique_id.clone().into(),
                action.clone().into(),
                payload.clone(),
            ]),
            Self::CallResult { unique_id, payload } => Value::Array(vec![
                MSG_TYPE_CALL_RESULT.into(),
                unique_id.clone().into(),
                payload.clone(),
            ]),
            Self::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => Value::Array(vec![
                MSG_TYPE_CALL_ERROR.into(),
                unique_id.clone().into(),
                error_code.clone().into(),
                error_description.clone().into(),
                error_details.clone(),
            ]),
        };
        // serializing a Value cannot fail
        serde_json::to_string(&arr).unwrap()
    }

    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }

    /// Build a `CallResult` answering the given Call id.
    pub fn result(unique_id: impl Into<String>, payload: Value) -> Self {
        Self::CallResult {
            unique_id: unique_id.into(),
            payload,
        }
    }

    /// Build a `CallError` answering the given Call id.
    pub fn error(
        unique_id: impl Into<String>,
        code: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self::CallError {
            unique_id: unique_id.into(),
            error_code: code.into(),
            error_description: description.into(),
            error_details: Value::Object(Default::default()),
        }
    }
}

/// Framing-level parse failures. These map to `CallError(FormationViolation)`
/// when the frame carried enough structure to answer, and to a silent drop
/// plus strike accounting otherwise.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("missing or non-numeric message type")]
    MissingMessageType,
    #[error("unknown message type {0}")]
    UnknownMessageType(u64),
    #[error("expected at least {expected} elements, got {got}")]
    Truncated { expected: usize, got: usize },
    #[error("{0}")]
    BadField(&'static str),
}

impl fmt::Display for OcppFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call { action, .. } => write!(f, "Call({action})"),
            Self::CallResult { unique_id, .. } => write!(f, "CallResult({unique_id})"),
            Self::CallError { error_code, .. } => write!(f, "CallError({error_code})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call() {
        let text = r#"[2,"71","BootNotification",{"chargePointVendor":"Vendo","chargePointModel":"EVX-2"}]"#;
        match OcppFrame::parse(text).unwrap() {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => {
                assert_eq!(unique_id, "71");
                assert_eq!(action, "BootNotification");
                assert_eq!(payload["chargePointVendor"], "Vendo");
            }
            other => panic!("expected Call, got {other}"),
        }
    }

    #[test]
    fn parses_call_result_with_missing_payload() {
        let frame = OcppFrame::parse(r#"[3,"71"]"#).unwrap();
        match frame {
            OcppFrame::CallResult { payload, .. } => assert!(payload.as_object().unwrap().is_empty()),
            other => panic!("expected CallResult, got {other}"),
        }
    }

    #[test]
    fn parses_call_error() {
        let frame = OcppFrame::parse(r#"[4,"9","NotImplemented","no such action",{}]"#).unwrap();
        match frame {
            OcppFrame::CallError { error_code, .. } => {
                assert_eq!(error_code, error_code::NOT_IMPLEMENTED)
            }
            other => panic!("expected CallError, got {other}"),
        }
    }

    #[test]
    fn rejects_non_array_and_bad_type() {
        assert!(matches!(
            OcppFrame::parse("{}"),
            Err(FrameError::InvalidJson(_))
        ));
        assert!(matches!(
            OcppFrame::parse("[7,\"x\"]"),
            Err(FrameError::UnknownMessageType(7))
        ));
        assert!(matches!(
            OcppFrame::parse("[]"),
            Err(FrameError::MissingMessageType)
        ));
    }

    #[test]
    fn truncated_call_is_rejected() {
        assert!(matches!(
            OcppFrame::parse(r#"[2,"id","Heartbeat"]"#),
            Err(FrameError::Truncated { expected: 4, .. })
        ));
    }

    #[test]
    fn wire_roundtrip() {
        let call = OcppFrame::Call {
            unique_id: "cs-1".into(),
            action: "RemoteStopTransaction".into(),
            payload: serde_json::json!({"transactionId": 42}),
        };
        let parsed = OcppFrame::parse(&call.to_wire()).unwrap();
        assert_eq!(parsed.unique_id(), "cs-1");

        let err = OcppFrame::error("cs-1", error_code::FORMATION_VIOLATION, "bad frame");
        let parsed = OcppFrame::parse(&err.to_wire()).unwrap();
        assert!(matches!(parsed, OcppFrame::CallError { .. }));
    }
}
