//! Shared API response types
//!
//! Every JSON response uses one envelope:
//!
//! ```json
//! {"success": true, "message": "Enrolled", "data": {...}}
//! {"success": false, "message": "Already enrolled", "error_kind": "conflict"}
//! ```

use serde::{Deserialize, Serialize};

/// Error classification carried by failed envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Internal,
}

/// Uniform result envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            error_kind: None,
            data: Some(data),
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error_kind: Some(kind),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_omits_error_kind() {
        let envelope = ApiEnvelope::ok("done", 5);
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["success"], true);
        assert_eq!(json["data"], 5);
        assert!(json.get("error_kind").is_none());
    }

    #[test]
    fn test_error_envelope_carries_kind() {
        let envelope: ApiEnvelope<()> = ApiEnvelope::error(ErrorKind::Conflict, "Already enrolled");
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["error_kind"], "conflict");
        assert!(json.get("data").is_none());
    }
}
