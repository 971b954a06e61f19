// ── Core error types ──
//
// User-facing errors from robovac-core. Consumers never see frame or
// cipher details directly: the `From<robovac_api::Error>` impl folds
// wire-level failures into a handful of domain variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to device: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Device is not connected")]
    NotConnected,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timed out after {timeout_ms}ms while {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Invalid local key: {reason}")]
    InvalidKey { reason: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    #[error("Device already registered: {identifier}")]
    DuplicateDevice { identifier: String },

    #[error("Room '{room}' is not configured (available: {available})")]
    UnknownRoom { room: String, available: String },

    // ── Protocol errors ──────────────────────────────────────────────
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from wire-level errors ────────────────────────────────

impl From<robovac_api::Error> for CoreError {
    fn from(err: robovac_api::Error) -> Self {
        use robovac_api::Error as Api;

        match err {
            Api::InvalidKey { reason } => CoreError::InvalidKey { reason },
            Api::Transport(e) => CoreError::ConnectionFailed {
                reason: e.to_string(),
            },
            Api::Timeout {
                operation,
                timeout_ms,
            } => CoreError::Timeout {
                operation: operation.to_owned(),
                timeout_ms,
            },
            Api::NotConnected => CoreError::NotConnected,
            Api::ConnectionClosed => CoreError::Disconnected,
            other @ (Api::Crypto { .. }
            | Api::Framing { .. }
            | Api::InvalidPrefix { .. }
            | Api::InvalidSuffix { .. }
            | Api::InvalidLength { .. }
            | Api::Integrity { .. }
            | Api::Payload { .. }) => CoreError::Protocol {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_errors_fold_into_domain_variants() {
        let err: CoreError = robovac_api::Error::NotConnected.into();
        assert!(matches!(err, CoreError::NotConnected));

        let err: CoreError = robovac_api::Error::Integrity {
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(matches!(err, CoreError::Protocol { .. }));

        let err: CoreError = robovac_api::Error::Timeout {
            operation: "waiting for handshake",
            timeout_ms: 5000,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Timed out after 5000ms while waiting for handshake"
        );
    }

    #[test]
    fn key_errors_keep_their_reason() {
        let err: CoreError = robovac_api::Error::InvalidKey {
            reason: "expected 16 bytes".into(),
        }
        .into();
        assert!(matches!(err, CoreError::InvalidKey { reason } if reason == "expected 16 bytes"));
    }
}
