//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use robovac_config::ConfigError;
use robovac_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
#[allow(unused_assignments)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not connect to the vacuum at {host}")]
    #[diagnostic(
        code(robovac::connection_failed),
        help(
            "Check that the vacuum is powered on and reachable on the local network.\n\
             Only one client can hold the connection: close the vendor app first.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { host: String, reason: String },

    #[error("The vacuum is not connected")]
    #[diagnostic(
        code(robovac::disconnected),
        help("The connection dropped. Run the command again.")
    )]
    Disconnected,

    #[error("Timed out while {operation}")]
    #[diagnostic(
        code(robovac::timeout),
        help(
            "Increase the timeout with --timeout, or check the local key: a device\n\
             that cannot decrypt our frames never answers."
        )
    )]
    Timeout { operation: String },

    // ── Credentials ──────────────────────────────────────────────────

    #[error("Invalid local key: {reason}")]
    #[diagnostic(
        code(robovac::invalid_key),
        help("The local key is exactly 16 characters. Store it with: robovac config set-key")
    )]
    InvalidKey { reason: String },

    #[error("No local key configured for device '{device}'")]
    #[diagnostic(
        code(robovac::no_local_key),
        help(
            "Store one with: robovac config set-key {device}\n\
             Or set ROBOVAC_LOCAL_KEY, or local_key_env in the device profile."
        )
    )]
    NoLocalKey { device: String },

    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(robovac::not_found),
        help("Available: {available}")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        available: String,
    },

    // ── Device ───────────────────────────────────────────────────────

    #[error("Device protocol error: {message}")]
    #[diagnostic(
        code(robovac::protocol),
        help("Run with -vv to see the frames exchanged with the device.")
    )]
    Protocol { message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(robovac::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("No vacuum configured")]
    #[diagnostic(
        code(robovac::no_config),
        help(
            "Add a [devices.<name>] section with device_id and host to {path},\n\
             or pass --device-id, --host, and --local-key."
        )
    )]
    NoConfig { path: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(robovac::config))]
    Config { message: String },

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(robovac::json))]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(robovac::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Disconnected => exit_code::CONNECTION,
            Self::InvalidKey { .. } | Self::NoLocalKey { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::Json(_) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { reason } => CliError::ConnectionFailed {
                host: "the configured address".into(),
                reason,
            },

            CoreError::NotConnected | CoreError::Disconnected => CliError::Disconnected,

            CoreError::Timeout { operation, .. } => CliError::Timeout { operation },

            CoreError::InvalidKey { reason } => CliError::InvalidKey { reason },

            CoreError::DeviceNotFound { identifier } => CliError::NotFound {
                resource_type: "device".into(),
                identifier,
                available: "robovac config devices".into(),
            },

            CoreError::UnknownRoom { room, available } => CliError::NotFound {
                resource_type: "room".into(),
                identifier: room,
                available,
            },

            CoreError::Protocol { message } => CliError::Protocol { message },

            CoreError::Config { message } => CliError::Config { message },

            CoreError::DuplicateDevice { identifier } => {
                CliError::Internal(format!("device registered twice: {identifier}"))
            }

            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoLocalKey { device } => CliError::NoLocalKey { device },
            ConfigError::UnknownDevice { name, available } => CliError::NotFound {
                resource_type: "device".into(),
                identifier: name,
                available,
            },
            ConfigError::NoDevices => CliError::NoConfig {
                path: robovac_config::config_path().display().to_string(),
            },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_kind() {
        let timeout: CliError = CoreError::Timeout {
            operation: "waiting for status".into(),
            timeout_ms: 5000,
        }
        .into();
        assert_eq!(timeout.exit_code(), exit_code::TIMEOUT);

        let room: CliError = CoreError::UnknownRoom {
            room: "attic".into(),
            available: "kitchen".into(),
        }
        .into();
        assert_eq!(room.exit_code(), exit_code::NOT_FOUND);

        let key: CliError = ConfigError::NoLocalKey {
            device: "hall".into(),
        }
        .into();
        assert_eq!(key.exit_code(), exit_code::AUTH);

        let refused: CliError = CoreError::ConnectionFailed {
            reason: "connection refused".into(),
        }
        .into();
        assert_eq!(refused.exit_code(), exit_code::CONNECTION);
    }
}
