use thiserror::Error;

/// Top-level error type for the `robovac-api` crate.
///
/// Covers every failure mode of the local protocol: key handling,
/// payload encryption, frame parsing, and the session transport.
/// `robovac-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Keys ────────────────────────────────────────────────────────
    /// The device key is not exactly 16 bytes.
    #[error("Invalid device key: {reason}")]
    InvalidKey { reason: String },

    // ── Cipher ──────────────────────────────────────────────────────
    /// Ciphertext length or padding is malformed (wrong key or corrupted frame).
    #[error("Crypto error: {reason}")]
    Crypto { reason: String },

    // ── Framing ─────────────────────────────────────────────────────
    /// The buffer holds only part of a frame. Retry once more bytes arrive.
    #[error("Incomplete frame: {needed} more bytes required")]
    Framing { needed: usize },

    /// The buffer does not start with the frame prefix.
    #[error("Invalid frame prefix {found:#010x}")]
    InvalidPrefix { found: u32 },

    /// The bytes at the declared end of the frame are not the suffix.
    #[error("Invalid frame suffix {found:#010x}")]
    InvalidSuffix { found: u32 },

    /// The declared length is too small for a trailer or above the frame limit.
    #[error("Invalid declared frame length {declared}")]
    InvalidLength { declared: usize },

    /// CRC32 mismatch. The frame is discarded, never retried.
    #[error("Frame checksum mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    Integrity { expected: u32, actual: u32 },

    // ── Payload ─────────────────────────────────────────────────────
    /// Decryption or JSON parsing failed after the integrity check passed,
    /// with the raw payload bytes kept for diagnosis.
    #[error("Payload error: {reason}")]
    Payload { reason: String, raw: Vec<u8> },

    // ── Transport ───────────────────────────────────────────────────
    /// Socket-level failure (connection refused, reset, broken pipe).
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// An operation did not finish in time.
    #[error("Timed out after {timeout_ms}ms while {operation}")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// A command was issued while the session is disconnected.
    #[error("Session is not connected")]
    NotConnected,

    /// The connection went away while a caller was waiting on it.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl Error {
    pub(crate) fn timeout(operation: &'static str, after: std::time::Duration) -> Self {
        Self::Timeout {
            operation,
            timeout_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }
}
