// ── Runtime device configuration ──
//
// These types describe *how* to reach a device. They carry the local key
// and connection tuning but never touch disk: the CLI builds a
// `DeviceConfig` from its profile and hands it in.

use std::collections::BTreeMap;
use std::time::Duration;

use robovac_api::{DEFAULT_PORT, DeviceKey, SessionConfig};
use secrecy::{ExposeSecret, SecretString};

use crate::error::CoreError;

/// Everything needed to talk to one vacuum.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Device identifier (`gwId`).
    pub device_id: String,
    /// Friendly name for logs and output.
    pub name: Option<String>,
    /// Hostname or IP address.
    pub host: String,
    pub port: u16,
    /// The 16-character local key.
    pub local_key: SecretString,
    /// Room name -> opaque DPS 173 payload captured from the vendor app.
    pub rooms: BTreeMap<String, String>,
    /// Bound on the TCP connect and the hello exchange.
    pub connect_timeout: Duration,
    /// Bound on request/response exchanges such as a status query.
    pub request_timeout: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    /// Periodic status query while connected. `None` relies on pushed updates.
    pub poll_interval: Option<Duration>,
}

impl DeviceConfig {
    pub fn new(
        device_id: impl Into<String>,
        host: impl Into<String>,
        local_key: SecretString,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            name: None,
            host: host.into(),
            port: DEFAULT_PORT,
            local_key,
            rooms: BTreeMap::new(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(9),
            keepalive_timeout: Duration::from_secs(20),
            poll_interval: None,
        }
    }

    /// Name for display: the friendly name if set, otherwise the device id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.device_id)
    }

    /// Parse the local key. Fails if it is not exactly 16 bytes.
    pub fn device_key(&self) -> Result<DeviceKey, CoreError> {
        Ok(DeviceKey::from_local_key(self.local_key.expose_secret())?)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(self.device_id.clone(), self.host.clone())
            .with_port(self.port)
            .with_timeouts(self.connect_timeout, self.connect_timeout)
            .with_keepalive(self.keepalive_interval, self.keepalive_timeout)
    }
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff for re-establishing a dropped session.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum consecutive failed attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

/// Backoff delay before attempt `attempt` (zero-based).
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(16)).unwrap_or(16);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic spread seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(key: &str) -> DeviceConfig {
        DeviceConfig::new("eb01", "192.168.1.42", SecretString::from(key.to_owned()))
    }

    #[test]
    fn session_config_carries_tuning() {
        let mut device = config("0123456789abcdef");
        device.port = 7000;
        device.keepalive_timeout = Duration::from_secs(30);

        let session = device.session_config();
        assert_eq!(session.device_id, "eb01");
        assert_eq!(session.address(), "192.168.1.42:7000");
        assert_eq!(session.keepalive_timeout, Duration::from_secs(30));
    }

    #[test]
    fn short_key_is_rejected() {
        assert!(config("0123456789abcdef").device_key().is_ok());
        assert!(matches!(
            config("short").device_key(),
            Err(CoreError::InvalidKey { .. })
        ));
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let mut device = config("0123456789abcdef");
        assert_eq!(device.display_name(), "eb01");
        device.name = Some("Downstairs".into());
        assert_eq!(device.display_name(), "Downstairs");
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = ReconnectConfig::default();
        let first = calculate_backoff(0, &config);
        let third = calculate_backoff(2, &config);
        assert_eq!(first, Duration::from_secs(1));
        assert!(third > first);

        for attempt in 10..40 {
            let delay = calculate_backoff(attempt, &config);
            assert!(delay <= Duration::from_secs_f64(30.0 * 1.25));
            assert!(delay >= Duration::from_secs_f64(30.0 * 0.75));
        }
    }
}
