// Connection and timing settings for a device session.
//
// Plain data: the session reads it, nothing here touches the network.

use std::time::Duration;

/// TCP port every v3.3 device listens on for local control.
pub const DEFAULT_PORT: u16 = 6668;

/// Where a device lives and how patiently to talk to it.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Device identifier, echoed in every payload as `devId`/`gwId`/`uid`.
    pub device_id: String,
    /// Hostname or IP address.
    pub host: String,
    pub port: u16,
    /// Bound on the TCP connect.
    pub connect_timeout: Duration,
    /// Bound on the hello exchange after the TCP connect.
    pub handshake_timeout: Duration,
    /// Bound on a single frame write.
    pub write_timeout: Duration,
    /// Heartbeat period.
    pub keepalive_interval: Duration,
    /// Silence after which the transport is declared dead.
    pub keepalive_timeout: Duration,
}

impl SessionConfig {
    pub fn new(device_id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            host: host.into(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(9),
            keepalive_timeout: Duration::from_secs(20),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_keepalive(mut self, interval: Duration, timeout: Duration) -> Self {
        self.keepalive_interval = interval;
        self.keepalive_timeout = timeout;
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, handshake: Duration) -> Self {
        self.connect_timeout = connect;
        self.handshake_timeout = handshake;
        self
    }

    /// `host:port`, for logs and `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::new("dev1", "192.168.1.20");
        assert_eq!(config.port, 6668);
        assert_eq!(config.keepalive_interval, Duration::from_secs(9));
        assert_eq!(config.keepalive_timeout, Duration::from_secs(20));
        assert_eq!(config.address(), "192.168.1.20:6668");
    }

    #[test]
    fn builders_override() {
        let config = SessionConfig::new("dev1", "vac.local")
            .with_port(7000)
            .with_keepalive(Duration::from_secs(2), Duration::from_secs(5));
        assert_eq!(config.address(), "vac.local:7000");
        assert_eq!(config.keepalive_timeout, Duration::from_secs(5));
    }
}
