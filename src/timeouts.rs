//! Timeout and connection behavior configuration.
//!
//! Each client instance owns its own configuration; there is no process-wide
//! settings object.

use std::time::Duration;

/// Timer configuration for the connection lifecycle.
///
/// # Examples
///
/// ```rust
/// use wirelink::WireLinkTimeouts;
/// use std::time::Duration;
///
/// // Defaults (5 s connect timeout, 3 s reconnect pause)
/// let timeouts = WireLinkTimeouts::default();
///
/// // Custom values
/// let timeouts = WireLinkTimeouts::builder()
///     .connect_timeout(Duration::from_secs(2))
///     .reconnect_pause(Duration::from_secs(10))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct WireLinkTimeouts {
    /// How long a connect attempt may stay in Connecting before it is forced
    /// closed and handed to the reconnect loop.
    /// Default: 5 seconds
    pub connect_timeout: Duration,

    /// Pause between losing the connection and the next connect attempt.
    /// Default: 3 seconds
    pub reconnect_pause: Duration,
}

impl Default for WireLinkTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            reconnect_pause: Duration::from_secs(3),
        }
    }
}

impl WireLinkTimeouts {
    /// Create a new builder for custom timeout configuration.
    pub fn builder() -> WireLinkTimeoutsBuilder {
        WireLinkTimeoutsBuilder::new()
    }

    /// Aggressive timers suitable for localhost development.
    pub fn fast() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            reconnect_pause: Duration::from_millis(500),
        }
    }
}

/// Builder for [`WireLinkTimeouts`].
#[derive(Debug, Clone)]
pub struct WireLinkTimeoutsBuilder {
    timeouts: WireLinkTimeouts,
}

impl WireLinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: WireLinkTimeouts::default(),
        }
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connect_timeout = timeout;
        self
    }

    /// Set the connect timeout in seconds.
    pub fn connect_timeout_secs(self, secs: u64) -> Self {
        self.connect_timeout(Duration::from_secs(secs))
    }

    /// Set the reconnect pause.
    pub fn reconnect_pause(mut self, pause: Duration) -> Self {
        self.timeouts.reconnect_pause = pause;
        self
    }

    /// Set the reconnect pause in seconds.
    pub fn reconnect_pause_secs(self, secs: u64) -> Self {
        self.reconnect_pause(Duration::from_secs(secs))
    }

    /// Build the timeout configuration.
    pub fn build(self) -> WireLinkTimeouts {
        self.timeouts
    }
}

/// Connection-level behavior options.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Whether a lost connection schedules a reconnect attempt. Explicit
    /// `close()` never reconnects regardless of this flag.
    /// Default: true
    pub auto_reconnect: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
        }
    }
}

impl ConnectionOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable automatic reconnection.
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let timeouts = WireLinkTimeouts::default();
        assert_eq!(timeouts.connect_timeout, Duration::from_secs(5));
        assert_eq!(timeouts.reconnect_pause, Duration::from_secs(3));
    }

    #[test]
    fn test_builder() {
        let timeouts = WireLinkTimeouts::builder()
            .connect_timeout_secs(2)
            .reconnect_pause(Duration::from_millis(250))
            .build();
        assert_eq!(timeouts.connect_timeout, Duration::from_secs(2));
        assert_eq!(timeouts.reconnect_pause, Duration::from_millis(250));
    }

    #[test]
    fn test_fast_preset() {
        let timeouts = WireLinkTimeouts::fast();
        assert!(timeouts.connect_timeout <= Duration::from_secs(2));
        assert!(timeouts.reconnect_pause < Duration::from_secs(1));
    }

    #[test]
    fn test_connection_options() {
        assert!(ConnectionOptions::default().auto_reconnect);
        assert!(!ConnectionOptions::new().with_auto_reconnect(false).auto_reconnect);
    }
}
