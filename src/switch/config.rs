//! Source switch configuration

use std::time::Duration;

/// Source switch coordinator configuration
#[derive(Debug, Clone)]
pub struct SwitchConfig {
    /// A remote feed must become ready within this time
    pub feed_ready_timeout: Duration,

    /// Fixed delay between reconnect attempts to a remote feed
    pub retry_backoff: Duration,

    /// Buffering longer than this counts as a disconnection
    pub buffering_threshold: Duration,

    /// Restart the whole stream (instead of hot-swapping) when the live feed drops
    pub restart_on_disconnect: bool,

    /// How long placeholder/fallback notices stay visible
    pub notice_display: Duration,

    /// Local capture device used when every remote feed has failed
    pub local_device: Option<String>,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            feed_ready_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(5),
            buffering_threshold: Duration::from_secs(2),
            restart_on_disconnect: false,
            notice_display: Duration::from_secs(5),
            local_device: None,
        }
    }
}

impl SwitchConfig {
    /// Set feed ready timeout
    pub fn feed_ready_timeout(mut self, timeout: Duration) -> Self {
        self.feed_ready_timeout = timeout;
        self
    }

    /// Set retry backoff
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set buffering threshold
    pub fn buffering_threshold(mut self, threshold: Duration) -> Self {
        self.buffering_threshold = threshold;
        self
    }

    /// Enable full stream restart on live feed loss
    pub fn restart_on_disconnect(mut self, enabled: bool) -> Self {
        self.restart_on_disconnect = enabled;
        self
    }

    /// Set the local fallback device
    pub fn local_device(mut self, device: impl Into<String>) -> Self {
        self.local_device = Some(device.into());
        self
    }
}
