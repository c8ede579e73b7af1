//! Health monitor configuration

use std::time::Duration;

/// Background feed prober configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Upper bound for a single connect-and-ready check
    pub probe_timeout: Duration,

    /// Pause after each probed feed
    pub between_feeds: Duration,

    /// Pause after a full cycle over all feeds
    pub cycle_pause: Duration,

    /// How long a feed-lost notice stays visible
    pub notice_display: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(12),
            between_feeds: Duration::from_secs(3),
            cycle_pause: Duration::from_secs(30),
            notice_display: Duration::from_secs(5),
        }
    }
}

impl MonitorConfig {
    /// Set probe timeout
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set pauses between feeds and between cycles
    pub fn pacing(mut self, between_feeds: Duration, cycle_pause: Duration) -> Self {
        self.between_feeds = between_feeds;
        self.cycle_pause = cycle_pause;
        self
    }

    /// Set notice display window
    pub fn notice_display(mut self, window: Duration) -> Self {
        self.notice_display = window;
        self
    }
}
