//! Local monitoring playback of remote-feed audio

use async_trait::async_trait;

use crate::error::Result;

/// Audio-only player used to listen to a remote feed locally
#[async_trait]
pub trait MonitorPlayer: Send + Sync {
    /// Output volume, 0.0 (silent) to 1.0
    fn set_volume(&self, volume: f32);

    async fn release(&self);
}

/// Opens monitor players for feed URLs
#[async_trait]
pub trait MonitorPlayerFactory: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn MonitorPlayer>>;
}

/// Volume for a monitor toggle state
pub(crate) fn monitor_volume(enabled: bool) -> f32 {
    if enabled {
        1.0
    } else {
        0.0
    }
}
