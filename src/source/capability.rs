//! Capture and playback capabilities consumed by the controller
//!
//! Hardware access and remote-feed decoding live outside this crate. The
//! controller only drives these traits: create a source for a slot, wait for
//! it to be ready, and release it.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::slot::{EffectiveAudioSource, SourceSlot};
use crate::error::Result;

/// Player/transport event reported by a live remote feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// Frames are flowing
    Ready,
    /// Playback stalled waiting for data
    Buffering,
    /// Playback failed
    Error(String),
    /// Remote end closed the feed
    Ended,
}

/// An acquired video origin
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Slot this source was created for
    fn slot(&self) -> &SourceSlot;

    /// Resolve once the source produces frames
    ///
    /// Callers bound this with their own timeout.
    async fn wait_ready(&self) -> Result<()>;

    /// Live event stream, only meaningful for remote feeds
    fn player_events(&self) -> Option<broadcast::Receiver<PlayerEvent>> {
        None
    }

    /// Mute the audio carried inside the video feed
    fn set_audio_muted(&self, _muted: bool) {}

    /// Release the underlying device or player
    async fn release(&self);
}

/// Creates video sources for slots
#[async_trait]
pub trait VideoSourceFactory: Send + Sync {
    async fn create(&self, slot: &SourceSlot) -> Result<Box<dyn VideoSource>>;
}

/// An acquired audio origin (microphone or remote-feed audio capture)
#[async_trait]
pub trait AudioSource: Send + Sync {
    fn source(&self) -> EffectiveAudioSource;

    /// Route this source to the local monitor output
    fn set_monitoring(&self, _enabled: bool) {}

    async fn release(&self);
}

/// Creates audio sources
///
/// `url` is set for remote-feed audio and `None` for the microphone.
#[async_trait]
pub trait AudioSourceFactory: Send + Sync {
    async fn create(
        &self,
        source: EffectiveAudioSource,
        url: Option<&str>,
    ) -> Result<Box<dyn AudioSource>>;
}

/// Outcome of a lightweight feed check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    Error(String),
}

impl ProbeOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ProbeOutcome::Ready)
    }
}

/// Connect-and-ready check against a feed URL
///
/// Implementations should honour `timeout`; callers also wrap the call in
/// `tokio::time::timeout` so a misbehaving probe cannot block a cycle.
#[async_trait]
pub trait RemoteFeedProbe: Send + Sync {
    async fn check(&self, url: &str, timeout: Duration) -> ProbeOutcome;
}

/// Run a probe bounded by `timeout`, mapping expiry to an error outcome
pub async fn probe_bounded(probe: &dyn RemoteFeedProbe, url: &str, timeout: Duration) -> ProbeOutcome {
    match tokio::time::timeout(timeout, probe.check(url, timeout)).await {
        Ok(outcome) => outcome,
        Err(_) => ProbeOutcome::Error(format!("no response within {:?}", timeout)),
    }
}
