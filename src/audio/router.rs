//! Audio route resolution
//!
//! Exactly one audio-producing object is alive at any time. When the
//! effective source changes, the previous object (and its monitor player) is
//! fully released before the next one is created.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use super::monitor::{monitor_volume, MonitorPlayer, MonitorPlayerFactory};
use crate::error::{Error, Result, StartRejection};
use crate::source::{
    AudioSelection, AudioSource, AudioSourceFactory, EffectiveAudioSource, FeedBoard, SourceSlot,
    VideoSource,
};

/// Resolve user intent against the active video source
///
/// `Auto` follows a remote video feed and otherwise uses the microphone.
pub fn resolve(selection: AudioSelection, video: &SourceSlot) -> EffectiveAudioSource {
    match selection {
        AudioSelection::Auto => match video.feed_index() {
            Some(index) => EffectiveAudioSource::RemoteFeed(index),
            None => EffectiveAudioSource::Local,
        },
        AudioSelection::Local => EffectiveAudioSource::Local,
        AudioSelection::RemoteFeed(index) => EffectiveAudioSource::RemoteFeed(index),
    }
}

struct ActiveAudio {
    effective: EffectiveAudioSource,
    source: Box<dyn AudioSource>,
    monitor: Option<Box<dyn MonitorPlayer>>,
}

impl ActiveAudio {
    async fn release(self) {
        if let Some(monitor) = self.monitor {
            monitor.release().await;
        }
        self.source.release().await;
    }
}

/// Owns the single active audio source
pub struct AudioRouter {
    factory: Arc<dyn AudioSourceFactory>,
    monitor_factory: Option<Arc<dyn MonitorPlayerFactory>>,
    feeds: Arc<FeedBoard>,
    selection_tx: watch::Sender<Option<AudioSelection>>,
    effective_tx: watch::Sender<Option<EffectiveAudioSource>>,
    active: Mutex<Option<ActiveAudio>>,
    monitoring: AtomicBool,
}

impl AudioRouter {
    pub fn new(
        factory: Arc<dyn AudioSourceFactory>,
        monitor_factory: Option<Arc<dyn MonitorPlayerFactory>>,
        feeds: Arc<FeedBoard>,
    ) -> Self {
        Self {
            factory,
            monitor_factory,
            feeds,
            selection_tx: watch::channel(None).0,
            effective_tx: watch::channel(None).0,
            active: Mutex::new(None),
            monitoring: AtomicBool::new(false),
        }
    }

    /// Record user intent; takes effect on the next `apply`
    pub fn select(&self, selection: AudioSelection) {
        self.selection_tx.send_replace(Some(selection));
    }

    pub fn selection(&self) -> Option<AudioSelection> {
        *self.selection_tx.borrow()
    }

    /// Effective source currently attached
    pub fn effective(&self) -> Option<EffectiveAudioSource> {
        *self.effective_tx.borrow()
    }

    pub fn subscribe_effective(&self) -> watch::Receiver<Option<EffectiveAudioSource>> {
        self.effective_tx.subscribe()
    }

    pub fn monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    pub async fn has_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Resolve the selection against `video` and attach the result
    ///
    /// Never changes the active video source. A no-op (apart from refreshing
    /// monitor routing) when the effective source is unchanged.
    pub async fn apply(&self, video: &dyn VideoSource) -> Result<EffectiveAudioSource> {
        let selection = self
            .selection()
            .ok_or(Error::Configuration(StartRejection::AudioSourceNotSet))?;
        let slot = video.slot();
        let target = resolve(selection, slot);

        // Audio always comes from the dedicated capture, never the video player
        if slot.is_remote() {
            video.set_audio_muted(true);
        }

        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref() {
            if current.effective == target {
                self.route_monitor(current);
                return Ok(target);
            }
        }

        if let Some(previous) = active.take() {
            tracing::debug!(from = %previous.effective, to = %target, "Releasing previous audio source");
            previous.release().await;
            self.effective_tx.send_replace(None);
        }

        let next = self.acquire(target).await?;
        self.route_monitor(&next);
        *active = Some(next);
        self.effective_tx.send_replace(Some(target));

        tracing::info!(audio = %target, video = %slot, ?selection, "Audio source attached");
        Ok(target)
    }

    /// Release the active audio source, if any
    pub async fn release(&self) {
        if let Some(previous) = self.active.lock().await.take() {
            tracing::debug!(audio = %previous.effective, "Audio source released");
            previous.release().await;
        }
        self.effective_tx.send_replace(None);
    }

    /// Toggle local monitoring of the active audio
    pub async fn set_monitoring(&self, enabled: bool) {
        self.monitoring.store(enabled, Ordering::SeqCst);
        if let Some(current) = self.active.lock().await.as_ref() {
            self.route_monitor(current);
        }
    }

    async fn acquire(&self, target: EffectiveAudioSource) -> Result<ActiveAudio> {
        let url = match target {
            EffectiveAudioSource::RemoteFeed(index) => Some(self.feeds.url(index).ok_or_else(|| {
                Error::Source(format!("feed {} has no URL configured", index))
            })?),
            EffectiveAudioSource::Local => None,
        };

        let source = self.factory.create(target, url.as_deref()).await?;

        let monitor = match (&url, &self.monitor_factory) {
            (Some(url), Some(factory)) => match factory.open(url).await {
                Ok(player) => Some(player),
                Err(e) => {
                    // Monitoring is best-effort; the capture itself is fine
                    tracing::warn!(audio = %target, error = %e, "Monitor player failed to open");
                    None
                }
            },
            _ => None,
        };

        Ok(ActiveAudio {
            effective: target,
            source,
            monitor,
        })
    }

    fn route_monitor(&self, active: &ActiveAudio) {
        let enabled = self.monitoring();
        match active.effective {
            EffectiveAudioSource::RemoteFeed(_) => {
                active.source.set_monitoring(false);
                if let Some(monitor) = &active.monitor {
                    monitor.set_volume(monitor_volume(enabled));
                }
            }
            EffectiveAudioSource::Local => active.source.set_monitoring(enabled),
        }
    }
}
