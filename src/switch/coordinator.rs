//! Source switch coordinator
//!
//! Performs hot swaps of the active video source (and re-resolves audio after
//! each swap). Swaps are serialized by a dedicated switch lock, separate from
//! the session lock, because switching while streaming is normal.
//!
//! Every swap releases the previous source before acquiring the next, with the
//! bitrate regulator detached around it. A remote feed that cannot be reached
//! is replaced by the placeholder while a fixed-backoff retry loop keeps
//! trying the same feed until it connects or the loop is cancelled.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

use super::config::SwitchConfig;
use crate::audio::AudioRouter;
use crate::error::{ConnectStage, Error, Result, StartRejection};
use crate::source::capability::probe_bounded;
use crate::source::{
    AudioSelection, FeedBoard, FeedHealth, FeedIndex, HealthWriter, Medium, PlayerEvent,
    ProbeOutcome, RemoteFeedProbe, SourceSlot, VideoSource, VideoSourceFactory,
};
use crate::state::{NoticeKind, SharedState};
use crate::transport::RegulatorAttachment;

/// Events from the switch coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchEvent {
    /// A remote feed became the active video source
    FeedConnected(FeedIndex),

    /// The live feed dropped while streaming and the restart policy is on
    RestartRequested(FeedIndex),

    /// Every configured feed failed; video and audio moved to the local device
    FellBackToLocal,
}

/// What to do with audio after a video swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum AudioPolicy {
    /// Re-resolve against the new video source
    Resolve,
    /// Leave the current audio source alone (only resolve if none is active)
    Keep,
}

/// Handle to a cancellable background task
pub(super) struct BackgroundTask {
    pub(super) id: u64,
    pub(super) index: FeedIndex,
    pub(super) token: CancellationToken,
}

/// Serializes video/audio source transitions
pub struct SourceSwitchCoordinator {
    pub(super) config: SwitchConfig,
    pub(super) shared: Arc<SharedState>,
    pub(super) feeds: Arc<FeedBoard>,
    video_factory: Arc<dyn VideoSourceFactory>,
    probe: Arc<dyn RemoteFeedProbe>,
    audio: Arc<AudioRouter>,
    regulator: Arc<RegulatorAttachment>,
    events: mpsc::UnboundedSender<SwitchEvent>,

    pub(super) switch_lock: Mutex<()>,
    switch_token: SyncMutex<CancellationToken>,
    video: Mutex<Option<Box<dyn VideoSource>>>,
    active_tx: watch::Sender<Option<SourceSlot>>,
    intent_tx: watch::Sender<Option<SourceSlot>>,
    local_device: SyncMutex<Option<String>>,

    retry: SyncMutex<Option<BackgroundTask>>,
    pub(super) listener: SyncMutex<Option<BackgroundTask>>,
    pub(super) handling_disconnect: AtomicBool,
    task_ids: AtomicU64,
}

impl SourceSwitchCoordinator {
    /// Create a coordinator
    ///
    /// Returns the coordinator and a receiver for its events.
    pub fn new(
        config: SwitchConfig,
        shared: Arc<SharedState>,
        feeds: Arc<FeedBoard>,
        audio: Arc<AudioRouter>,
        regulator: Arc<RegulatorAttachment>,
        video_factory: Arc<dyn VideoSourceFactory>,
        probe: Arc<dyn RemoteFeedProbe>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SwitchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let local_device = config.local_device.clone();

        let coordinator = Arc::new(Self {
            config,
            shared,
            feeds,
            video_factory,
            probe,
            audio,
            regulator,
            events: tx,
            switch_lock: Mutex::new(()),
            switch_token: SyncMutex::new(CancellationToken::new()),
            video: Mutex::new(None),
            active_tx: watch::channel(None).0,
            intent_tx: watch::channel(None).0,
            local_device: SyncMutex::new(local_device),
            retry: SyncMutex::new(None),
            listener: SyncMutex::new(None),
            handling_disconnect: AtomicBool::new(false),
            task_ids: AtomicU64::new(0),
        });

        (coordinator, rx)
    }

    pub fn config(&self) -> &SwitchConfig {
        &self.config
    }

    pub fn audio(&self) -> &Arc<AudioRouter> {
        &self.audio
    }

    /// Video source the user asked for
    pub fn intent(&self) -> Option<SourceSlot> {
        self.intent_tx.borrow().clone()
    }

    /// Video source actually active (may be the placeholder while retrying)
    pub fn active_video(&self) -> Option<SourceSlot> {
        self.active_tx.borrow().clone()
    }

    pub fn subscribe_active_video(&self) -> watch::Receiver<Option<SourceSlot>> {
        self.active_tx.subscribe()
    }

    /// Feed the retry loop is currently trying to reach
    pub fn retrying_feed(&self) -> Option<FeedIndex> {
        self.retry.lock().as_ref().map(|task| task.index)
    }

    /// Whether a live connection listener is attached
    pub fn has_listener(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// Device used for local capture and for the all-feeds-failed fallback
    pub fn local_device(&self) -> Option<String> {
        self.local_device.lock().clone()
    }

    /// Switch the active video source
    ///
    /// A new request cancels any retry loop and listener left over from the
    /// previous target. An unreachable remote feed is not an error: video
    /// falls back to the placeholder and a retry loop starts.
    pub async fn switch_video_source(self: &Arc<Self>, target: SourceSlot) -> Result<()> {
        if let SourceSlot::Local(device) = &target {
            *self.local_device.lock() = Some(device.clone());
        }
        self.intent_tx.send_replace(Some(target.clone()));
        tracing::info!(medium = ?Medium::Video, target = %target, "Video source requested");

        self.cancel_background();
        let _guard = self.switch_lock.lock().await;
        // A retry loop may have connected while we waited for the lock
        self.cancel_background();

        if self.intent().as_ref() != Some(&target) {
            tracing::debug!(target = %target, "Switch superseded before it started");
            return Err(Error::Cancelled);
        }

        let token = self.begin_switch();
        self.switch_locked(target, &token).await
    }

    /// Record and apply a new audio selection
    pub async fn select_audio_source(&self, selection: AudioSelection) -> Result<()> {
        self.audio.select(selection);

        let _guard = self.switch_lock.lock().await;
        let video = self.video.lock().await;
        if let Some(video) = video.as_ref() {
            self.audio.apply(video.as_ref()).await?;
        }
        Ok(())
    }

    /// Make sure video and audio sources are acquired before a start
    ///
    /// Sources that are already held are kept as they are. Reconnection
    /// depends on this: some sources hold capability tokens that cannot be
    /// acquired a second time once released.
    pub async fn prepare(self: &Arc<Self>) -> Result<()> {
        let intent = self
            .intent()
            .ok_or(Error::Configuration(StartRejection::VideoSourceNotSet))?;
        if self.audio.selection().is_none() {
            return Err(Error::Configuration(StartRejection::AudioSourceNotSet));
        }

        let has_video = self.video.lock().await.is_some();
        if !has_video {
            return self.switch_video_source(intent).await;
        }

        if !self.audio.has_active().await {
            let _guard = self.switch_lock.lock().await;
            let video = self.video.lock().await;
            if let Some(video) = video.as_ref() {
                self.audio.apply(video.as_ref()).await?;
            }
        }
        Ok(())
    }

    /// Replace a dropped feed with the placeholder and retry it
    ///
    /// Used by the session's full-restart path. Does nothing if the user has
    /// switched away from `index` in the meantime.
    pub async fn fall_back_to_placeholder(self: &Arc<Self>, index: FeedIndex) {
        let _guard = self.switch_lock.lock().await;
        if let Some(task) = self.listener.lock().take() {
            task.token.cancel();
        }
        self.placeholder_and_retry_locked(index).await;
    }

    /// Move video and audio to the local device after every feed failed
    ///
    /// Clears the user's remote-feed intent. Returns false if no local
    /// device is known or the user no longer intends a remote feed.
    pub async fn fall_back_to_local(self: &Arc<Self>) -> bool {
        let Some(device) = self.local_device() else {
            tracing::warn!("All feeds failed but no local device is configured");
            return false;
        };
        if !self.intent().is_some_and(|slot| slot.is_remote()) {
            return false;
        }

        // A remote feed may still be connecting under the switch lock
        self.cancel_switch();
        let _guard = self.switch_lock.lock().await;
        if !self.intent().is_some_and(|slot| slot.is_remote()) {
            return false;
        }
        self.cancel_background();
        let token = self.begin_switch();

        let local = SourceSlot::Local(device);
        self.intent_tx.send_replace(Some(local.clone()));
        self.feeds.set_live(None);
        if matches!(self.audio.selection(), Some(AudioSelection::RemoteFeed(_))) {
            self.audio.select(AudioSelection::Auto);
        }

        let has_video = self.video.lock().await.is_some();
        if has_video {
            if let Err(e) = self.install(local.clone(), AudioPolicy::Resolve, &token).await {
                tracing::warn!(error = %e, "Local fallback source failed");
            }
        }

        tracing::info!(video = %local, "All feeds failed, fell back to local source");
        self.shared.post_notice(
            NoticeKind::FellBackToLocal,
            "All remote feeds failed, switched to local camera",
            self.config.notice_display,
        );
        self.emit(SwitchEvent::FellBackToLocal);
        true
    }

    /// Cancel the switch in flight, the retry loop, the live listener and
    /// its buffering timer
    pub fn cancel_background(&self) {
        self.cancel_switch();
        if let Some(task) = self.retry.lock().take() {
            task.token.cancel();
            tracing::debug!(feed = %task.index, "Feed retry loop cancelled");
        }
        if let Some(task) = self.listener.lock().take() {
            task.token.cancel();
            tracing::debug!(feed = %task.index, "Connection listener cancelled");
        }
        self.handling_disconnect.store(false, Ordering::SeqCst);
    }

    /// Release every held source; the user's intent is kept
    pub async fn release_all(&self) {
        let _guard = self.switch_lock.lock().await;
        self.cancel_background();
        self.feeds.set_live(None);

        if let Some(video) = self.video.lock().await.take() {
            tracing::debug!(medium = ?Medium::Video, video = %video.slot(), "Video source released");
            video.release().await;
        }
        self.active_tx.send_replace(None);
        self.audio.release().await;
    }

    /// Token for a switch about to run under the switch lock
    fn begin_switch(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = std::mem::replace(&mut *self.switch_token.lock(), token.clone());
        previous.cancel();
        token
    }

    fn cancel_switch(&self) {
        self.switch_token.lock().cancel();
    }

    async fn switch_locked(self: &Arc<Self>, target: SourceSlot, token: &CancellationToken) -> Result<()> {
        let SourceSlot::RemoteFeed { index, url } = target.clone() else {
            self.feeds.set_live(None);
            self.install(target, AudioPolicy::Resolve, token).await?;
            return Ok(());
        };

        self.feeds.set_live(Some(index));
        if self.feeds.health(index) == FeedHealth::Idle {
            self.feeds.set_health(index, FeedHealth::Probing, HealthWriter::Live);
        }

        let outcome = tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!(feed = %index, "Feed connect superseded");
                return Err(Error::Cancelled);
            }
            outcome = probe_bounded(self.probe.as_ref(), &url, self.config.feed_ready_timeout) => outcome,
        };

        let failure = match outcome {
            ProbeOutcome::Ready => match self.install(target.clone(), AudioPolicy::Resolve, token).await {
                Ok(events) => {
                    tracing::info!(feed = %index, "Feed connected");
                    self.on_feed_connected(index, events);
                    return Ok(());
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => e.to_string(),
            },
            ProbeOutcome::Error(reason) => reason,
        };

        tracing::warn!(feed = %index, reason = %failure, "Feed unavailable, falling back to placeholder");
        self.feeds.set_health(index, FeedHealth::Error, HealthWriter::Live);
        self.install(SourceSlot::Placeholder, AudioPolicy::Keep, token).await?;
        self.shared.post_notice(
            NoticeKind::FellBackToPlaceholder,
            format!("Feed {} unavailable, retrying", index),
            self.config.notice_display,
        );
        self.spawn_retry(index, url);
        Ok(())
    }

    /// Placeholder swap plus retry loop; caller holds the switch lock
    pub(super) async fn placeholder_and_retry_locked(self: &Arc<Self>, index: FeedIndex) {
        let url = match self.intent() {
            Some(SourceSlot::RemoteFeed { index: wanted, url }) if wanted == index => url,
            _ => {
                tracing::debug!(feed = %index, "Feed no longer selected, skipping fallback");
                return;
            }
        };

        self.feeds.set_health(index, FeedHealth::Error, HealthWriter::Live);
        let token = self.begin_switch();
        if let Err(e) = self.install(SourceSlot::Placeholder, AudioPolicy::Keep, &token).await {
            tracing::warn!(error = %e, "Placeholder source failed");
        }
        self.shared.post_notice(
            NoticeKind::FellBackToPlaceholder,
            format!("Feed {} lost, retrying", index),
            self.config.notice_display,
        );
        self.spawn_retry(index, url);
    }

    /// Swap the active video source with the regulator detached around it
    ///
    /// Returns the new source's live event stream, if it has one. Cancelling
    /// `token` abandons the new source while it is being readied.
    pub(super) async fn install(
        &self,
        slot: SourceSlot,
        audio_policy: AudioPolicy,
        token: &CancellationToken,
    ) -> Result<Option<broadcast::Receiver<PlayerEvent>>> {
        self.regulator
            .around_swap(self.swap_video(slot, audio_policy, token))
            .await
    }

    async fn swap_video(
        &self,
        slot: SourceSlot,
        audio_policy: AudioPolicy,
        token: &CancellationToken,
    ) -> Result<Option<broadcast::Receiver<PlayerEvent>>> {
        let mut video = self.video.lock().await;

        if let Some(previous) = video.take() {
            self.active_tx.send_replace(None);
            tracing::debug!(
                medium = ?Medium::Video,
                from = %previous.slot(),
                to = %slot,
                "Releasing video source"
            );
            previous.release().await;
        }

        let source = tokio::select! {
            _ = token.cancelled() => return Err(Error::Cancelled),
            source = self.video_factory.create(&slot) => source?,
        };
        let timeout = self.config.feed_ready_timeout;
        let ready = tokio::select! {
            _ = token.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(timeout, source.wait_ready()) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::ConnectTimeout {
                    stage: ConnectStage::FeedReady,
                    timeout,
                }),
            },
        };
        if let Err(e) = ready {
            source.release().await;
            return Err(e);
        }

        let keep_audio = audio_policy == AudioPolicy::Keep && self.audio.has_active().await;
        if !keep_audio && self.audio.selection().is_some() {
            if let Err(e) = self.audio.apply(source.as_ref()).await {
                source.release().await;
                return Err(e);
            }
        }

        let events = source.player_events();
        *video = Some(source);
        self.active_tx.send_replace(Some(slot.clone()));
        tracing::info!(medium = ?Medium::Video, video = %slot, "Video source active");
        Ok(events)
    }

    fn spawn_retry(self: &Arc<Self>, index: FeedIndex, url: String) {
        let token = CancellationToken::new();
        let id = self.next_task_id();
        if let Some(previous) = self.retry.lock().replace(BackgroundTask {
            id,
            index,
            token: token.clone(),
        }) {
            previous.token.cancel();
        }

        tracing::info!(
            feed = %index,
            backoff_secs = self.config.retry_backoff.as_secs(),
            "Feed retry loop started"
        );

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator.retry_loop(index, url, token).await;
            let mut retry = coordinator.retry.lock();
            if retry.as_ref().map(|task| task.id) == Some(id) {
                retry.take();
            }
        });
    }

    async fn retry_loop(self: &Arc<Self>, index: FeedIndex, url: String, token: CancellationToken) {
        let slot = SourceSlot::RemoteFeed {
            index,
            url: url.clone(),
        };
        let mut attempt: u32 = 0;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.config.retry_backoff) => {}
            }
            attempt += 1;

            let outcome = tokio::select! {
                _ = token.cancelled() => break,
                outcome = probe_bounded(self.probe.as_ref(), &url, self.config.feed_ready_timeout) => outcome,
            };
            if let ProbeOutcome::Error(reason) = outcome {
                tracing::debug!(feed = %index, attempt, reason = %reason, "Feed still unavailable");
                self.feeds.set_health(index, FeedHealth::Error, HealthWriter::Live);
                continue;
            }

            let _guard = self.switch_lock.lock().await;
            if token.is_cancelled() {
                break;
            }

            match self.install(slot.clone(), AudioPolicy::Resolve, &token).await {
                Ok(events) => {
                    tracing::info!(feed = %index, attempt, "Feed reconnected");
                    self.on_feed_connected(index, events);
                    break;
                }
                Err(e) => {
                    tracing::warn!(feed = %index, attempt, error = %e, "Feed probe passed but source failed");
                    self.feeds.set_health(index, FeedHealth::Error, HealthWriter::Live);
                    if let Err(e) = self.install(SourceSlot::Placeholder, AudioPolicy::Keep, &token).await {
                        tracing::warn!(error = %e, "Placeholder source failed");
                    }
                }
            }
        }
    }

    fn on_feed_connected(
        self: &Arc<Self>,
        index: FeedIndex,
        events: Option<broadcast::Receiver<PlayerEvent>>,
    ) {
        self.feeds.set_live(Some(index));
        self.feeds.set_health(index, FeedHealth::Ready, HealthWriter::Live);
        self.handling_disconnect.store(false, Ordering::SeqCst);

        match events {
            Some(events) => self.attach_listener(index, events),
            None => tracing::debug!(feed = %index, "Feed has no event stream, live monitoring off"),
        }
        self.emit(SwitchEvent::FeedConnected(index));
    }

    pub(super) fn next_task_id(&self) -> u64 {
        self.task_ids.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(super) fn emit(&self, event: SwitchEvent) {
        // Receiver gone means the controller is shutting down
        let _ = self.events.send(event);
    }
}
