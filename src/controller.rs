//! Controller facade
//!
//! Wires the session state machine, reconnection supervisor, switch
//! coordinator, audio router and health monitor together, and exposes the
//! commands and observables a presentation layer needs.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audio::{AudioRouter, MonitorPlayerFactory};
use crate::error::{Error, Result};
use crate::monitor::{HealthMonitor, MonitorConfig};
use crate::session::{
    ReconnectConfig, ReconnectionSupervisor, Session, SessionConfig, SessionStatus, StartOutcome,
};
use crate::source::{
    AudioSelection, AudioSourceFactory, EffectiveAudioSource, FeedBoard, FeedHealth, FeedIndex,
    RemoteFeedProbe, SourceSlot, VideoSourceFactory,
};
use crate::state::{Notice, ReconnectionState, SharedState};
use crate::switch::{SourceSwitchCoordinator, SwitchConfig, SwitchEvent};
use crate::transport::{
    EndpointDescriptor, RegulatorAttachment, RegulatorConfig, RegulatorController, Transport,
};

/// External capabilities the controller drives
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub video_factory: Arc<dyn VideoSourceFactory>,
    pub audio_factory: Arc<dyn AudioSourceFactory>,
    pub probe: Arc<dyn RemoteFeedProbe>,
    pub regulator: Option<Arc<dyn RegulatorController>>,
    pub monitor_player: Option<Arc<dyn MonitorPlayerFactory>>,
}

impl Collaborators {
    pub fn new(
        transport: Arc<dyn Transport>,
        video_factory: Arc<dyn VideoSourceFactory>,
        audio_factory: Arc<dyn AudioSourceFactory>,
        probe: Arc<dyn RemoteFeedProbe>,
    ) -> Self {
        Self {
            transport,
            video_factory,
            audio_factory,
            probe,
            regulator: None,
            monitor_player: None,
        }
    }

    /// Bitrate regulator, attached only for transports that need it
    pub fn with_regulator(mut self, regulator: Arc<dyn RegulatorController>) -> Self {
        self.regulator = Some(regulator);
        self
    }

    /// Secondary playback used to monitor remote-feed audio
    pub fn with_monitor_player(mut self, factory: Arc<dyn MonitorPlayerFactory>) -> Self {
        self.monitor_player = Some(factory);
        self
    }
}

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub session: SessionConfig,
    pub reconnect: ReconnectConfig,
    pub monitor: MonitorConfig,
    pub switch: SwitchConfig,
    pub regulator: RegulatorConfig,

    /// Number of remote feed slots
    pub max_feeds: u8,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            reconnect: ReconnectConfig::default(),
            monitor: MonitorConfig::default(),
            switch: SwitchConfig::default(),
            regulator: RegulatorConfig::default(),
            max_feeds: 4,
        }
    }
}

impl ControllerConfig {
    /// Create a config for an ingest endpoint
    pub fn new(endpoint: EndpointDescriptor) -> Self {
        Self {
            session: SessionConfig::new(endpoint),
            ..Default::default()
        }
    }

    pub fn session(mut self, config: SessionConfig) -> Self {
        self.session = config;
        self
    }

    pub fn reconnect(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = config;
        self
    }

    pub fn monitor(mut self, config: MonitorConfig) -> Self {
        self.monitor = config;
        self
    }

    pub fn switch(mut self, config: SwitchConfig) -> Self {
        self.switch = config;
        self
    }

    pub fn regulator(mut self, config: RegulatorConfig) -> Self {
        self.regulator = config;
        self
    }

    /// Set the number of remote feed slots
    pub fn max_feeds(mut self, max: u8) -> Self {
        self.max_feeds = max;
        self
    }
}

/// Session and source-failover controller
///
/// Must be created inside a tokio runtime: construction starts the health
/// monitor and the internal event pumps.
pub struct Controller {
    shared: Arc<SharedState>,
    feeds: Arc<FeedBoard>,
    switcher: Arc<SourceSwitchCoordinator>,
    session: Arc<Session>,
    events_tx: broadcast::Sender<SwitchEvent>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    pub fn new(config: ControllerConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            transport,
            video_factory,
            audio_factory,
            probe,
            regulator,
            monitor_player,
        } = collaborators;

        let shared = SharedState::new(config.switch.restart_on_disconnect);
        let feeds = Arc::new(FeedBoard::new(config.max_feeds));
        let regulator = Arc::new(RegulatorAttachment::new(
            regulator,
            config.regulator.clone(),
            config.session.transport_kind().requires_regulation(),
        ));
        let audio = Arc::new(AudioRouter::new(audio_factory, monitor_player, feeds.clone()));
        let (switcher, switch_rx) = SourceSwitchCoordinator::new(
            config.switch.clone(),
            shared.clone(),
            feeds.clone(),
            audio,
            regulator.clone(),
            video_factory,
            probe.clone(),
        );
        let supervisor = ReconnectionSupervisor::new(shared.clone(), config.reconnect.clone());
        let session = Session::new(
            config.session.clone(),
            shared.clone(),
            transport.clone(),
            switcher.clone(),
            regulator,
            supervisor,
        );
        let monitor = Arc::new(HealthMonitor::new(
            config.monitor.clone(),
            feeds.clone(),
            probe,
            switcher.clone(),
            shared.clone(),
        ));

        let (events_tx, _) = broadcast::channel(64);
        let shutdown = CancellationToken::new();

        let tasks = vec![
            monitor.spawn(shutdown.child_token()),
            spawn_switch_pump(
                switch_rx,
                session.clone(),
                events_tx.clone(),
                shutdown.child_token(),
            ),
            spawn_fatal_pump(transport.fatal_errors(), session.clone(), shutdown.child_token()),
            spawn_drop_pump(
                transport.is_streaming(),
                session.clone(),
                shared.clone(),
                shutdown.child_token(),
            ),
        ];

        tracing::info!(
            endpoint = %config.session.endpoint.url,
            kind = ?config.session.transport_kind(),
            max_feeds = config.max_feeds,
            "Controller created"
        );

        Self {
            shared,
            feeds,
            switcher,
            session,
            events_tx,
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    // Commands

    /// Start streaming with the selected sources
    pub async fn start(&self) -> Result<StartOutcome> {
        self.session.start().await
    }

    /// Stop streaming; teardown continues in the background
    pub async fn stop(&self) {
        self.session.stop().await
    }

    /// Select the video source
    ///
    /// A remote feed slot whose index has no URL yet configures it.
    pub async fn select_video_source(&self, slot: SourceSlot) -> Result<()> {
        if let SourceSlot::RemoteFeed { index, url } = &slot {
            if self.feeds.url(*index).is_none() && !url.trim().is_empty() {
                self.feeds.configure(*index, url.clone());
            }
        }
        self.switcher.switch_video_source(slot).await
    }

    /// Select a configured remote feed as the video source
    pub async fn select_feed(&self, raw: u8) -> Result<()> {
        let index = self.feeds.index(raw)?;
        let url = self.feeds.url(index).ok_or_else(|| Error::FeedProbe {
            index,
            reason: "no URL configured".into(),
        })?;
        self.switcher
            .switch_video_source(SourceSlot::RemoteFeed { index, url })
            .await
    }

    /// Select the audio source; never changes the video source
    pub async fn select_audio_source(&self, selection: AudioSelection) -> Result<()> {
        self.switcher.select_audio_source(selection).await
    }

    /// Restart the whole stream (instead of hot-swapping) when the live feed drops
    pub fn set_restart_on_disconnect(&self, enabled: bool) {
        self.shared.set_restart_on_disconnect(enabled);
        tracing::info!(enabled, "Restart-on-disconnect policy changed");
    }

    /// Toggle local monitoring of the active audio source
    pub async fn set_audio_monitoring(&self, enabled: bool) {
        self.switcher.audio().set_monitoring(enabled).await;
    }

    /// Set or clear (blank URL) the URL of a remote feed slot
    pub fn configure_feed(&self, raw: u8, url: impl Into<String>) -> Result<()> {
        let index = self.feeds.index(raw)?;
        self.feeds.configure(index, url);
        Ok(())
    }

    /// Resolve once the teardown started by `stop()` has finished
    pub async fn wait_for_cleanup(&self) {
        self.shared.wait_for_cleanup().await
    }

    /// Stop streaming and end every background task
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.session.stop().await;
        self.shared.wait_for_cleanup().await;

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        tracing::info!("Controller shut down");
    }

    // Observables

    pub fn status(&self) -> SessionStatus {
        self.shared.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.subscribe_status()
    }

    pub fn reconnection(&self) -> ReconnectionState {
        self.shared.reconnection()
    }

    pub fn subscribe_reconnection(&self) -> watch::Receiver<ReconnectionState> {
        self.shared.subscribe_reconnection()
    }

    pub fn feed_health(&self) -> BTreeMap<FeedIndex, FeedHealth> {
        self.feeds.snapshot()
    }

    pub fn subscribe_feed_health(&self) -> watch::Receiver<BTreeMap<FeedIndex, FeedHealth>> {
        self.feeds.subscribe()
    }

    pub fn effective_audio(&self) -> Option<EffectiveAudioSource> {
        self.switcher.audio().effective()
    }

    pub fn subscribe_effective_audio(&self) -> watch::Receiver<Option<EffectiveAudioSource>> {
        self.switcher.audio().subscribe_effective()
    }

    /// Active video source; the placeholder while a feed retries
    pub fn active_video(&self) -> Option<SourceSlot> {
        self.switcher.active_video()
    }

    pub fn subscribe_active_video(&self) -> watch::Receiver<Option<SourceSlot>> {
        self.switcher.subscribe_active_video()
    }

    /// Video source the user asked for
    pub fn video_intent(&self) -> Option<SourceSlot> {
        self.switcher.intent()
    }

    pub fn subscribe_notices(&self) -> watch::Receiver<Option<Notice>> {
        self.shared.subscribe_notices()
    }

    /// Feed connections, restarts and fallbacks
    pub fn subscribe_events(&self) -> broadcast::Receiver<SwitchEvent> {
        self.events_tx.subscribe()
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn spawn_switch_pump(
    mut events: mpsc::UnboundedReceiver<SwitchEvent>,
    session: Arc<Session>,
    events_tx: broadcast::Sender<SwitchEvent>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match &event {
                SwitchEvent::RestartRequested(index) => {
                    let session = session.clone();
                    let index = *index;
                    tokio::spawn(async move { session.restart_for_feed(index).await });
                }
                SwitchEvent::FellBackToLocal => {
                    let session = session.clone();
                    tokio::spawn(async move { session.cancel_reconnection().await });
                }
                SwitchEvent::FeedConnected(_) => {}
            }

            // No subscribers is fine
            let _ = events_tx.send(event);
        }
    })
}

fn spawn_fatal_pump(
    mut errors: broadcast::Receiver<String>,
    session: Arc<Session>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                _ = token.cancelled() => break,
                received = errors.recv() => match received {
                    Ok(message) => message,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Missed transport errors");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            session.on_transport_failure(Error::TransportFatal(message)).await;
        }
    })
}

fn spawn_drop_pump(
    mut streaming: watch::Receiver<bool>,
    session: Arc<Session>,
    shared: Arc<SharedState>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut was_streaming = *streaming.borrow_and_update();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                changed = streaming.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let now = *streaming.borrow_and_update();
            if was_streaming && !now && shared.status() == SessionStatus::Streaming {
                session.on_stream_dropped().await;
            }
            was_streaming = now;
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mock::{
        init_tracing, MockAudioFactory, MockNetwork, MockRegulator, MockTransport,
        MockVideoFactory,
    };
    use crate::source::PlayerEvent;
    use crate::transport::TransportKind;

    struct Fixture {
        controller: Arc<Controller>,
        transport: Arc<MockTransport>,
        network: Arc<MockNetwork>,
        video: Arc<MockVideoFactory>,
        audio: Arc<MockAudioFactory>,
        regulator: Arc<MockRegulator>,
    }

    fn fixture(kind: TransportKind) -> Fixture {
        init_tracing();
        let transport = Arc::new(MockTransport::default());
        let network = Arc::new(MockNetwork::default());
        let video = Arc::new(MockVideoFactory::new(network.clone()));
        let audio = Arc::new(MockAudioFactory::default());
        let regulator = Arc::new(MockRegulator::default());

        let config = ControllerConfig::new(EndpointDescriptor::new("srt://ingest:9000", kind))
            .switch(SwitchConfig::default().local_device("cam0"));
        let collaborators = Collaborators::new(
            transport.clone(),
            video.clone(),
            audio.clone(),
            network.clone(),
        )
        .with_regulator(regulator.clone());

        Fixture {
            controller: Arc::new(Controller::new(config, collaborators)),
            transport,
            network,
            video,
            audio,
            regulator,
        }
    }

    fn url(raw: u8) -> String {
        format!("rtmp://relay/{}", raw)
    }

    fn feed(raw: u8) -> FeedIndex {
        FeedIndex::new(raw, 4).unwrap()
    }

    async fn stream_from_local(fx: &Fixture) {
        fx.controller
            .select_video_source(SourceSlot::Local("cam0".into()))
            .await
            .unwrap();
        fx.controller
            .select_audio_source(AudioSelection::Auto)
            .await
            .unwrap();
        assert_eq!(fx.controller.start().await.unwrap(), StartOutcome::Streaming);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_idempotent() {
        let fx = fixture(TransportKind::Rtmp);
        stream_from_local(&fx).await;
        assert_eq!(fx.controller.status(), SessionStatus::Streaming);

        fx.controller.stop().await;
        fx.controller.wait_for_cleanup().await;
        assert_eq!(fx.controller.status(), SessionStatus::NotStreaming);
        assert_eq!(fx.transport.closes(), 1);
        assert_eq!(fx.video.ledger().alive(), 0);
        assert_eq!(fx.audio.alive(), 0);

        fx.controller.stop().await;
        fx.controller.wait_for_cleanup().await;
        assert_eq!(fx.transport.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let fx = fixture(TransportKind::Rtmp);
        stream_from_local(&fx).await;
        fx.controller.stop().await;
        fx.controller.wait_for_cleanup().await;

        assert_eq!(fx.controller.start().await.unwrap(), StartOutcome::Streaming);
        assert_eq!(fx.transport.opens(), 2);
        // Released sources are reacquired from the stored intent
        assert_eq!(fx.video.ledger().alive(), 1);
        assert_eq!(fx.audio.alive(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_single_reconnect_loop() {
        let fx = fixture(TransportKind::Rtmp);
        stream_from_local(&fx).await;

        fx.transport.set_reachable(false);
        fx.transport.inject_fatal("broken pipe");
        tokio::time::sleep(Duration::from_millis(100)).await;
        fx.transport.inject_fatal("broken pipe");
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(fx.controller.status(), SessionStatus::Connecting);
        let state = fx.controller.reconnection();
        assert!(state.active);
        assert_eq!(state.reason, "transport_error");

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fx.transport.opens(), 2);
        assert_eq!(fx.controller.reconnection().attempt, 1);

        fx.transport.set_reachable(true);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fx.controller.status(), SessionStatus::Streaming);
        assert!(!fx.controller.reconnection().active);
        assert_eq!(fx.transport.opens(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_drop_triggers_reconnect() {
        let fx = fixture(TransportKind::Rtmp);
        stream_from_local(&fx).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        fx.transport.stop_stream().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(fx.controller.status(), SessionStatus::Connecting);
        assert!(fx.controller.reconnection().active);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fx.controller.status(), SessionStatus::Streaming);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_retry_timer_pending() {
        let fx = fixture(TransportKind::Rtmp);
        stream_from_local(&fx).await;

        fx.transport.set_reachable(false);
        fx.transport.inject_fatal("reset");
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(fx.controller.reconnection().active);

        fx.controller.stop().await;
        fx.transport.set_reachable(true);
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(fx.controller.status(), SessionStatus::NotStreaming);
        assert!(!fx.controller.reconnection().active);
        assert_eq!(fx.transport.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_feed_recovers_while_streaming() {
        let fx = fixture(TransportKind::Rtmp);
        fx.controller.configure_feed(1, url(1)).unwrap();
        fx.controller.configure_feed(2, url(2)).unwrap();
        fx.network.set_reachable(&url(2), true);
        let mut events = fx.controller.subscribe_events();

        fx.controller
            .select_audio_source(AudioSelection::Auto)
            .await
            .unwrap();
        fx.controller.select_feed(1).await.unwrap();
        assert_eq!(fx.controller.active_video(), Some(SourceSlot::Placeholder));

        assert_eq!(fx.controller.start().await.unwrap(), StartOutcome::Streaming);
        assert_eq!(
            fx.controller.effective_audio(),
            Some(EffectiveAudioSource::Local)
        );

        fx.network.set_reachable(&url(1), true);
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(events.try_recv().unwrap(), SwitchEvent::FeedConnected(feed(1)));
        assert_eq!(
            fx.controller.active_video(),
            Some(SourceSlot::RemoteFeed {
                index: feed(1),
                url: url(1)
            })
        );
        assert_eq!(
            fx.controller.effective_audio(),
            Some(EffectiveAudioSource::RemoteFeed(feed(1)))
        );
        assert_eq!(fx.controller.status(), SessionStatus::Streaming);
        assert_eq!(fx.transport.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_feeds_failed_falls_back_to_local() {
        let fx = fixture(TransportKind::Rtmp);
        for raw in 1..=4 {
            fx.controller.configure_feed(raw, url(raw)).unwrap();
        }
        let mut events = fx.controller.subscribe_events();
        fx.controller
            .select_audio_source(AudioSelection::Auto)
            .await
            .unwrap();
        fx.controller.select_feed(1).await.unwrap();
        fx.controller.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(15)).await;

        assert!(fx
            .controller
            .feed_health()
            .values()
            .all(|health| *health == FeedHealth::Error));
        assert_eq!(events.try_recv().unwrap(), SwitchEvent::FellBackToLocal);
        assert_eq!(
            fx.controller.video_intent(),
            Some(SourceSlot::Local("cam0".into()))
        );
        assert_eq!(
            fx.controller.active_video(),
            Some(SourceSlot::Local("cam0".into()))
        );
        assert_eq!(
            fx.controller.effective_audio(),
            Some(EffectiveAudioSource::Local)
        );
        assert_eq!(fx.controller.status(), SessionStatus::Streaming);
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_switches_release_before_acquire() {
        let fx = fixture(TransportKind::Rtmp);
        fx.controller.configure_feed(2, url(2)).unwrap();
        fx.controller.configure_feed(3, url(3)).unwrap();
        fx.controller
            .select_video_source(SourceSlot::Local("cam0".into()))
            .await
            .unwrap();

        for selection in [
            AudioSelection::Local,
            AudioSelection::RemoteFeed(feed(2)),
            AudioSelection::RemoteFeed(feed(3)),
        ] {
            fx.controller.select_audio_source(selection).await.unwrap();
        }

        assert_eq!(fx.audio.max_alive(), 1);
        assert_eq!(
            fx.audio.log(),
            vec![
                "create local".to_string(),
                "release local".to_string(),
                "create feed:2".to_string(),
                "release feed:2".to_string(),
                "create feed:3".to_string(),
            ]
        );
        assert_eq!(
            fx.controller.active_video(),
            Some(SourceSlot::Local("cam0".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_on_disconnect_reopens_transport() {
        let fx = fixture(TransportKind::Rtmp);
        fx.controller.configure_feed(1, url(1)).unwrap();
        fx.controller.configure_feed(2, url(2)).unwrap();
        fx.network.set_reachable(&url(1), true);
        fx.network.set_reachable(&url(2), true);
        fx.controller.set_restart_on_disconnect(true);
        let mut events = fx.controller.subscribe_events();

        fx.controller
            .select_audio_source(AudioSelection::Auto)
            .await
            .unwrap();
        fx.controller.select_feed(1).await.unwrap();
        fx.controller.start().await.unwrap();

        fx.video.emit(feed(1), PlayerEvent::Error("relay restarted".into()));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(fx.controller.status(), SessionStatus::Streaming);
        assert_eq!(fx.transport.opens(), 2);
        assert_eq!(fx.transport.closes(), 1);
        assert_eq!(fx.controller.active_video(), Some(SourceSlot::Placeholder));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(
            fx.controller.active_video(),
            Some(SourceSlot::RemoteFeed {
                index: feed(1),
                url: url(1)
            })
        );

        assert_eq!(events.try_recv().unwrap(), SwitchEvent::FeedConnected(feed(1)));
        assert_eq!(events.try_recv().unwrap(), SwitchEvent::RestartRequested(feed(1)));
        assert_eq!(events.try_recv().unwrap(), SwitchEvent::FeedConnected(feed(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_regulated_transport_reattaches_after_swap() {
        let fx = fixture(TransportKind::Srt);
        stream_from_local(&fx).await;
        assert_eq!(fx.regulator.history().len(), 1);

        fx.controller
            .select_video_source(SourceSlot::Local("cam1".into()))
            .await
            .unwrap();

        let config = RegulatorConfig::default();
        assert_eq!(
            fx.regulator.history(),
            vec![Some(config.clone()), None, Some(config)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_attach_waits_for_swap() {
        let fx = fixture(TransportKind::Srt);
        stream_from_local(&fx).await;
        fx.transport.set_open_delay(Some(Duration::from_secs(2)));
        fx.video.set_ready_delay(Some(Duration::from_secs(2)));

        fx.transport.inject_fatal("broken pipe");
        // Retry fires at 5s and sits in open() until 7s
        tokio::time::sleep(Duration::from_secs(6)).await;
        let controller = fx.controller.clone();
        let swap = tokio::spawn(async move {
            controller
                .select_video_source(SourceSlot::Local("cam1".into()))
                .await
        });

        // open() finished at 7s but the swap runs until 8s
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        let config = RegulatorConfig::default();
        assert_eq!(fx.regulator.history(), vec![Some(config.clone()), None]);
        assert_eq!(fx.controller.status(), SessionStatus::Connecting);

        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio_test::assert_ok!(swap.await.unwrap());
        assert_eq!(fx.controller.status(), SessionStatus::Streaming);
        assert_eq!(
            fx.regulator.history(),
            vec![Some(config.clone()), None, Some(config)]
        );
        assert_eq!(
            fx.controller.active_video(),
            Some(SourceSlot::Local("cam1".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rtmp_never_attaches_regulator() {
        let fx = fixture(TransportKind::Rtmp);
        stream_from_local(&fx).await;
        assert!(fx.regulator.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_configure_feed_rejects_bad_index() {
        let fx = fixture(TransportKind::Rtmp);

        assert!(matches!(
            fx.controller.configure_feed(0, url(0)),
            Err(Error::InvalidFeedIndex(0))
        ));
        assert!(matches!(
            fx.controller.configure_feed(5, url(5)),
            Err(Error::InvalidFeedIndex(5))
        ));
        assert!(matches!(
            fx.controller.select_feed(3).await,
            Err(Error::FeedProbe { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ends_background_work() {
        let fx = fixture(TransportKind::Rtmp);
        fx.controller.configure_feed(2, url(2)).unwrap();
        stream_from_local(&fx).await;

        fx.controller.shutdown().await;
        let probes = fx.network.probe_count(&url(2));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fx.controller.status(), SessionStatus::NotStreaming);
        assert_eq!(fx.network.probe_count(&url(2)), probes);
        assert_eq!(fx.transport.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_skips_to_streaming() {
        let fx = fixture(TransportKind::Rtmp);
        let mut status = fx.controller.subscribe_status();
        fx.transport.set_open_delay(Some(Duration::from_millis(10)));

        let observer = tokio::spawn(async move {
            let mut previous = *status.borrow_and_update();
            let mut skipped = false;
            let mut streams = 0;
            while streams < 3 && status.changed().await.is_ok() {
                let next = *status.borrow_and_update();
                if previous == SessionStatus::NotStreaming && next == SessionStatus::Streaming {
                    skipped = true;
                }
                if next == SessionStatus::Streaming {
                    streams += 1;
                }
                previous = next;
            }
            skipped
        });

        fx.controller
            .select_video_source(SourceSlot::Local("cam0".into()))
            .await
            .unwrap();
        fx.controller
            .select_audio_source(AudioSelection::Auto)
            .await
            .unwrap();
        for _ in 0..3 {
            fx.controller.start().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            fx.controller.stop().await;
            fx.controller.wait_for_cleanup().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert!(!observer.await.unwrap());
    }
}
