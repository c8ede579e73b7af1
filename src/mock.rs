//! Test doubles for the collaborator traits
//!
//! Every mock records what was done to it so tests can assert ordering and
//! single-owner properties directly.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use crate::audio::{MonitorPlayer, MonitorPlayerFactory};
use crate::error::{Error, Result};
use crate::source::{
    AudioSource, AudioSourceFactory, EffectiveAudioSource, FeedIndex, PlayerEvent, ProbeOutcome,
    RemoteFeedProbe, SourceSlot, VideoSource, VideoSourceFactory,
};
use crate::transport::{EndpointDescriptor, RegulatorConfig, RegulatorController, Transport};

/// Install a log subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Counts live objects and keeps an operation log
#[derive(Default)]
pub struct Ledger {
    alive: AtomicUsize,
    max_alive: AtomicUsize,
    created: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl Ledger {
    fn acquire(&self, what: String) {
        let alive = self.alive.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_alive.fetch_max(alive, Ordering::SeqCst);
        self.created.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(format!("create {}", what));
    }

    fn release(&self, what: String) {
        self.alive.fetch_sub(1, Ordering::SeqCst);
        self.log.lock().push(format!("release {}", what));
    }

    pub fn alive(&self) -> usize {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn max_alive(&self) -> usize {
        self.max_alive.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

// Network

/// Which feed URLs are reachable right now
#[derive(Default)]
pub struct MockNetwork {
    reachable: Mutex<HashSet<String>>,
    probes: Mutex<Vec<String>>,
    probe_delay: Mutex<Option<Duration>>,
}

impl MockNetwork {
    pub fn set_reachable(&self, url: &str, reachable: bool) {
        let mut set = self.reachable.lock();
        if reachable {
            set.insert(url.to_string());
        } else {
            set.remove(url);
        }
    }

    /// Make every probe take this long before answering
    pub fn set_probe_delay(&self, delay: Option<Duration>) {
        *self.probe_delay.lock() = delay;
    }

    pub fn is_reachable(&self, url: &str) -> bool {
        self.reachable.lock().contains(url)
    }

    pub fn probe_count(&self, url: &str) -> usize {
        self.probes.lock().iter().filter(|u| u.as_str() == url).count()
    }
}

#[async_trait]
impl RemoteFeedProbe for MockNetwork {
    async fn check(&self, url: &str, _timeout: Duration) -> ProbeOutcome {
        self.probes.lock().push(url.to_string());
        let delay = *self.probe_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.is_reachable(url) {
            ProbeOutcome::Ready
        } else {
            ProbeOutcome::Error("unreachable".into())
        }
    }
}

// Video

pub struct MockVideoSource {
    slot: SourceSlot,
    ready: bool,
    ready_delay: Option<Duration>,
    audio_muted: AtomicBool,
    events: Option<broadcast::Sender<PlayerEvent>>,
    ledger: Option<Arc<Ledger>>,
}

impl MockVideoSource {
    /// Standalone source, always ready
    pub fn new(slot: SourceSlot) -> Self {
        Self {
            slot,
            ready: true,
            ready_delay: None,
            audio_muted: AtomicBool::new(false),
            events: None,
            ledger: None,
        }
    }

    pub fn audio_muted(&self) -> bool {
        self.audio_muted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoSource for MockVideoSource {
    fn slot(&self) -> &SourceSlot {
        &self.slot
    }

    async fn wait_ready(&self) -> Result<()> {
        if let Some(delay) = self.ready_delay {
            tokio::time::sleep(delay).await;
        }
        if self.ready {
            Ok(())
        } else {
            Err(Error::Source(format!("{} not ready", self.slot)))
        }
    }

    fn player_events(&self) -> Option<broadcast::Receiver<PlayerEvent>> {
        self.events.as_ref().map(|tx| tx.subscribe())
    }

    fn set_audio_muted(&self, muted: bool) {
        self.audio_muted.store(muted, Ordering::SeqCst);
    }

    async fn release(&self) {
        if let Some(ledger) = &self.ledger {
            ledger.release(self.slot.to_string());
        }
    }
}

pub struct MockVideoFactory {
    network: Arc<MockNetwork>,
    ledger: Arc<Ledger>,
    players: Mutex<HashMap<FeedIndex, broadcast::Sender<PlayerEvent>>>,
    fail_local: AtomicBool,
    ready_delay: Mutex<Option<Duration>>,
}

impl MockVideoFactory {
    pub fn new(network: Arc<MockNetwork>) -> Self {
        Self {
            network,
            ledger: Arc::new(Ledger::default()),
            players: Mutex::new(HashMap::new()),
            fail_local: AtomicBool::new(false),
            ready_delay: Mutex::new(None),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn set_fail_local(&self, fail: bool) {
        self.fail_local.store(fail, Ordering::SeqCst);
    }

    /// Sources created from now on take this long to become ready
    pub fn set_ready_delay(&self, delay: Option<Duration>) {
        *self.ready_delay.lock() = delay;
    }

    /// Push a player event to the most recent source for `index`
    pub fn emit(&self, index: FeedIndex, event: PlayerEvent) {
        if let Some(tx) = self.players.lock().get(&index) {
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl VideoSourceFactory for MockVideoFactory {
    async fn create(&self, slot: &SourceSlot) -> Result<Box<dyn VideoSource>> {
        let (ready, events) = match slot {
            SourceSlot::Local(device) => {
                if self.fail_local.load(Ordering::SeqCst) {
                    return Err(Error::Source(format!("camera {} busy", device)));
                }
                (true, None)
            }
            SourceSlot::RemoteFeed { index, url } => {
                let (tx, _) = broadcast::channel(16);
                self.players.lock().insert(*index, tx.clone());
                (self.network.is_reachable(url), Some(tx))
            }
            SourceSlot::Placeholder => (true, None),
        };

        self.ledger.acquire(slot.to_string());
        Ok(Box::new(MockVideoSource {
            slot: slot.clone(),
            ready,
            ready_delay: *self.ready_delay.lock(),
            audio_muted: AtomicBool::new(false),
            events,
            ledger: Some(Arc::clone(&self.ledger)),
        }))
    }
}

// Audio

struct MockAudioSource {
    source: EffectiveAudioSource,
    ledger: Arc<Ledger>,
    monitoring: Arc<AtomicBool>,
}

#[async_trait]
impl AudioSource for MockAudioSource {
    fn source(&self) -> EffectiveAudioSource {
        self.source
    }

    fn set_monitoring(&self, enabled: bool) {
        self.monitoring.store(enabled, Ordering::SeqCst);
    }

    async fn release(&self) {
        self.ledger.release(self.source.to_string());
    }
}

#[derive(Default)]
pub struct MockAudioFactory {
    ledger: Arc<Ledger>,
    monitoring: Arc<AtomicBool>,
}

impl MockAudioFactory {
    pub fn alive(&self) -> usize {
        self.ledger.alive()
    }

    pub fn max_alive(&self) -> usize {
        self.ledger.max_alive()
    }

    pub fn created(&self) -> usize {
        self.ledger.created()
    }

    pub fn log(&self) -> Vec<String> {
        self.ledger.log()
    }

    pub fn mic_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioSourceFactory for MockAudioFactory {
    async fn create(
        &self,
        source: EffectiveAudioSource,
        _url: Option<&str>,
    ) -> Result<Box<dyn AudioSource>> {
        self.ledger.acquire(source.to_string());
        Ok(Box::new(MockAudioSource {
            source,
            ledger: Arc::clone(&self.ledger),
            monitoring: Arc::clone(&self.monitoring),
        }))
    }
}

// Monitor playback

struct MockMonitorPlayer {
    url: String,
    ledger: Arc<Ledger>,
    volume: Arc<Mutex<Option<f32>>>,
}

#[async_trait]
impl MonitorPlayer for MockMonitorPlayer {
    fn set_volume(&self, volume: f32) {
        *self.volume.lock() = Some(volume);
    }

    async fn release(&self) {
        self.ledger.release(self.url.clone());
    }
}

#[derive(Default)]
pub struct MockMonitorFactory {
    ledger: Arc<Ledger>,
    opened: Mutex<Vec<String>>,
    volume: Arc<Mutex<Option<f32>>>,
}

impl MockMonitorFactory {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    pub fn alive(&self) -> usize {
        self.ledger.alive()
    }

    pub fn last_volume(&self) -> Option<f32> {
        *self.volume.lock()
    }
}

#[async_trait]
impl MonitorPlayerFactory for MockMonitorFactory {
    async fn open(&self, url: &str) -> Result<Box<dyn MonitorPlayer>> {
        self.opened.lock().push(url.to_string());
        self.ledger.acquire(url.to_string());
        Ok(Box::new(MockMonitorPlayer {
            url: url.to_string(),
            ledger: Arc::clone(&self.ledger),
            volume: Arc::clone(&self.volume),
        }))
    }
}

// Regulator

/// Records attach (`Some(config)`) and detach (`None`) calls in order
#[derive(Default)]
pub struct MockRegulator {
    history: Mutex<Vec<Option<RegulatorConfig>>>,
}

impl MockRegulator {
    pub fn history(&self) -> Vec<Option<RegulatorConfig>> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl RegulatorController for MockRegulator {
    async fn attach(&self, config: &RegulatorConfig) -> Result<()> {
        self.history.lock().push(Some(config.clone()));
        Ok(())
    }

    async fn detach(&self) {
        self.history.lock().push(None);
    }
}

// Transport

pub struct MockTransport {
    reachable: AtomicBool,
    encoder_ok: AtomicBool,
    open_delay: Mutex<Option<Duration>>,
    opens: AtomicU32,
    closes: AtomicU32,
    streaming: watch::Sender<bool>,
    fatal: broadcast::Sender<String>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            encoder_ok: AtomicBool::new(true),
            open_delay: Mutex::new(None),
            opens: AtomicU32::new(0),
            closes: AtomicU32::new(0),
            streaming: watch::channel(false).0,
            fatal: broadcast::channel(16).0,
        }
    }
}

impl MockTransport {
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_encoder_ok(&self, ok: bool) {
        self.encoder_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_open_delay(&self, delay: Option<Duration>) {
        *self.open_delay.lock() = delay;
    }

    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn streaming(&self) -> bool {
        *self.streaming.borrow()
    }

    /// Simulate the connection dying mid-stream
    pub fn inject_fatal(&self, message: &str) {
        self.streaming.send_replace(false);
        let _ = self.fatal.send(message.to_string());
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, _endpoint: &EndpointDescriptor) -> Result<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let delay = *self.open_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ConnectFailure("endpoint unreachable".into()))
        }
    }

    async fn start_stream(&self) -> Result<()> {
        if self.encoder_ok.load(Ordering::SeqCst) {
            self.streaming.send_replace(true);
        }
        Ok(())
    }

    async fn stop_stream(&self) {
        self.streaming.send_replace(false);
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.streaming.send_replace(false);
    }

    fn is_streaming(&self) -> watch::Receiver<bool> {
        self.streaming.subscribe()
    }

    fn fatal_errors(&self) -> broadcast::Receiver<String> {
        self.fatal.subscribe()
    }
}
