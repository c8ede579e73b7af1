//! Session state machine
//!
//! Owns `SessionStatus` and the transport lifecycle. `start()` and `stop()`
//! are serialized by the session-operation lock, which is independent of the
//! source-switch lock so that source swaps can run while the session is idle
//! or streaming.
//!
//! `stop()` raises the user-stop flag before it takes any lock. Every failure
//! path checks that flag first, so an in-flight open or a firing retry timer
//! never turns a manual stop into a reconnection.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::config::SessionConfig;
use super::reconnect::{ReconnectTarget, ReconnectionSupervisor};
use super::status::SessionStatus;
use crate::error::{ConnectStage, Error, Result, StartRejection};
use crate::source::FeedIndex;
use crate::state::SharedState;
use crate::switch::SourceSwitchCoordinator;
use crate::transport::{RegulatorAttachment, Transport};

/// How an accepted `start()` ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Connected and streaming
    Streaming,
    /// The attempt failed and the reconnection loop took over
    Reconnecting,
    /// The user stopped while the attempt was running
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartMode {
    /// User-initiated start
    Fresh,
    /// Timer-driven retry from the reconnection supervisor
    Reconnect,
    /// Full restart after the live feed dropped
    Restart,
}

/// Connect/stream/stop state machine
pub struct Session {
    config: SessionConfig,
    shared: Arc<SharedState>,
    transport: Arc<dyn Transport>,
    switcher: Arc<SourceSwitchCoordinator>,
    regulator: Arc<RegulatorAttachment>,
    supervisor: Arc<ReconnectionSupervisor>,
    op_lock: Mutex<()>,
    attempt: SyncMutex<CancellationToken>,
    this: Weak<Session>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        shared: Arc<SharedState>,
        transport: Arc<dyn Transport>,
        switcher: Arc<SourceSwitchCoordinator>,
        regulator: Arc<RegulatorAttachment>,
        supervisor: Arc<ReconnectionSupervisor>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            shared,
            transport,
            switcher,
            regulator,
            supervisor,
            op_lock: Mutex::new(()),
            attempt: SyncMutex::new(CancellationToken::new()),
            this: this.clone(),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status()
    }

    pub fn supervisor(&self) -> &Arc<ReconnectionSupervisor> {
        &self.supervisor
    }

    /// Start streaming
    ///
    /// Configuration problems are returned as errors and leave the status
    /// untouched. Connectivity failures are not errors: they hand the
    /// session to the reconnection supervisor.
    pub async fn start(&self) -> Result<StartOutcome> {
        if self.shared.cleanup_in_progress() {
            return Err(StartRejection::CleanupInProgress.into());
        }

        let _op = self.op_lock.lock().await;

        // A stop() may have started teardown while we waited for the lock
        if self.shared.cleanup_in_progress() {
            return Err(StartRejection::CleanupInProgress.into());
        }
        if self.shared.status().is_active() || self.shared.is_reconnecting() {
            return Err(StartRejection::AlreadyActive.into());
        }
        if self.switcher.intent().is_none() {
            return Err(StartRejection::VideoSourceNotSet.into());
        }
        if self.switcher.audio().selection().is_none() {
            return Err(StartRejection::AudioSourceNotSet.into());
        }

        if !self.shared.is_reconnecting() {
            self.shared.clear_user_stop();
        }
        let token = self.fresh_attempt();

        if self.shared.status() == SessionStatus::Error {
            self.shared.transition(SessionStatus::NotStreaming);
        }
        self.shared.transition(SessionStatus::Starting);
        tracing::info!(endpoint = %self.config.endpoint.url, "Starting session");

        match self.run_start_sequence(StartMode::Fresh, &token).await {
            Ok(()) => Ok(StartOutcome::Streaming),
            Err(e) => self.handle_start_failure(e).await,
        }
    }

    /// Stop streaming
    ///
    /// Returns once the status is `NotStreaming`; transport teardown and
    /// source release continue in the background while
    /// `cleanup_in_progress()` is set. Calling it again is a no-op.
    pub async fn stop(&self) {
        self.shared.set_user_stop();
        self.attempt.lock().cancel();

        let was_reconnecting = self.shared.is_reconnecting();
        self.supervisor.cancel();
        self.switcher.cancel_background();

        let _op = self.op_lock.lock().await;

        if self.shared.status() == SessionStatus::NotStreaming && !was_reconnecting {
            tracing::debug!("Stop requested while not streaming");
            return;
        }

        self.shared.set_cleanup_in_progress(true);
        self.shared.transition(SessionStatus::NotStreaming);
        tracing::info!("Session stopped, cleaning up");

        let shared = Arc::clone(&self.shared);
        let transport = Arc::clone(&self.transport);
        let regulator = Arc::clone(&self.regulator);
        let switcher = Arc::clone(&self.switcher);
        tokio::spawn(async move {
            transport.stop_stream().await;
            regulator.detach().await;
            transport.close().await;
            switcher.release_all().await;
            shared.set_cleanup_in_progress(false);
            tracing::debug!("Session cleanup finished");
        });
    }

    /// Stop the reconnection loop
    ///
    /// An attempt already in flight is cancelled and waited out, so it
    /// cannot leave the transport open behind a `NotStreaming` status.
    pub async fn cancel_reconnection(&self) {
        if self.shared.is_reconnecting() {
            self.fresh_attempt();
        }
        let _op = self.op_lock.lock().await;
        self.supervisor.cancel();
    }

    /// The transport raised a fatal error
    pub async fn on_transport_failure(&self, error: Error) {
        self.fail_streaming(error, false).await;
    }

    /// The transport's streaming flag fell to false
    ///
    /// Drops observed before a restart finished are stale: if the transport
    /// reports streaming again by the time the session lock is held, nothing
    /// happens.
    pub async fn on_stream_dropped(&self) {
        self.fail_streaming(Error::TransportFatal("stream dropped".into()), true)
            .await;
    }

    async fn fail_streaming(&self, error: Error, ignore_if_streaming: bool) {
        if self.shared.user_stop_requested() {
            tracing::debug!(error = %error, "Transport failure after stop, ignoring");
            return;
        }

        let _op = self.op_lock.lock().await;
        if self.shared.user_stop_requested() {
            return;
        }
        if self.shared.status() != SessionStatus::Streaming {
            tracing::debug!(status = %self.shared.status(), error = %error, "Transport failure outside streaming, ignoring");
            return;
        }
        if ignore_if_streaming && *self.transport.is_streaming().borrow() {
            tracing::debug!("Stale stream drop, ignoring");
            return;
        }

        tracing::warn!(error = %error, "Transport failed while streaming");
        self.abort_transport().await;

        if !self.begin_reconnection(error.reason()) && !self.shared.user_stop_requested() {
            self.shared.transition(SessionStatus::Connecting);
            self.shared.transition(SessionStatus::Error);
        }
    }

    /// Full restart after the live feed dropped: placeholder, then reopen
    pub async fn restart_for_feed(&self, index: FeedIndex) {
        if self.shared.user_stop_requested() {
            return;
        }

        let _op = self.op_lock.lock().await;
        if self.shared.user_stop_requested() {
            return;
        }
        if self.shared.status() != SessionStatus::Streaming {
            self.switcher.fall_back_to_placeholder(index).await;
            return;
        }

        tracing::info!(feed = %index, "Restarting stream after feed loss");
        self.shared.transition(SessionStatus::Connecting);
        self.abort_transport().await;
        self.switcher.fall_back_to_placeholder(index).await;

        let token = self.attempt.lock().clone();
        if let Err(e) = self.run_start_sequence(StartMode::Restart, &token).await {
            // Outcome is reflected in the status
            let _ = self.handle_start_failure(e).await;
        }
    }

    async fn run_start_sequence(&self, mode: StartMode, token: &CancellationToken) -> Result<()> {
        self.switcher.prepare().await?;
        if self.shared.user_stop_requested() {
            return Err(Error::Cancelled);
        }

        if mode == StartMode::Fresh {
            self.shared.transition(SessionStatus::Connecting);
        }

        let endpoint = &self.config.endpoint;
        bounded(
            token,
            ConnectStage::Open,
            self.config.open_timeout,
            self.transport.open(endpoint),
        )
        .await??;
        tracing::debug!(endpoint = %endpoint.url, kind = ?endpoint.kind, "Transport open");

        self.regulator.attach().await?;
        self.transport.start_stream().await?;

        let mut streaming = self.transport.is_streaming();
        bounded(
            token,
            ConnectStage::EncoderReady,
            self.config.encoder_ready_timeout,
            async move {
                streaming
                    .wait_for(|on| *on)
                    .await
                    .map(|_| ())
                    .map_err(|_| Error::TransportFatal("transport went away".into()))
            },
        )
        .await??;

        if self.shared.user_stop_requested() {
            return Err(Error::Cancelled);
        }

        // Reconnection may have been cancelled while we connected; callers
        // abort the transport on error
        if !self.shared.transition(SessionStatus::Streaming) {
            return Err(Error::Cancelled);
        }
        if mode == StartMode::Reconnect {
            self.shared.finish_reconnection("Reconnected");
        }
        tracing::info!(mode = ?mode, endpoint = %endpoint.url, "Streaming");
        Ok(())
    }

    async fn handle_start_failure(&self, error: Error) -> Result<StartOutcome> {
        self.abort_transport().await;

        if self.shared.user_stop_requested() {
            tracing::debug!(error = %error, "Start interrupted by stop");
            return Ok(StartOutcome::Stopped);
        }

        if !error.is_retryable() {
            tracing::error!(error = %error, "Start failed");
            self.shared.transition(SessionStatus::Error);
            return Err(error);
        }

        tracing::warn!(error = %error, "Start failed, entering reconnection");
        if self.begin_reconnection(error.reason()) {
            return Ok(StartOutcome::Reconnecting);
        }

        if self.shared.user_stop_requested() {
            return Ok(StartOutcome::Stopped);
        }
        self.shared.transition(SessionStatus::Error);
        Err(error)
    }

    fn begin_reconnection(&self, reason: &str) -> bool {
        let Some(this) = self.this.upgrade() else {
            return false;
        };
        self.supervisor.begin(this, reason)
    }

    /// Undo a partial or broken connection
    async fn abort_transport(&self) {
        self.regulator.detach().await;
        self.transport.stop_stream().await;
        self.transport.close().await;
    }

    fn fresh_attempt(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = std::mem::replace(&mut *self.attempt.lock(), token.clone());
        previous.cancel();
        token
    }
}

#[async_trait]
impl ReconnectTarget for Session {
    async fn attempt_reconnect(&self) -> Result<()> {
        if self.shared.user_stop_requested() || self.shared.cleanup_in_progress() {
            return Err(Error::Cancelled);
        }

        let _op = self.op_lock.lock().await;
        if self.shared.user_stop_requested() || !self.shared.is_reconnecting() {
            return Err(Error::Cancelled);
        }

        let token = self.attempt.lock().clone();
        let result = self.run_start_sequence(StartMode::Reconnect, &token).await;
        if result.is_err() {
            self.abort_transport().await;
        }
        result
    }
}

/// Race a connect stage against its timeout and the attempt's cancellation
async fn bounded<F, T>(
    token: &CancellationToken,
    stage: ConnectStage,
    timeout: Duration,
    fut: F,
) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        _ = token.cancelled() => Err(Error::Cancelled),
        out = tokio::time::timeout(timeout, fut) => {
            out.map_err(|_| Error::ConnectTimeout { stage, timeout })
        }
    }
}
