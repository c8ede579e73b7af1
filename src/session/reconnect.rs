//! Automatic reconnection supervisor
//!
//! Turns an unexpected transport failure into a fixed-delay retry loop. The
//! loop never gives up on its own: it ends only when an attempt succeeds or
//! the loop is cancelled (manual stop, or fallback after every feed failed).
//!
//! At most one retry timer is pending at any time. Every decision point
//! re-reads the user stop flag, so a timer that fires while `stop()` is
//! running performs no state mutation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::config::ReconnectConfig;
use super::status::SessionStatus;
use crate::error::Result;
use crate::state::SharedState;

/// Something the supervisor can ask to reconnect
#[async_trait]
pub trait ReconnectTarget: Send + Sync {
    /// Re-run the start sequence with the sources already configured
    ///
    /// On success the target must have cleared the reconnection state before
    /// reporting `Streaming`.
    async fn attempt_reconnect(&self) -> Result<()>;
}

struct PendingTimer {
    generation: u64,
    token: CancellationToken,
}

/// Fixed-delay reconnection loop
pub struct ReconnectionSupervisor {
    shared: Arc<SharedState>,
    config: ReconnectConfig,
    timer: Mutex<Option<PendingTimer>>,
    message_clear: Mutex<Option<CancellationToken>>,
    generation: AtomicU64,
}

impl ReconnectionSupervisor {
    pub fn new(shared: Arc<SharedState>, config: ReconnectConfig) -> Arc<Self> {
        Arc::new(Self {
            shared,
            config,
            timer: Mutex::new(None),
            message_clear: Mutex::new(None),
            generation: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Whether a retry timer is currently pending or firing
    pub fn has_pending_timer(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Enter the retry loop
    ///
    /// Returns false without touching anything if the user stopped, a
    /// teardown is running, or a loop is already active.
    pub fn begin(self: &Arc<Self>, target: Arc<dyn ReconnectTarget>, reason: &str) -> bool {
        if self.shared.user_stop_requested() {
            tracing::debug!(reason, "Reconnection refused, user stopped");
            return false;
        }
        if self.shared.cleanup_in_progress() {
            tracing::debug!(reason, "Reconnection refused, cleanup in progress");
            return false;
        }

        let message = format!(
            "Connection lost, reconnecting in {}s",
            self.config.retry_delay.as_secs()
        );
        if !self.shared.try_activate_reconnection(reason, message) {
            tracing::debug!(reason, "Reconnection already active");
            return false;
        }

        // stop() may have set the flag between the first check and activation
        if self.shared.user_stop_requested() {
            self.shared.clear_reconnection();
            return false;
        }

        if let Some(token) = self.message_clear.lock().take() {
            token.cancel();
        }

        self.shared.transition(SessionStatus::Connecting);
        tracing::info!(
            reason,
            delay_secs = self.config.retry_delay.as_secs(),
            "Reconnection started"
        );
        self.schedule(target);
        true
    }

    /// Stop the retry loop and force the session to `NotStreaming`
    ///
    /// No-op if no loop is running.
    pub fn cancel(&self) {
        let pending = self.timer.lock().take();
        if let Some(pending) = pending {
            pending.token.cancel();
        }

        if self.shared.is_reconnecting() {
            self.shared.clear_reconnection();
            self.shared.transition(SessionStatus::NotStreaming);
            tracing::info!("Reconnection cancelled");
        }
    }

    fn schedule(self: &Arc<Self>, target: Arc<dyn ReconnectTarget>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        {
            let mut timer = self.timer.lock();
            if let Some(previous) = timer.replace(PendingTimer {
                generation,
                token: token.clone(),
            }) {
                previous.token.cancel();
            }
        }

        tracing::debug!(generation, delay = ?self.config.retry_delay, "Reconnection timer scheduled");

        let supervisor = Arc::clone(self);
        let delay = self.config.retry_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            supervisor.fire(target, token, generation).await;
        });
    }

    fn should_abort(&self, token: &CancellationToken) -> bool {
        token.is_cancelled()
            || self.shared.user_stop_requested()
            || self.shared.cleanup_in_progress()
            || !self.shared.is_reconnecting()
    }

    async fn fire(
        self: Arc<Self>,
        target: Arc<dyn ReconnectTarget>,
        token: CancellationToken,
        generation: u64,
    ) {
        if self.should_abort(&token) {
            tracing::debug!(generation, "Stale reconnection timer suppressed");
            self.release_timer(generation);
            return;
        }

        let mut attempt = 0;
        self.shared.update_reconnection(|state| {
            state.attempt += 1;
            attempt = state.attempt;
            state.message = format!("Reconnecting (attempt {})", state.attempt);
        });
        tracing::info!(attempt, "Reconnection attempt");

        let result = target.attempt_reconnect().await;

        if token.is_cancelled() || self.shared.user_stop_requested() {
            tracing::debug!(attempt, "Reconnection attempt finished after stop, ignoring");
            self.release_timer(generation);
            return;
        }

        match result {
            Ok(()) => {
                self.release_timer(generation);
                tracing::info!(attempt, "Reconnected");
                self.schedule_message_clear();
            }
            Err(e) => {
                if !self.shared.is_reconnecting() {
                    self.release_timer(generation);
                    return;
                }
                tracing::warn!(attempt, error = %e, "Reconnection attempt failed, retrying");
                let delay = self.config.retry_delay.as_secs();
                self.shared.update_reconnection(|state| {
                    state.reason = e.reason().to_string();
                    state.message = format!("Reconnect failed ({}), retrying in {}s", e, delay);
                });
                self.schedule(target);
            }
        }
    }

    fn release_timer(&self, generation: u64) {
        let mut timer = self.timer.lock();
        if timer.as_ref().map(|t| t.generation) == Some(generation) {
            timer.take();
        }
    }

    fn schedule_message_clear(&self) {
        let token = CancellationToken::new();
        if let Some(previous) = self.message_clear.lock().replace(token.clone()) {
            previous.cancel();
        }

        let shared = Arc::clone(&self.shared);
        let window = self.config.success_display;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(window) => {
                    shared.update_reconnection(|state| {
                        if !state.active {
                            state.message.clear();
                        }
                    });
                }
            }
        });
    }
}
