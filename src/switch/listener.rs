//! Live connection listener for the active remote feed
//!
//! Watches player events of the connected feed. An error or end-of-stream,
//! or buffering that lasts longer than the threshold, counts as a
//! disconnection. Only one disconnection is handled at a time.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::coordinator::{BackgroundTask, SourceSwitchCoordinator, SwitchEvent};
use crate::session::SessionStatus;
use crate::source::{FeedHealth, FeedIndex, HealthWriter, PlayerEvent};
use crate::state::NoticeKind;

/// Connection state derived from player events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Ready,
    Buffering,
    Error(String),
    Ended,
}

impl From<&PlayerEvent> for LinkState {
    fn from(event: &PlayerEvent) -> Self {
        match event {
            PlayerEvent::Ready => LinkState::Ready,
            PlayerEvent::Buffering => LinkState::Buffering,
            PlayerEvent::Error(reason) => LinkState::Error(reason.clone()),
            PlayerEvent::Ended => LinkState::Ended,
        }
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl SourceSwitchCoordinator {
    pub(super) fn attach_listener(
        self: &Arc<Self>,
        index: FeedIndex,
        events: broadcast::Receiver<PlayerEvent>,
    ) {
        let token = CancellationToken::new();
        let id = self.next_task_id();
        if let Some(previous) = self.listener.lock().replace(BackgroundTask {
            id,
            index,
            token: token.clone(),
        }) {
            previous.token.cancel();
        }

        tracing::debug!(feed = %index, "Connection listener attached");

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator.listen(index, events, token).await;
        });
    }

    async fn listen(
        self: &Arc<Self>,
        index: FeedIndex,
        mut events: broadcast::Receiver<PlayerEvent>,
        token: CancellationToken,
    ) {
        let threshold = self.config.buffering_threshold;
        let mut buffering_since: Option<Instant> = None;

        let reason = loop {
            let deadline = buffering_since.map(|since| since + threshold);

            tokio::select! {
                _ = token.cancelled() => return,
                _ = wait_deadline(deadline) => {
                    break format!("buffering for more than {:?}", threshold);
                }
                event = events.recv() => {
                    let state = match event {
                        Ok(event) => LinkState::from(&event),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(feed = %index, skipped, "Listener lagged behind player events");
                            continue;
                        }
                        Err(RecvError::Closed) => LinkState::Ended,
                    };

                    match state {
                        LinkState::Ready => {
                            if buffering_since.take().is_some() {
                                tracing::debug!(feed = %index, "Feed recovered from buffering");
                            }
                            self.feeds.set_health(index, FeedHealth::Ready, HealthWriter::Live);
                        }
                        LinkState::Buffering => {
                            if buffering_since.is_none() {
                                tracing::debug!(feed = %index, "Feed buffering");
                                buffering_since = Some(Instant::now());
                            }
                        }
                        LinkState::Error(e) => break format!("player error: {}", e),
                        LinkState::Ended => break "feed ended".to_string(),
                    }
                }
            }
        };

        self.handle_disconnect(index, reason, token).await;
    }

    async fn handle_disconnect(
        self: &Arc<Self>,
        index: FeedIndex,
        reason: String,
        token: CancellationToken,
    ) {
        if self.handling_disconnect.swap(true, Ordering::SeqCst) {
            tracing::debug!(feed = %index, "Disconnection already being handled");
            return;
        }

        tracing::warn!(feed = %index, reason = %reason, "Live feed disconnected");
        self.feeds.set_health(index, FeedHealth::Error, HealthWriter::Live);
        self.shared.post_notice(
            NoticeKind::FeedLost,
            format!("Feed {} lost: {}", index, reason),
            self.config.notice_display,
        );

        if self.shared.status() == SessionStatus::Streaming && self.shared.restart_on_disconnect() {
            tracing::info!(feed = %index, "Requesting full stream restart");
            self.emit(SwitchEvent::RestartRequested(index));
            return;
        }

        let _guard = self.switch_lock.lock().await;
        if token.is_cancelled() {
            self.handling_disconnect.store(false, Ordering::SeqCst);
            return;
        }
        if let Some(task) = self.listener.lock().take() {
            task.token.cancel();
        }
        self.placeholder_and_retry_locked(index).await;
    }
}
