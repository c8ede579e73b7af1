//! Shared controller state
//!
//! Flags and observables that several components read and write. Everything
//! here is either atomic or behind a `watch` channel, so a flag set by one
//! task is seen by the next check in any other task.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::session::SessionStatus;

/// Automatic reconnection progress
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconnectionState {
    /// A retry loop is running
    pub active: bool,
    /// Short machine-readable reason (e.g. `connect_failed`)
    pub reason: String,
    /// Human-readable message for display
    pub message: String,
    /// Attempts made in the current loop
    pub attempt: u32,
}

/// Kind of transient notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// A remote feed stopped responding
    FeedLost,
    /// Video/audio fell back to the local device
    FellBackToLocal,
    /// Video fell back to the placeholder
    FellBackToPlaceholder,
}

/// Short-lived message for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

/// State shared by the session, supervisor, switch coordinator and monitor
pub struct SharedState {
    /// Set the instant a user stop begins, before any lock is taken
    user_stop: AtomicBool,
    /// Background teardown after `stop()` has not finished yet
    cleanup_tx: watch::Sender<bool>,
    status_tx: watch::Sender<SessionStatus>,
    reconnection_tx: watch::Sender<ReconnectionState>,
    notice_tx: watch::Sender<Option<Notice>>,
    notice_seq: AtomicU64,
    restart_on_disconnect: AtomicBool,
}

impl SharedState {
    pub fn new(restart_on_disconnect: bool) -> Arc<Self> {
        Arc::new(Self {
            user_stop: AtomicBool::new(false),
            cleanup_tx: watch::channel(false).0,
            status_tx: watch::channel(SessionStatus::NotStreaming).0,
            reconnection_tx: watch::channel(ReconnectionState::default()).0,
            notice_tx: watch::channel(None).0,
            notice_seq: AtomicU64::new(0),
            restart_on_disconnect: AtomicBool::new(restart_on_disconnect),
        })
    }

    // User stop flag

    pub fn user_stop_requested(&self) -> bool {
        self.user_stop.load(Ordering::SeqCst)
    }

    pub fn set_user_stop(&self) {
        self.user_stop.store(true, Ordering::SeqCst);
    }

    pub fn clear_user_stop(&self) {
        self.user_stop.store(false, Ordering::SeqCst);
    }

    // Cleanup flag

    pub fn cleanup_in_progress(&self) -> bool {
        *self.cleanup_tx.borrow()
    }

    pub fn set_cleanup_in_progress(&self, in_progress: bool) {
        self.cleanup_tx.send_replace(in_progress);
    }

    /// Resolve once no teardown is running
    pub async fn wait_for_cleanup(&self) {
        let mut rx = self.cleanup_tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|busy| !*busy).await;
    }

    // Session status

    pub fn status(&self) -> SessionStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Move to `next` if the transition is legal
    ///
    /// Check and update happen atomically. Illegal transitions are logged and
    /// leave the status unchanged.
    pub fn transition(&self, next: SessionStatus) -> bool {
        let mut from = next;
        let mut legal = false;
        self.status_tx.send_if_modified(|current| {
            from = *current;
            legal = current.can_transition_to(next);
            if legal && *current != next {
                *current = next;
                true
            } else {
                false
            }
        });

        if !legal {
            tracing::warn!(from = %from, to = %next, "Rejected illegal status transition");
        } else if from != next {
            tracing::info!(from = %from, to = %next, "Session status changed");
        }
        legal
    }

    // Reconnection state

    pub fn reconnection(&self) -> ReconnectionState {
        self.reconnection_tx.borrow().clone()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnection_tx.borrow().active
    }

    pub fn subscribe_reconnection(&self) -> watch::Receiver<ReconnectionState> {
        self.reconnection_tx.subscribe()
    }

    /// Mark a retry loop as running; false if one already is
    pub fn try_activate_reconnection(&self, reason: &str, message: String) -> bool {
        self.reconnection_tx.send_if_modified(|state| {
            if state.active {
                return false;
            }
            *state = ReconnectionState {
                active: true,
                reason: reason.to_string(),
                message,
                attempt: 0,
            };
            true
        })
    }

    pub fn update_reconnection(&self, f: impl FnOnce(&mut ReconnectionState)) {
        self.reconnection_tx.send_modify(f);
    }

    /// Drop the retry state, keeping `message` for display
    pub fn finish_reconnection(&self, message: impl Into<String>) {
        let message = message.into();
        self.reconnection_tx.send_modify(|state| {
            *state = ReconnectionState {
                message,
                ..ReconnectionState::default()
            };
        });
    }

    pub fn clear_reconnection(&self) {
        self.reconnection_tx.send_replace(ReconnectionState::default());
    }

    // Restart-on-disconnect policy

    pub fn restart_on_disconnect(&self) -> bool {
        self.restart_on_disconnect.load(Ordering::SeqCst)
    }

    pub fn set_restart_on_disconnect(&self, enabled: bool) {
        self.restart_on_disconnect.store(enabled, Ordering::SeqCst);
    }

    // Notices

    pub fn subscribe_notices(&self) -> watch::Receiver<Option<Notice>> {
        self.notice_tx.subscribe()
    }

    /// Show a notice for `ttl`; a newer notice replaces it early
    pub fn post_notice(self: &Arc<Self>, kind: NoticeKind, message: impl Into<String>, ttl: Duration) {
        let seq = self.notice_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let notice = Notice {
            kind,
            message: message.into(),
        };
        tracing::debug!(?kind, message = %notice.message, "Notice posted");
        self.notice_tx.send_replace(Some(notice));

        let state = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if state.notice_seq.load(Ordering::SeqCst) == seq {
                state.notice_tx.send_replace(None);
            }
        });
    }
}
