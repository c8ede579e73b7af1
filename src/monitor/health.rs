//! Source health monitor
//!
//! Low-priority probe loop over every configured remote feed except the live
//! one, which the switch coordinator's connection listener already watches.
//! After each update the "all configured feeds failed" predicate is checked
//! and, when it holds while the user wants a remote feed, video and audio
//! fall back to the local device.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::MonitorConfig;
use crate::source::capability::probe_bounded;
use crate::source::{FeedBoard, FeedHealth, FeedIndex, HealthWriter, ProbeOutcome, RemoteFeedProbe};
use crate::state::{NoticeKind, SharedState};
use crate::switch::SourceSwitchCoordinator;

/// Periodic prober for non-live feeds
pub struct HealthMonitor {
    config: MonitorConfig,
    feeds: Arc<FeedBoard>,
    probe: Arc<dyn RemoteFeedProbe>,
    switcher: Arc<SourceSwitchCoordinator>,
    shared: Arc<SharedState>,
}

impl HealthMonitor {
    pub fn new(
        config: MonitorConfig,
        feeds: Arc<FeedBoard>,
        probe: Arc<dyn RemoteFeedProbe>,
        switcher: Arc<SourceSwitchCoordinator>,
        shared: Arc<SharedState>,
    ) -> Self {
        Self {
            config,
            feeds,
            probe,
            switcher,
            shared,
        }
    }

    /// Run probe cycles until `token` is cancelled
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::debug!(
                cycle_pause = ?self.config.cycle_pause,
                "Health monitor started"
            );
            loop {
                if !self.run_cycle(&token).await {
                    break;
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(self.config.cycle_pause) => {}
                }
            }
            tracing::debug!("Health monitor stopped");
        })
    }

    /// Probe every non-live feed once; returns false if cancelled midway
    pub async fn run_cycle(&self, token: &CancellationToken) -> bool {
        for index in FeedIndex::all(self.feeds.max_feeds()) {
            if token.is_cancelled() {
                return false;
            }
            if self.feeds.live() == Some(index) {
                continue;
            }

            let Some(url) = self.feeds.url(index) else {
                self.feeds.set_health(index, FeedHealth::Idle, HealthWriter::Monitor);
                continue;
            };

            if self.feeds.health(index) == FeedHealth::Idle {
                self.feeds.set_health(index, FeedHealth::Probing, HealthWriter::Monitor);
            }

            let outcome = tokio::select! {
                _ = token.cancelled() => return false,
                outcome = probe_bounded(self.probe.as_ref(), &url, self.config.probe_timeout) => outcome,
            };
            self.record(index, outcome);
            self.evaluate().await;

            tokio::select! {
                _ = token.cancelled() => return false,
                _ = tokio::time::sleep(self.config.between_feeds) => {}
            }
        }
        true
    }

    fn record(&self, index: FeedIndex, outcome: ProbeOutcome) {
        let (health, reason) = match outcome {
            ProbeOutcome::Ready => (FeedHealth::Ready, None),
            ProbeOutcome::Error(reason) => (FeedHealth::Error, Some(reason)),
        };

        // The feed may have gone live while the probe ran
        let Some(previous) = self.feeds.set_health(index, health, HealthWriter::Monitor) else {
            tracing::debug!(feed = %index, "Feed went live during probe, result dropped");
            return;
        };

        match reason {
            Some(reason) if matches!(previous, FeedHealth::Ready | FeedHealth::Probing) => {
                tracing::warn!(feed = %index, reason = %reason, "Feed became unavailable");
                self.shared.post_notice(
                    NoticeKind::FeedLost,
                    format!("Feed {} unavailable", index),
                    self.config.notice_display,
                );
            }
            Some(reason) => tracing::debug!(feed = %index, reason = %reason, "Feed still unavailable"),
            None if previous != FeedHealth::Ready => tracing::info!(feed = %index, "Feed available"),
            None => {}
        }
    }

    /// Fall back to the local device if every configured feed failed
    pub async fn evaluate(&self) -> bool {
        if !self.feeds.all_configured_failed() {
            return false;
        }
        if !self.switcher.intent().is_some_and(|slot| slot.is_remote()) {
            return false;
        }

        tracing::warn!("All configured feeds failed");
        self.switcher.fall_back_to_local().await
    }
}
