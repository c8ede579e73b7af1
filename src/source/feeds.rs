//! Remote feed table
//!
//! Holds the configured URL and current health of every feed slot. Health of
//! the feed that is currently live is written only by the switch
//! coordinator's connection listener; every other entry is written only by
//! the health monitor. The owner is tracked here so neither side can clobber
//! the other.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tokio::sync::watch;

use super::slot::FeedIndex;
use crate::error::{Error, Result};

/// Health of a single remote feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedHealth {
    /// Not configured, or not probed yet
    #[default]
    Idle,
    /// First probe in flight
    Probing,
    /// Last probe or live check succeeded
    Ready,
    /// Last probe or live check failed
    Error,
}

/// Who is allowed to write a feed's health
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthWriter {
    /// Background prober (idle feeds only)
    Monitor,
    /// Live connection listener (active feed only)
    Live,
}

#[derive(Debug, Clone, Default)]
struct FeedEntry {
    url: String,
    health: FeedHealth,
}

impl FeedEntry {
    fn is_configured(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

struct Inner {
    entries: BTreeMap<FeedIndex, FeedEntry>,
    live: Option<FeedIndex>,
}

/// Configured feeds and their health
pub struct FeedBoard {
    max_feeds: u8,
    inner: RwLock<Inner>,
    health_tx: watch::Sender<BTreeMap<FeedIndex, FeedHealth>>,
}

impl FeedBoard {
    /// Create a board with `max_feeds` empty slots
    pub fn new(max_feeds: u8) -> Self {
        let entries: BTreeMap<FeedIndex, FeedEntry> = FeedIndex::all(max_feeds)
            .map(|index| (index, FeedEntry::default()))
            .collect();
        let snapshot = entries.iter().map(|(k, e)| (*k, e.health)).collect();
        let (health_tx, _) = watch::channel(snapshot);

        Self {
            max_feeds,
            inner: RwLock::new(Inner {
                entries,
                live: None,
            }),
            health_tx,
        }
    }

    pub fn max_feeds(&self) -> u8 {
        self.max_feeds
    }

    /// Validate a raw feed number
    pub fn index(&self, raw: u8) -> Result<FeedIndex> {
        FeedIndex::new(raw, self.max_feeds).ok_or(Error::InvalidFeedIndex(raw))
    }

    /// Set or clear the URL of a feed
    ///
    /// Clearing (blank URL) resets health to `Idle`. Changing the URL resets
    /// health too, since the old result says nothing about the new endpoint.
    pub fn configure(&self, index: FeedIndex, url: impl Into<String>) {
        let url = url.into();
        {
            let mut inner = self.inner.write();
            let entry = inner.entries.entry(index).or_default();
            if entry.url != url {
                entry.url = url;
                entry.health = FeedHealth::Idle;
            }
        }
        self.publish();
    }

    /// Configured URL, `None` when blank
    pub fn url(&self, index: FeedIndex) -> Option<String> {
        let inner = self.inner.read();
        inner
            .entries
            .get(&index)
            .filter(|e| e.is_configured())
            .map(|e| e.url.clone())
    }

    pub fn health(&self, index: FeedIndex) -> FeedHealth {
        self.inner
            .read()
            .entries
            .get(&index)
            .map(|e| e.health)
            .unwrap_or_default()
    }

    /// Hand ownership of a feed's health to the live listener (or back)
    pub fn set_live(&self, index: Option<FeedIndex>) {
        self.inner.write().live = index;
    }

    /// Feed currently owned by the live listener
    pub fn live(&self) -> Option<FeedIndex> {
        self.inner.read().live
    }

    /// Update a feed's health
    ///
    /// Returns the previous health, or `None` if `writer` does not own the
    /// entry right now.
    pub fn set_health(
        &self,
        index: FeedIndex,
        health: FeedHealth,
        writer: HealthWriter,
    ) -> Option<FeedHealth> {
        let previous = {
            let mut inner = self.inner.write();
            let is_live = inner.live == Some(index);
            let allowed = match writer {
                HealthWriter::Monitor => !is_live,
                HealthWriter::Live => is_live,
            };
            if !allowed {
                tracing::debug!(feed = %index, ?writer, "Health update from non-owner ignored");
                return None;
            }
            let entry = inner.entries.entry(index).or_default();
            std::mem::replace(&mut entry.health, health)
        };

        if previous != health {
            self.publish();
        }
        Some(previous)
    }

    /// True when at least one feed is configured and every configured feed
    /// is in `Error`. Never-configured feeds are ignored.
    pub fn all_configured_failed(&self) -> bool {
        let inner = self.inner.read();
        let mut configured = inner.entries.values().filter(|e| e.is_configured()).peekable();
        if configured.peek().is_none() {
            return false;
        }
        configured.all(|e| e.health == FeedHealth::Error)
    }

    /// Subscribe to the per-feed health map
    pub fn subscribe(&self) -> watch::Receiver<BTreeMap<FeedIndex, FeedHealth>> {
        self.health_tx.subscribe()
    }

    /// Current health map
    pub fn snapshot(&self) -> BTreeMap<FeedIndex, FeedHealth> {
        self.inner
            .read()
            .entries
            .iter()
            .map(|(k, e)| (*k, e.health))
            .collect()
    }

    fn publish(&self) {
        self.health_tx.send_replace(self.snapshot());
    }
}
