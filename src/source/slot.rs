//! Source identities
//!
//! A `SourceSlot` names where video comes from; `AudioSelection` is what the
//! user asked for, `EffectiveAudioSource` is what the router actually attached.

use std::fmt;

/// One-based index of a remote relay feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeedIndex(u8);

impl FeedIndex {
    /// Create a feed index, rejecting 0 and anything above `max_feeds`
    pub fn new(index: u8, max_feeds: u8) -> Option<Self> {
        if index >= 1 && index <= max_feeds {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Get the raw one-based index
    pub fn get(self) -> u8 {
        self.0
    }

    /// Iterate over all indices `1..=max_feeds`
    pub fn all(max_feeds: u8) -> impl Iterator<Item = FeedIndex> {
        (1..=max_feeds).map(FeedIndex)
    }
}

impl fmt::Display for FeedIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Medium a source produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Medium {
    Video,
    Audio,
}

/// Candidate video origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSlot {
    /// Local capture device
    Local(String),
    /// Remote relay feed
    RemoteFeed { index: FeedIndex, url: String },
    /// Static fallback used while no live source is available
    Placeholder,
}

impl SourceSlot {
    /// Feed index if this slot is a remote feed
    pub fn feed_index(&self) -> Option<FeedIndex> {
        match self {
            SourceSlot::RemoteFeed { index, .. } => Some(*index),
            _ => None,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, SourceSlot::RemoteFeed { .. })
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, SourceSlot::Placeholder)
    }
}

impl fmt::Display for SourceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSlot::Local(device) => write!(f, "local:{}", device),
            SourceSlot::RemoteFeed { index, .. } => write!(f, "feed:{}", index),
            SourceSlot::Placeholder => write!(f, "placeholder"),
        }
    }
}

/// User audio intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioSelection {
    /// Follow the active video source
    #[default]
    Auto,
    /// Always use the local microphone
    Local,
    /// Always use the audio of a specific feed
    RemoteFeed(FeedIndex),
}

/// Audio origin actually attached to the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveAudioSource {
    Local,
    RemoteFeed(FeedIndex),
}

impl EffectiveAudioSource {
    pub fn feed_index(self) -> Option<FeedIndex> {
        match self {
            EffectiveAudioSource::RemoteFeed(index) => Some(index),
            EffectiveAudioSource::Local => None,
        }
    }
}

impl fmt::Display for EffectiveAudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectiveAudioSource::Local => write!(f, "local"),
            EffectiveAudioSource::RemoteFeed(index) => write!(f, "feed:{}", index),
        }
    }
}
