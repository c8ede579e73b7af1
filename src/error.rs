//! Error types
//!
//! Connectivity failures (`ConnectTimeout`, `ConnectFailure`, `TransportFatal`)
//! are absorbed by the reconnection supervisor and the feed retry loops.
//! Only configuration errors reach the caller as a failed command.

use std::time::Duration;

use crate::source::FeedIndex;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Reason a `start()` request was refused before anything was touched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRejection {
    /// No video source has been selected
    VideoSourceNotSet,
    /// No audio selection has been made
    AudioSourceNotSet,
    /// A previous `stop()` is still tearing down the transport
    CleanupInProgress,
    /// The session is already starting, connecting or streaming
    AlreadyActive,
}

impl std::fmt::Display for StartRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartRejection::VideoSourceNotSet => write!(f, "video source not set"),
            StartRejection::AudioSourceNotSet => write!(f, "audio source not set"),
            StartRejection::CleanupInProgress => write!(f, "previous session is still cleaning up"),
            StartRejection::AlreadyActive => write!(f, "session already active"),
        }
    }
}

/// Stage of the connect sequence a timeout fired in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    /// Opening the transport to the ingest endpoint
    Open,
    /// Waiting for the encoder to report it is streaming
    EncoderReady,
    /// Waiting for a remote feed to become ready
    FeedReady,
}

impl std::fmt::Display for ConnectStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectStage::Open => write!(f, "transport open"),
            ConnectStage::EncoderReady => write!(f, "encoder ready"),
            ConnectStage::FeedReady => write!(f, "feed ready"),
        }
    }
}

/// Main error type
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The start attempt cannot proceed; never retried automatically
    #[error("configuration error: {0}")]
    Configuration(StartRejection),

    /// A bounded wait expired
    #[error("{stage} timed out after {timeout:?}")]
    ConnectTimeout {
        stage: ConnectStage,
        timeout: Duration,
    },

    /// The transport refused or dropped the connection attempt
    #[error("connect failed: {0}")]
    ConnectFailure(String),

    /// The transport failed while streaming
    #[error("transport error: {0}")]
    TransportFatal(String),

    /// A remote feed probe failed
    #[error("feed {index} probe failed: {reason}")]
    FeedProbe { index: FeedIndex, reason: String },

    /// A capture or playback collaborator failed
    #[error("source error: {0}")]
    Source(String),

    /// Feed index outside the configured range
    #[error("invalid feed index {0}")]
    InvalidFeedIndex(u8),

    /// The governing operation was superseded or the user stopped
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether the reconnection supervisor should absorb this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectTimeout { .. }
                | Error::ConnectFailure(_)
                | Error::TransportFatal(_)
                | Error::FeedProbe { .. }
                | Error::Source(_)
        )
    }

    /// Short reason string shown in the reconnection state
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::ConnectTimeout { .. } => "timeout",
            Error::ConnectFailure(_) => "connect_failed",
            Error::TransportFatal(_) => "transport_error",
            Error::FeedProbe { .. } => "feed_unreachable",
            Error::Source(_) => "source_error",
            Error::InvalidFeedIndex(_) => "invalid_feed",
            Error::Cancelled => "cancelled",
        }
    }
}

impl From<StartRejection> for Error {
    fn from(rejection: StartRejection) -> Self {
        Error::Configuration(rejection)
    }
}
