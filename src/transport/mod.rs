//! Upload transport collaborator
//!
//! The encode/mux/send pipeline lives outside this crate. The session drives
//! it through [`Transport`] and watches its liveness and fatal-error signals.

pub mod regulator;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use crate::error::Result;

pub use regulator::{RegulatorAttachment, RegulatorConfig, RegulatorController, RegulatorMode};

/// Wire transport used for the upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    #[default]
    Rtmp,
    /// Congestion-controlled transport, needs an adaptive bitrate regulator
    Srt,
}

impl TransportKind {
    /// Whether a bitrate regulator must be attached
    pub fn requires_regulation(self) -> bool {
        matches!(self, TransportKind::Srt)
    }
}

/// Where to send the stream; opaque to the controller
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EndpointDescriptor {
    /// Ingest URL (e.g. `rtmp://ingest.example.com/live`)
    pub url: String,
    /// Stream key, if not already part of the URL
    pub stream_key: Option<String>,
    pub kind: TransportKind,
}

impl EndpointDescriptor {
    pub fn new(url: impl Into<String>, kind: TransportKind) -> Self {
        Self {
            url: url.into(),
            stream_key: None,
            kind,
        }
    }

    pub fn with_stream_key(mut self, key: impl Into<String>) -> Self {
        self.stream_key = Some(key.into());
        self
    }
}

/// Connection to the ingest endpoint plus the encoder feeding it
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the endpoint
    async fn open(&self, endpoint: &EndpointDescriptor) -> Result<()>;

    /// Start encoding and sending
    async fn start_stream(&self) -> Result<()>;

    /// Stop encoding; the connection stays open
    async fn stop_stream(&self);

    /// Close the connection
    async fn close(&self);

    /// Observable "encoder is streaming" flag
    fn is_streaming(&self) -> watch::Receiver<bool>;

    /// Fatal errors raised while connected
    fn fatal_errors(&self) -> broadcast::Receiver<String>;
}
