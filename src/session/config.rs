//! Session and reconnection configuration

use std::time::Duration;

use crate::transport::{EndpointDescriptor, TransportKind};

/// Session configuration options
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Where to send the stream
    pub endpoint: EndpointDescriptor,

    /// Transport open must complete within this time
    pub open_timeout: Duration,

    /// Encoder must report streaming within this time after start
    pub encoder_ready_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointDescriptor::default(),
            open_timeout: Duration::from_secs(10),
            encoder_ready_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionConfig {
    /// Create a config for an endpoint
    pub fn new(endpoint: EndpointDescriptor) -> Self {
        Self {
            endpoint,
            ..Default::default()
        }
    }

    /// Set the endpoint
    pub fn endpoint(mut self, endpoint: EndpointDescriptor) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Set transport open timeout
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Set encoder readiness timeout
    pub fn encoder_ready_timeout(mut self, timeout: Duration) -> Self {
        self.encoder_ready_timeout = timeout;
        self
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.endpoint.kind
    }
}

/// Reconnection supervisor configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Fixed delay before each retry
    pub retry_delay: Duration,

    /// How long the "reconnected" message stays visible
    pub success_display: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            success_display: Duration::from_secs(3),
        }
    }
}

impl ReconnectConfig {
    /// Set retry delay
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set success message display window
    pub fn success_display(mut self, window: Duration) -> Self {
        self.success_display = window;
        self
    }
}
