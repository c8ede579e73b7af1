//! Session status and legal transitions

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// Idle, nothing open
    #[default]
    NotStreaming,
    /// Preparing sources
    Starting,
    /// Opening the transport, or waiting to retry
    Connecting,
    /// Encoder is sending to the endpoint
    Streaming,
    /// Failed and not retrying; waits for acknowledgement or auto-retry
    Error,
}

impl SessionStatus {
    /// Whether moving from `self` to `next` is allowed
    ///
    /// `NotStreaming` can only leave through `Starting`, so a session never
    /// jumps straight to `Streaming`.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;

        matches!(
            (self, next),
            (NotStreaming, NotStreaming)
                | (NotStreaming, Starting)
                | (Starting, Connecting)
                | (Starting, Error)
                | (Starting, NotStreaming)
                | (Connecting, Connecting)
                | (Connecting, Streaming)
                | (Connecting, Error)
                | (Connecting, NotStreaming)
                | (Streaming, Connecting)
                | (Streaming, NotStreaming)
                | (Error, NotStreaming)
                | (Error, Connecting)
        )
    }

    /// Starting or connecting
    pub fn is_transitional(self) -> bool {
        matches!(self, SessionStatus::Starting | SessionStatus::Connecting)
    }

    /// Anything but `NotStreaming` and `Error`
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionStatus::Starting | SessionStatus::Connecting | SessionStatus::Streaming
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::NotStreaming => "not_streaming",
            SessionStatus::Starting => "starting",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Streaming => "streaming",
            SessionStatus::Error => "error",
        };
        f.write_str(s)
    }
}
