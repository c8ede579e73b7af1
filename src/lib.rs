//! Session and source-failover controller for live media upload
//!
//! Keeps an upload session connected to an ingest endpoint while its upstream
//! sources (a local capture device or one of several remote relay feeds) come
//! and go. The media pipeline, capture hardware and feed playback are external
//! collaborators reached through the traits in [`source`], [`transport`] and
//! [`audio`].
//!
//! The main entry point is [`Controller`]: it owns the session state machine,
//! the reconnection supervisor, the source switch coordinator and the
//! background health monitor, and exposes their commands and observables.

pub mod audio;
pub mod controller;
pub mod error;
pub mod monitor;
pub mod session;
pub mod source;
pub mod state;
pub mod switch;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use controller::{Collaborators, Controller, ControllerConfig};
pub use error::{Error, Result, StartRejection};
pub use session::{SessionStatus, StartOutcome};
pub use source::{AudioSelection, EffectiveAudioSource, FeedHealth, FeedIndex, SourceSlot};
pub use state::{Notice, NoticeKind, ReconnectionState};
pub use switch::SwitchEvent;
pub use transport::{EndpointDescriptor, TransportKind};
