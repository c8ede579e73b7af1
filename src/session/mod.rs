//! Session lifecycle
//!
//! The connect/stream/stop state machine and the reconnection supervisor
//! that keeps it connected after unexpected drops.

pub mod config;
pub mod machine;
pub mod reconnect;
pub mod status;

pub use config::{ReconnectConfig, SessionConfig};
pub use machine::{Session, StartOutcome};
pub use reconnect::{ReconnectTarget, ReconnectionSupervisor};
pub use status::SessionStatus;
