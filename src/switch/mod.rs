//! Source hot-swap coordination
//!
//! Serialized video swaps, placeholder fallback with per-feed retry, and the
//! live connection listener for the active remote feed.

pub mod config;
pub mod coordinator;
pub mod listener;

pub use config::SwitchConfig;
pub use coordinator::{SourceSwitchCoordinator, SwitchEvent};
pub use listener::LinkState;
