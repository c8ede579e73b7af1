//! Audio routing
//!
//! Resolves which single audio source feeds the encoder and manages the
//! auxiliary monitor playback path.

pub mod monitor;
pub mod router;

pub use monitor::{MonitorPlayer, MonitorPlayerFactory};
pub use router::{resolve, AudioRouter};
