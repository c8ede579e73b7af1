//! Background health probing of remote feeds

pub mod config;
pub mod health;

pub use config::MonitorConfig;
pub use health::HealthMonitor;
