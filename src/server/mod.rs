//! Check-in server
//!
//! Serves the broadcast hub over WebSocket, exposes the scan claim endpoint
//! and drives default routing of unclaimed scans.

pub mod config;
pub mod connection;
pub mod listener;
pub mod routing;

pub use config::ServerConfig;
pub use connection::{ConnectionError, Heartbeat};
pub use listener::CheckinServer;
pub use routing::{ScanRouter, SheetBindings};
