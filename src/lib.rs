//! checkin-rs: gym check-in station
//!
//! An RFID reader types card ids, one per line, into a text stream. This
//! crate turns that stream into real-time updates for front-desk displays:
//!
//! - [`scan`] reads and normalizes card ids and lets a single client claim
//!   the next physical scan
//! - [`hub`] fans payloads out to WebSocket subscribers by topic
//! - [`directory`] looks members up and records their visits
//! - [`server`] wires it all together over HTTP
//!
//! # Example
//!
//! ```no_run
//! use checkin_rs::directory::MemoryDirectory;
//! use checkin_rs::scan::ScanSource;
//! use checkin_rs::{CheckinServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> checkin_rs::Result<()> {
//!     let server = CheckinServer::new(ServerConfig::default(), MemoryDirectory::new());
//!     server.bindings().bind("desk@example.com", "members-2024");
//!     server.run(ScanSource::stdin()).await
//! }
//! ```

pub mod directory;
pub mod error;
pub mod hub;
pub mod scan;
pub mod server;
pub mod stats;

pub use error::{Error, Result};
pub use hub::{Hub, HubConfig, HubHandle, Message, Subscription};
pub use scan::{ClaimError, ScanArbiter, ScanEvent, ScanSource};
pub use server::{CheckinServer, ServerConfig};
