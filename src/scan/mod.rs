//! Scan intake and routing
//!
//! Scans flow from the [`ScanSource`] reader task into the [`ScanArbiter`],
//! which hands each one either to a single outstanding claimant or back to
//! the caller for default routing (lookup and broadcast).
//!
//! ```text
//!   RFID reader ──► ScanSource task ──► ScanFeed ──► dispatcher
//!                                                       │
//!                                         arbiter.route(scan)
//!                                          │                │
//!                                 Routed::Claimed   Routed::Default(scan)
//!                                          │                │
//!                                   claim_next()     lookup + hub.send()
//! ```

pub mod arbiter;
pub mod error;
pub mod source;

pub use arbiter::{Routed, ScanArbiter, DEFAULT_CLAIM_TIMEOUT};
pub use error::ClaimError;
pub use source::{
    normalize, FeedEnd, ScanEvent, ScanFeed, ScanSource, DEFAULT_SCAN_BUFFER, MAX_LINE_LEN,
};
