//! Scan claim error types

use std::time::Duration;

/// Error returned when claiming the next scan fails
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    /// Another caller is already waiting for the next scan
    #[error("another client is currently reading a RFID value")]
    AlreadyClaimed,
    /// No scan arrived within the claim window
    #[error("timed out waiting for RFID scan after {0:?}")]
    Timeout(Duration),
}
