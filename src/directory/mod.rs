//! Member directory contract
//!
//! The check-in core does not know how member records are stored. It needs
//! two operations from whatever backs them: find the member a scan belongs
//! to, and append a visit record. A datastore handle (a sheet id for the
//! spreadsheet backend) selects which member list to use.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod memory;

pub use memory::MemoryDirectory;

/// A gym member as shown on the check-in display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Membership number
    #[serde(rename = "bsID")]
    pub member_id: String,

    /// Whether the member has outstanding fees
    #[serde(default)]
    pub debt: bool,

    /// Contact email
    #[serde(default)]
    pub email: String,

    /// When the membership runs out
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,

    /// RFID card id
    #[serde(rename = "id", default)]
    pub scan_id: String,

    /// Display name
    pub name: String,

    /// Photo reference
    #[serde(default)]
    pub photo: String,
}

/// Error type for directory operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// No record matches
    #[error("{resource} {id:?} was not found")]
    NotFound {
        /// Kind of record looked up ("user", "sheet")
        resource: &'static str,
        /// The id that was looked up
        id: String,
    },

    /// The backing store is unavailable or returned garbage
    #[error("member directory unavailable: {0}")]
    Transient(String),
}

impl DirectoryError {
    /// Shorthand for a missing user
    pub fn user_not_found(id: impl Into<String>) -> Self {
        DirectoryError::NotFound {
            resource: "user",
            id: id.into(),
        }
    }

    /// Whether the error means the record does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, DirectoryError::NotFound { .. })
    }
}

/// Storage backend for member records
///
/// Called from the default scan routing path, concurrently for different
/// datastores, so implementations must be shareable across tasks.
pub trait MemberDirectory: Send + Sync + 'static {
    /// Find the member whose card id matches `scan_id` (case-insensitive)
    fn lookup_user(
        &self,
        datastore: &str,
        scan_id: &str,
    ) -> impl Future<Output = Result<User, DirectoryError>> + Send;

    /// Append a timestamped visit for `member_id`
    fn record_visit(
        &self,
        datastore: &str,
        member_id: &str,
    ) -> impl Future<Output = Result<(), DirectoryError>> + Send;
}
