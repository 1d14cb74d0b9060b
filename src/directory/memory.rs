//! In-memory member directory
//!
//! Keeps one member list per datastore handle. Loaded from a JSON file
//! mapping datastore ids to member arrays:
//!
//! ```json
//! { "front-desk": [ { "bsID": "bs-001", "name": "Ada", "id": "ab12" } ] }
//! ```
//!
//! Meant for tests, demos and small single-desk setups. Visits are not
//! persisted; each sheet keeps the most recent [`MAX_VISITS_PER_SHEET`].

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::Result;

use super::{DirectoryError, MemberDirectory, User};

/// Visits kept per sheet; older ones are dropped first
pub const MAX_VISITS_PER_SHEET: usize = 10_000;

/// A recorded visit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visit {
    /// Membership number of the visitor
    pub member_id: String,
    /// When the visit was recorded
    pub at: DateTime<Utc>,
}

#[derive(Default)]
struct Sheet {
    members: Vec<User>,
    visits: VecDeque<Visit>,
}

/// Member directory held entirely in memory
#[derive(Default)]
pub struct MemoryDirectory {
    sheets: RwLock<HashMap<String, Sheet>>,
}

impl MemoryDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from `datastore -> members` pairs
    pub fn from_members(sheets: HashMap<String, Vec<User>>) -> Self {
        let sheets = sheets
            .into_iter()
            .map(|(id, members)| {
                let sheet = Sheet {
                    members,
                    visits: VecDeque::new(),
                };
                (id, sheet)
            })
            .collect();

        Self {
            sheets: RwLock::new(sheets),
        }
    }

    /// Load members from a JSON file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read(path.as_ref()).await?;
        let sheets: HashMap<String, Vec<User>> = serde_json::from_slice(&raw)?;

        tracing::info!(
            path = %path.as_ref().display(),
            sheets = sheets.len(),
            members = sheets.values().map(Vec::len).sum::<usize>(),
            "Member directory loaded"
        );

        Ok(Self::from_members(sheets))
    }

    /// Add a member to a datastore, creating it if needed
    pub fn insert(&self, datastore: impl Into<String>, user: User) {
        self.sheets
            .write()
            .entry(datastore.into())
            .or_default()
            .members
            .push(user);
    }

    /// Visits recorded so far for a datastore
    pub fn visits(&self, datastore: &str) -> Vec<Visit> {
        self.sheets
            .read()
            .get(datastore)
            .map(|sheet| sheet.visits.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn find(&self, datastore: &str, scan_id: &str) -> std::result::Result<User, DirectoryError> {
        let sheets = self.sheets.read();
        let sheet = sheets.get(datastore).ok_or_else(|| DirectoryError::NotFound {
            resource: "sheet",
            id: datastore.to_string(),
        })?;

        sheet
            .members
            .iter()
            .find(|u| !u.scan_id.is_empty() && u.scan_id.eq_ignore_ascii_case(scan_id))
            .cloned()
            .ok_or_else(|| DirectoryError::user_not_found(scan_id))
    }

    fn append_visit(&self, datastore: &str, member_id: &str) -> std::result::Result<(), DirectoryError> {
        let mut sheets = self.sheets.write();
        let sheet = sheets.get_mut(datastore).ok_or_else(|| DirectoryError::NotFound {
            resource: "sheet",
            id: datastore.to_string(),
        })?;

        if sheet.visits.len() == MAX_VISITS_PER_SHEET {
            sheet.visits.pop_front();
        }
        sheet.visits.push_back(Visit {
            member_id: member_id.to_lowercase(),
            at: Utc::now(),
        });
        Ok(())
    }
}

impl MemberDirectory for MemoryDirectory {
    async fn lookup_user(&self, datastore: &str, scan_id: &str) -> std::result::Result<User, DirectoryError> {
        self.find(datastore, scan_id)
    }

    async fn record_visit(&self, datastore: &str, member_id: &str) -> std::result::Result<(), DirectoryError> {
        self.append_visit(datastore, member_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(member_id: &str, scan_id: &str) -> User {
        User {
            member_id: member_id.to_string(),
            debt: false,
            email: String::new(),
            expiration: None,
            scan_id: scan_id.to_string(),
            name: "Ada".to_string(),
            photo: String::new(),
        }
    }

    #[tokio::test]
    async fn test_lookup_is_case_insensitive() {
        let directory = MemoryDirectory::new();
        directory.insert("desk", member("bs-1", "ab12"));

        let user = directory.lookup_user("desk", "AB12").await.unwrap();
        assert_eq!(user.member_id, "bs-1");
    }

    #[tokio::test]
    async fn test_lookup_not_found() {
        let directory = MemoryDirectory::new();
        directory.insert("desk", member("bs-1", "ab12"));
        directory.insert("desk", member("bs-2", ""));

        let err = directory.lookup_user("desk", "zz99").await.unwrap_err();
        assert_eq!(err, DirectoryError::user_not_found("zz99"));
        assert_eq!(err.to_string(), "user \"zz99\" was not found");

        let err = directory.lookup_user("other", "ab12").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_record_visit() {
        let directory = MemoryDirectory::new();
        directory.insert("desk", member("BS-1", "ab12"));

        directory.record_visit("desk", "BS-1").await.unwrap();

        let visits = directory.visits("desk");
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].member_id, "bs-1");
        assert!(directory.record_visit("nope", "bs-1").await.is_err());
    }

    #[tokio::test]
    async fn test_visits_keep_most_recent() {
        let directory = MemoryDirectory::new();
        directory.insert("desk", member("bs-1", "ab12"));

        for i in 0..MAX_VISITS_PER_SHEET + 3 {
            directory.record_visit("desk", &format!("bs-{i}")).await.unwrap();
        }

        let visits = directory.visits("desk");
        assert_eq!(visits.len(), MAX_VISITS_PER_SHEET);
        assert_eq!(visits[0].member_id, "bs-3");
        assert_eq!(
            visits[MAX_VISITS_PER_SHEET - 1].member_id,
            format!("bs-{}", MAX_VISITS_PER_SHEET + 2)
        );
    }

    #[test]
    fn test_user_json_field_names() {
        let json = r#"{"bsID":"bs-7","name":"Grace","id":"c0ffee","debt":true}"#;
        let user: User = serde_json::from_str(json).unwrap();

        assert_eq!(user.member_id, "bs-7");
        assert_eq!(user.scan_id, "c0ffee");
        assert!(user.debt);
        assert!(user.expiration.is_none());

        let out = serde_json::to_value(&user).unwrap();
        assert_eq!(out["bsID"], "bs-7");
        assert_eq!(out["id"], "c0ffee");
    }
}
