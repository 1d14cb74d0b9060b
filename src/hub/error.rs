//! Hub error types

/// Error type for hub operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The control loop has shut down
    #[error("broadcast hub is closed")]
    Closed,
}
