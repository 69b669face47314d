use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// Network failure or timeout talking to the remote board.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote side refused the change (validation, permissions, ...).
    #[error("Rejected by remote: {0}")]
    RemoteRejected(String),

    #[error("Local invariant violated: {0}")]
    LocalInvariantViolation(String),

    /// A board snapshot could not be decoded or failed validation.
    #[error("Malformed board snapshot: {0}")]
    Parse(String),

    #[error("Board not found: {0}")]
    BoardNotFound(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Group not found: {0}")]
    GroupNotFound(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Duplicate column key: {0}")]
    DuplicateColumnKey(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether the error came back from the remote collaborator rather than
    /// from local validation.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RemoteRejected(_))
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for SyncError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Transport("remote call timed out".to_string())
    }
}
