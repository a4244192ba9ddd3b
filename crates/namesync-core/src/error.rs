//! Error types for namesync

use thiserror::Error;

/// Main error type for namesync operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// Room code failed format validation
    #[error("Invalid room code: {0}")]
    InvalidRoomCode(String),

    /// Channel did not open within the connect timeout
    #[error("Connection timed out after {0} ms")]
    ConnectionTimeout(u64),

    /// Transport refused or failed to open a channel
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Transport reported an error on an open channel
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Publishing an envelope to the relay failed
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Inbound message did not have the expected shape
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Error during storage operations
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;
