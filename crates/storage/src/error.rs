use thiserror::Error;

use common::EntityId;

/// Errors that can occur when interacting with a storage provider.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A staged change conflicts with the stored state: inserting an
    /// identity that already exists, or updating/removing one that doesn't.
    #[error("conflicting change for entity {entity_id}: {detail}")]
    Conflict { entity_id: EntityId, detail: String },

    /// The change set itself is malformed.
    #[error("invalid change set: {0}")]
    InvalidChangeSet(String),

    /// The backing store failed or is unavailable.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
