use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::EntityId;
use serde::{Deserialize, Serialize};

use crate::{ChangeRecord, Result};

/// A persisted entity record as returned by a storage provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredState {
    /// The entity this record belongs to.
    pub entity_id: EntityId,

    /// The type of aggregate the entity belongs to.
    pub aggregate_type: String,

    /// The persisted state as JSON.
    pub state: serde_json::Value,

    /// When the record was last written.
    pub stored_at: DateTime<Utc>,
}

/// Core trait for storage providers.
///
/// A storage provider supplies the atomic primitive a unit of work builds
/// on: apply a batch of staged changes in a single transaction. All
/// implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Applies staged changes in one atomic transaction.
    ///
    /// Either every change is applied or none is: a failure on any change
    /// must roll back the whole batch. Returns the number of records
    /// affected.
    async fn apply(&self, changes: Vec<ChangeRecord>) -> Result<usize>;

    /// Retrieves the persisted state of an entity.
    ///
    /// Returns None if the entity has never been stored, or has been
    /// deleted or archived.
    async fn load(&self, entity_id: EntityId) -> Result<Option<StoredState>>;
}

/// Extension trait providing convenience methods for storage providers.
#[async_trait]
pub trait StorageProviderExt: StorageProvider {
    /// Applies a single staged change.
    async fn apply_one(&self, change: ChangeRecord) -> Result<usize> {
        self.apply(vec![change]).await
    }

    /// Checks if an entity exists in the live set.
    async fn contains(&self, entity_id: EntityId) -> Result<bool> {
        Ok(self.load(entity_id).await?.is_some())
    }
}

// Blanket implementation for all StorageProvider implementations
impl<T: StorageProvider + ?Sized> StorageProviderExt for T {}

impl From<&ChangeRecord> for StoredState {
    fn from(change: &ChangeRecord) -> Self {
        debug_assert!(!change.intent.is_removal());
        Self {
            entity_id: change.entity_id,
            aggregate_type: change.aggregate_type.clone(),
            state: change.state.clone(),
            stored_at: Utc::now(),
        }
    }
}
