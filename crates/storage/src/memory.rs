use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    ChangeIntent, ChangeRecord, EntityId, Result, StorageError,
    change::validate_changes_for_apply,
    store::{StorageProvider, StoredState},
};

#[derive(Debug, Default)]
struct State {
    live: HashMap<EntityId, StoredState>,
    archived: HashMap<EntityId, StoredState>,
    fail_on_apply: bool,
}

/// In-memory storage provider for testing.
///
/// Applies change sets with the same atomicity contract as a real backend:
/// every change is checked against the current records before any is
/// applied, so a conflicting batch persists nothing.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    state: Arc<RwLock<State>>,
}

impl InMemoryStorage {
    /// Creates a new empty in-memory storage provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the provider to fail every apply call until unset.
    pub async fn set_fail_on_apply(&self, fail: bool) {
        self.state.write().await.fail_on_apply = fail;
    }

    /// Returns the number of records in the live set.
    pub async fn record_count(&self) -> usize {
        self.state.read().await.live.len()
    }

    /// Returns the number of archived records.
    pub async fn archived_count(&self) -> usize {
        self.state.read().await.archived.len()
    }

    /// Returns the archived record for an entity, if any.
    pub async fn get_archived(&self, entity_id: EntityId) -> Option<StoredState> {
        self.state.read().await.archived.get(&entity_id).cloned()
    }

    /// Clears all live and archived records.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.live.clear();
        state.archived.clear();
    }
}

#[async_trait]
impl StorageProvider for InMemoryStorage {
    async fn apply(&self, changes: Vec<ChangeRecord>) -> Result<usize> {
        validate_changes_for_apply(&changes)?;

        let mut state = self.state.write().await;

        if state.fail_on_apply {
            return Err(StorageError::Backend(
                "storage backend unavailable".to_string(),
            ));
        }

        // First pass: every change must be applicable against the current
        // records, otherwise nothing is applied.
        for change in &changes {
            let exists = state.live.contains_key(&change.entity_id);
            match change.intent {
                ChangeIntent::Insert if exists => {
                    return Err(StorageError::Conflict {
                        entity_id: change.entity_id,
                        detail: "insert of an existing record".to_string(),
                    });
                }
                ChangeIntent::Update | ChangeIntent::Delete | ChangeIntent::Archive
                    if !exists =>
                {
                    return Err(StorageError::Conflict {
                        entity_id: change.entity_id,
                        detail: format!("{} of a missing record", change.intent),
                    });
                }
                _ => {}
            }
        }

        // Second pass: apply everything.
        let mut affected = 0usize;
        for change in &changes {
            match change.intent {
                ChangeIntent::Insert | ChangeIntent::Update => {
                    state.live.insert(change.entity_id, change.into());
                }
                ChangeIntent::Delete => {
                    state.live.remove(&change.entity_id);
                }
                ChangeIntent::Archive => {
                    if let Some(mut record) = state.live.remove(&change.entity_id) {
                        record.state = change.state.clone();
                        record.stored_at = Utc::now();
                        state.archived.insert(change.entity_id, record);
                    }
                }
            }
            affected += 1;
        }

        tracing::debug!(affected, "applied change set");

        Ok(affected)
    }

    async fn load(&self, entity_id: EntityId) -> Result<Option<StoredState>> {
        let state = self.state.read().await;
        Ok(state.live.get(&entity_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StorageProviderExt;

    fn change(entity_id: EntityId, intent: ChangeIntent) -> ChangeRecord {
        ChangeRecord::builder()
            .entity_id(entity_id)
            .aggregate_type("Product")
            .intent(intent)
            .state_raw(serde_json::json!({"name": "widget"}))
            .build()
    }

    #[tokio::test]
    async fn apply_insert_stores_record() {
        let storage = InMemoryStorage::new();
        let entity_id = EntityId::new();

        let affected = storage
            .apply(vec![change(entity_id, ChangeIntent::Insert)])
            .await
            .unwrap();

        assert_eq!(affected, 1);
        assert_eq!(storage.record_count().await, 1);
        assert!(storage.contains(entity_id).await.unwrap());
    }

    #[tokio::test]
    async fn apply_update_replaces_state() {
        let storage = InMemoryStorage::new();
        let entity_id = EntityId::new();

        storage
            .apply_one(change(entity_id, ChangeIntent::Insert))
            .await
            .unwrap();

        let mut updated = change(entity_id, ChangeIntent::Update);
        updated.state = serde_json::json!({"name": "gadget"});
        storage.apply_one(updated).await.unwrap();

        let stored = storage.load(entity_id).await.unwrap().unwrap();
        assert_eq!(stored.state["name"], "gadget");
        assert_eq!(storage.record_count().await, 1);
    }

    #[tokio::test]
    async fn apply_delete_removes_record() {
        let storage = InMemoryStorage::new();
        let entity_id = EntityId::new();

        storage
            .apply_one(change(entity_id, ChangeIntent::Insert))
            .await
            .unwrap();
        storage
            .apply_one(change(entity_id, ChangeIntent::Delete))
            .await
            .unwrap();

        assert_eq!(storage.record_count().await, 0);
        assert!(storage.load(entity_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn apply_archive_moves_record_out_of_live_set() {
        let storage = InMemoryStorage::new();
        let entity_id = EntityId::new();

        storage
            .apply_one(change(entity_id, ChangeIntent::Insert))
            .await
            .unwrap();
        storage
            .apply_one(change(entity_id, ChangeIntent::Archive))
            .await
            .unwrap();

        assert_eq!(storage.record_count().await, 0);
        assert_eq!(storage.archived_count().await, 1);
        assert!(storage.load(entity_id).await.unwrap().is_none());
        assert!(storage.get_archived(entity_id).await.is_some());
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let storage = InMemoryStorage::new();
        let entity_id = EntityId::new();

        storage
            .apply_one(change(entity_id, ChangeIntent::Insert))
            .await
            .unwrap();

        let result = storage
            .apply_one(change(entity_id, ChangeIntent::Insert))
            .await;
        assert!(matches!(result, Err(StorageError::Conflict { .. })));
    }

    #[tokio::test]
    async fn update_of_missing_record_conflicts() {
        let storage = InMemoryStorage::new();

        let result = storage
            .apply_one(change(EntityId::new(), ChangeIntent::Update))
            .await;
        assert!(matches!(result, Err(StorageError::Conflict { .. })));
    }

    #[tokio::test]
    async fn conflicting_batch_applies_nothing() {
        let storage = InMemoryStorage::new();
        let good = EntityId::new();
        let missing = EntityId::new();

        let result = storage
            .apply(vec![
                change(good, ChangeIntent::Insert),
                change(missing, ChangeIntent::Delete),
            ])
            .await;

        assert!(matches!(result, Err(StorageError::Conflict { .. })));
        assert_eq!(storage.record_count().await, 0);
        assert!(!storage.contains(good).await.unwrap());
    }

    #[tokio::test]
    async fn injected_failure_applies_nothing() {
        let storage = InMemoryStorage::new();
        storage.set_fail_on_apply(true).await;

        let result = storage
            .apply_one(change(EntityId::new(), ChangeIntent::Insert))
            .await;

        assert!(matches!(result, Err(StorageError::Backend(_))));
        assert_eq!(storage.record_count().await, 0);

        storage.set_fail_on_apply(false).await;
        let affected = storage
            .apply_one(change(EntityId::new(), ChangeIntent::Insert))
            .await
            .unwrap();
        assert_eq!(affected, 1);
    }

    #[tokio::test]
    async fn empty_change_set_is_rejected() {
        let storage = InMemoryStorage::new();
        let result = storage.apply(vec![]).await;
        assert!(matches!(result, Err(StorageError::InvalidChangeSet(_))));
    }

    #[tokio::test]
    async fn clear_empties_both_sets() {
        let storage = InMemoryStorage::new();
        let a = EntityId::new();
        let b = EntityId::new();

        storage
            .apply(vec![
                change(a, ChangeIntent::Insert),
                change(b, ChangeIntent::Insert),
            ])
            .await
            .unwrap();
        storage
            .apply_one(change(b, ChangeIntent::Archive))
            .await
            .unwrap();

        storage.clear().await;
        assert_eq!(storage.record_count().await, 0);
        assert_eq!(storage.archived_count().await, 0);
    }
}
