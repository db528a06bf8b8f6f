//! Staged changes handed to a storage provider.

use chrono::{DateTime, Utc};
use common::EntityId;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// The persistence intent staged for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeIntent {
    /// Insert a new record.
    Insert,

    /// Replace the state of an existing record.
    Update,

    /// Remove an existing record.
    Delete,

    /// Move an existing record out of the live set into the archive.
    Archive,
}

impl ChangeIntent {
    /// Returns the intent name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeIntent::Insert => "Insert",
            ChangeIntent::Update => "Update",
            ChangeIntent::Delete => "Delete",
            ChangeIntent::Archive => "Archive",
        }
    }

    /// Returns true if the intent removes the record from the live set.
    pub fn is_removal(&self) -> bool {
        matches!(self, ChangeIntent::Delete | ChangeIntent::Archive)
    }
}

impl std::fmt::Display for ChangeIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A staged change ready to be applied by a storage provider.
///
/// Wraps the entity's serialized state with the information a provider
/// needs to apply the change without knowing the concrete entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// The entity this change applies to.
    pub entity_id: EntityId,

    /// The type of aggregate the entity belongs to (e.g., "Product").
    pub aggregate_type: String,

    /// What should happen to the record.
    pub intent: ChangeIntent,

    /// The entity state as JSON at staging time.
    pub state: serde_json::Value,

    /// When the change was staged.
    pub staged_at: DateTime<Utc>,
}

impl ChangeRecord {
    /// Creates a new change record builder.
    pub fn builder() -> ChangeRecordBuilder {
        ChangeRecordBuilder::default()
    }
}

/// Builder for constructing change records.
#[derive(Debug, Default)]
pub struct ChangeRecordBuilder {
    entity_id: Option<EntityId>,
    aggregate_type: Option<String>,
    intent: Option<ChangeIntent>,
    state: Option<serde_json::Value>,
    staged_at: Option<DateTime<Utc>>,
}

impl ChangeRecordBuilder {
    /// Sets the entity ID.
    pub fn entity_id(mut self, id: EntityId) -> Self {
        self.entity_id = Some(id);
        self
    }

    /// Sets the aggregate type.
    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    /// Sets the persistence intent.
    pub fn intent(mut self, intent: ChangeIntent) -> Self {
        self.intent = Some(intent);
        self
    }

    /// Sets the state snapshot from a serializable value.
    pub fn state<T: serde::Serialize>(mut self, state: &T) -> Result<Self, serde_json::Error> {
        self.state = Some(serde_json::to_value(state)?);
        Ok(self)
    }

    /// Sets the state snapshot from a raw JSON value.
    pub fn state_raw(mut self, state: serde_json::Value) -> Self {
        self.state = Some(state);
        self
    }

    /// Sets the staging timestamp. If not set, the current time will be used.
    pub fn staged_at(mut self, staged_at: DateTime<Utc>) -> Self {
        self.staged_at = Some(staged_at);
        self
    }

    /// Builds the change record.
    ///
    /// # Panics
    ///
    /// Panics if required fields (entity_id, aggregate_type, intent, state)
    /// are not set.
    pub fn build(self) -> ChangeRecord {
        ChangeRecord {
            entity_id: self.entity_id.expect("entity_id is required"),
            aggregate_type: self.aggregate_type.expect("aggregate_type is required"),
            intent: self.intent.expect("intent is required"),
            state: self.state.expect("state is required"),
            staged_at: self.staged_at.unwrap_or_else(Utc::now),
        }
    }

    /// Tries to build the record, returning None if required fields are missing.
    pub fn try_build(self) -> Option<ChangeRecord> {
        Some(ChangeRecord {
            entity_id: self.entity_id?,
            aggregate_type: self.aggregate_type?,
            intent: self.intent?,
            state: self.state?,
            staged_at: self.staged_at.unwrap_or_else(Utc::now),
        })
    }
}

/// Validates a change set before it is applied.
///
/// A valid set is non-empty and stages at most one change per entity:
/// a unit of work resolves competing intents before handing the set over.
pub fn validate_changes_for_apply(changes: &[ChangeRecord]) -> Result<(), StorageError> {
    if changes.is_empty() {
        return Err(StorageError::InvalidChangeSet(
            "cannot apply an empty change set".to_string(),
        ));
    }

    for (i, change) in changes.iter().enumerate() {
        if changes[..i].iter().any(|c| c.entity_id == change.entity_id) {
            return Err(StorageError::InvalidChangeSet(format!(
                "duplicate change for entity {}",
                change.entity_id
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(entity_id: EntityId, intent: ChangeIntent) -> ChangeRecord {
        ChangeRecord::builder()
            .entity_id(entity_id)
            .aggregate_type("Product")
            .intent(intent)
            .state_raw(serde_json::json!({"name": "widget"}))
            .build()
    }

    #[test]
    fn builder_fills_defaults() {
        let entity_id = EntityId::new();
        let change = record(entity_id, ChangeIntent::Insert);

        assert_eq!(change.entity_id, entity_id);
        assert_eq!(change.aggregate_type, "Product");
        assert_eq!(change.intent, ChangeIntent::Insert);
        assert_eq!(change.state["name"], "widget");
    }

    #[test]
    fn try_build_returns_none_on_missing_fields() {
        let result = ChangeRecord::builder().try_build();
        assert!(result.is_none());
    }

    #[test]
    fn removal_intents() {
        assert!(ChangeIntent::Delete.is_removal());
        assert!(ChangeIntent::Archive.is_removal());
        assert!(!ChangeIntent::Insert.is_removal());
        assert!(!ChangeIntent::Update.is_removal());
    }

    #[test]
    fn empty_change_set_is_rejected() {
        let result = validate_changes_for_apply(&[]);
        assert!(matches!(result, Err(StorageError::InvalidChangeSet(_))));
    }

    #[test]
    fn duplicate_entity_is_rejected() {
        let entity_id = EntityId::new();
        let changes = vec![
            record(entity_id, ChangeIntent::Insert),
            record(entity_id, ChangeIntent::Update),
        ];

        let result = validate_changes_for_apply(&changes);
        assert!(matches!(result, Err(StorageError::InvalidChangeSet(_))));
    }

    #[test]
    fn distinct_entities_pass_validation() {
        let changes = vec![
            record(EntityId::new(), ChangeIntent::Insert),
            record(EntityId::new(), ChangeIntent::Delete),
        ];

        assert!(validate_changes_for_apply(&changes).is_ok());
    }
}
