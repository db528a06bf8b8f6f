//! Unit-of-work error types.

use thiserror::Error;

use common::EntityId;
use domain::{LifecycleError, LifecycleStage};
use storage::StorageError;

/// A repository operation was attempted against an entity whose current
/// state does not permit it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidStateError {
    /// The entity's lifecycle stage rules out the operation.
    #[error("entity {entity_id} in stage {stage} does not permit {operation}")]
    WrongStage {
        entity_id: EntityId,
        stage: LifecycleStage,
        operation: &'static str,
        #[source]
        cause: Option<LifecycleError>,
    },

    /// The identity is already tracked by this unit of work.
    #[error("entity {entity_id} is already tracked by this unit of work")]
    AlreadyTracked { entity_id: EntityId },

    /// The entity is staged for removal; no further staging is permitted.
    #[error("entity {entity_id} is staged for removal; {operation} is not permitted")]
    StagedForRemoval {
        entity_id: EntityId,
        operation: &'static str,
    },
}

impl From<InvalidStateError> for common::Error {
    fn from(err: InvalidStateError) -> Self {
        let error = common::Error::new(err.to_string());
        match err {
            InvalidStateError::WrongStage {
                entity_id,
                stage,
                operation,
                cause,
            } => {
                let error = error
                    .with_metadata("entity_id", entity_id.to_string())
                    .with_metadata("stage", stage.as_str())
                    .with_metadata("operation", operation);
                match cause {
                    Some(lifecycle) => error.with_reason(common::Error::from(lifecycle)),
                    None => error,
                }
            }
            InvalidStateError::AlreadyTracked { entity_id } => {
                error.with_metadata("entity_id", entity_id.to_string())
            }
            InvalidStateError::StagedForRemoval {
                entity_id,
                operation,
            } => error
                .with_metadata("entity_id", entity_id.to_string())
                .with_metadata("operation", operation),
        }
    }
}

/// One or more event handlers failed during dispatch.
///
/// The wrapped [`common::Error`] carries one reason per failed event, in
/// dispatch order; each reason names the originating event in its metadata
/// and holds the per-handler failures as its own reasons.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("event dispatch failed: {0}")]
pub struct DispatchError(pub common::Error);

impl DispatchError {
    /// Returns the accumulated failure tree.
    pub fn details(&self) -> &common::Error {
        &self.0
    }
}

/// The storage layer failed while persisting staged changes.
///
/// No staged change is persisted when this error is returned.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("persistence failed: {0}")]
pub struct PersistenceError(pub common::Error);

impl PersistenceError {
    /// Returns the failure tree wrapping the underlying cause.
    pub fn details(&self) -> &common::Error {
        &self.0
    }
}

impl From<StorageError> for PersistenceError {
    fn from(err: StorageError) -> Self {
        Self(
            common::Error::new("failed to persist staged changes")
                .with_reason(common::Error::new(err.to_string())),
        )
    }
}

/// Errors returned by unit-of-work operations.
#[derive(Debug, Error)]
pub enum UnitOfWorkError {
    /// The unit of work has been disposed; no further operations are valid.
    #[error("unit of work has been disposed")]
    Disposed,

    /// The save was cancelled before completion; nothing was persisted.
    #[error("save was cancelled before completion")]
    Cancelled,

    /// One or more event handlers failed; staged changes were not persisted.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The storage layer failed; staged changes were not persisted.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl From<UnitOfWorkError> for common::Error {
    fn from(err: UnitOfWorkError) -> Self {
        match err {
            UnitOfWorkError::Dispatch(DispatchError(error)) => error,
            UnitOfWorkError::Persistence(PersistenceError(error)) => error,
            other => common::Error::new(other.to_string()),
        }
    }
}
