//! Domain error types.

use thiserror::Error;

use crate::lifecycle::LifecycleStage;

/// An illegal lifecycle stage transition was attempted.
///
/// The entity's stage is left unchanged when this error is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal lifecycle transition from {from} to {to}")]
pub struct LifecycleError {
    /// The stage the entity was in.
    pub from: LifecycleStage,

    /// The stage that was requested.
    pub to: LifecycleStage,
}

impl From<LifecycleError> for common::Error {
    fn from(err: LifecycleError) -> Self {
        common::Error::new(err.to_string())
            .with_metadata("from_stage", err.from.as_str())
            .with_metadata("to_stage", err.to.as_str())
    }
}
