//! Entity lifecycle stages and the transition rules between them.

use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;

/// The stage of a domain entity within its persistence lifecycle.
///
/// The lifecycle is not limited to the application's memory: it tracks the
/// lifetime of the entity's information, which outlives any single process.
///
/// Stage transitions:
/// ```text
/// Created ──► Activated ──┬──► Modified ──┬──► Stored ──► Reconstituted ──► Activated
///                 ▲       │               │
///                 │       ├──► Stored ────┘
///                 │       │
///                 │       └───────┬──► Archived
///                 │               └──► Deleted
///                 └── (from Reconstituted)
/// ```
///
/// `Created` and `Reconstituted` are the only entry points into the live
/// set; `Archived` and `Deleted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LifecycleStage {
    /// A new identity has been defined in memory; the entity does not yet
    /// exist in any data source.
    #[default]
    Created,

    /// The entity is ready for use within the domain model.
    Activated,

    /// The entity's data has changed since it was activated.
    Modified,

    /// The entity has been persisted successfully to a data source.
    Stored,

    /// The entity has been materialized from a data source and must be
    /// activated before further use.
    Reconstituted,

    /// The entity was archived to a data source; its lifetime has ended.
    Archived,

    /// The entity was removed from its data source; its lifetime has ended.
    Deleted,
}

impl LifecycleStage {
    /// Returns true if the transition to `target` is legal under the
    /// default policy.
    pub fn can_transition_to(&self, target: LifecycleStage) -> bool {
        LifecyclePolicy::default().allows(*self, target)
    }

    /// Returns true if this is a terminal stage (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleStage::Archived | LifecycleStage::Deleted)
    }

    /// Returns true if the entity is live in the domain model: activated,
    /// carrying unsaved modifications, or freshly materialized.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            LifecycleStage::Activated | LifecycleStage::Modified | LifecycleStage::Reconstituted
        )
    }

    /// Returns the stage name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStage::Created => "Created",
            LifecycleStage::Activated => "Activated",
            LifecycleStage::Modified => "Modified",
            LifecycleStage::Stored => "Stored",
            LifecycleStage::Reconstituted => "Reconstituted",
            LifecycleStage::Archived => "Archived",
            LifecycleStage::Deleted => "Deleted",
        }
    }

    /// Every stage, in declaration order. Useful for exhaustive checks.
    pub fn all() -> [LifecycleStage; 7] {
        [
            LifecycleStage::Created,
            LifecycleStage::Activated,
            LifecycleStage::Modified,
            LifecycleStage::Stored,
            LifecycleStage::Reconstituted,
            LifecycleStage::Archived,
            LifecycleStage::Deleted,
        ]
    }
}

impl std::fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Policy knobs for transition legality.
///
/// The base table is fixed; the policy widens it where the rules leave room
/// for interpretation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecyclePolicy {
    /// Permit `Stored` entities still live in memory after a save to move
    /// straight to `Archived`/`Deleted` without being reconstituted first.
    pub terminal_from_stored: bool,
}

impl LifecyclePolicy {
    /// The conservative default policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a policy that permits `Stored → Archived/Deleted`.
    pub fn allow_terminal_from_stored(mut self) -> Self {
        self.terminal_from_stored = true;
        self
    }

    /// Returns true if the transition `from → to` is legal under this policy.
    pub fn allows(&self, from: LifecycleStage, to: LifecycleStage) -> bool {
        use LifecycleStage::*;

        let base = matches!(
            (from, to),
            (Created, Activated)
                | (Activated, Modified)
                | (Activated, Stored)
                | (Activated, Archived)
                | (Activated, Deleted)
                | (Modified, Stored)
                | (Modified, Archived)
                | (Modified, Deleted)
                | (Stored, Reconstituted)
                | (Reconstituted, Activated)
        );

        base || (self.terminal_from_stored && from == Stored && to.is_terminal())
    }

    /// Validates the transition `from → to`, returning the attempted pair
    /// on failure.
    pub fn validate(&self, from: LifecycleStage, to: LifecycleStage) -> Result<(), LifecycleError> {
        if self.allows(from, to) {
            Ok(())
        } else {
            Err(LifecycleError { from, to })
        }
    }
}
