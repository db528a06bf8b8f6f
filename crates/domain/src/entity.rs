//! Entity and aggregate-root traits.

use common::EntityId;
use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;
use crate::event::EventRecord;
use crate::lifecycle::{LifecyclePolicy, LifecycleStage};

/// A domain object with identity, a lifecycle stage, and a queue of events
/// it has raised but not yet had dispatched.
///
/// The stage is mutated through two paths: [`transition`](Entity::transition)
/// validates the move against the legality table and is what the entity's own
/// business operations use; [`set_stage`](Entity::set_stage) is unchecked and
/// is reserved for recording persistence outcomes.
pub trait Entity: Send + Sync {
    /// Returns the entity's unique identity.
    fn id(&self) -> EntityId;

    /// Returns the current lifecycle stage.
    fn stage(&self) -> LifecycleStage;

    /// Sets the stage without legality checks.
    fn set_stage(&mut self, stage: LifecycleStage);

    /// Events raised but not yet dispatched, in raise order.
    fn pending_events(&self) -> &[EventRecord];

    /// Consumes and returns the pending events, in raise order.
    ///
    /// A drained sequence is not restartable: after this call the queue
    /// is empty.
    fn drain_events(&mut self) -> Vec<EventRecord>;

    /// Validated stage transition under the default policy.
    ///
    /// On failure the stage is left unchanged and no event is raised; raising
    /// events is the responsibility of the entity's own business operations.
    fn transition(&mut self, target: LifecycleStage) -> Result<(), LifecycleError> {
        self.transition_with(LifecyclePolicy::default(), target)
    }

    /// Validated stage transition under an explicit policy.
    fn transition_with(
        &mut self,
        policy: LifecyclePolicy,
        target: LifecycleStage,
    ) -> Result<(), LifecycleError> {
        policy.validate(self.stage(), target)?;
        self.set_stage(target);
        Ok(())
    }
}

/// Marker for entities that form a consistency boundary.
///
/// Only aggregate roots are loaded and saved directly; the root owns the
/// lifetimes of every member entity it contains. Repositories accept
/// aggregate roots exclusively, checked at construction via this bound.
pub trait AggregateRoot: Entity {
    /// Returns the aggregate type name (e.g., "Product").
    ///
    /// Used to label change records and event records.
    fn aggregate_type(&self) -> &'static str;
}

/// The queue of events an entity has raised but not yet had dispatched.
///
/// Entities embed this and expose it through [`Entity::pending_events`] and
/// [`Entity::drain_events`]. State snapshots normally skip the queue
/// (`#[serde(skip)]`), since raised-but-undispatched events are not part of
/// persisted state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingEvents {
    records: Vec<EventRecord>,
}

impl PendingEvents {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a raised event, preserving raise order.
    pub fn raise(&mut self, record: EventRecord) {
        self.records.push(record);
    }

    /// Consumes and returns all queued events, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<EventRecord> {
        std::mem::take(&mut self.records)
    }

    /// Returns the queued events without consuming them.
    pub fn as_slice(&self) -> &[EventRecord] {
        &self.records
    }

    /// Returns the number of queued events.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no events are queued.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
