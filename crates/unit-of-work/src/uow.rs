//! The unit-of-work transactional coordinator.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use common::CancellationToken;
use domain::{AggregateRoot, EventRecord, LifecyclePolicy, LifecycleStage};
use serde::Serialize;
use storage::{ChangeIntent, ChangeRecord, StorageProvider};

use crate::dispatch::{EventDispatcher, EventHandler};
use crate::error::{DispatchError, PersistenceError, UnitOfWorkError};
use crate::repository::{ChangeTracker, Repository};

/// Coordinates one logical transaction spanning possibly many aggregates.
///
/// Application code mutates entities through repositories created from this
/// unit of work; each mutation stages intent and may enqueue domain events
/// on the entity. Finalizing the transaction drains the enqueued events,
/// dispatches them, and persists the accumulated changes atomically.
///
/// One instance serves one logical transaction driven by one caller at a
/// time; callers must serialize access to an instance.
pub struct UnitOfWork<S: StorageProvider> {
    storage: S,
    dispatcher: EventDispatcher,
    tracker: Arc<ChangeTracker>,
    policy: LifecyclePolicy,
    disposed: AtomicBool,
}

impl<S: StorageProvider> UnitOfWork<S> {
    /// Creates a unit of work over the given storage provider with an empty
    /// dispatcher.
    pub fn new(storage: S) -> Self {
        Self::with_dispatcher(storage, EventDispatcher::new())
    }

    /// Creates a unit of work with a pre-configured dispatcher.
    pub fn with_dispatcher(storage: S, dispatcher: EventDispatcher) -> Self {
        Self {
            storage,
            dispatcher,
            tracker: Arc::new(ChangeTracker::default()),
            policy: LifecyclePolicy::default(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Sets the lifecycle policy handed to repositories.
    pub fn with_policy(mut self, policy: LifecyclePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns a reference to the underlying storage provider.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Returns a reference to the event dispatcher.
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Registers an event handler for an event type.
    pub fn register_handler(
        &mut self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) {
        self.dispatcher.register(event_type, handler);
    }

    /// Creates a repository for an aggregate-root type, bound to this unit
    /// of work's change tracker.
    pub fn repository<A: AggregateRoot + Serialize + 'static>(&self) -> Repository<A> {
        Repository::new(Arc::clone(&self.tracker), self.policy)
    }

    /// Returns the number of entities tracked across all repositories.
    pub fn tracked_count(&self) -> usize {
        self.tracker.tracked_count()
    }

    /// Returns the number of entities with a staged change.
    pub fn staged_count(&self) -> usize {
        self.tracker.staged_count()
    }

    /// Returns true if this unit of work has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Releases the transaction-scoped state and marks this unit of work
    /// disposed. Every subsequent save fails with
    /// [`UnitOfWorkError::Disposed`].
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        self.tracker.clear();
    }

    /// Persists all staged changes across every repository bound to this
    /// unit of work, in a single atomic transaction.
    ///
    /// Returns the number of entities affected. On any failure no staged
    /// change is persisted and stages are left untouched. On success,
    /// persisted entities record their outcome: inserts and updates land at
    /// `Stored`, removals at `Deleted`/`Archived` with their pending-event
    /// queues cleared.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn save_changes(
        &self,
        cancel: &CancellationToken,
    ) -> Result<usize, UnitOfWorkError> {
        self.ensure_live()?;
        if cancel.is_cancelled() {
            return Err(UnitOfWorkError::Cancelled);
        }

        let staged = self.tracker.staged();
        if staged.is_empty() {
            return Ok(0);
        }

        metrics::counter!("unit_of_work_saves_total").increment(1);
        let save_start = Instant::now();

        let mut changes = Vec::with_capacity(staged.len());
        for (entity, intent) in &staged {
            let state = entity.snapshot().map_err(|err| {
                PersistenceError(
                    common::Error::new("failed to persist staged changes").with_reason(
                        common::Error::new(err.to_string())
                            .with_metadata("entity_id", entity.id().to_string()),
                    ),
                )
            })?;
            changes.push(
                ChangeRecord::builder()
                    .entity_id(entity.id())
                    .aggregate_type(entity.aggregate_type())
                    .intent(*intent)
                    .state_raw(state)
                    .build(),
            );
        }

        let affected = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!("save cancelled while persisting");
                metrics::counter!("unit_of_work_saves_cancelled").increment(1);
                return Err(UnitOfWorkError::Cancelled);
            }
            result = self.storage.apply(changes) => {
                result.map_err(PersistenceError::from)?
            }
        };

        // Record persistence outcomes on the entities.
        for (entity, intent) in &staged {
            match intent {
                ChangeIntent::Insert | ChangeIntent::Update => {
                    entity.set_stage(LifecycleStage::Stored);
                }
                ChangeIntent::Delete => {
                    entity.set_stage(LifecycleStage::Deleted);
                    entity.drain_events();
                }
                ChangeIntent::Archive => {
                    entity.set_stage(LifecycleStage::Archived);
                    entity.drain_events();
                }
            }
        }
        self.tracker.clear_intents();

        metrics::histogram!("unit_of_work_save_duration_seconds")
            .record(save_start.elapsed().as_secs_f64());
        tracing::info!(affected, "staged changes persisted");

        Ok(affected)
    }

    /// Dispatches all pending domain events, then persists all staged
    /// changes. This is the composite operation application code uses in
    /// the common case.
    ///
    /// Ordering: events are collected from every tracked entity in
    /// registration order (raise order within an entity), dispatched
    /// sequentially, and only if every dispatch succeeded are the staged
    /// changes persisted. Dispatch failures are independent of each other
    /// (every event is dispatched regardless of earlier failures), but any
    /// failure means nothing is persisted.
    ///
    /// Returns `Ok(true)` only when both dispatch and persistence fully
    /// succeeded.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn save_entities(
        &self,
        cancel: &CancellationToken,
    ) -> Result<bool, UnitOfWorkError> {
        self.ensure_live()?;
        if cancel.is_cancelled() {
            return Err(UnitOfWorkError::Cancelled);
        }

        let collected: Vec<EventRecord> = self
            .tracker
            .tracked()
            .iter()
            .flat_map(|entity| entity.drain_events())
            .collect();

        let mut failure = common::Error::new("one or more event handlers failed");
        let mut failed = 0usize;
        for event in &collected {
            if let Err(err) = self.dispatcher.dispatch(event).await {
                failure.push_reason(err);
                failed += 1;
            }
        }

        if failed > 0 {
            metrics::counter!("unit_of_work_dispatch_failures").increment(failed as u64);
            tracing::warn!(
                failed,
                dispatched = collected.len(),
                "event dispatch failed; staged changes were not persisted"
            );
            return Err(DispatchError(failure).into());
        }

        self.save_changes(cancel).await?;
        Ok(true)
    }

    fn ensure_live(&self) -> Result<(), UnitOfWorkError> {
        if self.is_disposed() {
            return Err(UnitOfWorkError::Disposed);
        }
        Ok(())
    }
}

impl<S: StorageProvider> std::fmt::Debug for UnitOfWork<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("tracked", &self.tracked_count())
            .field("staged", &self.staged_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<S: StorageProvider> Drop for UnitOfWork<S> {
    fn drop(&mut self) {
        // Release the transaction-scoped state on every exit path.
        self.tracker.clear();
    }
}
