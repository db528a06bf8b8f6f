//! Aggregate repositories and the change tracker they share.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use common::EntityId;
use domain::{AggregateRoot, EventRecord, LifecycleError, LifecyclePolicy, LifecycleStage};
use serde::Serialize;
use storage::ChangeIntent;

use crate::error::InvalidStateError;

/// Shared handle to an entity tracked by a unit of work.
///
/// The caller and the unit of work both hold the same entity through this
/// handle: the caller mutates it through its business operations, the unit
/// of work reads its state at persist time and records persistence outcomes
/// back onto it. Lock scopes are short and never held across await points.
pub struct Tracked<A> {
    inner: Arc<RwLock<A>>,
}

impl<A> Clone for Tracked<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> std::fmt::Debug for Tracked<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracked").finish_non_exhaustive()
    }
}

impl<A: AggregateRoot> Tracked<A> {
    /// Wraps an entity in a shared handle.
    pub fn new(entity: A) -> Self {
        Self {
            inner: Arc::new(RwLock::new(entity)),
        }
    }

    /// Returns the entity's identity.
    pub fn id(&self) -> EntityId {
        self.read().id()
    }

    /// Returns the entity's current lifecycle stage.
    pub fn stage(&self) -> LifecycleStage {
        self.read().stage()
    }

    /// Locks the entity for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, A> {
        self.inner.read().unwrap()
    }

    /// Locks the entity for writing.
    pub fn write(&self) -> RwLockWriteGuard<'_, A> {
        self.inner.write().unwrap()
    }
}

/// Object-safe view over a tracked aggregate, independent of its concrete
/// type. This is what the unit of work iterates at collect and persist time.
pub(crate) trait ErasedEntity: Send + Sync {
    fn id(&self) -> EntityId;
    fn stage(&self) -> LifecycleStage;
    fn set_stage(&self, stage: LifecycleStage);
    fn drain_events(&self) -> Vec<EventRecord>;
    fn aggregate_type(&self) -> &'static str;
    fn snapshot(&self) -> Result<serde_json::Value, serde_json::Error>;
}

impl<A: AggregateRoot + Serialize> ErasedEntity for Tracked<A> {
    fn id(&self) -> EntityId {
        self.read().id()
    }

    fn stage(&self) -> LifecycleStage {
        self.read().stage()
    }

    fn set_stage(&self, stage: LifecycleStage) {
        self.write().set_stage(stage);
    }

    fn drain_events(&self) -> Vec<EventRecord> {
        self.write().drain_events()
    }

    fn aggregate_type(&self) -> &'static str {
        self.read().aggregate_type()
    }

    fn snapshot(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(&*self.read())
    }
}

struct Entry {
    entity: Arc<dyn ErasedEntity>,
    intent: Option<ChangeIntent>,
}

/// Ordered registry of the entities touched during one transaction.
///
/// Every repository bound to the same unit of work shares one tracker, so
/// registration order is global across aggregate types. That order is what
/// gives event collection and change application their stable ordering.
#[derive(Default)]
pub(crate) struct ChangeTracker {
    entries: Mutex<Vec<Entry>>,
}

impl ChangeTracker {
    /// Registers an entity. Returns false if the identity is already tracked.
    pub(crate) fn register(
        &self,
        entity: Arc<dyn ErasedEntity>,
        intent: Option<ChangeIntent>,
    ) -> bool {
        let mut entries = self.entries.lock().unwrap();
        if entries.iter().any(|e| e.entity.id() == entity.id()) {
            return false;
        }
        entries.push(Entry { entity, intent });
        true
    }

    pub(crate) fn contains(&self, id: EntityId) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.entity.id() == id)
    }

    /// Returns the staged intent for a tracked identity, if any.
    pub(crate) fn staged_intent(&self, id: EntityId) -> Option<ChangeIntent> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.entity.id() == id)
            .and_then(|e| e.intent)
    }

    /// Stages an update. An entity staged for insert stays an insert: the
    /// eventual write carries its latest state either way.
    pub(crate) fn mark_update(&self, id: EntityId) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.entity.id() == id) {
            entry.intent = match entry.intent {
                Some(ChangeIntent::Insert) => Some(ChangeIntent::Insert),
                _ => Some(ChangeIntent::Update),
            };
        }
    }

    /// Stages a removal. An entity staged for insert is dropped from the
    /// tracker instead: it was never persisted, so there is nothing to
    /// remove.
    pub(crate) fn mark_removal(&self, id: EntityId, intent: ChangeIntent) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(pos) = entries.iter().position(|e| e.entity.id() == id) {
            if entries[pos].intent == Some(ChangeIntent::Insert) {
                entries.remove(pos);
                return;
            }
            entries[pos].intent = Some(intent);
        }
    }

    /// Entities with a staged intent, in registration order.
    pub(crate) fn staged(&self) -> Vec<(Arc<dyn ErasedEntity>, ChangeIntent)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.intent.map(|intent| (Arc::clone(&e.entity), intent)))
            .collect()
    }

    /// Every tracked entity, in registration order.
    pub(crate) fn tracked(&self) -> Vec<Arc<dyn ErasedEntity>> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| Arc::clone(&e.entity))
            .collect()
    }

    pub(crate) fn staged_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.intent.is_some())
            .count()
    }

    pub(crate) fn tracked_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Drops all staged intents, keeping the entities tracked.
    pub(crate) fn clear_intents(&self) {
        for entry in self.entries.lock().unwrap().iter_mut() {
            entry.intent = None;
        }
    }

    /// Drops everything.
    pub(crate) fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

/// Stages persistence intent for one aggregate-root type.
///
/// A repository holds no transaction of its own: it records what should
/// happen to which entity, and the unit of work it was created from performs
/// the actual dispatch and persistence.
pub struct Repository<A> {
    tracker: Arc<ChangeTracker>,
    policy: LifecyclePolicy,
    _marker: PhantomData<fn() -> A>,
}

impl<A: AggregateRoot + Serialize + 'static> Repository<A> {
    pub(crate) fn new(tracker: Arc<ChangeTracker>, policy: LifecyclePolicy) -> Self {
        Self {
            tracker,
            policy,
            _marker: PhantomData,
        }
    }

    /// Registers a new entity for insertion on the next persist.
    ///
    /// The entity must be in stage `Created`. Returns the shared handle the
    /// entity is tracked under.
    pub fn add(&self, entity: A) -> Result<Tracked<A>, InvalidStateError> {
        let stage = entity.stage();
        if stage != LifecycleStage::Created {
            return Err(InvalidStateError::WrongStage {
                entity_id: entity.id(),
                stage,
                operation: "add",
                cause: None,
            });
        }

        let tracked = Tracked::new(entity);
        let erased: Arc<dyn ErasedEntity> = Arc::new(tracked.clone());
        if !self.tracker.register(erased, Some(ChangeIntent::Insert)) {
            return Err(InvalidStateError::AlreadyTracked {
                entity_id: tracked.id(),
            });
        }
        Ok(tracked)
    }

    /// Registers an entity materialized from storage, without staging any
    /// change. `update`/`delete` find the entity through this registration.
    ///
    /// The entity must be live: `Activated`, `Modified`, or `Reconstituted`.
    pub fn attach(&self, entity: A) -> Result<Tracked<A>, InvalidStateError> {
        let stage = entity.stage();
        if !stage.is_live() {
            return Err(InvalidStateError::WrongStage {
                entity_id: entity.id(),
                stage,
                operation: "attach",
                cause: None,
            });
        }

        let tracked = Tracked::new(entity);
        let erased: Arc<dyn ErasedEntity> = Arc::new(tracked.clone());
        if !self.tracker.register(erased, None) {
            return Err(InvalidStateError::AlreadyTracked {
                entity_id: tracked.id(),
            });
        }
        Ok(tracked)
    }

    /// Registers a tracked entity as modified.
    ///
    /// Returns `Ok(false)` if the entity is not tracked by this unit of
    /// work (a no-op, not an error). The entity must be live, and must have
    /// been activated: a `Reconstituted` entity that was never re-activated
    /// cannot move to `Modified`, which surfaces as an error carrying the
    /// lifecycle violation.
    pub fn update(&self, entity: &Tracked<A>) -> Result<bool, InvalidStateError> {
        let entity_id = entity.id();
        let stage = entity.stage();

        if !stage.is_live() {
            return Err(InvalidStateError::WrongStage {
                entity_id,
                stage,
                operation: "update",
                cause: None,
            });
        }
        if !self.tracker.contains(entity_id) {
            return Ok(false);
        }
        if self
            .tracker
            .staged_intent(entity_id)
            .is_some_and(|intent| intent.is_removal())
        {
            return Err(InvalidStateError::StagedForRemoval {
                entity_id,
                operation: "update",
            });
        }

        match stage {
            LifecycleStage::Modified => {}
            LifecycleStage::Activated => {
                entity
                    .write()
                    .transition_with(self.policy, LifecycleStage::Modified)
                    .map_err(|cause| InvalidStateError::WrongStage {
                        entity_id,
                        stage,
                        operation: "update",
                        cause: Some(cause),
                    })?;
            }
            _ => {
                return Err(InvalidStateError::WrongStage {
                    entity_id,
                    stage,
                    operation: "update",
                    cause: Some(LifecycleError {
                        from: stage,
                        to: LifecycleStage::Modified,
                    }),
                });
            }
        }

        self.tracker.mark_update(entity_id);
        Ok(true)
    }

    /// Registers a tracked entity for removal on the next persist.
    ///
    /// Returns `Ok(false)` if the entity is not tracked. The entity must
    /// not already be in a terminal stage.
    pub fn delete(&self, entity: &Tracked<A>) -> Result<bool, InvalidStateError> {
        self.stage_removal(entity, ChangeIntent::Delete, "delete")
    }

    /// Registers a tracked entity for archival on the next persist.
    ///
    /// Same contract as [`delete`](Repository::delete); the entity lands at
    /// `Archived` instead of `Deleted` once persisted.
    pub fn archive(&self, entity: &Tracked<A>) -> Result<bool, InvalidStateError> {
        self.stage_removal(entity, ChangeIntent::Archive, "archive")
    }

    /// Returns true if the entity is tracked by this unit of work.
    pub fn is_tracked(&self, entity: &Tracked<A>) -> bool {
        self.tracker.contains(entity.id())
    }

    fn stage_removal(
        &self,
        entity: &Tracked<A>,
        intent: ChangeIntent,
        operation: &'static str,
    ) -> Result<bool, InvalidStateError> {
        let entity_id = entity.id();
        let stage = entity.stage();

        if stage.is_terminal() {
            return Err(InvalidStateError::WrongStage {
                entity_id,
                stage,
                operation,
                cause: None,
            });
        }
        if !self.tracker.contains(entity_id) {
            return Ok(false);
        }

        self.tracker.mark_removal(entity_id, intent);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{DomainEvent, Entity, PendingEvents};
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum ProductEvent {
        PriceChanged { new_price: i64 },
    }

    impl DomainEvent for ProductEvent {
        fn event_type(&self) -> &'static str {
            match self {
                ProductEvent::PriceChanged { .. } => "PriceChanged",
            }
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Product {
        id: EntityId,
        name: String,
        price_cents: i64,
        stage: LifecycleStage,
        #[serde(skip)]
        events: PendingEvents,
    }

    impl Product {
        fn new(name: &str) -> Self {
            Self {
                id: EntityId::new(),
                name: name.to_string(),
                price_cents: 0,
                stage: LifecycleStage::Created,
                events: PendingEvents::new(),
            }
        }

        fn at_stage(name: &str, stage: LifecycleStage) -> Self {
            let mut product = Self::new(name);
            product.stage = stage;
            product
        }

        fn change_price(&mut self, new_price: i64) {
            self.price_cents = new_price;
            let record = domain::EventRecord::from_event(
                self.id,
                "Product",
                &ProductEvent::PriceChanged { new_price },
            )
            .expect("serializable event");
            self.events.raise(record);
        }
    }

    impl Entity for Product {
        fn id(&self) -> EntityId {
            self.id
        }

        fn stage(&self) -> LifecycleStage {
            self.stage
        }

        fn set_stage(&mut self, stage: LifecycleStage) {
            self.stage = stage;
        }

        fn pending_events(&self) -> &[EventRecord] {
            self.events.as_slice()
        }

        fn drain_events(&mut self) -> Vec<EventRecord> {
            self.events.drain()
        }
    }

    impl AggregateRoot for Product {
        fn aggregate_type(&self) -> &'static str {
            "Product"
        }
    }

    fn repository() -> Repository<Product> {
        Repository::new(Arc::new(ChangeTracker::default()), LifecyclePolicy::default())
    }

    #[test]
    fn add_requires_created_stage() {
        let repo = repository();

        let err = repo
            .add(Product::at_stage("widget", LifecycleStage::Activated))
            .unwrap_err();
        assert!(matches!(
            err,
            InvalidStateError::WrongStage {
                operation: "add",
                stage: LifecycleStage::Activated,
                ..
            }
        ));

        let tracked = repo.add(Product::new("widget")).unwrap();
        assert!(repo.is_tracked(&tracked));
        assert_eq!(repo.tracker.staged_intent(tracked.id()), Some(ChangeIntent::Insert));
    }

    #[test]
    fn update_on_untracked_entity_returns_false() {
        let repo = repository();
        let loose = Tracked::new(Product::at_stage("widget", LifecycleStage::Activated));

        assert!(!repo.update(&loose).unwrap());
        assert!(!repo.delete(&loose).unwrap());
    }

    #[test]
    fn update_transitions_activated_entity_to_modified() {
        let repo = repository();
        let tracked = repo
            .attach(Product::at_stage("widget", LifecycleStage::Activated))
            .unwrap();

        assert!(repo.update(&tracked).unwrap());
        assert_eq!(tracked.stage(), LifecycleStage::Modified);
        assert_eq!(
            repo.tracker.staged_intent(tracked.id()),
            Some(ChangeIntent::Update)
        );

        // Idempotent once modified.
        assert!(repo.update(&tracked).unwrap());
        assert_eq!(tracked.stage(), LifecycleStage::Modified);
    }

    #[test]
    fn update_rejects_reconstituted_entity_that_was_never_activated() {
        let repo = repository();
        let tracked = repo
            .attach(Product::at_stage("widget", LifecycleStage::Reconstituted))
            .unwrap();

        let err = repo.update(&tracked).unwrap_err();
        match err {
            InvalidStateError::WrongStage { stage, cause, .. } => {
                assert_eq!(stage, LifecycleStage::Reconstituted);
                let cause = cause.expect("lifecycle cause");
                assert_eq!(cause.from, LifecycleStage::Reconstituted);
                assert_eq!(cause.to, LifecycleStage::Modified);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // The stage is left unchanged.
        assert_eq!(tracked.stage(), LifecycleStage::Reconstituted);
    }

    #[test]
    fn update_rejects_stages_outside_the_live_set() {
        let repo = repository();
        let tracked = repo.add(Product::new("widget")).unwrap();

        let err = repo.update(&tracked).unwrap_err();
        assert!(matches!(
            err,
            InvalidStateError::WrongStage {
                stage: LifecycleStage::Created,
                operation: "update",
                ..
            }
        ));
    }

    #[test]
    fn update_keeps_insert_intent_for_added_entities() {
        let repo = repository();
        let tracked = repo.add(Product::new("widget")).unwrap();
        tracked.write().set_stage(LifecycleStage::Activated);

        assert!(repo.update(&tracked).unwrap());
        assert_eq!(
            repo.tracker.staged_intent(tracked.id()),
            Some(ChangeIntent::Insert)
        );
    }

    #[test]
    fn delete_added_entity_drops_it_from_the_tracker() {
        let repo = repository();
        let tracked = repo.add(Product::new("widget")).unwrap();

        assert!(repo.delete(&tracked).unwrap());
        assert!(!repo.is_tracked(&tracked));
    }

    #[test]
    fn delete_rejects_terminal_stages() {
        let repo = repository();
        let tracked = repo
            .attach(Product::at_stage("widget", LifecycleStage::Activated))
            .unwrap();
        tracked.write().set_stage(LifecycleStage::Deleted);

        let err = repo.delete(&tracked).unwrap_err();
        assert!(matches!(
            err,
            InvalidStateError::WrongStage {
                stage: LifecycleStage::Deleted,
                ..
            }
        ));
    }

    #[test]
    fn update_after_staged_removal_is_rejected() {
        let repo = repository();
        let tracked = repo
            .attach(Product::at_stage("widget", LifecycleStage::Activated))
            .unwrap();

        assert!(repo.delete(&tracked).unwrap());
        let err = repo.update(&tracked).unwrap_err();
        assert!(matches!(err, InvalidStateError::StagedForRemoval { .. }));
    }

    #[test]
    fn archive_stages_archive_intent() {
        let repo = repository();
        let tracked = repo
            .attach(Product::at_stage("widget", LifecycleStage::Modified))
            .unwrap();

        assert!(repo.archive(&tracked).unwrap());
        assert_eq!(
            repo.tracker.staged_intent(tracked.id()),
            Some(ChangeIntent::Archive)
        );
    }

    #[test]
    fn double_add_is_rejected() {
        let repo = repository();
        let tracked = repo.add(Product::new("widget")).unwrap();

        // A second registration of the same identity through attach.
        let mut copy = Product::new("widget");
        copy.id = tracked.id();
        copy.stage = LifecycleStage::Activated;
        let err = repo.attach(copy).unwrap_err();
        assert!(matches!(err, InvalidStateError::AlreadyTracked { .. }));
    }

    #[test]
    fn registration_order_is_preserved_across_entities() {
        let repo = repository();
        let first = repo.add(Product::new("first")).unwrap();
        let second = repo.add(Product::new("second")).unwrap();

        let staged = repo.tracker.staged();
        assert_eq!(staged.len(), 2);
        assert_eq!(staged[0].0.id(), first.id());
        assert_eq!(staged[1].0.id(), second.id());
    }

    #[test]
    fn tracked_handle_sees_business_mutations() {
        let repo = repository();
        let tracked = repo
            .attach(Product::at_stage("widget", LifecycleStage::Activated))
            .unwrap();

        tracked.write().change_price(1200);

        assert_eq!(tracked.read().price_cents, 1200);
        assert_eq!(tracked.read().pending_events().len(), 1);
    }
}
