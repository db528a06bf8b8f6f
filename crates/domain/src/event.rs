//! Domain events and the type-erased record queued on entities.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::EntityId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + Send + Sync {
    /// Returns the event type name.
    ///
    /// This is used for handler routing and record filtering.
    fn event_type(&self) -> &'static str;
}

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<EventId> for Uuid {
    fn from(id: EventId) -> Self {
        id.0
    }
}

/// A raised domain event along with its metadata.
///
/// This structure wraps a domain event with everything the dispatch and
/// persistence machinery needs without knowing the concrete event type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// The type of the event (e.g., "PriceChanged", "StockDepleted").
    pub event_type: String,

    /// The entity that raised this event.
    pub entity_id: EntityId,

    /// The type of aggregate the entity belongs to (e.g., "Product").
    pub aggregate_type: String,

    /// When the event was raised.
    pub timestamp: DateTime<Utc>,

    /// The event payload as JSON, opaque to the dispatch machinery.
    pub payload: serde_json::Value,

    /// Additional metadata about the event.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EventRecord {
    /// Creates a new event record builder.
    pub fn builder() -> EventRecordBuilder {
        EventRecordBuilder::default()
    }

    /// Builds a record from a typed domain event raised by `entity_id`.
    pub fn from_event<E: DomainEvent>(
        entity_id: EntityId,
        aggregate_type: impl Into<String>,
        event: &E,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::builder()
            .entity_id(entity_id)
            .aggregate_type(aggregate_type)
            .event_type(event.event_type())
            .payload(event)?
            .build())
    }
}

/// Builder for constructing event records.
#[derive(Debug, Default)]
pub struct EventRecordBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    entity_id: Option<EntityId>,
    aggregate_type: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
    metadata: HashMap<String, serde_json::Value>,
}

impl EventRecordBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the raising entity's ID.
    pub fn entity_id(mut self, id: EntityId) -> Self {
        self.entity_id = Some(id);
        self
    }

    /// Sets the aggregate type.
    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Adds a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Builds the event record.
    ///
    /// # Panics
    ///
    /// Panics if required fields (event_type, entity_id, aggregate_type,
    /// payload) are not set.
    pub fn build(self) -> EventRecord {
        EventRecord {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type.expect("event_type is required"),
            entity_id: self.entity_id.expect("entity_id is required"),
            aggregate_type: self.aggregate_type.expect("aggregate_type is required"),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self.payload.expect("payload is required"),
            metadata: self.metadata,
        }
    }

    /// Tries to build the record, returning None if required fields are missing.
    pub fn try_build(self) -> Option<EventRecord> {
        Some(EventRecord {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type?,
            entity_id: self.entity_id?,
            aggregate_type: self.aggregate_type?,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self.payload?,
            metadata: self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum TestEvent {
        PriceChanged { new_price: i64 },
        StockDepleted,
    }

    impl DomainEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TestEvent::PriceChanged { .. } => "PriceChanged",
                TestEvent::StockDepleted => "StockDepleted",
            }
        }
    }

    #[test]
    fn event_id_new_creates_unique_ids() {
        let id1 = EventId::new();
        let id2 = EventId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn event_record_builder() {
        let entity_id = EntityId::new();
        let payload = serde_json::json!({"new_price": 1200});

        let record = EventRecord::builder()
            .event_type("PriceChanged")
            .entity_id(entity_id)
            .aggregate_type("Product")
            .payload_raw(payload.clone())
            .metadata("correlation_id", serde_json::json!("123"))
            .build();

        assert_eq!(record.event_type, "PriceChanged");
        assert_eq!(record.entity_id, entity_id);
        assert_eq!(record.aggregate_type, "Product");
        assert_eq!(record.payload, payload);
        assert_eq!(
            record.metadata.get("correlation_id"),
            Some(&serde_json::json!("123"))
        );
    }

    #[test]
    fn try_build_returns_none_on_missing_fields() {
        let result = EventRecord::builder().try_build();
        assert!(result.is_none());
    }

    #[test]
    fn from_event_uses_trait_type_name() {
        let entity_id = EntityId::new();
        let record =
            EventRecord::from_event(entity_id, "Product", &TestEvent::StockDepleted).unwrap();

        assert_eq!(record.event_type, "StockDepleted");
        assert_eq!(record.entity_id, entity_id);
    }

    #[test]
    fn from_event_serializes_payload() {
        let record = EventRecord::from_event(
            EntityId::new(),
            "Product",
            &TestEvent::PriceChanged { new_price: 950 },
        )
        .unwrap();

        assert_eq!(record.payload["PriceChanged"]["new_price"], 950);
    }
}
