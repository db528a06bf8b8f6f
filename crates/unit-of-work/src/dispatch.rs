//! Event dispatch sink: handler registry and sequential delivery.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::EventRecord;

/// Handles domain events of one logical type.
///
/// Handlers run sequentially during dispatch and must not assume they run
/// concurrently with each other or with the persistence step that follows.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Returns the handler name, used to label failures.
    fn name(&self) -> &'static str;

    /// Handles a single event.
    async fn handle(&self, event: &EventRecord) -> Result<(), common::Error>;
}

/// Adapts a plain function into an event handler.
///
/// Useful for tests and simple sinks that don't need their own state.
pub struct FnHandler<F> {
    name: &'static str,
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&EventRecord) -> Result<(), common::Error> + Send + Sync,
{
    /// Creates a named handler from the given function.
    pub fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&EventRecord) -> Result<(), common::Error> + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    async fn handle(&self, event: &EventRecord) -> Result<(), common::Error> {
        (self.func)(event)
    }
}

/// Routes each domain event to the handlers registered for its type.
///
/// Registration order per event type is preserved; handlers for one event
/// run sequentially. An event type with no registered handlers dispatches
/// successfully as a no-op.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<String, Vec<Arc<dyn EventHandler>>>,
}

impl EventDispatcher {
    /// Creates an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for an event type.
    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.entry(event_type.into()).or_default().push(handler);
    }

    /// Returns the number of handlers registered for an event type.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.get(event_type).map_or(0, Vec::len)
    }

    /// Dispatches one event to every handler registered for its type.
    ///
    /// A handler failure does not stop delivery to the remaining handlers;
    /// all failures are accumulated into a single error carrying the
    /// originating event as metadata, with one reason per failed handler.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn dispatch(&self, event: &EventRecord) -> Result<(), common::Error> {
        let Some(handlers) = self.handlers.get(&event.event_type) else {
            return Ok(());
        };

        let mut failure = common::Error::new(format!(
            "dispatch of {} failed",
            event.event_type
        ))
        .with_metadata("event_type", event.event_type.clone())
        .with_metadata("event_id", event.event_id.to_string())
        .with_metadata("entity_id", event.entity_id.to_string());
        let mut failed = false;

        for handler in handlers {
            if let Err(err) = handler.handle(event).await {
                tracing::warn!(
                    handler = handler.name(),
                    event_type = %event.event_type,
                    "event handler failed"
                );
                failure.push_reason(err.with_metadata("handler", handler.name()));
                failed = true;
            }
        }

        if failed { Err(failure) } else { Ok(()) }
    }
}
