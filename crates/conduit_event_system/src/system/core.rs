/// Core EventHandling implementation
use crate::event::{Event, EventData, EventHandler, HandlerCallback};
use crate::framing::MessageFramer;
use super::stats::{Counters, EventStats};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// The event bus that owns every named event and dispatches to registered handlers.
///
/// Events are created by modules (or by the runtime itself for connection
/// lifecycle events) and carry two ordered registration lists: a preprocessor
/// veto chain and a priority-sorted handler chain.
///
/// The registry is a `DashMap` so the bus can be shared through `Arc` with
/// every module. Dispatch clones the registration lists before invoking
/// callbacks, which lets handlers register, unregister or trigger events
/// while a dispatch is in progress.
pub struct EventHandling {
    /// Map of event names to their events
    pub(super) events: DashMap<String, Event>,
    /// Framing rules applied by `receive_data`
    pub(super) framer: MessageFramer,
    /// Dispatch counters for monitoring
    pub(super) counters: Counters,
}

impl std::fmt::Debug for EventHandling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandling")
            .field("events", &self.events.len())
            .field("framer", &self.framer)
            .finish()
    }
}

impl EventHandling {
    /// Creates an event bus with no events and the default framing limits.
    pub fn new() -> Self {
        Self::with_framer(MessageFramer::default())
    }

    /// Creates an event bus with custom framing limits.
    pub fn with_framer(framer: MessageFramer) -> Self {
        Self {
            events: DashMap::new(),
            framer,
            counters: Counters::default(),
        }
    }

    /// Creates a new event with empty preprocessor and handler lists.
    ///
    /// Returns `false` if an event with that name already exists.
    pub fn create_event(&self, name: &str, parent_module: &str) -> bool {
        self.insert_event(name, parent_module, None)
    }

    /// Creates a new event and pre-registers `handler` at priority 0.
    pub fn create_event_with_handler<F>(&self, name: &str, parent_module: &str, handler: F) -> bool
    where
        F: Fn(&str, EventData<'_>) + Send + Sync + 'static,
    {
        self.insert_event(name, parent_module, Some(Arc::new(handler) as HandlerCallback))
    }

    fn insert_event(&self, name: &str, parent_module: &str, handler: Option<HandlerCallback>) -> bool {
        match self.events.entry(name.to_string()) {
            Entry::Occupied(_) => {
                debug!("Event '{}' already exists", name);
                false
            }
            Entry::Vacant(entry) => {
                let mut event = Event::new(name, parent_module);
                if let Some(callback) = handler {
                    event.add_handler(EventHandler::new(parent_module, 0, callback));
                }
                entry.insert(event);
                debug!("📌 Event '{}' created by '{}'", name, parent_module);
                true
            }
        }
    }

    /// Removes an event together with all of its registrations.
    pub fn destroy_event(&self, name: &str) -> bool {
        let removed = self.events.remove(name).is_some();
        if removed {
            debug!("🗑️ Event '{}' destroyed", name);
        }
        removed
    }

    /// Checks whether an event with the given name exists.
    pub fn has_event(&self, name: &str) -> bool {
        self.events.contains_key(name)
    }

    /// Lists every registered event name, sorted.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.events.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of handlers attached to `name`, or `None` if the event does not exist.
    pub fn handler_count(&self, name: &str) -> Option<usize> {
        self.events.get(name).map(|event| event.handlers().len())
    }

    /// Number of preprocessors attached to `name`, or `None` if the event does not exist.
    pub fn preprocessor_count(&self, name: &str) -> Option<usize> {
        self.events.get(name).map(|event| event.preprocessors().len())
    }

    /// Returns the module that created `name`.
    pub fn event_owner(&self, name: &str) -> Option<String> {
        self.events.get(name).map(|event| event.parent_module().to_string())
    }

    /// Gets the current event bus statistics.
    pub fn stats(&self) -> EventStats {
        let (mut handlers, mut preprocessors) = (0, 0);
        for event in self.events.iter() {
            handlers += event.handlers().len();
            preprocessors += event.preprocessors().len();
        }
        EventStats {
            total_events: self.events.len(),
            total_handlers: handlers,
            total_preprocessors: preprocessors,
            events_delivered: Counters::read(&self.counters.delivered),
            events_vetoed: Counters::read(&self.counters.vetoed),
            events_missed: Counters::read(&self.counters.missed),
            handler_invocations: Counters::read(&self.counters.invocations),
            callback_panics: Counters::read(&self.counters.panics),
        }
    }
}

impl Default for EventHandling {
    fn default() -> Self {
        Self::new()
    }
}
