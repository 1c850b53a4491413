//! Event records and the registrations attached to them.
//!
//! An [`Event`] is a named dispatch point. It owns two ordered lists:
//!
//! * **Preprocessors** - a veto chain checked before any handler runs
//! * **Handlers** - callbacks invoked once the chain lets the event through
//!
//! Both lists are kept sorted by ascending priority. Registrations with equal
//! priority keep the order in which they were added.

use std::any::Any;
use std::sync::Arc;

/// Opaque data passed to handlers when an event is triggered.
///
/// Handlers downcast to the payload type they expect, e.g.
/// `data.and_then(|d| d.downcast_ref::<ClientMessage>())`.
pub type EventData<'a> = Option<&'a dyn Any>;

/// Handler capability: event name × opaque data → no result.
pub type HandlerCallback = Arc<dyn Fn(&str, EventData<'_>) + Send + Sync>;

/// Preprocessor capability: event name → veto decision (`false` suppresses dispatch).
pub type PreprocessorCallback = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A veto gate registered by a module against a single event.
#[derive(Clone)]
pub struct EventPreprocessor {
    parent_module: String,
    priority: i32,
    callback: PreprocessorCallback,
}

impl EventPreprocessor {
    pub fn new(parent_module: impl Into<String>, priority: i32, callback: PreprocessorCallback) -> Self {
        Self {
            parent_module: parent_module.into(),
            priority,
            callback,
        }
    }

    /// Name of the module that owns this registration.
    pub fn parent_module(&self) -> &str {
        &self.parent_module
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Runs the predicate. `true` lets dispatch continue.
    pub fn call(&self, event_name: &str) -> bool {
        (self.callback)(event_name)
    }
}

impl std::fmt::Debug for EventPreprocessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPreprocessor")
            .field("parent_module", &self.parent_module)
            .field("priority", &self.priority)
            .finish()
    }
}

/// A handler registered by a module against a single event.
#[derive(Clone)]
pub struct EventHandler {
    parent_module: String,
    priority: i32,
    callback: HandlerCallback,
}

impl EventHandler {
    pub fn new(parent_module: impl Into<String>, priority: i32, callback: HandlerCallback) -> Self {
        Self {
            parent_module: parent_module.into(),
            priority,
            callback,
        }
    }

    /// Name of the module that owns this registration.
    pub fn parent_module(&self) -> &str {
        &self.parent_module
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn call(&self, event_name: &str, data: EventData<'_>) {
        (self.callback)(event_name, data)
    }
}

impl std::fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandler")
            .field("parent_module", &self.parent_module)
            .field("priority", &self.priority)
            .finish()
    }
}

/// A named dispatch point owned by a module.
#[derive(Debug, Clone)]
pub struct Event {
    name: String,
    parent_module: String,
    preprocessors: Vec<EventPreprocessor>,
    handlers: Vec<EventHandler>,
}

impl Event {
    /// Creates an event with empty preprocessor and handler lists.
    pub fn new(name: impl Into<String>, parent_module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent_module: parent_module.into(),
            preprocessors: Vec::new(),
            handlers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the module that created this event.
    pub fn parent_module(&self) -> &str {
        &self.parent_module
    }

    pub fn preprocessors(&self) -> &[EventPreprocessor] {
        &self.preprocessors
    }

    pub fn handlers(&self) -> &[EventHandler] {
        &self.handlers
    }

    /// Inserts a handler after every registration with a lower or equal priority.
    pub fn add_handler(&mut self, handler: EventHandler) {
        let index = self
            .handlers
            .partition_point(|existing| existing.priority <= handler.priority);
        self.handlers.insert(index, handler);
    }

    /// Inserts a preprocessor after every registration with a lower or equal priority.
    pub fn add_preprocessor(&mut self, preprocessor: EventPreprocessor) {
        let index = self
            .preprocessors
            .partition_point(|existing| existing.priority <= preprocessor.priority);
        self.preprocessors.insert(index, preprocessor);
    }

    /// Removes the first handler owned by `parent_module`.
    pub fn remove_handler(&mut self, parent_module: &str) -> bool {
        match self
            .handlers
            .iter()
            .position(|handler| handler.parent_module == parent_module)
        {
            Some(index) => {
                self.handlers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes the first preprocessor owned by `parent_module`.
    pub fn remove_preprocessor(&mut self, parent_module: &str) -> bool {
        match self
            .preprocessors
            .iter()
            .position(|preprocessor| preprocessor.parent_module == parent_module)
        {
            Some(index) => {
                self.preprocessors.remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes every handler and preprocessor owned by `parent_module`.
    ///
    /// Returns the number of registrations removed.
    pub fn remove_module(&mut self, parent_module: &str) -> usize {
        let before = self.handlers.len() + self.preprocessors.len();
        self.handlers
            .retain(|handler| handler.parent_module != parent_module);
        self.preprocessors
            .retain(|preprocessor| preprocessor.parent_module != parent_module);
        before - (self.handlers.len() + self.preprocessors.len())
    }
}
