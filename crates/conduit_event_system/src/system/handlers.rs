/// Handler and preprocessor registration methods
use crate::event::{EventData, EventHandler, EventPreprocessor};
use super::core::EventHandling;
use std::sync::Arc;
use tracing::{debug, info};

impl EventHandling {
    /// Registers a handler for an existing event.
    ///
    /// Handlers run in ascending `priority`; handlers sharing a priority run in
    /// registration order. Returns `false` if the event does not exist.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use conduit_event_system::EventHandling;
    ///
    /// let events = EventHandling::new();
    /// events.create_event("chat.message", "chat");
    /// let registered = events.register_for_event("chat.message", "logger", |name, _data| {
    ///     println!("{name} fired");
    /// }, 10);
    /// assert!(registered);
    /// ```
    pub fn register_for_event<F>(&self, name: &str, parent_module: &str, callback: F, priority: i32) -> bool
    where
        F: Fn(&str, EventData<'_>) + Send + Sync + 'static,
    {
        match self.events.get_mut(name) {
            Some(mut event) => {
                event.add_handler(EventHandler::new(parent_module, priority, Arc::new(callback)));
                debug!("📝 '{}' registered handler for '{}' (priority {})", parent_module, name, priority);
                true
            }
            None => {
                debug!("Cannot register handler: event '{}' does not exist", name);
                false
            }
        }
    }

    /// Registers a preprocessor (veto gate) for an existing event.
    ///
    /// Preprocessors are checked in ascending `priority`, ties in registration
    /// order. The first one returning `false` suppresses the dispatch.
    pub fn register_preprocessor_for_event<F>(
        &self,
        name: &str,
        parent_module: &str,
        callback: F,
        priority: i32,
    ) -> bool
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        match self.events.get_mut(name) {
            Some(mut event) => {
                event.add_preprocessor(EventPreprocessor::new(parent_module, priority, Arc::new(callback)));
                debug!("📝 '{}' registered preprocessor for '{}' (priority {})", parent_module, name, priority);
                true
            }
            None => {
                debug!("Cannot register preprocessor: event '{}' does not exist", name);
                false
            }
        }
    }

    /// Removes the first handler `parent_module` registered for `name`.
    pub fn unregister_for_event(&self, name: &str, parent_module: &str) -> bool {
        self.events
            .get_mut(name)
            .map(|mut event| event.remove_handler(parent_module))
            .unwrap_or(false)
    }

    /// Removes the first preprocessor `parent_module` registered for `name`.
    pub fn unregister_preprocessor_for_event(&self, name: &str, parent_module: &str) -> bool {
        self.events
            .get_mut(name)
            .map(|mut event| event.remove_preprocessor(parent_module))
            .unwrap_or(false)
    }

    /// Destroys every event created by `parent_module`.
    ///
    /// Returns `true` if at least one event was removed.
    pub fn unregister_events(&self, parent_module: &str) -> bool {
        let before = self.events.len();
        self.events
            .retain(|_, event| event.parent_module() != parent_module);
        let removed = before - self.events.len();
        if removed > 0 {
            info!("🗑️ Destroyed {} event(s) owned by '{}'", removed, parent_module);
        }
        removed > 0
    }

    /// Removes every handler and preprocessor owned by `parent_module` from all events.
    ///
    /// Events themselves are left in place, including those the module created.
    /// Returns `true` if any registration was removed.
    pub fn unregister_module(&self, parent_module: &str) -> bool {
        let mut removed = 0;
        for mut event in self.events.iter_mut() {
            removed += event.remove_module(parent_module);
        }
        if removed > 0 {
            info!("🧹 Removed {} registration(s) owned by '{}'", removed, parent_module);
        }
        removed > 0
    }
}
