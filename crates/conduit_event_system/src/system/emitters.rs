/// Event dispatch and inbound message routing
use crate::client::ClientConnectionRef;
use crate::error::EventError;
use crate::event::EventData;
use crate::framing::ClientMessage;
use super::core::EventHandling;
use super::stats::Counters;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, trace};

/// A connection whose inbound bytes can be framed by [`EventHandling::receive_data`].
pub trait MessageSource {
    /// Reference handed to handlers so they can answer the sender.
    fn connection_ref(&self) -> ClientConnectionRef;

    /// Accumulated bytes not yet consumed by framing.
    fn receive_buffer(&mut self) -> &mut Vec<u8>;
}

impl EventHandling {
    /// Triggers a named event.
    ///
    /// Preprocessors run first, in order; the first one returning `false`
    /// stops the chain and no handler runs. Otherwise every handler runs in
    /// ascending priority with the event name and `data`.
    ///
    /// Returns `false` if the event does not exist or was vetoed, `true` once
    /// handlers have run. A panicking handler is logged and skipped; a
    /// panicking preprocessor counts as a veto.
    pub fn trigger_event(&self, name: &str, data: EventData<'_>) -> bool {
        // Snapshot the registrations so callbacks may re-enter the bus.
        let (preprocessors, handlers) = match self.events.get(name) {
            Some(event) => (event.preprocessors().to_vec(), event.handlers().to_vec()),
            None => {
                Counters::bump(&self.counters.missed);
                debug!("Triggered unknown event '{}'", name);
                return false;
            }
        };

        for preprocessor in &preprocessors {
            let allowed = catch_unwind(AssertUnwindSafe(|| preprocessor.call(name)))
                .unwrap_or_else(|panic_info| {
                    Counters::bump(&self.counters.panics);
                    error!(
                        "❌ Preprocessor from '{}' panicked on '{}': {}",
                        preprocessor.parent_module(),
                        name,
                        panic_message(panic_info.as_ref())
                    );
                    false
                });
            if !allowed {
                Counters::bump(&self.counters.vetoed);
                debug!("🚫 '{}' vetoed by '{}'", name, preprocessor.parent_module());
                return false;
            }
        }

        for handler in &handlers {
            Counters::bump(&self.counters.invocations);
            if let Err(panic_info) = catch_unwind(AssertUnwindSafe(|| handler.call(name, data))) {
                Counters::bump(&self.counters.panics);
                error!(
                    "❌ Handler from '{}' panicked on '{}': {}",
                    handler.parent_module(),
                    name,
                    panic_message(panic_info.as_ref())
                );
            }
        }

        Counters::bump(&self.counters.delivered);
        trace!("📤 '{}' delivered to {} handler(s)", name, handlers.len());
        true
    }

    /// Triggers an event carrying a typed payload.
    pub fn trigger_event_with<T: Any>(&self, name: &str, data: &T) -> bool {
        self.trigger_event(name, Some(data as &dyn Any))
    }

    /// Appends `data` to the connection's receive buffer and dispatches every complete message.
    ///
    /// Each message triggers the event named in its envelope with a
    /// [`ClientMessage`] as event data. Consumed bytes are removed from the
    /// buffer; a trailing partial message stays for the next read.
    ///
    /// Returns the number of messages extracted, or `MessageTooLarge` when the
    /// connection sent more than the framing limit without a delimiter.
    pub fn receive_data(&self, connection: &mut dyn MessageSource, data: &[u8]) -> Result<usize, EventError> {
        let buffer = connection.receive_buffer();
        buffer.extend_from_slice(data);
        let envelopes = self.framer.extract(buffer)?;
        if envelopes.is_empty() {
            return Ok(0);
        }

        let origin = connection.connection_ref();
        let count = envelopes.len();
        for envelope in envelopes {
            let message = ClientMessage {
                connection: origin.clone(),
                event: envelope.event,
                data: envelope.data,
            };
            if !self.trigger_event_with(&message.event, &message) {
                debug!(
                    "Message '{}' from connection {} was not delivered",
                    message.event, origin.connection_id
                );
            }
        }
        Ok(count)
    }
}

fn panic_message(panic_info: &(dyn Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
