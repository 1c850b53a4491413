//! Echo module: answers every `echo.message` with the data it carried.
//!
//! Events created:
//!
//! * `echo.message` - replies `{"event":"echo.message","data":<data>}`;
//!   vetoed while the runtime setting `echo.muted` is `"true"`
//! * `echo.shutdown` - asks the runtime to stop, only when
//!   `echo.allow_shutdown` is `"true"`
//!
//! It also greets every new connection with `{"event":"echo.welcome", ...}`.

use conduit_event_system::{
    declare_module, ClientMessage, ConnectionEvent, LogLevel, Module, ModuleContext, ModuleError, RuntimeCommand,
    CONNECTION_OPENED_EVENT,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const MODULE_NAME: &str = "echo";
pub const ECHO_EVENT: &str = "echo.message";
pub const SHUTDOWN_EVENT: &str = "echo.shutdown";
pub const MUTED_SETTING: &str = "echo.muted";
pub const ALLOW_SHUTDOWN_SETTING: &str = "echo.allow_shutdown";

#[derive(Debug, Default)]
pub struct Echo {
    echoed: Arc<AtomicU64>,
    /// Kept from instantiation so shutdown can log through the runtime.
    context: Option<ModuleContext>,
}

impl Echo {
    pub fn echoed(&self) -> u64 {
        self.echoed.load(Ordering::Relaxed)
    }
}

impl Module for Echo {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn instantiate(&mut self, context: &ModuleContext) -> Result<(), ModuleError> {
        let events = context.events();

        if !events.create_event(ECHO_EVENT, MODULE_NAME) {
            return Err(ModuleError::Registration(format!("event '{ECHO_EVENT}' already exists")));
        }
        if !events.create_event(SHUTDOWN_EVENT, MODULE_NAME) {
            return Err(ModuleError::Registration(format!("event '{SHUTDOWN_EVENT}' already exists")));
        }

        let settings = context.settings();
        events.register_preprocessor_for_event(
            ECHO_EVENT,
            MODULE_NAME,
            move |_| settings.get(MUTED_SETTING).as_deref() != Some("true"),
            0,
        );

        let echoed = self.echoed.clone();
        let log = context.clone();
        events.register_for_event(
            ECHO_EVENT,
            MODULE_NAME,
            move |event, data| {
                let Some(message) = data.and_then(|d| d.downcast_ref::<ClientMessage>()) else {
                    return;
                };
                let reply = serde_json::json!({ "event": event, "data": message.data });
                match message.connection.respond_json(&reply) {
                    Ok(()) => {
                        echoed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => log.log(
                        LogLevel::Warn,
                        &format!("⚠️ Echo to connection {} failed: {}", message.connection.connection_id, e),
                    ),
                }
            },
            0,
        );

        let settings = context.settings();
        let commands = context.commands();
        let log = context.clone();
        events.register_for_event(
            SHUTDOWN_EVENT,
            MODULE_NAME,
            move |_, data| {
                let requester = data
                    .and_then(|d| d.downcast_ref::<ClientMessage>())
                    .map(|m| m.connection.connection_id);
                if settings.get(ALLOW_SHUTDOWN_SETTING).as_deref() == Some("true") {
                    log.log(LogLevel::Info, &format!("🛑 Shutdown requested by connection {requester:?}"));
                    commands.push(RuntimeCommand::Shutdown);
                } else {
                    log.log(
                        LogLevel::Warn,
                        &format!("⚠️ Refused shutdown request from connection {requester:?}"),
                    );
                }
            },
            0,
        );

        let log = context.clone();
        let registered = events.register_for_event(
            CONNECTION_OPENED_EVENT,
            MODULE_NAME,
            move |_, data| {
                if let Some(opened) = data.and_then(|d| d.downcast_ref::<ConnectionEvent>()) {
                    let welcome = serde_json::json!({
                        "event": "echo.welcome",
                        "connection": opened.connection.connection_id,
                    });
                    if let Err(e) = opened.connection.respond_json(&welcome) {
                        log.log(LogLevel::Debug, &format!("Welcome not sent: {e}"));
                    }
                }
            },
            10,
        );
        if !registered {
            context.log(
                LogLevel::Debug,
                &format!("No '{CONNECTION_OPENED_EVENT}' event on this bus, skipping welcome messages"),
            );
        }

        context.log(LogLevel::Info, "🔊 Echo module ready");
        self.context = Some(context.clone());
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(context) = self.context.take() {
            context.log(
                LogLevel::Info,
                &format!("🔊 Echo module stopping after {} echo(es)", self.echoed()),
            );
        }
    }
}

declare_module!(Echo);

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_event_system::{
        ClientConnectionRef, ClientResponseSender, CommandQueue, ConnectionId, EventHandling, ModuleLog,
        RuntimeSettings, ShutdownState,
    };
    use std::sync::Mutex;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(ConnectionId, serde_json::Value)>>,
    }

    impl ClientResponseSender for Outbox {
        fn send_to_connection(&self, connection_id: ConnectionId, data: Vec<u8>) -> Result<(), String> {
            let value = serde_json::from_slice(&data).map_err(|e| e.to_string())?;
            self.sent.lock().unwrap().push((connection_id, value));
            Ok(())
        }

        fn close_connection(&self, _connection_id: ConnectionId, _reason: Option<String>) -> Result<(), String> {
            Ok(())
        }

        fn is_connection_active(&self, _connection_id: ConnectionId) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct LogBook {
        lines: Mutex<Vec<(LogLevel, String)>>,
    }

    impl ModuleLog for LogBook {
        fn log(&self, level: LogLevel, message: &str) {
            self.lines.lock().unwrap().push((level, message.to_string()));
        }
    }

    impl LogBook {
        fn contains(&self, level: LogLevel, needle: &str) -> bool {
            self.lines
                .lock()
                .unwrap()
                .iter()
                .any(|(l, line)| *l == level && line.contains(needle))
        }
    }

    struct Fixture {
        events: Arc<EventHandling>,
        settings: Arc<RuntimeSettings>,
        commands: CommandQueue,
        outbox: Arc<Outbox>,
        log: Arc<LogBook>,
        module: Echo,
    }

    fn fixture() -> Fixture {
        let events = Arc::new(EventHandling::new());
        events.create_event(CONNECTION_OPENED_EVENT, "runtime");
        let settings = Arc::new(RuntimeSettings::new());
        let commands = CommandQueue::new();
        let log = Arc::new(LogBook::default());
        let context = ModuleContext::new(events.clone(), settings.clone(), ShutdownState::new(), commands.clone())
            .with_log(log.clone());

        let mut module = Echo::default();
        module.instantiate(&context).unwrap();

        Fixture {
            events,
            settings,
            commands,
            outbox: Arc::new(Outbox::default()),
            log,
            module,
        }
    }

    fn message(fixture: &Fixture, event: &str, data: serde_json::Value) -> ClientMessage {
        ClientMessage {
            connection: ClientConnectionRef::new(3, "127.0.0.1:50000".parse().unwrap(), 0, fixture.outbox.clone()),
            event: event.to_string(),
            data,
        }
    }

    #[test]
    fn test_echoes_message_data() {
        let fixture = fixture();
        let msg = message(&fixture, ECHO_EVENT, serde_json::json!({ "text": "hi" }));

        assert!(fixture.events.trigger_event_with(ECHO_EVENT, &msg));
        assert_eq!(
            *fixture.outbox.sent.lock().unwrap(),
            vec![(3, serde_json::json!({ "event": "echo.message", "data": { "text": "hi" } }))]
        );
        assert_eq!(fixture.module.echoed(), 1);
    }

    #[test]
    fn test_muted_setting_vetoes_echo() {
        let fixture = fixture();
        fixture.settings.set(MUTED_SETTING, "true");

        let msg = message(&fixture, ECHO_EVENT, serde_json::json!("ignored"));
        assert!(!fixture.events.trigger_event_with(ECHO_EVENT, &msg));
        assert!(fixture.outbox.sent.lock().unwrap().is_empty());
        assert_eq!(fixture.module.echoed(), 0);
    }

    #[test]
    fn test_shutdown_requires_permission() {
        let fixture = fixture();
        let msg = message(&fixture, SHUTDOWN_EVENT, serde_json::Value::Null);

        fixture.events.trigger_event_with(SHUTDOWN_EVENT, &msg);
        assert!(fixture.commands.is_empty());

        fixture.settings.set(ALLOW_SHUTDOWN_SETTING, "true");
        fixture.events.trigger_event_with(SHUTDOWN_EVENT, &msg);
        assert_eq!(fixture.commands.drain(), vec![RuntimeCommand::Shutdown]);
    }

    #[test]
    fn test_welcomes_new_connections() {
        let fixture = fixture();
        let opened = ConnectionEvent {
            connection: ClientConnectionRef::new(9, "127.0.0.1:50001".parse().unwrap(), 0, fixture.outbox.clone()),
        };

        fixture.events.trigger_event_with(CONNECTION_OPENED_EVENT, &opened);
        assert_eq!(
            *fixture.outbox.sent.lock().unwrap(),
            vec![(9, serde_json::json!({ "event": "echo.welcome", "connection": 9 }))]
        );
    }

    #[test]
    fn test_second_instance_is_refused() {
        let fixture = fixture();
        let context = ModuleContext::new(
            fixture.events.clone(),
            fixture.settings.clone(),
            ShutdownState::new(),
            fixture.commands.clone(),
        );
        assert!(matches!(
            Echo::default().instantiate(&context),
            Err(ModuleError::Registration(_))
        ));
    }

    #[test]
    fn test_unregistering_removes_every_registration() {
        let fixture = fixture();
        fixture.events.unregister_module(MODULE_NAME);
        fixture.events.unregister_events(MODULE_NAME);

        assert!(!fixture.events.has_event(ECHO_EVENT));
        assert!(fixture.events.has_event(CONNECTION_OPENED_EVENT));
        let opened = ConnectionEvent {
            connection: ClientConnectionRef::new(9, "127.0.0.1:50001".parse().unwrap(), 0, fixture.outbox.clone()),
        };
        fixture.events.trigger_event_with(CONNECTION_OPENED_EVENT, &opened);
        assert!(fixture.outbox.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_logs_through_the_runtime_sink() {
        let mut fixture = fixture();
        assert!(fixture.log.contains(LogLevel::Info, "Echo module ready"));

        let msg = message(&fixture, SHUTDOWN_EVENT, serde_json::Value::Null);
        fixture.events.trigger_event_with(SHUTDOWN_EVENT, &msg);
        assert!(fixture.log.contains(LogLevel::Warn, "Refused shutdown request from connection Some(3)"));

        fixture.module.shutdown();
        assert!(fixture.log.contains(LogLevel::Info, "stopping after 0 echo(es)"));
    }
}
