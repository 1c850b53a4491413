//! Configuration management for the Conduit runtime.
//!
//! This module handles loading, validation, and conversion of runtime
//! configuration from TOML files and command-line arguments.

use crate::cli::CliArgs;
use conduit_event_system::{RuntimeSettings, CORE_ROOT_KEY, DEFAULT_MAX_MESSAGE_SIZE, PROJECT_ROOT_KEY};
use serde::{Deserialize, Serialize};
use module_system::is_valid_module_name;
use service_runtime::{ListenAddress, ServerConfig, ServerError, SocketManagement, DEFAULT_MAX_PENDING_OUTPUT};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listener and framing settings
    pub server: ServerSettings,
    /// Module roots and the startup load list
    pub modules: ModuleSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
    /// Free-form key/value settings handed to modules
    #[serde(default)]
    pub runtime: BTreeMap<String, String>,
}

/// Network settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Listening sockets as `ADDRESS:PORT` (e.g., "127.0.0.1:9000")
    pub listeners: Vec<String>,
    /// Largest message a client may send, in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Unsent bytes a connection may hold before it is closed
    #[serde(default = "default_max_pending_output")]
    pub max_pending_output: usize,
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_max_pending_output() -> usize {
    DEFAULT_MAX_PENDING_OUTPUT
}

/// Where modules are looked up and which ones load at startup.
///
/// A module named `chat` is found at `<root>/modules/src/chat.so`, trying the
/// core root before the project root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSettings {
    pub core_root: Option<String>,
    pub project_root: Option<String>,
    /// Modules loaded in order at startup
    #[serde(default)]
    pub autoload: Vec<String>,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                listeners: vec!["127.0.0.1:9000".to_string()],
                max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
                max_pending_output: DEFAULT_MAX_PENDING_OUTPUT,
            },
            modules: ModuleSettings {
                core_root: Some(".".to_string()),
                project_root: None,
                autoload: Vec::new(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
            runtime: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, a default configuration file is written at
    /// `path` and the defaults are returned.
    pub fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            std::fs::write(path, toml_content)?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides.
    ///
    /// `--listen` replaces the configured listeners; `--module` appends to the
    /// autoload list, skipping names already present.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(core_root) = &args.core_root {
            self.modules.core_root = Some(core_root.to_string_lossy().to_string());
        }
        if let Some(project_root) = &args.project_root {
            self.modules.project_root = Some(project_root.to_string_lossy().to_string());
        }
        if !args.listeners.is_empty() {
            self.server.listeners = args.listeners.clone();
        }
        for module in &args.modules {
            if !self.modules.autoload.contains(module) {
                self.modules.autoload.push(module.clone());
            }
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.listeners.is_empty() {
            return Err("At least one listener is required".to_string());
        }
        for listener in &self.server.listeners {
            let parsed: ListenAddress = listener.parse().map_err(|e: ServerError| e.to_string())?;
            if !SocketManagement::is_valid_ip(&parsed.address) {
                return Err(format!("Invalid IPv4 address in listener: {listener}"));
            }
        }

        if self.server.max_message_size == 0 {
            return Err("server.max_message_size must be greater than 0".to_string());
        }
        if self.server.max_pending_output == 0 {
            return Err("server.max_pending_output must be greater than 0".to_string());
        }

        let roots = [&self.modules.core_root, &self.modules.project_root];
        if roots.iter().any(|root| matches!(root, Some(r) if r.trim().is_empty())) {
            return Err("Module roots cannot be empty".to_string());
        }
        if !self.modules.autoload.is_empty() && roots.iter().all(|root| root.is_none()) {
            return Err("Autoloading modules requires a core_root or project_root".to_string());
        }
        if let Some(name) = self.modules.autoload.iter().find(|name| !is_valid_module_name(name)) {
            return Err(format!("Invalid module name: '{name}'"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }

    /// Converts the listener section into the runtime's configuration.
    pub fn to_server_config(&self) -> Result<ServerConfig, ServerError> {
        let listeners = self
            .server
            .listeners
            .iter()
            .map(|listener| listener.parse())
            .collect::<Result<Vec<ListenAddress>, _>>()?;
        Ok(ServerConfig {
            listeners,
            max_message_size: self.server.max_message_size,
            max_pending_output: self.server.max_pending_output,
        })
    }

    /// Builds the settings store modules see: the `[runtime]` table plus the
    /// module roots under their well-known keys.
    pub fn to_runtime_settings(&self) -> RuntimeSettings {
        let settings: RuntimeSettings = self.runtime.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        if let Some(core_root) = &self.modules.core_root {
            settings.set(CORE_ROOT_KEY, core_root.clone());
        }
        if let Some(project_root) = &self.modules.project_root {
            settings.set(PROJECT_ROOT_KEY, project_root.clone());
        }
        settings
    }
}
