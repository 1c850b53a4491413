//! Subscriber installation for the runtime and the modules it hosts.
//!
//! Modules never install a subscriber of their own. Their lines arrive through
//! `ModuleContext::log` under the `conduit::module` target, so one filter
//! governs both.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Builds the level filter. A non-empty `RUST_LOG` value wins over the
/// configured level.
fn level_filter(configured: &str, env: Option<&str>) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    match env.map(str::trim).filter(|directives| !directives.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives),
        None => EnvFilter::try_new(configured),
    }
}

/// Installs the global subscriber: JSON lines when either the configuration
/// or `--json-logs` asks for it, coloured text otherwise.
pub fn setup_logging(config: &LoggingSettings, json_format: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = level_filter(&config.level, env.as_deref())?;

    let json = json_format || config.json_format;
    let json_layer = json.then(|| fmt::layer().json().with_target(true).with_thread_names(true));
    let text_layer = (!json).then(|| fmt::layer().with_ansi(true).with_target(true).with_thread_names(true));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()?;

    info!("🔧 Logging at '{}' ({})", config.level, if json { "json" } else { "text" });
    Ok(())
}

/// Logs the one-line startup banner.
pub fn display_banner() {
    info!("🔌 Conduit {} starting", env!("CARGO_PKG_VERSION"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_level_is_used_without_env() {
        let filter = level_filter("debug", None).unwrap();
        assert!(filter.to_string().contains("debug"));

        let filter = level_filter("warn", Some("   ")).unwrap();
        assert!(filter.to_string().contains("warn"));
    }

    #[test]
    fn test_env_directives_take_precedence() {
        let filter = level_filter("info", Some("conduit::module=trace")).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("conduit::module=trace"));
        assert!(!rendered.contains("info"));
    }

    #[test]
    fn test_malformed_directive_is_an_error() {
        assert!(level_filter("info", Some("conduit=notalevel")).is_err());
    }
}
