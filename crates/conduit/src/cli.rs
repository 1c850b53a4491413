//! Command-line interface handling for the Conduit runtime.
//!
//! Every option overrides the matching configuration file setting.

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

/// Configuration file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "conduit.toml";

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the core module root
    pub core_root: Option<PathBuf>,
    /// Optional override for the project module root
    pub project_root: Option<PathBuf>,
    /// Listeners replacing the configured ones (`ADDRESS:PORT`)
    pub listeners: Vec<String>,
    /// Modules loaded in addition to the configured autoload list
    pub modules: Vec<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    /// Builds the clap command describing every option.
    pub fn command() -> Command {
        Command::new("Conduit")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Event-driven network service runtime with dynamically loaded modules")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value(DEFAULT_CONFIG_PATH),
            )
            .arg(
                Arg::new("core-root")
                    .long("core-root")
                    .value_name("DIR")
                    .help("Core root; modules are found under <DIR>/modules/src"),
            )
            .arg(
                Arg::new("project-root")
                    .long("project-root")
                    .value_name("DIR")
                    .help("Project root, searched after the core root"),
            )
            .arg(
                Arg::new("listen")
                    .long("listen")
                    .value_name("ADDRESS:PORT")
                    .help("IPv4 listener, may be repeated (e.g., 127.0.0.1:9000)")
                    .action(ArgAction::Append),
            )
            .arg(
                Arg::new("module")
                    .short('m')
                    .long("module")
                    .value_name("NAME")
                    .help("Module to load at startup, may be repeated")
                    .action(ArgAction::Append),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(ArgAction::SetTrue),
            )
    }

    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&Self::command().get_matches())
    }

    /// Parses an explicit argument list.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&Self::command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        let many = |id: &str| -> Vec<String> {
            matches
                .get_many::<String>(id)
                .map(|values| values.cloned().collect())
                .unwrap_or_default()
        };

        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            core_root: matches.get_one::<String>("core-root").map(PathBuf::from),
            project_root: matches.get_one::<String>("project-root").map(PathBuf::from),
            listeners: many("listen"),
            modules: many("module"),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}
