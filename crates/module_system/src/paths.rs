//! Module discovery on disk.

use conduit_event_system::{RuntimeSettings, CORE_ROOT_KEY, PROJECT_ROOT_KEY};
use std::path::{Path, PathBuf};

/// File extension of module libraries.
pub const MODULE_EXTENSION: &str = "so";

/// Returns the last path component with a trailing `.so` removed.
///
/// ```rust
/// use module_system::get_basename;
///
/// assert_eq!(get_basename("/srv/app/modules/src/echo.so"), "echo");
/// assert_eq!(get_basename("echo"), "echo");
/// ```
pub fn get_basename(path: impl AsRef<Path>) -> String {
    let file_name = path
        .as_ref()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    match file_name.strip_suffix(".so") {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => file_name,
    }
}

/// Module names become file names, so empty names, `.`, `..` and names with
/// path separators are refused.
pub fn is_valid_module_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\', '\0']) && name != "." && name != ".."
}

/// Where a module named `name` lives under `root`.
pub fn module_library_path(root: &Path, name: &str) -> PathBuf {
    root.join("modules")
        .join("src")
        .join(format!("{name}.{MODULE_EXTENSION}"))
}

/// The two directories searched for module libraries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleRoots {
    pub core_root: Option<PathBuf>,
    pub project_root: Option<PathBuf>,
}

impl ModuleRoots {
    pub fn new(core_root: Option<PathBuf>, project_root: Option<PathBuf>) -> Self {
        Self { core_root, project_root }
    }

    /// Reads the roots from the `core_root` and `project_root` runtime settings.
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            core_root: settings.get(CORE_ROOT_KEY).map(PathBuf::from),
            project_root: settings.get(PROJECT_ROOT_KEY).map(PathBuf::from),
        }
    }

    /// Returns the root holding `<root>/modules/src/<name>.so`.
    ///
    /// The core root is checked first and wins when both contain the module.
    /// Invalid module names never resolve.
    pub fn determine_module_root(&self, name: &str) -> Option<PathBuf> {
        if !is_valid_module_name(name) {
            return None;
        }
        [&self.core_root, &self.project_root]
            .into_iter()
            .flatten()
            .find(|root| module_library_path(root, name).is_file())
            .cloned()
    }
}
