//! Process-wide key/value settings shared with modules.
//!
//! Seeded from the `[runtime]` table of the configuration file. Modules read
//! them through their [`ModuleContext`](crate::ModuleContext).

use dashmap::DashMap;
use std::str::FromStr;

/// Well-known key holding the core module root.
pub const CORE_ROOT_KEY: &str = "core_root";
/// Well-known key holding the project module root.
pub const PROJECT_ROOT_KEY: &str = "project_root";

#[derive(Debug, Default)]
pub struct RuntimeSettings {
    values: DashMap<String, String>,
}

impl RuntimeSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|value| value.clone())
    }

    /// Returns the value parsed as `T`, or `None` when missing or unparsable.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.values.get(key).and_then(|value| value.parse().ok())
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Stores a value, returning the previous one if any.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.values.insert(key.into(), value.into())
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.values.remove(key).map(|(_, value)| value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RuntimeSettings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let settings = Self::new();
        for (key, value) in iter {
            settings.set(key, value);
        }
        settings
    }
}
