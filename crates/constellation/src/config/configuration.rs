// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The satellite configuration container.
//!
//! Keys are case-insensitive and stored lower-case. Every entry carries a
//! `used` flag flipped when the entry is read; after `initializing` the
//! satellite warns about keys that were never consumed and persists only the
//! used ones. Keys with a leading underscore are reserved for the framework.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::value::{FromValue, IntoValue, Value};
use crate::config::Dictionary;

/// Key group filter for bulk operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    /// All key-value pairs, both user and internal.
    All,
    /// Keys intended for framework users.
    User,
    /// Framework-reserved keys (leading underscore).
    Internal,
}

/// Usage filter for bulk operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    /// Both used and unused key-value pairs.
    Any,
    /// Only key-value pairs that have been read.
    Used,
    /// Only key-value pairs that have never been read.
    Unused,
}

/// Errors raised by typed configuration access.
#[derive(Debug)]
pub enum ConfigError {
    /// The requested key is not defined.
    MissingKey(String),
    /// The stored value cannot be converted to the requested type.
    InvalidType { key: String, expected: &'static str, actual: &'static str },
    /// The value converted but does not satisfy a constraint.
    InvalidValue { key: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingKey(key) => write!(f, "Key '{key}' does not exist"),
            ConfigError::InvalidType { key, expected, actual } => {
                write!(f, "Key '{key}' holds a {actual}, requested {expected}")
            }
            ConfigError::InvalidValue { key, reason } => {
                write!(f, "Value of key '{key}' is not valid: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

struct Entry {
    value: Value,
    used: AtomicBool,
}

impl Entry {
    fn new(value: Value, used: bool) -> Self {
        Entry { value, used: AtomicBool::new(used) }
    }

    fn mark_used(&self) {
        self.used.store(true, Ordering::Relaxed);
    }

    fn is_used(&self) -> bool {
        self.used.load(Ordering::Relaxed)
    }
}

/// Case-folded key/value store with usage tracking.
#[derive(Default)]
pub struct Configuration {
    entries: std::collections::BTreeMap<String, Entry>,
}

impl Configuration {
    pub fn new() -> Self {
        Configuration::default()
    }

    /// Build a configuration from a wire dictionary.
    pub fn from_dictionary(dict: Dictionary, mark_used: bool) -> Self {
        let mut config = Configuration::new();
        for (key, value) in dict {
            config.entries.insert(key.to_lowercase(), Entry::new(value, mark_used));
        }
        config
    }

    /// Check if a key is defined (case-insensitive).
    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_lowercase())
    }

    /// Count how many of the given keys are defined.
    ///
    /// Useful to detect conflicting alternatives being set at once.
    pub fn count(&self, keys: &[&str]) -> usize {
        keys.iter().filter(|key| self.has(key)).count()
    }

    /// Read a key as type `T`, marking it used.
    pub fn get<T: FromValue>(&self, key: &str) -> Result<T, ConfigError> {
        let folded = key.to_lowercase();
        let entry = self
            .entries
            .get(&folded)
            .ok_or_else(|| ConfigError::MissingKey(folded.clone()))?;
        entry.mark_used();
        T::from_value(&entry.value).ok_or_else(|| ConfigError::InvalidType {
            key: folded,
            expected: T::EXPECTED,
            actual: entry.value.type_name(),
        })
    }

    /// Read a key as type `T`, inserting `def` first when the key is absent.
    pub fn get_or<T>(&mut self, key: &str, def: T) -> Result<T, ConfigError>
    where
        T: FromValue + IntoValue,
    {
        self.set_default(key, def);
        self.get(key)
    }

    /// Read an array-valued key.
    pub fn get_array<T>(&self, key: &str) -> Result<Vec<T>, ConfigError>
    where
        Vec<T>: FromValue,
    {
        self.get::<Vec<T>>(key)
    }

    /// Read an array-valued key, inserting `def` first when absent.
    pub fn get_array_or<T>(&mut self, key: &str, def: Vec<T>) -> Result<Vec<T>, ConfigError>
    where
        Vec<T>: FromValue + IntoValue,
    {
        self.set_default(key, def);
        self.get::<Vec<T>>(key)
    }

    /// Render the stored value as text, marking the key used.
    pub fn get_text(&self, key: &str) -> Result<String, ConfigError> {
        let folded = key.to_lowercase();
        let entry = self
            .entries
            .get(&folded)
            .ok_or_else(|| ConfigError::MissingKey(folded))?;
        entry.mark_used();
        Ok(entry.value.to_string())
    }

    /// Read a path, resolved to an absolute path.
    ///
    /// With `check_exists` the path is canonicalized, which fails when it
    /// does not exist on the filesystem.
    pub fn get_path(&self, key: &str, check_exists: bool) -> Result<PathBuf, ConfigError> {
        let path: PathBuf = self.get(key)?;
        self.resolve_path(key, path, check_exists)
    }

    /// Read an array of paths, each resolved like [`Configuration::get_path`].
    pub fn get_path_array(
        &self,
        key: &str,
        check_exists: bool,
    ) -> Result<Vec<PathBuf>, ConfigError> {
        let paths: Vec<PathBuf> = self.get(key)?;
        paths
            .into_iter()
            .map(|p| self.resolve_path(key, p, check_exists))
            .collect()
    }

    fn resolve_path(
        &self,
        key: &str,
        path: PathBuf,
        check_exists: bool,
    ) -> Result<PathBuf, ConfigError> {
        let absolute = if path.is_absolute() {
            path
        } else {
            match std::env::current_dir() {
                Ok(cwd) => cwd.join(path),
                Err(e) => {
                    return Err(ConfigError::InvalidValue {
                        key: key.to_lowercase(),
                        reason: format!("cannot resolve relative path: {e}"),
                    })
                }
            }
        };
        if check_exists {
            absolute.canonicalize().map_err(|e| ConfigError::InvalidValue {
                key: key.to_lowercase(),
                reason: format!("path {} not accessible: {e}", absolute.display()),
            })
        } else {
            Ok(absolute)
        }
    }

    /// Insert or overwrite a key.
    pub fn set<T: IntoValue>(&mut self, key: &str, value: T, mark_used: bool) {
        self.entries
            .insert(key.to_lowercase(), Entry::new(value.into_value(), mark_used));
    }

    /// Insert a key only if it is not defined yet. Never overwrites and does
    /// not mark the key used.
    pub fn set_default<T: IntoValue>(&mut self, key: &str, value: T) {
        self.entries
            .entry(key.to_lowercase())
            .or_insert_with(|| Entry::new(value.into_value(), false));
    }

    /// Create an alias: if `new_key` is absent and `old_key` present, copy
    /// the old value under the new name and mark the old key used.
    pub fn set_alias(&mut self, new_key: &str, old_key: &str, warn: bool) {
        let new_folded = new_key.to_lowercase();
        let old_folded = old_key.to_lowercase();
        if self.entries.contains_key(&new_folded) {
            return;
        }
        if let Some(old_entry) = self.entries.get(&old_folded) {
            old_entry.mark_used();
            let value = old_entry.value.clone();
            if warn {
                log::warn!(
                    "[config] Key '{old_folded}' is deprecated, use '{new_folded}' instead"
                );
            }
            self.entries.insert(new_folded, Entry::new(value, false));
        }
    }

    /// Copy every used key-value pair of `other` into this configuration,
    /// overwriting existing entries.
    pub fn update(&mut self, other: &Configuration) {
        for (key, entry) in &other.entries {
            if entry.is_used() {
                self.entries
                    .insert(key.clone(), Entry::new(entry.value.clone(), true));
            }
        }
    }

    /// Number of entries matching the given filters.
    pub fn size(&self, group: Group, usage: Usage) -> usize {
        self.filtered(group, usage).count()
    }

    /// Dictionary of the entries matching the given filters.
    pub fn get_dictionary(&self, group: Group, usage: Usage) -> Dictionary {
        self.filtered(group, usage)
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    /// Wire dictionary of the complete configuration.
    pub fn assemble(&self) -> Vec<u8> {
        self.get_dictionary(Group::All, Usage::Any).assemble()
    }

    fn filtered(
        &self,
        group: Group,
        usage: Usage,
    ) -> impl Iterator<Item = (&String, &Entry)> {
        self.entries.iter().filter(move |(key, entry)| {
            let group_ok = match group {
                Group::All => true,
                Group::Internal => key.starts_with('_'),
                Group::User => !key.starts_with('_'),
            };
            let usage_ok = match usage {
                Usage::Any => true,
                Usage::Used => entry.is_used(),
                Usage::Unused => !entry.is_used(),
            };
            group_ok && usage_ok
        })
    }
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_fold_to_lower_case() {
        let mut config = Configuration::new();
        config.set("Foo", 1i64, false);
        assert!(config.has("FOO"));
        assert!(config.has("foo"));
        assert_eq!(config.get::<i64>("FOO").expect("present"), 1);
    }

    #[test]
    fn reading_marks_used() {
        let mut config = Configuration::new();
        config.set("foo", 1i64, false);
        config.set("bar", 2i64, false);
        assert_eq!(config.size(Group::All, Usage::Used), 0);

        let _ = config.get::<i64>("FOO").expect("present");
        let used = config.get_dictionary(Group::All, Usage::Used);
        assert_eq!(used.len(), 1);
        assert!(used.contains_key("foo"));
        assert_eq!(config.size(Group::All, Usage::Unused), 1);
    }

    #[test]
    fn missing_and_mistyped_reads_fail() {
        let mut config = Configuration::new();
        config.set("num", 1i64, false);
        assert!(matches!(config.get::<i64>("nope"), Err(ConfigError::MissingKey(_))));
        assert!(matches!(
            config.get::<String>("num"),
            Err(ConfigError::InvalidType { .. })
        ));
    }

    #[test]
    fn set_default_never_overwrites() {
        let mut config = Configuration::new();
        config.set("key", 1i64, false);
        config.set_default("key", 99i64);
        assert_eq!(config.get::<i64>("key").expect("present"), 1);

        config.set_default("other", 7i64);
        assert_eq!(config.get::<i64>("other").expect("present"), 7);
    }

    #[test]
    fn get_or_fills_in_default() {
        let mut config = Configuration::new();
        assert_eq!(config.get_or("_bor_timeout", 10u64).expect("default"), 10);
        // the default is now present and marked used by the read
        assert_eq!(config.size(Group::Internal, Usage::Used), 1);
    }

    #[test]
    fn group_filters_split_on_underscore() {
        let mut config = Configuration::new();
        config.set("_eor_timeout", 1u64, false);
        config.set("rate", 5i64, false);
        assert_eq!(config.size(Group::Internal, Usage::Any), 1);
        assert_eq!(config.size(Group::User, Usage::Any), 1);
        assert_eq!(config.size(Group::All, Usage::Any), 2);
        assert!(config.get_dictionary(Group::Internal, Usage::Any).contains_key("_eor_timeout"));
    }

    #[test]
    fn update_copies_only_used_entries() {
        let mut base = Configuration::new();
        base.set("keep", 1i64, false);

        let mut partial = Configuration::new();
        partial.set("keep", 2i64, false);
        partial.set("ignored", 3i64, false);
        let _ = partial.get::<i64>("keep").expect("mark used");

        base.update(&partial);
        assert_eq!(base.get::<i64>("keep").expect("present"), 2);
        assert!(!base.has("ignored"));
    }

    #[test]
    fn alias_copies_and_marks_old_used() {
        let mut config = Configuration::new();
        config.set("old_name", 42i64, false);
        config.set_alias("new_name", "old_name", false);
        assert_eq!(config.get::<i64>("new_name").expect("aliased"), 42);
        let used = config.get_dictionary(Group::All, Usage::Used);
        assert!(used.contains_key("old_name"), "alias marks the old key used");
    }

    #[test]
    fn alias_does_not_overwrite_existing() {
        let mut config = Configuration::new();
        config.set("new_name", 1i64, false);
        config.set("old_name", 2i64, false);
        config.set_alias("new_name", "old_name", false);
        assert_eq!(config.get::<i64>("new_name").expect("present"), 1);
    }

    #[test]
    fn path_access_resolves_and_checks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("cfg.dat");
        std::fs::write(&file, b"x").expect("write");

        let mut config = Configuration::new();
        config.set("present", file.clone(), false);
        config.set("absent", dir.path().join("missing.dat"), false);

        let resolved = config.get_path("present", true).expect("exists");
        assert!(resolved.is_absolute());
        assert!(config.get_path("absent", false).is_ok());
        assert!(matches!(
            config.get_path("absent", true),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn dictionary_roundtrip_preserves_usage_semantics() {
        let mut dict = Dictionary::new();
        dict.insert("_heartbeat_interval", 2u64);
        dict.insert("device", "ttyUSB0");

        let config = Configuration::from_dictionary(dict, false);
        assert_eq!(config.size(Group::All, Usage::Unused), 2);
        assert_eq!(config.get::<String>("device").expect("present"), "ttyUSB0");
        assert_eq!(config.size(Group::All, Usage::Unused), 1);
    }
}
