//! Per-user named string values.
//!
//! The file-backed store keeps one file per (user, option) pair under
//! `<state_root>/users/<user>/<option>`, containing the raw value with no
//! trailing newline. Deleting a value removes its file.

use crate::errors::SessionError;
use crate::paths;
use std::collections::HashMap;
use std::fs::{self, DirBuilder};
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Mode for per-user state directories.
pub const USER_DIR_MODE: u32 = 0o755;

/// get/set/delete contract over (user, option).
pub trait ValueStore {
    /// Returns the stored value, or `None` when absent or unreadable.
    fn get(&self, user: &str, option: &str) -> Option<String>;

    /// Stores `value`, or deletes the entry when `value` is `None`.
    fn set(&self, user: &str, option: &str, value: Option<&str>) -> Result<(), SessionError>;

    /// Returns whether the option holds a truthy value.
    fn is_yes(&self, user: &str, option: &str) -> bool {
        is_yes(self.get(user, option).as_deref())
    }
}

/// Interprets a flag value. Absent values are false.
pub fn is_yes(value: Option<&str>) -> bool {
    match value {
        Some(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "yes" | "y" | "true" | "on" | "1"
        ),
        None => false,
    }
}

/// File-backed value store rooted at the service state directory.
#[derive(Debug, Clone)]
pub struct FileValueStore {
    state_root: PathBuf,
}

impl FileValueStore {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
        }
    }

    pub fn state_root(&self) -> &Path {
        &self.state_root
    }

    /// Lists users that have a state directory, sorted by name.
    pub fn users(&self) -> Vec<String> {
        let entries = match fs::read_dir(paths::users_dir(&self.state_root)) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut users: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        users.sort();
        users
    }
}

impl ValueStore for FileValueStore {
    fn get(&self, user: &str, option: &str) -> Option<String> {
        let path = paths::option_path(&self.state_root, user, option).ok()?;
        match fs::read_to_string(&path) {
            Ok(value) => Some(value),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                tracing::debug!(path = %path.display(), "cannot read value: {}", e);
                None
            }
        }
    }

    fn set(&self, user: &str, option: &str, value: Option<&str>) -> Result<(), SessionError> {
        let write_error = |message: String| SessionError::StoreWrite {
            user: user.to_string(),
            option: option.to_string(),
            message,
        };

        let dir = paths::user_state_dir(&self.state_root, user)?;
        let path = paths::option_path(&self.state_root, user, option)?;

        match value {
            None => match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(write_error(e.to_string())),
            },
            Some(value) => {
                DirBuilder::new()
                    .recursive(true)
                    .mode(USER_DIR_MODE)
                    .create(&dir)
                    .map_err(|e| write_error(format!("{}: {}", dir.display(), e)))?;
                fs::write(&path, value).map_err(|e| write_error(e.to_string()))
            }
        }
    }
}

/// In-memory value store for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryValueStore {
    values: Mutex<HashMap<(String, String), String>>,
}

impl MemoryValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries across all users.
    pub fn len(&self) -> usize {
        self.values.lock().map(|values| values.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ValueStore for MemoryValueStore {
    fn get(&self, user: &str, option: &str) -> Option<String> {
        let values = self.values.lock().ok()?;
        values
            .get(&(user.to_string(), option.to_string()))
            .cloned()
    }

    fn set(&self, user: &str, option: &str, value: Option<&str>) -> Result<(), SessionError> {
        paths::validate_component(user)?;
        paths::validate_component(option)?;

        let mut values = self.values.lock().map_err(|_| SessionError::StoreWrite {
            user: user.to_string(),
            option: option.to_string(),
            message: "store mutex poisoned".to_string(),
        })?;
        let key = (user.to_string(), option.to_string());
        match value {
            Some(value) => {
                values.insert(key, value.to_string());
            }
            None => {
                values.remove(&key);
            }
        }
        Ok(())
    }
}

impl<S: ValueStore + ?Sized> ValueStore for &S {
    fn get(&self, user: &str, option: &str) -> Option<String> {
        (**self).get(user, option)
    }

    fn set(&self, user: &str, option: &str, value: Option<&str>) -> Result<(), SessionError> {
        (**self).set(user, option, value)
    }
}

#[cfg(test)]
#[path = "tests/value_store_tests.rs"]
mod tests;
