//! Filesystem layout for per-user session state.
//!
//! - `<state_root>/users/<user>/` - per-user state directory, also the lock target
//! - `<state_root>/users/<user>/<option>` - one value per file, raw string contents
//! - `<runtime_root>/<uid>` - canonical runtime directory

use crate::errors::SessionError;
use std::path::{Path, PathBuf};

/// Name of the directory under the state root holding per-user state.
pub const USERS_DIR: &str = "users";

/// Option holding the decimal session count.
pub const SESSION_COUNT: &str = "session_count";

/// Option opting a user out of session counting.
pub const STATIC: &str = "static";

/// Option recording that the runtime directory was created by us.
pub const RUNDIR_MANAGED: &str = "rundir_managed";

/// Rejects names that would escape the state directory.
pub fn validate_component(name: &str) -> Result<&str, SessionError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(SessionError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(name)
}

/// Returns `<state_root>/users`.
pub fn users_dir(state_root: &Path) -> PathBuf {
    state_root.join(USERS_DIR)
}

/// Returns `<state_root>/users/<user>`.
pub fn user_state_dir(state_root: &Path, user: &str) -> Result<PathBuf, SessionError> {
    Ok(users_dir(state_root).join(validate_component(user)?))
}

/// Returns `<state_root>/users/<user>/<option>`.
pub fn option_path(state_root: &Path, user: &str, option: &str) -> Result<PathBuf, SessionError> {
    Ok(user_state_dir(state_root, user)?.join(validate_component(option)?))
}

/// Returns `<runtime_root>/<uid>`.
pub fn canonical_runtime_dir(runtime_root: &Path, uid: u32) -> PathBuf {
    runtime_root.join(uid.to_string())
}

#[cfg(test)]
#[path = "tests/paths_tests.rs"]
mod tests;
