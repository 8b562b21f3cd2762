//! The host session framework as seen by the protocol.
//!
//! A host supplies the acting username and a mutable per-session
//! environment. The PAM module implements this over a `pam_handle_t`;
//! [`EnvironmentHost`] implements it in memory for the command-line tool
//! and for tests.

use crate::errors::SessionError;
use std::collections::BTreeMap;

/// Identity and environment of the session being opened or closed.
pub trait SessionHost {
    /// The user the session belongs to, if the framework can tell.
    fn username(&self) -> Option<String>;

    /// Reads a variable from the session environment.
    fn getenv(&self, name: &str) -> Option<String>;

    /// Exports a variable into the session environment.
    fn putenv(&mut self, name: &str, value: &str) -> Result<(), SessionError>;

    /// The full session environment, as passed to child processes.
    fn env_list(&self) -> Vec<(String, String)>;
}

/// In-memory session host.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentHost {
    username: Option<String>,
    env: BTreeMap<String, String>,
    exported: Vec<String>,
}

impl EnvironmentHost {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Self::default()
        }
    }

    /// A host whose framework could not identify the user.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Seeds the environment without marking the variables as exported.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Variables exported by [`SessionHost::putenv`], in export order.
    pub fn exported(&self) -> Vec<(String, String)> {
        self.exported
            .iter()
            .filter_map(|name| self.env.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    }
}

impl SessionHost for EnvironmentHost {
    fn username(&self) -> Option<String> {
        self.username.clone()
    }

    fn getenv(&self, name: &str) -> Option<String> {
        self.env.get(name).cloned()
    }

    fn putenv(&mut self, name: &str, value: &str) -> Result<(), SessionError> {
        if name.is_empty() || name.contains(['=', '\0']) || value.contains('\0') {
            return Err(SessionError::Environment {
                name: name.to_string(),
                message: "invalid variable".to_string(),
            });
        }
        self.env.insert(name.to_string(), value.to_string());
        if !self.exported.iter().any(|n| n == name) {
            self.exported.push(name.to_string());
        }
        Ok(())
    }

    fn env_list(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
#[path = "tests/host_tests.rs"]
mod tests;
