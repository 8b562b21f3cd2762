use crate::errors::SessionError;
use crate::session_lock::LockPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default runlevel started when the first session opens.
pub const DEFAULT_OPEN_RUNLEVEL: &str = "default";

/// Default runlevel switched to when the last session closes.
pub const DEFAULT_CLOSE_RUNLEVEL: &str = "none";

/// Default service state directory.
pub const DEFAULT_STATE_ROOT: &str = "/run/openrc";

/// Default parent of per-uid runtime directories.
pub const DEFAULT_RUNTIME_ROOT: &str = "/run/user";

/// Default supervisor program.
pub const DEFAULT_SUPERVISOR: &str = "openrc";

/// `PATH` given to the supervisor when the session has none.
pub const DEFAULT_SEARCH_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    #[serde(default = "default_open_runlevel")]
    pub open_runlevel: String,
    #[serde(default = "default_close_runlevel")]
    pub close_runlevel: String,
    #[serde(default = "default_state_root")]
    pub state_root: PathBuf,
    #[serde(default = "default_runtime_root")]
    pub runtime_root: PathBuf,
    #[serde(default = "default_supervisor")]
    pub supervisor: PathBuf,
    #[serde(default = "default_search_path")]
    pub search_path: String,
    #[serde(default)]
    pub lock: LockPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            open_runlevel: default_open_runlevel(),
            close_runlevel: default_close_runlevel(),
            state_root: default_state_root(),
            runtime_root: default_runtime_root(),
            supervisor: default_supervisor(),
            search_path: default_search_path(),
            lock: LockPolicy::default(),
        }
    }
}

fn default_open_runlevel() -> String {
    DEFAULT_OPEN_RUNLEVEL.to_string()
}

fn default_close_runlevel() -> String {
    DEFAULT_CLOSE_RUNLEVEL.to_string()
}

fn default_state_root() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_ROOT)
}

fn default_runtime_root() -> PathBuf {
    PathBuf::from(DEFAULT_RUNTIME_ROOT)
}

fn default_supervisor() -> PathBuf {
    PathBuf::from(DEFAULT_SUPERVISOR)
}

fn default_search_path() -> String {
    DEFAULT_SEARCH_PATH.to_string()
}

impl SessionConfig {
    /// Loads a YAML configuration file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file as YAML: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the configuration from PAM module arguments.
    ///
    /// Bare arguments are the open and close runlevels, in that order.
    /// `key=value` arguments override single fields; `config=<path>` loads
    /// a YAML file first, which the other arguments then override.
    pub fn from_module_args<S: AsRef<str>>(args: &[S]) -> Result<Self, SessionError> {
        Ok(Self::parse_module_args(args)?)
    }

    fn parse_module_args<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();

        let config_file = args.iter().find_map(|arg| arg.strip_prefix("config="));
        let mut config = match config_file {
            Some(path) => Self::load(Path::new(path))?,
            None => Self::default(),
        };

        let mut runlevels = Vec::new();
        for arg in args {
            match arg.split_once('=') {
                Some(("config", _)) => {}
                Some((key, value)) => config.apply_option(key, value)?,
                None => runlevels.push(arg),
            }
        }

        match runlevels.as_slice() {
            [] => {}
            [open] => config.open_runlevel = open.to_string(),
            [open, close] => {
                config.open_runlevel = open.to_string();
                config.close_runlevel = close.to_string();
            }
            _ => anyhow::bail!(
                "at most two runlevel arguments are accepted, got {}",
                runlevels.len()
            ),
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "state_root" => self.state_root = PathBuf::from(value),
            "runtime_root" => self.runtime_root = PathBuf::from(value),
            "supervisor" => self.supervisor = PathBuf::from(value),
            "search_path" => self.search_path = value.to_string(),
            "lock_retries" => {
                self.lock.retries = value
                    .parse()
                    .with_context(|| format!("Invalid lock_retries '{}'", value))?;
            }
            "lock_delay_ms" => {
                self.lock.retry_delay_ms = value
                    .parse()
                    .with_context(|| format!("Invalid lock_delay_ms '{}'", value))?;
            }
            _ => anyhow::bail!("Unknown module option '{}'", key),
        }
        Ok(())
    }

    /// Returns the runlevel to pass for a start or stop.
    pub fn runlevel(&self, going_down: bool) -> &str {
        if going_down {
            &self.close_runlevel
        } else {
            &self.open_runlevel
        }
    }

    fn validate(&self) -> Result<()> {
        if self.open_runlevel.trim().is_empty() || self.close_runlevel.trim().is_empty() {
            anyhow::bail!("Runlevel names must not be empty");
        }
        if self.supervisor.as_os_str().is_empty() {
            anyhow::bail!("Supervisor program must not be empty");
        }
        if !self.state_root.is_absolute() || !self.runtime_root.is_absolute() {
            anyhow::bail!(
                "state_root and runtime_root must be absolute paths ({}, {})",
                self.state_root.display(),
                self.runtime_root.display()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
