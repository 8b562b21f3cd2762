//! Runs the per-user service supervisor as the target user.
//!
//! The child drops privileges in a fixed order before exec: supplementary
//! groups, then the primary gid, then the uid. Changing the uid first would
//! forfeit the right to change groups. The parent waits for the child and
//! treats a nonzero exit as a failure.

use crate::account::Account;
use crate::errors::SessionError;
use nix::unistd::{Gid, Uid};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Flag selecting the per-user instance of the supervisor.
pub const SUPERVISOR_USER_FLAG: &str = "--user";

/// One supervisor run: start or stop a user's runlevel.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub account: &'a Account,
    pub runlevel: &'a str,
    /// The complete environment for the child.
    pub environment: &'a [(String, String)],
}

/// Executes the supervisor for an edge transition.
pub trait SupervisorInvoker {
    fn invoke(&self, invocation: &Invocation<'_>) -> Result<(), SessionError>;
}

impl<T: SupervisorInvoker + ?Sized> SupervisorInvoker for &T {
    fn invoke(&self, invocation: &Invocation<'_>) -> Result<(), SessionError> {
        (**self).invoke(invocation)
    }
}

/// Credentials to assume in the child before exec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeDrop {
    groups: Vec<Gid>,
    gid: Gid,
    uid: Uid,
}

impl PrivilegeDrop {
    /// Returns the drop needed to act as `account`.
    ///
    /// An unprivileged process already running as the account needs no drop
    /// (and could not perform one).
    pub fn for_account(account: &Account) -> Result<Option<Self>, SessionError> {
        let euid = Uid::effective();
        if euid == account.uid && !euid.is_root() {
            return Ok(None);
        }
        Ok(Some(Self {
            groups: account.groups()?,
            gid: account.gid,
            uid: account.uid,
        }))
    }

    /// Applies groups, gid, then uid to the calling process.
    pub fn apply(&self) -> std::io::Result<()> {
        nix::unistd::setgroups(&self.groups)?;
        nix::unistd::setgid(self.gid)?;
        nix::unistd::setuid(self.uid)?;
        Ok(())
    }
}

/// Runs `<program> --user <runlevel>` as the session's user.
#[derive(Debug, Clone)]
pub struct UserCommandInvoker {
    program: PathBuf,
    search_path: String,
}

impl UserCommandInvoker {
    /// `search_path` becomes `PATH` when the session environment has none.
    pub fn new(program: impl Into<PathBuf>, search_path: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            search_path: search_path.into(),
        }
    }

    /// Builds the command without credentials applied.
    pub fn command(&self, invocation: &Invocation<'_>) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg(SUPERVISOR_USER_FLAG)
            .arg(invocation.runlevel)
            .env_clear()
            .envs(invocation.environment.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null());

        if !invocation.environment.iter().any(|(k, _)| k == "PATH") {
            command.env("PATH", &self.search_path);
        }
        command
    }
}

impl SupervisorInvoker for UserCommandInvoker {
    fn invoke(&self, invocation: &Invocation<'_>) -> Result<(), SessionError> {
        let program = self.program.display().to_string();
        tracing::info!(
            "Executing {} {} {}",
            program,
            SUPERVISOR_USER_FLAG,
            invocation.runlevel
        );

        let mut command = self.command(invocation);
        if let Some(credentials) = PrivilegeDrop::for_account(invocation.account)? {
            // SAFETY: the hook only issues setgroups/setgid/setuid syscalls,
            // which are async-signal-safe, and touches no shared state.
            unsafe {
                command.pre_exec(move || credentials.apply());
            }
        }

        let status = command
            .status()
            .map_err(|e| SessionError::SupervisorSpawn {
                program: program.clone(),
                message: e.to_string(),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(SessionError::SupervisorExit {
                program,
                status: status.to_string(),
            })
        }
    }
}

#[cfg(test)]
#[path = "tests/supervisor_tests.rs"]
mod tests;
