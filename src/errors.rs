//! Error types for the session-accounting protocol.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Errors that can occur while opening or closing a counted session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The host framework did not supply a username.
    MissingUser,
    /// The username does not resolve to an account.
    UnknownUser { name: String },
    /// A user or option name that cannot be used as a path component.
    InvalidName { name: String },
    /// The per-user state directory could not be created or opened.
    LockDirectory { path: PathBuf, message: String },
    /// The lock was still held elsewhere after every retry.
    LockContended { path: PathBuf, attempts: u32 },
    /// flock failed for a reason other than contention.
    Lock { path: PathBuf, message: String },
    /// The runtime directory is not owned by the target user.
    RuntimeDirOwnership { path: PathBuf, uid: u32 },
    /// Creating or chowning the runtime directory failed.
    RuntimeDirCreate { path: PathBuf, message: String },
    /// Removing a managed runtime directory failed.
    RuntimeDirRemove { path: PathBuf, message: String },
    /// The session environment rejected a variable.
    Environment { name: String, message: String },
    /// A value could not be written to the value store.
    StoreWrite {
        user: String,
        option: String,
        message: String,
    },
    /// Supplementary groups could not be resolved for the privilege drop.
    PrivilegeDrop { user: String, message: String },
    /// The supervisor could not be started.
    SupervisorSpawn { program: String, message: String },
    /// The supervisor ran but exited unsuccessfully.
    SupervisorExit { program: String, status: String },
    /// Invalid module arguments or configuration file.
    Config { message: String },
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingUser => write!(f, "no user supplied by the session framework"),
            Self::UnknownUser { name } => write!(f, "unknown user '{}'", name),
            Self::InvalidName { name } => write!(f, "invalid name '{}'", name),
            Self::LockDirectory { path, message } => {
                write!(f, "cannot prepare lock directory {}: {}", path.display(), message)
            }
            Self::LockContended { path, attempts } => write!(
                f,
                "failed to lock {} after {} attempts",
                path.display(),
                attempts
            ),
            Self::Lock { path, message } => {
                write!(f, "failed to lock {}: {}", path.display(), message)
            }
            Self::RuntimeDirOwnership { path, uid } => {
                write!(f, "{} does not belong to uid {}", path.display(), uid)
            }
            Self::RuntimeDirCreate { path, message } => write!(
                f,
                "failed to create runtime directory {}: {}",
                path.display(),
                message
            ),
            Self::RuntimeDirRemove { path, message } => write!(
                f,
                "failed to remove runtime directory {}: {}",
                path.display(),
                message
            ),
            Self::Environment { name, message } => {
                write!(f, "cannot export {}: {}", name, message)
            }
            Self::StoreWrite {
                user,
                option,
                message,
            } => write!(f, "cannot store {} for {}: {}", option, user, message),
            Self::PrivilegeDrop { user, message } => {
                write!(f, "cannot drop privileges to {}: {}", user, message)
            }
            Self::SupervisorSpawn { program, message } => {
                write!(f, "failed to execute {}: {}", program, message)
            }
            Self::SupervisorExit { program, status } => {
                write!(f, "{} exited unsuccessfully: {}", program, status)
            }
            Self::Config { message } => write!(f, "configuration error: {}", message),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<anyhow::Error> for SessionError {
    fn from(err: anyhow::Error) -> Self {
        Self::Config {
            message: format!("{:#}", err),
        }
    }
}
