//! Per-user runtime directory lifecycle.
//!
//! On open, the directory advertised by the session environment is reused
//! if it belongs to the target user. Otherwise the canonical
//! `<runtime_root>/<uid>` is reused or created and exported as
//! `XDG_RUNTIME_DIR`. A directory created here is marked managed so that
//! the last close can remove it. Directories we did not create are never
//! removed.

use crate::account::Account;
use crate::errors::SessionError;
use crate::host::SessionHost;
use crate::paths::{self, RUNDIR_MANAGED};
use crate::value_store::ValueStore;
use std::fs::{self, DirBuilder, Metadata};
use std::io::ErrorKind;
use std::os::unix::fs::{DirBuilderExt, MetadataExt};
use std::path::{Path, PathBuf};

/// Session environment variable naming the runtime directory.
pub const RUNTIME_DIR_VAR: &str = "XDG_RUNTIME_DIR";

/// Mode for runtime directories created here.
pub const RUNTIME_DIR_MODE: u32 = 0o700;

/// Where the runtime directory in use came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeDirOrigin {
    /// Advertised by the session environment before we ran.
    Inherited,
    /// The canonical path already existed.
    Existing,
    /// Created by this transaction.
    Created,
}

/// A validated runtime directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeDir {
    pub path: PathBuf,
    pub origin: RuntimeDirOrigin,
}

/// Resolves, validates, creates and reclaims runtime directories.
pub struct RuntimeDirManager<'a, S: ValueStore + ?Sized> {
    runtime_root: &'a Path,
    store: &'a S,
}

impl<'a, S: ValueStore + ?Sized> RuntimeDirManager<'a, S> {
    pub fn new(runtime_root: &'a Path, store: &'a S) -> Self {
        Self {
            runtime_root,
            store,
        }
    }

    /// Makes sure the user has a runtime directory they own.
    ///
    /// # Errors
    ///
    /// - [`SessionError::RuntimeDirOwnership`] if an existing directory belongs to someone else
    /// - [`SessionError::RuntimeDirCreate`] if the directory cannot be inspected, created or chowned
    /// - [`SessionError::Environment`] if the path cannot be exported
    pub fn ensure(
        &self,
        host: &mut dyn SessionHost,
        account: &Account,
    ) -> Result<RuntimeDir, SessionError> {
        if let Some(advertised) = host.getenv(RUNTIME_DIR_VAR) {
            let path = PathBuf::from(advertised);
            let metadata = fs::symlink_metadata(&path)
                .map_err(|_| ownership_error(&path, account))?;
            check_owner(&path, &metadata, account)?;
            return Ok(RuntimeDir {
                path,
                origin: RuntimeDirOrigin::Inherited,
            });
        }

        let path = self.canonical_path(account);
        match fs::symlink_metadata(&path) {
            Ok(metadata) => self.reuse(host, path, &metadata, account),
            Err(e) if e.kind() == ErrorKind::NotFound => self.create(host, path, account),
            Err(e) => Err(SessionError::RuntimeDirCreate {
                path,
                message: e.to_string(),
            }),
        }
    }

    /// Removes the runtime directory if we created it.
    ///
    /// Returns the removed path, or `None` when the directory is not
    /// managed or already gone.
    pub fn reclaim(
        &self,
        host: &dyn SessionHost,
        account: &Account,
    ) -> Result<Option<PathBuf>, SessionError> {
        if !self.store.is_yes(&account.name, RUNDIR_MANAGED) {
            return Ok(None);
        }

        let path = host
            .getenv(RUNTIME_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| self.canonical_path(account));

        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SessionError::RuntimeDirRemove {
                    path,
                    message: e.to_string(),
                })
            }
        };
        check_owner(&path, &metadata, account)?;

        tracing::info!(path = %path.display(), "removing runtime directory");
        fs::remove_dir_all(&path).map_err(|e| SessionError::RuntimeDirRemove {
            path: path.clone(),
            message: e.to_string(),
        })?;
        Ok(Some(path))
    }

    /// `<runtime_root>/<uid>` for the account.
    pub fn canonical_path(&self, account: &Account) -> PathBuf {
        paths::canonical_runtime_dir(self.runtime_root, account.uid.as_raw())
    }

    fn reuse(
        &self,
        host: &mut dyn SessionHost,
        path: PathBuf,
        metadata: &Metadata,
        account: &Account,
    ) -> Result<RuntimeDir, SessionError> {
        check_owner(&path, metadata, account)?;
        export(host, &path)?;
        Ok(RuntimeDir {
            path,
            origin: RuntimeDirOrigin::Existing,
        })
    }

    fn create(
        &self,
        host: &mut dyn SessionHost,
        path: PathBuf,
        account: &Account,
    ) -> Result<RuntimeDir, SessionError> {
        tracing::info!(
            "Creating runtime directory {} for uid {}",
            path.display(),
            account.uid
        );

        match DirBuilder::new().mode(RUNTIME_DIR_MODE).create(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // Someone outside our lock created it in the meantime.
                let metadata =
                    fs::symlink_metadata(&path).map_err(|e| SessionError::RuntimeDirCreate {
                        path: path.clone(),
                        message: e.to_string(),
                    })?;
                return self.reuse(host, path, &metadata, account);
            }
            Err(e) => {
                return Err(SessionError::RuntimeDirCreate {
                    path,
                    message: e.to_string(),
                })
            }
        }

        if let Err(e) = self.adopt(host, &path, account) {
            // Undo the mkdir so the next open starts clean.
            if let Err(rm) = fs::remove_dir(&path) {
                tracing::warn!("cannot remove {}: {}", path.display(), rm);
            }
            return Err(e);
        }
        Ok(RuntimeDir {
            path,
            origin: RuntimeDirOrigin::Created,
        })
    }

    /// Hands a freshly created directory to the user and exports it.
    fn adopt(
        &self,
        host: &mut dyn SessionHost,
        path: &Path,
        account: &Account,
    ) -> Result<(), SessionError> {
        std::os::unix::fs::chown(
            path,
            Some(account.uid.as_raw()),
            Some(account.gid.as_raw()),
        )
        .map_err(|e| SessionError::RuntimeDirCreate {
            path: path.to_path_buf(),
            message: format!("chown: {}", e),
        })?;

        if let Err(e) = self.store.set(&account.name, RUNDIR_MANAGED, Some("yes")) {
            tracing::warn!("cannot mark runtime directory as managed: {}", e);
        }

        export(host, path)
    }
}

fn ownership_error(path: &Path, account: &Account) -> SessionError {
    SessionError::RuntimeDirOwnership {
        path: path.to_path_buf(),
        uid: account.uid.as_raw(),
    }
}

/// A runtime directory must be a real directory owned by the user's uid and primary gid.
fn check_owner(path: &Path, metadata: &Metadata, account: &Account) -> Result<(), SessionError> {
    if metadata.is_dir()
        && metadata.uid() == account.uid.as_raw()
        && metadata.gid() == account.gid.as_raw()
    {
        return Ok(());
    }
    tracing::error!(
        "{} does not belong to uid {}",
        path.display(),
        account.uid
    );
    Err(ownership_error(path, account))
}

fn export(host: &mut dyn SessionHost, path: &Path) -> Result<(), SessionError> {
    host.putenv(RUNTIME_DIR_VAR, &path.to_string_lossy())
}

#[cfg(test)]
#[path = "tests/runtime_dir_tests.rs"]
mod tests;
