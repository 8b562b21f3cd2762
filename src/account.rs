//! Target user identity resolved from the passwd database.

use crate::errors::SessionError;
use nix::unistd::{Gid, Uid, User};
use std::ffi::CString;

/// The account a session is being opened or closed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub uid: Uid,
    pub gid: Gid,
}

impl Account {
    /// Creates an account from already-resolved identity fields.
    pub fn new(name: impl Into<String>, uid: Uid, gid: Gid) -> Self {
        Self {
            name: name.into(),
            uid,
            gid,
        }
    }

    /// Looks up `name` in the passwd database.
    pub fn lookup(name: &str) -> Result<Self, SessionError> {
        match User::from_name(name) {
            Ok(Some(user)) => Ok(user.into()),
            Ok(None) => Err(SessionError::UnknownUser {
                name: name.to_string(),
            }),
            Err(e) => {
                tracing::debug!(user = name, "passwd lookup failed: {}", e);
                Err(SessionError::UnknownUser {
                    name: name.to_string(),
                })
            }
        }
    }

    /// The root account is never counted.
    pub fn is_root(&self) -> bool {
        self.uid.is_root()
    }

    /// Supplementary group list for this account, including the primary gid.
    pub fn groups(&self) -> Result<Vec<Gid>, SessionError> {
        let name = CString::new(self.name.as_str()).map_err(|_| SessionError::InvalidName {
            name: self.name.clone(),
        })?;
        nix::unistd::getgrouplist(&name, self.gid).map_err(|e| SessionError::PrivilegeDrop {
            user: self.name.clone(),
            message: e.to_string(),
        })
    }
}

impl From<User> for Account {
    fn from(user: User) -> Self {
        Self {
            name: user.name,
            uid: user.uid,
            gid: user.gid,
        }
    }
}

#[cfg(test)]
#[path = "tests/account_tests.rs"]
mod tests;
