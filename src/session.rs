//! The per-user open/close transaction.
//!
//! Every transaction for a user runs under that user's [`SessionLock`], so
//! the read-decide-invoke-write sequence on the session count is atomic
//! with respect to other sessions of the same user:
//!
//! 1. Static users are skipped before anything else happens.
//! 2. The lock is taken on `<state_root>/users/<user>`.
//! 3. On open, the runtime directory is ensured. Failure here aborts the
//!    transaction with the count untouched.
//! 4. The count is read and the transition planned.
//! 5. On an edge the supervisor runs; on the stop edge a managed runtime
//!    directory is reclaimed.
//! 6. The new count is persisted, even if step 5 failed.

use crate::account::Account;
use crate::config::SessionConfig;
use crate::errors::SessionError;
use crate::host::SessionHost;
use crate::paths::{self, STATIC};
use crate::runtime_dir::{RuntimeDir, RuntimeDirManager};
use crate::session_counter::{CountTransition, Direction, Edge, SessionCounter};
use crate::session_lock::SessionLock;
use crate::supervisor::{Invocation, SupervisorInvoker};
use crate::value_store::ValueStore;
use std::path::PathBuf;

/// What one transaction did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionReport {
    pub user: String,
    /// `None` for static users, whose sessions are not counted.
    pub count: Option<CountTransition>,
    /// The runtime directory ensured on open.
    pub runtime_dir: Option<RuntimeDir>,
    /// The managed runtime directory removed on the last close.
    pub reclaimed: Option<PathBuf>,
    /// Failures after the count decision; the count was still persisted.
    pub failures: Vec<SessionError>,
}

impl TransitionReport {
    fn static_user(user: &str) -> Self {
        Self {
            user: user.to_string(),
            count: None,
            runtime_dir: None,
            reclaimed: None,
            failures: Vec::new(),
        }
    }

    pub fn is_static(&self) -> bool {
        self.count.is_none()
    }

    pub fn edge(&self) -> Option<Edge> {
        self.count.and_then(|c| c.edge)
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Converts collected failures into the transaction result.
    pub fn into_result(self) -> Result<Self, SessionError> {
        match self.failures.first() {
            Some(first) => Err(first.clone()),
            None => Ok(self),
        }
    }
}

/// Runs session transactions against a value store and a supervisor.
pub struct SessionManager<S, I> {
    config: SessionConfig,
    store: S,
    invoker: I,
}

impl<S: ValueStore, I: SupervisorInvoker> SessionManager<S, I> {
    pub fn new(config: SessionConfig, store: S, invoker: I) -> Self {
        Self {
            config,
            store,
            invoker,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn invoker(&self) -> &I {
        &self.invoker
    }

    /// Accounts for a newly opened session.
    pub fn open(
        &self,
        host: &mut dyn SessionHost,
        account: &Account,
    ) -> Result<TransitionReport, SessionError> {
        self.transition(host, account, Direction::Open)
    }

    /// Accounts for a closing session.
    pub fn close(
        &self,
        host: &mut dyn SessionHost,
        account: &Account,
    ) -> Result<TransitionReport, SessionError> {
        self.transition(host, account, Direction::Close)
    }

    /// Runs one locked transaction.
    ///
    /// # Errors
    ///
    /// Returns an error, with no state changed, when the user name is
    /// unusable, the lock cannot be taken, or the runtime directory cannot
    /// be ensured. Later failures are reported in
    /// [`TransitionReport::failures`].
    pub fn transition(
        &self,
        host: &mut dyn SessionHost,
        account: &Account,
        direction: Direction,
    ) -> Result<TransitionReport, SessionError> {
        let user = account.name.as_str();

        if self.store.is_yes(user, STATIC) {
            tracing::info!(user, "static user session, not counting");
            return Ok(TransitionReport::static_user(user));
        }

        let lock_dir = paths::user_state_dir(&self.config.state_root, user)?;
        let lock = SessionLock::acquire(&lock_dir, &self.config.lock)?;

        let runtime = RuntimeDirManager::new(&self.config.runtime_root, &self.store);
        let runtime_dir = match direction {
            Direction::Open => Some(runtime.ensure(host, account).inspect_err(|e| {
                tracing::error!("Failed to create runtime directory: {}", e);
            })?),
            Direction::Close => None,
        };

        let counter = SessionCounter::new(&self.store);
        let count = CountTransition::plan(counter.read(user), direction);
        if count.is_unbalanced() {
            tracing::warn!(user, "closing a session that was never counted");
        }
        tracing::info!("Session count: {} -> {}", count.previous, count.next);

        let mut failures = Vec::new();
        let mut reclaimed = None;

        if let Some(edge) = count.edge {
            let environment = host.env_list();
            let invocation = Invocation {
                account,
                runlevel: self.config.runlevel(direction.is_going_down()),
                environment: &environment,
            };
            if let Err(e) = self.invoker.invoke(&invocation) {
                tracing::error!("{}", e);
                failures.push(e);
            }

            if edge == Edge::Stop {
                match runtime.reclaim(host, account) {
                    Ok(path) => reclaimed = path,
                    Err(e) => {
                        tracing::error!("{}", e);
                        failures.push(e);
                    }
                }
            }
        }

        if let Err(e) = counter.write(user, count.next) {
            tracing::error!("{}", e);
            failures.push(e);
        }

        drop(lock);

        Ok(TransitionReport {
            user: user.to_string(),
            count: Some(count),
            runtime_dir,
            reclaimed,
            failures,
        })
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "tests/session_concurrency_tests.rs"]
mod concurrency_tests;
