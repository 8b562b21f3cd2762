//! Host-facing open/close entry points.
//!
//! These map a session-framework call onto one locked transaction and
//! collapse the result into the framework's success/failure verdict.

use crate::account::Account;
use crate::config::SessionConfig;
use crate::errors::SessionError;
use crate::host::SessionHost;
use crate::logging;
use crate::session::{SessionManager, TransitionReport};
use crate::session_counter::Direction;
use crate::supervisor::UserCommandInvoker;
use crate::value_store::FileValueStore;

/// Verdict returned to the session framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Success,
    SessionError,
}

/// Where log events of one call go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    /// A syslog subscriber scoped to the call.
    Syslog,
    /// Whatever subscriber the caller already installed.
    Inherited,
}

pub fn open_session<S: AsRef<str>>(
    host: &mut dyn SessionHost,
    args: &[S],
    log: LogTarget,
) -> SessionOutcome {
    outcome(run_session(host, args, Direction::Open, log))
}

pub fn close_session<S: AsRef<str>>(
    host: &mut dyn SessionHost,
    args: &[S],
    log: LogTarget,
) -> SessionOutcome {
    outcome(run_session(host, args, Direction::Close, log))
}

fn outcome(result: Result<Option<TransitionReport>, SessionError>) -> SessionOutcome {
    match result {
        Ok(_) => SessionOutcome::Success,
        Err(_) => SessionOutcome::SessionError,
    }
}

/// Runs one transaction for the host's user.
///
/// Returns `Ok(None)` when the session is not accounted at all, which is
/// the case for root.
///
/// # Errors
///
/// Fails when the user cannot be identified or looked up, the module
/// arguments are invalid, or the transaction reports any failure.
pub fn run_session<S: AsRef<str>>(
    host: &mut dyn SessionHost,
    args: &[S],
    direction: Direction,
    log: LogTarget,
) -> Result<Option<TransitionReport>, SessionError> {
    let user = host.username().ok_or(SessionError::MissingUser)?;

    let _scope = match log {
        LogTarget::Syslog => Some(logging::syslog_scope(&logging::syslog_tag(&user))),
        LogTarget::Inherited => None,
    };

    let verb = match direction {
        Direction::Open => "open",
        Direction::Close => "close",
    };

    let result = account_session(host, &user, args, direction);
    if let Err(e) = &result {
        tracing::error!("Failed to {} session: {}", verb, e);
    }
    result
}

fn account_session<S: AsRef<str>>(
    host: &mut dyn SessionHost,
    user: &str,
    args: &[S],
    direction: Direction,
) -> Result<Option<TransitionReport>, SessionError> {
    let account = Account::lookup(user)?;
    if account.is_root() {
        tracing::debug!("not accounting sessions for root");
        return Ok(None);
    }

    let config = SessionConfig::from_module_args(args)?;
    match direction {
        Direction::Open => tracing::info!("Opening openrc session"),
        Direction::Close => tracing::info!("Closing openrc session"),
    }

    let store = FileValueStore::new(&config.state_root);
    let invoker = UserCommandInvoker::new(&config.supervisor, config.search_path.clone());
    let manager = SessionManager::new(config, store, invoker);

    let report = manager.transition(host, &account, direction)?;
    report.into_result().map(Some)
}

#[cfg(test)]
#[path = "tests/module_tests.rs"]
mod tests;
