//! Per-user OpenRC session accounting for PAM.
//!
//! Counts each user's concurrently open sessions, starts the user's service
//! supervisor when the first session opens and stops it when the last one
//! closes. Also manages the per-user runtime directory exported as
//! `XDG_RUNTIME_DIR`.

pub mod account;
pub mod config;
pub mod errors;
pub mod host;
pub mod logging;
pub mod module;
#[cfg(feature = "pam")]
pub mod pam;
pub mod paths;
pub mod runtime_dir;
pub mod session;
pub mod session_counter;
pub mod session_lock;
pub mod supervisor;
pub mod value_store;

pub use account::Account;
pub use config::SessionConfig;
pub use errors::SessionError;
pub use host::{EnvironmentHost, SessionHost};
pub use module::{close_session, open_session, run_session, LogTarget, SessionOutcome};
pub use session::{SessionManager, TransitionReport};
pub use session_counter::{CountTransition, Direction, Edge};
pub use value_store::{FileValueStore, MemoryValueStore, ValueStore};
