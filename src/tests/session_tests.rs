//! Tests for the session transaction.

use super::*;
use crate::host::EnvironmentHost;
use crate::paths::{RUNDIR_MANAGED, SESSION_COUNT};
use crate::runtime_dir::{RuntimeDirOrigin, RUNTIME_DIR_VAR};
use crate::session_lock::LockPolicy;
use crate::value_store::{FileValueStore, MemoryValueStore};
use nix::unistd::{Gid, Uid};
use proptest::prelude::*;
use std::sync::Mutex;
use tempfile::{tempdir, TempDir};

/// One recorded supervisor run.
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    user: String,
    runlevel: String,
    environment: Vec<(String, String)>,
}

/// Supervisor fake recording every invocation in call order.
#[derive(Debug, Default)]
pub(crate) struct RecordingInvoker {
    calls: Mutex<Vec<RecordedCall>>,
    fail: bool,
}

impl RecordingInvoker {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|call| (call.user.clone(), call.runlevel.clone()))
            .collect()
    }

    /// Environment handed to each invocation, in call order.
    pub(crate) fn environments(&self) -> Vec<Vec<(String, String)>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|call| call.environment.clone())
            .collect()
    }

    pub(crate) fn runlevels(&self) -> Vec<String> {
        self.calls().into_iter().map(|(_, runlevel)| runlevel).collect()
    }
}

impl SupervisorInvoker for RecordingInvoker {
    fn invoke(&self, invocation: &Invocation<'_>) -> Result<(), SessionError> {
        self.calls.lock().unwrap().push(RecordedCall {
            user: invocation.account.name.clone(),
            runlevel: invocation.runlevel.to_string(),
            environment: invocation.environment.to_vec(),
        });
        if self.fail {
            return Err(SessionError::SupervisorExit {
                program: "openrc".to_string(),
                status: "exit status: 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Value store whose writes always fail.
struct ReadOnlyStore(MemoryValueStore);

impl ValueStore for ReadOnlyStore {
    fn get(&self, user: &str, option: &str) -> Option<String> {
        self.0.get(user, option)
    }

    fn set(&self, user: &str, option: &str, _value: Option<&str>) -> Result<(), SessionError> {
        Err(SessionError::StoreWrite {
            user: user.to_string(),
            option: option.to_string(),
            message: "read-only file system".to_string(),
        })
    }
}

pub(crate) struct Fixture {
    pub(crate) state: TempDir,
    pub(crate) runtime: TempDir,
    pub(crate) account: Account,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        Self {
            state: tempdir().expect("temp dir"),
            runtime: tempdir().expect("temp dir"),
            account: Account::new("alice", Uid::effective(), Gid::effective()),
        }
    }

    pub(crate) fn config(&self) -> SessionConfig {
        SessionConfig {
            state_root: self.state.path().to_path_buf(),
            runtime_root: self.runtime.path().to_path_buf(),
            lock: LockPolicy {
                retries: 200,
                retry_delay_ms: 5,
            },
            ..SessionConfig::default()
        }
    }

    pub(crate) fn file_manager(&self) -> SessionManager<FileValueStore, RecordingInvoker> {
        SessionManager::new(
            self.config(),
            FileValueStore::new(self.state.path()),
            RecordingInvoker::default(),
        )
    }

    pub(crate) fn runtime_dir(&self) -> PathBuf {
        self.runtime
            .path()
            .join(self.account.uid.as_raw().to_string())
    }

    pub(crate) fn host(&self) -> EnvironmentHost {
        EnvironmentHost::new(self.account.name.clone()).with_env([("PATH", "/usr/bin:/bin")])
    }
}

#[test]
fn test_login_logout_scenario() {
    let fixture = Fixture::new();
    let manager = fixture.file_manager();
    let count_file = fixture.state.path().join("users/alice/session_count");

    // first login starts the supervisor and creates the runtime directory
    let mut first = fixture.host();
    let report = manager.open(&mut first, &fixture.account).unwrap();
    assert!(report.is_success());
    assert_eq!(report.edge(), Some(Edge::Start));
    assert_eq!(report.count.unwrap().next, 1);
    assert_eq!(
        report.runtime_dir.as_ref().map(|d| d.origin),
        Some(RuntimeDirOrigin::Created)
    );
    assert_eq!(std::fs::read_to_string(&count_file).unwrap(), "1");
    assert!(manager.store().is_yes("alice", RUNDIR_MANAGED));
    assert_eq!(
        manager.invoker().calls(),
        vec![("alice".to_string(), "default".to_string())]
    );
    assert!(first.getenv(RUNTIME_DIR_VAR).is_some());
    assert!(fixture.runtime_dir().is_dir());

    // second login only counts
    let mut second = fixture.host();
    let report = manager.open(&mut second, &fixture.account).unwrap();
    assert_eq!(report.edge(), None);
    assert_eq!(
        report.runtime_dir.as_ref().map(|d| d.origin),
        Some(RuntimeDirOrigin::Existing)
    );
    assert_eq!(std::fs::read_to_string(&count_file).unwrap(), "2");
    assert_eq!(manager.invoker().calls().len(), 1);

    // first logout leaves everything running
    let report = manager.close(&mut first, &fixture.account).unwrap();
    assert_eq!(report.edge(), None);
    assert_eq!(report.reclaimed, None);
    assert_eq!(std::fs::read_to_string(&count_file).unwrap(), "1");
    assert_eq!(manager.invoker().calls().len(), 1);
    assert!(fixture.runtime_dir().is_dir());

    // last logout stops the supervisor and removes the managed directory
    let report = manager.close(&mut second, &fixture.account).unwrap();
    assert!(report.is_success());
    assert_eq!(report.edge(), Some(Edge::Stop));
    assert_eq!(report.reclaimed, Some(fixture.runtime_dir()));
    assert!(!count_file.exists());
    assert!(!fixture.runtime_dir().exists());
    assert_eq!(manager.invoker().runlevels(), vec!["default", "none"]);

    // both runs see the session environment, runtime directory included
    let session_env = vec![
        ("PATH".to_string(), "/usr/bin:/bin".to_string()),
        (
            RUNTIME_DIR_VAR.to_string(),
            fixture.runtime_dir().to_string_lossy().into_owned(),
        ),
    ];
    assert_eq!(
        manager.invoker().environments(),
        vec![session_env.clone(), session_env]
    );
}

#[test]
fn test_custom_runlevels() {
    let fixture = Fixture::new();
    let config = SessionConfig {
        open_runlevel: "desktop".to_string(),
        close_runlevel: "shutdown".to_string(),
        ..fixture.config()
    };
    let manager = SessionManager::new(config, MemoryValueStore::new(), RecordingInvoker::default());

    manager.open(&mut fixture.host(), &fixture.account).unwrap();
    manager.close(&mut fixture.host(), &fixture.account).unwrap();

    assert_eq!(manager.invoker().runlevels(), vec!["desktop", "shutdown"]);
}

#[test]
fn test_static_user_is_untouched() {
    let fixture = Fixture::new();
    let manager = fixture.file_manager();
    manager.store().set("alice", STATIC, Some("yes")).unwrap();
    manager.store().set("alice", SESSION_COUNT, Some("3")).unwrap();

    for _ in 0..2 {
        let report = manager.open(&mut fixture.host(), &fixture.account).unwrap();
        assert!(report.is_static());
    }
    for _ in 0..5 {
        let report = manager.close(&mut fixture.host(), &fixture.account).unwrap();
        assert!(report.is_static());
    }

    assert_eq!(
        manager.store().get("alice", SESSION_COUNT).as_deref(),
        Some("3")
    );
    assert!(manager.invoker().calls().is_empty());
    assert!(!fixture.runtime_dir().exists());
    assert!(!manager.store().is_yes("alice", RUNDIR_MANAGED));
}

#[test]
fn test_supervisor_failure_still_counts() {
    let fixture = Fixture::new();
    let manager = SessionManager::new(
        fixture.config(),
        MemoryValueStore::new(),
        RecordingInvoker::failing(),
    );

    let report = manager.open(&mut fixture.host(), &fixture.account).unwrap();
    assert!(!report.is_success());
    assert!(matches!(
        report.failures.as_slice(),
        [SessionError::SupervisorExit { .. }]
    ));
    assert_eq!(
        manager.store().get("alice", SESSION_COUNT).as_deref(),
        Some("1")
    );

    let report = manager.close(&mut fixture.host(), &fixture.account).unwrap();
    assert!(report.clone().into_result().is_err());
    assert_eq!(manager.store().get("alice", SESSION_COUNT), None);
    // the stop edge still reclaims the managed directory
    assert!(!fixture.runtime_dir().exists());
}

#[test]
fn test_runtime_dir_failure_leaves_count_unmodified() {
    let fixture = Fixture::new();
    let foreign = Account::new(
        "mallory",
        Uid::from_raw(Uid::effective().as_raw() + 1),
        Gid::effective(),
    );
    std::fs::create_dir(
        fixture
            .runtime
            .path()
            .join(foreign.uid.as_raw().to_string()),
    )
    .unwrap();
    let manager = fixture.file_manager();
    manager.store().set("mallory", SESSION_COUNT, Some("2")).unwrap();

    let mut host = EnvironmentHost::new("mallory");
    let err = manager.open(&mut host, &foreign).unwrap_err();

    assert!(matches!(err, SessionError::RuntimeDirOwnership { .. }));
    assert_eq!(
        manager.store().get("mallory", SESSION_COUNT).as_deref(),
        Some("2")
    );
    assert!(manager.invoker().calls().is_empty());
    assert!(host.exported().is_empty());
}

#[test]
fn test_lock_contention_changes_nothing() {
    let fixture = Fixture::new();
    let config = SessionConfig {
        lock: LockPolicy {
            retries: 1,
            retry_delay_ms: 5,
        },
        ..fixture.config()
    };
    let manager = SessionManager::new(config, MemoryValueStore::new(), RecordingInvoker::default());
    let _held = SessionLock::acquire(
        &fixture.state.path().join("users/alice"),
        &LockPolicy::default(),
    )
    .unwrap();

    let mut host = fixture.host();
    let err = manager.open(&mut host, &fixture.account).unwrap_err();

    assert!(matches!(err, SessionError::LockContended { attempts: 2, .. }));
    assert!(manager.store().is_empty());
    assert!(manager.invoker().calls().is_empty());
    assert!(!fixture.runtime_dir().exists());
    assert!(host.exported().is_empty());
}

#[test]
fn test_unbalanced_close_clamps_at_zero() {
    let fixture = Fixture::new();
    let manager = fixture.file_manager();

    let report = manager.close(&mut fixture.host(), &fixture.account).unwrap();

    assert!(report.is_success());
    assert_eq!(report.count.unwrap().next, 0);
    assert_eq!(report.edge(), None);
    assert!(manager.invoker().calls().is_empty());
    assert_eq!(manager.store().get("alice", SESSION_COUNT), None);
}

#[test]
fn test_corrupt_count_is_treated_as_zero() {
    let fixture = Fixture::new();
    let manager = fixture.file_manager();
    manager
        .store()
        .set("alice", SESSION_COUNT, Some("not a number"))
        .unwrap();

    let report = manager.open(&mut fixture.host(), &fixture.account).unwrap();

    assert_eq!(report.edge(), Some(Edge::Start));
    assert_eq!(
        manager.store().get("alice", SESSION_COUNT).as_deref(),
        Some("1")
    );
}

#[test]
fn test_persist_failure_is_reported() {
    let fixture = Fixture::new();
    let store = MemoryValueStore::new();
    store.set("alice", SESSION_COUNT, Some("1")).unwrap();
    let manager = SessionManager::new(
        fixture.config(),
        ReadOnlyStore(store),
        RecordingInvoker::default(),
    );

    let report = manager.close(&mut fixture.host(), &fixture.account).unwrap();

    assert_eq!(report.edge(), Some(Edge::Stop));
    assert!(matches!(
        report.failures.as_slice(),
        [SessionError::StoreWrite { .. }]
    ));
    assert_eq!(manager.invoker().runlevels(), vec!["none"]);
}

#[test]
fn test_unmanaged_directory_survives_last_close() {
    let fixture = Fixture::new();
    std::fs::create_dir(fixture.runtime_dir()).unwrap();
    let manager = fixture.file_manager();

    manager.open(&mut fixture.host(), &fixture.account).unwrap();
    let report = manager.close(&mut fixture.host(), &fixture.account).unwrap();

    assert_eq!(report.edge(), Some(Edge::Stop));
    assert_eq!(report.reclaimed, None);
    assert!(fixture.runtime_dir().is_dir());
}

#[test]
fn test_stale_managed_flag_recreates_directory() {
    let fixture = Fixture::new();
    let manager = fixture.file_manager();

    manager.open(&mut fixture.host(), &fixture.account).unwrap();
    manager.close(&mut fixture.host(), &fixture.account).unwrap();
    // the flag is never cleared
    assert!(manager.store().is_yes("alice", RUNDIR_MANAGED));

    let report = manager.open(&mut fixture.host(), &fixture.account).unwrap();
    assert_eq!(
        report.runtime_dir.map(|d| d.origin),
        Some(RuntimeDirOrigin::Created)
    );
    assert!(fixture.runtime_dir().is_dir());
}

#[test]
fn test_invalid_user_name_is_rejected() {
    let fixture = Fixture::new();
    let manager = fixture.file_manager();
    let account = Account::new("../escape", Uid::effective(), Gid::effective());

    let err = manager
        .open(&mut EnvironmentHost::new("../escape"), &account)
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidName { .. }));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_supervisor_calls_alternate(opens in proptest::collection::vec(any::<bool>(), 1..24)) {
        let fixture = Fixture::new();
        let manager = SessionManager::new(
            fixture.config(),
            MemoryValueStore::new(),
            RecordingInvoker::default(),
        );

        let mut open_sessions = 0u64;
        for open in opens {
            let mut host = fixture.host();
            if open {
                manager.open(&mut host, &fixture.account).unwrap();
                open_sessions += 1;
            } else {
                manager.close(&mut host, &fixture.account).unwrap();
                open_sessions = open_sessions.saturating_sub(1);
            }
            let stored = manager.store().get("alice", SESSION_COUNT);
            prop_assert_eq!(stored, (open_sessions > 0).then(|| open_sessions.to_string()));
            prop_assert_eq!(fixture.runtime_dir().exists(), open_sessions > 0);
        }

        let runlevels = manager.invoker().runlevels();
        for (i, runlevel) in runlevels.iter().enumerate() {
            let expected = if i % 2 == 0 { "default" } else { "none" };
            prop_assert_eq!(runlevel.as_str(), expected);
        }
        prop_assert_eq!(runlevels.len() % 2 == 1, open_sessions > 0);
    }
}
