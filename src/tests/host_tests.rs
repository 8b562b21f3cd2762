use super::*;

#[test]
fn test_seeded_environment_is_not_exported() {
    let host = EnvironmentHost::new("alice").with_env([("PATH", "/bin"), ("LANG", "C")]);

    assert_eq!(host.username().as_deref(), Some("alice"));
    assert_eq!(host.getenv("PATH").as_deref(), Some("/bin"));
    assert!(host.exported().is_empty());
    assert_eq!(
        host.env_list(),
        vec![
            ("LANG".to_string(), "C".to_string()),
            ("PATH".to_string(), "/bin".to_string()),
        ]
    );
}

#[test]
fn test_putenv_records_exports_once() {
    let mut host = EnvironmentHost::new("alice");
    host.putenv("XDG_RUNTIME_DIR", "/run/user/1000").unwrap();
    host.putenv("XDG_RUNTIME_DIR", "/run/user/1001").unwrap();

    assert_eq!(
        host.exported(),
        vec![("XDG_RUNTIME_DIR".to_string(), "/run/user/1001".to_string())]
    );
}

#[test]
fn test_putenv_rejects_malformed_variables() {
    let mut host = EnvironmentHost::anonymous();
    assert!(host.putenv("", "x").is_err());
    assert!(host.putenv("A=B", "x").is_err());
    assert!(host.putenv("A", "nul\0byte").is_err());
    assert!(host.exported().is_empty());
    assert_eq!(host.username(), None);
}
