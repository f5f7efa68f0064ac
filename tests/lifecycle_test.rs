//! Install / configure / uninstall through the process-wide manager.

use std::sync::Arc;
use std::time::Duration;

use grading_sandbox::guard::{self, PermissiveGuard};
use grading_sandbox::prelude::*;
use grading_sandbox::{CheckCategory, LifecycleStateError};
use serial_test::serial;

fn lifecycle_error(result: Result<impl std::fmt::Debug>) -> LifecycleStateError {
    match result {
        Err(SandboxError::Lifecycle(e)) => e,
        other => panic!("expected lifecycle error, got {:?}", other),
    }
}

#[test]
#[serial]
fn test_token_law() {
    let root = tempfile::tempdir().unwrap();
    let manager = SandboxManager::global();

    let token = manager.install(SandboxConfiguration::new(root.path())).unwrap();
    assert!(manager.is_installed());
    assert_eq!(
        lifecycle_error(manager.install(SandboxConfiguration::new(root.path()))),
        LifecycleStateError::AlreadyInstalled
    );

    assert_eq!(
        lifecycle_error(manager.configure("forged", SandboxConfiguration::new(root.path()))),
        LifecycleStateError::InvalidToken
    );
    assert_eq!(
        lifecycle_error(manager.uninstall("forged")),
        LifecycleStateError::InvalidToken
    );
    assert!(manager.is_installed());

    manager
        .configure(&token, SandboxConfiguration::new(root.path()).with_allowed_local_port(8080))
        .unwrap();
    assert_eq!(
        manager.configuration().and_then(|c| c.allowed_local_port),
        Some(8080)
    );

    manager.uninstall(&token).unwrap();
    assert!(!manager.is_installed());
    assert!(manager.configuration().is_none());
    assert_eq!(lifecycle_error(manager.uninstall(&token)), LifecycleStateError::NotInstalled);
    assert_eq!(
        lifecycle_error(manager.configure(&token, SandboxConfiguration::new(root.path()))),
        LifecycleStateError::NotInstalled
    );
}

#[test]
#[serial]
fn test_invalid_configuration_is_rejected() {
    let manager = SandboxManager::global();
    let result = manager.install(SandboxConfiguration::new("relative/root"));
    assert!(matches!(result, Err(SandboxError::Config(_))));
    assert!(!manager.is_installed());
}

#[test]
#[serial]
fn test_repeated_cycles_leave_no_contexts() {
    let root = tempfile::tempdir().unwrap();
    let manager = SandboxManager::global();

    for _ in 0..2 {
        let token = manager
            .install(SandboxConfiguration::new(root.path()).with_allowed_thread_count(4))
            .unwrap();
        let handles: Vec<_> = (0..2)
            .map(|i| {
                context::spawn(format!("sleeper-{}", i), || {
                    let _ = context::sleep(Duration::from_secs(30));
                })
                .unwrap()
            })
            .collect();
        assert_eq!(manager.gate().group().active_count(), 2);

        manager.uninstall(&token).unwrap();
        assert_eq!(manager.gate().group().active_count(), 0);
        for handle in handles {
            assert!(handle.context().is_managed());
            handle.join().unwrap();
        }
    }
}

#[test]
#[serial]
fn test_guard_cannot_be_swapped_while_installed() {
    let root = tempfile::tempdir().unwrap();
    let manager = SandboxManager::global();
    let token = manager.install(SandboxConfiguration::new(root.path())).unwrap();

    let denied = guard::replace(Arc::new(PermissiveGuard)).err().expect("replace should be denied");
    assert_eq!(denied.category, CheckCategory::Permission);
    assert!(manager.is_installed());

    manager.uninstall(&token).unwrap();
    assert!(!manager.is_installed());
}

#[test]
#[serial]
fn test_denials_are_recorded() {
    let root = tempfile::tempdir().unwrap();
    let manager = SandboxManager::global();
    let store = manager.violation_store();
    store.clear();
    let token = manager.install(SandboxConfiguration::new(root.path())).unwrap();

    let verdict = context::spawn("recorded", || guard::check_exec("curl example.com"))
        .unwrap()
        .join()
        .unwrap();
    manager.uninstall(&token).unwrap();

    assert_eq!(verdict.unwrap_err().category, CheckCategory::Execute);
    let recorded = store.get_violations_for_context("recorded");
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].category, CheckCategory::Execute);
}
