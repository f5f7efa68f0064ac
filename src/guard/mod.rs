//! The process-wide guard slot.
//!
//! Sensitive call sites ask the active [`SecurityGuard`] before acting. The
//! slot starts out with a [`PermissiveGuard`]; installing the sandbox swaps
//! its gate in, and uninstalling restores whatever was active before.

pub mod permission;

use std::convert::Infallible;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::config::PathActionLevel;
use crate::context::{ContextGroup, ContextHandle, ExecutionGroupManager};
use crate::error::SandboxViolation;

pub use permission::Permission;

/// Outcome of a guard check.
pub type CheckResult = Result<(), SandboxViolation>;

/// Interception contract for security-sensitive operations.
///
/// Every check defaults to allowing the operation.
pub trait SecurityGuard: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Terminating the process.
    fn check_exit(&self, _status: i32) -> CheckResult {
        Ok(())
    }

    /// Connecting to `host`. `None` stands for an unspecified port.
    fn check_connect(&self, _host: &str, _port: Option<u16>) -> CheckResult {
        Ok(())
    }

    /// Accepting a connection from `host:port`.
    fn check_accept(&self, _host: &str, _port: u16) -> CheckResult {
        Ok(())
    }

    /// Listening on a local port.
    fn check_listen(&self, _port: u16) -> CheckResult {
        Ok(())
    }

    /// Joining or sending to a multicast group.
    fn check_multicast(&self, _group: IpAddr) -> CheckResult {
        Ok(())
    }

    /// Running an external command.
    fn check_exec(&self, _command: &str) -> CheckResult {
        Ok(())
    }

    /// Submitting a print job.
    fn check_print_job_access(&self) -> CheckResult {
        Ok(())
    }

    /// Creating a dynamic code loader (plugin or library loader).
    fn check_create_loader(&self) -> CheckResult {
        Ok(())
    }

    /// Mutating another execution context (interrupting it, renaming it, ...).
    fn check_context_access(&self, _target: &ContextHandle) -> CheckResult {
        Ok(())
    }

    /// Mutating a context group, including starting a context in it.
    fn check_group_access(&self, _group: ContextGroup) -> CheckResult {
        Ok(())
    }

    /// Using code from a namespace such as `std::process`.
    fn check_package_access(&self, _namespace: &str) -> CheckResult {
        Ok(())
    }

    /// Defining code inside a namespace.
    fn check_package_definition(&self, _namespace: &str) -> CheckResult {
        Ok(())
    }

    /// Generic capability check.
    fn check_permission(&self, _permission: &Permission) -> CheckResult {
        Ok(())
    }

    /// Filesystem access at the given level.
    fn check_path(&self, path: &Path, level: PathActionLevel) -> CheckResult {
        self.check_permission(&Permission::file(path, level.name()))
    }

    /// Group new contexts are started in, if the guard manages one.
    fn designated_group(&self) -> Option<&ExecutionGroupManager> {
        None
    }
}

/// Guard that allows everything. Active whenever no sandbox is installed.
#[derive(Debug, Default)]
pub struct PermissiveGuard;

impl SecurityGuard for PermissiveGuard {
    fn name(&self) -> &str {
        "permissive"
    }
}

static ACTIVE: Lazy<RwLock<Arc<dyn SecurityGuard>>> = Lazy::new(|| {
    let permissive: Arc<dyn SecurityGuard> = Arc::new(PermissiveGuard);
    RwLock::new(permissive)
});

/// The currently active guard.
pub fn current() -> Arc<dyn SecurityGuard> {
    ACTIVE.read().clone()
}

/// Replace the active guard, returning the previous one.
///
/// The active guard is asked for the `set_guard` capability first.
pub fn replace(guard: Arc<dyn SecurityGuard>) -> Result<Arc<dyn SecurityGuard>, SandboxViolation> {
    // Checked outside the slot lock: denials notify listeners that may consult the slot.
    current().check_permission(&Permission::runtime(permission::SET_GUARD))?;
    let mut active = ACTIVE.write();
    tracing::debug!(from = active.name(), to = guard.name(), "replacing process-wide guard");
    Ok(std::mem::replace(&mut *active, guard))
}

/// Whether `guard` is the active guard.
pub fn is_current(guard: &Arc<dyn SecurityGuard>) -> bool {
    same_guard(&ACTIVE.read(), guard)
}

/// Identity comparison of two guards.
pub fn same_guard(a: &Arc<dyn SecurityGuard>, b: &Arc<dyn SecurityGuard>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

pub fn check_exit(status: i32) -> CheckResult {
    current().check_exit(status)
}

pub fn check_connect(host: &str, port: Option<u16>) -> CheckResult {
    current().check_connect(host, port)
}

pub fn check_accept(host: &str, port: u16) -> CheckResult {
    current().check_accept(host, port)
}

pub fn check_listen(port: u16) -> CheckResult {
    current().check_listen(port)
}

pub fn check_multicast(group: IpAddr) -> CheckResult {
    current().check_multicast(group)
}

pub fn check_exec(command: &str) -> CheckResult {
    current().check_exec(command)
}

pub fn check_permission(permission: &Permission) -> CheckResult {
    current().check_permission(permission)
}

pub fn check_path(path: &Path, level: PathActionLevel) -> CheckResult {
    current().check_path(path, level)
}

/// Exit the process if the active guard allows it.
pub fn exit(status: i32) -> Result<Infallible, SandboxViolation> {
    check_exit(status)?;
    std::process::exit(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl SecurityGuard for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_permissive_guard_allows_everything() {
        let guard = PermissiveGuard;
        assert!(guard.check_exit(1).is_ok());
        assert!(guard.check_connect("example.com", Some(443)).is_ok());
        assert!(guard.check_exec("rm -rf /").is_ok());
        assert!(guard
            .check_path(Path::new("/etc/shadow"), PathActionLevel::Write)
            .is_ok());
        assert!(guard.designated_group().is_none());
    }

    #[test]
    fn test_same_guard_is_identity() {
        let a: Arc<dyn SecurityGuard> = Arc::new(Named("a"));
        let b: Arc<dyn SecurityGuard> = Arc::new(Named("a"));
        assert!(same_guard(&a, &a.clone()));
        assert!(!same_guard(&a, &b));
    }
}
