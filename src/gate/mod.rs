//! The sandbox gate: the guard installed while submitted code runs.
//!
//! Every entry point runs under a per-thread recursion guard, lets an aborted
//! context unwind, and then evaluates the rule for its category. Most rules
//! come down to "allowed unless the call chain contains untrusted frames".

mod recursion;

use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use arc_swap::ArcSwapOption;

use crate::config::{PathActionLevel, SandboxConfiguration};
use crate::context::frames::CallFrame;
use crate::context::{self, ContextGroup, ContextHandle, ExecutionGroupManager};
use crate::error::{CheckCategory, SandboxViolation};
use crate::guard::permission::{
    ALLOWED_RUNTIME_CAPABILITIES, DENIED_RUNTIME_CAPABILITIES, SET_GUARD, SET_IO,
};
use crate::guard::{CheckResult, Permission, SecurityGuard};
use crate::policy::{CallStackPolicy, PathAccessPolicy, TRUSTED_ORIGINS};
use crate::violation::{SandboxViolationEvent, SandboxViolationStore};

use self::recursion::RecursionGuard;

/// Namespaces only trusted code may use.
pub const SENSITIVE_NAMESPACES: &[&str] = &[
    "std::process",
    "std::os",
    "std::ffi",
    "std::intrinsics",
    "libc",
    "nix",
];

/// Name of the execution group contexts join while the gate is installed.
pub const SANDBOX_GROUP_NAME: &str = "grading-sandbox";

/// Process-wide interception point for sandboxed code.
pub struct SandboxGate {
    configuration: ArcSwapOption<SandboxConfiguration>,
    call_stack: CallStackPolicy,
    paths: PathAccessPolicy,
    group: ExecutionGroupManager,
    main_context: ThreadId,
    partly_disabled: AtomicBool,
    violations: Arc<SandboxViolationStore>,
}

impl SandboxGate {
    /// Create a gate. The calling thread becomes the main context.
    pub(crate) fn new(violations: Arc<SandboxViolationStore>) -> Self {
        let main = std::thread::current();
        if main.name() != Some("main") {
            tracing::warn!(
                thread = main.name().unwrap_or("<unnamed>"),
                "sandbox gate created outside the main thread"
            );
        }
        Self {
            configuration: ArcSwapOption::empty(),
            call_stack: CallStackPolicy::new(),
            paths: PathAccessPolicy::new(),
            group: ExecutionGroupManager::new(SANDBOX_GROUP_NAME),
            main_context: main.id(),
            partly_disabled: AtomicBool::new(false),
            violations,
        }
    }

    pub fn configuration(&self) -> Option<Arc<SandboxConfiguration>> {
        self.configuration.load_full()
    }

    pub(crate) fn set_configuration(&self, configuration: Option<Arc<SandboxConfiguration>>) {
        self.configuration.store(configuration);
    }

    pub fn group(&self) -> &ExecutionGroupManager {
        &self.group
    }

    pub fn call_stack(&self) -> &CallStackPolicy {
        &self.call_stack
    }

    pub fn violations(&self) -> &Arc<SandboxViolationStore> {
        &self.violations
    }

    /// Whether the gate is being swapped out of the guard slot.
    pub fn is_partly_disabled(&self) -> bool {
        self.partly_disabled.load(Ordering::SeqCst)
    }

    /// Set the partly-disabled flag, returning the previous value.
    pub(crate) fn set_partly_disabled(&self, disabled: bool) -> bool {
        self.partly_disabled.swap(disabled, Ordering::SeqCst)
    }

    /// Trust `target` for the lifetime of the installation.
    ///
    /// Only trusted callers may whitelist contexts.
    pub fn request_whitelisting(&self, target: &ContextHandle) -> CheckResult {
        self.guarded(|| {
            tracing::info!(context = %target, "whitelisting requested");
            if !self.call_stack.is_current_context_trusted() {
                let config = self.configuration.load();
                let frames = self.call_stack.untrusted_frames(config.as_deref());
                return self.deny(
                    CheckCategory::Whitelisting,
                    format!("whitelisting {} requires a trusted caller", target),
                    &frames,
                );
            }
            self.call_stack.add_whitelisted(target.id());
            tracing::info!(context = %target, "context whitelisted");
            Ok(())
        })
    }

    fn guarded(&self, check: impl FnOnce() -> CheckResult) -> CheckResult {
        let recursion = RecursionGuard::enter();
        if recursion.is_nested() {
            return Ok(());
        }
        context::checkpoint();
        check()
    }

    fn deny_if_untrusted(
        &self,
        category: CheckCategory,
        reason: impl FnOnce() -> String,
    ) -> CheckResult {
        let config = self.configuration.load();
        let frames = self.call_stack.untrusted_frames(config.as_deref());
        if frames.is_empty() {
            return Ok(());
        }
        self.deny(category, reason(), &frames)
    }

    fn deny(&self, category: CheckCategory, reason: String, frames: &[CallFrame]) -> CheckResult {
        let violation = SandboxViolation::new(category, reason, frames.first().cloned());
        let chain: Vec<String> = frames.iter().map(ToString::to_string).collect();
        tracing::warn!(
            category = category.name(),
            frames = ?chain,
            "denied: {}",
            violation
        );
        self.violations
            .add_violation(SandboxViolationEvent::new(&violation));
        Err(violation)
    }

    fn check_endpoint(&self, host: &str, port: Option<u16>) -> CheckResult {
        let config = self.configuration.load();
        let frames = self.call_stack.untrusted_frames(config.as_deref());
        if frames.is_empty() {
            return Ok(());
        }
        if let Some(config) = config.as_deref() {
            let port_allowed = port.is_none() || port == config.allowed_local_port;
            if is_loopback(host) && port_allowed {
                return Ok(());
            }
        }
        let target = match port {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        self.deny(
            CheckCategory::Network,
            format!("network access to {} is not allowed", target),
            &frames,
        )
    }

    fn evaluate_path(&self, path: &Path, level: PathActionLevel) -> CheckResult {
        if let Some(config) = self.configuration.load().as_deref() {
            if self.paths.evaluate(config, path, level).is_granted() {
                return Ok(());
            }
        }
        self.deny_if_untrusted(CheckCategory::Path, || {
            format!("{} access to '{}' is not allowed", level, path.display())
        })
    }

    fn evaluate_permission(&self, permission: &Permission) -> CheckResult {
        let denied = || format!("{} is not allowed", permission);
        match permission {
            Permission::Runtime(name) => {
                let name = name.as_str();
                if ALLOWED_RUNTIME_CAPABILITIES.contains(&name) {
                    Ok(())
                } else if DENIED_RUNTIME_CAPABILITIES.contains(&name) {
                    self.deny_always(denied())
                } else if name == SET_IO {
                    self.deny_if_untrusted(CheckCategory::Permission, denied)
                } else if name == SET_GUARD {
                    if self.is_partly_disabled() {
                        Ok(())
                    } else {
                        self.deny_always(denied())
                    }
                } else {
                    Ok(())
                }
            }
            Permission::Serialization(_)
            | Permission::Ui(_)
            | Permission::Tls(_)
            | Permission::Auth(_) => self.deny_always(denied()),
            Permission::Management(_) | Permission::Reflection(_) => {
                self.deny_if_untrusted(CheckCategory::Permission, denied)
            }
            Permission::Net(_) | Permission::Socket { .. } => {
                let port = self
                    .configuration
                    .load()
                    .as_deref()
                    .and_then(|config| config.allowed_local_port);
                match port {
                    Some(_) => Ok(()),
                    None => self.deny_always(denied()),
                }
            }
            Permission::Security(name) => {
                if name.starts_with("get_policy") || name.starts_with("get_property") {
                    Ok(())
                } else {
                    self.deny_if_untrusted(CheckCategory::Permission, denied)
                }
            }
            Permission::File { path, actions } => {
                self.evaluate_path(path, PathActionLevel::of_actions(actions))
            }
        }
    }

    fn deny_always(&self, reason: String) -> CheckResult {
        let config = self.configuration.load();
        let frames = self.call_stack.untrusted_frames(config.as_deref());
        self.deny(CheckCategory::Permission, reason, &frames)
    }
}

impl SecurityGuard for SandboxGate {
    fn name(&self) -> &str {
        "grading-sandbox"
    }

    fn check_exit(&self, status: i32) -> CheckResult {
        self.guarded(|| {
            if std::thread::current().id() != self.main_context {
                let config = self.configuration.load();
                let frames = self.call_stack.untrusted_frames(config.as_deref());
                return self.deny(
                    CheckCategory::Exit,
                    format!("exit({}) is only allowed from the main context", status),
                    &frames,
                );
            }
            self.deny_if_untrusted(CheckCategory::Exit, || {
                format!("exit({}) is not allowed", status)
            })
        })
    }

    fn check_connect(&self, host: &str, port: Option<u16>) -> CheckResult {
        self.guarded(|| self.check_endpoint(host, port))
    }

    fn check_accept(&self, host: &str, port: u16) -> CheckResult {
        self.guarded(|| self.check_endpoint(host, Some(port)))
    }

    fn check_listen(&self, port: u16) -> CheckResult {
        self.guarded(|| self.check_endpoint("localhost", Some(port)))
    }

    fn check_multicast(&self, group: IpAddr) -> CheckResult {
        self.guarded(|| {
            self.deny_if_untrusted(CheckCategory::Network, || {
                format!("multicast to {} is not allowed", group)
            })
        })
    }

    fn check_exec(&self, command: &str) -> CheckResult {
        self.guarded(|| {
            self.deny_if_untrusted(CheckCategory::Execute, || {
                format!("executing '{}' is not allowed", command)
            })
        })
    }

    fn check_print_job_access(&self) -> CheckResult {
        self.guarded(|| {
            self.deny_if_untrusted(CheckCategory::Printer, || {
                "print jobs are not allowed".to_string()
            })
        })
    }

    fn check_create_loader(&self) -> CheckResult {
        self.guarded(|| {
            self.deny_if_untrusted(CheckCategory::Loader, || {
                "creating code loaders is not allowed".to_string()
            })
        })
    }

    fn check_context_access(&self, target: &ContextHandle) -> CheckResult {
        self.guarded(|| {
            if !target.is_alive() || self.group.contains(target.id()) {
                return Ok(());
            }
            self.deny_if_untrusted(CheckCategory::ContextAccess, || {
                format!("access to context {} is not allowed", target)
            })
        })
    }

    fn check_group_access(&self, group: ContextGroup) -> CheckResult {
        self.guarded(|| {
            if group != ContextGroup::Sandbox {
                self.deny_if_untrusted(CheckCategory::GroupAccess, || {
                    "modifying host context groups is not allowed".to_string()
                })?;
            }
            let ceiling = self
                .configuration
                .load()
                .as_deref()
                .and_then(|config| config.allowed_thread_count);
            match self.group.admit_new_context(ceiling) {
                Ok(()) => Ok(()),
                Err(refused) => {
                    self.deny_if_untrusted(CheckCategory::GroupAccess, || refused.to_string())
                }
            }
        })
    }

    fn check_package_access(&self, namespace: &str) -> CheckResult {
        self.guarded(|| {
            if !SENSITIVE_NAMESPACES
                .iter()
                .any(|sensitive| namespace.starts_with(sensitive))
            {
                return Ok(());
            }
            self.deny_if_untrusted(CheckCategory::Package, || {
                format!("use of '{}' is not allowed", namespace)
            })
        })
    }

    fn check_package_definition(&self, namespace: &str) -> CheckResult {
        self.guarded(|| {
            tracing::info!(namespace, "namespace definition");
            if !is_reserved_namespace(namespace) {
                return Ok(());
            }
            let config = self.configuration.load();
            let frames = self.call_stack.untrusted_frames(config.as_deref());
            self.deny(
                CheckCategory::Package,
                format!("defining '{}' is not allowed", namespace),
                &frames,
            )
        })
    }

    fn check_permission(&self, permission: &Permission) -> CheckResult {
        self.guarded(|| self.evaluate_permission(permission))
    }

    fn check_path(&self, path: &Path, level: PathActionLevel) -> CheckResult {
        self.guarded(|| self.evaluate_path(path, level))
    }

    fn designated_group(&self) -> Option<&ExecutionGroupManager> {
        Some(&self.group)
    }
}

fn is_loopback(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

fn is_reserved_namespace(namespace: &str) -> bool {
    TRUSTED_ORIGINS.iter().any(|prefix| {
        namespace.starts_with(prefix) || namespace == prefix.trim_end_matches("::")
    })
}
