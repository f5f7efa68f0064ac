//! Capabilities checked through the generic permission entry point.

use std::path::PathBuf;

/// Runtime capabilities that are always granted.
pub const ALLOWED_RUNTIME_CAPABILITIES: &[&str] = &["get_loader", "access_system_modules"];

/// Runtime capabilities that are never granted to sandboxed code.
pub const DENIED_RUNTIME_CAPABILITIES: &[&str] = &["manage_process", "shutdown_hooks", "create_guard"];

/// Redirecting standard streams.
pub const SET_IO: &str = "set_io";

/// Replacing the process-wide guard.
pub const SET_GUARD: &str = "set_guard";

/// A capability requested through [`SecurityGuard::check_permission`](super::SecurityGuard::check_permission).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    /// Process runtime capability, e.g. `set_io` or `set_guard`.
    Runtime(String),
    /// Filesystem access with comma separated actions (`read`, `write`, ...).
    File { path: PathBuf, actions: String },
    /// Changing how objects are serialized.
    Serialization(String),
    /// Desktop UI access.
    Ui(String),
    /// Process management and monitoring interfaces.
    Management(String),
    /// Reflection-sensitive access, e.g. bypassing visibility.
    Reflection(String),
    /// Network stack capability.
    Net(String),
    /// Socket capability for a `host:port` target.
    Socket { target: String, actions: String },
    /// Security policy capability, e.g. `get_policy` or `set_property.x`.
    Security(String),
    /// TLS configuration.
    Tls(String),
    /// Authentication subsystem.
    Auth(String),
}

impl Permission {
    pub fn runtime(name: impl Into<String>) -> Self {
        Permission::Runtime(name.into())
    }

    pub fn file(path: impl Into<PathBuf>, actions: impl Into<String>) -> Self {
        Permission::File {
            path: path.into(),
            actions: actions.into(),
        }
    }

    /// Kind of the capability.
    pub fn kind(&self) -> &'static str {
        match self {
            Permission::Runtime(_) => "runtime",
            Permission::File { .. } => "file",
            Permission::Serialization(_) => "serialization",
            Permission::Ui(_) => "ui",
            Permission::Management(_) => "management",
            Permission::Reflection(_) => "reflection",
            Permission::Net(_) => "net",
            Permission::Socket { .. } => "socket",
            Permission::Security(_) => "security",
            Permission::Tls(_) => "tls",
            Permission::Auth(_) => "auth",
        }
    }

    /// Name of the capability (the path for file access, the target for sockets).
    pub fn name(&self) -> String {
        match self {
            Permission::File { path, .. } => path.display().to_string(),
            Permission::Socket { target, .. } => target.clone(),
            Permission::Runtime(name)
            | Permission::Serialization(name)
            | Permission::Ui(name)
            | Permission::Management(name)
            | Permission::Reflection(name)
            | Permission::Net(name)
            | Permission::Security(name)
            | Permission::Tls(name)
            | Permission::Auth(name) => name.clone(),
        }
    }

    /// Requested actions, if the capability has any.
    pub fn actions(&self) -> Option<&str> {
        match self {
            Permission::File { actions, .. } | Permission::Socket { actions, .. } => Some(actions),
            _ => None,
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.actions() {
            Some(actions) => write!(f, "({} \"{}\" \"{}\")", self.kind(), self.name(), actions),
            None => write!(f, "({} \"{}\")", self.kind(), self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            Permission::file("/tmp/x", "read,write").to_string(),
            "(file \"/tmp/x\" \"read,write\")"
        );
        assert_eq!(
            Permission::runtime(SET_IO).to_string(),
            "(runtime \"set_io\")"
        );
    }
}
