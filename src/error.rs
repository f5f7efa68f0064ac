//! Error types for the grading sandbox.

use thiserror::Error;

use crate::context::frames::CallFrame;

/// Main error type for the grading sandbox.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error(transparent)]
    Violation(#[from] SandboxViolation),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleStateError),

    #[error(transparent)]
    Teardown(#[from] TeardownFailure),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Category of a sensitive operation, used in denials and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckCategory {
    Exit,
    Network,
    Execute,
    Printer,
    Loader,
    ContextAccess,
    GroupAccess,
    Package,
    Permission,
    Path,
    Whitelisting,
}

impl CheckCategory {
    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            CheckCategory::Exit => "exit",
            CheckCategory::Network => "network",
            CheckCategory::Execute => "execute",
            CheckCategory::Printer => "printer",
            CheckCategory::Loader => "loader",
            CheckCategory::ContextAccess => "context-access",
            CheckCategory::GroupAccess => "group-access",
            CheckCategory::Package => "package",
            CheckCategory::Permission => "permission",
            CheckCategory::Path => "path",
            CheckCategory::Whitelisting => "whitelisting",
        }
    }
}

impl std::fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A sensitive operation was denied by the sandbox.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct SandboxViolation {
    /// The category of the denied operation.
    pub category: CheckCategory,
    /// Human readable reason, including the implicated frame if any.
    pub message: String,
    /// The first untrusted frame that participated in the call.
    pub frame: Option<CallFrame>,
}

impl SandboxViolation {
    /// Create a new violation, appending the implicated frame location to the reason.
    pub fn new(category: CheckCategory, reason: impl Into<String>, frame: Option<CallFrame>) -> Self {
        let reason = reason.into();
        let message = match frame {
            Some(ref frame) => format!("{} (caused by {})", reason, frame),
            None => reason,
        };
        Self {
            category,
            message,
            frame,
        }
    }
}

/// Misuse of the install/configure/uninstall lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleStateError {
    #[error("sandbox is already installed")]
    AlreadyInstalled,

    #[error("sandbox is not installed")]
    NotInstalled,

    #[error("access token is invalid")]
    InvalidToken,

    #[error("sandbox guard is already being swapped out")]
    AlreadyDisabled,
}

/// Execution contexts survived reclamation during teardown.
#[derive(Error, Debug, Clone)]
#[error("{} execution context(s) still active after teardown: [{}]", .contexts.len(), .contexts.join(", "))]
pub struct TeardownFailure {
    /// Descriptions of the contexts that could not be reclaimed.
    pub contexts: Vec<String>,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid path pattern '{pattern}': {reason}")]
    InvalidPathPattern { pattern: String, reason: String },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Failure to resolve a path for policy evaluation. Never surfaced to callers.
#[derive(Error, Debug)]
#[error("cannot resolve '{path}': {reason}")]
pub(crate) struct PathResolutionError {
    pub path: String,
    pub reason: String,
}

pub type Result<T> = std::result::Result<T, SandboxError>;
