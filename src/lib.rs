//! Grading sandbox - an in-process execution sandbox for automated assessment.
//!
//! Submitted code runs inside the grading process. While the sandbox is
//! installed, every cooperating sensitive call site asks the process-wide
//! guard before acting:
//! - call chains are classified by origin, and untrusted frames deny exits,
//!   process execution, foreign network access and the like
//! - filesystem access is limited to the execution root or explicit rules
//! - contexts started by submitted code are capped and reclaimed on teardown

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod gate;
pub mod guard;
pub mod manager;
pub mod policy;
pub mod utils;
pub mod violation;

pub use config::{PathActionLevel, PathMatcher, SandboxConfiguration};
pub use context::frames::CallFrame;
pub use error::{
    CheckCategory, ConfigError, LifecycleStateError, Result, SandboxError, SandboxViolation,
    TeardownFailure,
};
pub use gate::SandboxGate;
pub use guard::{Permission, SecurityGuard};
pub use manager::SandboxManager;
pub use violation::{SandboxViolationEvent, SandboxViolationStore};

/// Re-export commonly used items.
pub mod prelude {
    pub use crate::call_frame;
    pub use crate::config::{PathActionLevel, PathMatcher, SandboxConfiguration};
    pub use crate::context::{self, ContextHandle};
    pub use crate::error::{Result, SandboxError, SandboxViolation};
    pub use crate::guard;
    pub use crate::manager::SandboxManager;
}
