//! Filesystem path rules.

use std::path::{Path, PathBuf};

use crate::config::{PathActionLevel, SandboxConfiguration};
use crate::error::PathResolutionError;
use crate::utils::path::absolutize;

/// Result of evaluating a path against the configured rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PathDecision {
    pub whitelisted: bool,
    pub blacklisted: bool,
}

impl PathDecision {
    /// Access is granted without looking at the call chain.
    pub fn is_granted(&self) -> bool {
        self.whitelisted && !self.blacklisted
    }
}

/// Evaluates path operations against whitelist and blacklist matchers.
#[derive(Debug, Default)]
pub struct PathAccessPolicy;

impl PathAccessPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `path` for `level`.
    ///
    /// A path that cannot be resolved is neither whitelisted nor blacklisted.
    pub fn evaluate(
        &self,
        config: &SandboxConfiguration,
        path: &Path,
        level: PathActionLevel,
    ) -> PathDecision {
        let resolved = match resolve(path) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(error = %e, level = %level, "path could not be resolved");
                return PathDecision::default();
            }
        };

        let blacklisted = config
            .blacklisted_paths
            .iter()
            .any(|matcher| matcher.covers(&resolved, level));
        let whitelisted = match config.whitelisted_paths {
            Some(ref matchers) => matchers.iter().any(|matcher| matcher.covers(&resolved, level)),
            None => absolutize(&config.execution_root)
                .map(|root| resolved.starts_with(root))
                .unwrap_or(false),
        };
        tracing::trace!(
            path = %resolved.display(),
            level = %level,
            whitelisted,
            blacklisted,
            "evaluated path"
        );
        PathDecision {
            whitelisted,
            blacklisted,
        }
    }
}

fn resolve(path: &Path) -> Result<PathBuf, PathResolutionError> {
    absolutize(path).map_err(|e| PathResolutionError {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
