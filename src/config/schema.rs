//! Sandbox configuration schema.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::matcher::PathMatcher;
use crate::error::{ConfigError, SandboxError};

/// Configuration of an installed sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConfiguration {
    /// Loopback port submitted code may connect to, accept on or listen on.
    #[serde(default)]
    pub allowed_local_port: Option<u16>,

    /// Ceiling on concurrently running sandbox contexts.
    /// Without a ceiling, submitted code cannot start contexts at all.
    #[serde(default)]
    pub allowed_thread_count: Option<usize>,

    /// Paths accessible to submitted code. `None` means "the execution root".
    #[serde(default)]
    pub whitelisted_paths: Option<Vec<PathMatcher>>,

    /// Paths denied to submitted code (overrides the whitelist).
    #[serde(default)]
    pub blacklisted_paths: Vec<PathMatcher>,

    /// Directory the submission runs in.
    #[serde(default = "default_execution_root")]
    pub execution_root: PathBuf,

    /// Frame origins trusted in addition to the built-in trusted namespaces.
    #[serde(default)]
    pub whitelisted_class_names: BTreeSet<String>,
}

fn default_execution_root() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"))
}

impl Default for SandboxConfiguration {
    fn default() -> Self {
        Self::new(default_execution_root())
    }
}

impl SandboxConfiguration {
    /// Create a configuration rooted at `execution_root` with everything else locked down.
    pub fn new(execution_root: impl Into<PathBuf>) -> Self {
        Self {
            allowed_local_port: None,
            allowed_thread_count: None,
            whitelisted_paths: None,
            blacklisted_paths: Vec::new(),
            execution_root: execution_root.into(),
            whitelisted_class_names: BTreeSet::new(),
        }
    }

    pub fn with_allowed_local_port(mut self, port: u16) -> Self {
        self.allowed_local_port = Some(port);
        self
    }

    pub fn with_allowed_thread_count(mut self, count: usize) -> Self {
        self.allowed_thread_count = Some(count);
        self
    }

    /// Add a whitelist rule, switching from "execution root only" to explicit rules.
    pub fn with_whitelisted_path(mut self, matcher: PathMatcher) -> Self {
        self.whitelisted_paths.get_or_insert_with(Vec::new).push(matcher);
        self
    }

    pub fn with_blacklisted_path(mut self, matcher: PathMatcher) -> Self {
        self.blacklisted_paths.push(matcher);
        self
    }

    pub fn with_whitelisted_class_name(mut self, origin: impl Into<String>) -> Self {
        self.whitelisted_class_names.insert(origin.into());
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), SandboxError> {
        if !self.execution_root.is_absolute() {
            return Err(ConfigError::ValidationError(format!(
                "execution root '{}' must be absolute",
                self.execution_root.display()
            ))
            .into());
        }

        if self.allowed_local_port == Some(0) {
            return Err(ConfigError::ValidationError(
                "allowed local port cannot be 0".to_string(),
            )
            .into());
        }

        if let Some(origin) = self
            .whitelisted_class_names
            .iter()
            .find(|origin| origin.trim().is_empty())
        {
            return Err(ConfigError::ValidationError(format!(
                "whitelisted origin '{}' is blank",
                origin
            ))
            .into());
        }

        Ok(())
    }

    /// One-line summary used in lifecycle logs.
    pub fn short_desc(&self) -> String {
        let whitelist = match self.whitelisted_paths {
            Some(ref paths) => paths
                .iter()
                .map(|p| p.source())
                .collect::<Vec<_>>()
                .join(", "),
            None => format!("{}/**", self.execution_root.display()),
        };
        let blacklist = self
            .blacklisted_paths
            .iter()
            .map(|p| p.source())
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "SandboxConfiguration[port={}, threads={}, whitelist=[{}], blacklist=[{}], trusted={}]",
            self.allowed_local_port
                .map(|p| p.to_string())
                .unwrap_or_else(|| "none".to_string()),
            self.allowed_thread_count
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string()),
            whitelist,
            blacklist,
            self.whitelisted_class_names.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathActionLevel;

    #[test]
    fn test_builder() {
        let config = SandboxConfiguration::new("/srv/run")
            .with_allowed_local_port(8080)
            .with_allowed_thread_count(4)
            .with_whitelisted_path(PathMatcher::up_to("/srv/run/**", PathActionLevel::Write).unwrap())
            .with_whitelisted_class_name("student::Helper");

        assert_eq!(config.allowed_local_port, Some(8080));
        assert_eq!(config.allowed_thread_count, Some(4));
        assert_eq!(config.whitelisted_paths.as_ref().map(Vec::len), Some(1));
        assert!(config.whitelisted_class_names.contains("student::Helper"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(SandboxConfiguration::new("relative/root").validate().is_err());
        assert!(SandboxConfiguration::new("/srv")
            .with_allowed_local_port(0)
            .validate()
            .is_err());
        assert!(SandboxConfiguration::new("/srv")
            .with_whitelisted_class_name("  ")
            .validate()
            .is_err());
    }

    #[test]
    fn test_short_desc() {
        let config = SandboxConfiguration::new("/srv/run").with_allowed_local_port(8080);
        let desc = config.short_desc();
        assert!(desc.contains("port=8080"));
        assert!(desc.contains("threads=none"));
        assert!(desc.contains("whitelist=[/srv/run/**]"));
    }
}
