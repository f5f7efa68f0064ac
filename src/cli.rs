//! CLI parsing and probe execution.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{PathActionLevel, SandboxConfiguration};
use crate::context;
use crate::error::{SandboxError, SandboxViolation};
use crate::guard;
use crate::manager::SandboxManager;
use crate::policy::SUBMISSION_ORIGIN;

/// Grading sandbox - inspect and dry-run the in-process sandbox policy
#[derive(Parser, Debug)]
#[command(name = "gsbx")]
#[command(about = "Grading sandbox - check what submitted code would be allowed to do")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Path to settings file (default: ~/.grading-sandbox.json)
    #[arg(short = 's', long = "settings")]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the effective configuration
    Show,

    /// Check a filesystem access as submitted code
    CheckPath {
        path: PathBuf,

        /// Requested access level
        #[arg(long, default_value = "read", value_parser = parse_level)]
        level: PathActionLevel,
    },

    /// Check a network connection as submitted code
    CheckConnect {
        host: String,

        /// Port to connect to (unspecified if omitted)
        port: Option<u16>,
    },
}

fn parse_level(raw: &str) -> Result<PathActionLevel, String> {
    PathActionLevel::from_action(raw).ok_or_else(|| {
        format!(
            "unknown level '{}', expected one of: {}",
            raw,
            PathActionLevel::ALL.map(|l| l.name()).join(", ")
        )
    })
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the settings file path.
    pub fn get_settings_path(&self) -> Option<PathBuf> {
        self.settings.clone().or_else(crate::config::default_settings_path)
    }
}

/// Operation evaluated by a dry run.
#[derive(Debug, Clone)]
pub enum Probe {
    Path { path: PathBuf, level: PathActionLevel },
    Connect { host: String, port: Option<u16> },
}

/// Install the sandbox, evaluate `probe` from a sandbox context, and uninstall.
///
/// The outer result carries lifecycle and I/O failures, the inner one the
/// gate's verdict.
pub fn run_probe(
    configuration: SandboxConfiguration,
    probe: Probe,
) -> Result<Result<(), SandboxViolation>, SandboxError> {
    let manager = SandboxManager::global();
    let token = manager.install(configuration)?;

    let verdict = context::spawn("gsbx-probe", move || {
        let _frame = crate::call_frame!(format!("{}::probe", SUBMISSION_ORIGIN));
        match probe {
            Probe::Path { path, level } => guard::check_path(&path, level),
            Probe::Connect { host, port } => guard::check_connect(&host, port),
        }
    })
    .and_then(|handle| {
        handle.join().map_err(|_| {
            SandboxError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "probe context panicked",
            ))
        })
    });

    manager.uninstall(&token)?;
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_check_path() {
        let cli = Cli::try_parse_from(["gsbx", "-d", "check-path", "/tmp/x", "--level", "write"]).unwrap();
        assert!(cli.debug);
        match cli.command {
            Command::CheckPath { path, level } => {
                assert_eq!(path, PathBuf::from("/tmp/x"));
                assert_eq!(level, PathActionLevel::Write);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_check_connect() {
        let cli = Cli::try_parse_from(["gsbx", "-s", "conf.json", "check-connect", "localhost", "8080"]).unwrap();
        assert_eq!(cli.settings, Some(PathBuf::from("conf.json")));
        match cli.command {
            Command::CheckConnect { host, port } => {
                assert_eq!(host, "localhost");
                assert_eq!(port, Some(8080));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_level() {
        assert!(Cli::try_parse_from(["gsbx", "check-path", "/tmp", "--level", "chmod"]).is_err());
    }
}
