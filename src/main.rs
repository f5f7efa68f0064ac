//! CLI entry point for the grading sandbox (gsbx).

use std::process::ExitCode;

use grading_sandbox::cli::{run_probe, Cli, Command, Probe};
use grading_sandbox::config::{load_config, load_default_config};
use grading_sandbox::manager::SandboxManager;
use grading_sandbox::utils::{init_debug_logging, is_debug_enabled};

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    // Initialize logging
    init_debug_logging(cli.debug);

    // Load configuration
    let config = match cli.get_settings_path() {
        Some(path) if path.exists() => match load_config(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config from {:?}: {}", path, e);
                return ExitCode::from(1);
            }
        },
        _ => match load_default_config() {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading default config: {}", e);
                return ExitCode::from(1);
            }
        },
    };

    let probe = match cli.command {
        Command::Show => {
            tracing::debug!("{}", config.short_desc());
            return match serde_json::to_string_pretty(&config) {
                Ok(json) => {
                    println!("{}", json);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Failed to render configuration: {}", e);
                    ExitCode::from(1)
                }
            };
        }
        Command::CheckPath { path, level } => Probe::Path { path, level },
        Command::CheckConnect { host, port } => Probe::Connect { host, port },
    };

    let outcome = run_probe(config, probe);
    if is_debug_enabled() {
        for event in SandboxManager::global().violation_store().get_violations(None) {
            eprintln!("[{}] {}", event.category, event.message);
        }
    }

    match outcome {
        Ok(Ok(())) => {
            println!("allowed");
            ExitCode::SUCCESS
        }
        Ok(Err(violation)) => {
            println!("denied: {}", violation);
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("Sandbox error: {}", e);
            ExitCode::from(1)
        }
    }
}
