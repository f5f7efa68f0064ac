//! Configuration module.

pub mod loader;
pub mod matcher;
pub mod schema;

pub use loader::{default_settings_path, load_config, load_default_config, parse_config};
pub use matcher::{PathActionLevel, PathMatcher};
pub use schema::SandboxConfiguration;
