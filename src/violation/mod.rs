//! Record of denied operations.

pub mod store;

pub use store::{SandboxViolationEvent, SandboxViolationStore, ViolationListener};
