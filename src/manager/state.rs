//! Lifecycle state of the sandbox manager.

use std::sync::Arc;

use crate::guard::SecurityGuard;

use super::token::TokenDigest;

/// Where the sandbox is in its install/uninstall cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Uninstalled,
    Installed,
    Uninstalling,
}

/// Internal state for the sandbox manager.
#[derive(Default)]
pub struct ManagerState {
    /// Current lifecycle state.
    pub lifecycle: LifecycleState,

    /// Digest of the token issued by the last install.
    pub token: Option<TokenDigest>,

    /// Guard that was active before the sandbox was installed.
    pub original_guard: Option<Arc<dyn SecurityGuard>>,

    /// Whether the last uninstall did not complete cleanly.
    pub last_uninstall_failed: bool,
}

impl ManagerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `token` matches the issued token.
    pub fn token_matches(&self, token: &str) -> bool {
        self.token.as_ref().map_or(false, |digest| digest.verify(token))
    }

    /// Forget everything about the current installation.
    pub fn reset(&mut self) {
        self.lifecycle = LifecycleState::Uninstalled;
        self.token = None;
        self.original_guard = None;
    }
}
