//! Sandbox manager: install, configure and uninstall the gate.
//!
//! There is exactly one manager, and with it one gate, per process. The
//! manager swaps the gate into the process-wide guard slot on install and
//! hands out an access token that must be presented to reconfigure or
//! uninstall. Teardown reclaims every context submitted code started.

pub mod state;
pub mod token;

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::config::SandboxConfiguration;
use crate::context::ContextHandle;
use crate::error::{LifecycleStateError, SandboxError, TeardownFailure};
use crate::gate::SandboxGate;
use crate::guard::{self, PermissiveGuard, SecurityGuard};
use crate::utils::PriorityBoost;
use crate::violation::SandboxViolationStore;

use self::state::{LifecycleState, ManagerState};
use self::token::TokenDigest;

static GLOBAL: Lazy<SandboxManager> = Lazy::new(SandboxManager::new);

/// The lifecycle controller owning the process-wide sandbox gate.
pub struct SandboxManager {
    gate: Arc<SandboxGate>,
    guard: Arc<dyn SecurityGuard>,
    state: Mutex<ManagerState>,
}

impl SandboxManager {
    fn new() -> Self {
        let gate = Arc::new(SandboxGate::new(Arc::new(SandboxViolationStore::new())));
        let guard: Arc<dyn SecurityGuard> = gate.clone();
        Self {
            gate,
            guard,
            state: Mutex::new(ManagerState::new()),
        }
    }

    /// The process-wide manager. The first call creates the gate and makes
    /// the calling thread the main context.
    pub fn global() -> &'static SandboxManager {
        &GLOBAL
    }

    /// Whether the gate is the active guard.
    pub fn is_installed(&self) -> bool {
        guard::is_current(&self.guard)
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.state.lock().lifecycle
    }

    pub fn gate(&self) -> &Arc<SandboxGate> {
        &self.gate
    }

    /// The active configuration, if installed.
    pub fn configuration(&self) -> Option<Arc<SandboxConfiguration>> {
        self.gate.configuration()
    }

    pub fn violation_store(&self) -> Arc<SandboxViolationStore> {
        self.gate.violations().clone()
    }

    /// Install the gate with `configuration`. Returns the access token.
    ///
    /// A previous failed uninstall is recovered from first.
    pub fn install(&self, configuration: SandboxConfiguration) -> Result<String, SandboxError> {
        let mut state = self.state.lock();
        if state.last_uninstall_failed {
            self.recover(&mut state)?;
        } else if self.is_installed() {
            return Err(LifecycleStateError::AlreadyInstalled.into());
        }
        configuration.validate()?;

        let (token, digest) = TokenDigest::issue();
        tracing::info!(token = %digest.fingerprint(), "access token issued");

        let description = configuration.short_desc();
        self.gate.set_configuration(Some(Arc::new(configuration)));
        self.gate.group().set_blocked(false);
        self.gate.call_stack().clear_whitelist();

        let previous = match guard::replace(self.guard.clone()) {
            Ok(previous) => previous,
            Err(e) => {
                self.gate.set_configuration(None);
                return Err(e.into());
            }
        };

        state.original_guard = Some(previous);
        state.token = Some(digest);
        state.lifecycle = LifecycleState::Installed;
        tracing::info!(configuration = %description, "sandbox installed");
        Ok(token)
    }

    /// Replace the configuration of the installed gate.
    pub fn configure(&self, token: &str, configuration: SandboxConfiguration) -> Result<(), SandboxError> {
        let state = self.state.lock();
        if !self.is_installed() {
            return Err(LifecycleStateError::NotInstalled.into());
        }
        self.verify_token(&state, token)?;
        configuration.validate()?;

        tracing::info!(configuration = %configuration.short_desc(), "sandbox reconfigured");
        self.gate.set_configuration(Some(Arc::new(configuration)));
        Ok(())
    }

    /// Reclaim every sandbox context and restore the previous guard.
    ///
    /// Contexts that survive reclamation are leaked and reported as
    /// [`TeardownFailure`]; the sandbox is uninstalled nonetheless, and the
    /// next install starts with a recovery pass.
    pub fn uninstall(&self, token: &str) -> Result<(), SandboxError> {
        let mut state = self.state.lock();
        if !self.is_installed() {
            return Err(LifecycleStateError::NotInstalled.into());
        }
        self.verify_token(&state, token)?;
        if self.gate.is_partly_disabled() {
            return Err(LifecycleStateError::AlreadyDisabled.into());
        }

        state.last_uninstall_failed = true;
        let result = self.teardown(&mut state);
        match result {
            Ok(()) => {
                state.last_uninstall_failed = false;
                tracing::info!("sandbox uninstalled");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "sandbox uninstall failed");
                Err(e)
            }
        }
    }

    /// Trust a sandbox context for the rest of the installation.
    pub fn request_whitelisting(&self, context: &ContextHandle) -> Result<(), SandboxError> {
        self.gate.request_whitelisting(context)?;
        Ok(())
    }

    fn verify_token(&self, state: &ManagerState, token: &str) -> Result<(), SandboxError> {
        if state.token_matches(token) {
            return Ok(());
        }
        tracing::warn!(
            expected = ?state.token.as_ref().map(TokenDigest::fingerprint),
            "rejected access token"
        );
        Err(LifecycleStateError::InvalidToken.into())
    }

    fn teardown(&self, state: &mut ManagerState) -> Result<(), SandboxError> {
        let _boost = PriorityBoost::raise();
        state.lifecycle = LifecycleState::Uninstalling;

        let group = self.gate.group();
        let pruned = group.prune_finished();
        tracing::debug!(pruned, "pruned finished contexts");
        let leaked = group.reclaim();
        self.gate.call_stack().clear_whitelist();

        self.restore_original_guard(state)?;
        self.gate.set_configuration(None);
        state.reset();

        if leaked.is_empty() {
            return Ok(());
        }
        for context in &leaked {
            tracing::error!(context = %context, "execution context leaked");
        }
        Err(TeardownFailure {
            contexts: leaked.iter().map(ToString::to_string).collect(),
        }
        .into())
    }

    fn restore_original_guard(&self, state: &mut ManagerState) -> Result<(), SandboxError> {
        if !self.is_installed() {
            return Ok(());
        }
        let original: Arc<dyn SecurityGuard> = match state.original_guard {
            Some(ref original) => original.clone(),
            None => Arc::new(PermissiveGuard),
        };
        self.gate.set_partly_disabled(true);
        let swapped = guard::replace(original);
        self.gate.set_partly_disabled(false);
        swapped?;
        Ok(())
    }

    fn recover(&self, state: &mut ManagerState) -> Result<(), SandboxError> {
        tracing::warn!("last uninstall failed, recovering");
        let leaked = self.gate.group().reclaim();
        if !leaked.is_empty() {
            tracing::error!(count = leaked.len(), "execution contexts leaked during recovery");
        }
        self.gate.call_stack().clear_whitelist();
        self.restore_original_guard(state)?;
        self.gate.set_configuration(None);
        state.reset();
        state.last_uninstall_failed = false;
        Ok(())
    }
}
