//! The execution group: contexts started while the sandbox is installed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{ContextHandle, ContextId, ContextState};

/// Budget for the polite interrupt phase, split across all contexts.
const INTERRUPT_BUDGET_MS: u64 = 500;
/// Budget per abort attempt, split across all contexts.
const ABORT_BUDGET_MS: u64 = 20;
/// Maximum number of abort rounds.
const MAX_ABORT_ATTEMPTS: usize = 50;
/// Budget for the final wait, split across all contexts.
const FINAL_WAIT_BUDGET_MS: u64 = 100;

/// Group a context operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextGroup {
    /// The sandbox's own execution group.
    Sandbox,
    /// Any group owned by the host, e.g. the test runner's worker pool.
    Host,
}

/// Why a new context was not admitted into the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDenied {
    /// Teardown is in progress.
    Blocked,
    /// No context ceiling is configured.
    NoCeiling,
    /// Admitting one more context would exceed the ceiling.
    CeilingReached { active: usize, ceiling: usize },
}

impl std::fmt::Display for AdmissionDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionDenied::Blocked => f.write_str("context creation is blocked during teardown"),
            AdmissionDenied::NoCeiling => f.write_str("context creation is not allowed"),
            AdmissionDenied::CeilingReached { active, ceiling } => write!(
                f,
                "too many execution contexts: {} running, at most {} allowed",
                active, ceiling
            ),
        }
    }
}

/// Tracks the contexts spawned under the sandbox and reclaims them on teardown.
pub struct ExecutionGroupManager {
    name: String,
    members: Mutex<Vec<Arc<ContextState>>>,
    block_creation: AtomicBool,
}

impl ExecutionGroupManager {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Mutex::new(Vec::new()),
            block_creation: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn register(&self, state: Arc<ContextState>) {
        self.members.lock().push(state);
    }

    pub(crate) fn unregister(&self, id: ContextId) {
        self.members.lock().retain(|member| member.id != id);
    }

    /// Whether the context is a tracked member.
    pub fn contains(&self, id: ContextId) -> bool {
        self.members.lock().iter().any(|member| member.id == id)
    }

    /// Drop finished contexts from the bookkeeping. Returns how many were released.
    pub fn prune_finished(&self) -> usize {
        let mut members = self.members.lock();
        let before = members.len();
        members.retain(|member| member.is_alive());
        before - members.len()
    }

    /// Number of live members.
    pub fn active_count(&self) -> usize {
        self.members
            .lock()
            .iter()
            .filter(|member| member.is_alive())
            .count()
    }

    /// Handles to the live members.
    pub fn active_contexts(&self) -> Vec<ContextHandle> {
        self.live_members()
            .into_iter()
            .map(ContextHandle::from_state)
            .collect()
    }

    fn live_members(&self) -> Vec<Arc<ContextState>> {
        self.members
            .lock()
            .iter()
            .filter(|member| member.is_alive())
            .cloned()
            .collect()
    }

    pub fn set_blocked(&self, blocked: bool) {
        self.block_creation.store(blocked, Ordering::SeqCst);
    }

    pub fn is_blocked(&self) -> bool {
        self.block_creation.load(Ordering::SeqCst)
    }

    /// Decide whether one more context may join the group.
    pub fn admit_new_context(&self, ceiling: Option<usize>) -> Result<(), AdmissionDenied> {
        if self.is_blocked() {
            return Err(AdmissionDenied::Blocked);
        }
        let ceiling = ceiling.ok_or(AdmissionDenied::NoCeiling)?;
        let active = self.active_count();
        if active >= ceiling {
            return Err(AdmissionDenied::CeilingReached { active, ceiling });
        }
        Ok(())
    }

    /// Stop every live member. Returns the contexts that are still alive afterwards.
    ///
    /// Context creation stays blocked until [`set_blocked(false)`](Self::set_blocked).
    /// Survivors are detached from the group: their threads keep running but
    /// are no longer tracked.
    pub fn reclaim(&self) -> Vec<ContextHandle> {
        self.block_creation.store(true, Ordering::SeqCst);
        let contexts = self.live_members();
        let count = contexts.len() as u64;
        if count == 0 {
            return Vec::new();
        }
        tracing::debug!(group = %self.name, count, "reclaiming execution contexts");

        for context in &contexts {
            context.interrupt();
            let finished = context.wait_for(Duration::from_millis(INTERRUPT_BUDGET_MS / count + 1));
            tracing::debug!(
                context = %context.name,
                finished,
                "interrupted execution context"
            );
        }
        if contexts.iter().all(|context| !context.is_alive()) {
            self.prune_finished();
            return Vec::new();
        }

        let mut alive = contexts.len();
        for attempt in 0..MAX_ABORT_ATTEMPTS {
            if alive == 0 {
                break;
            }
            alive = 0;
            for context in contexts.iter().filter(|context| context.is_alive()) {
                alive += 1;
                tracing::debug!(
                    context = %context.name,
                    attempt = attempt + 1,
                    "aborting execution context"
                );
                context.abort();
                context.wait_for(Duration::from_millis(ABORT_BUDGET_MS / count + 1));
            }
        }

        for context in contexts.iter().filter(|context| context.is_alive()) {
            if !context.wait_for(Duration::from_millis(FINAL_WAIT_BUDGET_MS / count + 1)) {
                tracing::error!(
                    context = %context.name,
                    id = context.id.0,
                    "execution context could not be stopped"
                );
            }
        }

        let survivors: Vec<Arc<ContextState>> = contexts
            .into_iter()
            .filter(|context| context.is_alive())
            .collect();
        self.members.lock().retain(|member| {
            member.is_alive() && !survivors.iter().any(|survivor| survivor.id == member.id)
        });
        survivors.into_iter().map(ContextHandle::from_state).collect()
    }
}
