//! Execution contexts: threads started through the sandbox.
//!
//! A context spawned while the active guard designates an execution group
//! becomes a member of that group and is subject to reclamation when the
//! sandbox is uninstalled. Cancellation is cooperative: an interrupted
//! context observes [`is_interrupted`] or gets woken from [`sleep`], and an
//! aborted context unwinds at its next [`checkpoint`] (every guard check is
//! one).

pub mod frames;
pub mod group;

use std::cell::RefCell;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, Thread};
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::error::{SandboxError, SandboxViolation};
use crate::guard;

use self::frames::CallFrame;
pub use self::group::{AdmissionDenied, ContextGroup, ExecutionGroupManager};

/// Origin prefix of the root frame pushed for every sandbox-managed context.
pub const CONTEXT_ENTRY_ORIGIN: &str = "grading_sandbox::context::entry";

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<Arc<ContextState>>> = const { RefCell::new(None) };
}

/// Identifier of an execution context, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub(crate) u64);

impl ContextId {
    fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Payload an aborted context unwinds with.
#[derive(Debug, Clone, Copy)]
pub struct ContextAborted;

/// Returned by [`sleep`] when the current context was interrupted.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("execution context was interrupted")]
pub struct Interrupted;

pub(crate) struct ContextState {
    id: ContextId,
    name: String,
    managed: bool,
    interrupted: AtomicBool,
    aborted: AtomicBool,
    finished: Mutex<bool>,
    finished_cv: Condvar,
    thread: OnceCell<Thread>,
}

impl ContextState {
    fn new(name: String, managed: bool) -> Self {
        Self {
            id: ContextId::next(),
            name,
            managed,
            interrupted: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            finished: Mutex::new(false),
            finished_cv: Condvar::new(),
            thread: OnceCell::new(),
        }
    }

    fn is_alive(&self) -> bool {
        !*self.finished.lock()
    }

    fn mark_finished(&self) {
        *self.finished.lock() = true;
        self.finished_cv.notify_all();
    }

    /// Wait until the context finished or `timeout` elapsed. Returns whether it finished.
    fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut finished = self.finished.lock();
        while !*finished {
            if self
                .finished_cv
                .wait_until(&mut finished, deadline)
                .timed_out()
            {
                return *finished;
            }
        }
        true
    }

    fn wake(&self) {
        if let Some(thread) = self.thread.get() {
            thread.unpark();
        }
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.wake();
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.interrupted.store(true, Ordering::SeqCst);
        self.wake();
    }
}

/// Marks the context finished when its thread ends, including by unwinding.
struct FinishOnDrop(Arc<ContextState>);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.mark_finished();
    }
}

/// Shared handle to an execution context.
#[derive(Clone)]
pub struct ContextHandle {
    state: Arc<ContextState>,
}

impl ContextHandle {
    pub(crate) fn from_state(state: Arc<ContextState>) -> Self {
        Self { state }
    }

    pub fn id(&self) -> ContextId {
        self.state.id
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Whether the context was started inside the sandbox's execution group.
    pub fn is_managed(&self) -> bool {
        self.state.managed
    }

    pub fn is_alive(&self) -> bool {
        self.state.is_alive()
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.interrupted.load(Ordering::SeqCst)
    }

    /// Wait up to `timeout` for the context to finish.
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        self.state.wait_for(timeout)
    }

    /// Ask the context to stop. Subject to the active guard's context access check.
    pub fn interrupt(&self) -> Result<(), SandboxViolation> {
        guard::current().check_context_access(self)?;
        self.state.interrupt();
        Ok(())
    }
}

impl PartialEq for ContextHandle {
    fn eq(&self, other: &Self) -> bool {
        self.state.id == other.state.id
    }
}

impl Eq for ContextHandle {}

impl std::fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHandle")
            .field("id", &self.state.id)
            .field("name", &self.state.name)
            .field("managed", &self.state.managed)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl std::fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.state.name, self.state.id.0)
    }
}

/// Join handle of a spawned context.
pub struct ContextJoinHandle<T> {
    context: ContextHandle,
    inner: JoinHandle<T>,
}

impl<T> ContextJoinHandle<T> {
    pub fn context(&self) -> &ContextHandle {
        &self.context
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Wait for the context. An aborted context yields `Err` with a [`ContextAborted`] payload.
    pub fn join(self) -> std::thread::Result<T> {
        self.inner.join()
    }
}

/// Snapshot of the calling thread used by the call-stack policy.
#[derive(Debug, Clone)]
pub(crate) struct ContextInfo {
    pub id: Option<ContextId>,
    pub thread_name: Option<String>,
    pub managed: bool,
}

pub(crate) fn current_info() -> ContextInfo {
    let (id, managed) = CURRENT
        .try_with(|current| {
            current
                .borrow()
                .as_ref()
                .map(|state| (Some(state.id), state.managed))
        })
        .ok()
        .flatten()
        .unwrap_or((None, false));
    ContextInfo {
        id,
        thread_name: std::thread::current().name().map(str::to_string),
        managed,
    }
}

fn with_current<R>(f: impl FnOnce(&ContextState) -> R) -> Option<R> {
    CURRENT
        .try_with(|current| current.borrow().as_deref().map(f))
        .ok()
        .flatten()
}

/// Handle to the calling context, if it was started through [`spawn`].
pub fn current() -> Option<ContextHandle> {
    CURRENT
        .try_with(|current| current.borrow().clone().map(ContextHandle::from_state))
        .ok()
        .flatten()
}

/// Whether the calling context was asked to stop.
pub fn is_interrupted() -> bool {
    with_current(|state| state.interrupted.load(Ordering::SeqCst)).unwrap_or(false)
}

/// Unwind the calling context if it was aborted during reclamation.
///
/// Does nothing while the thread is already unwinding, so destructors that
/// pass through a checkpoint run to completion.
pub fn checkpoint() {
    if std::thread::panicking() {
        return;
    }
    if with_current(|state| state.aborted.load(Ordering::SeqCst)).unwrap_or(false) {
        std::panic::resume_unwind(Box::new(ContextAborted));
    }
}

/// Sleep that wakes up early when the calling context is interrupted.
pub fn sleep(duration: Duration) -> Result<(), Interrupted> {
    let deadline = Instant::now() + duration;
    loop {
        checkpoint();
        if is_interrupted() {
            return Err(Interrupted);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        std::thread::park_timeout(deadline - now);
    }
}

/// Spawn a named execution context.
///
/// While the active guard designates an execution group, the new context
/// joins it after the guard approved the group access; the call fails with
/// [`SandboxError::Violation`] otherwise.
#[track_caller]
pub fn spawn<F, T>(name: impl Into<String>, f: F) -> Result<ContextJoinHandle<T>, SandboxError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let location = Location::caller();
    let name = name.into();
    let guard = guard::current();
    match guard.designated_group() {
        Some(group) => {
            guard.check_group_access(ContextGroup::Sandbox)?;
            spawn_in(Some(group), name, location, f)
        }
        None => spawn_in(None, name, location, f),
    }
}

pub(crate) fn spawn_in<F, T>(
    group: Option<&ExecutionGroupManager>,
    name: String,
    location: &'static Location<'static>,
    f: F,
) -> Result<ContextJoinHandle<T>, SandboxError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let managed = group.is_some();
    let state = Arc::new(ContextState::new(name.clone(), managed));
    let root = managed.then(|| {
        CallFrame::new(
            format!("{}::{}", CONTEXT_ENTRY_ORIGIN, name),
            Some(location.file()),
            Some(location.line()),
        )
    });

    if let Some(group) = group {
        group.register(state.clone());
    }

    let thread_state = state.clone();
    let spawned = std::thread::Builder::new().name(name).spawn(move || {
        let _ = thread_state.thread.set(std::thread::current());
        let _finish = FinishOnDrop(thread_state.clone());
        CURRENT.with(|current| *current.borrow_mut() = Some(thread_state));
        let _root = root.map(frames::enter);
        f()
    });

    match spawned {
        Ok(inner) => {
            tracing::debug!(
                context = %state.name,
                id = state.id.0,
                managed,
                "execution context started"
            );
            Ok(ContextJoinHandle {
                context: ContextHandle::from_state(state),
                inner,
            })
        }
        Err(e) => {
            if let Some(group) = group {
                group.unregister(state.id);
            }
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmanaged_spawn_outside_sandbox() {
        let handle = spawn_in(None, "plain".to_string(), Location::caller(), || {
            (current().map(|c| c.name().to_string()), frames::depth())
        })
        .unwrap();
        assert!(!handle.context().is_managed());
        let (name, depth) = handle.join().unwrap();
        assert_eq!(name.as_deref(), Some("plain"));
        assert_eq!(depth, 0);
    }

    #[test]
    fn test_managed_context_has_root_frame() {
        let group = ExecutionGroupManager::new("test-group");
        let handle = spawn_in(Some(&group), "worker".to_string(), Location::caller(), || {
            frames::capture()
        })
        .unwrap();
        assert!(handle.context().is_managed());
        assert!(group.contains(handle.context().id()));
        let chain = handle.join().unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(
            chain[0].origin(),
            format!("{}::worker", CONTEXT_ENTRY_ORIGIN)
        );
        assert_eq!(chain[0].file(), Some(file!()));
    }

    #[test]
    fn test_sleep_wakes_on_interrupt() {
        let handle = spawn_in(None, "sleeper".to_string(), Location::caller(), || {
            sleep(Duration::from_secs(30))
        })
        .unwrap();
        let context = handle.context().clone();
        context.state.interrupt();
        assert_eq!(handle.join().unwrap(), Err(Interrupted));
        assert!(!context.is_alive());
    }

    #[test]
    fn test_abort_unwinds_at_checkpoint() {
        let handle = spawn_in(None, "spinner".to_string(), Location::caller(), || loop {
            checkpoint();
            std::thread::yield_now();
        })
        .unwrap();
        let context = handle.context().clone();
        context.state.abort();
        let payload = handle.join().unwrap_err();
        assert!(payload.downcast_ref::<ContextAborted>().is_some());
        assert!(context.join_timeout(Duration::from_secs(1)));
    }

    #[test]
    fn test_checkpoint_is_inert_while_unwinding() {
        struct CheckOnDrop(Arc<AtomicBool>);

        impl Drop for CheckOnDrop {
            fn drop(&mut self) {
                checkpoint();
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let flag = dropped.clone();
        let handle = spawn_in(None, "dropper".to_string(), Location::caller(), move || {
            let _guard = CheckOnDrop(flag);
            loop {
                checkpoint();
                std::thread::yield_now();
            }
        })
        .unwrap();
        let context = handle.context().clone();
        context.state.abort();
        let payload = handle.join().unwrap_err();
        assert!(payload.downcast_ref::<ContextAborted>().is_some());
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_interrupt_right_after_spawn_wakes_sleeper() {
        for i in 0..20 {
            let handle = spawn_in(None, format!("early-{}", i), Location::caller(), || {
                sleep(Duration::from_secs(30))
            })
            .unwrap();
            handle.context().state.interrupt();
            assert!(handle.context().join_timeout(Duration::from_secs(5)));
            assert_eq!(handle.join().unwrap(), Err(Interrupted));
        }
    }

    #[test]
    fn test_join_timeout_on_running_context() {
        let handle = spawn_in(None, "slow".to_string(), Location::caller(), || {
            let _ = sleep(Duration::from_secs(30));
        })
        .unwrap();
        let context = handle.context().clone();
        assert!(!context.join_timeout(Duration::from_millis(20)));
        context.state.interrupt();
        assert!(context.join_timeout(Duration::from_secs(5)));
        handle.join().unwrap();
    }

    #[test]
    fn test_calling_thread_is_not_a_context() {
        assert!(current().is_none());
        assert!(!is_interrupted());
        checkpoint();
        assert!(!current_info().managed);
    }
}
