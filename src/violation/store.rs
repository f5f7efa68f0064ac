//! In-memory violation store.

use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::error::{CheckCategory, SandboxViolation};

/// Maximum number of violations to store.
const MAX_VIOLATIONS: usize = 100;

/// A denied operation.
#[derive(Debug, Clone)]
pub struct SandboxViolationEvent {
    /// Category of the denied operation.
    pub category: CheckCategory,
    /// The denial message as returned to the caller.
    pub message: String,
    /// Origin of the implicated frame.
    pub origin: Option<String>,
    /// Name of the thread the check ran on.
    pub context: Option<String>,
    /// When the violation occurred.
    pub timestamp: SystemTime,
}

impl SandboxViolationEvent {
    /// Create an event for a denial on the calling thread.
    pub fn new(violation: &SandboxViolation) -> Self {
        Self {
            category: violation.category,
            message: violation.message.clone(),
            origin: violation.frame.as_ref().map(|f| f.origin().to_string()),
            context: std::thread::current().name().map(str::to_string),
            timestamp: SystemTime::now(),
        }
    }
}

/// Type for violation listeners.
pub type ViolationListener = Box<dyn Fn(&SandboxViolationEvent) + Send + Sync>;

/// In-memory store for sandbox violations.
pub struct SandboxViolationStore {
    violations: RwLock<Vec<SandboxViolationEvent>>,
    total_count: RwLock<usize>,
    listeners: RwLock<Vec<Arc<ViolationListener>>>,
}

impl Default for SandboxViolationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxViolationStore {
    pub fn new() -> Self {
        Self {
            violations: RwLock::new(Vec::new()),
            total_count: RwLock::new(0),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Add a violation to the store.
    pub fn add_violation(&self, violation: SandboxViolationEvent) {
        // Listeners may run guard checks themselves.
        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();
        for listener in &listeners {
            listener(&violation);
        }

        let mut violations = self.violations.write();
        let mut total = self.total_count.write();

        violations.push(violation);
        *total += 1;

        if violations.len() > MAX_VIOLATIONS {
            violations.remove(0);
        }
    }

    /// Get stored violations, oldest first (up to a limit).
    pub fn get_violations(&self, limit: Option<usize>) -> Vec<SandboxViolationEvent> {
        let violations = self.violations.read();
        let limit = limit.unwrap_or(violations.len());
        violations.iter().take(limit).cloned().collect()
    }

    /// Number of stored violations.
    pub fn get_count(&self) -> usize {
        self.violations.read().len()
    }

    /// Total count of all violations, including trimmed ones.
    pub fn get_total_count(&self) -> usize {
        *self.total_count.read()
    }

    /// Violations recorded on the named thread.
    pub fn get_violations_for_context(&self, context: &str) -> Vec<SandboxViolationEvent> {
        self.violations
            .read()
            .iter()
            .filter(|v| v.context.as_deref() == Some(context))
            .cloned()
            .collect()
    }

    /// Violations of one category.
    pub fn get_violations_for_category(&self, category: CheckCategory) -> Vec<SandboxViolationEvent> {
        self.violations
            .read()
            .iter()
            .filter(|v| v.category == category)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        let mut violations = self.violations.write();
        let mut total = self.total_count.write();
        violations.clear();
        *total = 0;
    }

    /// Subscribe to new violations. Returns the listener's index.
    pub fn subscribe(&self, listener: ViolationListener) -> usize {
        let mut listeners = self.listeners.write();
        let id = listeners.len();
        listeners.push(Arc::new(listener));
        id
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::context::frames::CallFrame;

    fn event(category: CheckCategory, message: &str) -> SandboxViolationEvent {
        let frame = CallFrame::new("student::Solution", None, None);
        SandboxViolationEvent::new(&SandboxViolation::new(category, message, Some(frame)))
    }

    #[test]
    fn test_add_and_get_violations() {
        let store = SandboxViolationStore::new();

        store.add_violation(event(CheckCategory::Exit, "violation 1"));
        store.add_violation(event(CheckCategory::Network, "violation 2"));

        assert_eq!(store.get_count(), 2);
        assert_eq!(store.get_total_count(), 2);

        let violations = store.get_violations(None);
        assert_eq!(violations.len(), 2);
        assert!(violations[0].message.starts_with("violation 1"));
        assert_eq!(violations[1].origin.as_deref(), Some("student::Solution"));
        assert_eq!(store.get_violations_for_category(CheckCategory::Network).len(), 1);
    }

    #[test]
    fn test_max_violations() {
        let store = SandboxViolationStore::new();

        for i in 0..(MAX_VIOLATIONS + 10) {
            store.add_violation(event(CheckCategory::Path, &format!("violation {}", i)));
        }

        assert_eq!(store.get_count(), MAX_VIOLATIONS);
        assert_eq!(store.get_total_count(), MAX_VIOLATIONS + 10);
    }

    #[test]
    fn test_violations_for_context() {
        let store = SandboxViolationStore::new();
        let store = Arc::new(store);
        let worker_store = store.clone();
        std::thread::Builder::new()
            .name("submission".to_string())
            .spawn(move || worker_store.add_violation(event(CheckCategory::Exit, "exit")))
            .unwrap()
            .join()
            .unwrap();
        store.add_violation(event(CheckCategory::Exit, "other"));

        assert_eq!(store.get_violations_for_context("submission").len(), 1);
    }

    #[test]
    fn test_listener_and_clear() {
        let store = SandboxViolationStore::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        store.subscribe(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        store.add_violation(event(CheckCategory::Exit, "violation"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        store.clear();
        assert_eq!(store.get_count(), 0);
        assert_eq!(store.get_total_count(), 0);
    }
}
