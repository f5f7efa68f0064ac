//! Call-chain classification.

use std::collections::HashSet;

use parking_lot::RwLock;

use crate::config::SandboxConfiguration;
use crate::context::frames::{self, CallFrame};
use crate::context::{self, ContextId, ContextInfo};

/// Origin prefixes of code that is trusted by default.
pub const TRUSTED_ORIGINS: &[&str] = &[
    "grading_sandbox::",
    "std::",
    "core::",
    "alloc::",
    "test::",
];

/// Origin prefix for frames that run submitted code on the crate's behalf.
pub const SUBMISSION_ORIGIN: &str = "grading_sandbox::submission";

/// Origin prefixes that are never trusted, even when covered by [`TRUSTED_ORIGINS`].
pub const DISTRUSTED_ORIGINS: &[&str] = &[SUBMISSION_ORIGIN];

/// Thread name prefixes of runtime-internal workers that never count as trusted.
pub const DISTRUSTED_CONTEXT_PREFIXES: &[&str] = &["finalizer", "drop-worker"];

/// Decides whether the code on the current call chain may perform sensitive operations.
#[derive(Default)]
pub struct CallStackPolicy {
    whitelisted: RwLock<HashSet<ContextId>>,
}

impl CallStackPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Untrusted frames on the calling thread's chain, innermost first.
    ///
    /// An untrusted context yields its whole chain.
    /// When that chain is empty, a single frame naming the thread stands in.
    pub fn untrusted_frames(&self, config: Option<&SandboxConfiguration>) -> Vec<CallFrame> {
        let chain = frames::capture();
        let info = context::current_info();
        if self.is_trusted(&info) {
            return filter_untrusted(chain, config);
        }
        if chain.is_empty() {
            return vec![context_frame(&info)];
        }
        chain
    }

    /// Whether the calling context is trusted.
    pub fn is_current_context_trusted(&self) -> bool {
        self.is_trusted(&context::current_info())
    }

    pub(crate) fn is_trusted(&self, info: &ContextInfo) -> bool {
        if let Some(name) = info.thread_name.as_deref() {
            if DISTRUSTED_CONTEXT_PREFIXES
                .iter()
                .any(|prefix| name.starts_with(prefix))
            {
                return false;
            }
        }
        if !info.managed {
            return true;
        }
        info.id.map_or(false, |id| self.is_whitelisted(id))
    }

    pub fn add_whitelisted(&self, id: ContextId) {
        self.whitelisted.write().insert(id);
    }

    pub fn is_whitelisted(&self, id: ContextId) -> bool {
        self.whitelisted.read().contains(&id)
    }

    pub fn clear_whitelist(&self) {
        self.whitelisted.write().clear();
    }
}

fn context_frame(info: &ContextInfo) -> CallFrame {
    let name = info.thread_name.as_deref().unwrap_or("<unnamed>");
    CallFrame::new(format!("<context {}>", name), None, None)
}

/// Whether a frame origin counts as untrusted.
pub fn is_origin_untrusted(origin: &str, config: Option<&SandboxConfiguration>) -> bool {
    DISTRUSTED_ORIGINS
        .iter()
        .any(|prefix| origin.starts_with(prefix))
        || (!TRUSTED_ORIGINS
            .iter()
            .any(|prefix| origin.starts_with(prefix))
            && !config.map_or(false, |c| c.whitelisted_class_names.contains(origin)))
}

/// Keep the untrusted frames of `chain`, dropping consecutive duplicates.
pub fn filter_untrusted(chain: Vec<CallFrame>, config: Option<&SandboxConfiguration>) -> Vec<CallFrame> {
    let mut untrusted: Vec<CallFrame> = chain
        .into_iter()
        .filter(|frame| is_origin_untrusted(frame.origin(), config))
        .collect();
    untrusted.dedup();
    untrusted
}

/// First untrusted frame of an arbitrary frame list.
pub fn first_untrusted<'a>(
    frames: &'a [CallFrame],
    config: Option<&SandboxConfiguration>,
) -> Option<&'a CallFrame> {
    frames
        .iter()
        .find(|frame| is_origin_untrusted(frame.origin(), config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: Option<&str>, managed: bool, id: Option<ContextId>) -> ContextInfo {
        ContextInfo {
            id,
            thread_name: name.map(str::to_string),
            managed,
        }
    }

    #[test]
    fn test_origin_classification() {
        assert!(!is_origin_untrusted("grading_sandbox::gate", None));
        assert!(!is_origin_untrusted("std::thread", None));
        assert!(is_origin_untrusted("student::Solution", None));
        assert!(is_origin_untrusted("grading_sandbox::submission::probe", None));
        assert!(!is_origin_untrusted(
            &format!("{}::worker", crate::context::CONTEXT_ENTRY_ORIGIN),
            None
        ));

        let config = SandboxConfiguration::new("/srv").with_whitelisted_class_name("harness::Runner");
        assert!(!is_origin_untrusted("harness::Runner", Some(&config)));
        assert!(is_origin_untrusted("harness::Runner::inner", Some(&config)));
    }

    #[test]
    fn test_filter_dedups_consecutive_frames() {
        let student = CallFrame::new("student::Solution", None, None);
        let chain = vec![
            student.clone(),
            student.clone(),
            CallFrame::new("grading_sandbox::gate", None, None),
            student.clone(),
        ];
        let filtered = filter_untrusted(chain, None);
        assert_eq!(filtered, vec![student.clone(), student]);
    }

    #[test]
    fn test_first_untrusted() {
        let chain = vec![
            CallFrame::new("std::io", None, None),
            CallFrame::new("student::Helper", Some("helper.rs"), Some(4)),
            CallFrame::new("student::Solution", None, None),
        ];
        assert_eq!(
            first_untrusted(&chain, None).map(CallFrame::origin),
            Some("student::Helper")
        );
        assert!(first_untrusted(&chain[..1], None).is_none());
    }

    #[test]
    fn test_context_trust() {
        let policy = CallStackPolicy::new();
        assert!(policy.is_trusted(&info(Some("main"), false, None)));
        assert!(policy.is_trusted(&info(None, false, None)));
        assert!(!policy.is_trusted(&info(Some("finalizer-3"), false, None)));

        let spawned = info(Some("worker"), true, Some(ContextId(7)));
        assert!(!policy.is_trusted(&spawned));
        policy.add_whitelisted(ContextId(7));
        assert!(policy.is_trusted(&spawned));
        assert!(!policy.is_trusted(&info(Some("drop-worker"), true, Some(ContextId(7)))));

        policy.clear_whitelist();
        assert!(!policy.is_trusted(&spawned));
    }

    #[test]
    fn test_distrusted_thread_without_frames() {
        let frames = std::thread::Builder::new()
            .name("finalizer-1".to_string())
            .spawn(|| CallStackPolicy::new().untrusted_frames(None))
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].origin(), "<context finalizer-1>");
        assert!(is_origin_untrusted(frames[0].origin(), None));
    }

    #[test]
    fn test_untrusted_frames_on_trusted_thread() {
        let policy = CallStackPolicy::new();
        assert!(policy.untrusted_frames(None).is_empty());

        let _harness = crate::call_frame!();
        assert!(policy.untrusted_frames(None).is_empty());

        let _student = crate::call_frame!("student::Solution");
        let frames = policy.untrusted_frames(None);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].origin(), "student::Solution");
    }
}
