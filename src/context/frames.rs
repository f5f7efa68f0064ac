//! Structured call chains.
//!
//! Each thread keeps a shadow stack of [`CallFrame`]s. Code that runs on
//! behalf of some origin (a submission, a grading helper) enters a
//! [`FrameScope`] for the duration of the call, and the sandbox captures the
//! chain when a sensitive operation is checked.

use std::cell::RefCell;
use std::marker::PhantomData;

thread_local! {
    static FRAMES: RefCell<Vec<CallFrame>> = const { RefCell::new(Vec::new()) };
}

/// One entry of a call chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallFrame {
    origin: String,
    file: Option<String>,
    line: Option<u32>,
}

impl CallFrame {
    pub fn new(origin: impl Into<String>, file: Option<&str>, line: Option<u32>) -> Self {
        Self {
            origin: origin.into(),
            file: file.map(str::to_string),
            line,
        }
    }

    /// Module-path style identifier of the code this frame belongs to.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn line(&self) -> Option<u32> {
        self.line
    }
}

impl std::fmt::Display for CallFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{} at {}:{}", self.origin, file, line),
            (Some(file), None) => write!(f, "{} at {}", self.origin, file),
            _ => f.write_str(&self.origin),
        }
    }
}

/// Keeps a frame on the current thread's chain until dropped.
#[must_use = "the frame is popped as soon as the scope is dropped"]
pub struct FrameScope {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for FrameScope {
    fn drop(&mut self) {
        let _ = FRAMES.try_with(|frames| frames.borrow_mut().truncate(self.depth));
    }
}

/// Push a frame onto the current thread's chain.
pub fn enter(frame: CallFrame) -> FrameScope {
    let depth = FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        let depth = frames.len();
        frames.push(frame);
        depth
    });
    FrameScope {
        depth,
        _not_send: PhantomData,
    }
}

/// Run `f` with `frame` on the current thread's chain.
pub fn within<R>(frame: CallFrame, f: impl FnOnce() -> R) -> R {
    let _scope = enter(frame);
    f()
}

/// Capture the current thread's chain, innermost frame first.
pub fn capture() -> Vec<CallFrame> {
    FRAMES
        .try_with(|frames| frames.borrow().iter().rev().cloned().collect())
        .unwrap_or_default()
}

/// Number of frames on the current thread's chain.
pub fn depth() -> usize {
    FRAMES.try_with(|frames| frames.borrow().len()).unwrap_or(0)
}

/// Enter a frame for the calling location.
///
/// `call_frame!()` uses the calling module path as origin,
/// `call_frame!("student::Solution")` an explicit one.
#[macro_export]
macro_rules! call_frame {
    () => {
        $crate::context::frames::enter($crate::context::frames::CallFrame::new(
            module_path!(),
            Some(file!()),
            Some(line!()),
        ))
    };
    ($origin:expr) => {
        $crate::context::frames::enter($crate::context::frames::CallFrame::new(
            $origin,
            Some(file!()),
            Some(line!()),
        ))
    };
}
