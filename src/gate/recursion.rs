//! Per-thread re-entrancy limit for gate entry points.

use std::cell::Cell;
use std::marker::PhantomData;

/// Entries deeper than this return without evaluating anything.
const NESTING_THRESHOLD: usize = 2;

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Counts one gate entry on the current thread until dropped.
pub(crate) struct RecursionGuard {
    nested: bool,
    _not_send: PhantomData<*const ()>,
}

impl RecursionGuard {
    pub(crate) fn enter() -> Self {
        let before = DEPTH.with(|depth| {
            let before = depth.get();
            depth.set(before + 1);
            before
        });
        Self {
            nested: before > NESTING_THRESHOLD,
            _not_send: PhantomData,
        }
    }

    /// The entry is too deep to be evaluated.
    pub(crate) fn is_nested(&self) -> bool {
        self.nested
    }
}

impl Drop for RecursionGuard {
    fn drop(&mut self) {
        let _ = DEPTH.try_with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

#[cfg(test)]
pub(crate) fn depth() -> usize {
    DEPTH.with(Cell::get)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold() {
        let first = RecursionGuard::enter();
        let second = RecursionGuard::enter();
        let third = RecursionGuard::enter();
        let fourth = RecursionGuard::enter();
        assert!(!first.is_nested());
        assert!(!second.is_nested());
        assert!(!third.is_nested());
        assert!(fourth.is_nested());
        assert_eq!(depth(), 4);

        drop(fourth);
        drop(third);
        drop(second);
        drop(first);
        assert_eq!(depth(), 0);
    }

    #[test]
    fn test_released_on_unwind() {
        let result = std::panic::catch_unwind(|| {
            let _guard = RecursionGuard::enter();
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(depth(), 0);
    }
}
