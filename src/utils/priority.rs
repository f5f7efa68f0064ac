//! Best-effort scheduling priority boost for the calling thread.

/// Nice value requested while the boost is held.
#[cfg(target_os = "linux")]
const BOOSTED_NICE: i32 = -20;

/// Raises the calling thread's scheduling priority until dropped.
///
/// Failures (usually missing privileges) are logged and ignored. On platforms
/// without per-thread nice values this does nothing.
#[must_use = "the priority is restored as soon as the boost is dropped"]
pub struct PriorityBoost {
    #[cfg(target_os = "linux")]
    restore: Option<(nix::libc::id_t, i32)>,
}

impl PriorityBoost {
    #[cfg(target_os = "linux")]
    pub fn raise() -> Self {
        use nix::errno::Errno;
        use nix::libc;

        let tid = nix::unistd::gettid().as_raw() as libc::id_t;
        Errno::clear();
        // SAFETY: plain syscalls on the calling thread's own id.
        let previous = unsafe { libc::getpriority(libc::PRIO_PROCESS, tid) };
        if previous == -1 && Errno::last() != Errno::UnknownErrno {
            tracing::debug!(error = %Errno::last(), "cannot read thread priority");
            return Self { restore: None };
        }
        if unsafe { libc::setpriority(libc::PRIO_PROCESS, tid, BOOSTED_NICE) } != 0 {
            tracing::debug!(error = %Errno::last(), "cannot raise thread priority");
            return Self { restore: None };
        }
        tracing::debug!(previous, boosted = BOOSTED_NICE, "raised thread priority");
        Self {
            restore: Some((tid, previous)),
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn raise() -> Self {
        Self {}
    }

    /// Whether the priority was actually raised.
    pub fn is_active(&self) -> bool {
        #[cfg(target_os = "linux")]
        {
            self.restore.is_some()
        }
        #[cfg(not(target_os = "linux"))]
        {
            false
        }
    }
}

impl Drop for PriorityBoost {
    fn drop(&mut self) {
        #[cfg(target_os = "linux")]
        if let Some((tid, previous)) = self.restore.take() {
            // SAFETY: restores the value read in `raise` on the same thread id.
            if unsafe { nix::libc::setpriority(nix::libc::PRIO_PROCESS, tid, previous) } != 0 {
                tracing::debug!(
                    error = %nix::errno::Errno::last(),
                    "cannot restore thread priority"
                );
            }
        }
    }
}
