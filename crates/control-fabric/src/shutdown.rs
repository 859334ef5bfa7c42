//! Process-wide cancellation flag

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Cloneable process-wide shutdown flag.
///
/// SIGINT and SIGTERM set the flag once [`install`](Self::install) has
/// hooked them; every receive loop inspects it between receive attempts
/// and surfaces a synthetic FATAL event upward.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
    handlers_installed: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// Create a fresh, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook SIGINT and SIGTERM so that either sets the flag.
    pub fn install(&self) -> std::io::Result<()> {
        signal_hook::flag::register(signal_hook::consts::SIGINT, self.flag.clone())?;
        signal_hook::flag::register(signal_hook::consts::SIGTERM, self.flag.clone())?;
        self.handlers_installed.store(true, Ordering::SeqCst);
        debug!("shutdown flag armed for SIGINT and SIGTERM");
        Ok(())
    }

    /// Whether shutdown was requested.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Request shutdown from inside the process.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Terminate loudly: set the flag and, when the signal handlers are
    /// armed, raise SIGTERM against our own process so that anything
    /// else watching the signals reacts too.
    pub fn raise_term(&self) {
        self.trigger();
        if self.handlers_installed.load(Ordering::SeqCst) {
            let _ = nix::sys::signal::raise(nix::sys::signal::Signal::SIGTERM);
        }
    }
}

/// Grace period applied between SIGTERM and SIGKILL when terminating a
/// payload preemptively. A zero grace means no graceful window at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GracePeriod(pub Duration);

impl GracePeriod {
    /// Whether a graceful window should be granted.
    pub fn is_graceful(&self) -> bool {
        self.0 > Duration::ZERO
    }
}

impl Default for GracePeriod {
    fn default() -> Self {
        GracePeriod(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_sets_flag() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_set());
        flag.trigger();
        assert!(flag.is_set());
    }

    #[test]
    fn clones_share_state() {
        let flag = ShutdownFlag::new();
        let other = flag.clone();
        other.trigger();
        assert!(flag.is_set());
    }

    #[test]
    fn raise_without_handlers_only_sets_flag() {
        // Handlers are not installed here, so no signal must be raised.
        let flag = ShutdownFlag::new();
        flag.raise_term();
        assert!(flag.is_set());
    }

    #[test]
    fn zero_grace_is_not_graceful() {
        assert!(!GracePeriod(Duration::ZERO).is_graceful());
        assert!(GracePeriod::default().is_graceful());
    }
}
