//! Background health-status monitor
//!
//! Periodically re-validates the two global-state constraints (all
//! statuses UP, all stateful components in one shared state). A
//! violation is re-checked a bounded number of times with a
//! network-delay sleep in between to rule out transient skew; if it
//! persists, the monitor fires its alarm exactly once and stops. The
//! alarm's only effect is to trigger the orchestrator's
//! emergency-shutdown path.

use crate::api::RegistryApi;
use crate::fsm::{derive_global_state, derive_global_status};
use control_core::{LifecycleState, ServiceStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Monitor tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    /// Sleep between checks; also the network-delay allowance before a
    /// re-check
    pub interval: Duration,
    /// Re-checks granted before the alarm fires
    pub retries: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            retries: 2,
        }
    }
}

/// The monitor itself. Clone it to keep a handle for
/// [`finalize_monitoring`](Self::finalize_monitoring) while `run`
/// drives the checks in a background task.
#[derive(Clone)]
pub struct HealthStatusMonitor {
    registry: Arc<dyn RegistryApi>,
    config: MonitorConfig,
    alarm_tx: async_channel::Sender<()>,
    stop: Arc<AtomicBool>,
}

impl HealthStatusMonitor {
    /// Create a monitor and the alarm receiver consumed by the
    /// orchestrator.
    pub fn new(
        registry: Arc<dyn RegistryApi>,
        config: MonitorConfig,
    ) -> (Self, async_channel::Receiver<()>) {
        let (alarm_tx, alarm_rx) = async_channel::bounded(1);
        (
            Self {
                registry,
                config,
                alarm_tx,
                stop: Arc::new(AtomicBool::new(false)),
            },
            alarm_rx,
        )
    }

    /// Stop monitoring cooperatively.
    pub fn finalize_monitoring(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether both constraints currently hold.
    async fn constraints_hold(&self) -> bool {
        let descriptors = match self.registry.find_all().await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                warn!("monitor could not reach the registry: {}", e);
                return false;
            }
        };
        if derive_global_status(&descriptors) != ServiceStatus::Up {
            return false;
        }
        !matches!(
            derive_global_state(&descriptors),
            Some(LifecycleState::Error)
        )
    }

    /// Monitoring loop. Exits when [`finalize_monitoring`] is called or
    /// after the alarm fired.
    pub async fn run(&self) {
        let mut remaining = self.config.retries;
        while !self.stop.load(Ordering::SeqCst) {
            if self.constraints_hold().await {
                remaining = self.config.retries;
                debug!("health constraints hold");
            } else if remaining == 0 {
                error!("inconsistent component health persists, triggering the alarm");
                let _ = self.alarm_tx.send(()).await;
                self.finalize_monitoring();
                break;
            } else {
                warn!(
                    "inconsistent component health, re-checking ({} attempts left)",
                    remaining
                );
                remaining -= 1;
            }
            self.sleep_interruptible(self.config.interval).await;
        }
        debug!("health monitoring stopped");
    }

    /// Sleep for the interval, waking early once monitoring is
    /// finalized.
    async fn sleep_interruptible(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return;
            }
            let Some(left) = deadline.checked_duration_since(Instant::now()) else {
                return;
            };
            smol::Timer::after(left.min(Duration::from_millis(100))).await;
        }
    }
}
