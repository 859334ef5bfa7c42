//! Resource-usage monitoring worker
//!
//! One monitor per captured payload PID, sampling CPU and memory at
//! roughly 1 Hz while the payload runs. The actual metric readers and
//! their persistence are external collaborators behind the
//! [`UsageSampler`] and [`MetricsSink`] traits; the manager only owns
//! the sampling cadence and the summary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::lock::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default sampling cadence.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// One CPU/memory reading of a monitored process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    /// CPU usage in percent of one core
    pub cpu_percent: f64,
    /// Resident set size in bytes
    pub rss_bytes: u64,
    /// When the sample was taken
    pub taken_at: DateTime<Utc>,
}

/// Aggregated usage statistics handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    /// PID that was monitored
    pub pid: u32,
    /// Number of samples taken
    pub sample_count: usize,
    /// Highest observed resident set size
    pub peak_rss_bytes: u64,
    /// Mean CPU usage over all samples
    pub mean_cpu_percent: f64,
    /// Exit status of the payload, once known
    pub exit_status: Option<i32>,
}

/// Reads CPU and memory usage of a process. Implementations live
/// outside the control plane.
#[async_trait]
pub trait UsageSampler: Send + Sync + 'static {
    /// Take one reading for the given PID.
    async fn sample(&self, pid: u32) -> std::io::Result<UsageSample>;
}

/// Persists usage summaries. Implementations live outside the control
/// plane.
#[async_trait]
pub trait MetricsSink: Send + Sync + 'static {
    /// Persist one summary.
    async fn persist(&self, summary: &UsageSummary) -> std::io::Result<()>;
}

/// A sink that drops everything, for workflows with monitoring
/// disabled.
pub struct NullMetricsSink;

#[async_trait]
impl MetricsSink for NullMetricsSink {
    async fn persist(&self, _summary: &UsageSummary) -> std::io::Result<()> {
        Ok(())
    }
}

/// Background worker sampling one PID until concluded.
pub struct ResourceUsageMonitor {
    pid: u32,
    samples: Arc<Mutex<Vec<UsageSample>>>,
    stop: Arc<AtomicBool>,
    worker: Option<smol::Task<()>>,
}

impl ResourceUsageMonitor {
    /// Start sampling the PID at the given cadence.
    pub fn start(pid: u32, sampler: Arc<dyn UsageSampler>, interval: Duration) -> Self {
        let samples = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let worker = {
            let samples = samples.clone();
            let stop = stop.clone();
            smol::spawn(async move {
                while !stop.load(Ordering::SeqCst) {
                    match sampler.sample(pid).await {
                        Ok(sample) => {
                            samples.lock().await.push(sample);
                        }
                        Err(e) => {
                            // The process may be gone between samples.
                            debug!("sample of pid {} failed: {}", pid, e);
                        }
                    }
                    smol::Timer::after(interval).await;
                }
            })
        };
        Self {
            pid,
            samples,
            stop,
            worker: Some(worker),
        }
    }

    /// PID being monitored.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Stop sampling and aggregate the readings.
    pub async fn conclude(mut self, exit_status: Option<i32>) -> UsageSummary {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            worker.cancel().await;
        }
        let samples = self.samples.lock().await;
        if samples.is_empty() {
            warn!("no samples collected for pid {}", self.pid);
        }
        let peak_rss_bytes = samples.iter().map(|s| s.rss_bytes).max().unwrap_or(0);
        let mean_cpu_percent = if samples.is_empty() {
            0.0
        } else {
            samples.iter().map(|s| s.cpu_percent).sum::<f64>() / samples.len() as f64
        };
        UsageSummary {
            pid: self.pid,
            sample_count: samples.len(),
            peak_rss_bytes,
            mean_cpu_percent,
            exit_status,
        }
    }
}
