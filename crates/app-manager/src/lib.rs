//! Application manager: the per-action supervised payload runner.
//!
//! Wraps a single payload process. At INIT it spawns the payload with
//! captured standard streams and scans stdout for the payload's
//! structured response; at START it writes the steering verb to stdin,
//! monitors resource usage of every captured PID, and drains the
//! streams until the payload exits; at END it verifies the exit
//! status. All outcomes are relayed upstream to the owning companion
//! as reply values.

pub mod error;
pub mod manager;
pub mod monitor;
pub mod parser;
pub mod runner;

pub use error::{Error, Result};
pub use manager::{ApplicationManager, ManagerConfig};
pub use monitor::{
    MetricsSink, NullMetricsSink, ResourceUsageMonitor, UsageSample, UsageSampler, UsageSummary,
};
pub use parser::{parse_hub_records, parse_simulator_init, HUB_MARKER, SIMULATOR_MARKER};
pub use runner::PayloadHandle;
