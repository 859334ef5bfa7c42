//! Manager launch interface
//!
//! The companion launches its application manager as a subprocess with
//! all configuration passed through serialized arguments. Single-host
//! runs and tests supply their own launcher that wires the manager up
//! as an in-process task instead.

use async_trait::async_trait;
use control_core::{ActionConfig, PortRange};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

/// Launches the application manager for one action.
#[async_trait]
pub trait ManagerLauncher: Send + Sync {
    /// Start the manager. Returns once the manager is on its way; the
    /// companion discovers its command endpoint through the registry.
    async fn launch(&self) -> std::io::Result<()>;
}

/// Everything a manager process needs, serialized into its argument
/// list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerProcessConfig {
    /// Registry id assigned to the manager
    pub id: u32,
    /// The action to launch and supervise
    pub action: ActionConfig,
    /// Registry proxy address
    pub registry_addr: SocketAddr,
    /// Registry preshared key
    pub registry_key: String,
    /// Port range for the manager's reply socket
    pub ports: PortRange,
    /// Whether resource-usage monitoring is on
    pub monitoring_enabled: bool,
}

/// Spawns the manager binary with its configuration as one JSON
/// argument.
pub struct ProcessManagerLauncher {
    /// Path to the manager executable
    pub program: PathBuf,
    /// Configuration handed over on the command line
    pub config: ManagerProcessConfig,
}

#[async_trait]
impl ManagerLauncher for ProcessManagerLauncher {
    async fn launch(&self) -> std::io::Result<()> {
        let config = serde_json::to_string(&self.config)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let child = async_process::Command::new(&self.program)
            .arg(config)
            .spawn()?;
        info!(
            "application manager for {:?} launched with pid {}",
            self.config.action.name,
            child.id()
        );
        // The child is reaped in the background; its lifecycle is
        // steered through the command channel, not the process handle.
        drop(child);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use control_core::ActionKind;

    #[test]
    fn process_config_round_trips() {
        let config = ManagerProcessConfig {
            id: 7,
            action: ActionConfig {
                name: "sim-left".to_string(),
                kind: ActionKind::Simulator,
                program: "nest".to_string(),
                args: vec!["model.py".to_string()],
            },
            registry_addr: "127.0.0.1:9000".parse().unwrap(),
            registry_key: "key".to_string(),
            ports: PortRange {
                min: 5000,
                max: 5100,
                max_tries: 50,
            },
            monitoring_enabled: true,
        };
        let json = serde_json::to_string(&config).unwrap();
        let decoded: ManagerProcessConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.action.name, "sim-left");
        assert_eq!(decoded.ports.min, 5000);
    }
}
