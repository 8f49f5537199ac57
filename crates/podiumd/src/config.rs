use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use podium_model::constants::{DEFAULT_BROKER_WORKERS, DEFAULT_COMMAND_ENDPOINT};

/// Daemon deployment settings, read from a JSON file next to the install.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    /// Offset added to the registry base port, so several coordinators can
    /// coexist on one host.
    pub instance_id: u16,
    pub broker_workers: usize,
    pub command_endpoint: PathBuf,
    /// Launcher executable hosting shared-library modules; empty disables
    /// shared-library launching.
    pub module_host_path: PathBuf,
    /// Directory receiving per-module log files; empty means the working
    /// directory.
    pub module_log_directory: PathBuf,
    pub override_module_log: bool,
    /// Persisted configuration store; empty keeps everything in memory.
    pub config_store_path: PathBuf,
    pub log_filter: String,
    pub log_format: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            instance_id: 0,
            broker_workers: DEFAULT_BROKER_WORKERS,
            command_endpoint: PathBuf::from(DEFAULT_COMMAND_ENDPOINT),
            module_host_path: PathBuf::new(),
            module_log_directory: PathBuf::new(),
            override_module_log: true,
            config_store_path: PathBuf::new(),
            log_filter: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Missing file falls back to defaults; an unreadable or unparsable one
    /// is a broken deployment and fails startup.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_in_defaults() {
        let cfg: ServiceConfig =
            serde_json::from_str(r#"{"instanceId": 3, "brokerWorkers": 8}"#).unwrap();
        assert_eq!(cfg.instance_id, 3);
        assert_eq!(cfg.broker_workers, 8);
        assert_eq!(cfg.command_endpoint, PathBuf::from(DEFAULT_COMMAND_ENDPOINT));
        assert_eq!(cfg.log_filter, "info");
    }

    #[test]
    fn missing_file_means_defaults() {
        let cfg = ServiceConfig::load(Path::new("/nonexistent/podiumd.json")).unwrap();
        assert_eq!(cfg.instance_id, 0);
    }
}
