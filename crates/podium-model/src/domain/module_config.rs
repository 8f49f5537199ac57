use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CMD_TIMEOUT_MS, DEFAULT_CONTROL_RATE, DEFAULT_STEP_TIMEOUT_MS};

/// Timeouts governing one module connection.
///
/// `step_timeout_ms == 0` doubles as the "no liveness supervision" marker:
/// such a module is expected to be auto-launched and watched through its
/// process handle instead of heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Deadline for a single Step request.
    #[serde(default = "default_step_timeout")]
    pub step_timeout_ms: u32,
    /// Deadline for any other request (Init/Reset/Stop).
    #[serde(default = "default_cmd_timeout")]
    pub cmd_timeout_ms: u32,
}

fn default_step_timeout() -> u32 {
    DEFAULT_STEP_TIMEOUT_MS
}

fn default_cmd_timeout() -> u32 {
    DEFAULT_CMD_TIMEOUT_MS
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            cmd_timeout_ms: DEFAULT_CMD_TIMEOUT_MS,
        }
    }
}

impl ConnectionConfig {
    /// Whether the module is supervised through heartbeats rather than a
    /// child process handle.
    pub fn heartbeating(&self) -> bool {
        self.step_timeout_ms != 0
    }
}

/// Launch and handshake description of one module. Immutable once built;
/// reconfiguration replaces the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleConfig {
    pub name: String,
    /// true: the coordinator owns the process lifecycle. false: the module is
    /// launched elsewhere and only discovered + heartbeated.
    #[serde(default)]
    pub auto_launch: bool,
    /// Shared library loaded through the module-host launcher. Preferred over
    /// `bin_path` when both are set.
    #[serde(default)]
    pub shared_lib_path: String,
    /// Standalone executable, used when no shared library is configured.
    #[serde(default)]
    pub bin_path: String,
    #[serde(default)]
    pub bin_args: Vec<String>,
    /// Library search paths exported to the child process.
    #[serde(default)]
    pub dep_paths: Vec<String>,
    /// Opaque key/value arguments forwarded in the Init handshake.
    #[serde(default)]
    pub init_args: BTreeMap<String, String>,
    #[serde(default)]
    pub conn_args: ConnectionConfig,
    /// Scheme group the module plays in; empty means the default group.
    #[serde(default)]
    pub group: String,
}

impl ModuleConfig {
    /// The artifact whose modification time decides "binary updated":
    /// the shared library when configured, the executable otherwise.
    pub fn launch_artifact(&self) -> &str {
        if self.shared_lib_path.is_empty() {
            &self.bin_path
        } else {
            &self.shared_lib_path
        }
    }
}

/// A named selection of module configurations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleScheme {
    pub name: String,
    pub modules: Vec<String>,
}

/// Coordinator-wide playback settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SysConfig {
    /// Target Step frequency in Run mode, Hz.
    pub control_rate: u16,
    /// Wall-clock budget for one scenario in Run mode; 0 means unlimited.
    pub scenario_time_limit_ms: u64,
}

impl Default for SysConfig {
    fn default() -> Self {
        Self {
            control_rate: DEFAULT_CONTROL_RATE,
            scenario_time_limit_ms: 0,
        }
    }
}

/// The full configuration set a scenario setup applies: one entry per active
/// module plus the playback settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorConfig {
    pub module_configs: Vec<ModuleConfig>,
    #[serde(default)]
    pub sys: SysConfig,
    /// Overwrite module log files on relaunch instead of rotating by timestamp.
    #[serde(default)]
    pub override_module_log: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeating_tracks_step_timeout() {
        let mut c = ConnectionConfig::default();
        assert!(c.heartbeating());
        c.step_timeout_ms = 0;
        assert!(!c.heartbeating());
    }

    #[test]
    fn launch_artifact_prefers_shared_lib() {
        let mut cfg = ModuleConfig {
            name: "planning".into(),
            bin_path: "/opt/mods/planning".into(),
            ..Default::default()
        };
        assert_eq!(cfg.launch_artifact(), "/opt/mods/planning");
        cfg.shared_lib_path = "/opt/mods/libplanning.so".into();
        assert_eq!(cfg.launch_artifact(), "/opt/mods/libplanning.so");
    }

    #[test]
    fn module_config_serde_round_trip() {
        let mut cfg = ModuleConfig {
            name: "perception".into(),
            auto_launch: true,
            bin_path: "/opt/mods/perception".into(),
            ..Default::default()
        };
        cfg.init_args.insert("device".into(), "gpu0".into());

        let text = serde_json::to_string(&cfg).unwrap();
        let back: ModuleConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg: ModuleConfig = serde_json::from_str(r#"{"name":"grading"}"#).unwrap();
        assert_eq!(cfg.conn_args.step_timeout_ms, DEFAULT_STEP_TIMEOUT_MS);
        assert_eq!(cfg.conn_args.cmd_timeout_ms, DEFAULT_CMD_TIMEOUT_MS);
        assert!(!cfg.auto_launch);
    }
}
