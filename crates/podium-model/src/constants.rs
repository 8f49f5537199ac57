//! Protocol-level constants shared by the coordinator and its modules.
//!
//! The numeric values here form the stable contract with already-deployed
//! module processes and front-end clients; changing any of them is a
//! protocol break.

/// Default timeout for a non-step module request (Init/Reset/Stop), in milliseconds.
pub const DEFAULT_CMD_TIMEOUT_MS: u32 = 30_000;

/// Default timeout for a single Step request, in milliseconds.
pub const DEFAULT_STEP_TIMEOUT_MS: u32 = 3_000;

/// How long the registry waits for a remote module to acknowledge a
/// disconnect before erasing its context forcibly (heartbeat interval x 3.5).
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u32 = 3_500;

/// Interval at which remote modules are expected to heartbeat.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u32 = 1_000;

/// Coordinator-module protocol version: major * 10^6 + minor * 10^3 + patch.
/// A module registration is rejected unless its major part matches ours.
pub const PROTOCOL_VERSION: u32 = 3_000_000;

/// Base TCP port of the module registry; each coordinator instance binds
/// `base + instance_id`.
pub const DEFAULT_REGISTRY_BASE_PORT: u16 = 24_302;

/// Environment variable through which an auto-launched module process learns
/// the instance id assigned to it, stable across restarts within one launch.
pub const CHILD_MODULE_ENV_UUID: &str = "PODIUM_MODULE_UUID";

/// Default path of the client-facing command endpoint (unix domain socket).
pub const DEFAULT_COMMAND_ENDPOINT: &str = "/tmp/podiumd.sock";

/// Default number of broker worker tasks.
pub const DEFAULT_BROKER_WORKERS: usize = 4;

/// Default simulation control rate in Hz, i.e. target Step frequency in Run mode.
pub const DEFAULT_CONTROL_RATE: u16 = 100;

/// Splits a packed protocol version into (major, minor, patch).
pub fn protocol_version_parts(ver: u32) -> (u16, u16, u16) {
    let patch = (ver % 1_000) as u16;
    let minor = ((ver / 1_000) % 1_000) as u16;
    let major = (ver / 1_000_000) as u16;
    (major, minor, patch)
}

/// Renders a packed protocol version as "major.minor.patch".
pub fn protocol_version_string(ver: u32) -> String {
    let (major, minor, patch) = protocol_version_parts(ver);
    format!("{major}.{minor}.{patch}")
}

/// Returns true when the major parts of two packed versions match.
pub fn protocol_compatible(ours: u32, theirs: u32) -> bool {
    ours / 1_000_000 == theirs / 1_000_000
}

/// Bind address of the module registry for a given coordinator instance.
pub fn registry_bind_addr(instance_id: u16) -> String {
    format!("0.0.0.0:{}", DEFAULT_REGISTRY_BASE_PORT + instance_id)
}

/// Loopback address auto-launched modules are pointed at to reach the registry.
pub fn local_registry_addr(instance_id: u16) -> String {
    format!("127.0.0.1:{}", DEFAULT_REGISTRY_BASE_PORT + instance_id)
}
