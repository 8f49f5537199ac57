use crate::codes::{CmdErrorCode, ModuleInitState, ModuleResponseType};
use crate::domain::topics::TopicPubSubInfo;

/// Per-module outcome of the last command the coordinator issued to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleCmdStatus {
    pub name: String,
    pub ec: ModuleResponseType,
    pub msg: String,
    /// Wall-clock cost of the module's last step, milliseconds.
    pub elapsed_ms: u32,
    pub cpu_time_user_ms: u32,
    pub cpu_time_sys_ms: u32,
    /// Free-form feedback returned by the module on Stop.
    pub feedback: String,
}

impl ModuleCmdStatus {
    pub fn error(name: impl Into<String>, ec: ModuleResponseType, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ec,
            msg: msg.into(),
            ..Default::default()
        }
    }
}

/// Progress of one module through the init workflow, as observed by clients.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInitStatus {
    pub name: String,
    pub state: ModuleInitState,
    pub topic_info: TopicPubSubInfo,
    /// File the module's stdout/stderr was redirected to, if auto-launched.
    pub log_file: String,
    /// The launch artifact changed on disk since the previous launch.
    pub binary_updated: bool,
}

impl ModuleInitStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A batch of simulation messages published during one step, keyed by topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepMessage {
    /// Simulation timestamp of the step that produced the payloads.
    pub timestamp_ms: u64,
    pub messages: Vec<(String, Vec<u8>)>,
}

/// The unit streamed back to clients for every command: one error code plus
/// whatever per-module detail is known at that point.
///
/// Cheap to clone and clear; full structural equality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandStatus {
    pub ec: CmdErrorCode,
    pub total_time_cost_ms: u32,
    pub total_cpu_time_user_ms: u32,
    pub total_cpu_time_sys_ms: u32,
    pub module_status: Vec<ModuleCmdStatus>,
    pub init_status: Vec<ModuleInitStatus>,
    pub step_message: Option<StepMessage>,
}

impl CommandStatus {
    pub fn new(ec: CmdErrorCode) -> Self {
        Self {
            ec,
            ..Default::default()
        }
    }

    /// Drops all per-module detail, keeping the value reusable for the next
    /// emission round.
    pub fn clear(&mut self) {
        *self = Self::new(self.ec);
    }

    pub fn is_terminal(&self) -> bool {
        self.ec.is_terminal()
    }
}
