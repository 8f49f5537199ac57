//! Wire-stable code enums.
//!
//! Every discriminant below travels over the client and module channels and
//! must be preserved bit-for-bit for interoperability with deployed peers.

use std::fmt;

/// Commands accepted on the client-facing endpoint.
///
/// Codes below [`Command::MAX_PLAYER`] are player commands and stream
/// [`crate::CommandStatus`] updates; the 101..=302 range holds manager
/// commands answered with a single error-code response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum Command {
    UnSetup = 0,
    Setup = 1,
    Reset = 2,
    Step = 3,
    Run = 4,
    Pause = 5,
    Stop = 6,
    HighlightGroup = 7,
    TerminateSetup = 8,

    LaunchModule = 101,
    TerminateModule = 102,

    AddModuleConfig = 201,
    RemoveModuleConfig = 202,
    UpdateModuleConfig = 203,
    GetModuleConfig = 204,
    GetAllModuleConfigs = 205,
    AddModuleScheme = 206,
    RemoveModuleScheme = 207,
    UpdateModuleScheme = 208,
    GetAllModuleSchemes = 209,
    SetActiveModuleScheme = 210,
    ExportModuleScheme = 211,
    ImportModuleScheme = 212,
    SetSysConfigs = 213,
    GetSysConfigs = 214,
    RestoreDefaultConfigs = 215,
    UpdatePlayList = 216,
    GetPlayList = 217,
    RemoveScenariosFromPlayList = 218,
    AddGradingKpi = 219,
    RemoveGradingKpi = 220,
    UpdateGradingKpi = 221,
    GetGradingKpisInGroup = 222,
    AddGradingKpiGroup = 223,
    RemoveGradingKpiGroup = 224,
    UpdateGradingKpiGroup = 225,
    GetAllGradingKpiGroups = 226,
    SetDefaultGradingKpiGroup = 227,
    SetGradingKpiLabels = 228,
    GetPbInfo = 229,
    DelPbInfo = 230,
    UpdatePbInfo = 231,

    UpdateMultiEgoScheme = 301,
    GetMultiEgoScheme = 302,
}

impl Command {
    /// Player commands are strictly below this sentinel code.
    pub const MAX_PLAYER: i16 = 100;
    /// Module-manager commands are strictly below this sentinel code.
    pub const MAX_MODULE_MGR: i16 = 200;
    /// Configuration-manager commands are strictly below this sentinel code.
    pub const MAX_CONFIG_MGR: i16 = 300;

    pub fn code(self) -> i16 {
        self as i16
    }

    pub fn from_code(code: i16) -> Option<Self> {
        use Command::*;
        Some(match code {
            0 => UnSetup,
            1 => Setup,
            2 => Reset,
            3 => Step,
            4 => Run,
            5 => Pause,
            6 => Stop,
            7 => HighlightGroup,
            8 => TerminateSetup,
            101 => LaunchModule,
            102 => TerminateModule,
            201 => AddModuleConfig,
            202 => RemoveModuleConfig,
            203 => UpdateModuleConfig,
            204 => GetModuleConfig,
            205 => GetAllModuleConfigs,
            206 => AddModuleScheme,
            207 => RemoveModuleScheme,
            208 => UpdateModuleScheme,
            209 => GetAllModuleSchemes,
            210 => SetActiveModuleScheme,
            211 => ExportModuleScheme,
            212 => ImportModuleScheme,
            213 => SetSysConfigs,
            214 => GetSysConfigs,
            215 => RestoreDefaultConfigs,
            216 => UpdatePlayList,
            217 => GetPlayList,
            218 => RemoveScenariosFromPlayList,
            219 => AddGradingKpi,
            220 => RemoveGradingKpi,
            221 => UpdateGradingKpi,
            222 => GetGradingKpisInGroup,
            223 => AddGradingKpiGroup,
            224 => RemoveGradingKpiGroup,
            225 => UpdateGradingKpiGroup,
            226 => GetAllGradingKpiGroups,
            227 => SetDefaultGradingKpiGroup,
            228 => SetGradingKpiLabels,
            229 => GetPbInfo,
            230 => DelPbInfo,
            231 => UpdatePbInfo,
            301 => UpdateMultiEgoScheme,
            302 => GetMultiEgoScheme,
            _ => return None,
        })
    }

    /// Player commands stream statuses until a terminal one; everything else
    /// is a single request/response exchange.
    pub fn is_player(self) -> bool {
        self.code() < Self::MAX_PLAYER
    }

    pub fn label(self) -> &'static str {
        use Command::*;
        match self {
            UnSetup => "CMD_UNSETUP",
            Setup => "CMD_SETUP",
            Reset => "CMD_RESET",
            Step => "CMD_STEP",
            Run => "CMD_RUN",
            Pause => "CMD_PAUSE",
            Stop => "CMD_STOP",
            HighlightGroup => "CMD_HIGHLIGHT_GROUP",
            TerminateSetup => "CMD_TERMINATE_SETUP",
            LaunchModule => "CMD_LAUNCH_MODULE",
            TerminateModule => "CMD_TERM_MODULE",
            AddModuleConfig => "CMD_ADD_MODULE_CONFIG",
            RemoveModuleConfig => "CMD_REMOVE_MODULE_CONFIG",
            UpdateModuleConfig => "CMD_UPDATE_MODULE_CONFIG",
            GetModuleConfig => "CMD_GET_MODULE_CONFIG",
            GetAllModuleConfigs => "CMD_GET_ALL_MODULE_CONFIGS",
            AddModuleScheme => "CMD_ADD_MODULE_SCHEME",
            RemoveModuleScheme => "CMD_REMOVE_MODULE_SCHEME",
            UpdateModuleScheme => "CMD_UPDATE_MODULE_SCHEME",
            GetAllModuleSchemes => "CMD_GET_ALL_MODULE_SCHEMES",
            SetActiveModuleScheme => "CMD_SET_ACTIVE_MODULE_SCHEME",
            ExportModuleScheme => "CMD_EXPORT_MODULE_SCHEME",
            ImportModuleScheme => "CMD_IMPORT_MODULE_SCHEME",
            SetSysConfigs => "CMD_SET_SYS_CONFIGS",
            GetSysConfigs => "CMD_GET_SYS_CONFIGS",
            RestoreDefaultConfigs => "CMD_RESTORE_DEFAULT_CONFIGS",
            UpdatePlayList => "CMD_UPDATE_PLAY_LIST",
            GetPlayList => "CMD_GET_PLAY_LIST",
            RemoveScenariosFromPlayList => "CMD_REMOVE_SCENARIOS_FROM_PLAY_LIST",
            AddGradingKpi => "CMD_ADD_GRADING_KPI",
            RemoveGradingKpi => "CMD_REMOVE_GRADING_KPI",
            UpdateGradingKpi => "CMD_UPDATE_GRADING_KPI",
            GetGradingKpisInGroup => "CMD_GET_GRADING_KPIS_IN_GROUP",
            AddGradingKpiGroup => "CMD_ADD_GRADING_KPI_GROUP",
            RemoveGradingKpiGroup => "CMD_REMOVE_GRADING_KPI_GROUP",
            UpdateGradingKpiGroup => "CMD_UPDATE_GRADING_KPI_GROUP",
            GetAllGradingKpiGroups => "CMD_GET_ALL_GRADING_KPI_GROUPS",
            SetDefaultGradingKpiGroup => "CMD_SET_DEFAULT_GRADING_KPI_GROUP",
            SetGradingKpiLabels => "CMD_SET_GRADING_KPI_LABELS",
            GetPbInfo => "CMD_GET_PB_INFO",
            DelPbInfo => "CMD_DEL_PB_INFO",
            UpdatePbInfo => "CMD_UPDATE_PB_INFO",
            UpdateMultiEgoScheme => "CMD_UPDATE_MULTI_EGO_SCHEME",
            GetMultiEgoScheme => "CMD_GET_MULTI_EGO_SCHEME",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result codes carried in every [`crate::CommandStatus`].
///
/// `Accepted` marks an intermediate status of a streaming command; anything
/// else is terminal for the command invocation that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i16)]
pub enum CmdErrorCode {
    #[default]
    Accepted = 0,
    Ignored = 2,
    Cancelled = 3,
    Rejected = 10,
    ServerBusy = 20,
    Succeed = 100,
    SchemeAlreadyExist = 200,
    ScenarioTimeout = 500,
    ScenarioStopped = 900,
    InvalidTopicPubSub = 1500,
    Failed = 3000,
    ScenarioParsingError = 20000,
    InvalidModuleConfig = 20300,
    UnEnoughInitiatedModule = 20400,
    ShmemCreationError = 29000,
    SystemError = 30000,
}

impl CmdErrorCode {
    pub fn code(self) -> i16 {
        self as i16
    }

    pub fn from_code(code: i16) -> Option<Self> {
        use CmdErrorCode::*;
        Some(match code {
            0 => Accepted,
            2 => Ignored,
            3 => Cancelled,
            10 => Rejected,
            20 => ServerBusy,
            100 => Succeed,
            200 => SchemeAlreadyExist,
            500 => ScenarioTimeout,
            900 => ScenarioStopped,
            1500 => InvalidTopicPubSub,
            3000 => Failed,
            20000 => ScenarioParsingError,
            20300 => InvalidModuleConfig,
            20400 => UnEnoughInitiatedModule,
            29000 => ShmemCreationError,
            30000 => SystemError,
            _ => return None,
        })
    }

    /// A status stream ends with the first non-`Accepted` code.
    pub fn is_terminal(self) -> bool {
        !matches!(self, CmdErrorCode::Accepted)
    }
}

impl fmt::Display for CmdErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use CmdErrorCode::*;
        let s = match self {
            Accepted => "CMD_ACCEPTED",
            Ignored => "CMD_IGNORED",
            Cancelled => "CMD_CANCELLED",
            Rejected => "CMD_REJECTED",
            ServerBusy => "CMD_SERVER_BUSY",
            Succeed => "CMD_SUCCEED",
            SchemeAlreadyExist => "CMD_SCHEME_ALREADY_EXIST",
            ScenarioTimeout => "CMD_SCENARIO_TIMEOUT",
            ScenarioStopped => "CMD_SCENARIO_STOPPED",
            InvalidTopicPubSub => "CMD_INVALID_TOPIC_PUBSUB",
            Failed => "CMD_FAILED",
            ScenarioParsingError => "CMD_SCENARIO_PARSING_ERROR",
            InvalidModuleConfig => "CMD_INVALID_MODULE_CONFIG",
            UnEnoughInitiatedModule => "CMD_UNENOUGH_INITIATED_MODULE",
            ShmemCreationError => "CMD_SHMEM_CREATION_ERROR",
            SystemError => "CMD_SYS_ERROR",
        };
        f.write_str(s)
    }
}

/// States of the per-module init workflow driven by the module manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i16)]
pub enum ModuleInitState {
    #[default]
    Start = 0,
    Connecting = 2,
    Connected = 3,
    ReqSent = 4,
    Succeed = 5,
    Failed = 6,
}

impl ModuleInitState {
    pub fn code(self) -> i16 {
        self as i16
    }

    pub fn from_code(code: i16) -> Option<Self> {
        use ModuleInitState::*;
        Some(match code {
            0 => Start,
            2 => Connecting,
            3 => Connected,
            4 => ReqSent,
            5 => Succeed,
            6 => Failed,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ModuleInitState::Succeed | ModuleInitState::Failed)
    }
}

impl fmt::Display for ModuleInitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ModuleInitState::*;
        let s = match self {
            Start => "MODULE_INIT_START",
            Connecting => "MODULE_INIT_CONNECTING",
            Connected => "MODULE_INIT_CONNECTED",
            ReqSent => "MODULE_INIT_REQ_SENT",
            Succeed => "MODULE_INIT_SUCCEED",
            Failed => "MODULE_INIT_FAILED",
        };
        f.write_str(s)
    }
}

/// Message types on the module-registry channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum ModuleMessageType {
    RegisterSucceed = 0,
    RegisterFailed = 1,
    Register = 2,
    UnRegister = 3,
    Heartbeat = 5,
    HeartbeatDisconnecting = 6,
    Request = 7,
    Response = 8,
    VersionIncompatible = 10000,
    ErrorType = 30000,
}

impl ModuleMessageType {
    pub fn code(self) -> i16 {
        self as i16
    }

    pub fn from_code(code: i16) -> Option<Self> {
        use ModuleMessageType::*;
        Some(match code {
            0 => RegisterSucceed,
            1 => RegisterFailed,
            2 => Register,
            3 => UnRegister,
            5 => Heartbeat,
            6 => HeartbeatDisconnecting,
            7 => Request,
            8 => Response,
            10000 => VersionIncompatible,
            30000 => ErrorType,
            _ => return None,
        })
    }
}

impl fmt::Display for ModuleMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ModuleMessageType::*;
        let s = match self {
            RegisterSucceed => "MODULE_REGISTER_SUCCEED",
            RegisterFailed => "MODULE_REGISTER_FAILED",
            Register => "MODULE_REGISTER",
            UnRegister => "MODULE_UNREGISTER",
            Heartbeat => "MODULE_HEARTBEAT",
            HeartbeatDisconnecting => "MODULE_HEARTBEAT_DISCONNECTING",
            Request => "MODULE_REQUEST",
            Response => "MODULE_RESPONSE",
            VersionIncompatible => "MODULE_VERSION_INCOMPATIBLE",
            ErrorType => "MODULE_MESSAGE_ERROR",
        };
        f.write_str(s)
    }
}

/// Kinds of requests a module must serve once initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum ModuleRequestType {
    Init = 1,
    Reset = 2,
    Step = 3,
    Stop = 4,
}

impl ModuleRequestType {
    pub fn code(self) -> i16 {
        self as i16
    }

    pub fn from_code(code: i16) -> Option<Self> {
        use ModuleRequestType::*;
        Some(match code {
            1 => Init,
            2 => Reset,
            3 => Step,
            4 => Stop,
            _ => return None,
        })
    }
}

impl fmt::Display for ModuleRequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ModuleRequestType::*;
        let s = match self {
            Init => "MODULE_INIT",
            Reset => "MODULE_RESET",
            Step => "MODULE_STEP",
            Stop => "MODULE_STOP",
        };
        f.write_str(s)
    }
}

/// Outcome codes a module reports for each served request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i16)]
pub enum ModuleResponseType {
    #[default]
    Ok = 0,
    RequireStop = 1,
    Timeout = 2,
    Error = 3,
    VersionIncompatible = 4,
    SystemError = 5,
    ReInit = 6,
    ProcessExit = 7,
}

impl ModuleResponseType {
    pub fn code(self) -> i16 {
        self as i16
    }

    pub fn from_code(code: i16) -> Option<Self> {
        use ModuleResponseType::*;
        Some(match code {
            0 => Ok,
            1 => RequireStop,
            2 => Timeout,
            3 => Error,
            4 => VersionIncompatible,
            5 => SystemError,
            6 => ReInit,
            7 => ProcessExit,
            _ => return None,
        })
    }

    /// RequireStop is a success from the module's point of view: the scenario
    /// reached a natural end.
    pub fn succeeded(self) -> bool {
        matches!(self, ModuleResponseType::Ok | ModuleResponseType::RequireStop)
    }
}

impl fmt::Display for ModuleResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ModuleResponseType::*;
        let s = match self {
            Ok => "MODULE_OK",
            RequireStop => "MODULE_REQUIRE_STOP",
            Timeout => "MODULE_TIMEOUT",
            Error => "MODULE_ERROR",
            VersionIncompatible => "MODULE_VERSION_INCOMPATIBLE",
            SystemError => "MODULE_SYSTEM_ERROR",
            ReInit => "MODULE_REINIT",
            ProcessExit => "MODULE_PROCESS_EXIT",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_codes_are_stable() {
        assert_eq!(Command::Setup.code(), 1);
        assert_eq!(Command::Step.code(), 3);
        assert_eq!(Command::Run.code(), 4);
        assert_eq!(Command::Pause.code(), 5);
        assert_eq!(Command::Stop.code(), 6);
        assert_eq!(Command::LaunchModule.code(), 101);
        assert_eq!(Command::AddModuleConfig.code(), 201);
        assert_eq!(Command::GetMultiEgoScheme.code(), 302);
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(CmdErrorCode::Accepted.code(), 0);
        assert_eq!(CmdErrorCode::ServerBusy.code(), 20);
        assert_eq!(CmdErrorCode::Succeed.code(), 100);
        assert_eq!(CmdErrorCode::ScenarioTimeout.code(), 500);
        assert_eq!(CmdErrorCode::Failed.code(), 3000);
        assert_eq!(CmdErrorCode::SystemError.code(), 30000);
    }

    #[test]
    fn command_round_trips_through_code() {
        for code in 0..=302i16 {
            if let Some(cmd) = Command::from_code(code) {
                assert_eq!(cmd.code(), code);
            }
        }
        assert!(Command::from_code(99).is_none());
        assert!(Command::from_code(-1).is_none());
    }

    #[test]
    fn player_command_classification() {
        assert!(Command::Setup.is_player());
        assert!(Command::HighlightGroup.is_player());
        assert!(!Command::LaunchModule.is_player());
        assert!(!Command::AddModuleConfig.is_player());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!CmdErrorCode::Accepted.is_terminal());
        assert!(CmdErrorCode::Succeed.is_terminal());
        assert!(CmdErrorCode::ServerBusy.is_terminal());
        assert!(ModuleInitState::Failed.is_terminal());
        assert!(!ModuleInitState::ReqSent.is_terminal());
    }

    #[test]
    fn module_response_success() {
        assert!(ModuleResponseType::Ok.succeeded());
        assert!(ModuleResponseType::RequireStop.succeeded());
        assert!(!ModuleResponseType::Timeout.succeeded());
        assert!(!ModuleResponseType::Error.succeeded());
    }
}
