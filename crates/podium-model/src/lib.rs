pub mod codes;
pub use codes::{
    CmdErrorCode, Command, ModuleInitState, ModuleMessageType, ModuleRequestType,
    ModuleResponseType,
};

pub mod constants;

mod domain;
pub use domain::{
    CommandStatus, ConnectionConfig, CoordinatorConfig, ModuleCmdStatus, ModuleConfig,
    ModuleInitStatus, ModuleScheme, StepMessage, SysConfig, TopicPubSubInfo,
};
