mod module_config;
pub use module_config::{ConnectionConfig, CoordinatorConfig, ModuleConfig, ModuleScheme, SysConfig};

mod command_status;
pub use command_status::{CommandStatus, ModuleCmdStatus, ModuleInitStatus, StepMessage};

mod topics;
pub use topics::TopicPubSubInfo;
