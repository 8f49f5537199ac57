pub mod varint;

mod error;
pub use error::WireError;

mod frame;
pub use frame::{Frame, FrameCodec};

mod module_msgs;
pub use module_msgs::{
    ModuleInitRequest, ModuleInitResponse, ModuleRequest, ModuleResetRequest, ModuleResetResponse,
    ModuleResponse, ModuleStepRequest, ModuleStepResponse, ModuleStopRequest, ModuleStopResponse,
};

mod registry_msgs;
pub use registry_msgs::{ModuleEnvelope, RegisterReply};

mod status;
pub use status::{decode_command_status, encode_command_status};
