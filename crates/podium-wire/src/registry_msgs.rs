//! Messages on the module-registry channel.
//!
//! Every module-originated message leads with a (type, name, uuid) header so
//! the registry can route and validate it; whatever follows is type-specific.

use podium_model::ModuleMessageType;

use crate::error::WireError;
use crate::frame::Frame;

/// Decoded header of a module-originated message; `rest` holds the
/// type-specific remainder untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEnvelope {
    pub msg_type: ModuleMessageType,
    pub name: String,
    pub uuid: String,
    pub rest: Frame,
}

impl ModuleEnvelope {
    pub fn decode(mut frame: Frame) -> Result<Self, WireError> {
        let code = frame.pop_type()?;
        let msg_type = ModuleMessageType::from_code(code as i16).ok_or(WireError::UnknownCode {
            what: "module message type",
            code,
        })?;
        Ok(Self {
            msg_type,
            name: frame.pop_str()?,
            uuid: frame.pop_str()?,
            rest: frame,
        })
    }

    fn header(msg_type: ModuleMessageType, name: &str, uuid: &str) -> Frame {
        let mut frame = Frame::new();
        frame.push_type(msg_type.code() as i64);
        frame.push_str(name);
        frame.push_str(uuid);
        frame
    }

    /// Registration announcement. The address field duplicates the uuid for
    /// compatibility with older module SDKs that report both.
    pub fn register(name: &str, uuid: &str, addr: &str, protocol_version: u32) -> Frame {
        let mut frame = Self::header(ModuleMessageType::Register, name, uuid);
        frame.push_str(addr);
        frame.push_u64(u64::from(protocol_version));
        frame
    }

    pub fn unregister(name: &str, uuid: &str) -> Frame {
        Self::header(ModuleMessageType::UnRegister, name, uuid)
    }

    pub fn heartbeat(name: &str, uuid: &str) -> Frame {
        Self::header(ModuleMessageType::Heartbeat, name, uuid)
    }

    /// A reply to a forwarded coordinator request; doubles as a heartbeat.
    pub fn response(name: &str, uuid: &str, payload: Frame) -> Frame {
        let mut frame = Self::header(ModuleMessageType::Response, name, uuid);
        frame.extend(payload);
        frame
    }

    /// Wraps an outbound coordinator request for delivery to a module.
    pub fn wrap_request(payload: Frame) -> Frame {
        let mut frame = payload;
        frame.push_front_type(ModuleMessageType::Request.code() as i64);
        frame
    }
}

/// What the registry answers to register/unregister/heartbeat messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterReply {
    Succeed { heartbeat_interval_ms: u32 },
    Failed,
    /// Registration rejected: the module's protocol major version does not
    /// match; carries the coordinator's version string for the operator.
    VersionIncompatible { coordinator_version: String },
    /// Heartbeat answer instructing the module to unregister itself.
    Disconnecting,
}

impl RegisterReply {
    pub fn encode(&self) -> Frame {
        let mut frame = Frame::new();
        match self {
            RegisterReply::Succeed {
                heartbeat_interval_ms,
            } => {
                frame.push_type(ModuleMessageType::RegisterSucceed.code() as i64);
                frame.push_u64(u64::from(*heartbeat_interval_ms));
            }
            RegisterReply::Failed => {
                frame.push_type(ModuleMessageType::RegisterFailed.code() as i64);
            }
            RegisterReply::VersionIncompatible {
                coordinator_version,
            } => {
                frame.push_type(ModuleMessageType::VersionIncompatible.code() as i64);
                frame.push_str(coordinator_version);
            }
            RegisterReply::Disconnecting => {
                frame.push_type(ModuleMessageType::HeartbeatDisconnecting.code() as i64);
            }
        }
        frame
    }

    pub fn decode(frame: &mut Frame) -> Result<Self, WireError> {
        let code = frame.pop_type()?;
        let msg_type = ModuleMessageType::from_code(code as i16).ok_or(WireError::UnknownCode {
            what: "register reply type",
            code,
        })?;
        Ok(match msg_type {
            ModuleMessageType::RegisterSucceed => RegisterReply::Succeed {
                heartbeat_interval_ms: frame.pop_u64()? as u32,
            },
            ModuleMessageType::RegisterFailed => RegisterReply::Failed,
            ModuleMessageType::VersionIncompatible => RegisterReply::VersionIncompatible {
                coordinator_version: frame.pop_str()?,
            },
            ModuleMessageType::HeartbeatDisconnecting => RegisterReply::Disconnecting,
            other => {
                return Err(WireError::Malformed(format!(
                    "unexpected register reply: {other}"
                )));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_envelope_round_trip() {
        let frame = ModuleEnvelope::register("planning", "u-1", "u-1", 3_000_000);
        let mut env = ModuleEnvelope::decode(frame).unwrap();
        assert_eq!(env.msg_type, ModuleMessageType::Register);
        assert_eq!(env.name, "planning");
        assert_eq!(env.uuid, "u-1");
        assert_eq!(env.rest.pop_str().unwrap(), "u-1");
        assert_eq!(env.rest.pop_u64().unwrap(), 3_000_000);
    }

    #[test]
    fn response_keeps_payload_intact() {
        let mut payload = Frame::new();
        payload.push_type(0);
        payload.push_str("ok");

        let frame = ModuleEnvelope::response("planning", "u-1", payload.clone());
        let env = ModuleEnvelope::decode(frame).unwrap();
        assert_eq!(env.msg_type, ModuleMessageType::Response);
        assert_eq!(env.rest, payload);
    }

    #[test]
    fn wrapped_request_leads_with_request_code() {
        let mut payload = Frame::new();
        payload.push_str("body");
        let mut frame = ModuleEnvelope::wrap_request(payload);
        assert_eq!(
            frame.pop_type().unwrap(),
            ModuleMessageType::Request.code() as i64
        );
        assert_eq!(frame.pop_str().unwrap(), "body");
    }

    #[test]
    fn register_replies_round_trip() {
        let replies = [
            RegisterReply::Succeed {
                heartbeat_interval_ms: 1_000,
            },
            RegisterReply::Failed,
            RegisterReply::VersionIncompatible {
                coordinator_version: "3.0.0".into(),
            },
            RegisterReply::Disconnecting,
        ];
        for reply in replies {
            let mut frame = reply.encode();
            assert_eq!(RegisterReply::decode(&mut frame).unwrap(), reply);
        }
    }

    #[test]
    fn garbage_header_is_an_error() {
        let mut frame = Frame::new();
        frame.push_type(12_345);
        frame.push_str("planning");
        frame.push_str("u-1");
        assert!(ModuleEnvelope::decode(frame).is_err());
        assert!(ModuleEnvelope::decode(Frame::new()).is_err());
    }
}
