//! Requests and responses exchanged with a module over its connection.
//!
//! Formats mirror what deployed module SDKs speak: the first field is the
//! type code, counts are unsigned varints, strings are blob parts. An empty
//! scheme group travels as the literal `"none"` and is restored on decode.

use std::collections::BTreeMap;

use bytes::Bytes;

use podium_model::{ModuleRequestType, ModuleResponseType, TopicPubSubInfo};

use crate::error::WireError;
use crate::frame::Frame;

const EMPTY_GROUP_SENTINEL: &str = "none";

fn push_group(frame: &mut Frame, group: &str) {
    if group.is_empty() {
        frame.push_str(EMPTY_GROUP_SENTINEL);
    } else {
        frame.push_str(group);
    }
}

fn pop_group(frame: &mut Frame) -> Result<String, WireError> {
    let group = frame.pop_str()?;
    Ok(if group == EMPTY_GROUP_SENTINEL {
        String::new()
    } else {
        group
    })
}

fn pop_response_type(frame: &mut Frame) -> Result<ModuleResponseType, WireError> {
    let code = frame.pop_type()?;
    ModuleResponseType::from_code(code as i16).ok_or(WireError::UnknownCode {
        what: "module response type",
        code,
    })
}

/// Init handshake payload: opaque arguments plus the scheme group the module
/// plays in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInitRequest {
    pub init_args: BTreeMap<String, String>,
    pub group: String,
}

/// Scenario reset payload. Scene parsing happens upstream; the coordinator
/// only relays the resolved paths and geometry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleResetRequest {
    pub scenario_path: String,
    pub map_path: String,
    pub map_local_origin: [f64; 3],
    pub geo_fence: Vec<(f64, f64)>,
    pub group: String,
}

/// One lock-step advance: the inputs a module subscribed to, keyed by topic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleStepRequest {
    pub sim_time_ms: u64,
    /// Wall-clock seconds since the scenario started.
    pub wall_time: f64,
    pub messages: BTreeMap<String, Bytes>,
    pub sub_topic_shmem_names: BTreeMap<String, String>,
    pub pub_topic_shmem_names: BTreeMap<String, String>,
    pub group: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleStopRequest {
    /// Aggregated step statistics handed to the module for its final report.
    pub perf_stats: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModuleRequest {
    Init(ModuleInitRequest),
    Reset(ModuleResetRequest),
    Step(ModuleStepRequest),
    Stop(ModuleStopRequest),
}

impl ModuleRequest {
    pub fn kind(&self) -> ModuleRequestType {
        match self {
            ModuleRequest::Init(_) => ModuleRequestType::Init,
            ModuleRequest::Reset(_) => ModuleRequestType::Reset,
            ModuleRequest::Step(_) => ModuleRequestType::Step,
            ModuleRequest::Stop(_) => ModuleRequestType::Stop,
        }
    }

    /// Step requests run against the (short) step timeout, everything else
    /// against the command timeout.
    pub fn is_step(&self) -> bool {
        matches!(self, ModuleRequest::Step(_))
    }

    pub fn encode(&self) -> Frame {
        let mut frame = Frame::new();
        frame.push_type(self.kind().code() as i64);
        match self {
            ModuleRequest::Init(req) => {
                frame.push_size(req.init_args.len());
                for (k, v) in &req.init_args {
                    frame.push_str(k);
                    frame.push_str(v);
                }
                push_group(&mut frame, &req.group);
            }
            ModuleRequest::Reset(req) => {
                frame.push_str(&req.scenario_path);
                frame.push_str(&req.map_path);
                for v in req.map_local_origin {
                    frame.push_f64(v);
                }
                frame.push_size(req.geo_fence.len());
                for (x, y) in &req.geo_fence {
                    frame.push_f64(*x);
                    frame.push_f64(*y);
                }
                push_group(&mut frame, &req.group);
            }
            ModuleRequest::Step(req) => {
                frame.push_u64(req.sim_time_ms);
                frame.push_f64(req.wall_time);
                frame.push_size(req.messages.len());
                for (topic, payload) in &req.messages {
                    frame.push_str(topic);
                    frame.push_blob(payload.clone());
                }
                frame.push_size(req.sub_topic_shmem_names.len());
                for (k, v) in &req.sub_topic_shmem_names {
                    frame.push_str(k);
                    frame.push_str(v);
                }
                frame.push_size(req.pub_topic_shmem_names.len());
                for (k, v) in &req.pub_topic_shmem_names {
                    frame.push_str(k);
                    frame.push_str(v);
                }
                push_group(&mut frame, &req.group);
            }
            ModuleRequest::Stop(req) => {
                frame.push_str(&req.perf_stats);
            }
        }
        frame
    }

    pub fn decode(frame: &mut Frame) -> Result<Self, WireError> {
        let code = frame.pop_type()?;
        let kind = ModuleRequestType::from_code(code as i16).ok_or(WireError::UnknownCode {
            what: "module request type",
            code,
        })?;
        Ok(match kind {
            ModuleRequestType::Init => {
                let mut req = ModuleInitRequest::default();
                let len = frame.pop_size()?;
                for _ in 0..len {
                    let key = frame.pop_str()?;
                    let value = frame.pop_str()?;
                    req.init_args.insert(key, value);
                }
                req.group = pop_group(frame)?;
                ModuleRequest::Init(req)
            }
            ModuleRequestType::Reset => {
                let mut req = ModuleResetRequest {
                    scenario_path: frame.pop_str()?,
                    map_path: frame.pop_str()?,
                    ..Default::default()
                };
                for v in req.map_local_origin.iter_mut() {
                    *v = frame.pop_f64()?;
                }
                let len = frame.pop_size()?;
                for _ in 0..len {
                    let x = frame.pop_f64()?;
                    let y = frame.pop_f64()?;
                    req.geo_fence.push((x, y));
                }
                req.group = pop_group(frame)?;
                ModuleRequest::Reset(req)
            }
            ModuleRequestType::Step => {
                let mut req = ModuleStepRequest {
                    sim_time_ms: frame.pop_u64()?,
                    wall_time: frame.pop_f64()?,
                    ..Default::default()
                };
                let len = frame.pop_size()?;
                for _ in 0..len {
                    let topic = frame.pop_str()?;
                    req.messages.insert(topic, frame.pop()?);
                }
                let len = frame.pop_size()?;
                for _ in 0..len {
                    let key = frame.pop_str()?;
                    req.sub_topic_shmem_names.insert(key, frame.pop_str()?);
                }
                let len = frame.pop_size()?;
                for _ in 0..len {
                    let key = frame.pop_str()?;
                    req.pub_topic_shmem_names.insert(key, frame.pop_str()?);
                }
                req.group = pop_group(frame)?;
                ModuleRequest::Step(req)
            }
            ModuleRequestType::Stop => ModuleRequest::Stop(ModuleStopRequest {
                perf_stats: frame.pop_str()?,
            }),
        })
    }
}

/// Init outcome: the declared pub/sub universe on success, an error text
/// otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInitResponse {
    pub ec: ModuleResponseType,
    pub err: String,
    pub topic_info: TopicPubSubInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleResetResponse {
    pub ec: ModuleResponseType,
    pub err: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleStepResponse {
    pub ec: ModuleResponseType,
    pub err: String,
    pub elapsed_ms: u64,
    pub cpu_time_user_ms: u64,
    pub cpu_time_sys_ms: u64,
    pub messages: BTreeMap<String, Bytes>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleStopResponse {
    pub ec: ModuleResponseType,
    pub err: String,
    pub feedbacks: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModuleResponse {
    Init(ModuleInitResponse),
    Reset(ModuleResetResponse),
    Step(ModuleStepResponse),
    Stop(ModuleStopResponse),
}

impl ModuleResponse {
    pub fn kind(&self) -> ModuleRequestType {
        match self {
            ModuleResponse::Init(_) => ModuleRequestType::Init,
            ModuleResponse::Reset(_) => ModuleRequestType::Reset,
            ModuleResponse::Step(_) => ModuleRequestType::Step,
            ModuleResponse::Stop(_) => ModuleRequestType::Stop,
        }
    }

    pub fn ec(&self) -> ModuleResponseType {
        match self {
            ModuleResponse::Init(r) => r.ec,
            ModuleResponse::Reset(r) => r.ec,
            ModuleResponse::Step(r) => r.ec,
            ModuleResponse::Stop(r) => r.ec,
        }
    }

    pub fn err(&self) -> &str {
        match self {
            ModuleResponse::Init(r) => &r.err,
            ModuleResponse::Reset(r) => &r.err,
            ModuleResponse::Step(r) => &r.err,
            ModuleResponse::Stop(r) => &r.err,
        }
    }

    /// Builds a locally fabricated response, used when a deadline passes or a
    /// reply cannot be decoded.
    pub fn synthetic(kind: ModuleRequestType, ec: ModuleResponseType, err: impl Into<String>) -> Self {
        let err = err.into();
        match kind {
            ModuleRequestType::Init => ModuleResponse::Init(ModuleInitResponse {
                ec,
                err,
                ..Default::default()
            }),
            ModuleRequestType::Reset => ModuleResponse::Reset(ModuleResetResponse { ec, err }),
            ModuleRequestType::Step => ModuleResponse::Step(ModuleStepResponse {
                ec,
                err,
                ..Default::default()
            }),
            ModuleRequestType::Stop => ModuleResponse::Stop(ModuleStopResponse {
                ec,
                err,
                ..Default::default()
            }),
        }
    }

    pub fn encode(&self) -> Frame {
        let mut frame = Frame::new();
        frame.push_type(self.ec().code() as i64);
        match self {
            ModuleResponse::Init(resp) => {
                frame.push_str(&resp.err);
                let t = &resp.topic_info;
                frame.push_size(t.sub_topics.len());
                for topic in &t.sub_topics {
                    frame.push_str(topic);
                }
                frame.push_size(t.pub_topics.len());
                for topic in &t.pub_topics {
                    frame.push_str(topic);
                }
                frame.push_size(t.sub_shmems.len());
                for name in &t.sub_shmems {
                    frame.push_str(name);
                }
                frame.push_size(t.pub_shmems.len());
                for (name, size) in &t.pub_shmems {
                    frame.push_str(name);
                    frame.push_u64(*size);
                }
                frame.push_size(t.pub_topics_broadcast.len());
                for topic in &t.pub_topics_broadcast {
                    frame.push_str(topic);
                }
                frame.push_size(t.pub_shmems_broadcast.len());
                for name in &t.pub_shmems_broadcast {
                    frame.push_str(name);
                }
            }
            ModuleResponse::Reset(resp) => {
                frame.push_str(&resp.err);
            }
            ModuleResponse::Step(resp) => {
                frame.push_str(&resp.err);
                frame.push_u64(resp.elapsed_ms);
                frame.push_u64(resp.cpu_time_user_ms);
                frame.push_u64(resp.cpu_time_sys_ms);
                frame.push_size(resp.messages.len());
                for (topic, payload) in &resp.messages {
                    frame.push_str(topic);
                    frame.push_blob(payload.clone());
                }
            }
            ModuleResponse::Stop(resp) => {
                frame.push_str(&resp.err);
                frame.push_size(resp.feedbacks.len());
                for (k, v) in &resp.feedbacks {
                    frame.push_str(k);
                    frame.push_str(v);
                }
            }
        }
        frame
    }

    /// Decodes a reply to a request of the given kind.
    pub fn decode(kind: ModuleRequestType, frame: &mut Frame) -> Result<Self, WireError> {
        let ec = pop_response_type(frame)?;
        Ok(match kind {
            ModuleRequestType::Init => {
                let mut resp = ModuleInitResponse {
                    ec,
                    err: frame.pop_str()?,
                    ..Default::default()
                };
                let t = &mut resp.topic_info;
                for _ in 0..frame.pop_size()? {
                    t.sub_topics.insert(frame.pop_str()?);
                }
                for _ in 0..frame.pop_size()? {
                    t.pub_topics.insert(frame.pop_str()?);
                }
                for _ in 0..frame.pop_size()? {
                    t.sub_shmems.insert(frame.pop_str()?);
                }
                for _ in 0..frame.pop_size()? {
                    let name = frame.pop_str()?;
                    let size = frame.pop_u64()?;
                    t.pub_shmems.insert(name, size);
                }
                for _ in 0..frame.pop_size()? {
                    t.pub_topics_broadcast.insert(frame.pop_str()?);
                }
                for _ in 0..frame.pop_size()? {
                    t.pub_shmems_broadcast.insert(frame.pop_str()?);
                }
                ModuleResponse::Init(resp)
            }
            ModuleRequestType::Reset => ModuleResponse::Reset(ModuleResetResponse {
                ec,
                err: frame.pop_str()?,
            }),
            ModuleRequestType::Step => {
                let mut resp = ModuleStepResponse {
                    ec,
                    err: frame.pop_str()?,
                    elapsed_ms: frame.pop_u64()?,
                    cpu_time_user_ms: frame.pop_u64()?,
                    cpu_time_sys_ms: frame.pop_u64()?,
                    ..Default::default()
                };
                for _ in 0..frame.pop_size()? {
                    let topic = frame.pop_str()?;
                    resp.messages.insert(topic, frame.pop()?);
                }
                ModuleResponse::Step(resp)
            }
            ModuleRequestType::Stop => {
                let mut resp = ModuleStopResponse {
                    ec,
                    err: frame.pop_str()?,
                    ..Default::default()
                };
                for _ in 0..frame.pop_size()? {
                    let key = frame.pop_str()?;
                    resp.feedbacks.insert(key, frame.pop_str()?);
                }
                ModuleResponse::Stop(resp)
            }
        })
    }
}
