//! Wire form of [`CommandStatus`], the unit streamed to clients.

use bytes::Bytes;

use podium_model::{
    CmdErrorCode, CommandStatus, ModuleCmdStatus, ModuleInitState, ModuleInitStatus,
    ModuleResponseType, StepMessage, TopicPubSubInfo,
};

use crate::error::WireError;
use crate::frame::Frame;

fn encode_topic_info(frame: &mut Frame, info: &TopicPubSubInfo) {
    frame.push_size(info.sub_topics.len());
    for t in &info.sub_topics {
        frame.push_str(t);
    }
    frame.push_size(info.pub_topics.len());
    for t in &info.pub_topics {
        frame.push_str(t);
    }
    frame.push_size(info.sub_shmems.len());
    for t in &info.sub_shmems {
        frame.push_str(t);
    }
    frame.push_size(info.pub_shmems.len());
    for (t, size) in &info.pub_shmems {
        frame.push_str(t);
        frame.push_u64(*size);
    }
    frame.push_size(info.pub_topics_broadcast.len());
    for t in &info.pub_topics_broadcast {
        frame.push_str(t);
    }
    frame.push_size(info.pub_shmems_broadcast.len());
    for t in &info.pub_shmems_broadcast {
        frame.push_str(t);
    }
}

fn decode_topic_info(frame: &mut Frame) -> Result<TopicPubSubInfo, WireError> {
    let mut info = TopicPubSubInfo::default();
    for _ in 0..frame.pop_size()? {
        info.sub_topics.insert(frame.pop_str()?);
    }
    for _ in 0..frame.pop_size()? {
        info.pub_topics.insert(frame.pop_str()?);
    }
    for _ in 0..frame.pop_size()? {
        info.sub_shmems.insert(frame.pop_str()?);
    }
    for _ in 0..frame.pop_size()? {
        let name = frame.pop_str()?;
        let size = frame.pop_u64()?;
        info.pub_shmems.insert(name, size);
    }
    for _ in 0..frame.pop_size()? {
        info.pub_topics_broadcast.insert(frame.pop_str()?);
    }
    for _ in 0..frame.pop_size()? {
        info.pub_shmems_broadcast.insert(frame.pop_str()?);
    }
    Ok(info)
}

pub fn encode_command_status(status: &CommandStatus) -> Frame {
    let mut frame = Frame::new();
    frame.push_type(status.ec.code() as i64);
    frame.push_u64(u64::from(status.total_time_cost_ms));
    frame.push_u64(u64::from(status.total_cpu_time_user_ms));
    frame.push_u64(u64::from(status.total_cpu_time_sys_ms));

    frame.push_size(status.module_status.len());
    for m in &status.module_status {
        frame.push_str(&m.name);
        frame.push_type(m.ec.code() as i64);
        frame.push_str(&m.msg);
        frame.push_u64(u64::from(m.elapsed_ms));
        frame.push_u64(u64::from(m.cpu_time_user_ms));
        frame.push_u64(u64::from(m.cpu_time_sys_ms));
        frame.push_str(&m.feedback);
    }

    frame.push_size(status.init_status.len());
    for i in &status.init_status {
        frame.push_str(&i.name);
        frame.push_type(i.state.code() as i64);
        frame.push_str(&i.log_file);
        frame.push_u64(u64::from(i.binary_updated));
        encode_topic_info(&mut frame, &i.topic_info);
    }

    match &status.step_message {
        Some(step) => {
            frame.push_u64(1);
            frame.push_u64(step.timestamp_ms);
            frame.push_size(step.messages.len());
            for (topic, payload) in &step.messages {
                frame.push_str(topic);
                frame.push_blob(Bytes::copy_from_slice(payload));
            }
        }
        None => frame.push_u64(0),
    }
    frame
}

pub fn decode_command_status(frame: &mut Frame) -> Result<CommandStatus, WireError> {
    let code = frame.pop_type()?;
    let ec = CmdErrorCode::from_code(code as i16).ok_or(WireError::UnknownCode {
        what: "command status code",
        code,
    })?;
    let mut status = CommandStatus::new(ec);
    status.total_time_cost_ms = frame.pop_u64()? as u32;
    status.total_cpu_time_user_ms = frame.pop_u64()? as u32;
    status.total_cpu_time_sys_ms = frame.pop_u64()? as u32;

    for _ in 0..frame.pop_size()? {
        let name = frame.pop_str()?;
        let code = frame.pop_type()?;
        let ec = ModuleResponseType::from_code(code as i16).ok_or(WireError::UnknownCode {
            what: "module response type",
            code,
        })?;
        status.module_status.push(ModuleCmdStatus {
            name,
            ec,
            msg: frame.pop_str()?,
            elapsed_ms: frame.pop_u64()? as u32,
            cpu_time_user_ms: frame.pop_u64()? as u32,
            cpu_time_sys_ms: frame.pop_u64()? as u32,
            feedback: frame.pop_str()?,
        });
    }

    for _ in 0..frame.pop_size()? {
        let name = frame.pop_str()?;
        let code = frame.pop_type()?;
        let state = ModuleInitState::from_code(code as i16).ok_or(WireError::UnknownCode {
            what: "module init state",
            code,
        })?;
        let log_file = frame.pop_str()?;
        let binary_updated = frame.pop_u64()? != 0;
        status.init_status.push(ModuleInitStatus {
            name,
            state,
            log_file,
            binary_updated,
            topic_info: decode_topic_info(frame)?,
        });
    }

    if frame.pop_u64()? != 0 {
        let mut step = StepMessage {
            timestamp_ms: frame.pop_u64()?,
            ..Default::default()
        };
        for _ in 0..frame.pop_size()? {
            let topic = frame.pop_str()?;
            step.messages.push((topic, frame.pop()?.to_vec()));
        }
        status.step_message = Some(step);
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_status() -> CommandStatus {
        let mut status = CommandStatus::new(CmdErrorCode::Accepted);
        status.total_time_cost_ms = 120;
        status.module_status.push(ModuleCmdStatus {
            name: "planning".into(),
            ec: ModuleResponseType::Ok,
            msg: String::new(),
            elapsed_ms: 9,
            cpu_time_user_ms: 6,
            cpu_time_sys_ms: 1,
            feedback: String::new(),
        });
        let mut init = ModuleInitStatus::new("planning");
        init.state = ModuleInitState::Succeed;
        init.log_file = "planning.log".into();
        init.topic_info.sub_topics.insert("location".into());
        init.topic_info.pub_topics.insert("trajectory".into());
        status.init_status.push(init);
        status.step_message = Some(StepMessage {
            timestamp_ms: 20,
            messages: vec![("trajectory".into(), vec![1, 2, 3])],
        });
        status
    }

    #[test]
    fn status_round_trip() {
        let status = sample_status();
        let mut frame = encode_command_status(&status);
        let back = decode_command_status(&mut frame).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn minimal_status_round_trip() {
        let status = CommandStatus::new(CmdErrorCode::ServerBusy);
        let mut frame = encode_command_status(&status);
        let back = decode_command_status(&mut frame).unwrap();
        assert_eq!(back, status);
        assert!(back.is_terminal());
    }

    #[test]
    fn truncated_status_errors_out() {
        let mut frame = encode_command_status(&sample_status());
        // keep only the first two parts.
        let mut short = Frame::new();
        short.push_blob(frame.pop().unwrap());
        short.push_blob(frame.pop().unwrap());
        assert!(decode_command_status(&mut short).is_err());
    }
}
