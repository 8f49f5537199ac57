//! Programmatic client of the command broker: player commands with a status
//! callback, manager commands as a single exchange.

use std::path::PathBuf;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;
use tracing::debug;

use podium_model::{CmdErrorCode, Command, CommandStatus, ModuleConfig};
use podium_wire::{Frame, FrameCodec, decode_command_status};

use crate::error::BrokerError;

const SOCKET_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Whether a streamed status is worth the caller's attention: Setup streams
/// everything, Run only rounds with per-module detail, and any terminal
/// status is always delivered.
fn needs_callback(cmd: Command, status: &CommandStatus) -> bool {
    cmd == Command::Setup
        || (cmd == Command::Run && !status.module_status.is_empty())
        || status.ec != CmdErrorCode::Accepted
}

pub struct Client {
    endpoint: PathBuf,
}

impl Client {
    pub fn new(endpoint: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    async fn connect(&self) -> Result<Framed<UnixStream, FrameCodec>, BrokerError> {
        let stream = UnixStream::connect(&self.endpoint)
            .await
            .map_err(|e| BrokerError::Connect(format!("{}: {e}", self.endpoint.display())))?;
        Ok(Framed::new(stream, FrameCodec))
    }

    /// Issues a player command and feeds every relevant status to `cb` until
    /// a terminal one arrives.
    pub async fn player_command(
        &self,
        cmd: Command,
        scenario_path: &str,
        highlight_group: &str,
        mut cb: impl FnMut(&CommandStatus) + Send,
    ) -> Result<(), BrokerError> {
        let mut transport = self.connect().await?;

        let mut request = Frame::new();
        // Stop is expressed as UnSetup on the wire; only the reported final
        // status differs.
        let wire_cmd = if cmd == Command::Stop {
            Command::UnSetup
        } else {
            cmd
        };
        request.push_type(wire_cmd.code() as i64);
        if cmd == Command::Setup {
            request.push_str(scenario_path);
        }
        if cmd == Command::HighlightGroup {
            request.push_str(highlight_group);
        }
        transport.send(request).await?;

        // the first status is the acceptance acknowledgement; anything else
        // is an immediate rejection delivered to the caller.
        let mut status = self.next_status(&mut transport).await?;
        if status.ec != CmdErrorCode::Accepted {
            cb(&status);
            return Ok(());
        }

        loop {
            status = self.next_status(&mut transport).await?;
            if cmd == Command::Stop && status.ec == CmdErrorCode::Succeed {
                status.ec = CmdErrorCode::ScenarioStopped;
            }
            if needs_callback(cmd, &status) {
                cb(&status);
            }
            if status.ec.is_terminal() {
                return Ok(());
            }
        }
    }

    async fn next_status(
        &self,
        transport: &mut Framed<UnixStream, FrameCodec>,
    ) -> Result<CommandStatus, BrokerError> {
        let frame = tokio::time::timeout(SOCKET_TIMEOUT, transport.next())
            .await
            .map_err(|_| BrokerError::ResponseTimeout(SOCKET_TIMEOUT.as_millis() as u64))?;
        let mut frame = frame.ok_or(BrokerError::ConnectionClosed)??;
        Ok(decode_command_status(&mut frame)?)
    }

    /// Issues a manager command; returns the error code and the rest of the
    /// reply frame.
    pub async fn manager_command(
        &self,
        cmd: Command,
        payload: Frame,
    ) -> Result<(CmdErrorCode, Frame), BrokerError> {
        let mut transport = self.connect().await?;
        let mut request = payload;
        request.push_front_type(cmd.code() as i64);
        transport.send(request).await?;

        let frame = tokio::time::timeout(SOCKET_TIMEOUT, transport.next())
            .await
            .map_err(|_| BrokerError::ResponseTimeout(SOCKET_TIMEOUT.as_millis() as u64))?;
        let mut frame = frame.ok_or(BrokerError::ConnectionClosed)??;
        let code = frame.pop_type()?;
        let ec = CmdErrorCode::from_code(code as i16)
            .ok_or(podium_wire::WireError::UnknownCode {
                what: "command status code",
                code,
            })?;
        debug!(cmd = %cmd, %ec, "manager command answered");
        Ok((ec, frame))
    }

    pub async fn setup(
        &self,
        scenario_path: &str,
        cb: impl FnMut(&CommandStatus) + Send,
    ) -> Result<(), BrokerError> {
        self.player_command(Command::Setup, scenario_path, "", cb).await
    }

    pub async fn unsetup(&self, cb: impl FnMut(&CommandStatus) + Send) -> Result<(), BrokerError> {
        self.player_command(Command::UnSetup, "", "", cb).await
    }

    pub async fn step(&self, cb: impl FnMut(&CommandStatus) + Send) -> Result<(), BrokerError> {
        self.player_command(Command::Step, "", "", cb).await
    }

    pub async fn run(&self, cb: impl FnMut(&CommandStatus) + Send) -> Result<(), BrokerError> {
        self.player_command(Command::Run, "", "", cb).await
    }

    pub async fn pause(&self, cb: impl FnMut(&CommandStatus) + Send) -> Result<(), BrokerError> {
        self.player_command(Command::Pause, "", "", cb).await
    }

    pub async fn stop(&self, cb: impl FnMut(&CommandStatus) + Send) -> Result<(), BrokerError> {
        self.player_command(Command::Stop, "", "", cb).await
    }

    pub async fn highlight_group(
        &self,
        group: &str,
        cb: impl FnMut(&CommandStatus) + Send,
    ) -> Result<(), BrokerError> {
        self.player_command(Command::HighlightGroup, "", group, cb).await
    }

    pub async fn add_module_config(&self, config: &ModuleConfig) -> Result<CmdErrorCode, BrokerError> {
        let mut payload = Frame::new();
        payload.push_str(&serde_json::to_string(config).map_err(std::io::Error::other)?);
        Ok(self.manager_command(Command::AddModuleConfig, payload).await?.0)
    }

    pub async fn get_all_module_configs(&self) -> Result<Vec<ModuleConfig>, BrokerError> {
        let (ec, mut frame) = self
            .manager_command(Command::GetAllModuleConfigs, Frame::new())
            .await?;
        if ec != CmdErrorCode::Succeed {
            return Ok(Vec::new());
        }
        let count = frame.pop_size()?;
        let mut configs = Vec::with_capacity(count);
        for _ in 0..count {
            let text = frame.pop_str()?;
            configs.push(serde_json::from_str(&text).map_err(std::io::Error::other)?);
        }
        Ok(configs)
    }
}
