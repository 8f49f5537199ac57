//! Glue between the broker's command dispatch and the coordinator.
//!
//! Cancel-class commands (Pause, UnSetup, TerminateSetup) flip control flags
//! before touching the coordinator lock, so a Run or Setup in progress winds
//! down instead of deadlocking against them.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::warn;

use podium_broker::{CommandHandler, ConfigService, PlayerArgs};
use podium_core::{Coordinator, CoordinatorControl};
use podium_model::{CmdErrorCode, Command, CommandStatus};
use podium_wire::{Frame, ModuleResetRequest};

pub struct ServiceHandler {
    coordinator: Arc<Mutex<Coordinator>>,
    control: CoordinatorControl,
    configs: Arc<ConfigService>,
}

impl ServiceHandler {
    pub fn new(
        coordinator: Arc<Mutex<Coordinator>>,
        control: CoordinatorControl,
        configs: Arc<ConfigService>,
    ) -> Self {
        Self {
            coordinator,
            control,
            configs,
        }
    }
}

#[async_trait]
impl CommandHandler for ServiceHandler {
    async fn player(&self, cmd: Command, args: PlayerArgs, tx: mpsc::Sender<CommandStatus>) {
        let terminal = match cmd {
            Command::Setup => {
                let config = self.configs.active_config().await;
                let reset = ModuleResetRequest {
                    scenario_path: args.scenario_path,
                    ..Default::default()
                };
                let mut coordinator = self.coordinator.lock().await;
                coordinator.setup(config, reset, &tx).await
            }
            Command::UnSetup | Command::Stop => {
                self.control.request_unsetup();
                let mut coordinator = self.coordinator.lock().await;
                coordinator.unsetup().await
            }
            Command::Step => {
                let mut coordinator = self.coordinator.lock().await;
                coordinator.step().await
            }
            Command::Run => {
                let mut coordinator = self.coordinator.lock().await;
                coordinator.run(&tx).await
            }
            Command::Pause => {
                // act through the flag only: the running command owns the
                // coordinator lock until it observes the pause.
                self.control.request_pause();
                CommandStatus::new(CmdErrorCode::Succeed)
            }
            Command::TerminateSetup => {
                self.control.request_unsetup();
                CommandStatus::new(CmdErrorCode::Succeed)
            }
            Command::HighlightGroup => {
                let mut coordinator = self.coordinator.lock().await;
                coordinator.highlight(args.highlight_group)
            }
            other => {
                warn!(cmd = %other, "player command not served");
                CommandStatus::new(CmdErrorCode::Ignored)
            }
        };
        let _ = tx.send(terminal).await;
    }

    async fn manager(&self, cmd: Command, mut payload: Frame) -> Frame {
        match cmd {
            Command::LaunchModule | Command::TerminateModule => {
                let Ok(name) = payload.pop_str() else {
                    let mut reply = Frame::new();
                    reply.push_type(CmdErrorCode::SystemError.code() as i64);
                    return reply;
                };
                let mut coordinator = self.coordinator.lock().await;
                let ec = if cmd == Command::LaunchModule {
                    coordinator.launch_module(&name).await
                } else {
                    coordinator.terminate_module(&name)
                };
                let mut reply = Frame::new();
                reply.push_type(ec.code() as i64);
                reply
            }
            _ => self.configs.handle(cmd, payload).await,
        }
    }
}
