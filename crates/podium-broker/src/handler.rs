use async_trait::async_trait;
use tokio::sync::mpsc;

use podium_model::{Command, CommandStatus};
use podium_wire::Frame;

/// Arguments a player command may carry.
#[derive(Debug, Clone, Default)]
pub struct PlayerArgs {
    /// Scenario to set up (Setup only).
    pub scenario_path: String,
    /// Group to highlight (HighlightGroup only).
    pub highlight_group: String,
}

impl PlayerArgs {
    /// Pulls the command's arguments off the request frame; absent parts
    /// simply leave the argument empty.
    pub fn decode(cmd: Command, frame: &mut Frame) -> Self {
        let mut args = Self::default();
        match cmd {
            Command::Setup => args.scenario_path = frame.pop_str().unwrap_or_default(),
            Command::HighlightGroup => {
                args.highlight_group = frame.pop_str().unwrap_or_default();
            }
            _ => {}
        }
        args
    }
}

/// What the broker dispatches to. The daemon wires the coordinator in; tests
/// substitute fakes.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Executes a player command, streaming statuses through `tx`. The last
    /// status sent must be terminal (non-Accepted); send errors mean the
    /// client went away and may be ignored.
    async fn player(&self, cmd: Command, args: PlayerArgs, tx: mpsc::Sender<CommandStatus>);

    /// Executes a manager command and returns the complete reply frame
    /// (leading with the error code).
    async fn manager(&self, cmd: Command, payload: Frame) -> Frame;
}
