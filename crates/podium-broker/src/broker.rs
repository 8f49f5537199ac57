//! Client-facing command broker: a load-balanced worker pool.
//!
//! Workers announce themselves on an idle queue; the serving loop hands each
//! incoming client request to an idle worker or answers "server busy" right
//! away. A worker re-enters the idle queue only after producing a terminal
//! status, so one worker owns a streaming player command for its whole
//! lifetime and a client sees its statuses in order.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use podium_model::constants::{DEFAULT_BROKER_WORKERS, DEFAULT_COMMAND_ENDPOINT};
use podium_model::{CmdErrorCode, Command, CommandStatus};
use podium_wire::{Frame, FrameCodec, encode_command_status};

use crate::error::BrokerError;
use crate::handler::{CommandHandler, PlayerArgs};

type ClientTransport = Framed<UnixStream, FrameCodec>;

#[derive(Debug, Clone)]
pub struct BrokerOptions {
    pub endpoint: PathBuf,
    pub workers: usize,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            endpoint: PathBuf::from(DEFAULT_COMMAND_ENDPOINT),
            workers: DEFAULT_BROKER_WORKERS,
        }
    }
}

struct Job {
    transport: ClientTransport,
    cmd: Command,
    payload: Frame,
}

pub struct CommandBroker;

impl CommandBroker {
    /// Binds the client endpoint and spawns the serving loop plus the worker
    /// pool.
    pub async fn bind(
        opts: BrokerOptions,
        handler: Arc<dyn CommandHandler>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, BrokerError> {
        // a stale socket file from a previous run blocks the bind.
        let _ = std::fs::remove_file(&opts.endpoint);
        let listener = UnixListener::bind(&opts.endpoint).map_err(|e| BrokerError::Bind {
            endpoint: opts.endpoint.display().to_string(),
            reason: e.to_string(),
        })?;
        info!(endpoint = %opts.endpoint.display(), workers = opts.workers,
              "command broker serving");

        let workers = opts.workers.max(1);
        let (idle_tx, idle_rx) = mpsc::channel::<mpsc::Sender<Job>>(workers);
        for id in 0..workers {
            let (job_tx, job_rx) = mpsc::channel::<Job>(1);
            tokio::spawn(worker_loop(
                id,
                Arc::clone(&handler),
                job_rx,
                job_tx,
                idle_tx.clone(),
                cancel.child_token(),
            ));
        }

        let idle_rx = Arc::new(Mutex::new(idle_rx));
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => {
                            tokio::spawn(intake(stream, Arc::clone(&idle_rx)));
                        }
                        Err(e) => warn!("command endpoint accept error: {e}"),
                    },
                }
            }
            info!("command broker serving finished");
        });
        Ok(handle)
    }
}

/// Reads one request off a fresh client connection and hands it to an idle
/// worker, or rejects with ServerBusy when none is available.
async fn intake(stream: UnixStream, idle_rx: Arc<Mutex<mpsc::Receiver<mpsc::Sender<Job>>>>) {
    let mut transport = Framed::new(stream, FrameCodec);
    let mut frame = match transport.next().await {
        Some(Ok(frame)) => frame,
        Some(Err(e)) => {
            warn!("unreadable client request: {e}");
            return;
        }
        None => return,
    };
    let cmd = match frame.pop_type().ok().and_then(|c| Command::from_code(c as i16)) {
        Some(cmd) => cmd,
        None => {
            warn!("client request with unknown command code");
            let _ = transport
                .send(encode_command_status(&CommandStatus::new(
                    CmdErrorCode::SystemError,
                )))
                .await;
            return;
        }
    };

    let worker = idle_rx.lock().await.try_recv();
    match worker {
        Ok(job_tx) => {
            let job = Job {
                transport,
                cmd,
                payload: frame,
            };
            if let Err(e) = job_tx.try_send(job) {
                let job = match e {
                    mpsc::error::TrySendError::Full(job) => job,
                    mpsc::error::TrySendError::Closed(job) => job,
                };
                reject_busy(job.transport).await;
            }
        }
        Err(_) => reject_busy(transport).await,
    }
}

async fn reject_busy(mut transport: ClientTransport) {
    debug!("no idle worker, rejecting client request");
    let _ = transport
        .send(encode_command_status(&CommandStatus::new(
            CmdErrorCode::ServerBusy,
        )))
        .await;
}

async fn worker_loop(
    id: usize,
    handler: Arc<dyn CommandHandler>,
    mut job_rx: mpsc::Receiver<Job>,
    job_tx: mpsc::Sender<Job>,
    idle_tx: mpsc::Sender<mpsc::Sender<Job>>,
    cancel: CancellationToken,
) {
    loop {
        if idle_tx.send(job_tx.clone()).await.is_err() {
            return;
        }
        let job = tokio::select! {
            _ = cancel.cancelled() => return,
            job = job_rx.recv() => match job {
                Some(job) => job,
                None => return,
            },
        };
        debug!(worker = id, cmd = %job.cmd, "dispatching client command");
        process(&*handler, job).await;
    }
}

async fn process(handler: &dyn CommandHandler, job: Job) {
    let Job {
        mut transport,
        cmd,
        mut payload,
    } = job;

    if cmd.is_player() {
        // confirm acceptance before any work; the client treats this first
        // status as a system acknowledgement.
        if transport
            .send(encode_command_status(&CommandStatus::new(
                CmdErrorCode::Accepted,
            )))
            .await
            .is_err()
        {
            return;
        }
        let args = PlayerArgs::decode(cmd, &mut payload);
        let (tx, mut rx) = mpsc::channel::<CommandStatus>(16);
        let stream_out = async {
            let mut delivered_terminal = false;
            let mut client_gone = false;
            while let Some(status) = rx.recv().await {
                let terminal = status.is_terminal();
                if !client_gone && transport.send(encode_command_status(&status)).await.is_err() {
                    // keep draining so the handler is never blocked on a
                    // full channel to a dead client.
                    client_gone = true;
                }
                if terminal {
                    delivered_terminal = true;
                    break;
                }
            }
            if !delivered_terminal && !client_gone {
                // the handler ended without a terminal status; never leave
                // a client waiting silently.
                let _ = transport
                    .send(encode_command_status(&CommandStatus::new(
                        CmdErrorCode::SystemError,
                    )))
                    .await;
            }
        };
        tokio::join!(handler.player(cmd, args, tx), stream_out);
    } else {
        let reply = handler.manager(cmd, payload).await;
        let _ = transport.send(reply).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use podium_wire::decode_command_status;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Player commands block until a release permit arrives; manager
    /// commands echo Succeed.
    struct GatedHandler {
        release: Semaphore,
    }

    #[async_trait]
    impl CommandHandler for GatedHandler {
        async fn player(&self, _cmd: Command, _args: PlayerArgs, tx: mpsc::Sender<CommandStatus>) {
            self.release.acquire().await.expect("gate open").forget();
            let _ = tx.send(CommandStatus::new(CmdErrorCode::Succeed)).await;
        }

        async fn manager(&self, _cmd: Command, _payload: Frame) -> Frame {
            let mut reply = Frame::new();
            reply.push_type(CmdErrorCode::Succeed.code() as i64);
            reply
        }
    }

    async fn send_setup(endpoint: &std::path::Path) -> ClientTransport {
        let stream = UnixStream::connect(endpoint).await.unwrap();
        let mut transport = Framed::new(stream, FrameCodec);
        let mut frame = Frame::new();
        frame.push_type(Command::Setup.code() as i64);
        frame.push_str("/scenarios/crossing.sim");
        transport.send(frame).await.unwrap();
        transport
    }

    async fn next_status(transport: &mut ClientTransport) -> CommandStatus {
        let mut frame = tokio::time::timeout(Duration::from_secs(5), transport.next())
            .await
            .expect("status in time")
            .expect("stream open")
            .expect("clean frame");
        decode_command_status(&mut frame).expect("valid status")
    }

    #[tokio::test]
    async fn two_workers_three_setups_third_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = dir.path().join("cmd.sock");
        let handler = Arc::new(GatedHandler {
            release: Semaphore::new(0),
        });
        let cancel = CancellationToken::new();
        let opts = BrokerOptions {
            endpoint: endpoint.clone(),
            workers: 2,
        };
        let _serving = CommandBroker::bind(opts, handler.clone(), cancel.clone())
            .await
            .unwrap();

        // first two commands occupy both workers.
        let mut first = send_setup(&endpoint).await;
        assert_eq!(next_status(&mut first).await.ec, CmdErrorCode::Accepted);
        let mut second = send_setup(&endpoint).await;
        assert_eq!(next_status(&mut second).await.ec, CmdErrorCode::Accepted);

        // the third finds no idle worker.
        let mut third = send_setup(&endpoint).await;
        assert_eq!(next_status(&mut third).await.ec, CmdErrorCode::ServerBusy);

        // release the workers: both streams finish with a terminal status.
        handler.release.add_permits(2);
        assert_eq!(next_status(&mut first).await.ec, CmdErrorCode::Succeed);
        assert_eq!(next_status(&mut second).await.ec, CmdErrorCode::Succeed);

        // with workers idle again, a retry goes through; the worker may
        // still be re-announcing itself, so busy answers are retried.
        let mut retry = loop {
            let mut t = send_setup(&endpoint).await;
            match next_status(&mut t).await.ec {
                CmdErrorCode::Accepted => break t,
                CmdErrorCode::ServerBusy => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                other => panic!("unexpected status: {other}"),
            }
        };
        handler.release.add_permits(1);
        assert_eq!(next_status(&mut retry).await.ec, CmdErrorCode::Succeed);

        cancel.cancel();
    }

    #[tokio::test]
    async fn manager_command_gets_a_single_reply() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = dir.path().join("cmd.sock");
        let handler = Arc::new(GatedHandler {
            release: Semaphore::new(0),
        });
        let cancel = CancellationToken::new();
        let opts = BrokerOptions {
            endpoint: endpoint.clone(),
            workers: 1,
        };
        let _serving = CommandBroker::bind(opts, handler, cancel.clone()).await.unwrap();

        let stream = UnixStream::connect(&endpoint).await.unwrap();
        let mut transport = Framed::new(stream, FrameCodec);
        let mut frame = Frame::new();
        frame.push_type(Command::GetAllModuleConfigs.code() as i64);
        transport.send(frame).await.unwrap();

        let mut reply = tokio::time::timeout(Duration::from_secs(5), transport.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let code = reply.pop_type().unwrap();
        assert_eq!(code, CmdErrorCode::Succeed.code() as i64);

        cancel.cancel();
    }

    #[tokio::test]
    async fn unknown_command_code_is_answered_not_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = dir.path().join("cmd.sock");
        let handler = Arc::new(GatedHandler {
            release: Semaphore::new(0),
        });
        let cancel = CancellationToken::new();
        let opts = BrokerOptions {
            endpoint: endpoint.clone(),
            workers: 1,
        };
        let _serving = CommandBroker::bind(opts, handler, cancel.clone()).await.unwrap();

        let stream = UnixStream::connect(&endpoint).await.unwrap();
        let mut transport = Framed::new(stream, FrameCodec);
        let mut frame = Frame::new();
        frame.push_type(99); // not a known command
        transport.send(frame).await.unwrap();
        assert_eq!(next_status(&mut transport).await.ec, CmdErrorCode::SystemError);

        cancel.cancel();
    }
}
