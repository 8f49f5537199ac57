//! The registry's serving loop.
//!
//! One TCP endpoint faces the modules (register/unregister/heartbeat and
//! relayed responses); an in-process forwarding channel faces the
//! coordinator's command path, delivering outbound requests to the right
//! module by its registered identity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use podium_model::ModuleMessageType;
use podium_model::constants::{
    PROTOCOL_VERSION, protocol_compatible, protocol_version_string, registry_bind_addr,
};
use podium_wire::{Frame, FrameCodec, ModuleEnvelope, RegisterReply, WireError};

use crate::error::RegistryError;
use crate::registry::{HeartbeatOutcome, ModuleRegistry, RegisterOutcome};

type FrameTx = mpsc::UnboundedSender<Frame>;
type SharedTxMap = Arc<Mutex<HashMap<String, FrameTx>>>;

/// Handle to the registry's internal forwarding endpoint.
///
/// `forward` pushes a coordinator request towards the module registered under
/// `identity`; `subscribe` claims the reply stream for that identity (one
/// claimant at a time, a new subscription displaces the previous one).
#[derive(Clone)]
pub struct ModuleRouter {
    outbound: mpsc::UnboundedSender<(String, Frame)>,
    replies: SharedTxMap,
}

impl ModuleRouter {
    pub fn forward(&self, identity: &str, frame: Frame) -> bool {
        self.outbound.send((identity.to_string(), frame)).is_ok()
    }

    pub fn subscribe(&self, identity: &str) -> (FrameTx, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.replies
            .lock()
            .unwrap()
            .insert(identity.to_string(), tx.clone());
        (tx, rx)
    }

    /// Drops the reply subscription, but only when it is still the given one:
    /// a replacement subscription must not be torn down by the old owner.
    pub fn unsubscribe_if(&self, identity: &str, tx: &FrameTx) {
        let mut replies = self.replies.lock().unwrap();
        if let Some(current) = replies.get(identity)
            && current.same_channel(tx)
        {
            replies.remove(identity);
        }
    }

    pub(crate) fn dispatch_reply(&self, identity: &str, frame: Frame) -> bool {
        let tx = self.replies.lock().unwrap().get(identity).cloned();
        match tx {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }
}

pub struct RegistryService;

impl RegistryService {
    /// Binds the module-facing endpoint and spawns the serving loop.
    pub async fn bind(
        registry: ModuleRegistry,
        cancel: CancellationToken,
    ) -> Result<(ModuleRouter, JoinHandle<()>), RegistryError> {
        let addr = registry_bind_addr(registry.instance_id());
        info!(%addr, "binding module registry endpoint");
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| RegistryError::Bind {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let router = ModuleRouter {
            outbound: out_tx,
            replies: Arc::new(Mutex::new(HashMap::new())),
        };

        let serve_router = router.clone();
        let handle = tokio::spawn(async move {
            serve(registry, listener, out_rx, serve_router, cancel).await;
        });
        Ok((router, handle))
    }
}

async fn serve(
    registry: ModuleRegistry,
    listener: TcpListener,
    mut out_rx: mpsc::UnboundedReceiver<(String, Frame)>,
    router: ModuleRouter,
    cancel: CancellationToken,
) {
    // transport writers of currently connected modules, keyed by identity.
    let writers: SharedTxMap = Arc::new(Mutex::new(HashMap::new()));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "module transport connected");
                    let conn = ModuleStreamContext {
                        registry: registry.clone(),
                        router: router.clone(),
                        writers: Arc::clone(&writers),
                    };
                    tokio::spawn(conn.run(stream, cancel.child_token()));
                }
                Err(e) => warn!("module endpoint accept error: {e}"),
            },
            outbound = out_rx.recv() => match outbound {
                Some((identity, frame)) => {
                    let writer = writers.lock().unwrap().get(&identity).cloned();
                    match writer {
                        Some(tx) => {
                            let _ = tx.send(ModuleEnvelope::wrap_request(frame));
                        }
                        None => warn!(%identity, "dropping request: module transport not connected"),
                    }
                }
                None => break,
            },
        }
    }
    info!("module registry serving finished");
}

struct ModuleStreamContext {
    registry: ModuleRegistry,
    router: ModuleRouter,
    writers: SharedTxMap,
}

impl ModuleStreamContext {
    async fn run(self, stream: TcpStream, cancel: CancellationToken) {
        let framed = Framed::new(stream, FrameCodec);
        let (mut sink, mut frames) = framed.split();

        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Frame>();
        let writer = tokio::spawn(async move {
            while let Some(frame) = write_rx.recv().await {
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
        });

        // identities this transport registered; cleaned up on disconnect.
        let mut identities: Vec<String> = Vec::new();
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = frames.next() => frame,
            };
            let frame = match frame {
                None => break,
                Some(Err(e)) => {
                    error!("module transport receive error: {e}");
                    break;
                }
                Some(Ok(frame)) => frame,
            };
            let envelope = match ModuleEnvelope::decode(frame) {
                Ok(env) => env,
                Err(e) => {
                    error!("invalid module message: {e}");
                    continue;
                }
            };
            if let Err(e) = self.handle(envelope, &write_tx, &mut identities) {
                error!("module message handling error: {e}");
            }
        }

        // a vanished transport is indistinguishable from a silent module: the
        // purge sweep or the manager's exit check will notice; only the
        // transport bookkeeping is dropped here.
        let mut writers = self.writers.lock().unwrap();
        for identity in identities {
            if let Some(current) = writers.get(&identity)
                && current.same_channel(&write_tx)
            {
                writers.remove(&identity);
            }
        }
        drop(writers);
        writer.abort();
    }

    fn handle(
        &self,
        envelope: ModuleEnvelope,
        write_tx: &FrameTx,
        identities: &mut Vec<String>,
    ) -> Result<(), WireError> {
        let ModuleEnvelope {
            msg_type,
            name,
            uuid,
            mut rest,
        } = envelope;
        let key = self.registry.resolve_name(&name, &uuid);

        match msg_type {
            ModuleMessageType::Register => {
                let addr = rest.pop_str()?;
                let version = rest.pop_u64()? as u32;
                info!(module = %key, %uuid, version = %protocol_version_string(version),
                      "module protocol version");
                let reply = if !protocol_compatible(PROTOCOL_VERSION, version) {
                    error!(module = %key,
                           module_version = %protocol_version_string(version),
                           coordinator_version = %protocol_version_string(PROTOCOL_VERSION),
                           "module protocol version incompatible");
                    RegisterReply::VersionIncompatible {
                        coordinator_version: protocol_version_string(PROTOCOL_VERSION),
                    }
                } else {
                    match self.registry.register_module(&key, &uuid, &addr) {
                        RegisterOutcome::Succeed {
                            heartbeat_interval_ms,
                        } => {
                            self.writers
                                .lock()
                                .unwrap()
                                .insert(uuid.clone(), write_tx.clone());
                            identities.push(uuid.clone());
                            RegisterReply::Succeed {
                                heartbeat_interval_ms,
                            }
                        }
                        RegisterOutcome::Failed => RegisterReply::Failed,
                    }
                };
                let _ = write_tx.send(reply.encode());
            }
            ModuleMessageType::UnRegister => {
                let reply = if self.registry.unregister_module(&key, &uuid) {
                    self.writers.lock().unwrap().remove(&uuid);
                    RegisterReply::Succeed {
                        heartbeat_interval_ms: 0,
                    }
                } else {
                    RegisterReply::Failed
                };
                let _ = write_tx.send(reply.encode());
            }
            ModuleMessageType::Response => {
                if !self.router.dispatch_reply(&uuid, rest) {
                    warn!(module = %key, %uuid, "module response with no pending consumer");
                }
                // a response proves liveness, treat it as a heartbeat too.
                self.answer_heartbeat(&key, &uuid, write_tx);
            }
            ModuleMessageType::Heartbeat => {
                self.answer_heartbeat(&key, &uuid, write_tx);
            }
            other => error!(module = %key, "invalid module message type received: {other}"),
        }
        Ok(())
    }

    fn answer_heartbeat(&self, key: &str, uuid: &str, write_tx: &FrameTx) {
        match self.registry.refresh_module(key, uuid) {
            HeartbeatOutcome::Refreshed | HeartbeatOutcome::Silent => {}
            HeartbeatOutcome::Failed => {
                let _ = write_tx.send(RegisterReply::Failed.encode());
            }
            HeartbeatOutcome::Disconnecting => {
                let _ = write_tx.send(RegisterReply::Disconnecting.encode());
            }
        }
    }
}
