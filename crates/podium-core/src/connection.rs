//! Timed request/response endpoint to one module.
//!
//! A connection never blocks longer than the caller allows: `send` records a
//! deadline, `receive` polls up to `max_wait` and synthesizes a timeout
//! response once the deadline passes. A reply that cannot be decoded is
//! mapped to a version-incompatible response instead of surfacing an error
//! across the manager boundary.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, warn};

use podium_model::{ConnectionConfig, ModuleRequestType, ModuleResponseType};
use podium_wire::{Frame, ModuleRequest, ModuleResponse};

use crate::error::ConnectionError;
use crate::registry::ModuleRouter;

/// One RPC endpoint to a single module; never shared between two owners.
#[async_trait]
pub trait ModuleConnection: Send {
    /// Serializes and sends a request, arming the reply deadline (step
    /// timeout for Step requests, command timeout otherwise). `false` means
    /// the transport refused the send; the caller may retry by recreating
    /// the connection.
    async fn send(&mut self, req: &ModuleRequest) -> bool;

    /// Polls for the reply for up to `max_wait`. `None` means "not yet":
    /// nothing arrived and the deadline still stands. Once the deadline has
    /// passed a timeout response is fabricated and the slot cleared.
    async fn receive(&mut self, max_wait: Duration) -> Option<ModuleResponse>;

    /// Whether a request is outstanding; used to avoid firing a duplicate
    /// request while one is in flight.
    fn waiting_reply(&self) -> bool;
}

/// Creates connections; injected into the module manager so tests can
/// substitute fakes.
pub trait ModuleConnectionFactory: Send + Sync {
    fn create(
        &self,
        addr: &str,
        cfg: &ConnectionConfig,
    ) -> Result<Box<dyn ModuleConnection>, ConnectionError>;
}

struct Pending {
    kind: ModuleRequestType,
    deadline: Instant,
    timeout: Duration,
}

/// Connection routed through the registry's forwarding channel by the
/// module's registered identity.
pub struct RouterConnection {
    identity: String,
    cfg: ConnectionConfig,
    router: ModuleRouter,
    reply_tx: mpsc::UnboundedSender<Frame>,
    reply_rx: mpsc::UnboundedReceiver<Frame>,
    pending: Option<Pending>,
}

impl RouterConnection {
    fn new(identity: String, cfg: ConnectionConfig, router: ModuleRouter) -> Self {
        let (reply_tx, reply_rx) = router.subscribe(&identity);
        Self {
            identity,
            cfg,
            router,
            reply_tx,
            reply_rx,
            pending: None,
        }
    }

    fn request_timeout(&self, req: &ModuleRequest) -> Duration {
        let ms = if req.is_step() && self.cfg.step_timeout_ms != 0 {
            self.cfg.step_timeout_ms
        } else {
            self.cfg.cmd_timeout_ms
        };
        Duration::from_millis(u64::from(ms))
    }
}

impl Drop for RouterConnection {
    fn drop(&mut self) {
        self.router.unsubscribe_if(&self.identity, &self.reply_tx);
    }
}

#[async_trait]
impl ModuleConnection for RouterConnection {
    async fn send(&mut self, req: &ModuleRequest) -> bool {
        let timeout = self.request_timeout(req);
        if !self.router.forward(&self.identity, req.encode()) {
            warn!(module = %self.identity, "request send failed: forwarding channel closed");
            return false;
        }
        self.pending = Some(Pending {
            kind: req.kind(),
            deadline: Instant::now() + timeout,
            timeout,
        });
        true
    }

    async fn receive(&mut self, max_wait: Duration) -> Option<ModuleResponse> {
        let (kind, deadline, timeout) = {
            let p = self.pending.as_ref()?;
            (p.kind, p.deadline, p.timeout)
        };

        match tokio::time::timeout(max_wait, self.reply_rx.recv()).await {
            Ok(Some(mut frame)) => {
                self.pending = None;
                Some(match ModuleResponse::decode(kind, &mut frame) {
                    Ok(resp) => resp,
                    Err(e) => {
                        error!(module = %self.identity, "module reply decode error: {e}");
                        ModuleResponse::synthetic(
                            kind,
                            ModuleResponseType::VersionIncompatible,
                            format!("undecodable reply: {e}"),
                        )
                    }
                })
            }
            // channel closed (subscription displaced) or nothing yet: either
            // way only the deadline decides when to give up.
            Ok(None) | Err(_) => {
                if Instant::now() < deadline {
                    return None;
                }
                self.pending = None;
                warn!(module = %self.identity, kind = %kind, "module request timed out");
                Some(ModuleResponse::synthetic(
                    kind,
                    ModuleResponseType::Timeout,
                    format!("no reply within {}ms", timeout.as_millis()),
                ))
            }
        }
    }

    fn waiting_reply(&self) -> bool {
        self.pending.is_some()
    }
}

pub struct RouterConnectionFactory {
    router: ModuleRouter,
}

impl RouterConnectionFactory {
    pub fn new(router: ModuleRouter) -> Self {
        Self { router }
    }
}

impl ModuleConnectionFactory for RouterConnectionFactory {
    fn create(
        &self,
        addr: &str,
        cfg: &ConnectionConfig,
    ) -> Result<Box<dyn ModuleConnection>, ConnectionError> {
        if addr.is_empty() {
            return Err(ConnectionError::TransportGone("<empty identity>".into()));
        }
        Ok(Box::new(RouterConnection::new(
            addr.to_string(),
            *cfg,
            self.router.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessReaper;
    use crate::registry::{ModuleRegistry, RegistryService};
    use futures_util::{SinkExt, StreamExt};
    use podium_model::constants::{PROTOCOL_VERSION, local_registry_addr};
    use podium_wire::{FrameCodec, ModuleEnvelope, ModuleStepRequest, ModuleStepResponse};
    use std::sync::Arc;
    use tokio_util::codec::Framed;
    use tokio_util::sync::CancellationToken;

    fn step_request() -> ModuleRequest {
        ModuleRequest::Step(ModuleStepRequest {
            sim_time_ms: 20,
            ..Default::default()
        })
    }

    async fn bound_router(instance_id: u16) -> (ModuleRegistry, ModuleRouter, CancellationToken) {
        let registry = ModuleRegistry::new(Arc::new(ProcessReaper::new()), instance_id);
        let cancel = CancellationToken::new();
        let (router, _serving) = RegistryService::bind(registry.clone(), cancel.clone())
            .await
            .unwrap();
        (registry, router, cancel)
    }

    #[tokio::test]
    async fn round_trip_through_a_registered_module() {
        let (_registry, router, cancel) = bound_router(93).await;

        let stream = tokio::net::TcpStream::connect(local_registry_addr(93))
            .await
            .unwrap();
        let mut module = Framed::new(stream, FrameCodec);
        module
            .send(ModuleEnvelope::register("planning", "u-1", "u-1", PROTOCOL_VERSION))
            .await
            .unwrap();
        module.next().await.unwrap().unwrap(); // register reply

        let factory = RouterConnectionFactory::new(router);
        let mut conn = factory
            .create("u-1", &ConnectionConfig::default())
            .unwrap();

        assert!(!conn.waiting_reply());
        assert!(conn.send(&step_request()).await);
        assert!(conn.waiting_reply());

        // module answers the forwarded request.
        let mut incoming = module.next().await.unwrap().unwrap();
        incoming.pop_type().unwrap(); // request marker
        let req = ModuleRequest::decode(&mut incoming).unwrap();
        assert!(req.is_step());
        let resp = ModuleResponse::Step(ModuleStepResponse {
            elapsed_ms: 3,
            ..Default::default()
        });
        module
            .send(ModuleEnvelope::response("planning", "u-1", resp.encode()))
            .await
            .unwrap();

        let mut got = None;
        for _ in 0..100 {
            if let Some(resp) = conn.receive(Duration::from_millis(50)).await {
                got = Some(resp);
                break;
            }
        }
        match got.expect("reply before deadline") {
            ModuleResponse::Step(step) => assert_eq!(step.elapsed_ms, 3),
            other => panic!("unexpected response: {other:?}"),
        }
        assert!(!conn.waiting_reply());
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn missing_reply_times_out_at_the_deadline() {
        let (_registry, router, _cancel) = bound_router(94).await;
        let factory = RouterConnectionFactory::new(router.clone());

        let cfg = ConnectionConfig {
            step_timeout_ms: 3000,
            cmd_timeout_ms: 30_000,
        };
        let mut conn = factory.create("u-9", &cfg).unwrap();
        assert!(conn.send(&step_request()).await);

        // before the step deadline: not yet.
        assert!(conn.receive(Duration::from_millis(100)).await.is_none());
        assert!(conn.waiting_reply());

        tokio::time::sleep(Duration::from_millis(3100)).await;
        let resp = conn.receive(Duration::from_millis(1)).await.expect("timeout synthesized");
        assert_eq!(resp.ec(), ModuleResponseType::Timeout);
        assert_eq!(resp.kind(), ModuleRequestType::Step);
        assert!(!conn.waiting_reply());
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_reply_maps_to_version_incompatible() {
        let (_registry, router, _cancel) = bound_router(95).await;
        let factory = RouterConnectionFactory::new(router.clone());
        let mut conn = factory.create("u-5", &ConnectionConfig::default()).unwrap();
        assert!(conn.send(&step_request()).await);

        // hand the connection a garbage reply through the router.
        let mut garbage = Frame::new();
        garbage.push_bytes(b"\xff\xfe");
        assert!(router.dispatch_reply("u-5", garbage));

        let resp = conn
            .receive(Duration::from_millis(10))
            .await
            .expect("mapped response");
        assert_eq!(resp.ec(), ModuleResponseType::VersionIncompatible);
    }

    #[tokio::test]
    async fn recreating_a_connection_displaces_the_old_subscription() {
        let (_registry, router, _cancel) = bound_router(96).await;
        let factory = RouterConnectionFactory::new(router.clone());

        let conn_a = factory.create("u-7", &ConnectionConfig::default()).unwrap();
        let conn_b = factory.create("u-7", &ConnectionConfig::default()).unwrap();
        // dropping the displaced connection must not tear down the new one.
        drop(conn_a);

        let mut ping = Frame::new();
        ping.push_str("x");
        assert!(router.dispatch_reply("u-7", ping));
        drop(conn_b);
        let mut ping = Frame::new();
        ping.push_str("x");
        assert!(!router.dispatch_reply("u-7", ping));
    }
}
