//! Process-wide module directory: who is registered, where, whether it is
//! still alive, and which child process backs it.
//!
//! One mutex guards the whole map. Auto-launched modules (heartbeat interval
//! 0) are supervised through their child process handle; remote modules
//! heartbeat and are ejected through a grace-period wait when removed.

mod serve;
pub use serve::{ModuleRouter, RegistryService};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use podium_model::constants::{
    DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_HEARTBEAT_TIMEOUT_MS, local_registry_addr,
};

use crate::process::{ProcessHandle, ProcessReaper};

const PURGE_INTERVAL: Duration = Duration::from_millis(500);

/// One entry of the active-module set a scenario setup installs.
#[derive(Debug, Clone)]
pub struct ModuleRegisterSetup {
    pub name: String,
    /// Manager-assigned instance uuid for auto-launched modules; empty for
    /// remote modules, whose identity is learned at registration.
    pub uuid: String,
    pub step_timeout_ms: u32,
}

/// Registration record of one module.
#[derive(Debug, Clone, Default)]
pub struct RegisterContext {
    pub uuid: String,
    /// Transport identity the module registered under; cleared (slot kept)
    /// when an auto-launched process dies so a relaunch can re-register
    /// under the same uuid.
    pub addr: String,
    /// 0: auto-launched, supervised via process handle. >0: remote module
    /// expected to heartbeat this often.
    pub heartbeat_interval_ms: u32,
    /// None means "far future": refreshed on every heartbeat.
    pub expire_at: Option<Instant>,
    pub child: Option<ProcessHandle>,
    pub disconnecting: bool,
    pub disconnected: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    Succeed { heartbeat_interval_ms: u32 },
    Failed,
}

#[derive(Debug, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Expiry refreshed; no reply owed.
    Refreshed,
    /// Auto-launched module, heartbeats carry no meaning; no reply owed.
    Silent,
    Failed,
    /// The module is marked for removal and must unregister itself.
    Disconnecting,
}

/// Answer of a registration-status query.
#[derive(Debug, Clone, Default)]
pub struct RegisterStatus {
    /// true when the module is currently reachable (address known).
    pub registered: bool,
    pub addr: String,
    /// Pending process-exit description, consumed by the query.
    pub exit_desc: Option<String>,
}

#[derive(Default)]
struct RegistryState {
    modules: HashMap<String, RegisterContext>,
    exit_desc: HashMap<String, String>,
    last_purge: Option<Instant>,
}

struct RegistryShared {
    state: Mutex<RegistryState>,
    disconnect_notify: Notify,
    ejectors: Mutex<Vec<JoinHandle<()>>>,
    reaper: Arc<ProcessReaper>,
    instance_id: u16,
}

#[derive(Clone)]
pub struct ModuleRegistry {
    shared: Arc<RegistryShared>,
}

impl ModuleRegistry {
    pub fn new(reaper: Arc<ProcessReaper>, instance_id: u16) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                state: Mutex::new(RegistryState::default()),
                disconnect_notify: Notify::new(),
                ejectors: Mutex::new(Vec::new()),
                reaper,
                instance_id,
            }),
        }
    }

    pub fn instance_id(&self) -> u16 {
        self.shared.instance_id
    }

    /// Loopback address auto-launched children are pointed at.
    pub fn local_addr(&self) -> String {
        local_registry_addr(self.shared.instance_id)
    }

    /// Installs the expected module set for the next scenario run.
    ///
    /// Pending ejector tasks are awaited first so a restart never races a
    /// removal still in flight; the purge then runs under the same lock
    /// acquisition as the apply, so a stale context cannot resurrect between
    /// the two.
    pub async fn setup_active_module_context(&self, setup: Vec<ModuleRegisterSetup>) {
        self.join_ejectors().await;

        let mut st = self.shared.state.lock().unwrap();
        self.purge_locked(&mut st);
        st.exit_desc.clear();

        let active: HashSet<&str> = setup.iter().map(|s| s.name.as_str()).collect();
        let reaper = &self.shared.reaper;
        st.modules.retain(|name, ctx| {
            if active.contains(name.as_str()) {
                return true;
            }
            if ctx.heartbeat_interval_ms == 0
                && let Some(pid) = ctx.child
            {
                info!(module = %name, pid, "dropping inactive module, killing its process");
                let _ = reaper.start_kill(pid);
            } else {
                info!(module = %name, "dropping inactive module registration");
            }
            false
        });

        for s in setup {
            match st.modules.get_mut(&s.name) {
                None => {
                    debug!(module = %s.name, uuid = %s.uuid, "new module context");
                    st.modules.insert(
                        s.name,
                        RegisterContext {
                            uuid: s.uuid,
                            ..Default::default()
                        },
                    );
                }
                Some(ctx) => {
                    // A context already exists: a remote module may have
                    // registered before this point, or a previous run left a
                    // reusable slot behind.
                    if s.uuid.is_empty() || ctx.uuid == s.uuid {
                        debug!(module = %s.name, "keeping existing module context");
                    } else {
                        // an unexpected instance holds the name; invalidate it.
                        warn!(module = %s.name, old = %ctx.uuid, new = %s.uuid,
                              "replacing stale module context");
                        *ctx = RegisterContext {
                            uuid: s.uuid,
                            ..Default::default()
                        };
                    }
                }
            }
        }
    }

    /// Full status query; blocks on the registry lock and yields the address.
    pub fn register_status(&self, name: &str) -> RegisterStatus {
        let mut st = self.shared.state.lock().unwrap();
        self.purge_locked(&mut st);
        Self::status_locked(&mut st, name)
    }

    /// Non-blocking variant, safe to call under contention: `None` means the
    /// lock was busy and the caller should assume the module is alive.
    pub fn try_register_status(&self, name: &str) -> Option<RegisterStatus> {
        let mut st = self.shared.state.try_lock().ok()?;
        self.purge_locked(&mut st);
        Some(Self::status_locked(&mut st, name))
    }

    fn status_locked(st: &mut MutexGuard<'_, RegistryState>, name: &str) -> RegisterStatus {
        let exit_desc = st.exit_desc.remove(name);
        match st.modules.get(name) {
            None => RegisterStatus {
                exit_desc,
                ..Default::default()
            },
            Some(ctx) => RegisterStatus {
                registered: !ctx.addr.is_empty(),
                addr: ctx.addr.clone(),
                exit_desc,
            },
        }
    }

    /// Registers a module under `name`. Fails when the name is held by a
    /// different live instance or the presented uuid does not match the
    /// manager-assigned one.
    pub fn register_module(&self, name: &str, uuid: &str, addr: &str) -> RegisterOutcome {
        info!(module = %name, %uuid, "registering module");
        let mut st = self.shared.state.lock().unwrap();
        self.purge_locked(&mut st);
        let ctx = st.modules.entry(name.to_string()).or_default();

        if ctx.addr.is_empty() {
            if ctx.uuid.is_empty() {
                // remote module announcing itself; adopt its identity.
                ctx.uuid = uuid.to_string();
                ctx.heartbeat_interval_ms = DEFAULT_HEARTBEAT_INTERVAL_MS;
            } else if ctx.uuid != uuid {
                warn!(module = %name, %uuid, expected = %ctx.uuid,
                      "unexpected module registering, ignored");
                return RegisterOutcome::Failed;
            }
        } else if ctx.heartbeat_interval_ms > 0 {
            if ctx.uuid == uuid {
                // a live remote module re-registering means something broke
                // on its side; disconnect it entirely.
                warn!(module = %name, %uuid, "re-registration of a live module, disconnected");
                st.modules.remove(name);
            } else {
                warn!(module = %name, %uuid,
                      "register failed: a same-named remote module is already registered");
            }
            return RegisterOutcome::Failed;
        } else {
            warn!(module = %name, %uuid,
                  "register failed: a same-named auto-launched module is already registered");
            return RegisterOutcome::Failed;
        }

        ctx.addr = addr.to_string();
        let heartbeat_interval_ms = ctx.heartbeat_interval_ms;
        if heartbeat_interval_ms > 0 {
            ctx.expire_at = None;
        }
        info!(module = %name, %uuid, "module registered");
        RegisterOutcome::Succeed {
            heartbeat_interval_ms,
        }
    }

    /// Unregisters a module; succeeds only when the uuid matches the current
    /// registration. If an ejector is waiting on this module, the waiter is
    /// signalled and left to erase the context itself.
    pub fn unregister_module(&self, name: &str, uuid: &str) -> bool {
        info!(module = %name, %uuid, "un-registering module");
        let mut st = self.shared.state.lock().unwrap();
        let Some(ctx) = st.modules.get_mut(name) else {
            warn!(module = %name, "un-register ignored: no such context");
            return false;
        };
        if ctx.uuid != uuid {
            warn!(module = %name, %uuid, current = %ctx.uuid,
                  "un-register ignored: uuid does not match");
            return false;
        }
        if ctx.disconnecting {
            ctx.disconnected = true;
            self.shared.disconnect_notify.notify_waiters();
        } else {
            st.modules.remove(name);
        }
        info!(module = %name, %uuid, "module un-registered");
        true
    }

    /// Heartbeat: refreshes the expiry deadline, or tells the module to
    /// disconnect when it is marked for removal.
    pub fn refresh_module(&self, name: &str, uuid: &str) -> HeartbeatOutcome {
        let mut st = self.shared.state.lock().unwrap();
        let Some(ctx) = st.modules.get_mut(name) else {
            warn!(module = %name, %uuid, "unexpected heartbeat: no such context");
            return HeartbeatOutcome::Failed;
        };
        if ctx.uuid != uuid {
            warn!(module = %name, %uuid, current = %ctx.uuid,
                  "unexpected heartbeat: uuid does not match");
            return HeartbeatOutcome::Failed;
        }
        if ctx.heartbeat_interval_ms == 0 {
            return HeartbeatOutcome::Silent;
        }
        if ctx.disconnecting {
            info!(module = %name, %uuid, "asking module to disconnect");
            return HeartbeatOutcome::Disconnecting;
        }
        ctx.expire_at = None;
        HeartbeatOutcome::Refreshed
    }

    /// Removes a module registration. Auto-launched contexts are erased
    /// immediately; a heartbeating module is told to disconnect on its next
    /// heartbeat and its context is erased once it acknowledges via
    /// unregister, or after the grace period, whichever comes first.
    pub fn remove_registered_module(&self, name: &str) {
        let mut st = self.shared.state.lock().unwrap();
        let Some(ctx) = st.modules.get(name) else {
            return;
        };
        if ctx.heartbeat_interval_ms == 0 {
            st.modules.remove(name);
            return;
        }
        drop(st);

        let shared = Arc::clone(&self.shared);
        let name = name.to_string();
        let handle = tokio::spawn(async move { eject_module(shared, name).await });
        self.shared.ejectors.lock().unwrap().push(handle);
    }

    /// Awaits all pending graceful-disconnect tasks.
    pub async fn join_ejectors(&self) {
        let handles: Vec<_> = {
            let mut ejectors = self.shared.ejectors.lock().unwrap();
            ejectors.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub fn add_child_process_handle(&self, name: &str, pid: ProcessHandle) {
        let mut st = self.shared.state.lock().unwrap();
        if let Some(ctx) = st.modules.get_mut(name) {
            ctx.child = Some(pid);
        }
    }

    pub fn child_process_handle(&self, name: &str) -> Option<ProcessHandle> {
        let mut st = self.shared.state.lock().unwrap();
        self.purge_locked(&mut st);
        st.modules.get(name).and_then(|ctx| ctx.child)
    }

    /// Resolves the registry key for a message: when the uuid is known under
    /// a different name (the module was reconfigured), that name wins.
    pub fn resolve_name(&self, reported: &str, uuid: &str) -> String {
        if uuid.is_empty() {
            return reported.to_string();
        }
        let st = self.shared.state.lock().unwrap();
        for (name, ctx) in &st.modules {
            if ctx.uuid == uuid {
                return name.clone();
            }
        }
        reported.to_string()
    }

    /// Snapshot of one context, mainly for inspection in tests and logs.
    pub fn context(&self, name: &str) -> Option<RegisterContext> {
        self.shared.state.lock().unwrap().modules.get(name).cloned()
    }

    /// Rate-limited sweep: observe child exits of auto-launched modules
    /// (clearing the address but keeping the slot) and drop expired
    /// heartbeating modules.
    fn purge_locked(&self, st: &mut MutexGuard<'_, RegistryState>) {
        let now = Instant::now();
        if let Some(last) = st.last_purge
            && now.duration_since(last) < PURGE_INTERVAL
        {
            return;
        }
        let st = &mut **st;
        st.last_purge = Some(now);

        let reaper = &self.shared.reaper;
        let exit_desc = &mut st.exit_desc;
        st.modules.retain(|name, ctx| {
            if ctx.heartbeat_interval_ms == 0 {
                if let Some(pid) = ctx.child
                    && let Some(desc) = reaper.exit_description(pid)
                {
                    info!(module = %name, uuid = %ctx.uuid, %desc, "module process exited");
                    exit_desc.insert(name.clone(), desc);
                    // keep the slot: the manager-assigned uuid must survive
                    // so a relaunched instance can register again.
                    ctx.addr.clear();
                    ctx.child = None;
                }
                true
            } else {
                match ctx.expire_at {
                    Some(at) if now > at => {
                        warn!(module = %name, uuid = %ctx.uuid, "expired module purged");
                        false
                    }
                    _ => true,
                }
            }
        });
    }
}

/// Waits (bounded by the grace period) for the module to acknowledge the
/// disconnect, then erases the context regardless. Map membership is
/// re-checked after every wake: another ejector or an expiry purge may have
/// erased the entry already.
async fn eject_module(shared: Arc<RegistryShared>, name: String) {
    {
        let mut st = shared.state.lock().unwrap();
        let Some(ctx) = st.modules.get_mut(&name) else {
            return;
        };
        ctx.disconnecting = true;
        info!(module = %name, uuid = %ctx.uuid, "waiting for module to disconnect");
    }

    let deadline = Instant::now() + Duration::from_millis(u64::from(DEFAULT_HEARTBEAT_TIMEOUT_MS));
    loop {
        let notified = shared.disconnect_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        {
            let st = shared.state.lock().unwrap();
            match st.modules.get(&name) {
                None => return,
                Some(ctx) if ctx.disconnected => break,
                Some(_) => {}
            }
        }
        if tokio::time::timeout_at(deadline, notified).await.is_err() {
            break;
        }
    }

    let mut st = shared.state.lock().unwrap();
    if let Some(ctx) = st.modules.remove(&name) {
        if ctx.disconnected {
            info!(module = %name, uuid = %ctx.uuid, "module disconnected gracefully");
        } else {
            warn!(module = %name, uuid = %ctx.uuid,
                  "disconnect not confirmed, removed forcibly");
        }
    }
}
