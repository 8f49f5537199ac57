//! Per-module launch/connect/init state machine.
//!
//! `monitor_init_workflow` is polled cooperatively from the loop driving the
//! simulation and advances every module by at most one step per call; the
//! manager is the sole mutator of its module table, so no lock is needed
//! here. Across scenario resets a previous module instance is reused when
//! nothing that would require a relaunch has changed.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};

use podium_model::constants::CHILD_MODULE_ENV_UUID;
use podium_model::{
    CoordinatorConfig, ModuleCmdStatus, ModuleConfig, ModuleInitState, ModuleInitStatus,
    ModuleResponseType, TopicPubSubInfo,
};
use podium_wire::{ModuleInitRequest, ModuleRequest, ModuleResponse};

use crate::connection::{ModuleConnection, ModuleConnectionFactory};
use crate::error::ManagerError;
use crate::process::{LaunchSpec, ModuleProcessService};
use crate::registry::{ModuleRegisterSetup, ModuleRegistry};

/// Generates per-module-instance identities; injected so tests can pin them.
pub trait InstanceIdGen: Send + Sync {
    fn generate(&self) -> String;
}

/// Random v4 uuids, the production generator.
pub struct UuidGen;

impl InstanceIdGen for UuidGen {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ManagerOptions {
    /// Launcher executable hosting shared-library modules. Empty disables
    /// shared-library launching.
    pub module_host_path: PathBuf,
    /// Directory receiving per-module log files; empty means the working
    /// directory.
    pub module_log_dir: PathBuf,
    /// Overwrite module logs on relaunch instead of rotating by timestamp.
    pub override_module_log: bool,
}

/// Mutable record of one managed module; exactly one per active module name.
struct ModuleStatus {
    config: ModuleConfig,
    uuid: String,
    addr: String,
    init_status: ModuleInitStatus,
    last_launch_mtime: Option<SystemTime>,
    last_check_mtime: Option<SystemTime>,
    conn: Option<Box<dyn ModuleConnection>>,
    event_fired: bool,
}

/// What one `monitor_init_workflow` poll observed.
#[derive(Default)]
pub struct InitWorkflowReport {
    /// Newly observable init events, each emitted exactly once.
    pub events: Vec<ModuleInitStatus>,
    /// Per-module failures surfaced during this poll.
    pub cmd_status: Vec<ModuleCmdStatus>,
    /// Modules currently in a terminal state.
    pub finished: usize,
}

pub struct ModuleManager {
    registry: ModuleRegistry,
    conn_factory: Arc<dyn ModuleConnectionFactory>,
    proc_service: Arc<dyn ModuleProcessService>,
    id_gen: Arc<dyn InstanceIdGen>,
    opts: ManagerOptions,
    modules: HashMap<String, ModuleStatus>,
}

impl ModuleManager {
    /// Fails fast on a broken deployment: a configured module host must be a
    /// real file and the log directory must be creatable.
    pub fn new(
        registry: ModuleRegistry,
        conn_factory: Arc<dyn ModuleConnectionFactory>,
        proc_service: Arc<dyn ModuleProcessService>,
        id_gen: Arc<dyn InstanceIdGen>,
        opts: ManagerOptions,
    ) -> Result<Self, ManagerError> {
        if !opts.module_host_path.as_os_str().is_empty() && !opts.module_host_path.is_file() {
            return Err(ManagerError::InvalidModuleHostPath(
                opts.module_host_path.clone(),
            ));
        }
        if !opts.module_log_dir.as_os_str().is_empty() && !opts.module_log_dir.is_dir() {
            std::fs::create_dir_all(&opts.module_log_dir).map_err(|e| {
                ManagerError::ModuleLogDir {
                    path: opts.module_log_dir.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        info!(host = %opts.module_host_path.display(), log_dir = %opts.module_log_dir.display(),
              "module manager ready");
        Ok(Self {
            registry,
            conn_factory,
            proc_service,
            id_gen,
            opts,
            modules: HashMap::new(),
        })
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    pub fn init_state(&self, name: &str) -> Option<ModuleInitState> {
        self.modules.get(name).map(|s| s.init_status.state)
    }

    pub fn topic_info(&self, name: &str) -> Option<&TopicPubSubInfo> {
        self.modules.get(name).map(|s| &s.init_status.topic_info)
    }

    pub fn module_group(&self, name: &str) -> Option<&str> {
        self.modules.get(name).map(|s| s.config.group.as_str())
    }

    pub fn connection_mut(&mut self, name: &str) -> Option<&mut (dyn ModuleConnection + 'static)> {
        self.modules
            .get_mut(name)
            .and_then(|s| s.conn.as_deref_mut())
    }

    /// Rewinds a module to the start of its init workflow so the next poll
    /// relaunches or reconnects it.
    pub fn restart_init(&mut self, name: &str) -> bool {
        match self.modules.get_mut(name) {
            Some(status) => {
                status.init_status.state = ModuleInitState::Start;
                status.init_status.topic_info.clear();
                status.event_fired = false;
                true
            }
            None => false,
        }
    }

    /// Advances every module's init workflow by at most one step and reports
    /// what became observable. Idempotent on repeated calls in the same
    /// state: terminal modules only bump the finished count.
    pub async fn monitor_init_workflow(&mut self) -> InitWorkflowReport {
        let mut report = InitWorkflowReport::default();
        let names: Vec<String> = self.modules.keys().cloned().collect();
        for name in names {
            let Some(mut status) = self.modules.remove(&name) else {
                continue;
            };
            self.advance_module(&mut status, &mut report).await;
            self.modules.insert(name, status);
        }
        report
    }

    async fn advance_module(&mut self, status: &mut ModuleStatus, report: &mut InitWorkflowReport) {
        let name = status.config.name.clone();
        match status.init_status.state {
            ModuleInitState::Start => {
                if status.config.auto_launch
                    && self.registry.child_process_handle(&name).is_none()
                {
                    if let (Some(last), Some(checked)) =
                        (status.last_launch_mtime, status.last_check_mtime)
                        && last != checked
                    {
                        let mut event = ModuleInitStatus::new(&name);
                        event.binary_updated = true;
                        report.events.push(event);
                    }
                    status.init_status.state = self.launch_module(status, &mut report.cmd_status);
                } else {
                    status.init_status.state = ModuleInitState::Connecting;
                }
            }
            ModuleInitState::Connecting => {
                let reg = self.registry.register_status(&name);
                if reg.registered {
                    info!(module = %name, addr = %reg.addr, "module registered, connecting");
                    if reg.addr != status.addr {
                        status.conn = None;
                    }
                    status.addr = reg.addr;
                    status.init_status.state = self.try_connecting(status, &mut report.cmd_status);
                } else {
                    check_exit_status(reg.exit_desc, status, &mut report.cmd_status);
                }
            }
            ModuleInitState::Connected => {
                report.events.push(status.init_status.clone());
                let req = ModuleRequest::Init(ModuleInitRequest {
                    init_args: status.config.init_args.clone(),
                    group: status.config.group.clone(),
                });
                let sent = match status.conn.as_mut() {
                    Some(conn) => conn.send(&req).await,
                    None => false,
                };
                status.init_status.state = if sent {
                    ModuleInitState::ReqSent
                } else {
                    ModuleInitState::Failed
                };
            }
            ModuleInitState::ReqSent => {
                let resp = match status.conn.as_mut() {
                    Some(conn) => conn.receive(Duration::ZERO).await,
                    None => None,
                };
                match resp {
                    None => {
                        // no reply yet: re-check registration and liveness.
                        let reg = self.registry.register_status(&name);
                        if reg.registered && reg.addr != status.addr {
                            status.init_status.state = ModuleInitState::Connecting;
                        }
                        check_exit_status(reg.exit_desc, status, &mut report.cmd_status);
                    }
                    Some(resp) => {
                        let ec = resp.ec();
                        status.init_status.state = if ec == ModuleResponseType::Ok {
                            ModuleInitState::Succeed
                        } else {
                            ModuleInitState::Failed
                        };
                        if ec != ModuleResponseType::Ok {
                            error!(module = %name, %ec, err = %resp.err(), "module init failed");
                            report
                                .cmd_status
                                .push(ModuleCmdStatus::error(&name, ec, resp.err()));
                        }
                        if let ModuleResponse::Init(init) = resp {
                            status.init_status.topic_info = init.topic_info;
                        }
                        // terminal in the same poll that saw the response.
                        finish_module(status, report);
                    }
                }
            }
            ModuleInitState::Succeed | ModuleInitState::Failed => {
                finish_module(status, report);
            }
        }
    }

    /// Applies a full module-configuration set, reusing running instances
    /// wherever nothing relevant changed and replacing everything else.
    pub async fn update_configs(&mut self, configs: &CoordinatorConfig) {
        let mut active: HashSet<String> = HashSet::new();
        let mut setup_list: Vec<ModuleRegisterSetup> = Vec::new();

        for new_config in &configs.module_configs {
            let name = new_config.name.clone();
            active.insert(name.clone());

            if !self.modules.contains_key(&name) {
                let uuid = self.add_module_config(new_config.clone());
                info!(module = %name, %uuid, "added new module status");
                setup_list.push(setup_entry(new_config, uuid));
                continue;
            }

            if self.check_module_reusable(&name, new_config) {
                let status = self.modules.get_mut(&name).expect("checked above");
                status.event_fired = false;
                status.config = new_config.clone();
                info!(module = %name, uuid = %status.uuid, "reusing module status");
                setup_list.push(setup_entry(new_config, status.uuid.clone()));
            } else {
                let old = self.modules.get(&name).expect("checked above");
                let was_auto = old.config.auto_launch;
                let mtimes = (old.last_launch_mtime, old.last_check_mtime);
                if was_auto {
                    self.terminate(&name);
                }
                self.registry.remove_registered_module(&name);
                self.modules.remove(&name);

                let uuid = self.add_module_config(new_config.clone());
                let status = self.modules.get_mut(&name).expect("just inserted");
                (status.last_launch_mtime, status.last_check_mtime) = mtimes;
                info!(module = %name, %uuid, "module status replaced");
                setup_list.push(setup_entry(new_config, uuid));
            }
        }

        self.terminate_inactive(&active);
        self.registry.setup_active_module_context(setup_list).await;
    }

    /// Whether the running instance can serve the new configuration. On
    /// success the slot is rewound to `Start` with its topic info cleared,
    /// and the connection is dropped when its parameters changed.
    fn check_module_reusable(&mut self, name: &str, new_config: &ModuleConfig) -> bool {
        {
            let status = &self.modules[name];
            if !config_reusable(&status.config, status.init_status.state, new_config) {
                return false;
            }
        }
        if new_config.auto_launch {
            if self.registry.child_process_handle(name).is_none() {
                return false;
            }
            if self.check_binary_updated(name, new_config) {
                return false;
            }
        }

        let status = self.modules.get_mut(name).expect("caller verified");
        status.init_status.state = ModuleInitState::Start;
        status.init_status.topic_info.clear();
        status.event_fired = false;
        if status.config.conn_args != new_config.conn_args {
            status.conn = None;
        }
        true
    }

    /// Records the artifact's current mtime and reports whether it differs
    /// from the one launched.
    fn check_binary_updated(&mut self, name: &str, config: &ModuleConfig) -> bool {
        let mtime = std::fs::metadata(config.launch_artifact())
            .and_then(|m| m.modified())
            .ok();
        let status = self.modules.get_mut(name).expect("caller verified");
        status.last_check_mtime = mtime;
        if mtime != status.last_launch_mtime {
            info!(module = %name, artifact = %config.launch_artifact(),
                  "module artifact changed since last launch");
            return true;
        }
        false
    }

    fn add_module_config(&mut self, config: ModuleConfig) -> String {
        let uuid = if config.auto_launch {
            self.id_gen.generate()
        } else {
            String::new()
        };
        let name = config.name.clone();
        self.modules.insert(
            name.clone(),
            ModuleStatus {
                init_status: ModuleInitStatus::new(&name),
                uuid: uuid.clone(),
                addr: String::new(),
                config,
                last_launch_mtime: None,
                last_check_mtime: None,
                conn: None,
                event_fired: false,
            },
        );
        uuid
    }

    fn launch_module(
        &mut self,
        status: &mut ModuleStatus,
        cmd_status: &mut Vec<ModuleCmdStatus>,
    ) -> ModuleInitState {
        let config = &status.config;
        let name = config.name.clone();
        let registry_addr = self.registry.local_addr();
        let log_path = self.module_log_file_path(&name);

        let mut envs = vec![("LD_LIBRARY_PATH".to_string(), config.dep_paths.join(":"))];
        if !status.uuid.is_empty() {
            envs.push((CHILD_MODULE_ENV_UUID.to_string(), status.uuid.clone()));
        }

        let hosted = !config.shared_lib_path.is_empty();
        let (program, args) = if hosted {
            (
                self.opts.module_host_path.to_string_lossy().into_owned(),
                vec![name.clone(), config.shared_lib_path.clone(), registry_addr],
            )
        } else {
            let mut args = config.bin_args.clone();
            args.push("--registry-addr".to_string());
            args.push(registry_addr);
            (config.bin_path.clone(), args)
        };

        let artifact = Path::new(config.launch_artifact());
        if !artifact.is_file() {
            let what = if hosted { "shared library" } else { "executable" };
            let err = format!("the specified {what} path does not exist: {}", artifact.display());
            error!(module = %name, "module launch failed: {err}");
            cmd_status.push(ModuleCmdStatus::error(&name, ModuleResponseType::Error, err));
            return ModuleInitState::Failed;
        }

        let spec = LaunchSpec {
            program,
            args,
            envs,
            log_path: log_path.clone(),
        };
        let pid = match self.proc_service.launch(&spec) {
            Ok(pid) => pid,
            Err(e) => {
                error!(module = %name, "module launch failed: {e}");
                cmd_status.push(ModuleCmdStatus::error(
                    &name,
                    ModuleResponseType::Error,
                    format!("process launching failed: {e}"),
                ));
                return ModuleInitState::Failed;
            }
        };
        status.init_status.log_file = log_path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(module = %name, pid, log = %log_path.display(), "module process launched");
        self.registry.add_child_process_handle(&name, pid);
        status.last_launch_mtime = std::fs::metadata(artifact).and_then(|m| m.modified()).ok();
        ModuleInitState::Connecting
    }

    fn try_connecting(
        &mut self,
        status: &mut ModuleStatus,
        cmd_status: &mut Vec<ModuleCmdStatus>,
    ) -> ModuleInitState {
        if let Some(conn) = &status.conn
            && !conn.waiting_reply()
        {
            return ModuleInitState::Connected;
        }
        match self
            .conn_factory
            .create(&status.addr, &status.config.conn_args)
        {
            Ok(conn) => {
                status.conn = Some(conn);
                ModuleInitState::Connected
            }
            Err(e) => {
                error!(module = %status.config.name, addr = %status.addr,
                       "connection creation error: {e}");
                cmd_status.push(ModuleCmdStatus::error(
                    &status.config.name,
                    ModuleResponseType::Error,
                    format!("connection creation error. endpoint: {}", status.addr),
                ));
                ModuleInitState::Failed
            }
        }
    }

    /// Kills the module's child process; failures are logged only, since the
    /// process may already be gone.
    pub fn terminate(&self, name: &str) {
        let Some(pid) = self.registry.child_process_handle(name) else {
            warn!(module = %name, "module process no longer exists");
            return;
        };
        info!(module = %name, pid, "terminating module");
        if let Err(e) = self.proc_service.terminate(pid) {
            error!(module = %name, pid, "could not terminate module: {e}");
        }
    }

    fn terminate_inactive(&mut self, active: &HashSet<String>) {
        let stale: Vec<String> = self
            .modules
            .keys()
            .filter(|name| !active.contains(*name))
            .cloned()
            .collect();
        for name in stale {
            let auto = self.modules[&name].config.auto_launch;
            if auto {
                self.terminate(&name);
            }
            self.registry.remove_registered_module(&name);
            self.modules.remove(&name);
            info!(module = %name, "inactive module removed");
        }
    }

    fn module_log_file_path(&self, name: &str) -> PathBuf {
        let dir = if self.opts.module_log_dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            self.opts.module_log_dir.clone()
        };
        let file = if self.opts.override_module_log {
            format!("{name}.log")
        } else {
            let stamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            format!("{name}.{stamp}.log")
        };
        dir.join(file)
    }
}

fn setup_entry(config: &ModuleConfig, uuid: String) -> ModuleRegisterSetup {
    ModuleRegisterSetup {
        name: config.name.clone(),
        uuid,
        step_timeout_ms: config.conn_args.step_timeout_ms,
    }
}

fn check_exit_status(
    exit_desc: Option<String>,
    status: &mut ModuleStatus,
    cmd_status: &mut Vec<ModuleCmdStatus>,
) {
    let Some(desc) = exit_desc else { return };
    status.init_status.state = ModuleInitState::Failed;
    error!(module = %status.config.name, %desc, "module process exited during init");
    cmd_status.push(ModuleCmdStatus::error(
        &status.config.name,
        ModuleResponseType::Error,
        format!("process exited: {desc}"),
    ));
}

fn finish_module(status: &mut ModuleStatus, report: &mut InitWorkflowReport) {
    if !status.event_fired {
        report.events.push(status.init_status.clone());
        status.event_fired = true;
    }
    report.finished += 1;
}

/// The pure part of the reuse decision: everything decidable from the old
/// configuration + init state and the new configuration alone.
///
/// Reuse additionally requires (checked elsewhere) that an auto-launched
/// module's process is still alive and its artifact unmodified.
pub fn config_reusable(
    old: &ModuleConfig,
    old_state: ModuleInitState,
    new: &ModuleConfig,
) -> bool {
    if old.init_args != new.init_args || old.auto_launch != new.auto_launch {
        return false;
    }
    if new.auto_launch {
        if old.dep_paths != new.dep_paths || old.shared_lib_path != new.shared_lib_path {
            return false;
        }
        // the shared library wins when configured; the executable only
        // matters when there is none.
        if new.shared_lib_path.is_empty()
            && (old.bin_path != new.bin_path || old.bin_args != new.bin_args)
        {
            return false;
        }
    }
    if old_state == ModuleInitState::Failed {
        return false;
    }
    // switching between supervised and unsupervised liveness needs a fresh
    // instance: we cannot tell whether an unsupervised one is still there.
    let (old_t, new_t) = (old.conn_args.step_timeout_ms, new.conn_args.step_timeout_ms);
    if old_t != new_t && (old_t == 0 || new_t == 0) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ModuleConnectionFactory;
    use crate::error::ConnectionError;
    use crate::process::{LocalProcessService, ProcessReaper};
    use async_trait::async_trait;
    use podium_model::ConnectionConfig;
    use podium_wire::ModuleInitResponse;
    use proptest::prelude::*;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;

    /// Scriptable connection: pops one canned response per receive call.
    #[derive(Default)]
    struct FakeShared {
        sent: Vec<ModuleRequest>,
        responses: VecDeque<ModuleResponse>,
        refuse_send: bool,
    }

    #[derive(Clone, Default)]
    struct FakeFactory {
        shared: Arc<Mutex<FakeShared>>,
        fail_create: bool,
    }

    struct FakeConnection {
        shared: Arc<Mutex<FakeShared>>,
        waiting: bool,
    }

    impl ModuleConnectionFactory for FakeFactory {
        fn create(
            &self,
            _addr: &str,
            _cfg: &ConnectionConfig,
        ) -> Result<Box<dyn ModuleConnection>, ConnectionError> {
            if self.fail_create {
                return Err(ConnectionError::TransportGone("test".into()));
            }
            Ok(Box::new(FakeConnection {
                shared: Arc::clone(&self.shared),
                waiting: false,
            }))
        }
    }

    #[async_trait]
    impl ModuleConnection for FakeConnection {
        async fn send(&mut self, req: &ModuleRequest) -> bool {
            let mut shared = self.shared.lock().unwrap();
            if shared.refuse_send {
                return false;
            }
            shared.sent.push(req.clone());
            self.waiting = true;
            true
        }

        async fn receive(&mut self, _max_wait: Duration) -> Option<ModuleResponse> {
            let resp = self.shared.lock().unwrap().responses.pop_front();
            if resp.is_some() {
                self.waiting = false;
            }
            resp
        }

        fn waiting_reply(&self) -> bool {
            self.waiting
        }
    }

    struct FixedIds(Mutex<VecDeque<String>>);

    impl InstanceIdGen for FixedIds {
        fn generate(&self) -> String {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| "uuid-fallback".to_string())
        }
    }

    struct Fixture {
        manager: ModuleManager,
        registry: ModuleRegistry,
        factory: FakeFactory,
        _log_dir: tempfile::TempDir,
    }

    fn fixture(instance_id: u16, uuids: &[&str]) -> Fixture {
        let log_dir = tempfile::tempdir().unwrap();
        let reaper = Arc::new(ProcessReaper::new());
        let registry = ModuleRegistry::new(Arc::clone(&reaper), instance_id);
        let factory = FakeFactory::default();
        let ids: VecDeque<String> = uuids.iter().map(|s| s.to_string()).collect();
        let manager = ModuleManager::new(
            registry.clone(),
            Arc::new(factory.clone()),
            Arc::new(LocalProcessService::new(reaper)),
            Arc::new(FixedIds(Mutex::new(ids))),
            ManagerOptions {
                module_host_path: PathBuf::new(),
                module_log_dir: log_dir.path().to_path_buf(),
                override_module_log: true,
            },
        )
        .unwrap();
        Fixture {
            manager,
            registry,
            factory,
            _log_dir: log_dir,
        }
    }

    fn auto_config(name: &str, bin: &str) -> ModuleConfig {
        ModuleConfig {
            name: name.to_string(),
            auto_launch: true,
            bin_path: bin.to_string(),
            ..Default::default()
        }
    }

    /// An auto-launched module whose process stays alive for the test.
    fn sleeper_config(name: &str) -> ModuleConfig {
        let mut cfg = auto_config(name, "/bin/sh");
        cfg.bin_args = vec!["-c".into(), "sleep 30".into()];
        cfg
    }

    fn coordinator_config(modules: Vec<ModuleConfig>) -> CoordinatorConfig {
        CoordinatorConfig {
            module_configs: modules,
            ..Default::default()
        }
    }

    fn ok_init_response() -> ModuleResponse {
        let mut resp = ModuleInitResponse::default();
        resp.topic_info.sub_topics.insert("location".into());
        resp.topic_info.pub_topics.insert("trajectory".into());
        ModuleResponse::Init(resp)
    }

    #[tokio::test]
    async fn full_init_workflow_succeeds_once() {
        let mut fx = fixture(80, &["u-1"]);
        fx.manager
            .update_configs(&coordinator_config(vec![sleeper_config("planning")]))
            .await;

        // Start -> launch -> Connecting.
        fx.manager.monitor_init_workflow().await;
        assert_eq!(
            fx.manager.init_state("planning"),
            Some(ModuleInitState::Connecting)
        );

        // nothing registered yet: stays Connecting.
        fx.manager.monitor_init_workflow().await;
        assert_eq!(
            fx.manager.init_state("planning"),
            Some(ModuleInitState::Connecting)
        );

        // the launched instance registers under its assigned uuid.
        let uuid = fx.registry.context("planning").unwrap().uuid;
        assert!(matches!(
            fx.registry.register_module("planning", &uuid, &uuid),
            crate::registry::RegisterOutcome::Succeed { .. }
        ));

        // Connecting -> Connected.
        fx.manager.monitor_init_workflow().await;
        assert_eq!(
            fx.manager.init_state("planning"),
            Some(ModuleInitState::Connected)
        );

        // Connected -> ReqSent, the init request went out.
        let report = fx.manager.monitor_init_workflow().await;
        assert_eq!(
            fx.manager.init_state("planning"),
            Some(ModuleInitState::ReqSent)
        );
        assert!(!report.events.is_empty());
        {
            let shared = fx.factory.shared.lock().unwrap();
            assert!(matches!(shared.sent[0], ModuleRequest::Init(_)));
        }

        // response arrives: ReqSent -> Succeed, event fired exactly once.
        fx.factory
            .shared
            .lock()
            .unwrap()
            .responses
            .push_back(ok_init_response());
        let report = fx.manager.monitor_init_workflow().await;
        assert_eq!(report.finished, 1);
        let terminal_events: Vec<_> = report
            .events
            .iter()
            .filter(|e| e.state == ModuleInitState::Succeed)
            .collect();
        assert_eq!(terminal_events.len(), 1);
        assert!(!terminal_events[0].topic_info.sub_topics.is_empty());

        // further polls count the module but fire no more events.
        let report = fx.manager.monitor_init_workflow().await;
        assert_eq!(report.finished, 1);
        assert!(report.events.is_empty());
    }

    #[tokio::test]
    async fn exited_process_drives_module_to_failed_exactly_once() {
        let mut fx = fixture(81, &["u-1"]);
        // /bin/true exits immediately after launch.
        fx.manager
            .update_configs(&coordinator_config(vec![auto_config(
                "planning",
                "/bin/true",
            )]))
            .await;

        fx.manager.monitor_init_workflow().await;
        assert_eq!(
            fx.manager.init_state("planning"),
            Some(ModuleInitState::Connecting)
        );

        // poll until the reaper observes the exit (purge is rate-limited).
        let mut failed_events = 0;
        let mut cmd_errors = 0;
        for _ in 0..120 {
            let report = fx.manager.monitor_init_workflow().await;
            failed_events += report
                .events
                .iter()
                .filter(|e| e.state == ModuleInitState::Failed)
                .count();
            cmd_errors += report.cmd_status.len();
            if report.finished == 1 && failed_events > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(fx.manager.init_state("planning"), Some(ModuleInitState::Failed));
        assert_eq!(failed_events, 1, "exactly one failure event");
        assert_eq!(cmd_errors, 1, "exactly one process-exit error");

        // repeated polls stay terminal without new events.
        let report = fx.manager.monitor_init_workflow().await;
        assert_eq!(report.finished, 1);
        assert!(report.events.is_empty());
    }

    #[tokio::test]
    async fn missing_artifact_fails_without_launching() {
        let mut fx = fixture(82, &["u-1"]);
        fx.manager
            .update_configs(&coordinator_config(vec![auto_config(
                "planning",
                "/nonexistent/planning-module",
            )]))
            .await;
        let report = fx.manager.monitor_init_workflow().await;
        assert_eq!(fx.manager.init_state("planning"), Some(ModuleInitState::Failed));
        assert_eq!(report.cmd_status.len(), 1);
        assert!(report.cmd_status[0].msg.contains("does not exist"));
    }

    #[tokio::test]
    async fn remote_module_skips_launching() {
        let mut fx = fixture(83, &[]);
        let cfg = ModuleConfig {
            name: "sensor-rig".into(),
            auto_launch: false,
            ..Default::default()
        };
        fx.manager
            .update_configs(&coordinator_config(vec![cfg]))
            .await;
        fx.manager.monitor_init_workflow().await;
        assert_eq!(
            fx.manager.init_state("sensor-rig"),
            Some(ModuleInitState::Connecting)
        );
        // once the remote registers, the workflow proceeds to Connected.
        fx.registry.register_module("sensor-rig", "r-1", "r-1");
        fx.manager.monitor_init_workflow().await;
        assert_eq!(
            fx.manager.init_state("sensor-rig"),
            Some(ModuleInitState::Connected)
        );
    }

    #[tokio::test]
    async fn reconfiguration_with_changed_init_args_replaces_the_slot() {
        let mut fx = fixture(84, &["u-1", "u-2"]);
        let mut cfg = sleeper_config("planning");
        fx.manager
            .update_configs(&coordinator_config(vec![cfg.clone()]))
            .await;
        fx.manager.monitor_init_workflow().await; // launches
        let first_uuid = fx.registry.context("planning").unwrap().uuid;
        assert_eq!(first_uuid, "u-1");

        cfg.init_args = BTreeMap::from([("mode".to_string(), "replay".to_string())]);
        fx.manager
            .update_configs(&coordinator_config(vec![cfg]))
            .await;
        let second_uuid = fx.registry.context("planning").unwrap().uuid;
        assert_eq!(second_uuid, "u-2", "a fresh uuid marks the replacement");
    }

    #[tokio::test]
    async fn unchanged_config_reuses_the_running_instance() {
        let mut fx = fixture(85, &["u-1", "u-never"]);
        let cfg = sleeper_config("planning");
        fx.manager
            .update_configs(&coordinator_config(vec![cfg.clone()]))
            .await;
        fx.manager.monitor_init_workflow().await; // launches

        fx.manager
            .update_configs(&coordinator_config(vec![cfg]))
            .await;
        assert_eq!(fx.registry.context("planning").unwrap().uuid, "u-1");
        assert_eq!(fx.manager.init_state("planning"), Some(ModuleInitState::Start));
    }

    #[tokio::test]
    async fn dropped_modules_are_terminated_and_unregistered() {
        let mut fx = fixture(86, &["u-1"]);
        fx.manager
            .update_configs(&coordinator_config(vec![sleeper_config("planning")]))
            .await;
        fx.manager.monitor_init_workflow().await;
        assert!(fx.registry.child_process_handle("planning").is_some());

        fx.manager
            .update_configs(&coordinator_config(vec![]))
            .await;
        assert_eq!(fx.manager.module_count(), 0);
        assert!(fx.registry.context("planning").is_none());
    }

    fn arb_config() -> impl Strategy<Value = ModuleConfig> {
        (
            prop::bool::ANY,
            prop::collection::btree_map("[a-c]{1,3}", "[a-c]{1,3}", 0..3),
            prop::sample::select(vec![0u32, 3000, 6000]),
            prop::sample::select(vec!["", "/opt/libm.so"]),
            prop::sample::select(vec!["/opt/m", "/opt/m2"]),
            prop::collection::vec("[a-b]{1,2}", 0..2),
        )
            .prop_map(|(auto_launch, init_args, step_timeout, so, bin, dep_paths)| {
                ModuleConfig {
                    name: "m".into(),
                    auto_launch,
                    shared_lib_path: so.to_string(),
                    bin_path: bin.to_string(),
                    dep_paths,
                    init_args,
                    conn_args: ConnectionConfig {
                        step_timeout_ms: step_timeout,
                        cmd_timeout_ms: 30_000,
                    },
                    ..Default::default()
                }
            })
    }

    proptest! {
        /// Differing init args, auto-launch mode or heartbeat-ness always
        /// veto reuse, whatever else the two configurations contain.
        #[test]
        fn reuse_is_vetoed_by_the_hard_criteria(
            old in arb_config(),
            new in arb_config(),
            state in prop::sample::select(vec![
                ModuleInitState::Start,
                ModuleInitState::Succeed,
                ModuleInitState::Failed,
            ]),
        ) {
            let reusable = config_reusable(&old, state, &new);
            if old.init_args != new.init_args {
                prop_assert!(!reusable);
            }
            if old.auto_launch != new.auto_launch {
                prop_assert!(!reusable);
            }
            let (a, b) = (old.conn_args.step_timeout_ms, new.conn_args.step_timeout_ms);
            if a != b && (a == 0 || b == 0) {
                prop_assert!(!reusable);
            }
            if state == ModuleInitState::Failed {
                prop_assert!(!reusable);
            }
            // determinism: the same inputs always give the same answer.
            prop_assert_eq!(reusable, config_reusable(&old, state, &new));
        }
    }
}
