//! Drives player commands end to end: configuration apply, the init
//! monitoring loop, and the Reset/Step/Stop protocol against every module,
//! streaming `CommandStatus` updates to the requesting client.
//!
//! One command executes at a time; Pause/UnSetup act through atomic flags so
//! they take effect while another command holds the coordinator.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use podium_model::{
    CmdErrorCode, CommandStatus, CoordinatorConfig, ModuleCmdStatus, ModuleInitState,
    ModuleResponseType, StepMessage,
};
use podium_wire::{ModuleRequest, ModuleResetRequest, ModuleResponse, ModuleStepRequest,
    ModuleStopRequest};

use crate::manager::ModuleManager;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Topic carrying the currently highlighted group to interested modules.
const HIGHLIGHT_GROUP_TOPIC: &str = ".highlight_group";
const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(1000);
/// Upper bound on a single launch-and-init attempt outside a scenario setup.
const LAUNCH_MONITOR_LIMIT: Duration = Duration::from_secs(60);

pub type StatusTx = mpsc::Sender<CommandStatus>;

/// Flags shared with command dispatch so cancel-class commands act without
/// waiting for the executing command to finish.
#[derive(Clone, Default)]
pub struct CoordinatorControl {
    pause: Arc<AtomicBool>,
    unsetup: Arc<AtomicBool>,
    executing: Arc<AtomicBool>,
}

impl CoordinatorControl {
    pub fn request_pause(&self) {
        self.pause.store(true, Ordering::Release);
    }

    pub fn request_unsetup(&self) {
        self.unsetup.store(true, Ordering::Release);
    }

    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }

    fn paused(&self) -> bool {
        self.pause.load(Ordering::Acquire)
    }

    fn unsetup_requested(&self) -> bool {
        self.unsetup.load(Ordering::Acquire)
    }
}

/// Clears the executing flag when the command scope ends, however it ends.
struct ExecGuard(Arc<AtomicBool>);

impl Drop for ExecGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Coordinator {
    manager: ModuleManager,
    control: CoordinatorControl,
    config: CoordinatorConfig,
    scenario_set: bool,
    sim_time_ms: u64,
    scenario_started: Option<Instant>,
    highlight_group: String,
    /// Latest payload published per topic, routed to subscribers each step.
    messages: HashMap<String, Bytes>,
}

impl Coordinator {
    pub fn new(manager: ModuleManager) -> Self {
        Self {
            manager,
            control: CoordinatorControl::default(),
            config: CoordinatorConfig::default(),
            scenario_set: false,
            sim_time_ms: 0,
            scenario_started: None,
            highlight_group: String::new(),
            messages: HashMap::new(),
        }
    }

    pub fn control(&self) -> CoordinatorControl {
        self.control.clone()
    }

    pub fn scenario_set(&self) -> bool {
        self.scenario_set
    }

    fn begin(&self) -> Option<ExecGuard> {
        if self.control.executing.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(ExecGuard(Arc::clone(&self.control.executing)))
    }

    /// Applies the configuration, monitors every module's init workflow while
    /// streaming progress, then resets all modules into the scenario.
    pub async fn setup(
        &mut self,
        config: CoordinatorConfig,
        mut reset: ModuleResetRequest,
        tx: &StatusTx,
    ) -> CommandStatus {
        let Some(_guard) = self.begin() else {
            return CommandStatus::new(CmdErrorCode::Rejected);
        };
        self.control.pause.store(false, Ordering::Release);
        self.control.unsetup.store(false, Ordering::Release);
        self.scenario_set = false;
        self.sim_time_ms = 0;
        self.messages.clear();

        info!(scenario = %reset.scenario_path, modules = config.module_configs.len(),
              "scenario setup starting");
        self.config = config;
        self.manager.update_configs(&self.config).await;

        let total = self.manager.module_count();
        let mut any_failed = false;
        let mut last_emit = Instant::now();
        loop {
            if self.control.unsetup_requested() {
                info!("scenario setup cancelled");
                self.control.unsetup.store(false, Ordering::Release);
                return CommandStatus::new(CmdErrorCode::Cancelled);
            }
            let report = self.manager.monitor_init_workflow().await;
            any_failed |= !report.cmd_status.is_empty();
            if !report.events.is_empty() || !report.cmd_status.is_empty() {
                let mut status = CommandStatus::new(CmdErrorCode::Accepted);
                status.init_status = report.events;
                status.module_status = report.cmd_status;
                let _ = tx.send(status).await;
                last_emit = Instant::now();
            } else if last_emit.elapsed() >= KEEPALIVE_INTERVAL {
                let _ = tx.send(CommandStatus::new(CmdErrorCode::Accepted)).await;
                last_emit = Instant::now();
            }
            if report.finished >= total {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        if any_failed
            || self
                .manager
                .module_names()
                .iter()
                .any(|n| self.manager.init_state(n) == Some(ModuleInitState::Failed))
        {
            warn!("scenario setup failed: not every module initialized");
            return CommandStatus::new(CmdErrorCode::Failed);
        }

        // all modules initialized; reset them into the scenario.
        let mut status = CommandStatus::new(CmdErrorCode::Succeed);
        let mut pending = HashSet::new();
        for name in self.manager.module_names() {
            reset.group = self
                .manager
                .module_group(&name)
                .unwrap_or_default()
                .to_string();
            let req = ModuleRequest::Reset(reset.clone());
            let sent = match self.manager.connection_mut(&name) {
                Some(conn) => conn.send(&req).await,
                None => false,
            };
            if sent {
                pending.insert(name);
            } else {
                status.ec = CmdErrorCode::Failed;
                status.module_status.push(ModuleCmdStatus::error(
                    &name,
                    ModuleResponseType::Error,
                    "reset request could not be sent",
                ));
            }
        }
        self.collect_responses(pending, &mut status, Some(tx)).await;
        if status.ec == CmdErrorCode::Succeed {
            self.scenario_set = true;
            self.scenario_started = Some(Instant::now());
            info!("scenario setup finished");
        }
        status
    }

    /// Sends Stop to every module and clears the scenario state. Used for
    /// both UnSetup and Stop commands.
    pub async fn unsetup(&mut self) -> CommandStatus {
        let Some(_guard) = self.begin() else {
            // the executing command observes the flag and winds down; the
            // caller retries after it released the coordinator.
            return CommandStatus::new(CmdErrorCode::Rejected);
        };
        let result = if self.scenario_set {
            self.stop_modules().await
        } else {
            CommandStatus::new(CmdErrorCode::Ignored)
        };
        self.scenario_set = false;
        self.sim_time_ms = 0;
        self.scenario_started = None;
        self.messages.clear();
        self.control.unsetup.store(false, Ordering::Release);
        self.control.pause.store(false, Ordering::Release);
        result
    }

    /// Advances the scenario by exactly one lock step; the terminal status
    /// carries the step payload.
    pub async fn step(&mut self) -> CommandStatus {
        let Some(_guard) = self.begin() else {
            return CommandStatus::new(CmdErrorCode::Rejected);
        };
        if !self.scenario_set {
            return CommandStatus::new(CmdErrorCode::Rejected);
        }
        let (mut status, _stop) = self.step_once().await;
        if status.ec == CmdErrorCode::Accepted {
            status.ec = CmdErrorCode::Succeed;
        }
        status
    }

    /// Steps continuously at the configured control rate until paused,
    /// un-set-up, finished, or timed out.
    pub async fn run(&mut self, tx: &StatusTx) -> CommandStatus {
        let Some(_guard) = self.begin() else {
            return CommandStatus::new(CmdErrorCode::Rejected);
        };
        if !self.scenario_set {
            return CommandStatus::new(CmdErrorCode::Rejected);
        }
        self.control.pause.store(false, Ordering::Release);

        let rate = self.config.sys.control_rate.max(1);
        let step_interval = Duration::from_millis(1000 / u64::from(rate.min(1000)));
        let time_limit = self.config.sys.scenario_time_limit_ms;
        info!(rate, "scenario running");

        loop {
            if self.control.unsetup_requested() {
                info!("run interrupted: un-setup requested");
                return CommandStatus::new(CmdErrorCode::Succeed);
            }
            if self.control.paused() {
                info!("run paused");
                return CommandStatus::new(CmdErrorCode::Succeed);
            }
            if time_limit > 0
                && let Some(started) = self.scenario_started
                && started.elapsed() >= Duration::from_millis(time_limit)
            {
                warn!("scenario time limit exceeded");
                let mut status = self.stop_modules().await;
                status.ec = CmdErrorCode::ScenarioTimeout;
                self.scenario_set = false;
                return status;
            }

            let round_start = Instant::now();
            let (status, stop_requested) = self.step_once().await;
            match status.ec {
                CmdErrorCode::Accepted => {
                    let _ = tx.send(status).await;
                }
                other => {
                    warn!(ec = %other, "run aborted by step failure");
                    return status;
                }
            }
            if stop_requested {
                info!("scenario finished: a module requested stop");
                let mut status = self.stop_modules().await;
                status.ec = CmdErrorCode::ScenarioStopped;
                self.scenario_set = false;
                return status;
            }

            let elapsed = round_start.elapsed();
            if elapsed < step_interval {
                tokio::time::sleep(step_interval - elapsed).await;
            }
        }
    }

    /// Changes the highlighted group; modules subscribed to the highlight
    /// topic pick it up on their next step.
    pub fn highlight(&mut self, group: String) -> CommandStatus {
        if !self.scenario_set {
            return CommandStatus::new(CmdErrorCode::Rejected);
        }
        debug!(%group, "highlight group changed");
        self.messages
            .insert(HIGHLIGHT_GROUP_TOPIC.to_string(), Bytes::from(group.clone()));
        self.highlight_group = group;
        CommandStatus::new(CmdErrorCode::Succeed)
    }

    pub fn highlight_group(&self) -> &str {
        &self.highlight_group
    }

    /// Launches (or relaunches) one configured module outside a scenario
    /// setup, driving its init workflow until it settles. A module that is
    /// already initialized is left alone; a failed one gets a fresh attempt.
    pub async fn launch_module(&mut self, name: &str) -> CmdErrorCode {
        match self.manager.init_state(name) {
            None => return CmdErrorCode::InvalidModuleConfig,
            Some(ModuleInitState::Succeed) => return CmdErrorCode::Succeed,
            Some(ModuleInitState::Failed) => {
                self.manager.restart_init(name);
            }
            Some(_) => {}
        }
        let deadline = Instant::now() + LAUNCH_MONITOR_LIMIT;
        loop {
            let state = self.manager.init_state(name).expect("checked above");
            match state {
                ModuleInitState::Succeed => return CmdErrorCode::Succeed,
                ModuleInitState::Failed => return CmdErrorCode::Failed,
                _ => {}
            }
            if Instant::now() >= deadline {
                return CmdErrorCode::ScenarioTimeout;
            }
            self.manager.monitor_init_workflow().await;
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub fn terminate_module(&mut self, name: &str) -> CmdErrorCode {
        if self.manager.init_state(name).is_none() {
            return CmdErrorCode::InvalidModuleConfig;
        }
        self.manager.terminate(name);
        CmdErrorCode::Succeed
    }

    /// One lock-step round: feed every initialized module the messages it
    /// subscribes to, gather all responses, publish theirs for the next
    /// round. Returns the round status and whether any module asked to stop
    /// the scenario.
    async fn step_once(&mut self) -> (CommandStatus, bool) {
        let step_ms = 1000 / u64::from(self.config.sys.control_rate.max(1).min(1000));
        self.sim_time_ms += step_ms;
        let wall_time = self
            .scenario_started
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let mut status = CommandStatus::new(CmdErrorCode::Accepted);
        let mut pending = HashSet::new();
        for name in self.manager.module_names() {
            if self.manager.init_state(&name) != Some(ModuleInitState::Succeed) {
                continue;
            }
            let inputs: BTreeMap<String, Bytes> = self
                .manager
                .topic_info(&name)
                .map(|info| {
                    info.sub_topics
                        .iter()
                        .filter_map(|t| self.messages.get(t).map(|m| (t.clone(), m.clone())))
                        .collect()
                })
                .unwrap_or_default();
            let req = ModuleRequest::Step(ModuleStepRequest {
                sim_time_ms: self.sim_time_ms,
                wall_time,
                messages: inputs,
                group: self
                    .manager
                    .module_group(&name)
                    .unwrap_or_default()
                    .to_string(),
                ..Default::default()
            });
            let sent = match self.manager.connection_mut(&name) {
                Some(conn) => conn.send(&req).await,
                None => false,
            };
            if sent {
                pending.insert(name);
            } else {
                status.ec = CmdErrorCode::Failed;
                status.module_status.push(ModuleCmdStatus::error(
                    &name,
                    ModuleResponseType::Error,
                    "step request could not be sent",
                ));
            }
        }

        let responses = self.gather_responses(pending, None).await;
        let mut step_message = StepMessage {
            timestamp_ms: self.sim_time_ms,
            ..Default::default()
        };
        let mut stop_requested = false;
        for (name, resp) in responses {
            let ec = resp.ec();
            let mut entry = ModuleCmdStatus::error(&name, ec, resp.err());
            if let ModuleResponse::Step(step) = resp {
                entry.elapsed_ms = step.elapsed_ms as u32;
                entry.cpu_time_user_ms = step.cpu_time_user_ms as u32;
                entry.cpu_time_sys_ms = step.cpu_time_sys_ms as u32;
                status.total_time_cost_ms = status.total_time_cost_ms.max(entry.elapsed_ms);
                status.total_cpu_time_user_ms += entry.cpu_time_user_ms;
                status.total_cpu_time_sys_ms += entry.cpu_time_sys_ms;
                for (topic, payload) in step.messages {
                    step_message
                        .messages
                        .push((topic.clone(), payload.to_vec()));
                    self.messages.insert(topic, payload);
                }
            }
            match ec {
                ModuleResponseType::Ok => {}
                ModuleResponseType::RequireStop => stop_requested = true,
                ModuleResponseType::Timeout => status.ec = CmdErrorCode::ScenarioTimeout,
                _ => status.ec = CmdErrorCode::Failed,
            }
            status.module_status.push(entry);
        }
        status.step_message = Some(step_message);
        (status, stop_requested)
    }

    async fn stop_modules(&mut self) -> CommandStatus {
        let mut status = CommandStatus::new(CmdErrorCode::Succeed);
        let mut pending = HashSet::new();
        for name in self.manager.module_names() {
            if self.manager.init_state(&name) != Some(ModuleInitState::Succeed) {
                continue;
            }
            let req = ModuleRequest::Stop(ModuleStopRequest::default());
            let sent = match self.manager.connection_mut(&name) {
                Some(conn) => conn.send(&req).await,
                None => false,
            };
            if sent {
                pending.insert(name);
            }
        }
        let responses = self.gather_responses(pending, None).await;
        for (name, resp) in responses {
            let mut entry = ModuleCmdStatus::error(&name, resp.ec(), resp.err());
            if let ModuleResponse::Stop(stop) = resp {
                entry.feedback = join_feedback(&stop.feedbacks);
            }
            status.module_status.push(entry);
        }
        info!("scenario stopped");
        status
    }

    /// Polls every pending connection until it yields a response; bounded by
    /// each connection's own deadline, which fabricates a timeout response.
    /// When a status channel is given, keep-alives flow while waiting so the
    /// client never sees a silent gap.
    async fn gather_responses(
        &mut self,
        mut pending: HashSet<String>,
        keepalive: Option<&StatusTx>,
    ) -> Vec<(String, ModuleResponse)> {
        let mut responses = Vec::new();
        let mut last_keepalive = Instant::now();
        while !pending.is_empty() {
            if let Some(tx) = keepalive
                && last_keepalive.elapsed() >= KEEPALIVE_INTERVAL
            {
                let _ = tx.send(CommandStatus::new(CmdErrorCode::Accepted)).await;
                last_keepalive = Instant::now();
            }
            let names: Vec<String> = pending.iter().cloned().collect();
            for name in names {
                let Some(conn) = self.manager.connection_mut(&name) else {
                    pending.remove(&name);
                    continue;
                };
                match conn.receive(POLL_INTERVAL).await {
                    Some(resp) => {
                        pending.remove(&name);
                        responses.push((name, resp));
                    }
                    // a connection with nothing outstanding will never
                    // produce a reply; do not spin on it.
                    None if !conn.waiting_reply() => {
                        pending.remove(&name);
                    }
                    None => {}
                }
            }
        }
        responses
    }

    async fn collect_responses(
        &mut self,
        pending: HashSet<String>,
        status: &mut CommandStatus,
        keepalive: Option<&StatusTx>,
    ) {
        for (name, resp) in self.gather_responses(pending, keepalive).await {
            let ec = resp.ec();
            if !ec.succeeded() {
                warn!(module = %name, %ec, err = %resp.err(), "module command failed");
                status.ec = CmdErrorCode::Failed;
            }
            status
                .module_status
                .push(ModuleCmdStatus::error(&name, ec, resp.err()));
        }
    }
}

/// Flattens module stop feedback into one human-readable blob.
fn join_feedback(feedbacks: &BTreeMap<String, String>) -> String {
    feedbacks
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ModuleConnection, ModuleConnectionFactory};
    use crate::error::ConnectionError;
    use crate::manager::{InstanceIdGen, ManagerOptions};
    use crate::process::{LocalProcessService, ProcessReaper};
    use crate::registry::ModuleRegistry;
    use async_trait::async_trait;
    use podium_model::{ConnectionConfig, ModuleConfig};
    use podium_wire::{ModuleInitResponse, ModuleResetResponse, ModuleStepResponse};
    use std::sync::Mutex;

    /// Connection that answers every request immediately like a well-behaved
    /// module, optionally requesting a stop after N steps.
    struct AnsweringShared {
        steps_until_stop: Option<u32>,
        steps_served: u32,
    }

    #[derive(Clone)]
    struct AnsweringFactory {
        shared: Arc<Mutex<AnsweringShared>>,
    }

    struct AnsweringConnection {
        shared: Arc<Mutex<AnsweringShared>>,
        pending: Option<ModuleResponse>,
    }

    impl ModuleConnectionFactory for AnsweringFactory {
        fn create(
            &self,
            _addr: &str,
            _cfg: &ConnectionConfig,
        ) -> Result<Box<dyn ModuleConnection>, ConnectionError> {
            Ok(Box::new(AnsweringConnection {
                shared: Arc::clone(&self.shared),
                pending: None,
            }))
        }
    }

    #[async_trait]
    impl ModuleConnection for AnsweringConnection {
        async fn send(&mut self, req: &ModuleRequest) -> bool {
            let resp = match req {
                ModuleRequest::Init(_) => ModuleResponse::Init(ModuleInitResponse::default()),
                ModuleRequest::Reset(_) => ModuleResponse::Reset(ModuleResetResponse::default()),
                ModuleRequest::Step(_) => {
                    let mut shared = self.shared.lock().unwrap();
                    shared.steps_served += 1;
                    let mut step = ModuleStepResponse {
                        elapsed_ms: 2,
                        ..Default::default()
                    };
                    step.messages
                        .insert("trajectory".into(), Bytes::from_static(b"tj"));
                    if let Some(n) = shared.steps_until_stop
                        && shared.steps_served >= n
                    {
                        step.ec = ModuleResponseType::RequireStop;
                    }
                    ModuleResponse::Step(step)
                }
                ModuleRequest::Stop(_) => ModuleResponse::Stop(Default::default()),
            };
            self.pending = Some(resp);
            true
        }

        async fn receive(&mut self, _max_wait: Duration) -> Option<ModuleResponse> {
            self.pending.take()
        }

        fn waiting_reply(&self) -> bool {
            self.pending.is_some()
        }
    }

    struct SeqIds;

    impl InstanceIdGen for SeqIds {
        fn generate(&self) -> String {
            "u-fixed".to_string()
        }
    }

    fn build(steps_until_stop: Option<u32>, instance_id: u16) -> (Coordinator, ModuleRegistry) {
        let reaper = Arc::new(ProcessReaper::new());
        let registry = ModuleRegistry::new(Arc::clone(&reaper), instance_id);
        let factory = AnsweringFactory {
            shared: Arc::new(Mutex::new(AnsweringShared {
                steps_until_stop,
                steps_served: 0,
            })),
        };
        let manager = crate::manager::ModuleManager::new(
            registry.clone(),
            Arc::new(factory),
            Arc::new(LocalProcessService::new(reaper)),
            Arc::new(SeqIds),
            ManagerOptions::default(),
        )
        .unwrap();
        (Coordinator::new(manager), registry)
    }

    fn remote_config(name: &str) -> CoordinatorConfig {
        CoordinatorConfig {
            module_configs: vec![ModuleConfig {
                name: name.to_string(),
                auto_launch: false,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    async fn drain(rx: &mut mpsc::Receiver<CommandStatus>) -> Vec<CommandStatus> {
        let mut out = Vec::new();
        while let Ok(st) = rx.try_recv() {
            out.push(st);
        }
        out
    }

    #[tokio::test]
    async fn setup_with_no_modules_succeeds() {
        let (mut coordinator, _registry) = build(None, 70);
        let (tx, _rx) = mpsc::channel(64);
        let status = coordinator
            .setup(
                CoordinatorConfig::default(),
                ModuleResetRequest::default(),
                &tx,
            )
            .await;
        assert_eq!(status.ec, CmdErrorCode::Succeed);
        assert!(coordinator.scenario_set());
    }

    #[tokio::test]
    async fn setup_then_step_streams_module_payloads() {
        let (mut coordinator, registry) = build(None, 71);
        let (tx, mut rx) = mpsc::channel(64);

        // the remote module registers while setup is polling.
        let reg = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            reg.register_module("sensor-rig", "r-1", "r-1");
        });

        let status = coordinator
            .setup(remote_config("sensor-rig"), ModuleResetRequest::default(), &tx)
            .await;
        assert_eq!(status.ec, CmdErrorCode::Succeed);

        let status = coordinator.step().await;
        assert_eq!(status.ec, CmdErrorCode::Succeed);
        let step = status.step_message.expect("terminal step status carries the payload");
        assert!(step.messages.iter().any(|(t, _)| t == "trajectory"));
        assert!(!status.module_status.is_empty());
        drain(&mut rx).await;
    }

    #[tokio::test]
    async fn step_without_scenario_is_rejected() {
        let (mut coordinator, _registry) = build(None, 72);
        let (tx, _rx) = mpsc::channel::<CommandStatus>(8);
        let status = coordinator.step().await;
        assert_eq!(status.ec, CmdErrorCode::Rejected);
    }

    #[tokio::test]
    async fn run_stops_when_a_module_requires_it() {
        let (mut coordinator, registry) = build(Some(3), 73);
        let (tx, mut rx) = mpsc::channel(256);

        let reg = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            reg.register_module("sensor-rig", "r-1", "r-1");
        });
        let status = coordinator
            .setup(remote_config("sensor-rig"), ModuleResetRequest::default(), &tx)
            .await;
        assert_eq!(status.ec, CmdErrorCode::Succeed);

        let status = coordinator.run(&tx).await;
        assert_eq!(status.ec, CmdErrorCode::ScenarioStopped);
        assert!(!coordinator.scenario_set());
        // intermediate step statuses were streamed before the stop.
        assert!(drain(&mut rx).await.iter().any(|st| st.step_message.is_some()));
    }

    #[tokio::test]
    async fn pause_flag_interrupts_run() {
        let (mut coordinator, registry) = build(None, 74);
        let (tx, _rx) = mpsc::channel(256);

        let reg = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            reg.register_module("sensor-rig", "r-1", "r-1");
        });
        let status = coordinator
            .setup(remote_config("sensor-rig"), ModuleResetRequest::default(), &tx)
            .await;
        assert_eq!(status.ec, CmdErrorCode::Succeed);

        let control = coordinator.control();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            control.request_pause();
        });
        let status = coordinator.run(&tx).await;
        assert_eq!(status.ec, CmdErrorCode::Succeed);
        // paused, not stopped: the scenario survives for a later resume.
        assert!(coordinator.scenario_set());
    }

    #[tokio::test]
    async fn unsetup_clears_the_scenario() {
        let (mut coordinator, registry) = build(None, 75);
        let (tx, _rx) = mpsc::channel(64);
        let reg = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            reg.register_module("sensor-rig", "r-1", "r-1");
        });
        let status = coordinator
            .setup(remote_config("sensor-rig"), ModuleResetRequest::default(), &tx)
            .await;
        assert_eq!(status.ec, CmdErrorCode::Succeed);

        let status = coordinator.unsetup().await;
        assert_eq!(status.ec, CmdErrorCode::Succeed);
        assert!(!coordinator.scenario_set());

        // a second un-setup has nothing to do.
        let status = coordinator.unsetup().await;
        assert_eq!(status.ec, CmdErrorCode::Ignored);
    }
}
