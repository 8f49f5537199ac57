//! Backing store for the manager command family: module configurations,
//! schemes, system settings and grading-KPI documents.
//!
//! All mutations run under one async mutex, so configuration changes never
//! interleave, and are persisted to a JSON file when one is configured.
//! Payloads travel as JSON string parts on the command frame.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use podium_model::{CmdErrorCode, Command, CoordinatorConfig, ModuleConfig, ModuleScheme, SysConfig};
use podium_wire::Frame;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ConfigState {
    modules: BTreeMap<String, ModuleConfig>,
    schemes: BTreeMap<String, ModuleScheme>,
    active_scheme: String,
    sys: SysConfig,
    kpi_groups: BTreeMap<String, serde_json::Value>,
    default_kpi_group: String,
}

pub struct ConfigService {
    state: Mutex<ConfigState>,
    store_path: Option<PathBuf>,
}

impl ConfigService {
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(ConfigState::default()),
            store_path: None,
        }
    }

    /// Loads the persisted store, starting empty when the file does not
    /// exist yet. A file that exists but cannot be parsed is a broken
    /// deployment and fails construction.
    pub fn load(store_path: PathBuf) -> Result<Self, std::io::Error> {
        let state = match std::fs::read_to_string(&store_path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConfigState::default(),
            Err(e) => return Err(e),
        };
        info!(store = %store_path.display(), "configuration store loaded");
        Ok(Self {
            state: Mutex::new(state),
            store_path: Some(store_path),
        })
    }

    /// The configuration a scenario setup applies: the active scheme's
    /// modules (all modules when no scheme is active) plus system settings.
    pub async fn active_config(&self) -> CoordinatorConfig {
        let state = self.state.lock().await;
        let module_configs = match state.schemes.get(&state.active_scheme) {
            Some(scheme) => scheme
                .modules
                .iter()
                .filter_map(|name| state.modules.get(name).cloned())
                .collect(),
            None => state.modules.values().cloned().collect(),
        };
        CoordinatorConfig {
            module_configs,
            sys: state.sys,
            override_module_log: false,
        }
    }

    /// Serves one manager command, returning the complete reply frame.
    /// Commands owned by other collaborators come back `Ignored`, never
    /// silence.
    pub async fn handle(&self, cmd: Command, mut payload: Frame) -> Frame {
        let mut state = self.state.lock().await;
        let mut reply = Frame::new();
        let ec = match self.apply(cmd, &mut payload, &mut state, &mut reply) {
            Ok(ec) => ec,
            Err(ec) => ec,
        };
        if ec == CmdErrorCode::Succeed {
            self.persist(&state);
        }
        reply.push_front_type(ec.code() as i64);
        reply
    }

    fn apply(
        &self,
        cmd: Command,
        payload: &mut Frame,
        state: &mut ConfigState,
        reply: &mut Frame,
    ) -> Result<CmdErrorCode, CmdErrorCode> {
        use CmdErrorCode::*;
        let ec = match cmd {
            Command::AddModuleConfig => {
                let config = pop_module_config(payload)?;
                if state.modules.contains_key(&config.name) {
                    Failed
                } else {
                    info!(module = %config.name, "module configuration added");
                    state.modules.insert(config.name.clone(), config);
                    Succeed
                }
            }
            Command::UpdateModuleConfig => {
                let config = pop_module_config(payload)?;
                if state.modules.contains_key(&config.name) {
                    state.modules.insert(config.name.clone(), config);
                    Succeed
                } else {
                    Failed
                }
            }
            Command::RemoveModuleConfig => {
                let name = pop_str(payload)?;
                match state.modules.remove(&name) {
                    Some(_) => {
                        info!(module = %name, "module configuration removed");
                        Succeed
                    }
                    None => Ignored,
                }
            }
            Command::GetModuleConfig => {
                let name = pop_str(payload)?;
                match state.modules.get(&name) {
                    Some(config) => {
                        reply.push_str(&to_json(config)?);
                        Succeed
                    }
                    None => Failed,
                }
            }
            Command::GetAllModuleConfigs => {
                reply.push_size(state.modules.len());
                for config in state.modules.values() {
                    reply.push_str(&to_json(config)?);
                }
                Succeed
            }
            Command::AddModuleScheme => {
                let scheme = pop_scheme(payload)?;
                if state.schemes.contains_key(&scheme.name) {
                    SchemeAlreadyExist
                } else {
                    state.schemes.insert(scheme.name.clone(), scheme);
                    Succeed
                }
            }
            Command::UpdateModuleScheme => {
                let scheme = pop_scheme(payload)?;
                if state.schemes.contains_key(&scheme.name) {
                    state.schemes.insert(scheme.name.clone(), scheme);
                    Succeed
                } else {
                    Failed
                }
            }
            Command::RemoveModuleScheme => {
                let name = pop_str(payload)?;
                if state.active_scheme == name {
                    state.active_scheme.clear();
                }
                match state.schemes.remove(&name) {
                    Some(_) => Succeed,
                    None => Ignored,
                }
            }
            Command::GetAllModuleSchemes => {
                reply.push_str(&state.active_scheme);
                reply.push_size(state.schemes.len());
                for scheme in state.schemes.values() {
                    reply.push_str(&to_json(scheme)?);
                }
                Succeed
            }
            Command::SetActiveModuleScheme => {
                let name = pop_str(payload)?;
                if state.schemes.contains_key(&name) {
                    info!(scheme = %name, "active module scheme changed");
                    state.active_scheme = name;
                    Succeed
                } else {
                    Failed
                }
            }
            Command::ExportModuleScheme => {
                let name = pop_str(payload)?;
                let path = pop_str(payload)?;
                let Some(scheme) = state.schemes.get(&name) else {
                    return Err(Failed);
                };
                match std::fs::write(&path, to_json(scheme)?) {
                    Ok(()) => Succeed,
                    Err(e) => {
                        warn!(scheme = %name, %path, "scheme export failed: {e}");
                        SystemError
                    }
                }
            }
            Command::ImportModuleScheme => {
                let path = pop_str(payload)?;
                let text = std::fs::read_to_string(&path).map_err(|_| Failed)?;
                let scheme: ModuleScheme = serde_json::from_str(&text).map_err(|_| Failed)?;
                if state.schemes.contains_key(&scheme.name) {
                    SchemeAlreadyExist
                } else {
                    state.schemes.insert(scheme.name.clone(), scheme);
                    Succeed
                }
            }
            Command::SetSysConfigs => {
                let sys: SysConfig =
                    serde_json::from_str(&pop_str(payload)?).map_err(|_| InvalidModuleConfig)?;
                state.sys = sys;
                Succeed
            }
            Command::GetSysConfigs => {
                reply.push_str(&to_json(&state.sys)?);
                Succeed
            }
            Command::RestoreDefaultConfigs => {
                info!("restoring default configuration");
                *state = ConfigState::default();
                Succeed
            }
            Command::AddGradingKpiGroup => {
                let name = pop_str(payload)?;
                let doc = pop_json(payload)?;
                if state.kpi_groups.contains_key(&name) {
                    Failed
                } else {
                    state.kpi_groups.insert(name, doc);
                    Succeed
                }
            }
            Command::UpdateGradingKpiGroup => {
                let name = pop_str(payload)?;
                let doc = pop_json(payload)?;
                if state.kpi_groups.contains_key(&name) {
                    state.kpi_groups.insert(name, doc);
                    Succeed
                } else {
                    Failed
                }
            }
            Command::RemoveGradingKpiGroup => {
                let name = pop_str(payload)?;
                if state.default_kpi_group == name {
                    state.default_kpi_group.clear();
                }
                match state.kpi_groups.remove(&name) {
                    Some(_) => Succeed,
                    None => Ignored,
                }
            }
            Command::GetAllGradingKpiGroups => {
                reply.push_str(&state.default_kpi_group);
                reply.push_size(state.kpi_groups.len());
                for (name, doc) in &state.kpi_groups {
                    reply.push_str(name);
                    reply.push_str(&doc.to_string());
                }
                Succeed
            }
            Command::GetGradingKpisInGroup => {
                let name = pop_str(payload)?;
                match state.kpi_groups.get(&name) {
                    Some(doc) => {
                        reply.push_str(&doc.to_string());
                        Succeed
                    }
                    None => Failed,
                }
            }
            Command::SetDefaultGradingKpiGroup => {
                let name = pop_str(payload)?;
                if state.kpi_groups.contains_key(&name) {
                    state.default_kpi_group = name;
                    Succeed
                } else {
                    Failed
                }
            }
            Command::AddGradingKpi => {
                let group = pop_str(payload)?;
                let kpi = pop_json(payload)?;
                let name = kpi_name(&kpi)?;
                let kpis = group_kpis(state, &group)?;
                if kpis.iter().any(|k| kpi_name(k).ok().as_deref() == Some(name.as_str())) {
                    Failed
                } else {
                    kpis.push(kpi);
                    Succeed
                }
            }
            Command::UpdateGradingKpi => {
                let group = pop_str(payload)?;
                let kpi = pop_json(payload)?;
                let name = kpi_name(&kpi)?;
                let kpis = group_kpis(state, &group)?;
                match kpis.iter_mut().find(|k| kpi_name(k).ok().as_deref() == Some(name.as_str())) {
                    Some(slot) => {
                        *slot = kpi;
                        Succeed
                    }
                    None => Failed,
                }
            }
            Command::RemoveGradingKpi => {
                let group = pop_str(payload)?;
                let name = pop_str(payload)?;
                let kpis = group_kpis(state, &group)?;
                let before = kpis.len();
                kpis.retain(|k| kpi_name(k).ok().as_deref() != Some(name.as_str()));
                if kpis.len() < before { Succeed } else { Ignored }
            }
            Command::SetGradingKpiLabels => {
                let group = pop_str(payload)?;
                let name = pop_str(payload)?;
                let labels = pop_json(payload)?;
                let kpis = group_kpis(state, &group)?;
                match kpis.iter_mut().find(|k| kpi_name(k).ok().as_deref() == Some(name.as_str())) {
                    Some(serde_json::Value::Object(kpi)) => {
                        kpi.insert("labels".to_string(), labels);
                        Succeed
                    }
                    _ => Failed,
                }
            }
            // owned by external collaborators (scenario playlist, protobuf
            // catalogs, per-KPI editing): acknowledged but not served here.
            other => {
                warn!(cmd = %other, "manager command not served by this coordinator");
                Ignored
            }
        };
        Ok(ec)
    }

    fn persist(&self, state: &ConfigState) {
        let Some(path) = &self.store_path else { return };
        match serde_json::to_string_pretty(state) {
            Ok(text) => {
                if let Err(e) = std::fs::write(path, text) {
                    warn!(store = %path.display(), "configuration store write failed: {e}");
                }
            }
            Err(e) => warn!("configuration store serialization failed: {e}"),
        }
    }
}

fn pop_str(payload: &mut Frame) -> Result<String, CmdErrorCode> {
    payload.pop_str().map_err(|_| CmdErrorCode::SystemError)
}

/// Every KPI document must carry a string `name` used as its identity.
fn kpi_name(kpi: &serde_json::Value) -> Result<String, CmdErrorCode> {
    kpi.get("name")
        .and_then(|n| n.as_str())
        .map(str::to_string)
        .ok_or(CmdErrorCode::SystemError)
}

/// The `kpis` array of a group document, created on first use.
fn group_kpis<'a>(
    state: &'a mut ConfigState,
    group: &str,
) -> Result<&'a mut Vec<serde_json::Value>, CmdErrorCode> {
    let doc = state
        .kpi_groups
        .get_mut(group)
        .ok_or(CmdErrorCode::Failed)?;
    let serde_json::Value::Object(doc) = doc else {
        return Err(CmdErrorCode::SystemError);
    };
    doc.entry("kpis".to_string())
        .or_insert_with(|| serde_json::Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or(CmdErrorCode::SystemError)
}

fn pop_json(payload: &mut Frame) -> Result<serde_json::Value, CmdErrorCode> {
    serde_json::from_str(&pop_str(payload)?).map_err(|_| CmdErrorCode::SystemError)
}

fn pop_module_config(payload: &mut Frame) -> Result<ModuleConfig, CmdErrorCode> {
    let config: ModuleConfig =
        serde_json::from_str(&pop_str(payload)?).map_err(|_| CmdErrorCode::InvalidModuleConfig)?;
    if config.name.is_empty() {
        return Err(CmdErrorCode::InvalidModuleConfig);
    }
    Ok(config)
}

fn pop_scheme(payload: &mut Frame) -> Result<ModuleScheme, CmdErrorCode> {
    let scheme: ModuleScheme =
        serde_json::from_str(&pop_str(payload)?).map_err(|_| CmdErrorCode::InvalidModuleConfig)?;
    if scheme.name.is_empty() {
        return Err(CmdErrorCode::InvalidModuleConfig);
    }
    Ok(scheme)
}

fn to_json<T: Serialize>(value: &T) -> Result<String, CmdErrorCode> {
    serde_json::to_string(value).map_err(|_| CmdErrorCode::SystemError)
}
