//! Child-process supervision for auto-launched modules.
//!
//! The reaper polls child handles without ever blocking a caller; module
//! processes are spawned with their stdout/stderr redirected to a per-module
//! log file and terminated with SIGTERM followed by a hard kill.

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::ProcessError;

/// Opaque handle of a supervised child process (its OS pid).
pub type ProcessHandle = u32;

/// Everything needed to start one module process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    /// File receiving the child's stdout and stderr.
    pub log_path: PathBuf,
}

/// Non-blocking exit observer over all children the coordinator spawned.
///
/// Once a child is seen dead its exit description is cached so later queries
/// (and the registry's purge sweep) keep getting the same answer.
#[derive(Default)]
pub struct ProcessReaper {
    inner: Mutex<ReaperInner>,
}

#[derive(Default)]
struct ReaperInner {
    children: HashMap<ProcessHandle, Child>,
    exited: HashMap<ProcessHandle, String>,
}

impl ProcessReaper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch(&self, pid: ProcessHandle, child: Child) {
        let mut inner = self.inner.lock().unwrap();
        inner.exited.remove(&pid);
        inner.children.insert(pid, child);
        debug!(pid, "watching child process");
    }

    /// Returns the exit description of the child if it is no longer running.
    pub fn exit_description(&self, pid: ProcessHandle) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(desc) = inner.exited.get(&pid) {
            return Some(desc.clone());
        }
        let child = inner.children.get_mut(&pid)?;
        let desc = match child.try_wait() {
            Ok(None) => return None,
            Ok(Some(status)) => describe_exit(status),
            Err(e) => format!("wait failed: {e}"),
        };
        inner.children.remove(&pid);
        inner.exited.insert(pid, desc.clone());
        Some(desc)
    }

    /// Requests an immediate kill of the child; the exit itself is observed
    /// by the next `exit_description` poll.
    pub fn start_kill(&self, pid: ProcessHandle) -> Result<(), ProcessError> {
        let mut inner = self.inner.lock().unwrap();
        let child = inner
            .children
            .get_mut(&pid)
            .ok_or(ProcessError::NoSuchProcess(pid))?;
        child.start_kill().map_err(|e| ProcessError::Kill(e.to_string()))
    }

    pub fn forget(&self, pid: ProcessHandle) {
        let mut inner = self.inner.lock().unwrap();
        inner.children.remove(&pid);
        inner.exited.remove(&pid);
    }
}

#[cfg(unix)]
fn describe_exit(status: std::process::ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit code: {code}"),
        (None, Some(sig)) => format!("terminated by signal: {sig}"),
        (None, None) => "exited with unknown status".to_string(),
    }
}

#[cfg(not(unix))]
fn describe_exit(status: std::process::ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code: {code}"),
        None => "exited with unknown status".to_string(),
    }
}

/// Owns spawning and killing of module processes. Injected into the module
/// manager so tests can substitute a recording fake.
pub trait ModuleProcessService: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> Result<ProcessHandle, ProcessError>;
    fn terminate(&self, pid: ProcessHandle) -> Result<(), ProcessError>;
}

pub struct LocalProcessService {
    reaper: std::sync::Arc<ProcessReaper>,
}

impl LocalProcessService {
    pub fn new(reaper: std::sync::Arc<ProcessReaper>) -> Self {
        Self { reaper }
    }
}

impl ModuleProcessService for LocalProcessService {
    fn launch(&self, spec: &LaunchSpec) -> Result<ProcessHandle, ProcessError> {
        let log = File::create(&spec.log_path).map_err(|e| ProcessError::LogFile {
            path: spec.log_path.clone(),
            reason: e.to_string(),
        })?;
        let err_log = log.try_clone().map_err(|e| ProcessError::LogFile {
            path: spec.log_path.clone(),
            reason: e.to_string(),
        })?;

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(err_log))
            .kill_on_drop(false);
        for (key, value) in &spec.envs {
            cmd.env(key, value);
        }

        let child = cmd
            .spawn()
            .map_err(|e| ProcessError::Spawn(format!("{}: {e}", spec.program)))?;
        let pid = child
            .id()
            .ok_or_else(|| ProcessError::Spawn(format!("{}: pid unavailable", spec.program)))?;
        self.reaper.watch(pid, child);
        info!(program = %spec.program, pid, "module process launched");
        Ok(pid)
    }

    fn terminate(&self, pid: ProcessHandle) -> Result<(), ProcessError> {
        #[cfg(unix)]
        unsafe {
            if libc::kill(pid as i32, libc::SIGTERM) != 0 {
                warn!(pid, "SIGTERM delivery failed, process may be gone already");
            }
        }
        self.reaper.start_kill(pid)
    }
}
