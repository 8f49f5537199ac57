use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("cannot open module log file {path}: {reason}")]
    LogFile { path: PathBuf, reason: String },
    #[error("no process with handle {0} is watched")]
    NoSuchProcess(u32),
    #[error("kill failed: {0}")]
    Kill(String),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry endpoint bind failed on {addr}: {reason}")]
    Bind { addr: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("module transport for {0} is gone")]
    TransportGone(String),
}

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("invalid module host path: {0}")]
    InvalidModuleHostPath(PathBuf),
    #[error("module log directory {path} cannot be used: {reason}")]
    ModuleLogDir { path: PathBuf, reason: String },
}
