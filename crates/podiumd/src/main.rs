mod config;
mod service;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use podium_broker::{BrokerOptions, CommandBroker, ConfigService};
use podium_core::{
    Coordinator, LocalProcessService, ManagerOptions, ModuleManager, ModuleRegistry,
    ProcessReaper, RegistryService, RouterConnectionFactory, UuidGen,
};
use podium_model::constants::registry_bind_addr;
use podium_observe::{LoggerConfig, logger_init};

use crate::config::ServiceConfig;
use crate::service::ServiceHandler;

fn config_path_from_args() -> PathBuf {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return PathBuf::from(path);
            }
        }
    }
    PathBuf::from("podiumd.json")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = ServiceConfig::load(&config_path_from_args())?;
    logger_init(
        &LoggerConfig::default()
            .with_filter(cfg.log_filter.clone())
            .with_format(cfg.log_format.parse()?),
    )?;

    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    info!(%host, instance = cfg.instance_id,
          registry = %registry_bind_addr(cfg.instance_id),
          endpoint = %cfg.command_endpoint.display(),
          "coordinator starting");

    let cancel = CancellationToken::new();

    let reaper = Arc::new(ProcessReaper::new());
    let registry = ModuleRegistry::new(Arc::clone(&reaper), cfg.instance_id);
    let (router, registry_task) = RegistryService::bind(registry.clone(), cancel.clone())
        .await
        .context("module registry startup failed")?;

    let manager = ModuleManager::new(
        registry,
        Arc::new(RouterConnectionFactory::new(router)),
        Arc::new(LocalProcessService::new(reaper)),
        Arc::new(UuidGen),
        ManagerOptions {
            module_host_path: cfg.module_host_path.clone(),
            module_log_dir: cfg.module_log_directory.clone(),
            override_module_log: cfg.override_module_log,
        },
    )
    .context("module manager startup failed")?;

    let coordinator = Coordinator::new(manager);
    let control = coordinator.control();
    let configs = if cfg.config_store_path.as_os_str().is_empty() {
        Arc::new(ConfigService::in_memory())
    } else {
        Arc::new(ConfigService::load(cfg.config_store_path.clone())?)
    };

    let handler = Arc::new(ServiceHandler::new(
        Arc::new(Mutex::new(coordinator)),
        control,
        configs,
    ));
    let broker_task = CommandBroker::bind(
        BrokerOptions {
            endpoint: cfg.command_endpoint.clone(),
            workers: cfg.broker_workers,
        },
        handler,
        cancel.clone(),
    )
    .await
    .context("command broker startup failed")?;

    tokio::signal::ctrl_c()
        .await
        .context("signal handler failed")?;
    info!("shutdown requested");
    cancel.cancel();
    let _ = tokio::join!(registry_task, broker_task);
    info!("coordinator stopped");
    Ok(())
}
