pub mod error;
pub use error::{ConnectionError, ManagerError, ProcessError, RegistryError};

pub mod process;
pub use process::{LaunchSpec, LocalProcessService, ModuleProcessService, ProcessHandle, ProcessReaper};

pub mod registry;
pub use registry::{ModuleRegisterSetup, ModuleRegistry, ModuleRouter, RegistryService};

pub mod connection;
pub use connection::{ModuleConnection, ModuleConnectionFactory, RouterConnectionFactory};

pub mod manager;
pub use manager::{InstanceIdGen, ManagerOptions, ModuleManager, UuidGen};

pub mod coordinator;
pub use coordinator::{Coordinator, CoordinatorControl};
