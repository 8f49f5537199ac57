mod error;
pub use error::BrokerError;

mod handler;
pub use handler::{CommandHandler, PlayerArgs};

mod broker;
pub use broker::{BrokerOptions, CommandBroker};

mod config_service;
pub use config_service::ConfigService;

mod client;
pub use client::Client;
