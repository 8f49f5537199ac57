mod config;
mod error;
mod format;
mod log;

pub use config::LoggerConfig;
pub use error::LoggerError;
pub use format::LogFormat;

pub fn logger_init(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    match cfg.format {
        LogFormat::Text => log::Logger::text(cfg),
        LogFormat::Json => log::Logger::json(cfg),
    }
}
