use crate::logger::format::LogFormat;

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive, e.g. "info" or "podium_core=debug,info".
    pub filter: String,
    pub with_target: bool,
    pub ansi: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            filter: "info".to_string(),
            with_target: true,
            ansi: true,
        }
    }
}

impl LoggerConfig {
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}
