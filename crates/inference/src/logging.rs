use crate::config::ServerConfig;

/// Console logging only; used when no OTLP endpoint is configured.
pub fn setup_logging(config: &ServerConfig) {
    common::setup_logging(config.environment);
}
