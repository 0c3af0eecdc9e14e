use crate::config::Environment;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
};

/// Subscriber stack every extra layer is stacked on top of.
pub(crate) type BaseSubscriber = Layered<EnvFilter, Registry>;

/// Initialize tracing subscriber with pretty formatting for development
/// and JSON formatting for production.
///
/// Uses RUST_LOG environment variable for filtering (defaults to "info" if not set).
///
/// The OpenTelemetry layer is attached without an exporter; spans only leave
/// the process once [`crate::TelemetryGuard`] has installed a tracer.
pub fn setup_logging(environment: Environment) {
    install_subscriber(environment, tracing_opentelemetry::layer());
}

/// Build the registry (env filter, `otel_layer`, formatter) and install it as
/// the global default.
pub(crate) fn install_subscriber<L>(environment: Environment, otel_layer: L)
where
    L: Layer<BaseSubscriber> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer);

    match environment {
        Environment::Production => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_level(true))
                .init();
        }
        Environment::Development => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_ansi(true))
                .init();
        }
    }
}
