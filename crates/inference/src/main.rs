use common::TelemetryGuard;
use inference::{DetectionServer, InferenceBackend, ServerConfig, logging::setup_logging};

#[cfg(feature = "ort-backend")]
use inference::backend::ort::OrtBackend as Backend;

#[cfg(not(feature = "ort-backend"))]
compile_error!("The 'ort-backend' feature must be enabled to build the server binary");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = ServerConfig::from_env()?;

    let _telemetry = match config.otel_endpoint.as_deref() {
        Some(endpoint) => Some(TelemetryGuard::init("inference", endpoint, config.environment)?),
        None => {
            setup_logging(&config);
            None
        }
    };

    tracing::info!(
        config = ?config,
        "Loaded configuration"
    );

    tracing::info!("Loading inference model");
    let backend = tokio::task::spawn_blocking({
        let config = config.clone();
        move || Backend::load_model(&config)
    })
    .await??;

    let model_input = backend.model_io().input_size();
    if model_input != config.input_size {
        tracing::info!(
            configured = ?config.input_size,
            model = ?model_input,
            "Using the model's fixed input size"
        );
        config.input_size = model_input;
    }
    backend
        .model_io()
        .validate(config.input_size, config.num_classes)?;
    tracing::info!(
        anchors = backend.model_io().num_anchors(),
        "Model loaded successfully"
    );

    DetectionServer::new(backend, config).run().await
}
