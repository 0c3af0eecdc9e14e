use super::{BackendError, InferenceBackend, ModelIo};
use crate::config::{ExecutionProvider, ServerConfig};
use ndarray::{Array4, ArrayD};
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};
use std::time::Instant;

pub struct OrtBackend {
    session: Session,
    io: ModelIo,
}

impl OrtBackend {
    /// Load the model named by `config` and resolve its I/O: names and the
    /// input shape from the session metadata, the output shape from one
    /// warm-up run on a zero tensor.
    pub fn load_model(config: &ServerConfig) -> anyhow::Result<Self> {
        // Initialize ORT environment (idempotent)
        let _ = ort::init().commit();

        #[cfg_attr(not(feature = "cuda"), allow(unused_mut))]
        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3).map_err(ort::Error::<()>::from)?
            .with_intra_threads(config.intra_threads).map_err(ort::Error::<()>::from)?;

        match config.execution_provider {
            #[cfg(feature = "cuda")]
            ExecutionProvider::Cuda => {
                tracing::info!("Initializing ONNX Runtime with CUDA execution provider");
                builder = builder.with_execution_providers([
                    ort::ep::CUDA::default()
                        .with_device_id(0)
                        .build()
                        .error_on_failure(),
                ]).map_err(ort::Error::<()>::from)?;
            }
            #[cfg(not(feature = "cuda"))]
            ExecutionProvider::Cuda => {
                anyhow::bail!("EXECUTION_PROVIDER=cuda requires building with the `cuda` feature");
            }
            ExecutionProvider::Cpu => {
                tracing::info!(
                    intra_threads = config.intra_threads,
                    "Initializing ONNX Runtime with CPU execution provider"
                );
            }
        }

        let session = builder.commit_from_file(&config.model_path)?;
        tracing::info!(model_path = %config.model_path, "Model loaded");

        let declared = declared_io(&session)?;
        let input_shape = ModelIo::resolve_input_shape(&declared.input_dims, config.input_size)?;
        let mut backend = Self {
            session,
            io: ModelIo {
                input_name: config.input_name.clone().unwrap_or(declared.input_name),
                output_name: config.output_name.clone().unwrap_or(declared.output_name),
                input_shape,
                output_shape: [0; 3],
            },
        };

        backend.io.output_shape = backend.warm_up()?;

        tracing::info!(
            input = %backend.io.input_name,
            output = %backend.io.output_name,
            input_shape = ?backend.io.input_shape,
            output_shape = ?backend.io.output_shape,
            "Model I/O resolved"
        );

        Ok(backend)
    }

    fn warm_up(&mut self) -> anyhow::Result<[usize; 3]> {
        let [n, c, h, w] = self.io.input_shape;
        let zeros = Array4::<f32>::zeros((n, c, h, w));

        let start = Instant::now();
        let output = self.run(&zeros).map_err(|e| {
            anyhow::anyhow!(
                "Warm-up run failed (input '{}', output '{}'): {}",
                self.io.input_name,
                self.io.output_name,
                e
            )
        })?;
        tracing::debug!(elapsed_ms = start.elapsed().as_millis() as u64, "Warm-up run finished");

        match output.shape() {
            &[1, channels, anchors] => Ok([1, channels, anchors]),
            other => anyhow::bail!("Expected model output of shape [1, C, N], got {:?}", other),
        }
    }

    fn run(&mut self, input: &Array4<f32>) -> Result<ArrayD<f32>, BackendError> {
        let tensor = TensorRef::from_array_view(input.view()).map_err(BackendError::runtime)?;

        let outputs = self
            .session
            .run(ort::inputs![self.io.input_name.as_str() => tensor])
            .map_err(BackendError::runtime)?;

        let output = outputs
            .get(self.io.output_name.as_str())
            .ok_or_else(|| {
                BackendError::Runtime(format!("Model has no output named '{}'", self.io.output_name))
            })?
            .try_extract_array::<f32>()
            .map_err(BackendError::runtime)?;

        Ok(output.into_owned())
    }
}

/// First input and output as the model file declares them.
struct DeclaredIo {
    input_name: String,
    /// Empty when the input carries no tensor shape.
    input_dims: Vec<i64>,
    output_name: String,
}

fn declared_io(session: &Session) -> anyhow::Result<DeclaredIo> {
    let input = session
        .inputs()
        .first()
        .ok_or_else(|| anyhow::anyhow!("Model declares no inputs"))?;
    let output = session
        .outputs()
        .first()
        .ok_or_else(|| anyhow::anyhow!("Model declares no outputs"))?;

    Ok(DeclaredIo {
        input_name: input.name().to_string(),
        input_dims: input
            .dtype()
            .tensor_shape()
            .map(|shape| shape.to_vec())
            .unwrap_or_default(),
        output_name: output.name().to_string(),
    })
}

impl InferenceBackend for OrtBackend {
    fn infer(&mut self, input: &Array4<f32>) -> Result<ArrayD<f32>, BackendError> {
        self.run(input)
    }

    fn model_io(&self) -> &ModelIo {
        &self.io
    }
}
