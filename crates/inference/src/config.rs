use crate::codec::FrameCodec;
use crate::processing::{NmsMode, PostprocessConfig};
use common::{env_flag, env_opt, env_or, env_string};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use wire::{DEFAULT_MAX_FRAME_BYTES, ResponseFormat};

pub use common::Environment;

/// Largest decoded image accepted, in pixels (8K UHD).
pub const DEFAULT_MAX_IMAGE_PIXELS: u64 = 7680 * 4320;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionProvider {
    #[default]
    Cpu,
    Cuda,
}

impl FromStr for ExecutionProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(ExecutionProvider::Cpu),
            "cuda" | "gpu" => Ok(ExecutionProvider::Cuda),
            other => Err(format!("unknown execution provider '{}'", other)),
        }
    }
}

impl fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionProvider::Cpu => f.write_str("cpu"),
            ExecutionProvider::Cuda => f.write_str("cuda"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub environment: Environment,
    pub bind_address: String,
    pub port: u16,
    pub model_path: String,
    /// Model input (width, height). Used where the model leaves it dynamic.
    pub input_size: (u32, u32),
    /// Overrides the model's first input name.
    pub input_name: Option<String>,
    /// Overrides the model's first output name.
    pub output_name: Option<String>,
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
    pub num_classes: usize,
    /// Whether objectness and class rows hold logits that need a sigmoid.
    pub apply_sigmoid: bool,
    pub nms_mode: NmsMode,
    /// Reject boxes covering less than this fraction of the model input.
    pub min_box_area_ratio: Option<f32>,
    pub clip_to_image: bool,
    pub response_format: ResponseFormat,
    pub frame_codec: FrameCodec,
    pub max_frame_bytes: usize,
    pub max_image_pixels: u64,
    pub read_timeout: Option<Duration>,
    pub max_connections: usize,
    pub intra_threads: usize,
    pub execution_provider: ExecutionProvider,
    pub otel_endpoint: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            bind_address: "0.0.0.0".to_string(),
            port: 9888,
            model_path: "models/yolov8n.onnx".to_string(),
            input_size: (640, 640),
            input_name: None,
            output_name: None,
            confidence_threshold: 0.35,
            nms_iou_threshold: 0.45,
            num_classes: 80,
            apply_sigmoid: true,
            nms_mode: NmsMode::PerClass,
            min_box_area_ratio: None,
            clip_to_image: true,
            response_format: ResponseFormat::Bracketed,
            frame_codec: FrameCodec::Image,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            max_image_pixels: DEFAULT_MAX_IMAGE_PIXELS,
            read_timeout: None,
            max_connections: 4,
            intra_threads: 4,
            execution_provider: ExecutionProvider::Cpu,
            otel_endpoint: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Unparsable values fall back to their default; values that parse but
    /// make no sense (thresholds outside `[0, 1]`, zero sizes) are errors.
    pub fn from_env() -> anyhow::Result<Self> {
        let d = Self::default();

        let read_timeout_ms: u64 = env_or("READ_TIMEOUT_MS", 0);

        let config = Self {
            environment: Environment::from_env(),
            bind_address: env_string("BIND_ADDRESS", &d.bind_address),
            port: env_or("PORT", d.port),
            model_path: env_string("MODEL_PATH", &d.model_path),
            input_size: (
                env_or("INPUT_WIDTH", d.input_size.0),
                env_or("INPUT_HEIGHT", d.input_size.1),
            ),
            input_name: env_opt("INPUT_TENSOR_NAME"),
            output_name: env_opt("OUTPUT_TENSOR_NAME"),
            confidence_threshold: env_or("CONFIDENCE_THRESHOLD", d.confidence_threshold),
            nms_iou_threshold: env_or("NMS_IOU_THRESHOLD", d.nms_iou_threshold),
            num_classes: env_or("NUM_CLASSES", d.num_classes),
            apply_sigmoid: env_flag("APPLY_SIGMOID", d.apply_sigmoid),
            nms_mode: env_or("NMS_MODE", d.nms_mode),
            min_box_area_ratio: env_opt("MIN_BOX_AREA_RATIO"),
            clip_to_image: env_flag("CLIP_TO_IMAGE", d.clip_to_image),
            response_format: env_or("RESPONSE_FORMAT", d.response_format),
            frame_codec: env_or("FRAME_CODEC", d.frame_codec),
            max_frame_bytes: env_or("MAX_FRAME_BYTES", d.max_frame_bytes),
            max_image_pixels: env_or("MAX_IMAGE_PIXELS", d.max_image_pixels),
            read_timeout: (read_timeout_ms > 0).then(|| Duration::from_millis(read_timeout_ms)),
            max_connections: env_or("MAX_CONNECTIONS", d.max_connections),
            intra_threads: env_or("INTRA_THREADS", d.intra_threads),
            execution_provider: env_or("EXECUTION_PROVIDER", d.execution_provider),
            otel_endpoint: env_opt("OTEL_EXPORTER_OTLP_ENDPOINT"),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        fn unit_range(name: &str, value: f32) -> anyhow::Result<()> {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} must be within [0, 1], got {}", name, value);
            }
            Ok(())
        }

        unit_range("CONFIDENCE_THRESHOLD", self.confidence_threshold)?;
        unit_range("NMS_IOU_THRESHOLD", self.nms_iou_threshold)?;
        if let Some(ratio) = self.min_box_area_ratio {
            unit_range("MIN_BOX_AREA_RATIO", ratio)?;
        }

        if self.input_size.0 == 0 || self.input_size.1 == 0 {
            anyhow::bail!(
                "Input size must be non-zero, got {}x{}",
                self.input_size.0,
                self.input_size.1
            );
        }
        if self.num_classes == 0 {
            anyhow::bail!("NUM_CLASSES must be at least 1");
        }
        if self.max_connections == 0 {
            anyhow::bail!("MAX_CONNECTIONS must be at least 1");
        }
        if self.intra_threads == 0 {
            anyhow::bail!("INTRA_THREADS must be at least 1");
        }
        if self.max_frame_bytes == 0 || self.max_frame_bytes > u32::MAX as usize {
            anyhow::bail!(
                "MAX_FRAME_BYTES must be within [1, {}], got {}",
                u32::MAX,
                self.max_frame_bytes
            );
        }

        Ok(())
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn postprocess_config(&self) -> PostprocessConfig {
        PostprocessConfig {
            confidence_threshold: self.confidence_threshold,
            nms_iou_threshold: self.nms_iou_threshold,
            num_classes: self.num_classes,
            apply_sigmoid: self.apply_sigmoid,
            nms_mode: self.nms_mode,
            min_box_area_ratio: self.min_box_area_ratio,
            clip_to_image: self.clip_to_image,
        }
    }
}
