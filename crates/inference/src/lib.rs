pub mod backend;
pub mod codec;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod processing;
pub mod server;
pub mod worker;

// Re-export commonly used types for convenience
pub use backend::{BackendError, InferenceBackend, ModelIo, SharedBackend, share};
pub use codec::{DecodeError, FrameCodec, FrameDecoder, ImageFrameDecoder, build_decoder};
pub use config::ServerConfig;
pub use processing::{NmsMode, PostProcessor, PostprocessConfig, PostprocessError};
pub use server::{DetectionServer, shutdown_signal};
pub use wire::Detection;
pub use worker::{ConnectionStats, ConnectionWorker, FrameError};
