use crate::{
    backend::{BackendError, InferenceBackend, SharedBackend},
    codec::{DecodeError, FrameDecoder},
    config::ServerConfig,
    metrics::Metrics,
    processing::{PostProcessor, PostprocessError},
};
use ndarray::Array4;
use preprocess::{CpuPreProcessor, PixelBuffer, Preprocess, PreprocessError};
use std::io::{Read, Write};
use std::time::Instant;
use thiserror::Error;
use wire::{Detection, FrameReader, ResponseFormat, ResponseWriter, WireError};

#[derive(Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Postprocess(#[from] PostprocessError),

    #[error(transparent)]
    Wire(#[from] WireError),
}

impl FrameError {
    /// Frame-local failures skip the frame without a response; every other
    /// failure ends the connection.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, FrameError::Decode(_) | FrameError::Preprocess(_))
    }
}

/// Per-connection totals, reported when the connection ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    pub frames: u64,
    pub skipped: u64,
    pub detections: u64,
}

/// Runs the frame protocol for one client.
///
/// Owns every per-frame scratch buffer (pixels, input tensor, candidate and
/// detection lists), so nothing is allocated per frame once the first frame
/// at a given resolution has been seen. Only the backend is shared.
pub struct ConnectionWorker<B, D> {
    backend: SharedBackend<B>,
    decoder: D,
    preprocessor: CpuPreProcessor,
    postprocessor: PostProcessor,
    pixels: PixelBuffer,
    tensor: Array4<f32>,
    detections: Vec<Detection>,
    response_format: ResponseFormat,
    max_frame_bytes: usize,
    metrics: Metrics,
}

impl<B: InferenceBackend, D: FrameDecoder> ConnectionWorker<B, D> {
    pub fn new(backend: SharedBackend<B>, decoder: D, config: &ServerConfig) -> Self {
        let preprocessor = CpuPreProcessor::new(config.input_size);
        let tensor = preprocessor.allocate_tensor();

        Self {
            backend,
            decoder,
            preprocessor,
            postprocessor: PostProcessor::new(config.postprocess_config()),
            pixels: PixelBuffer::new(),
            tensor,
            detections: Vec::new(),
            response_format: config.response_format,
            max_frame_bytes: config.max_frame_bytes,
            metrics: Metrics::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Decode, letterbox, infer and postprocess one payload.
    ///
    /// The backend lock is held only around `infer`.
    pub fn process_frame(&mut self, payload: &[u8]) -> Result<&[Detection], FrameError> {
        self.decoder.decode(payload, &mut self.pixels)?;

        let letterbox = self.preprocessor.letterbox(&self.pixels, &mut self.tensor)?;

        let output = {
            let _s = common::span!("model_inference");
            let mut backend = self.backend.lock().map_err(|_| BackendError::Poisoned)?;
            backend.infer(&self.tensor)?
        };

        self.postprocessor
            .process_into(&output.view(), &letterbox, &mut self.detections)?;

        Ok(&self.detections)
    }

    /// Serve frames from `reader` until the client closes the stream cleanly.
    ///
    /// Each processed frame is answered with exactly one line on `writer`.
    /// Undecodable frames get no line. Any other failure is returned and the
    /// caller drops the connection.
    pub fn serve<R: Read, W: Write>(
        &mut self,
        reader: R,
        writer: W,
    ) -> Result<ConnectionStats, FrameError> {
        let mut frames = FrameReader::with_limit(reader, self.max_frame_bytes);
        let mut responses = ResponseWriter::new(writer, self.response_format);
        let mut stats = ConnectionStats::default();

        while let Some(payload) = frames.read_frame()? {
            let start = Instant::now();

            match self.process_frame(payload) {
                Ok(detections) => {
                    let count = detections.len() as u64;
                    responses.write_detections(detections)?;

                    stats.frames += 1;
                    stats.detections += count;
                    self.metrics
                        .frame_duration
                        .record(start.elapsed().as_secs_f64(), &[]);
                    self.metrics.frames.add(1, &[]);
                    self.metrics.detections.add(count, &[]);

                    if stats.frames.is_multiple_of(100) {
                        tracing::debug!(
                            frames = stats.frames,
                            skipped = stats.skipped,
                            detections = stats.detections,
                            "Frames processed"
                        );
                    }
                }
                Err(e) if e.is_frame_local() => {
                    stats.skipped += 1;
                    self.metrics.skipped.add(1, &[]);
                    tracing::debug!(error = %e, "Skipping frame");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(stats)
    }
}
