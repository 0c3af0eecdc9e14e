use ndarray::{Array4, ArrayD};
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[cfg(feature = "ort-backend")]
pub mod ort;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Inference runtime error: {0}")]
    Runtime(String),

    #[error("Backend lock poisoned by a panicking worker")]
    Poisoned,
}

impl BackendError {
    pub fn runtime(err: impl fmt::Display) -> Self {
        BackendError::Runtime(err.to_string())
    }
}

/// Tensor names and shapes resolved once when the model is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelIo {
    pub input_name: String,
    pub output_name: String,
    /// `[1, 3, H, W]`
    pub input_shape: [usize; 4],
    /// `[1, C, N]` with `C = 4 + 1 + num_classes`
    pub output_shape: [usize; 3],
}

impl ModelIo {
    /// Rows every anchor column must carry for `num_classes` classes.
    pub fn expected_channels(num_classes: usize) -> usize {
        4 + 1 + num_classes
    }

    /// Input size as (width, height).
    pub fn input_size(&self) -> (u32, u32) {
        (self.input_shape[3] as u32, self.input_shape[2] as u32)
    }

    /// Build `[1, 3, H, W]` from the model's declared input dims. Dynamic
    /// (non-positive) height or width falls back to `configured`; an empty
    /// list means the model declares no shape at all.
    pub fn resolve_input_shape(dims: &[i64], configured: (u32, u32)) -> anyhow::Result<[usize; 4]> {
        let (width, height) = (configured.0 as usize, configured.1 as usize);
        let dim = |value: i64, fallback: usize| {
            if value > 0 { value as usize } else { fallback }
        };

        match *dims {
            [] => Ok([1, 3, height, width]),
            [batch, channels, h, w] => {
                if batch > 1 {
                    anyhow::bail!("Model input has a fixed batch of {}, expected 1", batch);
                }
                if channels > 0 && channels != 3 {
                    anyhow::bail!("Model input has {} channels, expected 3", channels);
                }
                Ok([1, 3, dim(h, height), dim(w, width)])
            }
            _ => anyhow::bail!("Expected a [1, 3, H, W] model input, got {:?}", dims),
        }
    }

    pub fn num_anchors(&self) -> usize {
        self.output_shape[2]
    }

    /// Check the discovered shapes against the configured model layout.
    pub fn validate(&self, input_size: (u32, u32), num_classes: usize) -> anyhow::Result<()> {
        if self.input_size() != input_size {
            anyhow::bail!(
                "Model input is {}x{} but {}x{} is configured",
                self.input_shape[3],
                self.input_shape[2],
                input_size.0,
                input_size.1
            );
        }

        let expected = Self::expected_channels(num_classes);
        if self.output_shape[1] != expected {
            anyhow::bail!(
                "Model output has {} channels per anchor, expected {} (4 box + 1 objectness + {} classes)",
                self.output_shape[1],
                expected,
                num_classes
            );
        }

        if self.num_anchors() == 0 {
            anyhow::bail!("Model output has no anchors");
        }

        Ok(())
    }
}

/// A loaded detection model: maps one `[1, 3, H, W]` tensor to one
/// `[1, C, N]` tensor. Shapes are fixed for the life of the backend.
pub trait InferenceBackend: Send {
    fn infer(&mut self, input: &Array4<f32>) -> Result<ArrayD<f32>, BackendError>;

    fn model_io(&self) -> &ModelIo;
}

/// Process-wide handle to the loaded model.
///
/// The mutex is the one serialization point between connection workers:
/// a worker holds it only for the duration of a single `infer` call, while
/// decode, letterbox and postprocess run in parallel outside it.
pub type SharedBackend<B> = Arc<Mutex<B>>;

pub fn share<B: InferenceBackend>(backend: B) -> SharedBackend<B> {
    Arc::new(Mutex::new(backend))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yolo_io() -> ModelIo {
        ModelIo {
            input_name: "images".into(),
            output_name: "output0".into(),
            input_shape: [1, 3, 640, 640],
            output_shape: [1, 85, 8400],
        }
    }

    #[test]
    fn test_validate_accepts_matching_layout() {
        assert!(yolo_io().validate((640, 640), 80).is_ok());
    }

    #[test]
    fn test_validate_rejects_class_count_mismatch() {
        let err = yolo_io().validate((640, 640), 3).unwrap_err();
        assert!(
            err.to_string().contains("85 channels"),
            "unexpected message: {}",
            err
        );
    }

    #[test]
    fn test_validate_rejects_input_size_mismatch() {
        assert!(yolo_io().validate((320, 320), 80).is_err());
    }

    #[test]
    fn test_static_input_dims_win_over_configured_size() {
        let shape = ModelIo::resolve_input_shape(&[1, 3, 384, 640], (640, 640)).unwrap();
        assert_eq!(shape, [1, 3, 384, 640]);
    }

    #[test]
    fn test_dynamic_input_dims_use_configured_size() {
        let shape = ModelIo::resolve_input_shape(&[-1, 3, -1, -1], (320, 256)).unwrap();
        assert_eq!(shape, [1, 3, 256, 320]);

        let shape = ModelIo::resolve_input_shape(&[], (320, 256)).unwrap();
        assert_eq!(shape, [1, 3, 256, 320]);
    }

    #[test]
    fn test_unusable_input_dims_are_rejected() {
        assert!(ModelIo::resolve_input_shape(&[1, 1, 640, 640], (640, 640)).is_err());
        assert!(ModelIo::resolve_input_shape(&[4, 3, 640, 640], (640, 640)).is_err());
        assert!(ModelIo::resolve_input_shape(&[1, 640, 640], (640, 640)).is_err());
    }

    #[test]
    fn test_input_size_is_width_then_height() {
        let io = ModelIo {
            input_shape: [1, 3, 384, 640],
            ..yolo_io()
        };
        assert_eq!(io.input_size(), (640, 384));
    }
}
