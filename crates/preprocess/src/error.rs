use fast_image_resize::{ImageBufferError, ResizeError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Image has zero extent ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("Buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("Tensor shape mismatch: expected {expected:?}, got {actual:?}")]
    TensorShape {
        expected: [usize; 4],
        actual: Vec<usize>,
    },

    #[error("Tensor is not contiguous in standard layout")]
    NonContiguousTensor,

    #[error("Invalid image buffer: {0}")]
    ImageBuffer(#[from] ImageBufferError),

    #[error("Resize failed: {0}")]
    Resize(#[from] ResizeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PreprocessError::EmptyImage {
            width: 0,
            height: 720,
        };
        assert_eq!(err.to_string(), "Image has zero extent (0x720)");

        let err = PreprocessError::BufferSizeMismatch {
            expected: 300,
            actual: 200,
        };
        assert_eq!(
            err.to_string(),
            "Buffer size mismatch: expected 300 bytes, got 200"
        );

        let err = PreprocessError::TensorShape {
            expected: [1, 3, 640, 640],
            actual: vec![1, 3, 320, 320],
        };
        assert!(err.to_string().contains("[1, 3, 640, 640]"));
    }
}
