#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use inference::{BackendError, InferenceBackend, ModelIo, ServerConfig};
use ndarray::{Array4, ArrayD, IxDyn};
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const NUM_CLASSES: usize = 80;
pub const ANCHORS: usize = 8400;

/// Backend that ignores its input and answers with a canned tensor.
pub struct StubBackend {
    io: ModelIo,
    output: ArrayD<f32>,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl StubBackend {
    pub fn new(output: ArrayD<f32>) -> Self {
        let shape = output.shape().to_vec();
        let output_shape = match shape.as_slice() {
            &[a, b, c] => [a, b, c],
            _ => [0; 3],
        };
        Self {
            io: ModelIo {
                input_name: "images".into(),
                output_name: "output0".into(),
                input_shape: [1, 3, 640, 640],
                output_shape,
            },
            output,
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(scenario_output())
        }
    }

    /// Shared call counter, readable after the backend has moved.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl InferenceBackend for StubBackend {
    fn infer(&mut self, input: &Array4<f32>) -> Result<ArrayD<f32>, BackendError> {
        assert_eq!(input.shape(), &[1, 3, 640, 640], "input tensor shape");
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BackendError::Runtime("device lost".into()));
        }
        Ok(self.output.clone())
    }

    fn model_io(&self) -> &ModelIo {
        &self.io
    }
}

/// `[1, 85, 8400]` output with a single confident anchor: centre (320, 320),
/// 100x100, objectness 0.9, class 3 at 0.9.
pub fn scenario_output() -> ArrayD<f32> {
    let mut out = ArrayD::<f32>::zeros(IxDyn(&[1, 5 + NUM_CLASSES, ANCHORS]));
    for (row, v) in [320.0, 320.0, 100.0, 100.0, 0.9].into_iter().enumerate() {
        out[[0, row, 17]] = v;
    }
    out[[0, 5 + 3, 17]] = 0.9;
    out
}

/// Raw probabilities in the output, so no sigmoid.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        apply_sigmoid: false,
        ..ServerConfig::default()
    }
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([90, 120, 150]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
        .unwrap();
    bytes
}

/// 1280x720 frame: letterboxed at scale 0.5 with 140 px bands top and bottom.
pub fn hd_jpeg() -> Vec<u8> {
    jpeg(1280, 720)
}

pub const SCENARIO_LINE: &str = "[540,260,200,200,3]\n";
