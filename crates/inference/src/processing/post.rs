use super::nms::{Nms, NmsMode};
use ndarray::{ArrayViewD, Axis, Ix3};
use preprocess::LetterboxResult;
use thiserror::Error;
use wire::Detection;

// Rows of each anchor column: cx, cy, w, h, objectness, then class scores.
const OBJECTNESS_ROW: usize = 4;
const CLASS_ROW_START: usize = 5;

#[derive(Error, Debug)]
pub enum PostprocessError {
    #[error("Output shape mismatch: expected [1, {expected_channels}, N], got {actual:?}")]
    Shape {
        expected_channels: usize,
        actual: Vec<usize>,
    },

    #[error("Output tensor has no anchors")]
    EmptyInput,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostprocessConfig {
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
    pub num_classes: usize,
    pub apply_sigmoid: bool,
    pub nms_mode: NmsMode,
    pub min_box_area_ratio: Option<f32>,
    pub clip_to_image: bool,
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.35,
            nms_iou_threshold: 0.45,
            num_classes: 80,
            apply_sigmoid: true,
            nms_mode: NmsMode::PerClass,
            min_box_area_ratio: None,
            clip_to_image: true,
        }
    }
}

/// One anchor that passed the confidence gates, in model input pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
    pub objectness: f32,
    pub class_id: usize,
    pub class_score: f32,
    /// `objectness * class_score`
    pub confidence: f32,
    /// Column index in the output tensor.
    pub anchor: usize,
}

impl Candidate {
    /// (x1, y1, x2, y2)
    #[inline]
    pub fn corners(&self) -> (f32, f32, f32, f32) {
        let (hw, hh) = (self.w / 2.0, self.h / 2.0);
        (self.cx - hw, self.cy - hh, self.cx + hw, self.cy + hh)
    }
}

/// Turns a raw `[1, 4 + 1 + K, N]` YOLO-style output into final detections.
///
/// Candidate gathering and NMS run in model input space; only survivors are
/// mapped back through the letterbox. IoU is unchanged by the uniform
/// scale-and-shift, so the survivor set is the same either way.
pub struct PostProcessor {
    config: PostprocessConfig,
    candidates: Vec<Candidate>,
    nms: Nms,
    keep: Vec<usize>,
}

impl PostProcessor {
    pub fn new(config: PostprocessConfig) -> Self {
        Self {
            config,
            candidates: Vec::new(),
            nms: Nms::new(),
            keep: Vec::new(),
        }
    }

    pub fn config(&self) -> &PostprocessConfig {
        &self.config
    }

    /// Decode, gate and suppress, returning a fresh list.
    pub fn process(
        &mut self,
        output: &ArrayViewD<f32>,
        letterbox: &LetterboxResult,
    ) -> Result<Vec<Detection>, PostprocessError> {
        let mut detections = Vec::new();
        self.process_into(output, letterbox, &mut detections)?;
        Ok(detections)
    }

    /// Like [`PostProcessor::process`] but fills `detections` (cleared first)
    /// in descending confidence order.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn process_into(
        &mut self,
        output: &ArrayViewD<f32>,
        letterbox: &LetterboxResult,
        detections: &mut Vec<Detection>,
    ) -> Result<(), PostprocessError> {
        detections.clear();

        self.decode_candidates(output, letterbox)?;

        self.nms.run(
            &self.candidates,
            self.config.nms_iou_threshold,
            self.config.nms_mode,
            &mut self.keep,
        );

        detections.extend(
            self.keep
                .iter()
                .filter_map(|&i| self.to_detection(&self.candidates[i], letterbox)),
        );

        tracing::trace!(
            candidates = self.candidates.len(),
            survivors = self.keep.len(),
            detections = detections.len(),
            "Postprocessed output"
        );

        Ok(())
    }

    /// Collect every anchor that clears the objectness and confidence gates.
    pub fn decode_candidates(
        &mut self,
        output: &ArrayViewD<f32>,
        letterbox: &LetterboxResult,
    ) -> Result<&[Candidate], PostprocessError> {
        self.candidates.clear();

        let expected_channels = CLASS_ROW_START + self.config.num_classes;
        let shape_error = || PostprocessError::Shape {
            expected_channels,
            actual: output.shape().to_vec(),
        };

        let output = output
            .view()
            .into_dimensionality::<Ix3>()
            .map_err(|_| shape_error())?;
        let (batch, channels, anchors) = output.dim();
        if batch != 1 || channels != expected_channels {
            return Err(shape_error());
        }
        if anchors == 0 {
            return Err(PostprocessError::EmptyInput);
        }

        let rows = output.index_axis_move(Axis(0), 0);
        let threshold = self.config.confidence_threshold;
        let activate = |v: f32| if self.config.apply_sigmoid { sigmoid(v) } else { v };

        let min_area = self
            .config
            .min_box_area_ratio
            .map(|ratio| ratio * letterbox.target_width as f32 * letterbox.target_height as f32);

        for anchor in 0..anchors {
            let objectness = activate(rows[[OBJECTNESS_ROW, anchor]]);
            // Negated so NaN scores fall through as rejected.
            if !(objectness >= threshold) {
                continue;
            }

            let mut class_id = 0;
            let mut class_score = f32::NEG_INFINITY;
            for k in 0..self.config.num_classes {
                let score = activate(rows[[CLASS_ROW_START + k, anchor]]);
                if score > class_score {
                    class_score = score;
                    class_id = k;
                }
            }

            let confidence = objectness * class_score;
            if !(confidence >= threshold) {
                continue;
            }

            let cx = rows[[0, anchor]];
            let cy = rows[[1, anchor]];
            let w = rows[[2, anchor]];
            let h = rows[[3, anchor]];
            // min/max in the clip would turn NaN geometry into a full-frame box.
            if !(cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite())
                || !(w > 0.0 && h > 0.0)
            {
                continue;
            }
            if let Some(min_area) = min_area {
                if w * h < min_area {
                    continue;
                }
            }

            self.candidates.push(Candidate {
                cx,
                cy,
                w,
                h,
                objectness,
                class_id,
                class_score,
                confidence,
                anchor,
            });
        }

        Ok(&self.candidates)
    }

    /// Map a candidate back to original image pixels. Returns `None` when
    /// clipping leaves nothing of the box or it rounds to zero size.
    fn to_detection(&self, c: &Candidate, letterbox: &LetterboxResult) -> Option<Detection> {
        let (mut x1, mut y1) = letterbox.to_source(c.cx - c.w / 2.0, c.cy - c.h / 2.0);
        let mut w = letterbox.length_to_source(c.w);
        let mut h = letterbox.length_to_source(c.h);

        if self.config.clip_to_image {
            let x2 = (x1 + w).min(letterbox.source_width as f32);
            let y2 = (y1 + h).min(letterbox.source_height as f32);
            x1 = x1.max(0.0);
            y1 = y1.max(0.0);
            w = x2 - x1;
            h = y2 - y1;
            if !(w > 0.0 && h > 0.0) {
                return None;
            }
        }

        let (width, height) = (w.round() as i32, h.round() as i32);
        if width <= 0 || height <= 0 {
            return None;
        }

        Some(Detection {
            x: x1.round() as i32,
            y: y1.round() as i32,
            width,
            height,
            confidence: c.confidence,
            class_id: c.class_id as u32,
        })
    }
}

/// Sigmoid activation function
#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
