pub mod config;
pub mod cpu;
pub mod error;
pub mod pixels;

use ndarray::Array4;

pub use config::{DEFAULT_INPUT_SIZE, LETTERBOX_COLOR};
pub use cpu::CpuPreProcessor;
pub use error::PreprocessError;
pub use pixels::{ChannelOrder, PixelBuffer};

/// Geometry of one letterbox transform: the source image is scaled by
/// `scale` and then pasted at (`pad_left`, `pad_top`) inside the model input.
///
/// The tensor itself is written into a caller-owned buffer, so only the
/// parameters needed to invert the transform travel with the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxResult {
    /// Uniform scale factor, `min(target_w / src_w, target_h / src_h)`.
    pub scale: f32,
    pub pad_left: u32,
    pub pad_top: u32,
    pub resized_width: u32,
    pub resized_height: u32,
    pub source_width: u32,
    pub source_height: u32,
    pub target_width: u32,
    pub target_height: u32,
}

impl LetterboxResult {
    /// Compute the letterbox geometry for a `source` image placed into a
    /// `target` canvas. Fails on a zero-sized source or target.
    pub fn compute(source: (u32, u32), target: (u32, u32)) -> Result<Self, PreprocessError> {
        let (src_w, src_h) = source;
        let (dst_w, dst_h) = target;

        if src_w == 0 || src_h == 0 {
            return Err(PreprocessError::EmptyImage {
                width: src_w,
                height: src_h,
            });
        }
        if dst_w == 0 || dst_h == 0 {
            return Err(PreprocessError::EmptyImage {
                width: dst_w,
                height: dst_h,
            });
        }

        let scale = (dst_w as f32 / src_w as f32).min(dst_h as f32 / src_h as f32);

        // A sliver image can round to zero on its short side; keep at least one row.
        let resized_width = ((src_w as f32 * scale).round() as u32).clamp(1, dst_w);
        let resized_height = ((src_h as f32 * scale).round() as u32).clamp(1, dst_h);

        Ok(Self {
            scale,
            pad_left: (dst_w - resized_width) / 2,
            pad_top: (dst_h - resized_height) / 2,
            resized_width,
            resized_height,
            source_width: src_w,
            source_height: src_h,
            target_width: dst_w,
            target_height: dst_h,
        })
    }

    /// Map a point from source image pixels into model input pixels.
    #[inline]
    pub fn to_model(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x * self.scale + self.pad_left as f32,
            y * self.scale + self.pad_top as f32,
        )
    }

    /// Map a point from model input pixels back into source image pixels.
    /// Padding is removed before the scale is undone.
    #[inline]
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_left as f32) / self.scale,
            (y - self.pad_top as f32) / self.scale,
        )
    }

    /// Map a length (width or height) from model input pixels to source pixels.
    #[inline]
    pub fn length_to_source(&self, len: f32) -> f32 {
        len / self.scale
    }
}

/// Trait for image preprocessing implementations
pub trait Preprocess {
    /// Letterbox `pixels` into `tensor` (shape `[1, 3, H, W]`, planar RGB,
    /// values in `[0, 1]`) and return the geometry used.
    ///
    /// `tensor` is owned by the caller so a streaming loop can reuse it for
    /// every frame.
    fn letterbox(
        &mut self,
        pixels: &PixelBuffer,
        tensor: &mut Array4<f32>,
    ) -> Result<LetterboxResult, PreprocessError>;

    /// Get the input size this preprocessor targets
    fn input_size(&self) -> (u32, u32);

    /// Allocate a zeroed tensor matching [`Preprocess::input_size`].
    fn allocate_tensor(&self) -> Array4<f32> {
        let (width, height) = self.input_size();
        Array4::zeros((1, 3, height as usize, width as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn compute_wide_source_pads_vertically() {
        let lb = LetterboxResult::compute((1280, 720), (640, 640)).unwrap();

        assert_eq!(lb.scale, 0.5);
        assert_eq!((lb.resized_width, lb.resized_height), (640, 360));
        assert_eq!(lb.pad_left, 0);
        assert_eq!(lb.pad_top, 140);
    }

    #[test]
    fn compute_tall_source_pads_horizontally() {
        let lb = LetterboxResult::compute((480, 640), (640, 640)).unwrap();

        assert_eq!(lb.scale, 1.0);
        assert_eq!((lb.resized_width, lb.resized_height), (480, 640));
        assert_eq!(lb.pad_left, 80);
        assert_eq!(lb.pad_top, 0);
    }

    #[test]
    fn compute_odd_remainder_goes_to_far_edge() {
        // 100x33 into 64x64: scale 0.64, resized 64x21, 43 rows of padding
        let lb = LetterboxResult::compute((100, 33), (64, 64)).unwrap();

        assert_eq!(lb.resized_height, 21);
        assert_eq!(lb.pad_top, 21, "floor division puts the extra row at the bottom");
        assert_eq!(lb.target_height - lb.resized_height - lb.pad_top, 22);
    }

    #[test]
    fn compute_upscales_small_sources() {
        let lb = LetterboxResult::compute((320, 160), (640, 640)).unwrap();

        assert_eq!(lb.scale, 2.0);
        assert_eq!((lb.resized_width, lb.resized_height), (640, 320));
        assert_eq!(lb.pad_top, 160);
    }

    #[test]
    fn compute_keeps_one_row_for_slivers() {
        let lb = LetterboxResult::compute((10_000, 1), (640, 640)).unwrap();

        assert_eq!(lb.resized_width, 640);
        assert_eq!(lb.resized_height, 1);
        assert!(lb.scale > 0.0);
    }

    #[test]
    fn compute_rejects_zero_extent() {
        assert!(matches!(
            LetterboxResult::compute((0, 720), (640, 640)),
            Err(PreprocessError::EmptyImage { width: 0, .. })
        ));
        assert!(matches!(
            LetterboxResult::compute((1280, 0), (640, 640)),
            Err(PreprocessError::EmptyImage { height: 0, .. })
        ));
    }

    #[test]
    fn allocate_tensor_matches_input_size() {
        let pre = CpuPreProcessor::new((320, 256));
        let tensor = pre.allocate_tensor();
        assert_eq!(tensor.shape(), &[1, 3, 256, 320]);
    }

    proptest! {
        #[test]
        fn to_source_inverts_to_model(
            src_w in 1u32..4096,
            src_h in 1u32..4096,
            dst_w in 32u32..1280,
            dst_h in 32u32..1280,
            fx in 0.0f32..=1.0,
            fy in 0.0f32..=1.0,
        ) {
            let lb = LetterboxResult::compute((src_w, src_h), (dst_w, dst_h)).unwrap();
            let (x, y) = (fx * src_w as f32, fy * src_h as f32);

            let (mx, my) = lb.to_model(x, y);
            let (sx, sy) = lb.to_source(mx, my);

            prop_assert!((sx - x).abs() <= 0.5, "x {} -> {}", x, sx);
            prop_assert!((sy - y).abs() <= 0.5, "y {} -> {}", y, sy);
        }

        #[test]
        fn resized_image_fits_inside_the_canvas(
            src_w in 1u32..8192,
            src_h in 1u32..8192,
            dst_w in 1u32..1280,
            dst_h in 1u32..1280,
        ) {
            let lb = LetterboxResult::compute((src_w, src_h), (dst_w, dst_h)).unwrap();

            prop_assert!(lb.resized_width >= 1 && lb.resized_height >= 1);
            prop_assert!(lb.pad_left + lb.resized_width <= dst_w);
            prop_assert!(lb.pad_top + lb.resized_height <= dst_h);
            // Floor split: any odd pixel of padding goes right or bottom.
            let right = dst_w - lb.resized_width - lb.pad_left;
            let bottom = dst_h - lb.resized_height - lb.pad_top;
            prop_assert!(right == lb.pad_left || right == lb.pad_left + 1);
            prop_assert!(bottom == lb.pad_top || bottom == lb.pad_top + 1);
        }
    }
}
