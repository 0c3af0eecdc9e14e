use crate::config::{DEFAULT_INPUT_SIZE, LETTERBOX_COLOR, PIXEL_SCALE};
use crate::{ChannelOrder, LetterboxResult, PixelBuffer, Preprocess, PreprocessError};
use common::span_debug;
use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use ndarray::Array4;

/// Letterboxes frames on the CPU with `fast_image_resize`.
///
/// Holds its resizer and both intermediate byte buffers so a worker can keep
/// one instance per connection and process every frame without allocating.
pub struct CpuPreProcessor {
    pub input_size: (u32, u32),
    resizer: Resizer,
    resized_buffer: Vec<u8>,
    letterboxed_buffer: Vec<u8>,
}

impl CpuPreProcessor {
    pub fn new(input_size: (u32, u32)) -> Self {
        Self {
            input_size,
            resizer: Resizer::new(),
            resized_buffer: Vec::new(),
            letterboxed_buffer: vec![
                LETTERBOX_COLOR;
                PixelBuffer::byte_len(input_size.0, input_size.1)
            ],
        }
    }

    fn check_tensor(&self, tensor: &Array4<f32>) -> Result<(), PreprocessError> {
        let expected = [1, 3, self.input_size.1 as usize, self.input_size.0 as usize];
        if tensor.shape() != expected {
            return Err(PreprocessError::TensorShape {
                expected,
                actual: tensor.shape().to_vec(),
            });
        }
        Ok(())
    }

    fn resize_and_letterbox(
        &mut self,
        pixels: &PixelBuffer,
        lb: &LetterboxResult,
    ) -> Result<(), PreprocessError> {
        let _s = span_debug!("resize_and_letterbox");

        let row_bytes = lb.resized_width as usize * 3;

        let resized: &[u8] = if (lb.resized_width, lb.resized_height) == pixels.dimensions() {
            pixels.as_bytes()
        } else {
            let src = ImageRef::new(
                pixels.width(),
                pixels.height(),
                pixels.as_bytes(),
                PixelType::U8x3,
            )?;

            self.resized_buffer.resize(row_bytes * lb.resized_height as usize, 0);
            {
                let mut dst = Image::from_slice_u8(
                    lb.resized_width,
                    lb.resized_height,
                    &mut self.resized_buffer,
                    PixelType::U8x3,
                )?;
                self.resizer.resize(
                    &src,
                    &mut dst,
                    &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
                )?;
            }
            &self.resized_buffer
        };

        self.letterboxed_buffer.fill(LETTERBOX_COLOR);

        let stride = self.input_size.0 as usize * 3;
        let left = lb.pad_left as usize * 3;

        for (y, row) in resized.chunks_exact(row_bytes).enumerate() {
            let dst_row = (y + lb.pad_top as usize) * stride + left;
            self.letterboxed_buffer[dst_row..dst_row + row_bytes].copy_from_slice(row);
        }

        Ok(())
    }

    /// Spread the interleaved canvas into three planes, always R, G, B.
    fn normalize(&self, order: ChannelOrder, out: &mut [f32]) {
        let _s = span_debug!("normalize");

        let spatial = self.letterboxed_buffer.len() / 3;
        let (r_plane, rest) = out.split_at_mut(spatial);
        let (g_plane, b_plane) = rest.split_at_mut(spatial);

        let (ri, bi) = match order {
            ChannelOrder::Rgb => (0, 2),
            ChannelOrder::Bgr => (2, 0),
        };

        for (((px, r), g), b) in self
            .letterboxed_buffer
            .chunks_exact(3)
            .zip(r_plane.iter_mut())
            .zip(g_plane.iter_mut())
            .zip(b_plane.iter_mut())
        {
            *r = px[ri] as f32 / PIXEL_SCALE;
            *g = px[1] as f32 / PIXEL_SCALE;
            *b = px[bi] as f32 / PIXEL_SCALE;
        }
    }
}

impl Default for CpuPreProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE)
    }
}

impl Preprocess for CpuPreProcessor {
    fn letterbox(
        &mut self,
        pixels: &PixelBuffer,
        tensor: &mut Array4<f32>,
    ) -> Result<LetterboxResult, PreprocessError> {
        if pixels.is_empty() {
            return Err(PreprocessError::EmptyImage {
                width: pixels.width(),
                height: pixels.height(),
            });
        }

        let expected = PixelBuffer::byte_len(pixels.width(), pixels.height());
        if pixels.as_bytes().len() != expected {
            return Err(PreprocessError::BufferSizeMismatch {
                expected,
                actual: pixels.as_bytes().len(),
            });
        }

        self.check_tensor(tensor)?;

        let lb = LetterboxResult::compute(pixels.dimensions(), self.input_size)?;

        tracing::trace!(
            width = pixels.width(),
            height = pixels.height(),
            scale = lb.scale,
            pad_left = lb.pad_left,
            pad_top = lb.pad_top,
            "Letterboxing frame"
        );

        self.resize_and_letterbox(pixels, &lb)?;

        let out = tensor
            .as_slice_mut()
            .ok_or(PreprocessError::NonContiguousTensor)?;
        self.normalize(pixels.order(), out);

        Ok(lb)
    }

    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }
}
