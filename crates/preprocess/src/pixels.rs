use crate::PreprocessError;

/// Byte order of the three interleaved channels in a [`PixelBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Interleaved 8-bit, 3-channel image, rows packed without padding.
///
/// Decoders write into a reused buffer through [`PixelBuffer::prepare`], so a
/// connection allocates at most once per resolution change.
#[derive(Debug, Clone, Default)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    order: ChannelOrder,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing interleaved buffer. `data` must be exactly
    /// `width * height * 3` bytes.
    pub fn from_raw(
        width: u32,
        height: u32,
        order: ChannelOrder,
        data: Vec<u8>,
    ) -> Result<Self, PreprocessError> {
        let expected = Self::byte_len(width, height);
        if data.len() != expected {
            return Err(PreprocessError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            order,
            data,
        })
    }

    /// Solid-colour image; handy for tests and warm-up.
    pub fn filled(width: u32, height: u32, order: ChannelOrder, color: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(Self::byte_len(width, height));
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&color);
        }
        Self {
            width,
            height,
            order,
            data,
        }
    }

    /// Resize the buffer for a `width x height` image and hand back the bytes
    /// to fill. Existing capacity is reused.
    pub fn prepare(&mut self, width: u32, height: u32, order: ChannelOrder) -> &mut [u8] {
        let len = Self::byte_len(width, height);
        self.data.resize(len, 0);
        self.width = width;
        self.height = height;
        self.order = order;
        &mut self.data[..len]
    }

    #[inline]
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}
