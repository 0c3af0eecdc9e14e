use image::{ColorType, DynamicImage, ImageDecoder as _, ImageError, ImageReader};
use preprocess::{ChannelOrder, PixelBuffer};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Empty frame payload")]
    Empty,

    #[error("Frame is not a decodable image: {0}")]
    Corrupt(String),

    #[error("Image is {width}x{height}, above the {max_pixels} pixel limit")]
    TooLarge {
        width: u32,
        height: u32,
        max_pixels: u64,
    },

    #[error("Decoder unavailable: {0}")]
    Unavailable(String),
}

impl DecodeError {
    fn corrupt(err: impl fmt::Display) -> Self {
        DecodeError::Corrupt(err.to_string())
    }
}

/// Which library turns frame payloads into pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameCodec {
    /// Pure-Rust `image` crate; sniffs JPEG or PNG from the payload.
    #[default]
    Image,
    /// libjpeg-turbo; JPEG only, requires the `turbojpeg` feature.
    TurboJpeg,
}

impl FromStr for FrameCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "image" | "auto" => Ok(FrameCodec::Image),
            "turbojpeg" | "turbo" | "libjpeg-turbo" => Ok(FrameCodec::TurboJpeg),
            other => Err(format!("unknown frame codec '{}'", other)),
        }
    }
}

impl fmt::Display for FrameCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameCodec::Image => f.write_str("image"),
            FrameCodec::TurboJpeg => f.write_str("turbojpeg"),
        }
    }
}

/// Turns one encoded frame into interleaved 8-bit RGB.
pub trait FrameDecoder: Send {
    /// Decode `data` into `out`, reusing its allocation.
    fn decode(&mut self, data: &[u8], out: &mut PixelBuffer) -> Result<(), DecodeError>;
}

impl<D: FrameDecoder + ?Sized> FrameDecoder for Box<D> {
    fn decode(&mut self, data: &[u8], out: &mut PixelBuffer) -> Result<(), DecodeError> {
        (**self).decode(data, out)
    }
}

fn check_size(width: u32, height: u32, max_pixels: u64) -> Result<(), DecodeError> {
    if width == 0 || height == 0 {
        return Err(DecodeError::Corrupt(format!(
            "image has zero extent ({}x{})",
            width, height
        )));
    }
    if width as u64 * height as u64 > max_pixels {
        return Err(DecodeError::TooLarge {
            width,
            height,
            max_pixels,
        });
    }
    Ok(())
}

/// Decoder backed by the `image` crate.
pub struct ImageFrameDecoder {
    max_pixels: u64,
}

impl ImageFrameDecoder {
    pub fn new(max_pixels: u64) -> Self {
        Self { max_pixels }
    }
}

impl FrameDecoder for ImageFrameDecoder {
    fn decode(&mut self, data: &[u8], out: &mut PixelBuffer) -> Result<(), DecodeError> {
        let _s = common::span_debug!("decode");

        if data.is_empty() {
            return Err(DecodeError::Empty);
        }

        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(DecodeError::corrupt)?;
        if reader.format().is_none() {
            return Err(DecodeError::Corrupt("unrecognized image format".into()));
        }

        // Dimensions come from the header, before any pixel allocation.
        let decoder = reader.into_decoder().map_err(DecodeError::corrupt)?;
        let (width, height) = decoder.dimensions();
        check_size(width, height, self.max_pixels)?;

        if decoder.color_type() == ColorType::Rgb8 {
            let pixels = out.prepare(width, height, ChannelOrder::Rgb);
            return decoder.read_image(pixels).map_err(image_error);
        }

        // Grayscale, alpha or 16-bit sources go through a conversion.
        let rgb = DynamicImage::from_decoder(decoder)
            .map_err(image_error)?
            .into_rgb8();
        out.prepare(width, height, ChannelOrder::Rgb)
            .copy_from_slice(rgb.as_raw());
        Ok(())
    }
}

fn image_error(err: ImageError) -> DecodeError {
    DecodeError::corrupt(err)
}

/// JPEG decoder using turbojpeg (libjpeg-turbo)
#[cfg(feature = "turbojpeg")]
pub struct TurboJpegDecoder {
    decompressor: turbojpeg::Decompressor,
    max_pixels: u64,
}

#[cfg(feature = "turbojpeg")]
impl TurboJpegDecoder {
    pub fn new(max_pixels: u64) -> Result<Self, DecodeError> {
        let decompressor = turbojpeg::Decompressor::new()
            .map_err(|e| DecodeError::Unavailable(e.to_string()))?;
        Ok(Self {
            decompressor,
            max_pixels,
        })
    }
}

#[cfg(feature = "turbojpeg")]
impl FrameDecoder for TurboJpegDecoder {
    fn decode(&mut self, data: &[u8], out: &mut PixelBuffer) -> Result<(), DecodeError> {
        let _s = common::span_debug!("decode");

        if data.is_empty() {
            return Err(DecodeError::Empty);
        }

        let header = self
            .decompressor
            .read_header(data)
            .map_err(DecodeError::corrupt)?;
        let width = u32::try_from(header.width).map_err(DecodeError::corrupt)?;
        let height = u32::try_from(header.height).map_err(DecodeError::corrupt)?;
        check_size(width, height, self.max_pixels)?;

        let output = turbojpeg::Image {
            pixels: out.prepare(width, height, ChannelOrder::Rgb),
            width: header.width,
            pitch: header.width * 3,
            height: header.height,
            format: turbojpeg::PixelFormat::RGB,
        };

        self.decompressor
            .decompress(data, output)
            .map_err(DecodeError::corrupt)
    }
}

/// Build the decoder a connection worker owns for its lifetime.
pub fn build_decoder(
    codec: FrameCodec,
    max_pixels: u64,
) -> Result<Box<dyn FrameDecoder>, DecodeError> {
    match codec {
        FrameCodec::Image => Ok(Box::new(ImageFrameDecoder::new(max_pixels))),
        #[cfg(feature = "turbojpeg")]
        FrameCodec::TurboJpeg => Ok(Box::new(TurboJpegDecoder::new(max_pixels)?)),
        #[cfg(not(feature = "turbojpeg"))]
        FrameCodec::TurboJpeg => Err(DecodeError::Unavailable(
            "FRAME_CODEC=turbojpeg requires building with the `turbojpeg` feature".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage};

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
        bytes
    }

    fn solid_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg)
    }

    #[test]
    fn test_decodes_jpeg_dimensions_and_colour() {
        let jpeg = solid_jpeg(64, 48, [200, 40, 40]);
        let mut decoder = ImageFrameDecoder::new(u64::MAX);
        let mut pixels = PixelBuffer::new();

        decoder.decode(&jpeg, &mut pixels).unwrap();

        assert_eq!(pixels.dimensions(), (64, 48));
        assert_eq!(pixels.order(), ChannelOrder::Rgb);
        assert_eq!(pixels.as_bytes().len(), 64 * 48 * 3);
        // Lossy, but a flat colour stays close.
        let px = &pixels.as_bytes()[..3];
        assert!(px[0] > 180 && px[1] < 70 && px[2] < 70, "got {:?}", px);
    }

    #[test]
    fn test_png_is_decoded_exactly() {
        let mut img = RgbImage::new(3, 2);
        img.put_pixel(2, 1, Rgb([1, 2, 3]));
        let png = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);
        let mut pixels = PixelBuffer::new();

        ImageFrameDecoder::new(u64::MAX)
            .decode(&png, &mut pixels)
            .unwrap();

        assert_eq!(&pixels.as_bytes()[15..18], &[1, 2, 3]);
    }

    #[test]
    fn test_grayscale_is_expanded_to_rgb() {
        let img = GrayImage::from_pixel(4, 4, Luma([90]));
        let png = encode(DynamicImage::ImageLuma8(img), ImageFormat::Png);
        let mut pixels = PixelBuffer::new();

        ImageFrameDecoder::new(u64::MAX)
            .decode(&png, &mut pixels)
            .unwrap();

        assert_eq!(pixels.as_bytes().len(), 4 * 4 * 3);
        assert!(pixels.as_bytes().iter().all(|&b| b == 90));
    }

    #[test]
    fn test_buffer_follows_resolution_changes() {
        let mut decoder = ImageFrameDecoder::new(u64::MAX);
        let mut pixels = PixelBuffer::new();

        decoder.decode(&solid_jpeg(32, 32, [0, 0, 0]), &mut pixels).unwrap();
        decoder.decode(&solid_jpeg(16, 8, [0, 0, 0]), &mut pixels).unwrap();

        assert_eq!(pixels.dimensions(), (16, 8));
        assert_eq!(pixels.as_bytes().len(), 16 * 8 * 3);
    }

    #[test]
    fn test_empty_payload() {
        let mut pixels = PixelBuffer::new();
        let err = ImageFrameDecoder::new(u64::MAX)
            .decode(&[], &mut pixels)
            .unwrap_err();
        assert!(matches!(err, DecodeError::Empty));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let mut pixels = PixelBuffer::new();
        let err = ImageFrameDecoder::new(u64::MAX)
            .decode(b"definitely not an image", &mut pixels)
            .unwrap_err();
        assert!(matches!(err, DecodeError::Corrupt(_)));
    }

    #[test]
    fn test_pixel_limit_is_enforced_from_header() {
        let jpeg = solid_jpeg(100, 100, [0, 0, 0]);
        let mut pixels = PixelBuffer::new();

        let err = ImageFrameDecoder::new(9_999)
            .decode(&jpeg, &mut pixels)
            .unwrap_err();

        assert!(matches!(
            err,
            DecodeError::TooLarge {
                width: 100,
                height: 100,
                max_pixels: 9_999
            }
        ));
        assert!(pixels.is_empty(), "nothing is allocated for rejected frames");
    }

    #[test]
    fn test_boxed_decoder_delegates() {
        let mut decoder = build_decoder(FrameCodec::Image, u64::MAX).unwrap();
        let mut pixels = PixelBuffer::new();

        decoder.decode(&solid_jpeg(8, 8, [0, 0, 0]), &mut pixels).unwrap();

        assert_eq!(pixels.dimensions(), (8, 8));
    }

    #[test]
    fn test_frame_codec_parsing() {
        assert_eq!("image".parse(), Ok(FrameCodec::Image));
        assert_eq!("TurboJPEG".parse(), Ok(FrameCodec::TurboJpeg));
        assert_eq!("libjpeg_turbo".parse(), Ok(FrameCodec::TurboJpeg));
        assert!("webp".parse::<FrameCodec>().is_err());
        assert_eq!(FrameCodec::TurboJpeg.to_string(), "turbojpeg");
    }

    #[cfg(not(feature = "turbojpeg"))]
    #[test]
    fn test_turbojpeg_without_feature_is_unavailable() {
        assert!(matches!(
            build_decoder(FrameCodec::TurboJpeg, u64::MAX),
            Err(DecodeError::Unavailable(_))
        ));
    }

    #[cfg(feature = "turbojpeg")]
    #[test]
    fn test_turbojpeg_matches_image_crate_dimensions() {
        let jpeg = solid_jpeg(40, 30, [120, 120, 120]);
        let mut turbo = TurboJpegDecoder::new(u64::MAX).unwrap();
        let mut pixels = PixelBuffer::new();

        turbo.decode(&jpeg, &mut pixels).unwrap();

        assert_eq!(pixels.dimensions(), (40, 30));
        assert!(turbo.decode(&[0, 1, 2, 3], &mut pixels).is_err());
    }
}
