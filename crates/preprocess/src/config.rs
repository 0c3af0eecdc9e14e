/// Model input size (width, height) used when none is configured.
pub const DEFAULT_INPUT_SIZE: (u32, u32) = (640, 640);

/// Gray value written into the padding bands around a letterboxed image.
pub const LETTERBOX_COLOR: u8 = 114;

/// Divisor mapping `u8` channel values onto `[0, 1]`.
pub const PIXEL_SCALE: f32 = 255.0;
