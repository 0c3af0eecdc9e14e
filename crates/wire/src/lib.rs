pub mod errors;
pub mod framing;
pub mod serialization;
pub mod types;

pub use errors::WireError;
pub use framing::{
    DEFAULT_MAX_FRAME_BYTES, FrameReader, FrameWriter, HEADER_LEN, ReadState, ResponseReader,
    ResponseWriter,
};
pub use serialization::{encode_response, encode_response_into, parse_response};
pub use types::{Detection, ResponseBox, ResponseFormat};
