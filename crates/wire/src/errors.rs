use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed mid-frame: expected {expected} bytes, got {received}")]
    Closed { expected: usize, received: usize },

    #[error("Frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Read timed out")]
    Timeout,

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl WireError {
    /// Map an I/O error from a read, folding socket timeouts into
    /// [`WireError::Timeout`].
    pub(crate) fn from_read(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => WireError::Timeout,
            _ => WireError::Io(err),
        }
    }
}
