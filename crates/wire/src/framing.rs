//! Length-prefixed frames in, newline-terminated response lines out.
//!
//! A frame is a big-endian `u32` byte count followed by that many bytes of
//! payload. The reader owns one payload buffer and reuses it for every frame.

use crate::serialization::{encode_response_into, parse_response};
use crate::{Detection, ResponseBox, ResponseFormat, WireError};
use std::io::{self, BufRead, Read, Write};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Largest payload accepted unless configured otherwise (16 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Where a [`FrameReader`] is in the frame cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    AwaitingLength,
    AwaitingPayload { len: usize },
    /// Terminal: the peer went away or a framing error occurred.
    Closed,
}

pub struct FrameReader<R> {
    inner: R,
    state: ReadState,
    buf: Vec<u8>,
    max_frame_bytes: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_limit(inner, DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_limit(inner: R, max_frame_bytes: usize) -> Self {
        Self {
            inner,
            state: ReadState::AwaitingLength,
            buf: Vec::new(),
            max_frame_bytes,
        }
    }

    pub fn state(&self) -> ReadState {
        self.state
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the peer closes cleanly between frames, and on
    /// every call after the reader reached [`ReadState::Closed`]. A close in
    /// the middle of a frame is an error. Any error leaves the reader closed.
    pub fn read_frame(&mut self) -> Result<Option<&[u8]>, WireError> {
        if self.state == ReadState::Closed {
            return Ok(None);
        }

        match self.advance() {
            Ok(Some(len)) => Ok(Some(&self.buf[..len])),
            Ok(None) => {
                self.state = ReadState::Closed;
                Ok(None)
            }
            Err(e) => {
                self.state = ReadState::Closed;
                Err(e)
            }
        }
    }

    fn advance(&mut self) -> Result<Option<usize>, WireError> {
        let mut header = [0u8; HEADER_LEN];
        let got = read_full(&mut self.inner, &mut header).map_err(WireError::from_read)?;
        if got == 0 {
            tracing::debug!("Peer closed connection between frames");
            return Ok(None);
        }
        if got < HEADER_LEN {
            return Err(WireError::Closed {
                expected: HEADER_LEN,
                received: got,
            });
        }

        let len = u32::from_be_bytes(header) as usize;
        if len > self.max_frame_bytes {
            return Err(WireError::FrameTooLarge {
                len,
                max: self.max_frame_bytes,
            });
        }

        self.state = ReadState::AwaitingPayload { len };
        tracing::trace!(len, "Frame header read");

        self.buf.resize(len, 0);
        let got = read_full(&mut self.inner, &mut self.buf[..len]).map_err(WireError::from_read)?;
        if got < len {
            return Err(WireError::Closed {
                expected: len,
                received: got,
            });
        }

        self.state = ReadState::AwaitingLength;
        Ok(Some(len))
    }
}

/// Fill `buf` from `reader`, stopping early only at end of stream. Returns
/// the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Client side of the framing: writes length-prefixed payloads.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_frame(&mut self, payload: &[u8]) -> Result<(), WireError> {
        let len = u32::try_from(payload.len()).map_err(|_| WireError::FrameTooLarge {
            len: payload.len(),
            max: u32::MAX as usize,
        })?;

        self.inner.write_all(&len.to_be_bytes())?;
        self.inner.write_all(payload)?;
        self.inner.flush()?;
        Ok(())
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Server side of the response path: one line per processed frame.
pub struct ResponseWriter<W> {
    inner: W,
    format: ResponseFormat,
    line: String,
}

impl<W: Write> ResponseWriter<W> {
    pub fn new(inner: W, format: ResponseFormat) -> Self {
        Self {
            inner,
            format,
            line: String::new(),
        }
    }

    pub fn format(&self) -> ResponseFormat {
        self.format
    }

    pub fn write_detections(&mut self, detections: &[Detection]) -> Result<(), WireError> {
        encode_response_into(&mut self.line, detections, self.format);
        self.inner.write_all(self.line.as_bytes())?;
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Client side of the response path.
pub struct ResponseReader<R> {
    inner: R,
    line: String,
}

impl<R: BufRead> ResponseReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: String::new(),
        }
    }

    /// Read and parse one response line; `Ok(None)` at end of stream.
    pub fn read_response(&mut self) -> Result<Option<Vec<ResponseBox>>, WireError> {
        self.line.clear();
        if self.inner.read_line(&mut self.line).map_err(WireError::from_read)? == 0 {
            return Ok(None);
        }
        parse_response(&self.line).map(Some)
    }
}
