//! Framing of invocation requests and results on a byte stream.
//!
//! Frames are self-delimiting JSON values. Whitespace (including newlines)
//! between frames is allowed but not required. Results are written one per
//! line.

use serde_json::Deserializer;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::types::{InvocationRequest, InvocationResult};

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("read input: {0}")]
    Read(#[source] std::io::Error),
    #[error("write output: {0}")]
    Write(#[source] std::io::Error),
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("input ended inside a frame ({0} bytes pending)")]
    Truncated(usize),
    #[error("encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Decodes [`InvocationRequest`] frames from a reader, in arrival order.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
    scan: Scan,
    /// Pending length at the last full parse of an unfinished frame.
    checked: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            scan: Scan::default(),
            checked: 0,
        }
    }

    /// Returns the next frame, or `None` on a clean end of stream.
    ///
    /// Suspends until a full frame is buffered. Bytes left over after a frame
    /// stay buffered for the next call.
    pub async fn next_frame(&mut self) -> Result<Option<InvocationRequest>, CodecError> {
        loop {
            if let Some(request) = self.try_decode()? {
                return Ok(Some(request));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self
                .reader
                .read(&mut chunk)
                .await
                .map_err(CodecError::Read)?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                // a bare scalar or a syntax error still decodes to a verdict here
                return match self.decode_prefix()? {
                    Some(request) => Ok(Some(request)),
                    None => Err(CodecError::Truncated(self.buf.len())),
                };
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Each pending byte is scanned once to find where the frame ends, and
    /// the frame is parsed once it is complete. Unfinished frames are also
    /// parsed whenever the pending bytes have doubled, so syntax errors
    /// surface early while total work stays linear in the frame size.
    fn try_decode(&mut self) -> Result<Option<InvocationRequest>, CodecError> {
        if self.scan.pos == 0 {
            match self.buf.iter().position(|b| !b.is_ascii_whitespace()) {
                Some(start) => {
                    self.buf.drain(..start);
                }
                None => {
                    self.buf.clear();
                    return Ok(None);
                }
            }
        }

        if !matches!(self.buf[0], b'{' | b'[' | b'"') {
            return self.decode_prefix();
        }

        match self.scan.advance(&self.buf) {
            Some(end) => {
                let request = serde_json::from_slice(&self.buf[..end])
                    .map_err(CodecError::Malformed)?;
                self.buf.drain(..end);
                self.reset();
                Ok(Some(request))
            }
            None if self.buf.len() >= 2 * self.checked => {
                self.checked = self.buf.len();
                self.decode_prefix()
            }
            None => Ok(None),
        }
    }

    /// Parses the pending bytes from the start. An unexpected end of input
    /// means the frame is not complete yet.
    fn decode_prefix(&mut self) -> Result<Option<InvocationRequest>, CodecError> {
        let mut stream = Deserializer::from_slice(&self.buf).into_iter::<InvocationRequest>();
        let decoded = match stream.next() {
            Some(Ok(request)) => Some((request, stream.byte_offset())),
            Some(Err(e)) if e.is_eof() => None,
            Some(Err(e)) => return Err(CodecError::Malformed(e)),
            None => None,
        };

        Ok(decoded.map(|(request, consumed)| {
            self.buf.drain(..consumed);
            self.reset();
            request
        }))
    }

    fn reset(&mut self) {
        self.scan = Scan::default();
        self.checked = 0;
    }
}

/// Resumable search for the end of a JSON object, array or string that
/// starts at offset zero.
#[derive(Debug, Default)]
struct Scan {
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl Scan {
    /// Continues from where the previous call stopped. Returns the length of
    /// the value once its closing byte has been seen.
    fn advance(&mut self, buf: &[u8]) -> Option<usize> {
        while let Some(&b) = buf.get(self.pos) {
            self.pos += 1;
            if self.in_string {
                match b {
                    _ if self.escaped => self.escaped = false,
                    b'\\' => self.escaped = true,
                    b'"' => {
                        self.in_string = false;
                        if self.depth == 0 {
                            return Some(self.pos);
                        }
                    }
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(self.pos);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

/// Encodes [`InvocationResult`] frames onto a writer.
#[derive(Debug)]
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes one complete frame followed by a newline, then flushes.
    pub async fn write_frame(&mut self, result: &InvocationResult) -> Result<(), CodecError> {
        let mut frame = serde_json::to_vec(result).map_err(CodecError::Encode)?;
        frame.push(b'\n');
        self.writer
            .write_all(&frame)
            .await
            .map_err(CodecError::Write)?;
        self.writer.flush().await.map_err(CodecError::Write)
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
