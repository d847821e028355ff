//! Frame header encoding and incremental frame decoding.
//!
//! A TCP stream has no message boundaries: one read may hold a partial
//! header, exactly one frame, several frames, or a frame followed by the
//! start of the next. `FrameDecoder` buffers whatever arrives and only hands
//! out complete frames.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::protocol::{HEADER_LEN, MAGIC, VERSION};

/// Validate frame payload size against a limit
pub fn validate_frame_size(size: usize, max: usize) -> Result<(), ProtocolError> {
    if size > max {
        return Err(ProtocolError::FrameTooLarge { len: size, max });
    }
    Ok(())
}

/// Build frame header (11 bytes)
/// Format: MAGIC (4) | VERSION (2) | KIND (1) | LENGTH (4)
pub fn build_frame_header(kind: u8, payload_len: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header[6] = kind;
    header[7..11].copy_from_slice(&payload_len.to_le_bytes());
    header
}

/// Parse frame header
/// Returns: (kind, payload_length)
pub fn parse_frame_header(header: &[u8; HEADER_LEN]) -> Result<(u8, u32), ProtocolError> {
    if &header[0..4] != MAGIC {
        return Err(ProtocolError::BadMagic);
    }

    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != VERSION {
        return Err(ProtocolError::VersionMismatch {
            got: version,
            expected: VERSION,
        });
    }

    let kind = header[6];
    let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]);

    Ok((kind, payload_len))
}

/// Header plus payload as one contiguous buffer.
pub fn encode_frame(kind: u8, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&build_frame_header(kind, len));
    out.extend_from_slice(payload);
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: u8,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(Frame),
    /// A frame whose announced length exceeds the limit. Its payload is
    /// discarded as it arrives, so the stream stays in sync.
    Oversized { kind: u8, len: usize },
}

pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_size: usize,
    skipping: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            max_frame_size,
            skipping: 0,
        }
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Buffer for `AsyncReadExt::read_buf`.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// True when no partial frame is pending.
    pub fn is_idle(&self) -> bool {
        self.buf.is_empty() && self.skipping == 0
    }

    fn drain_skipped(&mut self) {
        let n = self.skipping.min(self.buf.len());
        self.buf.advance(n);
        self.skipping -= n;
    }

    /// Pull the next complete frame out of the buffer, if there is one.
    pub fn decode(&mut self) -> Result<Option<Decoded>, ProtocolError> {
        if self.skipping > 0 {
            self.drain_skipped();
            if self.skipping > 0 {
                return Ok(None);
            }
        }
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&self.buf[..HEADER_LEN]);
        let (kind, len) = parse_frame_header(&header)?;
        let len = len as usize;

        if validate_frame_size(len, self.max_frame_size).is_err() {
            self.buf.advance(HEADER_LEN);
            self.skipping = len;
            self.drain_skipped();
            return Ok(Some(Decoded::Oversized { kind, len }));
        }

        let total = HEADER_LEN + len;
        if self.buf.len() < total {
            self.buf.reserve(total - self.buf.len());
            return Ok(None);
        }

        self.buf.advance(HEADER_LEN);
        let payload = self.buf.split_to(len).freeze();
        Ok(Some(Decoded::Frame(Frame { kind, payload })))
    }

    /// Called once the peer has closed its side.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        if self.is_idle() {
            Ok(())
        } else {
            Err(ProtocolError::ConnectionTruncated {
                buffered: self.buf.len(),
            })
        }
    }
}
