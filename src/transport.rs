//! Framed reader/writer over any async byte stream.

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec;
use crate::error::ProtocolError;
use crate::protocol_core::{build_frame_header, Decoded, FrameDecoder};

pub struct FramedStream<S> {
    stream: S,
    decoder: FrameDecoder,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, max_frame_size: usize) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(max_frame_size),
        }
    }

    /// Next complete frame, or `None` once the peer closed cleanly.
    ///
    /// Cancel safe: bytes already read stay in the decoder, so dropping this
    /// future (e.g. in a `select!`) loses nothing.
    pub async fn read_frame(&mut self) -> Result<Option<Decoded>, ProtocolError> {
        loop {
            if let Some(decoded) = self.decoder.decode()? {
                return Ok(Some(decoded));
            }
            let n = self.stream.read_buf(self.decoder.buffer_mut()).await?;
            if n == 0 {
                self.decoder.finish()?;
                return Ok(None);
            }
        }
    }

    pub async fn write_frame(&mut self, kind: u8, payload: &[u8]) -> Result<(), ProtocolError> {
        let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
            len: payload.len(),
            max: u32::MAX as usize,
        })?;
        let hdr = build_frame_header(kind, len);
        self.stream.write_all(&hdr).await?;
        if !payload.is_empty() {
            self.stream.write_all(payload).await?;
        }
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn send<T: Serialize>(&mut self, kind: u8, value: &T) -> Result<(), ProtocolError> {
        let payload = codec::encode(value)?;
        self.write_frame(kind, &payload).await
    }

    /// True when no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.decoder.is_idle()
    }

    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_frames_survive_small_pipe() {
        // A 64-byte pipe forces both sides to move every frame in pieces.
        let (a, b) = duplex(64);
        let mut tx = FramedStream::new(a, 1 << 20);
        let mut rx = FramedStream::new(b, 1 << 20);

        let big = vec![7u8; 10_000];
        let writer = tokio::spawn(async move {
            tx.write_frame(frame::REQUEST, &big).await.unwrap();
            tx.write_frame(frame::REQUEST, b"second").await.unwrap();
        });

        match rx.read_frame().await.unwrap() {
            Some(Decoded::Frame(f)) => assert_eq!(f.payload.len(), 10_000),
            other => panic!("unexpected: {:?}", other),
        }
        match rx.read_frame().await.unwrap() {
            Some(Decoded::Frame(f)) => assert_eq!(&f.payload[..], b"second"),
            other => panic!("unexpected: {:?}", other),
        }
        writer.await.unwrap();
        assert!(rx.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_peer_close_mid_frame() {
        let (mut a, b) = duplex(1024);
        let mut rx = FramedStream::new(b, 1024);
        let hdr = build_frame_header(frame::REQUEST, 100);
        a.write_all(&hdr).await.unwrap();
        a.write_all(b"partial").await.unwrap();
        drop(a);

        assert!(matches!(
            rx.read_frame().await,
            Err(ProtocolError::ConnectionTruncated { .. })
        ));
    }
}
