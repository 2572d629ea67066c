//! Length-prefix framing.

use crate::net::TcpStream;
use std::io;
use std::time::Duration;

/// Size of the length prefix on every frame.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Frames larger than this are rejected as corrupt.
pub const DEFAULT_MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Encodes one frame: big-endian length prefix followed by the payload.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    assert!(
        u32::try_from(payload.len()).is_ok(),
        "frame payload exceeds u32 length prefix"
    );
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    Head,
    Data(usize),
}

/// Incremental frame decoder over a byte stream.
///
/// Feed raw bytes with [`extend`](Self::extend) and pull complete frames
/// with [`next_frame`](Self::next_frame); partial input yields `None`
/// until the rest arrives.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    state: DecodeState,
    max_frame_len: usize,
}

impl FrameDecoder {
    /// Creates a decoder with the default frame limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Creates a decoder with a custom frame limit.
    #[must_use]
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            state: DecodeState::Head,
            max_frame_len,
        }
    }

    /// Appends raw bytes from the transport.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns true if no partial frame is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty() && matches!(self.state, DecodeState::Head)
    }

    /// Extracts the next complete frame, or `None` if more bytes are
    /// needed.
    pub fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            match self.state {
                DecodeState::Head => {
                    if self.buf.len() < LENGTH_PREFIX_LEN {
                        return Ok(None);
                    }
                    let mut prefix = [0_u8; LENGTH_PREFIX_LEN];
                    prefix.copy_from_slice(&self.buf[..LENGTH_PREFIX_LEN]);
                    let len = u32::from_be_bytes(prefix) as usize;
                    if len > self.max_frame_len {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "frame length exceeds maximum",
                        ));
                    }
                    self.buf.drain(..LENGTH_PREFIX_LEN);
                    self.state = DecodeState::Data(len);
                }
                DecodeState::Data(len) => {
                    if self.buf.len() < len {
                        return Ok(None);
                    }
                    let frame = self.buf.drain(..len).collect();
                    self.state = DecodeState::Head;
                    return Ok(Some(frame));
                }
            }
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes one framed payload to the stream.
pub(crate) async fn write_frame(
    stream: &TcpStream,
    payload: &[u8],
    timeout: Option<Duration>,
) -> io::Result<()> {
    stream.write_all(&encode_frame(payload), timeout).await
}

/// Reads the next complete frame. `Ok(None)` means the peer closed
/// cleanly on a frame boundary.
pub(crate) async fn read_frame(
    stream: &TcpStream,
    decoder: &mut FrameDecoder,
    timeout: Option<Duration>,
) -> io::Result<Option<Vec<u8>>> {
    loop {
        if let Some(frame) = decoder.next_frame()? {
            return Ok(Some(frame));
        }
        let mut chunk = [0_u8; 4096];
        let n = stream.read(&mut chunk, timeout).await?;
        if n == 0 {
            return if decoder.is_empty() {
                Ok(None)
            } else {
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed mid-frame",
                ))
            };
        }
        decoder.extend(&chunk[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&encode_frame(b"hello"));
        let frame = decoder.next_frame().expect("decode").expect("complete");
        assert_eq!(frame, b"hello");
        assert!(decoder.is_empty());
    }

    #[test]
    fn partial_input_yields_none_until_complete() {
        let mut decoder = FrameDecoder::new();
        let encoded = encode_frame(b"hello");

        decoder.extend(&encoded[..3]);
        assert!(decoder.next_frame().expect("decode").is_none());

        decoder.extend(&encoded[3..6]);
        assert!(decoder.next_frame().expect("decode").is_none());

        decoder.extend(&encoded[6..]);
        let frame = decoder.next_frame().expect("decode").expect("complete");
        assert_eq!(frame, b"hello");
    }

    #[test]
    fn multiple_frames_in_one_read() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = encode_frame(b"one");
        bytes.extend_from_slice(&encode_frame(b"two"));
        decoder.extend(&bytes);

        assert_eq!(decoder.next_frame().unwrap().unwrap(), b"one");
        assert_eq!(decoder.next_frame().unwrap().unwrap(), b"two");
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut decoder = FrameDecoder::with_max_frame_len(4);
        decoder.extend(&encode_frame(b"toolong"));
        let err = decoder.next_frame().expect_err("must reject");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn empty_payload_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&encode_frame(b""));
        let frame = decoder.next_frame().expect("decode").expect("complete");
        assert!(frame.is_empty());
    }
}
