//! Frame encoding and decoding for the PeerLink wire protocol.
//!
//! Every frame on a session is length-prefixed:
//!
//! ```text
//! +----------------+--------+-----------------------+
//! | length (u32BE) | tag u8 | payload (length - 1)  |
//! +----------------+--------+-----------------------+
//! ```
//!
//! `length` counts the tag byte plus the payload. All multi-byte fields are
//! big-endian (network byte order).

use crate::error::FrameError;
use crate::{FRAME_HEADER_SIZE, LENGTH_PREFIX_SIZE};
use peerlink_files::{CHECKSUM_LEN, Checksum};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frame types carried on a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Username exchange when a session opens
    Handshake = 0x01,
    /// UTF-8 chat message
    Message = 0x02,
    /// Start of a file: declared size and name
    FileMeta = 0x03,
    /// Raw file bytes
    FileChunk = 0x04,
    /// End of a file: checksum of everything sent
    FileEnd = 0x05,
    /// Liveness probe
    Ping = 0x06,
    /// Response to PING
    Pong = 0x07,
    /// Graceful session teardown
    Close = 0x08,
}

impl FrameType {
    /// Lowercase name used in logs and errors
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::Message => "message",
            Self::FileMeta => "file-meta",
            Self::FileChunk => "file-chunk",
            Self::FileEnd => "file-end",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Close => "close",
        }
    }
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Handshake),
            0x02 => Ok(Self::Message),
            0x03 => Ok(Self::FileMeta),
            0x04 => Ok(Self::FileChunk),
            0x05 => Ok(Self::FileEnd),
            0x06 => Ok(Self::Ping),
            0x07 => Ok(Self::Pong),
            0x08 => Ok(Self::Close),
            _ => Err(FrameError::InvalidFrameType(value)),
        }
    }
}

/// Handshake payload, JSON encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Sender's username
    pub username: String,
    /// Whether the sender accepts the session
    pub accepted: bool,
    /// Rejection reason when `accepted` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Handshake {
    /// Initiator hello, or responder acceptance
    #[must_use]
    pub fn accept(username: &str) -> Self {
        Self {
            username: username.to_string(),
            accepted: true,
            reason: None,
        }
    }

    /// Responder rejection
    #[must_use]
    pub fn reject(username: &str, reason: &str) -> Self {
        Self {
            username: username.to_string(),
            accepted: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// Announced file, parsed from a FILE_META payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// Declared size in bytes
    pub size: u64,
    /// File name as sent (not yet sanitized)
    pub name: String,
}

/// A single protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    frame_type: FrameType,
    payload: Vec<u8>,
}

impl Frame {
    /// Create a frame from a type and raw payload
    #[must_use]
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            payload,
        }
    }

    /// HANDSHAKE frame
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake cannot be serialized.
    pub fn handshake(handshake: &Handshake) -> Result<Self, FrameError> {
        let payload = serde_json::to_vec(handshake)
            .map_err(|e| FrameError::malformed("handshake", e.to_string()))?;
        Ok(Self::new(FrameType::Handshake, payload))
    }

    /// MESSAGE frame
    #[must_use]
    pub fn message(text: &str) -> Self {
        Self::new(FrameType::Message, text.as_bytes().to_vec())
    }

    /// FILE_META frame: 8-byte size followed by the UTF-8 name
    #[must_use]
    pub fn file_meta(name: &str, size: u64) -> Self {
        let mut payload = Vec::with_capacity(8 + name.len());
        payload.extend_from_slice(&size.to_be_bytes());
        payload.extend_from_slice(name.as_bytes());
        Self::new(FrameType::FileMeta, payload)
    }

    /// FILE_CHUNK frame
    #[must_use]
    pub fn file_chunk(data: &[u8]) -> Self {
        Self::new(FrameType::FileChunk, data.to_vec())
    }

    /// FILE_END frame carrying the whole-file checksum
    #[must_use]
    pub fn file_end(checksum: &Checksum) -> Self {
        Self::new(FrameType::FileEnd, checksum.as_bytes().to_vec())
    }

    /// PING frame
    #[must_use]
    pub fn ping(nonce: u64) -> Self {
        Self::new(FrameType::Ping, nonce.to_be_bytes().to_vec())
    }

    /// PONG frame echoing a ping nonce
    #[must_use]
    pub fn pong(nonce: u64) -> Self {
        Self::new(FrameType::Pong, nonce.to_be_bytes().to_vec())
    }

    /// CLOSE frame with an optional reason
    #[must_use]
    pub fn close(reason: Option<&str>) -> Self {
        Self::new(
            FrameType::Close,
            reason.map(|r| r.as_bytes().to_vec()).unwrap_or_default(),
        )
    }

    /// Frame type
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    /// Payload bytes
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the frame, returning its payload
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Total encoded size, header included
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Encode to wire format
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self) -> Vec<u8> {
        let body_len = (1 + self.payload.len()) as u32;
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&body_len.to_be_bytes());
        buf.push(self.frame_type as u8);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode one frame from the front of `buf`
    ///
    /// Returns `Ok(None)` if `buf` does not yet hold a complete frame, or the
    /// frame plus the number of bytes it consumed.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero length, a length over `max_frame_size` or
    /// an unknown type tag.
    pub fn decode(buf: &[u8], max_frame_size: usize) -> Result<Option<(Self, usize)>, FrameError> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let body_len = body_len_from_prefix(&buf[..LENGTH_PREFIX_SIZE], max_frame_size)?;
        let total = LENGTH_PREFIX_SIZE + body_len;
        if buf.len() < total {
            return Ok(None);
        }

        let frame_type = FrameType::try_from(buf[LENGTH_PREFIX_SIZE])?;
        let payload = buf[FRAME_HEADER_SIZE..total].to_vec();
        Ok(Some((Self::new(frame_type, payload), total)))
    }

    /// Parse a HANDSHAKE payload
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a JSON handshake object.
    pub fn parse_handshake(&self) -> Result<Handshake, FrameError> {
        self.expect_type(FrameType::Handshake)?;
        serde_json::from_slice(&self.payload)
            .map_err(|e| FrameError::malformed("handshake", e.to_string()))
    }

    /// Parse a MESSAGE or CLOSE payload as text
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not valid UTF-8.
    pub fn parse_text(&self) -> Result<String, FrameError> {
        String::from_utf8(self.payload.clone())
            .map_err(|_| FrameError::malformed(self.frame_type.name(), "invalid UTF-8"))
    }

    /// Parse a FILE_META payload
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is shorter than the size field or the
    /// name is not UTF-8.
    pub fn parse_file_meta(&self) -> Result<FileMeta, FrameError> {
        self.expect_type(FrameType::FileMeta)?;
        if self.payload.len() < 8 {
            return Err(FrameError::TooShort {
                expected: 8,
                actual: self.payload.len(),
            });
        }
        let (size_bytes, name_bytes) = self.payload.split_at(8);
        let size = u64::from_be_bytes(read_array(size_bytes)?);
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| FrameError::malformed("file-meta", "name is not UTF-8"))?
            .to_string();
        Ok(FileMeta { size, name })
    }

    /// Parse a FILE_END payload
    ///
    /// # Errors
    ///
    /// Returns an error unless the payload is exactly one checksum.
    pub fn parse_checksum(&self) -> Result<Checksum, FrameError> {
        self.expect_type(FrameType::FileEnd)?;
        Checksum::from_slice(&self.payload).ok_or_else(|| {
            FrameError::malformed(
                "file-end",
                format!("expected {CHECKSUM_LEN} bytes, got {}", self.payload.len()),
            )
        })
    }

    /// Parse a PING or PONG nonce
    ///
    /// # Errors
    ///
    /// Returns an error unless the payload is exactly 8 bytes.
    pub fn parse_nonce(&self) -> Result<u64, FrameError> {
        if self.payload.len() != 8 {
            return Err(FrameError::malformed(
                self.frame_type.name(),
                format!("nonce must be 8 bytes, got {}", self.payload.len()),
            ));
        }
        Ok(u64::from_be_bytes(read_array(&self.payload)?))
    }

    fn expect_type(&self, expected: FrameType) -> Result<(), FrameError> {
        if self.frame_type == expected {
            Ok(())
        } else {
            Err(FrameError::malformed(
                expected.name(),
                format!("got {} frame", self.frame_type.name()),
            ))
        }
    }
}

fn read_array(bytes: &[u8]) -> Result<[u8; 8], FrameError> {
    bytes.try_into().map_err(|_| FrameError::TooShort {
        expected: 8,
        actual: bytes.len(),
    })
}

fn body_len_from_prefix(prefix: &[u8], max_frame_size: usize) -> Result<usize, FrameError> {
    let raw: [u8; LENGTH_PREFIX_SIZE] = prefix.try_into().map_err(|_| FrameError::TooShort {
        expected: LENGTH_PREFIX_SIZE,
        actual: prefix.len(),
    })?;
    let body_len = u32::from_be_bytes(raw) as usize;

    if body_len == 0 {
        return Err(FrameError::TooShort {
            expected: 1,
            actual: 0,
        });
    }
    if body_len > max_frame_size {
        return Err(FrameError::TooLarge {
            size: body_len,
            max: max_frame_size,
        });
    }
    Ok(body_len)
}

/// Read one frame from a byte stream
///
/// Returns `Ok(None)` on a clean end of stream at a frame boundary. The
/// length prefix is checked against `max_frame_size` before the body is
/// allocated.
///
/// # Errors
///
/// Returns `Truncated` if the stream ends mid-frame, plus any decode or I/O
/// error.
pub async fn read_frame<R>(
    reader: &mut R,
    max_frame_size: usize,
) -> Result<Option<Frame>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_SIZE {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(FrameError::Truncated)
            };
        }
        filled += n;
    }

    let body_len = body_len_from_prefix(&prefix, max_frame_size)?;
    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::Truncated
        } else {
            FrameError::Io(e)
        }
    })?;

    let frame_type = FrameType::try_from(body[0])?;
    body.remove(0);
    Ok(Some(Frame::new(frame_type, body)))
}

/// Write one frame and flush it
///
/// # Errors
///
/// Returns any I/O error from the underlying writer.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAX_FRAME_SIZE;
    use peerlink_files::checksum;

    #[test]
    fn test_encode_layout() {
        let frame = Frame::message("hi");
        let bytes = frame.encode();
        assert_eq!(bytes, vec![0, 0, 0, 3, 0x02, b'h', b'i']);
        assert_eq!(bytes.len(), frame.encoded_len());
    }

    #[test]
    fn test_decode_partial_then_complete() {
        let bytes = Frame::ping(42).encode();
        for cut in 0..bytes.len() {
            assert!(Frame::decode(&bytes[..cut], MAX_FRAME_SIZE).unwrap().is_none());
        }
        let (frame, used) = Frame::decode(&bytes, MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(frame.parse_nonce().unwrap(), 42);
    }

    #[test]
    fn test_decode_two_frames_back_to_back() {
        let mut bytes = Frame::message("one").encode();
        bytes.extend(Frame::message("two").encode());

        let (first, used) = Frame::decode(&bytes, MAX_FRAME_SIZE).unwrap().unwrap();
        let (second, _) = Frame::decode(&bytes[used..], MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(first.parse_text().unwrap(), "one");
        assert_eq!(second.parse_text().unwrap(), "two");
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let bytes = [0, 0, 0, 1, 0x7F];
        assert!(matches!(
            Frame::decode(&bytes, MAX_FRAME_SIZE),
            Err(FrameError::InvalidFrameType(0x7F))
        ));
        assert!(FrameType::try_from(0x00).is_err());
    }

    #[test]
    fn test_decode_rejects_oversized_and_empty() {
        let oversized = 2_000_000u32.to_be_bytes();
        assert!(matches!(
            Frame::decode(&oversized, MAX_FRAME_SIZE),
            Err(FrameError::TooLarge { size: 2_000_000, .. })
        ));
        assert!(Frame::decode(&[0, 0, 0, 0], MAX_FRAME_SIZE).is_err());
    }

    #[test]
    fn test_file_meta_payload() {
        let frame = Frame::file_meta("report.pdf", 12_345);
        assert_eq!(&frame.payload()[..8], &12_345u64.to_be_bytes());

        let meta = frame.parse_file_meta().unwrap();
        assert_eq!(meta.size, 12_345);
        assert_eq!(meta.name, "report.pdf");

        let short = Frame::new(FrameType::FileMeta, vec![0; 4]);
        assert!(short.parse_file_meta().is_err());
    }

    #[test]
    fn test_file_end_checksum() {
        let sum = checksum(b"contents");
        assert_eq!(Frame::file_end(&sum).parse_checksum().unwrap(), sum);
        assert!(Frame::new(FrameType::FileEnd, vec![0; 16]).parse_checksum().is_err());
    }

    #[test]
    fn test_handshake_json() {
        let frame = Frame::handshake(&Handshake::reject("bob", "collision")).unwrap();
        let value: serde_json::Value = serde_json::from_slice(frame.payload()).unwrap();
        assert_eq!(value["username"], "bob");
        assert_eq!(value["accepted"], false);
        assert_eq!(value["reason"], "collision");

        let parsed = frame.parse_handshake().unwrap();
        assert_eq!(parsed, Handshake::reject("bob", "collision"));
        assert!(Frame::message("x").parse_handshake().is_err());
    }

    #[test]
    fn test_close_reason_optional() {
        assert!(Frame::close(None).payload().is_empty());
        assert_eq!(Frame::close(Some("bye")).parse_text().unwrap(), "bye");
    }

    #[tokio::test]
    async fn test_stream_read_write() {
        let (mut a, mut b) = tokio::io::duplex(64);

        let writer = tokio::spawn(async move {
            write_frame(&mut a, &Frame::message("hello")).await.unwrap();
            write_frame(&mut a, &Frame::file_chunk(&[9u8; 200])).await.unwrap();
        });

        let first = read_frame(&mut b, MAX_FRAME_SIZE).await.unwrap().unwrap();
        let second = read_frame(&mut b, MAX_FRAME_SIZE).await.unwrap().unwrap();
        writer.await.unwrap();

        assert_eq!(first.parse_text().unwrap(), "hello");
        assert_eq!(second.payload(), &[9u8; 200][..]);
        assert!(read_frame(&mut b, MAX_FRAME_SIZE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stream_truncated_mid_frame() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let bytes = Frame::message("cut short").encode();
        a.write_all(&bytes[..6]).await.unwrap();
        drop(a);

        assert!(matches!(
            read_frame(&mut b, MAX_FRAME_SIZE).await,
            Err(FrameError::Truncated)
        ));
    }

    #[tokio::test]
    async fn test_stream_rejects_oversized_before_allocating() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&u32::MAX.to_be_bytes()).await.unwrap();

        assert!(matches!(
            read_frame(&mut b, 1024).await,
            Err(FrameError::TooLarge { .. })
        ));
    }
}
