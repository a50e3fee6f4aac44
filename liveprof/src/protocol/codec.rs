//! Length-prefixed frames.
//!
//! ```text
//!   ┌──────────────┬───────────────────────────────┐
//!   │ len: u32 BE  │ payload: len bytes (JSON)     │
//!   └──────────────┴───────────────────────────────┘
//! ```
//!
//! A stream that ends inside a frame is reported as a clean end of stream,
//! never as a partial frame.

use bytes::{BufMut, Bytes, BytesMut};
use liveprof_common::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::domain::ProtocolError;

/// Width of the big-endian length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Largest payload either side accepts.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Prefix `payload` with its length.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes, ProtocolError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge(payload.len()))?;
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX + payload.len());
    buf.put_u32(len);
    buf.extend_from_slice(payload);
    Ok(buf.freeze())
}

pub fn encode_message(message: &Message) -> Result<Bytes, ProtocolError> {
    encode_frame(&serde_json::to_vec(message)?)
}

pub fn decode_message(payload: &[u8]) -> Result<Message, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Read one complete frame payload. `Ok(None)` once the stream has ended,
/// including when it ends in the middle of a frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Bytes>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX];
    if !read_full(reader, &mut prefix).await? {
        return Ok(None);
    }
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload).await? {
        return Ok(None);
    }
    Ok(Some(Bytes::from(payload)))
}

async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<bool, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Write an already encoded frame and flush it.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}

/// [`Message`] codec for `FramedRead`/`FramedWrite`.
#[derive(Debug)]
pub struct StatsCodec {
    frames: LengthDelimitedCodec,
}

impl Default for StatsCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsCodec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: LengthDelimitedCodec::builder()
                .big_endian()
                .length_field_length(LENGTH_PREFIX)
                .max_frame_length(MAX_FRAME_LEN)
                .new_codec(),
        }
    }
}

impl Decoder for StatsCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
        if let Some(prefix) = src.get(..LENGTH_PREFIX) {
            let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
            if len > MAX_FRAME_LEN {
                return Err(ProtocolError::FrameTooLarge(len));
            }
        }
        match self.frames.decode(src)? {
            Some(frame) => decode_message(&frame).map(Some),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }
        // Truncated trailing frame: the peer went away
        src.clear();
        Ok(None)
    }
}

impl Encoder<Message> for StatsCodec {
    type Error = ProtocolError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let payload = serde_json::to_vec(&message)?;
        if payload.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(payload.len()));
        }
        self.frames.encode(Bytes::from(payload), dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liveprof_common::{StatNode, StatsSnapshot};
    use std::time::{Duration, SystemTime};

    fn stats_message() -> Message {
        Message::Stats {
            snapshot: StatsSnapshot::new(1, 0.25, 0.5, vec![StatNode::leaf("a", 1, 0.5)]),
            captured_at: SystemTime::UNIX_EPOCH + Duration::from_millis(1_700_000_000_123),
        }
    }

    #[test]
    fn test_encode_frame_prefixes_length() {
        let frame = encode_frame(b"hello").unwrap();
        assert_eq!(&frame[..4], &[0, 0, 0, 5]);
        assert_eq!(&frame[4..], b"hello");
    }

    #[test]
    fn test_empty_payload_is_a_valid_frame() {
        let frame = encode_frame(b"").unwrap();
        assert_eq!(frame.as_ref(), &[0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_read_frame_waits_for_split_writes() {
        let frame = encode_message(&stats_message()).unwrap();
        let (mut tx, mut rx) = tokio::io::duplex(8);
        let writer = tokio::spawn(async move {
            for chunk in frame.chunks(3) {
                tx.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
        });
        let payload = read_frame(&mut rx).await.unwrap().unwrap();
        assert_eq!(decode_message(&payload).unwrap(), stats_message());
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_truncated_frame_reads_as_end_of_stream() {
        let frame = encode_frame(b"0123456789").unwrap();
        let mut reader: &[u8] = &frame[..7];
        assert!(read_frame(&mut reader).await.unwrap().is_none());

        let mut prefix_only: &[u8] = &frame[..2];
        assert!(read_frame(&mut prefix_only).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_prefix_is_rejected() {
        let mut reader: &[u8] = &[0xff, 0xff, 0xff, 0xff];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge(_)));
    }

    #[test]
    fn test_codec_decodes_wire_frames() {
        let mut codec = StatsCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_message(&Message::hello("span")).unwrap());
        let stats = encode_message(&stats_message()).unwrap();
        buf.extend_from_slice(&stats[..10]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::hello("span")));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&stats[10..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(stats_message()));
    }

    #[test]
    fn test_codec_eof_drops_partial_frame() {
        let mut codec = StatsCodec::new();
        let stats = encode_message(&stats_message()).unwrap();
        let mut buf = BytesMut::from(&stats[..stats.len() - 1]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_encoder_matches_encode_message() {
        let mut codec = StatsCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(stats_message(), &mut buf).unwrap();
        assert_eq!(buf.freeze(), encode_message(&stats_message()).unwrap());
    }

    #[test]
    fn test_garbage_payload_is_protocol_error() {
        let mut codec = StatsCodec::new();
        let mut buf = BytesMut::from(encode_frame(b"{not json").unwrap().as_ref());
        assert!(matches!(codec.decode(&mut buf), Err(ProtocolError::Payload(_))));
    }
}
