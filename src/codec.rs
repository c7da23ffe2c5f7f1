//! Length-prefixed protobuf framing (spec §4.1).
//!
//! Each frame on the socket is a big-endian u32 `N` followed by exactly `N`
//! bytes of a protobuf `CastMessage`. This is the async successor of the
//! teacher's `tokio-codec`-based `Decoder`/`Encoder` pair, ported to
//! `tokio_util::codec` and the current `protobuf` crate without otherwise
//! changing the framing logic.

use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut, BytesMut};
use protobuf::{CodedOutputStream, Message};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::proto;

/// Protobuf header is a big-endian u32.
const HEADER_LENGTH: usize = 4;
/// Max message size is [64KB](https://developers.google.com/cast/docs/reference/messages).
const MAX_PAYLOAD_LENGTH: usize = 64 << 10;

/// Failure encoding or decoding a length-prefixed `CastMessage` frame.
#[derive(Debug, Error)]
pub enum WireError {
    /// A peer (or we) tried to send/receive a payload over the 64KiB cap.
    #[error("frame of {0} bytes exceeds the 64KiB CASTV2 payload limit")]
    FrameTooLarge(usize),
    /// Protobuf encode/decode failure.
    #[error("protobuf error: {0}")]
    Protobuf(#[from] protobuf::ProtobufError),
    /// Underlying socket I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decode phase, tracked so the decoder never drops bytes out of
/// `BytesMut` when a frame spans multiple reads.
#[derive(Debug)]
enum DecodeState {
    /// Waiting to read a u32 representing the size of the next protobuf.
    Header,
    /// Reading a protobuf payload of a known length.
    Payload(usize),
}

impl Default for DecodeState {
    fn default() -> Self {
        DecodeState::Header
    }
}

/// `tokio_util::codec` pair for the CASTV2 length-prefixed protobuf frame.
/// One `CastMessageCodec` is created per TLS socket.
#[derive(Debug, Default)]
pub struct CastMessageCodec {
    state: DecodeState,
}

impl CastMessageCodec {
    fn decode_header(&mut self, src: &mut BytesMut) -> Result<Option<usize>, WireError> {
        if src.len() < HEADER_LENGTH {
            src.reserve(HEADER_LENGTH - src.len());
            return Ok(None);
        }
        let header = src.split_to(HEADER_LENGTH);
        let length = BigEndian::read_u32(&header) as usize;
        if length > MAX_PAYLOAD_LENGTH {
            return Err(WireError::FrameTooLarge(length));
        }
        src.reserve(length);
        Ok(Some(length))
    }
}

impl Decoder for CastMessageCodec {
    type Item = proto::CastMessage;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let n = match self.state {
            DecodeState::Header => match self.decode_header(src)? {
                Some(n) => n,
                None => return Ok(None),
            },
            DecodeState::Payload(n) => n,
        };
        self.state = DecodeState::Payload(n);

        if src.len() < n {
            return Ok(None);
        }
        let payload = src.split_to(n);
        self.state = DecodeState::Header;
        src.reserve(HEADER_LENGTH);

        let message = protobuf::parse_from_bytes::<proto::CastMessage>(&payload)?;
        trace!(
            "codec decoded frame in namespace {}",
            message.get_namespace()
        );
        Ok(Some(message))
    }
}

impl Encoder<proto::CastMessage> for CastMessageCodec {
    type Error = WireError;

    fn encode(&mut self, item: proto::CastMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut buf = Vec::new();
        {
            let mut output = CodedOutputStream::new(&mut buf);
            item.write_to(&mut output)?;
            output.flush()?;
        }

        if buf.len() > MAX_PAYLOAD_LENGTH {
            return Err(WireError::FrameTooLarge(buf.len()));
        }

        let mut header = [0u8; HEADER_LENGTH];
        BigEndian::write_u32(&mut header, buf.len() as u32);

        dst.reserve(HEADER_LENGTH + buf.len());
        dst.put_slice(&header);
        dst.put_slice(&buf);
        Ok(())
    }
}

/// Borrow the UTF-8 payload of a frame. Non-STRING payloads return `None`;
/// non-dict JSON payloads are the caller's responsibility to drop
/// (spec §4.1) once parsed.
pub fn payload_utf8(message: &proto::CastMessage) -> Option<&str> {
    if message.get_payload_type() == proto::CastMessage_PayloadType::STRING {
        Some(message.get_payload_utf8())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{CastMessage_PayloadType, CastMessage_ProtocolVersion};

    fn sample_message() -> proto::CastMessage {
        let mut msg = proto::CastMessage::new();
        msg.set_protocol_version(CastMessage_ProtocolVersion::CASTV2_1_0);
        msg.set_source_id("sender-0".to_owned());
        msg.set_destination_id("receiver-0".to_owned());
        msg.set_namespace("urn:x-cast:com.google.cast.tp.heartbeat".to_owned());
        msg.set_payload_type(CastMessage_PayloadType::STRING);
        msg.set_payload_utf8(r#"{"type":"PING"}"#.to_owned());
        msg
    }

    #[test]
    fn round_trips_a_frame() {
        let mut codec = CastMessageCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(sample_message(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().expect("one frame");
        assert_eq!(decoded.get_namespace(), sample_message().get_namespace());
        assert_eq!(decoded.get_payload_utf8(), r#"{"type":"PING"}"#);
    }

    #[test]
    fn tolerates_fragmentation_across_reads() {
        let mut codec = CastMessageCodec::default();
        let mut whole = BytesMut::new();
        codec.encode(sample_message(), &mut whole).unwrap();

        // Split the encoded frame into two chunks arriving on separate reads.
        let split_at = whole.len() / 2;
        let mut partial = whole.split_to(split_at);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(whole);
        let decoded = codec.decode(&mut partial).unwrap().expect("completed frame");
        assert_eq!(decoded.get_namespace(), sample_message().get_namespace());
    }

    #[test]
    fn rejects_oversized_frame_header() {
        let mut codec = CastMessageCodec::default();
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_PAYLOAD_LENGTH as u32 + 1);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge(_)));
    }
}
