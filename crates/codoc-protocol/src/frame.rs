//! Binary sync-channel frames

use crate::error::{ProtocolError, ProtocolResult};
use bytes::{BufMut, Bytes, BytesMut};

/// Maximum frame size (1MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

pub const TAG_SYNC_REQUEST: u8 = 0;
pub const TAG_SYNC_REPLY: u8 = 1;
pub const TAG_AWARENESS: u8 = 2;
pub const TAG_AWARENESS_QUERY: u8 = 3;

/// One sync-channel message.
///
/// Any first byte other than the four known tags means the whole
/// message (tag byte included) is raw CRDT update bytes: update
/// encodings start at byte 0 and are relayed verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Empty payload = "send me full state"; non-empty = the sender's
    /// state vector, asking for a minimal catch-up delta.
    SyncRequest(Vec<u8>),
    /// CRDT update bytes bringing the recipient up to date.
    SyncReply(Vec<u8>),
    /// JSON-encoded presence/cursor payload.
    Awareness(Vec<u8>),
    /// Request for the current presence snapshot; no payload.
    AwarenessQuery,
    /// Raw CRDT update bytes to apply and relay, held verbatim.
    Update(Bytes),
}

impl Frame {
    /// Decode one message from the sync channel.
    pub fn decode(data: &[u8]) -> ProtocolResult<Frame> {
        if data.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }
        if data.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: data.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        Ok(match data[0] {
            TAG_SYNC_REQUEST => Frame::SyncRequest(data[1..].to_vec()),
            TAG_SYNC_REPLY => Frame::SyncReply(data[1..].to_vec()),
            TAG_AWARENESS => Frame::Awareness(data[1..].to_vec()),
            TAG_AWARENESS_QUERY => Frame::AwarenessQuery,
            _ => Frame::Update(Bytes::copy_from_slice(data)),
        })
    }

    /// Encode the frame to bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Encode the frame into an existing buffer.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Frame::SyncRequest(payload) => {
                buf.put_u8(TAG_SYNC_REQUEST);
                buf.put_slice(payload);
            }
            Frame::SyncReply(payload) => {
                buf.put_u8(TAG_SYNC_REPLY);
                buf.put_slice(payload);
            }
            Frame::Awareness(payload) => {
                buf.put_u8(TAG_AWARENESS);
                buf.put_slice(payload);
            }
            Frame::AwarenessQuery => {
                buf.put_u8(TAG_AWARENESS_QUERY);
            }
            // Updates carry their own leading byte
            Frame::Update(bytes) => {
                buf.put_slice(bytes);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_sync_request_empty() {
        let frame = Frame::decode(&[0]).unwrap();
        assert_eq!(frame, Frame::SyncRequest(Vec::new()));
    }

    #[test]
    fn test_decode_sync_request_with_vector() {
        let frame = Frame::decode(&[0, 9, 8, 7]).unwrap();
        assert_eq!(frame, Frame::SyncRequest(vec![9, 8, 7]));
    }

    #[test]
    fn test_decode_awareness_query() {
        assert_eq!(Frame::decode(&[3]).unwrap(), Frame::AwarenessQuery);
    }

    #[test]
    fn test_unrecognized_tag_is_verbatim_update() {
        let raw = [42u8, 1, 2, 3];
        let frame = Frame::decode(&raw).unwrap();
        match &frame {
            Frame::Update(bytes) => assert_eq!(bytes.as_ref(), &raw),
            other => panic!("expected update, got {:?}", other),
        }
        // Re-encoding reproduces the input exactly
        assert_eq!(frame.encode().as_ref(), &raw);
    }

    #[test]
    fn test_empty_frame_is_malformed() {
        assert!(matches!(
            Frame::decode(&[]),
            Err(ProtocolError::EmptyFrame)
        ));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let data = vec![0u8; MAX_FRAME_SIZE + 1];
        assert!(matches!(
            Frame::decode(&data),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_encode_decode_roundtrip_tagged() {
        let frame = Frame::SyncReply(vec![5, 6, 7]);
        assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);

        let frame = Frame::Awareness(b"{\"k\":1}".to_vec());
        assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
    }
}
