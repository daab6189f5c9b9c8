//! Datagram Codecs
//!
//! Turns envelopes into datagram bytes and back. The transport is generic
//! over `Codec`, so a binary encoding can replace JSON without touching
//! retry or dedup logic.

use crate::network::protocol::Envelope;

/// Encoding errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode datagram: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("encoded envelope is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },
}

/// Envelope ↔ bytes.
pub trait Codec {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError>;

    /// Parse one datagram. Any error means the datagram is malformed.
    fn decode(&self, bytes: &[u8]) -> Result<Envelope, CodecError>;
}

/// One UTF-8 JSON object per datagram.
#[derive(Debug, Clone, Copy)]
pub struct JsonCodec {
    max_size: usize,
}

impl JsonCodec {
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new(65_507)
    }
}

impl Codec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        let bytes = serde_json::to_vec(envelope).map_err(CodecError::Encode)?;
        if bytes.len() > self.max_size {
            return Err(CodecError::TooLarge { size: bytes.len(), max: self.max_size });
        }
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_bytes() {
        let codec = JsonCodec::default();
        let bytes = codec.encode(&Envelope::ack(3)).unwrap();
        assert_eq!(bytes, br#"{"type":"ACK","seq":3}"#);
        assert_eq!(codec.decode(&bytes).unwrap(), Envelope::ack(3));
    }

    #[test]
    fn test_malformed_datagrams() {
        let codec = JsonCodec::default();
        for bad in [
            &b"not json"[..],
            &b"[1,2,3]"[..],
            &br#"{"type":"JOIN"}"#[..],
            &br#"{"type":"JOIN","seq":"one"}"#[..],
            &br#"{"type":"JOIN","seq":-1}"#[..],
            &br#"{"seq":4}"#[..],
            &[0xff, 0xfe, 0x00][..],
        ] {
            assert!(matches!(codec.decode(bad), Err(CodecError::Decode(_))), "{:?}", bad);
        }
    }

    #[test]
    fn test_size_limit() {
        let codec = JsonCodec::new(16);
        let envelope = Envelope {
            scope: Some(serde_json::json!("MultiplayerLobby")),
            kind: "SAME_DATA".into(),
            seq: 1,
            data: Some(serde_json::json!({"msg": "name already taken"})),
        };
        assert!(matches!(codec.encode(&envelope), Err(CodecError::TooLarge { max: 16, .. })));
    }
}
