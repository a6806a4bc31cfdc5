//! Peer wire messages and their length-prefixed framing.
//!
//! After the handshake, every message on the wire is a 4-byte big-endian
//! length prefix followed by that many payload bytes. A zero length is a
//! keep-alive; otherwise the first payload byte is the message id.
//!
//! TCP gives no message boundaries, so decoding runs over a persistent
//! per-connection buffer: [`MessageCodec`] implements the tokio-util
//! `Decoder`/`Encoder` pair and never assumes a frame arrives in one read.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound on a frame body. The largest legitimate message is a `piece`
/// carrying a 16 KiB block plus nine bytes of header.
const MAX_MESSAGE_LENGTH: usize = 1 << 16;

/// A peer wire protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Zero-length frame. Signals liveness, causes no state change.
    KeepAlive,
    /// The sender will not honor our requests for now.
    Choke,
    /// The sender will honor our requests again.
    Unchoke,
    Interested,
    NotInterested,
    /// The sender acquired and verified the given piece.
    Have(u32),
    /// Sent once after the handshake: one bit per piece, high bit of the
    /// first byte is piece 0. Spare trailing bits are zero.
    Bitfield(Vec<u8>),
    /// Ask for `length` bytes at offset `begin` inside piece `index`.
    Request { index: u32, begin: u32, length: u32 },
    /// A block of data: offset `begin` inside piece `index`.
    Piece {
        index: u32,
        begin: u32,
        block: Vec<u8>,
    },
    /// Withdraw an earlier request; same payload layout as `Request`.
    Cancel { index: u32, begin: u32, length: u32 },
    /// A message id this client does not know. Carried so the session loop
    /// can skip it and keep the stream in sync.
    Unknown(u8),
}

impl Message {
    /// Serializes the message as it appears on the wire, length prefix
    /// included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        match self {
            Message::KeepAlive => {}
            Message::Choke => payload.push(0),
            Message::Unchoke => payload.push(1),
            Message::Interested => payload.push(2),
            Message::NotInterested => payload.push(3),
            Message::Have(index) => {
                payload.push(4);
                payload.extend_from_slice(&index.to_be_bytes());
            }
            Message::Bitfield(bits) => {
                payload.push(5);
                payload.extend_from_slice(bits);
            }
            Message::Request {
                index,
                begin,
                length,
            } => {
                payload.push(6);
                payload.extend_from_slice(&index.to_be_bytes());
                payload.extend_from_slice(&begin.to_be_bytes());
                payload.extend_from_slice(&length.to_be_bytes());
            }
            Message::Piece {
                index,
                begin,
                block,
            } => {
                payload.push(7);
                payload.extend_from_slice(&index.to_be_bytes());
                payload.extend_from_slice(&begin.to_be_bytes());
                payload.extend_from_slice(block);
            }
            Message::Cancel {
                index,
                begin,
                length,
            } => {
                payload.push(8);
                payload.extend_from_slice(&index.to_be_bytes());
                payload.extend_from_slice(&begin.to_be_bytes());
                payload.extend_from_slice(&length.to_be_bytes());
            }
            Message::Unknown(id) => payload.push(*id),
        }

        let mut bytes = Vec::with_capacity(4 + payload.len());
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&payload);
        bytes
    }

    /// Parses one frame body (the bytes after the length prefix). An empty
    /// body is a keep-alive.
    pub fn from_bytes(body: &[u8]) -> Result<Self, std::io::Error> {
        let Some((&id, rest)) = body.split_first() else {
            return Ok(Message::KeepAlive);
        };

        let malformed = |what: &str| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("malformed {what} message"),
            )
        };

        Ok(match id {
            0 => Message::Choke,
            1 => Message::Unchoke,
            2 => Message::Interested,
            3 => Message::NotInterested,
            4 => {
                let index = rest.try_into().map_err(|_| malformed("have"))?;
                Message::Have(u32::from_be_bytes(index))
            }
            5 => Message::Bitfield(rest.to_vec()),
            6 | 8 => {
                let fields: [u8; 12] = rest.try_into().map_err(|_| malformed("request"))?;
                let index = u32::from_be_bytes(fields[0..4].try_into().unwrap());
                let begin = u32::from_be_bytes(fields[4..8].try_into().unwrap());
                let length = u32::from_be_bytes(fields[8..12].try_into().unwrap());
                if id == 6 {
                    Message::Request {
                        index,
                        begin,
                        length,
                    }
                } else {
                    Message::Cancel {
                        index,
                        begin,
                        length,
                    }
                }
            }
            7 => {
                if rest.len() < 8 {
                    return Err(malformed("piece"));
                }
                Message::Piece {
                    index: u32::from_be_bytes(rest[0..4].try_into().unwrap()),
                    begin: u32::from_be_bytes(rest[4..8].try_into().unwrap()),
                    block: rest[8..].to_vec(),
                }
            }
            id => Message::Unknown(id),
        })
    }
}

/// Length-prefixed frame codec for a peer connection.
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            // Not enough bytes to read the length prefix.
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length == 0 {
            src.advance(4);
            return Ok(Some(Message::KeepAlive));
        }

        // Refuse frames no valid message can produce before buffering them.
        if length > MAX_MESSAGE_LENGTH {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("frame of length {length} is too large"),
            ));
        }

        if src.len() < 4 + length {
            // The full frame has not arrived yet; reserving up front saves
            // reallocation while the remainder trickles in.
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        let message = Message::from_bytes(&src[4..4 + length])?;
        src.advance(4 + length);
        Ok(Some(message))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = item.to_bytes();
        if bytes.len() > 4 + MAX_MESSAGE_LENGTH {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("frame of length {} is too large", bytes.len() - 4),
            ));
        }
        dst.reserve(bytes.len());
        dst.put_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization() {
        let messages = vec![
            (Message::KeepAlive, vec![0, 0, 0, 0]),
            (Message::Choke, vec![0, 0, 0, 1, 0]),
            (Message::Unchoke, vec![0, 0, 0, 1, 1]),
            (Message::Interested, vec![0, 0, 0, 1, 2]),
            (Message::NotInterested, vec![0, 0, 0, 1, 3]),
            (Message::Have(42), vec![0, 0, 0, 5, 4, 0, 0, 0, 42]),
            (Message::Bitfield(vec![1, 2, 3]), vec![0, 0, 0, 4, 5, 1, 2, 3]),
            (
                Message::Request {
                    index: 1,
                    begin: 2,
                    length: 16384,
                },
                vec![0, 0, 0, 13, 6, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 64, 0],
            ),
            (
                Message::Piece {
                    index: 1,
                    begin: 2,
                    block: vec![9, 9],
                },
                vec![0, 0, 0, 11, 7, 0, 0, 0, 1, 0, 0, 0, 2, 9, 9],
            ),
            (
                Message::Cancel {
                    index: 1,
                    begin: 2,
                    length: 3,
                },
                vec![0, 0, 0, 13, 8, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3],
            ),
        ];

        for (message, expected_bytes) in messages {
            assert_eq!(message.to_bytes(), expected_bytes);
            assert_eq!(Message::from_bytes(&expected_bytes[4..]).unwrap(), message);
        }
    }

    #[test]
    fn test_decode_reassembles_across_arbitrary_splits() {
        // have(7) followed by unchoke
        let stream: Vec<u8> = vec![0, 0, 0, 5, 4, 0, 0, 0, 7, 0, 0, 0, 1, 1];

        for split in 0..=stream.len() {
            let mut codec = MessageCodec;
            let mut buffer = BytesMut::new();
            let mut messages = Vec::new();

            for chunk in [&stream[..split], &stream[split..]] {
                buffer.extend_from_slice(chunk);
                while let Some(message) = codec.decode(&mut buffer).unwrap() {
                    messages.push(message);
                }
            }

            assert_eq!(
                messages,
                vec![Message::Have(7), Message::Unchoke],
                "split at {split}"
            );
            assert!(buffer.is_empty());
        }
    }

    #[test]
    fn test_decode_keep_alive() {
        let mut codec = MessageCodec;
        let mut buffer = BytesMut::from(&[0u8, 0, 0, 0][..]);
        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(Message::KeepAlive));
        assert_eq!(codec.decode(&mut buffer).unwrap(), None);
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let mut codec = MessageCodec;
        let mut buffer = BytesMut::from(&[0u8, 0, 0, 5, 4, 0][..]);
        assert_eq!(codec.decode(&mut buffer).unwrap(), None);
        buffer.extend_from_slice(&[0, 0, 7]);
        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(Message::Have(7)));
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let mut codec = MessageCodec;
        let mut buffer = BytesMut::from(&[0xffu8, 0xff, 0xff, 0xff][..]);
        assert!(codec.decode(&mut buffer).is_err());
    }

    #[test]
    fn test_unknown_id_is_surfaced_not_fatal() {
        let mut codec = MessageCodec;
        let mut buffer = BytesMut::from(&[0u8, 0, 0, 3, 20, 1, 2][..]);
        assert_eq!(
            codec.decode(&mut buffer).unwrap(),
            Some(Message::Unknown(20))
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_malformed_have_payload_is_an_error() {
        assert!(Message::from_bytes(&[4, 0, 0]).is_err());
        assert!(Message::from_bytes(&[6, 0, 0, 0, 1]).is_err());
        assert!(Message::from_bytes(&[7, 0, 0, 0, 1]).is_err());
    }
}
