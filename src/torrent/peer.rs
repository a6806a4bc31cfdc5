//! Per-connection peer protocol engine.
//!
//! Drives one TCP connection through the BitTorrent peer wire protocol:
//! handshake, choke/interest negotiation, and block-by-block piece fetching
//! over a framed stream. The connection starts choked; `interested` is sent
//! immediately after the handshake, and requests go out only while the
//! remote has us unchoked.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::Error;

use super::bitfield::Bitfield;
use super::message::{Message, MessageCodec};
use super::planner::{Block, Piece, BLOCK_SIZE};

pub const PROTOCOL: &str = "BitTorrent protocol";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Silent peers are treated as failed after this long.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// The fixed 68-byte frame both sides exchange before any other bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    /// Layout: length-prefixed protocol string, eight reserved zero bytes,
    /// info hash, peer id.
    pub fn to_bytes(&self) -> [u8; 68] {
        let mut bytes = [0u8; 68];
        bytes[0] = PROTOCOL.len() as u8;
        bytes[1..20].copy_from_slice(PROTOCOL.as_bytes());
        // bytes[20..28] stay zero (reserved)
        bytes[28..48].copy_from_slice(&self.info_hash);
        bytes[48..68].copy_from_slice(&self.peer_id);
        bytes
    }

    pub fn from_bytes(bytes: &[u8; 68]) -> Result<Self, Error> {
        if bytes[0] as usize != PROTOCOL.len() || &bytes[1..20] != PROTOCOL.as_bytes() {
            return Err(Error::BadHandshake("wrong protocol string"));
        }
        Ok(Self {
            info_hash: bytes[28..48].try_into().expect("20-byte slice"),
            peer_id: bytes[48..68].try_into().expect("20-byte slice"),
        })
    }
}

/// An established, handshaken connection to one peer.
pub struct PeerConnection {
    addr: SocketAddr,
    frames: Framed<TcpStream, MessageCodec>,
    remote_id: [u8; 20],
    bitfield: Option<Bitfield>,
    unchoked: bool,
}

impl PeerConnection {
    /// Opens a TCP connection and performs the handshake.
    ///
    /// The remote must present the same protocol string and info hash; its
    /// peer id is recorded but not matched against anything.
    pub async fn connect(
        addr: SocketAddr,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
    ) -> Result<Self, Error> {
        let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(Error::Network)?;

        let handshake = Handshake::new(info_hash, peer_id);
        stream
            .write_all(&handshake.to_bytes())
            .await
            .map_err(Error::Network)?;

        let mut response = [0u8; 68];
        tokio::time::timeout(READ_TIMEOUT, stream.read_exact(&mut response))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(Error::Network)?;

        let remote = Handshake::from_bytes(&response)?;
        if remote.info_hash != info_hash {
            return Err(Error::BadHandshake("info hash mismatch"));
        }
        debug!(peer = %addr, remote_id = %hex::encode(remote.peer_id), "handshake complete");

        Ok(Self {
            addr,
            frames: Framed::new(stream, MessageCodec),
            remote_id: remote.peer_id,
            bitfield: None,
            unchoked: false,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn remote_id(&self) -> [u8; 20] {
        self.remote_id
    }

    /// Whether the peer claims to have the piece. Before a bitfield arrives
    /// availability is unknown and assumed.
    pub fn has_piece(&self, piece_index: u32) -> bool {
        match &self.bitfield {
            Some(bitfield) => bitfield.has_piece(piece_index),
            None => true,
        }
    }

    pub async fn send(&mut self, message: Message) -> Result<(), Error> {
        trace!(peer = %self.addr, ?message, "send");
        self.frames.send(message).await.map_err(Error::Network)
    }

    /// Receives the next message, with the read deadline applied. A closed
    /// stream surfaces as [`Error::ConnectionClosed`].
    pub async fn recv(&mut self) -> Result<Message, Error> {
        let message = tokio::time::timeout(READ_TIMEOUT, self.frames.next())
            .await
            .map_err(|_| Error::Timeout)?
            .ok_or(Error::ConnectionClosed)?
            .map_err(Error::Network)?;
        trace!(peer = %self.addr, ?message, "recv");
        Ok(message)
    }

    /// Records choke/bitfield/have bookkeeping shared by every receive loop.
    fn note(&mut self, message: &Message) {
        match message {
            Message::Choke => self.unchoked = false,
            Message::Unchoke => self.unchoked = true,
            Message::Bitfield(bits) => {
                let bitfield = Bitfield::from_payload(bits.clone());
                debug!(peer = %self.addr, pieces = bitfield.count(), "bitfield received");
                self.bitfield = Some(bitfield);
            }
            _ => {}
        }
    }

    /// Fetches every block of `piece` and returns the reassembled bytes.
    ///
    /// One request is outstanding at a time. A `choke` mid-block means
    /// waiting for `unchoke` and re-sending the request; the peer may then
    /// deliver the block twice, which is harmless because blocks land at
    /// their `begin` offset. `piece` messages for other blocks of this piece
    /// are kept; anything else is discarded.
    pub async fn download_piece(
        &mut self,
        piece: &Piece,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, Error> {
        let mut data = vec![0u8; piece.size as usize];
        let mut received = vec![false; piece.num_blocks()];

        for block in piece.blocks().collect::<Vec<_>>() {
            let slot = (block.begin / BLOCK_SIZE) as usize;
            if received[slot] {
                continue;
            }
            self.fetch_block(piece, block, &mut data, &mut received, cancel)
                .await?;
        }

        Ok(data)
    }

    async fn fetch_block(
        &mut self,
        piece: &Piece,
        block: Block,
        data: &mut [u8],
        received: &mut [bool],
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.wait_for_unchoke(cancel).await?;
        self.send(Message::Request {
            index: block.piece_index,
            begin: block.begin,
            length: block.length,
        })
        .await?;

        let slot = (block.begin / BLOCK_SIZE) as usize;
        while !received[slot] {
            let message = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                message = self.recv() => message?,
            };
            self.note(&message);

            match message {
                Message::Piece {
                    index,
                    begin,
                    block: bytes,
                } => {
                    self.store_block(piece, index, begin, &bytes, data, received)?;
                }
                Message::Choke => {
                    // Re-request once the peer unchokes; a duplicate block is
                    // tolerated.
                    self.wait_for_unchoke(cancel).await?;
                    self.send(Message::Request {
                        index: block.piece_index,
                        begin: block.begin,
                        length: block.length,
                    })
                    .await?;
                }
                // have/bitfield updates are recorded by note(); everything
                // else is a no-op mid-download.
                _ => {}
            }
        }
        Ok(())
    }

    /// Accepts a `piece` message if it targets a block of the piece being
    /// downloaded; anything else is discarded.
    fn store_block(
        &self,
        piece: &Piece,
        index: u32,
        begin: u32,
        bytes: &[u8],
        data: &mut [u8],
        received: &mut [bool],
    ) -> Result<(), Error> {
        if index != piece.index {
            trace!(peer = %self.addr, index, "discarding block for piece not held");
            return Ok(());
        }
        if begin % BLOCK_SIZE != 0 || begin >= piece.size {
            return Err(Error::Network(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "block offset not on a block boundary",
            )));
        }
        let slot = (begin / BLOCK_SIZE) as usize;
        let expected = (piece.size - begin).min(BLOCK_SIZE) as usize;
        if bytes.len() != expected {
            return Err(Error::Network(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "block does not fit the piece",
            )));
        }

        data[begin as usize..begin as usize + bytes.len()].copy_from_slice(bytes);
        received[slot] = true;
        Ok(())
    }

    /// Drains messages until the remote unchokes us.
    async fn wait_for_unchoke(&mut self, cancel: &CancellationToken) -> Result<(), Error> {
        while !self.unchoked {
            let message = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                message = self.recv() => message?,
            };
            self.note(&message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_is_exactly_68_bytes() {
        let handshake = Handshake::new([1u8; 20], [2u8; 20]);
        let bytes = handshake.to_bytes();
        assert_eq!(bytes.len(), 68);
        assert_eq!(bytes[0], 19);
        assert_eq!(&bytes[1..20], b"BitTorrent protocol");
        assert_eq!(&bytes[20..28], &[0u8; 8]);
        assert_eq!(&bytes[28..48], &[1u8; 20]);
        assert_eq!(&bytes[48..68], &[2u8; 20]);
    }

    #[test]
    fn test_handshake_roundtrip() {
        let handshake = Handshake::new([7u8; 20], *b"-TRRNTIAL-0123456789");
        let parsed = Handshake::from_bytes(&handshake.to_bytes()).unwrap();
        assert_eq!(parsed, handshake);
    }

    #[test]
    fn test_handshake_rejects_wrong_protocol() {
        let mut bytes = Handshake::new([0u8; 20], [0u8; 20]).to_bytes();
        bytes[5] ^= 0xff;
        assert!(matches!(
            Handshake::from_bytes(&bytes),
            Err(Error::BadHandshake(_))
        ));
    }
}
