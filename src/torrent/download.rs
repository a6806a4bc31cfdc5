//! Piece-download worker.
//!
//! One worker owns one peer connection and pulls pieces from the shared
//! planner until the queue runs dry, the peer fails, or the session is
//! cancelled. Every exit path is explicit: a worker that cannot finish its
//! piece puts it back before reporting how it ended, and the supervisor
//! decides what the outcome means for the peer.

use std::net::SocketAddr;
use std::sync::Arc;

use sha1::{Digest, Sha1};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Error;

use super::message::Message;
use super::peer::PeerConnection;
use super::planner::{Piece, Planner};
use super::storage::Storage;

/// How a worker's run ended. The peer is discarded in every case but
/// `Completed` having drained the queue; a `HashMismatch` marks the peer as
/// suspect in particular.
#[derive(Debug)]
pub enum WorkerOutcome {
    /// No pending work was left for this worker.
    Completed,
    /// The session shut down while the worker was active.
    Cancelled,
    /// Connecting, talking, or writing failed; the held piece was put back.
    PeerFailed(Error),
    /// A piece assembled from this peer failed verification.
    HashMismatch,
}

/// A worker bound to one peer endpoint.
pub struct Worker {
    addr: SocketAddr,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    planner: Arc<Planner>,
    storage: Arc<Storage>,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(
        addr: SocketAddr,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        planner: Arc<Planner>,
        storage: Arc<Storage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            addr,
            info_hash,
            peer_id,
            planner,
            storage,
            cancel,
        }
    }

    /// Connects and downloads pieces until done, failed, or cancelled.
    pub async fn run(self) -> WorkerOutcome {
        let mut conn = tokio::select! {
            _ = self.cancel.cancelled() => return WorkerOutcome::Cancelled,
            conn = PeerConnection::connect(self.addr, self.info_hash, self.peer_id) => {
                match conn {
                    Ok(conn) => conn,
                    Err(err) => return WorkerOutcome::PeerFailed(err),
                }
            }
        };
        if let Err(err) = conn.send(Message::Interested).await {
            return WorkerOutcome::PeerFailed(err);
        }

        loop {
            if self.cancel.is_cancelled() {
                return WorkerOutcome::Cancelled;
            }
            let Some(piece) = self.planner.next() else {
                // Nothing pending. In-flight pieces may still fail and come
                // back, but that is the supervisor's problem, not this
                // worker's.
                return WorkerOutcome::Completed;
            };

            if !conn.has_piece(piece.index) {
                let index = piece.index;
                debug!(peer = %self.addr, piece = index, "peer lacks piece");
                self.planner.put_back(piece);
                return WorkerOutcome::PeerFailed(Error::MissingPiece(index));
            }

            match self.fetch_and_commit(&mut conn, &piece).await {
                Ok(()) => {
                    info!(
                        peer = %self.addr,
                        piece = piece.index,
                        remaining = self.planner.remaining().saturating_sub(1),
                        total = self.planner.total(),
                        "piece verified"
                    );
                    self.planner.mark_complete(piece);
                }
                Err(Error::Cancelled) => {
                    self.planner.put_back(piece);
                    return WorkerOutcome::Cancelled;
                }
                Err(Error::HashMismatch(index)) => {
                    warn!(peer = %self.addr, piece = index, "hash mismatch, discarding peer");
                    self.planner.put_back(piece);
                    return WorkerOutcome::HashMismatch;
                }
                Err(err) => {
                    self.planner.put_back(piece);
                    return WorkerOutcome::PeerFailed(err);
                }
            }
        }
    }

    /// Downloads all blocks of one piece, verifies the SHA-1, and commits
    /// the bytes at the piece's logical offset.
    async fn fetch_and_commit(
        &self,
        conn: &mut PeerConnection,
        piece: &Piece,
    ) -> Result<(), Error> {
        let data = conn.download_piece(piece, &self.cancel).await?;

        if !verify_piece(&data, &piece.hash) {
            return Err(Error::HashMismatch(piece.index));
        }
        self.storage.write_piece(piece.offset, &data).await
    }
}

/// Whether the reassembled piece bytes hash to the expected value.
pub fn verify_piece(data: &[u8], expected: &[u8; 20]) -> bool {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().as_slice() == expected
}
