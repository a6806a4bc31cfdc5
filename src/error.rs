use crate::bencode::BencodeError;

/// Errors produced by the downloader core.
///
/// Only the metainfo and storage-initialization variants are fatal to a
/// session. Peer-level failures stay local to the worker that hit them (the
/// worker puts its piece back and exits), and tracker failures are retried
/// after a backoff.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed bencode: {0}")]
    Bencode(#[from] BencodeError),

    #[error("metainfo is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("metainfo field `{0}` is invalid")]
    InvalidField(&'static str),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("network error: {0}")]
    Network(std::io::Error),

    #[error("peer closed the connection")]
    ConnectionClosed,

    #[error("timed out waiting for peer")]
    Timeout,

    #[error("peer sent an invalid handshake: {0}")]
    BadHandshake(&'static str),

    #[error("peer does not have piece {0}")]
    MissingPiece(u32),

    #[error("piece {0} failed hash verification")]
    HashMismatch(u32),

    #[error("tracker request failed: {0}")]
    TrackerHttp(#[from] reqwest::Error),

    #[error("tracker response invalid: {0}")]
    TrackerResponse(String),

    #[error("cancelled")]
    Cancelled,
}
