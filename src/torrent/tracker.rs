//! Tracker communication and peer discovery.
//!
//! One announce task runs per tracker URL. Each iteration issues an HTTP GET
//! carrying the torrent identity and transfer counters, parses the bencoded
//! response, feeds the shared peer set, and sleeps for the interval the
//! tracker asked for. Errors are logged and retried after a short backoff;
//! a tracker that never recovers simply stops contributing peers.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bencode::{BValue, Bencode};
use crate::error::Error;
use crate::utils::peer_id_str;

use super::peers::PeerSet;

/// Delay before retrying a failed announce.
const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Query parameters sent to the tracker, minus `info_hash` which carries raw
/// octets and is percent-encoded by hand.
#[derive(Debug, Serialize)]
struct AnnounceQuery<'a> {
    peer_id: &'a str,
    port: u16,
    uploaded: u64,
    downloaded: u64,
    left: u64,
    compact: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<&'a str>,
}

/// Parsed announce response: re-announce interval and discovered peers.
#[derive(Debug, PartialEq, Eq)]
pub struct AnnounceResponse {
    pub interval: u64,
    pub peers: Vec<SocketAddr>,
}

/// Client for a single tracker URL.
pub struct Tracker {
    url: String,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    port: u16,
    left: u64,
    http: reqwest::Client,
}

impl Tracker {
    pub fn new(url: String, info_hash: [u8; 20], peer_id: [u8; 20], port: u16, left: u64) -> Self {
        Self {
            url,
            info_hash,
            peer_id,
            port,
            left,
            http: reqwest::Client::new(),
        }
    }

    /// Announce loop: runs until the supervisor cancels. Feeds every peer
    /// from every successful response into the shared set.
    pub async fn run(self, peers: Arc<PeerSet>, cancel: CancellationToken) {
        let mut first = true;
        loop {
            let event = first.then_some("started");
            let announce = tokio::select! {
                _ = cancel.cancelled() => break,
                res = self.announce(event) => res,
            };

            let sleep_for = match announce {
                Ok(response) => {
                    first = false;
                    info!(
                        tracker = %self.url,
                        peers = response.peers.len(),
                        interval = response.interval,
                        "announce ok"
                    );
                    for addr in response.peers {
                        peers.add(addr);
                    }
                    Duration::from_secs(response.interval)
                }
                Err(err) => {
                    warn!(tracker = %self.url, error = %err, "announce failed, backing off");
                    RETRY_BACKOFF
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
        debug!(tracker = %self.url, "announce loop stopped");
    }

    /// Issues one announce request and parses the response.
    pub async fn announce(&self, event: Option<&str>) -> Result<AnnounceResponse, Error> {
        let query = AnnounceQuery {
            peer_id: peer_id_str(&self.peer_id),
            port: self.port,
            uploaded: 0,
            downloaded: 0,
            left: self.left,
            compact: 1,
            event,
        };
        let params = serde_urlencoded::to_string(&query)
            .map_err(|e| Error::TrackerResponse(e.to_string()))?;
        let url = format!(
            "{}?{}&info_hash={}",
            self.url,
            params,
            urlencode(&self.info_hash)
        );
        debug!(url = %url, "announcing");

        let response = self.http.get(url).send().await?;
        let body = response.bytes().await?;
        parse_response(&body)
    }
}

/// Percent-encodes raw octets for use in a query string.
fn urlencode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| format!("%{:02x}", b)).collect()
}

/// Parses a bencoded announce response.
///
/// The `peers` key comes in two shapes: a list of `{ip, port}` dictionaries,
/// or a compact byte string of 6-byte IPv4/port tuples.
pub fn parse_response(body: &[u8]) -> Result<AnnounceResponse, Error> {
    let (root, _) = Bencode::decode(body)?;

    if let Some(failure) = root.get(b"failure reason") {
        return Err(Error::TrackerResponse(
            failure.as_str().unwrap_or("unspecified failure").to_owned(),
        ));
    }

    let interval = root
        .get(b"interval")
        .and_then(BValue::as_int)
        .filter(|&n| n > 0)
        .ok_or_else(|| Error::TrackerResponse("missing interval".to_owned()))?
        as u64;

    let peers = match root.get(b"peers") {
        Some(BValue::List(entries)) => parse_peer_dicts(entries)?,
        Some(BValue::Bytes(compact)) => parse_compact_peers(compact)?,
        _ => return Err(Error::TrackerResponse("missing peers".to_owned())),
    };

    Ok(AnnounceResponse { interval, peers })
}

/// Dictionary-model peer list: `l d2:ip<..>4:porti..e e ... e`.
fn parse_peer_dicts(entries: &[BValue]) -> Result<Vec<SocketAddr>, Error> {
    let mut peers = Vec::with_capacity(entries.len());
    for entry in entries {
        let ip = entry
            .get(b"ip")
            .and_then(BValue::as_str)
            .ok_or_else(|| Error::TrackerResponse("peer without ip".to_owned()))?;
        let port = entry
            .get(b"port")
            .and_then(BValue::as_int)
            .filter(|&p| (1..=u16::MAX as i64).contains(&p))
            .ok_or_else(|| Error::TrackerResponse("peer without port".to_owned()))?;

        let ip: IpAddr = ip
            .parse()
            .map_err(|_| Error::TrackerResponse(format!("unparseable peer ip `{ip}`")))?;
        peers.push(SocketAddr::new(ip, port as u16));
    }
    Ok(peers)
}

/// Compact peer list: 6 bytes per peer, 4-byte IPv4 then 2-byte big-endian port.
fn parse_compact_peers(compact: &[u8]) -> Result<Vec<SocketAddr>, Error> {
    if compact.len() % 6 != 0 {
        return Err(Error::TrackerResponse(
            "compact peer list not a multiple of 6 bytes".to_owned(),
        ));
    }
    Ok(compact
        .chunks_exact(6)
        .map(|chunk| {
            let ip = IpAddr::from([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::new(ip, port)
        })
        .collect())
}
