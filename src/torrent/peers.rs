//! Shared pool of peer endpoints discovered by the tracker tasks.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Mutex;

/// A deduplicated pool of `(ip, port)` endpoints.
///
/// Trackers feed it, workers drain it. An endpoint is only ever handed out
/// once: `known` keeps every address ever added, so a peer that failed and
/// was discarded is not resurrected by the next announce.
#[derive(Debug, Default)]
pub struct PeerSet {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    known: HashSet<SocketAddr>,
    available: Vec<SocketAddr>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an endpoint. Idempotent: re-adding a known endpoint is a no-op.
    pub fn add(&self, addr: SocketAddr) {
        let mut inner = self.inner.lock().expect("peer set lock poisoned");
        if inner.known.insert(addr) {
            inner.available.push(addr);
        }
    }

    /// Removes and returns one endpoint, most recently added first.
    pub fn take(&self) -> Option<SocketAddr> {
        self.inner.lock().expect("peer set lock poisoned").available.pop()
    }

    /// Whether this endpoint has ever been added.
    pub fn known(&self, addr: &SocketAddr) -> bool {
        self.inner.lock().expect("peer set lock poisoned").known.contains(addr)
    }

    /// Endpoints currently waiting to be taken.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("peer set lock poisoned").available.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("10.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn test_add_is_idempotent() {
        let peers = PeerSet::new();
        peers.add(addr(6881));
        peers.add(addr(6881));
        assert_eq!(peers.len(), 1);
        assert!(peers.known(&addr(6881)));
    }

    #[test]
    fn test_take_consumes_most_recent_first() {
        let peers = PeerSet::new();
        peers.add(addr(1));
        peers.add(addr(2));
        assert_eq!(peers.take(), Some(addr(2)));
        assert_eq!(peers.take(), Some(addr(1)));
        assert_eq!(peers.take(), None);
    }

    #[test]
    fn test_taken_endpoint_is_not_re_added() {
        let peers = PeerSet::new();
        peers.add(addr(1));
        assert_eq!(peers.take(), Some(addr(1)));
        // Next announce reports the same peer; it stays consumed.
        peers.add(addr(1));
        assert_eq!(peers.take(), None);
        assert!(peers.known(&addr(1)));
    }
}
