//! The set of peers this node knows about on the fully-connected overlay.

use std::collections::HashSet;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Another node on the network. Two peers are the same node iff their hosts
/// are byte-equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub host: String,
}

impl Peer {
    pub fn new(host: impl Into<String>) -> Self {
        Peer { host: host.into() }
    }

    pub fn matches(&self, host: &str) -> bool {
        self.host == host
    }
}

/// What a peer reports about itself when probed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerStatus {
    pub latest_block_hash: String,
    pub latest_block_number: u64,
    pub known_peers: Vec<Peer>,
}

/// Concurrent set of known peers.
#[derive(Default)]
pub struct PeerBook {
    peers: Mutex<HashSet<Peer>>,
}

impl PeerBook {
    pub fn new(initial: impl IntoIterator<Item = Peer>) -> Self {
        PeerBook {
            peers: Mutex::new(initial.into_iter().collect()),
        }
    }

    /// Adds the peer, returning true when it was not already known.
    pub fn add(&self, peer: Peer) -> bool {
        match self.peers.lock() {
            Ok(mut peers) => peers.insert(peer),
            Err(_) => false,
        }
    }

    pub fn remove(&self, peer: &Peer) {
        if let Ok(mut peers) = self.peers.lock() {
            peers.remove(peer);
        }
    }

    /// A snapshot of the set, optionally without the given host so a node
    /// can iterate everyone but itself.
    pub fn copy(&self, exclude_host: Option<&str>) -> Vec<Peer> {
        let peers = match self.peers.lock() {
            Ok(peers) => peers,
            Err(_) => return Vec::new(),
        };
        peers
            .iter()
            .filter(|peer| exclude_host.map_or(true, |host| !peer.matches(host)))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{Peer, PeerBook};

    #[test]
    fn add_reports_new_entries_only() {
        let book = PeerBook::default();
        assert!(book.add(Peer::new("a:9080")));
        assert!(!book.add(Peer::new("a:9080")));
        assert!(book.add(Peer::new("b:9080")));
        assert_eq!(book.copy(None).len(), 2);
    }

    #[test]
    fn copy_can_exclude_the_local_host() {
        let book = PeerBook::new([Peer::new("self:9080"), Peer::new("other:9080")]);
        let external = book.copy(Some("self:9080"));
        assert_eq!(external, vec![Peer::new("other:9080")]);
        assert_eq!(book.copy(None).len(), 2);
    }

    #[test]
    fn remove_drops_the_peer() {
        let book = PeerBook::new([Peer::new("a:9080"), Peer::new("b:9080")]);
        book.remove(&Peer::new("a:9080"));
        assert_eq!(book.copy(None), vec![Peer::new("b:9080")]);
    }

    #[test]
    fn peers_match_on_exact_host() {
        let peer = Peer::new("127.0.0.1:9080");
        assert!(peer.matches("127.0.0.1:9080"));
        assert!(!peer.matches("127.0.0.1:9081"));
    }
}
