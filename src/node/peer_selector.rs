use rand::seq::SliceRandom;

use crate::peers::{Peer, PeerId, PeerSet};

/// Picks gossip partners at random, avoiding the previously used peer
/// when the set is large enough to allow it. Guarded by its own lock in
/// the node.
pub(crate) struct RandomPeerSelector {
    peers: PeerSet,
    self_id: PeerId,
    last: Option<PeerId>,
}

impl RandomPeerSelector {
    pub(crate) fn new(peers: PeerSet, self_id: PeerId) -> Self {
        Self {
            peers,
            self_id,
            last: None,
        }
    }

    pub(crate) fn update_last(&mut self, id: PeerId) {
        self.last = Some(id);
    }

    /// None only when the peer set contains nobody but this node.
    pub(crate) fn next(&mut self) -> Option<Peer> {
        let mut candidates: Vec<&Peer> = self
            .peers
            .peers
            .iter()
            .filter(|peer| peer.id().map(|id| id != self.self_id).unwrap_or(false))
            .collect();

        if candidates.len() > 1 {
            if let Some(last) = self.last {
                candidates.retain(|peer| peer.id().map(|id| id != last).unwrap_or(false));
            }
        }

        candidates.choose(&mut rand::thread_rng()).map(|p| (*p).clone())
    }
}

#[cfg(test)]
mod test {
    use crate::crypto::Keypair;
    use crate::peers::ToPeerId;

    use super::*;

    fn keypair(seed: u8) -> Keypair {
        Keypair::generate(Some([seed; 32]))
    }

    fn peer(seed: u8) -> Peer {
        Peer::new(
            format!("node{seed}"),
            format!("127.0.0.1:{}", 4000 + seed as u16),
            keypair(seed).public_key().to_hex(),
        )
    }

    #[test]
    fn test_excludes_self() {
        let peers = PeerSet::new(vec![peer(1), peer(2)]).unwrap();
        let self_id = keypair(1).peer_id();
        let other_id = keypair(2).peer_id();

        let mut selector = RandomPeerSelector::new(peers, self_id);
        for _ in 0..10 {
            assert_eq!(selector.next().unwrap().id().unwrap(), other_id);
        }
    }

    #[test]
    fn test_single_peer_set_has_no_partner() {
        let peers = PeerSet::new(vec![peer(1)]).unwrap();
        let mut selector = RandomPeerSelector::new(peers, keypair(1).peer_id());
        assert!(selector.next().is_none());
    }

    #[test]
    fn test_avoids_last_used_when_possible() {
        let peers = PeerSet::new(vec![peer(1), peer(2), peer(3)]).unwrap();
        let mut selector = RandomPeerSelector::new(peers, keypair(1).peer_id());

        let last = keypair(2).peer_id();
        selector.update_last(last);
        for _ in 0..10 {
            assert_ne!(selector.next().unwrap().id().unwrap(), last);
        }
    }

    #[test]
    fn test_two_peer_set_allows_repeats() {
        let peers = PeerSet::new(vec![peer(1), peer(2)]).unwrap();
        let other_id = keypair(2).peer_id();
        let mut selector = RandomPeerSelector::new(peers, keypair(1).peer_id());

        selector.update_last(other_id);
        //Only one candidate: last-used avoidance must not starve it
        assert_eq!(selector.next().unwrap().id().unwrap(), other_id);
    }
}
