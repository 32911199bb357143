use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::hashgraph::block::Block;
use crate::hashgraph::event::{Event, EventHash};
use crate::hashgraph::frame::{Frame, Root};
use crate::hashgraph::round::RoundInfo;
use crate::hashgraph::store::{Result, Store, StoreError};
use crate::peers::{PeerId, PeerSet};

/// Store backend holding everything in bounded LRU caches plus index
/// tables. Once an event body falls out of the cache it can no longer be
/// served, which is fine: consensus only walks the recent part of the
/// graph, and fast-forward covers peers that fell too far behind.
pub(crate) struct InmemStore {
    cache_size: usize,
    events: LruCache<EventHash, Event>,
    ///participant => index => event hash
    participant_events: HashMap<PeerId, BTreeMap<i64, EventHash>>,
    ///participant pub key hex => root
    roots: HashMap<String, Root>,
    rounds: LruCache<i64, RoundInfo>,
    last_round: i64,
    blocks: LruCache<i64, Block>,
    last_block_index: i64,
    consensus_events: Vec<EventHash>,
    peer_sets: BTreeMap<i64, PeerSet>,
    peers: PeerSet,
    topological: Vec<EventHash>,
}

impl InmemStore {
    pub(crate) fn new(peers: PeerSet, cache_size: usize) -> Self {
        let bound = NonZeroUsize::new(cache_size.max(1)).expect("cache size must be positive");
        Self {
            cache_size,
            events: LruCache::new(bound),
            participant_events: HashMap::new(),
            roots: HashMap::new(),
            rounds: LruCache::new(bound),
            last_round: -1,
            blocks: LruCache::new(bound),
            last_block_index: -1,
            consensus_events: vec![],
            peer_sets: BTreeMap::new(),
            peers,
            topological: vec![],
        }
    }

    fn creator_id(&self, creator_hex: &str) -> Result<PeerId> {
        self.peers
            .by_pub_key(creator_hex)
            .ok_or_else(|| StoreError::UnknownParticipant(creator_hex.to_string()))?
            .id()
            .map_err(|_| StoreError::UnknownParticipant(creator_hex.to_string()))
    }

    fn root_by_id(&self, creator: PeerId) -> Result<&Root> {
        let peer = self
            .peers
            .by_id(&creator)
            .ok_or(StoreError::RootNotFound(creator.to_string()))?;
        self.roots
            .get(&peer.pub_key)
            .ok_or(StoreError::RootNotFound(peer.pub_key.clone()))
    }
}

impl Store for InmemStore {
    fn cache_size(&self) -> usize {
        self.cache_size
    }

    fn get_event(&mut self, hash: &EventHash) -> Result<Event> {
        self.events
            .get(hash)
            .cloned()
            .ok_or_else(|| StoreError::EventNotFound(hash.to_string()))
    }

    fn set_event(&mut self, event: Event) -> Result<()> {
        let hash = event.hash();
        if self.events.contains(&hash) {
            return Err(StoreError::KeyAlreadyExists(hash.to_string()));
        }
        let creator = self.creator_id(event.creator())?;
        self.participant_events
            .entry(creator)
            .or_default()
            .insert(event.index(), hash);
        self.topological.push(hash);
        self.events.put(hash, event);
        Ok(())
    }

    fn replace_event(&mut self, event: Event) -> Result<()> {
        let hash = event.hash();
        let creator = self.creator_id(event.creator())?;
        self.participant_events
            .entry(creator)
            .or_default()
            .insert(event.index(), hash);
        self.events.put(hash, event);
        Ok(())
    }

    fn contains_event(&mut self, hash: &EventHash) -> bool {
        self.events.contains(hash)
    }

    fn participant_events(&self, creator: PeerId, skip: i64) -> Result<Vec<EventHash>> {
        let events = match self.participant_events.get(&creator) {
            Some(events) => events,
            None => return Ok(vec![]),
        };
        Ok(events
            .range(skip.saturating_add(1)..)
            .map(|(_, hash)| *hash)
            .collect())
    }

    fn participant_event(&self, creator: PeerId, index: i64) -> Result<EventHash> {
        if let Some(hash) = self
            .participant_events
            .get(&creator)
            .and_then(|events| events.get(&index))
        {
            return Ok(*hash);
        }
        //The index may predate the frame; the root head still resolves it
        let root = self
            .root_by_id(creator)
            .map_err(|_| StoreError::ParticipantEventNotFound(index, creator.to_string()))?;
        if root.head.index == index {
            return Ok(root.head.hash);
        }
        Err(StoreError::ParticipantEventNotFound(
            index,
            creator.to_string(),
        ))
    }

    fn last_event_from(&self, creator: PeerId) -> Result<(EventHash, bool)> {
        if let Some((_, hash)) = self
            .participant_events
            .get(&creator)
            .and_then(|events| events.iter().next_back())
        {
            return Ok((*hash, false));
        }
        let root = self.root_by_id(creator)?;
        Ok((root.head.hash, true))
    }

    fn known_events(&self) -> BTreeMap<PeerId, i64> {
        let mut known = BTreeMap::new();
        for peer in &self.peers.peers {
            let id = match peer.id() {
                Ok(id) => id,
                Err(_) => continue,
            };
            let last = self
                .participant_events
                .get(&id)
                .and_then(|events| events.keys().next_back().copied())
                .or_else(|| self.roots.get(&peer.pub_key).map(|root| root.head.index))
                .unwrap_or(-1);
            known.insert(id, last);
        }
        known
    }

    fn add_consensus_event(&mut self, hash: EventHash) -> Result<()> {
        self.consensus_events.push(hash);
        Ok(())
    }

    fn consensus_events(&self) -> Vec<EventHash> {
        self.consensus_events.clone()
    }

    fn consensus_events_count(&self) -> usize {
        self.consensus_events.len()
    }

    fn get_round(&mut self, index: i64) -> Result<RoundInfo> {
        self.rounds
            .get(&index)
            .cloned()
            .ok_or(StoreError::RoundNotFound(index))
    }

    fn set_round(&mut self, index: i64, round: RoundInfo) -> Result<()> {
        self.rounds.put(index, round);
        if index > self.last_round {
            self.last_round = index;
        }
        Ok(())
    }

    fn last_round(&self) -> i64 {
        self.last_round
    }

    fn round_witnesses(&mut self, index: i64) -> Vec<EventHash> {
        self.rounds
            .get(&index)
            .map(|round| round.witnesses())
            .unwrap_or_default()
    }

    fn get_root(&self, participant: &str) -> Result<Root> {
        self.roots
            .get(participant)
            .cloned()
            .ok_or_else(|| StoreError::RootNotFound(participant.to_string()))
    }

    fn set_root(&mut self, participant: String, root: Root) -> Result<()> {
        self.roots.insert(participant, root);
        Ok(())
    }

    fn get_block(&mut self, index: i64) -> Result<Block> {
        self.blocks
            .get(&index)
            .cloned()
            .ok_or(StoreError::BlockNotFound(index))
    }

    fn set_block(&mut self, block: Block) -> Result<()> {
        let index = block.index();
        self.blocks.put(index, block);
        if index > self.last_block_index {
            self.last_block_index = index;
        }
        Ok(())
    }

    fn last_block_index(&self) -> i64 {
        self.last_block_index
    }

    fn get_peer_set(&self, round: i64) -> Result<PeerSet> {
        //All rounds share the same set; serve the closest one at or below
        self.peer_sets
            .range(..=round)
            .next_back()
            .map(|(_, peers)| peers.clone())
            .ok_or(StoreError::PeerSetNotFound(round))
    }

    fn set_peer_set(&mut self, round: i64, peers: PeerSet) -> Result<()> {
        self.peer_sets.insert(round, peers.clone());
        self.peers = peers;
        Ok(())
    }

    fn peers(&self) -> PeerSet {
        self.peers.clone()
    }

    fn topological_events(&mut self) -> Result<Vec<Event>> {
        let hashes = self.topological.clone();
        let mut events = Vec::with_capacity(hashes.len());
        for hash in hashes {
            events.push(self.get_event(&hash)?);
        }
        Ok(events)
    }

    fn clear_consensus_state(&mut self) -> Result<()> {
        self.rounds.clear();
        self.last_round = -1;
        self.blocks.clear();
        self.last_block_index = -1;
        self.consensus_events.clear();
        Ok(())
    }

    fn reset_from_frame(&mut self, frame: &Frame) -> Result<()> {
        let peers = PeerSet::new(frame.peers.clone())
            .map_err(|err| StoreError::Io(err.to_string()))?;

        self.events.clear();
        self.participant_events.clear();
        self.topological.clear();
        self.rounds.clear();
        self.consensus_events.clear();
        self.last_round = frame.round;

        self.roots = frame.roots.clone().into_iter().collect();
        self.set_peer_set(frame.round, peers)?;

        //Root heads resolve wire parents that predate the frame
        for root in self.roots.values() {
            if root.head.index >= 0 {
                self.participant_events
                    .entry(root.head.creator_id)
                    .or_default()
                    .insert(root.head.index, root.head.hash);
            }
        }
        Ok(())
    }

    fn need_bootstrap(&self) -> bool {
        false
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use crate::crypto::Keypair;
    use crate::hashgraph::event::root_self_parent;
    use crate::peers::{Peer, ToPeerId};

    use super::*;

    fn keypair(seed: u8) -> Keypair {
        Keypair::generate(Some([seed; 32]))
    }

    fn peer_set(seeds: &[u8]) -> PeerSet {
        let peers = seeds
            .iter()
            .map(|s| {
                Peer::new(
                    format!("node{s}"),
                    format!("127.0.0.1:{}", 4000 + *s as u16),
                    keypair(*s).public_key().to_hex(),
                )
            })
            .collect();
        PeerSet::new(peers).unwrap()
    }

    fn store(seeds: &[u8]) -> InmemStore {
        let peers = peer_set(seeds);
        let mut store = InmemStore::new(peers.clone(), 1000);
        store.set_peer_set(0, peers.clone()).unwrap();
        for peer in &peers.peers {
            let id = peer.id().unwrap();
            store
                .set_root(peer.pub_key.clone(), Root::base(id))
                .unwrap();
        }
        store
    }

    fn signed_event(seed: u8, index: i64, self_parent: EventHash) -> Event {
        let keypair = keypair(seed);
        let mut event = Event::new(
            vec![],
            vec![],
            self_parent,
            None,
            keypair.public_key().to_hex(),
            index,
        );
        event.sign(&keypair).unwrap();
        event
    }

    #[test]
    fn test_event_round_trip() {
        let mut store = store(&[1, 2]);
        let id = keypair(1).peer_id();
        let event = signed_event(1, 0, root_self_parent(id));
        let hash = event.hash();

        store.set_event(event.clone()).unwrap();
        assert_eq!(store.get_event(&hash).unwrap().body, event.body);
        assert_matches!(
            store.set_event(event),
            Err(StoreError::KeyAlreadyExists(_))
        );
    }

    #[test]
    fn test_last_event_from_root_flag() {
        let mut store = store(&[1, 2]);
        let id = keypair(1).peer_id();

        let (hash, is_root) = store.last_event_from(id).unwrap();
        assert!(is_root);
        assert_eq!(hash, root_self_parent(id));

        let event = signed_event(1, 0, root_self_parent(id));
        let event_hash = event.hash();
        store.set_event(event).unwrap();

        let (hash, is_root) = store.last_event_from(id).unwrap();
        assert!(!is_root);
        assert_eq!(hash, event_hash);
    }

    #[test]
    fn test_participant_events_listing() {
        let mut store = store(&[1, 2]);
        let id = keypair(1).peer_id();

        let e0 = signed_event(1, 0, root_self_parent(id));
        let e1 = signed_event(1, 1, e0.hash());
        let e2 = signed_event(1, 2, e1.hash());
        for e in [&e0, &e1, &e2] {
            store.set_event(e.clone()).unwrap();
        }

        assert_eq!(store.participant_events(id, -1).unwrap().len(), 3);
        assert_eq!(
            store.participant_events(id, 0).unwrap(),
            vec![e1.hash(), e2.hash()]
        );
        assert_eq!(store.participant_event(id, 1).unwrap(), e1.hash());
        assert_eq!(store.known_events()[&id], 2);
    }

    #[test]
    fn test_known_events_defaults_to_root_index() {
        let store = store(&[1, 2]);
        for index in store.known_events().values() {
            assert_eq!(*index, -1);
        }
    }

    #[test]
    fn test_rounds_and_blocks() {
        let mut store = store(&[1]);
        assert_eq!(store.last_round(), -1);
        assert_eq!(store.last_block_index(), -1);

        let mut round = RoundInfo::default();
        round.add_created_event(root_self_parent(PeerId(9)), true);
        store.set_round(2, round).unwrap();
        assert_eq!(store.last_round(), 2);
        assert_eq!(store.round_witnesses(2).len(), 1);
        assert_matches!(store.get_round(1), Err(StoreError::RoundNotFound(1)));

        let block = Block::new(0, 2, EventHash::default(), vec![]);
        store.set_block(block).unwrap();
        assert_eq!(store.last_block_index(), 0);
        assert_matches!(store.get_block(4), Err(StoreError::BlockNotFound(4)));
    }

    #[test]
    fn test_reset_from_frame_seeds_roots() {
        use crate::hashgraph::frame::{Frame, RootEvent};

        let mut store = store(&[1, 2]);
        let id = keypair(1).peer_id();
        let event = signed_event(1, 0, root_self_parent(id));
        store.set_event(event.clone()).unwrap();

        let peers = peer_set(&[1, 2]);
        let mut roots = BTreeMap::new();
        for peer in &peers.peers {
            let peer_id = peer.id().unwrap();
            let head = if peer_id == id {
                RootEvent {
                    hash: event.hash(),
                    creator_id: peer_id,
                    index: 4,
                    round: 3,
                }
            } else {
                RootEvent::base(peer_id)
            };
            roots.insert(peer.pub_key.clone(), Root::new(head));
        }
        let frame = Frame {
            round: 3,
            peers: peers.peers.clone(),
            roots,
            events: vec![],
        };

        store.reset_from_frame(&frame).unwrap();

        assert_eq!(store.last_round(), 3);
        assert_eq!(store.known_events()[&id], 4);
        assert_eq!(store.participant_event(id, 4).unwrap(), event.hash());
        assert!(store.consensus_events().is_empty());
    }
}
