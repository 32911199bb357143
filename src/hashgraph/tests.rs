// Exercises the consensus algorithm on hand-built graphs, without any
// networking or time.

use assert_matches::assert_matches;

use crate::crypto::Keypair;
use crate::hashgraph::event::{root_self_parent, Event, EventHash};
use crate::hashgraph::graph::{Hashgraph, HashgraphError};
use crate::hashgraph::inmem_store::InmemStore;
use crate::peers::{Peer, PeerSet, ToPeerId};

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

fn hashgraph(seeds: &[u8]) -> Hashgraph {
    let peers = peer_set(seeds);
    let store = InmemStore::new(peers.clone(), 1000);
    let mut hg = Hashgraph::new(Box::new(store));
    hg.init(peers).unwrap();
    hg
}

fn signed_event(
    seed: u8,
    index: i64,
    self_parent: EventHash,
    other_parent: Option<EventHash>,
    transactions: Vec<Vec<u8>>,
) -> Event {
    let keypair = keypair(seed);
    let mut event = Event::new(
        transactions,
        vec![],
        self_parent,
        other_parent,
        keypair.public_key().to_hex(),
        index,
    );
    event.sign(&keypair).unwrap();
    event
}

fn first_event(seed: u8) -> Event {
    signed_event(seed, 0, root_self_parent(keypair(seed).peer_id()), None, vec![])
}

/// The classic five-event exchange between three participants:
///
///            f1 (p1)
///           /  \
///         e02   |
///        (p0)   |
///        /  \   |
///       |   e21 |
///       |  (p2) |
///       |  /  \ |
///       | /    e10 (p1)
///       |/    /   \
///       e0   e1    e2
/// Returns the events in topological order.
fn classic_graph() -> Vec<Event> {
    let e0 = first_event(1);
    let e1 = first_event(2);
    let e2 = first_event(3);
    let e10 = signed_event(2, 1, e1.hash(), Some(e0.hash()), vec![]);
    let e21 = signed_event(3, 1, e2.hash(), Some(e10.hash()), vec![]);
    let e02 = signed_event(1, 1, e0.hash(), Some(e21.hash()), vec![]);
    let f1 = signed_event(2, 2, e10.hash(), Some(e02.hash()), vec![]);
    vec![e0, e1, e2, e10, e21, e02, f1]
}

#[test]
fn test_insert_assigns_rounds_and_witnesses() {
    let mut hg = hashgraph(&[1, 2, 3]);
    let events = classic_graph();
    let hashes: Vec<EventHash> = events.iter().map(|e| e.hash()).collect();

    for event in events {
        hg.insert_event_and_run_consensus(event).unwrap();
    }

    //First events of every creator are round-0 witnesses
    for hash in &hashes[..3] {
        let event = hg.store().get_event(hash).unwrap();
        assert_eq!(event.round, Some(0));
    }
    let round0 = hg.store().get_round(0).unwrap();
    for hash in &hashes[..3] {
        assert!(round0.is_witness(hash));
    }

    //Middle exchanges do not reach a new round
    for hash in &hashes[3..6] {
        let event = hg.store().get_event(hash).unwrap();
        assert_eq!(event.round, Some(0));
        assert!(!round0.is_witness(hash));
    }

    //f1 strongly sees all three round-0 witnesses
    let f1 = hg.store().get_event(&hashes[6]).unwrap();
    assert_eq!(f1.round, Some(1));
    let round1 = hg.store().get_round(1).unwrap();
    assert!(round1.is_witness(&hashes[6]));
}

#[test]
fn test_duplicate_insertion_is_noop() {
    let mut hg = hashgraph(&[1, 2, 3]);
    let e0 = first_event(1);

    hg.insert_event_and_run_consensus(e0.clone()).unwrap();
    let undetermined = hg.undetermined_events.len();

    let blocks = hg.insert_event_and_run_consensus(e0).unwrap();
    assert!(blocks.is_empty());
    assert_eq!(hg.undetermined_events.len(), undetermined);
}

#[test]
fn test_rejects_unknown_creator() {
    let mut hg = hashgraph(&[1, 2, 3]);
    let foreign = first_event(9);
    assert_matches!(
        hg.insert_event(foreign),
        Err(HashgraphError::UnknownCreator(_))
    );
}

#[test]
fn test_rejects_wrong_self_parent() {
    let mut hg = hashgraph(&[1, 2, 3]);
    hg.insert_event(first_event(1)).unwrap();

    //Index 1 chaining off the root again instead of the head
    let skipped = signed_event(1, 1, root_self_parent(keypair(1).peer_id()), None, vec![]);
    assert_matches!(
        hg.insert_event(skipped),
        Err(HashgraphError::SelfParentMismatch(_))
    );
}

#[test]
fn test_rejects_unknown_other_parent() {
    let mut hg = hashgraph(&[1, 2, 3]);
    let e0 = first_event(1);
    hg.insert_event(e0).unwrap();

    let phantom = EventHash::new([9; 32]);
    let e1 = signed_event(
        2,
        0,
        root_self_parent(keypair(2).peer_id()),
        Some(phantom),
        vec![],
    );
    assert_matches!(
        hg.insert_event(e1),
        Err(HashgraphError::ParentNotFound(_))
    );
}

#[test]
fn test_rejects_invalid_signature() {
    let mut hg = hashgraph(&[1, 2, 3]);
    let mut e0 = first_event(1);
    //Re-sign with a different key but keep the claimed creator
    e0.sign(&keypair(2)).unwrap();
    assert_matches!(
        hg.insert_event(e0),
        Err(HashgraphError::InvalidSignature)
    );
}

#[test]
fn test_wire_round_trip_through_second_graph() {
    let mut source = hashgraph(&[1, 2, 3]);
    let mut sink = hashgraph(&[1, 2, 3]);

    for event in classic_graph() {
        source.insert_event_and_run_consensus(event.clone()).unwrap();

        let wire = source.to_wire(&event).unwrap();
        let decoded = sink.read_wire_info(wire).unwrap();
        assert_eq!(decoded.hash(), event.hash());
        assert_eq!(decoded.body, event.body);
        assert!(decoded.verify().unwrap());

        sink.insert_event_and_run_consensus(decoded).unwrap();
    }

    assert_eq!(
        source.store().known_events(),
        sink.store().known_events()
    );
}

#[test]
fn test_pending_loaded_events_counts_payloads() {
    let mut hg = hashgraph(&[1, 2, 3]);

    hg.insert_event_and_run_consensus(first_event(1)).unwrap();
    assert_eq!(hg.pending_loaded_events, 0);

    let loaded = signed_event(2, 0, root_self_parent(keypair(2).peer_id()), None, vec![b"tx".to_vec()]);
    hg.insert_event_and_run_consensus(loaded).unwrap();
    assert_eq!(hg.pending_loaded_events, 1);
}

#[test]
fn test_no_anchor_block_initially() {
    let mut hg = hashgraph(&[1, 2, 3]);
    assert_matches!(
        hg.get_anchor_block_with_frame(),
        Err(HashgraphError::NoAnchorBlock)
    );
}
