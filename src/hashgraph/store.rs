use std::collections::BTreeMap;

use thiserror::Error;

use crate::hashgraph::block::Block;
use crate::hashgraph::event::{Event, EventHash};
use crate::hashgraph::frame::{Frame, Root};
use crate::hashgraph::round::RoundInfo;
use crate::peers::{PeerId, PeerSet};

pub(crate) type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Event not found: {0}")]
    EventNotFound(String),
    #[error("No event with index {0} for participant {1}")]
    ParticipantEventNotFound(i64, String),
    #[error("Round not found: {0}")]
    RoundNotFound(i64),
    #[error("Block not found: {0}")]
    BlockNotFound(i64),
    #[error("Root not found: {0}")]
    RootNotFound(String),
    #[error("Peer set not found for round {0}")]
    PeerSetNotFound(i64),
    #[error("Unknown participant: {0}")]
    UnknownParticipant(String),
    #[error("Key already exists: {0}")]
    KeyAlreadyExists(String),
    #[error("Store io: {0}")]
    Io(String),
}

/// Repository of everything the consensus algorithm persists: events and
/// their per-participant index, rounds, blocks, roots and peer sets.
/// Callers serialise access through the core lock, so the trait is
/// synchronous. `&mut self` on reads is deliberate: the in-memory backend
/// tracks recency on every lookup.
pub(crate) trait Store: Send {
    fn cache_size(&self) -> usize;

    fn get_event(&mut self, hash: &EventHash) -> Result<Event>;
    fn set_event(&mut self, event: Event) -> Result<()>;
    /// Upsert used by the consensus pipeline to persist derived
    /// coordinates (round, round-received, consensus timestamp).
    fn replace_event(&mut self, event: Event) -> Result<()>;
    fn contains_event(&mut self, hash: &EventHash) -> bool;

    /// Hashes of `creator`'s events with index strictly greater than `skip`,
    /// in index order.
    fn participant_events(&self, creator: PeerId, skip: i64) -> Result<Vec<EventHash>>;
    /// Hash of `creator`'s event at exactly `index`; resolves the root head
    /// when the index predates the first stored event.
    fn participant_event(&self, creator: PeerId, index: i64) -> Result<EventHash>;
    /// Latest event of `creator`; `true` means there is none and the hash is
    /// the root head.
    fn last_event_from(&self, creator: PeerId) -> Result<(EventHash, bool)>;
    /// Highest known index per participant; the root head index (-1 at
    /// bootstrap) when no events are stored.
    fn known_events(&self) -> BTreeMap<PeerId, i64>;

    fn add_consensus_event(&mut self, hash: EventHash) -> Result<()>;
    fn consensus_events(&self) -> Vec<EventHash>;
    fn consensus_events_count(&self) -> usize;

    fn get_round(&mut self, index: i64) -> Result<RoundInfo>;
    fn set_round(&mut self, index: i64, round: RoundInfo) -> Result<()>;
    fn last_round(&self) -> i64;
    fn round_witnesses(&mut self, index: i64) -> Vec<EventHash>;

    fn get_root(&self, participant: &str) -> Result<Root>;
    fn set_root(&mut self, participant: String, root: Root) -> Result<()>;

    fn get_block(&mut self, index: i64) -> Result<Block>;
    fn set_block(&mut self, block: Block) -> Result<()>;
    fn last_block_index(&self) -> i64;

    fn get_peer_set(&self, round: i64) -> Result<PeerSet>;
    fn set_peer_set(&mut self, round: i64, peers: PeerSet) -> Result<()>;
    fn peers(&self) -> PeerSet;

    /// Events in insertion order, for bootstrap replay.
    fn topological_events(&mut self) -> Result<Vec<Event>>;

    /// Drops everything derived by consensus (rounds, blocks, the
    /// consensus list) so a bootstrap replay can rebuild it from the
    /// events alone.
    fn clear_consensus_state(&mut self) -> Result<()>;

    /// Wipes graph state and installs the frame's peers and roots; the
    /// participant index is reseeded from the root heads.
    fn reset_from_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Durable backends report whether a previous run left state behind.
    fn need_bootstrap(&self) -> bool;

    fn close(&mut self) -> Result<()>;
}
