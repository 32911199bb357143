use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;

use lru::LruCache;
use thiserror::Error;

use crate::hashgraph::block::{Block, BlockSignature};
use crate::hashgraph::event::{
    root_self_parent, Event, EventHash, WireBlockSignature, WireBody, WireEvent,
};
use crate::hashgraph::frame::{Frame, FrameEvent, Root, RootEvent};
use crate::hashgraph::round::RoundInfo;
use crate::hashgraph::sig_pool::SigPool;
use crate::hashgraph::store::{Store, StoreError};
use crate::peers::{PeerId, PeerSet};
use crate::utilities;
use crate::utilities::hash::HashType;

pub(crate) type Result<T> = std::result::Result<T, HashgraphError>;

///Fame voting falls back to a pseudo-random coin every this many rounds
///to break potential stalls.
const COIN_ROUND_FREQ: i64 = 10;

#[derive(Error, Debug)]
pub enum HashgraphError {
    #[error("Invalid event signature")]
    InvalidSignature,
    #[error("Creator not in peer set: {0}")]
    UnknownCreator(String),
    #[error("Self-parent mismatch for creator {0}")]
    SelfParentMismatch(String),
    #[error("Parent not found: {0}")]
    ParentNotFound(String),
    #[error("No anchor block")]
    NoAnchorBlock,
    #[error("Invalid frame hash")]
    InvalidFrameHash,
    #[error("Not enough valid block signatures")]
    InsufficientSignatures,
    #[error("Store: {0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

struct PendingRound {
    index: i64,
    decided: bool,
}

/// The consensus engine proper. Owns the store and every algorithmic
/// cache; exclusive access is guaranteed by the owning core.
pub(crate) struct Hashgraph {
    store: Box<dyn Store>,
    peers: PeerSet,

    ///Events whose round-received is still unknown, in insertion order
    pub(crate) undetermined_events: Vec<EventHash>,
    pending_rounds: Vec<PendingRound>,
    pub(crate) last_consensus_round: Option<i64>,
    anchor_block: Option<i64>,
    pub(crate) last_committed_round_events: usize,
    pub(crate) consensus_transactions: usize,
    ///Inserted events carrying transactions that have not reached consensus yet
    pub(crate) pending_loaded_events: usize,
    topological_index: i64,

    ///Signatures lifted out of gossiped events, waiting for their block
    sig_pool: SigPool,

    ///Root heads and base pseudo-parents, addressable by hash
    roots_by_hash: HashMap<EventHash, RootEvent>,

    ancestor_cache: LruCache<(EventHash, EventHash), bool>,
    strongly_see_cache: LruCache<(EventHash, EventHash), bool>,
}

impl Hashgraph {
    pub(crate) fn new(store: Box<dyn Store>) -> Self {
        let cache_size = NonZeroUsize::new(store.cache_size().max(1) * 8)
            .expect("cache size must be positive");
        let peers = store.peers();
        Self {
            store,
            peers,
            undetermined_events: vec![],
            pending_rounds: vec![],
            last_consensus_round: None,
            anchor_block: None,
            last_committed_round_events: 0,
            consensus_transactions: 0,
            pending_loaded_events: 0,
            topological_index: 0,
            sig_pool: SigPool::new(),
            roots_by_hash: HashMap::new(),
            ancestor_cache: LruCache::new(cache_size),
            strongly_see_cache: LruCache::new(cache_size),
        }
    }

    /// Creates base roots and the round-0 peer set. The result may later be
    /// replaced wholesale by a fast-forward reset.
    pub(crate) fn init(&mut self, peers: PeerSet) -> Result<()> {
        self.store.set_peer_set(0, peers.clone())?;
        self.peers = peers.clone();
        for peer in &peers.peers {
            let id = peer
                .id()
                .map_err(|_| HashgraphError::UnknownCreator(peer.pub_key.clone()))?;
            let root = Root::base(id);
            self.roots_by_hash.insert(root.head.hash, root.head.clone());
            self.store.set_root(peer.pub_key.clone(), root)?;
        }
        Ok(())
    }

    pub(crate) fn store(&mut self) -> &mut dyn Store {
        self.store.as_mut()
    }

    #[cfg(test)]
    pub(crate) fn into_store(self) -> Box<dyn Store> {
        self.store
    }

    pub(crate) fn peers(&self) -> &PeerSet {
        &self.peers
    }

    pub(crate) fn anchor_block(&self) -> Option<i64> {
        self.anchor_block
    }

    //++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++
    // Insert pipeline

    /// Full pipeline: validate and persist the event, then advance rounds,
    /// fame, order and decided rounds. Returns the newly finalised blocks,
    /// which the caller runs through the commit pipeline.
    pub(crate) fn insert_event_and_run_consensus(
        &mut self,
        event: Event,
    ) -> Result<Vec<Block>> {
        if !self.insert_event(event)? {
            //Already known, nothing new to decide
            return Ok(vec![]);
        }
        self.divide_rounds()?;
        self.decide_fame()?;
        self.find_order()?;
        self.process_decided_rounds()
    }

    /// Validates and persists one event. Returns false when the event was
    /// already present (duplicate insertion is explicitly harmless).
    pub(crate) fn insert_event(&mut self, mut event: Event) -> Result<bool> {
        let hash = event.hash();
        if self.store.contains_event(&hash) {
            log::trace!("Duplicate event {hash}, ignoring");
            return Ok(false);
        }

        if !self.peers.contains_pub_key(event.creator()) {
            return Err(HashgraphError::UnknownCreator(event.creator().to_string()));
        }

        if !event.verify().map_err(HashgraphError::Internal)? {
            return Err(HashgraphError::InvalidSignature);
        }

        self.check_self_parent(&event)?;
        self.check_other_parent(&event)?;

        event.topological_index = self.topological_index;
        self.topological_index += 1;

        if event.is_loaded() {
            self.pending_loaded_events += 1;
        }

        self.undetermined_events.push(hash);
        self.store.set_event(event)?;
        Ok(true)
    }

    /// The self-parent must be the creator's current head.
    fn check_self_parent(&mut self, event: &Event) -> Result<()> {
        let creator_id = self.creator_id(event.creator())?;
        let (last, _is_root) = self.store.last_event_from(creator_id)?;
        if *event.self_parent() != last {
            return Err(HashgraphError::SelfParentMismatch(
                event.creator().to_string(),
            ));
        }
        Ok(())
    }

    fn check_other_parent(&mut self, event: &Event) -> Result<()> {
        let Some(other_parent) = event.other_parent().copied() else {
            return Ok(());
        };
        if self.store.contains_event(&other_parent) {
            return Ok(());
        }
        if self.roots_by_hash.contains_key(&other_parent) {
            return Ok(());
        }
        Err(HashgraphError::ParentNotFound(other_parent.to_string()))
    }

    fn creator_id(&self, creator_hex: &str) -> Result<PeerId> {
        self.peers
            .by_pub_key(creator_hex)
            .ok_or_else(|| HashgraphError::UnknownCreator(creator_hex.to_string()))?
            .id()
            .map_err(|_| HashgraphError::UnknownCreator(creator_hex.to_string()))
    }

    //++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++
    // Rounds

    /// Assigns a round and witness flag to every undetermined event that
    /// does not have one yet. Events are processed in insertion order, so
    /// parents always come first.
    pub(crate) fn divide_rounds(&mut self) -> Result<()> {
        for hash in self.undetermined_events.clone() {
            let event = self.store.get_event(&hash)?;
            if event.round.is_some() {
                continue;
            }

            let round = self.assign_round(&event)?;
            let self_parent_round = self.parent_round(event.self_parent())?;
            let witness = round > self_parent_round;

            let mut updated = event;
            updated.round = Some(round);
            self.replace_event(updated)?;

            let mut round_info = self
                .store
                .get_round(round)
                .unwrap_or_default();
            round_info.add_created_event(hash, witness);
            self.store.set_round(round, round_info)?;

            if !self.pending_rounds.iter().any(|r| r.index == round) {
                self.pending_rounds.push(PendingRound {
                    index: round,
                    decided: false,
                });
                self.pending_rounds.sort_by_key(|r| r.index);
            }
        }
        Ok(())
    }

    /// max(parent rounds), bumped by one when the event strongly sees a
    /// super-majority of that round's witnesses. Creators with no history
    /// start at round 0.
    fn assign_round(&mut self, event: &Event) -> Result<i64> {
        let self_parent_round = self.parent_round(event.self_parent())?;
        let other_parent_round = match event.other_parent() {
            Some(op) => self.parent_round(&op.to_owned())?,
            None => -1,
        };
        let parent_round = self_parent_round.max(other_parent_round);
        if parent_round == -1 {
            return Ok(0);
        }

        let witnesses = self.store.round_witnesses(parent_round);
        let mut seen = 0;
        for witness in witnesses {
            if self.strongly_see(event.hash(), witness)? {
                seen += 1;
            }
        }
        if seen >= self.peers.super_majority() {
            Ok(parent_round + 1)
        } else {
            Ok(parent_round)
        }
    }

    fn parent_round(&mut self, hash: &EventHash) -> Result<i64> {
        if let Some(root_event) = self.roots_by_hash.get(hash) {
            return Ok(root_event.round);
        }
        let parent = self.store.get_event(hash)?;
        parent
            .round
            .ok_or_else(|| anyhow::anyhow!("Parent {hash} has no round yet").into())
    }

    //++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++
    // Ancestry

    /// y is an ancestor of x (inclusive). Pruned by round monotonicity and
    /// per-creator indexes; memoised.
    fn see(&mut self, x: EventHash, y: EventHash) -> Result<bool> {
        if x == y {
            return Ok(true);
        }
        if let Some(cached) = self.ancestor_cache.get(&(x, y)) {
            return Ok(*cached);
        }

        let target = match self.store.get_event(&y) {
            Ok(event) => event,
            //Root boundary: pre-frame events are invisible
            Err(_) => {
                self.ancestor_cache.put((x, y), false);
                return Ok(false);
            }
        };
        let target_round = target.round.unwrap_or(-1);

        let mut found = false;
        let mut visited: HashSet<EventHash> = HashSet::new();
        let mut stack = vec![x];
        'search: while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Ok(event) = self.store.get_event(&current) else {
                continue;
            };
            let mut parents = vec![*event.self_parent()];
            if let Some(op) = event.other_parent() {
                parents.push(*op);
            }
            for parent in parents {
                if parent == y {
                    found = true;
                    break 'search;
                }
                if let Some(cached) = self.ancestor_cache.get(&(parent, y)) {
                    if *cached {
                        found = true;
                        break 'search;
                    }
                    continue;
                }
                if self.roots_by_hash.contains_key(&parent) {
                    continue;
                }
                let Ok(parent_event) = self.store.get_event(&parent) else {
                    continue;
                };
                //An ancestor's round never exceeds its descendant's
                if parent_event.round.unwrap_or(i64::MAX) < target_round {
                    continue;
                }
                if parent_event.creator() == target.creator()
                    && parent_event.index() < target.index()
                {
                    continue;
                }
                stack.push(parent);
            }
        }

        self.ancestor_cache.put((x, y), found);
        Ok(found)
    }

    /// x strongly sees y when the creators on the see-paths between them
    /// carry more than 2/3 of the stake.
    fn strongly_see(&mut self, x: EventHash, y: EventHash) -> Result<bool> {
        if let Some(cached) = self.strongly_see_cache.get(&(x, y)) {
            return Ok(*cached);
        }

        let mut path_creators: HashSet<String> = HashSet::new();
        let mut visited: HashSet<EventHash> = HashSet::new();
        let mut stack = vec![x];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if !self.see(current, y)? {
                continue;
            }
            let Ok(event) = self.store.get_event(&current) else {
                continue;
            };
            path_creators.insert(event.creator().to_string());
            stack.push(*event.self_parent());
            if let Some(op) = event.other_parent() {
                stack.push(*op);
            }
        }

        let stake = path_creators
            .iter()
            .filter(|creator| self.peers.contains_pub_key(creator))
            .count();
        let result = stake >= self.peers.super_majority();
        self.strongly_see_cache.put((x, y), result);
        Ok(result)
    }

    //++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++
    // Fame

    /// Virtual Byzantine agreement: witnesses of later rounds vote on each
    /// undecided witness; a super-majority of matching votes among the
    /// strongly-seen previous-round witnesses decides.
    pub(crate) fn decide_fame(&mut self) -> Result<()> {
        let mut votes: HashMap<(EventHash, EventHash), bool> = HashMap::new();
        let pending: Vec<i64> = self
            .pending_rounds
            .iter()
            .filter(|r| !r.decided)
            .map(|r| r.index)
            .collect();

        for round_index in pending {
            let mut round_info = self.store.get_round(round_index)?;
            let witnesses: Vec<EventHash> = round_info
                .witnesses()
                .into_iter()
                .filter(|w| round_info.fame(w).is_none())
                .collect();

            for x in witnesses {
                'vote_loop: for j in (round_index + 1)..=self.store.last_round() {
                    for y in self.store.round_witnesses(j) {
                        if j == round_index + 1 {
                            let sees = self.see(y, x)?;
                            votes.insert((y, x), sees);
                            continue;
                        }

                        let previous = self.store.round_witnesses(j - 1);
                        let mut yays = 0usize;
                        let mut nays = 0usize;
                        for w in previous {
                            if !self.strongly_see(y, w)? {
                                continue;
                            }
                            match votes.get(&(w, x)) {
                                Some(true) => yays += 1,
                                Some(false) => nays += 1,
                                None => {}
                            }
                        }
                        let majority_vote = yays >= nays;
                        let tally = yays.max(nays);

                        if (j - round_index) % COIN_ROUND_FREQ != 0 {
                            //Normal round
                            if tally >= self.peers.super_majority() {
                                round_info.set_fame(&x, majority_vote);
                                votes.insert((y, x), majority_vote);
                                break 'vote_loop;
                            }
                            votes.insert((y, x), majority_vote);
                        } else {
                            //Coin round
                            if tally >= self.peers.super_majority() {
                                votes.insert((y, x), majority_vote);
                            } else {
                                let coin = self.coin_vote(&y)?;
                                votes.insert((y, x), coin);
                            }
                        }
                    }
                }
            }

            let decided = round_info.witnesses_decided();
            round_info.decided = decided;
            self.store.set_round(round_index, round_info)?;
            if decided {
                for pending_round in &mut self.pending_rounds {
                    if pending_round.index == round_index {
                        pending_round.decided = true;
                    }
                }
            }
        }
        Ok(())
    }

    /// Pseudo-random but deterministic vote derived from the witness
    /// signature: low bit of the middle byte.
    fn coin_vote(&mut self, witness: &EventHash) -> Result<bool> {
        let event = self.store.get_event(witness)?;
        let signature = event.signature_bytes().map_err(HashgraphError::Internal)?;
        let middle = signature.get(signature.len() / 2).copied().unwrap_or(0);
        Ok(middle & 1 == 1)
    }

    //++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++
    // Order

    /// Assigns round-received to every event all famous witnesses of a
    /// decided round can see.
    pub(crate) fn find_order(&mut self) -> Result<()> {
        let mut still_undetermined = vec![];

        for x in self.undetermined_events.clone() {
            let event = self.store.get_event(&x)?;
            let Some(event_round) = event.round else {
                still_undetermined.push(x);
                continue;
            };

            let mut received = None;
            for r in (event_round + 1)..=self.store.last_round() {
                let Ok(mut round_info) = self.store.get_round(r) else {
                    break;
                };
                //Fame settles in round order; an undecided round blocks
                //everything behind it
                if !round_info.witnesses_decided() {
                    break;
                }
                let famous = round_info.famous_witnesses();
                if famous.is_empty() {
                    continue;
                }

                let mut seen_by_all = true;
                for witness in &famous {
                    if !self.see(*witness, x)? {
                        seen_by_all = false;
                        break;
                    }
                }
                if seen_by_all {
                    round_info.add_received_event(x);
                    self.store.set_round(r, round_info)?;

                    let mut updated = self.store.get_event(&x)?;
                    updated.round_received = Some(r);
                    self.replace_event(updated)?;

                    received = Some(r);
                    break;
                }
            }

            if received.is_none() {
                still_undetermined.push(x);
            }
        }

        self.undetermined_events = still_undetermined;
        Ok(())
    }

    /// Emits a block per decided round that ordered any events, in round
    /// order. Blocks are returned for the commit pipeline; embedded peer
    /// signatures go to the signature pool.
    pub(crate) fn process_decided_rounds(&mut self) -> Result<Vec<Block>> {
        let mut blocks = vec![];
        let mut processed = 0;

        for i in 0..self.pending_rounds.len() {
            if !self.pending_rounds[i].decided {
                break;
            }
            let round_index = self.pending_rounds[i].index;
            let events = self.ordered_round_events(round_index)?;

            for event in &events {
                self.store.add_consensus_event(event.hash())?;
                self.consensus_transactions += event.transactions().len();
                if event.is_loaded() && self.pending_loaded_events > 0 {
                    self.pending_loaded_events -= 1;
                }
                for signature in event.block_signatures() {
                    self.sig_pool.add(signature.clone());
                }
            }

            self.last_consensus_round = Some(round_index);
            self.last_committed_round_events = events.len();

            if !events.is_empty() {
                let frame = self.get_frame(round_index)?;
                let frame_hash = frame.hash().map_err(HashgraphError::Internal)?;
                let transactions = events
                    .iter()
                    .flat_map(|e| e.transactions().to_vec())
                    .collect();
                let block = Block::new(
                    self.store.last_block_index() + 1,
                    round_index,
                    frame_hash,
                    transactions,
                );
                self.store.set_block(block.clone())?;
                log::debug!("Decided round {round_index} produced {block}");
                blocks.push(block);
            }

            processed = i + 1;
        }

        self.pending_rounds.drain(..processed);
        Ok(blocks)
    }

    /// The round's received events in consensus order: by median timestamp,
    /// ties whitened with the round's famous-witness hash.
    fn ordered_round_events(&mut self, round_index: i64) -> Result<Vec<Event>> {
        let round_info = self.store.get_round(round_index)?;
        let famous = round_info.famous_witnesses();
        let whiten_key =
            HashType::of(utilities::encode(&famous).map_err(HashgraphError::Internal)?);

        let mut events = vec![];
        for hash in &round_info.received {
            let mut event = self.store.get_event(hash)?;
            if event.consensus_timestamp.is_none() {
                let timestamp = self.median_timestamp(&famous, *hash)?;
                event.consensus_timestamp = Some(timestamp);
                self.replace_event(event.clone())?;
            }
            events.push(event);
        }

        let mut keyed: Vec<(u64, HashType, Event)> = vec![];
        for event in events {
            let signature = event.signature_bytes().map_err(HashgraphError::Internal)?;
            let whitened = HashType::of(&signature).xor(whiten_key.as_bytes());
            keyed.push((
                event.consensus_timestamp.unwrap_or_default(),
                whitened,
                event,
            ));
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        Ok(keyed.into_iter().map(|(_, _, e)| e).collect())
    }

    /// Median over the timestamps at which each famous witness's creator
    /// line first saw the event.
    fn median_timestamp(&mut self, famous: &[EventHash], x: EventHash) -> Result<u64> {
        let mut timestamps = vec![];
        for witness in famous {
            let mut current = self.store.get_event(witness)?;
            loop {
                let self_parent = *current.self_parent();
                if self.roots_by_hash.contains_key(&self_parent) {
                    break;
                }
                let Ok(parent) = self.store.get_event(&self_parent) else {
                    break;
                };
                if !self.see(parent.hash(), x)? {
                    break;
                }
                current = parent;
            }
            timestamps.push(current.body.timestamp);
        }
        timestamps.sort_unstable();
        timestamps
            .get(timestamps.len() / 2)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("No famous witnesses for timestamp median").into())
    }

    fn replace_event(&mut self, event: Event) -> Result<()> {
        self.store.replace_event(event)?;
        Ok(())
    }

    //++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++
    // Frames, anchors, signatures

    /// Deterministic snapshot of the graph at a decided round, independent
    /// of when it is computed.
    pub(crate) fn get_frame(&mut self, round_index: i64) -> Result<Frame> {
        let peers = self.store.get_peer_set(round_index)?;
        let events = self.ordered_round_events(round_index)?;

        //Roots: per participant, the latest consensus event at or before
        //this round; the stored root when there is none.
        let mut roots: std::collections::BTreeMap<String, Root> = std::collections::BTreeMap::new();
        for peer in &peers.peers {
            let root = self
                .store
                .get_root(&peer.pub_key)
                .unwrap_or_else(|_| Root::base(peer.id().unwrap_or_default()));
            roots.insert(peer.pub_key.clone(), root);
        }
        for hash in self.store.consensus_events() {
            let Ok(event) = self.store.get_event(&hash) else {
                continue;
            };
            if event.round_received.unwrap_or(i64::MAX) > round_index {
                continue;
            }
            let creator_id = self.creator_id(event.creator())?;
            let head = RootEvent {
                hash: event.hash(),
                creator_id,
                index: event.index(),
                round: event.round.unwrap_or(0),
            };
            let entry = roots
                .entry(event.creator().to_string())
                .or_insert_with(|| Root::new(head.clone()));
            if entry.head.index <= head.index {
                entry.head = head;
            }
        }

        //Other-parents referenced from inside the frame but living before
        //it, keyed by (creator id, index) of the missing parent. A node
        //that itself fast-forwarded may only hold a summary of the parent;
        //the summary carries the same coordinates, keeping the frame hash
        //identical across nodes.
        let frame_hashes: HashSet<EventHash> = events.iter().map(|e| e.hash()).collect();
        for event in &events {
            let Some(other_parent) = event.other_parent() else {
                continue;
            };
            if frame_hashes.contains(other_parent) {
                continue;
            }
            let summary = if let Ok(parent) = self.store.get_event(other_parent) {
                RootEvent {
                    hash: parent.hash(),
                    creator_id: self.creator_id(parent.creator())?,
                    index: parent.index(),
                    round: parent.round.unwrap_or(0),
                }
            } else if let Some(root_event) = self.roots_by_hash.get(other_parent) {
                root_event.clone()
            } else {
                continue;
            };
            if let Some(root) = roots.get_mut(event.creator()) {
                root.others.insert(
                    format!("{}:{}", summary.creator_id.inner(), summary.index),
                    summary,
                );
            }
        }

        //Received events can belong to earlier rounds; the witness flag
        //lives in the round each event was created in
        let mut frame_events = Vec::with_capacity(events.len());
        for event in events {
            let round = event.round.unwrap_or(round_index);
            let witness = self
                .store
                .get_round(round)
                .map(|info| info.is_witness(&event.hash()))
                .unwrap_or(false);
            frame_events.push(FrameEvent {
                event,
                round,
                witness,
            });
        }

        Ok(Frame {
            round: round_index,
            peers: peers.peers.clone(),
            roots,
            events: frame_events,
        })
    }

    /// Applies pending peer signatures to their blocks; signatures for
    /// blocks this node has not produced yet stay in the pool.
    pub(crate) fn process_sig_pool(&mut self) -> Result<()> {
        let pending = self.sig_pool.drain();
        for signature in pending {
            if !self.peers.contains_pub_key(&signature.validator) {
                log::warn!(
                    "Dropping block signature from unknown validator {}",
                    signature.validator
                );
                continue;
            }
            let mut block = match self.store.get_block(signature.index) {
                Ok(block) => block,
                Err(_) => {
                    //Block not decided locally yet, retry later
                    self.sig_pool.add(signature);
                    continue;
                }
            };
            match block.verify_signature(&signature) {
                Ok(true) => {}
                Ok(false) => {
                    log::warn!("Dropping invalid signature for block {}", signature.index);
                    continue;
                }
                Err(err) => {
                    log::warn!("Error verifying block signature: {err}");
                    continue;
                }
            }
            //Duplicate from the same validator is harmless
            if block.set_signature(signature).is_ok() {
                self.store.set_block(block.clone())?;
                self.maybe_set_anchor(&block)?;
            }
        }
        Ok(())
    }

    /// Promotes the block to anchor once its signatures reach quorum.
    pub(crate) fn maybe_set_anchor(&mut self, block: &Block) -> Result<()> {
        if block.signature_count() < self.peers.super_majority() {
            return Ok(());
        }
        if self.anchor_block.map_or(true, |index| block.index() > index) {
            self.anchor_block = Some(block.index());
            log::debug!("New anchor {block}");
        }
        Ok(())
    }

    pub(crate) fn get_anchor_block_with_frame(&mut self) -> Result<(Block, Frame)> {
        let index = self.anchor_block.ok_or(HashgraphError::NoAnchorBlock)?;
        let block = self.store.get_block(index)?;
        let frame = self.get_frame(block.round_received())?;
        Ok((block, frame))
    }

    /// Verifies quorum signatures against the given peer set.
    pub(crate) fn check_block(&mut self, block: &Block, peers: &PeerSet) -> Result<()> {
        if !block
            .quorum_reached(peers)
            .map_err(HashgraphError::Internal)?
        {
            return Err(HashgraphError::InsufficientSignatures);
        }
        Ok(())
    }

    //++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++
    // Reset and bootstrap

    /// Fast-forward: wipes graph state and adopts the frame as the new
    /// baseline. Frame events keep their decided coordinates and do not go
    /// through consensus again.
    pub(crate) fn reset(&mut self, block: Block, frame: Frame) -> Result<()> {
        self.store.reset_from_frame(&frame)?;
        self.store.set_block(block.clone())?;

        self.undetermined_events.clear();
        self.pending_rounds.clear();
        self.ancestor_cache.clear();
        self.strongly_see_cache.clear();
        self.sig_pool = SigPool::new();
        self.pending_loaded_events = 0;
        self.topological_index = 0;
        self.last_consensus_round = Some(block.round_received());
        self.anchor_block = None;
        self.last_committed_round_events = 0;
        self.consensus_transactions = 0;
        self.peers = self.store.peers();

        self.roots_by_hash.clear();
        for root in frame.roots.values() {
            self.roots_by_hash.insert(root.head.hash, root.head.clone());
            for other in root.others.values() {
                self.roots_by_hash.insert(other.hash, other.clone());
            }
            //Creators with no pre-frame history still chain off base roots
            let base = RootEvent::base(root.head.creator_id);
            self.roots_by_hash.insert(base.hash, base);
        }

        let mut round_infos: HashMap<i64, RoundInfo> = HashMap::new();
        for frame_event in &frame.events {
            let mut event = frame_event.event.clone();
            event.refresh_hash().map_err(HashgraphError::Internal)?;
            event.round = Some(frame_event.round);
            event.round_received = Some(frame.round);
            event.topological_index = self.topological_index;
            self.topological_index += 1;

            let hash = event.hash();
            round_infos
                .entry(frame_event.round)
                .or_default()
                .add_created_event(hash, frame_event.witness);

            self.store.set_event(event)?;
            self.store.add_consensus_event(hash)?;
        }
        for (round_index, round_info) in round_infos {
            let mut info = round_info;
            info.decided = true;
            self.store.set_round(round_index, info)?;
        }

        Ok(())
    }

    /// Replays the stored events through the pipeline to rebuild all
    /// derived state after a restart. The returned blocks go through the
    /// commit pipeline again, which also replays the application.
    pub(crate) fn bootstrap(&mut self) -> Result<Vec<Block>> {
        let mut events = self.store.topological_events()?;
        crate::hashgraph::event::sort_topological(&mut events);

        self.store.clear_consensus_state()?;
        self.undetermined_events.clear();
        self.pending_rounds.clear();
        self.topological_index = 0;
        self.pending_loaded_events = 0;

        for event in events {
            //Strip cached coordinates so the replay recomputes them
            let mut replayed = event;
            replayed.round = None;
            replayed.round_received = None;
            replayed.consensus_timestamp = None;
            replayed.topological_index = self.topological_index;
            self.topological_index += 1;
            if replayed.is_loaded() {
                self.pending_loaded_events += 1;
            }
            self.undetermined_events.push(replayed.hash());
            self.replace_event(replayed)?;
        }

        self.divide_rounds()?;
        self.decide_fame()?;
        self.find_order()?;
        self.process_decided_rounds()
    }

    //++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++
    // Wire conversion

    /// Resolves a wire event's (creator, index) parent references against
    /// the store.
    pub(crate) fn read_wire_info(&mut self, wire: WireEvent) -> Result<Event> {
        let creator_peer = self
            .peers
            .by_id(&PeerId(wire.body.creator_id))
            .ok_or_else(|| HashgraphError::UnknownCreator(wire.body.creator_id.to_string()))?
            .clone();
        let creator_id = PeerId(wire.body.creator_id);

        let self_parent = if wire.body.self_parent_index < 0 {
            root_self_parent(creator_id)
        } else {
            self.store
                .participant_event(creator_id, wire.body.self_parent_index)
                .map_err(|_| {
                    HashgraphError::ParentNotFound(format!(
                        "self-parent {}:{}",
                        wire.body.creator_id, wire.body.self_parent_index
                    ))
                })?
        };

        let other_parent = if wire.body.other_parent_creator_id < 0 {
            None
        } else {
            let other_creator = PeerId(wire.body.other_parent_creator_id as u32);
            let resolved = self
                .store
                .participant_event(other_creator, wire.body.other_parent_index)
                .or_else(|_| {
                    //Fall back to the root summaries carried by the frame
                    let root = self.store.get_root(&creator_peer.pub_key)?;
                    let key = format!(
                        "{}:{}",
                        wire.body.other_parent_creator_id, wire.body.other_parent_index
                    );
                    root.others
                        .get(&key)
                        .map(|summary| summary.hash)
                        .ok_or(StoreError::ParticipantEventNotFound(
                            wire.body.other_parent_index,
                            other_creator.to_string(),
                        ))
                })
                .map_err(|_| {
                    HashgraphError::ParentNotFound(format!(
                        "other-parent {}:{}",
                        wire.body.other_parent_creator_id, wire.body.other_parent_index
                    ))
                })?;
            Some(resolved)
        };

        let block_signatures = wire
            .body
            .block_signatures
            .into_iter()
            .map(|s| BlockSignature {
                validator: creator_peer.pub_key.clone(),
                index: s.index,
                signature: s.signature,
            })
            .collect();

        let mut event = Event::new(
            wire.body.transactions,
            block_signatures,
            self_parent,
            other_parent,
            creator_peer.pub_key.clone(),
            wire.body.index,
        );
        event.body.timestamp = wire.body.timestamp;
        event.signature = wire.signature;
        event.refresh_hash().map_err(HashgraphError::Internal)?;
        Ok(event)
    }

    /// Converts an event to its compact transfer form.
    pub(crate) fn to_wire(&mut self, event: &Event) -> Result<WireEvent> {
        let creator_id = self.creator_id(event.creator())?;

        let (other_parent_creator_id, other_parent_index) = match event.other_parent() {
            None => (-1, -1),
            Some(op) => {
                if let Some(root_event) = self.roots_by_hash.get(op) {
                    (root_event.creator_id.inner() as i64, root_event.index)
                } else {
                    let parent = self.store.get_event(op)?;
                    let parent_creator = self.creator_id(parent.creator())?;
                    (parent_creator.inner() as i64, parent.index())
                }
            }
        };

        Ok(WireEvent {
            body: WireBody {
                transactions: event.transactions().to_vec(),
                block_signatures: event
                    .block_signatures()
                    .iter()
                    .map(|s| WireBlockSignature {
                        index: s.index,
                        signature: s.signature.clone(),
                    })
                    .collect(),
                self_parent_index: event.index() - 1,
                other_parent_creator_id,
                other_parent_index,
                creator_id: creator_id.inner(),
                index: event.index(),
                timestamp: event.body.timestamp,
            },
            signature: event.signature.clone(),
        })
    }
}
