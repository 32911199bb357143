use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;

use crate::app::{Application, ApiBlock};
use crate::crypto::Keypair;
use crate::hashgraph::block::{Block, BlockSignature};
use crate::hashgraph::event::{Event, EventHash, WireEvent};
use crate::hashgraph::frame::Frame;
use crate::hashgraph::graph::Hashgraph;
use crate::hashgraph::sig_pool::SigPool;
use crate::hashgraph::store::Store;
use crate::hashgraph::{HashgraphError, StoreError};
use crate::peers::{PeerId, PeerSet, PeerSetError, ToPeerId};


pub(crate) type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Hashgraph: {0}")]
    Hashgraph(#[from] HashgraphError),
    #[error("Store: {0}")]
    Store(#[from] StoreError),
    #[error("Invalid peer set: {0}")]
    PeerSet(#[from] PeerSetError),
    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

/// The node-local consensus engine: owns the hashgraph, the signing key,
/// the transaction and signature pools, and the heads recorded from
/// gossip. All access is serialised by the node's core lock.
pub(crate) struct Core {
    id: PeerId,
    keypair: Arc<Keypair>,
    pub_key_hex: String,
    hg: Hashgraph,
    peers: PeerSet,

    ///Hash and index of this node's latest self-event
    pub(crate) head: EventHash,
    pub(crate) seq: i64,

    ///Latest events received per peer, waiting to be recorded as the
    ///other-parent of the next self-event
    heads: HashMap<PeerId, Option<Event>>,

    transaction_pool: Vec<Vec<u8>>,
    self_block_signatures: SigPool,

    application: Arc<dyn Application>,
}

impl Core {
    pub(crate) fn new(
        keypair: Arc<Keypair>,
        peers: PeerSet,
        store: Box<dyn Store>,
        application: Arc<dyn Application>,
    ) -> Result<Self> {
        let id = keypair.peer_id();
        let pub_key_hex = keypair.public_key().to_hex();

        let mut hg = Hashgraph::new(store);
        hg.init(peers.clone())?;

        let mut core = Self {
            id,
            keypair,
            pub_key_hex,
            hg,
            peers,
            head: EventHash::default(),
            seq: -1,
            heads: HashMap::new(),
            transaction_pool: vec![],
            self_block_signatures: SigPool::new(),
            application,
        };
        core.set_head_and_seq()?;
        Ok(core)
    }

    pub(crate) fn id(&self) -> PeerId {
        self.id
    }

    pub(crate) fn peers(&self) -> &PeerSet {
        &self.peers
    }

    /// Positions head and seq on the creator's latest event, falling back
    /// to the root summary when there is none (or its body is gone).
    pub(crate) fn set_head_and_seq(&mut self) -> Result<()> {
        let (last, is_root) = self.hg.store().last_event_from(self.id)?;

        if is_root {
            let root = self.hg.store().get_root(&self.pub_key_hex.clone())?;
            self.head = root.head.hash;
            self.seq = root.head.index;
        } else {
            match self.hg.store().get_event(&last) {
                Ok(event) => {
                    self.head = last;
                    self.seq = event.index();
                }
                Err(_) => {
                    let root = self.hg.store().get_root(&self.pub_key_hex.clone())?;
                    self.head = root.head.hash;
                    self.seq = root.head.index;
                }
            }
        }

        log::debug!("SetHeadAndSeq head {} seq {}", self.head, self.seq);
        Ok(())
    }

    /// Replays the store after a restart to rebuild the in-memory caches.
    /// Blocks run through the commit pipeline again, replaying the
    /// application alongside.
    pub(crate) fn bootstrap(&mut self) -> Result<()> {
        let blocks = self.hg.bootstrap()?;
        for block in blocks {
            self.commit(block);
        }
        self.hg.process_sig_pool()?;
        Ok(())
    }

    //++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++

    fn sign_and_insert_self_event(&mut self, mut event: Event) -> Result<()> {
        event.sign(&self.keypair).map_err(CoreError::Internal)?;
        self.insert_event_and_run_consensus(event)
    }

    pub(crate) fn insert_event_and_run_consensus(&mut self, event: Event) -> Result<()> {
        let creator_is_self = event.creator() == self.pub_key_hex;
        let hash = event.hash();
        let index = event.index();

        let blocks = self.hg.insert_event_and_run_consensus(event)?;

        if creator_is_self {
            self.head = hash;
            self.seq = index;
        }

        for block in blocks {
            self.commit(block);
        }
        Ok(())
    }

    /// Commit pipeline for one finalised block: hand it to the application,
    /// record the returned state hash, sign, persist, and pool the
    /// signature for broadcast. An application error skips signing and the
    /// anchor; ordering continues regardless.
    fn commit(&mut self, mut block: Block) {
        match self.application.commit_block(ApiBlock::from(&block)) {
            Ok(response) => {
                block.set_state_hash(response.state_hash);
                if !response.internal_transactions.is_empty() {
                    //Opaque pass-through; nothing in the core interprets these
                    log::debug!(
                        "Block {} carried {} internal transactions",
                        block.index(),
                        response.internal_transactions.len()
                    );
                }

                match self.sign_block(&mut block) {
                    Ok(signature) => {
                        if let Err(err) = self.hg.maybe_set_anchor(&block) {
                            log::error!("Error updating anchor block: {err}");
                        }
                        self.self_block_signatures.add(signature);
                    }
                    Err(err) => log::error!("Error signing block {}: {err}", block.index()),
                }
            }
            Err(err) => {
                log::error!("Commit callback failed for block {}: {err}", block.index());
            }
        }
    }

    fn sign_block(&mut self, block: &mut Block) -> Result<BlockSignature> {
        let signature = block.sign(&self.keypair).map_err(CoreError::Internal)?;
        block
            .set_signature(signature.clone())
            .map_err(CoreError::Internal)?;
        self.hg.store().set_block(block.clone())?;
        Ok(signature)
    }

    //++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++

    pub(crate) fn known_events(&mut self) -> BTreeMap<PeerId, i64> {
        self.hg.store().known_events()
    }

    /// True when this node holds more events unknown to `known` than the
    /// configured limit allows; the peer should fast-forward instead.
    pub(crate) fn over_sync_limit(&mut self, known: &BTreeMap<PeerId, i64>, limit: usize) -> bool {
        let mut total_unknown = 0i64;
        for (id, last_index) in self.known_events() {
            let other = known.get(&id).copied().unwrap_or(-1);
            if last_index > other {
                total_unknown += last_index - other;
            }
        }
        total_unknown > limit as i64
    }

    /// Events this node knows about that are missing from `known`, in
    /// topological order.
    pub(crate) fn event_diff(&mut self, known: &BTreeMap<PeerId, i64>) -> Result<Vec<Event>> {
        let mut unknown = vec![];
        for (id, last_index) in known {
            if self.peers.by_id(id).is_none() {
                continue;
            }
            let hashes = self.hg.store().participant_events(*id, *last_index)?;
            for hash in hashes {
                unknown.push(self.hg.store().get_event(&hash)?);
            }
        }
        crate::hashgraph::event::sort_topological(&mut unknown);
        Ok(unknown)
    }

    /// Decodes and inserts a peer's unknown events, which arrive in
    /// topological order, then creates a new self-event when anything is
    /// pending.
    pub(crate) fn sync(&mut self, from_id: PeerId, unknown_events: Vec<WireEvent>) -> Result<()> {
        log::debug!(
            "Sync from {from_id}: {} events, {} pooled txs, {} pooled sigs",
            unknown_events.len(),
            self.transaction_pool.len(),
            self.self_block_signatures.len()
        );

        let mut other_head: Option<Event> = None;
        for wire_event in unknown_events {
            let creator_id = PeerId(wire_event.body.creator_id);
            let index = wire_event.body.index;

            let event = self.hg.read_wire_info(wire_event)?;
            self.insert_event_and_run_consensus(event.clone())?;

            if creator_id == from_id {
                other_head = Some(event);
            }

            //A newer event from this creator outdates any recorded head
            let outdated = matches!(
                self.heads.get(&creator_id),
                Some(Some(recorded)) if index > recorded.index()
            );
            if outdated {
                self.heads.remove(&creator_id);
            }
        }

        //Do not overwrite a non-empty head with an empty one
        let replace = match self.heads.get(&from_id) {
            None | Some(None) => true,
            Some(Some(recorded)) => other_head
                .as_ref()
                .map(|oh| oh.index() > recorded.index())
                .unwrap_or(false),
        };
        if replace {
            self.heads.insert(from_id, other_head);
        }

        if self.hg.pending_loaded_events > 0
            || !self.transaction_pool.is_empty()
            || !self.self_block_signatures.is_empty()
        {
            return self.record_heads();
        }
        Ok(())
    }

    /// One self-event per recorded head, draining the pools into the first.
    pub(crate) fn record_heads(&mut self) -> Result<()> {
        log::debug!("RecordHeads: {} heads", self.heads.len());

        let mut entries: Vec<(PeerId, Option<Event>)> = self.heads.drain().collect();
        entries.sort_by_key(|(id, _)| *id);
        for (_, event) in entries {
            self.add_self_event(event.map(|e| e.hash()))?;
        }
        Ok(())
    }

    /// New self-event at seq + 1, parented on the current head and the
    /// given other-head, carrying everything pooled.
    pub(crate) fn add_self_event(&mut self, other_head: Option<EventHash>) -> Result<()> {
        let signatures = self.self_block_signatures.slice();
        let transactions = self.transaction_pool.clone();

        let new_head = Event::new(
            transactions,
            signatures.clone(),
            self.head,
            other_head,
            self.pub_key_hex.clone(),
            self.seq + 1,
        );
        self.sign_and_insert_self_event(new_head)?;

        log::debug!(
            "Created self-event: {} txs, {} sigs, {} pending loaded",
            self.transaction_pool.len(),
            signatures.len(),
            self.hg.pending_loaded_events
        );

        self.transaction_pool.clear();
        self.self_block_signatures.remove_slice(&signatures);
        Ok(())
    }

    //++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++

    /// Adopts a peer's anchor block and frame after verifying quorum
    /// signatures and the frame hash, then repositions head and seq.
    pub(crate) fn fast_forward(&mut self, block: Block, frame: Frame) -> Result<()> {
        let frame_peers = PeerSet::new(frame.peers.clone())?;

        self.hg.check_block(&block, &frame_peers)?;

        let frame_hash = frame.hash().map_err(CoreError::Internal)?;
        if block.frame_hash() != frame_hash {
            return Err(HashgraphError::InvalidFrameHash.into());
        }

        self.hg.reset(block, frame)?;
        self.peers = self.hg.peers().clone();
        self.heads.clear();
        self.set_head_and_seq()?;
        Ok(())
    }

    pub(crate) fn anchor_block_with_frame(&mut self) -> Result<(Block, Frame)> {
        Ok(self.hg.get_anchor_block_with_frame()?)
    }

    pub(crate) fn process_sig_pool(&mut self) -> Result<()> {
        Ok(self.hg.process_sig_pool()?)
    }

    pub(crate) fn add_transactions(&mut self, transactions: Vec<Vec<u8>>) {
        self.transaction_pool.extend(transactions);
    }

    pub(crate) fn to_wire(&mut self, events: &[Event]) -> Result<Vec<WireEvent>> {
        events
            .iter()
            .map(|event| self.hg.to_wire(event).map_err(CoreError::Hashgraph))
            .collect()
    }

    //++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++
    // Accessors feeding the node's stats and the tests

    pub(crate) fn get_block(&mut self, index: i64) -> Result<Block> {
        Ok(self.hg.store().get_block(index)?)
    }

    pub(crate) fn last_block_index(&mut self) -> i64 {
        self.hg.store().last_block_index()
    }

    pub(crate) fn last_consensus_round(&self) -> Option<i64> {
        self.hg.last_consensus_round
    }

    pub(crate) fn consensus_events_count(&mut self) -> usize {
        self.hg.store().consensus_events_count()
    }

    pub(crate) fn consensus_transactions_count(&self) -> usize {
        self.hg.consensus_transactions
    }

    pub(crate) fn undetermined_events_count(&self) -> usize {
        self.hg.undetermined_events.len()
    }

    pub(crate) fn last_committed_round_events_count(&self) -> usize {
        self.hg.last_committed_round_events
    }

    pub(crate) fn pending_loaded_events(&self) -> usize {
        self.hg.pending_loaded_events
    }

    pub(crate) fn transaction_pool_len(&self) -> usize {
        self.transaction_pool.len()
    }

    pub(crate) fn signature_pool_len(&self) -> usize {
        self.self_block_signatures.len()
    }

    pub(crate) fn anchor_block(&self) -> Option<i64> {
        self.hg.anchor_block()
    }

    pub(crate) fn close_store(&mut self) -> Result<()> {
        Ok(self.hg.store().close()?)
    }

    #[cfg(test)]
    pub(crate) fn into_store(self) -> Box<dyn Store> {
        self.hg.into_store()
    }
}
