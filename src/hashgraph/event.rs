use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::crypto::{Keypair, PublicKey};
use crate::hashgraph::block::BlockSignature;
use crate::peers::PeerId;
use crate::utilities;
use crate::utilities::hash::HashType;
use crate::utilities::time::unix_millis_now;

pub type EventHash = HashType;

/// Pseudo self-parent hash of a creator's first event. Lives outside the
/// graph; the store maps it to the creator's root.
pub(crate) fn root_self_parent(creator_id: PeerId) -> EventHash {
    let marker = format!("root:{}", creator_id.inner());
    HashType::of(marker.as_bytes())
}

/// All the data that gets signed. Field order is part of the canonical form.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) struct EventBody {
    pub(crate) transactions: Vec<Vec<u8>>,
    pub(crate) block_signatures: Vec<BlockSignature>,
    pub(crate) self_parent: EventHash,
    pub(crate) other_parent: Option<EventHash>,
    ///Hex encoded public key of the creator
    pub(crate) creator: String,
    ///Monotonically increasing per-creator sequence number
    pub(crate) index: i64,
    ///Creation time, unix millis. Consensus timestamps are medians of these.
    pub(crate) timestamp: u64,
}

/// A signed record in the DAG, the unit of gossip. Immutable once signed;
/// the non-serialized fields are consensus caches owned by the hashgraph.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) struct Event {
    pub(crate) body: EventBody,
    ///Hex encoded signature over the body hash
    pub(crate) signature: String,

    #[serde(skip)]
    pub(crate) hash: EventHash,
    #[serde(skip)]
    pub(crate) topological_index: i64,
    #[serde(skip)]
    pub(crate) round: Option<i64>,
    #[serde(skip)]
    pub(crate) round_received: Option<i64>,
    #[serde(skip)]
    pub(crate) consensus_timestamp: Option<u64>,
}

impl Event {
    pub(crate) fn new(
        transactions: Vec<Vec<u8>>,
        block_signatures: Vec<BlockSignature>,
        self_parent: EventHash,
        other_parent: Option<EventHash>,
        creator: String,
        index: i64,
    ) -> Self {
        Self {
            body: EventBody {
                transactions,
                block_signatures,
                self_parent,
                other_parent,
                creator,
                index,
                timestamp: unix_millis_now(),
            },
            signature: String::new(),
            hash: EventHash::default(),
            topological_index: -1,
            round: None,
            round_received: None,
            consensus_timestamp: None,
        }
    }

    pub(crate) fn creator(&self) -> &str {
        &self.body.creator
    }

    pub(crate) fn index(&self) -> i64 {
        self.body.index
    }

    pub(crate) fn self_parent(&self) -> &EventHash {
        &self.body.self_parent
    }

    pub(crate) fn other_parent(&self) -> Option<&EventHash> {
        self.body.other_parent.as_ref()
    }

    pub(crate) fn transactions(&self) -> &[Vec<u8>] {
        &self.body.transactions
    }

    pub(crate) fn block_signatures(&self) -> &[BlockSignature] {
        &self.body.block_signatures
    }

    ///An event is loaded when it carries a payload that must reach consensus.
    pub(crate) fn is_loaded(&self) -> bool {
        !self.body.transactions.is_empty()
    }

    pub(crate) fn hash(&self) -> EventHash {
        self.hash
    }

    /// Recomputes the body hash. Needed after construction and after
    /// deserialization, where the cache fields come back empty.
    pub(crate) fn refresh_hash(&mut self) -> anyhow::Result<()> {
        let bytes = utilities::encode(&self.body)?;
        self.hash = HashType::of(&bytes);
        Ok(())
    }

    pub(crate) fn sign(&mut self, keypair: &Keypair) -> anyhow::Result<()> {
        self.refresh_hash()?;
        self.signature = keypair.sign(self.hash.as_bytes());
        Ok(())
    }

    /// Recomputes the body hash and checks the signature against the creator key.
    pub(crate) fn verify(&self) -> anyhow::Result<bool> {
        let bytes = utilities::encode(&self.body)?;
        let hash = HashType::of(&bytes);
        let public_key = PublicKey::from_hex(&self.body.creator)
            .map_err(|err| anyhow::anyhow!("Invalid creator key: {err}"))?;
        Ok(public_key.verify(hash.as_bytes(), &self.signature))
    }

    pub(crate) fn signature_bytes(&self) -> anyhow::Result<Vec<u8>> {
        utilities::from_hex(&self.signature)
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "event {} creator {} index {}",
            self.hash,
            &self.body.creator[..8.min(self.body.creator.len())],
            self.body.index
        )
    }
}

/// Sorts events the way they entered the graph. Parents always precede
/// children in this order.
pub(crate) fn sort_topological(events: &mut [Event]) {
    events.sort_by_key(|e| e.topological_index);
}

/// Compact transfer representation: parents resolved to (creator, index)
/// pairs against the receiver's store. `-1` encodes an absent parent.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) struct WireBody {
    pub(crate) transactions: Vec<Vec<u8>>,
    pub(crate) block_signatures: Vec<WireBlockSignature>,
    pub(crate) self_parent_index: i64,
    pub(crate) other_parent_creator_id: i64,
    pub(crate) other_parent_index: i64,
    pub(crate) creator_id: u32,
    pub(crate) index: i64,
    pub(crate) timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) struct WireEvent {
    pub(crate) body: WireBody,
    pub(crate) signature: String,
}

/// Embedded signatures travel without the validator key; the event
/// creator is always the signer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) struct WireBlockSignature {
    pub(crate) index: i64,
    pub(crate) signature: String,
}
