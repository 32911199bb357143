use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hashgraph::event::{Event, EventHash};
use crate::peers::{Peer, PeerId};
use crate::utilities;
use crate::utilities::hash::HashType;

/// Summary of one event, enough to anchor a participant's history.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) struct RootEvent {
    pub(crate) hash: EventHash,
    pub(crate) creator_id: PeerId,
    pub(crate) index: i64,
    pub(crate) round: i64,
}

impl RootEvent {
    /// Anchor of a participant with no history yet. The first real event
    /// (index 0, round 0) chains onto it.
    pub(crate) fn base(creator_id: PeerId) -> Self {
        Self {
            hash: super::event::root_self_parent(creator_id),
            creator_id,
            index: -1,
            round: -1,
        }
    }
}

/// Frame anchor of one participant: its head when the frame was cut, plus
/// summaries of foreign events referenced from inside the frame but living
/// before it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) struct Root {
    pub(crate) head: RootEvent,
    ///child event hash (base58) => other-parent summary
    pub(crate) others: BTreeMap<String, RootEvent>,
}

impl Root {
    pub(crate) fn new(head: RootEvent) -> Self {
        Self {
            head,
            others: BTreeMap::new(),
        }
    }

    pub(crate) fn base(creator_id: PeerId) -> Self {
        Self::new(RootEvent::base(creator_id))
    }
}

/// Event captured inside a frame, together with its decided coordinates so
/// a reset does not rerun consensus on it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) struct FrameEvent {
    pub(crate) event: Event,
    pub(crate) round: i64,
    pub(crate) witness: bool,
}

/// Snapshot of the graph at a round boundary: the peer set, per-participant
/// roots and the consensus-ordered events of the round. Its hash is
/// content-derived and anchors fast-forward.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) struct Frame {
    pub(crate) round: i64,
    pub(crate) peers: Vec<Peer>,
    ///creator pub key hex => root
    pub(crate) roots: BTreeMap<String, Root>,
    pub(crate) events: Vec<FrameEvent>,
}

impl Frame {
    pub(crate) fn hash(&self) -> anyhow::Result<HashType> {
        let bytes = utilities::encode(self)?;
        Ok(HashType::of(&bytes))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_frame_hash_is_content_derived() {
        let frame = Frame {
            round: 2,
            peers: vec![],
            roots: BTreeMap::new(),
            events: vec![],
        };
        let mut other = frame.clone();
        assert_eq!(frame.hash().unwrap(), other.hash().unwrap());

        other.round = 3;
        assert_ne!(frame.hash().unwrap(), other.hash().unwrap());
    }

    #[test]
    fn test_base_root_round_and_index() {
        let root = Root::base(PeerId(7));
        assert_eq!(root.head.index, -1);
        assert_eq!(root.head.round, -1);
        assert!(root.others.is_empty());
    }
}
