use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::hashgraph::event::EventHash;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub(crate) struct RoundEvent {
    pub(crate) witness: bool,
    ///None until the fame vote settles
    pub(crate) famous: Option<bool>,
}

/// Per-round consensus bookkeeping: which events were created in the round,
/// which of them are witnesses, how their fame votes settled, and which
/// events were received (ordered) at this round.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub(crate) struct RoundInfo {
    pub(crate) events: BTreeMap<EventHash, RoundEvent>,
    pub(crate) received: Vec<EventHash>,
    pub(crate) decided: bool,
}

impl RoundInfo {
    pub(crate) fn add_created_event(&mut self, hash: EventHash, witness: bool) {
        self.events
            .entry(hash)
            .or_insert(RoundEvent {
                witness,
                famous: None,
            });
    }

    pub(crate) fn add_received_event(&mut self, hash: EventHash) {
        if !self.received.contains(&hash) {
            self.received.push(hash);
        }
    }

    pub(crate) fn set_fame(&mut self, hash: &EventHash, famous: bool) {
        if let Some(event) = self.events.get_mut(hash) {
            event.famous = Some(famous);
        }
    }

    pub(crate) fn witnesses(&self) -> Vec<EventHash> {
        self.events
            .iter()
            .filter(|(_, e)| e.witness)
            .map(|(h, _)| *h)
            .collect()
    }

    pub(crate) fn famous_witnesses(&self) -> Vec<EventHash> {
        self.events
            .iter()
            .filter(|(_, e)| e.witness && e.famous == Some(true))
            .map(|(h, _)| *h)
            .collect()
    }

    pub(crate) fn is_witness(&self, hash: &EventHash) -> bool {
        self.events.get(hash).map(|e| e.witness).unwrap_or(false)
    }

    pub(crate) fn fame(&self, hash: &EventHash) -> Option<bool> {
        self.events.get(hash).and_then(|e| e.famous)
    }

    /// All witnesses have a settled fame verdict.
    pub(crate) fn witnesses_decided(&self) -> bool {
        self.events
            .values()
            .filter(|e| e.witness)
            .all(|e| e.famous.is_some())
    }
}
