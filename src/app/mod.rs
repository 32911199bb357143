use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::hashgraph::Block;
use crate::utilities::hash::HashType;

/// Public mirror of a committed block, decoupled from the internal type.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ApiBlock {
    pub index: i64,
    pub round_received: i64,
    pub state_hash: Vec<u8>,
    ///Base58 of the frame hash the block is anchored to
    pub frame_hash: String,
    pub transactions: Vec<Vec<u8>>,
}

impl From<&Block> for ApiBlock {
    fn from(block: &Block) -> Self {
        Self {
            index: block.index(),
            round_received: block.round_received(),
            state_hash: block.state_hash().to_vec(),
            frame_hash: block.frame_hash().to_string(),
            transactions: block.transactions().to_vec(),
        }
    }
}

/// What the application hands back from a commit: the resulting state hash
/// and any internal transactions, which the core passes through untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitResponse {
    pub state_hash: Vec<u8>,
    pub internal_transactions: Vec<Vec<u8>>,
}

///Application callbacks invoked by the consensus core.
///
/// Notes:
/// A) These functions are called synchronously under the core lock and
///    should be relatively fast.
/// B) They should not wait on a lock
/// C) They should not panic
pub trait Application: Send + Sync + 'static {
    /// Called for every finalised block, in index order. The returned state
    /// hash is recorded in the signed block.
    fn commit_block(&self, block: ApiBlock) -> anyhow::Result<CommitResponse>;

    /// Opaque snapshot of the application state at the given block, served
    /// to peers that fast-forward.
    fn get_snapshot(&self, block_index: i64) -> anyhow::Result<Vec<u8>>;

    /// Replaces the application state with a snapshot received during
    /// catch-up.
    fn restore(&self, snapshot: &[u8]) -> anyhow::Result<()>;
}

/// Default application: a running hash chain over committed transactions.
/// The snapshot is the state hash itself.
#[derive(Default)]
pub struct DefaultApplication {
    state_hash: Mutex<Vec<u8>>,
}

impl DefaultApplication {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_hash(&self) -> Vec<u8> {
        self.state_hash.lock().unwrap().clone()
    }
}

impl Application for DefaultApplication {
    fn commit_block(&self, block: ApiBlock) -> anyhow::Result<CommitResponse> {
        let mut state = self.state_hash.lock().unwrap();
        let mut material = state.clone();
        for tx in &block.transactions {
            material.extend_from_slice(tx);
        }
        *state = HashType::of(&material).as_bytes().to_vec();
        log::debug!(
            "Committed block {} with {} txs",
            block.index,
            block.transactions.len()
        );
        Ok(CommitResponse {
            state_hash: state.clone(),
            internal_transactions: vec![],
        })
    }

    fn get_snapshot(&self, _block_index: i64) -> anyhow::Result<Vec<u8>> {
        Ok(self.state_hash.lock().unwrap().clone())
    }

    fn restore(&self, snapshot: &[u8]) -> anyhow::Result<()> {
        *self.state_hash.lock().unwrap() = snapshot.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn block(index: i64, transactions: Vec<Vec<u8>>) -> ApiBlock {
        ApiBlock {
            index,
            round_received: index + 1,
            state_hash: vec![],
            frame_hash: String::new(),
            transactions,
        }
    }

    #[test]
    fn test_state_hash_advances_per_block() {
        let app = DefaultApplication::new();
        let first = app.commit_block(block(0, vec![b"a".to_vec()])).unwrap();
        let second = app.commit_block(block(1, vec![b"b".to_vec()])).unwrap();
        assert_ne!(first.state_hash, second.state_hash);
        assert_eq!(second.state_hash, app.state_hash());
    }

    #[test]
    fn test_same_history_same_state() {
        let left = DefaultApplication::new();
        let right = DefaultApplication::new();
        for app in [&left, &right] {
            app.commit_block(block(0, vec![b"a".to_vec()])).unwrap();
            app.commit_block(block(1, vec![b"b".to_vec(), b"c".to_vec()]))
                .unwrap();
        }
        assert_eq!(left.state_hash(), right.state_hash());
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let app = DefaultApplication::new();
        app.commit_block(block(0, vec![b"a".to_vec()])).unwrap();
        let snapshot = app.get_snapshot(0).unwrap();

        let fresh = DefaultApplication::new();
        fresh.restore(&snapshot).unwrap();
        assert_eq!(fresh.state_hash(), app.state_hash());
    }
}
