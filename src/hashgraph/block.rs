use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::crypto::{Keypair, PublicKey};
use crate::peers::PeerSet;
use crate::utilities;
use crate::utilities::hash::HashType;

/// One validator's signature over a block body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct BlockSignature {
    ///Hex encoded public key of the signer
    pub validator: String,
    ///Index of the signed block
    pub index: i64,
    pub signature: String,
}

/// All the data that gets signed. The signature map is filled in afterwards.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BlockBody {
    pub index: i64,
    pub round_received: i64,
    ///Application state hash, set by the commit callback
    pub state_hash: Vec<u8>,
    pub frame_hash: HashType,
    pub transactions: Vec<Vec<u8>>,
}

/// Ordered transactions of one decided round, plus collected validator
/// signatures. The anchor block is the latest one with quorum signatures.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Block {
    pub(crate) body: BlockBody,
    ///validator pub key hex => signature hex
    pub(crate) signatures: BTreeMap<String, String>,
}

impl Block {
    pub(crate) fn new(
        index: i64,
        round_received: i64,
        frame_hash: HashType,
        transactions: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            body: BlockBody {
                index,
                round_received,
                state_hash: vec![],
                frame_hash,
                transactions,
            },
            signatures: BTreeMap::new(),
        }
    }

    pub fn index(&self) -> i64 {
        self.body.index
    }

    pub fn round_received(&self) -> i64 {
        self.body.round_received
    }

    pub fn frame_hash(&self) -> HashType {
        self.body.frame_hash
    }

    pub fn state_hash(&self) -> &[u8] {
        &self.body.state_hash
    }

    pub(crate) fn set_state_hash(&mut self, state_hash: Vec<u8>) {
        self.body.state_hash = state_hash;
    }

    pub fn transactions(&self) -> &[Vec<u8>] {
        &self.body.transactions
    }

    pub(crate) fn body_hash(&self) -> anyhow::Result<HashType> {
        let bytes = utilities::encode(&self.body)?;
        Ok(HashType::of(&bytes))
    }

    pub(crate) fn sign(&self, keypair: &Keypair) -> anyhow::Result<BlockSignature> {
        let hash = self.body_hash()?;
        Ok(BlockSignature {
            validator: keypair.public_key().to_hex(),
            index: self.body.index,
            signature: keypair.sign(hash.as_bytes()),
        })
    }

    /// Rejects a second signature from the same validator.
    pub(crate) fn set_signature(&mut self, signature: BlockSignature) -> anyhow::Result<()> {
        if signature.index != self.body.index {
            anyhow::bail!(
                "Signature is for block {}, not {}",
                signature.index,
                self.body.index
            );
        }
        if self.signatures.contains_key(&signature.validator) {
            anyhow::bail!("Duplicate block signature from {}", signature.validator);
        }
        self.signatures
            .insert(signature.validator, signature.signature);
        Ok(())
    }

    pub(crate) fn signatures(&self) -> Vec<BlockSignature> {
        self.signatures
            .iter()
            .map(|(validator, signature)| BlockSignature {
                validator: validator.clone(),
                index: self.body.index,
                signature: signature.clone(),
            })
            .collect()
    }

    pub(crate) fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    pub(crate) fn verify_signature(&self, signature: &BlockSignature) -> anyhow::Result<bool> {
        let hash = self.body_hash()?;
        let public_key = PublicKey::from_hex(&signature.validator)
            .map_err(|err| anyhow::anyhow!("Invalid validator key: {err}"))?;
        Ok(public_key.verify(hash.as_bytes(), &signature.signature))
    }

    /// True once valid signatures from members of `peers` reach quorum.
    pub(crate) fn quorum_reached(&self, peers: &PeerSet) -> anyhow::Result<bool> {
        let mut valid = 0;
        for signature in self.signatures() {
            if !peers.contains_pub_key(&signature.validator) {
                continue;
            }
            if self.verify_signature(&signature)? {
                valid += 1;
            }
        }
        Ok(valid >= peers.super_majority())
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "block {} round_received {}, {} txs, {} sigs",
            self.body.index,
            self.body.round_received,
            self.body.transactions.len(),
            self.signatures.len()
        )
    }
}

#[cfg(test)]
mod test {
    use crate::peers::Peer;

    use super::*;

    fn keypair(seed: u8) -> Keypair {
        Keypair::generate(Some([seed; 32]))
    }

    fn block() -> Block {
        Block::new(
            0,
            1,
            HashType::of(b"frame"),
            vec![b"tx".to_vec()],
        )
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

    #[test]
    fn test_sign_and_verify() {
        let keypair = keypair(1);
        let mut block = block();
        let signature = block.sign(&keypair).unwrap();
        assert!(block.verify_signature(&signature).unwrap());
        block.set_signature(signature).unwrap();
        assert_eq!(block.signature_count(), 1);
    }

    #[test]
    fn test_rejects_duplicate_validator() {
        let keypair = keypair(1);
        let mut block = block();
        let signature = block.sign(&keypair).unwrap();
        block.set_signature(signature.clone()).unwrap();
        assert!(block.set_signature(signature).is_err());
    }

    #[test]
    fn test_rejects_wrong_index() {
        let keypair = keypair(1);
        let mut block = block();
        let mut signature = block.sign(&keypair).unwrap();
        signature.index = 5;
        assert!(block.set_signature(signature).is_err());
    }

    #[test]
    fn test_quorum_over_peer_set() {
        let peers = peer_set(&[1, 2, 3]);
        let mut block = block();
        assert!(!block.quorum_reached(&peers).unwrap());

        for seed in [1u8, 2, 3] {
            let signature = block.sign(&keypair(seed)).unwrap();
            block.set_signature(signature).unwrap();
        }
        assert!(block.quorum_reached(&peers).unwrap());
    }

    #[test]
    fn test_quorum_ignores_foreign_signers() {
        let peers = peer_set(&[1, 2, 3]);
        let mut block = block();
        //Signers outside the peer set do not count towards quorum
        for seed in [7u8, 8, 9] {
            let signature = block.sign(&keypair(seed)).unwrap();
            block.set_signature(signature).unwrap();
        }
        assert!(!block.quorum_reached(&peers).unwrap());
    }

    #[test]
    fn test_state_hash_changes_signed_body() {
        let keypair = keypair(1);
        let mut block = block();
        let signature = block.sign(&keypair).unwrap();
        block.set_state_hash(b"state".to_vec());
        assert!(!block.verify_signature(&signature).unwrap());
    }
}
