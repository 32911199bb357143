use std::collections::HashMap;
use std::fmt::Display;
use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::PublicKey;
use crate::utilities::hash::HashType;

/// Identifier of a peer of the network, derived from its public key.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct PeerId(pub(crate) u32);

impl PeerId {
    pub fn inner(&self) -> u32 {
        self.0
    }

    /// Builds a `PeerId` from a public key.
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let digest = HashType::of(public_key.as_bytes());
        let bytes = digest.as_bytes();
        PeerId(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub trait ToPeerId {
    fn peer_id(&self) -> PeerId;
}

impl ToPeerId for PublicKey {
    fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(self)
    }
}

impl ToPeerId for crate::crypto::Keypair {
    fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(&self.public_key())
    }
}

/// A peer of the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// The peer's name. It can be arbitrary and is just for logging/display purposes.
    pub name: String,
    /// The peer's address, `<IP>:<PORT>`.
    pub address: String,
    /// Hex encoded public key. It identifies the peer uniquely.
    pub pub_key: String,
}

impl Peer {
    pub fn new(name: String, address: String, pub_key: String) -> Self {
        Self {
            name,
            address,
            pub_key,
        }
    }

    pub fn public_key(&self) -> anyhow::Result<PublicKey> {
        PublicKey::from_hex(&self.pub_key).map_err(|err| anyhow::anyhow!(err))
    }

    pub fn id(&self) -> anyhow::Result<PeerId> {
        Ok(self.public_key()?.peer_id())
    }
}

impl Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "name {}, address {}", self.name, self.address)
    }
}

#[derive(Error, Debug)]
pub enum PeerSetError {
    #[error("Invalid peer public key: {0}")]
    InvalidPublicKey(String),
    #[error("Duplicate peer: {0}")]
    DuplicatePeer(String),
}

/// The validator set of a frame. Immutable within the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerSet {
    pub peers: Vec<Peer>,
    by_id: HashMap<PeerId, Peer>,
    by_pub_key: HashMap<String, Peer>,
}

impl PeerSet {
    pub fn new(mut peers: Vec<Peer>) -> Result<Self, PeerSetError> {
        //Deterministic order regardless of the source file
        peers.sort_by(|a, b| a.pub_key.cmp(&b.pub_key));

        let mut by_id = HashMap::new();
        let mut by_pub_key = HashMap::new();
        for peer in &peers {
            let id = peer
                .id()
                .map_err(|_| PeerSetError::InvalidPublicKey(peer.pub_key.clone()))?;
            if by_id.insert(id, peer.clone()).is_some() {
                return Err(PeerSetError::DuplicatePeer(peer.pub_key.clone()));
            }
            by_pub_key.insert(peer.pub_key.clone(), peer.clone());
        }
        Ok(Self {
            peers,
            by_id,
            by_pub_key,
        })
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn by_id(&self, id: &PeerId) -> Option<&Peer> {
        self.by_id.get(id)
    }

    pub fn by_pub_key(&self, pub_key: &str) -> Option<&Peer> {
        self.by_pub_key.get(pub_key)
    }

    pub fn contains_pub_key(&self, pub_key: &str) -> bool {
        self.by_pub_key.contains_key(pub_key)
    }

    pub fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.by_id.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Stake needed for an agreement that any two quorums intersect in an
    /// honest peer: strictly more than 2/3 of the peer set.
    pub fn super_majority(&self) -> usize {
        2 * self.peers.len() / 3 + 1
    }
}

#[derive(Error, Debug)]
pub enum PeersConfigError {
    #[error("ParsingFailed: {0}")]
    ParsingFailed(#[from] config::ConfigError),
    #[error("TomlError: {0}")]
    TomlError(#[from] toml::ser::Error),
    #[error("IoError: {0}")]
    IoError(#[from] std::io::Error),
    #[error("InvalidPeerSet: {0}")]
    InvalidPeerSet(#[from] PeerSetError),
}

///Peers file that defines the initial validator set.
///
/// # Configuration example
/// ```toml
/// [[peers]]
/// name = "node1"
/// address = "127.0.0.1:4000"
/// pub_key = "7f3a..."
///
/// [[peers]]
/// name = "node2"
/// address = "127.0.0.1:4001"
/// pub_key = "9c41..."
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeersConfig {
    pub peers: Vec<Peer>,
}

impl PeersConfig {
    pub fn new(peers: Vec<Peer>) -> Self {
        Self { peers }
    }

    pub fn try_load<I: Into<PathBuf>>(path: I) -> Result<PeerSet, PeersConfigError> {
        let path = path.into();
        let config = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;

        let peers_config: PeersConfig = config.try_deserialize()?;
        Ok(PeerSet::new(peers_config.peers)?)
    }

    pub fn try_write<I: Into<PathBuf>>(&self, path: I) -> Result<(), PeersConfigError> {
        let config = toml::to_string(&self)?;
        let mut file = std::fs::File::create(path.into())?;
        file.write_all(config.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use crate::crypto::Keypair;

    use super::*;

    fn peer(seed: u8, name: &str) -> Peer {
        let keypair = Keypair::generate(Some([seed; 32]));
        Peer::new(
            name.to_string(),
            format!("127.0.0.1:{}", 4000 + seed as u16),
            keypair.public_key().to_hex(),
        )
    }

    #[test]
    fn test_peer_id_is_deterministic() {
        let keypair = Keypair::generate(Some([3; 32]));
        assert_eq!(
            PeerId::from_public_key(&keypair.public_key()),
            keypair.peer_id()
        );
    }

    #[test]
    fn test_super_majority() {
        let set = PeerSet::new(vec![peer(1, "a")]).unwrap();
        assert_eq!(set.super_majority(), 1);

        let set = PeerSet::new(vec![peer(1, "a"), peer(2, "b"), peer(3, "c")]).unwrap();
        assert_eq!(set.super_majority(), 3);

        let set = PeerSet::new((1..=4).map(|s| peer(s, "p")).collect()).unwrap();
        assert_eq!(set.super_majority(), 3);
    }

    #[test]
    fn test_rejects_duplicate_peer() {
        let result = PeerSet::new(vec![peer(1, "a"), peer(1, "b")]);
        assert_matches!(result, Err(PeerSetError::DuplicatePeer(_)));
    }

    #[test]
    fn test_lookup_by_id_and_key() {
        let first = peer(1, "a");
        let set = PeerSet::new(vec![first.clone(), peer(2, "b")]).unwrap();
        let id = first.id().unwrap();
        assert_eq!(set.by_id(&id).unwrap().name, "a");
        assert_eq!(set.by_pub_key(&first.pub_key).unwrap().name, "a");
        assert!(set.contains_pub_key(&first.pub_key));
    }
}
