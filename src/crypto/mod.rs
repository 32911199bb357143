use thiserror::Error;

pub(crate) mod ed25519;

pub use ed25519::{Ed25519Keypair, Ed25519PublicKey};

/// The only key flavour the node uses.
pub type Keypair = Ed25519Keypair;
pub type PublicKey = Ed25519PublicKey;

#[derive(Error, Debug)]
pub enum KeyPairError {
    #[error("Failed to serialize")]
    Serialization,
    #[error("Invalid hexadecimal")]
    InvalidHexadecimal,
    #[error("Invalid key length")]
    SliceLength,
    #[error("Invalid signature")]
    Signature,
    #[error("Invalid private key")]
    PrivateKey,
    #[error("Invalid public key")]
    PublicKey,
}
