///! Uses the `ed25519-zebra` crate to implement signing and signature verification.
use ed25519_zebra::{Signature, SigningKey, VerificationKey, VerificationKeyBytes};
use rand_chacha::rand_core::{RngCore, SeedableRng};

use crate::crypto::KeyPairError;

pub struct Ed25519Keypair {
    seed: [u8; 32],
    signing_key: SigningKey,
    verification_key: VerificationKey,
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Ed25519PublicKey([u8; 32]);

impl Ed25519Keypair {
    /// Deterministic when a seed is given, used by tests; random otherwise.
    pub fn generate(seed: Option<[u8; 32]>) -> Self {
        let seed = seed.unwrap_or_else(|| {
            let mut rng = rand::rngs::StdRng::from_entropy();
            let mut seed = [0u8; 32];
            rng.fill_bytes(&mut seed);
            seed
        });
        let signing_key = SigningKey::from(seed);
        let verification_key = VerificationKey::from(&signing_key);
        Ed25519Keypair {
            seed,
            signing_key,
            verification_key,
        }
    }

    pub fn from_private_key_hex(hex: &str) -> Result<Self, KeyPairError> {
        let bytes =
            array_bytes::hex2bytes(hex).map_err(|_| KeyPairError::InvalidHexadecimal)?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyPairError::SliceLength)?;
        let signing_key = SigningKey::from(seed);
        let verification_key = VerificationKey::from(&signing_key);
        Ok(Ed25519Keypair {
            seed,
            signing_key,
            verification_key,
        })
    }

    pub fn private_key_hex(&self) -> String {
        array_bytes::bytes2hex("", self.seed)
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        let bytes: VerificationKeyBytes = self.verification_key.into();
        Ed25519PublicKey(bytes.into())
    }

    /// Signature over the message bytes, hex encoded.
    pub fn sign<M: AsRef<[u8]>>(&self, message: M) -> String {
        let signature = self.signing_key.sign(message.as_ref());
        let sig_data: [u8; 64] = signature.into();
        array_bytes::bytes2hex("", sig_data)
    }
}

impl Ed25519PublicKey {
    pub fn to_hex(&self) -> String {
        array_bytes::bytes2hex("", self.0)
    }

    pub fn from_hex(hex: &str) -> Result<Self, KeyPairError> {
        let bytes =
            array_bytes::hex2bytes(hex).map_err(|_| KeyPairError::InvalidHexadecimal)?;
        let raw: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyPairError::SliceLength)?;
        //Reject encodings that are not valid curve points up front
        VerificationKey::try_from(raw).map_err(|_| KeyPairError::PublicKey)?;
        Ok(Ed25519PublicKey(raw))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn verify<M: AsRef<[u8]>>(&self, message: M, signature_hex: &str) -> bool {
        let Ok(sig_bytes) = array_bytes::hex2bytes(signature_hex) else {
            return false;
        };
        let Ok(sig_data) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
            return false;
        };
        let Ok(key) = VerificationKey::try_from(self.0) else {
            return false;
        };
        key.verify(&Signature::from(sig_data), message.as_ref())
            .is_ok()
    }
}

impl std::fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ed25519PublicKey({})", self.to_hex())
    }
}

impl std::fmt::Display for Ed25519PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sign_verify_ok() {
        let keypair = Ed25519Keypair::generate(None);
        let signature = keypair.sign(b"payload");
        assert!(keypair.public_key().verify(b"payload", &signature));
    }

    #[test]
    fn test_sign_verify_tampered() {
        let keypair = Ed25519Keypair::generate(None);
        let signature = keypair.sign(b"payload");
        assert!(!keypair.public_key().verify(b"payload!", &signature));
    }

    #[test]
    fn test_private_key_hex_round_trip() {
        let keypair = Ed25519Keypair::generate(Some([7; 32]));
        let restored = Ed25519Keypair::from_private_key_hex(&keypair.private_key_hex()).unwrap();
        assert_eq!(keypair.public_key(), restored.public_key());
    }

    #[test]
    fn test_public_key_hex_round_trip() {
        let public_key = Ed25519Keypair::generate(Some([9; 32])).public_key();
        let parsed = Ed25519PublicKey::from_hex(&public_key.to_hex()).unwrap();
        assert_eq!(public_key, parsed);
    }
}
