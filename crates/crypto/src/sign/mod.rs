//! Ed25519 state-signature implementation using dcrypt.

pub mod batch;

use dcrypt::sign::eddsa;
use dcrypt::Signature;
use keel_api::HashSigner;
use keel_types::error::CryptoError;
use keel_types::{StateHash, StateSignature};
use rand::rngs::OsRng;

/// Ed25519 key pair used to sign state root hashes.
#[derive(Clone)]
pub struct Ed25519KeyPair {
    public_key: eddsa::Ed25519PublicKey,
    secret_key: eddsa::Ed25519SecretKey,
}

impl Ed25519KeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut rng = OsRng;
        let (public_key, secret_key) = eddsa::Ed25519::keypair(&mut rng)
            .map_err(|e| CryptoError::OperationFailed(e.to_string()))?;
        Ok(Self {
            public_key,
            secret_key,
        })
    }

    /// Derive a key pair from a 32-byte seed. Deterministic; used for test
    /// rosters and key recovery.
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, CryptoError> {
        let secret_key = eddsa::Ed25519SecretKey::from_seed(seed).map_err(|e| {
            CryptoError::InvalidKey(format!("failed to create secret key from seed: {:?}", e))
        })?;
        let public_key = secret_key
            .public_key()
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self {
            public_key,
            secret_key,
        })
    }

    /// The public key bytes, as they appear in an address book entry.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key.0.to_vec()
    }

    /// Sign an arbitrary message.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signature = eddsa::Ed25519::sign(message, &self.secret_key)
            .map_err(|e| CryptoError::OperationFailed(e.to_string()))?;
        Ok(signature.0.to_vec())
    }
}

/// Verify an Ed25519 signature over a message with a raw public key.
pub fn verify_raw(message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    let Ok(pk) = eddsa::Ed25519PublicKey::from_bytes(public_key) else {
        return false;
    };
    let Ok(sig) = eddsa::Ed25519Signature::from_bytes(signature) else {
        return false;
    };
    eddsa::Ed25519::verify(message, &sig, &pk).is_ok()
}

/// The node's own state signer: an Ed25519 key pair behind the
/// [`HashSigner`] seam.
#[derive(Clone)]
pub struct Ed25519HashSigner {
    keypair: Ed25519KeyPair,
}

impl Ed25519HashSigner {
    /// Wraps a key pair as the node's state signer.
    pub fn new(keypair: Ed25519KeyPair) -> Self {
        Self { keypair }
    }

    /// The signer's public key bytes.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.keypair.public_key_bytes()
    }
}

impl HashSigner for Ed25519HashSigner {
    fn sign(&self, hash: &StateHash) -> Result<StateSignature, CryptoError> {
        Ok(StateSignature::new(self.keypair.sign(hash.as_ref())?))
    }
}
