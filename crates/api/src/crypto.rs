//! Defines unified traits for the cryptographic primitives the core
//! consumes. Implementations live in `keel-crypto`; tests substitute
//! deterministic fakes.

use crate::state::LedgerState;
use async_trait::async_trait;
use keel_types::error::CryptoError;
use keel_types::{StateHash, StateSignature};

/// Signs state root hashes with this node's consensus key.
pub trait HashSigner: Send + Sync {
    /// Produces this node's signature over `hash`.
    fn sign(&self, hash: &StateHash) -> Result<StateSignature, CryptoError>;
}

/// One entry of a verification batch.
#[derive(Debug, Clone, Copy)]
pub struct VerificationItem<'a> {
    /// The signed message (a state root digest).
    pub hash: &'a [u8],
    /// The signature to check.
    pub signature: &'a [u8],
    /// The claimed signer's public key.
    pub public_key: &'a [u8],
}

/// Verifies signatures over state root hashes.
pub trait SignatureVerifier: Send + Sync {
    /// Verifies a single signature. Must be cheap and non-blocking; callers
    /// may invoke it on latency-sensitive threads.
    fn verify(&self, hash: &[u8], signature: &[u8], public_key: &[u8]) -> bool;

    /// Verifies a batch, potentially in parallel. The result order
    /// corresponds to the input order.
    fn verify_parallel(&self, items: &[VerificationItem<'_>]) -> Vec<bool> {
        items
            .iter()
            .map(|item| self.verify(item.hash, item.signature, item.public_key))
            .collect()
    }
}

/// Hashes the application ledger on an external pool.
///
/// Digesting a large Merkle tree is the one genuinely slow operation in the
/// signed-state pipeline, so it is the subsystem's only async suspension
/// point. Implementations must not require any lock held by the caller.
#[async_trait]
pub trait TreeHasher: Send + Sync {
    /// Computes the root digest of `ledger`.
    async fn digest_tree(&self, ledger: &dyn LedgerState) -> Result<StateHash, CryptoError>;
}
