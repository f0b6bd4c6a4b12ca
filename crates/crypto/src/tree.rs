//! The asynchronous state-tree hasher.

use crate::hash::state_hash_of;
use async_trait::async_trait;
use keel_api::{LedgerState, TreeHasher};
use keel_types::error::CryptoError;
use keel_types::StateHash;

/// Digests ledger snapshots with SHA-384 on the blocking thread pool.
///
/// Snapshots of a busy ledger run to hundreds of megabytes, so the digest
/// is pushed off the async worker threads. The caller awaits the result and
/// must not hold any lock across the await.
#[derive(Default, Debug, Clone, Copy)]
pub struct Sha384TreeHasher;

impl Sha384TreeHasher {
    /// Creates the hasher.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TreeHasher for Sha384TreeHasher {
    async fn digest_tree(&self, ledger: &dyn LedgerState) -> Result<StateHash, CryptoError> {
        let snapshot = ledger.snapshot_bytes();
        tokio::task::spawn_blocking(move || state_hash_of(&snapshot))
            .await
            .map_err(|e| CryptoError::HashingFailure(format!("hasher task failed: {}", e)))?
    }
}
