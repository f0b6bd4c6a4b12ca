//! A CPU-based batch verifier that uses Rayon for parallelism.

use crate::sign::verify_raw;
use keel_api::{SignatureVerifier, VerificationItem};
use rayon::prelude::*;

/// Verifies state signatures on the CPU, fanning batches out across the
/// rayon pool. Used for bulk re-validation when a state arrives from
/// reconnect or disk with a full signature set.
#[derive(Default, Debug, Clone, Copy)]
pub struct CpuBatchVerifier;

impl CpuBatchVerifier {
    /// Creates the verifier.
    pub fn new() -> Self {
        Self
    }
}

impl SignatureVerifier for CpuBatchVerifier {
    fn verify(&self, hash: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
        verify_raw(hash, signature, public_key)
    }

    fn verify_parallel(&self, items: &[VerificationItem<'_>]) -> Vec<bool> {
        items
            .par_iter()
            .map(|item| verify_raw(item.hash, item.signature, item.public_key))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sign::Ed25519KeyPair;

    #[test]
    fn batch_results_match_single_verification() {
        let verifier = CpuBatchVerifier::new();
        let keys: Vec<Ed25519KeyPair> = (0u8..4)
            .map(|i| Ed25519KeyPair::from_seed(&[i + 1; 32]).unwrap())
            .collect();
        let message = [0x5a_u8; 48];

        let mut signatures: Vec<Vec<u8>> =
            keys.iter().map(|k| k.sign(&message).unwrap()).collect();
        // Corrupt the third signature.
        signatures[2][0] ^= 0xff;
        let pubkeys: Vec<Vec<u8>> = keys.iter().map(|k| k.public_key_bytes()).collect();

        let items: Vec<VerificationItem<'_>> = signatures
            .iter()
            .zip(&pubkeys)
            .map(|(sig, pk)| VerificationItem {
                hash: &message,
                signature: sig,
                public_key: pk,
            })
            .collect();

        let results = verifier.verify_parallel(&items);
        assert_eq!(results, vec![true, true, false, true]);

        for (item, expected) in items.iter().zip(&results) {
            assert_eq!(
                verifier.verify(item.hash, item.signature, item.public_key),
                *expected
            );
        }
    }

    #[test]
    fn garbage_key_material_is_rejected_not_fatal() {
        let verifier = CpuBatchVerifier::new();
        assert!(!verifier.verify(&[0; 48], &[1, 2, 3], &[4, 5, 6]));
    }
}
