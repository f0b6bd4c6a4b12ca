//! Cryptographic hash functions using dcrypt.

use dcrypt::algorithms::hash::sha2::Sha384 as DcryptSha384;
use dcrypt::algorithms::hash::HashFunction as DcryptHashFunction;
use dcrypt::algorithms::ByteSerializable;
use keel_types::error::CryptoError;
use keel_types::hash::STATE_HASH_BYTES;
use keel_types::StateHash;

/// Hash function trait
pub trait HashFunction {
    /// Hash a message and return the digest
    fn hash(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Get the digest size in bytes
    fn digest_size(&self) -> usize;

    /// Get the name of the hash function
    fn name(&self) -> &str;
}

/// SHA-384 hash function implementation using dcrypt.
///
/// SHA-384 is the platform's state-digest function: its 48-byte output is
/// what nodes sign and what the ISS detector compares.
#[derive(Default, Clone)]
pub struct Sha384Hash;

impl HashFunction for Sha384Hash {
    fn hash(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let digest = DcryptSha384::digest(message)
            .map_err(dcrypt::Error::from)
            .map_err(|e| CryptoError::OperationFailed(e.to_string()))?;
        Ok(digest.to_bytes())
    }

    fn digest_size(&self) -> usize {
        STATE_HASH_BYTES
    }

    fn name(&self) -> &str {
        "SHA-384"
    }
}

/// Create a SHA-384 hash of any type that can be referenced as bytes
pub fn sha384<T: AsRef<[u8]>>(data: T) -> Result<[u8; STATE_HASH_BYTES], CryptoError> {
    let hasher = Sha384Hash;
    hasher
        .hash(data.as_ref())?
        .try_into()
        .map_err(|bytes: Vec<u8>| CryptoError::InvalidHashLength {
            expected: STATE_HASH_BYTES,
            got: bytes.len(),
        })
}

/// Digest arbitrary bytes into a `StateHash`.
pub fn state_hash_of<T: AsRef<[u8]>>(data: T) -> Result<StateHash, CryptoError> {
    Ok(StateHash::new(sha384(data)?))
}
