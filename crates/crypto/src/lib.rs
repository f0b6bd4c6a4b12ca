#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::indexing_slicing
    )
)]

//! # Keel Cryptography
//!
//! Concrete implementations of the `keel-api` cryptographic seams: SHA-384
//! state digests, Ed25519 state signatures, a rayon-parallel batch
//! verifier, and the asynchronous tree hasher.

pub mod hash;
pub mod sign;
pub mod tree;

pub use sign::batch::CpuBatchVerifier;
pub use sign::{Ed25519HashSigner, Ed25519KeyPair};
pub use tree::Sha384TreeHasher;
