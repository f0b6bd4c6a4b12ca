//! Core error types for the signed-state subsystem.

use crate::address_book::NodeId;
use std::fmt;
use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// The two reservation tiers of a signed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationTier {
    /// Holding a strong reservation prevents archival (and, implicitly,
    /// deletion).
    Strong,
    /// Holding a weak reservation prevents deletion only.
    Weak,
}

impl fmt::Display for ReservationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strong => write!(f, "strong"),
            Self::Weak => write!(f, "weak"),
        }
    }
}

/// Errors from reservation-counter misuse. These indicate a lifetime bug in
/// the caller, never a data-plane condition.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// A reservation was taken after the tier's destruction callback fired.
    #[error("{tier} reservation taken after the tier was destroyed")]
    AfterDestruction {
        /// The tier that was already destroyed.
        tier: ReservationTier,
    },
}

impl ErrorCode for ReservationError {
    fn code(&self) -> &'static str {
        match self {
            Self::AfterDestruction { .. } => "RESERVATION_AFTER_DESTRUCTION",
        }
    }
}

/// Errors from address book construction.
#[derive(Debug, Error)]
pub enum AddressBookError {
    /// The same node id appeared more than once in the roster.
    #[error("duplicate node id {0} in address book")]
    DuplicateNodeId(NodeId),
    /// The roster contained no entries.
    #[error("address book has no entries")]
    EmptyRoster,
    /// Every entry carried zero stake, so no threshold could ever be met.
    #[error("address book total stake is zero")]
    ZeroTotalStake,
}

impl ErrorCode for AddressBookError {
    fn code(&self) -> &'static str {
        match self {
            Self::DuplicateNodeId(_) => "ADDRESS_BOOK_DUPLICATE_NODE",
            Self::EmptyRoster => "ADDRESS_BOOK_EMPTY",
            Self::ZeroTotalStake => "ADDRESS_BOOK_ZERO_STAKE",
        }
    }
}

/// Errors surfaced by the signed-state manager.
#[derive(Debug, Error)]
pub enum StateManagerError {
    /// `add_unsigned_state` received a round that does not advance the
    /// latest tracked round. The state is not tracked.
    #[error("out-of-order round: last tracked {last}, got {got}")]
    OutOfOrderRound {
        /// The latest round already tracked.
        last: u64,
        /// The rejected round.
        got: u64,
    },
    /// A state arrived through the complete-state path without a root hash.
    #[error("state for round {0} has no root hash")]
    HashMissing(u64),
    /// A second root hash was assigned to an already-hashed state.
    #[error("root hash for round {0} was already assigned")]
    HashAlreadySet(u64),
    /// Hashing the state failed; the fatal-error consumer has been invoked.
    #[error("hashing state for round {round} failed: {reason}")]
    HashingFailure {
        /// The round whose state could not be hashed.
        round: u64,
        /// The underlying failure.
        reason: String,
    },
    /// Producing this node's own signature failed; the fatal-error consumer
    /// has been invoked.
    #[error("self-signing state for round {round} failed: {reason}")]
    SigningFailure {
        /// The round whose state could not be signed.
        round: u64,
        /// The underlying failure.
        reason: String,
    },
    /// The manager has been stopped and accepts no further states.
    #[error("signed-state manager is shut down")]
    Shutdown,
}

impl ErrorCode for StateManagerError {
    fn code(&self) -> &'static str {
        match self {
            Self::OutOfOrderRound { .. } => "STATE_MANAGER_OUT_OF_ORDER_ROUND",
            Self::HashMissing(_) => "STATE_MANAGER_HASH_MISSING",
            Self::HashAlreadySet(_) => "STATE_MANAGER_HASH_ALREADY_SET",
            Self::HashingFailure { .. } => "STATE_MANAGER_HASHING_FAILURE",
            Self::SigningFailure { .. } => "STATE_MANAGER_SIGNING_FAILURE",
            Self::Shutdown => "STATE_MANAGER_SHUTDOWN",
        }
    }
}

/// Data-plane signature rejection reasons. These are absorbed locally and
/// observable only through metrics and rate-limited logs; a rejected
/// signature is indistinguishable from one that never arrived.
#[derive(Debug, Error)]
pub enum SignatureError {
    /// The signer does not appear in the state's address book.
    #[error("signer {0} is not in the address book")]
    UnknownSigner(NodeId),
    /// The signature failed cryptographic verification.
    #[error("signature from {0} failed verification")]
    Invalid(NodeId),
    /// The signer already has a signature recorded for this state.
    #[error("signer {0} already present in the signature set")]
    Duplicate(NodeId),
    /// The signature targets a round already evicted from the window.
    #[error("signature for ancient round {round} (earliest permitted {earliest_permitted})")]
    StaleRound {
        /// The round the signature targeted.
        round: u64,
        /// The oldest round still tracked.
        earliest_permitted: u64,
    },
    /// The signature targets a round too far beyond the latest state.
    #[error("signature for round {round} beyond the buffering horizon {horizon}")]
    FutureRoundDropped {
        /// The round the signature targeted.
        round: u64,
        /// The highest round accepted into the deferred buffer.
        horizon: u64,
    },
}

impl ErrorCode for SignatureError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownSigner(_) => "SIGNATURE_UNKNOWN_SIGNER",
            Self::Invalid(_) => "SIGNATURE_INVALID",
            Self::Duplicate(_) => "SIGNATURE_DUPLICATE",
            Self::StaleRound { .. } => "SIGNATURE_STALE_ROUND",
            Self::FutureRoundDropped { .. } => "SIGNATURE_FUTURE_ROUND_DROPPED",
        }
    }
}

/// Errors from cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Hashing the application state failed. This is unrecoverable: the
    /// round cannot be signed and the fatal-error consumer is invoked.
    #[error("state hashing failed: {0}")]
    HashingFailure(String),
    /// The signature failed cryptographic verification.
    #[error("signature verification failed")]
    VerificationFailed,
    /// The provided key material is malformed or invalid.
    #[error("invalid cryptographic key: {0}")]
    InvalidKey(String),
    /// The provided signature material is malformed or invalid.
    #[error("invalid signature format: {0}")]
    InvalidSignature(String),
    /// A hash digest had an unexpected length.
    #[error("invalid hash length: expected {expected}, got {got}")]
    InvalidHashLength {
        /// The expected length in bytes.
        expected: usize,
        /// The actual length in bytes.
        got: usize,
    },
    /// A generic failure in an underlying cryptographic library.
    #[error("cryptographic operation failed: {0}")]
    OperationFailed(String),
}

impl ErrorCode for CryptoError {
    fn code(&self) -> &'static str {
        match self {
            Self::HashingFailure(_) => "CRYPTO_HASHING_FAILURE",
            Self::VerificationFailed => "CRYPTO_VERIFICATION_FAILED",
            Self::InvalidKey(_) => "CRYPTO_INVALID_KEY",
            Self::InvalidSignature(_) => "CRYPTO_INVALID_SIGNATURE",
            Self::InvalidHashLength { .. } => "CRYPTO_INVALID_HASH_LENGTH",
            Self::OperationFailed(_) => "CRYPTO_OPERATION_FAILED",
        }
    }
}

/// Errors from the consensus-hash (ISS) detector.
#[derive(Debug, Error)]
pub enum IssDetectorError {
    /// `round_completed` was called with a round that does not exceed the
    /// previously completed round. Rounds complete in strict order; a
    /// regression means the caller's round stream is corrupt.
    #[error("round {got} does not advance previously completed round {previous}")]
    NonIncreasingRound {
        /// The previously completed round.
        previous: u64,
        /// The offending round.
        got: u64,
    },
}

impl ErrorCode for IssDetectorError {
    fn code(&self) -> &'static str {
        match self {
            Self::NonIncreasingRound { .. } => "ISS_NON_INCREASING_ROUND",
        }
    }
}
