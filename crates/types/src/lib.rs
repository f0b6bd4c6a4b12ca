#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! # Keel Types
//!
//! Foundational library for the Keel platform's signed-state subsystem,
//! containing the core data structures, error types, and configuration
//! objects shared by every other crate in the workspace.
//!
//! ## Architectural Role
//!
//! As the base crate, `keel-types` has minimal dependencies and is itself a
//! dependency for almost every other crate in the workspace. This structure
//! prevents circular dependencies and provides a stable, canonical
//! definition for shared types like `StateHash`, `NodeId`, `AddressBook`,
//! and the error enums.

/// The staked roster of consensus participants for a round.
pub mod address_book;
/// The canonical, deterministic binary codec for consensus-critical data.
pub mod codec;
/// Configuration records for the signed-state subsystem.
pub mod config;
/// A unified set of all error types used across the workspace.
pub mod error;
/// Opaque consensus events carried by a signed state for diagnostics.
pub mod event;
/// Root-hash digest newtypes.
pub mod hash;
/// State-signature newtypes.
pub mod signature;

pub use address_book::{AddressBook, AddressBookEntry, NodeId};
pub use event::Event;
pub use hash::StateHash;
pub use signature::StateSignature;
