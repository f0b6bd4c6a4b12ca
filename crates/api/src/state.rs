//! The application ledger handle consumed by the signed-state core.

use bytes::Bytes;

/// A handle to the deterministic application state at a round boundary.
///
/// The core never inspects the ledger's structure; it only hashes a
/// canonical snapshot and drives the two lifecycle hooks. Both hooks are
/// invoked at most once per state, `archive` strictly before `release`, and
/// never while a reservation of the corresponding tier is held.
pub trait LedgerState: Send + Sync {
    /// A canonical byte snapshot of the ledger, digested to produce the
    /// state's root hash.
    fn snapshot_bytes(&self) -> Bytes;

    /// Releases memory retained only for fast queries, keeping enough to
    /// serve reconnecting peers. Fired when the last strong reservation is
    /// released.
    fn archive(&self);

    /// Releases all remaining heap held by the ledger. Fired when the last
    /// weak reservation is released; always preceded by `archive`.
    fn release(&self);
}
