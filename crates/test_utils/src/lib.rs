//! Shared fixtures for signed-state tests: deterministic rosters, a
//! structural fake signature scheme, recording observers, and an in-memory
//! ledger.
//!
//! The fake scheme makes signatures checkable without cryptography: a
//! node's public key is its id in big-endian, and its signature over a hash
//! is that key followed by the hash's first eight bytes. Real key material
//! is exercised in `keel-crypto`'s own tests.

use async_trait::async_trait;
use bytes::Bytes;
use keel_api::{
    HashSigner, LedgerState, SignatureVerifier, SystemTransactionSubmitter, TreeHasher,
};
use keel_state::{SignedStateGuard, StateLifecycleNotifier};
use keel_types::error::CryptoError;
use keel_types::{AddressBook, AddressBookEntry, NodeId, StateHash, StateSignature};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An address book of `nodes` participants with identical `stake` each.
/// Node ids run from 1 to `nodes`; public keys are the fake scheme's.
pub fn equal_stake_book(nodes: u64, stake: u64) -> Arc<AddressBook> {
    let entries = (1..=nodes)
        .map(|id| AddressBookEntry {
            node_id: NodeId::new(id),
            stake,
            public_key: id.to_be_bytes().to_vec(),
        })
        .collect();
    Arc::new(AddressBook::new(entries).expect("fixture roster is well-formed"))
}

/// A hash filled with `byte`.
pub fn state_hash(byte: u8) -> StateHash {
    StateHash::new([byte; 48])
}

/// The fake scheme's signature of `node_id` over `hash`.
pub fn fake_signature(node_id: NodeId, hash: &StateHash) -> StateSignature {
    let mut bytes = node_id.id().to_be_bytes().to_vec();
    bytes.extend_from_slice(&hash.as_ref()[..8]);
    StateSignature::new(bytes)
}

/// Signs with the fake scheme as a fixed node.
#[derive(Debug, Clone, Copy)]
pub struct FakeHashSigner {
    node_id: NodeId,
}

impl FakeHashSigner {
    /// A signer for `node_id`.
    pub fn new(node_id: NodeId) -> Self {
        Self { node_id }
    }
}

impl HashSigner for FakeHashSigner {
    fn sign(&self, hash: &StateHash) -> Result<StateSignature, CryptoError> {
        Ok(fake_signature(self.node_id, hash))
    }
}

/// Verifies the fake scheme structurally.
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeVerifier;

impl SignatureVerifier for FakeVerifier {
    fn verify(&self, hash: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
        signature.len() == 16
            && &signature[..8] == public_key
            && signature[8..] == hash[..8]
    }
}

/// Digests ledger snapshots with a cheap deterministic fold, so tests can
/// steer a state's hash through its snapshot bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotTreeHasher;

#[async_trait]
impl TreeHasher for SnapshotTreeHasher {
    async fn digest_tree(&self, ledger: &dyn LedgerState) -> Result<StateHash, CryptoError> {
        let snapshot = ledger.snapshot_bytes();
        let mut digest = [0x5au8; 48];
        for (i, byte) in snapshot.iter().enumerate() {
            let slot = i % 48;
            digest[slot] = digest[slot].wrapping_mul(31).wrapping_add(*byte);
        }
        digest[0] ^= snapshot.len() as u8;
        Ok(StateHash::new(digest))
    }
}

/// A tree hasher that always fails, for driving the fatal path.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingTreeHasher;

#[async_trait]
impl TreeHasher for FailingTreeHasher {
    async fn digest_tree(&self, _ledger: &dyn LedgerState) -> Result<StateHash, CryptoError> {
        Err(CryptoError::HashingFailure("synthetic failure".into()))
    }
}

/// An in-memory ledger tracking its lifecycle hooks.
#[derive(Debug)]
pub struct MemoryLedger {
    snapshot: Vec<u8>,
    archived: AtomicBool,
    released: AtomicBool,
}

impl MemoryLedger {
    /// A ledger whose snapshot is `snapshot`.
    pub fn new(snapshot: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            snapshot,
            archived: AtomicBool::new(false),
            released: AtomicBool::new(false),
        })
    }

    /// Whether the archive hook has run.
    pub fn is_archived(&self) -> bool {
        self.archived.load(Ordering::SeqCst)
    }

    /// Whether the release hook has run.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl LedgerState for MemoryLedger {
    fn snapshot_bytes(&self) -> Bytes {
        Bytes::from(self.snapshot.clone())
    }

    fn archive(&self) {
        self.archived.store(true, Ordering::SeqCst);
    }

    fn release(&self) {
        assert!(
            self.archived.load(Ordering::SeqCst),
            "release hook ran before archive"
        );
        self.released.store(true, Ordering::SeqCst);
    }
}

/// One observed lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// `new_signed_state_being_tracked`
    Tracked(u64),
    /// `state_hashed`
    Hashed(u64),
    /// `state_has_enough_signatures`
    EnoughSignatures(u64),
    /// `state_lacks_signatures`
    LacksSignatures(u64),
    /// `new_latest_complete_state`
    NewLatestComplete(u64),
}

/// Records every lifecycle notification in order.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingNotifier {
    /// A fresh recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Everything observed so far, in dispatch order.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    /// The subset of events matching `filter`, in dispatch order.
    pub fn filtered(&self, filter: impl Fn(&LifecycleEvent) -> bool) -> Vec<LifecycleEvent> {
        self.events.lock().iter().copied().filter(filter).collect()
    }
}

impl StateLifecycleNotifier for RecordingNotifier {
    fn new_signed_state_being_tracked(&self, state: &SignedStateGuard) {
        self.events
            .lock()
            .push(LifecycleEvent::Tracked(state.round()));
    }
    fn state_hashed(&self, round: u64, _hash: &StateHash) {
        self.events.lock().push(LifecycleEvent::Hashed(round));
    }
    fn state_has_enough_signatures(&self, state: &SignedStateGuard) {
        self.events
            .lock()
            .push(LifecycleEvent::EnoughSignatures(state.round()));
    }
    fn state_lacks_signatures(&self, state: &SignedStateGuard) {
        self.events
            .lock()
            .push(LifecycleEvent::LacksSignatures(state.round()));
    }
    fn new_latest_complete_state(&self, state: &SignedStateGuard) {
        self.events
            .lock()
            .push(LifecycleEvent::NewLatestComplete(state.round()));
    }
}

/// Captures submitted system transaction payloads.
#[derive(Debug, Default)]
pub struct CollectingSubmitter {
    payloads: Mutex<Vec<Bytes>>,
    reject: AtomicBool,
}

impl CollectingSubmitter {
    /// A fresh collector that accepts everything.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes subsequent submissions fail, as during shutdown.
    pub fn reject_submissions(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    /// The captured payloads in submission order.
    pub fn payloads(&self) -> Vec<Bytes> {
        self.payloads.lock().clone()
    }
}

impl SystemTransactionSubmitter for CollectingSubmitter {
    fn submit(&self, payload: Bytes) -> bool {
        if self.reject.load(Ordering::SeqCst) {
            return false;
        }
        self.payloads.lock().push(payload);
        true
    }
}

/// A fatal-error consumer that records messages instead of halting.
pub fn recording_fatal() -> (Arc<dyn Fn(&str) + Send + Sync>, Arc<Mutex<Vec<String>>>) {
    let messages: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();
    let consumer: Arc<dyn Fn(&str) + Send + Sync> = Arc::new(move |message: &str| {
        sink.lock().push(message.to_string());
    });
    (consumer, messages)
}
