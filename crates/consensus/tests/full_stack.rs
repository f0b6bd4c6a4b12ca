//! The whole subsystem assembled with real crypto: dcrypt-backed SHA-384
//! tree digests, Ed25519 state signatures, the rayon batch verifier, and
//! the background garbage collector.

use keel_consensus::manager::SignedStateManager;
use keel_crypto::{CpuBatchVerifier, Ed25519HashSigner, Ed25519KeyPair, Sha384TreeHasher};
use keel_state::{SignedState, SignedStateGarbageCollector, StateFlags};
use keel_types::config::{SignedStateConfig, StakeFraction};
use keel_types::{AddressBook, AddressBookEntry, NodeId, StateSignature};
use keel_test_utils::{recording_fatal, CollectingSubmitter, MemoryLedger, RecordingNotifier};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn keyed_roster(nodes: u64, stake: u64) -> (Arc<AddressBook>, Vec<Ed25519KeyPair>) {
    let mut keys = Vec::new();
    let mut entries = Vec::new();
    for id in 1..=nodes {
        let mut seed = [0u8; 32];
        seed[..8].copy_from_slice(&id.to_be_bytes());
        let keypair = Ed25519KeyPair::from_seed(&seed).unwrap();
        entries.push(AddressBookEntry {
            node_id: NodeId::new(id),
            stake,
            public_key: keypair.public_key_bytes(),
        });
        keys.push(keypair);
    }
    (Arc::new(AddressBook::new(entries).unwrap()), keys)
}

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn real_crypto_round_completes_and_collects() {
    let (book, keys) = keyed_roster(4, 25);
    let config = SignedStateConfig::default();
    let collector = SignedStateGarbageCollector::start(&config);
    let notifier = RecordingNotifier::new();
    let (fatal, fatal_messages) = recording_fatal();

    let manager = SignedStateManager::new(
        config,
        NodeId::new(1),
        book.clone(),
        Arc::new(Ed25519HashSigner::new(keys[0].clone())),
        Arc::new(CpuBatchVerifier::new()),
        Arc::new(Sha384TreeHasher::new()),
        CollectingSubmitter::new(),
        notifier,
        fatal,
    );

    let ledger = MemoryLedger::new(vec![7u8; 4096]);
    let state = SignedState::new(
        1,
        vec![],
        ledger.clone(),
        book.clone(),
        StakeFraction::STRONG_MINORITY,
        StateFlags::default(),
        collector.handle(),
    );
    manager.add_unsigned_state(state).await.unwrap();

    let hash = manager.latest_immutable().unwrap().root_hash().unwrap();

    // A forged signature from node 2 is rejected by the real verifier.
    manager.pre_consensus_signature(1, NodeId::new(2), StateSignature::new(vec![0u8; 64]));
    assert_eq!(manager.last_complete_round(), None);

    // The genuine one completes the state.
    let signature = StateSignature::new(keys[1].sign(hash.as_ref()).unwrap());
    manager.pre_consensus_signature(1, NodeId::new(2), signature);
    assert_eq!(manager.last_complete_round(), Some(1));

    // Releasing every reservation lets the background collector reclaim the
    // ledger.
    manager.stop();
    assert!(wait_until(Duration::from_secs(5), || ledger.is_released()));
    collector.stop();
    assert!(fatal_messages.lock().is_empty());
}
