//! End-to-end lifecycle scenarios for the signed-state manager.

use keel_consensus::manager::{SignedStateManager, StateSource};
use keel_state::{GcHandle, SignedState, SignedStateGuard, StateFlags};
use keel_types::config::{SignedStateConfig, StakeFraction};
use keel_types::error::{ReservationTier, StateManagerError};
use keel_types::{AddressBook, NodeId, StateSignature};
use keel_api::transaction::{decode_state_signature_payload, SYSTEM_TX_STATE_SIGNATURE};
use keel_api::TreeHasher;
use keel_test_utils::{
    equal_stake_book, fake_signature, recording_fatal, CollectingSubmitter, FailingTreeHasher,
    FakeHashSigner, FakeVerifier, LifecycleEvent, MemoryLedger, RecordingNotifier,
    SnapshotTreeHasher,
};
use std::sync::Arc;

struct Harness {
    manager: Arc<SignedStateManager>,
    notifier: Arc<RecordingNotifier>,
    submitter: Arc<CollectingSubmitter>,
    book: Arc<AddressBook>,
}

fn harness_with(config: SignedStateConfig, self_id: u64) -> Harness {
    let book = equal_stake_book(4, 25);
    let notifier = RecordingNotifier::new();
    let submitter = CollectingSubmitter::new();
    let (fatal, _) = recording_fatal();
    let manager = Arc::new(SignedStateManager::new(
        config,
        NodeId::new(self_id),
        book.clone(),
        Arc::new(FakeHashSigner::new(NodeId::new(self_id))),
        Arc::new(FakeVerifier),
        Arc::new(SnapshotTreeHasher),
        submitter.clone(),
        notifier.clone(),
        fatal,
    ));
    Harness {
        manager,
        notifier,
        submitter,
        book,
    }
}

fn harness() -> Harness {
    harness_with(SignedStateConfig::default(), 1)
}

fn unsigned_state(round: u64, book: &Arc<AddressBook>) -> (SignedStateGuard, Arc<MemoryLedger>) {
    let ledger = MemoryLedger::new(format!("ledger for round {round}").into_bytes());
    let guard = SignedState::new(
        round,
        vec![],
        ledger.clone(),
        book.clone(),
        StakeFraction::STRONG_MINORITY,
        StateFlags::default(),
        GcHandle::detached(),
    );
    (guard, ledger)
}

/// Scenario: happy path with four equal-stake nodes. Self plus one peer
/// crosses the one-third completion bar.
#[tokio::test]
async fn happy_path_reaches_completion_on_second_signature() {
    let h = harness();
    let (state, _ledger) = unsigned_state(10, &h.book);
    h.manager.add_unsigned_state(state).await.unwrap();

    let tracked = h.manager.latest_immutable().expect("state is tracked");
    let hash = tracked.root_hash().expect("hashed during intake");
    assert_eq!(tracked.round(), 10);
    assert_eq!(h.manager.last_complete_round(), None, "self stake alone is 25/100");
    drop(tracked);

    h.manager
        .pre_consensus_signature(10, NodeId::new(2), fake_signature(NodeId::new(2), &hash));
    assert_eq!(h.manager.last_complete_round(), Some(10));

    let complete = h.manager.latest_complete().expect("promoted");
    assert!(complete.is_complete());
    assert_eq!(complete.signing_stake(), 50);

    // A third signature changes nothing observable: completion is terminal.
    h.manager
        .pre_consensus_signature(10, NodeId::new(3), fake_signature(NodeId::new(3), &hash));
    assert_eq!(complete.signing_stake(), 50);

    let events = h.notifier.events();
    let hashed_at = events
        .iter()
        .position(|e| *e == LifecycleEvent::Hashed(10))
        .unwrap();
    let tracked_at = events
        .iter()
        .position(|e| *e == LifecycleEvent::Tracked(10))
        .unwrap();
    assert!(hashed_at < tracked_at, "hash observers run before tracking");
    assert!(events.contains(&LifecycleEvent::EnoughSignatures(10)));
    assert!(events.contains(&LifecycleEvent::NewLatestComplete(10)));
    assert!(!events.contains(&LifecycleEvent::LacksSignatures(10)));
}

/// The self-signature system transaction carries the bit-exact payload.
#[tokio::test]
async fn intake_submits_bit_exact_signature_transaction() {
    let h = harness();
    let (state, _ledger) = unsigned_state(7, &h.book);
    h.manager.add_unsigned_state(state).await.unwrap();

    let payloads = h.submitter.payloads();
    assert_eq!(payloads.len(), 1);
    let payload = &payloads[0];
    assert_eq!(payload[0], SYSTEM_TX_STATE_SIGNATURE);

    let decoded = decode_state_signature_payload(payload).unwrap();
    let tracked = h.manager.latest_immutable().unwrap();
    let hash = tracked.root_hash().unwrap();
    assert_eq!(decoded.round, 7);
    assert_eq!(decoded.hash, hash);
    assert_eq!(decoded.signature, fake_signature(NodeId::new(1), &hash));
}

/// Scenario: out-of-order intake is rejected and logged, not tracked.
#[tokio::test]
async fn out_of_order_rounds_are_rejected() {
    let h = harness();
    let (state, _l) = unsigned_state(10, &h.book);
    h.manager.add_unsigned_state(state).await.unwrap();

    for bad_round in [9, 10] {
        let (state, _l) = unsigned_state(bad_round, &h.book);
        let err = h.manager.add_unsigned_state(state).await.unwrap_err();
        assert!(matches!(
            err,
            StateManagerError::OutOfOrderRound { last: 10, got } if got == bad_round
        ));
    }
    assert_eq!(h.manager.last_round(), Some(10));
}

/// Scenario: a signature arriving before its round's state is buffered and
/// drained at intake, completing the state as though it arrived in order.
#[tokio::test]
async fn out_of_order_signature_is_buffered_and_drained() {
    let h = harness();

    // Compute the hash round 15 will get, to craft the early signature.
    let probe = MemoryLedger::new(b"ledger for round 15".to_vec());
    let expected_hash = SnapshotTreeHasher
        .digest_tree(probe.as_ref() as &dyn keel_api::LedgerState)
        .await
        .unwrap();

    h.manager.pre_consensus_signature(
        15,
        NodeId::new(2),
        fake_signature(NodeId::new(2), &expected_hash),
    );
    assert_eq!(h.manager.last_complete_round(), None);

    let (state, _l) = unsigned_state(15, &h.book);
    h.manager.add_unsigned_state(state).await.unwrap();

    assert_eq!(h.manager.last_complete_round(), Some(15));
    assert!(h
        .notifier
        .events()
        .contains(&LifecycleEvent::EnoughSignatures(15)));
}

/// A corrupt or unknown-signer signature is dropped as though it never
/// arrived, and duplicates collapse.
#[tokio::test]
async fn invalid_and_duplicate_signatures_are_absorbed() {
    let h = harness();
    let (state, _l) = unsigned_state(3, &h.book);
    h.manager.add_unsigned_state(state).await.unwrap();
    let hash = h.manager.latest_immutable().unwrap().root_hash().unwrap();

    // Wrong bytes.
    h.manager
        .pre_consensus_signature(3, NodeId::new(2), StateSignature::new(vec![0; 16]));
    // Signer not in the roster.
    h.manager
        .pre_consensus_signature(3, NodeId::new(9), fake_signature(NodeId::new(9), &hash));
    // A signature claiming node 3's key from node 2's message is structurally
    // wrong for node 3.
    h.manager
        .pre_consensus_signature(3, NodeId::new(3), fake_signature(NodeId::new(2), &hash));
    assert_eq!(h.manager.last_complete_round(), None);

    let state = h.manager.latest_immutable().unwrap();
    assert_eq!(state.signature_count(), 1, "only the self signature");

    // The same valid signature twice counts once.
    let sig = fake_signature(NodeId::new(2), &hash);
    h.manager.pre_consensus_signature(3, NodeId::new(2), sig.clone());
    h.manager.pre_consensus_signature(3, NodeId::new(2), sig);
    assert_eq!(state.signing_stake(), 50);
}

/// The completion bar follows the configured threshold: at 2/3, two of
/// four equal-stake signatures are no longer enough.
#[tokio::test]
async fn supermajority_threshold_demands_more_stake() {
    let config = SignedStateConfig {
        completion_threshold: StakeFraction::SUPERMAJORITY,
        ..SignedStateConfig::default()
    };
    let h = harness_with(config, 1);

    let ledger = MemoryLedger::new(b"supermajority round".to_vec());
    let state = h.manager.new_unsigned_state(
        8,
        vec![],
        ledger,
        StateFlags::default(),
        GcHandle::detached(),
    );
    h.manager.add_unsigned_state(state).await.unwrap();
    let hash = h.manager.latest_immutable().unwrap().root_hash().unwrap();

    h.manager
        .pre_consensus_signature(8, NodeId::new(2), fake_signature(NodeId::new(2), &hash));
    assert_eq!(h.manager.last_complete_round(), None, "50 of 100 is not > 2/3");

    h.manager
        .pre_consensus_signature(8, NodeId::new(3), fake_signature(NodeId::new(3), &hash));
    assert_eq!(h.manager.last_complete_round(), Some(8), "75 of 100 is");
}

/// States that never gather enough signatures are purged when the window
/// advances, with exactly one terminal notification each.
#[tokio::test]
async fn ancient_incomplete_states_are_purged() {
    let config = SignedStateConfig {
        rounds_to_keep_for_signing: 3,
        ..SignedStateConfig::default()
    };
    let h = harness_with(config, 1);

    for round in 10..=14 {
        let (state, _l) = unsigned_state(round, &h.book);
        h.manager.add_unsigned_state(state).await.unwrap();
    }

    // With a window of 3 and the latest at 14, rounds below 12 are gone.
    let (fresh, stale) = h.manager.tracked_rounds();
    assert_eq!(fresh, vec![12, 13, 14]);
    assert!(stale.is_empty());
    assert!(fresh.len() + stale.len() <= 3 + 1);

    let lacks = h
        .notifier
        .filtered(|e| matches!(e, LifecycleEvent::LacksSignatures(_)));
    assert_eq!(
        lacks,
        vec![
            LifecycleEvent::LacksSignatures(10),
            LifecycleEvent::LacksSignatures(11),
        ]
    );
    for round in [10u64, 11] {
        assert!(!h
            .notifier
            .events()
            .contains(&LifecycleEvent::EnoughSignatures(round)));
    }
}

/// Scenario: the reservation race. A reader holding the superseded latest
/// complete state keeps it alive; archive fires when the last strong holder
/// releases, delete only after the weak holder follows.
#[tokio::test]
async fn superseded_state_survives_until_all_reservations_drop() {
    let h = harness();

    let (state10, ledger10) = unsigned_state(10, &h.book);
    h.manager.add_unsigned_state(state10).await.unwrap();
    let hash10 = h.manager.latest_immutable().unwrap().root_hash().unwrap();
    h.manager
        .pre_consensus_signature(10, NodeId::new(2), fake_signature(NodeId::new(2), &hash10));

    // Thread A's strong wrapper and thread B's weak wrapper over round 10.
    let strong_holder = h.manager.latest_complete().unwrap();
    assert_eq!(strong_holder.round(), 10);
    let weak_holder = h.manager.find(10, hash10).unwrap();
    assert_eq!(weak_holder.tier(), ReservationTier::Weak);

    // Round 11 completes and supersedes round 10.
    let (state11, _l11) = unsigned_state(11, &h.book);
    h.manager.add_unsigned_state(state11).await.unwrap();
    let hash11 = h.manager.latest_immutable().unwrap().root_hash().unwrap();
    h.manager
        .pre_consensus_signature(11, NodeId::new(2), fake_signature(NodeId::new(2), &hash11));
    assert_eq!(h.manager.last_complete_round(), Some(11));

    // Round 10 is still fully usable through A's reservation.
    assert!(!ledger10.is_archived());
    assert_eq!(strong_holder.signing_stake(), 50);

    drop(strong_holder);
    assert!(ledger10.is_archived(), "last strong holder released");
    assert!(!ledger10.is_released(), "weak holder still present");

    drop(weak_holder);
    assert!(ledger10.is_released());
}

/// Scenario: adopting a complete state from reconnect prunes signatures
/// against the trusted roster and promotes.
#[tokio::test]
async fn adopted_complete_state_is_pruned_and_promoted() {
    let h = harness();
    let hash = keel_test_utils::state_hash(0x77);

    let (state, _ledger) = unsigned_state(20, &h.book);
    state.set_root_hash(hash).unwrap();
    // Two honest signatures, one from a stranger, one garbage. The claimed
    // stakes are lies the prune must correct.
    state.record_signature(NodeId::new(2), fake_signature(NodeId::new(2), &hash), 1);
    state.record_signature(NodeId::new(3), fake_signature(NodeId::new(3), &hash), 1);
    state.record_signature(NodeId::new(9), fake_signature(NodeId::new(9), &hash), 90);
    state.record_signature(NodeId::new(4), StateSignature::new(vec![0; 4]), 90);

    h.manager
        .add_complete_signed_state(state, StateSource::Reconnect)
        .unwrap();

    assert_eq!(h.manager.last_complete_round(), Some(20));
    let adopted = h.manager.latest_complete().unwrap();
    assert_eq!(adopted.signature_count(), 2);
    assert_eq!(adopted.signing_stake(), 50);
    assert!(h
        .notifier
        .events()
        .contains(&LifecycleEvent::EnoughSignatures(20)));

    // The adopted round also answers reconnect lookups.
    assert!(h.manager.find(20, hash).is_some());
    assert!(h.manager.find(20, keel_test_utils::state_hash(0x00)).is_none());
}

/// An unhashed state through the complete-state path is a precondition
/// failure.
#[tokio::test]
async fn unhashed_complete_state_is_rejected() {
    let h = harness();
    let (state, _l) = unsigned_state(5, &h.book);
    let err = h
        .manager
        .add_complete_signed_state(state, StateSource::Disk)
        .unwrap_err();
    assert!(matches!(err, StateManagerError::HashMissing(5)));
    assert_eq!(h.manager.last_round(), None);
}

/// Hashing failure invokes the fatal-error consumer and leaves nothing
/// tracked.
#[tokio::test]
async fn hashing_failure_is_fatal() {
    let book = equal_stake_book(4, 25);
    let notifier = RecordingNotifier::new();
    let (fatal, messages) = recording_fatal();
    let manager = SignedStateManager::new(
        SignedStateConfig::default(),
        NodeId::new(1),
        book.clone(),
        Arc::new(FakeHashSigner::new(NodeId::new(1))),
        Arc::new(FakeVerifier),
        Arc::new(FailingTreeHasher),
        CollectingSubmitter::new(),
        notifier,
        fatal,
    );

    let (state, _l) = unsigned_state(1, &book);
    let err = manager.add_unsigned_state(state).await.unwrap_err();
    assert!(matches!(err, StateManagerError::HashingFailure { round: 1, .. }));
    assert_eq!(messages.lock().len(), 1);
    assert_eq!(manager.last_round(), None);
}

/// A freeze-round state submits its signature under the freeze type tag.
#[tokio::test]
async fn freeze_state_uses_freeze_transaction_tag() {
    let h = harness();
    let ledger = MemoryLedger::new(b"freeze round".to_vec());
    let state = h.manager.new_unsigned_state(
        2,
        vec![],
        ledger,
        StateFlags {
            freeze_state: true,
            state_to_save: true,
        },
        GcHandle::detached(),
    );
    h.manager.add_unsigned_state(state).await.unwrap();

    let payloads = h.submitter.payloads();
    assert_eq!(payloads[0][0], keel_api::transaction::SYSTEM_TX_FREEZE_STATE);
    let decoded = decode_state_signature_payload(&payloads[0]).unwrap();
    assert!(decoded.freeze);
}

/// Zero-stake signers are legitimate roster members whose signatures are
/// recorded but move no threshold.
#[tokio::test]
async fn zero_stake_signatures_count_for_nothing() {
    let mut entries: Vec<_> = (1..=4u64)
        .map(|id| keel_types::AddressBookEntry {
            node_id: NodeId::new(id),
            stake: 25,
            public_key: id.to_be_bytes().to_vec(),
        })
        .collect();
    entries.push(keel_types::AddressBookEntry {
        node_id: NodeId::new(5),
        stake: 0,
        public_key: 5u64.to_be_bytes().to_vec(),
    });
    let book = Arc::new(AddressBook::new(entries).unwrap());

    let notifier = RecordingNotifier::new();
    let (fatal, _) = recording_fatal();
    let manager = SignedStateManager::new(
        SignedStateConfig::default(),
        NodeId::new(1),
        book.clone(),
        Arc::new(FakeHashSigner::new(NodeId::new(1))),
        Arc::new(FakeVerifier),
        Arc::new(SnapshotTreeHasher),
        CollectingSubmitter::new(),
        notifier,
        fatal,
    );

    let ledger = MemoryLedger::new(b"zero stake round".to_vec());
    let state = manager.new_unsigned_state(1, vec![], ledger, StateFlags::default(), GcHandle::detached());
    manager.add_unsigned_state(state).await.unwrap();
    let hash = manager.latest_immutable().unwrap().root_hash().unwrap();

    manager.pre_consensus_signature(1, NodeId::new(5), fake_signature(NodeId::new(5), &hash));
    let tracked = manager.latest_immutable().unwrap();
    assert_eq!(tracked.signature_count(), 2);
    assert_eq!(tracked.signing_stake(), 25, "self only; node 5 adds nothing");
    assert_eq!(manager.last_complete_round(), None);
}

/// Completeness is invariant under signature arrival order.
#[tokio::test]
async fn completion_is_order_invariant() {
    let mut completions = Vec::new();
    for order in [[2u64, 3, 4], [4, 2, 3], [3, 4, 2]] {
        let h = harness();
        let (state, _l) = unsigned_state(6, &h.book);
        h.manager.add_unsigned_state(state).await.unwrap();
        let hash = h.manager.latest_immutable().unwrap().root_hash().unwrap();

        for node in order {
            h.manager
                .pre_consensus_signature(6, NodeId::new(node), fake_signature(NodeId::new(node), &hash));
        }
        let enough = h
            .notifier
            .filtered(|e| matches!(e, LifecycleEvent::EnoughSignatures(_)));
        assert_eq!(enough.len(), 1, "completion fires exactly once");
        completions.push(h.manager.last_complete_round());
    }
    assert!(completions.iter().all(|c| *c == Some(6)));
}

/// An adopted complete state older than the current best emits its
/// terminal notification but never regresses the latest-complete round.
#[tokio::test]
async fn older_complete_state_does_not_regress_promotion() {
    let h = harness();

    let (state, _l) = unsigned_state(50, &h.book);
    h.manager.add_unsigned_state(state).await.unwrap();
    let hash50 = h.manager.latest_immutable().unwrap().root_hash().unwrap();
    h.manager
        .pre_consensus_signature(50, NodeId::new(2), fake_signature(NodeId::new(2), &hash50));
    assert_eq!(h.manager.last_complete_round(), Some(50));

    let hash40 = keel_test_utils::state_hash(0x40);
    let (old_state, _l40) = unsigned_state(40, &h.book);
    old_state.set_root_hash(hash40).unwrap();
    old_state.record_signature(NodeId::new(2), fake_signature(NodeId::new(2), &hash40), 25);
    old_state.record_signature(NodeId::new(3), fake_signature(NodeId::new(3), &hash40), 25);
    h.manager
        .add_complete_signed_state(old_state, StateSource::Disk)
        .unwrap();

    assert_eq!(h.manager.last_complete_round(), Some(50), "no regression");
    assert!(h
        .notifier
        .events()
        .contains(&LifecycleEvent::EnoughSignatures(40)));
    let promotions = h
        .notifier
        .filtered(|e| matches!(e, LifecycleEvent::NewLatestComplete(_)));
    assert_eq!(promotions, vec![LifecycleEvent::NewLatestComplete(50)]);
}

/// Concurrent signature fan-in from multiple dispatcher threads completes
/// the state exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_signature_fan_in_completes_once() {
    let h = harness();
    let (state, _l) = unsigned_state(9, &h.book);
    h.manager.add_unsigned_state(state).await.unwrap();
    let hash = h.manager.latest_immutable().unwrap().root_hash().unwrap();

    let threads: Vec<_> = (2..=4u64)
        .map(|node| {
            let manager = h.manager.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    manager.pre_consensus_signature(
                        9,
                        NodeId::new(node),
                        fake_signature(NodeId::new(node), &hash),
                    );
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(h.manager.last_complete_round(), Some(9));
    let enough = h
        .notifier
        .filtered(|e| matches!(e, LifecycleEvent::EnoughSignatures(_)));
    assert_eq!(enough, vec![LifecycleEvent::EnoughSignatures(9)]);
    let promotions = h
        .notifier
        .filtered(|e| matches!(e, LifecycleEvent::NewLatestComplete(_)));
    assert_eq!(promotions.len(), 1);
}

/// Stopping the manager releases its reservations and refuses new intake.
#[tokio::test]
async fn stop_releases_tracked_states() {
    let h = harness();
    let (state, ledger) = unsigned_state(4, &h.book);
    h.manager.add_unsigned_state(state).await.unwrap();
    assert!(!ledger.is_archived());

    h.manager.stop();
    assert!(ledger.is_released(), "manager held the only reservations");

    let (state, _l) = unsigned_state(5, &h.book);
    assert!(matches!(
        h.manager.add_unsigned_state(state).await.unwrap_err(),
        StateManagerError::Shutdown
    ));
}
