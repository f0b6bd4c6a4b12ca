//! End-to-end ISS detection scenarios, including the wiring between the
//! signed-state manager and the hash detector.

use keel_api::notifications::IssNotifier;
use keel_consensus::iss::ConsensusHashManager;
use keel_consensus::round_validator::HashValidityStatus;
use keel_state::{GcHandle, SignedState, StateFlags, StateLifecycleNotifier};
use keel_types::config::{SignedStateConfig, StakeFraction};
use keel_types::{NodeId, StateHash};
use keel_test_utils::{
    equal_stake_book, fake_signature, recording_fatal, state_hash, CollectingSubmitter,
    FakeHashSigner, FakeVerifier, MemoryLedger, SnapshotTreeHasher,
};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct IssRecorder {
    valid: Mutex<Vec<u64>>,
    self_iss: Mutex<Vec<(u64, StateHash, StateHash)>>,
    catastrophic: Mutex<Vec<u64>>,
}

impl IssNotifier for IssRecorder {
    fn state_hash_validity(&self, round: u64, _self_hash: &StateHash, _consensus: &StateHash) {
        self.valid.lock().push(round);
    }
    fn self_iss(&self, round: u64, self_hash: &StateHash, consensus: &StateHash) {
        self.self_iss.lock().push((round, *self_hash, *consensus));
    }
    fn catastrophic_iss(&self, round: u64, _self_hash: Option<&StateHash>) {
        self.catastrophic.lock().push(round);
    }
}

fn detector_with(config: SignedStateConfig) -> (ConsensusHashManager, Arc<IssRecorder>) {
    let recorder = Arc::new(IssRecorder::default());
    let detector = ConsensusHashManager::new(&config, equal_stake_book(4, 25), recorder.clone());
    (detector, recorder)
}

/// Scenario: self-ISS. Three of four nodes agree on a different hash; the
/// dispatcher receives `(round, self_hash, consensus_hash)`.
#[test]
fn self_iss_dispatches_with_both_hashes() {
    let (detector, recorder) = detector_with(SignedStateConfig::default());
    detector.round_completed(10).unwrap();
    detector.state_hashed(10, state_hash(0xaa));
    for node in 1..=3 {
        detector.post_consensus_signature(10, NodeId::new(node), state_hash(0xbb));
    }
    assert_eq!(
        detector.round_status(10),
        Some(HashValidityStatus::SelfIss)
    );
    assert_eq!(
        *recorder.self_iss.lock(),
        vec![(10, state_hash(0xaa), state_hash(0xbb))]
    );
}

/// Scenario: catastrophic ISS. Four nodes, four hashes, 25 stake each.
#[test]
fn four_way_partition_is_catastrophic() {
    let (detector, recorder) = detector_with(SignedStateConfig::default());
    detector.round_completed(10).unwrap();
    for node in 1..=4u64 {
        detector.post_consensus_signature(10, NodeId::new(node), state_hash(node as u8));
    }
    assert_eq!(
        detector.round_status(10),
        Some(HashValidityStatus::CatastrophicIss)
    );
    assert_eq!(*recorder.catastrophic.lock(), vec![10]);
    assert!(recorder.self_iss.lock().is_empty());
}

/// Scenario: lack of data. Only the self hash arrives; the window closes
/// over the round with a warning and no dispatch.
#[test]
fn starved_round_becomes_lack_of_data() {
    let config = SignedStateConfig {
        rounds_non_ancient: 3,
        ..SignedStateConfig::default()
    };
    let (detector, recorder) = detector_with(config);
    detector.round_completed(10).unwrap();
    detector.state_hashed(10, state_hash(0x11));

    for round in 11..=13 {
        detector.round_completed(round).unwrap();
    }
    assert_eq!(detector.round_status(10), None, "evicted from the window");
    assert!(recorder.valid.lock().is_empty());
    assert!(recorder.self_iss.lock().is_empty());
    assert!(recorder.catastrophic.lock().is_empty());
}

/// A self-ISS with dumping enabled writes a JSON artifact with the
/// partition table.
#[test]
fn self_iss_writes_rate_limited_dump() {
    let dir = tempfile::tempdir().unwrap();
    let config = SignedStateConfig {
        dump_state_on_iss: true,
        iss_dump_directory: dir.path().to_path_buf(),
        ..SignedStateConfig::default()
    };
    let (detector, _recorder) = detector_with(config);

    detector.round_completed(10).unwrap();
    detector.state_hashed(10, state_hash(0xaa));
    for node in 1..=3 {
        detector.post_consensus_signature(10, NodeId::new(node), state_hash(0xbb));
    }

    let dump_path = dir.path().join("iss-round-10.json");
    let body = std::fs::read_to_string(&dump_path).expect("dump written");
    let artifact: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(artifact["round"], 10);
    assert_eq!(artifact["status"], "self-iss");
    assert_eq!(artifact["partitions"][0]["stake"], 75);

    // A second ISS inside the dump interval is suppressed.
    detector.round_completed(11).unwrap();
    detector.state_hashed(11, state_hash(0xaa));
    for node in 1..=3 {
        detector.post_consensus_signature(11, NodeId::new(node), state_hash(0xbb));
    }
    assert!(!dir.path().join("iss-round-11.json").exists());
}

/// Bridges the manager's lifecycle notifications into the ISS detector,
/// as the node wiring does.
struct DetectorBridge {
    detector: Arc<ConsensusHashManager>,
}

impl StateLifecycleNotifier for DetectorBridge {
    fn state_hashed(&self, round: u64, hash: &StateHash) {
        self.detector.state_hashed(round, *hash);
    }
}

/// Full wiring: the manager's intake reports the self hash before any
/// network signature, so a diverging network yields a clean self-ISS.
#[tokio::test]
async fn manager_feeds_detector_through_lifecycle_bridge() {
    let book = equal_stake_book(4, 25);
    let recorder = Arc::new(IssRecorder::default());
    let detector = Arc::new(ConsensusHashManager::new(
        &SignedStateConfig::default(),
        book.clone(),
        recorder.clone(),
    ));
    let (fatal, _) = recording_fatal();
    let manager = keel_consensus::manager::SignedStateManager::new(
        SignedStateConfig::default(),
        NodeId::new(1),
        book.clone(),
        Arc::new(FakeHashSigner::new(NodeId::new(1))),
        Arc::new(FakeVerifier),
        Arc::new(SnapshotTreeHasher),
        CollectingSubmitter::new(),
        Arc::new(DetectorBridge {
            detector: detector.clone(),
        }),
        fatal,
    );

    detector.round_completed(30).unwrap();
    let ledger = MemoryLedger::new(b"round 30 ledger".to_vec());
    let state = SignedState::new(
        30,
        vec![],
        ledger,
        book.clone(),
        StakeFraction::STRONG_MINORITY,
        StateFlags::default(),
        GcHandle::detached(),
    );
    manager.add_unsigned_state(state).await.unwrap();

    let own_hash = manager.latest_immutable().unwrap().root_hash().unwrap();
    assert_eq!(
        detector.round_status(30),
        Some(HashValidityStatus::Undecided),
        "self hash alone decides nothing"
    );

    // The network agrees with us.
    detector.post_consensus_signature(30, NodeId::new(2), own_hash);
    detector.post_consensus_signature(30, NodeId::new(3), own_hash);
    assert_eq!(detector.round_status(30), Some(HashValidityStatus::Valid));
    assert_eq!(*recorder.valid.lock(), vec![30]);

    // Keep the manager honest about its own signature too.
    let tracked = manager.latest_immutable().unwrap();
    assert_eq!(
        tracked.signatures()[0].1,
        fake_signature(NodeId::new(1), &own_hash)
    );
}
