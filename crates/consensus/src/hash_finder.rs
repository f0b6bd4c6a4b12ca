//! Partition-and-count over reported state hashes to find the single hash
//! backed by a strong minority of stake.

use keel_types::{NodeId, StateHash};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;

/// Where the search for a consensus hash stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashFinderStatus {
    /// Not enough stake has reported to rule either way.
    Undecided,
    /// A single hash holds a strong minority and no other partition can
    /// reach one: this is the consensus hash.
    Decided(StateHash),
    /// The stake outside the leading partition exceeds a supermajority, so
    /// no hash can ever reach a strong minority.
    CatastrophicIss,
}

/// One group of nodes that reported the same hash.
#[derive(Debug, Clone)]
pub struct HashPartition {
    hash: StateHash,
    stake: u128,
    contributors: BTreeSet<NodeId>,
}

impl HashPartition {
    /// The hash this partition agrees on.
    pub fn hash(&self) -> StateHash {
        self.hash
    }

    /// The summed stake of the contributors.
    pub fn stake(&self) -> u128 {
        self.stake
    }

    /// The nodes that reported this hash.
    pub fn contributors(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.contributors.iter().copied()
    }
}

/// Accumulates `(node, stake, hash)` reports for one round until the
/// outcome is decided.
///
/// Reports are idempotent per node: a node's first hash is the only one
/// counted, so each node contributes to at most one partition. The decision
/// is monotone; once reached, further reports are ignored.
///
/// The strong-minority (> 1/3) bar deliberately matches the completion
/// threshold: in a roster whose honest stake exceeds a supermajority, two
/// conflicting hashes cannot both gather a strong minority.
#[derive(Debug)]
pub struct ConsensusHashFinder {
    round: u64,
    total_stake: u128,
    reported_stake: u128,
    partitions: HashMap<StateHash, HashPartition>,
    reporters: HashSet<NodeId>,
    status: HashFinderStatus,
}

impl ConsensusHashFinder {
    /// A finder for `round` measured against `total_stake`.
    pub fn new(round: u64, total_stake: u128) -> Self {
        Self {
            round,
            total_stake,
            reported_stake: 0,
            partitions: HashMap::new(),
            reporters: HashSet::new(),
            status: HashFinderStatus::Undecided,
        }
    }

    /// The round being examined.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// The roster-wide stake the thresholds are measured against.
    pub fn total_stake(&self) -> u128 {
        self.total_stake
    }

    /// The stake that has reported so far.
    pub fn reported_stake(&self) -> u128 {
        self.reported_stake
    }

    /// The current status. Monotone after leaving `Undecided`.
    pub fn status(&self) -> HashFinderStatus {
        self.status
    }

    /// The consensus hash, once decided.
    pub fn consensus_hash(&self) -> Option<StateHash> {
        match self.status {
            HashFinderStatus::Decided(hash) => Some(hash),
            _ => None,
        }
    }

    /// Records a node's report of `hash` backed by `stake`, re-evaluating
    /// the outcome. Duplicate reporters and post-decision reports are
    /// ignored.
    pub fn add_hash(&mut self, node_id: NodeId, stake: u64, hash: StateHash) -> HashFinderStatus {
        if self.status != HashFinderStatus::Undecided {
            return self.status;
        }
        if !self.reporters.insert(node_id) {
            return self.status;
        }

        let partition = self
            .partitions
            .entry(hash)
            .or_insert_with(|| HashPartition {
                hash,
                stake: 0,
                contributors: BTreeSet::new(),
            });
        partition.stake += u128::from(stake);
        partition.contributors.insert(node_id);
        self.reported_stake += u128::from(stake);

        self.reevaluate();
        self.status
    }

    /// Iterates the partitions in descending stake order.
    pub fn partitions(&self) -> Vec<&HashPartition> {
        let mut parts: Vec<&HashPartition> = self.partitions.values().collect();
        parts.sort_by(|a, b| b.stake.cmp(&a.stake).then(a.hash.cmp(&b.hash)));
        parts
    }

    /// Renders the partition table for fatal-level diagnostics.
    pub fn partition_summary(&self) -> String {
        let mut out = String::new();
        for partition in self.partitions() {
            let nodes: Vec<String> = partition.contributors().map(|n| n.to_string()).collect();
            let _ = writeln!(
                out,
                "  hash {}… stake {} nodes [{}]",
                partition.hash().short(),
                partition.stake(),
                nodes.join(", ")
            );
        }
        let _ = write!(
            out,
            "  reported {} of {} total stake",
            self.reported_stake, self.total_stake
        );
        out
    }

    fn reevaluate(&mut self) {
        let Some(leading) = self
            .partitions
            .values()
            .max_by(|a, b| a.stake.cmp(&b.stake).then(b.hash.cmp(&a.hash)))
        else {
            return;
        };

        let others = self.reported_stake - leading.stake;
        // The leader holds a strong minority and the rest of the reported
        // stake can never assemble one: decided.
        if leading.stake * 3 > self.total_stake && others * 3 < self.total_stake {
            self.status = HashFinderStatus::Decided(leading.hash);
            return;
        }
        // The stake outside the leader already exceeds a supermajority, so
        // no partition can ever reach a strong minority.
        if others * 3 > self.total_stake * 2 {
            self.status = HashFinderStatus::CatastrophicIss;
        }
    }
}
