//! The ISS detector: drives per-round hash validators across the
//! non-ancient window and turns their verdicts into the failure taxonomy's
//! actions.

use crate::hash_finder::ConsensusHashFinder;
use crate::metrics::state_metrics;
use crate::round_validator::{HashValidityStatus, RoundDecision, RoundHashValidator};
use crate::sequence::SequenceMap;
use keel_api::IssNotifier;
use keel_telemetry::LogRateLimiter;
use keel_types::config::SignedStateConfig;
use keel_types::error::IssDetectorError;
use keel_types::{AddressBook, NodeId, StateHash};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

struct OutcomeLimiters {
    self_iss: LogRateLimiter,
    catastrophic: LogRateLimiter,
    lack_of_data: LogRateLimiter,
}

struct DetectorInner {
    window: SequenceMap<RoundHashValidator>,
    previous_round: Option<u64>,
    limiters: OutcomeLimiters,
    dump: Option<IssDumpWriter>,
}

/// Validates every completed round's consensus hash against this node's
/// own hash.
///
/// One validator lives per non-ancient round; when a round leaves the
/// window it is forced to a verdict. Verdicts feed the `IssNotifier`, the
/// metrics sink, and rate-limited logs; ISS outcomes are semantic events,
/// never errors.
pub struct ConsensusHashManager {
    address_book: Arc<AddressBook>,
    notifier: Arc<dyn IssNotifier>,
    inner: Mutex<DetectorInner>,
}

impl ConsensusHashManager {
    /// A detector over `address_book`, dispatching to `notifier`.
    pub fn new(
        config: &SignedStateConfig,
        address_book: Arc<AddressBook>,
        notifier: Arc<dyn IssNotifier>,
    ) -> Self {
        let log_period = Duration::from_secs(config.seconds_between_iss_logs);
        let dump = config.dump_state_on_iss.then(|| {
            IssDumpWriter::new(
                config.iss_dump_directory.clone(),
                Duration::from_secs(config.seconds_between_iss_dumps),
            )
        });
        Self {
            address_book,
            notifier,
            inner: Mutex::new(DetectorInner {
                window: SequenceMap::new(1, config.rounds_non_ancient),
                previous_round: None,
                limiters: OutcomeLimiters {
                    self_iss: LogRateLimiter::new(log_period),
                    catastrophic: LogRateLimiter::new(log_period),
                    lack_of_data: LogRateLimiter::new(log_period),
                },
                dump,
            }),
        }
    }

    /// Opens tracking for a newly completed round, shifting the window
    /// forward. A contiguous advance forces verdicts on evicted rounds; a
    /// gap (boot, reconnect) evicts silently, since skipped rounds are not
    /// evidence of anything.
    pub fn round_completed(&self, round: u64) -> Result<(), IssDetectorError> {
        let mut inner = self.inner.lock();
        if let Some(previous) = inner.previous_round {
            if round <= previous {
                return Err(IssDetectorError::NonIncreasingRound {
                    previous,
                    got: round,
                });
            }
        }

        let width = inner.window.capacity() as u64;
        let new_lowest = round.saturating_sub(width - 1).max(1);
        let contiguous = inner.previous_round.map_or(false, |p| round == p + 1);

        let mut forced: Vec<(RoundDecision, RoundHashValidator)> = Vec::new();
        if contiguous {
            inner.window.shift_window(new_lowest, |_, mut validator| {
                if let Some(decision) = validator.out_of_time() {
                    forced.push((decision, validator));
                }
            });
        } else {
            inner.window.shift_window(new_lowest, |_, _| {});
        }

        inner
            .window
            .insert(round, RoundHashValidator::new(round, self.address_book.total_stake()));
        inner.previous_round = Some(round);

        let DetectorInner { limiters, dump, .. } = &mut *inner;
        for (decision, validator) in &forced {
            Self::act(&self.notifier, limiters, dump, *decision, validator.finder());
        }
        Ok(())
    }

    /// Reports this node's own hash for a round.
    pub fn state_hashed(&self, round: u64, hash: StateHash) {
        self.with_validator(round, |validator| validator.report_self_hash(hash));
    }

    /// Reports a hash observed in a post-consensus state signature. The
    /// signature itself was already validated by the consensus engine.
    pub fn post_consensus_signature(&self, round: u64, signer: NodeId, hash: StateHash) {
        let Some(stake) = self.address_book.stake(signer) else {
            tracing::debug!(target: "iss", round, %signer, "hash report from unknown signer dropped");
            return;
        };
        self.with_validator(round, |validator| {
            validator.report_network_hash(signer, stake, hash)
        });
    }

    /// The verdict for `round`, while it remains in the window.
    pub fn round_status(&self, round: u64) -> Option<HashValidityStatus> {
        self.inner.lock().window.get(round).map(|v| v.status())
    }

    fn with_validator(
        &self,
        round: u64,
        f: impl FnOnce(&mut RoundHashValidator) -> Option<RoundDecision>,
    ) {
        let mut inner = self.inner.lock();
        let DetectorInner {
            window,
            limiters,
            dump,
            ..
        } = &mut *inner;
        let Some(validator) = window.get_mut(round) else {
            tracing::debug!(target: "iss", round, "hash report for a round outside the window");
            return;
        };
        if let Some(decision) = f(validator) {
            Self::act(&self.notifier, limiters, dump, decision, validator.finder());
        }
    }

    fn act(
        notifier: &Arc<dyn IssNotifier>,
        limiters: &mut OutcomeLimiters,
        dump: &mut Option<IssDumpWriter>,
        decision: RoundDecision,
        finder: &ConsensusHashFinder,
    ) {
        state_metrics().inc_iss_outcome(decision.status.label());
        match decision.status {
            HashValidityStatus::Undecided => {}
            HashValidityStatus::Valid => {
                if let (Some(own), Some(consensus)) = (decision.self_hash, decision.consensus_hash)
                {
                    tracing::debug!(
                        target: "iss",
                        round = decision.round,
                        hash = %consensus.short(),
                        "round hash validated"
                    );
                    notifier.state_hash_validity(decision.round, &own, &consensus);
                }
            }
            HashValidityStatus::SelfIss => {
                let (Some(own), Some(consensus)) = (decision.self_hash, decision.consensus_hash)
                else {
                    return;
                };
                if let Some(suppressed) = limiters.self_iss.check() {
                    tracing::error!(
                        target: "iss",
                        round = decision.round,
                        self_hash = %own,
                        consensus_hash = %consensus,
                        suppressed,
                        "SELF ISS: this node's state disagrees with network consensus"
                    );
                }
                notifier.state_hash_validity(decision.round, &own, &consensus);
                notifier.self_iss(decision.round, &own, &consensus);
                if let Some(writer) = dump {
                    writer.maybe_dump(&decision, finder);
                }
            }
            HashValidityStatus::CatastrophicIss | HashValidityStatus::CatastrophicLackOfData => {
                if let Some(suppressed) = limiters.catastrophic.check() {
                    tracing::error!(
                        target: "iss",
                        round = decision.round,
                        outcome = decision.status.label(),
                        suppressed,
                        partitions = %finder.partition_summary(),
                        "CATASTROPHIC ISS: no hash can reach a strong minority"
                    );
                }
                notifier.catastrophic_iss(decision.round, decision.self_hash.as_ref());
            }
            HashValidityStatus::LackOfData => {
                if let Some(suppressed) = limiters.lack_of_data.check() {
                    tracing::warn!(
                        target: "iss",
                        round = decision.round,
                        reported_stake = finder.reported_stake() as u64,
                        suppressed,
                        "insufficient signatures to validate round hash before the window closed"
                    );
                }
            }
        }
    }
}

#[derive(Serialize)]
struct IssDumpPartition {
    hash: String,
    stake: u128,
    nodes: Vec<u64>,
}

#[derive(Serialize)]
struct IssDumpArtifact {
    round: u64,
    status: &'static str,
    self_hash: Option<String>,
    consensus_hash: Option<String>,
    reported_stake: u128,
    total_stake: u128,
    partitions: Vec<IssDumpPartition>,
}

/// Writes JSON diagnostics for self-ISS rounds, rate limited so a
/// persistent divergence cannot fill the disk.
struct IssDumpWriter {
    directory: PathBuf,
    limiter: LogRateLimiter,
}

impl IssDumpWriter {
    fn new(directory: PathBuf, min_interval: Duration) -> Self {
        Self {
            directory,
            limiter: LogRateLimiter::new(min_interval),
        }
    }

    fn maybe_dump(&mut self, decision: &RoundDecision, finder: &ConsensusHashFinder) {
        if self.limiter.check().is_none() {
            return;
        }
        let artifact = IssDumpArtifact {
            round: decision.round,
            status: decision.status.label(),
            self_hash: decision.self_hash.map(|h| h.to_string()),
            consensus_hash: decision.consensus_hash.map(|h| h.to_string()),
            reported_stake: finder.reported_stake(),
            total_stake: finder.total_stake(),
            partitions: finder
                .partitions()
                .into_iter()
                .map(|p| IssDumpPartition {
                    hash: p.hash().to_string(),
                    stake: p.stake(),
                    nodes: p.contributors().map(|n| n.id()).collect(),
                })
                .collect(),
        };
        if let Err(e) = self.write(decision.round, &artifact) {
            tracing::warn!(target: "iss", round = decision.round, error = %e, "failed to write ISS dump");
        }
    }

    fn write(&self, round: u64, artifact: &IssDumpArtifact) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.directory)?;
        let path = self.directory.join(format!("iss-round-{round}.json"));
        let body = serde_json::to_vec_pretty(artifact)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, body)?;
        tracing::info!(target: "iss", round, path = %path.display(), "wrote ISS dump");
        Ok(())
    }
}
