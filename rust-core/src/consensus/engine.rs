use crate::access::{CallContext, Capability};
use crate::accounting::{AccountingError, SupplyChange, SupplyController};
use crate::config::{Aggregation, ConsensusConfig};
use crate::consensus::aggregate;
use crate::consensus::reputation::{OutlierOutcome, SubmitterRecord, SubmitterRegistry};
use crate::consensus::round::{Round, RoundView, Submission};
use crate::consensus::ConsensusError;
use crate::event::{ProtocolEvent, RevocationReason};
use crate::guard::FlightLock;
use crate::types::{AccountId, Balance, IndexValue, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, info, warn};

const ROUND: &str = "round";

/// Where a finalized value is pushed, and under which identity.
pub struct DeltaTarget<'a> {
    pub supply: &'a mut dyn SupplyController,
    pub ctx: &'a CallContext,
}

/// Why a round that reached the submission threshold was left open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeferReason {
    InsufficientConsensus { valid: usize, required: usize },
    /// Circuit breaker: the consensus value moved too far from the previous one.
    DeviationTooHigh {
        previous: IndexValue,
        value: IndexValue,
    },
    Accounting(AccountingError),
}

impl fmt::Display for DeferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeferReason::InsufficientConsensus { valid, required } => {
                write!(f, "only {} of {} required submissions agree", valid, required)
            }
            DeferReason::DeviationTooHigh { previous, value } => {
                write!(f, "value {} deviates too far from previous {}", value, previous)
            }
            DeferReason::Accounting(e) => write!(f, "supply update refused: {}", e),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finalization {
    pub round: u64,
    pub value: IndexValue,
    pub delta: i128,
    pub supply: SupplyChange,
    pub participants: Vec<AccountId>,
    pub outliers: Vec<AccountId>,
    pub emergency: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Recorded { round: u64, submissions: usize },
    Finalized(Finalization),
    Deferred { round: u64, reason: DeferReason },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusEngine {
    cfg: ConsensusConfig,
    registry: SubmitterRegistry,
    /// Oldest first; only the back round can be open.
    rounds: VecDeque<Round>,
    next_round: u64,
    last_finalized: Option<(IndexValue, u64)>,
    reference_value: Option<IndexValue>,
    #[serde(skip)]
    lock: FlightLock,
    #[serde(skip)]
    outbox: Vec<ProtocolEvent>,
}

impl ConsensusEngine {
    pub fn new<I: IntoIterator<Item = AccountId>>(
        cfg: ConsensusConfig,
        submitters: I,
        reference_value: Option<IndexValue>,
        now: Timestamp,
    ) -> Self {
        let registry = SubmitterRegistry::seed(submitters, &cfg, now);
        Self {
            cfg,
            registry,
            rounds: VecDeque::new(),
            next_round: 1,
            last_finalized: None,
            reference_value,
            lock: FlightLock::new(),
            outbox: Vec::new(),
        }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.cfg
    }

    /// Latest round, open or finalized. None before the first submission.
    pub fn current_round(&self) -> Option<RoundView> {
        self.rounds.back().map(Round::view)
    }

    /// Lookup within retained history.
    pub fn round(&self, number: u64) -> Option<RoundView> {
        self.find_round(number).map(Round::view)
    }

    pub fn round_submissions(&self, number: u64) -> Option<&[Submission]> {
        self.find_round(number).map(Round::submissions)
    }

    pub fn reputation(&self, id: &AccountId) -> Option<&SubmitterRecord> {
        self.registry.get(id)
    }

    pub fn is_submitter(&self, id: &AccountId) -> bool {
        self.registry.contains(id)
    }

    pub fn submitters(&self) -> Vec<AccountId> {
        self.registry.ids().copied().collect()
    }

    /// Last finalized value and the round that produced it.
    pub fn last_finalized(&self) -> Option<(IndexValue, u64)> {
        self.last_finalized
    }

    /// Baseline the next delta is computed against.
    pub fn previous_value(&self) -> Option<IndexValue> {
        self.last_finalized
            .map(|(value, _)| value)
            .or(self.reference_value)
    }

    pub fn drain_events(&mut self) -> Vec<ProtocolEvent> {
        std::mem::take(&mut self.outbox)
    }

    pub fn submit(
        &mut self,
        ctx: &CallContext,
        value: IndexValue,
        now: Timestamp,
        target: DeltaTarget<'_>,
    ) -> Result<SubmitOutcome, ConsensusError> {
        let _guard = self.lock.enter(ROUND)?;
        self.check_value(value)?;
        ctx.require(Capability::Submitter)?;

        let who = ctx.caller;
        let record = self
            .registry
            .get(&who)
            .ok_or(ConsensusError::NotAuthorized(who))?;
        if record.reputation < self.cfg.min_reputation {
            return Err(ConsensusError::ReputationTooLow {
                reputation: record.reputation,
                min: self.cfg.min_reputation,
            });
        }
        if let Some(until) = record.cooldown_until(self.cfg.cooldown_secs) {
            if now < until {
                return Err(ConsensusError::CooldownActive { until });
            }
        }

        let open = self
            .open_round()
            .map(|r| (r.number, r.window_expired(now), r.has_submitted(&who)));
        match open {
            Some((round, true, _)) => return Err(ConsensusError::SubmissionWindowClosed { round }),
            Some((round, _, true)) => return Err(ConsensusError::DuplicateSubmission { round }),
            Some(_) => {}
            None => self.start_round(now),
        }

        let round = self.rounds.back_mut().ok_or(ConsensusError::NoOpenRound)?;
        round.push(Submission {
            submitter: who,
            value,
            timestamp: now,
        });
        let number = round.number;
        let count = round.submissions().len();
        self.registry.note_submission(&who, now);

        debug!(round = number, submitter = %who.short(), value, count, "submission recorded");
        self.outbox.push(ProtocolEvent::SubmissionReceived {
            round: number,
            submitter: who,
            value,
            timestamp: now,
        });

        if count < self.cfg.consensus_threshold {
            return Ok(SubmitOutcome::Recorded {
                round: number,
                submissions: count,
            });
        }
        Ok(self.try_finalize(number, target))
    }

    /// Force a stuck round closed with a supplied value.
    pub fn emergency_finalize(
        &mut self,
        ctx: &CallContext,
        value: IndexValue,
        now: Timestamp,
        target: DeltaTarget<'_>,
    ) -> Result<Finalization, ConsensusError> {
        let _guard = self.lock.enter(ROUND)?;
        self.check_value(value)?;
        ctx.require(Capability::Emergency)?;

        let round = self.open_round().ok_or(ConsensusError::NoOpenRound)?;
        let number = round.number;
        if !round.emergency_eligible(now) {
            return Err(ConsensusError::EmergencyNotEligible { round: number });
        }
        let participants: Vec<AccountId> = round.submissions().iter().map(|s| s.submitter).collect();

        let previous = self.previous_value();
        let delta = delta_for(previous, value, target.supply.total_supply())
            .ok_or(ConsensusError::Overflow)?;
        let supply = target
            .supply
            .apply_delta(target.ctx, delta)
            .map_err(ConsensusError::Accounting)?;

        if let Some(r) = self.rounds.back_mut() {
            r.finalize(value, true);
        }
        self.last_finalized = Some((value, number));

        warn!(round = number, value, delta, caller = %ctx.caller.short(), "round finalized via emergency path");
        self.outbox.push(ProtocolEvent::RoundFinalized {
            round: number,
            value,
            delta,
            participants: participants.clone(),
            outliers: Vec::new(),
            emergency: true,
        });
        Ok(Finalization {
            round: number,
            value,
            delta,
            supply,
            participants,
            outliers: Vec::new(),
            emergency: true,
        })
    }

    pub fn authorize_submitter(&mut self, ctx: &CallContext, id: AccountId, now: Timestamp) -> Result<(), ConsensusError> {
        let _guard = self.lock.enter(ROUND)?;
        ctx.require(Capability::Admin)?;
        self.registry.authorize(id, &self.cfg, now)?;
        info!(submitter = %id.short(), pool = self.registry.len(), "submitter authorized");
        self.outbox
            .push(ProtocolEvent::SubmitterAuthorized { submitter: id });
        Ok(())
    }

    pub fn revoke_submitter(&mut self, ctx: &CallContext, id: AccountId) -> Result<(), ConsensusError> {
        let _guard = self.lock.enter(ROUND)?;
        ctx.require(Capability::Admin)?;
        self.registry.revoke(&id, &self.cfg)?;
        info!(submitter = %id.short(), pool = self.registry.len(), "submitter revoked by admin");
        self.outbox.push(ProtocolEvent::SubmitterRevoked {
            submitter: id,
            reason: RevocationReason::Admin,
        });
        Ok(())
    }

    /// Replace the consensus parameters. Takes effect from the next submission.
    pub fn update_parameters(&mut self, ctx: &CallContext, params: ConsensusConfig) -> Result<(), ConsensusError> {
        let _guard = self.lock.enter(ROUND)?;
        ctx.require(Capability::Admin)?;
        params
            .validate()
            .map_err(|e| ConsensusError::InvalidParameters(e.to_string()))?;
        if self.registry.len() > params.max_submitters {
            return Err(ConsensusError::InvalidParameters(format!(
                "{} authorized submitters exceed max_submitters {}",
                self.registry.len(),
                params.max_submitters
            )));
        }

        info!(
            consensus_threshold = params.consensus_threshold,
            max_deviation_bps = params.max_deviation_bps,
            max_value_change_bps = params.max_value_change_bps,
            "consensus parameters updated"
        );
        self.outbox.push(ProtocolEvent::ParametersUpdated {
            consensus_threshold: params.consensus_threshold,
            max_deviation_bps: params.max_deviation_bps,
            max_value_change_bps: params.max_value_change_bps,
        });
        self.cfg = params;
        Ok(())
    }

    fn check_value(&self, value: IndexValue) -> Result<(), ConsensusError> {
        if self.cfg.value_in_range(value) {
            Ok(())
        } else {
            Err(ConsensusError::ValueOutOfRange {
                value,
                min: self.cfg.min_value,
                max: self.cfg.max_value,
            })
        }
    }

    fn find_round(&self, number: u64) -> Option<&Round> {
        self.rounds.iter().find(|r| r.number == number)
    }

    fn open_round(&self) -> Option<&Round> {
        self.rounds.back().filter(|r| !r.is_finalized())
    }

    fn start_round(&mut self, now: Timestamp) {
        let number = self.next_round;
        self.next_round += 1;
        self.rounds
            .push_back(Round::open(number, now, self.cfg.submission_window_secs));
        while self.rounds.len() > self.cfg.history_limit {
            self.rounds.pop_front();
        }
        debug!(round = number, "round opened");
    }

    fn aggregate(&self, valid: &[(AccountId, IndexValue)]) -> Option<IndexValue> {
        match self.cfg.aggregation {
            Aggregation::Mean => {
                let values: Vec<IndexValue> = valid.iter().map(|(_, v)| *v).collect();
                aggregate::mean(&values)
            }
            Aggregation::ReputationWeighted => {
                let pairs: Vec<(IndexValue, u32)> = valid
                    .iter()
                    .map(|(id, v)| (*v, self.registry.get(id).map_or(0, |r| r.reputation)))
                    .collect();
                aggregate::weighted_mean(&pairs)
            }
        }
    }

    /// Nothing here is committed unless the supply update succeeds, apart from
    /// the breaker flag on a circuit-breaker refusal.
    fn try_finalize(&mut self, number: u64, target: DeltaTarget<'_>) -> SubmitOutcome {
        let required = self.cfg.consensus_threshold;
        let Some(round) = self.rounds.back() else {
            return self.defer(number, DeferReason::InsufficientConsensus { valid: 0, required });
        };
        let Some(partition) = aggregate::partition(round.submissions(), self.cfg.max_deviation_bps) else {
            return self.defer(number, DeferReason::InsufficientConsensus { valid: 0, required });
        };
        let median = partition.median;
        let valid: Vec<(AccountId, IndexValue)> = partition
            .valid
            .iter()
            .map(|s| (s.submitter, s.value))
            .collect();
        let outliers: Vec<AccountId> = partition.outliers.iter().map(|s| s.submitter).collect();

        if valid.len() < required {
            return self.defer(
                number,
                DeferReason::InsufficientConsensus {
                    valid: valid.len(),
                    required,
                },
            );
        }
        let Some(value) = self.aggregate(&valid) else {
            return self.defer(number, DeferReason::Accounting(AccountingError::Overflow));
        };

        let previous = self.previous_value();
        if let Some(prev) = previous {
            if !aggregate::change_within(prev, value, self.cfg.max_value_change_bps) {
                if let Some(r) = self.rounds.back_mut() {
                    r.trip_breaker();
                }
                return self.defer(number, DeferReason::DeviationTooHigh { previous: prev, value });
            }
        }

        let Some(delta) = delta_for(previous, value, target.supply.total_supply()) else {
            return self.defer(number, DeferReason::Accounting(AccountingError::Overflow));
        };
        let supply = match target.supply.apply_delta(target.ctx, delta) {
            Ok(change) => change,
            Err(e) => return self.defer(number, DeferReason::Accounting(e)),
        };

        // Commit.
        for (id, _) in &valid {
            self.registry.record_agreement(id, &self.cfg);
        }
        for id in &outliers {
            match self.registry.record_outlier(id, &self.cfg) {
                Some(OutlierOutcome::Penalized {
                    reputation,
                    error_count,
                }) => {
                    warn!(round = number, submitter = %id.short(), reputation, error_count, "outlier penalized");
                    self.outbox.push(ProtocolEvent::SubmitterPenalized {
                        submitter: *id,
                        reputation,
                        error_count,
                    });
                }
                Some(OutlierOutcome::Revoked { error_count }) => {
                    warn!(round = number, submitter = %id.short(), error_count, "submitter revoked at error limit");
                    self.outbox.push(ProtocolEvent::SubmitterRevoked {
                        submitter: *id,
                        reason: RevocationReason::ErrorLimit,
                    });
                }
                None => {}
            }
        }
        if let Some(r) = self.rounds.back_mut() {
            r.finalize(value, false);
        }
        self.last_finalized = Some((value, number));

        let participants: Vec<AccountId> = valid.iter().map(|(id, _)| *id).collect();
        info!(
            round = number,
            median,
            value,
            delta,
            participants = participants.len(),
            outliers = outliers.len(),
            "round finalized"
        );
        self.outbox.push(ProtocolEvent::RoundFinalized {
            round: number,
            value,
            delta,
            participants: participants.clone(),
            outliers: outliers.clone(),
            emergency: false,
        });
        SubmitOutcome::Finalized(Finalization {
            round: number,
            value,
            delta,
            supply,
            participants,
            outliers,
            emergency: false,
        })
    }

    fn defer(&mut self, round: u64, reason: DeferReason) -> SubmitOutcome {
        warn!(round, reason = %reason, "finalization deferred");
        self.outbox.push(ProtocolEvent::FinalizationDeferred {
            round,
            reason: reason.to_string(),
        });
        SubmitOutcome::Deferred { round, reason }
    }
}

/// Zero when there is no baseline yet.
fn delta_for(previous: Option<IndexValue>, value: IndexValue, total: Balance) -> Option<i128> {
    match previous {
        Some(prev) => aggregate::supply_delta(total, prev, value),
        None => Some(0),
    }
}
