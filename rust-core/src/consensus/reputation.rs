use crate::config::ConsensusConfig;
use crate::consensus::ConsensusError;
use crate::types::{AccountId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-submitter reputation state. Lives from authorization to revocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitterRecord {
    pub reputation: u32,
    /// Cumulative rounds flagged as an outlier.
    pub error_count: u32,
    /// Rounds in which the submission survived the deviation filter.
    pub agreements: u64,
    pub last_submission: Option<Timestamp>,
    pub authorized_at: Timestamp,
}

impl SubmitterRecord {
    fn new(reputation: u32, authorized_at: Timestamp) -> Self {
        Self {
            reputation,
            error_count: 0,
            agreements: 0,
            last_submission: None,
            authorized_at,
        }
    }

    /// Earliest time the next submission is accepted.
    pub fn cooldown_until(&self, cooldown_secs: u64) -> Option<Timestamp> {
        self.last_submission
            .map(|t| t.saturating_add(cooldown_secs))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutlierOutcome {
    Penalized { reputation: u32, error_count: u32 },
    Revoked { error_count: u32 },
}

/// Authorized submitter set with reputation tracking.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SubmitterRegistry {
    records: BTreeMap<AccountId, SubmitterRecord>,
}

impl SubmitterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Genesis seeding; pool bounds are checked by config validation instead.
    pub fn seed<I: IntoIterator<Item = AccountId>>(ids: I, cfg: &ConsensusConfig, now: Timestamp) -> Self {
        let records = ids
            .into_iter()
            .map(|id| (id, SubmitterRecord::new(cfg.max_reputation, now)))
            .collect();
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &AccountId) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &AccountId) -> Option<&SubmitterRecord> {
        self.records.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &AccountId> {
        self.records.keys()
    }

    pub fn authorize(
        &mut self,
        id: AccountId,
        cfg: &ConsensusConfig,
        now: Timestamp,
    ) -> Result<(), ConsensusError> {
        if id.is_zero() {
            return Err(ConsensusError::MalformedIdentity);
        }
        if self.records.contains_key(&id) {
            return Err(ConsensusError::AlreadyAuthorized(id));
        }
        if self.records.len() >= cfg.max_submitters {
            return Err(ConsensusError::PoolFull {
                max: cfg.max_submitters,
            });
        }
        self.records
            .insert(id, SubmitterRecord::new(cfg.max_reputation, now));
        Ok(())
    }

    /// Admin removal; refuses to shrink the pool below its floor.
    pub fn revoke(&mut self, id: &AccountId, cfg: &ConsensusConfig) -> Result<SubmitterRecord, ConsensusError> {
        if !self.records.contains_key(id) {
            return Err(ConsensusError::UnknownSubmitter(*id));
        }
        if self.records.len() <= cfg.min_submitters {
            return Err(ConsensusError::PoolTooSmall {
                min: cfg.min_submitters,
            });
        }
        self.records
            .remove(id)
            .ok_or(ConsensusError::UnknownSubmitter(*id))
    }

    pub(crate) fn note_submission(&mut self, id: &AccountId, now: Timestamp) {
        if let Some(rec) = self.records.get_mut(id) {
            rec.last_submission = Some(now);
        }
    }

    pub(crate) fn record_agreement(&mut self, id: &AccountId, cfg: &ConsensusConfig) {
        if let Some(rec) = self.records.get_mut(id) {
            rec.reputation = rec
                .reputation
                .saturating_add(cfg.reputation_reward)
                .min(cfg.max_reputation);
            rec.agreements = rec.agreements.saturating_add(1);
        }
    }

    /// Penalize an outlier; revoke outright once the error limit is reached.
    /// None when the identity was already removed.
    pub(crate) fn record_outlier(&mut self, id: &AccountId, cfg: &ConsensusConfig) -> Option<OutlierOutcome> {
        let rec = self.records.get_mut(id)?;
        rec.reputation = rec.reputation.saturating_sub(cfg.reputation_penalty);
        rec.error_count = rec.error_count.saturating_add(1);
        let error_count = rec.error_count;
        let reputation = rec.reputation;

        if error_count >= cfg.max_errors {
            self.records.remove(id);
            return Some(OutlierOutcome::Revoked { error_count });
        }
        Some(OutlierOutcome::Penalized {
            reputation,
            error_count,
        })
    }
}
