use crate::types::{AccountId, IndexValue, Timestamp};
use serde::{Deserialize, Serialize};

/// One submitter's report for a round. Immutable once recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub submitter: AccountId,
    pub value: IndexValue,
    pub timestamp: Timestamp,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Round {
    pub number: u64,
    pub opens_at: Timestamp,
    pub closes_at: Timestamp,
    /// Ledger order, not timestamp order.
    submissions: Vec<Submission>,
    finalized_value: Option<IndexValue>,
    emergency: bool,
    breaker_tripped: bool,
}

impl Round {
    pub fn open(number: u64, now: Timestamp, window_secs: u64) -> Self {
        Self {
            number,
            opens_at: now,
            closes_at: now.saturating_add(window_secs),
            submissions: Vec::new(),
            finalized_value: None,
            emergency: false,
            breaker_tripped: false,
        }
    }

    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    pub fn has_submitted(&self, who: &AccountId) -> bool {
        self.submissions.iter().any(|s| &s.submitter == who)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized_value.is_some()
    }

    pub fn finalized_value(&self) -> Option<IndexValue> {
        self.finalized_value
    }

    pub fn window_expired(&self, now: Timestamp) -> bool {
        now >= self.closes_at
    }

    pub fn breaker_tripped(&self) -> bool {
        self.breaker_tripped
    }

    /// Window expired, or the circuit breaker refused the consensus value.
    pub fn emergency_eligible(&self, now: Timestamp) -> bool {
        !self.is_finalized() && (self.window_expired(now) || self.breaker_tripped())
    }

    pub(crate) fn push(&mut self, submission: Submission) {
        debug_assert!(!self.is_finalized(), "frozen round");
        self.submissions.push(submission);
    }

    pub(crate) fn trip_breaker(&mut self) {
        self.breaker_tripped = true;
    }

    pub(crate) fn finalize(&mut self, value: IndexValue, emergency: bool) {
        debug_assert!(!self.is_finalized(), "round finalized twice");
        self.finalized_value = Some(value);
        self.emergency = emergency;
    }

    pub fn view(&self) -> RoundView {
        RoundView {
            number: self.number,
            opens_at: self.opens_at,
            closes_at: self.closes_at,
            submission_count: self.submissions.len(),
            finalized: self.is_finalized(),
            finalized_value: self.finalized_value(),
            emergency: self.emergency,
            breaker_tripped: self.breaker_tripped(),
        }
    }
}

/// Read-only summary returned by `get_round`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundView {
    pub number: u64,
    pub opens_at: Timestamp,
    pub closes_at: Timestamp,
    pub submission_count: usize,
    pub finalized: bool,
    pub finalized_value: Option<IndexValue>,
    pub emergency: bool,
    pub breaker_tripped: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligibility_follows_window_and_breaker() {
        let mut r = Round::open(1, 100, 50);
        assert!(!r.emergency_eligible(120));
        assert!(r.emergency_eligible(150));

        r.trip_breaker();
        assert!(r.emergency_eligible(120));
        assert!(r.view().breaker_tripped);

        r.finalize(10, true);
        assert!(!r.emergency_eligible(200));
        assert!(r.view().emergency);
        assert_eq!(r.view().finalized_value, Some(10));
    }
}
