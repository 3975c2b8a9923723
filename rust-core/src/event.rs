// Notifications for external observers. Engines buffer these and only push on commit,
// so a failed call never leaves an event behind.

use crate::types::{AccountId, Balance, IndexValue, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    Admin,
    /// Cumulative outlier count reached the configured limit.
    ErrorLimit,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProtocolEvent {
    SubmissionReceived {
        round: u64,
        submitter: AccountId,
        value: IndexValue,
        timestamp: Timestamp,
    },
    RoundFinalized {
        round: u64,
        value: IndexValue,
        delta: i128,
        participants: Vec<AccountId>,
        outliers: Vec<AccountId>,
        emergency: bool,
    },
    FinalizationDeferred {
        round: u64,
        reason: String,
    },
    SubmitterAuthorized {
        submitter: AccountId,
    },
    SubmitterPenalized {
        submitter: AccountId,
        reputation: u32,
        error_count: u32,
    },
    SubmitterRevoked {
        submitter: AccountId,
        reason: RevocationReason,
    },
    ParametersUpdated {
        consensus_threshold: usize,
        max_deviation_bps: u64,
        max_value_change_bps: u64,
    },
    SupplyDeltaApplied {
        epoch: u64,
        delta: i128,
        reward: Balance,
        total_supply: Balance,
        scale_factor: Balance,
    },
    RewardMinted {
        beneficiary: AccountId,
        amount: Balance,
    },
    BeneficiaryChanged {
        beneficiary: Option<AccountId>,
    },
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: Balance,
    },
    Minted {
        to: AccountId,
        amount: Balance,
    },
    Burned {
        from: AccountId,
        amount: Balance,
    },
}

/// Append-only record of emitted events.
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    events: Vec<ProtocolEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend<I: IntoIterator<Item = ProtocolEvent>>(&mut self, events: I) {
        self.events.extend(events);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[ProtocolEvent] {
        &self.events
    }

    /// Events appended at or after `from`.
    pub fn since(&self, from: usize) -> &[ProtocolEvent] {
        self.events.get(from..).unwrap_or(&[])
    }

    pub fn drain(&mut self) -> Vec<ProtocolEvent> {
        std::mem::take(&mut self.events)
    }
}
