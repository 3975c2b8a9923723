//! Multi-submitter consensus: rounds, robust aggregation and reputation.

pub mod aggregate;
pub mod engine;
pub mod reputation;
pub mod round;

pub use engine::{ConsensusEngine, DeferReason, DeltaTarget, Finalization, SubmitOutcome};
pub use reputation::{SubmitterRecord, SubmitterRegistry};
pub use round::{Round, RoundView, Submission};

use crate::access::AccessError;
use crate::accounting::AccountingError;
use crate::error::ErrorKind;
use crate::guard::Reentered;
use crate::types::{AccountId, IndexValue, Timestamp};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    #[error("value {value} outside [{min}, {max}]")]
    ValueOutOfRange {
        value: IndexValue,
        min: IndexValue,
        max: IndexValue,
    },
    #[error("malformed identity")]
    MalformedIdentity,
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("{0} is not an authorized submitter")]
    NotAuthorized(AccountId),
    #[error("{0} is not a registered submitter")]
    UnknownSubmitter(AccountId),
    #[error("{0} is already authorized")]
    AlreadyAuthorized(AccountId),
    #[error("submitter pool is full ({max})")]
    PoolFull { max: usize },
    #[error("submitter pool cannot shrink below {min}")]
    PoolTooSmall { min: usize },
    #[error("cooldown active until {until}")]
    CooldownActive { until: Timestamp },
    #[error("already submitted in round {round}")]
    DuplicateSubmission { round: u64 },
    #[error("reputation {reputation} below minimum {min}")]
    ReputationTooLow { reputation: u32, min: u32 },
    #[error("submission window of round {round} has closed")]
    SubmissionWindowClosed { round: u64 },
    #[error("no open round")]
    NoOpenRound,
    #[error("round {round} is not eligible for emergency finalization")]
    EmergencyNotEligible { round: u64 },
    #[error("supply update refused: {0}")]
    Accounting(AccountingError),
    #[error("arithmetic overflow")]
    Overflow,
    #[error(transparent)]
    Reentrancy(#[from] Reentered),
}

impl ConsensusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConsensusError::ValueOutOfRange { .. }
            | ConsensusError::MalformedIdentity
            | ConsensusError::InvalidParameters(_) => ErrorKind::InputValidation,
            ConsensusError::Access(_)
            | ConsensusError::NotAuthorized(_)
            | ConsensusError::UnknownSubmitter(_)
            | ConsensusError::AlreadyAuthorized(_)
            | ConsensusError::PoolFull { .. }
            | ConsensusError::PoolTooSmall { .. }
            | ConsensusError::CooldownActive { .. }
            | ConsensusError::DuplicateSubmission { .. }
            | ConsensusError::ReputationTooLow { .. }
            | ConsensusError::SubmissionWindowClosed { .. }
            | ConsensusError::NoOpenRound
            | ConsensusError::EmergencyNotEligible { .. } => ErrorKind::PolicyViolation,
            ConsensusError::Accounting(e) => e.kind(),
            ConsensusError::Overflow | ConsensusError::Reentrancy(_) => {
                ErrorKind::InvariantProtection
            }
        }
    }
}
