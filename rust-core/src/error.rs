use crate::access::AccessError;
use crate::accounting::AccountingError;
use crate::config::ConfigError;
use crate::consensus::ConsensusError;
use crate::storage::StorageError;
use thiserror::Error;

/// Caller-facing classification of a failed call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; correct it and retry.
    InputValidation,
    /// Not allowed right now; wait, or escalate to the emergency path.
    PolicyViolation,
    /// Would break a supply or arithmetic invariant. Fatal to the call.
    InvariantProtection,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    #[error(transparent)]
    Accounting(#[from] AccountingError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ProtocolError {
    /// None for configuration and storage failures, which are not call outcomes.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ProtocolError::Access(_) => Some(ErrorKind::PolicyViolation),
            ProtocolError::Consensus(e) => Some(e.kind()),
            ProtocolError::Accounting(e) => Some(e.kind()),
            ProtocolError::Config(_) | ProtocolError::Storage(_) => None,
        }
    }
}
