// Elastic-supply ledger core: deterministic, in-memory, audit-first.

pub mod access;
pub mod accounting;
pub mod config;
pub mod consensus;
pub mod error;
pub mod event;
pub mod guard;
pub mod protocol;
pub mod storage;
pub mod types;

pub use error::{ErrorKind, ProtocolError};
pub use protocol::{Operation, Protocol, ProtocolState};

/// Version tag written into every snapshot.
pub const SNAPSHOT_VERSION: u8 = 1;

// No randomness or wall clock access; time is injected explicitly.

/*
Intentionally avoids:
- async
- threads
- global mutable state
- network IO
*/
