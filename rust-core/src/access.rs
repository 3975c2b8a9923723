//! Capability checks.
//!
//! Callers never consult a global role registry. Each entry point receives a
//! `CallContext` whose capability set was resolved once, up front, by a
//! `CapabilityOracle`. Tests hand-build contexts directly.

use crate::types::AccountId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Submitter,
    Emergency,
    DeltaApplier,
    Admin,
    Minter,
    Burner,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("caller {caller} lacks capability {capability:?}")]
    MissingCapability {
        caller: AccountId,
        capability: Capability,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn of<I: IntoIterator<Item = Capability>>(caps: I) -> Self {
        Self(caps.into_iter().collect())
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0.contains(&cap)
    }

    pub fn insert(&mut self, cap: Capability) -> bool {
        self.0.insert(cap)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

/// Caller identity plus its capabilities for the duration of one call.
#[derive(Clone, Debug)]
pub struct CallContext {
    pub caller: AccountId,
    pub capabilities: CapabilitySet,
}

impl CallContext {
    pub fn new(caller: AccountId, capabilities: CapabilitySet) -> Self {
        Self {
            caller,
            capabilities,
        }
    }

    pub fn require(&self, capability: Capability) -> Result<(), AccessError> {
        if self.capabilities.contains(capability) {
            Ok(())
        } else {
            Err(AccessError::MissingCapability {
                caller: self.caller,
                capability,
            })
        }
    }
}

/// Answers "which capabilities does this identity hold right now".
pub trait CapabilityOracle {
    fn capabilities(&self, who: &AccountId) -> CapabilitySet;

    fn context_for(&self, who: &AccountId) -> CallContext {
        CallContext::new(*who, self.capabilities(who))
    }
}

/// In-memory oracle seeded from configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StaticCapabilities {
    grants: BTreeMap<AccountId, CapabilitySet>,
}

impl StaticCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&mut self, who: AccountId, cap: Capability) {
        self.grants.entry(who).or_default().insert(cap);
    }

    pub fn with_grant(mut self, who: AccountId, caps: &[Capability]) -> Self {
        for cap in caps {
            self.grant(who, *cap);
        }
        self
    }
}

impl CapabilityOracle for StaticCapabilities {
    fn capabilities(&self, who: &AccountId) -> CapabilitySet {
        self.grants.get(who).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_oracle_resolves_grants() {
        let admin = AccountId::from_label("admin");
        let other = AccountId::from_label("other");
        let oracle = StaticCapabilities::new().with_grant(admin, &[Capability::Admin]);

        let ctx = oracle.context_for(&admin);
        assert!(ctx.require(Capability::Admin).is_ok());
        assert_eq!(
            ctx.require(Capability::Emergency),
            Err(AccessError::MissingCapability {
                caller: admin,
                capability: Capability::Emergency
            })
        );
        assert!(oracle.capabilities(&other).iter().next().is_none());
    }
}
