//! Elastic-supply accounting.
//!
//! Holders own a fixed number of internal units. The visible balance is
//! `internal / scale`, so a supply change rewrites only `total_supply` and
//! `scale` and never touches a holder entry.
//!
//! Invariant kept by every mutation: `scale > total_supply`. Under it the sum of
//! visible balances lies in `[total_supply - holders, total_supply]`.

use crate::access::{AccessError, CallContext, Capability};
use crate::config::AccountingConfig;
use crate::error::ErrorKind;
use crate::event::ProtocolEvent;
use crate::guard::{FlightLock, Reentered};
use crate::types::{bps_of, AccountId, Balance};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

/// Internal-unit pool seeded at genesis.
pub const MAX_INTERNAL: Balance = u128::MAX / 16;

/// Largest total supply any configuration may allow.
pub const MAX_SUPPLY_CEILING: Balance = 1 << 60;

const SUPPLY: &str = "supply";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountingError {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Reentrancy(#[from] Reentered),
    #[error("amount must be positive")]
    ZeroAmount,
    #[error("malformed identity")]
    MalformedIdentity,
    #[error("insufficient balance: have {available}, need {requested}")]
    InsufficientBalance {
        available: Balance,
        requested: Balance,
    },
    #[error("supply change {change} exceeds cap {cap}")]
    DeltaCapExceeded { change: Balance, cap: Balance },
    #[error("resulting total supply must be positive")]
    NonPositiveSupply,
    #[error("resulting total supply {total} exceeds maximum {max}")]
    SupplyCeiling { total: Balance, max: Balance },
    #[error("scale factor would no longer exceed total supply")]
    PrecisionExhausted,
    #[error("arithmetic overflow")]
    Overflow,
}

impl AccountingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AccountingError::ZeroAmount | AccountingError::MalformedIdentity => {
                ErrorKind::InputValidation
            }
            AccountingError::Access(_) | AccountingError::InsufficientBalance { .. } => {
                ErrorKind::PolicyViolation
            }
            AccountingError::Reentrancy(_)
            | AccountingError::DeltaCapExceeded { .. }
            | AccountingError::NonPositiveSupply
            | AccountingError::SupplyCeiling { .. }
            | AccountingError::PrecisionExhausted
            | AccountingError::Overflow => ErrorKind::InvariantProtection,
        }
    }
}

/// Result of one successful delta application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyChange {
    pub epoch: u64,
    pub delta: i128,
    pub reward: Balance,
    pub previous_total: Balance,
    pub total_supply: Balance,
    pub scale_factor: Balance,
}

/// What the consensus engine needs from the accounting side.
pub trait SupplyController {
    fn total_supply(&self) -> Balance;

    fn apply_delta(&mut self, ctx: &CallContext, delta: i128) -> Result<SupplyChange, AccountingError>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountingEngine {
    cfg: AccountingConfig,
    total_supply: Balance,
    /// Sum of all holders' internal units.
    internal_supply: Balance,
    scale: Balance,
    epoch: u64,
    holders: BTreeMap<AccountId, Balance>,
    #[serde(skip)]
    lock: FlightLock,
    #[serde(skip)]
    outbox: Vec<ProtocolEvent>,
}

impl AccountingEngine {
    /// Mint the whole initial supply to `holder`.
    pub fn genesis(cfg: AccountingConfig, holder: AccountId) -> Result<Self, AccountingError> {
        if holder.is_zero() {
            return Err(AccountingError::MalformedIdentity);
        }
        let initial = cfg.initial_supply;
        if initial == 0 {
            return Err(AccountingError::NonPositiveSupply);
        }
        if initial > cfg.max_supply {
            return Err(AccountingError::SupplyCeiling {
                total: initial,
                max: cfg.max_supply,
            });
        }
        let scale = MAX_INTERNAL / initial;
        if scale <= initial {
            return Err(AccountingError::PrecisionExhausted);
        }
        // Largest multiple of the initial supply that fits the pool.
        let internal_supply = scale * initial;

        let mut holders = BTreeMap::new();
        holders.insert(holder, internal_supply);
        Ok(Self {
            cfg,
            total_supply: initial,
            internal_supply,
            scale,
            epoch: 0,
            holders,
            lock: FlightLock::new(),
            outbox: Vec::new(),
        })
    }

    pub fn config(&self) -> &AccountingConfig {
        &self.cfg
    }

    pub fn total_supply(&self) -> Balance {
        self.total_supply
    }

    pub fn scale_factor(&self) -> Balance {
        self.scale
    }

    pub fn internal_supply(&self) -> Balance {
        self.internal_supply
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn reward_beneficiary(&self) -> Option<AccountId> {
        self.cfg.reward_beneficiary
    }

    pub fn holder_count(&self) -> usize {
        self.holders.len()
    }

    pub fn internal_balance_of(&self, who: &AccountId) -> Balance {
        self.holders.get(who).copied().unwrap_or(0)
    }

    pub fn balance_of(&self, who: &AccountId) -> Balance {
        self.internal_balance_of(who) / self.scale
    }

    /// Sum of visible balances. O(holders); audit and test use only.
    pub fn visible_sum(&self) -> Balance {
        self.holders.values().map(|u| u / self.scale).sum()
    }

    pub fn drain_events(&mut self) -> Vec<ProtocolEvent> {
        std::mem::take(&mut self.outbox)
    }

    pub fn set_reward_beneficiary(
        &mut self,
        ctx: &CallContext,
        beneficiary: Option<AccountId>,
    ) -> Result<(), AccountingError> {
        let _guard = self.lock.enter(SUPPLY)?;
        ctx.require(Capability::Admin)?;
        if beneficiary.is_some_and(|b| b.is_zero()) {
            return Err(AccountingError::MalformedIdentity);
        }
        self.cfg.reward_beneficiary = beneficiary;
        info!(beneficiary = ?beneficiary, "reward beneficiary changed");
        self.outbox
            .push(ProtocolEvent::BeneficiaryChanged { beneficiary });
        Ok(())
    }

    /// Apply a signed supply change. All-or-nothing: every check runs before the first write.
    pub fn apply_delta(&mut self, ctx: &CallContext, delta: i128) -> Result<SupplyChange, AccountingError> {
        let _guard = self.lock.enter(SUPPLY)?;
        ctx.require(Capability::DeltaApplier)?;

        let current = self.total_supply;
        let current_signed = i128::try_from(current).map_err(|_| AccountingError::Overflow)?;
        let base_signed = current_signed
            .checked_add(delta)
            .ok_or(AccountingError::Overflow)?;
        if base_signed <= 0 {
            return Err(AccountingError::NonPositiveSupply);
        }
        let base = Balance::try_from(base_signed).map_err(|_| AccountingError::Overflow)?;

        let beneficiary = match self.cfg.reward_beneficiary {
            Some(b) if delta > 0 && self.cfg.reward_rate_bps > 0 => Some(b),
            _ => None,
        };
        let reward = match beneficiary {
            Some(_) => bps_of(delta.unsigned_abs(), self.cfg.reward_rate_bps)
                .ok_or(AccountingError::Overflow)?,
            None => 0,
        };
        let new_total = base.checked_add(reward).ok_or(AccountingError::Overflow)?;

        let change = new_total.abs_diff(current);
        let cap = bps_of(current, self.cfg.max_delta_bps).ok_or(AccountingError::Overflow)?;
        if change > cap {
            return Err(AccountingError::DeltaCapExceeded { change, cap });
        }
        if new_total > self.cfg.max_supply {
            return Err(AccountingError::SupplyCeiling {
                total: new_total,
                max: self.cfg.max_supply,
            });
        }

        let scale = self.internal_supply / base;
        if scale <= new_total {
            return Err(AccountingError::PrecisionExhausted);
        }
        let reward_units = reward.checked_mul(scale).ok_or(AccountingError::Overflow)?;
        let internal_supply = self
            .internal_supply
            .checked_add(reward_units)
            .ok_or(AccountingError::Overflow)?;
        let credited = match beneficiary {
            Some(b) if reward_units > 0 => Some((
                b,
                self.internal_balance_of(&b)
                    .checked_add(reward_units)
                    .ok_or(AccountingError::Overflow)?,
            )),
            _ => None,
        };

        // Commit: total and scale are written together.
        self.total_supply = new_total;
        self.scale = scale;
        self.internal_supply = internal_supply;
        self.epoch += 1;
        if let Some((b, units)) = credited {
            self.holders.insert(b, units);
        }

        let change = SupplyChange {
            epoch: self.epoch,
            delta,
            reward,
            previous_total: current,
            total_supply: new_total,
            scale_factor: scale,
        };
        info!(
            epoch = change.epoch,
            delta,
            reward,
            total_supply = new_total,
            scale_factor = scale,
            "supply delta applied"
        );
        self.outbox.push(ProtocolEvent::SupplyDeltaApplied {
            epoch: change.epoch,
            delta,
            reward,
            total_supply: new_total,
            scale_factor: scale,
        });
        if let Some((b, _)) = credited {
            self.outbox.push(ProtocolEvent::RewardMinted {
                beneficiary: b,
                amount: reward,
            });
        }
        Ok(change)
    }

    /// Move `amount` visible units from the caller to `to`.
    pub fn transfer(&mut self, ctx: &CallContext, to: AccountId, amount: Balance) -> Result<(), AccountingError> {
        let _guard = self.lock.enter(SUPPLY)?;
        if amount == 0 {
            return Err(AccountingError::ZeroAmount);
        }
        if to.is_zero() {
            return Err(AccountingError::MalformedIdentity);
        }
        let from = ctx.caller;
        let units = amount
            .checked_mul(self.scale)
            .ok_or(AccountingError::Overflow)?;
        let available = self.internal_balance_of(&from);
        if available < units {
            return Err(AccountingError::InsufficientBalance {
                available: available / self.scale,
                requested: amount,
            });
        }

        self.debit(&from, units, available);
        let credit = self
            .internal_balance_of(&to)
            .checked_add(units)
            .ok_or(AccountingError::Overflow)?;
        self.holders.insert(to, credit);

        debug!(from = %from.short(), to = %to.short(), amount, "transfer");
        self.outbox
            .push(ProtocolEvent::Transfer { from, to, amount });
        Ok(())
    }

    /// Issue new units at the current scale.
    pub fn mint(&mut self, ctx: &CallContext, to: AccountId, amount: Balance) -> Result<(), AccountingError> {
        let _guard = self.lock.enter(SUPPLY)?;
        ctx.require(Capability::Minter)?;
        if amount == 0 {
            return Err(AccountingError::ZeroAmount);
        }
        if to.is_zero() {
            return Err(AccountingError::MalformedIdentity);
        }
        let new_total = self
            .total_supply
            .checked_add(amount)
            .ok_or(AccountingError::Overflow)?;
        if new_total > self.cfg.max_supply {
            return Err(AccountingError::SupplyCeiling {
                total: new_total,
                max: self.cfg.max_supply,
            });
        }
        if self.scale <= new_total {
            return Err(AccountingError::PrecisionExhausted);
        }
        let units = amount
            .checked_mul(self.scale)
            .ok_or(AccountingError::Overflow)?;
        let internal_supply = self
            .internal_supply
            .checked_add(units)
            .ok_or(AccountingError::Overflow)?;
        let credit = self
            .internal_balance_of(&to)
            .checked_add(units)
            .ok_or(AccountingError::Overflow)?;

        self.total_supply = new_total;
        self.internal_supply = internal_supply;
        self.holders.insert(to, credit);

        info!(to = %to.short(), amount, total_supply = new_total, "minted");
        self.outbox.push(ProtocolEvent::Minted { to, amount });
        Ok(())
    }

    /// Destroy units at the current scale.
    pub fn burn(&mut self, ctx: &CallContext, from: AccountId, amount: Balance) -> Result<(), AccountingError> {
        let _guard = self.lock.enter(SUPPLY)?;
        ctx.require(Capability::Burner)?;
        if amount == 0 {
            return Err(AccountingError::ZeroAmount);
        }
        let units = amount
            .checked_mul(self.scale)
            .ok_or(AccountingError::Overflow)?;
        let available = self.internal_balance_of(&from);
        if available < units {
            return Err(AccountingError::InsufficientBalance {
                available: available / self.scale,
                requested: amount,
            });
        }
        let new_total = self.total_supply.saturating_sub(amount);
        if new_total == 0 {
            return Err(AccountingError::NonPositiveSupply);
        }

        self.debit(&from, units, available);
        self.total_supply = new_total;
        self.internal_supply -= units;

        info!(from = %from.short(), amount, total_supply = new_total, "burned");
        self.outbox.push(ProtocolEvent::Burned { from, amount });
        Ok(())
    }

    fn debit(&mut self, who: &AccountId, units: Balance, available: Balance) {
        let left = available - units;
        if left == 0 {
            self.holders.remove(who);
        } else {
            self.holders.insert(*who, left);
        }
    }
}

impl SupplyController for AccountingEngine {
    fn total_supply(&self) -> Balance {
        AccountingEngine::total_supply(self)
    }

    fn apply_delta(&mut self, ctx: &CallContext, delta: i128) -> Result<SupplyChange, AccountingError> {
        AccountingEngine::apply_delta(self, ctx, delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::CapabilitySet;

    fn holder() -> AccountId {
        AccountId::from_label("holder")
    }

    fn ctx(who: AccountId, caps: &[Capability]) -> CallContext {
        CallContext::new(who, CapabilitySet::of(caps.iter().copied()))
    }

    fn applier() -> CallContext {
        ctx(AccountId::from_label("engine"), &[Capability::DeltaApplier])
    }

    fn engine(initial: Balance, max_delta_bps: u64) -> AccountingEngine {
        AccountingEngine::genesis(
            AccountingConfig {
                initial_supply: initial,
                max_delta_bps,
                ..AccountingConfig::default()
            },
            holder(),
        )
        .unwrap()
    }

    #[test]
    fn cap_rejects_then_accepts() {
        let mut e = engine(1_000_000, 500);
        assert_eq!(
            e.apply_delta(&applier(), 60_000),
            Err(AccountingError::DeltaCapExceeded {
                change: 60_000,
                cap: 50_000
            })
        );
        assert_eq!(e.total_supply(), 1_000_000);
        assert_eq!(e.epoch(), 0);

        let change = e.apply_delta(&applier(), 40_000).unwrap();
        assert_eq!(change.total_supply, 1_040_000);
        assert_eq!(e.total_supply(), 1_040_000);
        assert_eq!(e.epoch(), 1);
    }

    #[test]
    fn rebase_rescales_without_touching_internal_units() {
        let mut e = engine(1_000_000, 500);
        let alice = AccountId::from_label("alice");
        e.transfer(&ctx(holder(), &[]), alice, 250_000).unwrap();
        let units = e.internal_balance_of(&alice);
        e.drain_events();

        e.apply_delta(&applier(), 40_000).unwrap();
        assert_eq!(e.internal_balance_of(&alice), units);
        assert_eq!(e.balance_of(&alice), 260_000);

        let events = e.drain_events();
        assert!(events
            .iter()
            .all(|ev| !matches!(ev, ProtocolEvent::Transfer { .. } | ProtocolEvent::Minted { .. })));
    }

    #[test]
    fn contraction_and_floor() {
        let mut e = engine(1_000_000, 500);
        e.apply_delta(&applier(), -50_000).unwrap();
        assert_eq!(e.total_supply(), 950_000);

        let mut tiny = engine(1, 10_000);
        assert_eq!(
            tiny.apply_delta(&applier(), -1),
            Err(AccountingError::NonPositiveSupply)
        );
        assert_eq!(
            tiny.apply_delta(&applier(), i128::MAX),
            Err(AccountingError::Overflow)
        );
    }

    #[test]
    fn requires_delta_applier() {
        let mut e = engine(1_000_000, 500);
        let err = e
            .apply_delta(&ctx(holder(), &[Capability::Admin]), 1)
            .unwrap_err();
        assert!(matches!(err, AccountingError::Access(_)));
        assert_eq!(err.kind(), ErrorKind::PolicyViolation);
    }

    #[test]
    fn reward_is_minted_to_beneficiary_within_cap() {
        let beneficiary = AccountId::from_label("treasury");
        let mut e = AccountingEngine::genesis(
            AccountingConfig {
                initial_supply: 1_000_000,
                max_delta_bps: 500,
                reward_rate_bps: 2_000,
                reward_beneficiary: Some(beneficiary),
                ..AccountingConfig::default()
            },
            holder(),
        )
        .unwrap();

        // 45_000 + 9_000 reward exceeds the 50_000 cap.
        assert!(matches!(
            e.apply_delta(&applier(), 45_000),
            Err(AccountingError::DeltaCapExceeded { change: 54_000, .. })
        ));

        let change = e.apply_delta(&applier(), 40_000).unwrap();
        assert_eq!(change.reward, 8_000);
        assert_eq!(e.total_supply(), 1_048_000);
        assert_eq!(e.balance_of(&beneficiary), 8_000);
        let sum = e.visible_sum();
        assert!(sum <= e.total_supply() && sum + 2 >= e.total_supply());

        // No reward on contraction.
        let change = e.apply_delta(&applier(), -10_000).unwrap();
        assert_eq!(change.reward, 0);
    }

    #[test]
    fn transfer_checks_balance_and_inputs() {
        let mut e = engine(1_000, 500);
        let bob = AccountId::from_label("bob");
        let owner = ctx(holder(), &[]);
        assert_eq!(e.transfer(&owner, bob, 0), Err(AccountingError::ZeroAmount));
        assert_eq!(
            e.transfer(&owner, AccountId([0; 32]), 1),
            Err(AccountingError::MalformedIdentity)
        );
        assert_eq!(
            e.transfer(&ctx(bob, &[]), holder(), 1),
            Err(AccountingError::InsufficientBalance {
                available: 0,
                requested: 1
            })
        );
        e.transfer(&owner, bob, 1_000).unwrap();
        assert_eq!(e.balance_of(&holder()), 0);
        assert_eq!(e.holder_count(), 1);
    }

    #[test]
    fn mint_and_burn_keep_scale() {
        let mut e = engine(1_000, 500);
        let scale = e.scale_factor();
        let minter = ctx(AccountId::from_label("m"), &[Capability::Minter, Capability::Burner]);
        let carol = AccountId::from_label("carol");

        e.mint(&minter, carol, 500).unwrap();
        assert_eq!(e.total_supply(), 1_500);
        assert_eq!(e.scale_factor(), scale);
        assert_eq!(e.balance_of(&carol), 500);

        e.burn(&minter, carol, 200).unwrap();
        assert_eq!(e.total_supply(), 1_300);
        assert_eq!(e.visible_sum(), 1_300);

        assert_eq!(
            e.mint(&minter, carol, MAX_SUPPLY_CEILING),
            Err(AccountingError::SupplyCeiling {
                total: 1_300 + MAX_SUPPLY_CEILING,
                max: e.config().max_supply
            })
        );
    }

    #[test]
    fn snapshot_round_trip_keeps_state() {
        let mut e = engine(1_000_000, 500);
        e.apply_delta(&applier(), 12_345).unwrap();
        let json = serde_json::to_string(&e).unwrap();
        let back: AccountingEngine = serde_json::from_str(&json).unwrap();
        assert_eq!(back.total_supply(), e.total_supply());
        assert_eq!(back.scale_factor(), e.scale_factor());
        assert_eq!(back.balance_of(&holder()), e.balance_of(&holder()));
    }
}
