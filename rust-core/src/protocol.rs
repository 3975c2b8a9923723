//! The two engines behind one facade.
//!
//! `Protocol` resolves each caller's capabilities once per call, drives the
//! consensus engine into the accounting engine under the engine's own identity,
//! and collects committed events into a single ordered log.

use crate::access::{CallContext, Capability, CapabilityOracle, StaticCapabilities};
use crate::accounting::{AccountingEngine, SupplyChange};
use crate::config::{check_caps, ConsensusConfig, ProtocolConfig};
use crate::consensus::{
    ConsensusEngine, ConsensusError, DeltaTarget, Finalization, RoundView, SubmitOutcome,
    SubmitterRecord,
};
use crate::error::ProtocolError;
use crate::event::{EventLog, ProtocolEvent};
use crate::types::{AccountId, Balance, IndexValue, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Everything needed to resume a protocol instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtocolState<O> {
    pub engine_identity: AccountId,
    pub oracle: O,
    pub consensus: ConsensusEngine,
    pub accounting: AccountingEngine,
}

/// One externally invoked call, as recorded for replay.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Submit {
        caller: AccountId,
        value: IndexValue,
        now: Timestamp,
    },
    EmergencyFinalize {
        caller: AccountId,
        value: IndexValue,
        now: Timestamp,
    },
    ApplyDelta {
        caller: AccountId,
        delta: i128,
    },
    AuthorizeSubmitter {
        caller: AccountId,
        submitter: AccountId,
        now: Timestamp,
    },
    RevokeSubmitter {
        caller: AccountId,
        submitter: AccountId,
    },
    UpdateParameters {
        caller: AccountId,
        params: ConsensusConfig,
    },
    SetRewardBeneficiary {
        caller: AccountId,
        beneficiary: Option<AccountId>,
    },
    Transfer {
        caller: AccountId,
        to: AccountId,
        amount: Balance,
    },
    Mint {
        caller: AccountId,
        to: AccountId,
        amount: Balance,
    },
    Burn {
        caller: AccountId,
        from: AccountId,
        amount: Balance,
    },
}

pub struct Protocol<O = StaticCapabilities> {
    engine_identity: AccountId,
    oracle: O,
    consensus: ConsensusEngine,
    accounting: AccountingEngine,
    events: EventLog,
}

impl Protocol<StaticCapabilities> {
    /// Genesis from configuration, with capability grants taken from the config.
    pub fn from_config(cfg: ProtocolConfig) -> Result<Self, ProtocolError> {
        let mut oracle = StaticCapabilities::new();
        for grant in &cfg.genesis.grants {
            for cap in &grant.capabilities {
                oracle.grant(grant.account, *cap);
            }
        }
        Self::with_oracle(cfg, oracle)
    }
}

impl<O: CapabilityOracle> Protocol<O> {
    pub fn with_oracle(cfg: ProtocolConfig, oracle: O) -> Result<Self, ProtocolError> {
        cfg.validate()?;
        let genesis = cfg.genesis;
        let accounting = AccountingEngine::genesis(cfg.accounting, genesis.genesis_holder)?;
        let consensus = ConsensusEngine::new(
            cfg.consensus,
            genesis.submitters.iter().copied(),
            genesis.reference_value,
            genesis.genesis_time,
        );
        info!(
            holder = %genesis.genesis_holder.short(),
            engine = %genesis.engine_identity.short(),
            submitters = genesis.submitters.len(),
            total_supply = accounting.total_supply(),
            "protocol initialized"
        );
        Ok(Self {
            engine_identity: genesis.engine_identity,
            oracle,
            consensus,
            accounting,
            events: EventLog::new(),
        })
    }

    pub fn restore(state: ProtocolState<O>) -> Self {
        Self {
            engine_identity: state.engine_identity,
            oracle: state.oracle,
            consensus: state.consensus,
            accounting: state.accounting,
            events: EventLog::new(),
        }
    }

    pub fn snapshot(&self) -> ProtocolState<O>
    where
        O: Clone,
    {
        ProtocolState {
            engine_identity: self.engine_identity,
            oracle: self.oracle.clone(),
            consensus: self.consensus.clone(),
            accounting: self.accounting.clone(),
        }
    }

    /// Capabilities for one call. Authorized submitters hold the submitter
    /// capability through the registry, on top of any oracle grant.
    pub fn context(&self, caller: &AccountId) -> CallContext {
        let mut ctx = self.oracle.context_for(caller);
        if self.consensus.is_submitter(caller) {
            ctx.capabilities.insert(Capability::Submitter);
        }
        ctx
    }

    /// The consensus engine always holds the delta-applier capability.
    fn engine_context(&self) -> CallContext {
        let mut ctx = self.oracle.context_for(&self.engine_identity);
        ctx.capabilities.insert(Capability::DeltaApplier);
        ctx
    }

    fn collect_events(&mut self) {
        self.events.extend(self.consensus.drain_events());
        self.events.extend(self.accounting.drain_events());
    }

    pub fn submit(&mut self, caller: AccountId, value: IndexValue, now: Timestamp) -> Result<SubmitOutcome, ProtocolError> {
        let ctx = self.context(&caller);
        let engine_ctx = self.engine_context();
        let target = DeltaTarget {
            supply: &mut self.accounting,
            ctx: &engine_ctx,
        };
        let outcome = self.consensus.submit(&ctx, value, now, target);
        self.collect_events();
        Ok(outcome?)
    }

    pub fn emergency_finalize(
        &mut self,
        caller: AccountId,
        value: IndexValue,
        now: Timestamp,
    ) -> Result<Finalization, ProtocolError> {
        let ctx = self.context(&caller);
        let engine_ctx = self.engine_context();
        let target = DeltaTarget {
            supply: &mut self.accounting,
            ctx: &engine_ctx,
        };
        let outcome = self.consensus.emergency_finalize(&ctx, value, now, target);
        self.collect_events();
        Ok(outcome?)
    }

    pub fn apply_delta(&mut self, caller: AccountId, delta: i128) -> Result<SupplyChange, ProtocolError> {
        let ctx = self.context(&caller);
        let change = self.accounting.apply_delta(&ctx, delta);
        self.collect_events();
        Ok(change?)
    }

    pub fn authorize_submitter(&mut self, caller: AccountId, submitter: AccountId, now: Timestamp) -> Result<(), ProtocolError> {
        let ctx = self.context(&caller);
        let result = self.consensus.authorize_submitter(&ctx, submitter, now);
        self.collect_events();
        Ok(result?)
    }

    pub fn revoke_submitter(&mut self, caller: AccountId, submitter: AccountId) -> Result<(), ProtocolError> {
        let ctx = self.context(&caller);
        let result = self.consensus.revoke_submitter(&ctx, submitter);
        self.collect_events();
        Ok(result?)
    }

    /// New consensus parameters must still fit inside the accounting cap.
    pub fn update_parameters(&mut self, caller: AccountId, params: ConsensusConfig) -> Result<(), ProtocolError> {
        let ctx = self.context(&caller);
        check_caps(&params, self.accounting.config())
            .map_err(|e| ConsensusError::InvalidParameters(e.to_string()))?;
        let result = self.consensus.update_parameters(&ctx, params);
        self.collect_events();
        Ok(result?)
    }

    pub fn set_reward_beneficiary(&mut self, caller: AccountId, beneficiary: Option<AccountId>) -> Result<(), ProtocolError> {
        let ctx = self.context(&caller);
        let result = self.accounting.set_reward_beneficiary(&ctx, beneficiary);
        self.collect_events();
        Ok(result?)
    }

    pub fn transfer(&mut self, caller: AccountId, to: AccountId, amount: Balance) -> Result<(), ProtocolError> {
        let ctx = self.context(&caller);
        let result = self.accounting.transfer(&ctx, to, amount);
        self.collect_events();
        Ok(result?)
    }

    pub fn mint(&mut self, caller: AccountId, to: AccountId, amount: Balance) -> Result<(), ProtocolError> {
        let ctx = self.context(&caller);
        let result = self.accounting.mint(&ctx, to, amount);
        self.collect_events();
        Ok(result?)
    }

    pub fn burn(&mut self, caller: AccountId, from: AccountId, amount: Balance) -> Result<(), ProtocolError> {
        let ctx = self.context(&caller);
        let result = self.accounting.burn(&ctx, from, amount);
        self.collect_events();
        Ok(result?)
    }

    /// Run one recorded operation; returns the events it emitted.
    pub fn execute(&mut self, op: &Operation) -> Result<Vec<ProtocolEvent>, ProtocolError> {
        let start = self.events.len();
        match op {
            Operation::Submit { caller, value, now } => {
                self.submit(*caller, *value, *now)?;
            }
            Operation::EmergencyFinalize { caller, value, now } => {
                self.emergency_finalize(*caller, *value, *now)?;
            }
            Operation::ApplyDelta { caller, delta } => {
                self.apply_delta(*caller, *delta)?;
            }
            Operation::AuthorizeSubmitter {
                caller,
                submitter,
                now,
            } => self.authorize_submitter(*caller, *submitter, *now)?,
            Operation::RevokeSubmitter { caller, submitter } => {
                self.revoke_submitter(*caller, *submitter)?
            }
            Operation::UpdateParameters { caller, params } => {
                self.update_parameters(*caller, params.clone())?
            }
            Operation::SetRewardBeneficiary {
                caller,
                beneficiary,
            } => self.set_reward_beneficiary(*caller, *beneficiary)?,
            Operation::Transfer { caller, to, amount } => self.transfer(*caller, *to, *amount)?,
            Operation::Mint { caller, to, amount } => self.mint(*caller, *to, *amount)?,
            Operation::Burn {
                caller,
                from,
                amount,
            } => self.burn(*caller, *from, *amount)?,
        }
        Ok(self.events.since(start).to_vec())
    }

    pub fn get_round(&self) -> Option<RoundView> {
        self.consensus.current_round()
    }

    pub fn get_reputation(&self, id: &AccountId) -> Option<SubmitterRecord> {
        self.consensus.reputation(id).cloned()
    }

    pub fn submitters(&self) -> Vec<AccountId> {
        self.consensus.submitters()
    }

    pub fn last_finalized(&self) -> Option<(IndexValue, u64)> {
        self.consensus.last_finalized()
    }

    pub fn balance_of(&self, id: &AccountId) -> Balance {
        self.accounting.balance_of(id)
    }

    pub fn internal_balance_of(&self, id: &AccountId) -> Balance {
        self.accounting.internal_balance_of(id)
    }

    pub fn total_supply(&self) -> Balance {
        self.accounting.total_supply()
    }

    pub fn scale_factor(&self) -> Balance {
        self.accounting.scale_factor()
    }

    pub fn internal_supply(&self) -> Balance {
        self.accounting.internal_supply()
    }

    pub fn reward_beneficiary(&self) -> Option<AccountId> {
        self.accounting.reward_beneficiary()
    }

    pub fn epoch(&self) -> u64 {
        self.accounting.epoch()
    }

    pub fn holder_count(&self) -> usize {
        self.accounting.holder_count()
    }

    pub fn engine_identity(&self) -> AccountId {
        self.engine_identity
    }

    pub fn consensus(&self) -> &ConsensusEngine {
        &self.consensus
    }

    pub fn accounting(&self) -> &AccountingEngine {
        &self.accounting
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<ProtocolEvent> {
        self.events.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GenesisConfig, GrantConfig};
    use crate::error::ErrorKind;

    fn id(label: &str) -> AccountId {
        AccountId::from_label(label)
    }

    fn config() -> ProtocolConfig {
        ProtocolConfig {
            genesis: GenesisConfig {
                genesis_holder: id("holder"),
                engine_identity: id("engine"),
                genesis_time: 0,
                reference_value: Some(100),
                submitters: vec![id("s1"), id("s2"), id("s3")],
                grants: vec![GrantConfig {
                    account: id("admin"),
                    capabilities: vec![Capability::Admin, Capability::Emergency],
                }],
            },
            consensus: ConsensusConfig {
                consensus_threshold: 3,
                cooldown_secs: 0,
                ..ConsensusConfig::default()
            },
            accounting: Default::default(),
        }
    }

    #[test]
    fn registry_membership_grants_submitter_capability() {
        let p = Protocol::from_config(config()).unwrap();
        assert!(p.context(&id("s1")).require(Capability::Submitter).is_ok());
        assert!(p.context(&id("admin")).require(Capability::Submitter).is_err());
        assert!(p
            .engine_context()
            .require(Capability::DeltaApplier)
            .is_ok());
    }

    #[test]
    fn finalization_drives_supply_and_logs_events() {
        let mut p = Protocol::from_config(config()).unwrap();
        let before = p.total_supply();
        p.submit(id("s1"), 102, 1).unwrap();
        p.submit(id("s2"), 102, 2).unwrap();
        let outcome = p.submit(id("s3"), 102, 3).unwrap();
        let SubmitOutcome::Finalized(fin) = outcome else {
            panic!("expected finalization");
        };
        assert_eq!(fin.delta, (before as i128) * 2 / 100);
        assert_eq!(p.total_supply(), before + before / 50);
        assert_eq!(p.epoch(), 1);
        assert!(p
            .events()
            .events()
            .iter()
            .any(|e| matches!(e, ProtocolEvent::SupplyDeltaApplied { epoch: 1, .. })));
    }

    #[test]
    fn failed_call_is_classified_and_leaves_no_event() {
        let mut p = Protocol::from_config(config()).unwrap();
        let err = p.apply_delta(id("s1"), 5).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::PolicyViolation));
        let err = p.submit(id("s1"), 0, 1).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::InputValidation));
        assert!(p.events().is_empty());
    }

    #[test]
    fn parameter_update_must_fit_supply_cap() {
        let mut p = Protocol::from_config(config()).unwrap();
        let wide = ConsensusConfig {
            max_value_change_bps: 5_000,
            ..p.consensus().config().clone()
        };
        let err = p.update_parameters(id("admin"), wide).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::InputValidation));
    }

    #[test]
    fn supply_reads_follow_accounting_state() {
        let mut p = Protocol::from_config(config()).unwrap();
        assert_eq!(p.reward_beneficiary(), None);
        let pool = p.internal_supply();
        assert_eq!(pool, p.scale_factor() * p.total_supply());

        p.set_reward_beneficiary(id("admin"), Some(id("treasury")))
            .unwrap();
        assert_eq!(p.reward_beneficiary(), Some(id("treasury")));
        for (i, s) in ["s1", "s2", "s3"].iter().enumerate() {
            p.submit(id(s), 102, i as u64).unwrap();
        }
        // Only the reward adds internal units; rebasing moves the scale.
        let reward = p.balance_of(&id("treasury"));
        assert!(reward > 0);
        assert_eq!(p.internal_supply(), pool + p.internal_balance_of(&id("treasury")));
    }

    #[test]
    fn snapshot_restores_state() {
        let mut p = Protocol::from_config(config()).unwrap();
        p.transfer(id("holder"), id("alice"), 1_000).unwrap();
        let restored = Protocol::restore(p.snapshot());
        assert_eq!(restored.balance_of(&id("alice")), 1_000);
        assert_eq!(restored.submitters(), p.submitters());
        assert!(restored.events().is_empty());
    }

    #[test]
    fn operations_replay_from_json() {
        let mut p = Protocol::from_config(config()).unwrap();
        let ops = format!(
            r#"[
                {{"transfer": {{"caller": "{h}", "to": "{a}", "amount": 250}}}},
                {{"authorize_submitter": {{"caller": "{adm}", "submitter": "{a}", "now": 5}}}}
            ]"#,
            h = id("holder"),
            a = id("alice"),
            adm = id("admin"),
        );
        let ops: Vec<Operation> = serde_json::from_str(&ops).unwrap();
        let emitted = p.execute(&ops[0]).unwrap();
        assert_eq!(emitted.len(), 1);
        p.execute(&ops[1]).unwrap();
        assert_eq!(p.submitters().len(), 4);
        assert_eq!(p.balance_of(&id("alice")), 250);
    }
}
