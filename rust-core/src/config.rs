use crate::access::Capability;
use crate::accounting::MAX_SUPPLY_CEILING;
use crate::types::{AccountId, Balance, IndexValue, Timestamp, BPS_DENOMINATOR};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub genesis: GenesisConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub accounting: AccountingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisConfig {
    /// Receives the whole initial supply.
    pub genesis_holder: AccountId,
    /// Identity the consensus engine uses when it drives the accounting engine.
    pub engine_identity: AccountId,
    #[serde(default)]
    pub genesis_time: Timestamp,
    /// Baseline for the first round's delta; without it the first round applies a zero delta.
    #[serde(default)]
    pub reference_value: Option<IndexValue>,
    #[serde(default)]
    pub submitters: Vec<AccountId>,
    #[serde(default)]
    pub grants: Vec<GrantConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GrantConfig {
    pub account: AccountId,
    pub capabilities: Vec<Capability>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Plain mean of the submissions that survived the deviation filter.
    #[default]
    Mean,
    /// Reputation-weighted mean of the same set.
    ReputationWeighted,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    #[serde(default = "default_min_value")]
    pub min_value: IndexValue,
    #[serde(default = "default_max_value")]
    pub max_value: IndexValue,
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: usize,
    #[serde(default = "default_max_deviation_bps")]
    pub max_deviation_bps: u64,
    #[serde(default = "default_max_value_change_bps")]
    pub max_value_change_bps: u64,
    #[serde(default = "default_submission_window")]
    pub submission_window_secs: u64,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_max_reputation")]
    pub max_reputation: u32,
    #[serde(default = "default_min_reputation")]
    pub min_reputation: u32,
    #[serde(default = "default_reputation_reward")]
    pub reputation_reward: u32,
    #[serde(default = "default_reputation_penalty")]
    pub reputation_penalty: u32,
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,
    #[serde(default = "default_min_submitters")]
    pub min_submitters: usize,
    #[serde(default = "default_max_submitters")]
    pub max_submitters: usize,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_min_value() -> IndexValue {
    1
}

fn default_max_value() -> IndexValue {
    1_000_000_000
}

fn default_consensus_threshold() -> usize {
    3
}

fn default_max_deviation_bps() -> u64 {
    500 // 5%
}

fn default_max_value_change_bps() -> u64 {
    500
}

fn default_submission_window() -> u64 {
    3_600
}

fn default_cooldown() -> u64 {
    300
}

fn default_max_reputation() -> u32 {
    100
}

fn default_min_reputation() -> u32 {
    50
}

fn default_reputation_reward() -> u32 {
    1
}

fn default_reputation_penalty() -> u32 {
    5
}

fn default_max_errors() -> u32 {
    3
}

fn default_min_submitters() -> usize {
    3
}

fn default_max_submitters() -> usize {
    20
}

fn default_history_limit() -> usize {
    64
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_value: default_min_value(),
            max_value: default_max_value(),
            consensus_threshold: default_consensus_threshold(),
            max_deviation_bps: default_max_deviation_bps(),
            max_value_change_bps: default_max_value_change_bps(),
            submission_window_secs: default_submission_window(),
            cooldown_secs: default_cooldown(),
            max_reputation: default_max_reputation(),
            min_reputation: default_min_reputation(),
            reputation_reward: default_reputation_reward(),
            reputation_penalty: default_reputation_penalty(),
            max_errors: default_max_errors(),
            min_submitters: default_min_submitters(),
            max_submitters: default_max_submitters(),
            aggregation: Aggregation::default(),
            history_limit: default_history_limit(),
        }
    }
}

impl ConsensusConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_value == 0 {
            return Err(invalid("min_value", "must be positive"));
        }
        if self.min_value > self.max_value {
            return Err(invalid("max_value", "below min_value"));
        }
        if self.consensus_threshold == 0 || self.consensus_threshold > self.max_submitters {
            return Err(invalid(
                "consensus_threshold",
                format!("must be in 1..={}", self.max_submitters),
            ));
        }
        if self.min_submitters > self.max_submitters {
            return Err(invalid("min_submitters", "exceeds max_submitters"));
        }
        if self.max_deviation_bps > BPS_DENOMINATOR {
            return Err(invalid("max_deviation_bps", "exceeds 10000"));
        }
        if self.max_value_change_bps == 0 {
            return Err(invalid("max_value_change_bps", "must be positive"));
        }
        if self.submission_window_secs == 0 {
            return Err(invalid("submission_window_secs", "must be positive"));
        }
        if self.min_reputation > self.max_reputation {
            return Err(invalid("min_reputation", "exceeds max_reputation"));
        }
        if self.max_errors == 0 {
            return Err(invalid("max_errors", "must be positive"));
        }
        if self.history_limit == 0 {
            return Err(invalid("history_limit", "must be positive"));
        }
        Ok(())
    }

    pub fn value_in_range(&self, value: IndexValue) -> bool {
        (self.min_value..=self.max_value).contains(&value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountingConfig {
    #[serde(default = "default_initial_supply")]
    pub initial_supply: Balance,
    #[serde(default = "default_max_supply")]
    pub max_supply: Balance,
    #[serde(default = "default_max_delta_bps")]
    pub max_delta_bps: u64,
    #[serde(default = "default_reward_rate_bps")]
    pub reward_rate_bps: u64,
    #[serde(default)]
    pub reward_beneficiary: Option<AccountId>,
}

fn default_initial_supply() -> Balance {
    10_000_000 * 1_000_000_000
}

fn default_max_supply() -> Balance {
    1_000_000_000_000_000_000
}

fn default_max_delta_bps() -> u64 {
    1_000 // 10%
}

fn default_reward_rate_bps() -> u64 {
    2_000
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            initial_supply: default_initial_supply(),
            max_supply: default_max_supply(),
            max_delta_bps: default_max_delta_bps(),
            reward_rate_bps: default_reward_rate_bps(),
            reward_beneficiary: None,
        }
    }
}

impl AccountingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_supply == 0 {
            return Err(invalid("initial_supply", "must be positive"));
        }
        if self.max_supply > MAX_SUPPLY_CEILING {
            return Err(invalid(
                "max_supply",
                format!("exceeds ceiling {}", MAX_SUPPLY_CEILING),
            ));
        }
        if self.initial_supply > self.max_supply {
            return Err(invalid("initial_supply", "exceeds max_supply"));
        }
        if self.max_delta_bps == 0 || self.max_delta_bps > BPS_DENOMINATOR {
            return Err(invalid("max_delta_bps", "must be in 1..=10000"));
        }
        if self.reward_rate_bps > BPS_DENOMINATOR {
            return Err(invalid("reward_rate_bps", "exceeds 10000"));
        }
        Ok(())
    }
}

/// A change the consensus engine accepts (value change plus reward) must fit the accounting cap.
pub fn check_caps(consensus: &ConsensusConfig, accounting: &AccountingConfig) -> Result<(), ConfigError> {
    let lhs = u128::from(consensus.max_value_change_bps)
        * u128::from(BPS_DENOMINATOR + accounting.reward_rate_bps);
    let rhs = u128::from(accounting.max_delta_bps) * u128::from(BPS_DENOMINATOR);
    if lhs > rhs {
        return Err(invalid(
            "max_value_change_bps",
            "value change plus reward can exceed max_delta_bps",
        ));
    }
    Ok(())
}

impl ProtocolConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: ProtocolConfig = serde_json::from_str(&data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.consensus.validate()?;
        self.accounting.validate()?;
        check_caps(&self.consensus, &self.accounting)?;

        let g = &self.genesis;
        if g.engine_identity.is_zero() {
            return Err(invalid("genesis.engine_identity", "all-zero identity"));
        }
        if g.submitters.iter().any(AccountId::is_zero) {
            return Err(invalid("genesis.submitters", "all-zero identity"));
        }
        if g.submitters.len() > self.consensus.max_submitters {
            return Err(invalid("genesis.submitters", "exceeds max_submitters"));
        }
        if g.submitters.len() < self.consensus.min_submitters {
            return Err(invalid("genesis.submitters", "below min_submitters"));
        }
        let unique: BTreeSet<_> = g.submitters.iter().collect();
        if unique.len() != g.submitters.len() {
            return Err(invalid("genesis.submitters", "duplicate identity"));
        }
        if let Some(v) = g.reference_value {
            if !self.consensus.value_in_range(v) {
                return Err(invalid("genesis.reference_value", "outside value range"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genesis_json() -> String {
        format!(
            r#"{{
                "genesis": {{
                    "genesis_holder": "{}",
                    "engine_identity": "{}",
                    "submitters": ["{}"],
                    "grants": [{{"account": "{}", "capabilities": ["admin", "emergency"]}}]
                }},
                "consensus": {{ "consensus_threshold": 2, "min_submitters": 1 }}
            }}"#,
            AccountId::from_label("holder"),
            AccountId::from_label("engine"),
            AccountId::from_label("s1"),
            AccountId::from_label("admin"),
        )
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ProtocolConfig = serde_json::from_str(&genesis_json()).unwrap();
        assert_eq!(cfg.consensus.consensus_threshold, 2);
        assert_eq!(cfg.consensus.max_deviation_bps, 500);
        assert_eq!(cfg.accounting, AccountingConfig::default());
        assert_eq!(cfg.genesis.grants[0].capabilities.len(), 2);
        cfg.validate().unwrap();
    }

    #[test]
    fn defaults_are_consistent() {
        ConsensusConfig::default().validate().unwrap();
        AccountingConfig::default().validate().unwrap();
        check_caps(&ConsensusConfig::default(), &AccountingConfig::default()).unwrap();
    }

    #[test]
    fn rejects_value_cap_wider_than_supply_cap() {
        let consensus = ConsensusConfig {
            max_value_change_bps: 900,
            ..ConsensusConfig::default()
        };
        // 9% * 1.2 > 10%
        let err = check_caps(&consensus, &AccountingConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "max_value_change_bps",
                ..
            }
        ));
    }

    #[test]
    fn rejects_bad_ranges() {
        let c = ConsensusConfig {
            min_value: 0,
            ..ConsensusConfig::default()
        };
        assert!(c.validate().is_err());

        let a = AccountingConfig {
            max_supply: MAX_SUPPLY_CEILING + 1,
            ..AccountingConfig::default()
        };
        assert!(a.validate().is_err());
    }

    #[test]
    fn rejects_malformed_genesis_pool() {
        let base: ProtocolConfig = serde_json::from_str(&genesis_json()).unwrap();

        let mut cfg = base.clone();
        cfg.genesis.engine_identity = AccountId([0u8; 32]);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "genesis.engine_identity", .. })
        ));

        let mut cfg = base.clone();
        cfg.genesis.submitters.push(AccountId([0u8; 32]));
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "genesis.submitters", .. })
        ));

        let mut cfg = base;
        cfg.consensus.min_submitters = 2;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "genesis.submitters", .. })
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = ProtocolConfig::load("/nonexistent/elastic.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
