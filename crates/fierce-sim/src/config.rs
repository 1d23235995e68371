// crates/fierce-sim/src/config.rs
//
// Simulation configuration.
// Loaded from a TOML file or populated with a built-in demo scenario.
//
// Scenario amounts are whole tokens; ledger sections use base units.

use serde::Deserialize;
use std::fs;

use fierce_ledger::{DistributorConfig, DurationConfig, PoolConfig};

use crate::scenario::{Action, ScheduledAction};

/// Runtime configuration for a simulation run.
#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    /// Wall-clock seconds per block step, for the duration ledger and vesting.
    #[serde(default = "default_seconds_per_step")]
    pub seconds_per_step: u64,

    /// Unix time of step 0.
    #[serde(default = "default_genesis_time")]
    pub genesis_time: u64,

    /// Steps between progress log lines.
    #[serde(default = "default_report_interval")]
    pub report_interval: u64,

    /// Last step simulated.
    #[serde(default = "default_end_step")]
    pub end_step: u64,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub duration: DurationConfig,

    #[serde(default)]
    pub distributor: DistributorConfig,

    #[serde(default)]
    pub emission: EmissionSettings,

    /// Accounts and their starting balances.
    #[serde(default = "default_accounts")]
    pub accounts: Vec<AccountConfig>,

    #[serde(default = "default_actions")]
    pub actions: Vec<ScheduledAction>,
}

/// Emission window opened at step 0.
#[derive(Debug, Clone, Deserialize)]
pub struct EmissionSettings {
    #[serde(default = "default_emission_steps")]
    pub duration_steps: u64,

    /// Reward per step, whole tokens.
    #[serde(default = "default_rate_tokens")]
    pub rate_tokens: u64,

    /// Initial funding, whole tokens.
    #[serde(default = "default_funding_tokens")]
    pub funding_tokens: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub label: String,
    /// Starting balance of the staking token, whole tokens.
    #[serde(default)]
    pub tokens: u64,
    /// Starting balance of the commission token, whole tokens.
    #[serde(default)]
    pub commission_tokens: u64,
}

fn default_seconds_per_step() -> u64 {
    12
}

fn default_genesis_time() -> u64 {
    1_700_000_000
}

fn default_report_interval() -> u64 {
    250
}

fn default_end_step() -> u64 {
    1_200
}

fn default_emission_steps() -> u64 {
    1_000
}

fn default_rate_tokens() -> u64 {
    10
}

fn default_funding_tokens() -> u64 {
    5_000
}

fn account(label: &str, tokens: u64, commission_tokens: u64) -> AccountConfig {
    AccountConfig {
        label: label.to_string(),
        tokens,
        commission_tokens,
    }
}

fn default_accounts() -> Vec<AccountConfig> {
    vec![
        account("treasury", 100_000, 50_000),
        account("alice", 10_000, 0),
        account("bob", 10_000, 0),
        account("carol", 10_000, 0),
    ]
}

fn at(step: u64, action: Action) -> ScheduledAction {
    ScheduledAction { at: step, action }
}

fn default_actions() -> Vec<ScheduledAction> {
    let user = |s: &str| s.to_string();
    vec![
        at(0, Action::FundLocks { tokens: 1_000 }),
        at(0, Action::Register { user: user("alice") }),
        at(0, Action::Register { user: user("bob") }),
        at(0, Action::Deposit { user: user("alice"), tokens: 1_000 }),
        at(100, Action::Deposit { user: user("bob"), tokens: 3_000 }),
        at(100, Action::Lock { user: user("carol"), tokens: 2_000, days: 30 }),
        at(200, Action::DepositCommissions { tokens: 400 }),
        at(300, Action::Register { user: user("carol") }),
        at(400, Action::Claim { user: user("alice"), compound: true }),
        at(500, Action::DepositCommissions { tokens: 800 }),
        at(600, Action::ClaimCommissions { user: user("alice") }),
        at(600, Action::ClaimCommissions { user: user("bob") }),
        at(700, Action::Withdraw { user: user("bob"), position: 1 }),
        at(800, Action::Fund { tokens: 2_000 }),
        at(1_100, Action::Withdraw { user: user("alice"), position: 0 }),
        at(1_100, Action::Withdraw { user: user("alice"), position: 2 }),
        at(1_200, Action::EmergencyUnlock { user: user("carol"), position: 0 }),
        at(1_200, Action::WithdrawSurplus),
    ]
}

impl Default for EmissionSettings {
    fn default() -> Self {
        Self {
            duration_steps: default_emission_steps(),
            rate_tokens: default_rate_tokens(),
            funding_tokens: default_funding_tokens(),
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seconds_per_step: default_seconds_per_step(),
            genesis_time: default_genesis_time(),
            report_interval: default_report_interval(),
            end_step: default_end_step(),
            pool: PoolConfig::default(),
            duration: DurationConfig::default(),
            distributor: DistributorConfig::default(),
            emission: EmissionSettings::default(),
            accounts: default_accounts(),
            actions: default_actions(),
        }
    }
}

impl SimConfig {
    /// Load configuration from a TOML file at the given path.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config: SimConfig = toml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: SimConfig = toml::from_str("").unwrap();
        assert_eq!(config.seconds_per_step, 12);
        assert_eq!(config.accounts.len(), 4);
        assert!(!config.actions.is_empty());
    }

    #[test]
    fn test_parse_scenario() {
        let config: SimConfig = toml::from_str(
            r#"
            end_step = 50
            seconds_per_step = 6

            [pool]
            min_stake = 1

            [distributor]
            design = "snapshot"

            [[accounts]]
            label = "alice"
            tokens = 100

            [[actions]]
            at = 5
            action = { type = "deposit", user = "alice", tokens = 10 }

            [[actions]]
            at = 9
            action = { type = "claim", user = "alice", compound = false }
            "#,
        )
        .unwrap();
        assert_eq!(config.end_step, 50);
        assert_eq!(config.pool.min_stake, 1);
        assert_eq!(config.accounts[0].tokens, 100);
        assert_eq!(config.actions.len(), 2);
        assert!(matches!(
            &config.actions[0].action,
            Action::Deposit { tokens: 10, .. }
        ));
        assert_eq!(
            config.distributor.design,
            fierce_ledger::DistributorDesign::Snapshot
        );
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(SimConfig::load("/nonexistent/fierce.toml").is_err());
    }

    #[test]
    fn test_explicit_default_amounts_parse() {
        let config: SimConfig = toml::from_str(
            r#"
            [pool]
            precision = "1000000000000"
            min_stake = "1000000000000000000"
            minimum_initial_funding = "1_000_000_000_000_000_000_000"

            [duration]
            min_stake = "1000000000000000000"

            [distributor]
            precision = 1000000000000000000
            "#,
        )
        .unwrap();
        let defaults = SimConfig::default();
        assert_eq!(config.pool.precision, defaults.pool.precision);
        assert_eq!(config.pool.min_stake, defaults.pool.min_stake);
        assert_eq!(
            config.pool.minimum_initial_funding,
            defaults.pool.minimum_initial_funding
        );
        assert_eq!(config.duration.min_stake, defaults.duration.min_stake);
        assert_eq!(config.distributor.precision, defaults.distributor.precision);
    }

    #[test]
    fn test_negative_amount_is_rejected() {
        assert!(toml::from_str::<SimConfig>("[pool]\nmin_stake = -1").is_err());
    }
}
