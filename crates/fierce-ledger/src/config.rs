// crates/fierce-ledger/src/config.rs
//
// Configuration for the ledger components.
// Deserializable from TOML/JSON sections, with defaults for every field.
//
// Amounts and precisions are base units and may exceed what a TOML integer
// holds, so they are written as decimal strings (`"1000000000000000000000"`).
// Plain integers are accepted when they fit.

use serde::{Deserialize, Serialize};

use fierce_core::Amount;

use crate::token::UNITS_PER_TOKEN;

/// Seconds in a 365-day year. Duration-ledger rates are annual.
pub const YEAR_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Configuration for the block-emission pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Accumulator scale.
    #[serde(default = "default_pool_precision", with = "fierce_core::amount_serde")]
    pub precision: u128,

    /// Smallest accepted deposit, in base units.
    #[serde(default = "default_min_stake", with = "fierce_core::amount_serde")]
    pub min_stake: Amount,

    /// Smallest funding accepted when an emission window starts.
    #[serde(default = "default_minimum_initial_funding", with = "fierce_core::amount_serde")]
    pub minimum_initial_funding: Amount,
}

fn default_pool_precision() -> u128 {
    1_000_000_000_000
}

fn default_min_stake() -> Amount {
    UNITS_PER_TOKEN
}

fn default_minimum_initial_funding() -> Amount {
    1_000 * UNITS_PER_TOKEN
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            precision: default_pool_precision(),
            min_stake: default_min_stake(),
            minimum_initial_funding: default_minimum_initial_funding(),
        }
    }
}

/// One lock-duration tier and its annual rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateTier {
    /// Lock duration in seconds.
    pub duration: u64,
    /// Annual rate in units of `rate_scale` (basis points by default).
    pub rate: u64,
}

/// Configuration for the duration (fixed-lock, APR) ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurationConfig {
    #[serde(default = "default_min_stake", with = "fierce_core::amount_serde")]
    pub min_stake: Amount,

    /// Denominator of `rate` (10_000 means rates are basis points).
    #[serde(default = "default_rate_scale")]
    pub rate_scale: u64,

    /// Seconds past maturity after which a position stops accruing.
    #[serde(default = "default_max_accrual_grace")]
    pub max_accrual_grace: u64,

    /// Delay between queuing and applying a rate change.
    #[serde(default = "default_rate_change_delay")]
    pub rate_change_delay: u64,

    #[serde(default = "default_tiers")]
    pub tiers: Vec<RateTier>,
}

fn default_rate_scale() -> u64 {
    10_000
}

fn default_max_accrual_grace() -> u64 {
    30 * 24 * 60 * 60
}

fn default_rate_change_delay() -> u64 {
    2 * 24 * 60 * 60
}

fn default_tiers() -> Vec<RateTier> {
    const DAY: u64 = 24 * 60 * 60;
    vec![
        RateTier { duration: 30 * DAY, rate: 500 },
        RateTier { duration: 90 * DAY, rate: 1_000 },
        RateTier { duration: 180 * DAY, rate: 1_500 },
        RateTier { duration: 365 * DAY, rate: 2_500 },
    ]
}

impl Default for DurationConfig {
    fn default() -> Self {
        Self {
            min_stake: default_min_stake(),
            rate_scale: default_rate_scale(),
            max_accrual_grace: default_max_accrual_grace(),
            rate_change_delay: default_rate_change_delay(),
            tiers: default_tiers(),
        }
    }
}

/// Which commission distributor to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributorDesign {
    /// Per-deposit stake snapshots. O(participants) per deposit.
    Snapshot,
    /// Running reward-per-stake accumulator. O(1) per deposit.
    #[default]
    Accumulator,
}

/// Configuration for the commission distributors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributorConfig {
    #[serde(default = "default_distributor_precision", with = "fierce_core::amount_serde")]
    pub precision: u128,

    #[serde(default)]
    pub design: DistributorDesign,
}

fn default_distributor_precision() -> u128 {
    1_000_000_000_000_000_000
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            precision: default_distributor_precision(),
            design: DistributorDesign::default(),
        }
    }
}
