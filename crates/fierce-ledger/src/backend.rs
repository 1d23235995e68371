// crates/fierce-ledger/src/backend.rs
//
// Explicit choice of which staking system a distributor reads stake from.

use std::sync::Arc;

use fierce_core::{Amount, Principal, StakeBackend};

use crate::duration::DurationStakeLedger;
use crate::pool::StakePool;
use crate::vault::Vault;

/// A live staking system, selected once and never toggled in place.
#[derive(Clone)]
pub enum StakingStrategy {
    /// Shared-accumulator block emission pool.
    Emission(Arc<Vault<StakePool>>),
    /// Fixed-lock, per-position APR ledger.
    Duration(Arc<Vault<DurationStakeLedger>>),
}

impl StakingStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            StakingStrategy::Emission(_) => "emission",
            StakingStrategy::Duration(_) => "duration",
        }
    }
}

impl StakeBackend for StakingStrategy {
    fn total_staked(&self) -> Amount {
        match self {
            StakingStrategy::Emission(v) => v.total_staked(),
            StakingStrategy::Duration(v) => v.total_staked(),
        }
    }

    fn user_stake(&self, user: &Principal) -> Amount {
        match self {
            StakingStrategy::Emission(v) => v.user_stake(user),
            StakingStrategy::Duration(v) => v.user_stake(user),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DurationConfig, PoolConfig};
    use crate::sink::MemorySink;
    use crate::token::InMemoryToken;

    #[test]
    fn test_strategies_report_their_own_stake() {
        let token = Arc::new(InMemoryToken::new("FRC", 1));
        let sink = Arc::new(MemorySink::new());
        let user = Principal::from_label("alice");
        token.mint(&user, 1_000_000).unwrap();

        let pool = Arc::new(Vault::new(
            Principal::from_label("pool"),
            token.clone(),
            sink.clone(),
            StakePool::new(&PoolConfig {
                min_stake: 1,
                ..PoolConfig::default()
            })
            .unwrap(),
        ));
        let ledger = Arc::new(Vault::new(
            Principal::from_label("locks"),
            token.clone(),
            sink,
            DurationStakeLedger::new(&DurationConfig {
                min_stake: 1,
                ..DurationConfig::default()
            })
            .unwrap(),
        ));
        token.approve(&user, &pool.account(), 1_000);
        token.approve(&user, &ledger.account(), 2_000);
        pool.deposit(user, 1_000, 0).unwrap();
        ledger.stake(user, 2_000, 30 * 24 * 60 * 60, 0).unwrap();

        let emission = StakingStrategy::Emission(pool);
        let duration = StakingStrategy::Duration(ledger);
        assert_eq!(emission.name(), "emission");
        assert_eq!(emission.user_stake(&user), 1_000);
        assert_eq!(duration.total_staked(), 2_000);
    }
}
