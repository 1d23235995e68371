// crates/fierce-ledger/src/duration.rs
//
// Fixed-lock staking with per-position linear (APR-style) accrual.
//
// Unlike the emission pool, each position earns independently:
//
//   reward = amount * elapsed * rate / (YEAR_SECONDS * rate_scale)
//
// The rate is copied into the position when it opens; later tier changes
// never reach existing positions. Accrual stops (without error) at
// `start + duration + max_accrual_grace`, so a position left unclaimed cannot
// drain the reward pool indefinitely.
//
// Lock tiers are configured per duration. Rate changes go through a
// timelock: queue now, apply after `rate_change_delay`.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fierce_core::{
    Amount, EventKind, FierceError, LedgerEvent, Principal, StakeBackend, Timestamp,
};

use crate::config::{DurationConfig, YEAR_SECONDS};
use crate::fixed_point::{add, mul_div, sub};
use crate::journal::{Journaled, JournaledMap, JournaledVec};
use crate::timelock::PendingChange;
use crate::vault::EventSource;

/// A fixed-lock position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationPosition {
    pub id: u64,
    pub owner: Principal,
    pub amount: Amount,
    pub start_time: Timestamp,
    /// Lock length in seconds.
    pub duration: u64,
    /// Annual rate captured at open time, in units of the ledger's rate scale.
    pub reward_rate: u64,
    pub accumulated_rewards: Amount,
    pub last_reward_calculation: Timestamp,
    pub active: bool,
    pub closed_at: Option<Timestamp>,
}

impl DurationPosition {
    /// Earliest time the position can be unstaked with reward.
    pub fn matures_at(&self) -> Option<Timestamp> {
        self.start_time.checked_add(self.duration)
    }
}

/// Amounts released when a position closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationPayout {
    pub principal: Amount,
    pub reward: Amount,
}

/// The duration staking ledger.
#[derive(Debug, Clone)]
pub struct DurationStakeLedger {
    min_stake: Amount,
    rate_scale: u64,
    max_accrual_grace: u64,
    rate_change_delay: u64,
    rates: JournaledMap<u64, u64>,
    pending_rates: JournaledMap<u64, PendingChange<u64>>,
    positions: JournaledVec<DurationPosition>,
    user_positions: JournaledMap<Principal, Vec<u64>>,
    user_staked: JournaledMap<Principal, Amount>,
    total_staked: Amount,
    reward_pool: Amount,
    total_rewards_paid: Amount,
    total_forfeited: Amount,
    events: Vec<LedgerEvent>,
}

impl DurationStakeLedger {
    pub fn new(config: &DurationConfig) -> Result<Self, FierceError> {
        if config.rate_scale == 0 {
            return Err(FierceError::InvalidInput(
                "rate scale must be nonzero".to_string(),
            ));
        }
        let rates: BTreeMap<u64, u64> = config
            .tiers
            .iter()
            .filter(|t| t.duration > 0 && t.rate > 0)
            .map(|t| (t.duration, t.rate))
            .collect();
        Ok(Self {
            min_stake: config.min_stake,
            rate_scale: config.rate_scale,
            max_accrual_grace: config.max_accrual_grace,
            rate_change_delay: config.rate_change_delay,
            rates: rates.into(),
            pending_rates: JournaledMap::new(),
            positions: JournaledVec::new(),
            user_positions: JournaledMap::new(),
            user_staked: JournaledMap::new(),
            total_staked: 0,
            reward_pool: 0,
            total_rewards_paid: 0,
            total_forfeited: 0,
            events: Vec::new(),
        })
    }

    // -----------------------------------------------------------------------
    // Rates
    // -----------------------------------------------------------------------

    /// Current rate for a lock duration, if the tier is enabled.
    pub fn rate_for(&self, duration: u64) -> Option<u64> {
        self.rates.get(&duration).copied().filter(|r| *r > 0)
    }

    pub fn rates(&self) -> &BTreeMap<u64, u64> {
        &self.rates
    }

    /// Set a tier rate immediately. A rate of zero disables the tier.
    pub fn set_rate(&mut self, duration: u64, rate: u64) -> Result<(), FierceError> {
        if duration == 0 {
            return Err(FierceError::InvalidInput(
                "tier duration must be nonzero".to_string(),
            ));
        }
        if rate == 0 {
            self.rates.remove(&duration);
        } else {
            self.rates.insert(duration, rate);
        }
        info!(duration, rate, "duration tier rate set");
        self.emit(EventKind::RateChangeApplied { duration, rate });
        Ok(())
    }

    /// Queue a rate change for `duration`, replacing any queued change.
    pub fn queue_rate_change(
        &mut self,
        duration: u64,
        rate: u64,
        now: Timestamp,
    ) -> Result<Timestamp, FierceError> {
        if duration == 0 {
            return Err(FierceError::InvalidInput(
                "tier duration must be nonzero".to_string(),
            ));
        }
        let change = PendingChange::new(rate, now, self.rate_change_delay)?;
        let eligible_at = change.eligible_at;
        self.pending_rates.insert(duration, change);
        self.emit(EventKind::RateChangeQueued {
            duration,
            rate,
            eligible_at,
        });
        Ok(eligible_at)
    }

    /// Apply a queued rate change once its delay has elapsed.
    pub fn apply_rate_change(&mut self, duration: u64, now: Timestamp) -> Result<u64, FierceError> {
        let change = self
            .pending_rates
            .get(&duration)
            .cloned()
            .ok_or_else(|| FierceError::NotFound(format!("queued rate change for {}", duration)))?;
        let rate = change.take(now)?;
        self.pending_rates.remove(&duration);
        self.set_rate(duration, rate)?;
        Ok(rate)
    }

    pub fn pending_rate_change(&self, duration: u64) -> Option<&PendingChange<u64>> {
        self.pending_rates.get(&duration)
    }

    // -----------------------------------------------------------------------
    // Reward pool
    // -----------------------------------------------------------------------

    /// Add to the pool that pays accrued rewards.
    pub fn fund_rewards(&mut self, amount: Amount) -> Result<Amount, FierceError> {
        if amount == 0 {
            return Err(FierceError::InvalidInput(
                "funding amount must be nonzero".to_string(),
            ));
        }
        self.reward_pool = add(self.reward_pool, amount, "reward pool")?;
        self.emit(EventKind::RewardsFunded {
            amount,
            total_funded: self.reward_pool,
        });
        Ok(self.reward_pool)
    }

    // -----------------------------------------------------------------------
    // Positions
    // -----------------------------------------------------------------------

    /// Open a position locked for `duration` seconds at the tier's current rate.
    pub fn stake(
        &mut self,
        user: Principal,
        amount: Amount,
        duration: u64,
        now: Timestamp,
    ) -> Result<u64, FierceError> {
        if user.is_zero() {
            return Err(FierceError::InvalidInput("zero principal".to_string()));
        }
        let reward_rate = self.rate_for(duration).ok_or_else(|| {
            FierceError::InvalidInput(format!("no reward rate configured for {}s", duration))
        })?;
        if amount < self.min_stake {
            return Err(FierceError::InvalidInput(format!(
                "stake {} is below the minimum of {}",
                amount, self.min_stake
            )));
        }
        if now.checked_add(duration).is_none() {
            return Err(FierceError::InvalidInput(
                "lock end overflows the timestamp range".to_string(),
            ));
        }

        let total_staked = add(self.total_staked, amount, "total staked")?;
        let user_total = add(self.user_stake(&user), amount, "user stake")?;

        let id = self.positions.len() as u64;
        self.positions.push(DurationPosition {
            id,
            owner: user,
            amount,
            start_time: now,
            duration,
            reward_rate,
            accumulated_rewards: 0,
            last_reward_calculation: now,
            active: true,
            closed_at: None,
        });
        self.user_positions.get_or_insert_with(user, Vec::new).push(id);
        self.user_staked.insert(user, user_total);
        self.total_staked = total_staked;

        debug!(user = %user, position = id, %amount, duration, reward_rate, "duration stake opened");
        self.emit(EventKind::StakeOpened {
            owner: user,
            position: id,
            amount,
            at: now,
        });
        Ok(id)
    }

    /// Reward a position would accrue between its last calculation and `now`.
    pub fn accrual_since_last(
        &self,
        position: &DurationPosition,
        now: Timestamp,
    ) -> Result<Amount, FierceError> {
        let cutoff = position
            .start_time
            .checked_add(position.duration)
            .and_then(|t| t.checked_add(self.max_accrual_grace))
            .unwrap_or(Timestamp::MAX);
        let effective = now.min(cutoff);
        if effective <= position.last_reward_calculation {
            return Ok(0);
        }
        let elapsed = (effective - position.last_reward_calculation) as Amount;

        // Multiply before dividing; elapsed is bounded by duration + grace.
        let weighted = position
            .amount
            .checked_mul(elapsed)
            .ok_or_else(|| FierceError::overflow("amount * elapsed"))?;
        let denominator = (YEAR_SECONDS as Amount) * (self.rate_scale as Amount);
        mul_div(weighted, position.reward_rate as Amount, denominator)
    }

    /// Bring a position's accumulated reward up to `now`. Returns the newly
    /// accrued amount; zero when nothing has elapsed or the cutoff passed.
    pub fn accrue(
        &mut self,
        user: &Principal,
        position_id: u64,
        now: Timestamp,
    ) -> Result<Amount, FierceError> {
        let index = self.owned_active(user, position_id)?;
        self.accrue_index(index, now)
    }

    fn accrue_index(&mut self, index: usize, now: Timestamp) -> Result<Amount, FierceError> {
        let position = &self.positions[index];
        let accrued = self.accrual_since_last(position, now)?;
        if accrued == 0 && now <= position.last_reward_calculation {
            return Ok(0);
        }
        let accumulated = add(position.accumulated_rewards, accrued, "accumulated rewards")?;

        let position = self.position_mut(index)?;
        position.accumulated_rewards = accumulated;
        position.last_reward_calculation = now.max(position.last_reward_calculation);
        Ok(accrued)
    }

    /// Total reward a position would pay if unstaked at `now`.
    pub fn pending_rewards(
        &self,
        user: &Principal,
        position_id: u64,
        now: Timestamp,
    ) -> Result<Amount, FierceError> {
        let index = self.owned_active(user, position_id)?;
        let position = &self.positions[index];
        add(
            position.accumulated_rewards,
            self.accrual_since_last(position, now)?,
            "pending rewards",
        )
    }

    /// Close a matured position, paying principal plus accumulated reward.
    ///
    /// # Errors
    /// - `StateConflict` before maturity.
    /// - `InsufficientFunding` when the reward pool cannot pay; nothing changes.
    pub fn unstake(
        &mut self,
        user: &Principal,
        position_id: u64,
        now: Timestamp,
    ) -> Result<DurationPayout, FierceError> {
        let index = self.owned_active(user, position_id)?;
        let position = &self.positions[index];
        let matures_at = position.matures_at().unwrap_or(Timestamp::MAX);
        if now < matures_at {
            return Err(FierceError::StateConflict(format!(
                "position {} matures at {} (now {})",
                position_id, matures_at, now
            )));
        }
        let reward = add(
            position.accumulated_rewards,
            self.accrual_since_last(position, now)?,
            "unstake reward",
        )?;
        if reward > self.reward_pool {
            return Err(FierceError::InsufficientFunding {
                required: reward,
                available: self.reward_pool,
            });
        }

        self.accrue_index(index, now)?;
        let principal = self.positions[index].amount;
        let total_paid = add(self.total_rewards_paid, reward, "rewards paid")?;
        self.close(index, now)?;
        self.position_mut(index)?.accumulated_rewards = 0;
        self.reward_pool -= reward;
        self.total_rewards_paid = total_paid;

        debug!(user = %user, position = position_id, %principal, %reward, "duration stake closed");
        self.emit(EventKind::StakeClosed {
            owner: *user,
            position: position_id,
            principal,
            reward,
            at: now,
        });
        Ok(DurationPayout { principal, reward })
    }

    /// Close a position at any time, returning principal only. Accumulated
    /// reward and anything accrued since the last calculation are forfeited,
    /// never paid.
    pub fn emergency_unstake(
        &mut self,
        user: &Principal,
        position_id: u64,
        now: Timestamp,
    ) -> Result<Amount, FierceError> {
        let index = self.owned_active(user, position_id)?;
        let position = &self.positions[index];
        let forfeited = add(
            position.accumulated_rewards,
            self.accrual_since_last(position, now)?,
            "forfeited position reward",
        )?;
        let principal = position.amount;
        let total_forfeited = add(self.total_forfeited, forfeited, "forfeited rewards")?;

        self.close(index, now)?;
        let position = self.position_mut(index)?;
        position.accumulated_rewards = 0;
        position.last_reward_calculation = now.max(position.last_reward_calculation);
        self.total_forfeited = total_forfeited;

        warn!(user = %user, position = position_id, %forfeited, "emergency unstake");
        self.emit(EventKind::StakeClosed {
            owner: *user,
            position: position_id,
            principal,
            reward: 0,
            at: now,
        });
        Ok(principal)
    }

    fn close(&mut self, index: usize, now: Timestamp) -> Result<(), FierceError> {
        let owner = self.positions[index].owner;
        let amount = self.positions[index].amount;
        let total_staked = sub(self.total_staked, amount, "total staked")?;
        let user_total = sub(self.user_stake(&owner), amount, "user stake")?;

        let position = self.position_mut(index)?;
        position.active = false;
        position.closed_at = Some(now);
        self.user_staked.insert(owner, user_total);
        self.total_staked = total_staked;
        Ok(())
    }

    fn owned_active(&self, user: &Principal, position_id: u64) -> Result<usize, FierceError> {
        let index = position_id as usize;
        let position = self
            .positions
            .get(index)
            .ok_or_else(|| FierceError::NotFound(format!("duration position {}", position_id)))?;
        if position.owner != *user {
            return Err(FierceError::InvalidInput(format!(
                "position {} is not owned by {}",
                position_id, user
            )));
        }
        if !position.active {
            return Err(FierceError::StateConflict(format!(
                "position {} is already unstaked",
                position_id
            )));
        }
        Ok(index)
    }

    fn position_mut(&mut self, index: usize) -> Result<&mut DurationPosition, FierceError> {
        self.positions
            .get_mut(index)
            .ok_or_else(|| FierceError::NotFound(format!("duration position {}", index)))
    }

    fn emit(&mut self, kind: EventKind) {
        self.events.push(LedgerEvent::new(kind));
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    pub fn position(&self, position_id: u64) -> Option<&DurationPosition> {
        self.positions.get(position_id as usize)
    }

    pub fn positions(&self) -> &[DurationPosition] {
        &self.positions
    }

    pub fn positions_of<'a>(
        &'a self,
        user: &Principal,
    ) -> impl Iterator<Item = &'a DurationPosition> + 'a {
        self.user_positions
            .get(user)
            .into_iter()
            .flatten()
            .map(move |id| &self.positions[*id as usize])
    }

    pub fn reward_pool(&self) -> Amount {
        self.reward_pool
    }

    pub fn total_rewards_paid(&self) -> Amount {
        self.total_rewards_paid
    }

    pub fn total_forfeited(&self) -> Amount {
        self.total_forfeited
    }

    /// Verify that tracked totals match the active positions.
    pub fn check_invariants(&self) -> Result<(), FierceError> {
        let mut sum: Amount = 0;
        let mut per_user: HashMap<Principal, Amount> = HashMap::new();
        for p in self.positions.iter().filter(|p| p.active) {
            sum = add(sum, p.amount, "active principal")?;
            let entry = per_user.entry(p.owner).or_insert(0);
            *entry = add(*entry, p.amount, "user principal")?;
        }
        if sum != self.total_staked {
            return Err(FierceError::StateConflict(format!(
                "active principal {} != total staked {}",
                sum, self.total_staked
            )));
        }
        for (user, tracked) in self.user_staked.iter() {
            if per_user.get(user).copied().unwrap_or(0) != *tracked {
                return Err(FierceError::StateConflict(format!(
                    "user {} stake drifted from its positions",
                    user
                )));
            }
        }
        Ok(())
    }
}

impl StakeBackend for DurationStakeLedger {
    fn total_staked(&self) -> Amount {
        self.total_staked
    }

    fn user_stake(&self, user: &Principal) -> Amount {
        self.user_staked.get(user).copied().unwrap_or(0)
    }
}

impl EventSource for DurationStakeLedger {
    fn take_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Ledger counters and container log positions at the start of a transaction.
#[derive(Debug, Clone, Copy)]
pub struct DurationCheckpoint {
    total_staked: Amount,
    reward_pool: Amount,
    total_rewards_paid: Amount,
    total_forfeited: Amount,
    rates: usize,
    pending_rates: usize,
    positions: usize,
    user_positions: usize,
    user_staked: usize,
    events: usize,
}

impl Journaled for DurationStakeLedger {
    type Checkpoint = DurationCheckpoint;

    fn checkpoint(&mut self) -> DurationCheckpoint {
        DurationCheckpoint {
            total_staked: self.total_staked,
            reward_pool: self.reward_pool,
            total_rewards_paid: self.total_rewards_paid,
            total_forfeited: self.total_forfeited,
            rates: self.rates.begin(),
            pending_rates: self.pending_rates.begin(),
            positions: self.positions.begin(),
            user_positions: self.user_positions.begin(),
            user_staked: self.user_staked.begin(),
            events: self.events.len(),
        }
    }

    fn rollback(&mut self, cp: DurationCheckpoint) {
        self.total_staked = cp.total_staked;
        self.reward_pool = cp.reward_pool;
        self.total_rewards_paid = cp.total_rewards_paid;
        self.total_forfeited = cp.total_forfeited;
        self.rates.rollback(cp.rates);
        self.pending_rates.rollback(cp.pending_rates);
        self.positions.rollback(cp.positions);
        self.user_positions.rollback(cp.user_positions);
        self.user_staked.rollback(cp.user_staked);
        self.events.truncate(cp.events);
    }

    fn commit(&mut self) {
        self.rates.commit();
        self.pending_rates.commit();
        self.positions.commit();
        self.user_positions.commit();
        self.user_staked.commit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateTier;

    const DAY: u64 = 24 * 60 * 60;
    const YEAR: u64 = YEAR_SECONDS;

    fn alice() -> Principal {
        Principal::from_label("alice")
    }

    fn make_ledger() -> DurationStakeLedger {
        let config = DurationConfig {
            min_stake: 100,
            rate_scale: 10_000,
            max_accrual_grace: 10 * DAY,
            rate_change_delay: DAY,
            tiers: vec![
                RateTier { duration: 30 * DAY, rate: 1_000 },
                RateTier { duration: YEAR, rate: 2_000 },
            ],
        };
        let mut ledger = DurationStakeLedger::new(&config).unwrap();
        ledger.fund_rewards(1_000_000_000).unwrap();
        ledger
    }

    #[test]
    fn test_stake_unknown_tier_rejected() {
        let mut ledger = make_ledger();
        assert!(matches!(
            ledger.stake(alice(), 1_000, 7 * DAY, 0),
            Err(FierceError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_stake_below_minimum_rejected() {
        let mut ledger = make_ledger();
        assert!(ledger.stake(alice(), 99, YEAR, 0).is_err());
        assert_eq!(ledger.total_staked(), 0);
    }

    #[test]
    fn test_full_year_accrual() {
        let mut ledger = make_ledger();
        let id = ledger.stake(alice(), 1_000_000, YEAR, 0).unwrap();
        // 20% APR over one year.
        assert_eq!(ledger.pending_rewards(&alice(), id, YEAR).unwrap(), 200_000);
        let payout = ledger.unstake(&alice(), id, YEAR).unwrap();
        assert_eq!(payout.principal, 1_000_000);
        assert_eq!(payout.reward, 200_000);
        assert_eq!(ledger.total_rewards_paid(), 200_000);
        ledger.check_invariants().unwrap();
    }

    #[test]
    fn test_accrual_stops_after_grace() {
        let mut ledger = make_ledger();
        let id = ledger.stake(alice(), 1_000_000, YEAR, 0).unwrap();
        let at_cutoff = ledger
            .pending_rewards(&alice(), id, YEAR + 10 * DAY)
            .unwrap();
        let much_later = ledger
            .pending_rewards(&alice(), id, YEAR + 400 * DAY)
            .unwrap();
        assert_eq!(at_cutoff, much_later);
        assert!(at_cutoff > 200_000);
    }

    #[test]
    fn test_accrue_is_noop_without_elapsed_time() {
        let mut ledger = make_ledger();
        let id = ledger.stake(alice(), 1_000_000, YEAR, 100).unwrap();
        assert_eq!(ledger.accrue(&alice(), id, 100).unwrap(), 0);
        assert_eq!(ledger.accrue(&alice(), id, 50).unwrap(), 0);
        assert!(ledger.accrue(&alice(), id, 100 + YEAR / 2).unwrap() > 0);
        assert_eq!(ledger.accrue(&alice(), id, 100 + YEAR / 2).unwrap(), 0);
    }

    #[test]
    fn test_unstake_before_maturity_conflicts() {
        let mut ledger = make_ledger();
        let id = ledger.stake(alice(), 1_000, 30 * DAY, 0).unwrap();
        assert!(matches!(
            ledger.unstake(&alice(), id, 29 * DAY),
            Err(FierceError::StateConflict(_))
        ));
        assert!(ledger.position(id).unwrap().active);
    }

    #[test]
    fn test_rate_snapshot_at_open() {
        let mut ledger = make_ledger();
        let id = ledger.stake(alice(), 1_000_000, YEAR, 0).unwrap();
        ledger.set_rate(YEAR, 5_000).unwrap();
        assert_eq!(ledger.position(id).unwrap().reward_rate, 2_000);
        assert_eq!(ledger.pending_rewards(&alice(), id, YEAR).unwrap(), 200_000);
    }

    #[test]
    fn test_emergency_unstake_forfeits_rewards() {
        let mut ledger = make_ledger();
        let id = ledger.stake(alice(), 1_000_000, YEAR, 0).unwrap();
        ledger.accrue(&alice(), id, YEAR / 2).unwrap();
        let accrued = ledger.position(id).unwrap().accumulated_rewards;
        assert!(accrued > 0);

        let principal = ledger.emergency_unstake(&alice(), id, YEAR / 2).unwrap();
        assert_eq!(principal, 1_000_000);
        assert_eq!(ledger.position(id).unwrap().accumulated_rewards, 0);
        assert_eq!(ledger.total_forfeited(), accrued);
        assert_eq!(ledger.total_rewards_paid(), 0);
        assert!(ledger.emergency_unstake(&alice(), id, YEAR).is_err());
    }

    #[test]
    fn test_emergency_unstake_counts_unaccrued_reward_as_forfeited() {
        let mut ledger = make_ledger();
        let id = ledger.stake(alice(), 1_000_000, YEAR, 0).unwrap();
        assert_eq!(ledger.accrue(&alice(), id, YEAR / 2).unwrap(), 100_000);

        ledger.emergency_unstake(&alice(), id, YEAR / 4 * 3).unwrap();
        assert_eq!(ledger.total_forfeited(), 150_000);
        assert_eq!(ledger.reward_pool(), 1_000_000_000);
    }

    #[test]
    fn test_rollback_restores_closed_position() {
        let mut ledger = make_ledger();
        let id = ledger.stake(alice(), 1_000_000, YEAR, 0).unwrap();
        ledger.take_events();

        let cp = ledger.checkpoint();
        ledger.unstake(&alice(), id, YEAR).unwrap();
        ledger.stake(alice(), 500, 30 * DAY, YEAR).unwrap();
        ledger.rollback(cp);
        ledger.commit();

        assert!(ledger.position(id).unwrap().active);
        assert_eq!(ledger.positions().len(), 1);
        assert_eq!(ledger.total_staked(), 1_000_000);
        assert_eq!(ledger.reward_pool(), 1_000_000_000);
        assert!(ledger.take_events().is_empty());
        ledger.check_invariants().unwrap();
        assert_eq!(ledger.unstake(&alice(), id, YEAR).unwrap().reward, 200_000);
    }

    #[test]
    fn test_unstake_with_empty_reward_pool() {
        let config = DurationConfig {
            min_stake: 1,
            tiers: vec![RateTier { duration: YEAR, rate: 1_000 }],
            ..DurationConfig::default()
        };
        let mut ledger = DurationStakeLedger::new(&config).unwrap();
        let id = ledger.stake(alice(), 1_000_000, YEAR, 0).unwrap();
        assert!(matches!(
            ledger.unstake(&alice(), id, YEAR),
            Err(FierceError::InsufficientFunding { .. })
        ));
        assert!(ledger.position(id).unwrap().active);
        ledger.fund_rewards(100_000).unwrap();
        assert_eq!(ledger.unstake(&alice(), id, YEAR).unwrap().reward, 100_000);
        assert_eq!(ledger.reward_pool(), 0);
    }

    #[test]
    fn test_timelocked_rate_change() {
        let mut ledger = make_ledger();
        let eligible = ledger.queue_rate_change(7 * DAY, 300, 1_000).unwrap();
        assert_eq!(eligible, 1_000 + DAY);
        assert!(ledger.apply_rate_change(7 * DAY, 1_000).is_err());
        assert!(ledger.rate_for(7 * DAY).is_none());
        assert_eq!(ledger.apply_rate_change(7 * DAY, eligible).unwrap(), 300);
        assert_eq!(ledger.rate_for(7 * DAY), Some(300));
        assert!(ledger.pending_rate_change(7 * DAY).is_none());
    }

    #[test]
    fn test_zero_rate_disables_tier() {
        let mut ledger = make_ledger();
        ledger.set_rate(YEAR, 0).unwrap();
        assert!(ledger.stake(alice(), 1_000, YEAR, 0).is_err());
    }

    #[test]
    fn test_large_amount_accrual_does_not_overflow() {
        let mut ledger = make_ledger();
        let amount: Amount = 10u128.pow(30);
        let id = ledger.stake(alice(), amount, YEAR, 0).unwrap();
        let reward = ledger.pending_rewards(&alice(), id, YEAR).unwrap();
        assert_eq!(reward, amount / 5);
    }
}
