// crates/fierce-ledger/src/pool.rs
//
// Block-emission stake pool: a global reward-per-share accumulator and
// per-position reward debts.
//
// Every position earns `amount * (acc - acc_at_last_settlement)` without the
// pool ever iterating over other positions. The scheduler update is always
// applied before any operation reads or changes `total_staked`; reversing
// that order would credit the elapsed emission to the wrong stake.
//
// Positions are append-only: a closed position keeps its final state and its
// id is never reused.
//
// Reward funding is tracked as `total_funded`; the funding available to the
// scheduler is `total_funded - total_distributed`, so the accumulator can
// never promise more than was funded.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fierce_core::{
    Amount, EventKind, FierceError, LedgerEvent, Principal, StakeBackend, Step,
};

use crate::config::PoolConfig;
use crate::emission::{EmissionOutcome, EmissionScheduler, EmissionWindow};
use crate::fixed_point::{add, sub, Precision};
use crate::journal::{Journaled, JournaledMap, JournaledVec};
use crate::vault::EventSource;

/// A single stake in the emission pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub owner: Principal,
    pub amount: Amount,
    /// Accumulated reward (at pool precision) already accounted for.
    pub reward_debt: Amount,
    pub opened_at: Step,
    pub closed_at: Option<Step>,
    pub active: bool,
}

/// Amounts released by closing a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub principal: Amount,
    pub reward: Amount,
}

impl Withdrawal {
    pub fn total(&self) -> Result<Amount, FierceError> {
        add(self.principal, self.reward, "withdrawal total")
    }
}

/// Result of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub amount: Amount,
    /// Position opened with the claimed amount when auto-compounding.
    pub compounded_into: Option<u64>,
}

/// Point-in-time view of the pool counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub total_staked: Amount,
    pub acc_reward_per_share: Amount,
    pub last_update_step: Step,
    pub total_emitted: Amount,
    pub total_distributed: Amount,
    pub missed_emission: Amount,
    pub total_funded: Amount,
    pub total_paid: Amount,
    pub forfeited_rewards: Amount,
    pub open_positions: usize,
}

/// The emission pool.
#[derive(Debug, Clone)]
pub struct StakePool {
    precision: Precision,
    min_stake: Amount,
    scheduler: EmissionScheduler,
    total_staked: Amount,
    acc_reward_per_share: Amount,
    total_funded: Amount,
    total_paid: Amount,
    forfeited_rewards: Amount,
    positions: JournaledVec<Position>,
    user_positions: JournaledMap<Principal, Vec<u64>>,
    user_staked: JournaledMap<Principal, Amount>,
    /// Settled but unpaid reward per user.
    pending: JournaledMap<Principal, Amount>,
    events: Vec<LedgerEvent>,
}

impl StakePool {
    pub fn new(config: &PoolConfig) -> Result<Self, FierceError> {
        Ok(Self {
            precision: Precision::new(config.precision)?,
            min_stake: config.min_stake,
            scheduler: EmissionScheduler::new(config.minimum_initial_funding),
            total_staked: 0,
            acc_reward_per_share: 0,
            total_funded: 0,
            total_paid: 0,
            forfeited_rewards: 0,
            positions: JournaledVec::new(),
            user_positions: JournaledMap::new(),
            user_staked: JournaledMap::new(),
            pending: JournaledMap::new(),
            events: Vec::new(),
        })
    }

    // -----------------------------------------------------------------------
    // Funding and emission
    // -----------------------------------------------------------------------

    /// Open the emission window and record its initial funding.
    pub fn start_emission(
        &mut self,
        current_step: Step,
        duration_steps: u64,
        rate_per_step: Amount,
        initial_funding: Amount,
    ) -> Result<EmissionWindow, FierceError> {
        let total_funded = add(self.total_funded, initial_funding, "total funded")?;
        let window =
            self.scheduler
                .start_window(current_step, duration_steps, rate_per_step, initial_funding)?;
        self.total_funded = total_funded;

        info!(
            start = window.start_step,
            end = window.end_step,
            rate = %window.rate_per_step,
            funding = %initial_funding,
            "emission window started"
        );
        self.emit(EventKind::EmissionStarted {
            start_step: window.start_step,
            end_step: window.end_step,
            rate_per_step: window.rate_per_step,
            initial_funding,
        });
        Ok(window)
    }

    /// Add reward funding. Returns the new cumulative funding.
    pub fn fund(&mut self, amount: Amount) -> Result<Amount, FierceError> {
        if amount == 0 {
            return Err(FierceError::InvalidInput(
                "funding amount must be nonzero".to_string(),
            ));
        }
        self.total_funded = add(self.total_funded, amount, "total funded")?;
        self.emit(EventKind::RewardsFunded {
            amount,
            total_funded: self.total_funded,
        });
        Ok(self.total_funded)
    }

    /// Funding not yet credited to the accumulator.
    pub fn available_funding(&self) -> Result<Amount, FierceError> {
        sub(
            self.total_funded,
            self.scheduler.total_distributed(),
            "available funding",
        )
    }

    /// Apply the scheduler up to `current_step` and grow the accumulator.
    pub fn update(&mut self, current_step: Step) -> Result<EmissionOutcome, FierceError> {
        let available = self.available_funding()?;
        let outcome = self
            .scheduler
            .preview(current_step, self.total_staked, available)?;
        if outcome.is_noop() {
            return Ok(outcome);
        }

        let acc = if outcome.actual > 0 {
            let delta = self
                .precision
                .per_share_delta(outcome.actual, self.total_staked)?;
            add(self.acc_reward_per_share, delta, "accumulator")?
        } else {
            self.acc_reward_per_share
        };
        self.scheduler
            .update(current_step, self.total_staked, available)?;
        self.acc_reward_per_share = acc;

        debug!(
            step = outcome.reached,
            reward = %outcome.actual,
            acc = %acc,
            "pool updated"
        );
        self.emit(EventKind::PoolUpdated {
            step: outcome.reached,
            reward: outcome.actual,
            acc_reward_per_share: acc,
        });
        if outcome.shortfall > 0 {
            warn!(
                step = outcome.reached,
                theoretical = %outcome.theoretical,
                actual = %outcome.actual,
                shortfall = %outcome.shortfall,
                "emission exceeded available funding"
            );
            self.emit(EventKind::FundingShortfall {
                step: outcome.reached,
                theoretical: outcome.theoretical,
                actual: outcome.actual,
                shortfall: outcome.shortfall,
            });
        }
        Ok(outcome)
    }

    /// Accumulator value as it would be after `update(current_step)`.
    pub fn projected_acc(&self, current_step: Step) -> Result<Amount, FierceError> {
        let outcome = self.scheduler.preview(
            current_step,
            self.total_staked,
            self.available_funding()?,
        )?;
        if outcome.actual == 0 {
            return Ok(self.acc_reward_per_share);
        }
        let delta = self
            .precision
            .per_share_delta(outcome.actual, self.total_staked)?;
        add(self.acc_reward_per_share, delta, "accumulator")
    }

    /// Return funding that was never credited to the accumulator. Only
    /// allowed once the window has ended.
    pub fn withdraw_surplus(&mut self, current_step: Step) -> Result<Amount, FierceError> {
        match self.scheduler.window() {
            Some(w) if w.has_ended(current_step) => {}
            Some(w) => {
                return Err(FierceError::StateConflict(format!(
                    "emission window runs until step {}",
                    w.end_step
                )))
            }
            None => {
                return Err(FierceError::StateConflict(
                    "emission window not started".to_string(),
                ))
            }
        }
        self.update(current_step)?;
        let surplus = self.available_funding()?;
        if surplus > 0 {
            self.total_funded -= surplus;
            self.emit(EventKind::SurplusWithdrawn { amount: surplus });
        }
        Ok(surplus)
    }

    // -----------------------------------------------------------------------
    // Positions
    // -----------------------------------------------------------------------

    /// Open a position for `user`.
    ///
    /// Reward accrued by the user's existing positions is settled into the
    /// pending buffer first, so a deposit never forfeits earned reward.
    pub fn deposit(
        &mut self,
        user: Principal,
        amount: Amount,
        current_step: Step,
    ) -> Result<u64, FierceError> {
        validate_principal(&user)?;
        if amount < self.min_stake {
            return Err(FierceError::InvalidInput(format!(
                "stake {} is below the minimum of {}",
                amount, self.min_stake
            )));
        }

        self.update(current_step)?;
        self.settle_user(&user)?;
        self.open_position(user, amount, current_step)
    }

    /// Close a position and release its principal plus all settled reward.
    pub fn withdraw(
        &mut self,
        user: Principal,
        position_id: u64,
        current_step: Step,
    ) -> Result<Withdrawal, FierceError> {
        let index = self.owned_active(&user, position_id)?;
        self.update(current_step)?;

        let position = &self.positions[index];
        let accrued = self
            .precision
            .accrued(position.amount, self.acc_reward_per_share)?;
        let earned = sub(accrued, position.reward_debt, "position reward")?;
        let buffered = self.pending.get(&user).copied().unwrap_or(0);
        let reward = add(earned, buffered, "withdrawal reward")?;
        let principal = position.amount;

        let total_paid = add(self.total_paid, reward, "total paid")?;
        self.close_position(index, accrued, current_step)?;
        self.pending.remove(&user);
        self.total_paid = total_paid;

        debug!(user = %user, position = position_id, %principal, %reward, "position withdrawn");
        self.emit(EventKind::StakeClosed {
            owner: user,
            position: position_id,
            principal,
            reward,
            at: current_step,
        });
        Ok(Withdrawal { principal, reward })
    }

    /// Close a position returning principal only. The position's unsettled
    /// reward is forfeited; previously settled reward stays claimable.
    pub fn emergency_withdraw(
        &mut self,
        user: Principal,
        position_id: u64,
        current_step: Step,
    ) -> Result<Amount, FierceError> {
        let index = self.owned_active(&user, position_id)?;
        self.update(current_step)?;

        let position = &self.positions[index];
        let accrued = self
            .precision
            .accrued(position.amount, self.acc_reward_per_share)?;
        let forfeited = sub(accrued, position.reward_debt, "position reward")?;
        let principal = position.amount;

        let forfeited_total = add(self.forfeited_rewards, forfeited, "forfeited rewards")?;
        self.close_position(index, accrued, current_step)?;
        self.forfeited_rewards = forfeited_total;

        warn!(user = %user, position = position_id, %forfeited, "emergency withdrawal");
        self.emit(EventKind::StakeClosed {
            owner: user,
            position: position_id,
            principal,
            reward: 0,
            at: current_step,
        });
        Ok(principal)
    }

    /// Settle every active position of `user` and pay out (or restake) the
    /// total. Claiming twice at the same step yields zero the second time.
    pub fn claim(
        &mut self,
        user: Principal,
        current_step: Step,
        auto_compound: bool,
    ) -> Result<Claim, FierceError> {
        validate_principal(&user)?;
        let expected = self.pending_reward(&user, current_step)?;
        if auto_compound && expected > 0 && expected < self.min_stake {
            return Err(FierceError::InvalidInput(format!(
                "cannot compound {}: below the minimum stake of {}",
                expected, self.min_stake
            )));
        }

        self.update(current_step)?;
        self.settle_user(&user)?;
        let amount = self.pending.remove(&user).unwrap_or(0);
        debug_assert_eq!(amount, expected, "preview and settlement disagree");
        if amount == 0 {
            return Ok(Claim {
                amount: 0,
                compounded_into: None,
            });
        }

        self.total_paid = add(self.total_paid, amount, "total paid")?;
        self.emit(EventKind::RewardSettled {
            owner: user,
            amount,
            compounded: auto_compound,
        });

        let compounded_into = if auto_compound {
            Some(self.open_position(user, amount, current_step)?)
        } else {
            None
        };
        Ok(Claim {
            amount,
            compounded_into,
        })
    }

    /// Reward `user` would receive from a claim at `current_step`.
    ///
    /// Mirrors `update` + settlement without mutating the pool.
    pub fn pending_reward(&self, user: &Principal, current_step: Step) -> Result<Amount, FierceError> {
        let acc = self.projected_acc(current_step)?;
        let mut total = self.pending.get(user).copied().unwrap_or(0);
        for position in self.active_positions_of(user) {
            let accrued = self.precision.accrued(position.amount, acc)?;
            let earned = sub(accrued, position.reward_debt, "position reward")?;
            total = add(total, earned, "pending reward")?;
        }
        Ok(total)
    }

    /// Move accrued reward of all active positions of `user` into the
    /// pending buffer and reset their debts. Returns the amount settled.
    fn settle_user(&mut self, user: &Principal) -> Result<Amount, FierceError> {
        let ids = match self.user_positions.get(user) {
            Some(ids) => ids.clone(),
            None => return Ok(0),
        };

        let mut settled: Amount = 0;
        let mut new_debts = Vec::with_capacity(ids.len());
        for id in ids {
            let position = &self.positions[id as usize];
            if !position.active {
                continue;
            }
            let accrued = self
                .precision
                .accrued(position.amount, self.acc_reward_per_share)?;
            let earned = sub(accrued, position.reward_debt, "position reward")?;
            settled = add(settled, earned, "settled reward")?;
            new_debts.push((id as usize, accrued));
        }
        let buffered = add(
            self.pending.get(user).copied().unwrap_or(0),
            settled,
            "pending reward",
        )?;

        for (index, debt) in new_debts {
            if let Some(position) = self.positions.get_mut(index) {
                position.reward_debt = debt;
            }
        }
        if buffered > 0 {
            self.pending.insert(*user, buffered);
        }
        Ok(settled)
    }

    fn open_position(
        &mut self,
        user: Principal,
        amount: Amount,
        current_step: Step,
    ) -> Result<u64, FierceError> {
        let reward_debt = self.precision.accrued(amount, self.acc_reward_per_share)?;
        let total_staked = add(self.total_staked, amount, "total staked")?;
        let user_total = add(
            self.user_staked.get(&user).copied().unwrap_or(0),
            amount,
            "user stake",
        )?;

        let id = self.positions.len() as u64;
        self.positions.push(Position {
            id,
            owner: user,
            amount,
            reward_debt,
            opened_at: current_step,
            closed_at: None,
            active: true,
        });
        self.user_positions.get_or_insert_with(user, Vec::new).push(id);
        self.user_staked.insert(user, user_total);
        self.total_staked = total_staked;

        debug!(user = %user, position = id, %amount, "position opened");
        self.emit(EventKind::StakeOpened {
            owner: user,
            position: id,
            amount,
            at: current_step,
        });
        Ok(id)
    }

    /// Deactivate a position, updating both stake totals together.
    fn close_position(
        &mut self,
        index: usize,
        final_debt: Amount,
        current_step: Step,
    ) -> Result<(), FierceError> {
        let owner = self.positions[index].owner;
        let amount = self.positions[index].amount;
        let total_staked = sub(self.total_staked, amount, "total staked")?;
        let user_total = sub(
            self.user_staked.get(&owner).copied().unwrap_or(0),
            amount,
            "user stake",
        )?;

        let position = self
            .positions
            .get_mut(index)
            .ok_or_else(|| FierceError::NotFound(format!("position {}", index)))?;
        position.active = false;
        position.closed_at = Some(current_step);
        position.reward_debt = final_debt;
        self.user_staked.insert(owner, user_total);
        self.total_staked = total_staked;
        Ok(())
    }

    fn owned_active(&self, user: &Principal, position_id: u64) -> Result<usize, FierceError> {
        let index = position_id as usize;
        let position = self
            .positions
            .get(index)
            .ok_or_else(|| FierceError::NotFound(format!("position {}", position_id)))?;
        if position.owner != *user {
            return Err(FierceError::InvalidInput(format!(
                "position {} is not owned by {}",
                position_id, user
            )));
        }
        if !position.active {
            return Err(FierceError::StateConflict(format!(
                "position {} is already closed",
                position_id
            )));
        }
        Ok(index)
    }

    fn emit(&mut self, kind: EventKind) {
        self.events.push(LedgerEvent::new(kind));
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    pub fn position(&self, position_id: u64) -> Option<&Position> {
        self.positions.get(position_id as usize)
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn positions_of<'a>(&'a self, user: &Principal) -> impl Iterator<Item = &'a Position> + 'a {
        self.user_positions
            .get(user)
            .into_iter()
            .flatten()
            .map(move |id| &self.positions[*id as usize])
    }

    pub fn active_positions_of<'a>(
        &'a self,
        user: &Principal,
    ) -> impl Iterator<Item = &'a Position> + 'a {
        self.positions_of(user).filter(|p| p.active)
    }

    pub fn total_staked(&self) -> Amount {
        self.total_staked
    }

    pub fn acc_reward_per_share(&self) -> Amount {
        self.acc_reward_per_share
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn min_stake(&self) -> Amount {
        self.min_stake
    }

    pub fn scheduler(&self) -> &EmissionScheduler {
        &self.scheduler
    }

    pub fn buffered_reward(&self, user: &Principal) -> Amount {
        self.pending.get(user).copied().unwrap_or(0)
    }

    pub fn total_funded(&self) -> Amount {
        self.total_funded
    }

    pub fn total_paid(&self) -> Amount {
        self.total_paid
    }

    pub fn forfeited_rewards(&self) -> Amount {
        self.forfeited_rewards
    }

    /// Undo records held by the open transaction, if any.
    pub fn pending_undo(&self) -> usize {
        self.positions.pending_undo()
            + self.user_positions.pending_undo()
            + self.user_staked.pending_undo()
            + self.pending.pending_undo()
    }

    pub fn summary(&self) -> PoolSummary {
        PoolSummary {
            total_staked: self.total_staked,
            acc_reward_per_share: self.acc_reward_per_share,
            last_update_step: self.scheduler.last_update_step(),
            total_emitted: self.scheduler.total_emitted(),
            total_distributed: self.scheduler.total_distributed(),
            missed_emission: self.scheduler.missed_emission(),
            total_funded: self.total_funded,
            total_paid: self.total_paid,
            forfeited_rewards: self.forfeited_rewards,
            open_positions: self.positions.iter().filter(|p| p.active).count(),
        }
    }

    /// Verify the pool's accounting invariants.
    ///
    /// - active principal sums to `total_staked`, globally and per user
    /// - `total_distributed <= total_emitted`
    /// - `total_distributed <= total_funded`
    pub fn check_invariants(&self) -> Result<(), FierceError> {
        let mut per_user: HashMap<Principal, Amount> = HashMap::new();
        let mut active_sum: Amount = 0;
        for position in self.positions.iter().filter(|p| p.active) {
            active_sum = add(active_sum, position.amount, "active principal")?;
            let entry = per_user.entry(position.owner).or_insert(0);
            *entry = add(*entry, position.amount, "user principal")?;
        }
        if active_sum != self.total_staked {
            return Err(FierceError::StateConflict(format!(
                "active principal {} != total staked {}",
                active_sum, self.total_staked
            )));
        }
        for (user, tracked) in self.user_staked.iter() {
            let actual = per_user.get(user).copied().unwrap_or(0);
            if actual != *tracked {
                return Err(FierceError::StateConflict(format!(
                    "user {} tracked stake {} != active principal {}",
                    user, tracked, actual
                )));
            }
        }
        if self.scheduler.total_distributed() > self.scheduler.total_emitted() {
            return Err(FierceError::StateConflict(
                "distributed exceeds emitted".to_string(),
            ));
        }
        if self.scheduler.total_distributed() > self.total_funded {
            return Err(FierceError::StateConflict(
                "distributed exceeds funding".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_principal(user: &Principal) -> Result<(), FierceError> {
    if user.is_zero() {
        return Err(FierceError::InvalidInput("zero principal".to_string()));
    }
    Ok(())
}

impl StakeBackend for StakePool {
    fn total_staked(&self) -> Amount {
        self.total_staked
    }

    fn user_stake(&self, user: &Principal) -> Amount {
        self.user_staked.get(user).copied().unwrap_or(0)
    }
}

impl EventSource for StakePool {
    fn take_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Pool counters and container log positions at the start of a transaction.
#[derive(Debug, Clone)]
pub struct PoolCheckpoint {
    scheduler: EmissionScheduler,
    total_staked: Amount,
    acc_reward_per_share: Amount,
    total_funded: Amount,
    total_paid: Amount,
    forfeited_rewards: Amount,
    positions: usize,
    user_positions: usize,
    user_staked: usize,
    pending: usize,
    events: usize,
}

impl Journaled for StakePool {
    type Checkpoint = PoolCheckpoint;

    fn checkpoint(&mut self) -> PoolCheckpoint {
        PoolCheckpoint {
            scheduler: self.scheduler.clone(),
            total_staked: self.total_staked,
            acc_reward_per_share: self.acc_reward_per_share,
            total_funded: self.total_funded,
            total_paid: self.total_paid,
            forfeited_rewards: self.forfeited_rewards,
            positions: self.positions.begin(),
            user_positions: self.user_positions.begin(),
            user_staked: self.user_staked.begin(),
            pending: self.pending.begin(),
            events: self.events.len(),
        }
    }

    fn rollback(&mut self, cp: PoolCheckpoint) {
        self.scheduler = cp.scheduler;
        self.total_staked = cp.total_staked;
        self.acc_reward_per_share = cp.acc_reward_per_share;
        self.total_funded = cp.total_funded;
        self.total_paid = cp.total_paid;
        self.forfeited_rewards = cp.forfeited_rewards;
        self.positions.rollback(cp.positions);
        self.user_positions.rollback(cp.user_positions);
        self.user_staked.rollback(cp.user_staked);
        self.pending.rollback(cp.pending);
        self.events.truncate(cp.events);
    }

    fn commit(&mut self) {
        self.positions.commit();
        self.user_positions.commit();
        self.user_staked.commit();
        self.pending.commit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed_point::POOL_PRECISION;
    use proptest::prelude::*;

    const P: Amount = 1_000_000_000_000;

    fn alice() -> Principal {
        Principal::from_label("alice")
    }

    fn bob() -> Principal {
        Principal::from_label("bob")
    }

    fn small_config() -> PoolConfig {
        PoolConfig {
            precision: POOL_PRECISION.scale(),
            min_stake: 10,
            minimum_initial_funding: 10,
        }
    }

    /// Pool with a window starting at step 0.
    fn make_pool(rate: Amount, duration: u64, funding: Amount) -> StakePool {
        let mut pool = StakePool::new(&small_config()).unwrap();
        pool.start_emission(0, duration, rate, funding).unwrap();
        pool
    }

    #[test]
    fn test_deposit_below_minimum() {
        let mut pool = make_pool(10, 100, 1_000);
        assert!(matches!(
            pool.deposit(alice(), 9, 0),
            Err(FierceError::InvalidInput(_))
        ));
        assert_eq!(pool.total_staked(), 0);
    }

    #[test]
    fn test_deposit_zero_principal() {
        let mut pool = make_pool(10, 100, 1_000);
        assert!(pool.deposit(Principal::ZERO, 100, 0).is_err());
    }

    #[test]
    fn test_emission_shortfall_scenario() {
        let mut pool = make_pool(10, 100, 45);
        pool.deposit(alice(), 100, 0).unwrap();

        let outcome = pool.update(10).unwrap();
        assert_eq!(outcome.theoretical, 100);
        assert_eq!(outcome.actual, 45);
        assert_eq!(outcome.shortfall, 55);
        assert_eq!(pool.acc_reward_per_share(), 45 * P / 100);
        assert_eq!(pool.scheduler().missed_emission(), 55);
        assert_eq!(pool.pending_reward(&alice(), 10).unwrap(), 45);
    }

    #[test]
    fn test_single_staker_earns_full_emission() {
        let mut pool = make_pool(10, 100, 10_000);
        let id = pool.deposit(alice(), 100, 0).unwrap();
        let w = pool.withdraw(alice(), id, 50).unwrap();
        assert_eq!(w.principal, 100);
        assert_eq!(w.reward, 500);
        assert_eq!(pool.total_staked(), 0);
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_two_stakers_split_proportionally() {
        let mut pool = make_pool(10, 100, 10_000);
        let a = pool.deposit(alice(), 100, 0).unwrap();
        let b = pool.deposit(bob(), 300, 0).unwrap();
        assert_eq!(pool.withdraw(alice(), a, 40).unwrap().reward, 100);
        assert_eq!(pool.withdraw(bob(), b, 40).unwrap().reward, 300);
    }

    #[test]
    fn test_late_staker_does_not_earn_past_emission() {
        let mut pool = make_pool(10, 100, 10_000);
        pool.deposit(alice(), 100, 0).unwrap();
        let b = pool.deposit(bob(), 100, 20).unwrap();
        // Steps 0..20 belong to alice alone; 20..30 are split.
        assert_eq!(pool.pending_reward(&alice(), 30).unwrap(), 250);
        assert_eq!(pool.withdraw(bob(), b, 30).unwrap().reward, 50);
    }

    #[test]
    fn test_second_deposit_settles_existing_reward() {
        let mut pool = make_pool(10, 100, 10_000);
        let first = pool.deposit(alice(), 100, 0).unwrap();
        pool.deposit(alice(), 100, 10).unwrap();
        assert_eq!(pool.buffered_reward(&alice()), 100);
        assert_eq!(pool.position(first).unwrap().reward_debt, 100);

        // Withdrawing the first position pays its own accrual plus the buffer.
        let w = pool.withdraw(alice(), first, 20).unwrap();
        assert_eq!(w.reward, 100 + 50);
        assert_eq!(pool.buffered_reward(&alice()), 0);
        assert_eq!(pool.pending_reward(&alice(), 20).unwrap(), 50);
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_withdraw_closed_position_conflicts() {
        let mut pool = make_pool(10, 100, 10_000);
        let id = pool.deposit(alice(), 100, 0).unwrap();
        pool.withdraw(alice(), id, 5).unwrap();
        assert!(matches!(
            pool.withdraw(alice(), id, 6),
            Err(FierceError::StateConflict(_))
        ));
    }

    #[test]
    fn test_withdraw_foreign_position_rejected() {
        let mut pool = make_pool(10, 100, 10_000);
        let id = pool.deposit(alice(), 100, 0).unwrap();
        assert!(matches!(
            pool.withdraw(bob(), id, 5),
            Err(FierceError::InvalidInput(_))
        ));
        assert!(matches!(
            pool.withdraw(alice(), 99, 5),
            Err(FierceError::NotFound(_))
        ));
    }

    #[test]
    fn test_claim_twice_pays_once() {
        let mut pool = make_pool(10, 100, 10_000);
        pool.deposit(alice(), 100, 0).unwrap();
        assert_eq!(pool.claim(alice(), 10, false).unwrap().amount, 100);
        assert_eq!(pool.claim(alice(), 10, false).unwrap().amount, 0);
        assert_eq!(pool.total_paid(), 100);
    }

    #[test]
    fn test_claim_auto_compound_opens_position() {
        let mut pool = make_pool(10, 100, 10_000);
        pool.deposit(alice(), 100, 0).unwrap();
        let claim = pool.claim(alice(), 10, true).unwrap();
        assert_eq!(claim.amount, 100);
        let id = claim.compounded_into.unwrap();
        assert_eq!(pool.position(id).unwrap().amount, 100);
        assert_eq!(pool.total_staked(), 200);
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_auto_compound_below_minimum_rejected_without_mutation() {
        let mut pool = make_pool(1, 100, 10_000);
        pool.deposit(alice(), 100, 0).unwrap();
        let before = pool.summary();
        assert!(pool.claim(alice(), 5, true).is_err());
        assert_eq!(pool.summary(), before);
    }

    #[test]
    fn test_emergency_withdraw_forfeits_unsettled_reward() {
        let mut pool = make_pool(10, 100, 10_000);
        let first = pool.deposit(alice(), 100, 0).unwrap();
        pool.deposit(alice(), 100, 10).unwrap();
        let principal = pool.emergency_withdraw(alice(), first, 20).unwrap();
        assert_eq!(principal, 100);
        assert_eq!(pool.forfeited_rewards(), 50);
        // The buffer from the second deposit survives.
        assert_eq!(pool.buffered_reward(&alice()), 100);
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_withdrawing_last_active_position_keeps_totals_consistent() {
        let mut pool = make_pool(10, 100, 10_000);
        let a = pool.deposit(alice(), 100, 0).unwrap();
        let b = pool.deposit(alice(), 50, 1).unwrap();
        pool.withdraw(alice(), a, 2).unwrap();
        pool.withdraw(alice(), b, 3).unwrap();
        assert_eq!(pool.user_stake(&alice()), 0);
        assert_eq!(pool.total_staked(), 0);
        assert_eq!(pool.positions_of(&alice()).count(), 2);
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_fund_tops_up_available() {
        let mut pool = make_pool(10, 100, 45);
        pool.deposit(alice(), 100, 0).unwrap();
        pool.update(10).unwrap();
        assert_eq!(pool.available_funding().unwrap(), 0);
        pool.fund(1_000).unwrap();
        assert_eq!(pool.update(20).unwrap().actual, 100);
        assert!(pool.fund(0).is_err());
    }

    #[test]
    fn test_withdraw_surplus_after_window() {
        let mut pool = make_pool(10, 10, 500);
        pool.deposit(alice(), 100, 0).unwrap();
        assert!(pool.withdraw_surplus(5).is_err());
        assert_eq!(pool.withdraw_surplus(10).unwrap(), 400);
        assert_eq!(pool.total_funded(), 100);
        assert_eq!(pool.pending_reward(&alice(), 50).unwrap(), 100);
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_events_are_recorded_and_drained() {
        let mut pool = make_pool(10, 100, 45);
        pool.deposit(alice(), 100, 0).unwrap();
        pool.update(10).unwrap();
        let names: Vec<_> = pool.take_events().iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec!["emission_started", "stake_opened", "pool_updated", "funding_shortfall"]
        );
        assert!(pool.take_events().is_empty());
    }

    #[test]
    fn test_rollback_restores_positions_and_accumulator() {
        let mut pool = make_pool(10, 100, 1_000);
        let id = pool.deposit(alice(), 100, 0).unwrap();
        pool.take_events();
        let before = pool.summary();

        let cp = pool.checkpoint();
        pool.withdraw(alice(), id, 30).unwrap();
        pool.deposit(bob(), 50, 30).unwrap();
        assert!(pool.pending_undo() > 0);
        pool.rollback(cp);
        pool.commit();

        assert_eq!(pool.summary(), before);
        assert_eq!(pool.positions().len(), 1);
        assert!(pool.position(id).unwrap().active);
        assert_eq!(pool.user_stake(&bob()), 0);
        assert_eq!(pool.pending_undo(), 0);
        assert!(pool.take_events().is_empty());
        assert_eq!(pool.withdraw(alice(), id, 30).unwrap().reward, 300);
        pool.check_invariants().unwrap();
    }

    #[derive(Debug, Clone)]
    enum Op {
        Deposit(usize, Amount),
        Withdraw(usize, u64),
        Claim(usize, bool),
        Emergency(usize, u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..3, 10u128..5_000).prop_map(|(u, a)| Op::Deposit(u, a)),
            (0usize..3, 0u64..20).prop_map(|(u, id)| Op::Withdraw(u, id)),
            (0usize..3, any::<bool>()).prop_map(|(u, c)| Op::Claim(u, c)),
            (0usize..3, 0u64..20).prop_map(|(u, id)| Op::Emergency(u, id)),
        ]
    }

    proptest! {
        #[test]
        fn prop_conservation_and_monotonicity(
            ops in proptest::collection::vec((op_strategy(), 0u64..5), 1..60)
        ) {
            let users = [alice(), bob(), Principal::from_label("carol")];
            let mut pool = make_pool(37, 150, 3_000);
            let mut step = 0u64;
            let mut last_acc = 0;
            let mut last_emitted = 0;
            let mut last_distributed = 0;

            for (op, advance) in ops {
                step += advance;
                // Preview must agree with the amount a claim would settle.
                for user in &users {
                    let preview = pool.pending_reward(user, step).unwrap();
                    let mut scratch = pool.clone();
                    let claim = scratch.claim(*user, step, false).unwrap();
                    prop_assert_eq!(preview, claim.amount);
                }

                let _ = match op {
                    Op::Deposit(u, a) => pool.deposit(users[u], a, step).map(|_| ()),
                    Op::Withdraw(u, id) => pool.withdraw(users[u], id, step).map(|_| ()),
                    Op::Claim(u, c) => pool.claim(users[u], step, c).map(|_| ()),
                    Op::Emergency(u, id) => pool.emergency_withdraw(users[u], id, step).map(|_| ()),
                };

                prop_assert!(pool.check_invariants().is_ok());
                prop_assert!(pool.acc_reward_per_share() >= last_acc);
                prop_assert!(pool.scheduler().total_emitted() >= last_emitted);
                prop_assert!(pool.scheduler().total_distributed() >= last_distributed);
                last_acc = pool.acc_reward_per_share();
                last_emitted = pool.scheduler().total_emitted();
                last_distributed = pool.scheduler().total_distributed();
            }
        }
    }
}
