// crates/fierce-ledger/src/vault.rs
//
// Serialized, transactional wrappers around the ledger components.
//
// Every state-changing call follows the same sequence:
//
//   1. enter the vault's gate (one operation at a time per vault)
//   2. open a journal checkpoint, run the operation against the state
//   3. release the state lock, then perform at most one token movement
//   4. on transfer failure roll back to the checkpoint; otherwise publish
//      events
//
// Undo records cover only what the operation wrote. The outermost call
// commits the journal when it finishes; a nested call leaves its records to
// the enclosing transaction, so rolling that one back also reverts the
// nested work.
//
// The state lock is never held across the token call, so a recipient
// callback that re-enters the same vault on the same thread sees the
// already-committed state (a closed position is closed) instead of
// deadlocking. Calls from other threads wait at the gate.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tracing::{debug, warn};

use fierce_core::{
    Amount, EventSink, FierceError, LedgerEvent, Principal, StakeBackend, Step, Timestamp, Token,
    TokenId,
};

use crate::commission::{
    AccumulatorDistributor, CommissionDistributor, Distributor, SnapshotDistributor,
};
use crate::duration::{DurationPayout, DurationStakeLedger};
use crate::emission::{EmissionOutcome, EmissionWindow};
use crate::journal::Journaled;
use crate::pool::{Claim, StakePool, Withdrawal};
use crate::vesting::VestingLedger;

/// State that buffers notifications until its vault commits.
pub trait EventSource {
    fn take_events(&mut self) -> Vec<LedgerEvent>;
}

/// The single token movement an operation may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
    /// Pull `amount` from `from` into the vault (requires an allowance).
    Pull { from: Principal, amount: Amount },
    /// Pay `amount` out of the vault to `to`.
    Pay { to: Principal, amount: Amount },
}

/// Mutual exclusion that lets the owning thread pass through again.
#[derive(Default)]
struct ReentrancyGate {
    lock: Mutex<()>,
    owner: Mutex<Option<ThreadId>>,
}

struct GateTurn<'a> {
    gate: &'a ReentrancyGate,
    held: Option<MutexGuard<'a, ()>>,
}

impl ReentrancyGate {
    fn enter(&self) -> GateTurn<'_> {
        let me = thread::current().id();
        if *self.owner.lock().unwrap_or_else(PoisonError::into_inner) == Some(me) {
            return GateTurn {
                gate: self,
                held: None,
            };
        }
        let held = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner) = Some(me);
        GateTurn {
            gate: self,
            held: Some(held),
        }
    }
}

impl GateTurn<'_> {
    fn is_nested(&self) -> bool {
        self.held.is_none()
    }
}

impl Drop for GateTurn<'_> {
    fn drop(&mut self) {
        if self.held.is_some() {
            *self.gate.owner.lock().unwrap_or_else(PoisonError::into_inner) = None;
        }
    }
}

/// A ledger component bound to the token account that holds its funds.
pub struct Vault<S> {
    account: Principal,
    token: Arc<dyn Token>,
    sink: Arc<dyn EventSink>,
    gate: ReentrancyGate,
    state: Mutex<S>,
}

impl<S: Journaled + EventSource + Send> Vault<S> {
    pub fn new(account: Principal, token: Arc<dyn Token>, sink: Arc<dyn EventSink>, state: S) -> Self {
        Self {
            account,
            token,
            sink,
            gate: ReentrancyGate::default(),
            state: Mutex::new(state),
        }
    }

    /// Token account holding this vault's funds.
    pub fn account(&self) -> Principal {
        self.account
    }

    pub fn token(&self) -> &Arc<dyn Token> {
        &self.token
    }

    /// Current token balance of the vault account.
    pub fn balance(&self) -> Amount {
        self.token.balance_of(&self.account)
    }

    /// Run a read-only closure against the current state.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.lock_state())
    }

    /// Run `op` as one transaction against the vault's own token.
    pub fn transact<R>(
        &self,
        op: impl FnOnce(&mut S) -> Result<(R, Option<Movement>), FierceError>,
    ) -> Result<R, FierceError> {
        let token = Arc::clone(&self.token);
        self.transact_with(token.as_ref(), op)
    }

    /// Run `op` as one transaction, moving `token` if it asks to.
    pub fn transact_with<R>(
        &self,
        token: &dyn Token,
        op: impl FnOnce(&mut S) -> Result<(R, Option<Movement>), FierceError>,
    ) -> Result<R, FierceError> {
        let turn = self.gate.enter();
        let outermost = !turn.is_nested();

        let (result, movement, checkpoint, events) = {
            let mut state = self.lock_state();
            let checkpoint = state.checkpoint();
            match op(&mut state) {
                Ok((result, movement)) => {
                    let events = state.take_events();
                    (result, movement, checkpoint, events)
                }
                Err(err) => {
                    state.rollback(checkpoint);
                    if outermost {
                        state.commit();
                    }
                    debug!(error = %err, nested = !outermost, "vault operation rejected");
                    return Err(err);
                }
            }
        };

        if let Some(movement) = movement {
            if let Err(err) = self.execute(token, movement) {
                warn!(error = %err, ?movement, "token transfer failed; rolling back");
                let mut state = self.lock_state();
                state.rollback(checkpoint);
                if outermost {
                    state.commit();
                }
                return Err(err);
            }
        }
        if outermost {
            self.lock_state().commit();
        }

        for event in &events {
            self.sink.publish(event);
        }
        Ok(result)
    }

    fn execute(&self, token: &dyn Token, movement: Movement) -> Result<(), FierceError> {
        let outcome = match movement {
            Movement::Pull { from, amount } if amount > 0 => {
                token.transfer_from(&self.account, &from, &self.account, amount)
            }
            Movement::Pay { to, amount } if amount > 0 => {
                token.transfer(&self.account, &to, amount)
            }
            _ => Ok(()),
        };
        outcome.map_err(|err| match err {
            FierceError::TransferFailed(_) => err,
            other => FierceError::TransferFailed(other.to_string()),
        })
    }

    /// Reject stakes below the token's own minimum.
    fn ensure_token_minimum(&self, amount: Amount) -> Result<(), FierceError> {
        let minimum = self.token.min_staking_amount();
        if amount < minimum {
            return Err(FierceError::InvalidInput(format!(
                "stake {} below token minimum {}",
                amount, minimum
            )));
        }
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, S> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: StakeBackend + Journaled + EventSource + Send> StakeBackend for Vault<S> {
    fn total_staked(&self) -> Amount {
        self.read(|s| s.total_staked())
    }

    fn user_stake(&self, user: &Principal) -> Amount {
        self.read(|s| s.user_stake(user))
    }
}

fn pull(from: Principal, amount: Amount) -> Option<Movement> {
    Some(Movement::Pull { from, amount })
}

fn pay(to: Principal, amount: Amount) -> Option<Movement> {
    Some(Movement::Pay { to, amount })
}

// ---------------------------------------------------------------------------
// Emission pool
// ---------------------------------------------------------------------------

impl Vault<StakePool> {
    /// Open the emission window, pulling its initial funding from `funder`.
    pub fn start_emission(
        &self,
        funder: Principal,
        current_step: Step,
        duration_steps: u64,
        rate_per_step: Amount,
        initial_funding: Amount,
    ) -> Result<EmissionWindow, FierceError> {
        self.transact(|pool| {
            let window =
                pool.start_emission(current_step, duration_steps, rate_per_step, initial_funding)?;
            Ok((window, pull(funder, initial_funding)))
        })
    }

    pub fn fund(&self, funder: Principal, amount: Amount) -> Result<Amount, FierceError> {
        self.transact(|pool| Ok((pool.fund(amount)?, pull(funder, amount))))
    }

    pub fn update(&self, current_step: Step) -> Result<EmissionOutcome, FierceError> {
        self.transact(|pool| Ok((pool.update(current_step)?, None)))
    }

    /// Open a position; `amount` must meet both the pool's and the token's
    /// minimum stake.
    pub fn deposit(&self, user: Principal, amount: Amount, current_step: Step) -> Result<u64, FierceError> {
        self.ensure_token_minimum(amount)?;
        self.transact(|pool| Ok((pool.deposit(user, amount, current_step)?, pull(user, amount))))
    }

    pub fn withdraw(
        &self,
        user: Principal,
        position_id: u64,
        current_step: Step,
    ) -> Result<Withdrawal, FierceError> {
        self.transact(|pool| {
            let withdrawal = pool.withdraw(user, position_id, current_step)?;
            Ok((withdrawal, pay(user, withdrawal.total()?)))
        })
    }

    pub fn emergency_withdraw(
        &self,
        user: Principal,
        position_id: u64,
        current_step: Step,
    ) -> Result<Amount, FierceError> {
        self.transact(|pool| {
            let principal = pool.emergency_withdraw(user, position_id, current_step)?;
            Ok((principal, pay(user, principal)))
        })
    }

    /// Claim reward; a compounded claim stays in the vault as new stake.
    pub fn claim(&self, user: Principal, current_step: Step, auto_compound: bool) -> Result<Claim, FierceError> {
        self.transact(|pool| {
            let claim = pool.claim(user, current_step, auto_compound)?;
            let movement = if claim.compounded_into.is_some() {
                None
            } else {
                pay(user, claim.amount)
            };
            Ok((claim, movement))
        })
    }

    pub fn withdraw_surplus(&self, to: Principal, current_step: Step) -> Result<Amount, FierceError> {
        self.transact(|pool| {
            let surplus = pool.withdraw_surplus(current_step)?;
            Ok((surplus, pay(to, surplus)))
        })
    }

    pub fn pending_reward(&self, user: &Principal, current_step: Step) -> Result<Amount, FierceError> {
        self.read(|pool| pool.pending_reward(user, current_step))
    }
}

// ---------------------------------------------------------------------------
// Duration ledger
// ---------------------------------------------------------------------------

impl Vault<DurationStakeLedger> {
    pub fn stake(
        &self,
        user: Principal,
        amount: Amount,
        duration: u64,
        now: Timestamp,
    ) -> Result<u64, FierceError> {
        self.ensure_token_minimum(amount)?;
        self.transact(|ledger| Ok((ledger.stake(user, amount, duration, now)?, pull(user, amount))))
    }

    pub fn unstake(
        &self,
        user: Principal,
        position_id: u64,
        now: Timestamp,
    ) -> Result<DurationPayout, FierceError> {
        self.transact(|ledger| {
            let payout = ledger.unstake(&user, position_id, now)?;
            let total = payout
                .principal
                .checked_add(payout.reward)
                .ok_or_else(|| FierceError::overflow("duration payout"))?;
            Ok((payout, pay(user, total)))
        })
    }

    pub fn emergency_unstake(
        &self,
        user: Principal,
        position_id: u64,
        now: Timestamp,
    ) -> Result<Amount, FierceError> {
        self.transact(|ledger| {
            let principal = ledger.emergency_unstake(&user, position_id, now)?;
            Ok((principal, pay(user, principal)))
        })
    }

    pub fn fund_rewards(&self, funder: Principal, amount: Amount) -> Result<Amount, FierceError> {
        self.transact(|ledger| Ok((ledger.fund_rewards(amount)?, pull(funder, amount))))
    }

    pub fn queue_rate_change(
        &self,
        duration: u64,
        rate: u64,
        now: Timestamp,
    ) -> Result<Timestamp, FierceError> {
        self.transact(|ledger| Ok((ledger.queue_rate_change(duration, rate, now)?, None)))
    }

    pub fn apply_rate_change(&self, duration: u64, now: Timestamp) -> Result<u64, FierceError> {
        self.transact(|ledger| Ok((ledger.apply_rate_change(duration, now)?, None)))
    }

    pub fn pending_rewards(
        &self,
        user: &Principal,
        position_id: u64,
        now: Timestamp,
    ) -> Result<Amount, FierceError> {
        self.read(|ledger| ledger.pending_rewards(user, position_id, now))
    }
}

// ---------------------------------------------------------------------------
// Vesting
// ---------------------------------------------------------------------------

impl Vault<VestingLedger> {
    /// Lock `total_amount` from `funder` into a new schedule.
    pub fn create_schedule(
        &self,
        funder: Principal,
        beneficiary: Principal,
        total_amount: Amount,
        start_time: Timestamp,
        duration: u64,
        cliff: u64,
    ) -> Result<usize, FierceError> {
        self.transact(|ledger| {
            let index =
                ledger.create_schedule(beneficiary, total_amount, start_time, duration, cliff)?;
            Ok((index, pull(funder, total_amount)))
        })
    }

    pub fn release(&self, beneficiary: Principal, index: usize, now: Timestamp) -> Result<Amount, FierceError> {
        self.transact(|ledger| {
            let amount = ledger.release(&beneficiary, index, now)?;
            Ok((amount, pay(beneficiary, amount)))
        })
    }

    pub fn releasable(&self, beneficiary: &Principal, index: usize, now: Timestamp) -> Result<Amount, FierceError> {
        self.read(|ledger| ledger.releasable(beneficiary, index, now))
    }
}

// ---------------------------------------------------------------------------
// Commission distributors
// ---------------------------------------------------------------------------

impl<D: CommissionDistributor> Vault<D> {
    pub fn register(&self, user: Principal, backend: &dyn StakeBackend) -> Result<bool, FierceError> {
        self.transact(|d| Ok((d.register(user, backend)?, None)))
    }

    pub fn deregister(&self, user: Principal, backend: &dyn StakeBackend) -> Result<(), FierceError> {
        self.transact(|d| Ok((d.deregister(&user, backend)?, None)))
    }

    pub fn exclude(&self, user: Principal) -> Result<(), FierceError> {
        self.transact(|d| Ok((d.exclude(&user)?, None)))
    }

    pub fn include(&self, user: Principal, backend: &dyn StakeBackend) -> Result<(), FierceError> {
        self.transact(|d| Ok((d.include(&user, backend)?, None)))
    }

    /// Pull `amount` of `token` from `funder` and record it for
    /// distribution as of `now`.
    pub fn deposit_commissions(
        &self,
        token: &dyn Token,
        funder: Principal,
        amount: Amount,
        backend: &dyn StakeBackend,
        now: Timestamp,
    ) -> Result<u64, FierceError> {
        let token_id = token.id();
        self.transact_with(token, |d| {
            Ok((d.deposit_commissions(token_id, amount, backend, now)?, pull(funder, amount)))
        })
    }

    /// Pay `user` everything owed in `token`.
    pub fn claim_commissions(&self, user: Principal, token: &dyn Token) -> Result<Amount, FierceError> {
        let token_id = token.id();
        self.transact_with(token, |d| {
            let amount = d.claim(&user, &token_id)?;
            Ok((amount, pay(user, amount)))
        })
    }

    pub fn pending_commissions(&self, user: &Principal, token: &dyn Token) -> Result<Amount, FierceError> {
        let token_id = token.id();
        self.read(|d| d.pending_rewards(user, &token_id))
    }
}

impl Vault<Distributor> {
    pub fn sync_stake(&self, user: Principal, backend: &dyn StakeBackend) -> Result<Amount, FierceError> {
        self.transact(|d| Ok((d.sync_stake(&user, backend)?, None)))
    }

    /// Pay `user`'s share of deposit `id`, which must have been made in
    /// `token`.
    pub fn claim_deposit(&self, user: Principal, id: u64, token: &dyn Token) -> Result<Amount, FierceError> {
        let token_id = token.id();
        self.transact_with(token, |d| {
            ensure_deposit_token(id, d.deposit_token(id), token_id)?;
            let amount = d.claim_deposit(&user, id)?;
            Ok((amount, pay(user, amount)))
        })
    }
}

impl Vault<SnapshotDistributor> {
    /// Pay `user`'s share of deposit `id`, which must have been made in
    /// `token`.
    pub fn claim_deposit(&self, user: Principal, id: u64, token: &dyn Token) -> Result<Amount, FierceError> {
        let token_id = token.id();
        self.transact_with(token, |d| {
            ensure_deposit_token(id, d.deposit(id).map(|deposit| deposit.token), token_id)?;
            let amount = d.claim_deposit(&user, id)?;
            Ok((amount, pay(user, amount)))
        })
    }
}

/// A deposit is paid out in the token it was made in. Unknown ids fall
/// through to the distributor's own `NotFound`.
fn ensure_deposit_token(
    id: u64,
    recorded: Option<TokenId>,
    requested: TokenId,
) -> Result<(), FierceError> {
    match recorded {
        Some(recorded) if recorded != requested => Err(FierceError::InvalidInput(format!(
            "deposit {} was made in {}, not {}",
            id, recorded, requested
        ))),
        _ => Ok(()),
    }
}

impl Vault<AccumulatorDistributor> {
    pub fn sync_stake(&self, user: Principal, backend: &dyn StakeBackend) -> Result<Amount, FierceError> {
        self.transact(|d| Ok((d.sync_stake(&user, backend)?, None)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::sink::MemorySink;
    use crate::token::InMemoryToken;

    fn alice() -> Principal {
        Principal::from_label("alice")
    }

    fn treasury() -> Principal {
        Principal::from_label("treasury")
    }

    fn setup() -> (Arc<InMemoryToken>, Arc<MemorySink>, Vault<StakePool>) {
        let token = Arc::new(InMemoryToken::new("FRC", 1));
        let sink = Arc::new(MemorySink::new());
        let config = PoolConfig {
            precision: 1_000_000_000_000,
            min_stake: 10,
            minimum_initial_funding: 100,
        };
        let pool = StakePool::new(&config).unwrap();
        let vault = Vault::new(
            Principal::from_label("pool-vault"),
            token.clone(),
            sink.clone(),
            pool,
        );
        for who in [alice(), treasury()] {
            token.mint(&who, 10_000).unwrap();
            token.approve(&who, &vault.account(), 10_000);
        }
        (token, sink, vault)
    }

    #[test]
    fn test_deposit_pulls_tokens_and_publishes() {
        let (token, sink, vault) = setup();
        vault.start_emission(treasury(), 0, 100, 10, 1_000).unwrap();
        vault.deposit(alice(), 500, 0).unwrap();
        assert_eq!(token.balance_of(&vault.account()), 1_500);
        assert_eq!(token.balance_of(&alice()), 9_500);
        assert_eq!(sink.count("emission_started"), 1);
        assert_eq!(sink.count("stake_opened"), 1);
    }

    #[test]
    fn test_failed_transfer_rolls_back_state() {
        let (token, sink, vault) = setup();
        vault.start_emission(treasury(), 0, 100, 10, 1_000).unwrap();
        let id = vault.deposit(alice(), 500, 0).unwrap();
        let before = vault.read(|p| p.summary());
        let events_before = sink.events().len();

        token.set_failing(true);
        assert!(matches!(
            vault.withdraw(alice(), id, 10),
            Err(FierceError::TransferFailed(_))
        ));
        assert_eq!(vault.read(|p| p.summary()), before);
        assert!(vault.read(|p| p.position(id).unwrap().active));
        assert_eq!(sink.events().len(), events_before);

        token.set_failing(false);
        let withdrawal = vault.withdraw(alice(), id, 10).unwrap();
        assert_eq!(withdrawal.principal, 500);
        assert_eq!(withdrawal.reward, 100);
        assert_eq!(token.balance_of(&alice()), 10_100);
    }

    #[test]
    fn test_rejected_operation_leaves_state_untouched() {
        let (_token, _sink, vault) = setup();
        vault.start_emission(treasury(), 0, 100, 10, 1_000).unwrap();
        vault.deposit(alice(), 500, 0).unwrap();
        let before = vault.read(|p| p.summary());
        assert!(vault.withdraw(treasury(), 0, 50).is_err());
        assert_eq!(vault.read(|p| p.summary()), before);
    }

    #[test]
    fn test_nested_withdrawal_sees_closed_position() {
        let (token, _sink, vault) = setup();
        let vault = Arc::new(vault);
        vault.start_emission(treasury(), 0, 100, 10, 1_000).unwrap();
        let id = vault.deposit(alice(), 500, 0).unwrap();

        let nested: Arc<Mutex<Option<Result<Withdrawal, FierceError>>>> = Arc::new(Mutex::new(None));
        let hook_vault = Arc::clone(&vault);
        let hook_result = Arc::clone(&nested);
        token.set_transfer_hook(Arc::new(move |to: &Principal, _amount: Amount| {
            if *to == alice() {
                let attempt = hook_vault.withdraw(alice(), id, 10);
                *hook_result.lock().unwrap() = Some(attempt);
            }
        }));

        vault.withdraw(alice(), id, 10).unwrap();
        token.clear_transfer_hook();

        let attempt = nested.lock().unwrap().take().unwrap();
        assert!(matches!(attempt, Err(FierceError::StateConflict(_))));
        assert_eq!(token.balance_of(&alice()), 10_100);
        vault.read(|p| p.check_invariants()).unwrap();
    }

    #[test]
    fn test_compounded_claim_moves_no_tokens() {
        let (token, _sink, vault) = setup();
        vault.start_emission(treasury(), 0, 100, 10, 1_000).unwrap();
        vault.deposit(alice(), 500, 0).unwrap();
        let claim = vault.claim(alice(), 10, true).unwrap();
        assert_eq!(claim.amount, 100);
        assert!(claim.compounded_into.is_some());
        assert_eq!(token.balance_of(&alice()), 9_500);
        assert_eq!(vault.user_stake(&alice()), 600);
    }

    #[test]
    fn test_stake_backend_reads_through_lock() {
        let (_token, _sink, vault) = setup();
        vault.start_emission(treasury(), 0, 100, 10, 1_000).unwrap();
        vault.deposit(alice(), 500, 0).unwrap();
        assert_eq!(vault.total_staked(), 500);
        assert_eq!(vault.user_stake(&alice()), 500);
    }

    #[test]
    fn test_committed_transactions_leave_no_undo_records() {
        let (token, _sink, vault) = setup();
        vault.start_emission(treasury(), 0, 100, 10, 1_000).unwrap();
        let id = vault.deposit(alice(), 500, 0).unwrap();
        assert_eq!(vault.read(|p| p.pending_undo()), 0);

        token.set_failing(true);
        assert!(vault.withdraw(alice(), id, 10).is_err());
        token.set_failing(false);
        assert!(vault.withdraw(treasury(), id, 10).is_err());
        assert_eq!(vault.read(|p| p.pending_undo()), 0);
    }

    #[test]
    fn test_token_minimum_applies_above_pool_minimum() {
        let token = Arc::new(InMemoryToken::new("FRC", 50));
        let config = PoolConfig {
            precision: 1_000_000_000_000,
            min_stake: 10,
            minimum_initial_funding: 100,
        };
        let vault = Vault::new(
            Principal::from_label("pool-vault"),
            token.clone(),
            Arc::new(MemorySink::new()),
            StakePool::new(&config).unwrap(),
        );
        token.mint(&alice(), 1_000).unwrap();
        token.approve(&alice(), &vault.account(), 1_000);

        assert!(matches!(
            vault.deposit(alice(), 20, 0),
            Err(FierceError::InvalidInput(_))
        ));
        assert_eq!(token.balance_of(&alice()), 1_000);
        assert_eq!(vault.total_staked(), 0);
        vault.deposit(alice(), 50, 0).unwrap();
        assert_eq!(vault.total_staked(), 50);
    }
}
