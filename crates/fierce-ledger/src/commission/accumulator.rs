// crates/fierce-ledger/src/commission/accumulator.rs
//
// Accumulator-based commission distribution.
//
// Per token:   reward_per_stake += amount * PRECISION / total_eligible_stake
// Per user:    pending = credited + eligible * reward_per_stake / PRECISION - debt
//
// Debts are set whenever a user's eligible stake changes (registration,
// sync, exclusion, inclusion) so that only reward accrued after the change
// is attributed to the new stake. Debts round up and accruals round down, so
// the sum paid out per token never exceeds what was deposited.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fierce_core::{
    Amount, EventKind, FierceError, LedgerEvent, Principal, StakeBackend, Timestamp, TokenId,
};

use crate::commission::CommissionDistributor;
use crate::config::DistributorConfig;
use crate::fixed_point::{add, sub, Precision};
use crate::journal::{Journaled, JournaledMap};
use crate::vault::EventSource;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Last stake reported by the backend.
    pub stake: Amount,
    pub excluded: bool,
}

impl Participant {
    fn eligible(&self) -> Amount {
        if self.excluded {
            0
        } else {
            self.stake
        }
    }
}

/// Per-user, per-token bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accrual {
    pub debt: Amount,
    /// Settled at a stake change but not yet claimed.
    pub credited: Amount,
    /// Cumulative amount claimed.
    pub claimed: Amount,
}

/// Per-token totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLedger {
    pub reward_per_stake: Amount,
    pub deposited: Amount,
    pub claimed: Amount,
    pub forfeited: Amount,
    /// Caller-supplied time of the most recent deposit.
    pub last_deposit_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct AccumulatorDistributor {
    precision: Precision,
    participants: JournaledMap<Principal, Participant>,
    total_eligible_stake: Amount,
    tokens: JournaledMap<TokenId, TokenLedger>,
    accruals: JournaledMap<(TokenId, Principal), Accrual>,
    deposit_count: u64,
    events: Vec<LedgerEvent>,
}

/// Pending update for one (token, user) accrual, computed before anything is
/// written.
struct Settlement {
    token: TokenId,
    owed: Amount,
    debt: Amount,
}

impl AccumulatorDistributor {
    pub fn new(config: &DistributorConfig) -> Result<Self, FierceError> {
        Ok(Self {
            precision: Precision::new(config.precision)?,
            participants: JournaledMap::new(),
            total_eligible_stake: 0,
            tokens: JournaledMap::new(),
            accruals: JournaledMap::new(),
            deposit_count: 0,
            events: Vec::new(),
        })
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn total_eligible_stake(&self) -> Amount {
        self.total_eligible_stake
    }

    pub fn participant(&self, user: &Principal) -> Option<&Participant> {
        self.participants.get(user)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn token_ledger(&self, token: &TokenId) -> Option<&TokenLedger> {
        self.tokens.get(token)
    }

    pub fn reward_per_stake(&self, token: &TokenId) -> Amount {
        self.tokens.get(token).map(|t| t.reward_per_stake).unwrap_or(0)
    }

    pub fn accrual(&self, user: &Principal, token: &TokenId) -> Accrual {
        self.accruals.get(&(*token, *user)).copied().unwrap_or_default()
    }

    /// Re-read `user`'s stake from the backend, settling accrual at the old
    /// stake first. Returns the new stake.
    pub fn sync_stake(
        &mut self,
        user: &Principal,
        backend: &dyn StakeBackend,
    ) -> Result<Amount, FierceError> {
        let participant = *self
            .participants
            .get(user)
            .ok_or_else(|| not_registered(user))?;
        let new_stake = backend.user_stake(user);
        let updated = Participant {
            stake: new_stake,
            ..participant
        };
        self.move_eligible(user, participant.eligible(), updated.eligible())?;
        self.participants.insert(*user, updated);
        debug!(user = %user, old = %participant.stake, new = %new_stake, "distributor stake synced");
        Ok(new_stake)
    }

    /// Owed amount for `token` at eligible stake `eligible`.
    fn owed(&self, user: &Principal, token: &TokenId, eligible: Amount) -> Result<Amount, FierceError> {
        let accrual = self.accrual(user, token);
        let gross = self.precision.accrued(eligible, self.reward_per_stake(token))?;
        add(accrual.credited, gross.saturating_sub(accrual.debt), "owed commission")
    }

    /// Settle `user` at `old_eligible` and re-base debts at `new_eligible`
    /// across every token.
    fn settlements(
        &self,
        user: &Principal,
        old_eligible: Amount,
        new_eligible: Amount,
    ) -> Result<Vec<Settlement>, FierceError> {
        self.tokens
            .iter()
            .map(|(token, ledger)| {
                Ok(Settlement {
                    token: *token,
                    owed: self.owed(user, token, old_eligible)?,
                    debt: self.precision.accrued_ceil(new_eligible, ledger.reward_per_stake)?,
                })
            })
            .collect()
    }

    /// Change `user`'s eligible stake, crediting what accrued so far.
    fn move_eligible(
        &mut self,
        user: &Principal,
        old_eligible: Amount,
        new_eligible: Amount,
    ) -> Result<(), FierceError> {
        let total = add(
            sub(self.total_eligible_stake, old_eligible, "eligible stake")?,
            new_eligible,
            "eligible stake",
        )?;
        for settled in self.settlements(user, old_eligible, new_eligible)? {
            let accrual = self
                .accruals
                .get_or_insert_with((settled.token, *user), Accrual::default);
            accrual.credited = settled.owed;
            accrual.debt = settled.debt;
        }
        self.total_eligible_stake = total;
        Ok(())
    }

    fn emit(&mut self, kind: EventKind) {
        self.events.push(LedgerEvent::new(kind));
    }
}

impl CommissionDistributor for AccumulatorDistributor {
    fn register(
        &mut self,
        user: Principal,
        backend: &dyn StakeBackend,
    ) -> Result<bool, FierceError> {
        if user.is_zero() {
            return Err(FierceError::InvalidInput("zero principal".to_string()));
        }
        if self.participants.contains_key(&user) {
            return Ok(false);
        }
        let stake = backend.user_stake(&user);
        self.move_eligible(&user, 0, stake)?;
        self.participants.insert(
            user,
            Participant {
                stake,
                excluded: false,
            },
        );
        info!(user = %user, %stake, "participant registered");
        self.emit(EventKind::ParticipantRegistered { user, stake });
        Ok(true)
    }

    fn deregister(
        &mut self,
        user: &Principal,
        backend: &dyn StakeBackend,
    ) -> Result<(), FierceError> {
        let participant = *self
            .participants
            .get(user)
            .ok_or_else(|| not_registered(user))?;
        let external = backend.user_stake(user);
        if external != 0 {
            return Err(FierceError::StateConflict(format!(
                "{} still has {} staked",
                user, external
            )));
        }
        // Accrual stays claimable after removal.
        self.move_eligible(user, participant.eligible(), 0)?;
        self.participants.remove(user);
        info!(user = %user, "participant deregistered");
        self.emit(EventKind::ParticipantDeregistered { user: *user });
        Ok(())
    }

    fn exclude(&mut self, user: &Principal) -> Result<(), FierceError> {
        let participant = *self
            .participants
            .get(user)
            .ok_or_else(|| not_registered(user))?;
        if participant.excluded {
            return Ok(());
        }
        let total = sub(
            self.total_eligible_stake,
            participant.eligible(),
            "eligible stake",
        )?;
        let mut forfeits = Vec::with_capacity(self.tokens.len());
        for token in self.tokens.keys() {
            let owed = self.owed(user, token, participant.eligible())?;
            let forfeited = add(self.tokens[token].forfeited, owed, "forfeited commission")?;
            forfeits.push((*token, owed, forfeited));
        }

        for (token, owed, forfeited) in forfeits {
            if let Some(ledger) = self.tokens.get_mut(&token) {
                ledger.forfeited = forfeited;
            }
            let accrual = self.accruals.get_or_insert_with((token, *user), Accrual::default);
            accrual.credited = 0;
            accrual.debt = 0;
            if owed > 0 {
                warn!(user = %user, token = %token, %owed, "unclaimed commission forfeited on exclusion");
            }
        }
        self.total_eligible_stake = total;
        self.participants.insert(
            *user,
            Participant {
                excluded: true,
                ..participant
            },
        );
        self.emit(EventKind::ParticipantExcluded {
            user: *user,
            excluded: true,
        });
        Ok(())
    }

    fn include(
        &mut self,
        user: &Principal,
        backend: &dyn StakeBackend,
    ) -> Result<(), FierceError> {
        let participant = *self
            .participants
            .get(user)
            .ok_or_else(|| not_registered(user))?;
        if !participant.excluded {
            return Ok(());
        }
        let stake = backend.user_stake(user);
        self.move_eligible(user, 0, stake)?;
        self.participants.insert(
            *user,
            Participant {
                stake,
                excluded: false,
            },
        );
        self.emit(EventKind::ParticipantExcluded {
            user: *user,
            excluded: false,
        });
        Ok(())
    }

    fn deposit_commissions(
        &mut self,
        token: TokenId,
        amount: Amount,
        _backend: &dyn StakeBackend,
        now: Timestamp,
    ) -> Result<u64, FierceError> {
        if amount == 0 {
            return Err(FierceError::InvalidInput(
                "commission amount must be nonzero".to_string(),
            ));
        }
        if self.total_eligible_stake == 0 {
            return Err(FierceError::StateConflict(
                "no eligible stake to distribute commissions to".to_string(),
            ));
        }
        let delta = self
            .precision
            .per_share_delta(amount, self.total_eligible_stake)?;
        let current = self.tokens.get(&token).cloned().unwrap_or_default();
        let updated = TokenLedger {
            reward_per_stake: add(current.reward_per_stake, delta, "reward per stake")?,
            deposited: add(current.deposited, amount, "commission deposited")?,
            last_deposit_at: now,
            ..current
        };
        self.tokens.insert(token, updated);

        let deposit = self.deposit_count;
        self.deposit_count += 1;
        debug!(deposit, token = %token, %amount, eligible = %self.total_eligible_stake, at = now, "commission deposited");
        self.emit(EventKind::CommissionDeposited {
            deposit,
            token,
            amount,
            eligible_stake: self.total_eligible_stake,
            at: now,
        });
        Ok(deposit)
    }

    fn pending_rewards(&self, user: &Principal, token: &TokenId) -> Result<Amount, FierceError> {
        match self.participants.get(user) {
            Some(p) if p.excluded => Ok(0),
            Some(p) => self.owed(user, token, p.eligible()),
            // Deregistered users keep what was credited.
            None => Ok(self.accrual(user, token).credited),
        }
    }

    fn claim(&mut self, user: &Principal, token: &TokenId) -> Result<Amount, FierceError> {
        let eligible = match self.participants.get(user) {
            Some(p) if p.excluded => {
                return Err(FierceError::StateConflict(format!(
                    "{} is excluded from commissions",
                    user
                )))
            }
            Some(p) => p.eligible(),
            None => 0,
        };
        let amount = self.owed(user, token, eligible)?;
        let debt = self
            .precision
            .accrued_ceil(eligible, self.reward_per_stake(token))?;
        let accrual = self.accrual(user, token);
        let user_claimed = add(accrual.claimed, amount, "user claimed")?;
        let ledger = self.tokens.get(token).cloned().unwrap_or_default();
        let token_claimed = add(ledger.claimed, amount, "token claimed")?;

        self.accruals.insert(
            (*token, *user),
            Accrual {
                debt,
                credited: 0,
                claimed: user_claimed,
            },
        );
        if let Some(ledger) = self.tokens.get_mut(token) {
            ledger.claimed = token_claimed;
        }

        if amount > 0 {
            debug!(user = %user, token = %token, %amount, "commission claimed");
            self.emit(EventKind::RewardClaimed {
                owner: *user,
                token: *token,
                amount,
            });
        }
        Ok(amount)
    }

    fn is_registered(&self, user: &Principal) -> bool {
        self.participants.contains_key(user)
    }

    fn is_excluded(&self, user: &Principal) -> bool {
        self.participants.get(user).map(|p| p.excluded).unwrap_or(false)
    }

    fn check_invariants(&self) -> Result<(), FierceError> {
        let mut eligible: Amount = 0;
        for p in self.participants.values() {
            eligible = add(eligible, p.eligible(), "eligible stake")?;
        }
        if eligible != self.total_eligible_stake {
            return Err(FierceError::StateConflict(format!(
                "eligible stake {} != tracked {}",
                eligible, self.total_eligible_stake
            )));
        }
        for (token, ledger) in self.tokens.iter() {
            let out = add(ledger.claimed, ledger.forfeited, "commission out")?;
            if out > ledger.deposited {
                return Err(FierceError::StateConflict(format!(
                    "token {} paid {} of {} deposited",
                    token, out, ledger.deposited
                )));
            }
        }
        Ok(())
    }
}

impl EventSource for AccumulatorDistributor {
    fn take_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Scalars and container log positions of an `AccumulatorDistributor`.
#[derive(Debug, Clone, Copy)]
pub struct AccumulatorCheckpoint {
    total_eligible_stake: Amount,
    deposit_count: u64,
    participants: usize,
    tokens: usize,
    accruals: usize,
    events: usize,
}

impl Journaled for AccumulatorDistributor {
    type Checkpoint = AccumulatorCheckpoint;

    fn checkpoint(&mut self) -> AccumulatorCheckpoint {
        AccumulatorCheckpoint {
            total_eligible_stake: self.total_eligible_stake,
            deposit_count: self.deposit_count,
            participants: self.participants.begin(),
            tokens: self.tokens.begin(),
            accruals: self.accruals.begin(),
            events: self.events.len(),
        }
    }

    fn rollback(&mut self, cp: AccumulatorCheckpoint) {
        self.total_eligible_stake = cp.total_eligible_stake;
        self.deposit_count = cp.deposit_count;
        self.participants.rollback(cp.participants);
        self.tokens.rollback(cp.tokens);
        self.accruals.rollback(cp.accruals);
        self.events.truncate(cp.events);
    }

    fn commit(&mut self) {
        self.participants.commit();
        self.tokens.commit();
        self.accruals.commit();
    }
}

fn not_registered(user: &Principal) -> FierceError {
    FierceError::NotFound(format!("participant {}", user))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use proptest::prelude::*;

    /// Stake table standing in for a live staking ledger.
    #[derive(Default)]
    struct Stakes(HashMap<Principal, Amount>);

    impl Stakes {
        fn set(&mut self, user: Principal, amount: Amount) {
            self.0.insert(user, amount);
        }
    }

    impl StakeBackend for Stakes {
        fn total_staked(&self) -> Amount {
            self.0.values().sum()
        }

        fn user_stake(&self, user: &Principal) -> Amount {
            self.0.get(user).copied().unwrap_or(0)
        }
    }

    fn user(label: &str) -> Principal {
        Principal::from_label(label)
    }

    fn usdc() -> TokenId {
        Principal::from_label("usdc")
    }

    fn distributor() -> AccumulatorDistributor {
        AccumulatorDistributor::new(&DistributorConfig::default()).unwrap()
    }

    #[test]
    fn test_late_registrant_gets_nothing_from_earlier_deposit() {
        let mut stakes = Stakes::default();
        let mut d = distributor();
        stakes.set(user("a"), 100);
        assert!(d.register(user("a"), &stakes).unwrap());
        d.deposit_commissions(usdc(), 1_000, &stakes, 0).unwrap();
        assert_eq!(
            d.reward_per_stake(&usdc()),
            1_000 * d.precision().scale() / 100
        );

        stakes.set(user("b"), 50);
        d.register(user("b"), &stakes).unwrap();
        assert_eq!(d.accrual(&user("b"), &usdc()).debt, 500);
        assert_eq!(d.pending_rewards(&user("b"), &usdc()).unwrap(), 0);
        assert_eq!(d.pending_rewards(&user("a"), &usdc()).unwrap(), 1_000);

        d.deposit_commissions(usdc(), 300, &stakes, 0).unwrap();
        assert_eq!(d.pending_rewards(&user("a"), &usdc()).unwrap(), 1_200);
        assert_eq!(d.pending_rewards(&user("b"), &usdc()).unwrap(), 100);
        d.check_invariants().unwrap();
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut stakes = Stakes::default();
        let mut d = distributor();
        stakes.set(user("a"), 100);
        assert!(d.register(user("a"), &stakes).unwrap());
        assert!(!d.register(user("a"), &stakes).unwrap());
        assert_eq!(d.total_eligible_stake(), 100);
        assert!(d.register(Principal::ZERO, &stakes).is_err());
    }

    #[test]
    fn test_deposit_without_eligible_stake_conflicts() {
        let stakes = Stakes::default();
        let mut d = distributor();
        assert!(matches!(
            d.deposit_commissions(usdc(), 1_000, &stakes, 0),
            Err(FierceError::StateConflict(_))
        ));
        assert!(d.deposit_commissions(usdc(), 0, &stakes, 0).is_err());
    }

    #[test]
    fn test_claim_twice_pays_once() {
        let mut stakes = Stakes::default();
        let mut d = distributor();
        stakes.set(user("a"), 100);
        d.register(user("a"), &stakes).unwrap();
        d.deposit_commissions(usdc(), 1_000, &stakes, 0).unwrap();
        assert_eq!(d.claim(&user("a"), &usdc()).unwrap(), 1_000);
        assert_eq!(d.claim(&user("a"), &usdc()).unwrap(), 0);
        assert_eq!(d.accrual(&user("a"), &usdc()).claimed, 1_000);
        assert_eq!(d.take_events().len(), 3);
    }

    #[test]
    fn test_sync_stake_settles_before_change() {
        let mut stakes = Stakes::default();
        let mut d = distributor();
        stakes.set(user("a"), 100);
        stakes.set(user("b"), 100);
        d.register(user("a"), &stakes).unwrap();
        d.register(user("b"), &stakes).unwrap();
        d.deposit_commissions(usdc(), 1_000, &stakes, 0).unwrap();

        stakes.set(user("a"), 300);
        assert_eq!(d.sync_stake(&user("a"), &stakes).unwrap(), 300);
        assert_eq!(d.total_eligible_stake(), 400);
        assert_eq!(d.pending_rewards(&user("a"), &usdc()).unwrap(), 500);

        d.deposit_commissions(usdc(), 400, &stakes, 0).unwrap();
        assert_eq!(d.pending_rewards(&user("a"), &usdc()).unwrap(), 800);
        assert_eq!(d.pending_rewards(&user("b"), &usdc()).unwrap(), 600);
    }

    #[test]
    fn test_excluded_participant_cannot_claim() {
        let mut stakes = Stakes::default();
        let mut d = distributor();
        stakes.set(user("a"), 100);
        stakes.set(user("b"), 100);
        d.register(user("a"), &stakes).unwrap();
        d.register(user("b"), &stakes).unwrap();
        d.deposit_commissions(usdc(), 1_000, &stakes, 0).unwrap();

        d.exclude(&user("b")).unwrap();
        assert_eq!(d.total_eligible_stake(), 100);
        assert_eq!(d.pending_rewards(&user("b"), &usdc()).unwrap(), 0);
        assert!(matches!(
            d.claim(&user("b"), &usdc()),
            Err(FierceError::StateConflict(_))
        ));
        assert_eq!(d.token_ledger(&usdc()).unwrap().forfeited, 500);

        // Future deposits skip the excluded participant entirely.
        d.deposit_commissions(usdc(), 1_000, &stakes, 0).unwrap();
        assert_eq!(d.pending_rewards(&user("a"), &usdc()).unwrap(), 1_500);

        d.include(&user("b"), &stakes).unwrap();
        assert_eq!(d.pending_rewards(&user("b"), &usdc()).unwrap(), 0);
        d.deposit_commissions(usdc(), 200, &stakes, 0).unwrap();
        assert_eq!(d.pending_rewards(&user("b"), &usdc()).unwrap(), 100);
        d.check_invariants().unwrap();
    }

    #[test]
    fn test_deregister_requires_zero_stake() {
        let mut stakes = Stakes::default();
        let mut d = distributor();
        stakes.set(user("a"), 100);
        d.register(user("a"), &stakes).unwrap();
        d.deposit_commissions(usdc(), 1_000, &stakes, 0).unwrap();
        assert!(matches!(
            d.deregister(&user("a"), &stakes),
            Err(FierceError::StateConflict(_))
        ));

        stakes.set(user("a"), 0);
        d.deregister(&user("a"), &stakes).unwrap();
        assert!(!d.is_registered(&user("a")));
        assert_eq!(d.total_eligible_stake(), 0);
        assert_eq!(d.claim(&user("a"), &usdc()).unwrap(), 1_000);
        assert!(matches!(
            d.deregister(&user("a"), &stakes),
            Err(FierceError::NotFound(_))
        ));
    }

    #[test]
    fn test_tokens_accrue_independently() {
        let mut stakes = Stakes::default();
        let mut d = distributor();
        let weth = Principal::from_label("weth");
        stakes.set(user("a"), 100);
        d.register(user("a"), &stakes).unwrap();
        d.deposit_commissions(usdc(), 1_000, &stakes, 0).unwrap();
        d.deposit_commissions(weth, 7, &stakes, 0).unwrap();
        assert_eq!(d.claim(&user("a"), &usdc()).unwrap(), 1_000);
        assert_eq!(d.pending_rewards(&user("a"), &weth).unwrap(), 7);
    }

    #[test]
    fn test_rollback_reverts_exclusion_and_deposit() {
        let mut stakes = Stakes::default();
        let mut d = distributor();
        stakes.set(user("a"), 100);
        stakes.set(user("b"), 300);
        d.register(user("a"), &stakes).unwrap();
        d.register(user("b"), &stakes).unwrap();
        d.deposit_commissions(usdc(), 400, &stakes, 0).unwrap();
        d.take_events();

        let cp = d.checkpoint();
        d.exclude(&user("a")).unwrap();
        d.deposit_commissions(usdc(), 900, &stakes, 0).unwrap();
        d.rollback(cp);
        d.commit();

        assert!(!d.is_excluded(&user("a")));
        assert_eq!(d.total_eligible_stake(), 400);
        assert_eq!(d.token_ledger(&usdc()).unwrap().deposited, 400);
        assert_eq!(d.token_ledger(&usdc()).unwrap().forfeited, 0);
        assert_eq!(d.pending_rewards(&user("a"), &usdc()).unwrap(), 100);
        assert!(d.take_events().is_empty());
        assert_eq!(d.deposit_commissions(usdc(), 40, &stakes, 0).unwrap(), 1);
        d.check_invariants().unwrap();
    }

    proptest! {
        #[test]
        fn prop_payouts_never_exceed_deposits(
            ops in proptest::collection::vec((0u8..4, 0usize..4, 1u128..1_000_000), 1..60),
        ) {
            let users: Vec<Principal> = (0..4).map(|i| user(&format!("u{}", i))).collect();
            let mut stakes = Stakes::default();
            let mut d = distributor();
            for (op, who, value) in ops {
                let u = users[who];
                match op {
                    0 => {
                        stakes.set(u, value);
                        if !d.register(u, &stakes).unwrap() {
                            d.sync_stake(&u, &stakes).unwrap();
                        }
                    }
                    1 => {
                        let _ = d.deposit_commissions(usdc(), value, &stakes, 0);
                    }
                    2 if d.is_excluded(&u) => {
                        prop_assert!(d.claim(&u, &usdc()).is_err());
                    }
                    2 => {
                        let preview = d.pending_rewards(&u, &usdc()).unwrap();
                        let paid = d.claim(&u, &usdc()).unwrap();
                        prop_assert_eq!(preview, paid);
                        prop_assert_eq!(d.claim(&u, &usdc()).unwrap(), 0);
                    }
                    _ => {
                        let _ = d.exclude(&u);
                    }
                }
                d.check_invariants().unwrap();
            }
        }
    }
}
