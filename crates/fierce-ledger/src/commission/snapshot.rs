// crates/fierce-ledger/src/commission/snapshot.rs
//
// Snapshot-based commission distribution.
//
// Each deposit records the stake of every registered, non-excluded
// participant at that moment. A participant's share of a deposit is fixed
// forever after:
//
//   share = stake * PRECISION / total_eligible_stake
//   owed  = amount * share / PRECISION - claimed
//
// Exclusion applies retroactively: every unclaimed snapshot of the excluded
// participant is forfeited and stays forfeited after re-inclusion.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fierce_core::{
    Amount, EventKind, FierceError, LedgerEvent, Principal, StakeBackend, Timestamp, TokenId,
};

use crate::commission::CommissionDistributor;
use crate::config::DistributorConfig;
use crate::fixed_point::{add, mul_div, sub, Precision};
use crate::journal::{Journaled, JournaledMap, JournaledVec};
use crate::vault::EventSource;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionDeposit {
    pub id: u64,
    pub token: TokenId,
    pub amount: Amount,
    /// Time the deposit was recorded, as supplied by the caller.
    pub deposited_at: Timestamp,
    pub total_eligible_stake: Amount,
    pub claimed: Amount,
    pub forfeited: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub stake: Amount,
    pub claimed: Amount,
    pub was_excluded: bool,
}

#[derive(Debug, Clone)]
pub struct SnapshotDistributor {
    precision: Precision,
    /// Registered participants and their exclusion flag.
    participants: JournaledMap<Principal, bool>,
    deposits: JournaledVec<CommissionDeposit>,
    /// Keyed by user first so one user's deposits form a contiguous range.
    snapshots: JournaledMap<(Principal, u64), UserSnapshot>,
    events: Vec<LedgerEvent>,
}

impl SnapshotDistributor {
    pub fn new(config: &DistributorConfig) -> Result<Self, FierceError> {
        Ok(Self {
            precision: Precision::new(config.precision)?,
            participants: JournaledMap::new(),
            deposits: JournaledVec::new(),
            snapshots: JournaledMap::new(),
            events: Vec::new(),
        })
    }

    pub fn deposit(&self, id: u64) -> Option<&CommissionDeposit> {
        self.deposits.get(id as usize)
    }

    pub fn deposits(&self) -> &[CommissionDeposit] {
        &self.deposits
    }

    pub fn snapshot(&self, id: u64, user: &Principal) -> Option<&UserSnapshot> {
        self.snapshots.get(&(*user, id))
    }

    /// Stake that would be eligible if a deposit happened now.
    pub fn eligible_stake(&self, backend: &dyn StakeBackend) -> Result<Amount, FierceError> {
        let mut total: Amount = 0;
        for (user, excluded) in self.participants.iter() {
            if !excluded {
                total = add(total, backend.user_stake(user), "eligible stake")?;
            }
        }
        Ok(total)
    }

    fn entitlement(&self, deposit: &CommissionDeposit, snapshot: &UserSnapshot) -> Result<Amount, FierceError> {
        let share = mul_div(
            snapshot.stake,
            self.precision.scale(),
            deposit.total_eligible_stake,
        )?;
        mul_div(deposit.amount, share, self.precision.scale())
    }

    fn owed(&self, id: u64, user: &Principal) -> Result<Amount, FierceError> {
        let (deposit, snapshot) = match (self.deposit(id), self.snapshot(id, user)) {
            (Some(d), Some(s)) if !s.was_excluded => (d, s),
            _ => return Ok(0),
        };
        sub(self.entitlement(deposit, snapshot)?, snapshot.claimed, "snapshot owed")
    }

    /// Claim `user`'s share of a single deposit.
    ///
    /// # Errors
    /// - `NotFound` if the deposit or the user's snapshot does not exist.
    /// - `StateConflict` if the user is excluded or the snapshot was forfeited.
    pub fn claim_deposit(&mut self, user: &Principal, id: u64) -> Result<Amount, FierceError> {
        self.ensure_not_excluded(user)?;
        let snapshot = *self
            .snapshot(id, user)
            .ok_or_else(|| FierceError::NotFound(format!("snapshot of {} in deposit {}", user, id)))?;
        if snapshot.was_excluded {
            return Err(FierceError::StateConflict(format!(
                "{}'s share of deposit {} was forfeited",
                user, id
            )));
        }
        let amount = self.owed(id, user)?;
        self.record_claim(user, id, amount)?;
        Ok(amount)
    }

    fn record_claim(&mut self, user: &Principal, id: u64, amount: Amount) -> Result<(), FierceError> {
        if amount == 0 {
            return Ok(());
        }
        let deposit = self
            .deposits
            .get_mut(id as usize)
            .ok_or_else(|| FierceError::NotFound(format!("deposit {}", id)))?;
        let deposit_claimed = add(deposit.claimed, amount, "deposit claimed")?;
        let snapshot = self
            .snapshots
            .get_mut(&(*user, id))
            .ok_or_else(|| FierceError::NotFound(format!("snapshot of {} in deposit {}", user, id)))?;
        let snapshot_claimed = add(snapshot.claimed, amount, "snapshot claimed")?;
        snapshot.claimed = snapshot_claimed;
        deposit.claimed = deposit_claimed;
        let token = deposit.token;

        debug!(user = %user, deposit = id, %amount, "commission claimed");
        self.events.push(LedgerEvent::new(EventKind::RewardClaimed {
            owner: *user,
            token,
            amount,
        }));
        Ok(())
    }

    fn ensure_not_excluded(&self, user: &Principal) -> Result<(), FierceError> {
        if self.participants.get(user).copied().unwrap_or(false) {
            return Err(FierceError::StateConflict(format!(
                "{} is excluded from commissions",
                user
            )));
        }
        Ok(())
    }

    /// Ids of every deposit that recorded a snapshot for `user`.
    fn recorded_ids(&self, user: &Principal) -> impl Iterator<Item = u64> + '_ {
        self.snapshots
            .range((*user, 0)..=(*user, u64::MAX))
            .map(|((_, id), _)| *id)
    }

    fn deposits_of<'a>(&'a self, user: &Principal, token: &'a TokenId) -> impl Iterator<Item = u64> + 'a {
        self.recorded_ids(user).filter(move |id| {
            self.deposits
                .get(*id as usize)
                .map(|d| d.token == *token)
                .unwrap_or(false)
        })
    }
}

impl CommissionDistributor for SnapshotDistributor {
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
        self.participants.insert(user, false);
        let stake = backend.user_stake(&user);
        info!(user = %user, %stake, "participant registered");
        self.events
            .push(LedgerEvent::new(EventKind::ParticipantRegistered { user, stake }));
        Ok(true)
    }

    fn deregister(
        &mut self,
        user: &Principal,
        backend: &dyn StakeBackend,
    ) -> Result<(), FierceError> {
        if !self.participants.contains_key(user) {
            return Err(FierceError::NotFound(format!("participant {}", user)));
        }
        let external = backend.user_stake(user);
        if external != 0 {
            return Err(FierceError::StateConflict(format!(
                "{} still has {} staked",
                user, external
            )));
        }
        // Recorded snapshots stay claimable.
        self.participants.remove(user);
        info!(user = %user, "participant deregistered");
        self.events
            .push(LedgerEvent::new(EventKind::ParticipantDeregistered { user: *user }));
        Ok(())
    }

    fn exclude(&mut self, user: &Principal) -> Result<(), FierceError> {
        match self.participants.get(user) {
            None => return Err(FierceError::NotFound(format!("participant {}", user))),
            Some(true) => return Ok(()),
            Some(false) => {}
        }

        let mut forfeits = Vec::new();
        for id in self.recorded_ids(user) {
            let owed = self.owed(id, user)?;
            let deposit = self
                .deposit(id)
                .ok_or_else(|| FierceError::NotFound(format!("deposit {}", id)))?;
            forfeits.push((id, add(deposit.forfeited, owed, "deposit forfeited")?, owed));
        }

        let mut total_forfeited: Amount = 0;
        for (id, forfeited, owed) in forfeits {
            if let Some(deposit) = self.deposits.get_mut(id as usize) {
                deposit.forfeited = forfeited;
            }
            if let Some(snapshot) = self.snapshots.get_mut(&(*user, id)) {
                snapshot.was_excluded = true;
            }
            total_forfeited = total_forfeited.saturating_add(owed);
        }
        self.participants.insert(*user, true);
        if total_forfeited > 0 {
            warn!(user = %user, forfeited = %total_forfeited, "recorded commission shares forfeited on exclusion");
        }
        self.events.push(LedgerEvent::new(EventKind::ParticipantExcluded {
            user: *user,
            excluded: true,
        }));
        Ok(())
    }

    fn include(
        &mut self,
        user: &Principal,
        _backend: &dyn StakeBackend,
    ) -> Result<(), FierceError> {
        match self.participants.get_mut(user) {
            None => Err(FierceError::NotFound(format!("participant {}", user))),
            Some(excluded) if !*excluded => Ok(()),
            Some(excluded) => {
                *excluded = false;
                self.events.push(LedgerEvent::new(EventKind::ParticipantExcluded {
                    user: *user,
                    excluded: false,
                }));
                Ok(())
            }
        }
    }

    fn deposit_commissions(
        &mut self,
        token: TokenId,
        amount: Amount,
        backend: &dyn StakeBackend,
        now: Timestamp,
    ) -> Result<u64, FierceError> {
        if amount == 0 {
            return Err(FierceError::InvalidInput(
                "commission amount must be nonzero".to_string(),
            ));
        }
        let mut recorded = Vec::new();
        let mut total: Amount = 0;
        for (user, excluded) in self.participants.iter() {
            if *excluded {
                continue;
            }
            let stake = backend.user_stake(user);
            if stake > 0 {
                total = add(total, stake, "eligible stake")?;
                recorded.push((*user, stake));
            }
        }
        if total == 0 {
            return Err(FierceError::StateConflict(
                "no eligible stake to distribute commissions to".to_string(),
            ));
        }

        let id = self.deposits.len() as u64;
        self.deposits.push(CommissionDeposit {
            id,
            token,
            amount,
            deposited_at: now,
            total_eligible_stake: total,
            claimed: 0,
            forfeited: 0,
        });
        let participants = recorded.len();
        for (user, stake) in recorded {
            self.snapshots.insert(
                (user, id),
                UserSnapshot {
                    stake,
                    claimed: 0,
                    was_excluded: false,
                },
            );
        }

        debug!(deposit = id, token = %token, %amount, eligible = %total, participants, at = now, "commission snapshot recorded");
        self.events.push(LedgerEvent::new(EventKind::CommissionDeposited {
            deposit: id,
            token,
            amount,
            eligible_stake: total,
            at: now,
        }));
        Ok(id)
    }

    fn pending_rewards(&self, user: &Principal, token: &TokenId) -> Result<Amount, FierceError> {
        if self.is_excluded(user) {
            return Ok(0);
        }
        let mut total: Amount = 0;
        for id in self.deposits_of(user, token) {
            total = add(total, self.owed(id, user)?, "pending commission")?;
        }
        Ok(total)
    }

    /// Claim every recorded share of `token`.
    fn claim(&mut self, user: &Principal, token: &TokenId) -> Result<Amount, FierceError> {
        self.ensure_not_excluded(user)?;
        let mut owed = Vec::new();
        for id in self.deposits_of(user, token) {
            owed.push((id, self.owed(id, user)?));
        }
        let mut total: Amount = 0;
        for (_, amount) in &owed {
            total = add(total, *amount, "claimed commission")?;
        }
        for (id, amount) in owed {
            self.record_claim(user, id, amount)?;
        }
        Ok(total)
    }

    fn is_registered(&self, user: &Principal) -> bool {
        self.participants.contains_key(user)
    }

    fn is_excluded(&self, user: &Principal) -> bool {
        self.participants.get(user).copied().unwrap_or(false)
    }

    fn check_invariants(&self) -> Result<(), FierceError> {
        let mut recorded: HashMap<u64, Amount> = HashMap::new();
        for ((_, id), snapshot) in self.snapshots.iter() {
            let entry = recorded.entry(*id).or_insert(0);
            *entry = add(*entry, snapshot.stake, "snapshot stake")?;
        }
        for deposit in self.deposits.iter() {
            if recorded.get(&deposit.id).copied().unwrap_or(0) != deposit.total_eligible_stake {
                return Err(FierceError::StateConflict(format!(
                    "deposit {} snapshots do not sum to its eligible stake",
                    deposit.id
                )));
            }
            let out = add(deposit.claimed, deposit.forfeited, "deposit out")?;
            if out > deposit.amount {
                return Err(FierceError::StateConflict(format!(
                    "deposit {} paid {} of {}",
                    deposit.id, out, deposit.amount
                )));
            }
        }
        Ok(())
    }
}

impl EventSource for SnapshotDistributor {
    fn take_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Container log positions of a `SnapshotDistributor`.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotCheckpoint {
    participants: usize,
    deposits: usize,
    snapshots: usize,
    events: usize,
}

impl Journaled for SnapshotDistributor {
    type Checkpoint = SnapshotCheckpoint;

    fn checkpoint(&mut self) -> SnapshotCheckpoint {
        SnapshotCheckpoint {
            participants: self.participants.begin(),
            deposits: self.deposits.begin(),
            snapshots: self.snapshots.begin(),
            events: self.events.len(),
        }
    }

    fn rollback(&mut self, cp: SnapshotCheckpoint) {
        self.participants.rollback(cp.participants);
        self.deposits.rollback(cp.deposits);
        self.snapshots.rollback(cp.snapshots);
        self.events.truncate(cp.events);
    }

    fn commit(&mut self) {
        self.participants.commit();
        self.deposits.commit();
        self.snapshots.commit();
    }
}
