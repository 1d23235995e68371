// crates/fierce-ledger/src/commission/mod.rs
//
// Commission distribution: externally deposited amounts are shared among
// registered participants in proportion to their stake.
//
// Two designs are provided and kept separate on purpose:
//
// - `SnapshotDistributor` records every eligible participant's stake at each
//   deposit. Exact historical shares; O(participants) per deposit.
//   Exclusion is retroactive: an excluded participant forfeits every
//   unclaimed snapshot.
// - `AccumulatorDistributor` keeps a reward-per-stake accumulator per token.
//   O(1) per deposit; stake changes must be reported through `sync_stake`.
//   Exclusion forfeits unclaimed accrual and takes effect from then on.
//
// Both read stake through `StakeBackend`; neither tracks stake movements
// itself.

pub mod accumulator;
pub mod snapshot;

pub use accumulator::{
    AccumulatorCheckpoint, Accrual, AccumulatorDistributor, Participant, TokenLedger,
};
pub use snapshot::{CommissionDeposit, SnapshotCheckpoint, SnapshotDistributor, UserSnapshot};

use fierce_core::{Amount, FierceError, LedgerEvent, Principal, StakeBackend, Timestamp, TokenId};

use crate::config::{DistributorConfig, DistributorDesign};
use crate::journal::Journaled;
use crate::vault::EventSource;

/// Operations shared by both distributor designs.
pub trait CommissionDistributor: EventSource + Journaled + Send {
    /// Add `user` to the participant set. Returns `false` if already present.
    fn register(&mut self, user: Principal, backend: &dyn StakeBackend)
        -> Result<bool, FierceError>;

    /// Remove `user`. Only allowed once the backend reports zero stake.
    fn deregister(
        &mut self,
        user: &Principal,
        backend: &dyn StakeBackend,
    ) -> Result<(), FierceError>;

    /// Bar `user` from claiming and from the eligible-stake denominator.
    fn exclude(&mut self, user: &Principal) -> Result<(), FierceError>;

    /// Lift an exclusion. Forfeited amounts stay forfeited.
    fn include(&mut self, user: &Principal, backend: &dyn StakeBackend)
        -> Result<(), FierceError>;

    /// Record `amount` of `token` for distribution at time `now`. Returns
    /// the deposit id.
    fn deposit_commissions(
        &mut self,
        token: TokenId,
        amount: Amount,
        backend: &dyn StakeBackend,
        now: Timestamp,
    ) -> Result<u64, FierceError>;

    fn pending_rewards(&self, user: &Principal, token: &TokenId) -> Result<Amount, FierceError>;

    /// Settle everything `user` is owed in `token`. Zero when nothing is owed.
    fn claim(&mut self, user: &Principal, token: &TokenId) -> Result<Amount, FierceError>;

    fn is_registered(&self, user: &Principal) -> bool;

    fn is_excluded(&self, user: &Principal) -> bool;

    fn check_invariants(&self) -> Result<(), FierceError>;
}

/// Either design, chosen from configuration.
#[derive(Debug, Clone)]
pub enum Distributor {
    Snapshot(SnapshotDistributor),
    Accumulator(AccumulatorDistributor),
}

impl Distributor {
    pub fn new(config: &DistributorConfig) -> Result<Self, FierceError> {
        Ok(match config.design {
            DistributorDesign::Snapshot => Distributor::Snapshot(SnapshotDistributor::new(config)?),
            DistributorDesign::Accumulator => {
                Distributor::Accumulator(AccumulatorDistributor::new(config)?)
            }
        })
    }

    pub fn design(&self) -> DistributorDesign {
        match self {
            Distributor::Snapshot(_) => DistributorDesign::Snapshot,
            Distributor::Accumulator(_) => DistributorDesign::Accumulator,
        }
    }

    /// Report a stake change. The snapshot design reads stake lazily at
    /// deposit time and has nothing to update.
    pub fn sync_stake(
        &mut self,
        user: &Principal,
        backend: &dyn StakeBackend,
    ) -> Result<Amount, FierceError> {
        match self {
            Distributor::Snapshot(_) => Ok(backend.user_stake(user)),
            Distributor::Accumulator(d) => d.sync_stake(user, backend),
        }
    }

    /// Token of a recorded deposit. Only the snapshot design keeps
    /// per-deposit records.
    pub fn deposit_token(&self, id: u64) -> Option<TokenId> {
        match self {
            Distributor::Snapshot(d) => d.deposit(id).map(|deposit| deposit.token),
            Distributor::Accumulator(_) => None,
        }
    }

    /// Claim `user`'s share of one deposit.
    ///
    /// # Errors
    /// `StateConflict` under the accumulator design, which pools deposits
    /// per token.
    pub fn claim_deposit(&mut self, user: &Principal, id: u64) -> Result<Amount, FierceError> {
        match self {
            Distributor::Snapshot(d) => d.claim_deposit(user, id),
            Distributor::Accumulator(_) => Err(FierceError::StateConflict(
                "accumulator design has no per-deposit claims".to_string(),
            )),
        }
    }
}

macro_rules! delegate {
    ($self:ident, $d:ident => $body:expr) => {
        match $self {
            Distributor::Snapshot($d) => $body,
            Distributor::Accumulator($d) => $body,
        }
    };
}

/// Checkpoint of whichever design a `Distributor` holds.
#[derive(Debug, Clone, Copy)]
pub enum DistributorCheckpoint {
    Snapshot(SnapshotCheckpoint),
    Accumulator(AccumulatorCheckpoint),
}

impl Journaled for Distributor {
    type Checkpoint = DistributorCheckpoint;

    fn checkpoint(&mut self) -> DistributorCheckpoint {
        match self {
            Distributor::Snapshot(d) => DistributorCheckpoint::Snapshot(d.checkpoint()),
            Distributor::Accumulator(d) => DistributorCheckpoint::Accumulator(d.checkpoint()),
        }
    }

    fn rollback(&mut self, checkpoint: DistributorCheckpoint) {
        match (self, checkpoint) {
            (Distributor::Snapshot(d), DistributorCheckpoint::Snapshot(cp)) => d.rollback(cp),
            (Distributor::Accumulator(d), DistributorCheckpoint::Accumulator(cp)) => {
                d.rollback(cp)
            }
            // The design never changes after construction.
            _ => {}
        }
    }

    fn commit(&mut self) {
        delegate!(self, d => d.commit())
    }
}

impl CommissionDistributor for Distributor {
    fn register(
        &mut self,
        user: Principal,
        backend: &dyn StakeBackend,
    ) -> Result<bool, FierceError> {
        delegate!(self, d => d.register(user, backend))
    }

    fn deregister(
        &mut self,
        user: &Principal,
        backend: &dyn StakeBackend,
    ) -> Result<(), FierceError> {
        delegate!(self, d => d.deregister(user, backend))
    }

    fn exclude(&mut self, user: &Principal) -> Result<(), FierceError> {
        delegate!(self, d => d.exclude(user))
    }

    fn include(
        &mut self,
        user: &Principal,
        backend: &dyn StakeBackend,
    ) -> Result<(), FierceError> {
        delegate!(self, d => d.include(user, backend))
    }

    fn deposit_commissions(
        &mut self,
        token: TokenId,
        amount: Amount,
        backend: &dyn StakeBackend,
        now: Timestamp,
    ) -> Result<u64, FierceError> {
        delegate!(self, d => d.deposit_commissions(token, amount, backend, now))
    }

    fn pending_rewards(&self, user: &Principal, token: &TokenId) -> Result<Amount, FierceError> {
        delegate!(self, d => d.pending_rewards(user, token))
    }

    fn claim(&mut self, user: &Principal, token: &TokenId) -> Result<Amount, FierceError> {
        delegate!(self, d => CommissionDistributor::claim(d, user, token))
    }

    fn is_registered(&self, user: &Principal) -> bool {
        delegate!(self, d => d.is_registered(user))
    }

    fn is_excluded(&self, user: &Principal) -> bool {
        delegate!(self, d => d.is_excluded(user))
    }

    fn check_invariants(&self) -> Result<(), FierceError> {
        delegate!(self, d => d.check_invariants())
    }
}

impl EventSource for Distributor {
    fn take_events(&mut self) -> Vec<LedgerEvent> {
        delegate!(self, d => d.take_events())
    }
}
