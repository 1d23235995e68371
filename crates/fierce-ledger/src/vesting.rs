// crates/fierce-ledger/src/vesting.rs
//
// Linear vesting with a cliff.
//
// Nothing is releasable before `start + cliff`. Between the cliff and
// `start + duration` the vested amount grows linearly from zero; at the end
// everything has vested. Release is idempotent at a fixed time: releasing
// twice at the same `now` transfers nothing the second time.

use serde::{Deserialize, Serialize};
use tracing::debug;

use fierce_core::{Amount, EventKind, FierceError, LedgerEvent, Principal, Timestamp};

use crate::fixed_point::{add, mul_div};
use crate::journal::{Journaled, JournaledMap};
use crate::vault::EventSource;

/// One vesting grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VestingSchedule {
    pub beneficiary: Principal,
    pub total_amount: Amount,
    pub released_amount: Amount,
    pub start_time: Timestamp,
    pub duration: u64,
    pub cliff: u64,
}

impl VestingSchedule {
    pub fn new(
        beneficiary: Principal,
        total_amount: Amount,
        start_time: Timestamp,
        duration: u64,
        cliff: u64,
    ) -> Result<Self, FierceError> {
        if beneficiary.is_zero() {
            return Err(FierceError::InvalidInput("zero beneficiary".to_string()));
        }
        if total_amount == 0 {
            return Err(FierceError::InvalidInput(
                "vesting amount must be nonzero".to_string(),
            ));
        }
        if duration <= cliff {
            return Err(FierceError::InvalidInput(format!(
                "duration {} must exceed cliff {}",
                duration, cliff
            )));
        }
        if start_time.checked_add(duration).is_none() {
            return Err(FierceError::InvalidInput(
                "vesting end overflows the timestamp range".to_string(),
            ));
        }
        Ok(Self {
            beneficiary,
            total_amount,
            released_amount: 0,
            start_time,
            duration,
            cliff,
        })
    }

    /// Cumulative amount vested at `now`, released or not.
    pub fn vested_at(&self, now: Timestamp) -> Result<Amount, FierceError> {
        let cliff_end = self.start_time + self.cliff;
        let end = self.start_time + self.duration;
        if now < cliff_end {
            return Ok(0);
        }
        if now >= end {
            return Ok(self.total_amount);
        }
        mul_div(
            self.total_amount,
            (now - cliff_end) as Amount,
            (self.duration - self.cliff) as Amount,
        )
    }

    /// Amount that can be released at `now`.
    pub fn releasable(&self, now: Timestamp) -> Result<Amount, FierceError> {
        Ok(self.vested_at(now)?.saturating_sub(self.released_amount))
    }

    pub fn is_fully_released(&self) -> bool {
        self.released_amount >= self.total_amount
    }
}

/// All vesting schedules, indexed per beneficiary.
#[derive(Debug, Clone, Default)]
pub struct VestingLedger {
    schedules: JournaledMap<Principal, Vec<VestingSchedule>>,
    total_locked: Amount,
    total_released: Amount,
    events: Vec<LedgerEvent>,
}

impl VestingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a schedule and return its index within the beneficiary's list.
    pub fn create_schedule(
        &mut self,
        beneficiary: Principal,
        total_amount: Amount,
        start_time: Timestamp,
        duration: u64,
        cliff: u64,
    ) -> Result<usize, FierceError> {
        let schedule = VestingSchedule::new(beneficiary, total_amount, start_time, duration, cliff)?;
        let total_locked = add(self.total_locked, total_amount, "vesting locked")?;

        let list = self.schedules.get_or_insert_with(beneficiary, Vec::new);
        list.push(schedule);
        let index = list.len() - 1;
        self.total_locked = total_locked;

        debug!(beneficiary = %beneficiary, index, %total_amount, start_time, duration, cliff, "vesting schedule created");
        self.events.push(LedgerEvent::new(EventKind::VestingCreated {
            beneficiary,
            index,
            total: total_amount,
        }));
        Ok(index)
    }

    pub fn schedule(&self, beneficiary: &Principal, index: usize) -> Option<&VestingSchedule> {
        self.schedules.get(beneficiary).and_then(|s| s.get(index))
    }

    pub fn schedules_of(&self, beneficiary: &Principal) -> &[VestingSchedule] {
        self.schedules
            .get(beneficiary)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn releasable(
        &self,
        beneficiary: &Principal,
        index: usize,
        now: Timestamp,
    ) -> Result<Amount, FierceError> {
        self.schedule(beneficiary, index)
            .ok_or_else(|| not_found(beneficiary, index))?
            .releasable(now)
    }

    /// Release everything vested and not yet released.
    ///
    /// # Errors
    /// `StateConflict` when nothing is releasable.
    pub fn release(
        &mut self,
        beneficiary: &Principal,
        index: usize,
        now: Timestamp,
    ) -> Result<Amount, FierceError> {
        let schedule = self
            .schedules
            .get_mut(beneficiary)
            .and_then(|s| s.get_mut(index))
            .ok_or_else(|| not_found(beneficiary, index))?;
        let amount = schedule.releasable(now)?;
        if amount == 0 {
            return Err(FierceError::StateConflict(format!(
                "nothing releasable for schedule {} at {}",
                index, now
            )));
        }
        let total_released = add(self.total_released, amount, "vesting released")?;
        schedule.released_amount += amount;
        self.total_released = total_released;

        debug!(beneficiary = %beneficiary, index, %amount, "vesting released");
        self.events.push(LedgerEvent::new(EventKind::VestingReleased {
            beneficiary: *beneficiary,
            index,
            amount,
        }));
        Ok(amount)
    }

    pub fn total_locked(&self) -> Amount {
        self.total_locked
    }

    pub fn total_released(&self) -> Amount {
        self.total_released
    }

    /// Tokens still held on behalf of beneficiaries.
    pub fn outstanding(&self) -> Amount {
        self.total_locked.saturating_sub(self.total_released)
    }
}

fn not_found(beneficiary: &Principal, index: usize) -> FierceError {
    FierceError::NotFound(format!("vesting schedule {} for {}", index, beneficiary))
}

impl EventSource for VestingLedger {
    fn take_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VestingCheckpoint {
    total_locked: Amount,
    total_released: Amount,
    schedules: usize,
    events: usize,
}

impl Journaled for VestingLedger {
    type Checkpoint = VestingCheckpoint;

    fn checkpoint(&mut self) -> VestingCheckpoint {
        VestingCheckpoint {
            total_locked: self.total_locked,
            total_released: self.total_released,
            schedules: self.schedules.begin(),
            events: self.events.len(),
        }
    }

    fn rollback(&mut self, cp: VestingCheckpoint) {
        self.total_locked = cp.total_locked;
        self.total_released = cp.total_released;
        self.schedules.rollback(cp.schedules);
        self.events.truncate(cp.events);
    }

    fn commit(&mut self) {
        self.schedules.commit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bob() -> Principal {
        Principal::from_label("bob")
    }

    #[test]
    fn test_schedule_validation() {
        assert!(VestingSchedule::new(bob(), 1_000, 0, 100, 100).is_err());
        assert!(VestingSchedule::new(bob(), 0, 0, 1_000, 100).is_err());
        assert!(VestingSchedule::new(Principal::ZERO, 1_000, 0, 1_000, 100).is_err());
        assert!(VestingSchedule::new(bob(), 1_000, u64::MAX, 1_000, 100).is_err());
    }

    #[test]
    fn test_cliff_and_linear_release() {
        let schedule = VestingSchedule::new(bob(), 1_000, 0, 1_000, 100).unwrap();
        assert_eq!(schedule.releasable(50).unwrap(), 0);
        assert_eq!(schedule.releasable(100).unwrap(), 0);
        assert_eq!(schedule.releasable(550).unwrap(), 500);
        assert_eq!(schedule.releasable(1_000).unwrap(), 1_000);
        assert_eq!(schedule.releasable(5_000).unwrap(), 1_000);
    }

    #[test]
    fn test_release_is_idempotent_at_fixed_time() {
        let mut ledger = VestingLedger::new();
        let idx = ledger.create_schedule(bob(), 1_000, 0, 1_000, 100).unwrap();
        assert!(matches!(
            ledger.release(&bob(), idx, 100),
            Err(FierceError::StateConflict(_))
        ));
        assert_eq!(ledger.release(&bob(), idx, 550).unwrap(), 500);
        assert!(ledger.release(&bob(), idx, 550).is_err());
        assert_eq!(ledger.release(&bob(), idx, 2_000).unwrap(), 500);
        assert!(ledger.schedule(&bob(), idx).unwrap().is_fully_released());
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn test_multiple_schedules_per_beneficiary() {
        let mut ledger = VestingLedger::new();
        assert_eq!(ledger.create_schedule(bob(), 1_000, 0, 1_000, 0).unwrap(), 0);
        assert_eq!(ledger.create_schedule(bob(), 500, 100, 200, 50).unwrap(), 1);
        assert_eq!(ledger.schedules_of(&bob()).len(), 2);
        assert_eq!(ledger.total_locked(), 1_500);
        assert!(matches!(
            ledger.releasable(&bob(), 2, 0),
            Err(FierceError::NotFound(_))
        ));
        assert_eq!(ledger.take_events().len(), 2);
    }

    #[test]
    fn test_rollback_restores_release_and_new_schedule() {
        let mut ledger = VestingLedger::new();
        let idx = ledger.create_schedule(bob(), 1_000, 0, 1_000, 0).unwrap();
        ledger.take_events();

        let cp = ledger.checkpoint();
        ledger.release(&bob(), idx, 500).unwrap();
        ledger.create_schedule(bob(), 300, 0, 100, 0).unwrap();
        ledger.rollback(cp);
        ledger.commit();

        assert_eq!(ledger.schedules_of(&bob()).len(), 1);
        assert_eq!(ledger.schedule(&bob(), idx).unwrap().released_amount, 0);
        assert_eq!(ledger.total_locked(), 1_000);
        assert_eq!(ledger.total_released(), 0);
        assert!(ledger.take_events().is_empty());
        assert_eq!(ledger.release(&bob(), idx, 500).unwrap(), 500);
    }

    proptest! {
        #[test]
        fn prop_released_never_exceeds_total(
            total in 1u128..1_000_000_000_000,
            cliff in 0u64..1_000,
            extra in 1u64..10_000,
            times in proptest::collection::vec(0u64..20_000, 1..20),
        ) {
            let mut ledger = VestingLedger::new();
            let idx = ledger.create_schedule(bob(), total, 0, cliff + extra, cliff).unwrap();
            let mut sorted = times.clone();
            sorted.sort_unstable();
            let mut last_vested = 0;
            for t in sorted {
                let _ = ledger.release(&bob(), idx, t);
                let s = ledger.schedule(&bob(), idx).unwrap();
                let vested = s.vested_at(t).unwrap();
                prop_assert!(vested >= last_vested);
                prop_assert_eq!(s.released_amount, vested);
                prop_assert!(s.released_amount <= total);
                prop_assert_eq!(s.releasable(t).unwrap(), 0);
                last_vested = vested;
            }
        }
    }
}
