// crates/fierce-ledger/src/timelock.rs
//
// Time-delayed admin changes: queue a value now, apply it once the delay has
// elapsed.

use serde::{Deserialize, Serialize};

use fierce_core::{FierceError, Timestamp};

/// A queued change that becomes applicable at `eligible_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange<T> {
    pub value: T,
    pub eligible_at: Timestamp,
}

impl<T> PendingChange<T> {
    pub fn new(value: T, now: Timestamp, delay: u64) -> Result<Self, FierceError> {
        let eligible_at = now
            .checked_add(delay)
            .ok_or_else(|| FierceError::Arithmetic("timelock eligibility overflow".to_string()))?;
        Ok(Self { value, eligible_at })
    }

    pub fn is_ready(&self, now: Timestamp) -> bool {
        now >= self.eligible_at
    }

    /// Consume the change if it is ready.
    ///
    /// # Errors
    /// `StateConflict` if `now` is before `eligible_at`.
    pub fn take(self, now: Timestamp) -> Result<T, FierceError> {
        if !self.is_ready(now) {
            return Err(FierceError::StateConflict(format!(
                "change not executable until {} (now {})",
                self.eligible_at, now
            )));
        }
        Ok(self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_before_delay() {
        let change = PendingChange::new(42u64, 1_000, 50).unwrap();
        assert_eq!(change.eligible_at, 1_050);
        assert!(!change.is_ready(1_049));
        assert!(change.clone().take(1_049).is_err());
        assert_eq!(change.take(1_050).unwrap(), 42);
    }

    #[test]
    fn test_eligibility_overflow() {
        assert!(PendingChange::new((), u64::MAX, 1).is_err());
    }
}
