// crates/fierce-ledger/src/emission.rs
//
// Block-emission schedule with a hard funding ceiling.
//
// A window emits `rate_per_step` reward units for every step in
// [start_step, end_step). Each `update` converts the steps elapsed since the
// last update into a theoretical emission, pays out what the available
// funding allows, and records the rest as missed emission. A shortfall is
// tracked rather than raised: blocking updates would freeze the whole pool.
//
// The window is set once and never extended.

use serde::{Deserialize, Serialize};

use fierce_core::{Amount, FierceError, Step};

use crate::fixed_point::add;

/// The bounded range during which the per-step rate is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionWindow {
    pub start_step: Step,
    /// Exclusive: no emission accrues for steps at or after `end_step`.
    pub end_step: Step,
    pub rate_per_step: Amount,
}

impl EmissionWindow {
    /// Number of steps covered by the window.
    pub fn len(&self) -> u64 {
        self.end_step - self.start_step
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total emission if every step were fully funded.
    pub fn total_emission(&self) -> Option<Amount> {
        (self.len() as Amount).checked_mul(self.rate_per_step)
    }

    pub fn has_ended(&self, step: Step) -> bool {
        step >= self.end_step
    }
}

/// Result of one scheduler update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionOutcome {
    /// Emission due by rate for the elapsed steps.
    pub theoretical: Amount,
    /// Emission actually credited, capped by funding.
    pub actual: Amount,
    /// `theoretical - actual`.
    pub shortfall: Amount,
    /// Step the scheduler advanced to. Zero when the update was a no-op.
    pub reached: Step,
}

impl EmissionOutcome {
    pub fn is_noop(&self) -> bool {
        self.reached == 0
    }
}

/// Converts elapsed steps into bounded reward amounts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmissionScheduler {
    window: Option<EmissionWindow>,
    last_update_step: Step,
    total_emitted: Amount,
    total_distributed: Amount,
    missed_emission: Amount,
    minimum_initial_funding: Amount,
}

impl EmissionScheduler {
    pub fn new(minimum_initial_funding: Amount) -> Self {
        Self {
            minimum_initial_funding,
            ..Self::default()
        }
    }

    /// Open the emission window at `current_step`.
    ///
    /// # Errors
    /// - `StateConflict` if a window already exists.
    /// - `InsufficientFunding` if `initial_funding` is below the minimum.
    /// - `InvalidInput` for a zero duration or zero rate.
    pub fn start_window(
        &mut self,
        current_step: Step,
        duration_steps: u64,
        rate_per_step: Amount,
        initial_funding: Amount,
    ) -> Result<EmissionWindow, FierceError> {
        if self.window.is_some() {
            return Err(FierceError::StateConflict(
                "emission window already started".to_string(),
            ));
        }
        if initial_funding < self.minimum_initial_funding {
            return Err(FierceError::InsufficientFunding {
                required: self.minimum_initial_funding,
                available: initial_funding,
            });
        }
        if duration_steps == 0 {
            return Err(FierceError::InvalidInput(
                "emission window must span at least one step".to_string(),
            ));
        }
        if rate_per_step == 0 {
            return Err(FierceError::InvalidInput(
                "emission rate must be nonzero".to_string(),
            ));
        }
        let end_step = current_step.checked_add(duration_steps).ok_or_else(|| {
            FierceError::Arithmetic("emission window end overflows".to_string())
        })?;

        let window = EmissionWindow {
            start_step: current_step,
            end_step,
            rate_per_step,
        };
        self.window = Some(window);
        self.last_update_step = current_step;
        Ok(window)
    }

    /// Compute what `update` would do without mutating anything.
    ///
    /// `update` is implemented on top of this function, so previews and
    /// mutations can never disagree.
    pub fn preview(
        &self,
        current_step: Step,
        total_staked: Amount,
        available_balance: Amount,
    ) -> Result<EmissionOutcome, FierceError> {
        let window = match self.window {
            Some(w) => w,
            None => return Ok(EmissionOutcome::default()),
        };
        if current_step <= self.last_update_step || total_staked == 0 {
            return Ok(EmissionOutcome::default());
        }
        let reached = current_step.min(window.end_step);
        if reached <= self.last_update_step {
            // Window exhausted.
            return Ok(EmissionOutcome::default());
        }

        let steps = (reached - self.last_update_step) as Amount;
        let theoretical = steps
            .checked_mul(window.rate_per_step)
            .ok_or_else(|| FierceError::overflow("theoretical emission"))?;
        let actual = theoretical.min(available_balance);

        Ok(EmissionOutcome {
            theoretical,
            actual,
            shortfall: theoretical - actual,
            reached,
        })
    }

    /// Advance the schedule to `current_step`.
    ///
    /// No-op (zero outcome) when no window exists, when `current_step` is not
    /// past the last update, when nothing is staked, or when the window is
    /// exhausted. Calling twice at the same step credits nothing the second
    /// time.
    pub fn update(
        &mut self,
        current_step: Step,
        total_staked: Amount,
        available_balance: Amount,
    ) -> Result<EmissionOutcome, FierceError> {
        let outcome = self.preview(current_step, total_staked, available_balance)?;
        if outcome.is_noop() {
            return Ok(outcome);
        }

        let total_emitted = add(self.total_emitted, outcome.theoretical, "total emitted")?;
        let total_distributed = add(self.total_distributed, outcome.actual, "total distributed")?;
        let missed_emission = add(self.missed_emission, outcome.shortfall, "missed emission")?;

        self.total_emitted = total_emitted;
        self.total_distributed = total_distributed;
        self.missed_emission = missed_emission;
        self.last_update_step = outcome.reached;
        Ok(outcome)
    }

    pub fn window(&self) -> Option<&EmissionWindow> {
        self.window.as_ref()
    }

    pub fn last_update_step(&self) -> Step {
        self.last_update_step
    }

    pub fn total_emitted(&self) -> Amount {
        self.total_emitted
    }

    pub fn total_distributed(&self) -> Amount {
        self.total_distributed
    }

    pub fn missed_emission(&self) -> Amount {
        self.missed_emission
    }
}
