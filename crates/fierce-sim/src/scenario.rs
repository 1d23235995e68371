// crates/fierce-sim/src/scenario.rs
//
// Scenario actions replayed by the simulator.

use serde::{Deserialize, Serialize};

/// An action executed when the scheduler reaches step `at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub at: u64,
    pub action: Action,
}

/// One user or operator action. Token amounts are whole tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Stake into the emission pool.
    Deposit { user: String, tokens: u64 },
    Withdraw { user: String, position: u64 },
    EmergencyWithdraw { user: String, position: u64 },
    Claim {
        user: String,
        #[serde(default)]
        compound: bool,
    },
    /// Top up emission funding from the treasury.
    Fund { tokens: u64 },
    /// Return unemitted funding to the treasury after the window ends.
    WithdrawSurplus,
    /// Open a fixed-lock position on the duration ledger.
    Lock { user: String, tokens: u64, days: u64 },
    Unlock { user: String, position: u64 },
    EmergencyUnlock { user: String, position: u64 },
    /// Fund the duration ledger's reward pool from the treasury.
    FundLocks { tokens: u64 },
    /// Grant a vesting schedule from the treasury, starting now.
    Vest {
        user: String,
        tokens: u64,
        days: u64,
        cliff_days: u64,
    },
    Release { user: String, index: usize },
    Register { user: String },
    Deregister { user: String },
    Exclude { user: String },
    Include { user: String },
    /// Deposit commission tokens from the treasury.
    DepositCommissions { tokens: u64 },
    ClaimCommissions { user: String },
    /// Claim one recorded deposit (snapshot design only).
    ClaimDeposit { user: String, deposit: u64 },
}

impl Action {
    /// Short name used in logs and the report.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Deposit { .. } => "deposit",
            Action::Withdraw { .. } => "withdraw",
            Action::EmergencyWithdraw { .. } => "emergency_withdraw",
            Action::Claim { .. } => "claim",
            Action::Fund { .. } => "fund",
            Action::WithdrawSurplus => "withdraw_surplus",
            Action::Lock { .. } => "lock",
            Action::Unlock { .. } => "unlock",
            Action::EmergencyUnlock { .. } => "emergency_unlock",
            Action::FundLocks { .. } => "fund_locks",
            Action::Vest { .. } => "vest",
            Action::Release { .. } => "release",
            Action::Register { .. } => "register",
            Action::Deregister { .. } => "deregister",
            Action::Exclude { .. } => "exclude",
            Action::Include { .. } => "include",
            Action::DepositCommissions { .. } => "deposit_commissions",
            Action::ClaimCommissions { .. } => "claim_commissions",
            Action::ClaimDeposit { .. } => "claim_deposit",
        }
    }

    /// The account the action is performed for, if any.
    pub fn user(&self) -> Option<&str> {
        match self {
            Action::Deposit { user, .. }
            | Action::Withdraw { user, .. }
            | Action::EmergencyWithdraw { user, .. }
            | Action::Claim { user, .. }
            | Action::Lock { user, .. }
            | Action::Unlock { user, .. }
            | Action::EmergencyUnlock { user, .. }
            | Action::Vest { user, .. }
            | Action::Release { user, .. }
            | Action::Register { user }
            | Action::Deregister { user }
            | Action::Exclude { user }
            | Action::Include { user }
            | Action::ClaimCommissions { user }
            | Action::ClaimDeposit { user, .. } => Some(user),
            Action::Fund { .. }
            | Action::WithdrawSurplus
            | Action::FundLocks { .. }
            | Action::DepositCommissions { .. } => None,
        }
    }
}

/// Stable order: by step, then by position in the input.
pub fn sort_actions(actions: &mut [ScheduledAction]) {
    actions.sort_by_key(|a| a.at);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_json_shape() {
        let action = Action::Lock {
            user: "carol".to_string(),
            tokens: 5,
            days: 30,
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains(r#""type":"lock""#));
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(back, action);
        assert_eq!(back.user(), Some("carol"));
    }

    #[test]
    fn test_sort_is_stable_within_a_step() {
        let mut actions = vec![
            ScheduledAction { at: 5, action: Action::Fund { tokens: 1 } },
            ScheduledAction { at: 1, action: Action::WithdrawSurplus },
            ScheduledAction { at: 5, action: Action::Fund { tokens: 2 } },
        ];
        sort_actions(&mut actions);
        assert_eq!(actions[0].at, 1);
        assert_eq!(actions[1].action, Action::Fund { tokens: 1 });
        assert_eq!(actions[2].action, Action::Fund { tokens: 2 });
    }
}
