// crates/fierce-core/src/events.rs
//
// Notifications emitted by the ledger for indexers and auditors.
//
// Each event carries the numeric deltas of the operation that produced it, so
// that an external observer can rebuild pool, position, and distributor
// history from the event stream alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::{Principal, TokenId};
use crate::{Amount, Step, Timestamp};

/// A single ledger notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Time-ordered unique event id.
    pub id: Uuid,
    /// Wall-clock time the event was recorded.
    pub recorded_at: DateTime<Utc>,
    pub kind: EventKind,
}

impl LedgerEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: Uuid::now_v7(),
            recorded_at: Utc::now(),
            kind,
        }
    }

    /// Stable snake_case name of the event kind, for counters and filters.
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// What happened.
///
/// Amount fields serialize as decimal strings; see `amount_serde`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    StakeOpened {
        owner: Principal,
        position: u64,
        #[serde(with = "crate::amount_serde")]
        amount: Amount,
        at: u64,
    },
    StakeClosed {
        owner: Principal,
        position: u64,
        #[serde(with = "crate::amount_serde")]
        principal: Amount,
        #[serde(with = "crate::amount_serde")]
        reward: Amount,
        at: u64,
    },
    RewardSettled {
        owner: Principal,
        #[serde(with = "crate::amount_serde")]
        amount: Amount,
        compounded: bool,
    },
    PoolUpdated {
        step: Step,
        #[serde(with = "crate::amount_serde")]
        reward: Amount,
        #[serde(with = "crate::amount_serde")]
        acc_reward_per_share: Amount,
    },
    EmissionStarted {
        start_step: Step,
        end_step: Step,
        #[serde(with = "crate::amount_serde")]
        rate_per_step: Amount,
        #[serde(with = "crate::amount_serde")]
        initial_funding: Amount,
    },
    FundingShortfall {
        step: Step,
        #[serde(with = "crate::amount_serde")]
        theoretical: Amount,
        #[serde(with = "crate::amount_serde")]
        actual: Amount,
        #[serde(with = "crate::amount_serde")]
        shortfall: Amount,
    },
    RewardsFunded {
        #[serde(with = "crate::amount_serde")]
        amount: Amount,
        #[serde(with = "crate::amount_serde")]
        total_funded: Amount,
    },
    SurplusWithdrawn {
        #[serde(with = "crate::amount_serde")]
        amount: Amount,
    },
    CommissionDeposited {
        deposit: u64,
        token: TokenId,
        #[serde(with = "crate::amount_serde")]
        amount: Amount,
        #[serde(with = "crate::amount_serde")]
        eligible_stake: Amount,
        at: Timestamp,
    },
    RewardClaimed {
        owner: Principal,
        token: TokenId,
        #[serde(with = "crate::amount_serde")]
        amount: Amount,
    },
    ParticipantRegistered {
        user: Principal,
        #[serde(with = "crate::amount_serde")]
        stake: Amount,
    },
    ParticipantDeregistered {
        user: Principal,
    },
    ParticipantExcluded {
        user: Principal,
        excluded: bool,
    },
    RateChangeQueued {
        duration: u64,
        rate: u64,
        eligible_at: Timestamp,
    },
    RateChangeApplied {
        duration: u64,
        rate: u64,
    },
    VestingCreated {
        beneficiary: Principal,
        index: usize,
        #[serde(with = "crate::amount_serde")]
        total: Amount,
    },
    VestingReleased {
        beneficiary: Principal,
        index: usize,
        #[serde(with = "crate::amount_serde")]
        amount: Amount,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::StakeOpened { .. } => "stake_opened",
            EventKind::StakeClosed { .. } => "stake_closed",
            EventKind::RewardSettled { .. } => "reward_settled",
            EventKind::PoolUpdated { .. } => "pool_updated",
            EventKind::EmissionStarted { .. } => "emission_started",
            EventKind::FundingShortfall { .. } => "funding_shortfall",
            EventKind::RewardsFunded { .. } => "rewards_funded",
            EventKind::SurplusWithdrawn { .. } => "surplus_withdrawn",
            EventKind::CommissionDeposited { .. } => "commission_deposited",
            EventKind::RewardClaimed { .. } => "reward_claimed",
            EventKind::ParticipantRegistered { .. } => "participant_registered",
            EventKind::ParticipantDeregistered { .. } => "participant_deregistered",
            EventKind::ParticipantExcluded { .. } => "participant_excluded",
            EventKind::RateChangeQueued { .. } => "rate_change_queued",
            EventKind::RateChangeApplied { .. } => "rate_change_applied",
            EventKind::VestingCreated { .. } => "vesting_created",
            EventKind::VestingReleased { .. } => "vesting_released",
        }
    }
}
