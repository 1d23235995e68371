// crates/fierce-ledger/src/lib.rs
//
// fierce-ledger: Reward-accrual accounting for the Fierce ledger.
//
// Components:
// - `fixed_point`: scaled reward-per-share arithmetic with 256-bit products
// - `emission` + `pool`: block-step emission into a shared accumulator pool
// - `duration` + `vesting`: fixed-lock APR positions and cliff vesting
// - `commission`: snapshot and accumulator commission distributors
// - `vault`: serialized, transactional wrappers that move tokens
// - `journal`: undo logs backing vault rollback
//
// All amounts are base units (`Amount`, u128). Nothing here performs I/O
// except through the `Token` and `EventSink` collaborators.

pub mod backend;
pub mod commission;
pub mod config;
pub mod duration;
pub mod emission;
pub mod fixed_point;
pub mod journal;
pub mod pool;
pub mod sink;
pub mod timelock;
pub mod token;
pub mod vault;
pub mod vesting;

// Re-export key types for ergonomic access from downstream crates.
pub use backend::StakingStrategy;
pub use commission::{
    AccumulatorDistributor, CommissionDistributor, Distributor, DistributorCheckpoint,
    SnapshotDistributor,
};
pub use config::{DistributorConfig, DistributorDesign, DurationConfig, PoolConfig, RateTier};
pub use duration::{DurationPayout, DurationPosition, DurationStakeLedger};
pub use emission::{EmissionOutcome, EmissionScheduler, EmissionWindow};
pub use fixed_point::{Precision, DISTRIBUTOR_PRECISION, POOL_PRECISION};
pub use journal::{Journaled, JournaledMap, JournaledVec};
pub use pool::{Claim, PoolSummary, Position, StakePool, Withdrawal};
pub use sink::{MemorySink, TracingSink};
pub use timelock::PendingChange;
pub use token::{InMemoryToken, Units, UNITS_PER_TOKEN};
pub use vault::{EventSource, Movement, Vault};
pub use vesting::{VestingLedger, VestingSchedule};
