// crates/fierce-core/src/lib.rs
//
// fierce-core: Core identifiers, error type, collaborator traits, and ledger
// events for the Fierce reward-accrual ledger.
//
// This is the leaf crate that the ledger and simulator depend on. Nothing in
// here knows about blockchains: principals are opaque 32-byte identifiers and
// time is a plain integer (block step or unix seconds).

pub mod amount_serde;
pub mod error;
pub mod events;
pub mod identity;
pub mod traits;

// Re-export key types for ergonomic access from downstream crates.
// Usage: `use fierce_core::Principal;`

pub use error::FierceError;
pub use events::{EventKind, LedgerEvent};
pub use identity::{Principal, TokenId};
pub use traits::{EventSink, StakeBackend, Token};

/// Token amount in the smallest indivisible unit.
pub type Amount = u128;

/// Discrete block step used by the emission pool.
pub type Step = u64;

/// Wall-clock seconds used by the duration ledger and vesting.
pub type Timestamp = u64;
