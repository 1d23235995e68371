// crates/fierce-core/src/traits.rs

use crate::error::FierceError;
use crate::events::LedgerEvent;
use crate::identity::{Principal, TokenId};
use crate::Amount;

/// External token collaborator.
///
/// The ledger never moves value itself; it asks a `Token` to do so after its
/// own bookkeeping is complete, and rolls back if the token reports failure.
/// Implementations must be internally synchronized.
pub trait Token: Send + Sync {
    /// Identifier of this token, used to key per-token distributor state.
    fn id(&self) -> TokenId;

    /// Current balance held by `who`.
    fn balance_of(&self, who: &Principal) -> Amount;

    /// Move `amount` out of `from`'s own balance. `from` is the caller itself
    /// (a vault paying out).
    fn transfer(&self, from: &Principal, to: &Principal, amount: Amount) -> Result<(), FierceError>;

    /// Move `amount` from `from` to `to` on behalf of `spender`, consuming
    /// an allowance previously granted by `from`.
    fn transfer_from(
        &self,
        spender: &Principal,
        from: &Principal,
        to: &Principal,
        amount: Amount,
    ) -> Result<(), FierceError>;

    /// Minimum amount the token deployment allows to be staked.
    fn min_staking_amount(&self) -> Amount;
}

/// Read-only view of stake held in a staking component.
///
/// Implemented by the emission pool and the duration ledger so that
/// distributors can weigh participants without knowing which staking
/// system holds the stake.
pub trait StakeBackend: Send + Sync {
    /// Sum of all active stake.
    fn total_staked(&self) -> Amount;

    /// Active stake held by `user`.
    fn user_stake(&self, user: &Principal) -> Amount;
}

/// Receiver of ledger notifications.
///
/// Events are published only after an operation has fully committed,
/// including its token transfer.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &LedgerEvent);
}
