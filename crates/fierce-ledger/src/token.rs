// crates/fierce-ledger/src/token.rs
//
// Token units and an in-memory token collaborator.
//
// The smallest unit of FRC is the "wei-like" base unit; 1 FRC = 10^18 units.
// All ledger accounting uses base units to avoid floating-point error.
//
// `InMemoryToken` implements the `Token` collaborator for simulation and
// tests. It supports allowances, failure injection, and a post-transfer hook
// that models a recipient callback (the way a token with receive hooks can
// re-enter the contract that paid it).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use fierce_core::{Amount, FierceError, Principal, Token, TokenId};

/// Number of base units in one FRC.
pub const UNITS_PER_TOKEN: Amount = 1_000_000_000_000_000_000;

/// A token amount for display purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Units(pub Amount);

impl Units {
    /// Whole tokens to base units.
    pub fn from_tokens(tokens: u64) -> Self {
        Self(tokens as Amount * UNITS_PER_TOKEN)
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / UNITS_PER_TOKEN;
        let frac = self.0 % UNITS_PER_TOKEN;
        if frac == 0 {
            write!(f, "{} FRC", whole)
        } else {
            // Display up to 18 decimal places, trimming trailing zeros
            let frac_str = format!("{:018}", frac);
            let trimmed = frac_str.trim_end_matches('0');
            write!(f, "{}.{} FRC", whole, trimmed)
        }
    }
}

/// Callback invoked after a successful transfer, with (recipient, amount).
pub type TransferHook = Arc<dyn Fn(&Principal, Amount) + Send + Sync>;

#[derive(Default)]
struct Balances {
    balances: HashMap<Principal, Amount>,
    allowances: HashMap<(Principal, Principal), Amount>,
    total_supply: Amount,
    failing: bool,
}

/// An in-process token with balances and allowances.
pub struct InMemoryToken {
    id: TokenId,
    min_staking_amount: Amount,
    inner: Mutex<Balances>,
    hook: Mutex<Option<TransferHook>>,
}

impl InMemoryToken {
    pub fn new(label: &str, min_staking_amount: Amount) -> Self {
        Self {
            id: Principal::from_label(label),
            min_staking_amount,
            inner: Mutex::new(Balances::default()),
            hook: Mutex::new(None),
        }
    }

    fn balances(&self) -> std::sync::MutexGuard<'_, Balances> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create `amount` new units for `to`.
    pub fn mint(&self, to: &Principal, amount: Amount) -> Result<(), FierceError> {
        let mut b = self.balances();
        let supply = b
            .total_supply
            .checked_add(amount)
            .ok_or_else(|| FierceError::overflow("token supply"))?;
        let entry = b.balances.entry(*to).or_insert(0);
        *entry = entry
            .checked_add(amount)
            .ok_or_else(|| FierceError::overflow("token balance"))?;
        b.total_supply = supply;
        Ok(())
    }

    /// Grant `spender` the right to move up to `amount` of `owner`'s balance.
    pub fn approve(&self, owner: &Principal, spender: &Principal, amount: Amount) {
        self.balances().allowances.insert((*owner, *spender), amount);
    }

    pub fn allowance(&self, owner: &Principal, spender: &Principal) -> Amount {
        self.balances()
            .allowances
            .get(&(*owner, *spender))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_supply(&self) -> Amount {
        self.balances().total_supply
    }

    /// When set, every transfer fails with `TransferFailed`.
    pub fn set_failing(&self, failing: bool) {
        self.balances().failing = failing;
    }

    /// Install a hook called after each successful transfer.
    pub fn set_transfer_hook(&self, hook: TransferHook) {
        *self.hook.lock().unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    pub fn clear_transfer_hook(&self) {
        *self.hook.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn move_balance(
        &self,
        b: &mut Balances,
        from: &Principal,
        to: &Principal,
        amount: Amount,
    ) -> Result<(), FierceError> {
        if b.failing {
            return Err(FierceError::TransferFailed(
                "token rejected transfer".to_string(),
            ));
        }
        if to.is_zero() {
            return Err(FierceError::TransferFailed(
                "transfer to zero principal".to_string(),
            ));
        }
        let from_balance = b.balances.get(from).copied().unwrap_or(0);
        if from_balance < amount {
            return Err(FierceError::TransferFailed(format!(
                "balance {} of {} is below {}",
                from_balance, from, amount
            )));
        }
        let to_balance = b.balances.get(to).copied().unwrap_or(0);
        if from != to {
            let credited = to_balance
                .checked_add(amount)
                .ok_or_else(|| FierceError::overflow("token balance"))?;
            b.balances.insert(*from, from_balance - amount);
            b.balances.insert(*to, credited);
        }
        Ok(())
    }

    fn run_hook(&self, to: &Principal, amount: Amount) {
        // Clone the hook out so no token lock is held while it runs.
        let hook = self
            .hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            hook(to, amount);
        }
    }
}

impl Token for InMemoryToken {
    fn id(&self) -> TokenId {
        self.id
    }

    fn balance_of(&self, who: &Principal) -> Amount {
        self.balances().balances.get(who).copied().unwrap_or(0)
    }

    fn transfer(&self, from: &Principal, to: &Principal, amount: Amount) -> Result<(), FierceError> {
        {
            let mut b = self.balances();
            self.move_balance(&mut b, from, to, amount)?;
        }
        self.run_hook(to, amount);
        Ok(())
    }

    fn transfer_from(
        &self,
        spender: &Principal,
        from: &Principal,
        to: &Principal,
        amount: Amount,
    ) -> Result<(), FierceError> {
        {
            let mut b = self.balances();
            let allowed = b.allowances.get(&(*from, *spender)).copied().unwrap_or(0);
            if allowed < amount {
                return Err(FierceError::TransferFailed(format!(
                    "allowance {} granted by {} is below {}",
                    allowed, from, amount
                )));
            }
            self.move_balance(&mut b, from, to, amount)?;
            b.allowances.insert((*from, *spender), allowed - amount);
        }
        self.run_hook(to, amount);
        Ok(())
    }

    fn min_staking_amount(&self) -> Amount {
        self.min_staking_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn alice() -> Principal {
        Principal::from_label("alice")
    }

    fn bob() -> Principal {
        Principal::from_label("bob")
    }

    #[test]
    fn test_units_per_token() {
        assert_eq!(UNITS_PER_TOKEN, 10u128.pow(18));
        assert_eq!(Units::from_tokens(3).0, 3 * UNITS_PER_TOKEN);
    }

    #[test]
    fn test_display_whole() {
        assert_eq!(format!("{}", Units::from_tokens(42)), "42 FRC");
    }

    #[test]
    fn test_display_fractional() {
        assert_eq!(format!("{}", Units(1_500_000_000_000_000_000)), "1.5 FRC");
        assert_eq!(format!("{}", Units(0)), "0 FRC");
    }

    #[test]
    fn test_mint_and_transfer() {
        let token = InMemoryToken::new("frc", 1);
        token.mint(&alice(), 100).unwrap();
        token.transfer(&alice(), &bob(), 40).unwrap();
        assert_eq!(token.balance_of(&alice()), 60);
        assert_eq!(token.balance_of(&bob()), 40);
        assert_eq!(token.total_supply(), 100);
    }

    #[test]
    fn test_transfer_insufficient_balance() {
        let token = InMemoryToken::new("frc", 1);
        token.mint(&alice(), 10).unwrap();
        assert!(token.transfer(&alice(), &bob(), 11).is_err());
        assert_eq!(token.balance_of(&alice()), 10);
    }

    #[test]
    fn test_transfer_from_consumes_allowance() {
        let token = InMemoryToken::new("frc", 1);
        let vault = Principal::from_label("vault");
        token.mint(&alice(), 100).unwrap();
        assert!(token.transfer_from(&vault, &alice(), &vault, 10).is_err());

        token.approve(&alice(), &vault, 50);
        token.transfer_from(&vault, &alice(), &vault, 30).unwrap();
        assert_eq!(token.allowance(&alice(), &vault), 20);
        assert_eq!(token.balance_of(&vault), 30);
    }

    #[test]
    fn test_failing_token_moves_nothing() {
        let token = InMemoryToken::new("frc", 1);
        token.mint(&alice(), 100).unwrap();
        token.set_failing(true);
        assert!(matches!(
            token.transfer(&alice(), &bob(), 1),
            Err(FierceError::TransferFailed(_))
        ));
        assert_eq!(token.balance_of(&alice()), 100);
    }

    #[test]
    fn test_hook_runs_after_transfer() {
        let token = InMemoryToken::new("frc", 1);
        token.mint(&alice(), 100).unwrap();
        let seen = Arc::new(AtomicU64::new(0));
        let seen_in_hook = seen.clone();
        token.set_transfer_hook(Arc::new(move |_to: &Principal, amount: Amount| {
            seen_in_hook.fetch_add(amount as u64, Ordering::SeqCst);
        }));
        token.transfer(&alice(), &bob(), 7).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }
}
