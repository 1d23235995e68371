// crates/fierce-ledger/src/fixed_point.rs
//
// Scaled-integer arithmetic for reward-per-share accounting.
//
// Every accumulator in the ledger is an integer scaled by a `Precision`.
// Products are formed in 256-bit intermediates (ethnum::U256) so that
// `a * b / scale` cannot overflow before the division; only a final result
// wider than u128 is an error.
//
// Rounding policy: floor division everywhere. The loss is at most one unit
// of the result per operation and is never reconciled (dust).
//
// The emission pool and the distributors run at different scales (1e12 and
// 1e18). Values from different scales must go through `Precision::rescale`
// before they are compared.

use ethnum::U256;
use serde::{Deserialize, Serialize};

use fierce_core::{Amount, FierceError};

/// Scale used by the block-emission pool accumulator (1e12).
pub const POOL_PRECISION: Precision = Precision(1_000_000_000_000);

/// Scale used by the commission distributors (1e18).
pub const DISTRIBUTOR_PRECISION: Precision = Precision(1_000_000_000_000_000_000);

/// A fixed-point scale factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u128", into = "u128")]
pub struct Precision(u128);

impl Precision {
    /// Create a scale. Zero is rejected since every per-share division would
    /// collapse.
    pub fn new(scale: u128) -> Result<Self, FierceError> {
        if scale == 0 {
            return Err(FierceError::InvalidInput(
                "precision scale must be nonzero".to_string(),
            ));
        }
        Ok(Self(scale))
    }

    pub fn scale(&self) -> u128 {
        self.0
    }

    /// Accumulator increment for distributing `reward` over `total_staked`:
    /// `reward * scale / total_staked`.
    ///
    /// Callers must not call this with an empty pool; doing so is an error
    /// rather than a silent zero so that withheld reward stays a policy
    /// decision of the caller.
    pub fn per_share_delta(&self, reward: Amount, total_staked: Amount) -> Result<Amount, FierceError> {
        if total_staked == 0 {
            return Err(FierceError::Arithmetic(
                "per-share delta with zero total stake".to_string(),
            ));
        }
        mul_div(reward, self.0, total_staked)
    }

    /// Reward accrued by `amount` at accumulator value `acc`:
    /// `amount * acc / scale`.
    pub fn accrued(&self, amount: Amount, acc: Amount) -> Result<Amount, FierceError> {
        mul_div(amount, acc, self.0)
    }

    /// `amount * acc / scale` rounded up. Used for debts so that a later
    /// floor-rounded accrual never exceeds the exact share.
    pub fn accrued_ceil(&self, amount: Amount, acc: Amount) -> Result<Amount, FierceError> {
        mul_div_ceil(amount, acc, self.0)
    }

    /// Convert an accumulator value expressed at this scale to `target`.
    pub fn rescale(&self, value: Amount, target: Precision) -> Result<Amount, FierceError> {
        if *self == target {
            return Ok(value);
        }
        mul_div(value, target.0, self.0)
    }
}

impl TryFrom<u128> for Precision {
    type Error = FierceError;

    fn try_from(scale: u128) -> Result<Self, Self::Error> {
        Precision::new(scale)
    }
}

impl From<Precision> for u128 {
    fn from(p: Precision) -> u128 {
        p.0
    }
}

/// `a * b / denominator` with a 256-bit intermediate, floor rounding.
///
/// # Errors
/// `Arithmetic` when `denominator` is zero or the quotient does not fit in
/// u128.
pub fn mul_div(a: Amount, b: Amount, denominator: Amount) -> Result<Amount, FierceError> {
    if denominator == 0 {
        return Err(FierceError::Arithmetic("division by zero".to_string()));
    }
    let quotient = U256::from(a) * U256::from(b) / U256::from(denominator);
    if quotient > U256::from(u128::MAX) {
        return Err(FierceError::overflow("mul_div"));
    }
    Ok(quotient.as_u128())
}

/// `a * b / denominator` rounded up.
pub fn mul_div_ceil(a: Amount, b: Amount, denominator: Amount) -> Result<Amount, FierceError> {
    if denominator == 0 {
        return Err(FierceError::Arithmetic("division by zero".to_string()));
    }
    let product = U256::from(a) * U256::from(b);
    let den = U256::from(denominator);
    let mut quotient = product / den;
    if product % den != U256::ZERO {
        quotient += U256::ONE;
    }
    if quotient > U256::from(u128::MAX) {
        return Err(FierceError::overflow("mul_div_ceil"));
    }
    Ok(quotient.as_u128())
}

/// Checked `a + b` with a named context.
pub fn add(a: Amount, b: Amount, context: &str) -> Result<Amount, FierceError> {
    a.checked_add(b).ok_or_else(|| FierceError::overflow(context))
}

/// Checked `a - b` with a named context.
pub fn sub(a: Amount, b: Amount, context: &str) -> Result<Amount, FierceError> {
    a.checked_sub(b)
        .ok_or_else(|| FierceError::Arithmetic(format!("underflow in {}", context)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mul_div_exact() {
        assert_eq!(mul_div(45, 1_000_000_000_000, 100).unwrap(), 450_000_000_000);
    }

    #[test]
    fn test_mul_div_ceil_rounds_up() {
        assert_eq!(mul_div_ceil(10, 1, 3).unwrap(), 4);
        assert_eq!(mul_div_ceil(9, 1, 3).unwrap(), 3);
        assert_eq!(mul_div_ceil(0, 5, 3).unwrap(), 0);
        assert!(mul_div_ceil(1, 1, 0).is_err());
    }

    #[test]
    fn test_mul_div_floors() {
        assert_eq!(mul_div(10, 1, 3).unwrap(), 3);
        assert_eq!(mul_div(2, 1, 3).unwrap(), 0);
    }

    #[test]
    fn test_mul_div_wide_intermediate() {
        // u128::MAX * 2 overflows u128 but the quotient fits.
        assert_eq!(mul_div(u128::MAX, 2, 4).unwrap(), u128::MAX / 2);
    }

    #[test]
    fn test_mul_div_result_overflow() {
        assert!(matches!(
            mul_div(u128::MAX, 2, 1),
            Err(FierceError::Arithmetic(_))
        ));
    }

    #[test]
    fn test_mul_div_zero_denominator() {
        assert!(mul_div(1, 1, 0).is_err());
    }

    #[test]
    fn test_per_share_delta_requires_stake() {
        assert!(POOL_PRECISION.per_share_delta(100, 0).is_err());
        assert_eq!(
            POOL_PRECISION.per_share_delta(1000, 100).unwrap(),
            10 * POOL_PRECISION.scale()
        );
    }

    #[test]
    fn test_accrued_inverts_delta_up_to_dust() {
        let acc = POOL_PRECISION.per_share_delta(1000, 3).unwrap();
        let paid = POOL_PRECISION.accrued(3, acc).unwrap();
        assert!(paid <= 1000);
        assert!(1000 - paid <= 1);
    }

    #[test]
    fn test_rescale_between_pool_and_distributor() {
        let acc_pool = 5 * POOL_PRECISION.scale();
        let acc_dist = POOL_PRECISION.rescale(acc_pool, DISTRIBUTOR_PRECISION).unwrap();
        assert_eq!(acc_dist, 5 * DISTRIBUTOR_PRECISION.scale());
        assert_eq!(
            DISTRIBUTOR_PRECISION.rescale(acc_dist, POOL_PRECISION).unwrap(),
            acc_pool
        );
    }

    #[test]
    fn test_zero_precision_rejected() {
        assert!(Precision::new(0).is_err());
        assert!(serde_json::from_str::<Precision>("0").is_err());
        assert_eq!(serde_json::from_str::<Precision>("1000").unwrap().scale(), 1000);
    }
}
