// crates/fierce-core/src/amount_serde.rs
//
// Serde adapter for `Amount` fields: written as decimal strings, read from
// either a decimal string or a non-negative integer.
//
// Base-unit amounts routinely exceed u64 (10^21 is 1000 tokens at 18
// decimals). Internally tagged enums buffer their content and cannot carry
// u128, and TOML integers stop at i64, so amounts travel as strings. Small
// integers are still accepted on input for hand-written files.
//
// Usage: `#[serde(with = "fierce_core::amount_serde")]`

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};

use crate::Amount;

pub fn serialize<S>(amount: &Amount, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(amount)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(AmountVisitor)
}

struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a non-negative integer amount or its decimal string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
        let digits: String = v.trim().chars().filter(|c| *c != '_').collect();
        digits
            .parse::<Amount>()
            .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
        Ok(Amount::from(v))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<Amount, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
        u64::try_from(v)
            .map(Amount::from)
            .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
        Err(E::invalid_value(de::Unexpected::Float(v), &self))
    }
}
