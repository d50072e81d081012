//! Settlement eligibility arithmetic.
//!
//! Amounts on chain are integers of the smallest unit (10^-18 of a whole
//! native coin). A USD total is only worth settling when it converts to at
//! least one such unit at the current reference rate.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use skinvault_sdk::objects::SettlementAddress;
use std::fmt;
use thiserror::Error;

/// Fractional digits of the chain's native unit.
pub const NATIVE_DECIMALS: u32 = 18;

/// The smallest transferable amount as a fraction of one whole unit.
pub fn smallest_unit() -> Decimal {
    Decimal::new(1, NATIVE_DECIMALS)
}

/// USD value of the smallest transferable amount at `rate` (USD per unit).
pub fn min_settleable_usd(rate: Decimal) -> Decimal {
    rate.checked_mul(smallest_unit()).unwrap_or(Decimal::MAX)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettlementMathError {
    #[error("reference rate must be positive, got {0}")]
    NonPositiveRate(Decimal),
    #[error("settlement amount for {usd} USD at rate {rate} is out of range")]
    OutOfRange { usd: Decimal, rate: Decimal },
}

/// An amount of the native coin, held as an integer count of smallest units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NativeAmount(#[serde(with = "base_units")] u128);

impl NativeAmount {
    pub const fn from_base_units(units: u128) -> Self {
        Self(units)
    }

    pub const fn base_units(self) -> u128 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Convert a whole-unit decimal, rounding to [`NATIVE_DECIMALS`] places.
    pub fn from_decimal(value: Decimal) -> Option<Self> {
        let rounded =
            value.round_dp_with_strategy(NATIVE_DECIMALS, RoundingStrategy::MidpointAwayFromZero);
        let scale = Decimal::from(10u64.pow(NATIVE_DECIMALS));
        rounded.checked_mul(scale)?.to_u128().map(Self)
    }
}

impl fmt::Display for NativeAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = 10u128.pow(NATIVE_DECIMALS);
        write!(
            f,
            "{}.{:0width$}",
            self.0 / unit,
            self.0 % unit,
            width = NATIVE_DECIMALS as usize
        )
    }
}

/// Base units are serialized as a decimal string; JSON numbers lose precision.
mod base_units {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// Why an outbound trade was not settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementSkip {
    /// The memo carries no destination address.
    NoAddress,
    /// Nothing received could be priced, or it priced at zero.
    NothingPriced,
    /// The total converts to less than one smallest unit.
    BelowMinimum { total_usd: Decimal, min_usd: Decimal },
}

impl fmt::Display for SettlementSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementSkip::NoAddress => f.write_str("no settlement address in memo"),
            SettlementSkip::NothingPriced => f.write_str("no priced value received"),
            SettlementSkip::BelowMinimum { total_usd, min_usd } => {
                write!(f, "total {total_usd} USD below minimum {min_usd} USD")
            }
        }
    }
}

/// Resolve the settlement destination for an outbound trade.
///
/// Returns the address only when the memo carries one and the priced total
/// is strictly positive.
pub fn settlement_target(
    memo: &str,
    total_usd: Decimal,
) -> Result<SettlementAddress, SettlementSkip> {
    let address = SettlementAddress::find_in_memo(memo).ok_or(SettlementSkip::NoAddress)?;
    if total_usd <= Decimal::ZERO {
        return Err(SettlementSkip::NothingPriced);
    }
    Ok(address)
}

/// Convert a USD total into a native amount at `rate`.
///
/// `Ok(Err(skip))` means the total is below the smallest settleable value;
/// the boundary itself (`total_usd == min_usd`) settles.
pub fn settlement_amount(
    total_usd: Decimal,
    rate: Decimal,
) -> Result<Result<NativeAmount, SettlementSkip>, SettlementMathError> {
    if rate <= Decimal::ZERO {
        return Err(SettlementMathError::NonPositiveRate(rate));
    }

    let min_usd = min_settleable_usd(rate);
    if total_usd < min_usd {
        return Ok(Err(SettlementSkip::BelowMinimum { total_usd, min_usd }));
    }

    let out_of_range = || SettlementMathError::OutOfRange {
        usd: total_usd,
        rate,
    };
    let whole_units = total_usd.checked_div(rate).ok_or_else(out_of_range)?;
    let amount = NativeAmount::from_decimal(whole_units).ok_or_else(out_of_range)?;

    if amount.is_zero() {
        return Ok(Err(SettlementSkip::BelowMinimum { total_usd, min_usd }));
    }
    Ok(Ok(amount))
}
