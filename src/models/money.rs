//! Money helpers.
//!
//! Every balance and amount in the service is an `i64` number of cents.
//! Decimal amounts only exist at the network boundary, where they are
//! converted once with [`cents_from_decimal`].

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::error::AppError;

/// Fee charged on captures and top-ups, in basis points (100 = 1%).
pub const FEE_BASIS_POINTS: i64 = 100;

/// Compute the 1% processing fee for an amount, rounded half-up to the cent.
///
/// Returns `None` when the intermediate product does not fit into an `i64`.
///
/// ```
/// use cardflow::models::money::fee_for;
///
/// assert_eq!(fee_for(10_000), Some(100)); // 100.00 -> 1.00
/// assert_eq!(fee_for(150), Some(2)); // 1.50 -> 0.015, rounds to 0.02
/// assert_eq!(fee_for(i64::MAX / 50), None);
/// ```
pub fn fee_for(amount_cents: i64) -> Option<i64> {
    amount_cents
        .checked_mul(FEE_BASIS_POINTS)?
        .checked_add(5_000)
        .map(|scaled| scaled / 10_000)
}

/// Convert a decimal currency amount (e.g. `200.50`) into cents.
///
/// Returns `None` when the amount carries sub-cent precision or does not fit
/// into an `i64`.
pub fn cents_from_decimal(amount: Decimal) -> Option<i64> {
    if amount.round_dp(2) != amount {
        return None;
    }

    amount.checked_mul(Decimal::ONE_HUNDRED)?.to_i64()
}

/// Validation error for amounts whose fee or resulting balance overflows.
pub(crate) fn out_of_range() -> AppError {
    AppError::InvalidRequest("amount is out of range".to_string())
}

/// Render cents as a plain two-decimal string, e.g. `-202` -> `"-2.02"`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;

    #[rstest]
    #[case(10_000, 100)]
    #[case(20_000, 200)]
    #[case(1, 0)]
    #[case(50, 1)]
    #[case(149, 1)]
    #[case(12_345, 123)]
    fn fee_is_one_percent_rounded_half_up(#[case] amount: i64, #[case] fee: i64) {
        assert_eq!(fee_for(amount), Some(fee));
    }

    #[test]
    fn oversized_fee_inputs_do_not_overflow() {
        assert_eq!(fee_for(i64::MAX / 50), None);
        assert_eq!(fee_for(i64::MAX), None);
    }

    #[test]
    fn decimal_amounts_convert_to_cents() {
        assert_eq!(cents_from_decimal(Decimal::from_str("200").unwrap()), Some(20_000));
        assert_eq!(cents_from_decimal(Decimal::from_str("200.5").unwrap()), Some(20_050));
        assert_eq!(cents_from_decimal(Decimal::from_str("0.01").unwrap()), Some(1));
    }

    #[test]
    fn sub_cent_amounts_are_rejected() {
        assert_eq!(cents_from_decimal(Decimal::from_str("10.005").unwrap()), None);
    }

    #[test]
    fn amounts_beyond_i64_cents_are_rejected() {
        assert_eq!(cents_from_decimal(Decimal::MAX), None);
        assert_eq!(
            cents_from_decimal(Decimal::from_str("1000000000000000000000000000").unwrap()),
            None
        );
    }

    #[test]
    fn cents_format_with_sign() {
        assert_eq!(format_cents(9_900), "99.00");
        assert_eq!(format_cents(-202), "-2.02");
        assert_eq!(format_cents(5), "0.05");
    }
}
