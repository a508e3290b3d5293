//! Fixed-point amount conversion between upstream decimals and stroops.
//!
//! Upstream reports amounts as decimal strings with up to seven fractional
//! digits. The store keeps integer stroops. All arithmetic is integer so a
//! value survives any number of round trips unchanged.

use crate::ValidationError;

/// Fractional digits of one whole unit.
pub const STROOP_DECIMALS: usize = 7;

const STROOPS_PER_UNIT: u64 = 10_000_000;

/// Parse an upstream decimal such as `"50.0000000"` into stroops.
pub fn decimal_to_stroops(value: &str) -> Result<i64, ValidationError> {
    let trimmed = value.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let (whole, fraction) = match digits.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (digits, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return Err(ValidationError::invalid("amount", format!("empty amount {:?}", value)));
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(ValidationError::invalid("amount", format!("not a decimal: {:?}", value)));
    }
    if fraction.len() > STROOP_DECIMALS {
        return Err(ValidationError::invalid(
            "amount",
            format!("more than {} fractional digits: {:?}", STROOP_DECIMALS, value),
        ));
    }

    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| ValidationError::invalid("amount", format!("out of range: {:?}", value)))?
    };
    let padded = format!("{:0<width$}", fraction, width = STROOP_DECIMALS);
    let fraction: u64 = padded
        .parse()
        .map_err(|_| ValidationError::invalid("amount", format!("not a decimal: {:?}", value)))?;

    let magnitude = whole
        .checked_mul(STROOPS_PER_UNIT)
        .and_then(|w| w.checked_add(fraction))
        .ok_or_else(|| ValidationError::invalid("amount", format!("out of range: {:?}", value)))?;

    let signed = i128::from(magnitude);
    let signed = if negative { -signed } else { signed };
    i64::try_from(signed)
        .map_err(|_| ValidationError::invalid("amount", format!("out of range: {:?}", value)))
}

/// Render stroops with exactly seven decimals: `500000000` -> `"50.0000000"`.
pub fn stroops_to_decimal(stroops: i64) -> String {
    let magnitude = stroops.unsigned_abs();
    let sign = if stroops < 0 { "-" } else { "" };
    format!(
        "{}{}.{:0width$}",
        sign,
        magnitude / STROOPS_PER_UNIT,
        magnitude % STROOPS_PER_UNIT,
        width = STROOP_DECIMALS
    )
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Rendering then parsing returns the same stroop count.
        #[test]
        fn prop_render_parse_identity(stroops in any::<i64>().prop_filter("min has no positive twin", |v| *v != i64::MIN)) {
            let rendered = stroops_to_decimal(stroops);
            let parsed = decimal_to_stroops(&rendered)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(parsed, stroops);
        }
    }
}
