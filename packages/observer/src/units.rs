//! Unit Conversion
//!
//! Converts integer amounts in the smallest chain unit (wei) into human-readable
//! decimal amounts. The division is carried out on exact 256-bit integers and the
//! quotient is narrowed to `f64` exactly once, so amounts beyond 2^53 keep their
//! leading digits.

use alloy::primitives::U256;

/// Decimal exponent between wei and ether
pub const ETHER_DECIMALS: u8 = 18;

/// Render `amount / divisor` as an exact decimal string
///
/// `digits` is the number of fractional digits the divisor represents. Trailing
/// zeros of the fraction are trimmed and the point is dropped for whole numbers.
fn scaled_string(amount: U256, divisor: U256, digits: usize) -> String {
    let (int_part, frac) = amount.div_rem(divisor);
    if digits == 0 {
        return int_part.to_string();
    }

    let frac = format!("{:0>width$}", frac.to_string(), width = digits);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        int_part.to_string()
    } else {
        format!("{}.{}", int_part, frac)
    }
}

/// Narrow an exact decimal string to the nearest `f64`
fn narrow(decimal: &str) -> f64 {
    // Input is digits with at most one point; std parsing rounds to nearest.
    decimal.parse::<f64>().unwrap_or(f64::NAN)
}

/// Convert a wei amount to ether
///
/// Never fails: `10^18` always fits in 256 bits and every `U256` is non-negative.
pub fn wei_to_ether(amount: U256) -> f64 {
    let divisor = U256::from(10u8).pow(U256::from(ETHER_DECIMALS));
    narrow(&scaled_string(amount, divisor, usize::from(ETHER_DECIMALS)))
}
