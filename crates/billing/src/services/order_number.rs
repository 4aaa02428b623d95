//! Order number generation.
//!
//! Format: `ORD-<base36 epoch millis>-<base36 random>`, uppercased, e.g.
//! `ORD-MGX3K2AB-4F9Q0ZL1C`. Numbers are not guaranteed unique; the store
//! rejects duplicates and [`BillingService`](super::BillingService) retries.

use chrono::Utc;
use rand::Rng;

use gallery_core::OrderNumber;

/// Exclusive upper bound of the random suffix (nine base36 digits).
const RANDOM_SUFFIX_BOUND: u64 = 101_559_956_668_416;

const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Encode a number in uppercase base36.
#[must_use]
pub fn base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_owned();
    }

    let mut out = Vec::new();
    while n > 0 {
        // n % 36 < 36, so the index is always in bounds.
        #[allow(clippy::cast_possible_truncation, clippy::indexing_slicing)]
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();

    String::from_utf8(out).unwrap_or_default()
}

/// Build an order number from its parts.
#[must_use]
pub fn format_order_number(epoch_millis: u64, random: u64) -> OrderNumber {
    OrderNumber::new(format!(
        "{}{}-{}",
        OrderNumber::PREFIX,
        base36(epoch_millis),
        base36(random)
    ))
}

/// Generate a fresh order number from the clock and thread RNG.
#[must_use]
pub fn generate_order_number() -> OrderNumber {
    let millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
    let random = rand::rng().random_range(0..RANDOM_SUFFIX_BOUND);
    format_order_number(millis, random)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base36() {
        assert_eq!(base36(0), "0");
        assert_eq!(base36(35), "Z");
        assert_eq!(base36(36), "10");
        assert_eq!(base36(RANDOM_SUFFIX_BOUND - 1), "ZZZZZZZZZ");
    }

    #[test]
    fn test_format_order_number() {
        let id = format_order_number(1_700_000_000_000, 46_655);
        assert_eq!(id.as_str(), "ORD-LOYW3V28-ZZZ");
        assert!(id.is_well_formed());
    }

    #[test]
    fn test_generated_numbers_are_well_formed_and_distinct() {
        let a = generate_order_number();
        let b = generate_order_number();
        assert!(a.is_well_formed());
        assert!(a.as_str().starts_with("ORD-"));
        assert_eq!(a.as_str(), a.as_str().to_uppercase());
        assert_ne!(a, b);
    }
}
