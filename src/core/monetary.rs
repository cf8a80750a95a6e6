//! Monetary units
//!
//! All values are fixed-point: an `i64` count of units, where one coin is
//! 100,000,000 units. Sums and comparisons are exact; there is no float
//! anywhere in consensus-relevant code. Conversions to and from decimal
//! coins exist only at the CLI edge.

/// Number of units in one coin
pub const UNITS_PER_COIN: i64 = 100_000_000;

/// Reward paid by the coinbase transaction of every block (10 coins)
pub const PAYMENT_FOR_BLOCK_MADE: i64 = 10 * UNITS_PER_COIN;

/// Utility functions for converting between decimal coins and units
pub mod conversions {
    use super::*;

    /// Convert a decimal coin amount to units. Any residue smaller than
    /// one unit is dropped.
    pub fn coins_to_units(coins: f64) -> i64 {
        (coins * UNITS_PER_COIN as f64).round() as i64
    }

    /// Convert units to decimal coins for display.
    pub fn units_to_coins(units: i64) -> f64 {
        units as f64 / UNITS_PER_COIN as f64
    }

    /// Format a unit amount as a human-readable coin string.
    pub fn format_units(units: i64) -> String {
        format!("{:.8}", units_to_coins(units))
    }
}

#[cfg(test)]
mod tests {
    use super::conversions::*;
    use super::*;

    #[test]
    fn test_monetary_constants() {
        assert_eq!(UNITS_PER_COIN, 100_000_000);
        assert_eq!(PAYMENT_FOR_BLOCK_MADE, 10 * UNITS_PER_COIN);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(coins_to_units(1.0), UNITS_PER_COIN);
        assert_eq!(coins_to_units(0.5), UNITS_PER_COIN / 2);
        assert_eq!(coins_to_units(0.00000001), 1);

        assert_eq!(units_to_coins(UNITS_PER_COIN), 1.0);
        assert_eq!(units_to_coins(UNITS_PER_COIN / 2), 0.5);
    }

    #[test]
    fn test_sub_unit_residue_is_dropped() {
        // Anything below one unit rounds away instead of surviving as a
        // fractional output.
        assert_eq!(coins_to_units(0.000000001), 0);
        assert_eq!(coins_to_units(0.000000014), 1);
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_units(UNITS_PER_COIN), "1.00000000");
        assert_eq!(format_units(UNITS_PER_COIN / 2), "0.50000000");
        assert_eq!(format_units(1_000), "0.00001000");
    }
}
