//! converters.rs - Unit conversions for prices and distances
//!
//! Prices are stored as integer quanta (1/100 of a currency unit). Distances
//! are stored in meters and rendered in human-friendly buckets, the largest
//! of which is the 200 km "SU" unit.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Number of quanta in one unit of currency
pub const QUANTA_PER_UNIT: i64 = 100;

/// Meters in one SU
pub const METERS_PER_SU: f64 = 200_000.0;

/// Convert stored quanta into decimal currency. A missing value converts to zero.
pub fn quanta_to_currency(quanta: Option<i64>) -> Decimal {
    match quanta {
        Some(q) => Decimal::new(q, 2),
        None => Decimal::ZERO,
    }
}

/// Convert decimal currency into stored quanta, rounding half away from zero.
/// A missing value (or one outside the i64 range) converts to zero.
pub fn currency_to_quanta(currency: Option<Decimal>) -> i64 {
    currency
        .map(|c| c * Decimal::from(QUANTA_PER_UNIT))
        .map(|q| q.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|q| q.to_i64())
        .unwrap_or(0)
}

/// Render a distance in meters using the bucket appropriate for its size
///
/// - `< 1 m`           => "Same location"
/// - `< 1,000 m`       => whole meters
/// - `< 200,000 m`     => kilometers, one decimal below 10 km
/// - `>= 200,000 m`    => SU, one decimal below 10 SU
///
/// Negative or non-finite input renders as "0 m".
pub fn format_distance(meters: f64) -> String {
    if !meters.is_finite() || meters < 0.0 {
        return "0 m".to_string();
    }

    if meters < 1.0 {
        return "Same location".to_string();
    }

    if meters < 1_000.0 {
        return format!("{} m", meters.trunc() as i64);
    }

    if meters < 200_000.0 {
        let km = meters / 1_000.0;
        return if km < 10.0 {
            format!("{:.1} km", km)
        } else {
            format!("{:.0} km", km)
        };
    }

    let su = meters / METERS_PER_SU;
    if meters < 2_000_000.0 && su < 10.0 {
        format!("{:.1} SU", su)
    } else {
        format!("{:.0} SU", su)
    }
}

/// Render quanta as currency with thousands separators and two decimals
/// (e.g. `123456789` => "1,234,567.89")
pub fn format_quanta(quanta: i64) -> String {
    format_decimal(quanta_to_currency(Some(quanta)), 2)
}

/// Render a decimal with thousands separators and a fixed number of decimals
pub fn format_decimal(value: Decimal, decimals: u32) -> String {
    let rounded = value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero);
    let text = format!("{:.*}", decimals as usize, rounded.abs());
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    group_thousands(&text, negative)
}

/// Render a float with thousands separators and a fixed number of decimals
pub fn format_number(value: f64, decimals: usize) -> String {
    if !value.is_finite() {
        return format!("{:.*}", decimals, 0.0);
    }
    let text = format!("{:.*}", decimals, value.abs());
    let negative = value < 0.0 && text.chars().any(|c| c.is_ascii_digit() && c != '0');
    group_thousands(&text, negative)
}

/// Render an integer with thousands separators
pub fn format_integer(value: i64) -> String {
    group_thousands(&value.unsigned_abs().to_string(), value < 0)
}

fn group_thousands(unsigned: &str, negative: bool) -> String {
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(unsigned.len() + int_part.len() / 3 + 1);
    if negative {
        grouped.push('-');
    }
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if let Some(frac) = frac_part {
        grouped.push('.');
        grouped.push_str(frac);
    }
    grouped
}
