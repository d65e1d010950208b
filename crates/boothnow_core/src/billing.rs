//! crates/boothnow_core/src/billing.rs
//!
//! Elapsed-time and cost arithmetic. Everything here is pure.
//!
//! Time is tracked in milliseconds and converted to fractional minutes for
//! billing. Whole minutes are only produced for display, and currency is
//! rounded to cents exactly once, on the final amount.

use chrono::{DateTime, Duration, Utc};

const MILLIS_PER_MINUTE: f64 = 60_000.0;

/// Per-deployment pricing.
#[derive(Debug, Clone, PartialEq)]
pub struct Rates {
    pub rate_per_minute: f64,
    pub minimum_charge: f64,
    /// ISO 4217 code in lower case, as the payment processor expects it.
    pub currency: String,
}

impl Rates {
    /// Unrounded cost of `elapsed` under these rates.
    pub fn cost_of(&self, elapsed: Elapsed) -> f64 {
        compute_cost(elapsed.minutes(), self.rate_per_minute, self.minimum_charge)
    }
}

/// A non-negative span of booth usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Elapsed {
    millis: i64,
}

impl Elapsed {
    pub fn from_millis(millis: i64) -> Self {
        Self {
            millis: millis.max(0),
        }
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self::from_millis(duration.num_milliseconds())
    }

    pub fn millis(&self) -> i64 {
        self.millis
    }

    /// Fractional minutes; the billing quantity.
    pub fn minutes(&self) -> f64 {
        self.millis as f64 / MILLIS_PER_MINUTE
    }

    /// Floored whole minutes; the display quantity.
    pub fn whole_minutes(&self) -> i64 {
        self.millis / 60_000
    }

    pub fn whole_seconds(&self) -> i64 {
        self.millis / 1_000
    }
}

/// Time between `start` and `as_of`. Clamped at zero if the clock reads
/// earlier than the start.
pub fn compute_elapsed(start: DateTime<Utc>, as_of: DateTime<Utc>) -> Elapsed {
    Elapsed::from_duration(as_of.signed_duration_since(start))
}

/// `max(elapsed_minutes * rate_per_minute, minimum_charge)` at full precision.
pub fn compute_cost(elapsed_minutes: f64, rate_per_minute: f64, minimum_charge: f64) -> f64 {
    (elapsed_minutes.max(0.0) * rate_per_minute).max(minimum_charge)
}

/// Rounds a currency amount to two decimal places, half away from zero.
pub fn round_currency(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Converts a rounded amount to the processor's minor units (cents).
pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// Rounds billed minutes for storage; keeps two decimals like currency.
pub fn round_minutes(minutes: f64) -> f64 {
    (minutes * 100.0).round() / 100.0
}
