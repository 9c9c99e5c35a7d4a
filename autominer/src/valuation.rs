//! Expected-value model for adding stake to a single square.
//!
//! A square's pool is split pro-rata among its stakers when it wins, after the
//! protocol takes its cut. Adding `y` to a square already holding `O` buys a
//! fraction `y / (O + y)` of the pool, at the cost of losing `y` on each of the
//! other squares' outcomes and paying the admin fee on `y`.

use motherlode_types::consts::SQUARES;

/// Chance that any given square wins a round.
pub const WIN_PROBABILITY: f64 = 1.0 / SQUARES as f64;

/// Share of the losing stakes withheld by the protocol.
pub const PROTOCOL_CUT: f64 = 0.10;

/// Fee charged on every unit staked.
pub const ADMIN_COST_FACTOR: f64 = 0.01;

/// Refinement passes of the optimal-stake fixed point.
pub const ITERATIONS: usize = 3;

/// Per-unit quadratic cost constant.
pub const COST: f64 = (SQUARES as f64 - 1.0) + ADMIN_COST_FACTOR / WIN_PROBABILITY;

/// Optimal additional stake on a square and its expected value (both in SOL).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Valuation {
    pub stake: f64,
    pub ev: f64,
}

impl Valuation {
    /// Returned when the inputs cannot support a valuation.
    pub const UNAVAILABLE: Self = Self {
        stake: 0.0,
        ev: f64::NEG_INFINITY,
    };

    /// No profitable stake exists.
    pub const NONE: Self = Self { stake: 0.0, ev: 0.0 };
}

fn pool_value(others: f64, total: f64, stake: f64, reward: f64) -> f64 {
    (1.0 - PROTOCOL_CUT) * (total - others - stake) + reward
}

/// Value adding stake to a square holding `others` out of `total`, with `reward`
/// the external value of the round's reward.
pub fn evaluate(others: f64, total: f64, reward: f64) -> Valuation {
    if !others.is_finite() || !total.is_finite() || !reward.is_finite() {
        return Valuation::UNAVAILABLE;
    }
    if others <= 0.0 || total <= 0.0 {
        return Valuation::UNAVAILABLE;
    }
    if pool_value(others, total, 0.0, reward) <= 0.0 {
        return Valuation::UNAVAILABLE;
    }

    let mut stake = 0.0f64;
    for _ in 0..ITERATIONS {
        let value = pool_value(others, total, stake, reward);
        let next = (value * others / COST).sqrt() - others;
        // A non-positive pool yields NaN above; clamp it with the rest
        stake = if next.is_nan() { 0.0 } else { next.max(0.0) };
    }
    if stake <= 0.0 {
        return Valuation::NONE;
    }

    let value = pool_value(others, total, stake, reward);
    let share = stake / (others + stake);
    let ev = WIN_PROBABILITY * (-(SQUARES as f64 - 1.0) * stake + value * share)
        - ADMIN_COST_FACTOR * stake;
    Valuation { stake, ev }
}
