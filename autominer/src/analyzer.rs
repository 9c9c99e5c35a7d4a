use crate::valuation::{evaluate, Valuation};
use motherlode_types::{consts::SQUARES, grams_to_ore, lamports_to_sol, Round};
use std::cmp::Ordering;

/// Chance that a round pays out the motherlode.
pub const MOTHERLODE_PROBABILITY: f64 = 1.0 / 625.0;

/// Share of mined rewards kept after refining.
pub const REFINING_MULTIPLIER: f64 = 0.9;

/// Reward (in ORE) assumed for a round when the pool size is unusable.
pub const DEFAULT_EXPECTED_REWARD: f64 = 1.0;

/// Derived statistics of one square.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SquareStats {
    /// 1-based square index.
    pub square: usize,
    pub stake_sol: f64,
    pub count: u64,
    /// Stake per participant (`f64::INFINITY` when nobody staked).
    pub ratio: f64,
    pub valuation: Valuation,
}

impl SquareStats {
    pub fn ev(&self) -> f64 {
        self.valuation.ev
    }
}

/// Rankings of a round's squares.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Analysis {
    /// Every square in board order (empty when there was no round).
    pub all: Vec<SquareStats>,
    /// Squares with positive EV, best first.
    pub ranked_by_ev: Vec<SquareStats>,
    /// Squares with a positive, finite ratio, lowest first.
    pub ranked_by_ratio: Vec<SquareStats>,
}

impl Analysis {
    pub fn best_by_ev(&self) -> Option<&SquareStats> {
        self.ranked_by_ev.first()
    }

    pub fn best_by_ratio(&self) -> Option<&SquareStats> {
        self.ranked_by_ratio.first()
    }

    /// Up to `count` best squares by EV.
    pub fn top(&self, count: usize) -> &[SquareStats] {
        &self.ranked_by_ev[..count.min(self.ranked_by_ev.len())]
    }
}

/// Value of a round's reward in SOL.
///
/// `motherlode` is the pool size in ORE; `price_ratio` is ORE priced in SOL.
pub fn reward_value(motherlode: Option<f64>, price_ratio: f64) -> f64 {
    match motherlode {
        Some(pool) if pool.is_finite() && pool > 0.0 => {
            pool * MOTHERLODE_PROBABILITY * REFINING_MULTIPLIER * price_ratio
        }
        _ => DEFAULT_EXPECTED_REWARD * REFINING_MULTIPLIER * price_ratio,
    }
}

fn by_square(a: &SquareStats, b: &SquareStats) -> Ordering {
    a.square.cmp(&b.square)
}

/// Rank the squares of `round`.
pub fn analyze(round: Option<&Round>, price_ratio: f64) -> Analysis {
    let Some(round) = round else {
        return Analysis::default();
    };

    let total = lamports_to_sol(round.stake_sum());
    let motherlode = (round.motherlode > 0).then(|| grams_to_ore(round.motherlode));
    let reward = reward_value(motherlode, price_ratio);

    let all = (0..SQUARES)
        .map(|i| {
            let stake_sol = lamports_to_sol(round.deployed[i]);
            let count = round.count[i];
            let ratio = if count == 0 {
                f64::INFINITY
            } else {
                stake_sol / count as f64
            };
            SquareStats {
                square: i + 1,
                stake_sol,
                count,
                ratio,
                valuation: evaluate(stake_sol, total, reward),
            }
        })
        .collect::<Vec<_>>();

    let mut ranked_by_ev = all
        .iter()
        .filter(|stats| stats.ev() > 0.0)
        .copied()
        .collect::<Vec<_>>();
    ranked_by_ev.sort_by(|a, b| b.ev().total_cmp(&a.ev()).then_with(|| by_square(a, b)));

    let mut ranked_by_ratio = all
        .iter()
        .filter(|stats| stats.ratio > 0.0 && stats.ratio.is_finite())
        .copied()
        .collect::<Vec<_>>();
    ranked_by_ratio.sort_by(|a, b| a.ratio.total_cmp(&b.ratio).then_with(|| by_square(a, b)));

    Analysis {
        all,
        ranked_by_ev,
        ranked_by_ratio,
    }
}
