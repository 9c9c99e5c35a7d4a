use crate::{
    analyzer::{analyze, SquareStats},
    tracker::RoundFlags,
};
use motherlode_types::Round;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Automation fires only when this many seconds or fewer remain.
pub const TRIGGER_WINDOW_SECONDS: u64 = 8;

/// Target selection strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Idle,
    Top1,
    Top3,
    Top5,
    Top25,
}

impl Mode {
    /// Number of squares targeted.
    pub fn targets(&self) -> usize {
        match self {
            Self::Idle => 0,
            Self::Top1 => 1,
            Self::Top3 => 3,
            Self::Top5 => 5,
            Self::Top25 => 25,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown mode: {0} (expected idle, top1, top3, top5 or top25)")]
pub struct UnknownMode(pub String);

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "idle" => Ok(Self::Idle),
            "top1" => Ok(Self::Top1),
            "top3" => Ok(Self::Top3),
            "top5" => Ok(Self::Top5),
            "top25" => Ok(Self::Top25),
            _ => Err(UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Top1 => "top1",
            Self::Top3 => "top3",
            Self::Top5 => "top5",
            Self::Top25 => "top25",
        };
        f.write_str(name)
    }
}

/// User-controlled automation settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AutomationConfig {
    pub mode: Mode,
    /// Log intended deployments instead of submitting them.
    pub dry_run: bool,
    /// SOL committed to each targeted square.
    pub stake_per_target: f64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Idle,
            dry_run: true,
            stake_per_target: 0.01,
        }
    }
}

/// Deployment chosen for a round.
#[derive(Clone, Debug, PartialEq)]
pub struct Plan {
    pub round_id: u64,
    pub targets: Vec<SquareStats>,
    pub stake_per_target: f64,
}

impl Plan {
    pub fn squares(&self) -> Vec<usize> {
        self.targets.iter().map(|target| target.square).collect()
    }

    pub fn total(&self) -> f64 {
        self.stake_per_target * self.targets.len() as f64
    }
}

/// Why a tick did not consider deploying.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Skip {
    Idle,
    OutsideWindow,
    AlreadyFired,
    /// ORE/SOL is not known yet; the trigger stays armed.
    UnknownPrice,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Skip(Skip),
    /// Fired, but nothing was worth deploying to.
    NoPositiveEv,
    /// Fired in dry-run mode; nothing is submitted.
    DryRun(Plan),
    /// Fired; `Plan` should be handed to the sequencer.
    Deploy(Plan),
}

/// Decide whether to deploy on this tick.
///
/// Fires at most once per round: `flags.automation_fired` is set before anything else
/// happens.
pub fn maybe_trigger(
    config: &AutomationConfig,
    flags: &mut RoundFlags,
    round_id: u64,
    round: Option<&Round>,
    seconds_remaining: u64,
    price_ratio: f64,
) -> Decision {
    if config.mode == Mode::Idle {
        return Decision::Skip(Skip::Idle);
    }
    if seconds_remaining == 0 || seconds_remaining > TRIGGER_WINDOW_SECONDS {
        return Decision::Skip(Skip::OutsideWindow);
    }
    if flags.automation_fired {
        return Decision::Skip(Skip::AlreadyFired);
    }
    if !price_ratio.is_finite() || price_ratio <= 0.0 {
        warn!(round_id, seconds_remaining, "price unknown; holding trigger");
        return Decision::Skip(Skip::UnknownPrice);
    }
    flags.automation_fired = true;
    info!(round_id, seconds_remaining, mode = %config.mode, "automation triggered");

    let analysis = analyze(round, price_ratio);
    if analysis.best_by_ev().is_none() {
        info!(round_id, "no square with positive EV");
        return Decision::NoPositiveEv;
    }
    let plan = Plan {
        round_id,
        targets: analysis.top(config.mode.targets()).to_vec(),
        stake_per_target: config.stake_per_target,
    };

    if config.dry_run {
        info!(
            round_id,
            stake_per_target = plan.stake_per_target,
            total = plan.total(),
            targets = plan.targets.len(),
            "dry run: would deploy"
        );
        for target in &plan.targets {
            info!(round_id, square = target.square, ev = target.ev(), "dry run target");
        }
        return Decision::DryRun(plan);
    }
    debug!(round_id, squares = ?plan.squares(), "deployment planned");
    Decision::Deploy(plan)
}
