//! Single-writer coordinator for the autominer.
//!
//! The engine owns all mutable state (tracked round, automation settings, prices)
//! and processes board notifications, round detail updates, control messages and a
//! 1 Hz tick from one loop. Every handler runs to completion before the next event
//! is taken.

mod actor;
mod ingress;

use crate::{
    analyzer::Analysis,
    automation::AutomationConfig,
    ledger::Ledger,
    pricing::PriceSource,
    sequencer::Submitter,
    tracker::{Announcement, Phase, RoundFlags},
};
pub use actor::Engine;
use commonware_runtime::Metrics;
pub use ingress::{Mailbox, Message};
use prometheus_client::metrics::counter::Counter;
use std::{
    fmt,
    time::{Duration, SystemTime},
};

/// Interval of the countdown tick.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

pub struct Config<L: Ledger, P: PriceSource, S: Submitter> {
    pub ledger: L,
    pub prices: P,
    /// Signing capability; without one, deployments are skipped.
    pub submitter: Option<S>,
    pub automation: AutomationConfig,

    pub ore_mint: String,
    pub sol_mint: String,
    pub price_refresh: Duration,

    pub mailbox_size: usize,
    pub board_buffer: usize,
}

/// Snapshot of the engine's state for presentation layers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Status {
    pub round_id: Option<u64>,
    pub phase: Option<Phase>,
    pub seconds_remaining: Option<u64>,
    pub flags: RoundFlags,
    pub automation: AutomationConfig,
    /// ORE priced in SOL (`0.0` while unknown).
    pub price_ratio: f64,
    pub analysis: Analysis,
    pub last_finalized: Option<u64>,
    pub last_announcement: Option<Announcement>,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.round_id {
            Some(round_id) => write!(f, "round {round_id}")?,
            None => write!(f, "no round")?,
        }
        if let Some(phase) = self.phase {
            write!(f, " ({phase:?})")?;
        }
        match self.seconds_remaining {
            Some(seconds) => writeln!(f, ", {seconds}s remaining")?,
            None => writeln!(f, ", countdown not started")?,
        }
        write!(
            f,
            "mode {} | dry run {} | {} SOL per target | ",
            self.automation.mode,
            if self.automation.dry_run { "on" } else { "off" },
            self.automation.stake_per_target,
        )?;
        if self.price_ratio > 0.0 {
            writeln!(f, "ORE/SOL {:.4}", self.price_ratio)?;
        } else {
            writeln!(f, "ORE/SOL unknown")?;
        }
        match self.analysis.best_by_ev() {
            Some(best) => writeln!(
                f,
                "best square {} (EV {:.6} SOL), {} with positive EV",
                best.square,
                best.ev(),
                self.analysis.ranked_by_ev.len()
            )?,
            None => writeln!(f, "no square with positive EV")?,
        }
        if let Some(best) = self.analysis.best_by_ratio() {
            writeln!(
                f,
                "lowest stake per miner: square {} ({:.6} SOL)",
                best.square, best.ratio
            )?;
        }
        if let Some(round_id) = self.last_finalized {
            writeln!(f, "last finalized: round {round_id}")?;
        }
        if let Some(announcement) = self.last_announcement {
            write!(
                f,
                "last winner: square {} in round {}",
                announcement.square, announcement.round_id
            )?;
        }
        Ok(())
    }
}

/// Next tick after `now` on the grid `origin + k * period`.
///
/// Ticks missed while a handler was busy are skipped rather than replayed.
pub fn next_deadline(origin: SystemTime, now: SystemTime, period: Duration) -> SystemTime {
    let period_ns = period.as_nanos().max(1);
    let elapsed_ns = now.duration_since(origin).unwrap_or_default().as_nanos();
    let ticks = elapsed_ns / period_ns + 1;
    let offset = u64::try_from(ticks * period_ns).unwrap_or(u64::MAX);
    origin + Duration::from_nanos(offset)
}

#[derive(Clone, Default)]
pub struct EngineMetrics {
    pub automation_triggers: Counter,
    pub deployments_submitted: Counter,
    pub expected_rejections: Counter,
    pub deployments_failed: Counter,
    pub missing_signer: Counter,
}

impl EngineMetrics {
    pub fn register(context: &impl Metrics) -> Self {
        let metrics = Self::default();
        context.register(
            "automation_triggers",
            "Number of rounds in which automation fired",
            metrics.automation_triggers.clone(),
        );
        context.register(
            "deployments_submitted",
            "Number of deployments accepted by the ledger",
            metrics.deployments_submitted.clone(),
        );
        context.register(
            "expected_rejections",
            "Number of deployments rejected because the round had closed",
            metrics.expected_rejections.clone(),
        );
        context.register(
            "deployments_failed",
            "Number of deployments that failed for any other reason",
            metrics.deployments_failed.clone(),
        );
        context.register(
            "missing_signer",
            "Number of deployments skipped because no signer is configured",
            metrics.missing_signer.clone(),
        );
        metrics
    }
}
