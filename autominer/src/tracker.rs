use crate::ledger::{AccountStream, Ledger};
use commonware_codec::ReadExt;
use commonware_runtime::Metrics;
use futures::StreamExt;
use motherlode_types::{consts::SLOT_DURATION_MS, Board, Round};
use prometheus_client::metrics::counter::Counter;
use tracing::{debug, info, warn};

/// Per-round guards, reset when a new round begins.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoundFlags {
    pub automation_fired: bool,
    pub checkpoint_fired: bool,
    pub winner_announced: bool,
}

/// Lifecycle of the tracked round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Round id known, detail not loaded yet.
    AwaitingDetail,
    Active,
    /// Past its closing slot, outcome not yet announced.
    ExpiredAwaitingOutcome,
    /// Superseded by a newer round.
    Finalized,
}

/// Outcome of a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Announcement {
    pub round_id: u64,
    /// 1-based winning square.
    pub square: usize,
    pub rng: u64,
}

#[derive(Clone, Default)]
pub struct TrackerMetrics {
    pub rounds_finalized: Counter,
    pub winners_announced: Counter,
    pub decode_errors: Counter,
    pub ledger_errors: Counter,
}

impl TrackerMetrics {
    pub fn register(context: &impl Metrics) -> Self {
        let metrics = Self::default();
        context.register(
            "rounds_finalized",
            "Number of rounds finalized after a round change",
            metrics.rounds_finalized.clone(),
        );
        context.register(
            "winners_announced",
            "Number of winning squares announced",
            metrics.winners_announced.clone(),
        );
        context.register(
            "decode_errors",
            "Number of account updates that failed to decode",
            metrics.decode_errors.clone(),
        );
        context.register(
            "ledger_errors",
            "Number of failed ledger reads and subscriptions",
            metrics.ledger_errors.clone(),
        );
        metrics
    }
}

/// Seconds until `end_slot`, floored and clamped at zero.
pub fn seconds_until(end_slot: u64, slot: u64) -> u64 {
    end_slot.saturating_sub(slot).saturating_mul(SLOT_DURATION_MS) / 1_000
}

/// Owns the notion of the current round.
pub struct RoundTracker<L: Ledger> {
    ledger: L,
    metrics: TrackerMetrics,

    board: Option<Board>,
    round: Option<Round>,
    flags: RoundFlags,
    phase: Option<Phase>,
    subscription: Option<AccountStream<L::Error>>,
    transitioning: bool,
    last_finalized: Option<u64>,
    last_announcement: Option<Announcement>,
}

impl<L: Ledger> RoundTracker<L> {
    pub fn new(ledger: L, metrics: TrackerMetrics) -> Self {
        Self {
            ledger,
            metrics,
            board: None,
            round: None,
            flags: RoundFlags::default(),
            phase: None,
            subscription: None,
            transitioning: false,
            last_finalized: None,
            last_announcement: None,
        }
    }

    pub fn board(&self) -> Option<&Board> {
        self.board.as_ref()
    }

    pub fn round(&self) -> Option<&Round> {
        self.round.as_ref()
    }

    /// Id of the round being tracked.
    pub fn round_id(&self) -> Option<u64> {
        self.board.map(|board| board.round_id)
    }

    /// Phase of the tracked round.
    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    /// Phase of round `id`, if it is the tracked round or the last one finalized.
    pub fn phase_of(&self, id: u64) -> Option<Phase> {
        if self.round_id() == Some(id) {
            return self.phase;
        }
        (self.last_finalized == Some(id)).then_some(Phase::Finalized)
    }

    pub fn last_finalized(&self) -> Option<u64> {
        self.last_finalized
    }

    pub fn flags(&self) -> RoundFlags {
        self.flags
    }

    pub fn flags_mut(&mut self) -> &mut RoundFlags {
        &mut self.flags
    }

    pub fn last_announcement(&self) -> Option<Announcement> {
        self.last_announcement
    }

    pub fn is_transitioning(&self) -> bool {
        self.transitioning
    }

    /// Detail subscription of the tracked round, if open.
    pub fn subscription(&mut self) -> Option<&mut AccountStream<L::Error>> {
        self.subscription.as_mut()
    }

    /// Close the detail subscription (it is reopened by [Self::ensure_subscribed]).
    pub fn drop_subscription(&mut self) {
        self.subscription = None;
    }

    /// Seconds left in the tracked round, or `None` if its countdown has not started.
    pub fn seconds_remaining(&self, slot: u64) -> Option<u64> {
        let board = self.board.as_ref()?;
        if !board.has_started() {
            return None;
        }
        Some(seconds_until(board.end_slot, slot))
    }

    /// Handle a board notification.
    pub async fn on_board(&mut self, data: &[u8]) {
        let board = match Board::read(&mut &data[..]) {
            Ok(board) => board,
            Err(e) => {
                self.metrics.decode_errors.inc();
                warn!(error = %e, len = data.len(), "failed to decode board");
                return;
            }
        };
        self.apply_board(board).await;
    }

    async fn apply_board(&mut self, board: Board) {
        let Some(tracked) = self.round_id() else {
            info!(round_id = board.round_id, "tracking first round");
            self.board = Some(board);
            self.begin(board.round_id).await;
            return;
        };

        if board.round_id > tracked {
            if self.transitioning {
                debug!(round_id = board.round_id, "transition already in progress");
                return;
            }
            self.transitioning = true;
            self.finalize(tracked).await;
            self.board = Some(board);
            self.begin(board.round_id).await;
            self.transitioning = false;
        } else if board.round_id == tracked {
            debug!(
                round_id = board.round_id,
                end_slot = board.end_slot,
                "board refreshed"
            );
            self.board = Some(board);
        } else {
            debug!(
                round_id = board.round_id,
                tracked, "ignoring board for an older round"
            );
        }
    }

    /// Fetch the final state of `id` and announce its outcome if determined.
    async fn finalize(&mut self, id: u64) {
        self.phase = Some(Phase::ExpiredAwaitingOutcome);
        self.fetch_round(id).await;
        self.announce();
        self.last_finalized = Some(id);
        self.metrics.rounds_finalized.inc();
        info!(round_id = id, "round finalized");
    }

    /// Start tracking round `id`.
    async fn begin(&mut self, id: u64) {
        self.flags = RoundFlags::default();
        self.round = None;
        self.phase = Some(Phase::AwaitingDetail);

        // Dropping the previous stream cancels its subscription
        self.subscription = None;
        self.subscribe(id).await;
        self.fetch_round(id).await;
        info!(round_id = id, "round started");
    }

    async fn subscribe(&mut self, id: u64) -> bool {
        match self.ledger.subscribe_round(id).await {
            Ok(stream) => {
                self.subscription = Some(Box::pin(stream));
                true
            }
            Err(e) => {
                self.metrics.ledger_errors.inc();
                warn!(round_id = id, error = %e, "failed to subscribe to round");
                false
            }
        }
    }

    /// Reopen the detail subscription if it was lost, then reload the detail it missed.
    pub async fn ensure_subscribed(&mut self) {
        if self.subscription.is_some() || self.transitioning {
            return;
        }
        let Some(id) = self.round_id() else {
            return;
        };
        if self.subscribe(id).await {
            debug!(round_id = id, "round subscription restored");
            self.fetch_round(id).await;
        }
    }

    async fn fetch_round(&mut self, id: u64) {
        match self.ledger.round(id).await {
            Ok(Some(data)) => {
                self.on_round(&data);
            }
            Ok(None) => {
                debug!(round_id = id, "round account not found");
            }
            Err(e) => {
                self.metrics.ledger_errors.inc();
                warn!(round_id = id, error = %e, "failed to fetch round");
            }
        }
    }

    /// Handle round detail; returns whether the held detail changed.
    pub fn on_round(&mut self, data: &[u8]) -> bool {
        let round = match Round::read(&mut &data[..]) {
            Ok(round) => round,
            Err(e) => {
                self.metrics.decode_errors.inc();
                warn!(error = %e, len = data.len(), "failed to decode round");
                return false;
            }
        };
        let Some(tracked) = self.round_id() else {
            return false;
        };
        if round.id != tracked {
            debug!(round_id = round.id, tracked, "dropping detail for another round");
            return false;
        }
        if self.phase == Some(Phase::AwaitingDetail) {
            self.phase = Some(Phase::Active);
        }
        self.round = Some(round);
        true
    }

    /// Poll the detail subscription once.
    pub async fn next_round_update(&mut self) -> Option<Result<Vec<u8>, L::Error>> {
        match self.subscription.as_mut() {
            Some(stream) => stream.next().await,
            None => futures::future::pending().await,
        }
    }

    /// Re-arm the announcement while the round is open.
    pub fn reopen(&mut self) {
        self.flags.winner_announced = false;
    }

    /// Work the close window: announce the outcome, fetching the detail once if it is
    /// not determined yet.
    pub async fn close_window(&mut self) -> Option<Announcement> {
        if self.phase == Some(Phase::Active) || self.phase == Some(Phase::AwaitingDetail) {
            self.phase = Some(Phase::ExpiredAwaitingOutcome);
        }
        if self.flags.winner_announced {
            return None;
        }
        let populated = self
            .round
            .as_ref()
            .is_some_and(|round| round.entropy.is_populated());
        if !populated {
            let id = self.round_id()?;
            self.fetch_round(id).await;
        }
        self.announce()
    }

    /// Announce the tracked round's outcome, at most once per round.
    pub fn announce(&mut self) -> Option<Announcement> {
        if self.flags.winner_announced {
            return None;
        }
        let round = self.round.as_ref()?;
        let rng = round.entropy.rng()?;
        let square = round.entropy.winning_square()?;
        self.flags.winner_announced = true;
        self.metrics.winners_announced.inc();

        let announcement = Announcement {
            round_id: round.id,
            square,
            rng,
        };
        info!(round_id = round.id, square, rng, "winning square");
        self.last_announcement = Some(announcement);
        Some(announcement)
    }
}
