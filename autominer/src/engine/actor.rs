use super::{
    ingress::{Mailbox, Message},
    next_deadline, Config, EngineMetrics, Status, TICK_INTERVAL,
};
use crate::{
    analyzer::analyze,
    automation::{maybe_trigger, AutomationConfig, Decision, Plan},
    ledger::{Ledger, ReconnectingStream},
    pricing::{PriceSource, Pricing},
    sequencer::{is_expected_rejection, sequence, SubmitError, Submitter},
    tracker::{RoundTracker, TrackerMetrics},
};
use commonware_macros::select;
use commonware_runtime::{Clock, Handle, Metrics, Spawner};
use futures::{channel::mpsc, StreamExt};
use motherlode_types::{sol_to_lamports, SquareMask};
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Event taken from the loop's sources.
enum Input<E> {
    Board(Option<Vec<u8>>),
    Round(Option<Result<Vec<u8>, E>>),
    Control(Option<Message>),
    Tick,
}

pub struct Engine<
    R: Clock + Spawner + Metrics + Rng + Clone,
    L: Ledger,
    P: PriceSource,
    S: Submitter,
> {
    context: R,
    ledger: L,
    prices: P,
    submitter: Option<S>,
    board_buffer: usize,
    mailbox: mpsc::Receiver<Message>,

    tracker: RoundTracker<L>,
    automation: AutomationConfig,
    pricing: Pricing,
    slot: Option<u64>,

    status: watch::Sender<Status>,
    metrics: EngineMetrics,
}

impl<R, L, P, S> Engine<R, L, P, S>
where
    R: Clock + Spawner + Metrics + Rng + Clone,
    L: Ledger,
    P: PriceSource,
    S: Submitter,
{
    pub fn new(context: R, config: Config<L, P, S>) -> (Self, Mailbox, watch::Receiver<Status>) {
        // Create mailbox
        let (sender, mailbox) = mpsc::channel(config.mailbox_size);
        let inbound = Mailbox::new(sender);

        // Create metrics
        let tracker_metrics = TrackerMetrics::register(&context.with_label("tracker"));
        let metrics = EngineMetrics::register(&context);

        let (status, status_rx) = watch::channel(Status {
            automation: config.automation,
            ..Default::default()
        });
        let tracker = RoundTracker::new(config.ledger.clone(), tracker_metrics);
        let pricing = Pricing::new(config.ore_mint, config.sol_mint, config.price_refresh);
        (
            Self {
                context,
                ledger: config.ledger,
                prices: config.prices,
                submitter: config.submitter,
                board_buffer: config.board_buffer,
                mailbox,
                tracker,
                automation: config.automation,
                pricing,
                slot: None,
                status,
                metrics,
            },
            inbound,
            status_rx,
        )
    }

    pub fn start(self) -> Handle<()> {
        let context = self.context.clone();
        context.spawn(move |context| async move {
            let mut engine = self;
            engine.context = context;
            engine.run().await;
        })
    }

    async fn run(mut self) {
        // Process the current board before any notification
        self.bootstrap().await;

        let mut board = ReconnectingStream::new(
            self.context.with_label("ledger"),
            self.ledger.clone(),
            self.board_buffer,
        );
        let origin = self.context.current();
        let mut deadline = next_deadline(origin, origin, TICK_INTERVAL);
        loop {
            let input = select! {
                data = board.next() => {
                    Input::Board(data)
                },
                update = self.tracker.next_round_update() => {
                    Input::Round(update)
                },
                message = self.mailbox.next() => {
                    Input::Control(message)
                },
                _ = self.context.sleep_until(deadline) => {
                    Input::Tick
                },
            };

            match input {
                Input::Board(Some(data)) => self.handle_board(&data).await,
                Input::Board(None) => {
                    warn!("board stream closed; stopping engine");
                    return;
                }
                Input::Round(Some(Ok(data))) => {
                    self.handle_round(&data);
                }
                Input::Round(Some(Err(e))) => {
                    warn!(error = %e, "round stream failed");
                    self.round_stream_lost();
                }
                Input::Round(None) => {
                    debug!("round stream ended");
                    self.round_stream_lost();
                }
                Input::Control(Some(message)) => self.apply(message),
                Input::Control(None) => {
                    info!("control channel closed; stopping engine");
                    return;
                }
                Input::Tick => {
                    self.tick().await;
                    deadline = next_deadline(origin, self.context.current(), TICK_INTERVAL);
                }
            }
            self.publish();
        }
    }

    /// Load prices and the current board once.
    pub(crate) async fn bootstrap(&mut self) {
        let now = self.context.current();
        self.pricing.refresh(&self.prices, now).await;
        match self.ledger.board().await {
            Ok(Some(data)) => self.tracker.on_board(&data).await,
            Ok(None) => warn!("board account not found"),
            Err(e) => warn!(error = %e, "failed to fetch board"),
        }
        self.publish();
    }

    pub(crate) async fn handle_board(&mut self, data: &[u8]) {
        self.tracker.on_board(data).await;
    }

    pub(crate) fn handle_round(&mut self, data: &[u8]) -> bool {
        self.tracker.on_round(data)
    }

    /// Forget the round subscription; the next tick reopens it.
    pub(crate) fn round_stream_lost(&mut self) {
        self.tracker.drop_subscription();
    }

    /// Countdown step: trigger automation while the round is open, work the close
    /// window once it is not.
    pub(crate) async fn tick(&mut self) {
        let now = self.context.current();
        if self.pricing.is_due(now) {
            self.pricing.refresh(&self.prices, now).await;
        }

        let Some(round_id) = self.tracker.round_id() else {
            debug!("no round tracked yet");
            return;
        };

        // Restore a lost detail subscription before deciding anything on its data
        self.tracker.ensure_subscribed().await;

        let slot = match self.ledger.slot().await {
            Ok(slot) => slot,
            Err(e) => {
                warn!(error = %e, "failed to fetch slot");
                return;
            }
        };
        self.slot = Some(slot);

        match self.tracker.seconds_remaining(slot) {
            None => {
                debug!(round_id, "countdown not started");
            }
            Some(0) => {
                self.tracker.close_window().await;
            }
            Some(remaining) => {
                self.tracker.reopen();

                // The fired flag is written back before anything suspends
                let mut flags = self.tracker.flags();
                let decision = maybe_trigger(
                    &self.automation,
                    &mut flags,
                    round_id,
                    self.tracker.round(),
                    remaining,
                    self.pricing.ratio(),
                );
                *self.tracker.flags_mut() = flags;

                match decision {
                    Decision::Skip(reason) => {
                        debug!(round_id, remaining, ?reason, "automation skipped");
                    }
                    Decision::NoPositiveEv | Decision::DryRun(_) => {
                        self.metrics.automation_triggers.inc();
                    }
                    Decision::Deploy(plan) => {
                        self.metrics.automation_triggers.inc();
                        self.deploy(plan).await;
                    }
                }
            }
        }
    }

    /// Submit `plan`, checkpointing the signer's previous round first if needed.
    pub(crate) async fn deploy(&mut self, plan: Plan) {
        let round_id = plan.round_id;
        let Some(submitter) = self.submitter.as_ref() else {
            self.metrics.missing_signer.inc();
            warn!(round_id, "no signer configured; skipping deployment");
            return;
        };
        let squares = match SquareMask::from_squares(&plan.squares()) {
            Ok(squares) => squares,
            Err(e) => {
                warn!(round_id, error = %e, "invalid deployment targets");
                return;
            }
        };
        let amount = sol_to_lamports(plan.stake_per_target);
        if amount == 0 {
            warn!(round_id, stake = plan.stake_per_target, "stake rounds to zero");
            return;
        }

        let markers = match submitter.markers().await {
            Ok(markers) => markers,
            Err(e) => {
                self.metrics.deployments_failed.inc();
                warn!(round_id, error = %e, "failed to load signer markers");
                return;
            }
        };
        let sequence = sequence(
            markers,
            round_id,
            self.tracker.flags().checkpoint_fired,
            amount,
            squares,
        );
        if let Some(checkpoint) = sequence.checkpoint {
            self.tracker.flags_mut().checkpoint_fired = true;
            info!(round_id, checkpoint, "checkpointing previous round");
        }

        match submitter.submit(sequence.instructions).await {
            Ok(signature) => {
                self.metrics.deployments_submitted.inc();
                info!(
                    round_id,
                    %signature,
                    amount,
                    squares = ?plan.squares(),
                    authority = %submitter.authority(),
                    "deployment submitted"
                );
            }
            Err(SubmitError::Rejected { reason }) if is_expected_rejection(&reason) => {
                self.metrics.expected_rejections.inc();
                info!(round_id, reason = %reason, "deployment arrived after the round closed");
            }
            Err(e) => {
                self.metrics.deployments_failed.inc();
                warn!(round_id, error = %e, "deployment failed");
            }
        }
    }

    pub(crate) fn apply(&mut self, message: Message) {
        match message {
            Message::SetMode(mode) => {
                self.automation.mode = mode;
                info!(%mode, "mode changed");
            }
            Message::SetDryRun(dry_run) => {
                self.automation.dry_run = dry_run;
                info!(dry_run, "dry run changed");
            }
            Message::SetAmount(amount) => {
                if !amount.is_finite() || amount <= 0.0 {
                    warn!(amount, "ignoring invalid stake per target");
                    return;
                }
                self.automation.stake_per_target = amount;
                info!(amount, "stake per target changed");
            }
        }
    }

    pub(crate) fn publish(&self) {
        let ratio = self.pricing.ratio();
        let status = Status {
            round_id: self.tracker.round_id(),
            phase: self.tracker.phase(),
            seconds_remaining: self
                .slot
                .and_then(|slot| self.tracker.seconds_remaining(slot)),
            flags: self.tracker.flags(),
            last_finalized: self.tracker.last_finalized(),
            automation: self.automation,
            price_ratio: ratio,
            analysis: analyze(self.tracker.round(), ratio),
            last_announcement: self.tracker.last_announcement(),
        };
        self.status.send_replace(status);
    }

    #[cfg(test)]
    pub(crate) fn tracker(&self) -> &RoundTracker<L> {
        &self.tracker
    }

    #[cfg(test)]
    pub(crate) fn automation(&self) -> AutomationConfig {
        self.automation
    }
}
