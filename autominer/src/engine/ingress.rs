use crate::automation::Mode;
use futures::{channel::mpsc, SinkExt};
use tracing::warn;

/// Changes to the automation settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Message {
    SetMode(Mode),
    SetDryRun(bool),
    /// Stake per target, in SOL.
    SetAmount(f64),
}

#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    pub(super) fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    pub async fn set_mode(&mut self, mode: Mode) {
        if self.sender.send(Message::SetMode(mode)).await.is_err() {
            warn!(%mode, "engine mailbox closed; mode change dropped");
        }
    }

    pub async fn set_dry_run(&mut self, dry_run: bool) {
        if self.sender.send(Message::SetDryRun(dry_run)).await.is_err() {
            warn!(dry_run, "engine mailbox closed; dry run change dropped");
        }
    }

    pub async fn set_amount(&mut self, amount: f64) {
        if self.sender.send(Message::SetAmount(amount)).await.is_err() {
            warn!(amount, "engine mailbox closed; amount change dropped");
        }
    }
}
