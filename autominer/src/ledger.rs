use commonware_runtime::{Clock, Handle, Metrics, Spawner};
use futures::channel::mpsc;
use futures::{SinkExt, Stream, StreamExt};
use motherlode_client::Client;
use motherlode_types::{Board, Pubkey, Round};
use prometheus_client::metrics::counter::Counter;
use rand::Rng;
use std::{
    future::Future,
    pin::Pin,
    sync::atomic::AtomicU64,
    task::{Context, Poll},
    time::Duration,
};
use tracing::{error, info, warn};

/// Initial delay before reconnecting a failed subscription.
const RECONNECT_BACKOFF: Duration = Duration::from_millis(200);

/// Upper bound on the reconnection delay.
const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(10);

/// Default buffer size for forwarded account updates.
pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 256;

/// Boxed stream of raw account data.
pub type AccountStream<E> = Pin<Box<dyn Stream<Item = Result<Vec<u8>, E>> + Send>>;

/// Read access to the game's accounts.
///
/// Account data is returned undecoded; `None` means the account does not exist yet.
pub trait Ledger: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Current ledger slot.
    fn slot(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send;

    /// Fetch the board account.
    fn board(&self) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Fetch the round account for `id`.
    fn round(&self, id: u64)
        -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Subscribe to changes of the board account.
    fn subscribe_board(
        &self,
    ) -> impl Future<
        Output = Result<
            impl Stream<Item = Result<Vec<u8>, Self::Error>> + Send + 'static,
            Self::Error,
        >,
    > + Send;

    /// Subscribe to changes of the round account for `id`.
    fn subscribe_round(
        &self,
        id: u64,
    ) -> impl Future<
        Output = Result<
            impl Stream<Item = Result<Vec<u8>, Self::Error>> + Send + 'static,
            Self::Error,
        >,
    > + Send;
}

/// [Ledger] backed by the JSON-RPC client.
#[derive(Clone)]
pub struct RpcLedger {
    client: Client,
    program_id: Pubkey,
    board: Pubkey,
}

impl RpcLedger {
    pub fn new(client: Client, program_id: Pubkey) -> Self {
        Self {
            board: Board::address(&program_id),
            client,
            program_id,
        }
    }
}

impl Ledger for RpcLedger {
    type Error = motherlode_client::Error;

    async fn slot(&self) -> Result<u64, Self::Error> {
        self.client.get_slot().await
    }

    async fn board(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let account = self.client.get_account(&self.board).await?;
        Ok(account.map(|account| account.data))
    }

    async fn round(&self, id: u64) -> Result<Option<Vec<u8>>, Self::Error> {
        let address = Round::address(&self.program_id, id);
        let account = self.client.get_account(&address).await?;
        Ok(account.map(|account| account.data))
    }

    async fn subscribe_board(
        &self,
    ) -> Result<impl Stream<Item = Result<Vec<u8>, Self::Error>> + Send + 'static, Self::Error>
    {
        let stream = self.client.subscribe_account(&self.board).await?;
        Ok(stream.map(|item| item.map(|account| account.data)))
    }

    async fn subscribe_round(
        &self,
        id: u64,
    ) -> Result<impl Stream<Item = Result<Vec<u8>, Self::Error>> + Send + 'static, Self::Error>
    {
        let address = Round::address(&self.program_id, id);
        let stream = self.client.subscribe_account(&address).await?;
        Ok(stream.map(|item| item.map(|account| account.data)))
    }
}

/// Delay in `[backoff / 2, backoff]`.
fn jittered(rng: &mut impl Rng, backoff: Duration) -> Duration {
    let backoff_ms = backoff.as_millis() as u64;
    if backoff_ms <= 1 {
        return backoff;
    }
    let half_ms = backoff_ms / 2;
    Duration::from_millis(half_ms.saturating_add(rng.gen_range(0..=half_ms)))
}

/// Board subscription that reconnects until dropped.
pub struct ReconnectingStream {
    rx: mpsc::Receiver<Vec<u8>>,
    _handle: Handle<()>,
}

impl ReconnectingStream {
    pub fn new<E, L>(context: E, ledger: L, buffer_size: usize) -> Self
    where
        E: Spawner + Clock + Rng + Metrics,
        L: Ledger,
    {
        let context = context.with_label("board_stream");
        let connect_attempts: Counter<u64, AtomicU64> = Counter::default();
        let connect_failures: Counter<u64, AtomicU64> = Counter::default();
        let stream_failures: Counter<u64, AtomicU64> = Counter::default();
        let forwarded: Counter<u64, AtomicU64> = Counter::default();
        context.register(
            "connect_attempts_total",
            "Number of attempts to subscribe to the board account",
            connect_attempts.clone(),
        );
        context.register(
            "connect_failures_total",
            "Number of failed board subscriptions",
            connect_failures.clone(),
        );
        context.register(
            "stream_failures_total",
            "Number of board subscriptions that failed after connecting",
            stream_failures.clone(),
        );
        context.register(
            "forwarded_total",
            "Number of board updates forwarded",
            forwarded.clone(),
        );

        let buffer_size = if buffer_size == 0 {
            DEFAULT_STREAM_BUFFER_SIZE
        } else {
            buffer_size
        };
        let (mut tx, rx) = mpsc::channel(buffer_size);
        let handle = context.spawn(move |mut context| async move {
            let mut backoff = RECONNECT_BACKOFF;
            loop {
                connect_attempts.inc();
                match ledger.subscribe_board().await {
                    Ok(stream) => {
                        info!("subscribed to board");
                        let mut stream = Box::pin(stream);
                        backoff = RECONNECT_BACKOFF;
                        while let Some(result) = stream.next().await {
                            match result {
                                Ok(data) => {
                                    if tx.send(data).await.is_err() {
                                        // Receiver dropped
                                        return;
                                    }
                                    forwarded.inc();
                                }
                                Err(e) => {
                                    stream_failures.inc();
                                    error!(?e, "board stream error");
                                    break;
                                }
                            }
                        }
                        warn!("board stream ended");
                    }
                    Err(e) => {
                        connect_failures.inc();
                        error!(?e, "failed to subscribe to board");
                    }
                }

                let delay = jittered(&mut context, backoff);
                context.sleep(delay).await;
                backoff = backoff.saturating_mul(2).min(MAX_RECONNECT_BACKOFF);
            }
        });

        Self {
            rx,
            _handle: handle,
        }
    }
}

impl Stream for ReconnectingStream {
    type Item = Vec<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

#[cfg(test)]
pub use mock::{Call, Mock};
