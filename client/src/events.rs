use crate::{Error, Result};
use futures_util::{SinkExt, Stream as FutStream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, error, trace, warn};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Stream of items forwarded by a background reader.
///
/// Dropping the stream aborts the reader (and closes its subscription).
pub struct Stream<T: Send + 'static> {
    receiver: mpsc::Receiver<Result<T>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<T: Send + 'static> Drop for Stream<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl<T: Send + 'static> Stream<T> {
    fn capacity_or_default(capacity: usize) -> usize {
        if capacity == 0 {
            DEFAULT_CHANNEL_CAPACITY
        } else {
            capacity
        }
    }

    /// A stream fed by the returned sender instead of a socket.
    ///
    /// A `capacity` of `0` uses the default capacity.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Result<T>>, Self) {
        let (tx, rx) = mpsc::channel(Self::capacity_or_default(capacity));
        (
            tx,
            Self {
                receiver: rx,
                handle: None,
            },
        )
    }

    /// Receive the next item from the stream
    pub async fn next(&mut self) -> Option<Result<T>> {
        self.receiver.recv().await
    }
}

impl<T: Send + 'static> FutStream for Stream<T> {
    type Item = Result<T>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Snapshot of an account's data as of a ledger slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountData {
    pub slot: u64,
    pub data: Vec<u8>,
}

#[derive(Deserialize)]
struct Frame {
    method: Option<String>,
    params: Option<NotificationParams>,
    result: Option<serde_json::Value>,
    error: Option<crate::client::RpcError>,
}

#[derive(Deserialize)]
struct NotificationParams {
    result: crate::client::AccountResult,
}

impl Stream<AccountData> {
    /// Send `subscribe` on `ws` and forward every `accountNotification` that follows.
    pub(crate) fn accounts<S>(
        ws: WebSocketStream<S>,
        subscribe: String,
        capacity: usize,
    ) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(Self::capacity_or_default(capacity));
        let handle = tokio::spawn(async move {
            let mut ws = ws;
            if let Err(e) = ws.send(Message::Text(subscribe)).await {
                error!("failed to send subscription request: {}", e);
                let _ = tx.send(Err(e.into())).await;
                return;
            }
            while let Some(msg) = ws.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        trace!(len = text.len(), "received websocket message");
                        let item = match serde_json::from_str::<Frame>(&text) {
                            Ok(frame) => match decode_frame(frame) {
                                Some(item) => item,
                                None => continue,
                            },
                            Err(e) => {
                                warn!(error = %e, "failed to parse websocket message");
                                continue;
                            }
                        };
                        let fatal = matches!(item, Err(Error::Rpc { .. }));
                        if tx.send(item).await.is_err() {
                            break; // Receiver dropped
                        }
                        if fatal {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("WebSocket closed");
                        let _ = tx.send(Err(Error::ConnectionClosed)).await;
                        break;
                    }
                    Ok(_) => {} // Ignore other message types
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        let _ = tx.send(Err(e.into())).await;
                        break;
                    }
                }
            }
        });

        Self {
            receiver: rx,
            handle: Some(handle),
        }
    }
}

fn decode_frame(frame: Frame) -> Option<Result<AccountData>> {
    if let Some(error) = frame.error {
        return Some(Err(Error::Rpc {
            code: error.code,
            message: error.message,
        }));
    }
    if frame.method.as_deref() != Some("accountNotification") {
        if let Some(subscription) = frame.result {
            debug!(%subscription, "subscription confirmed");
        }
        return None;
    }
    match frame.params?.result.into_account_data() {
        Ok(Some(account)) => Some(Ok(account)),
        Ok(None) => {
            debug!("account closed");
            None
        }
        Err(e) => Some(Err(e)),
    }
}
