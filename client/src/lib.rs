pub mod client;
pub mod events;
pub mod prices;

pub use client::Client;
pub use client::RetryPolicy;
pub use events::{AccountData, Stream};
pub use prices::{PriceFeed, DEFAULT_PRICE_FEED_URL};
use thiserror::Error;

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed: {0}")]
    Failed(reqwest::StatusCode),
    #[error("failed: {status}: {body}")]
    FailedWithBody {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unexpected account encoding: {0}")]
    UnexpectedEncoding(String),
    #[error("unexpected response")]
    UnexpectedResponse,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("dial timeout")]
    DialTimeout,
    #[error("invalid URL scheme: {0}")]
    InvalidScheme(String),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{
            ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
            Path, State as AxumState,
        },
        http::StatusCode as AxumStatusCode,
        response::{IntoResponse, Response},
        routing::get,
        Json, Router,
    };
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use motherlode_types::Pubkey;
    use serde_json::{json, Value};
    use std::{
        net::SocketAddr,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    fn known_account() -> Pubkey {
        Pubkey::new_from_array([1u8; 32])
    }

    fn missing_account() -> Pubkey {
        Pubkey::new_from_array([2u8; 32])
    }

    fn failing_account() -> Pubkey {
        Pubkey::new_from_array([3u8; 32])
    }

    async fn serve(router: Router) -> String {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        let actual_addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{actual_addr}")
    }

    async fn rpc(Json(request): Json<Value>) -> Json<Value> {
        let id = request["id"].clone();
        let response = match request["method"].as_str() {
            Some("getSlot") => json!({ "jsonrpc": "2.0", "id": id, "result": 1234 }),
            Some("getAccountInfo") => {
                let pubkey = request["params"][0].as_str().unwrap_or_default();
                if pubkey == known_account().to_string() {
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {
                            "context": { "slot": 77 },
                            "value": {
                                "data": [STANDARD.encode([9u8, 8, 7]), "base64"],
                                "executable": false,
                                "lamports": 1,
                                "owner": "11111111111111111111111111111111",
                            }
                        }
                    })
                } else if pubkey == failing_account().to_string() {
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": { "code": -32602, "message": "invalid param" }
                    })
                } else {
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": { "context": { "slot": 78 }, "value": null }
                    })
                }
            }
            _ => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": "method not found" }
            }),
        };
        Json(response)
    }

    fn notification(slot: u64, data: &[u8]) -> String {
        json!({
            "jsonrpc": "2.0",
            "method": "accountNotification",
            "params": {
                "result": {
                    "context": { "slot": slot },
                    "value": { "data": [STANDARD.encode(data), "base64"] }
                },
                "subscription": 7
            }
        })
        .to_string()
    }

    async fn subscription(mut socket: WebSocket) {
        let Some(Ok(WsMessage::Text(request))) = socket.recv().await else {
            return;
        };
        let request: Value = serde_json::from_str(&request).unwrap();
        if request["method"] != "accountSubscribe"
            || request["params"][0] != known_account().to_string()
        {
            let _ = socket
                .send(WsMessage::Text(
                    json!({
                        "jsonrpc": "2.0",
                        "id": 1,
                        "error": { "code": -32602, "message": "bad subscription" }
                    })
                    .to_string(),
                ))
                .await;
            return;
        }
        let confirm = json!({ "jsonrpc": "2.0", "id": 1, "result": 7 }).to_string();
        let _ = socket.send(WsMessage::Text(confirm)).await;
        let _ = socket.send(WsMessage::Text(notification(10, &[1, 2, 3]))).await;
        let _ = socket.send(WsMessage::Text("not json".to_string())).await;
        let _ = socket.send(WsMessage::Text(notification(11, &[4, 5]))).await;
        let _ = socket.send(WsMessage::Close(None)).await;
    }

    async fn subscribe(ws: WebSocketUpgrade) -> Response {
        ws.on_upgrade(subscription)
    }

    async fn ledger() -> Client {
        let router = Router::new().route("/", get(subscribe).post(rpc));
        let base_url = serve(router).await;
        Client::new(&base_url, None).unwrap()
    }

    #[test]
    fn test_ws_url_derivation() {
        let client = Client::new("https://rpc.example.com/path", None).unwrap();
        assert_eq!(client.ws_url.as_str(), "wss://rpc.example.com/path");

        let client = Client::new("http://127.0.0.1:8899", Some("ws://127.0.0.1:8900")).unwrap();
        assert_eq!(client.ws_url.port(), Some(8900));

        assert!(matches!(
            Client::new("ftp://rpc.example.com", None),
            Err(Error::InvalidScheme(_))
        ));
        assert!(matches!(
            Client::new("http://rpc.example.com", Some("http://rpc.example.com")),
            Err(Error::InvalidScheme(_))
        ));
        assert!(matches!(Client::new("not a url", None), Err(Error::Url(_))));
    }

    #[tokio::test]
    async fn test_get_slot() {
        let client = ledger().await;
        assert_eq!(client.get_slot().await.unwrap(), 1234);
    }

    #[tokio::test]
    async fn test_get_account() {
        let client = ledger().await;

        let account = client.get_account(&known_account()).await.unwrap().unwrap();
        assert_eq!(account.slot, 77);
        assert_eq!(account.data, vec![9, 8, 7]);

        let account = client.get_account(&missing_account()).await.unwrap();
        assert!(account.is_none());
    }

    #[tokio::test]
    async fn test_rpc_error_is_surfaced() {
        let client = ledger().await;
        let result = client.get_account(&failing_account()).await;
        match result {
            Err(Error::Rpc { code, message }) => {
                assert_eq!(code, -32602);
                assert_eq!(message, "invalid param");
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_subscribe_account() {
        let client = ledger().await;
        let mut stream = client.subscribe_account(&known_account()).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.slot, 10);
        assert_eq!(first.data, vec![1, 2, 3]);

        // Unparsable frames are skipped
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.slot, 11);
        assert_eq!(second.data, vec![4, 5]);

        assert!(matches!(stream.next().await, Some(Err(_)) | None));
    }

    #[tokio::test]
    async fn test_subscription_error_ends_stream() {
        let client = ledger().await;
        let mut stream = client.subscribe_account(&missing_account()).await.unwrap();
        assert!(matches!(stream.next().await, Some(Err(Error::Rpc { .. }))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_channel_stream() {
        let (tx, mut stream) = Stream::<u64>::channel(0);
        tx.send(Ok(5)).await.unwrap();
        drop(tx);
        assert_eq!(stream.next().await.unwrap().unwrap(), 5);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_retry_policy_retries_unavailable() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/",
                axum::routing::post(
                    |AxumState(hits): AxumState<Arc<AtomicUsize>>| async move {
                        if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                            AxumStatusCode::SERVICE_UNAVAILABLE.into_response()
                        } else {
                            Json(json!({ "jsonrpc": "2.0", "id": 1, "result": 99 }))
                                .into_response()
                        }
                    },
                ),
            )
            .with_state(hits.clone());
        let base_url = serve(router).await;

        // Without retries the first failure is returned
        let client = Client::new(&base_url, None).unwrap();
        assert!(matches!(
            client.get_slot().await,
            Err(Error::FailedWithBody { .. })
        ));

        let client = client.with_retry_policy(RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
        });
        assert_eq!(client.get_slot().await.unwrap(), 99);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    async fn pairs(Path(mint): Path<String>) -> Json<Value> {
        let response = match mint.as_str() {
            "ore" => json!({
                "pairs": [
                    { "priceUsd": "1.50", "volume": { "h24": 10.0 } },
                    { "priceUsd": "2.25", "volume": { "h24": 5000.0 } },
                    { "priceUsd": "1.75", "volume": { "h24": 300.0 } },
                ]
            }),
            "garbled" => json!({
                "pairs": [{ "priceUsd": "n/a", "volume": { "h24": 1.0 } }]
            }),
            _ => json!({ "pairs": null }),
        };
        Json(response)
    }

    #[tokio::test]
    async fn test_price_feed_picks_most_traded_pair() {
        let router = Router::new().route("/latest/dex/tokens/:mint", get(pairs));
        let base_url = serve(router).await;
        let feed = PriceFeed::new(&base_url).unwrap();

        assert_eq!(feed.price_usd("ore").await, 2.25);
        assert_eq!(feed.price_usd("unknown").await, 0.0);
        assert_eq!(feed.price_usd("garbled").await, 0.0);
    }

    #[tokio::test]
    async fn test_price_feed_unreachable_is_unknown() {
        // Bind then drop to get a closed port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let feed = PriceFeed::new(&format!("http://{addr}")).unwrap();
        assert_eq!(feed.price_usd("ore").await, 0.0);
    }
}
