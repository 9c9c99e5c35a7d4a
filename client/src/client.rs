use crate::{
    events::{AccountData, Stream},
    Error, Result,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use motherlode_types::Pubkey;
use reqwest::Client as HttpClient;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tracing::{debug, info};
use url::Url;

/// Timeout for connections and requests
pub(crate) const TIMEOUT: Duration = Duration::from_secs(30);

/// Retry policy for transient HTTP failures.
///
/// Every ledger call is a read, so all requests are eligible for retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request (including the first attempt).
    pub max_attempts: usize,
    /// Initial backoff delay after the first retryable failure.
    pub initial_backoff: Duration,
    /// Maximum backoff delay between attempts.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcContext {
    slot: u64,
}

#[derive(Deserialize)]
struct AccountValue {
    data: (String, String),
}

/// `getAccountInfo` result and `accountNotification` payload.
#[derive(Deserialize)]
pub(crate) struct AccountResult {
    context: RpcContext,
    value: Option<AccountValue>,
}

impl AccountResult {
    pub(crate) fn into_account_data(self) -> Result<Option<AccountData>> {
        let Some(value) = self.value else {
            return Ok(None);
        };
        let (encoded, encoding) = value.data;
        if encoding != "base64" {
            return Err(Error::UnexpectedEncoding(encoding));
        }
        let data = STANDARD.decode(encoded)?;
        Ok(Some(AccountData {
            slot: self.context.slot,
            data,
        }))
    }
}

/// Ledger JSON-RPC client
#[derive(Clone)]
pub struct Client {
    pub rpc_url: Url,
    pub ws_url: Url,
    pub http_client: HttpClient,

    retry_policy: RetryPolicy,
}

impl Client {
    /// Create a new client
    ///
    /// When no WebSocket URL is given it is derived from the RPC URL.
    pub fn new(rpc_url: &str, ws_url: Option<&str>) -> Result<Self> {
        let rpc_url = Url::parse(rpc_url)?;

        // Convert http(s) to ws(s) for WebSocket URL
        let ws_scheme = match rpc_url.scheme() {
            "http" => "ws",
            "https" => "wss",
            scheme => {
                return Err(Error::InvalidScheme(scheme.to_string()));
            }
        };
        let ws_url = match ws_url {
            Some(ws_url) => {
                let ws_url = Url::parse(ws_url)?;
                if !matches!(ws_url.scheme(), "ws" | "wss") {
                    return Err(Error::InvalidScheme(ws_url.scheme().to_string()));
                }
                ws_url
            }
            None => {
                let mut ws_url = rpc_url.clone();
                ws_url
                    .set_scheme(ws_scheme)
                    .map_err(|_| Error::InvalidScheme(ws_scheme.to_string()))?;
                ws_url
            }
        };

        let http_client = HttpClient::builder()
            .timeout(TIMEOUT)
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            rpc_url,
            ws_url,
            http_client,
            retry_policy: RetryPolicy::default(),
        })
    }

    /// Returns a copy of the current retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Returns a new client with the provided retry policy.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    async fn send_with_retry(
        &self,
        make_request: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt = 0usize;
        let mut backoff = self.retry_policy.initial_backoff;
        loop {
            attempt += 1;
            match make_request().send().await {
                Ok(response) => {
                    let status = response.status();
                    if !is_retryable_status(status) || attempt >= max_attempts {
                        return Ok(response);
                    }
                }
                Err(err) => {
                    if attempt >= max_attempts || !is_retryable_error(&err) {
                        return Err(Error::Reqwest(err));
                    }
                }
            }

            if backoff > Duration::ZERO {
                sleep(backoff).await;
                backoff = std::cmp::min(backoff.saturating_mul(2), self.retry_policy.max_backoff);
            }
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &'static str, params: Value) -> Result<T> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        debug!(method, "sending rpc request");
        let response = self
            .send_with_retry(|| self.http_client.post(self.rpc_url.clone()).json(&body))
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::FailedWithBody { status, body });
        }

        let response: RpcResponse<T> = response.json().await?;
        if let Some(error) = response.error {
            return Err(Error::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        response.result.ok_or(Error::UnexpectedResponse)
    }

    /// Current ledger slot.
    pub async fn get_slot(&self) -> Result<u64> {
        self.call("getSlot", json!([{ "commitment": "processed" }]))
            .await
    }

    /// Fetch an account's data, or `None` if it does not exist yet.
    pub async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<AccountData>> {
        let result: AccountResult = self
            .call(
                "getAccountInfo",
                json!([
                    pubkey.to_string(),
                    { "encoding": "base64", "commitment": "confirmed" }
                ]),
            )
            .await?;
        result.into_account_data()
    }

    /// Subscribe to changes of an account.
    ///
    /// The subscription lives as long as the returned stream.
    pub async fn subscribe_account(&self, pubkey: &Pubkey) -> Result<Stream<AccountData>> {
        info!(ws_url = %self.ws_url, %pubkey, "Connecting to account subscription");
        let (ws_stream, _) = timeout(TIMEOUT, connect_async(self.ws_url.as_str()))
            .await
            .map_err(|_| Error::DialTimeout)??;
        info!(%pubkey, "WebSocket connected");

        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "accountSubscribe",
            "params": [
                pubkey.to_string(),
                { "encoding": "base64", "commitment": "confirmed" }
            ],
        });
        Ok(Stream::accounts(ws_stream, request.to_string(), 0))
    }
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    use reqwest::StatusCode;
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}
