use crate::{client::TIMEOUT, Error, Result};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

/// Default price feed endpoint.
pub const DEFAULT_PRICE_FEED_URL: &str = "https://api.dexscreener.com/";

#[derive(Deserialize)]
struct PairsResponse {
    #[serde(default)]
    pairs: Option<Vec<Pair>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pair {
    price_usd: Option<String>,
    #[serde(default)]
    volume: Volume,
}

#[derive(Default, Deserialize)]
struct Volume {
    #[serde(default)]
    h24: f64,
}

/// USD quotes from the DEX pair aggregator.
#[derive(Clone)]
pub struct PriceFeed {
    base_url: Url,
    http_client: HttpClient,
}

impl PriceFeed {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(Error::InvalidScheme(base_url.scheme().to_string()));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http_client = HttpClient::builder().timeout(TIMEOUT).build()?;
        Ok(Self {
            base_url,
            http_client,
        })
    }

    /// USD price of `asset` from its most traded pair.
    ///
    /// Returns `0.0` when the price is unknown.
    pub async fn price_usd(&self, asset: &str) -> f64 {
        match self.fetch(asset).await {
            Ok(Some(price)) => price,
            Ok(None) => {
                debug!(asset, "no priced pair");
                0.0
            }
            Err(e) => {
                warn!(asset, error = %e, "failed to fetch price");
                0.0
            }
        }
    }

    async fn fetch(&self, asset: &str) -> Result<Option<f64>> {
        let url = self
            .base_url
            .join(&format!("latest/dex/tokens/{asset}"))?;
        let response = self.http_client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Failed(response.status()));
        }
        let response: PairsResponse = response.json().await?;
        let best = response
            .pairs
            .unwrap_or_default()
            .into_iter()
            .max_by(|a, b| a.volume.h24.total_cmp(&b.volume.h24));
        Ok(best
            .and_then(|pair| pair.price_usd)
            .and_then(|price| price.parse::<f64>().ok())
            .filter(|price| price.is_finite() && *price > 0.0))
    }
}
