use motherlode_client::PriceFeed;
use std::{
    future::Future,
    time::{Duration, SystemTime},
};
use tracing::debug;

/// Default interval between price refreshes.
pub const DEFAULT_PRICE_REFRESH: Duration = Duration::from_secs(60);

/// USD quotes for assets identified by mint address.
pub trait PriceSource: Clone + Send + Sync + 'static {
    /// USD price of `asset`, or `0.0` when unknown.
    fn price_usd(&self, asset: &str) -> impl Future<Output = f64> + Send;
}

impl PriceSource for PriceFeed {
    async fn price_usd(&self, asset: &str) -> f64 {
        PriceFeed::price_usd(self, asset).await
    }
}

/// Cached ORE and SOL quotes.
#[derive(Clone, Debug)]
pub struct Pricing {
    ore_mint: String,
    sol_mint: String,
    refresh: Duration,

    ore_usd: f64,
    sol_usd: f64,
    last_refresh: Option<SystemTime>,
}

impl Pricing {
    pub fn new(ore_mint: String, sol_mint: String, refresh: Duration) -> Self {
        Self {
            ore_mint,
            sol_mint,
            refresh,
            ore_usd: 0.0,
            sol_usd: 0.0,
            last_refresh: None,
        }
    }

    pub fn ore_usd(&self) -> f64 {
        self.ore_usd
    }

    pub fn sol_usd(&self) -> f64 {
        self.sol_usd
    }

    /// Whether the quotes should be refreshed at `now`. Always true until the ratio is
    /// known.
    pub fn is_due(&self, now: SystemTime) -> bool {
        if self.ratio() <= 0.0 {
            return true;
        }
        match self.last_refresh {
            None => true,
            Some(last) => now
                .duration_since(last)
                .map_or(false, |elapsed| elapsed >= self.refresh),
        }
    }

    /// Refresh both quotes. A zero quote keeps the previous one.
    pub async fn refresh(&mut self, source: &impl PriceSource, now: SystemTime) {
        self.last_refresh = Some(now);
        let ore = source.price_usd(&self.ore_mint).await;
        if ore > 0.0 && ore.is_finite() {
            self.ore_usd = ore;
        }
        let sol = source.price_usd(&self.sol_mint).await;
        if sol > 0.0 && sol.is_finite() {
            self.sol_usd = sol;
        }
        debug!(ore_usd = self.ore_usd, sol_usd = self.sol_usd, "prices refreshed");
    }

    /// ORE priced in SOL, or `0.0` while either quote is unknown.
    pub fn ratio(&self) -> f64 {
        if self.ore_usd > 0.0 && self.sol_usd > 0.0 {
            self.ore_usd / self.sol_usd
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub use mock::MockPrices;


#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn pricing() -> Pricing {
        Pricing::new("ore".into(), "sol".into(), Duration::from_secs(60))
    }

    #[test]
    fn test_ratio_requires_both_quotes() {
        let prices = MockPrices::default();
        let mut pricing = pricing();
        assert_eq!(pricing.ratio(), 0.0);

        prices.set("ore", 500.0);
        block_on(pricing.refresh(&prices, SystemTime::UNIX_EPOCH));
        assert_eq!(pricing.ratio(), 0.0);

        prices.set("sol", 200.0);
        block_on(pricing.refresh(&prices, SystemTime::UNIX_EPOCH));
        assert_eq!(pricing.ratio(), 2.5);
    }

    #[test]
    fn test_failed_quote_keeps_previous() {
        let prices = MockPrices::default();
        prices.set("ore", 500.0);
        prices.set("sol", 200.0);
        let mut pricing = pricing();
        block_on(pricing.refresh(&prices, SystemTime::UNIX_EPOCH));

        prices.set("sol", 0.0);
        prices.set("ore", f64::NAN);
        block_on(pricing.refresh(&prices, SystemTime::UNIX_EPOCH));
        assert_eq!(pricing.ore_usd(), 500.0);
        assert_eq!(pricing.sol_usd(), 200.0);
    }

    #[test]
    fn test_refresh_interval() {
        let prices = MockPrices::default();
        prices.set("ore", 500.0);
        prices.set("sol", 200.0);
        let mut pricing = pricing();
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        assert!(pricing.is_due(start));

        block_on(pricing.refresh(&prices, start));
        assert_eq!(prices.requests(), 2);
        assert!(!pricing.is_due(start + Duration::from_secs(59)));
        assert!(pricing.is_due(start + Duration::from_secs(60)));

        // Clock going backwards does not force a refresh
        assert!(!pricing.is_due(start - Duration::from_secs(5)));
    }

    #[test]
    fn test_unknown_ratio_is_always_due() {
        let prices = MockPrices::default();
        prices.set("ore", 500.0);
        let mut pricing = pricing();
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);

        block_on(pricing.refresh(&prices, start));
        assert!(pricing.is_due(start + Duration::from_secs(1)));

        prices.set("sol", 200.0);
        block_on(pricing.refresh(&prices, start + Duration::from_secs(1)));
        assert_eq!(pricing.ratio(), 2.5);
        assert!(!pricing.is_due(start + Duration::from_secs(2)));
    }
}
