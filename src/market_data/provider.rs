// =============================================================================
// Market data provider — store-first bar sourcing with broker fallback
// =============================================================================
//
// Bars come from the store when it covers at least half the requested
// lookback; otherwise they are fetched from the broker and upserted back
// before use, so every fetch enriches the durable history.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::broker::{with_retries, Broker};
use crate::error::Result;
use crate::store::Store;

use super::MarketContext;

/// Broker calls inside a cycle retry at most twice.
const BROKER_ATTEMPTS: u32 = 2;

pub struct MarketDataProvider {
    store: Arc<Store>,
    broker: Arc<dyn Broker>,
}

impl MarketDataProvider {
    pub fn new(store: Arc<Store>, broker: Arc<dyn Broker>) -> Self {
        Self { store, broker }
    }

    /// Assemble the full market context for one symbol: current quote, a
    /// lookback window of bars, and all derived analytics.
    ///
    /// A missing quote produces a context with `current_price = 0` and
    /// `data_available = false`; downstream stages must not act on it.
    pub async fn get_market_context(
        &self,
        symbol: &str,
        timeframe: &str,
        lookback: usize,
    ) -> Result<MarketContext> {
        let bars = self.load_bars(symbol, timeframe, lookback).await?;

        let quote = with_retries("get_latest_quote", BROKER_ATTEMPTS, || {
            self.broker.get_latest_quote(symbol)
        })
        .await
        .unwrap_or_else(|e| {
            warn!(symbol, error = %e, "quote fetch failed");
            None
        });

        let current_price = match &quote {
            Some(q) => q.price(),
            None => {
                warn!(symbol, "no quote available — context flagged unusable");
                0.0
            }
        };

        let mut context =
            MarketContext::from_bars(symbol, timeframe, Utc::now(), current_price, bars);
        if quote.is_none() {
            context.data_available = false;
        }
        Ok(context)
    }

    /// Prefer persisted bars; fall back to the broker when coverage is below
    /// half the lookback, upserting whatever was fetched.
    async fn load_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        lookback: usize,
    ) -> Result<Vec<crate::types::Bar>> {
        let stored = self.store.latest_bars(symbol, timeframe, lookback)?;
        if stored.len() >= lookback / 2 && !stored.is_empty() {
            return Ok(stored);
        }

        info!(
            symbol,
            timeframe,
            stored = stored.len(),
            lookback,
            "insufficient stored bars — fetching from broker"
        );

        let fetched = with_retries("get_bars", BROKER_ATTEMPTS, || {
            self.broker.get_bars(symbol, timeframe, lookback)
        })
        .await
        .unwrap_or_else(|e| {
            warn!(symbol, error = %e, "broker bar fetch failed");
            Vec::new()
        });

        if fetched.is_empty() {
            // Whatever the store had is still better than nothing.
            return Ok(stored);
        }

        self.store.upsert_bars(&fetched)?;
        Ok(fetched)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;
    use crate::types::Bar;
    use chrono::{Duration, TimeZone};

    fn seed_bars(count: usize, start_close: f64) -> Vec<Bar> {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                let close = start_close + i as f64 * 0.1;
                Bar {
                    symbol: "TSLA".into(),
                    timestamp: t0 + Duration::minutes(15 * i as i64),
                    timeframe: "15m".into(),
                    open: close,
                    high: close + 0.5,
                    low: close - 0.5,
                    close,
                    volume: 1_000,
                    vwap: None,
                    trade_count: None,
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn uses_store_when_coverage_sufficient() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.upsert_bars(&seed_bars(60, 100.0)).unwrap();

        // Broker has no bars; the provider must not need them.
        let broker = Arc::new(PaperBroker::new(0.0));
        broker.set_quote("TSLA", 105.0, 106.0);

        let provider = MarketDataProvider::new(store, broker);
        let ctx = provider.get_market_context("TSLA", "15m", 100).await.unwrap();

        assert!(ctx.data_available);
        assert_eq!(ctx.bars.len(), 60);
        assert!((ctx.current_price - 106.0).abs() < 1e-9);
        assert!(ctx.indicators.sma_20.is_some());
    }

    #[tokio::test]
    async fn falls_back_to_broker_and_persists() {
        let store = Arc::new(Store::open_in_memory().unwrap());

        let broker = Arc::new(PaperBroker::new(0.0));
        broker.set_quote("TSLA", 105.0, 106.0);
        broker.set_bars("TSLA", "15m", seed_bars(60, 100.0));

        let provider = MarketDataProvider::new(store.clone(), broker);
        let ctx = provider.get_market_context("TSLA", "15m", 100).await.unwrap();

        assert_eq!(ctx.bars.len(), 60);
        // Fetched bars were upserted back into the store.
        let persisted = store.latest_bars("TSLA", "15m", 100).unwrap();
        assert_eq!(persisted.len(), 60);
    }

    #[tokio::test]
    async fn missing_quote_flags_context_unusable() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.upsert_bars(&seed_bars(60, 100.0)).unwrap();

        let broker = Arc::new(PaperBroker::new(0.0)); // no quote seeded
        let provider = MarketDataProvider::new(store, broker);
        let ctx = provider.get_market_context("TSLA", "15m", 100).await.unwrap();

        assert!(!ctx.data_available);
        assert_eq!(ctx.current_price, 0.0);
    }

    #[tokio::test]
    async fn no_bars_anywhere_yields_empty_context() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let broker = Arc::new(PaperBroker::new(0.0));
        broker.set_quote("TSLA", 105.0, 106.0);

        let provider = MarketDataProvider::new(store, broker);
        let ctx = provider.get_market_context("TSLA", "15m", 100).await.unwrap();

        assert!(ctx.bars.is_empty());
        assert!(!ctx.data_available);
    }
}
