// =============================================================================
// Broker abstraction — order routing and market data access
// =============================================================================
//
// The trading core only ever talks to `dyn Broker`. The live implementation
// (`alpaca`) wraps the brokerage REST API; `paper` is a fully in-memory
// stand-in used for dry runs and tests.
// =============================================================================

pub mod alpaca;
pub mod paper;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MeridianError, Result};
use crate::types::Bar;

pub use alpaca::AlpacaBroker;
pub use paper::PaperBroker;

/// Latest quote for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Tradable reference price: ask, falling back to bid.
    pub fn price(&self) -> f64 {
        if self.ask > 0.0 {
            self.ask
        } else {
            self.bid
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// A market order request. All orders the platform submits are market orders
/// with `time_in_force = day`; buys may attach a stop-loss child order.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub qty: f64,
    pub side: OrderSide,
    pub stop_loss: Option<f64>,
}

/// Broker acknowledgement of a submitted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub id: String,
    pub status: String,
    pub filled_avg_price: Option<f64>,
}

/// An open position as reported by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: f64,
    pub avg_entry_price: f64,
    pub market_value: f64,
    pub unrealized_pnl: f64,
}

/// Account summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub equity: f64,
    pub cash: f64,
    pub buying_power: f64,
}

/// The brokerage surface the core consumes.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn get_account(&self) -> Result<Account>;

    async fn list_positions(&self) -> Result<Vec<BrokerPosition>>;

    async fn get_position(&self, symbol: &str) -> Result<Option<BrokerPosition>>;

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderResult>;

    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    async fn close_position(&self, symbol: &str) -> Result<OrderResult>;

    /// Latest quote. `Ok(None)` is a data gap, not an error.
    async fn get_latest_quote(&self, symbol: &str) -> Result<Option<Quote>>;

    /// Most recent `limit` bars, oldest first.
    async fn get_bars(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Bar>>;
}

/// Retry an async operation on transient errors with capped exponential
/// backoff. Non-transient errors abort immediately.
pub async fn with_retries<T, F, Fut>(label: &str, attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay_ms: u64 = 500;
    let mut last_err = MeridianError::TransientIo(format!("{label}: no attempts made"));

    for attempt in 1..=attempts {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(label, attempt, error = %e, "transient error — retrying");
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(5_000);
                last_err = e;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_retries("test", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(MeridianError::TransientIo("flaky".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_error_aborts_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_retries("test", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(MeridianError::Validation("nope".into())) }
        })
        .await;
        assert!(matches!(result, Err(MeridianError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let result: Result<u32> = with_retries("test", 2, || async {
            Err(MeridianError::TransientIo("down".into()))
        })
        .await;
        assert!(matches!(result, Err(MeridianError::TransientIo(_))));
    }

    #[test]
    fn quote_price_prefers_ask() {
        let q = Quote {
            symbol: "TSLA".into(),
            bid: 99.0,
            ask: 100.0,
            timestamp: Utc::now(),
        };
        assert_eq!(q.price(), 100.0);

        let no_ask = Quote { ask: 0.0, ..q };
        assert_eq!(no_ask.price(), 99.0);
    }
}
