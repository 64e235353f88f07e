// =============================================================================
// Paper broker — in-memory simulation used for dry runs and tests
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::error::{MeridianError, Result};
use crate::types::Bar;

use super::{Account, Broker, BrokerPosition, OrderRequest, OrderResult, OrderSide, Quote};

struct Inner {
    cash: f64,
    quotes: HashMap<String, Quote>,
    bars: HashMap<(String, String), Vec<Bar>>,
    positions: HashMap<String, BrokerPosition>,
    submitted_orders: Vec<OrderRequest>,
}

/// A broker that fills every market order instantly at the seeded quote.
pub struct PaperBroker {
    inner: RwLock<Inner>,
}

impl PaperBroker {
    pub fn new(starting_cash: f64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                cash: starting_cash,
                quotes: HashMap::new(),
                bars: HashMap::new(),
                positions: HashMap::new(),
                submitted_orders: Vec::new(),
            }),
        }
    }

    /// Seed the latest quote for a symbol.
    pub fn set_quote(&self, symbol: &str, bid: f64, ask: f64) {
        self.inner.write().quotes.insert(
            symbol.to_string(),
            Quote {
                symbol: symbol.to_string(),
                bid,
                ask,
                timestamp: Utc::now(),
            },
        );
    }

    /// Seed historical bars for a `(symbol, timeframe)` series.
    pub fn set_bars(&self, symbol: &str, timeframe: &str, bars: Vec<Bar>) {
        self.inner
            .write()
            .bars
            .insert((symbol.to_string(), timeframe.to_string()), bars);
    }

    /// Orders submitted so far (oldest first). Test hook.
    pub fn submitted_orders(&self) -> Vec<OrderRequest> {
        self.inner.read().submitted_orders.clone()
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn get_account(&self) -> Result<Account> {
        let inner = self.inner.read();
        let positions_value: f64 = inner.positions.values().map(|p| p.market_value).sum();
        Ok(Account {
            equity: inner.cash + positions_value,
            cash: inner.cash,
            buying_power: inner.cash,
        })
    }

    async fn list_positions(&self) -> Result<Vec<BrokerPosition>> {
        Ok(self.inner.read().positions.values().cloned().collect())
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<BrokerPosition>> {
        Ok(self.inner.read().positions.get(symbol).cloned())
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderResult> {
        let mut inner = self.inner.write();
        let price = inner
            .quotes
            .get(&order.symbol)
            .map(Quote::price)
            .ok_or_else(|| {
                MeridianError::DataGap(format!("no quote seeded for {}", order.symbol))
            })?;

        let cost = order.qty * price;
        match order.side {
            OrderSide::Buy => {
                if cost > inner.cash {
                    return Err(MeridianError::Validation(format!(
                        "insufficient paper cash: need {cost:.2}, have {:.2}",
                        inner.cash
                    )));
                }
                inner.cash -= cost;
                let entry = inner
                    .positions
                    .entry(order.symbol.clone())
                    .or_insert_with(|| BrokerPosition {
                        symbol: order.symbol.clone(),
                        qty: 0.0,
                        avg_entry_price: 0.0,
                        market_value: 0.0,
                        unrealized_pnl: 0.0,
                    });
                let total_cost = entry.avg_entry_price * entry.qty + cost;
                entry.qty += order.qty;
                entry.avg_entry_price = total_cost / entry.qty;
                entry.market_value = entry.qty * price;
            }
            OrderSide::Sell => {
                let held = inner
                    .positions
                    .get(&order.symbol)
                    .map(|p| p.qty)
                    .unwrap_or(0.0);
                if order.qty > held {
                    return Err(MeridianError::Validation(format!(
                        "cannot sell {} {}: only {held} held",
                        order.qty, order.symbol
                    )));
                }
                inner.cash += cost;
                let closed = match inner.positions.get_mut(&order.symbol) {
                    Some(pos) => {
                        pos.qty -= order.qty;
                        pos.market_value = pos.qty * price;
                        pos.qty <= 0.0
                    }
                    None => false,
                };
                if closed {
                    inner.positions.remove(&order.symbol);
                }
            }
        }

        inner.submitted_orders.push(order.clone());
        let id = Uuid::new_v4().to_string();
        info!(
            order_id = %id,
            symbol = %order.symbol,
            side = %order.side,
            qty = order.qty,
            price,
            "paper fill"
        );
        Ok(OrderResult {
            id,
            status: "filled".to_string(),
            filled_avg_price: Some(price),
        })
    }

    async fn cancel_order(&self, _order_id: &str) -> Result<()> {
        Ok(())
    }

    async fn close_position(&self, symbol: &str) -> Result<OrderResult> {
        let qty = self
            .inner
            .read()
            .positions
            .get(symbol)
            .map(|p| p.qty)
            .unwrap_or(0.0);
        if qty <= 0.0 {
            return Err(MeridianError::Validation(format!(
                "no open paper position for {symbol}"
            )));
        }
        self.submit_order(&OrderRequest {
            symbol: symbol.to_string(),
            qty,
            side: OrderSide::Sell,
            stop_loss: None,
        })
        .await
    }

    async fn get_latest_quote(&self, symbol: &str) -> Result<Option<Quote>> {
        Ok(self.inner.read().quotes.get(symbol).cloned())
    }

    async fn get_bars(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Bar>> {
        let inner = self.inner.read();
        let bars = inner
            .bars
            .get(&(symbol.to_string(), timeframe.to_string()))
            .cloned()
            .unwrap_or_default();
        let start = bars.len().saturating_sub(limit);
        Ok(bars[start..].to_vec())
    }
}
