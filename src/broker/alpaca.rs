// =============================================================================
// Alpaca REST broker — key-header authenticated trading + market data client
// =============================================================================
//
// SECURITY: the secret key is sent only as a request header and is never
// logged or serialized. Stock and crypto symbols route to different data
// endpoints; crypto pairs keep their slash form (`BTC/USD`) in query params.
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{MeridianError, Result};
use crate::types::{is_crypto_symbol, Bar};

use super::{Account, Broker, BrokerPosition, OrderRequest, OrderResult, OrderSide, Quote};

/// Default per-request timeout (seconds). Kept below the per-stage timeout so
/// a hung request cannot stall a cycle.
const HTTP_TIMEOUT_SECS: u64 = 30;

pub struct AlpacaBroker {
    trading_url: String,
    data_url: String,
    client: reqwest::Client,
}

impl AlpacaBroker {
    /// Build a broker client from credentials. `paper` selects the
    /// paper-trading endpoint.
    pub fn new(api_key: &str, api_secret: &str, paper: bool) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "APCA-API-KEY-ID",
            HeaderValue::from_str(api_key)
                .map_err(|_| MeridianError::Config("invalid broker API key".into()))?,
        );
        headers.insert(
            "APCA-API-SECRET-KEY",
            HeaderValue::from_str(api_secret)
                .map_err(|_| MeridianError::Config("invalid broker API secret".into()))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| MeridianError::Config(format!("failed to build HTTP client: {e}")))?;

        let trading_url = if paper {
            "https://paper-api.alpaca.markets".to_string()
        } else {
            "https://api.alpaca.markets".to_string()
        };

        debug!(trading_url = %trading_url, "AlpacaBroker initialised");
        Ok(Self {
            trading_url,
            data_url: "https://data.alpaca.markets".to_string(),
            client,
        })
    }

    /// Build from `ALPACA_API_KEY` / `ALPACA_SECRET_KEY` env vars. Missing
    /// credentials are a config error; callers that can degrade should use
    /// the paper broker instead.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("ALPACA_API_KEY")
            .map_err(|_| MeridianError::Config("ALPACA_API_KEY not set".into()))?;
        let secret = std::env::var("ALPACA_SECRET_KEY")
            .map_err(|_| MeridianError::Config("ALPACA_SECRET_KEY not set".into()))?;
        let paper = std::env::var("ALPACA_PAPER")
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(true);
        Self::new(&key, &secret, paper)
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await?;
        if !status.is_success() {
            return Err(MeridianError::TransientIo(format!(
                "broker GET {url} returned {status}: {body}"
            )));
        }
        Ok(body)
    }

    /// Map the platform's timeframe strings onto the data API's.
    fn map_timeframe(timeframe: &str) -> &'static str {
        match timeframe {
            "1m" => "1Min",
            "5m" => "5Min",
            "15m" => "15Min",
            "1h" => "1Hour",
            "4h" => "4Hour",
            _ => "1Day",
        }
    }

    fn parse_bar(symbol: &str, timeframe: &str, v: &serde_json::Value) -> Option<Bar> {
        let timestamp = v["t"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))?;
        Some(Bar {
            symbol: symbol.to_string(),
            timestamp,
            timeframe: timeframe.to_string(),
            open: v["o"].as_f64()?,
            high: v["h"].as_f64()?,
            low: v["l"].as_f64()?,
            close: v["c"].as_f64()?,
            volume: v["v"].as_f64().unwrap_or(0.0).max(0.0) as u64,
            vwap: v["vw"].as_f64(),
            trade_count: v["n"].as_u64(),
        })
    }
}

#[async_trait]
impl Broker for AlpacaBroker {
    #[instrument(skip(self), name = "alpaca::get_account")]
    async fn get_account(&self) -> Result<Account> {
        let body = self
            .get_json(&format!("{}/v2/account", self.trading_url))
            .await?;
        let field = |name: &str| -> f64 {
            body[name]
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0)
        };
        Ok(Account {
            equity: field("equity"),
            cash: field("cash"),
            buying_power: field("buying_power"),
        })
    }

    #[instrument(skip(self), name = "alpaca::list_positions")]
    async fn list_positions(&self) -> Result<Vec<BrokerPosition>> {
        let body = self
            .get_json(&format!("{}/v2/positions", self.trading_url))
            .await?;
        let arr = body.as_array().cloned().unwrap_or_default();
        Ok(arr.iter().filter_map(parse_position).collect())
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<BrokerPosition>> {
        let url = format!("{}/v2/positions/{}", self.trading_url, symbol);
        let resp = self.client.get(&url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        let body: serde_json::Value = resp.json().await?;
        if !status.is_success() {
            return Err(MeridianError::TransientIo(format!(
                "broker GET {url} returned {status}: {body}"
            )));
        }
        Ok(parse_position(&body))
    }

    #[instrument(skip(self, order), fields(symbol = %order.symbol, side = %order.side), name = "alpaca::submit_order")]
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderResult> {
        let mut payload = serde_json::json!({
            "symbol": order.symbol,
            "qty": format!("{}", order.qty),
            "side": order.side.to_string(),
            "type": "market",
            "time_in_force": "day",
            "client_order_id": Uuid::new_v4().to_string(),
        });

        // Attach a stop-loss child order to buys.
        if order.side == OrderSide::Buy {
            if let Some(stop) = order.stop_loss {
                payload["order_class"] = serde_json::json!("oto");
                payload["stop_loss"] =
                    serde_json::json!({ "stop_price": format!("{stop:.2}") });
            }
        }

        let url = format!("{}/v2/orders", self.trading_url);
        let resp = self.client.post(&url).json(&payload).send().await?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await?;
        if !status.is_success() {
            warn!(status = %status, body = %body, "order rejected by broker");
            return Err(MeridianError::TransientIo(format!(
                "order submission returned {status}: {body}"
            )));
        }

        Ok(OrderResult {
            id: body["id"].as_str().unwrap_or_default().to_string(),
            status: body["status"].as_str().unwrap_or("unknown").to_string(),
            filled_avg_price: body["filled_avg_price"]
                .as_str()
                .and_then(|s| s.parse().ok()),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let url = format!("{}/v2/orders/{}", self.trading_url, order_id);
        let resp = self.client.delete(&url).send().await?;
        if !resp.status().is_success() {
            return Err(MeridianError::TransientIo(format!(
                "cancel order {order_id} returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn close_position(&self, symbol: &str) -> Result<OrderResult> {
        let url = format!("{}/v2/positions/{}", self.trading_url, symbol);
        let resp = self.client.delete(&url).send().await?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await?;
        if !status.is_success() {
            return Err(MeridianError::TransientIo(format!(
                "close position {symbol} returned {status}: {body}"
            )));
        }
        Ok(OrderResult {
            id: body["id"].as_str().unwrap_or_default().to_string(),
            status: body["status"].as_str().unwrap_or("unknown").to_string(),
            filled_avg_price: None,
        })
    }

    #[instrument(skip(self), name = "alpaca::get_latest_quote")]
    async fn get_latest_quote(&self, symbol: &str) -> Result<Option<Quote>> {
        let body = if is_crypto_symbol(symbol) {
            let url = format!(
                "{}/v1beta3/crypto/us/latest/quotes?symbols={}",
                self.data_url, symbol
            );
            let body = self.get_json(&url).await?;
            body["quotes"][symbol].clone()
        } else {
            let url = format!("{}/v2/stocks/{}/quotes/latest", self.data_url, symbol);
            let body = self.get_json(&url).await?;
            body["quote"].clone()
        };

        if body.is_null() {
            return Ok(None);
        }

        let bid = body["bp"].as_f64().unwrap_or(0.0);
        let ask = body["ap"].as_f64().unwrap_or(0.0);
        if bid <= 0.0 && ask <= 0.0 {
            return Ok(None);
        }
        let timestamp = body["t"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(Some(Quote {
            symbol: symbol.to_string(),
            bid,
            ask,
            timestamp,
        }))
    }

    #[instrument(skip(self), name = "alpaca::get_bars")]
    async fn get_bars(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Bar>> {
        let tf = Self::map_timeframe(timeframe);
        let body = if is_crypto_symbol(symbol) {
            let url = format!(
                "{}/v1beta3/crypto/us/bars?symbols={}&timeframe={}&limit={}",
                self.data_url, symbol, tf, limit
            );
            let body = self.get_json(&url).await?;
            body["bars"][symbol].clone()
        } else {
            let url = format!(
                "{}/v2/stocks/{}/bars?timeframe={}&limit={}&adjustment=raw",
                self.data_url, symbol, tf, limit
            );
            let body = self.get_json(&url).await?;
            body["bars"].clone()
        };

        let arr = body.as_array().cloned().unwrap_or_default();
        let mut bars: Vec<Bar> = arr
            .iter()
            .filter_map(|v| Self::parse_bar(symbol, timeframe, v))
            .collect();
        bars.sort_by_key(|b| b.timestamp);
        debug!(symbol, count = bars.len(), "bars fetched from broker");
        Ok(bars)
    }
}

fn parse_position(v: &serde_json::Value) -> Option<BrokerPosition> {
    let num = |name: &str| -> f64 {
        v[name]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0)
    };
    Some(BrokerPosition {
        symbol: v["symbol"].as_str()?.to_string(),
        qty: num("qty"),
        avg_entry_price: num("avg_entry_price"),
        market_value: num("market_value"),
        unrealized_pnl: num("unrealized_pl"),
    })
}
