// =============================================================================
// Shared types used across the Meridian trading platform
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The action a decision resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

/// Direction of a technical signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Bullish,
    Bearish,
    Neutral,
}

impl SignalKind {
    /// Numeric score used when combining with sentiment: +1 / -1 / 0.
    pub fn score(self) -> f64 {
        match self {
            Self::Bullish => 1.0,
            Self::Bearish => -1.0,
            Self::Neutral => 0.0,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// Categorical sentiment label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

/// Score-to-label thresholds shared by every sentiment source.
pub const SENTIMENT_POSITIVE_THRESHOLD: f64 = 0.05;
pub const SENTIMENT_NEGATIVE_THRESHOLD: f64 = -0.05;

impl SentimentLabel {
    /// Classify a score in [-1, 1] with the shared ±0.05 thresholds.
    pub fn from_score(score: f64) -> Self {
        if score >= SENTIMENT_POSITIVE_THRESHOLD {
            Self::Positive
        } else if score <= SENTIMENT_NEGATIVE_THRESHOLD {
            Self::Negative
        } else {
            Self::Neutral
        }
    }
}

impl std::fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Positive => write!(f, "positive"),
            Self::Negative => write!(f, "negative"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// One OHLCV sample, keyed by `(symbol, timestamp, timeframe)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub timeframe: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    #[serde(default)]
    pub vwap: Option<f64>,
    #[serde(default)]
    pub trade_count: Option<u64>,
}

impl Bar {
    /// Check the OHLC invariant: `low <= open,close <= high`.
    pub fn is_well_formed(&self) -> bool {
        self.low <= self.open.min(self.close)
            && self.open.max(self.close) <= self.high
            && self.low <= self.high
    }
}

/// Crypto pairs are written with a slash (`BTC/USD`); equities are plain
/// tickers. Fractional quantities are only allowed for crypto.
pub fn is_crypto_symbol(symbol: &str) -> bool {
    symbol.contains('/')
}
