// =============================================================================
// Market data — context types shared by the provider, analyzer, and backtest
// =============================================================================

pub mod analytics;
pub mod provider;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Bar;

pub use provider::MarketDataProvider;

/// Derived indicator values over the context window. Fields are `None` when
/// the window is too short to compute them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TechnicalIndicators {
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub rsi_14: Option<f64>,
    /// Percent distance of the last close from SMA-20.
    pub price_vs_sma20_pct: Option<f64>,
}

/// Direction of the medium-term trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Sideways,
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
            Self::Sideways => write!(f, "sideways"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub trend: TrendDirection,
    /// Normalized strength in [0, 1].
    pub strength: f64,
    /// Percent change between the window's first and last quarter means.
    pub change_pct: f64,
}

/// Support / resistance over the recent window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Levels {
    pub support: f64,
    pub resistance: f64,
    pub distance_to_support_pct: f64,
    pub distance_to_resistance_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeTrend {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeAnalysis {
    pub trend: VolumeTrend,
    /// Latest volume divided by the recent average.
    pub ratio: f64,
    pub avg_volume: f64,
    pub current_volume: f64,
}

/// Short-horizon price structure over the last five bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricePattern {
    StrongUptrend,
    StrongDowntrend,
    BullishConsolidation,
    BearishConsolidation,
    Choppy,
}

/// Everything a cycle needs to know about the market at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContext {
    pub symbol: String,
    pub timeframe: String,
    pub timestamp: DateTime<Utc>,
    pub current_price: f64,
    pub bars: Vec<Bar>,
    pub indicators: TechnicalIndicators,
    pub trend: Option<TrendAnalysis>,
    pub levels: Option<Levels>,
    pub volume: Option<VolumeAnalysis>,
    pub price_action: Option<PricePattern>,
    /// False when the quote or bar history is missing. Downstream stages must
    /// not act on a context without data.
    pub data_available: bool,
}

impl MarketContext {
    /// A sentinel context for when market data could not be obtained.
    pub fn unavailable(symbol: &str, timeframe: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            timestamp: Utc::now(),
            current_price: 0.0,
            bars: Vec::new(),
            indicators: TechnicalIndicators::default(),
            trend: None,
            levels: None,
            volume: None,
            price_action: None,
            data_available: false,
        }
    }

    /// Assemble the derived analytics for a bar window. Used by the live
    /// provider and by the backtest engine (which must not do I/O).
    pub fn from_bars(
        symbol: &str,
        timeframe: &str,
        timestamp: DateTime<Utc>,
        current_price: f64,
        bars: Vec<Bar>,
    ) -> Self {
        let indicators = analytics::compute_indicators(&bars);
        let trend = analytics::analyze_trend(&bars);
        let levels = analytics::support_resistance(&bars);
        let volume = analytics::analyze_volume(&bars);
        let price_action = analytics::price_action(&bars);
        let data_available = current_price > 0.0 && !bars.is_empty();

        Self {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            timestamp,
            current_price,
            bars,
            indicators,
            trend,
            levels,
            volume,
            price_action,
            data_available,
        }
    }
}
