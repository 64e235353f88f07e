// =============================================================================
// Technical analyzer — indicators in, tagged signals out
// =============================================================================
//
// Each indicator family contributes one signal with its own confidence. The
// overall call is a weighted vote: confidences accumulate per direction and
// the heaviest bucket wins, with ties breaking toward neutral.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::market_data::{MarketContext, PricePattern, TrendDirection, VolumeTrend};
use crate::types::SignalKind;

/// One indicator's contribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalSignal {
    pub indicator: String,
    pub signal: SignalKind,
    pub confidence: f64,
    pub value: Option<f64>,
    pub reasoning: String,
}

/// Full technical read for one context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalAnalysis {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub signals: Vec<TechnicalSignal>,
    pub overall_signal: SignalKind,
    pub overall_confidence: f64,
    pub computation_time_ms: f64,
}

pub struct TechnicalAnalyzer;

impl TechnicalAnalyzer {
    /// Analyze a market context and synthesize the overall signal.
    pub fn analyze(context: &MarketContext) -> TechnicalAnalysis {
        let start = std::time::Instant::now();
        let mut signals = Vec::new();

        if let Some(rsi) = context.indicators.rsi_14 {
            signals.push(Self::rsi_signal(rsi));
        }
        if let Some(pct) = context.indicators.price_vs_sma20_pct {
            signals.push(Self::sma_signal(pct, context.indicators.sma_20));
        }
        if let Some(trend) = &context.trend {
            signals.push(Self::trend_signal(trend.trend, trend.strength, trend.change_pct));
        }
        if let Some(levels) = &context.levels {
            if context.current_price > 0.0 {
                signals.push(Self::levels_signal(
                    levels.distance_to_support_pct,
                    levels.distance_to_resistance_pct,
                    context.current_price,
                ));
            }
        }
        if let Some(volume) = &context.volume {
            signals.push(Self::volume_signal(volume.trend, volume.ratio));
        }
        if let Some(pattern) = context.price_action {
            signals.push(Self::price_action_signal(pattern));
        }

        let (overall_signal, overall_confidence) = Self::synthesize(&signals);
        let computation_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        info!(
            symbol = %context.symbol,
            signal = %overall_signal,
            confidence = overall_confidence,
            indicators = signals.len(),
            elapsed_ms = computation_time_ms,
            "technical analysis complete"
        );

        TechnicalAnalysis {
            symbol: context.symbol.clone(),
            timestamp: context.timestamp,
            signals,
            overall_signal,
            overall_confidence,
            computation_time_ms,
        }
    }

    // -------------------------------------------------------------------------
    // Per-indicator rules
    // -------------------------------------------------------------------------

    fn rsi_signal(rsi: f64) -> TechnicalSignal {
        if rsi < 30.0 {
            TechnicalSignal {
                indicator: "rsi".into(),
                signal: SignalKind::Bullish,
                confidence: ((30.0 - rsi) / 10.0).min(1.0),
                value: Some(rsi),
                reasoning: format!("RSI at {rsi:.1} suggests oversold conditions"),
            }
        } else if rsi > 70.0 {
            TechnicalSignal {
                indicator: "rsi".into(),
                signal: SignalKind::Bearish,
                confidence: ((rsi - 70.0) / 10.0).min(1.0),
                value: Some(rsi),
                reasoning: format!("RSI at {rsi:.1} suggests overbought conditions"),
            }
        } else {
            TechnicalSignal {
                indicator: "rsi".into(),
                signal: SignalKind::Neutral,
                confidence: (1.0 - (rsi - 50.0).abs() / 20.0).max(0.0),
                value: Some(rsi),
                reasoning: format!("RSI at {rsi:.1} is in neutral zone"),
            }
        }
    }

    fn sma_signal(price_vs_sma_pct: f64, sma_value: Option<f64>) -> TechnicalSignal {
        if price_vs_sma_pct > 2.0 {
            TechnicalSignal {
                indicator: "sma_20".into(),
                signal: SignalKind::Bullish,
                confidence: (price_vs_sma_pct.abs() / 5.0).min(1.0),
                value: sma_value,
                reasoning: format!(
                    "Price {price_vs_sma_pct:.1}% above 20-period SMA (bullish momentum)"
                ),
            }
        } else if price_vs_sma_pct < -2.0 {
            TechnicalSignal {
                indicator: "sma_20".into(),
                signal: SignalKind::Bearish,
                confidence: (price_vs_sma_pct.abs() / 5.0).min(1.0),
                value: sma_value,
                reasoning: format!(
                    "Price {price_vs_sma_pct:.1}% below 20-period SMA (bearish momentum)"
                ),
            }
        } else {
            TechnicalSignal {
                indicator: "sma_20".into(),
                signal: SignalKind::Neutral,
                confidence: 0.5,
                value: sma_value,
                reasoning: format!("Price near 20-period SMA ({price_vs_sma_pct:+.1}%)"),
            }
        }
    }

    fn trend_signal(direction: TrendDirection, strength: f64, change_pct: f64) -> TechnicalSignal {
        let (signal, confidence, reasoning) = match direction {
            TrendDirection::Bullish => (
                SignalKind::Bullish,
                strength,
                format!("Bullish trend with {change_pct:+.1}% change (strength: {strength:.2})"),
            ),
            TrendDirection::Bearish => (
                SignalKind::Bearish,
                strength,
                format!("Bearish trend with {change_pct:+.1}% change (strength: {strength:.2})"),
            ),
            TrendDirection::Sideways => (
                SignalKind::Neutral,
                0.5,
                "Sideways trend with no clear direction".to_string(),
            ),
        };
        TechnicalSignal {
            indicator: "trend".into(),
            signal,
            confidence,
            value: Some(change_pct),
            reasoning,
        }
    }

    fn levels_signal(
        dist_to_support_pct: f64,
        dist_to_resistance_pct: f64,
        current_price: f64,
    ) -> TechnicalSignal {
        if dist_to_support_pct < 2.0 {
            TechnicalSignal {
                indicator: "support_resistance".into(),
                signal: SignalKind::Bullish,
                confidence: (1.0 - dist_to_support_pct / 2.0).max(0.6),
                value: Some(current_price),
                reasoning: format!(
                    "Price near support ({dist_to_support_pct:.1}% above) - potential bounce"
                ),
            }
        } else if dist_to_resistance_pct < 2.0 {
            TechnicalSignal {
                indicator: "support_resistance".into(),
                signal: SignalKind::Bearish,
                confidence: (1.0 - dist_to_resistance_pct / 2.0).max(0.6),
                value: Some(current_price),
                reasoning: format!(
                    "Price near resistance ({dist_to_resistance_pct:.1}% below) - potential rejection"
                ),
            }
        } else {
            TechnicalSignal {
                indicator: "support_resistance".into(),
                signal: SignalKind::Neutral,
                confidence: 0.4,
                value: Some(current_price),
                reasoning: "Price in mid-range between support and resistance".to_string(),
            }
        }
    }

    /// Volume is directionless; it only modulates conviction.
    fn volume_signal(trend: VolumeTrend, ratio: f64) -> TechnicalSignal {
        let (confidence, reasoning) = match trend {
            VolumeTrend::High => (
                0.7,
                format!("High volume ({ratio:.1}x average) - strong participation"),
            ),
            VolumeTrend::Low => (
                0.3,
                format!("Low volume ({ratio:.1}x average) - weak conviction"),
            ),
            VolumeTrend::Normal => (0.5, "Normal volume levels".to_string()),
        };
        TechnicalSignal {
            indicator: "volume".into(),
            signal: SignalKind::Neutral,
            confidence,
            value: Some(ratio),
            reasoning,
        }
    }

    fn price_action_signal(pattern: PricePattern) -> TechnicalSignal {
        let (signal, confidence, reasoning) = match pattern {
            PricePattern::StrongUptrend => (
                SignalKind::Bullish,
                0.85,
                "Strong uptrend (higher highs and lows)",
            ),
            PricePattern::StrongDowntrend => (
                SignalKind::Bearish,
                0.85,
                "Strong downtrend (lower highs and lows)",
            ),
            PricePattern::BullishConsolidation => {
                (SignalKind::Bullish, 0.65, "Bullish consolidation (higher lows)")
            }
            PricePattern::BearishConsolidation => {
                (SignalKind::Bearish, 0.65, "Bearish consolidation (lower highs)")
            }
            PricePattern::Choppy => {
                (SignalKind::Neutral, 0.3, "Choppy price action - no clear pattern")
            }
        };
        TechnicalSignal {
            indicator: "price_action".into(),
            signal,
            confidence,
            value: None,
            reasoning: reasoning.to_string(),
        }
    }

    // -------------------------------------------------------------------------
    // Synthesis
    // -------------------------------------------------------------------------

    /// Weighted vote: sum confidences per direction, winner takes the call.
    /// Ties break toward neutral; no signals means neutral at zero.
    fn synthesize(signals: &[TechnicalSignal]) -> (SignalKind, f64) {
        if signals.is_empty() {
            return (SignalKind::Neutral, 0.0);
        }

        let mut bullish = 0.0;
        let mut bearish = 0.0;
        let mut neutral = 0.0;
        for signal in signals {
            match signal.signal {
                SignalKind::Bullish => bullish += signal.confidence,
                SignalKind::Bearish => bearish += signal.confidence,
                SignalKind::Neutral => neutral += signal.confidence,
            }
        }

        let total = bullish + bearish + neutral;
        if total == 0.0 {
            return (SignalKind::Neutral, 0.0);
        }

        if bullish > bearish && bullish > neutral {
            (SignalKind::Bullish, bullish / total)
        } else if bearish > bullish && bearish > neutral {
            (SignalKind::Bearish, bearish / total)
        } else {
            (SignalKind::Neutral, neutral / total)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::MarketContext;

    fn signal(kind: SignalKind, confidence: f64) -> TechnicalSignal {
        TechnicalSignal {
            indicator: "test".into(),
            signal: kind,
            confidence,
            value: None,
            reasoning: String::new(),
        }
    }

    // ---- per-indicator rules ---------------------------------------------

    #[test]
    fn rsi_oversold_is_bullish() {
        let s = TechnicalAnalyzer::rsi_signal(25.0);
        assert_eq!(s.signal, SignalKind::Bullish);
        assert!((s.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn rsi_deep_oversold_caps_confidence() {
        let s = TechnicalAnalyzer::rsi_signal(10.0);
        assert_eq!(s.signal, SignalKind::Bullish);
        assert_eq!(s.confidence, 1.0);
    }

    #[test]
    fn rsi_overbought_is_bearish() {
        let s = TechnicalAnalyzer::rsi_signal(78.0);
        assert_eq!(s.signal, SignalKind::Bearish);
        assert!((s.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn rsi_midrange_is_neutral_peaking_at_fifty() {
        let s = TechnicalAnalyzer::rsi_signal(50.0);
        assert_eq!(s.signal, SignalKind::Neutral);
        assert_eq!(s.confidence, 1.0);

        let s = TechnicalAnalyzer::rsi_signal(65.0);
        assert_eq!(s.signal, SignalKind::Neutral);
        assert!((s.confidence - 0.25).abs() < 1e-9);
    }

    #[test]
    fn sma_position_thresholds() {
        assert_eq!(
            TechnicalAnalyzer::sma_signal(3.0, Some(100.0)).signal,
            SignalKind::Bullish
        );
        assert_eq!(
            TechnicalAnalyzer::sma_signal(-3.0, Some(100.0)).signal,
            SignalKind::Bearish
        );
        assert_eq!(
            TechnicalAnalyzer::sma_signal(1.5, Some(100.0)).signal,
            SignalKind::Neutral
        );
    }

    #[test]
    fn levels_bounce_and_rejection() {
        let near_support = TechnicalAnalyzer::levels_signal(1.0, 10.0, 100.0);
        assert_eq!(near_support.signal, SignalKind::Bullish);
        assert!(near_support.confidence >= 0.6);

        let near_resistance = TechnicalAnalyzer::levels_signal(10.0, 0.5, 100.0);
        assert_eq!(near_resistance.signal, SignalKind::Bearish);
        assert!((near_resistance.confidence - 0.75).abs() < 1e-9);

        let mid_range = TechnicalAnalyzer::levels_signal(10.0, 10.0, 100.0);
        assert_eq!(mid_range.signal, SignalKind::Neutral);
        assert!((mid_range.confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn volume_is_always_neutral() {
        let high = TechnicalAnalyzer::volume_signal(VolumeTrend::High, 2.0);
        assert_eq!(high.signal, SignalKind::Neutral);
        assert!((high.confidence - 0.7).abs() < 1e-9);

        let low = TechnicalAnalyzer::volume_signal(VolumeTrend::Low, 0.3);
        assert!((low.confidence - 0.3).abs() < 1e-9);
    }

    #[test]
    fn price_action_table() {
        let s = TechnicalAnalyzer::price_action_signal(PricePattern::StrongUptrend);
        assert_eq!(s.signal, SignalKind::Bullish);
        assert!((s.confidence - 0.85).abs() < 1e-9);

        let s = TechnicalAnalyzer::price_action_signal(PricePattern::Choppy);
        assert_eq!(s.signal, SignalKind::Neutral);
        assert!((s.confidence - 0.3).abs() < 1e-9);
    }

    // ---- synthesis -------------------------------------------------------

    #[test]
    fn empty_signals_synthesize_neutral_zero() {
        let (kind, confidence) = TechnicalAnalyzer::synthesize(&[]);
        assert_eq!(kind, SignalKind::Neutral);
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn weighted_vote_picks_heaviest_bucket() {
        let signals = vec![
            signal(SignalKind::Bullish, 0.8),
            signal(SignalKind::Bullish, 0.6),
            signal(SignalKind::Bearish, 0.5),
            signal(SignalKind::Neutral, 0.3),
        ];
        let (kind, confidence) = TechnicalAnalyzer::synthesize(&signals);
        assert_eq!(kind, SignalKind::Bullish);
        assert!((confidence - 1.4 / 2.2).abs() < 1e-9);
    }

    #[test]
    fn tie_breaks_toward_neutral() {
        let signals = vec![
            signal(SignalKind::Bullish, 0.5),
            signal(SignalKind::Bearish, 0.5),
        ];
        let (kind, _) = TechnicalAnalyzer::synthesize(&signals);
        assert_eq!(kind, SignalKind::Neutral);
    }

    #[test]
    fn overall_confidence_stays_in_unit_range() {
        let signals = vec![
            signal(SignalKind::Bullish, 1.0),
            signal(SignalKind::Bullish, 1.0),
            signal(SignalKind::Neutral, 0.1),
        ];
        let (_, confidence) = TechnicalAnalyzer::synthesize(&signals);
        assert!((0.0..=1.0).contains(&confidence));
    }

    // ---- end-to-end over a context ---------------------------------------

    #[test]
    fn unavailable_context_produces_neutral() {
        let context = MarketContext::unavailable("TSLA", "15m");
        let analysis = TechnicalAnalyzer::analyze(&context);
        assert_eq!(analysis.overall_signal, SignalKind::Neutral);
        assert_eq!(analysis.overall_confidence, 0.0);
        assert!(analysis.signals.is_empty());
    }
}
