// =============================================================================
// Bar-window analytics — pure functions, no I/O
// =============================================================================
//
// Every function takes an oldest-first slice of bars and degrades to `None`
// (or a neutral default) when the window is too short. All math is on f64.
// =============================================================================

use crate::types::Bar;

use super::{
    Levels, PricePattern, TechnicalIndicators, TrendAnalysis, TrendDirection, VolumeAnalysis,
    VolumeTrend,
};

/// Window used for S&R, volume averaging, and SMA-20.
const RECENT_WINDOW: usize = 20;
/// Maximum bars considered by trend detection.
const TREND_WINDOW: usize = 100;
/// Bars examined for price-action structure.
const PRICE_ACTION_WINDOW: usize = 5;

/// Arithmetic mean of the last `period` closes. `None` with fewer bars.
pub fn sma(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    Some(closes[closes.len() - period..].iter().sum::<f64>() / period as f64)
}

/// RSI over the trailing `period` deltas.
///
/// Averages gains and losses across the window; `RS = avg_gain / avg_loss`,
/// `RSI = 100 - 100 / (1 + RS)`. All-gain windows clamp to 100, and windows
/// too short to compute default to the neutral 50.
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < period + 1 {
        return 50.0;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let recent = &deltas[deltas.len() - period..];

    let avg_gain: f64 = recent.iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
    let avg_loss: f64 = recent.iter().filter(|d| **d < 0.0).map(|d| -d).sum::<f64>() / period as f64;

    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// SMA-20 / SMA-50 / RSI-14 / price-vs-SMA20 over the window.
pub fn compute_indicators(bars: &[Bar]) -> TechnicalIndicators {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let mut out = TechnicalIndicators {
        sma_20: sma(&closes, 20),
        sma_50: sma(&closes, 50),
        rsi_14: None,
        price_vs_sma20_pct: None,
    };

    if closes.len() >= 15 {
        out.rsi_14 = Some(rsi(&closes, 14));
    }

    if let (Some(sma_20), Some(last)) = (out.sma_20, closes.last()) {
        if sma_20 > 0.0 {
            out.price_vs_sma20_pct = Some((last - sma_20) / sma_20 * 100.0);
        }
    }
    out
}

/// Trend over the most recent `min(len, 100)` bars: compare the mean close of
/// the first quarter with the mean of the last quarter. ±1 % picks the
/// direction; `strength = min(|pct| / 5, 1)` for directional trends.
pub fn analyze_trend(bars: &[Bar]) -> Option<TrendAnalysis> {
    if bars.len() < 8 {
        return None;
    }

    let window = &bars[bars.len().saturating_sub(TREND_WINDOW)..];
    let closes: Vec<f64> = window.iter().map(|b| b.close).collect();
    let quarter = closes.len() / 4;

    let first_avg = closes[..quarter].iter().sum::<f64>() / quarter as f64;
    let last_avg = closes[closes.len() - quarter..].iter().sum::<f64>() / quarter as f64;
    if first_avg <= 0.0 {
        return None;
    }
    let change_pct = (last_avg - first_avg) / first_avg * 100.0;

    let (trend, strength) = if change_pct > 1.0 {
        (TrendDirection::Bullish, (change_pct.abs() / 5.0).min(1.0))
    } else if change_pct < -1.0 {
        (TrendDirection::Bearish, (change_pct.abs() / 5.0).min(1.0))
    } else {
        (TrendDirection::Sideways, 0.5)
    };

    Some(TrendAnalysis {
        trend,
        strength,
        change_pct,
    })
}

/// Support = min low, resistance = max high over the last 20 bars.
pub fn support_resistance(bars: &[Bar]) -> Option<Levels> {
    if bars.len() < RECENT_WINDOW {
        return None;
    }
    let window = &bars[bars.len() - RECENT_WINDOW..];
    let resistance = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let support = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let current = bars.last()?.close;
    if support <= 0.0 || current <= 0.0 {
        return None;
    }

    Some(Levels {
        support,
        resistance,
        distance_to_support_pct: (current - support) / support * 100.0,
        distance_to_resistance_pct: (resistance - current) / current * 100.0,
    })
}

/// Latest volume relative to the 20-bar average: >1.5 high, <0.5 low.
pub fn analyze_volume(bars: &[Bar]) -> Option<VolumeAnalysis> {
    if bars.len() < RECENT_WINDOW {
        return None;
    }
    let window = &bars[bars.len() - RECENT_WINDOW..];
    let avg_volume =
        window.iter().map(|b| b.volume as f64).sum::<f64>() / RECENT_WINDOW as f64;
    let current_volume = bars.last()?.volume as f64;
    let ratio = if avg_volume > 0.0 {
        current_volume / avg_volume
    } else {
        1.0
    };

    let trend = if ratio > 1.5 {
        VolumeTrend::High
    } else if ratio < 0.5 {
        VolumeTrend::Low
    } else {
        VolumeTrend::Normal
    };

    Some(VolumeAnalysis {
        trend,
        ratio,
        avg_volume,
        current_volume,
    })
}

/// Price-action structure over the last five bars: monotonic highs and lows
/// pick the strong trends, one-sided monotonicity the consolidations.
pub fn price_action(bars: &[Bar]) -> Option<PricePattern> {
    if bars.len() < PRICE_ACTION_WINDOW {
        return None;
    }
    let window = &bars[bars.len() - PRICE_ACTION_WINDOW..];
    let highs: Vec<f64> = window.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = window.iter().map(|b| b.low).collect();

    let higher_highs = highs.windows(2).all(|w| w[1] >= w[0]);
    let higher_lows = lows.windows(2).all(|w| w[1] >= w[0]);
    let lower_highs = highs.windows(2).all(|w| w[1] <= w[0]);
    let lower_lows = lows.windows(2).all(|w| w[1] <= w[0]);

    let pattern = if higher_highs && higher_lows {
        PricePattern::StrongUptrend
    } else if lower_highs && lower_lows {
        PricePattern::StrongDowntrend
    } else if higher_lows && !lower_highs {
        PricePattern::BullishConsolidation
    } else if lower_highs && !higher_lows {
        PricePattern::BearishConsolidation
    } else {
        PricePattern::Choppy
    };
    Some(pattern)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    /// Build a bar series from closes; highs/lows hug the closes.
    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
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
            })
            .collect()
    }

    // ---- sma -------------------------------------------------------------

    #[test]
    fn sma_requires_enough_bars() {
        assert!(sma(&[1.0, 2.0], 3).is_none());
        assert_eq!(sma(&[1.0, 2.0, 3.0], 3), Some(2.0));
    }

    #[test]
    fn sma_uses_trailing_window() {
        let closes = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(sma(&closes, 2), Some(35.0));
    }

    // ---- rsi -------------------------------------------------------------

    #[test]
    fn rsi_defaults_to_neutral_when_short() {
        assert_eq!(rsi(&[100.0; 10], 14), 50.0);
    }

    #[test]
    fn rsi_monotonic_rise_is_overbought() {
        // 15 monotonically rising closes: all gains, RSI clamps to 100.
        let closes: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        let value = rsi(&closes, 14);
        assert!(value >= 70.0, "expected overbought, got {value}");
        assert_eq!(value, 100.0);
    }

    #[test]
    fn rsi_monotonic_fall_approaches_zero() {
        let closes: Vec<f64> = (0..15).map(|i| 100.0 - i as f64).collect();
        assert!(rsi(&closes, 14) < 30.0);
    }

    #[test]
    fn rsi_stays_in_range() {
        let closes = [
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        let value = rsi(&closes, 14);
        assert!((0.0..=100.0).contains(&value));
    }

    // ---- trend -----------------------------------------------------------

    #[test]
    fn trend_bullish_on_two_percent_rise() {
        // 100 bars climbing ~2%+ between first and last quarter.
        let closes: Vec<f64> = (0..100).map(|i| 100.0 + i as f64 * 0.05).collect();
        let bars = bars_from_closes(&closes);
        let trend = analyze_trend(&bars).unwrap();
        assert_eq!(trend.trend, TrendDirection::Bullish);
        assert!(trend.change_pct > 1.0);
        assert!(trend.strength > 0.0 && trend.strength <= 1.0);
    }

    #[test]
    fn trend_sideways_within_one_percent() {
        // Oscillation keeps quarter means within ±1% of each other.
        let closes: Vec<f64> = (0..100)
            .map(|i| 100.0 + if i % 2 == 0 { 0.2 } else { -0.2 })
            .collect();
        let bars = bars_from_closes(&closes);
        let trend = analyze_trend(&bars).unwrap();
        assert_eq!(trend.trend, TrendDirection::Sideways);
    }

    #[test]
    fn trend_bearish_on_decline() {
        let closes: Vec<f64> = (0..100).map(|i| 200.0 - i as f64 * 0.1).collect();
        let bars = bars_from_closes(&closes);
        let trend = analyze_trend(&bars).unwrap();
        assert_eq!(trend.trend, TrendDirection::Bearish);
        assert!(trend.change_pct < -1.0);
    }

    #[test]
    fn trend_needs_minimum_bars() {
        let bars = bars_from_closes(&[100.0; 5]);
        assert!(analyze_trend(&bars).is_none());
    }

    #[test]
    fn trend_strength_caps_at_one() {
        // A 40% move: |pct|/5 would exceed 1.0.
        let closes: Vec<f64> = (0..100).map(|i| 100.0 + i as f64 * 0.5).collect();
        let bars = bars_from_closes(&closes);
        let trend = analyze_trend(&bars).unwrap();
        assert_eq!(trend.strength, 1.0);
    }

    // ---- support / resistance --------------------------------------------

    #[test]
    fn levels_use_last_twenty_bars() {
        let mut closes = vec![100.0; 30];
        closes[29] = 105.0; // latest close well above the band
        let mut bars = bars_from_closes(&closes);
        // Spike the high/low inside the 20-bar window.
        bars[25].high = 120.0;
        bars[15].low = 90.0;
        // Spike outside the window must be ignored.
        bars[2].high = 500.0;

        let levels = support_resistance(&bars).unwrap();
        assert_eq!(levels.resistance, 120.0);
        assert_eq!(levels.support, 90.0);
        assert!(levels.distance_to_support_pct > 0.0);
    }

    #[test]
    fn levels_need_twenty_bars() {
        let bars = bars_from_closes(&[100.0; 19]);
        assert!(support_resistance(&bars).is_none());
    }

    // ---- volume ----------------------------------------------------------

    #[test]
    fn volume_trend_classification() {
        let mut bars = bars_from_closes(&[100.0; 25]);
        for b in bars.iter_mut() {
            b.volume = 1_000;
        }

        bars.last_mut().unwrap().volume = 2_000; // ratio ~1.9 (own volume in mean)
        let v = analyze_volume(&bars).unwrap();
        assert_eq!(v.trend, VolumeTrend::High);
        assert!(v.ratio > 1.5);

        bars.last_mut().unwrap().volume = 100;
        let v = analyze_volume(&bars).unwrap();
        assert_eq!(v.trend, VolumeTrend::Low);

        bars.last_mut().unwrap().volume = 1_000;
        let v = analyze_volume(&bars).unwrap();
        assert_eq!(v.trend, VolumeTrend::Normal);
    }

    // ---- price action ----------------------------------------------------

    #[test]
    fn price_action_patterns() {
        // Strong uptrend: rising closes push both highs and lows up.
        let up = bars_from_closes(&[100.0, 101.0, 102.0, 103.0, 104.0]);
        assert_eq!(price_action(&up), Some(PricePattern::StrongUptrend));

        let down = bars_from_closes(&[104.0, 103.0, 102.0, 101.0, 100.0]);
        assert_eq!(price_action(&down), Some(PricePattern::StrongDowntrend));

        // Higher lows but a lower high somewhere: bullish consolidation.
        let mut consol = bars_from_closes(&[100.0, 100.5, 101.0, 101.5, 102.0]);
        consol[3].high = consol[2].high - 1.0;
        assert_eq!(
            price_action(&consol),
            Some(PricePattern::BullishConsolidation)
        );

        // Alternating chop.
        let chop = bars_from_closes(&[100.0, 103.0, 99.0, 104.0, 98.0]);
        assert_eq!(price_action(&chop), Some(PricePattern::Choppy));
    }

    #[test]
    fn price_action_needs_five_bars() {
        let bars = bars_from_closes(&[100.0; 4]);
        assert!(price_action(&bars).is_none());
    }

    // ---- compute_indicators ----------------------------------------------

    #[test]
    fn indicators_populate_with_enough_data() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.1).collect();
        let bars = bars_from_closes(&closes);
        let ind = compute_indicators(&bars);
        assert!(ind.sma_20.is_some());
        assert!(ind.sma_50.is_some());
        assert!(ind.rsi_14.is_some());
        assert!(ind.price_vs_sma20_pct.is_some());
        // Rising series: price sits above its SMA.
        assert!(ind.price_vs_sma20_pct.unwrap() > 0.0);
    }

    #[test]
    fn indicators_degrade_on_short_window() {
        let bars = bars_from_closes(&[100.0; 10]);
        let ind = compute_indicators(&bars);
        assert!(ind.sma_20.is_none());
        assert!(ind.sma_50.is_none());
        assert!(ind.price_vs_sma20_pct.is_none());
    }
}
