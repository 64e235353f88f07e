// =============================================================================
// Algorithmic decision maker — deterministic rules over sentiment + technical
// =============================================================================
//
// No model in the loop: a weighted combination of the aggregated sentiment
// score and the technical signal drives a total, deterministic rule set.
// Long-only: strong bearish readings hold rather than short.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::RiskParams;
use crate::error::{MeridianError, Result};
use crate::types::{is_crypto_symbol, SignalKind, TradeAction};

/// Combined score above which the maker buys (strict).
pub const BUY_THRESHOLD: f64 = 0.3;
/// Combined score below which the signal is strongly bearish (strict).
pub const SELL_THRESHOLD: f64 = -0.3;
/// |score| below this reads as weak rather than moderate.
pub const NEUTRAL_ZONE: f64 = 0.15;

/// Confidence bands for position sizing.
pub const CONFIDENCE_HIGH: f64 = 0.85; // 100% of max position
pub const CONFIDENCE_MEDIUM: f64 = 0.75; // 75%
pub const CONFIDENCE_LOW: f64 = 0.65; // 50%

/// Smallest tradable quantity per asset class.
const MIN_QTY_EQUITY: f64 = 1.0;
const MIN_QTY_CRYPTO: f64 = 1e-8;

/// The pipeline's output action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: TradeAction,
    /// Shares (integer-valued for equities) or coins (8-decimal for crypto).
    pub quantity: f64,
    pub rationale: String,
    pub confidence: f64,
    pub stop_loss: Option<f64>,
}

impl Decision {
    fn hold(rationale: String, confidence: f64) -> Self {
        Self {
            action: TradeAction::Hold,
            quantity: 0.0,
            rationale,
            confidence,
            stop_loss: None,
        }
    }
}

pub struct DecisionMaker {
    sentiment_weight: f64,
    technical_weight: f64,
}

impl Default for DecisionMaker {
    fn default() -> Self {
        Self::new(0.6, 0.4)
    }
}

impl DecisionMaker {
    pub fn new(sentiment_weight: f64, technical_weight: f64) -> Self {
        Self {
            sentiment_weight,
            technical_weight,
        }
    }

    /// Decide for one cycle.
    ///
    /// `equity` resolves a fractional `max_position_size` (values <= 1 read
    /// as a fraction of equity). A non-positive `current_price` is an
    /// invariant violation, not a hold.
    #[allow(clippy::too_many_arguments)]
    pub fn decide(
        &self,
        symbol: &str,
        sentiment_score: f64,
        sentiment_confidence: f64,
        technical_signal: SignalKind,
        technical_confidence: f64,
        current_price: f64,
        equity: f64,
        risk: &RiskParams,
    ) -> Result<Decision> {
        if current_price <= 0.0 {
            return Err(MeridianError::FatalInvariant(format!(
                "current price must be positive, got {current_price}"
            )));
        }

        let technical_score = technical_signal.score();
        let combined_score =
            sentiment_score * self.sentiment_weight + technical_score * self.technical_weight;
        let combined_confidence = sentiment_confidence * self.sentiment_weight
            + technical_confidence * self.technical_weight;

        info!(
            symbol,
            sentiment_score,
            sentiment_confidence,
            technical = %technical_signal,
            technical_confidence,
            combined_score,
            combined_confidence,
            "decision inputs combined"
        );

        // 1. Confidence gate.
        if combined_confidence < risk.min_confidence {
            return Ok(Decision::hold(
                format!(
                    "Combined confidence ({:.1}%) below minimum threshold ({:.0}%). \
                     Waiting for higher conviction signal.",
                    combined_confidence * 100.0,
                    risk.min_confidence * 100.0
                ),
                combined_confidence,
            ));
        }

        // 2. Strong bullish: buy with confidence-banded sizing.
        if combined_score > BUY_THRESHOLD {
            let quantity = self.position_quantity(
                symbol,
                combined_confidence,
                current_price,
                equity,
                risk.max_position_size,
            );
            // Stop prices are quoted in cents.
            let stop_loss =
                (current_price * (1.0 - risk.stop_loss_fraction) * 100.0).round() / 100.0;

            return Ok(Decision {
                action: TradeAction::Buy,
                quantity,
                rationale: format!(
                    "Strong bullish signal: combined_score={combined_score:.2} \
                     (sentiment: {sentiment_score:+.2}, technical: {technical_signal}). \
                     Confidence {:.0}% exceeds threshold. Entering position with {:.1}% stop loss.",
                    combined_confidence * 100.0,
                    risk.stop_loss_fraction * 100.0
                ),
                confidence: combined_confidence,
                stop_loss: Some(stop_loss),
            });
        }

        // 3. Strong bearish: long-only, so hold.
        if combined_score < SELL_THRESHOLD {
            return Ok(Decision::hold(
                format!(
                    "Strong bearish signal: combined_score={combined_score:.2} \
                     (sentiment: {sentiment_score:+.2}, technical: {technical_signal}). \
                     Not entering position in bearish conditions. \
                     Currently only trading long positions."
                ),
                combined_confidence,
            ));
        }

        // 4. Weak or moderate signal: hold.
        let strength = if combined_score.abs() < NEUTRAL_ZONE {
            "Weak"
        } else {
            "Moderate"
        };
        let direction = if combined_score > 0.0 {
            "bullish"
        } else if combined_score < 0.0 {
            "bearish"
        } else {
            "neutral"
        };
        Ok(Decision::hold(
            format!(
                "{strength} {direction} signal: combined_score={combined_score:.2} \
                 (sentiment: {sentiment_score:+.2}, technical: {technical_signal}). \
                 Waiting for stronger conviction (threshold: \u{00b1}{BUY_THRESHOLD})."
            ),
            combined_confidence,
        ))
    }

    /// Dollar sizing by confidence band, converted to a quantity with the
    /// asset class's rounding rules.
    fn position_quantity(
        &self,
        symbol: &str,
        confidence: f64,
        current_price: f64,
        equity: f64,
        max_position_size: f64,
    ) -> f64 {
        // A max_position_size of at most 1 is a fraction of equity.
        let max_position = if max_position_size <= 1.0 {
            max_position_size * equity
        } else {
            max_position_size
        };

        let band = if confidence >= CONFIDENCE_HIGH {
            1.0
        } else if confidence >= CONFIDENCE_MEDIUM {
            0.75
        } else {
            0.50
        };
        let position_value = max_position * band;
        let raw_quantity = position_value / current_price;

        let quantity = if is_crypto_symbol(symbol) {
            // Crypto trades fractionally at 8-decimal precision.
            let rounded = (raw_quantity * 1e8).round() / 1e8;
            rounded.max(MIN_QTY_CRYPTO)
        } else {
            raw_quantity.trunc().max(MIN_QTY_EQUITY)
        };

        info!(
            symbol,
            confidence,
            position_value,
            quantity,
            price = current_price,
            "position sized"
        );
        quantity
    }
}
