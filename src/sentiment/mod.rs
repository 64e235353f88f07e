// =============================================================================
// Sentiment subsystem — per-source analyzers and shared aggregation math
// =============================================================================
//
// Every analyzer implements the same contract: collect recent text for a
// symbol, score each item through the external scorer, and summarize into a
// SourceSentiment. An analyzer that cannot produce at least one valid item
// returns `SentimentFetch::NoData` — that is a sentinel, not an error, and
// the aggregator simply omits the source.
// =============================================================================

pub mod aggregator;
pub mod news;
pub mod reddit;
pub mod scorer;
pub mod sec;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

use crate::types::SentimentLabel;

pub use aggregator::{AggregatedSentiment, SentimentAggregator, SentimentWindows};
pub use scorer::{PolarityScores, SentimentScorer};

/// One source's summarized sentiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSentiment {
    pub source: String,
    pub sentiment: SentimentLabel,
    /// Average compound score across items, in [-1, 1].
    pub score: f64,
    /// Share of items agreeing with the majority label, in [0, 1].
    pub confidence: f64,
    pub item_count: usize,
    /// Items per lookback hour. Only the reddit analyzer fills this in.
    #[serde(default)]
    pub trending_score: Option<f64>,
    /// Source-specific diagnostics (headlines, top posts, material events).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Outcome of one analyzer call. Transient upstream errors are retried
/// inside the analyzer and collapse to `NoData` on exhaustion.
#[derive(Debug, Clone)]
pub enum SentimentFetch {
    Data(SourceSentiment),
    NoData { reason: String },
}

impl SentimentFetch {
    pub fn no_data(reason: impl Into<String>) -> Self {
        Self::NoData {
            reason: reason.into(),
        }
    }

    pub fn data(self) -> Option<SourceSentiment> {
        match self {
            Self::Data(s) => Some(s),
            Self::NoData { .. } => None,
        }
    }
}

/// Number of retry attempts each analyzer grants a transient upstream error.
pub const ANALYZER_ATTEMPTS: u32 = 3;

/// Summarize per-item compound scores into (label, score, confidence):
/// average compound, classify with the shared ±0.05 thresholds, and use the
/// majority bucket's share of items as confidence.
pub fn summarize_compounds(compounds: &[f64]) -> (SentimentLabel, f64, f64) {
    if compounds.is_empty() {
        return (SentimentLabel::Neutral, 0.0, 0.0);
    }
    let avg = compounds.iter().sum::<f64>() / compounds.len() as f64;

    let positive = compounds.iter().filter(|c| **c > 0.05).count();
    let negative = compounds.iter().filter(|c| **c < -0.05).count();
    let neutral = compounds.len() - positive - negative;
    let max_agreement = positive.max(negative).max(neutral);
    let confidence = max_agreement as f64 / compounds.len() as f64;

    (SentimentLabel::from_score(avg), avg, confidence)
}

/// Minimum-interval rate limiter enforced inside an analyzer's HTTP client.
/// Callers never sleep themselves.
pub struct RateLimiter {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// A limiter allowing at most `per_second` requests per second.
    pub fn per_second(per_second: f64) -> Self {
        Self {
            min_interval: Duration::from_secs_f64(1.0 / per_second.max(0.001)),
            last: Mutex::new(None),
        }
    }

    /// Wait until the next request is allowed.
    pub async fn acquire(&self) {
        let wait = {
            let mut last = self.last.lock();
            let now = Instant::now();
            match *last {
                Some(prev) => {
                    let next_allowed = prev + self.min_interval;
                    if next_allowed > now {
                        // Reserve the slot now so concurrent callers queue up.
                        *last = Some(next_allowed);
                        next_allowed - now
                    } else {
                        *last = Some(now);
                        Duration::ZERO
                    }
                }
                None => {
                    *last = Some(now);
                    Duration::ZERO
                }
            }
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}
