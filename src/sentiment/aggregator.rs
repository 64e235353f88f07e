// =============================================================================
// Sentiment aggregator — weighted fusion across news / reddit / SEC
// =============================================================================
//
// The three analyzers fan out in parallel, each bounded by a per-call
// timeout. Sources that return no data (or time out) are simply omitted and
// the remaining weights renormalize, so one dead feed never zeroes the
// signal.
// =============================================================================

use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::{info, warn};

use crate::error::{MeridianError, Result};
use crate::types::SentimentLabel;

use super::news::NewsAnalyzer;
use super::reddit::RedditAnalyzer;
use super::sec::SecAnalyzer;
use super::{SentimentFetch, SourceSentiment};

/// Default per-analyzer timeout.
const ANALYZER_TIMEOUT_SECS: u64 = 30;

/// Per-source fusion weights. The enabled subset must sum to at most 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SourceWeights {
    pub news: f64,
    pub reddit: f64,
    pub sec: f64,
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self {
            news: 0.40,
            reddit: 0.25,
            sec: 0.25,
        }
    }
}

/// Lookback windows and item budgets for one aggregation call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SentimentWindows {
    pub news_lookback_hours: i64,
    pub reddit_lookback_hours: i64,
    pub sec_lookback_days: i64,
    pub max_articles: usize,
    pub max_posts: usize,
    pub max_filings: usize,
}

impl Default for SentimentWindows {
    fn default() -> Self {
        Self {
            news_lookback_hours: 24,
            reddit_lookback_hours: 24,
            sec_lookback_days: 30,
            max_articles: 25,
            max_posts: 50,
            max_filings: 10,
        }
    }
}

/// The fused multi-source sentiment for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedSentiment {
    pub overall_sentiment: SentimentLabel,
    pub score: f64,
    pub confidence: f64,
    pub sources_used: Vec<String>,
    /// Share of contributing sources agreeing with the majority label.
    pub agreement_level: f64,
    pub breakdown: Vec<SourceSentiment>,
}

impl AggregatedSentiment {
    /// The neutral result used when no source produced data.
    pub fn empty() -> Self {
        Self {
            overall_sentiment: SentimentLabel::Neutral,
            score: 0.0,
            confidence: 0.0,
            sources_used: Vec::new(),
            agreement_level: 0.0,
            breakdown: Vec::new(),
        }
    }
}

/// Weighted fusion over the sources that returned data. Pure; the aggregator
/// and the backtest engine both go through here.
pub fn fuse(weighted: Vec<(f64, SourceSentiment)>) -> AggregatedSentiment {
    let total_weight: f64 = weighted.iter().map(|(w, _)| w).sum();
    if weighted.is_empty() || total_weight <= 0.0 {
        return AggregatedSentiment::empty();
    }

    let score = weighted.iter().map(|(w, s)| w * s.score).sum::<f64>() / total_weight;
    let confidence = weighted.iter().map(|(w, s)| w * s.confidence).sum::<f64>() / total_weight;

    // Agreement: majority label count over contributing sources.
    let labels: Vec<SentimentLabel> = weighted.iter().map(|(_, s)| s.sentiment).collect();
    let count = |l: SentimentLabel| labels.iter().filter(|x| **x == l).count();
    let majority = count(SentimentLabel::Positive)
        .max(count(SentimentLabel::Negative))
        .max(count(SentimentLabel::Neutral));
    let agreement_level = majority as f64 / labels.len() as f64;

    AggregatedSentiment {
        overall_sentiment: SentimentLabel::from_score(score),
        score,
        confidence,
        sources_used: weighted.iter().map(|(_, s)| s.source.clone()).collect(),
        agreement_level,
        breakdown: weighted.into_iter().map(|(_, s)| s).collect(),
    }
}

pub struct SentimentAggregator {
    news: Option<NewsAnalyzer>,
    reddit: Option<RedditAnalyzer>,
    sec: Option<SecAnalyzer>,
    weights: SourceWeights,
    per_call_timeout: Duration,
}

impl SentimentAggregator {
    /// Build an aggregator over the given analyzers. `None` disables a
    /// source entirely. Fails if the enabled weights sum above 1.
    pub fn new(
        news: Option<NewsAnalyzer>,
        reddit: Option<RedditAnalyzer>,
        sec: Option<SecAnalyzer>,
        weights: SourceWeights,
    ) -> Result<Self> {
        let enabled_sum = [
            news.is_some().then_some(weights.news),
            reddit.is_some().then_some(weights.reddit),
            sec.is_some().then_some(weights.sec),
        ]
        .into_iter()
        .flatten()
        .sum::<f64>();
        if enabled_sum > 1.0 + 1e-9 {
            return Err(MeridianError::Config(format!(
                "sentiment weights over enabled sources sum to {enabled_sum:.2} (> 1)"
            )));
        }

        Ok(Self {
            news,
            reddit,
            sec,
            weights,
            per_call_timeout: Duration::from_secs(ANALYZER_TIMEOUT_SECS),
        })
    }

    /// An aggregator with every source disabled. Dry-run wiring and tests.
    pub fn disabled() -> Self {
        Self {
            news: None,
            reddit: None,
            sec: None,
            weights: SourceWeights::default(),
            per_call_timeout: Duration::from_secs(ANALYZER_TIMEOUT_SECS),
        }
    }

    /// Fan out to every enabled analyzer in parallel and fuse whatever came
    /// back. Never fails: the worst case is the neutral empty result.
    pub async fn aggregate(
        &self,
        symbol: &str,
        windows: &SentimentWindows,
    ) -> AggregatedSentiment {
        let news_fut = async {
            match &self.news {
                Some(analyzer) => {
                    run_with_timeout(
                        "news",
                        self.per_call_timeout,
                        analyzer.get_sentiment(
                            symbol,
                            windows.news_lookback_hours,
                            windows.max_articles,
                        ),
                    )
                    .await
                }
                None => None,
            }
        };
        let reddit_fut = async {
            match &self.reddit {
                Some(analyzer) => {
                    run_with_timeout(
                        "reddit",
                        self.per_call_timeout,
                        analyzer.get_sentiment(
                            symbol,
                            windows.reddit_lookback_hours,
                            windows.max_posts,
                        ),
                    )
                    .await
                }
                None => None,
            }
        };
        let sec_fut = async {
            match &self.sec {
                Some(analyzer) => {
                    run_with_timeout(
                        "sec",
                        self.per_call_timeout,
                        analyzer.get_sentiment(
                            symbol,
                            windows.sec_lookback_days,
                            windows.max_filings,
                        ),
                    )
                    .await
                }
                None => None,
            }
        };

        let (news, reddit, sec) = tokio::join!(news_fut, reddit_fut, sec_fut);

        let mut weighted = Vec::new();
        if let Some(s) = news {
            weighted.push((self.weights.news, s));
        }
        if let Some(s) = reddit {
            weighted.push((self.weights.reddit, s));
        }
        if let Some(s) = sec {
            weighted.push((self.weights.sec, s));
        }

        let result = fuse(weighted);
        info!(
            symbol,
            sentiment = %result.overall_sentiment,
            score = result.score,
            confidence = result.confidence,
            sources = ?result.sources_used,
            agreement = result.agreement_level,
            "sentiment aggregated"
        );
        result
    }
}

/// Await one analyzer call under a hard timeout; expiry counts as no data.
async fn run_with_timeout(
    source: &str,
    timeout: Duration,
    fut: impl std::future::Future<Output = SentimentFetch>,
) -> Option<SourceSentiment> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(SentimentFetch::Data(s)) => Some(s),
        Ok(SentimentFetch::NoData { reason }) => {
            info!(source, reason = %reason, "sentiment source returned no data");
            None
        }
        Err(_) => {
            warn!(source, timeout_secs = timeout.as_secs(), "sentiment source timed out");
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn source(name: &str, label: SentimentLabel, score: f64, confidence: f64) -> SourceSentiment {
        SourceSentiment {
            source: name.to_string(),
            sentiment: label,
            score,
            confidence,
            item_count: 5,
            trending_score: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn empty_fusion_is_neutral() {
        let result = fuse(Vec::new());
        assert_eq!(result.overall_sentiment, SentimentLabel::Neutral);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.agreement_level, 0.0);
        assert!(result.sources_used.is_empty());
    }

    #[test]
    fn single_source_passes_through() {
        let result = fuse(vec![(
            0.40,
            source("news", SentimentLabel::Positive, 0.6, 0.8),
        )]);
        assert!((result.score - 0.6).abs() < 1e-9);
        assert!((result.confidence - 0.8).abs() < 1e-9);
        assert_eq!(result.overall_sentiment, SentimentLabel::Positive);
        assert_eq!(result.sources_used, vec!["news"]);
        assert_eq!(result.agreement_level, 1.0);
    }

    #[test]
    fn weights_renormalize_over_present_sources() {
        // news 0.40 and sec 0.25 present; reddit missing.
        let result = fuse(vec![
            (0.40, source("news", SentimentLabel::Positive, 0.8, 0.9)),
            (0.25, source("sec", SentimentLabel::Neutral, 0.0, 0.5)),
        ]);
        let expected_score = (0.40 * 0.8 + 0.25 * 0.0) / 0.65;
        let expected_conf = (0.40 * 0.9 + 0.25 * 0.5) / 0.65;
        assert!((result.score - expected_score).abs() < 1e-9);
        assert!((result.confidence - expected_conf).abs() < 1e-9);
    }

    #[test]
    fn unanimous_sources_have_full_agreement() {
        let result = fuse(vec![
            (0.40, source("news", SentimentLabel::Positive, 0.5, 0.7)),
            (0.25, source("reddit", SentimentLabel::Positive, 0.4, 0.7)),
            (0.25, source("sec", SentimentLabel::Positive, 0.3, 0.7)),
        ]);
        assert_eq!(result.agreement_level, 1.0);
        assert_eq!(result.sources_used.len(), 3);
        // Equal confidences fuse to the same confidence.
        assert!((result.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn split_sources_have_partial_agreement() {
        let result = fuse(vec![
            (0.40, source("news", SentimentLabel::Positive, 0.5, 0.7)),
            (0.25, source("reddit", SentimentLabel::Negative, -0.5, 0.7)),
            (0.25, source("sec", SentimentLabel::Positive, 0.3, 0.7)),
        ]);
        assert!((result.agreement_level - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn weight_validation_only_counts_enabled_sources() {
        // No analyzers enabled: the enabled-weight sum is zero, so even an
        // oversized weight table is accepted.
        let result = SentimentAggregator::new(
            None,
            None,
            None,
            SourceWeights {
                news: 0.6,
                reddit: 0.5,
                sec: 0.3,
            },
        );
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn disabled_aggregator_returns_empty() {
        let aggregator = SentimentAggregator::disabled();
        let result = aggregator
            .aggregate("TSLA", &SentimentWindows::default())
            .await;
        assert_eq!(result.overall_sentiment, SentimentLabel::Neutral);
        assert!(result.sources_used.is_empty());
    }
}
