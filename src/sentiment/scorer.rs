// =============================================================================
// Text sentiment scorer — the seam to the external model
// =============================================================================
//
// The platform never runs the model in-process. `SentimentScorer` is the
// interface the analyzers consume; the default implementation talks to a
// FinBERT scoring service over HTTP, and a deterministic lexicon scorer
// stands in when no service is configured (and in tests).
// =============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MeridianError, Result};

/// Polarity scores for one piece of text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PolarityScores {
    /// Overall polarity in [-1, 1].
    pub compound: f64,
    pub pos: f64,
    pub neg: f64,
    pub neu: f64,
}

#[async_trait]
pub trait SentimentScorer: Send + Sync {
    async fn score(&self, text: &str) -> Result<PolarityScores>;

    /// Score a batch of texts. The default implementation scores serially;
    /// service-backed implementations may override with a single request.
    async fn score_batch(&self, texts: &[String]) -> Result<Vec<PolarityScores>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.score(text).await?);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// HTTP-backed FinBERT service client
// ---------------------------------------------------------------------------

/// Client for a FinBERT scoring service exposing
/// `POST /score { "text": ... } -> { compound, pos, neg, neu }`.
pub struct FinbertClient {
    base_url: String,
    client: reqwest::Client,
}

impl FinbertClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| MeridianError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }
}

#[async_trait]
impl SentimentScorer for FinbertClient {
    async fn score(&self, text: &str) -> Result<PolarityScores> {
        let url = format!("{}/score", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(MeridianError::TransientIo(format!(
                "scorer returned {status}"
            )));
        }
        let scores: PolarityScores = resp.json().await?;
        debug!(compound = scores.compound, "text scored");
        Ok(scores)
    }

    async fn score_batch(&self, texts: &[String]) -> Result<Vec<PolarityScores>> {
        let url = format!("{}/score_batch", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "texts": texts }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(MeridianError::TransientIo(format!(
                "batch scorer returned {}",
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }
}

// ---------------------------------------------------------------------------
// Lexicon fallback
// ---------------------------------------------------------------------------

const POSITIVE_WORDS: &[&str] = &[
    "beat", "beats", "growth", "record", "strong", "surge", "rally", "gain", "gains", "upgrade",
    "bullish", "profit", "outperform", "buy", "soar", "positive", "exceeds", "expansion",
];

const NEGATIVE_WORDS: &[&str] = &[
    "miss", "misses", "decline", "weak", "loss", "losses", "downgrade", "bearish", "lawsuit",
    "investigation", "crash", "plunge", "sell", "warning", "negative", "layoff", "restructuring",
];

/// Deterministic word-count scorer used when no scoring service is
/// configured. Good enough for smoke runs; not a model.
#[derive(Default)]
pub struct LexiconScorer;

#[async_trait]
impl SentimentScorer for LexiconScorer {
    async fn score(&self, text: &str) -> Result<PolarityScores> {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            return Ok(PolarityScores {
                compound: 0.0,
                pos: 0.0,
                neg: 0.0,
                neu: 1.0,
            });
        }

        let pos_hits = words.iter().filter(|w| POSITIVE_WORDS.contains(w)).count() as f64;
        let neg_hits = words.iter().filter(|w| NEGATIVE_WORDS.contains(w)).count() as f64;
        let total = words.len() as f64;

        let raw = (pos_hits - neg_hits) / (pos_hits + neg_hits).max(1.0);
        Ok(PolarityScores {
            compound: raw.clamp(-1.0, 1.0),
            pos: pos_hits / total,
            neg: neg_hits / total,
            neu: 1.0 - (pos_hits + neg_hits) / total,
        })
    }
}

/// Pick the scorer from the environment: `FINBERT_URL` selects the HTTP
/// client, otherwise the lexicon fallback is used.
pub fn scorer_from_env() -> Result<std::sync::Arc<dyn SentimentScorer>> {
    match std::env::var("FINBERT_URL") {
        Ok(url) if !url.is_empty() => {
            info!(url = %url, "using FinBERT scoring service");
            Ok(std::sync::Arc::new(FinbertClient::new(url)?))
        }
        _ => {
            info!("FINBERT_URL not set — using lexicon fallback scorer");
            Ok(std::sync::Arc::new(LexiconScorer))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lexicon_positive_text() {
        let scores = LexiconScorer
            .score("Record growth and strong profit beat expectations")
            .await
            .unwrap();
        assert!(scores.compound > 0.05);
        assert!(scores.pos > 0.0);
    }

    #[tokio::test]
    async fn lexicon_negative_text() {
        let scores = LexiconScorer
            .score("Earnings miss triggers lawsuit and layoff warning")
            .await
            .unwrap();
        assert!(scores.compound < -0.05);
    }

    #[tokio::test]
    async fn lexicon_neutral_text() {
        let scores = LexiconScorer
            .score("The company held its annual meeting on Tuesday")
            .await
            .unwrap();
        assert!(scores.compound.abs() <= 0.05);
        assert!(scores.neu > 0.9);
    }

    #[tokio::test]
    async fn lexicon_empty_text() {
        let scores = LexiconScorer.score("").await.unwrap();
        assert_eq!(scores.compound, 0.0);
        assert_eq!(scores.neu, 1.0);
    }

    #[tokio::test]
    async fn batch_default_matches_serial() {
        let texts = vec!["strong growth".to_string(), "big loss".to_string()];
        let batch = LexiconScorer.score_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch[0].compound > 0.0);
        assert!(batch[1].compound < 0.0);
    }
}
