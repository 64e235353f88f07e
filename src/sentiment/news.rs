// =============================================================================
// News sentiment analyzer — provider news API + per-article scoring
// =============================================================================

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::error::{MeridianError, Result};

use super::{
    summarize_compounds, RateLimiter, SentimentFetch, SentimentScorer, SourceSentiment,
    ANALYZER_ATTEMPTS,
};

/// Full-article text is truncated to this many characters before scoring.
const MAX_CONTENT_CHARS: usize = 5_000;
/// Headlines carried in the diagnostic payload.
const TOP_HEADLINES: usize = 5;

struct Article {
    headline: String,
    summary: String,
    content: String,
}

/// Text fed to the scorer for one article: the full content truncated to
/// the cap, falling back to headline + summary when the body is empty.
fn article_text(article: &Article) -> String {
    if !article.content.is_empty() {
        let mut text = article.content.clone();
        text.truncate(MAX_CONTENT_CHARS);
        text
    } else {
        format!("{} {}", article.headline, article.summary)
            .trim()
            .to_string()
    }
}

pub struct NewsAnalyzer {
    api_key: Option<String>,
    api_secret: Option<String>,
    base_url: String,
    client: reqwest::Client,
    scorer: Arc<dyn SentimentScorer>,
    limiter: RateLimiter,
}

impl NewsAnalyzer {
    pub fn new(scorer: Arc<dyn SentimentScorer>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| MeridianError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_key: std::env::var("ALPACA_API_KEY").ok().filter(|k| !k.is_empty()),
            api_secret: std::env::var("ALPACA_SECRET_KEY").ok().filter(|k| !k.is_empty()),
            base_url: "https://data.alpaca.markets".to_string(),
            client,
            scorer,
            // Stay well inside the news API's per-minute allowance.
            limiter: RateLimiter::per_second(3.0),
        })
    }

    /// Fetch and score recent news for `symbol`. Missing credentials, an
    /// empty result set, or exhausted retries all collapse to `NoData`.
    pub async fn get_sentiment(
        &self,
        symbol: &str,
        lookback_hours: i64,
        max_articles: usize,
    ) -> SentimentFetch {
        let (Some(key), Some(secret)) = (&self.api_key, &self.api_secret) else {
            return SentimentFetch::no_data("news API credentials not configured");
        };

        let mut articles = Vec::new();
        let mut last_err = String::new();
        for attempt in 1..=ANALYZER_ATTEMPTS {
            match self
                .fetch_articles(key, secret, symbol, lookback_hours, max_articles)
                .await
            {
                Ok(fetched) => {
                    articles = fetched;
                    last_err.clear();
                    break;
                }
                Err(e) if e.is_transient() && attempt < ANALYZER_ATTEMPTS => {
                    warn!(symbol, attempt, error = %e, "news fetch failed — retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(500 * attempt as u64))
                        .await;
                }
                Err(e) => {
                    last_err = e.to_string();
                    break;
                }
            }
        }
        if !last_err.is_empty() {
            return SentimentFetch::no_data(format!("news fetch failed: {last_err}"));
        }
        if articles.is_empty() {
            return SentimentFetch::no_data(format!(
                "no news for {symbol} in the last {lookback_hours}h"
            ));
        }

        // Score each article: prefer full content, fall back to headline +
        // summary.
        let mut compounds = Vec::new();
        let mut headlines = Vec::new();
        for article in &articles {
            let text = article_text(article);
            if text.is_empty() {
                continue;
            }
            match self.scorer.score(&text).await {
                Ok(scores) => {
                    compounds.push(scores.compound);
                    headlines.push(article.headline.clone());
                }
                Err(e) => warn!(symbol, error = %e, "article scoring failed — skipping item"),
            }
        }

        if compounds.is_empty() {
            return SentimentFetch::no_data("no scorable news articles");
        }

        let (label, score, confidence) = summarize_compounds(&compounds);
        info!(
            symbol,
            sentiment = %label,
            score,
            confidence,
            articles = compounds.len(),
            "news sentiment computed"
        );

        SentimentFetch::Data(SourceSentiment {
            source: "news".to_string(),
            sentiment: label,
            score,
            confidence,
            item_count: compounds.len(),
            trending_score: None,
            metadata: serde_json::json!({
                "top_headlines": headlines.iter().take(TOP_HEADLINES).collect::<Vec<_>>(),
                "lookback_hours": lookback_hours,
            }),
        })
    }

    async fn fetch_articles(
        &self,
        key: &str,
        secret: &str,
        symbol: &str,
        lookback_hours: i64,
        max_articles: usize,
    ) -> Result<Vec<Article>> {
        self.limiter.acquire().await;
        let start = (Utc::now() - Duration::hours(lookback_hours)).to_rfc3339();
        let url = format!(
            "{}/v1beta1/news?symbols={}&start={}&limit={}&include_content=true&exclude_contentless=true&sort=desc",
            self.base_url, symbol, start, max_articles
        );

        let resp = self
            .client
            .get(&url)
            .header("APCA-API-KEY-ID", key)
            .header("APCA-API-SECRET-KEY", secret)
            .send()
            .await?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await?;
        if !status.is_success() {
            return Err(MeridianError::TransientIo(format!(
                "news API returned {status}: {body}"
            )));
        }

        let items = body["news"].as_array().cloned().unwrap_or_default();
        Ok(items
            .iter()
            .map(|v| Article {
                headline: v["headline"].as_str().unwrap_or_default().to_string(),
                summary: v["summary"].as_str().unwrap_or_default().to_string(),
                content: v["content"].as_str().unwrap_or_default().to_string(),
            })
            .collect())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn article(headline: &str, summary: &str, content: &str) -> Article {
        Article {
            headline: headline.to_string(),
            summary: summary.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn full_content_is_preferred_over_headline() {
        let a = article("Shares surge", "Record quarter", "Full article body here");
        assert_eq!(article_text(&a), "Full article body here");
    }

    #[test]
    fn long_content_is_truncated_to_cap() {
        let body = "x".repeat(MAX_CONTENT_CHARS + 500);
        let a = article("Shares surge", "", &body);
        assert_eq!(article_text(&a).len(), MAX_CONTENT_CHARS);
    }

    #[test]
    fn missing_content_falls_back_to_headline_and_summary() {
        let a = article("Shares surge", "Record quarter", "");
        assert_eq!(article_text(&a), "Shares surge Record quarter");
    }

    #[test]
    fn headline_only_fallback_is_trimmed() {
        let a = article("Shares surge", "", "");
        assert_eq!(article_text(&a), "Shares surge");
    }

    #[test]
    fn empty_article_yields_empty_text() {
        assert!(article_text(&article("", "", "")).is_empty());
    }
}
