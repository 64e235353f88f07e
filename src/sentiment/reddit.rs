// =============================================================================
// Reddit sentiment analyzer — subreddit search, posts + top comments
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{MeridianError, Result};

use super::{
    summarize_compounds, RateLimiter, SentimentFetch, SentimentScorer, SourceSentiment,
    ANALYZER_ATTEMPTS,
};

const SUBREDDITS: &[&str] = &["wallstreetbets", "stocks", "investing"];
/// Top comments scored per post.
const COMMENTS_PER_POST: usize = 10;
/// Top posts carried in the diagnostic payload.
const TOP_POSTS: usize = 5;
/// Items shorter than this are noise, not signal.
const MIN_TEXT_LEN: usize = 10;

struct RedditPost {
    id: String,
    subreddit: String,
    title: String,
    text: String,
    score: i64,
    created_utc: f64,
}

pub struct RedditAnalyzer {
    client_id: Option<String>,
    client_secret: Option<String>,
    user_agent: String,
    client: reqwest::Client,
    scorer: Arc<dyn SentimentScorer>,
    limiter: RateLimiter,
}

impl RedditAnalyzer {
    pub fn new(scorer: Arc<dyn SentimentScorer>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| MeridianError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client_id: std::env::var("REDDIT_CLIENT_ID").ok().filter(|v| !v.is_empty()),
            client_secret: std::env::var("REDDIT_CLIENT_SECRET").ok().filter(|v| !v.is_empty()),
            user_agent: std::env::var("REDDIT_USER_AGENT")
                .unwrap_or_else(|_| "meridian:v1.0 (trading research)".to_string()),
            client,
            scorer,
            // Reddit app-auth throughput: stay well under 60 req/min.
            limiter: RateLimiter::per_second(1.0),
        })
    }

    /// Fetch and score recent mentions of `symbol`. Missing credentials or
    /// zero mentions collapse to `NoData`.
    pub async fn get_sentiment(
        &self,
        symbol: &str,
        lookback_hours: i64,
        max_posts: usize,
    ) -> SentimentFetch {
        let (Some(id), Some(secret)) = (&self.client_id, &self.client_secret) else {
            return SentimentFetch::no_data("reddit API credentials not configured");
        };

        let token = match self.fetch_token(id, secret).await {
            Ok(t) => t,
            Err(e) => return SentimentFetch::no_data(format!("reddit auth failed: {e}")),
        };

        let cutoff = (Utc::now().timestamp() as f64) - (lookback_hours as f64 * 3600.0);
        let mut posts = Vec::new();
        for subreddit in SUBREDDITS {
            match self
                .search_subreddit(&token, subreddit, symbol, max_posts)
                .await
            {
                Ok(mut found) => {
                    found.retain(|p| p.created_utc >= cutoff);
                    posts.extend(found);
                }
                Err(e) => warn!(symbol, subreddit = %subreddit, error = %e, "subreddit search failed"),
            }
        }

        if posts.is_empty() {
            return SentimentFetch::no_data(format!(
                "no reddit mentions for {symbol} in the last {lookback_hours}h"
            ));
        }

        // Score post bodies, then the top comments of each post.
        let mut compounds = Vec::new();
        let mut post_count = 0usize;
        let mut comment_count = 0usize;

        for post in &posts {
            let text = format!("{} {}", post.title, post.text);
            if text.trim().len() > MIN_TEXT_LEN {
                if let Ok(scores) = self.scorer.score(&text).await {
                    compounds.push(scores.compound);
                    post_count += 1;
                }
            }

            match self.fetch_comments(&token, &post.subreddit, &post.id).await {
                Ok(comments) => {
                    for comment in comments.iter().take(COMMENTS_PER_POST) {
                        if comment.len() > MIN_TEXT_LEN {
                            if let Ok(scores) = self.scorer.score(comment).await {
                                compounds.push(scores.compound);
                                comment_count += 1;
                            }
                        }
                    }
                }
                Err(e) => debug!(post_id = %post.id, error = %e, "comment fetch failed"),
            }
        }

        if compounds.is_empty() {
            return SentimentFetch::no_data("no scorable reddit items");
        }

        let (label, score, confidence) = summarize_compounds(&compounds);
        let trending_score = if lookback_hours > 0 {
            compounds.len() as f64 / lookback_hours as f64
        } else {
            0.0
        };

        let mut top = posts.iter().collect::<Vec<_>>();
        top.sort_by_key(|p| -p.score);
        let top_posts: Vec<serde_json::Value> = top
            .iter()
            .take(TOP_POSTS)
            .map(|p| {
                serde_json::json!({
                    "title": p.title,
                    "score": p.score,
                    "subreddit": p.subreddit,
                })
            })
            .collect();

        info!(
            symbol,
            sentiment = %label,
            score,
            confidence,
            mentions = compounds.len(),
            posts = post_count,
            comments = comment_count,
            trending = trending_score,
            "reddit sentiment computed"
        );

        SentimentFetch::Data(SourceSentiment {
            source: "reddit".to_string(),
            sentiment: label,
            score,
            confidence,
            item_count: compounds.len(),
            trending_score: Some(trending_score),
            metadata: serde_json::json!({
                "post_count": post_count,
                "comment_count": comment_count,
                "top_posts": top_posts,
                "subreddits_searched": SUBREDDITS,
            }),
        })
    }

    /// App-only OAuth token (client_credentials grant).
    async fn fetch_token(&self, id: &str, secret: &str) -> Result<String> {
        let mut last_err = MeridianError::TransientIo("no attempts".into());
        for attempt in 1..=ANALYZER_ATTEMPTS {
            self.limiter.acquire().await;
            let result = self
                .client
                .post("https://www.reddit.com/api/v1/access_token")
                .basic_auth(id, Some(secret))
                .header("User-Agent", &self.user_agent)
                .form(&[("grant_type", "client_credentials")])
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    let body: serde_json::Value = resp.json().await?;
                    if let Some(token) = body["access_token"].as_str() {
                        return Ok(token.to_string());
                    }
                    return Err(MeridianError::Config("reddit token response malformed".into()));
                }
                Ok(resp) => {
                    last_err =
                        MeridianError::TransientIo(format!("reddit auth returned {}", resp.status()));
                }
                Err(e) => last_err = e.into(),
            }
            if attempt < ANALYZER_ATTEMPTS {
                tokio::time::sleep(std::time::Duration::from_millis(500 * attempt as u64)).await;
            }
        }
        Err(last_err)
    }

    async fn search_subreddit(
        &self,
        token: &str,
        subreddit: &str,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<RedditPost>> {
        self.limiter.acquire().await;
        let query = format!("${symbol} OR {symbol}");
        let url = format!(
            "https://oauth.reddit.com/r/{subreddit}/search?q={}&restrict_sr=1&t=day&limit={limit}",
            urlencode(&query)
        );

        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header("User-Agent", &self.user_agent)
            .send()
            .await?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await?;
        if !status.is_success() {
            return Err(MeridianError::TransientIo(format!(
                "subreddit search returned {status}"
            )));
        }

        let children = body["data"]["children"].as_array().cloned().unwrap_or_default();
        Ok(children
            .iter()
            .filter_map(|c| {
                let d = &c["data"];
                Some(RedditPost {
                    id: d["id"].as_str()?.to_string(),
                    subreddit: subreddit.to_string(),
                    title: d["title"].as_str().unwrap_or_default().to_string(),
                    text: d["selftext"].as_str().unwrap_or_default().to_string(),
                    score: d["score"].as_i64().unwrap_or(0),
                    created_utc: d["created_utc"].as_f64().unwrap_or(0.0),
                })
            })
            .collect())
    }

    async fn fetch_comments(
        &self,
        token: &str,
        subreddit: &str,
        post_id: &str,
    ) -> Result<Vec<String>> {
        self.limiter.acquire().await;
        let url = format!(
            "https://oauth.reddit.com/r/{subreddit}/comments/{post_id}?limit={COMMENTS_PER_POST}&depth=1"
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header("User-Agent", &self.user_agent)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(MeridianError::TransientIo(format!(
                "comment fetch returned {}",
                resp.status()
            )));
        }
        let body: serde_json::Value = resp.json().await?;

        // The comments listing is the second element of the response array.
        let comments = body
            .get(1)
            .and_then(|l| l["data"]["children"].as_array())
            .cloned()
            .unwrap_or_default();
        Ok(comments
            .iter()
            .filter_map(|c| c["data"]["body"].as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }
}

/// Percent-encode the few characters that matter in a search query.
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => out.push(c),
            ' ' => out.push('+'),
            _ => out.push_str(&format!("%{:02X}", c as u32)),
        }
    }
    out
}
