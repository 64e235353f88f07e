// =============================================================================
// SEC EDGAR sentiment analyzer — filings as a fundamental signal
// =============================================================================
//
// Filing sentiment is structural: each form type carries a base score which
// keyword matches in the filing description nudge up or down. Ticker → CIK
// resolution goes through an in-process LRU cache warmed from the SEC
// company-tickers table. The analyzer enforces EDGAR's 10 req/s ceiling
// internally.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::{Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{MeridianError, Result};

use super::{
    summarize_compounds, RateLimiter, SentimentFetch, SourceSentiment, ANALYZER_ATTEMPTS,
};

const SEC_API_BASE: &str = "https://data.sec.gov";

/// SEC rejects bot-like user agents; a contact string is required etiquette.
const SEC_USER_AGENT: &str = "meridian-research admin@meridian.trade";

/// Forms worth scoring, with their display descriptions.
const FILING_TYPES: &[(&str, &str)] = &[
    ("8-K", "Material Event"),
    ("10-Q", "Quarterly Report"),
    ("10-K", "Annual Report"),
    ("4", "Insider Trading"),
    ("SC 13G", "Large Ownership"),
    ("SC 13D", "Large Ownership"),
    ("S-1", "IPO Registration"),
    ("S-3", "Shelf Registration"),
    ("DEF 14A", "Proxy Statement"),
];

const POSITIVE_KEYWORDS: &[&str] = &[
    "beat", "exceed", "growth", "record", "strong", "increase", "positive", "improvement",
    "acquisition", "expansion", "dividend", "buyback", "outperform", "above expectations",
    "guidance raise", "upgrade",
];

const NEGATIVE_KEYWORDS: &[&str] = &[
    "miss", "below", "decline", "weak", "decrease", "negative", "loss", "impairment",
    "restructuring", "layoff", "investigation", "lawsuit", "restatement", "concern", "warning",
    "guidance lower", "downgrade",
];

/// Keyword hits shift the base score by this much each.
const KEYWORD_ADJUSTMENT: f64 = 0.2;

/// Score a single filing: per-form base sentiment adjusted by keyword
/// matches in the description, clamped to [-1, 1].
pub fn score_filing(form: &str, description: &str) -> f64 {
    let base = match form {
        "8-K" => 0.0,
        "10-Q" | "10-K" => 0.1,
        "4" => 0.0,
        "SC 13G" | "SC 13D" => 0.2,
        "S-1" => 0.3,
        _ => 0.0,
    };

    let text = description.to_lowercase();
    let positive = POSITIVE_KEYWORDS.iter().filter(|kw| text.contains(**kw)).count() as f64;
    let negative = NEGATIVE_KEYWORDS.iter().filter(|kw| text.contains(**kw)).count() as f64;

    (base + positive * KEYWORD_ADJUSTMENT - negative * KEYWORD_ADJUSTMENT).clamp(-1.0, 1.0)
}

fn form_description(form: &str) -> &str {
    FILING_TYPES
        .iter()
        .find(|(f, _)| *f == form)
        .map(|(_, d)| *d)
        .unwrap_or(form)
}

fn is_relevant_form(form: &str) -> bool {
    FILING_TYPES.iter().any(|(f, _)| *f == form) || form.starts_with("8-K")
}

// ---------------------------------------------------------------------------
// CIK cache
// ---------------------------------------------------------------------------

/// Bounded LRU of ticker → 10-digit zero-padded CIK.
pub struct CikCache {
    map: HashMap<String, String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl CikCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&mut self, symbol: &str) -> Option<String> {
        let cik = self.map.get(symbol).cloned()?;
        // Move to the back of the recency queue.
        self.order.retain(|s| s != symbol);
        self.order.push_back(symbol.to_string());
        Some(cik)
    }

    pub fn insert(&mut self, symbol: &str, cik: String) {
        if self.map.insert(symbol.to_string(), cik).is_none() {
            self.order.push_back(symbol.to_string());
        } else {
            self.order.retain(|s| s != symbol);
            self.order.push_back(symbol.to_string());
        }
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.map.remove(&evicted);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

struct Filing {
    form: String,
    filing_date: String,
    description: String,
}

pub struct SecAnalyzer {
    client: reqwest::Client,
    cik_cache: Mutex<CikCache>,
    limiter: RateLimiter,
}

impl SecAnalyzer {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(SEC_USER_AGENT)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| MeridianError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            cik_cache: Mutex::new(CikCache::new(256)),
            limiter: RateLimiter::per_second(10.0),
        })
    }

    /// Fetch and score recent filings for `symbol`. Unknown tickers (crypto
    /// pairs in particular) and empty filing windows collapse to `NoData`.
    pub async fn get_sentiment(
        &self,
        symbol: &str,
        lookback_days: i64,
        max_filings: usize,
    ) -> SentimentFetch {
        if crate::types::is_crypto_symbol(symbol) {
            return SentimentFetch::no_data("crypto assets have no SEC filings");
        }

        let cik = match self.resolve_cik(symbol).await {
            Ok(Some(cik)) => cik,
            Ok(None) => return SentimentFetch::no_data(format!("CIK not found for {symbol}")),
            Err(e) => return SentimentFetch::no_data(format!("CIK lookup failed: {e}")),
        };

        let filings = match self.fetch_filings(&cik, lookback_days, max_filings).await {
            Ok(f) => f,
            Err(e) => return SentimentFetch::no_data(format!("filings fetch failed: {e}")),
        };
        if filings.is_empty() {
            return SentimentFetch::no_data(format!(
                "no SEC filings for {symbol} in the last {lookback_days} days"
            ));
        }

        let compounds: Vec<f64> = filings
            .iter()
            .map(|f| score_filing(&f.form, &f.description))
            .collect();
        let (label, score, confidence) = summarize_compounds(&compounds);

        let material_events: Vec<serde_json::Value> = filings
            .iter()
            .zip(&compounds)
            .filter(|(f, _)| f.form.starts_with("8-K"))
            .map(|(f, s)| {
                serde_json::json!({
                    "date": f.filing_date,
                    "description": f.description,
                    "sentiment": s,
                })
            })
            .collect();
        let recent: Vec<serde_json::Value> = filings
            .iter()
            .zip(&compounds)
            .take(5)
            .map(|(f, s)| {
                serde_json::json!({
                    "form": f.form,
                    "filing_date": f.filing_date,
                    "description": f.description,
                    "sentiment": s,
                })
            })
            .collect();

        info!(
            symbol,
            sentiment = %label,
            score,
            confidence,
            filings = filings.len(),
            material_events = material_events.len(),
            "SEC sentiment computed"
        );

        SentimentFetch::Data(SourceSentiment {
            source: "sec".to_string(),
            sentiment: label,
            score,
            confidence,
            item_count: filings.len(),
            trending_score: None,
            metadata: serde_json::json!({
                "recent_filings": recent,
                "material_events": material_events,
                "lookback_days": lookback_days,
            }),
        })
    }

    /// Resolve a ticker to its zero-padded CIK, warming the LRU cache from
    /// the SEC company-tickers table on a miss.
    async fn resolve_cik(&self, symbol: &str) -> Result<Option<String>> {
        if let Some(cik) = self.cik_cache.lock().get(symbol) {
            return Ok(Some(cik));
        }

        let body = self
            .get_json(&format!("{SEC_API_BASE}/files/company_tickers.json"))
            .await?;
        let Some(entries) = body.as_object() else {
            return Ok(None);
        };

        for entry in entries.values() {
            let ticker = entry["ticker"].as_str().unwrap_or_default();
            if ticker.eq_ignore_ascii_case(symbol) {
                let cik = entry["cik_str"].as_u64().unwrap_or(0);
                if cik == 0 {
                    return Ok(None);
                }
                let padded = format!("{cik:010}");
                self.cik_cache.lock().insert(symbol, padded.clone());
                info!(symbol, cik = %padded, "CIK resolved");
                return Ok(Some(padded));
            }
        }
        warn!(symbol, "symbol not present in SEC ticker table");
        Ok(None)
    }

    async fn fetch_filings(
        &self,
        cik: &str,
        lookback_days: i64,
        max_filings: usize,
    ) -> Result<Vec<Filing>> {
        let body = self
            .get_json(&format!("{SEC_API_BASE}/submissions/CIK{cik}.json"))
            .await?;
        let recent = &body["filings"]["recent"];

        let forms = recent["form"].as_array().cloned().unwrap_or_default();
        let dates = recent["filingDate"].as_array().cloned().unwrap_or_default();
        let cutoff = (Utc::now() - Duration::days(lookback_days)).date_naive();

        let mut filings = Vec::new();
        for (i, form_val) in forms.iter().enumerate() {
            let form = form_val.as_str().unwrap_or_default().to_string();
            let date_str = dates
                .get(i)
                .and_then(|d| d.as_str())
                .unwrap_or_default()
                .to_string();

            let Ok(date) = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d") else {
                continue;
            };
            if date < cutoff || !is_relevant_form(&form) {
                continue;
            }

            let description = form_description(&form).to_string();
            filings.push(Filing {
                form,
                filing_date: date_str,
                description,
            });
            if filings.len() >= max_filings {
                break;
            }
        }
        Ok(filings)
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let mut last_err = MeridianError::TransientIo("no attempts".into());
        for attempt in 1..=ANALYZER_ATTEMPTS {
            self.limiter.acquire().await;
            match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp.json().await?),
                Ok(resp) => {
                    last_err = MeridianError::TransientIo(format!(
                        "SEC API {url} returned {}",
                        resp.status()
                    ));
                }
                Err(e) => last_err = e.into(),
            }
            if attempt < ANALYZER_ATTEMPTS {
                tokio::time::sleep(std::time::Duration::from_millis(500 * attempt as u64)).await;
            }
        }
        Err(last_err)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    // ---- score_filing ----------------------------------------------------

    #[test]
    fn base_scores_by_form() {
        assert_eq!(score_filing("8-K", "Material Event"), 0.0);
        assert!((score_filing("10-Q", "Quarterly Report") - 0.1).abs() < 1e-9);
        assert!((score_filing("10-K", "Annual Report") - 0.1).abs() < 1e-9);
        assert_eq!(score_filing("4", "Insider Trading"), 0.0);
        assert!((score_filing("SC 13G", "Large Ownership") - 0.2).abs() < 1e-9);
        assert!((score_filing("S-1", "IPO Registration") - 0.3).abs() < 1e-9);
    }

    #[test]
    fn keywords_adjust_score() {
        // "growth" (+0.2) on a 10-Q base of +0.1.
        let score = score_filing("10-Q", "Quarterly report shows record growth");
        assert!((score - 0.5).abs() < 1e-9); // 0.1 + 0.2 (record) + 0.2 (growth)

        let score = score_filing("8-K", "Investigation and lawsuit announced");
        assert!((score - (-0.4)).abs() < 1e-9);
    }

    #[test]
    fn score_is_clamped() {
        let description = "record growth strong increase positive dividend buyback upgrade";
        assert_eq!(score_filing("S-1", description), 1.0);

        let description = "miss decline weak loss lawsuit investigation warning downgrade";
        assert_eq!(score_filing("8-K", description), -1.0);
    }

    #[test]
    fn relevant_form_filter() {
        assert!(is_relevant_form("8-K"));
        assert!(is_relevant_form("8-K/A"));
        assert!(is_relevant_form("DEF 14A"));
        assert!(!is_relevant_form("424B2"));
    }

    // ---- CikCache --------------------------------------------------------

    #[test]
    fn cik_cache_hits_and_misses() {
        let mut cache = CikCache::new(8);
        assert!(cache.get("TSLA").is_none());
        cache.insert("TSLA", "0001318605".to_string());
        assert_eq!(cache.get("TSLA").unwrap(), "0001318605");
    }

    #[test]
    fn cik_cache_evicts_least_recently_used() {
        let mut cache = CikCache::new(2);
        cache.insert("AAA", "0000000001".into());
        cache.insert("BBB", "0000000002".into());
        // Touch AAA so BBB becomes the eviction candidate.
        cache.get("AAA");
        cache.insert("CCC", "0000000003".into());

        assert!(cache.get("BBB").is_none());
        assert!(cache.get("AAA").is_some());
        assert!(cache.get("CCC").is_some());
        assert_eq!(cache.len(), 2);
    }
}
