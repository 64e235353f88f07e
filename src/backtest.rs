// =============================================================================
// Backtest engine — deterministic replay of the decision pipeline
// =============================================================================
//
// Replays stored bars in ascending time through the same technical analyzer
// and decision maker the live pipeline uses, joining stored sentiment on
// exact bar timestamps (no forward-fill). All analytics are computed locally
// over a sliding window; the inner loop does no I/O. Results and every
// simulated trade persist atomically on completion; a run that cannot start
// records a failed row.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{AgentConfig, ConfigStore};
use crate::decision::DecisionMaker;
use crate::error::{MeridianError, Result};
use crate::market_data::MarketContext;
use crate::sentiment::aggregator::{fuse, SourceWeights};
use crate::sentiment::SourceSentiment;
use crate::store::{BacktestRunRow, BacktestTradeRow, SentimentRecord, Store};
use crate::technical::TechnicalAnalyzer;
use crate::types::{is_crypto_symbol, SignalKind, TradeAction};

/// Bars consumed before trading starts, to bootstrap the indicators.
const WARMUP_BARS: usize = 50;
/// Sliding context window.
const CONTEXT_WINDOW: usize = 100;
/// Confidence gate applied during replay.
const BACKTEST_MIN_CONFIDENCE: f64 = 0.6;
/// Annual risk-free rate used by the Sharpe ratio.
const RISK_FREE_RATE: f64 = 0.02;

// ---------------------------------------------------------------------------
// Portfolio simulation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct SimPosition {
    quantity: f64,
    entry_price: f64,
    current_price: f64,
    #[allow(dead_code)]
    entry_time: DateTime<Utc>,
}

/// In-memory portfolio: cash plus per-symbol positions. Buys average the
/// entry price; overselling is rejected; cash can never go negative.
#[derive(Debug)]
pub struct Portfolio {
    pub initial_capital: f64,
    pub cash: f64,
    positions: HashMap<String, SimPosition>,
    pub trades: Vec<BacktestTradeRow>,
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            initial_capital,
            cash: initial_capital,
            positions: HashMap::new(),
            trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    pub fn position_quantity(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).map(|p| p.quantity).unwrap_or(0.0)
    }

    pub fn total_value(&self) -> f64 {
        self.cash
            + self
                .positions
                .values()
                .map(|p| p.quantity * p.current_price)
                .sum::<f64>()
    }

    /// Mark positions to the bar close and append an equity point.
    pub fn mark_to_market(&mut self, symbol: &str, price: f64, timestamp: DateTime<Utc>) {
        if let Some(pos) = self.positions.get_mut(symbol) {
            pos.current_price = price;
        }
        self.equity_curve.push((timestamp, self.total_value()));
    }

    /// Buy, averaging into any existing position. Fails silently (returns
    /// false) when cash is insufficient.
    pub fn buy(
        &mut self,
        symbol: &str,
        price: f64,
        quantity: f64,
        timestamp: DateTime<Utc>,
    ) -> bool {
        let cost = price * quantity;
        if cost > self.cash || quantity <= 0.0 {
            warn!(symbol, cost, cash = self.cash, "buy skipped: insufficient cash");
            return false;
        }
        self.cash -= cost;

        match self.positions.get_mut(symbol) {
            Some(pos) => {
                let total_quantity = pos.quantity + quantity;
                let total_cost = pos.entry_price * pos.quantity + cost;
                pos.quantity = total_quantity;
                pos.entry_price = total_cost / total_quantity;
                pos.current_price = price;
            }
            None => {
                self.positions.insert(
                    symbol.to_string(),
                    SimPosition {
                        quantity,
                        entry_price: price,
                        current_price: price,
                        entry_time: timestamp,
                    },
                );
            }
        }

        self.trades.push(BacktestTradeRow {
            timestamp,
            action: TradeAction::Buy,
            symbol: symbol.to_string(),
            quantity,
            price,
            pnl: None,
            portfolio_value: Some(self.total_value()),
            cash_balance: Some(self.cash),
        });
        true
    }

    /// Sell up to the held quantity; selling more than held is rejected.
    pub fn sell(
        &mut self,
        symbol: &str,
        price: f64,
        quantity: f64,
        timestamp: DateTime<Utc>,
    ) -> bool {
        let Some(pos) = self.positions.get_mut(symbol) else {
            warn!(symbol, "sell skipped: no position");
            return false;
        };
        if quantity > pos.quantity || quantity <= 0.0 {
            warn!(
                symbol,
                requested = quantity,
                held = pos.quantity,
                "sell skipped: quantity exceeds position"
            );
            return false;
        }

        let proceeds = price * quantity;
        let pnl = (price - pos.entry_price) * quantity;
        self.cash += proceeds;

        if (pos.quantity - quantity).abs() < 1e-12 {
            self.positions.remove(symbol);
        } else {
            pos.quantity -= quantity;
            pos.current_price = price;
        }

        self.trades.push(BacktestTradeRow {
            timestamp,
            action: TradeAction::Sell,
            symbol: symbol.to_string(),
            quantity,
            price,
            pnl: Some(pnl),
            portfolio_value: Some(self.total_value()),
            cash_balance: Some(self.cash),
        });
        true
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub initial_capital: f64,
    pub final_capital: f64,
    pub total_return_pct: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_trade_pnl: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
}

/// Peak-to-trough decline over the equity curve, as a percentage.
pub fn max_drawdown(equity_curve: &[(DateTime<Utc>, f64)]) -> f64 {
    let mut peak = match equity_curve.first() {
        Some((_, v)) => *v,
        None => return 0.0,
    };
    let mut max_dd: f64 = 0.0;
    for (_, value) in equity_curve {
        if *value > peak {
            peak = *value;
        }
        if peak > 0.0 {
            max_dd = max_dd.max((peak - value) / peak);
        }
    }
    max_dd * 100.0
}

/// Annualized Sharpe ratio over bar-to-bar returns. Zero when there are
/// fewer than two equity points or the returns have no variance.
pub fn sharpe_ratio(equity_curve: &[(DateTime<Utc>, f64)], risk_free_rate: f64) -> f64 {
    if equity_curve.len() < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .filter(|w| w[0].1 > 0.0)
        .map(|w| (w[1].1 - w[0].1) / w[0].1)
        .collect();
    if returns.is_empty() {
        return 0.0;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let std = variance.sqrt();
    if std == 0.0 {
        return 0.0;
    }
    (mean - risk_free_rate / 252.0) / std * (252.0f64).sqrt()
}

fn compute_metrics(portfolio: &Portfolio) -> BacktestMetrics {
    let sells: Vec<&BacktestTradeRow> = portfolio
        .trades
        .iter()
        .filter(|t| t.action == TradeAction::Sell)
        .collect();

    let total_trades = sells.len();
    let winning_trades = sells.iter().filter(|t| t.pnl.unwrap_or(0.0) > 0.0).count();
    let losing_trades = sells.iter().filter(|t| t.pnl.unwrap_or(0.0) < 0.0).count();
    let total_pnl: f64 = sells.iter().map(|t| t.pnl.unwrap_or(0.0)).sum();

    let final_capital = portfolio.total_value();
    let total_return_pct = if portfolio.initial_capital > 0.0 {
        (final_capital - portfolio.initial_capital) / portfolio.initial_capital * 100.0
    } else {
        0.0
    };

    BacktestMetrics {
        initial_capital: portfolio.initial_capital,
        final_capital,
        total_return_pct,
        total_trades,
        winning_trades,
        losing_trades,
        win_rate: if total_trades > 0 {
            winning_trades as f64 / total_trades as f64
        } else {
            0.0
        },
        avg_trade_pnl: if total_trades > 0 {
            total_pnl / total_trades as f64
        } else {
            0.0
        },
        max_drawdown: max_drawdown(&portfolio.equity_curve),
        sharpe_ratio: sharpe_ratio(&portfolio.equity_curve, RISK_FREE_RATE),
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct BacktestResults {
    pub run_id: i64,
    pub metrics: BacktestMetrics,
    pub trades: Vec<BacktestTradeRow>,
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
}

pub struct BacktestEngine {
    store: Arc<Store>,
    config_store: ConfigStore,
    weights: SourceWeights,
}

impl BacktestEngine {
    pub fn new(store: Arc<Store>, config_store: ConfigStore) -> Self {
        Self {
            store,
            config_store,
            weights: SourceWeights::default(),
        }
    }

    /// Replay `[start, end]` for one agent and persist the run.
    pub fn run(
        &self,
        agent_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BacktestResults> {
        let config = self.config_store.load_agent_config(agent_id)?;
        let symbol = config.agent.asset.clone();
        let timeframe = config.strategy.timeframe.clone();
        let initial_capital = if config.performance.allocated_capital > 0.0 {
            config.performance.allocated_capital
        } else {
            10_000.0
        };

        info!(
            agent_id,
            symbol = %symbol,
            timeframe = %timeframe,
            start = %start,
            end = %end,
            initial_capital,
            "backtest starting"
        );

        let bars = self.store.query_bars(&symbol, &timeframe, start, end)?;
        if bars.len() < WARMUP_BARS {
            // Record the failure so operators can see the attempt.
            let failed = self.run_row(&config, start, end, initial_capital, None, "failed");
            self.store.save_backtest(&failed, &[])?;
            return Err(MeridianError::DataGap(format!(
                "insufficient data: only {} bars for {symbol} (need {WARMUP_BARS})",
                bars.len()
            )));
        }

        // Sentiment joined on exact bar timestamps.
        let sentiment_rows = self.store.query_sentiment_range(&symbol, start, end)?;
        let mut sentiment_at: HashMap<DateTime<Utc>, Vec<SentimentRecord>> = HashMap::new();
        for row in sentiment_rows {
            sentiment_at.entry(row.timestamp).or_default().push(row);
        }

        let maker = DecisionMaker::default();
        let mut risk = config.risk.clone();
        risk.min_confidence = BACKTEST_MIN_CONFIDENCE;

        let mut portfolio = Portfolio::new(initial_capital);

        for i in 0..bars.len() {
            let bar = &bars[i];
            let price = bar.close;
            portfolio.mark_to_market(&symbol, price, bar.timestamp);

            if i < WARMUP_BARS {
                continue;
            }

            // Slice context over the trailing window, analytics computed
            // locally.
            let window_start = (i + 1).saturating_sub(CONTEXT_WINDOW);
            let window = bars[window_start..=i].to_vec();
            let context =
                MarketContext::from_bars(&symbol, &timeframe, bar.timestamp, price, window);

            let technical = TechnicalAnalyzer::analyze(&context);

            let sentiment = match sentiment_at.get(&bar.timestamp) {
                Some(rows) => fuse(
                    rows.iter()
                        .map(|r| (self.source_weight(&r.source), to_source_sentiment(r)))
                        .collect(),
                ),
                None => fuse(Vec::new()),
            };

            let decision = match maker.decide(
                &symbol,
                sentiment.score,
                sentiment.confidence,
                technical.overall_signal,
                technical.overall_confidence,
                price,
                portfolio.total_value(),
                &risk,
            ) {
                Ok(d) => d,
                Err(e) => {
                    // Bad data mid-replay: record the failure and stop.
                    let failed =
                        self.run_row(&config, start, end, initial_capital, None, "failed");
                    self.store.save_backtest(&failed, &[])?;
                    return Err(e);
                }
            };

            // Act only on confident, non-neutral readings.
            if decision.confidence < BACKTEST_MIN_CONFIDENCE
                || technical.overall_signal == SignalKind::Neutral
            {
                continue;
            }

            let held = portfolio.position_quantity(&symbol);
            if decision.action == TradeAction::Buy && held == 0.0 {
                let quantity = clamp_quantity(&symbol, decision.quantity);
                portfolio.buy(&symbol, price, quantity, bar.timestamp);
            } else if technical.overall_signal == SignalKind::Bearish && held > 0.0 {
                // Bearish with a position on: close the whole thing.
                portfolio.sell(&symbol, price, held, bar.timestamp);
            }
        }

        let metrics = compute_metrics(&portfolio);
        let run = self.run_row(&config, start, end, initial_capital, Some(&metrics), "completed");
        let run_id = self.store.save_backtest(&run, &portfolio.trades)?;

        info!(
            agent_id,
            run_id,
            trades = metrics.total_trades,
            return_pct = metrics.total_return_pct,
            win_rate = metrics.win_rate,
            max_drawdown = metrics.max_drawdown,
            sharpe = metrics.sharpe_ratio,
            "backtest complete"
        );

        Ok(BacktestResults {
            run_id,
            metrics,
            trades: portfolio.trades,
            equity_curve: portfolio.equity_curve,
        })
    }

    fn source_weight(&self, source: &str) -> f64 {
        match source {
            "news" => self.weights.news,
            "reddit" => self.weights.reddit,
            "sec" => self.weights.sec,
            _ => 0.0,
        }
    }

    fn run_row(
        &self,
        config: &AgentConfig,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        initial_capital: f64,
        metrics: Option<&BacktestMetrics>,
        status: &str,
    ) -> BacktestRunRow {
        BacktestRunRow {
            id: 0,
            agent_id: config.agent.id.clone(),
            start_date: start,
            end_date: end,
            initial_capital,
            final_capital: metrics.map(|m| m.final_capital),
            total_return_pct: metrics.map(|m| m.total_return_pct),
            total_trades: metrics.map(|m| m.total_trades as i64),
            winning_trades: metrics.map(|m| m.winning_trades as i64),
            losing_trades: metrics.map(|m| m.losing_trades as i64),
            max_drawdown: metrics.map(|m| m.max_drawdown),
            sharpe_ratio: metrics.map(|m| m.sharpe_ratio),
            win_rate: metrics.map(|m| m.win_rate),
            avg_trade_pnl: metrics.map(|m| m.avg_trade_pnl),
            config: serde_json::to_value(config).unwrap_or(serde_json::Value::Null),
            status: status.to_string(),
        }
    }
}

/// Quantity rules per asset class, re-applied defensively at the portfolio
/// boundary.
fn clamp_quantity(symbol: &str, quantity: f64) -> f64 {
    if is_crypto_symbol(symbol) {
        (quantity * 1e8).round() / 1e8
    } else {
        quantity.trunc().max(1.0)
    }
}

fn to_source_sentiment(record: &SentimentRecord) -> SourceSentiment {
    SourceSentiment {
        source: record.source.clone(),
        sentiment: record.sentiment,
        score: record.score,
        confidence: record.confidence,
        item_count: 0,
        trending_score: None,
        metadata: record.metadata.clone(),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AgentIdentity, AgentStatus, PerformanceSection, RiskParams, StrategySection,
    };
    use crate::types::{Bar, SentimentLabel};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn at(i: usize) -> DateTime<Utc> {
        t0() + Duration::minutes(15 * i as i64)
    }

    fn bars(symbol: &str, closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                symbol: symbol.into(),
                timestamp: at(i),
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

    fn setup(symbol: &str) -> (BacktestEngine, Arc<Store>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config_store = ConfigStore::new(dir.path());
        config_store
            .save_agent_config(&AgentConfig {
                agent: AgentIdentity {
                    id: "a1".into(),
                    asset: symbol.into(),
                    status: AgentStatus::Active,
                },
                strategy: StrategySection::default(),
                risk: RiskParams {
                    max_position_size: 5_000.0,
                    ..RiskParams::default()
                },
                performance: PerformanceSection {
                    allocated_capital: 10_000.0,
                },
                personality: String::new(),
            })
            .unwrap();

        let store = Arc::new(Store::open_in_memory().unwrap());
        let engine = BacktestEngine::new(store.clone(), config_store);
        (engine, store, dir)
    }

    /// Rising closes with strong positive sentiment at every bar.
    fn seed_bullish(store: &Store, symbol: &str, count: usize) {
        let closes: Vec<f64> = (0..count).map(|i| 100.0 + i as f64 * 0.5).collect();
        store.upsert_bars(&bars(symbol, &closes)).unwrap();

        let records: Vec<SentimentRecord> = (0..count)
            .map(|i| SentimentRecord {
                symbol: symbol.into(),
                timestamp: at(i),
                source: "news".into(),
                sentiment: SentimentLabel::Positive,
                score: 0.8,
                confidence: 0.9,
                metadata: serde_json::Value::Null,
            })
            .collect();
        store.upsert_sentiments(&records).unwrap();
    }

    // ---- portfolio -------------------------------------------------------

    #[test]
    fn portfolio_buy_averages_entry() {
        let mut p = Portfolio::new(10_000.0);
        assert!(p.buy("TSLA", 100.0, 10.0, at(0)));
        assert!(p.buy("TSLA", 110.0, 10.0, at(1)));
        assert_eq!(p.position_quantity("TSLA"), 20.0);
        // Average entry (100*10 + 110*10) / 20 = 105.
        let pos = p.positions.get("TSLA").unwrap();
        assert!((pos.entry_price - 105.0).abs() < 1e-9);
        assert!((p.cash - 7_900.0).abs() < 1e-9);
    }

    #[test]
    fn portfolio_rejects_buy_beyond_cash() {
        let mut p = Portfolio::new(100.0);
        assert!(!p.buy("TSLA", 100.0, 2.0, at(0)));
        assert_eq!(p.cash, 100.0);
        assert!(p.trades.is_empty());
    }

    #[test]
    fn portfolio_rejects_overselling() {
        let mut p = Portfolio::new(10_000.0);
        p.buy("TSLA", 100.0, 10.0, at(0));
        assert!(!p.sell("TSLA", 100.0, 11.0, at(1)));
        assert_eq!(p.position_quantity("TSLA"), 10.0);
    }

    #[test]
    fn portfolio_sell_realizes_pnl() {
        let mut p = Portfolio::new(10_000.0);
        p.buy("TSLA", 100.0, 10.0, at(0));
        assert!(p.sell("TSLA", 110.0, 10.0, at(1)));
        assert_eq!(p.position_quantity("TSLA"), 0.0);
        let sell = p.trades.last().unwrap();
        assert!((sell.pnl.unwrap() - 100.0).abs() < 1e-9);
        assert!((p.cash - 10_100.0).abs() < 1e-9);
    }

    // ---- metrics ---------------------------------------------------------

    #[test]
    fn drawdown_of_known_curve() {
        let curve = vec![
            (at(0), 100.0),
            (at(1), 120.0),
            (at(2), 90.0), // 25% off the 120 peak
            (at(3), 130.0),
        ];
        assert!((max_drawdown(&curve) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn drawdown_of_monotonic_curve_is_zero() {
        let curve = vec![(at(0), 100.0), (at(1), 110.0), (at(2), 120.0)];
        assert_eq!(max_drawdown(&curve), 0.0);
    }

    #[test]
    fn sharpe_zero_cases() {
        assert_eq!(sharpe_ratio(&[], RISK_FREE_RATE), 0.0);
        assert_eq!(sharpe_ratio(&[(at(0), 100.0)], RISK_FREE_RATE), 0.0);
        // Flat curve: std = 0.
        let flat = vec![(at(0), 100.0), (at(1), 100.0), (at(2), 100.0)];
        assert_eq!(sharpe_ratio(&flat, RISK_FREE_RATE), 0.0);
    }

    #[test]
    fn sharpe_positive_for_steady_growth() {
        let curve: Vec<(DateTime<Utc>, f64)> = (0..20)
            .map(|i| (at(i), 100.0 * (1.0 + 0.01 * i as f64)))
            .collect();
        assert!(sharpe_ratio(&curve, RISK_FREE_RATE) > 0.0);
    }

    // ---- engine ----------------------------------------------------------

    #[test]
    fn insufficient_data_fails_and_records_run() {
        let (engine, store, _dir) = setup("TSLA");
        let err = engine.run("a1", t0(), at(100)).unwrap_err();
        assert!(matches!(err, MeridianError::DataGap(_)));
        assert!(err.to_string().contains("insufficient data"));

        let runs = store.list_backtest_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "failed");
        assert!(runs[0].final_capital.is_none());
    }

    #[test]
    fn bullish_replay_opens_a_position() {
        let (engine, store, _dir) = setup("BTC/USD");
        seed_bullish(&store, "BTC/USD", 120);

        let results = engine.run("a1", t0(), at(120)).unwrap();
        assert!(results.run_id > 0);

        let buys: Vec<_> = results
            .trades
            .iter()
            .filter(|t| t.action == TradeAction::Buy)
            .collect();
        assert!(!buys.is_empty(), "expected at least one buy");
        // Buys start only after the warm-up window.
        assert!(buys[0].timestamp >= at(WARMUP_BARS));

        // One equity point per bar.
        assert_eq!(results.equity_curve.len(), 120);

        // Trades were persisted with the run.
        let stored = store.backtest_trades(results.run_id).unwrap();
        assert_eq!(stored.len(), results.trades.len());
        let run = store.get_backtest_run(results.run_id).unwrap().unwrap();
        assert_eq!(run.status, "completed");
        assert_eq!(run.total_trades, Some(results.metrics.total_trades as i64));
    }

    #[test]
    fn replay_is_deterministic() {
        let (engine, store, _dir) = setup("BTC/USD");
        seed_bullish(&store, "BTC/USD", 120);

        let first = engine.run("a1", t0(), at(120)).unwrap();
        let second = engine.run("a1", t0(), at(120)).unwrap();
        assert_eq!(first.trades.len(), second.trades.len());
        assert!((first.metrics.final_capital - second.metrics.final_capital).abs() < 1e-9);
        assert!((first.metrics.total_return_pct - second.metrics.total_return_pct).abs() < 1e-9);
    }

    #[test]
    fn crypto_positions_are_fractional() {
        let (engine, store, _dir) = setup("BTC/USD");
        // High-priced asset: integer sizing would never fit the budget.
        let closes: Vec<f64> = (0..120).map(|i| 60_000.0 + i as f64 * 300.0).collect();
        store.upsert_bars(&bars("BTC/USD", &closes)).unwrap();
        let records: Vec<SentimentRecord> = (0..120)
            .map(|i| SentimentRecord {
                symbol: "BTC/USD".into(),
                timestamp: at(i),
                source: "news".into(),
                sentiment: SentimentLabel::Positive,
                score: 0.8,
                confidence: 0.9,
                metadata: serde_json::Value::Null,
            })
            .collect();
        store.upsert_sentiments(&records).unwrap();

        let results = engine.run("a1", t0(), at(120)).unwrap();
        let buy = results
            .trades
            .iter()
            .find(|t| t.action == TradeAction::Buy)
            .expect("expected a buy");
        assert!(buy.quantity < 1.0);
        assert!(buy.quantity > 0.0);
    }

    #[test]
    fn cash_never_goes_negative_through_replay() {
        let (engine, store, _dir) = setup("BTC/USD");
        seed_bullish(&store, "BTC/USD", 150);
        let results = engine.run("a1", t0(), at(150)).unwrap();
        for trade in &results.trades {
            assert!(trade.cash_balance.unwrap() >= -1e-9);
        }
    }
}
