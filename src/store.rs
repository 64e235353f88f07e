// =============================================================================
// SQLite store — the sole owner of durable state
// =============================================================================
//
// A single connection serialized behind a Mutex. All bulk operations run in
// one transaction; every upsert is idempotent on its natural key. Embedded
// migrations apply in lexical filename order exactly once, tracked in the
// schema_migrations table.
//
// Timestamps are stored as fixed-width RFC 3339 UTC strings so that lexical
// ordering matches chronological ordering.
// =============================================================================

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MeridianError, Result};
use crate::types::{Bar, SentimentLabel, SignalKind, TradeAction};

/// Embedded migrations, applied in lexical filename order.
const MIGRATIONS: &[(&str, &str)] = &[
    ("001_market_bars.sql", include_str!("../migrations/001_market_bars.sql")),
    ("002_sentiment_history.sql", include_str!("../migrations/002_sentiment_history.sql")),
    ("003_decision_history.sql", include_str!("../migrations/003_decision_history.sql")),
    ("004_backtests.sql", include_str!("../migrations/004_backtests.sql")),
];

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// One source's sentiment summary at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentRecord {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub sentiment: SentimentLabel,
    pub score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// One decision-cycle outcome, persisted whether or not a trade happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub symbol: String,
    pub decision: TradeAction,
    pub confidence: f64,
    pub sentiment_score: Option<f64>,
    pub sentiment_confidence: Option<f64>,
    pub sentiment_sources: Vec<String>,
    pub technical_signal: Option<SignalKind>,
    pub technical_confidence: Option<f64>,
    pub quantity: Option<f64>,
    pub price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub rationale: Option<String>,
    pub trade_approved: bool,
    pub rejection_reason: Option<String>,
    pub trade_executed: bool,
    pub order_id: Option<String>,
}

/// Persisted backtest run header. Metrics are `None` for failed runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRunRow {
    pub id: i64,
    pub agent_id: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub initial_capital: f64,
    pub final_capital: Option<f64>,
    pub total_return_pct: Option<f64>,
    pub total_trades: Option<i64>,
    pub winning_trades: Option<i64>,
    pub losing_trades: Option<i64>,
    pub max_drawdown: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    pub win_rate: Option<f64>,
    pub avg_trade_pnl: Option<f64>,
    pub config: serde_json::Value,
    pub status: String,
}

/// One simulated fill inside a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestTradeRow {
    pub timestamp: DateTime<Utc>,
    pub action: TradeAction,
    pub symbol: String,
    pub quantity: f64,
    pub price: f64,
    pub pnl: Option<f64>,
    pub portfolio_value: Option<f64>,
    pub cash_balance: Option<f64>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct Store {
    conn: Mutex<Connection>,
}

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MeridianError::Config(format!("bad timestamp in store: {s}: {e}")))
}

fn parse_label(s: &str) -> SentimentLabel {
    match s {
        "positive" => SentimentLabel::Positive,
        "negative" => SentimentLabel::Negative,
        _ => SentimentLabel::Neutral,
    }
}

fn parse_action(s: &str) -> TradeAction {
    match s {
        "buy" => TradeAction::Buy,
        "sell" => TradeAction::Sell,
        _ => TradeAction::Hold,
    }
}

impl Store {
    /// Open (or create) the database at `path` and apply pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_migrations()?;
        Ok(store)
    }

    /// Open an in-memory database. Used by backtests without persistence and
    /// by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_migrations()?;
        Ok(store)
    }

    // -------------------------------------------------------------------------
    // Migrations
    // -------------------------------------------------------------------------

    /// Apply embedded migrations that have not been recorded yet, in lexical
    /// order. Each migration runs in its own transaction together with the
    /// row that records it.
    fn apply_migrations(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                migration_file TEXT NOT NULL UNIQUE,
                applied_at     TEXT NOT NULL
            )",
            [],
        )?;

        for (file, sql) in MIGRATIONS {
            let applied: Option<String> = conn
                .query_row(
                    "SELECT migration_file FROM schema_migrations WHERE migration_file = ?1",
                    params![file],
                    |row| row.get(0),
                )
                .optional()?;
            if applied.is_some() {
                continue;
            }

            let tx = conn.transaction()?;
            tx.execute_batch(sql)?;
            tx.execute(
                "INSERT INTO schema_migrations (migration_file, applied_at) VALUES (?1, ?2)",
                params![file, ts(&Utc::now())],
            )?;
            tx.commit()?;
            info!(migration = %file, "migration applied");
        }
        Ok(())
    }

    /// Filenames of all applied migrations, in application order.
    pub fn applied_migrations(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT migration_file FROM schema_migrations ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Market bars
    // -------------------------------------------------------------------------

    /// Upsert a batch of bars in one transaction. Re-upserting the same batch
    /// is a no-op beyond replacing identical values.
    pub fn upsert_bars(&self, bars: &[Bar]) -> Result<usize> {
        if bars.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO market_bars
                   (symbol, timestamp, timeframe, open, high, low, close, volume, vwap, trade_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT (symbol, timestamp, timeframe) DO UPDATE SET
                   open = excluded.open,
                   high = excluded.high,
                   low = excluded.low,
                   close = excluded.close,
                   volume = excluded.volume,
                   vwap = excluded.vwap,
                   trade_count = excluded.trade_count",
            )?;
            for bar in bars {
                stmt.execute(params![
                    bar.symbol,
                    ts(&bar.timestamp),
                    bar.timeframe,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume as i64,
                    bar.vwap,
                    bar.trade_count.map(|c| c as i64),
                ])?;
            }
        }
        tx.commit()?;
        debug!(count = bars.len(), "bars upserted");
        Ok(bars.len())
    }

    /// Bars in `[t0, t1]` ordered by timestamp ascending.
    pub fn query_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT symbol, timestamp, timeframe, open, high, low, close, volume, vwap, trade_count
             FROM market_bars
             WHERE symbol = ?1 AND timeframe = ?2 AND timestamp BETWEEN ?3 AND ?4
             ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![symbol, timeframe, ts(&t0), ts(&t1)], row_to_bar)?;
        collect_bars(rows)
    }

    /// The most recent `limit` bars, returned oldest-first.
    pub fn latest_bars(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Bar>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT symbol, timestamp, timeframe, open, high, low, close, volume, vwap, trade_count
             FROM market_bars
             WHERE symbol = ?1 AND timeframe = ?2
             ORDER BY timestamp DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![symbol, timeframe, limit as i64], row_to_bar)?;
        let mut bars = collect_bars(rows)?;
        bars.reverse();
        Ok(bars)
    }

    // -------------------------------------------------------------------------
    // Sentiment
    // -------------------------------------------------------------------------

    /// Upsert a batch of sentiment records in one transaction.
    pub fn upsert_sentiments(&self, records: &[SentimentRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO sentiment_history
                   (symbol, timestamp, source, sentiment, score, confidence, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (symbol, timestamp, source) DO UPDATE SET
                   sentiment = excluded.sentiment,
                   score = excluded.score,
                   confidence = excluded.confidence,
                   metadata = excluded.metadata",
            )?;
            for rec in records {
                stmt.execute(params![
                    rec.symbol,
                    ts(&rec.timestamp),
                    rec.source,
                    rec.sentiment.to_string(),
                    rec.score,
                    rec.confidence,
                    rec.metadata.to_string(),
                ])?;
            }
        }
        tx.commit()?;
        debug!(count = records.len(), "sentiment records upserted");
        Ok(records.len())
    }

    /// Latest sentiment rows for a symbol, newest first, optionally filtered
    /// by source.
    pub fn latest_sentiment(
        &self,
        symbol: &str,
        source: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SentimentRecord>> {
        let conn = self.conn.lock();
        match source {
            Some(src) => {
                let mut stmt = conn.prepare(
                    "SELECT symbol, timestamp, source, sentiment, score, confidence, metadata
                     FROM sentiment_history
                     WHERE symbol = ?1 AND source = ?2
                     ORDER BY timestamp DESC LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![symbol, src, limit as i64], row_to_sentiment)?;
                collect_sentiments(rows)
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT symbol, timestamp, source, sentiment, score, confidence, metadata
                     FROM sentiment_history
                     WHERE symbol = ?1
                     ORDER BY timestamp DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![symbol, limit as i64], row_to_sentiment)?;
                collect_sentiments(rows)
            }
        }
    }

    /// All sentiment rows for a symbol in `[t0, t1]`, ascending. Used by the
    /// backtest engine, which joins on exact timestamps.
    pub fn query_sentiment_range(
        &self,
        symbol: &str,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
    ) -> Result<Vec<SentimentRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT symbol, timestamp, source, sentiment, score, confidence, metadata
             FROM sentiment_history
             WHERE symbol = ?1 AND timestamp BETWEEN ?2 AND ?3
             ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![symbol, ts(&t0), ts(&t1)], row_to_sentiment)?;
        collect_sentiments(rows)
    }

    // -------------------------------------------------------------------------
    // Decisions
    // -------------------------------------------------------------------------

    pub fn insert_decision(&self, rec: &DecisionRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO decision_history
               (timestamp, agent_id, symbol, decision, confidence,
                sentiment_score, sentiment_confidence, sentiment_sources,
                technical_signal, technical_confidence,
                quantity, price, stop_loss, rationale,
                trade_approved, rejection_reason, trade_executed, order_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                ts(&rec.timestamp),
                rec.agent_id,
                rec.symbol,
                rec.decision.to_string(),
                rec.confidence,
                rec.sentiment_score,
                rec.sentiment_confidence,
                serde_json::to_string(&rec.sentiment_sources).unwrap_or_else(|_| "[]".into()),
                rec.technical_signal.map(|s| s.to_string()),
                rec.technical_confidence,
                rec.quantity,
                rec.price,
                rec.stop_loss,
                rec.rationale,
                rec.trade_approved as i64,
                rec.rejection_reason,
                rec.trade_executed as i64,
                rec.order_id,
            ],
        )?;
        Ok(())
    }

    /// Most recent decisions, newest first, optionally scoped to one agent.
    pub fn latest_decisions(
        &self,
        agent_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DecisionRecord>> {
        let conn = self.conn.lock();
        let mut query = String::from(
            "SELECT timestamp, agent_id, symbol, decision, confidence,
                    sentiment_score, sentiment_confidence, sentiment_sources,
                    technical_signal, technical_confidence,
                    quantity, price, stop_loss, rationale,
                    trade_approved, rejection_reason, trade_executed, order_id
             FROM decision_history",
        );
        if agent_id.is_some() {
            query.push_str(" WHERE agent_id = ?1 ORDER BY timestamp DESC LIMIT ?2");
        } else {
            query.push_str(" ORDER BY timestamp DESC LIMIT ?1");
        }
        let mut stmt = conn.prepare(&query)?;

        let mapper = |row: &rusqlite::Row<'_>| -> rusqlite::Result<DecisionRecord> {
            let sources: String = row.get(7)?;
            let signal: Option<String> = row.get(8)?;
            Ok(DecisionRecord {
                timestamp: DateTime::parse_from_rfc3339(&row.get::<_, String>(0)?)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                agent_id: row.get(1)?,
                symbol: row.get(2)?,
                decision: parse_action(&row.get::<_, String>(3)?),
                confidence: row.get(4)?,
                sentiment_score: row.get(5)?,
                sentiment_confidence: row.get(6)?,
                sentiment_sources: serde_json::from_str(&sources).unwrap_or_default(),
                technical_signal: signal.map(|s| match s.as_str() {
                    "bullish" => SignalKind::Bullish,
                    "bearish" => SignalKind::Bearish,
                    _ => SignalKind::Neutral,
                }),
                technical_confidence: row.get(9)?,
                quantity: row.get(10)?,
                price: row.get(11)?,
                stop_loss: row.get(12)?,
                rationale: row.get(13)?,
                trade_approved: row.get::<_, i64>(14)? != 0,
                rejection_reason: row.get(15)?,
                trade_executed: row.get::<_, i64>(16)? != 0,
                order_id: row.get(17)?,
            })
        };

        let rows = match agent_id {
            Some(id) => stmt.query_map(params![id, limit as i64], mapper)?,
            None => stmt.query_map(params![limit as i64], mapper)?,
        };
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // -------------------------------------------------------------------------
    // Backtests
    // -------------------------------------------------------------------------

    /// Persist a completed (or failed) run together with all of its trades in
    /// one transaction, returning the run id.
    pub fn save_backtest(
        &self,
        run: &BacktestRunRow,
        trades: &[BacktestTradeRow],
    ) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO backtest_runs
               (agent_id, start_date, end_date, initial_capital, final_capital,
                total_return_pct, total_trades, winning_trades, losing_trades,
                max_drawdown, sharpe_ratio, win_rate, avg_trade_pnl, config, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                run.agent_id,
                ts(&run.start_date),
                ts(&run.end_date),
                run.initial_capital,
                run.final_capital,
                run.total_return_pct,
                run.total_trades,
                run.winning_trades,
                run.losing_trades,
                run.max_drawdown,
                run.sharpe_ratio,
                run.win_rate,
                run.avg_trade_pnl,
                run.config.to_string(),
                run.status,
            ],
        )?;
        let run_id = tx.last_insert_rowid();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO backtest_trades
                   (run_id, timestamp, action, symbol, quantity, price, pnl,
                    portfolio_value, cash_balance)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for trade in trades {
                stmt.execute(params![
                    run_id,
                    ts(&trade.timestamp),
                    trade.action.to_string(),
                    trade.symbol,
                    trade.quantity,
                    trade.price,
                    trade.pnl,
                    trade.portfolio_value,
                    trade.cash_balance,
                ])?;
            }
        }
        tx.commit()?;
        info!(run_id, trades = trades.len(), status = %run.status, "backtest run saved");
        Ok(run_id)
    }

    /// All stored runs, newest first.
    pub fn list_backtest_runs(&self, limit: usize) -> Result<Vec<BacktestRunRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, agent_id, start_date, end_date, initial_capital, final_capital,
                    total_return_pct, total_trades, winning_trades, losing_trades,
                    max_drawdown, sharpe_ratio, win_rate, avg_trade_pnl, config, status
             FROM backtest_runs
             ORDER BY id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_run)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(finish_run(row?)?);
        }
        Ok(out)
    }

    pub fn get_backtest_run(&self, run_id: i64) -> Result<Option<BacktestRunRow>> {
        let conn = self.conn.lock();
        let run = conn
            .query_row(
                "SELECT id, agent_id, start_date, end_date, initial_capital, final_capital,
                        total_return_pct, total_trades, winning_trades, losing_trades,
                        max_drawdown, sharpe_ratio, win_rate, avg_trade_pnl, config, status
                 FROM backtest_runs WHERE id = ?1",
                params![run_id],
                row_to_run,
            )
            .optional()?;
        run.map(finish_run).transpose()
    }

    /// Trades of a run, ordered by timestamp ascending.
    pub fn backtest_trades(&self, run_id: i64) -> Result<Vec<BacktestTradeRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT timestamp, action, symbol, quantity, price, pnl,
                    portfolio_value, cash_balance
             FROM backtest_trades
             WHERE run_id = ?1
             ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, Option<f64>>(5)?,
                row.get::<_, Option<f64>>(6)?,
                row.get::<_, Option<f64>>(7)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (tstamp, action, symbol, quantity, price, pnl, pv, cash) = row?;
            out.push(BacktestTradeRow {
                timestamp: parse_ts(&tstamp)?,
                action: parse_action(&action),
                symbol,
                quantity,
                price,
                pnl,
                portfolio_value: pv,
                cash_balance: cash,
            });
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

type BarTuple = (String, String, String, f64, f64, f64, f64, i64, Option<f64>, Option<i64>);

fn row_to_bar(row: &rusqlite::Row<'_>) -> rusqlite::Result<BarTuple> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn collect_bars(rows: impl Iterator<Item = rusqlite::Result<BarTuple>>) -> Result<Vec<Bar>> {
    let mut out = Vec::new();
    for row in rows {
        let (symbol, tstamp, timeframe, open, high, low, close, volume, vwap, trade_count) = row?;
        out.push(Bar {
            symbol,
            timestamp: parse_ts(&tstamp)?,
            timeframe,
            open,
            high,
            low,
            close,
            volume: volume.max(0) as u64,
            vwap,
            trade_count: trade_count.map(|c| c.max(0) as u64),
        });
    }
    Ok(out)
}

type SentimentTuple = (String, String, String, String, f64, f64, String);

fn row_to_sentiment(row: &rusqlite::Row<'_>) -> rusqlite::Result<SentimentTuple> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn collect_sentiments(
    rows: impl Iterator<Item = rusqlite::Result<SentimentTuple>>,
) -> Result<Vec<SentimentRecord>> {
    let mut out = Vec::new();
    for row in rows {
        let (symbol, tstamp, source, sentiment, score, confidence, metadata) = row?;
        out.push(SentimentRecord {
            symbol,
            timestamp: parse_ts(&tstamp)?,
            source,
            sentiment: parse_label(&sentiment),
            score,
            confidence,
            metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        });
    }
    Ok(out)
}

type RunTuple = (
    i64,
    String,
    String,
    String,
    f64,
    Option<f64>,
    Option<f64>,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    String,
    String,
);

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunTuple> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
        row.get(14)?,
        row.get(15)?,
    ))
}

fn finish_run(t: RunTuple) -> Result<BacktestRunRow> {
    let (
        id,
        agent_id,
        start_date,
        end_date,
        initial_capital,
        final_capital,
        total_return_pct,
        total_trades,
        winning_trades,
        losing_trades,
        max_drawdown,
        sharpe_ratio,
        win_rate,
        avg_trade_pnl,
        config,
        status,
    ) = t;
    Ok(BacktestRunRow {
        id,
        agent_id,
        start_date: parse_ts(&start_date)?,
        end_date: parse_ts(&end_date)?,
        initial_capital,
        final_capital,
        total_return_pct,
        total_trades,
        winning_trades,
        losing_trades,
        max_drawdown,
        sharpe_ratio,
        win_rate,
        avg_trade_pnl,
        config: serde_json::from_str(&config).unwrap_or(serde_json::Value::Null),
        status,
    })
}
