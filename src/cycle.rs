// =============================================================================
// Cycle runner — one traversal of the decision pipeline for one agent
// =============================================================================
//
// Stages run as a fixed DAG over a typed context:
//
//   check_market_hours
//     -> fetch_market_data
//     -> { analyze_sentiment || analyze_technical }   (parallel)
//     -> make_decision
//     -> validate_risk
//     -> execute_trade
//     -> log_performance
//
// A missing quote aborts the cycle without marking error state; missing
// sentiment degrades to score 0 / confidence 0. Every stage's outcome and
// timing is recorded in the report, and every completed cycle writes one
// decision-history row whether or not a trade happened.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ConfigStore;
use crate::decision::{Decision, DecisionMaker};
use crate::executor::{ExecutionOutcome, TradeExecutor};
use crate::market_data::MarketDataProvider;
use crate::market_hours::is_market_open;
use crate::risk_validator::{validate, Verdict};
use crate::sentiment::{AggregatedSentiment, SentimentAggregator, SentimentWindows};
use crate::store::{DecisionRecord, SentimentRecord, Store};
use crate::technical::{TechnicalAnalysis, TechnicalAnalyzer};
use crate::error::Result;

/// Bars of history requested per cycle.
const CYCLE_LOOKBACK: usize = 100;

/// How one cycle ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Completed,
    /// Equity market closed; nothing ran. Not an error.
    MarketClosed,
    /// A stage could not proceed; the reason names the stage.
    Aborted { stage: String, reason: String },
}

/// Timing and outcome of one stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub name: String,
    pub ok: bool,
    pub elapsed_ms: f64,
    pub detail: String,
}

/// Everything one cycle produced.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub agent_id: String,
    pub symbol: String,
    pub status: CycleStatus,
    pub stages: Vec<StageOutcome>,
    pub decision: Option<Decision>,
    pub approved: Option<bool>,
    pub rejection_reason: Option<String>,
    pub execution: Option<ExecutionOutcome>,
    pub elapsed_ms: f64,
}

/// Per-run options supplied by the loop (or the CLI).
#[derive(Debug, Clone, Copy)]
pub struct CycleOptions {
    pub dry_run: bool,
    pub market_hours_only: bool,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            market_hours_only: true,
        }
    }
}

pub struct CycleRunner {
    provider: MarketDataProvider,
    aggregator: SentimentAggregator,
    decision_maker: DecisionMaker,
    executor: Arc<TradeExecutor>,
    config_store: ConfigStore,
    store: Arc<Store>,
    windows: SentimentWindows,
}

impl CycleRunner {
    pub fn new(
        provider: MarketDataProvider,
        aggregator: SentimentAggregator,
        executor: Arc<TradeExecutor>,
        config_store: ConfigStore,
        store: Arc<Store>,
    ) -> Self {
        Self {
            provider,
            aggregator,
            decision_maker: DecisionMaker::default(),
            executor,
            config_store,
            store,
            windows: SentimentWindows::default(),
        }
    }

    /// Run one full cycle for `agent_id`.
    pub async fn run_cycle(&self, agent_id: &str, options: CycleOptions) -> Result<CycleReport> {
        let cycle_start = std::time::Instant::now();
        let config = self.config_store.load_agent_config(agent_id)?;
        let symbol = config.agent.asset.clone();
        let mut stages: Vec<StageOutcome> = Vec::new();

        let report = |status: CycleStatus,
                          stages: Vec<StageOutcome>,
                          decision: Option<Decision>,
                          approved: Option<bool>,
                          rejection_reason: Option<String>,
                          execution: Option<ExecutionOutcome>| {
            CycleReport {
                agent_id: agent_id.to_string(),
                symbol: symbol.clone(),
                status,
                stages,
                decision,
                approved,
                rejection_reason,
                execution,
                elapsed_ms: cycle_start.elapsed().as_secs_f64() * 1000.0,
            }
        };

        // -- 1. check_market_hours ----------------------------------------
        let stage_start = std::time::Instant::now();
        let open = !options.market_hours_only || is_market_open(&symbol, Utc::now());
        stages.push(StageOutcome {
            name: "check_market_hours".into(),
            ok: true,
            elapsed_ms: stage_start.elapsed().as_secs_f64() * 1000.0,
            detail: if open { "open".into() } else { "closed".into() },
        });
        if !open {
            info!(agent_id, symbol = %symbol, "market closed — skipping cycle");
            return Ok(report(CycleStatus::MarketClosed, stages, None, None, None, None));
        }

        // -- 2. fetch_market_data -----------------------------------------
        let stage_start = std::time::Instant::now();
        let context = self
            .provider
            .get_market_context(&symbol, &config.strategy.timeframe, CYCLE_LOOKBACK)
            .await?;
        let market_ok = context.data_available;
        stages.push(StageOutcome {
            name: "fetch_market_data".into(),
            ok: market_ok,
            elapsed_ms: stage_start.elapsed().as_secs_f64() * 1000.0,
            detail: format!(
                "price={:.2} bars={}",
                context.current_price,
                context.bars.len()
            ),
        });
        if !market_ok {
            warn!(agent_id, symbol = %symbol, "no market data — aborting cycle");
            return Ok(report(
                CycleStatus::Aborted {
                    stage: "fetch_market_data".into(),
                    reason: "no quote or bar history available".into(),
                },
                stages,
                None,
                None,
                None,
                None,
            ));
        }
        let current_price = context.current_price;

        // -- 3. analyze_sentiment || analyze_technical ---------------------
        let stage_start = std::time::Instant::now();
        let sentiment_fut = self.aggregator.aggregate(&symbol, &self.windows);
        let technical_fut = async { TechnicalAnalyzer::analyze(&context) };
        let (sentiment, technical): (AggregatedSentiment, TechnicalAnalysis) =
            tokio::join!(sentiment_fut, technical_fut);
        let gather_ms = stage_start.elapsed().as_secs_f64() * 1000.0;

        stages.push(StageOutcome {
            name: "analyze_sentiment".into(),
            // Empty sentiment degrades the decision inputs; it is not a
            // stage failure.
            ok: true,
            elapsed_ms: gather_ms,
            detail: format!(
                "score={:.3} confidence={:.2} sources={}",
                sentiment.score,
                sentiment.confidence,
                sentiment.sources_used.len()
            ),
        });
        stages.push(StageOutcome {
            name: "analyze_technical".into(),
            ok: true,
            elapsed_ms: technical.computation_time_ms,
            detail: format!(
                "signal={} confidence={:.2}",
                technical.overall_signal, technical.overall_confidence
            ),
        });

        self.persist_sentiment(&symbol, &sentiment);

        // -- 4. make_decision ----------------------------------------------
        let stage_start = std::time::Instant::now();
        let decision = self.decision_maker.decide(
            &symbol,
            sentiment.score,
            sentiment.confidence,
            technical.overall_signal,
            technical.overall_confidence,
            current_price,
            config.performance.allocated_capital,
            &config.risk,
        );
        let decision = match decision {
            Ok(d) => d,
            Err(e) => {
                stages.push(StageOutcome {
                    name: "make_decision".into(),
                    ok: false,
                    elapsed_ms: stage_start.elapsed().as_secs_f64() * 1000.0,
                    detail: e.to_string(),
                });
                warn!(agent_id, error = %e, "decision stage failed — aborting cycle");
                return Ok(report(
                    CycleStatus::Aborted {
                        stage: "make_decision".into(),
                        reason: e.to_string(),
                    },
                    stages,
                    None,
                    None,
                    None,
                    None,
                ));
            }
        };
        stages.push(StageOutcome {
            name: "make_decision".into(),
            ok: true,
            elapsed_ms: stage_start.elapsed().as_secs_f64() * 1000.0,
            detail: format!(
                "{} qty={} confidence={:.2}",
                decision.action, decision.quantity, decision.confidence
            ),
        });

        // -- 5. validate_risk ----------------------------------------------
        let stage_start = std::time::Instant::now();
        let state = self.config_store.load_agent_state(agent_id, &symbol)?;
        let verdict: Verdict = validate(&config, &state, &decision, current_price);
        stages.push(StageOutcome {
            name: "validate_risk".into(),
            ok: verdict.approved,
            elapsed_ms: stage_start.elapsed().as_secs_f64() * 1000.0,
            detail: verdict.reason.clone(),
        });

        // -- 6. execute_trade ----------------------------------------------
        let execution = if verdict.approved {
            let stage_start = std::time::Instant::now();
            match self
                .executor
                .execute(agent_id, &decision, current_price, options.dry_run)
                .await
            {
                Ok(outcome) => {
                    stages.push(StageOutcome {
                        name: "execute_trade".into(),
                        ok: outcome.success,
                        elapsed_ms: stage_start.elapsed().as_secs_f64() * 1000.0,
                        detail: outcome.message.clone(),
                    });
                    Some(outcome)
                }
                Err(e) => {
                    stages.push(StageOutcome {
                        name: "execute_trade".into(),
                        ok: false,
                        elapsed_ms: stage_start.elapsed().as_secs_f64() * 1000.0,
                        detail: e.to_string(),
                    });
                    warn!(agent_id, error = %e, "execution stage failed");
                    None
                }
            }
        } else {
            info!(agent_id, reason = %verdict.reason, "trade rejected by risk validator");
            None
        };

        // -- 7. log_performance --------------------------------------------
        let stage_start = std::time::Instant::now();
        let record = DecisionRecord {
            timestamp: Utc::now(),
            agent_id: agent_id.to_string(),
            symbol: symbol.clone(),
            decision: decision.action,
            confidence: decision.confidence,
            sentiment_score: Some(sentiment.score),
            sentiment_confidence: Some(sentiment.confidence),
            sentiment_sources: sentiment.sources_used.clone(),
            technical_signal: Some(technical.overall_signal),
            technical_confidence: Some(technical.overall_confidence),
            quantity: Some(decision.quantity),
            price: Some(current_price),
            stop_loss: decision.stop_loss,
            rationale: Some(decision.rationale.clone()),
            trade_approved: verdict.approved,
            rejection_reason: (!verdict.approved).then(|| verdict.reason.clone()),
            trade_executed: execution
                .as_ref()
                .map(|e| e.success && !e.dry_run && decision.action != crate::types::TradeAction::Hold)
                .unwrap_or(false),
            order_id: execution.as_ref().and_then(|e| e.order_id.clone()),
        };
        let log_ok = match self.store.insert_decision(&record) {
            Ok(()) => true,
            Err(e) => {
                warn!(agent_id, error = %e, "failed to persist decision record");
                false
            }
        };
        stages.push(StageOutcome {
            name: "log_performance".into(),
            ok: log_ok,
            elapsed_ms: stage_start.elapsed().as_secs_f64() * 1000.0,
            detail: "decision recorded".into(),
        });

        info!(
            agent_id,
            symbol = %symbol,
            action = %decision.action,
            approved = verdict.approved,
            elapsed_ms = cycle_start.elapsed().as_secs_f64() * 1000.0,
            "cycle complete"
        );

        Ok(report(
            CycleStatus::Completed,
            stages,
            Some(decision),
            Some(verdict.approved),
            (!verdict.approved).then_some(verdict.reason),
            execution,
        ))
    }

    /// Persist each contributing source's summary at the cycle timestamp.
    fn persist_sentiment(&self, symbol: &str, sentiment: &AggregatedSentiment) {
        if sentiment.breakdown.is_empty() {
            return;
        }
        let now = Utc::now();
        let records: Vec<SentimentRecord> = sentiment
            .breakdown
            .iter()
            .map(|s| SentimentRecord {
                symbol: symbol.to_string(),
                timestamp: now,
                source: s.source.clone(),
                sentiment: s.sentiment,
                score: s.score,
                confidence: s.confidence,
                metadata: s.metadata.clone(),
            })
            .collect();
        if let Err(e) = self.store.upsert_sentiments(&records) {
            warn!(symbol, error = %e, "failed to persist sentiment records");
        }
    }
}

impl CycleStatus {
    /// Whether the loop should record this cycle as a failure.
    pub fn is_error(&self) -> bool {
        matches!(self, CycleStatus::Aborted { .. })
    }
}
