// =============================================================================
// Trade executor — the only component that mutates agent state
// =============================================================================
//
// Holds are logged and nothing more. Dry runs record a simulated fill at the
// current price without touching the broker. Live orders go out as market
// orders (time-in-force: day, stop-loss child on buys); agent state is
// updated only after the broker accepts, and a broker error records a failed
// decision while leaving state untouched.
//
// Two append-only JSONL streams capture everything:
//   logs/decisions/{agent}_{YYYY-MM-DD}.jsonl
//   logs/trades/{YYYY-MM-DD}.jsonl
// =============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::broker::{with_retries, Broker, OrderRequest, OrderSide};
use crate::config::{ConfigStore, PositionLot};
use crate::decision::Decision;
use crate::error::{MeridianError, Result};
use crate::types::{is_crypto_symbol, TradeAction};

/// Broker order submission retries at most twice per cycle.
const ORDER_ATTEMPTS: u32 = 2;

/// Result of one execution attempt, also serialized into the decision log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub message: String,
    pub dry_run: bool,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub filled_price: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

pub struct TradeExecutor {
    broker: Arc<dyn Broker>,
    config_store: ConfigStore,
    logs_dir: PathBuf,
    /// Serializes appends to the shared trades file.
    trades_log_lock: Mutex<()>,
}

impl TradeExecutor {
    pub fn new(broker: Arc<dyn Broker>, config_store: ConfigStore, logs_dir: PathBuf) -> Self {
        Self {
            broker,
            config_store,
            logs_dir,
            trades_log_lock: Mutex::new(()),
        }
    }

    /// Execute a validated decision for an agent.
    pub async fn execute(
        &self,
        agent_id: &str,
        decision: &Decision,
        current_price: f64,
        dry_run: bool,
    ) -> Result<ExecutionOutcome> {
        let config = self.config_store.load_agent_config(agent_id)?;
        let asset = config.agent.asset.clone();

        verify_invariants(&asset, decision)?;

        let outcome = match decision.action {
            TradeAction::Hold => ExecutionOutcome {
                success: true,
                message: "Holding position".to_string(),
                dry_run,
                order_id: None,
                filled_price: None,
                error: None,
            },
            TradeAction::Buy | TradeAction::Sell => {
                if dry_run {
                    self.execute_dry_run(&asset, decision, current_price)
                } else {
                    self.execute_live(agent_id, &asset, decision, current_price)
                        .await?
                }
            }
        };

        self.log_decision(agent_id, decision, &outcome)?;
        Ok(outcome)
    }

    // -------------------------------------------------------------------------
    // Dry-run execution
    // -------------------------------------------------------------------------

    fn execute_dry_run(
        &self,
        asset: &str,
        decision: &Decision,
        current_price: f64,
    ) -> ExecutionOutcome {
        let mut message = format!(
            "DRY RUN: Would {} {} {} at ${current_price:.2}",
            decision.action, decision.quantity, asset
        );
        if let Some(stop) = decision.stop_loss {
            message.push_str(&format!(" with stop loss at ${stop:.2}"));
        }
        info!(asset, action = %decision.action, qty = decision.quantity, "simulated fill");

        ExecutionOutcome {
            success: true,
            message,
            dry_run: true,
            order_id: None,
            filled_price: Some(current_price),
            error: None,
        }
    }

    // -------------------------------------------------------------------------
    // Live execution
    // -------------------------------------------------------------------------

    async fn execute_live(
        &self,
        agent_id: &str,
        asset: &str,
        decision: &Decision,
        current_price: f64,
    ) -> Result<ExecutionOutcome> {
        let side = match decision.action {
            TradeAction::Buy => OrderSide::Buy,
            TradeAction::Sell => OrderSide::Sell,
            TradeAction::Hold => unreachable!("holds never reach live execution"),
        };
        let order = OrderRequest {
            symbol: asset.to_string(),
            qty: decision.quantity,
            side,
            stop_loss: decision.stop_loss,
        };

        let result = with_retries("submit_order", ORDER_ATTEMPTS, || {
            self.broker.submit_order(&order)
        })
        .await;

        match result {
            Ok(accepted) => {
                let filled_price = accepted.filled_avg_price.unwrap_or(current_price);
                self.update_agent_state(agent_id, asset, decision, filled_price, &accepted.id)?;
                self.log_trade(agent_id, decision, filled_price, &accepted.id)?;

                info!(
                    agent_id,
                    asset,
                    action = %decision.action,
                    qty = decision.quantity,
                    order_id = %accepted.id,
                    filled_price,
                    "order accepted"
                );
                Ok(ExecutionOutcome {
                    success: true,
                    message: format!(
                        "{} order submitted: {} {}",
                        decision.action.to_string().to_uppercase(),
                        decision.quantity,
                        asset
                    ),
                    dry_run: false,
                    order_id: Some(accepted.id),
                    filled_price: Some(filled_price),
                    error: None,
                })
            }
            Err(e) => {
                // State is deliberately untouched on failure.
                error!(agent_id, asset, error = %e, "trade execution failed");
                Ok(ExecutionOutcome {
                    success: false,
                    message: format!("Trade execution failed: {e}"),
                    dry_run: false,
                    order_id: None,
                    filled_price: None,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    /// Mutate agent state after an accepted fill: bump the trade counter,
    /// push or pop a position lot, stamp the trade time.
    fn update_agent_state(
        &self,
        agent_id: &str,
        asset: &str,
        decision: &Decision,
        filled_price: f64,
        order_id: &str,
    ) -> Result<()> {
        let mut state = self.config_store.load_agent_state(agent_id, asset)?;
        state.trades_today += 1;
        state.last_trade_time = Some(Utc::now());

        match decision.action {
            TradeAction::Buy => state.positions.push(PositionLot {
                quantity: decision.quantity,
                entry_price: filled_price,
                stop_loss: decision.stop_loss,
                opened_at: Utc::now(),
                order_id: Some(order_id.to_string()),
            }),
            TradeAction::Sell => {
                // Oldest lot first.
                if state.positions.is_empty() {
                    warn!(agent_id, "sell filled with no recorded lots");
                } else {
                    state.positions.remove(0);
                }
            }
            TradeAction::Hold => {}
        }

        self.config_store.save_agent_state(agent_id, &state)
    }

    // -------------------------------------------------------------------------
    // JSONL logs
    // -------------------------------------------------------------------------

    fn log_decision(
        &self,
        agent_id: &str,
        decision: &Decision,
        outcome: &ExecutionOutcome,
    ) -> Result<()> {
        let date = Utc::now().format("%Y-%m-%d");
        let path = self
            .logs_dir
            .join("decisions")
            .join(format!("{agent_id}_{date}.jsonl"));
        let record = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "agent_id": agent_id,
            "decision": decision,
            "result": outcome,
        });
        append_jsonl(&path, &record)
    }

    fn log_trade(
        &self,
        agent_id: &str,
        decision: &Decision,
        filled_price: f64,
        order_id: &str,
    ) -> Result<()> {
        let _guard = self.trades_log_lock.lock();
        let date = Utc::now().format("%Y-%m-%d");
        let path = self.logs_dir.join("trades").join(format!("{date}.jsonl"));
        let record = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "agent_id": agent_id,
            "decision": decision,
            "filled_price": filled_price,
            "order_id": order_id,
        });
        append_jsonl(&path, &record)
    }
}

/// Reject decisions that violate hard invariants before they reach a broker.
fn verify_invariants(asset: &str, decision: &Decision) -> Result<()> {
    if decision.quantity < 0.0 {
        return Err(MeridianError::FatalInvariant(format!(
            "negative quantity {} for {asset}",
            decision.quantity
        )));
    }
    if decision.action == TradeAction::Hold && decision.quantity != 0.0 {
        return Err(MeridianError::FatalInvariant(format!(
            "hold decision carries quantity {}",
            decision.quantity
        )));
    }
    if !is_crypto_symbol(asset) && decision.quantity.fract() != 0.0 {
        return Err(MeridianError::FatalInvariant(format!(
            "fractional quantity {} for equity {asset}",
            decision.quantity
        )));
    }
    Ok(())
}

fn append_jsonl(path: &std::path::Path, record: &serde_json::Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{record}")?;
    Ok(())
}
