// =============================================================================
// Agent / company configuration and per-agent runtime state
// =============================================================================
//
// Every agent lives in `agents/<id>/` with two JSON files:
//   config.json — identity, strategy, risk parameters, capital, personality.
//   state.json  — mutable counters and open positions, owned by the executor.
//
// Config fields all carry serde defaults so older files keep loading; unknown
// keys are rejected at load so a typo never silently disables a risk limit.
// Saves use the tmp + rename pattern to prevent corruption on crash.
// =============================================================================

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MeridianError, Result};
use crate::types::is_crypto_symbol;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_timeframe() -> String {
    "15m".to_string()
}

fn default_strategy_type() -> String {
    "momentum".to_string()
}

fn default_max_position_size() -> f64 {
    5000.0
}

fn default_stop_loss_fraction() -> f64 {
    0.03
}

fn default_take_profit_fraction() -> f64 {
    0.08
}

fn default_max_daily_trades() -> u32 {
    10
}

fn default_max_daily_loss() -> f64 {
    1000.0
}

fn default_min_confidence() -> f64 {
    0.65
}

fn default_max_concurrent_positions() -> usize {
    3
}

fn default_max_capital() -> f64 {
    100_000.0
}

fn default_max_deployment_pct() -> f64 {
    0.8
}

// =============================================================================
// Agent configuration
// =============================================================================

/// Whether the agent participates in trading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Paused,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// Identity section of an agent config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentIdentity {
    pub id: String,
    /// Asset symbol the agent trades (`TSLA`, `BTC/USD`, ...).
    pub asset: String,
    #[serde(default)]
    pub status: AgentStatus,
}

/// Strategy section of an agent config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategySection {
    #[serde(default = "default_strategy_type", rename = "type")]
    pub strategy_type: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
}

impl Default for StrategySection {
    fn default() -> Self {
        Self {
            strategy_type: default_strategy_type(),
            timeframe: default_timeframe(),
        }
    }
}

/// Risk parameters for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskParams {
    /// Absolute dollars, or — when `<= 1` — a fraction of current equity.
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,

    /// Stop-loss distance as a fraction of entry price (0.03 = 3 %).
    #[serde(default = "default_stop_loss_fraction")]
    pub stop_loss_fraction: f64,

    /// Take-profit distance as a fraction of entry price.
    #[serde(default = "default_take_profit_fraction")]
    pub take_profit_fraction: f64,

    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,

    /// Maximum cumulative daily loss in dollars.
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,

    /// Minimum combined confidence required to act.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: usize,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            max_position_size: default_max_position_size(),
            stop_loss_fraction: default_stop_loss_fraction(),
            take_profit_fraction: default_take_profit_fraction(),
            max_daily_trades: default_max_daily_trades(),
            max_daily_loss: default_max_daily_loss(),
            min_confidence: default_min_confidence(),
            max_concurrent_positions: default_max_concurrent_positions(),
        }
    }
}

/// Performance section of an agent config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PerformanceSection {
    #[serde(default)]
    pub allocated_capital: f64,
}

/// Full per-agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    pub agent: AgentIdentity,
    #[serde(default)]
    pub strategy: StrategySection,
    #[serde(default)]
    pub risk: RiskParams,
    #[serde(default)]
    pub performance: PerformanceSection,
    /// Free-form description of the agent's character. Not interpreted.
    #[serde(default)]
    pub personality: String,
}

// =============================================================================
// Company configuration
// =============================================================================

/// Company-wide capital limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompanyConfig {
    #[serde(default = "default_max_capital")]
    pub max_capital: f64,
    #[serde(default = "default_max_deployment_pct")]
    pub max_deployment_pct: f64,
}

impl Default for CompanyConfig {
    fn default() -> Self {
        Self {
            max_capital: default_max_capital(),
            max_deployment_pct: default_max_deployment_pct(),
        }
    }
}

// =============================================================================
// Agent runtime state
// =============================================================================

/// One open lot held by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLot {
    pub quantity: f64,
    pub entry_price: f64,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub order_id: Option<String>,
}

/// Mutable per-agent counters. Only the trade executor (after a fill) and the
/// daily reset mutate this.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    #[serde(default)]
    pub positions: Vec<PositionLot>,
    #[serde(default)]
    pub trades_today: u32,
    #[serde(default)]
    pub pnl_today: f64,
    #[serde(default)]
    pub last_trade_time: Option<DateTime<Utc>>,
    /// Calendar date (exchange-local) the daily counters were last reset on.
    #[serde(default)]
    pub last_reset_date: String,
}

impl AgentState {
    /// Reset `trades_today` / `pnl_today` if the calendar date has rolled in
    /// the asset's exchange timezone (New York for equities, UTC for crypto).
    ///
    /// Returns `true` when a reset happened, so callers know to persist.
    pub fn maybe_reset_daily(&mut self, asset: &str, now: DateTime<Utc>) -> bool {
        let today = if is_crypto_symbol(asset) {
            now.format("%Y-%m-%d").to_string()
        } else {
            now.with_timezone(&New_York).format("%Y-%m-%d").to_string()
        };

        if self.last_reset_date == today {
            return false;
        }

        if !self.last_reset_date.is_empty() {
            info!(
                old_date = %self.last_reset_date,
                new_date = %today,
                "date rolled — resetting daily agent counters"
            );
        }
        self.trades_today = 0;
        self.pnl_today = 0.0;
        self.last_reset_date = today;
        true
    }
}

// =============================================================================
// ConfigStore — on-disk layout for agents and company config
// =============================================================================

/// Reads and writes the `agents/<id>/` tree and `company.json`.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    base: PathBuf,
}

impl ConfigStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn agents_dir(&self) -> PathBuf {
        self.base.join("agents")
    }

    fn agent_dir(&self, agent_id: &str) -> PathBuf {
        self.agents_dir().join(agent_id)
    }

    fn config_path(&self, agent_id: &str) -> PathBuf {
        self.agent_dir(agent_id).join("config.json")
    }

    fn state_path(&self, agent_id: &str) -> PathBuf {
        self.agent_dir(agent_id).join("state.json")
    }

    /// IDs of every agent that has a config file, sorted.
    pub fn list_agents(&self) -> Vec<String> {
        let mut ids = Vec::new();
        let dir = self.agents_dir();
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return ids;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() && path.join("config.json").exists() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        ids
    }

    pub fn agent_exists(&self, agent_id: &str) -> bool {
        self.config_path(agent_id).exists()
    }

    /// Load an agent's config. Missing or malformed files are ConfigError —
    /// a command cannot proceed without valid risk parameters.
    pub fn load_agent_config(&self, agent_id: &str) -> Result<AgentConfig> {
        let path = self.config_path(agent_id);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            MeridianError::Config(format!("agent {agent_id} not found ({}): {e}", path.display()))
        })?;
        let config: AgentConfig = serde_json::from_str(&content)
            .map_err(|e| MeridianError::Config(format!("invalid config for {agent_id}: {e}")))?;
        Ok(config)
    }

    pub fn save_agent_config(&self, config: &AgentConfig) -> Result<()> {
        let path = self.config_path(&config.agent.id);
        write_json_atomic(&path, config)
    }

    /// Load an agent's mutable state, applying the lazy daily reset. A missing
    /// state file yields a fresh default (new agents start flat).
    pub fn load_agent_state(&self, agent_id: &str, asset: &str) -> Result<AgentState> {
        let path = self.state_path(agent_id);
        let mut state = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(agent_id, error = %e, "unreadable agent state — starting fresh");
                AgentState::default()
            })
        } else {
            AgentState::default()
        };

        if state.maybe_reset_daily(asset, Utc::now()) {
            self.save_agent_state(agent_id, &state)?;
        }
        Ok(state)
    }

    pub fn save_agent_state(&self, agent_id: &str, state: &AgentState) -> Result<()> {
        write_json_atomic(&self.state_path(agent_id), state)
    }

    /// Load `company.json`, falling back to defaults when absent.
    pub fn load_company_config(&self) -> Result<CompanyConfig> {
        let path = self.base.join("company.json");
        if !path.exists() {
            return Ok(CompanyConfig::default());
        }
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map_err(|e| MeridianError::Config(format!("invalid company config: {e}")))
    }

    /// Sum of capital allocated across all agents.
    pub fn total_allocated_capital(&self) -> f64 {
        self.list_agents()
            .iter()
            .filter_map(|id| self.load_agent_config(id).ok())
            .map(|c| c.performance.allocated_capital)
            .sum()
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }
}

/// Atomic write: serialize to `.tmp`, then rename over the target.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| MeridianError::Config(format!("serialize failed: {e}")))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_config(id: &str, asset: &str) -> AgentConfig {
        AgentConfig {
            agent: AgentIdentity {
                id: id.to_string(),
                asset: asset.to_string(),
                status: AgentStatus::Active,
            },
            strategy: StrategySection::default(),
            risk: RiskParams::default(),
            performance: PerformanceSection {
                allocated_capital: 10_000.0,
            },
            personality: "Patient momentum follower.".to_string(),
        }
    }

    #[test]
    fn defaults_are_sane() {
        let risk = RiskParams::default();
        assert_eq!(risk.max_daily_trades, 10);
        assert!((risk.stop_loss_fraction - 0.03).abs() < f64::EPSILON);
        assert!((risk.min_confidence - 0.65).abs() < f64::EPSILON);
        assert_eq!(risk.max_concurrent_positions, 3);
    }

    #[test]
    fn unknown_keys_rejected() {
        let json = r#"{
            "agent": {"id": "a1", "asset": "TSLA"},
            "risk": {"max_position_size": 5000, "max_lunacy": 9}
        }"#;
        assert!(serde_json::from_str::<AgentConfig>(json).is_err());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let json = r#"{"agent": {"id": "a1", "asset": "TSLA"}}"#;
        let cfg: AgentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.agent.status, AgentStatus::Paused);
        assert_eq!(cfg.strategy.timeframe, "15m");
        assert_eq!(cfg.risk.max_daily_trades, 10);
    }

    #[test]
    fn config_roundtrip_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let cfg = sample_config("agent_tsla", "TSLA");

        store.save_agent_config(&cfg).unwrap();
        assert!(store.agent_exists("agent_tsla"));
        assert_eq!(store.list_agents(), vec!["agent_tsla".to_string()]);

        let loaded = store.load_agent_config("agent_tsla").unwrap();
        assert_eq!(loaded.agent.asset, "TSLA");
        assert_eq!(loaded.agent.status, AgentStatus::Active);
    }

    #[test]
    fn missing_agent_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let err = store.load_agent_config("ghost").unwrap_err();
        assert!(matches!(err, MeridianError::Config(_)));
    }

    #[test]
    fn state_daily_reset_rolls_counters() {
        let mut state = AgentState {
            trades_today: 4,
            pnl_today: -120.0,
            last_reset_date: "2025-06-01".to_string(),
            ..AgentState::default()
        };
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 15, 0, 0).unwrap();

        assert!(state.maybe_reset_daily("TSLA", now));
        assert_eq!(state.trades_today, 0);
        assert_eq!(state.pnl_today, 0.0);

        // Second call on the same date is a no-op.
        assert!(!state.maybe_reset_daily("TSLA", now));
    }

    #[test]
    fn crypto_reset_uses_utc_date() {
        // 02:00 UTC is still the previous calendar day in New York, so the
        // crypto agent resets while an equity agent would not.
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 2, 0, 0).unwrap();

        let mut crypto = AgentState {
            last_reset_date: "2025-06-01".to_string(),
            trades_today: 3,
            ..AgentState::default()
        };
        assert!(crypto.maybe_reset_daily("BTC/USD", now));
        assert_eq!(crypto.last_reset_date, "2025-06-02");

        let mut equity = AgentState {
            last_reset_date: "2025-06-01".to_string(),
            trades_today: 3,
            ..AgentState::default()
        };
        assert!(!equity.maybe_reset_daily("TSLA", now));
        assert_eq!(equity.trades_today, 3);
    }

    #[test]
    fn total_allocated_capital_sums_agents() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.save_agent_config(&sample_config("a1", "TSLA")).unwrap();
        store.save_agent_config(&sample_config("a2", "BTC/USD")).unwrap();
        assert!((store.total_allocated_capital() - 20_000.0).abs() < 1e-9);
    }
}
