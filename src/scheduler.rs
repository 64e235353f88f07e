// =============================================================================
// Loop manager — one cooperative worker task per running agent loop
// =============================================================================
//
// Each loop owns its LoopState and nothing else; loops share only the Store.
// Workers sleep in chunks of at most one second so stop / pause / resume are
// observed within a second, and an in-flight cycle always runs to
// completion. LoopState is persisted after every cycle and every status
// transition; on process start the states are loaded for visibility but no
// task is ever auto-resumed.
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::config::write_json_atomic;
use crate::cycle::{CycleOptions, CycleRunner, CycleStatus};
use crate::error::{MeridianError, Result};

/// Lifecycle of one agent loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopStatus {
    Stopped,
    Running,
    Paused,
    Error,
}

impl std::fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Persisted per-loop state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopState {
    pub agent_id: String,
    pub status: LoopStatus,
    pub cycles_completed: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub interval_seconds: u64,
    #[serde(default)]
    pub market_hours_only: bool,
    #[serde(default)]
    pub dry_run: bool,
}

/// Options for `start_loop`.
#[derive(Debug, Clone, Copy)]
pub struct LoopOptions {
    pub interval_seconds: u64,
    pub max_cycles: Option<u64>,
    pub dry_run: bool,
    pub market_hours_only: bool,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            max_cycles: None,
            dry_run: false,
            market_hours_only: true,
        }
    }
}

struct LoopHandle {
    /// Desired status, written by control operations, polled by the worker.
    control: Arc<RwLock<LoopStatus>>,
    state: Arc<RwLock<LoopState>>,
}

pub struct LoopManager {
    runner: Arc<CycleRunner>,
    state_dir: PathBuf,
    loops: RwLock<HashMap<String, LoopHandle>>,
}

impl LoopManager {
    /// Create a manager, loading any persisted loop states for visibility.
    /// Tasks from a previous process are gone; nothing is auto-resumed.
    pub fn new(runner: Arc<CycleRunner>, state_dir: impl Into<PathBuf>) -> Self {
        let manager = Self {
            runner,
            state_dir: state_dir.into(),
            loops: RwLock::new(HashMap::new()),
        };
        for state in manager.load_persisted() {
            info!(
                agent_id = %state.agent_id,
                status = %state.status,
                cycles = state.cycles_completed,
                "loaded persisted loop state (not resumed)"
            );
        }
        manager
    }

    fn state_path(&self, agent_id: &str) -> PathBuf {
        self.state_dir.join(format!("{agent_id}.json"))
    }

    fn persist(&self, state: &LoopState) {
        if let Err(e) = write_json_atomic(&self.state_path(&state.agent_id), state) {
            warn!(agent_id = %state.agent_id, error = %e, "failed to persist loop state");
        }
    }

    fn load_persisted(&self) -> Vec<LoopState> {
        let mut out = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.state_dir) else {
            return out;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .ok()
                .and_then(|c| serde_json::from_str::<LoopState>(&c).ok())
            {
                Some(state) => out.push(state),
                None => warn!(path = %path.display(), "unreadable loop state file"),
            }
        }
        out
    }

    /// Whether a live worker task exists for this agent.
    fn has_live_loop(&self, agent_id: &str) -> bool {
        self.loops
            .read()
            .get(agent_id)
            .map(|h| !matches!(*h.control.read(), LoopStatus::Stopped | LoopStatus::Error))
            .unwrap_or(false)
    }

    // -------------------------------------------------------------------------
    // Control operations
    // -------------------------------------------------------------------------

    /// Start a loop for `agent_id`. Refuses when one is already live —
    /// concurrent cycles for the same agent are forbidden.
    pub fn start_loop(&self, agent_id: &str, options: LoopOptions) -> Result<()> {
        if self.has_live_loop(agent_id) {
            return Err(MeridianError::Validation(format!(
                "loop already running for {agent_id}"
            )));
        }

        let control = Arc::new(RwLock::new(LoopStatus::Running));
        let state = Arc::new(RwLock::new(LoopState {
            agent_id: agent_id.to_string(),
            status: LoopStatus::Running,
            cycles_completed: 0,
            started_at: Some(Utc::now()),
            last_cycle_at: None,
            last_error: None,
            interval_seconds: options.interval_seconds,
            market_hours_only: options.market_hours_only,
            dry_run: options.dry_run,
        }));
        self.persist(&state.read());

        let worker = LoopWorker {
            runner: self.runner.clone(),
            agent_id: agent_id.to_string(),
            control: control.clone(),
            state: state.clone(),
            state_path: self.state_path(agent_id),
            options,
        };
        tokio::spawn(worker.run());

        self.loops
            .write()
            .insert(agent_id.to_string(), LoopHandle { control, state });

        info!(
            agent_id,
            interval = options.interval_seconds,
            market_hours_only = options.market_hours_only,
            dry_run = options.dry_run,
            "loop started"
        );
        Ok(())
    }

    /// Request a stop. The worker notices within a second; an in-flight
    /// cycle completes first.
    pub fn stop_loop(&self, agent_id: &str) -> Result<()> {
        self.transition(agent_id, LoopStatus::Stopped, "loop stop requested")
    }

    pub fn pause_loop(&self, agent_id: &str) -> Result<()> {
        self.transition(agent_id, LoopStatus::Paused, "loop paused")
    }

    pub fn resume_loop(&self, agent_id: &str) -> Result<()> {
        self.transition(agent_id, LoopStatus::Running, "loop resumed")
    }

    fn transition(&self, agent_id: &str, to: LoopStatus, message: &str) -> Result<()> {
        let loops = self.loops.read();
        let handle = loops.get(agent_id).ok_or_else(|| {
            MeridianError::Validation(format!("no loop found for {agent_id}"))
        })?;
        *handle.control.write() = to;
        {
            let mut state = handle.state.write();
            state.status = to;
            self.persist(&state);
        }
        info!(agent_id, status = %to, "{message}");
        Ok(())
    }

    /// Apply a control request: a live loop transitions directly; with no
    /// live worker (e.g. a fresh CLI process) only the persisted snapshot is
    /// updated, for the next host to pick up.
    pub fn request_status(&self, agent_id: &str, status: LoopStatus) -> Result<()> {
        if self.loops.read().contains_key(agent_id) {
            let message = match status {
                LoopStatus::Stopped => "loop stop requested",
                LoopStatus::Paused => "loop paused",
                LoopStatus::Running => "loop resumed",
                LoopStatus::Error => "loop marked errored",
            };
            return self.transition(agent_id, status, message);
        }

        let path = self.state_path(agent_id);
        let mut state: LoopState = std::fs::read_to_string(&path)
            .ok()
            .and_then(|c| serde_json::from_str(&c).ok())
            .ok_or_else(|| {
                MeridianError::Validation(format!("no loop found for {agent_id}"))
            })?;
        state.status = status;
        self.persist(&state);
        Ok(())
    }

    /// Current state of one loop: live if a worker exists, otherwise the
    /// last persisted snapshot.
    pub fn loop_status(&self, agent_id: &str) -> Option<LoopState> {
        if let Some(handle) = self.loops.read().get(agent_id) {
            return Some(handle.state.read().clone());
        }
        let path = self.state_path(agent_id);
        std::fs::read_to_string(path)
            .ok()
            .and_then(|c| serde_json::from_str(&c).ok())
    }

    /// All known loops, live ones taking precedence over persisted state.
    pub fn list_loops(&self) -> Vec<LoopState> {
        let mut by_agent: HashMap<String, LoopState> = self
            .load_persisted()
            .into_iter()
            .map(|s| (s.agent_id.clone(), s))
            .collect();
        for (agent_id, handle) in self.loops.read().iter() {
            by_agent.insert(agent_id.clone(), handle.state.read().clone());
        }
        let mut out: Vec<LoopState> = by_agent.into_values().collect();
        out.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        out
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct LoopWorker {
    runner: Arc<CycleRunner>,
    agent_id: String,
    control: Arc<RwLock<LoopStatus>>,
    state: Arc<RwLock<LoopState>>,
    state_path: PathBuf,
    options: LoopOptions,
}

impl LoopWorker {
    async fn run(self) {
        info!(agent_id = %self.agent_id, "loop worker started");
        let mut cycles: u64 = 0;

        loop {
            // Copy the flag out so no lock is held across an await.
            let desired = *self.control.read();
            match desired {
                LoopStatus::Stopped | LoopStatus::Error => break,
                LoopStatus::Paused => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
                LoopStatus::Running => {}
            }

            let cycle_options = CycleOptions {
                dry_run: self.options.dry_run,
                market_hours_only: self.options.market_hours_only,
            };
            match self.runner.run_cycle(&self.agent_id, cycle_options).await {
                Ok(report) => {
                    if report.status == CycleStatus::MarketClosed {
                        // Closed market: wait out the interval without
                        // counting a cycle.
                        self.sleep_interval().await;
                        continue;
                    }

                    cycles += 1;
                    let mut state = self.state.write();
                    state.cycles_completed = cycles;
                    state.last_cycle_at = Some(Utc::now());
                    state.last_error = match &report.status {
                        CycleStatus::Aborted { stage, reason } => {
                            Some(format!("{stage}: {reason}"))
                        }
                        _ => None,
                    };
                    self.persist(&state);
                }
                Err(e) => {
                    // Uncaught cycle error: halt this loop, leave the rest of
                    // the fleet untouched.
                    error!(agent_id = %self.agent_id, error = %e, "cycle failed — loop entering error state");
                    *self.control.write() = LoopStatus::Error;
                    let mut state = self.state.write();
                    state.status = LoopStatus::Error;
                    state.last_error = Some(e.to_string());
                    self.persist(&state);
                    break;
                }
            }

            if let Some(max) = self.options.max_cycles {
                if cycles >= max {
                    info!(agent_id = %self.agent_id, cycles, "max cycles reached — stopping loop");
                    *self.control.write() = LoopStatus::Stopped;
                    let mut state = self.state.write();
                    state.status = LoopStatus::Stopped;
                    self.persist(&state);
                    break;
                }
            }

            self.sleep_interval().await;
        }

        // Record the terminal status if the control flag changed it.
        let final_status = *self.control.read();
        {
            let mut state = self.state.write();
            if state.status != final_status {
                state.status = final_status;
                self.persist(&state);
            }
        }
        info!(
            agent_id = %self.agent_id,
            cycles,
            status = %final_status,
            "loop worker exited"
        );
    }

    /// Sleep the configured interval in chunks of at most one second so a
    /// status change is observed promptly.
    async fn sleep_interval(&self) {
        let mut remaining = self.options.interval_seconds;
        while remaining > 0 {
            if *self.control.read() != LoopStatus::Running {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            remaining -= 1;
        }
    }

    fn persist(&self, state: &LoopState) {
        if let Err(e) = write_json_atomic(&self.state_path, state) {
            warn!(agent_id = %self.agent_id, error = %e, "failed to persist loop state");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;
    use crate::config::{
        AgentConfig, AgentIdentity, AgentStatus, ConfigStore, PerformanceSection, RiskParams,
        StrategySection,
    };
    use crate::executor::TradeExecutor;
    use crate::market_data::MarketDataProvider;
    use crate::sentiment::SentimentAggregator;
    use crate::store::Store;
    use crate::types::Bar;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn seed_bars(symbol: &str, count: usize) -> Vec<Bar> {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                let close = 100.0 + i as f64 * 0.05;
                Bar {
                    symbol: symbol.into(),
                    timestamp: t0 + ChronoDuration::minutes(15 * i as i64),
                    timeframe: "15m".into(),
                    open: close,
                    high: close + 0.5,
                    low: close - 0.5,
                    close,
                    volume: 1_000,
                    vwap: None,
                    trade_count: None,
                }
            })
            .collect()
    }

    fn build_manager(dir: &std::path::Path) -> LoopManager {
        let config_store = ConfigStore::new(dir);
        config_store
            .save_agent_config(&AgentConfig {
                agent: AgentIdentity {
                    id: "a1".into(),
                    asset: "BTC/USD".into(),
                    status: AgentStatus::Active,
                },
                strategy: StrategySection::default(),
                risk: RiskParams::default(),
                performance: PerformanceSection {
                    allocated_capital: 10_000.0,
                },
                personality: String::new(),
            })
            .unwrap();

        let store = Arc::new(Store::open_in_memory().unwrap());
        store.upsert_bars(&seed_bars("BTC/USD", 100)).unwrap();

        let broker = Arc::new(PaperBroker::new(100_000.0));
        broker.set_quote("BTC/USD", 104.9, 105.0);

        let provider = MarketDataProvider::new(store.clone(), broker.clone());
        let executor = Arc::new(TradeExecutor::new(
            broker,
            config_store.clone(),
            dir.join("logs"),
        ));
        let runner = Arc::new(CycleRunner::new(
            provider,
            SentimentAggregator::disabled(),
            executor,
            config_store,
            store,
        ));
        LoopManager::new(runner, dir.join("loop_state"))
    }

    fn options() -> LoopOptions {
        LoopOptions {
            interval_seconds: 1,
            max_cycles: None,
            dry_run: true,
            market_hours_only: false,
        }
    }

    #[tokio::test]
    async fn loop_runs_cycles_and_persists_state() {
        let dir = tempfile::tempdir().unwrap();
        let manager = build_manager(dir.path());

        manager.start_loop("a1", options()).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let state = manager.loop_status("a1").unwrap();
        assert_eq!(state.status, LoopStatus::Running);
        assert!(state.cycles_completed >= 1);
        assert!(state.last_cycle_at.is_some());

        // State file exists on disk.
        assert!(dir.path().join("loop_state/a1.json").exists());

        manager.stop_loop("a1").unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        let state = manager.loop_status("a1").unwrap();
        assert_eq!(state.status, LoopStatus::Stopped);
    }

    #[tokio::test]
    async fn second_start_for_same_agent_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let manager = build_manager(dir.path());

        manager.start_loop("a1", options()).unwrap();
        let err = manager.start_loop("a1", options()).unwrap_err();
        assert!(matches!(err, MeridianError::Validation(_)));

        manager.stop_loop("a1").unwrap();
    }

    #[tokio::test]
    async fn pause_and_resume_transition_status() {
        let dir = tempfile::tempdir().unwrap();
        let manager = build_manager(dir.path());

        manager.start_loop("a1", options()).unwrap();
        manager.pause_loop("a1").unwrap();
        assert_eq!(manager.loop_status("a1").unwrap().status, LoopStatus::Paused);

        manager.resume_loop("a1").unwrap();
        assert_eq!(
            manager.loop_status("a1").unwrap().status,
            LoopStatus::Running
        );

        manager.stop_loop("a1").unwrap();
    }

    #[tokio::test]
    async fn max_cycles_stops_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let manager = build_manager(dir.path());

        let mut opts = options();
        opts.max_cycles = Some(1);
        manager.start_loop("a1", opts).unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;

        let state = manager.loop_status("a1").unwrap();
        assert_eq!(state.status, LoopStatus::Stopped);
        assert_eq!(state.cycles_completed, 1);

        // A fresh start is allowed after a natural stop.
        assert!(manager.start_loop("a1", options()).is_ok());
        manager.stop_loop("a1").unwrap();
    }

    #[tokio::test]
    async fn persisted_state_survives_manager_restart_without_resuming() {
        let dir = tempfile::tempdir().unwrap();
        {
            let manager = build_manager(dir.path());
            let mut opts = options();
            opts.max_cycles = Some(1);
            manager.start_loop("a1", opts).unwrap();
            tokio::time::sleep(Duration::from_millis(800)).await;
        }

        // New manager process: sees the state, has no live task.
        let manager = build_manager(dir.path());
        let listed = manager.list_loops();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].agent_id, "a1");
        assert_eq!(listed[0].cycles_completed, 1);
        // Not live, so a new start is accepted.
        assert!(manager.start_loop("a1", options()).is_ok());
        manager.stop_loop("a1").unwrap();
    }

    #[tokio::test]
    async fn control_on_unknown_loop_errors() {
        let dir = tempfile::tempdir().unwrap();
        let manager = build_manager(dir.path());
        assert!(manager.stop_loop("ghost").is_err());
        assert!(manager.pause_loop("ghost").is_err());
    }
}
