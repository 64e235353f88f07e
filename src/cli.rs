// =============================================================================
// Command-line surface — thin dispatch onto the core components
// =============================================================================
//
// Everything is wired here, once, with explicit constructors: store, broker,
// analyzers, executor, runner, scheduler. No component reaches for a global.
// Exit codes: Ok(()) is 0, any error is non-zero.
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::backtest::BacktestEngine;
use crate::broker::{AlpacaBroker, Broker, PaperBroker};
use crate::config::ConfigStore;
use crate::cycle::{CycleOptions, CycleRunner};
use crate::executor::TradeExecutor;
use crate::market_data::MarketDataProvider;
use crate::risk_validator::check_company_limits;
use crate::scheduler::{LoopManager, LoopOptions, LoopStatus};
use crate::sentiment::news::NewsAnalyzer;
use crate::sentiment::reddit::RedditAnalyzer;
use crate::sentiment::scorer::scorer_from_env;
use crate::sentiment::sec::SecAnalyzer;
use crate::sentiment::aggregator::{SentimentAggregator, SourceWeights};
use crate::store::Store;

#[derive(Parser)]
#[command(name = "meridian", about = "Autonomous multi-agent trading platform")]
pub struct Cli {
    /// Base directory holding agents/, company.json, logs/, and loop state.
    #[arg(long, default_value = ".", env = "MERIDIAN_BASE_DIR")]
    pub base_dir: PathBuf,

    /// SQLite database path.
    #[arg(long, default_value = "data/meridian.db", env = "MERIDIAN_DB_PATH")]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Inspect and run agents.
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },
    /// Manage continuous trading loops.
    Loop {
        #[command(subcommand)]
        command: LoopCommand,
    },
    /// Run and inspect backtests.
    Backtest {
        #[command(subcommand)]
        command: BacktestCommand,
    },
    /// Company-level checks.
    Company {
        #[command(subcommand)]
        command: CompanyCommand,
    },
    /// Apply pending database migrations.
    Migrate,
}

#[derive(Subcommand)]
pub enum AgentCommand {
    /// List configured agents.
    List,
    /// Show one agent's config and state.
    Status { agent_id: String },
    /// Execute a single decision cycle now.
    Run {
        agent_id: String,
        /// Simulate execution without calling the broker.
        #[arg(long)]
        dry_run: bool,
        /// Skip the market-hours gate.
        #[arg(long)]
        ignore_market_hours: bool,
    },
}

#[derive(Subcommand)]
pub enum LoopCommand {
    /// Start loops in the foreground; Ctrl+C stops them gracefully.
    Start {
        /// Agents to run. Empty means every configured agent.
        agent_ids: Vec<String>,
        /// Seconds between cycles.
        #[arg(long, default_value_t = 300)]
        interval: u64,
        /// Stop after this many cycles.
        #[arg(long)]
        max_cycles: Option<u64>,
        #[arg(long)]
        dry_run: bool,
        /// Trade outside regular market hours too.
        #[arg(long)]
        ignore_market_hours: bool,
    },
    /// Mark a loop stopped in its persisted state.
    Stop { agent_id: String },
    /// Mark a loop paused in its persisted state.
    Pause { agent_id: String },
    /// Mark a loop running again in its persisted state.
    Resume { agent_id: String },
    /// Show persisted loop states.
    Status,
}

#[derive(Subcommand)]
pub enum BacktestCommand {
    /// Replay the pipeline over stored history.
    Run {
        agent_id: String,
        /// Inclusive start date (YYYY-MM-DD).
        #[arg(long)]
        start: String,
        /// Inclusive end date (YYYY-MM-DD).
        #[arg(long)]
        end: String,
    },
    /// List stored backtest runs.
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one run with its trades.
    Show { run_id: i64 },
}

#[derive(Subcommand)]
pub enum CompanyCommand {
    /// Verify capital allocation against company limits.
    RiskCheck,
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

struct Runtime {
    store: Arc<Store>,
    config_store: ConfigStore,
    runner: Arc<CycleRunner>,
}

fn build_runtime(cli: &Cli) -> anyhow::Result<Runtime> {
    if let Some(parent) = cli.db.parent() {
        std::fs::create_dir_all(parent).context("creating database directory")?;
    }
    let store = Arc::new(Store::open(&cli.db).context("opening store")?);
    let config_store = ConfigStore::new(&cli.base_dir);

    // Broker: live when credentials are present, paper otherwise.
    let broker: Arc<dyn Broker> = match AlpacaBroker::from_env() {
        Ok(broker) => Arc::new(broker),
        Err(e) => {
            warn!(error = %e, "broker credentials unavailable — using paper broker");
            Arc::new(PaperBroker::new(100_000.0))
        }
    };

    // Analyzers degrade individually when their credentials are missing.
    let scorer = scorer_from_env().context("building sentiment scorer")?;
    let aggregator = SentimentAggregator::new(
        NewsAnalyzer::new(scorer.clone()).ok(),
        RedditAnalyzer::new(scorer).ok(),
        SecAnalyzer::new().ok(),
        SourceWeights::default(),
    )
    .context("building sentiment aggregator")?;

    let provider = MarketDataProvider::new(store.clone(), broker.clone());
    let executor = Arc::new(TradeExecutor::new(
        broker,
        config_store.clone(),
        cli.base_dir.join("logs"),
    ));
    let runner = Arc::new(CycleRunner::new(
        provider,
        aggregator,
        executor,
        config_store.clone(),
        store.clone(),
    ));

    Ok(Runtime {
        store,
        config_store,
        runner,
    })
}

fn parse_date(s: &str) -> anyhow::Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date {s}, expected YYYY-MM-DD"))?;
    Ok(DateTime::from_naive_utc_and_offset(
        date.and_hms_opt(0, 0, 0).expect("valid midnight"),
        Utc,
    ))
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Migrate => {
            // Opening the store applies pending migrations.
            let runtime = build_runtime(&cli)?;
            let applied = runtime.store.applied_migrations()?;
            println!("{} migration(s) applied:", applied.len());
            for file in applied {
                println!("  {file}");
            }
            Ok(())
        }

        Command::Agent { command } => run_agent(&cli, command).await,
        Command::Loop { command } => run_loop(&cli, command).await,
        Command::Backtest { command } => run_backtest(&cli, command),
        Command::Company { command } => run_company(&cli, command),
    }
}

async fn run_agent(cli: &Cli, command: &AgentCommand) -> anyhow::Result<()> {
    let runtime = build_runtime(cli)?;
    match command {
        AgentCommand::List => {
            let agents = runtime.config_store.list_agents();
            if agents.is_empty() {
                println!("no agents configured under {}", cli.base_dir.display());
                return Ok(());
            }
            for agent_id in agents {
                let config = runtime.config_store.load_agent_config(&agent_id)?;
                println!(
                    "{agent_id}: {} [{}] capital ${:.2}",
                    config.agent.asset, config.agent.status, config.performance.allocated_capital
                );
            }
            Ok(())
        }
        AgentCommand::Status { agent_id } => {
            let config = runtime.config_store.load_agent_config(agent_id)?;
            let state = runtime
                .config_store
                .load_agent_state(agent_id, &config.agent.asset)?;
            println!("agent:      {agent_id}");
            println!("asset:      {}", config.agent.asset);
            println!("status:     {}", config.agent.status);
            println!("timeframe:  {}", config.strategy.timeframe);
            println!("capital:    ${:.2}", config.performance.allocated_capital);
            println!("positions:  {}", state.positions.len());
            println!("trades today: {}", state.trades_today);
            println!("pnl today:  ${:.2}", state.pnl_today);
            Ok(())
        }
        AgentCommand::Run {
            agent_id,
            dry_run,
            ignore_market_hours,
        } => {
            let report = runtime
                .runner
                .run_cycle(
                    agent_id,
                    CycleOptions {
                        dry_run: *dry_run,
                        market_hours_only: !ignore_market_hours,
                    },
                )
                .await?;
            println!("cycle status: {:?}", report.status);
            for stage in &report.stages {
                println!(
                    "  {:22} {:4} {:8.1}ms  {}",
                    stage.name,
                    if stage.ok { "ok" } else { "FAIL" },
                    stage.elapsed_ms,
                    stage.detail
                );
            }
            if let Some(decision) = &report.decision {
                println!(
                    "decision: {} qty={} confidence={:.2}",
                    decision.action, decision.quantity, decision.confidence
                );
                println!("rationale: {}", decision.rationale);
            }
            Ok(())
        }
    }
}

async fn run_loop(cli: &Cli, command: &LoopCommand) -> anyhow::Result<()> {
    let runtime = build_runtime(cli)?;
    let manager = LoopManager::new(runtime.runner.clone(), cli.base_dir.join("loop_state"));

    match command {
        LoopCommand::Start {
            agent_ids,
            interval,
            max_cycles,
            dry_run,
            ignore_market_hours,
        } => {
            let agents = if agent_ids.is_empty() {
                runtime.config_store.list_agents()
            } else {
                agent_ids.clone()
            };
            if agents.is_empty() {
                bail!("no agents to run");
            }

            for agent_id in &agents {
                manager.start_loop(
                    agent_id,
                    LoopOptions {
                        interval_seconds: *interval,
                        max_cycles: *max_cycles,
                        dry_run: *dry_run,
                        market_hours_only: !ignore_market_hours,
                    },
                )?;
                println!("loop started for {agent_id} (every {interval}s)");
            }

            println!("running — press Ctrl+C to stop");
            tokio::signal::ctrl_c().await?;
            info!("shutdown signal received — stopping loops");
            for agent_id in &agents {
                let _ = manager.stop_loop(agent_id);
            }
            // Give workers a moment to observe the stop and persist.
            tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
            println!("all loops stopped");
            Ok(())
        }
        LoopCommand::Stop { agent_id } => control_loop(&manager, agent_id, LoopStatus::Stopped),
        LoopCommand::Pause { agent_id } => control_loop(&manager, agent_id, LoopStatus::Paused),
        LoopCommand::Resume { agent_id } => control_loop(&manager, agent_id, LoopStatus::Running),
        LoopCommand::Status => {
            let loops = manager.list_loops();
            if loops.is_empty() {
                println!("no loop state recorded");
                return Ok(());
            }
            for state in loops {
                println!(
                    "{}: {} cycles={} last_cycle={} last_error={}",
                    state.agent_id,
                    state.status,
                    state.cycles_completed,
                    state
                        .last_cycle_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".into()),
                    state.last_error.as_deref().unwrap_or("-"),
                );
            }
            Ok(())
        }
    }
}

/// Control a loop. A live worker in this process transitions immediately;
/// from a fresh CLI process only the persisted snapshot changes, for the
/// next host to pick up.
fn control_loop(manager: &LoopManager, agent_id: &str, status: LoopStatus) -> anyhow::Result<()> {
    manager.request_status(agent_id, status)?;
    println!("loop {agent_id} marked {status}");
    Ok(())
}

fn run_backtest(cli: &Cli, command: &BacktestCommand) -> anyhow::Result<()> {
    let runtime = build_runtime(cli)?;
    let engine = BacktestEngine::new(runtime.store.clone(), runtime.config_store.clone());

    match command {
        BacktestCommand::Run {
            agent_id,
            start,
            end,
        } => {
            let start = parse_date(start)?;
            let end = parse_date(end)?;
            let results = engine.run(agent_id, start, end)?;
            let m = &results.metrics;
            println!("backtest run #{}", results.run_id);
            println!("  return:       {:+.2}%", m.total_return_pct);
            println!(
                "  capital:      ${:.2} -> ${:.2}",
                m.initial_capital, m.final_capital
            );
            println!(
                "  trades:       {} ({} wins / {} losses)",
                m.total_trades, m.winning_trades, m.losing_trades
            );
            println!("  win rate:     {:.1}%", m.win_rate * 100.0);
            println!("  avg pnl:      ${:.2}", m.avg_trade_pnl);
            println!("  max drawdown: {:.2}%", m.max_drawdown);
            println!("  sharpe:       {:.2}", m.sharpe_ratio);
            Ok(())
        }
        BacktestCommand::List { limit } => {
            let runs = runtime.store.list_backtest_runs(*limit)?;
            if runs.is_empty() {
                println!("no backtest runs stored");
                return Ok(());
            }
            for run in runs {
                println!(
                    "#{} {} [{} .. {}] {} return={}",
                    run.id,
                    run.agent_id,
                    run.start_date.format("%Y-%m-%d"),
                    run.end_date.format("%Y-%m-%d"),
                    run.status,
                    run.total_return_pct
                        .map(|p| format!("{p:+.2}%"))
                        .unwrap_or_else(|| "-".into()),
                );
            }
            Ok(())
        }
        BacktestCommand::Show { run_id } => {
            let run = runtime
                .store
                .get_backtest_run(*run_id)?
                .with_context(|| format!("no backtest run #{run_id}"))?;
            println!(
                "#{} {} [{} .. {}] {}",
                run.id,
                run.agent_id,
                run.start_date.format("%Y-%m-%d"),
                run.end_date.format("%Y-%m-%d"),
                run.status
            );
            for trade in runtime.store.backtest_trades(*run_id)? {
                println!(
                    "  {} {:4} {:>12.8} @ {:>10.2} pnl={}",
                    trade.timestamp.format("%Y-%m-%d %H:%M"),
                    trade.action.to_string(),
                    trade.quantity,
                    trade.price,
                    trade
                        .pnl
                        .map(|p| format!("{p:+.2}"))
                        .unwrap_or_else(|| "-".into()),
                );
            }
            Ok(())
        }
    }
}

fn run_company(cli: &Cli, command: &CompanyCommand) -> anyhow::Result<()> {
    let runtime = build_runtime(cli)?;
    match command {
        CompanyCommand::RiskCheck => {
            let company = runtime.config_store.load_company_config()?;
            let total = runtime.config_store.total_allocated_capital();
            let verdict = check_company_limits(&company, total);
            println!(
                "allocated ${total:.2} of ${:.2} (max deployment {:.0}%)",
                company.max_capital,
                company.max_deployment_pct * 100.0
            );
            println!("{}", verdict.reason);
            if !verdict.approved {
                bail!("company risk check failed");
            }
            Ok(())
        }
    }
}
