// =============================================================================
// Risk validator — the stateless gate between decision and execution
// =============================================================================
//
// Nine ordered checks; the first failure wins and its reason is returned.
// The validator is a pure function of (config, state, decision, price) —
// same inputs, same verdict — so it can sit in the live pipeline and in
// tests without any setup.
// =============================================================================

use tracing::debug;

use crate::config::{AgentConfig, AgentState, AgentStatus, CompanyConfig};
use crate::decision::Decision;
use crate::types::TradeAction;

/// Outcome of a validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub approved: bool,
    pub reason: String,
}

impl Verdict {
    fn rejected(reason: String) -> Self {
        Self {
            approved: false,
            reason,
        }
    }

    fn approved() -> Self {
        Self {
            approved: true,
            reason: "All risk checks passed".to_string(),
        }
    }
}

/// Resolve a `max_position_size` that may be a fraction of capital.
fn resolve_max_position(max_position_size: f64, allocated_capital: f64) -> f64 {
    if max_position_size <= 1.0 {
        max_position_size * allocated_capital
    } else {
        max_position_size
    }
}

/// Validate a proposed decision against the agent's rules.
pub fn validate(
    config: &AgentConfig,
    state: &AgentState,
    decision: &Decision,
    current_price: f64,
) -> Verdict {
    let risk = &config.risk;
    let is_order = matches!(decision.action, TradeAction::Buy | TradeAction::Sell);

    // 1. Agent must be active.
    if config.agent.status != AgentStatus::Active {
        return Verdict::rejected(format!(
            "Agent status is {}, not active",
            config.agent.status
        ));
    }

    // 2. Daily trade budget.
    if state.trades_today >= risk.max_daily_trades {
        return Verdict::rejected(format!(
            "Daily trade limit reached ({}/{})",
            state.trades_today, risk.max_daily_trades
        ));
    }

    // 3. Position size cap.
    if is_order {
        let position_value = decision.quantity * current_price;
        let max_position =
            resolve_max_position(risk.max_position_size, config.performance.allocated_capital);
        if position_value > max_position {
            return Verdict::rejected(format!(
                "Position size ${position_value:.2} exceeds max ${max_position:.2}"
            ));
        }
    }

    // 4. Capital must be allocated.
    if config.performance.allocated_capital <= 0.0 {
        return Verdict::rejected("No capital allocated to agent".to_string());
    }

    // 5. Stop-loss required on buys, and no tighter than the agent's floor.
    if decision.action == TradeAction::Buy {
        match decision.stop_loss {
            None => return Verdict::rejected("Buy order must include stop_loss".to_string()),
            Some(stop_loss) => {
                let stop_fraction = (current_price - stop_loss) / current_price;
                if stop_fraction < risk.stop_loss_fraction {
                    return Verdict::rejected(format!(
                        "Stop loss too tight: {:.1}% < {:.1}%",
                        stop_fraction * 100.0,
                        risk.stop_loss_fraction * 100.0
                    ));
                }
            }
        }
    }

    // 6. Daily loss limit.
    if state.pnl_today < -risk.max_daily_loss {
        return Verdict::rejected(format!(
            "Daily loss limit exceeded: ${:.2} < ${:.2}",
            state.pnl_today, -risk.max_daily_loss
        ));
    }

    // 7. Confidence floor.
    if decision.confidence < risk.min_confidence {
        return Verdict::rejected(format!(
            "Confidence {:.0}% below threshold {:.0}%",
            decision.confidence * 100.0,
            risk.min_confidence * 100.0
        ));
    }

    // 8. Structural completeness.
    if decision.rationale.trim().is_empty() {
        return Verdict::rejected("Missing required field: rationale".to_string());
    }
    if is_order && decision.quantity <= 0.0 {
        return Verdict::rejected("Missing required field: quantity".to_string());
    }

    // 9. Concurrent position cap on new entries.
    if decision.action == TradeAction::Buy
        && state.positions.len() >= risk.max_concurrent_positions
    {
        return Verdict::rejected(format!(
            "Maximum concurrent positions reached ({}/{})",
            state.positions.len(),
            risk.max_concurrent_positions
        ));
    }

    debug!(agent_id = %config.agent.id, action = %decision.action, "risk checks passed");
    Verdict::approved()
}

/// Company-level gate: total allocated capital must stay within the
/// deployable share of company capital.
pub fn check_company_limits(company: &CompanyConfig, total_allocated: f64) -> Verdict {
    let max_deployable = company.max_capital * company.max_deployment_pct;
    if total_allocated > max_deployable {
        return Verdict::rejected(format!(
            "Capital deployment ${total_allocated:.2} exceeds limit ${max_deployable:.2}"
        ));
    }
    Verdict::approved()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AgentIdentity, PerformanceSection, PositionLot, RiskParams, StrategySection,
    };
    use chrono::Utc;

    fn config() -> AgentConfig {
        AgentConfig {
            agent: AgentIdentity {
                id: "agent_tsla".into(),
                asset: "TSLA".into(),
                status: AgentStatus::Active,
            },
            strategy: StrategySection::default(),
            risk: RiskParams {
                max_position_size: 5000.0,
                stop_loss_fraction: 0.02,
                min_confidence: 0.6,
                max_daily_trades: 10,
                max_daily_loss: 1000.0,
                max_concurrent_positions: 3,
                ..RiskParams::default()
            },
            performance: PerformanceSection {
                allocated_capital: 10_000.0,
            },
            personality: String::new(),
        }
    }

    fn buy_decision() -> Decision {
        Decision {
            action: TradeAction::Buy,
            quantity: 10.0,
            rationale: "Strong bullish signal".into(),
            confidence: 0.8,
            stop_loss: Some(97.0),
        }
    }

    fn lot() -> PositionLot {
        PositionLot {
            quantity: 5.0,
            entry_price: 95.0,
            stop_loss: Some(92.0),
            opened_at: Utc::now(),
            order_id: None,
        }
    }

    #[test]
    fn valid_buy_passes() {
        let verdict = validate(&config(), &AgentState::default(), &buy_decision(), 100.0);
        assert!(verdict.approved, "{}", verdict.reason);
    }

    #[test]
    fn paused_agent_rejected_first() {
        let mut cfg = config();
        cfg.agent.status = AgentStatus::Paused;
        // Even with other violations present, the status check fires first.
        let state = AgentState {
            trades_today: 99,
            ..AgentState::default()
        };
        let verdict = validate(&cfg, &state, &buy_decision(), 100.0);
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("paused"));
    }

    #[test]
    fn daily_trade_limit_enforced() {
        let state = AgentState {
            trades_today: 10,
            ..AgentState::default()
        };
        let verdict = validate(&config(), &state, &buy_decision(), 100.0);
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("Daily trade limit"));
    }

    #[test]
    fn oversized_position_rejected() {
        let mut decision = buy_decision();
        decision.quantity = 100.0; // $10,000 > $5,000 cap
        let verdict = validate(&config(), &AgentState::default(), &decision, 100.0);
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("exceeds max"));
    }

    #[test]
    fn fractional_position_cap_resolves_against_capital() {
        let mut cfg = config();
        cfg.risk.max_position_size = 0.05; // 5% of $10,000 = $500
        let mut decision = buy_decision();
        decision.quantity = 6.0; // $600
        let verdict = validate(&cfg, &AgentState::default(), &decision, 100.0);
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("exceeds max $500.00"));
    }

    #[test]
    fn zero_capital_rejected() {
        let mut cfg = config();
        cfg.performance.allocated_capital = 0.0;
        // Keep position within the absolute cap so check 3 passes.
        let verdict = validate(&cfg, &AgentState::default(), &buy_decision(), 100.0);
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("No capital"));
    }

    #[test]
    fn buy_without_stop_loss_rejected() {
        let mut decision = buy_decision();
        decision.stop_loss = None;
        let verdict = validate(&config(), &AgentState::default(), &decision, 100.0);
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("stop_loss"));
    }

    #[test]
    fn too_tight_stop_rejected() {
        let mut decision = buy_decision();
        decision.stop_loss = Some(99.5); // 0.5% < 2% floor
        let verdict = validate(&config(), &AgentState::default(), &decision, 100.0);
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("too tight"));
    }

    #[test]
    fn stop_exactly_at_floor_passes() {
        let mut decision = buy_decision();
        decision.stop_loss = Some(98.0); // exactly 2%
        let verdict = validate(&config(), &AgentState::default(), &decision, 100.0);
        assert!(verdict.approved, "{}", verdict.reason);
    }

    #[test]
    fn daily_loss_limit_enforced() {
        let state = AgentState {
            pnl_today: -1_000.01,
            ..AgentState::default()
        };
        let verdict = validate(&config(), &state, &buy_decision(), 100.0);
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("Daily loss limit"));
    }

    #[test]
    fn loss_exactly_at_limit_passes() {
        let state = AgentState {
            pnl_today: -1_000.0,
            ..AgentState::default()
        };
        let verdict = validate(&config(), &state, &buy_decision(), 100.0);
        assert!(verdict.approved, "{}", verdict.reason);
    }

    #[test]
    fn low_confidence_rejected() {
        let mut decision = buy_decision();
        decision.confidence = 0.5;
        let verdict = validate(&config(), &AgentState::default(), &decision, 100.0);
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("below threshold"));
    }

    #[test]
    fn empty_rationale_rejected() {
        let mut decision = buy_decision();
        decision.rationale = "  ".into();
        let verdict = validate(&config(), &AgentState::default(), &decision, 100.0);
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("rationale"));
    }

    #[test]
    fn zero_quantity_order_rejected() {
        let mut decision = buy_decision();
        decision.quantity = 0.0;
        let verdict = validate(&config(), &AgentState::default(), &decision, 100.0);
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("quantity"));
    }

    #[test]
    fn concurrent_position_cap_blocks_new_buys() {
        let state = AgentState {
            positions: vec![lot(), lot(), lot()],
            ..AgentState::default()
        };
        let verdict = validate(&config(), &state, &buy_decision(), 100.0);
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("concurrent positions"));
    }

    #[test]
    fn position_cap_does_not_block_holds() {
        let state = AgentState {
            positions: vec![lot(), lot(), lot()],
            ..AgentState::default()
        };
        let hold = Decision {
            action: TradeAction::Hold,
            quantity: 0.0,
            rationale: "Weak signal".into(),
            confidence: 0.7,
            stop_loss: None,
        };
        let verdict = validate(&config(), &state, &hold, 100.0);
        assert!(verdict.approved, "{}", verdict.reason);
    }

    #[test]
    fn validator_is_deterministic() {
        let cfg = config();
        let state = AgentState::default();
        let decision = buy_decision();
        let first = validate(&cfg, &state, &decision, 100.0);
        let second = validate(&cfg, &state, &decision, 100.0);
        assert_eq!(first, second);
    }

    #[test]
    fn company_limits() {
        let company = CompanyConfig {
            max_capital: 100_000.0,
            max_deployment_pct: 0.8,
        };
        assert!(check_company_limits(&company, 80_000.0).approved);
        let verdict = check_company_limits(&company, 80_000.01);
        assert!(!verdict.approved);
        assert!(verdict.reason.contains("exceeds limit"));
    }
}
