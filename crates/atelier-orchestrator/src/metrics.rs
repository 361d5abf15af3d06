use atelier_core::{AgentLog, AgentRole};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Roll cost and token totals up from a day's agent logs.
///
/// Pure function: the hourly aggregation job feeds it logs filtered with
/// `created_at >= today-start` so a concurrent purge of month-old rows can
/// never change today's totals.
pub fn usage_totals(logs: &[AgentLog]) -> (f64, u64) {
    let cost = logs.iter().map(|l| l.metrics.cost_usd).sum();
    let tokens = logs
        .iter()
        .map(|l| l.metrics.tokens_input + l.metrics.tokens_output)
        .sum();
    (cost, tokens)
}

/// UTC midnight of the current day, the lower bound for daily aggregation.
pub fn today_start() -> DateTime<Utc> {
    Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
}

/// Per-role roll-up for the agent status view.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RoleStatus {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub avg_duration_ms: u64,
}

/// Summarize a set of agent logs by role.
pub fn agent_status(logs: &[AgentLog]) -> HashMap<AgentRole, RoleStatus> {
    let mut by_role: HashMap<AgentRole, RoleStatus> = HashMap::new();
    let mut durations: HashMap<AgentRole, u64> = HashMap::new();

    for log in logs {
        let entry = by_role.entry(log.agent_role).or_default();
        entry.total_runs += 1;
        if log.success {
            entry.successful_runs += 1;
        } else {
            entry.failed_runs += 1;
        }
        entry.total_tokens += log.metrics.tokens_input + log.metrics.tokens_output;
        entry.total_cost_usd += log.metrics.cost_usd;
        *durations.entry(log.agent_role).or_default() += log.metrics.duration_ms;
    }

    for (role, status) in by_role.iter_mut() {
        if status.total_runs > 0 {
            status.avg_duration_ms = durations[role] / status.total_runs;
        }
    }
    by_role
}
