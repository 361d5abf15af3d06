use crate::log::AgentRole;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Identity of a daily metrics row: (project, optional repo, UTC day).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricsKey {
    pub project_id: Uuid,
    pub repo_id: Option<Uuid>,
    pub date: NaiveDate,
}

impl MetricsKey {
    pub fn project_day(project_id: Uuid, date: NaiveDate) -> Self {
        Self {
            project_id,
            repo_id: None,
            date,
        }
    }

    pub fn today(project_id: Uuid) -> Self {
        Self::project_day(project_id, Utc::now().date_naive())
    }
}

/// Daily per-project roll-up of cost, tokens, commits and task outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyMetrics {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub repo_id: Option<Uuid>,
    pub date: NaiveDate,
    pub commits_count: u32,
    pub tasks_created: u32,
    pub tasks_completed: u32,
    pub tasks_rejected: u32,
    pub test_coverage: f64,
    pub lines_added: u32,
    pub lines_removed: u32,
    pub cost_usd: f64,
    pub tokens_used: u64,
    pub agent_runs: HashMap<String, u32>,
    pub build_success: u32,
    pub build_failed: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DailyMetrics {
    /// Fresh row for a key, as written by the `$setOnInsert` half of the
    /// upsert.
    pub fn fresh(user_id: Uuid, key: &MetricsKey) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            project_id: key.project_id,
            repo_id: key.repo_id,
            date: key.date,
            commits_count: 0,
            tasks_created: 0,
            tasks_completed: 0,
            tasks_rejected: 0,
            test_coverage: 0.0,
            lines_added: 0,
            lines_removed: 0,
            cost_usd: 0.0,
            tokens_used: 0,
            agent_runs: HashMap::new(),
            build_success: 0,
            build_failed: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The `$inc` half of the upsert: add a cycle's deltas in place.
    pub fn apply(&mut self, delta: &CycleDelta) {
        self.commits_count += delta.commits;
        self.tasks_created += delta.tasks_created;
        self.tasks_completed += delta.tasks_completed;
        self.tasks_rejected += delta.tasks_rejected;
        self.lines_added += delta.lines_added;
        self.lines_removed += delta.lines_removed;
        self.cost_usd += delta.cost_usd;
        self.tokens_used += delta.tokens_used;
        self.build_success += delta.build_success;
        self.build_failed += delta.build_failed;
        for (role, count) in &delta.agent_runs {
            *self.agent_runs.entry(role.to_string()).or_insert(0) += count;
        }
        self.updated_at = Utc::now();
    }
}

/// Increment-only payload a finished cycle contributes to its daily row.
///
/// The `cycle_id` is the idempotency key: the store refuses to apply the same
/// cycle's delta twice, so replaying a cycle result cannot double-count.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CycleDelta {
    pub cycle_id: Uuid,
    pub commits: u32,
    pub tasks_created: u32,
    pub tasks_completed: u32,
    pub tasks_rejected: u32,
    pub lines_added: u32,
    pub lines_removed: u32,
    pub cost_usd: f64,
    pub tokens_used: u64,
    pub agent_runs: HashMap<AgentRole, u32>,
    pub build_success: u32,
    pub build_failed: u32,
}

impl CycleDelta {
    pub fn for_cycle(cycle_id: Uuid) -> Self {
        Self {
            cycle_id,
            ..Default::default()
        }
    }

    pub fn record_agent_run(&mut self, role: AgentRole) {
        *self.agent_runs.entry(role).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_accumulates() {
        let key = MetricsKey::today(Uuid::new_v4());
        let mut row = DailyMetrics::fresh(Uuid::new_v4(), &key);

        let mut delta = CycleDelta::for_cycle(Uuid::new_v4());
        delta.commits = 3;
        delta.tasks_created = 1;
        delta.tasks_completed = 2;
        delta.cost_usd = 0.42;
        delta.tokens_used = 1500;
        delta.record_agent_run(AgentRole::Board);
        delta.record_agent_run(AgentRole::Dev);
        delta.record_agent_run(AgentRole::Dev);

        row.apply(&delta);
        row.apply(&delta);

        assert_eq!(row.commits_count, 6);
        assert_eq!(row.tasks_created, 2);
        assert_eq!(row.tasks_completed, 4);
        assert!((row.cost_usd - 0.84).abs() < 1e-9);
        assert_eq!(row.tokens_used, 3000);
        assert_eq!(row.agent_runs["dev"], 4);
        assert_eq!(row.agent_runs["board"], 2);
    }

    #[test]
    fn key_equality_by_day() {
        let project = Uuid::new_v4();
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert_eq!(
            MetricsKey::project_day(project, date),
            MetricsKey::project_day(project, date)
        );
        assert_ne!(
            MetricsKey::project_day(project, date),
            MetricsKey::project_day(Uuid::new_v4(), date)
        );
    }
}
