use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of each agent in the cycle pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Orchestrator,
    /// Decides the cycle plan: which repo, what kind of work.
    Board,
    /// Drafts one concrete task from a lens.
    Pm,
    /// Drives the coding CLI inside the working copy.
    Dev,
    /// Reviews the diff: automated checks plus LLM judgement.
    Qa,
    /// Proposes cross-repo follow-ups after completions.
    Integration,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentRole::Orchestrator => "orchestrator",
            AgentRole::Board => "board",
            AgentRole::Pm => "pm",
            AgentRole::Dev => "dev",
            AgentRole::Qa => "qa",
            AgentRole::Integration => "integration",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LogMetrics {
    pub duration_ms: u64,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub cost_usd: f64,
    pub model: String,
}

/// One row per agent invocation. Append-only; purged after 30 days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub repo_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub agent_role: AgentRole,
    /// e.g. "run", "generate_task", "implement", "review"
    pub action: String,
    pub input_summary: String,
    pub output_summary: String,
    pub reasoning: String,
    /// Full prompt/response, kept only when debug capture is on.
    pub full_prompt: Option<String>,
    pub full_response: Option<String>,
    pub metrics: LogMetrics,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AgentLog {
    pub fn success(
        user_id: Uuid,
        project_id: Uuid,
        agent_role: AgentRole,
        action: impl Into<String>,
        output_summary: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            project_id,
            repo_id: None,
            task_id: None,
            agent_role,
            action: action.into(),
            input_summary: String::new(),
            output_summary: output_summary.into(),
            reasoning: String::new(),
            full_prompt: None,
            full_response: None,
            metrics: LogMetrics::default(),
            success: true,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn failure(
        user_id: Uuid,
        project_id: Uuid,
        agent_role: AgentRole,
        action: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let mut log = Self::success(user_id, project_id, agent_role, action, "");
        log.success = false;
        log.error = Some(error.into());
        log
    }

    pub fn with_metrics(mut self, metrics: LogMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_repo(mut self, repo_id: Uuid) -> Self {
        self.repo_id = Some(repo_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_display() {
        assert_eq!(AgentRole::Board.to_string(), "board");
        assert_eq!(AgentRole::Qa.to_string(), "qa");
        assert_eq!(AgentRole::Integration.to_string(), "integration");
    }

    #[test]
    fn failure_log_carries_error() {
        let log = AgentLog::failure(
            Uuid::new_v4(),
            Uuid::new_v4(),
            AgentRole::Dev,
            "run",
            "build failed",
        );
        assert!(!log.success);
        assert_eq!(log.error.as_deref(), Some("build failed"));
    }

    #[test]
    fn builders_attach_ids() {
        let task_id = Uuid::new_v4();
        let repo_id = Uuid::new_v4();
        let log = AgentLog::success(Uuid::new_v4(), Uuid::new_v4(), AgentRole::Qa, "review", "ok")
            .with_task(task_id)
            .with_repo(repo_id);
        assert_eq!(log.task_id, Some(task_id));
        assert_eq!(log.repo_id, Some(repo_id));
    }
}
