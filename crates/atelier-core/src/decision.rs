use crate::log::AgentRole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionLevel {
    Info,
    Normal,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    Pending,
    Approved,
    Rejected,
    /// Auto-resolved to the default option when the timeout passed.
    Timeout,
    /// Automatically resolved by policy without human input.
    Auto,
}

impl DecisionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DecisionStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionOption {
    pub id: String,
    pub label: String,
    pub description: String,
    /// What happens if chosen.
    pub impact: String,
    /// Used when the decision times out. Exactly one option is the default.
    pub is_default: bool,
}

/// An escalation the orchestrator cannot answer alone: a question for the
/// CIO, with options and a timeout default so a cycle never blocks on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub repo_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub level: DecisionLevel,
    pub agent_role: AgentRole,
    pub title: String,
    pub description: String,
    pub context: String,
    pub options: Vec<DecisionOption>,
    pub chosen_option: Option<String>,
    pub status: DecisionStatus,
    pub timeout_at: DateTime<Utc>,
    pub default_option: String,
    pub resolved_at: Option<DateTime<Utc>>,
    /// "user", "timeout", or "auto".
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Decision {
    pub fn new(
        user_id: Uuid,
        project_id: Uuid,
        agent_role: AgentRole,
        title: impl Into<String>,
        options: Vec<DecisionOption>,
        timeout_at: DateTime<Utc>,
    ) -> Self {
        let default_option = options
            .iter()
            .find(|o| o.is_default)
            .map(|o| o.id.clone())
            .unwrap_or_default();
        Self {
            id: Uuid::new_v4(),
            user_id,
            project_id,
            repo_id: None,
            task_id: None,
            level: DecisionLevel::Normal,
            agent_role,
            title: title.into(),
            description: String::new(),
            context: String::new(),
            options,
            chosen_option: None,
            status: DecisionStatus::Pending,
            timeout_at,
            default_option,
            resolved_at: None,
            resolved_by: None,
            created_at: Utc::now(),
        }
    }

    /// Resolve to the default option because the timeout passed. No-op unless
    /// pending and past `timeout_at`.
    pub fn resolve_by_timeout(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != DecisionStatus::Pending || now < self.timeout_at {
            return false;
        }
        self.status = DecisionStatus::Timeout;
        self.chosen_option = Some(self.default_option.clone());
        self.resolved_at = Some(now);
        self.resolved_by = Some("timeout".to_string());
        true
    }

    /// Resolve by explicit user choice.
    pub fn resolve_by_user(&mut self, option_id: &str, approve: bool, now: DateTime<Utc>) -> bool {
        if self.status != DecisionStatus::Pending {
            return false;
        }
        self.status = if approve {
            DecisionStatus::Approved
        } else {
            DecisionStatus::Rejected
        };
        self.chosen_option = Some(option_id.to_string());
        self.resolved_at = Some(now);
        self.resolved_by = Some("user".to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn options() -> Vec<DecisionOption> {
        vec![
            DecisionOption {
                id: "proceed".into(),
                label: "Proceed".into(),
                description: "Continue autonomously".into(),
                impact: "Work continues next cycle".into(),
                is_default: true,
            },
            DecisionOption {
                id: "hold".into(),
                label: "Hold".into(),
                description: "Pause this line of work".into(),
                impact: "No further tasks until resolved".into(),
                is_default: false,
            },
        ]
    }

    #[test]
    fn timeout_resolution_picks_default() {
        let now = Utc::now();
        let mut d = Decision::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            AgentRole::Board,
            "Adopt new framework?",
            options(),
            now - Duration::seconds(1),
        );
        assert!(d.resolve_by_timeout(now));
        assert_eq!(d.status, DecisionStatus::Timeout);
        assert_eq!(d.chosen_option.as_deref(), Some("proceed"));
        assert_eq!(d.resolved_by.as_deref(), Some("timeout"));
    }

    #[test]
    fn timeout_is_noop_before_deadline() {
        let now = Utc::now();
        let mut d = Decision::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            AgentRole::Board,
            "Question",
            options(),
            now + Duration::hours(24),
        );
        assert!(!d.resolve_by_timeout(now));
        assert_eq!(d.status, DecisionStatus::Pending);
        assert!(d.chosen_option.is_none());
    }

    #[test]
    fn user_resolution_is_terminal() {
        let now = Utc::now();
        let mut d = Decision::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            AgentRole::Board,
            "Question",
            options(),
            now + Duration::hours(24),
        );
        assert!(d.resolve_by_user("hold", false, now));
        assert_eq!(d.status, DecisionStatus::Rejected);
        assert!(d.status.is_terminal());
        // Further resolutions are rejected
        assert!(!d.resolve_by_timeout(now + Duration::days(2)));
        assert!(!d.resolve_by_user("proceed", true, now));
    }
}
