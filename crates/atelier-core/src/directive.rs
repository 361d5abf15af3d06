use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DirectivePriority {
    #[default]
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DirectiveScope {
    #[default]
    Project,
    Repo,
}

/// A standing strategic instruction from the CIO.
///
/// Directives bias the Board and PM roles; high/critical ones can force the
/// PM's `directive` lens and upgrade task priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Directive {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    /// Set iff `scope == DirectiveScope::Repo`.
    pub repo_id: Option<Uuid>,
    pub content: String,
    pub priority: DirectivePriority,
    pub scope: DirectiveScope,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Directive {
    pub fn new(user_id: Uuid, project_id: Uuid, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            project_id,
            repo_id: None,
            content: content.into(),
            priority: DirectivePriority::Normal,
            scope: DirectiveScope::Project,
            active: true,
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_priority(mut self, priority: DirectivePriority) -> Self {
        self.priority = priority;
        self
    }

    /// An expired directive is inactive regardless of its flag.
    pub fn is_in_force(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.map_or(true, |exp| exp > now)
    }

    pub fn is_urgent(&self) -> bool {
        self.priority >= DirectivePriority::High
    }
}
