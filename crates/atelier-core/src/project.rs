use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How often the scheduler fires cycles for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Low,
    #[default]
    Normal,
    High,
}

/// A registered project: a set of repos worked on as one ecosystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: String,
    /// Market references (competitor URLs) passed to the PM as prose hints.
    #[serde(default)]
    pub references: Vec<String>,
    pub frequency: Frequency,
    /// Maximum daily LLM spend in USD. Must be > 0.
    pub daily_budget_usd: f64,
    /// Inactive projects are never scheduled.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(user_id: Uuid, name: impl Into<String>, daily_budget_usd: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            description: String::new(),
            references: Vec::new(),
            frequency: Frequency::Normal,
            daily_budget_usd,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = frequency;
        self
    }
}
