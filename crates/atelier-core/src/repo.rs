use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RepoHealth {
    #[default]
    Green,
    Yellow,
    Red,
}

/// Detected tech stack of a working copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Stack {
    /// go, typescript, javascript, python, dart, ...
    pub language: String,
    /// gin, nextjs, fastapi, flutter, ...
    pub framework: String,
    /// mongodb, postgresql, ...
    pub database: String,
    /// go.mod, package.json, pubspec.yaml, requirements.txt
    pub package_file: String,
    /// docker, docker-compose, github-actions, ...
    pub tools: Vec<String>,
}

/// Result of analyzing a repo's contents.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RepoAnalysis {
    pub summary: String,
    pub models: Vec<String>,
    pub endpoints: Vec<String>,
    pub features: Vec<String>,
    pub patterns: Vec<String>,
    pub file_count: usize,
    pub lines_of_code: usize,
    pub todos: Vec<String>,
    pub test_files: usize,
    pub dependencies: HashMap<String, String>,
    pub analyzed_at: Option<DateTime<Utc>>,
}

/// A source repository owned by a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repo {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub remote_url: String,
    pub name: String,
    pub stack: Stack,
    pub analysis: RepoAnalysis,
    pub current_version: String,
    pub health: RepoHealth,
    pub test_coverage: f64,
    /// Days with consecutive commits.
    pub commits_streak: u32,
    /// IDs of other repos in the same project this one depends on.
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    /// Path of the local working copy; empty until first clone.
    pub local_path: Option<String>,
    pub claude_md_exists: bool,
    pub last_commit_at: Option<DateTime<Utc>>,
    pub last_analyzed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Repo {
    pub fn new(
        user_id: Uuid,
        project_id: Uuid,
        name: impl Into<String>,
        remote_url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            project_id,
            remote_url: remote_url.into(),
            name: name.into(),
            stack: Stack::default(),
            analysis: RepoAnalysis::default(),
            current_version: String::new(),
            health: RepoHealth::Green,
            test_coverage: 0.0,
            commits_streak: 0,
            dependencies: Vec::new(),
            local_path: None,
            claude_md_exists: false,
            last_commit_at: None,
            last_analyzed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Coverage below 60% biases the PM toward the `code` lens. Exactly 60 is
    /// not low.
    pub fn has_low_coverage(&self) -> bool {
        self.test_coverage < 60.0
    }
}
