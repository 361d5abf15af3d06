use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a task idea came from: the PM's viewpoint when drafting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceLens {
    /// Compare with market references, find missing features.
    Market,
    /// What does the last feature unlock? Expand naturally.
    Expansion,
    /// As a user, what's frustrating or missing?
    Persona,
    /// Technical debt, missing tests, refactoring needs.
    Code,
    /// Compliance with an active CIO directive.
    Directive,
}

impl std::fmt::Display for SourceLens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceLens::Market => "market",
            SourceLens::Expansion => "expansion",
            SourceLens::Persona => "persona",
            SourceLens::Code => "code",
            SourceLens::Directive => "directive",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskSize {
    Small,
    #[default]
    Medium,
    Large,
}

/// Task lifecycle. Transitions are only valid along:
///
/// ```text
/// backlog -> ready -> in_dev -> in_review -> done
///              ^                    |
///              +---- needs fix -----+--> rejected (attempts >= 3)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Backlog,
    Ready,
    InDev,
    InReview,
    Done,
    Rejected,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Rejected)
    }

    /// Whether moving to `next` is a legal edge of the status graph.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Backlog, Ready)
                | (Ready, InDev)
                | (InDev, InReview)
                | (InReview, Ready)
                | (InReview, Done)
                | (InReview, Rejected)
        )
    }
}

/// The technical specification the PM attaches to a task.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskSpec {
    pub what: String,
    #[serde(default)]
    pub files_to_create: Vec<String>,
    #[serde(default)]
    pub files_to_modify: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub tests_required: bool,
    #[serde(default)]
    pub edge_cases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCommit {
    pub sha: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QaVerdict {
    Approved,
    NeedsFix,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QaChecks {
    pub build_passed: bool,
    pub tests_passed: bool,
    pub linter_clean: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaIssue {
    pub file: String,
    pub line: u32,
    pub issue: String,
    /// "minor" or "major"
    pub severity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaResult {
    pub checks: QaChecks,
    pub verdict: QaVerdict,
    pub feedback: String,
    #[serde(default)]
    pub issues: Vec<QaIssue>,
}

/// Maximum Dev attempts before QA's next non-approval rejects the task.
pub const MAX_DEV_ATTEMPTS: u32 = 3;

/// The unit of Dev work, drafted by the PM and driven by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub repo_id: Uuid,
    pub title: String,
    pub description: String,
    pub spec: TaskSpec,
    pub status: TaskStatus,
    pub source_lens: SourceLens,
    pub reasoning: String,
    pub priority: TaskPriority,
    pub estimated_size: TaskSize,
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
    #[serde(default)]
    pub unlocks: Vec<String>,
    pub dev_attempts: u32,
    pub branch_name: Option<String>,
    #[serde(default)]
    pub commits: Vec<TaskCommit>,
    pub qa_result: Option<QaResult>,
    pub cost_usd: f64,
    pub tokens_used: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        user_id: Uuid,
        project_id: Uuid,
        repo_id: Uuid,
        title: impl Into<String>,
        lens: SourceLens,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            project_id,
            repo_id,
            title: title.into(),
            description: String::new(),
            spec: TaskSpec::default(),
            status: TaskStatus::Backlog,
            source_lens: lens,
            reasoning: String::new(),
            priority: TaskPriority::Normal,
            estimated_size: TaskSize::Medium,
            depends_on: Vec::new(),
            unlocks: Vec::new(),
            dev_attempts: 0,
            branch_name: None,
            commits: Vec::new(),
            qa_result: None,
            cost_usd: 0.0,
            tokens_used: 0,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// The branch a Dev run works on: `feat/<id-prefix>-<slug>`.
    pub fn branch_for(&self) -> String {
        let prefix = &self.id.simple().to_string()[..8];
        format!("feat/{}-{}", prefix, slugify(&self.title))
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.dev_attempts >= MAX_DEV_ATTEMPTS
    }
}

/// Lowercase, dashes for spaces, ascii alphanumerics only, max 30 chars.
pub fn slugify(s: &str) -> String {
    let mut out = String::new();
    for c in s.to_lowercase().chars() {
        match c {
            'a'..='z' | '0'..='9' => out.push(c),
            ' ' | '-' | '_' => out.push('-'),
            _ => {}
        }
        if out.len() >= 30 {
            break;
        }
    }
    out.trim_matches('-').to_string()
}
