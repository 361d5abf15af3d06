use atelier_core::{AtelierError, AtelierResult, Directive, Project, Repo};
use atelier_llm::{parse_loose, Completer, CompletionOptions};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Board's verdict on what kind of work to do this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkType {
    #[default]
    Feature,
    Test,
    Refactor,
    Debt,
    Migration,
}

impl std::fmt::Display for WorkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkType::Feature => "feature",
            WorkType::Test => "test",
            WorkType::Refactor => "refactor",
            WorkType::Debt => "debt",
            WorkType::Migration => "migration",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub title: String,
    pub description: String,
}

/// The Board's plan for one cycle.
#[derive(Debug, Clone, Deserialize)]
pub struct BoardPlan {
    pub target_repo: String,
    #[serde(default)]
    pub work_type: WorkType,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub cross_repo_tasks: Vec<String>,
    #[serde(default)]
    pub escalate_to_cio: Option<Escalation>,
    #[serde(skip)]
    pub cost_usd: f64,
}

/// The CTO of the software house: analyzes repo state and directives and
/// decides which repo gets what kind of work this cycle.
pub struct BoardAgent {
    completer: Arc<dyn Completer>,
}

impl BoardAgent {
    pub fn new(completer: Arc<dyn Completer>) -> Self {
        Self { completer }
    }

    pub async fn run(
        &self,
        project: &Project,
        repos: &[Repo],
        directives: &[Directive],
    ) -> AtelierResult<BoardPlan> {
        if repos.is_empty() {
            // Abort before any LLM cost is incurred.
            return Err(AtelierError::NotFound("no repos to analyze".into()));
        }

        let prompt = build_prompt(project, repos, directives);
        let opts = CompletionOptions::default()
            .with_system("You are a technical CTO AI. Always respond with valid JSON only.")
            .with_max_tokens(1024)
            .with_temperature(0.3);

        let completion = self.completer.complete(&prompt, &opts).await?;

        let mut plan = match parse_loose::<BoardPlan>(&completion.text) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "board reply was not valid JSON, defaulting to first repo");
                BoardPlan {
                    target_repo: repos[0].name.clone(),
                    work_type: WorkType::Feature,
                    reasoning: "Defaulting to first repo due to parse error".into(),
                    cross_repo_tasks: Vec::new(),
                    escalate_to_cio: None,
                    cost_usd: 0.0,
                }
            }
        };
        plan.cost_usd = completion.cost_usd;

        Ok(plan)
    }
}

fn build_prompt(project: &Project, repos: &[Repo], directives: &[Directive]) -> String {
    format!(
        "You are the CTO of a software house. You manage multiple repos that form an ecosystem.\n\
         \n\
         PROJECT: {}\n\
         DESCRIPTION: {}\n\
         \n\
         CURRENT STATE OF REPOS:\n{}\n\
         CIO DIRECTIVES:\n{}\n\
         \n\
         Your task:\n\
         1. Analyze the state of each repo\n\
         2. Consider the CIO directives\n\
         3. Decide which repo to prioritize this cycle\n\
         4. Define what type of work to do (feature, test, refactor, debt, migration)\n\
         5. If there are pending cross-repo updates, prioritize them\n\
         \n\
         Respond ONLY with valid JSON (no markdown, no explanation):\n\
         {{\n\
           \"target_repo\": \"repo-name\",\n\
           \"work_type\": \"feature|test|refactor|debt|migration\",\n\
           \"reasoning\": \"why this decision\",\n\
           \"cross_repo_tasks\": [],\n\
           \"escalate_to_cio\": null\n\
         }}",
        project.name,
        project.description,
        repos_state(repos),
        directives_list(directives),
    )
}

pub(crate) fn repos_state(repos: &[Repo]) -> String {
    let mut state = String::new();
    for r in repos {
        let last_commit = r
            .last_commit_at
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "never".into());
        state.push_str(&format!(
            "\nRepo: {}\n  URL: {}\n  Stack: {}/{}\n  Version: {}\n  Health: {:?}\n  Test Coverage: {:.1}%\n  Last Commit: {}\n  Commits Streak: {} days\n",
            r.name,
            r.remote_url,
            r.stack.language,
            r.stack.framework,
            r.current_version,
            r.health,
            r.test_coverage,
            last_commit,
            r.commits_streak,
        ));
    }
    state
}

pub(crate) fn directives_list(directives: &[Directive]) -> String {
    if directives.is_empty() {
        return "No active directives".into();
    }
    directives
        .iter()
        .map(|d| format!("- [{:?}] {}", d.priority, d.content))
        .collect::<Vec<_>>()
        .join("\n")
}
