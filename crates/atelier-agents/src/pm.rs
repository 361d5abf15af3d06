use crate::board::{directives_list, WorkType};
use crate::lens::LensPicker;
use atelier_core::{
    AtelierResult, Directive, Project, Repo, SourceLens, Task, TaskPriority, TaskSize, TaskSpec,
    TaskStatus,
};
use atelier_llm::{parse_loose, Completer, CompletionOptions};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct PmOutcome {
    pub task: Task,
    pub cost_usd: f64,
}

#[derive(Deserialize)]
struct TaskDraft {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    spec: TaskSpec,
    #[serde(default)]
    estimated_size: TaskSize,
    #[serde(default)]
    unlocks: Vec<String>,
}

/// The Product Manager: picks a lens and drafts exactly one implementable
/// task for the Board's target repo.
pub struct PmAgent {
    completer: Arc<dyn Completer>,
    lens_picker: Mutex<LensPicker>,
}

impl PmAgent {
    pub fn new(completer: Arc<dyn Completer>) -> Self {
        Self {
            completer,
            lens_picker: Mutex::new(LensPicker::new()),
        }
    }

    /// Deterministic draws for tests.
    pub fn with_lens_picker(completer: Arc<dyn Completer>, picker: LensPicker) -> Self {
        Self {
            completer,
            lens_picker: Mutex::new(picker),
        }
    }

    pub async fn run(
        &self,
        project: &Project,
        repo: &Repo,
        work_type: WorkType,
        directives: &[Directive],
    ) -> AtelierResult<PmOutcome> {
        let lens = self.lens_picker.lock().await.pick(repo, directives);

        let prompt = build_prompt(project, repo, work_type, directives, lens);
        let opts = CompletionOptions::default()
            .with_system("You are a Product Manager AI. Always respond with valid JSON only.")
            .with_max_tokens(2048)
            .with_temperature(0.5);

        let completion = self.completer.complete(&prompt, &opts).await?;
        let draft: TaskDraft = parse_loose(&completion.text)?;

        let mut task = Task::new(project.user_id, project.id, repo.id, draft.title, lens);
        task.description = draft.description;
        task.reasoning = draft.reasoning;
        task.spec = draft.spec;
        task.estimated_size = draft.estimated_size;
        task.unlocks = draft.unlocks;
        task.status = TaskStatus::Backlog;
        task.cost_usd = completion.cost_usd;
        task.tokens_used = completion.input_tokens + completion.output_tokens;

        // A standing urgent directive upgrades the draft's priority.
        if directives.iter().any(|d| d.is_urgent()) {
            task.priority = TaskPriority::High;
        }

        Ok(PmOutcome {
            cost_usd: completion.cost_usd,
            task,
        })
    }
}

fn build_prompt(
    project: &Project,
    repo: &Repo,
    work_type: WorkType,
    directives: &[Directive],
    lens: SourceLens,
) -> String {
    let features = if repo.analysis.features.is_empty() {
        "No features detected yet".to_string()
    } else {
        repo.analysis
            .features
            .iter()
            .map(|f| format!("- {f}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You are the Product Manager for this repo.\n\
         \n\
         PROJECT: {}\n\
         REPO: {}\n\
         WORK TYPE (defined by CTO): {}\n\
         REFERENCES: {:?}\n\
         EXISTING FEATURES:\n{}\n\
         CIO DIRECTIVES:\n{}\n\
         \n\
         Use the \"{}\" lens to generate ONE task.\n\
         \n\
         Lenses explained:\n\
         - market: Compare with market references, find missing features\n\
         - expansion: What does the last feature unlock? Expand naturally\n\
         - persona: As a user, what's frustrating or missing?\n\
         - code: Technical debt, missing tests, refactoring needs\n\
         - directive: Directly serve an active CIO directive\n\
         \n\
         The task must:\n\
         - Be implementable in 1-3 commits\n\
         - Be concrete and specific (not \"improve code\")\n\
         - Have enough technical spec for a dev to implement\n\
         \n\
         Respond ONLY with valid JSON (no markdown):\n\
         {{\n\
           \"title\": \"...\",\n\
           \"description\": \"...\",\n\
           \"source_lens\": \"{}\",\n\
           \"reasoning\": \"why this task now\",\n\
           \"spec\": {{\n\
             \"what\": \"what to implement\",\n\
             \"files_to_create\": [],\n\
             \"files_to_modify\": [],\n\
             \"acceptance_criteria\": [],\n\
             \"tests_required\": true,\n\
             \"edge_cases\": []\n\
           }},\n\
           \"estimated_size\": \"small|medium|large\",\n\
           \"depends_on\": [],\n\
           \"unlocks\": []\n\
         }}",
        project.name,
        repo.name,
        work_type,
        project.references,
        features,
        directives_list(directives),
        lens,
        lens,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use atelier_core::{AtelierError, DirectivePriority};
    use atelier_llm::Completion;
    use uuid::Uuid;

    struct ScriptedCompleter {
        reply: String,
    }

    #[async_trait]
    impl Completer for ScriptedCompleter {
        async fn complete(
            &self,
            _prompt: &str,
            opts: &CompletionOptions,
        ) -> AtelierResult<Completion> {
            Ok(Completion {
                text: self.reply.clone(),
                input_tokens: 200,
                output_tokens: 150,
                cost_usd: 0.002,
                model: opts.model.clone(),
                duration_ms: 8,
            })
        }
    }

    fn fixtures() -> (Project, Repo) {
        let project = Project::new(Uuid::new_v4(), "shopfront", 5.0);
        let repo = Repo::new(project.user_id, project.id, "api", "https://github.com/acme/api");
        (project, repo)
    }

    const DRAFT: &str = r#"{
        "title": "Add request rate limiting",
        "description": "Protect the public API with a per-client limit",
        "source_lens": "code",
        "reasoning": "Repeated abuse reports",
        "spec": {
            "what": "Token bucket middleware",
            "files_to_create": ["middleware/rate_limit.go"],
            "files_to_modify": ["router.go"],
            "acceptance_criteria": ["429 after limit"],
            "tests_required": true,
            "edge_cases": ["burst at window edge"]
        },
        "estimated_size": "small",
        "depends_on": [],
        "unlocks": ["per-plan quotas"]
    }"#;

    #[tokio::test]
    async fn drafts_a_backlog_task() {
        let (project, repo) = fixtures();
        let agent = PmAgent::with_lens_picker(
            Arc::new(ScriptedCompleter { reply: DRAFT.into() }),
            LensPicker::seeded(1),
        );

        let outcome = agent
            .run(&project, &repo, WorkType::Feature, &[])
            .await
            .unwrap();
        let task = outcome.task;

        assert_eq!(task.title, "Add request rate limiting");
        assert_eq!(task.status, TaskStatus::Backlog);
        assert_eq!(task.priority, TaskPriority::Normal);
        assert_eq!(task.estimated_size, TaskSize::Small);
        assert_eq!(task.spec.files_to_create, vec!["middleware/rate_limit.go"]);
        assert_eq!(task.tokens_used, 350);
        assert!(task.cost_usd > 0.0);
    }

    #[tokio::test]
    async fn urgent_directive_upgrades_priority() {
        let (project, repo) = fixtures();
        let directives = [Directive::new(project.user_id, project.id, "ship auth now")
            .with_priority(DirectivePriority::Critical)];
        let agent = PmAgent::with_lens_picker(
            Arc::new(ScriptedCompleter { reply: DRAFT.into() }),
            LensPicker::seeded(1),
        );

        let outcome = agent
            .run(&project, &repo, WorkType::Feature, &directives)
            .await
            .unwrap();
        assert_eq!(outcome.task.priority, TaskPriority::High);
    }

    #[tokio::test]
    async fn unparseable_draft_is_an_error() {
        let (project, repo) = fixtures();
        let agent = PmAgent::with_lens_picker(
            Arc::new(ScriptedCompleter {
                reply: "no task today".into(),
            }),
            LensPicker::seeded(1),
        );

        let err = agent
            .run(&project, &repo, WorkType::Feature, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AtelierError::Parse(_)));
    }

    #[tokio::test]
    async fn fenced_draft_still_parses() {
        let (project, repo) = fixtures();
        let agent = PmAgent::with_lens_picker(
            Arc::new(ScriptedCompleter {
                reply: format!("```json\n{DRAFT}\n```"),
            }),
            LensPicker::seeded(1),
        );

        let outcome = agent
            .run(&project, &repo, WorkType::Feature, &[])
            .await
            .unwrap();
        assert_eq!(outcome.task.title, "Add request rate limiting");
    }
}
