use atelier_core::{AtelierResult, Project, Repo};
use atelier_llm::{parse_loose, Completer, CompletionOptions};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct FollowUp {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// "high", "medium" or "low"
    #[serde(default)]
    pub priority: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoUpdate {
    pub target_repo: String,
    #[serde(default)]
    pub tasks: Vec<FollowUp>,
}

#[derive(Debug, Default)]
pub struct IntegrationOutcome {
    pub updates: Vec<RepoUpdate>,
    pub cost_usd: f64,
}

#[derive(Deserialize, Default)]
struct Updates {
    #[serde(default)]
    updates: Vec<RepoUpdate>,
}

/// The Integration role: after completions, checks whether a repo's changes
/// ripple into its dependents and proposes follow-up briefs per affected
/// repo. Empty output is a valid answer.
pub struct IntegrationAgent {
    completer: Arc<dyn Completer>,
}

impl IntegrationAgent {
    pub fn new(completer: Arc<dyn Completer>) -> Self {
        Self { completer }
    }

    pub async fn run(&self, project: &Project, repos: &[Repo]) -> AtelierResult<IntegrationOutcome> {
        if repos.len() <= 1 {
            return Ok(IntegrationOutcome::default());
        }

        let graph = dependency_graph(repos);
        if graph.is_empty() {
            return Ok(IntegrationOutcome::default());
        }

        let prompt = build_prompt(project, repos, &graph);
        let opts = CompletionOptions::default()
            .with_system("You are an Integration Engineer AI. Always respond with valid JSON only.")
            .with_max_tokens(1024)
            .with_temperature(0.3);

        let completion = self.completer.complete(&prompt, &opts).await?;

        let updates = match parse_loose::<Updates>(&completion.text) {
            Ok(parsed) => parsed.updates,
            Err(e) => {
                warn!(error = %e, "integration reply was not valid JSON, assuming no updates");
                Vec::new()
            }
        };

        Ok(IntegrationOutcome {
            updates,
            cost_usd: completion.cost_usd,
        })
    }
}

fn dependency_names(repo: &Repo, all: &[Repo]) -> Vec<String> {
    repo.dependencies
        .iter()
        .filter_map(|dep| all.iter().find(|r| r.id == *dep))
        .map(|r| r.name.clone())
        .collect()
}

fn dependency_graph(repos: &[Repo]) -> String {
    let mut graph = String::new();
    for r in repos {
        if !r.dependencies.is_empty() {
            graph.push_str(&format!("{} -> {:?}\n", r.name, dependency_names(r, repos)));
        }
    }
    graph
}

fn build_prompt(project: &Project, repos: &[Repo], graph: &str) -> String {
    let mut repos_state = String::new();
    for r in repos {
        let last_commit = r
            .last_commit_at
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "never".into());
        repos_state.push_str(&format!(
            "\nRepo: {}\n  Version: {}\n  Last Commit: {}\n  Dependencies: {:?}\n",
            r.name,
            r.current_version,
            last_commit,
            dependency_names(r, repos),
        ));
    }

    format!(
        "You are the Integration Agent for this project ecosystem.\n\
         \n\
         PROJECT: {}\n\
         \n\
         REPOS AND THEIR STATES:\n{}\n\
         DEPENDENCY GRAPH:\n{}\n\
         \n\
         Your task:\n\
         1. Identify if any repo's update affects dependent repos\n\
         2. For each affected repo, suggest specific tasks to update dependencies\n\
         3. Consider:\n\
            - API changes that need downstream updates\n\
            - Shared types/interfaces that changed\n\
            - Version bumps needed in go.mod/package.json\n\
            - Breaking changes that need adaptation\n\
         \n\
         If no cross-repo updates are needed, return empty updates.\n\
         \n\
         Respond ONLY with valid JSON:\n\
         {{\n\
           \"updates\": [\n\
             {{\n\
               \"target_repo\": \"repo-name\",\n\
               \"tasks\": [\n\
                 {{\n\
                   \"title\": \"task title\",\n\
                   \"description\": \"what to do\",\n\
                   \"priority\": \"high|medium|low\"\n\
                 }}\n\
               ]\n\
             }}\n\
           ]\n\
         }}",
        project.name, repos_state, graph,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use atelier_llm::Completion;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    struct ScriptedCompleter {
        reply: String,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Completer for ScriptedCompleter {
        async fn complete(
            &self,
            _prompt: &str,
            opts: &CompletionOptions,
        ) -> AtelierResult<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Completion {
                text: self.reply.clone(),
                input_tokens: 100,
                output_tokens: 60,
                cost_usd: 0.0015,
                model: opts.model.clone(),
                duration_ms: 4,
            })
        }
    }

    fn ecosystem() -> (Project, Vec<Repo>) {
        let project = Project::new(Uuid::new_v4(), "shopfront", 5.0);
        let core = Repo::new(project.user_id, project.id, "core", "https://github.com/acme/core");
        let mut api = Repo::new(project.user_id, project.id, "api", "https://github.com/acme/api");
        api.dependencies = vec![core.id];
        (project, vec![core, api])
    }

    #[tokio::test]
    async fn single_repo_skips_llm() {
        let completer = Arc::new(ScriptedCompleter {
            reply: "unused".into(),
            calls: AtomicU32::new(0),
        });
        let agent = IntegrationAgent::new(completer.clone());
        let (project, repos) = ecosystem();

        let outcome = agent.run(&project, &repos[..1]).await.unwrap();
        assert!(outcome.updates.is_empty());
        assert_eq!(outcome.cost_usd, 0.0);
        assert_eq!(completer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_dependencies_skips_llm() {
        let completer = Arc::new(ScriptedCompleter {
            reply: "unused".into(),
            calls: AtomicU32::new(0),
        });
        let agent = IntegrationAgent::new(completer.clone());
        let (project, mut repos) = ecosystem();
        repos[1].dependencies.clear();

        let outcome = agent.run(&project, &repos).await.unwrap();
        assert!(outcome.updates.is_empty());
        assert_eq!(completer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn proposes_follow_ups() {
        let completer = Arc::new(ScriptedCompleter {
            reply: r#"{"updates": [{"target_repo": "api", "tasks": [
                {"title": "Bump core to v2", "description": "Adapt to renamed types", "priority": "high"}
            ]}]}"#
                .into(),
            calls: AtomicU32::new(0),
        });
        let agent = IntegrationAgent::new(completer);
        let (project, repos) = ecosystem();

        let outcome = agent.run(&project, &repos).await.unwrap();
        assert_eq!(outcome.updates.len(), 1);
        assert_eq!(outcome.updates[0].target_repo, "api");
        assert_eq!(outcome.updates[0].tasks[0].priority, "high");
        assert!(outcome.cost_usd > 0.0);
    }

    #[tokio::test]
    async fn parse_failure_means_no_updates() {
        let completer = Arc::new(ScriptedCompleter {
            reply: "everything is fine, nothing to do".into(),
            calls: AtomicU32::new(0),
        });
        let agent = IntegrationAgent::new(completer);
        let (project, repos) = ecosystem();

        let outcome = agent.run(&project, &repos).await.unwrap();
        assert!(outcome.updates.is_empty());
        // Cost still accrued for the failed parse.
        assert!(outcome.cost_usd > 0.0);
    }

    #[test]
    fn graph_renders_only_repos_with_deps() {
        let (_, repos) = ecosystem();
        let graph = dependency_graph(&repos);
        assert!(graph.contains("api ->"));
        assert!(!graph.contains("core ->"));
    }
}
