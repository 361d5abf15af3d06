use crate::seams::{Toolchain, Vcs};
use async_trait::async_trait;
use atelier_core::task::MAX_DEV_ATTEMPTS;
use atelier_core::{AtelierError, AtelierResult, Repo, Task, TaskCommit};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, warn};

/// The external coding agent the Dev role drives.
///
/// Exit status only signals that the CLI ran; real success is judged by the
/// build and test runs that follow.
#[async_trait]
pub trait CodingCli: Send + Sync {
    async fn run(&self, workdir: &Path, prompt: &str) -> AtelierResult<()>;
}

/// `claude -p <prompt>` with cwd set to the working copy.
pub struct ClaudeCli;

#[async_trait]
impl CodingCli for ClaudeCli {
    async fn run(&self, workdir: &Path, prompt: &str) -> AtelierResult<()> {
        let output = Command::new("claude")
            .arg("-p")
            .arg(prompt)
            .current_dir(workdir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AtelierError::Process(format!("failed to run 'claude' CLI: {e}")))?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(AtelierError::Process(format!(
                "claude exited {}: {}",
                output.status.code().unwrap_or(-1),
                combined.trim()
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct DevOutcome {
    pub success: bool,
    pub attempts: u32,
    pub branch_name: String,
    pub local_path: PathBuf,
    pub commits: Vec<TaskCommit>,
    pub error: Option<String>,
}

/// The Dev role: realizes one task inside the working copy.
///
/// Clones or pulls the repo, branches, then up to three attempts of
/// coding-CLI invocation followed by build and tests. A failed build or test
/// turns into a fix prompt for the next attempt. All green: commits are
/// collected since the branch point and the branch is pushed.
pub struct DevAgent {
    cli: Arc<dyn CodingCli>,
    vcs: Arc<dyn Vcs>,
    tools: Arc<dyn Toolchain>,
}

impl DevAgent {
    pub fn new(cli: Arc<dyn CodingCli>, vcs: Arc<dyn Vcs>, tools: Arc<dyn Toolchain>) -> Self {
        Self { cli, vcs, tools }
    }

    pub async fn run(&self, task: &Task, repo: &Repo) -> AtelierResult<DevOutcome> {
        let workdir = self.vcs.ensure_workdir(repo).await?;

        let branch = task.branch_for();
        self.vcs.create_branch(&workdir, &branch).await?;

        let mut outcome = DevOutcome {
            success: false,
            attempts: 0,
            branch_name: branch.clone(),
            local_path: workdir.clone(),
            commits: Vec::new(),
            error: None,
        };

        let language = &repo.stack.language;
        let mut prompt = build_dev_prompt(task);

        for attempt in 1..=MAX_DEV_ATTEMPTS {
            outcome.attempts = attempt;

            if let Err(e) = self.cli.run(&workdir, &prompt).await {
                warn!(task_id = %task.id, attempt, error = %e, "coding cli failed");
                outcome.error = Some(e.to_string());
                continue;
            }

            let build = self.tools.build(&workdir, language).await?;
            if !build.passed {
                outcome.error = Some(format!("Build failed: {}", build.output.trim()));
                prompt = format!(
                    "The build failed with error:\n{}\n\nPlease fix the issue.",
                    build.output
                );
                continue;
            }

            let tests = self.tools.test(&workdir, language).await?;
            if !tests.passed {
                outcome.error = Some(format!("Tests failed: {}", tests.output.trim()));
                prompt = format!(
                    "Tests failed with error:\n{}\n\nPlease fix the failing tests.",
                    tests.output
                );
                continue;
            }

            // All green: collect the branch's commits and push.
            outcome.commits = self
                .vcs
                .commits_since_main(&workdir)
                .await
                .unwrap_or_default()
                .into_iter()
                .map(|(sha, message)| TaskCommit {
                    sha,
                    message,
                    created_at: Utc::now(),
                })
                .collect();

            self.vcs.push(&workdir, &branch).await?;

            outcome.success = true;
            outcome.error = None;
            info!(task_id = %task.id, attempt, commits = outcome.commits.len(), "dev run green");
            break;
        }

        Ok(outcome)
    }
}

fn build_dev_prompt(task: &Task) -> String {
    format!(
        "You are the developer for this project. Implement the following task:\n\
         \n\
         TASK: {}\n\
         \n\
         DESCRIPTION: {}\n\
         \n\
         SPECIFICATION:\n{}\n\
         \n\
         FILES TO CREATE: {:?}\n\
         FILES TO MODIFY: {:?}\n\
         \n\
         ACCEPTANCE CRITERIA:\n{:?}\n\
         \n\
         EDGE CASES TO HANDLE:\n{:?}\n\
         \n\
         RULES:\n\
         - Follow the project's existing patterns and CLAUDE.md if present\n\
         - Make small, focused commits\n\
         - Run build and tests before finishing\n\
         - Don't modify files outside the scope of this task\n\
         - If creating new files, follow the existing structure\n\
         \n\
         Start implementing now.",
        task.title,
        task.description,
        task.spec.what,
        task.spec.files_to_create,
        task.spec.files_to_modify,
        task.spec.acceptance_criteria,
        task.spec.edge_cases,
    )
}
