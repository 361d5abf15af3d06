use crate::seams::{Toolchain, Vcs};
use atelier_core::{
    AtelierError, AtelierResult, QaChecks, QaIssue, QaResult, QaVerdict, Repo, Task,
};
use atelier_llm::{parse_loose, Completer, CompletionOptions};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Diffs longer than this are cut before the review prompt.
const MAX_DIFF_CHARS: usize = 10_000;

#[derive(Debug)]
pub struct QaOutcome {
    pub result: QaResult,
    pub approved: bool,
    pub cost_usd: f64,
}

#[derive(Deserialize)]
struct Review {
    result: QaVerdict,
    #[serde(default)]
    feedback: String,
    #[serde(default)]
    issues: Vec<QaIssue>,
}

/// The QA role: automated checks gate the LLM review.
///
/// A failed build rejects without spending tokens; failed tests send the task
/// back for fixes. Only a green working copy gets the diff review.
pub struct QaAgent {
    completer: Arc<dyn Completer>,
    vcs: Arc<dyn Vcs>,
    tools: Arc<dyn Toolchain>,
}

impl QaAgent {
    pub fn new(completer: Arc<dyn Completer>, vcs: Arc<dyn Vcs>, tools: Arc<dyn Toolchain>) -> Self {
        Self {
            completer,
            vcs,
            tools,
        }
    }

    pub async fn run(&self, task: &Task, repo: &Repo) -> AtelierResult<QaOutcome> {
        let workdir = repo
            .local_path
            .as_ref()
            .map(PathBuf::from)
            .ok_or_else(|| AtelierError::NotFound(format!("repo {} has no working copy", repo.name)))?;
        let branch = task
            .branch_name
            .as_deref()
            .ok_or_else(|| AtelierError::NotFound(format!("task {} has no branch", task.id)))?;

        let language = &repo.stack.language;
        let checks = QaChecks {
            build_passed: self.tools.build(&workdir, language).await?.passed,
            tests_passed: self.tools.test(&workdir, language).await?.passed,
            linter_clean: self.tools.lint(&workdir, language).await?.passed,
        };

        if !checks.build_passed {
            return Ok(QaOutcome {
                result: QaResult {
                    checks,
                    verdict: QaVerdict::Rejected,
                    feedback: "Build failed. Please fix build errors.".into(),
                    issues: Vec::new(),
                },
                approved: false,
                cost_usd: 0.0,
            });
        }

        if !checks.tests_passed {
            return Ok(QaOutcome {
                result: QaResult {
                    checks,
                    verdict: QaVerdict::NeedsFix,
                    feedback: "Tests failed. Please fix failing tests.".into(),
                    issues: Vec::new(),
                },
                approved: false,
                cost_usd: 0.0,
            });
        }

        let mut diff = self.vcs.diff_text(&workdir, branch).await?;
        if diff.len() > MAX_DIFF_CHARS {
            diff.truncate(MAX_DIFF_CHARS);
            diff.push_str("\n... (truncated)");
        }

        let prompt = build_prompt(task, &diff, &checks);
        let opts = CompletionOptions::default()
            .with_system("You are a QA Engineer AI. Always respond with valid JSON only.")
            .with_max_tokens(1024)
            .with_temperature(0.2);

        let completion = self.completer.complete(&prompt, &opts).await?;

        let result = match parse_loose::<Review>(&completion.text) {
            Ok(review) => QaResult {
                checks,
                verdict: review.result,
                feedback: review.feedback,
                issues: review.issues,
            },
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "qa reply was not valid JSON");
                QaResult {
                    checks,
                    verdict: QaVerdict::NeedsFix,
                    feedback: "Review parse error - manual review needed".into(),
                    issues: Vec::new(),
                }
            }
        };

        Ok(QaOutcome {
            approved: result.verdict == QaVerdict::Approved,
            cost_usd: completion.cost_usd,
            result,
        })
    }
}

fn status(passed: bool) -> &'static str {
    if passed {
        "PASSED"
    } else {
        "FAILED"
    }
}

fn build_prompt(task: &Task, diff: &str, checks: &QaChecks) -> String {
    format!(
        "You are the QA reviewer for this project.\n\
         \n\
         TASK ORIGINAL SPEC:\n\
         Title: {}\n\
         Description: {}\n\
         What to implement: {}\n\
         Acceptance Criteria: {:?}\n\
         \n\
         DIFF (changes made):\n{}\n\
         \n\
         AUTOMATED CHECKS:\n\
         - Build: {}\n\
         - Tests: {}\n\
         - Linter: {}\n\
         \n\
         CHECKLIST:\n\
         1. Does the code implement what the spec asks?\n\
         2. Does it follow project patterns?\n\
         3. Are there unhandled edge cases?\n\
         4. Are there obvious bugs?\n\
         5. Is there dead or unnecessary code?\n\
         6. Are the tests meaningful (not trivial)?\n\
         7. Are names clear and descriptive?\n\
         8. Is error handling adequate?\n\
         \n\
         If minor issues (1-2): return NEEDS_FIX with specific feedback\n\
         If major issues: return REJECTED with reason\n\
         If all good: return APPROVED\n\
         \n\
         Respond ONLY with valid JSON:\n\
         {{\n\
           \"result\": \"APPROVED|NEEDS_FIX|REJECTED\",\n\
           \"feedback\": \"overall feedback\",\n\
           \"issues\": [\n\
             {{ \"file\": \"path/to/file\", \"line\": 42, \"issue\": \"description\", \"severity\": \"minor|major\" }}\n\
           ]\n\
         }}",
        task.title,
        task.description,
        task.spec.what,
        task.spec.acceptance_criteria,
        diff,
        status(checks.build_passed),
        status(checks.tests_passed),
        status(checks.linter_clean),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use atelier_core::SourceLens;
    use atelier_git::CheckOutcome;
    use atelier_llm::Completion;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    struct ScriptedCompleter {
        reply: String,
        calls: AtomicU32,
    }

    impl ScriptedCompleter {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.into(),
                calls: AtomicU32::new(0),
            }
        }
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
                input_tokens: 300,
                output_tokens: 80,
                cost_usd: 0.003,
                model: opts.model.clone(),
                duration_ms: 7,
            })
        }
    }

    struct StaticVcs {
        diff: String,
    }

    #[async_trait]
    impl Vcs for StaticVcs {
        async fn ensure_workdir(&self, _repo: &Repo) -> AtelierResult<PathBuf> {
            Ok(PathBuf::from("/tmp/work"))
        }
        async fn create_branch(&self, _w: &Path, _b: &str) -> AtelierResult<()> {
            Ok(())
        }
        async fn commits_since_main(&self, _w: &Path) -> AtelierResult<Vec<(String, String)>> {
            Ok(Vec::new())
        }
        async fn push(&self, _w: &Path, _b: &str) -> AtelierResult<()> {
            Ok(())
        }
        async fn diff_text(&self, _w: &Path, _b: &str) -> AtelierResult<String> {
            Ok(self.diff.clone())
        }
    }

    struct FixedTools {
        build: bool,
        tests: bool,
        lint: bool,
    }

    #[async_trait]
    impl Toolchain for FixedTools {
        async fn build(&self, _w: &Path, _l: &str) -> AtelierResult<CheckOutcome> {
            Ok(CheckOutcome {
                passed: self.build,
                output: String::new(),
            })
        }
        async fn test(&self, _w: &Path, _l: &str) -> AtelierResult<CheckOutcome> {
            Ok(CheckOutcome {
                passed: self.tests,
                output: String::new(),
            })
        }
        async fn lint(&self, _w: &Path, _l: &str) -> AtelierResult<CheckOutcome> {
            Ok(CheckOutcome {
                passed: self.lint,
                output: String::new(),
            })
        }
    }

    fn fixtures() -> (Task, Repo) {
        let mut task = Task::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "Add rate limiting",
            SourceLens::Code,
        );
        task.branch_name = Some(task.branch_for());
        let mut repo = Repo::new(
            task.user_id,
            task.project_id,
            "api",
            "https://github.com/acme/api",
        );
        repo.local_path = Some("/tmp/work/api".into());
        repo.stack.language = "go".into();
        (task, repo)
    }

    fn agent(completer: Arc<ScriptedCompleter>, tools: FixedTools, diff: &str) -> QaAgent {
        QaAgent::new(
            completer,
            Arc::new(StaticVcs { diff: diff.into() }),
            Arc::new(tools),
        )
    }

    #[tokio::test]
    async fn build_failure_rejects_without_llm() {
        let completer = Arc::new(ScriptedCompleter::new("unused"));
        let qa = agent(
            completer.clone(),
            FixedTools {
                build: false,
                tests: true,
                lint: true,
            },
            "",
        );
        let (task, repo) = fixtures();

        let outcome = qa.run(&task, &repo).await.unwrap();
        assert_eq!(outcome.result.verdict, QaVerdict::Rejected);
        assert!(!outcome.approved);
        assert_eq!(outcome.cost_usd, 0.0);
        assert_eq!(completer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_needs_fix_without_llm() {
        let completer = Arc::new(ScriptedCompleter::new("unused"));
        let qa = agent(
            completer.clone(),
            FixedTools {
                build: true,
                tests: false,
                lint: true,
            },
            "",
        );
        let (task, repo) = fixtures();

        let outcome = qa.run(&task, &repo).await.unwrap();
        assert_eq!(outcome.result.verdict, QaVerdict::NeedsFix);
        assert_eq!(completer.calls.load(Ordering::SeqCst), 0);
        assert!(outcome.result.checks.build_passed);
        assert!(!outcome.result.checks.tests_passed);
    }

    #[tokio::test]
    async fn approved_review_parses_issues() {
        let completer = Arc::new(ScriptedCompleter::new(
            r#"{"result": "APPROVED", "feedback": "clean change", "issues": []}"#,
        ));
        let qa = agent(
            completer,
            FixedTools {
                build: true,
                tests: true,
                lint: true,
            },
            "diff --git a/x b/x",
        );
        let (task, repo) = fixtures();

        let outcome = qa.run(&task, &repo).await.unwrap();
        assert!(outcome.approved);
        assert_eq!(outcome.result.verdict, QaVerdict::Approved);
        assert!(outcome.cost_usd > 0.0);
    }

    #[tokio::test]
    async fn needs_fix_review_with_issues() {
        let completer = Arc::new(ScriptedCompleter::new(
            r#"{"result": "NEEDS_FIX", "feedback": "missing edge case", "issues": [
                {"file": "limiter.go", "line": 42, "issue": "window edge unhandled", "severity": "minor"}
            ]}"#,
        ));
        let qa = agent(
            completer,
            FixedTools {
                build: true,
                tests: true,
                lint: true,
            },
            "diff",
        );
        let (task, repo) = fixtures();

        let outcome = qa.run(&task, &repo).await.unwrap();
        assert!(!outcome.approved);
        assert_eq!(outcome.result.issues.len(), 1);
        assert_eq!(outcome.result.issues[0].line, 42);
    }

    #[tokio::test]
    async fn unparseable_review_defaults_to_needs_fix() {
        let completer = Arc::new(ScriptedCompleter::new(
            "Looks mostly fine but I'd tweak naming.",
        ));
        let qa = agent(
            completer,
            FixedTools {
                build: true,
                tests: true,
                lint: true,
            },
            "diff",
        );
        let (task, repo) = fixtures();

        let outcome = qa.run(&task, &repo).await.unwrap();
        assert_eq!(outcome.result.verdict, QaVerdict::NeedsFix);
        assert!(outcome.result.feedback.contains("manual review needed"));
    }

    #[tokio::test]
    async fn long_diff_is_truncated_in_prompt() {
        let (task, _) = fixtures();
        let long_diff = "x".repeat(MAX_DIFF_CHARS + 500);
        let mut truncated = long_diff.clone();
        truncated.truncate(MAX_DIFF_CHARS);
        truncated.push_str("\n... (truncated)");

        let checks = QaChecks {
            build_passed: true,
            tests_passed: true,
            linter_clean: true,
        };
        let prompt = build_prompt(&task, &truncated, &checks);
        assert!(prompt.contains("... (truncated)"));
        assert!(!prompt.contains(&long_diff));
    }

    #[tokio::test]
    async fn missing_working_copy_is_not_found() {
        let completer = Arc::new(ScriptedCompleter::new("unused"));
        let qa = agent(
            completer,
            FixedTools {
                build: true,
                tests: true,
                lint: true,
            },
            "",
        );
        let (task, mut repo) = fixtures();
        repo.local_path = None;

        let err = qa.run(&task, &repo).await.unwrap_err();
        assert!(matches!(err, AtelierError::NotFound(_)));
    }
}
