use atelier_core::{AtelierError, AtelierResult};
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Outcome of one build/test/lint invocation.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub passed: bool,
    /// Combined stdout+stderr, fed into the Dev fix prompt on failure.
    pub output: String,
}

impl CheckOutcome {
    fn skipped() -> Self {
        Self {
            passed: true,
            output: String::new(),
        }
    }
}

/// Build command for a language, if the language has a build step.
fn build_command(language: &str) -> Option<(&'static str, &'static [&'static str])> {
    match language {
        "go" => Some(("go", &["build", "./..."])),
        "typescript" | "javascript" => Some(("npm", &["run", "build"])),
        "dart" => Some(("flutter", &["build"])),
        // Python has no build step.
        _ => None,
    }
}

fn test_command(language: &str) -> Option<(&'static str, &'static [&'static str])> {
    match language {
        "go" => Some(("go", &["test", "./..."])),
        "typescript" | "javascript" => Some(("npm", &["test"])),
        "python" => Some(("pytest", &[])),
        "dart" => Some(("flutter", &["test"])),
        _ => None,
    }
}

fn lint_command(language: &str) -> Option<(&'static str, &'static [&'static str])> {
    match language {
        "go" => Some(("golangci-lint", &["run"])),
        "typescript" | "javascript" => Some(("npm", &["run", "lint"])),
        _ => None,
    }
}

/// Run the language's build inside a working copy. A language with no build
/// step passes trivially.
pub async fn run_build(local_path: &Path, language: &str) -> AtelierResult<CheckOutcome> {
    match build_command(language) {
        Some((program, args)) => run_check(local_path, program, args).await,
        None => Ok(CheckOutcome::skipped()),
    }
}

pub async fn run_tests(local_path: &Path, language: &str) -> AtelierResult<CheckOutcome> {
    match test_command(language) {
        Some((program, args)) => run_check(local_path, program, args).await,
        None => Ok(CheckOutcome::skipped()),
    }
}

pub async fn run_lint(local_path: &Path, language: &str) -> AtelierResult<CheckOutcome> {
    match lint_command(language) {
        Some((program, args)) => run_check(local_path, program, args).await,
        None => Ok(CheckOutcome::skipped()),
    }
}

async fn run_check(local_path: &Path, program: &str, args: &[&str]) -> AtelierResult<CheckOutcome> {
    debug!(program, ?args, path = %local_path.display(), "running toolchain check");

    let output = Command::new(program)
        .args(args)
        .current_dir(local_path)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| AtelierError::Process(format!("failed to run {program}: {e}")))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(CheckOutcome {
        passed: output.status.success(),
        output: combined,
    })
}
