use async_trait::async_trait;
use atelier_core::{AtelierResult, Repo};
use atelier_git::{toolchain, CheckOutcome, GitDriver};
use std::path::{Path, PathBuf};

/// The version-control operations the Dev and QA roles need.
///
/// `GitDriver` is the production implementation; tests substitute a scripted
/// double so the agent loops run without a git binary or network.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Clone the repo if it has no working copy yet, otherwise pull latest.
    /// Returns the working-copy path.
    async fn ensure_workdir(&self, repo: &Repo) -> AtelierResult<PathBuf>;
    async fn create_branch(&self, workdir: &Path, branch: &str) -> AtelierResult<()>;
    /// `(sha, subject)` pairs on the current branch since it left main.
    async fn commits_since_main(&self, workdir: &Path) -> AtelierResult<Vec<(String, String)>>;
    async fn push(&self, workdir: &Path, branch: &str) -> AtelierResult<()>;
    async fn diff_text(&self, workdir: &Path, branch: &str) -> AtelierResult<String>;
}

#[async_trait]
impl Vcs for GitDriver {
    async fn ensure_workdir(&self, repo: &Repo) -> AtelierResult<PathBuf> {
        if let Some(path) = &repo.local_path {
            let path = PathBuf::from(path);
            if path.exists() {
                self.pull(&path).await?;
                return Ok(path);
            }
        }
        let info = self.clone_repo(&repo.remote_url).await?;
        Ok(info.local_path)
    }

    async fn create_branch(&self, workdir: &Path, branch: &str) -> AtelierResult<()> {
        GitDriver::create_branch(self, workdir, branch).await
    }

    async fn commits_since_main(&self, workdir: &Path) -> AtelierResult<Vec<(String, String)>> {
        GitDriver::commits_since_main(self, workdir).await
    }

    async fn push(&self, workdir: &Path, branch: &str) -> AtelierResult<()> {
        GitDriver::push(self, workdir, branch).await
    }

    async fn diff_text(&self, workdir: &Path, branch: &str) -> AtelierResult<String> {
        GitDriver::diff_text(self, workdir, branch).await
    }
}

/// Build/test/lint invocation inside a working copy.
#[async_trait]
pub trait Toolchain: Send + Sync {
    async fn build(&self, workdir: &Path, language: &str) -> AtelierResult<CheckOutcome>;
    async fn test(&self, workdir: &Path, language: &str) -> AtelierResult<CheckOutcome>;
    async fn lint(&self, workdir: &Path, language: &str) -> AtelierResult<CheckOutcome>;
}

/// Runs the real language toolchains on this host.
pub struct HostToolchain;

#[async_trait]
impl Toolchain for HostToolchain {
    async fn build(&self, workdir: &Path, language: &str) -> AtelierResult<CheckOutcome> {
        toolchain::run_build(workdir, language).await
    }

    async fn test(&self, workdir: &Path, language: &str) -> AtelierResult<CheckOutcome> {
        toolchain::run_tests(workdir, language).await
    }

    async fn lint(&self, workdir: &Path, language: &str) -> AtelierResult<CheckOutcome> {
        toolchain::run_lint(workdir, language).await
    }
}
