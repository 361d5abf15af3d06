use atelier_core::{AtelierError, AtelierResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{info, warn};

/// Identity of a cloned repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoInfo {
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub url: String,
    pub local_path: PathBuf,
    pub default_branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub date: DateTime<Utc>,
    pub files_changed: u32,
    pub additions: u32,
    pub deletions: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub status: FileStatus,
    pub additions: u32,
    pub deletions: u32,
    pub patch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffInfo {
    pub ref1: String,
    pub ref2: String,
    pub files: Vec<FileDiff>,
    pub total_added: u32,
    pub total_removed: u32,
}

/// Drives the external `git` binary and the hosting provider's HTTP API.
///
/// Working copies live under `work_dir`, one directory per repo full-name.
/// Serialization of access is the caller's job: the per-project singleton
/// cycle guarantees only one cycle touches a project's copies at a time.
pub struct GitDriver {
    work_dir: PathBuf,
    host_token: Option<String>,
    http: reqwest::Client,
}

impl GitDriver {
    pub fn new(work_dir: impl Into<PathBuf>, host_token: Option<String>) -> AtelierResult<Self> {
        let work_dir = work_dir.into();
        std::fs::create_dir_all(&work_dir)?;
        if host_token.is_none() {
            warn!("hosting token not set, private clones and remote creation will fail");
        }
        Ok(Self {
            work_dir,
            host_token,
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
        })
    }

    /// Clone a repository, replacing any existing working copy.
    pub async fn clone_repo(&self, repo_url: &str) -> AtelierResult<RepoInfo> {
        let mut info = parse_repo_url(repo_url)
            .ok_or_else(|| AtelierError::Git(format!("unrecognized repo url: {repo_url}")))?;
        info.local_path = self.work_dir.join(&info.full_name);

        if info.local_path.exists() {
            tokio::fs::remove_dir_all(&info.local_path).await?;
        }

        let clone_url = match &self.host_token {
            Some(token) => format!("https://{}@github.com/{}.git", token, info.full_name),
            None => repo_url.to_string(),
        };

        run_git(
            None,
            &[
                "clone",
                "--depth=1",
                &clone_url,
                &info.local_path.to_string_lossy(),
            ],
        )
        .await?;

        info.default_branch = self
            .current_branch(&info.local_path)
            .await
            .unwrap_or_else(|_| "main".to_string());

        info!(repo = %info.full_name, path = %info.local_path.display(), "repo cloned");
        Ok(info)
    }

    pub async fn pull(&self, local_path: &Path) -> AtelierResult<()> {
        run_git(Some(local_path), &["pull", "--rebase"]).await?;
        Ok(())
    }

    /// Create and check out a branch from main (or master, whichever exists).
    pub async fn create_branch(&self, local_path: &Path, branch: &str) -> AtelierResult<()> {
        // One of the two will fail on any given repo; that is fine.
        let _ = run_git(Some(local_path), &["checkout", "main"]).await;
        let _ = run_git(Some(local_path), &["checkout", "master"]).await;

        run_git(Some(local_path), &["checkout", "-b", branch]).await?;
        info!(path = %local_path.display(), branch, "branch created");
        Ok(())
    }

    /// Stage everything and commit. Errors when the tree is clean.
    pub async fn commit_all(&self, local_path: &Path, message: &str) -> AtelierResult<CommitInfo> {
        run_git(Some(local_path), &["add", "-A"]).await?;

        let status = run_git(Some(local_path), &["status", "--porcelain"]).await?;
        if status.trim().is_empty() {
            return Err(AtelierError::Git("no changes to commit".into()));
        }

        run_git(Some(local_path), &["commit", "-m", message]).await?;

        let log = run_git(Some(local_path), &["log", "-1", "--format=%H|%s|%an|%aI"]).await?;
        let mut parts = log.trim().splitn(4, '|');
        let sha = parts.next().unwrap_or_default().to_string();
        let message = parts.next().unwrap_or_default().to_string();
        let author = parts.next().unwrap_or_default().to_string();
        let date = parts
            .next()
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let stat = run_git(Some(local_path), &["diff", "--stat", "HEAD~1", "HEAD"])
            .await
            .unwrap_or_default();
        let (additions, deletions, files_changed) = parse_git_stat(&stat);

        info!(sha = %&sha[..sha.len().min(8)], "commit created");
        Ok(CommitInfo {
            sha,
            message,
            author,
            date,
            files_changed,
            additions,
            deletions,
        })
    }

    pub async fn push(&self, local_path: &Path, branch: &str) -> AtelierResult<()> {
        run_git(Some(local_path), &["push", "-u", "origin", branch]).await?;
        info!(path = %local_path.display(), branch, "branch pushed");
        Ok(())
    }

    pub async fn diff(&self, local_path: &Path, ref1: &str, ref2: &str) -> AtelierResult<DiffInfo> {
        let range = format!("{ref1}...{ref2}");
        let output = run_git(Some(local_path), &["diff", &range]).await?;

        let files = parse_diff_output(&output);
        let total_added = files.iter().map(|f| f.additions).sum();
        let total_removed = files.iter().map(|f| f.deletions).sum();

        Ok(DiffInfo {
            ref1: ref1.to_string(),
            ref2: ref2.to_string(),
            files,
            total_added,
            total_removed,
        })
    }

    /// Raw diff text against main (master fallback), for the QA prompt.
    pub async fn diff_text(&self, local_path: &Path, branch: &str) -> AtelierResult<String> {
        match run_git(Some(local_path), &["diff", &format!("main...{branch}")]).await {
            Ok(out) => Ok(out),
            Err(_) => run_git(Some(local_path), &["diff", &format!("master...{branch}")]).await,
        }
    }

    /// Commits on the current branch since it left main (master fallback).
    /// Lines are `<sha>|<subject>`.
    pub async fn commits_since_main(&self, local_path: &Path) -> AtelierResult<Vec<(String, String)>> {
        let output = match run_git(Some(local_path), &["log", "main..HEAD", "--format=%H|%s"]).await
        {
            Ok(out) => out,
            Err(_) => run_git(Some(local_path), &["log", "master..HEAD", "--format=%H|%s"]).await?,
        };

        Ok(output
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| {
                l.split_once('|')
                    .map(|(sha, msg)| (sha.to_string(), msg.to_string()))
            })
            .collect())
    }

    pub async fn list_files(
        &self,
        local_path: &Path,
        pattern: Option<&str>,
    ) -> AtelierResult<Vec<String>> {
        let output = match pattern {
            Some(p) => run_git(Some(local_path), &["ls-files", p]).await?,
            None => run_git(Some(local_path), &["ls-files"]).await?,
        };
        Ok(output
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub async fn read_file(&self, local_path: &Path, relative: &str) -> AtelierResult<String> {
        Ok(tokio::fs::read_to_string(local_path.join(relative)).await?)
    }

    pub async fn current_branch(&self, local_path: &Path) -> AtelierResult<String> {
        let output = run_git(Some(local_path), &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        Ok(output.trim().to_string())
    }

    /// Create a repository on the hosting provider. Returns the HTML URL.
    pub async fn create_remote_repo(
        &self,
        name: &str,
        description: &str,
        private: bool,
    ) -> AtelierResult<String> {
        let token = self
            .host_token
            .as_ref()
            .ok_or_else(|| AtelierError::Config("hosting token not set".into()))?;

        let body = serde_json::json!({
            "name": name,
            "description": description,
            "private": private,
            "auto_init": true,
        });

        let resp = self
            .http
            .post("https://api.github.com/user/repos")
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "atelier")
            .json(&body)
            .send()
            .await
            .map_err(|e| AtelierError::Git(format!("hosting api request failed: {e}")))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status.as_u16() != 201 {
            return Err(AtelierError::Git(format!(
                "hosting api error ({status}): {body}"
            )));
        }

        #[derive(Deserialize)]
        struct Created {
            html_url: String,
        }
        let created: Created = serde_json::from_str(&body)
            .map_err(|e| AtelierError::Git(format!("unexpected hosting api response: {e}")))?;

        info!(name, url = %created.html_url, "remote repo created");
        Ok(created.html_url)
    }
}

async fn run_git(cwd: Option<&Path>, args: &[&str]) -> AtelierResult<String> {
    let mut cmd = Command::new("git");
    if let Some(dir) = cwd {
        cmd.arg("-C").arg(dir);
    }
    cmd.args(args);
    cmd.kill_on_drop(true);

    let output = cmd
        .output()
        .await
        .map_err(|e| AtelierError::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AtelierError::Git(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Extract owner/name from an https or ssh hosting URL.
pub fn parse_repo_url(url: &str) -> Option<RepoInfo> {
    let after_host = url
        .split_once("github.com")
        .map(|(_, rest)| rest.trim_start_matches([':', '/']))?;

    let mut segments = after_host.split('/');
    let owner = segments.next()?.to_string();
    let name = segments.next()?.trim_end_matches(".git").to_string();
    if owner.is_empty() || name.is_empty() {
        return None;
    }

    Some(RepoInfo {
        full_name: format!("{owner}/{name}"),
        owner,
        name,
        url: url.to_string(),
        local_path: PathBuf::new(),
        default_branch: String::new(),
    })
}

/// Parse the summary line of `git diff --stat`:
/// ` 3 files changed, 40 insertions(+), 7 deletions(-)`.
fn parse_git_stat(stat: &str) -> (u32, u32, u32) {
    let mut additions = 0;
    let mut deletions = 0;
    let mut files = 0;

    for line in stat.lines() {
        if !line.contains("changed") {
            continue;
        }
        for part in line.split(',') {
            let part = part.trim();
            let number: u32 = part
                .split_whitespace()
                .next()
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
            if part.contains("file") {
                files = number;
            } else if part.contains("insertion") {
                additions = number;
            } else if part.contains("deletion") {
                deletions = number;
            }
        }
    }

    (additions, deletions, files)
}

/// Split raw `git diff` output into per-file chunks with line counts.
fn parse_diff_output(diff: &str) -> Vec<FileDiff> {
    let mut files = Vec::new();

    for chunk in diff.split("diff --git ").skip(1) {
        let mut lines = chunk.lines();
        let header = match lines.next() {
            Some(h) => h,
            None => continue,
        };

        // Header is `a/<path> b/<path>`; take the b-side.
        let path = match header.split(" b/").nth(1) {
            Some(p) => p.to_string(),
            None => continue,
        };

        let mut file = FileDiff {
            path,
            status: FileStatus::Modified,
            additions: 0,
            deletions: 0,
            patch: chunk.to_string(),
        };

        for line in chunk.lines() {
            if line.starts_with("new file") {
                file.status = FileStatus::Added;
            } else if line.starts_with("deleted file") {
                file.status = FileStatus::Deleted;
            } else if line.starts_with('+') && !line.starts_with("+++") {
                file.additions += 1;
            } else if line.starts_with('-') && !line.starts_with("---") {
                file.deletions += 1;
            }
        }

        files.push(file);
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_https_url() {
        let info = parse_repo_url("https://github.com/acme/shopfront").unwrap();
        assert_eq!(info.owner, "acme");
        assert_eq!(info.name, "shopfront");
        assert_eq!(info.full_name, "acme/shopfront");
    }

    #[test]
    fn parse_url_with_git_suffix() {
        let info = parse_repo_url("https://github.com/acme/shopfront.git").unwrap();
        assert_eq!(info.name, "shopfront");
    }

    #[test]
    fn parse_ssh_url() {
        let info = parse_repo_url("git@github.com:acme/shopfront.git").unwrap();
        assert_eq!(info.full_name, "acme/shopfront");
    }

    #[test]
    fn parse_rejects_foreign_host() {
        assert!(parse_repo_url("https://gitlab.com/acme/shopfront").is_none());
        assert!(parse_repo_url("not a url").is_none());
    }

    #[test]
    fn stat_summary_parses() {
        let stat = " src/main.rs | 12 ++++----\n 3 files changed, 40 insertions(+), 7 deletions(-)\n";
        assert_eq!(parse_git_stat(stat), (40, 7, 3));
    }

    #[test]
    fn stat_single_file_singular_forms() {
        let stat = " 1 file changed, 1 insertion(+), 1 deletion(-)\n";
        assert_eq!(parse_git_stat(stat), (1, 1, 1));
    }

    #[test]
    fn stat_empty_is_zero() {
        assert_eq!(parse_git_stat(""), (0, 0, 0));
    }

    #[test]
    fn diff_output_parses_files() {
        let diff = "diff --git a/src/lib.rs b/src/lib.rs\n\
                    index 123..456 100644\n\
                    --- a/src/lib.rs\n\
                    +++ b/src/lib.rs\n\
                    @@ -1,2 +1,3 @@\n\
                    +fn added() {}\n\
                    -fn removed() {}\n\
                    diff --git a/src/new.rs b/src/new.rs\n\
                    new file mode 100644\n\
                    --- /dev/null\n\
                    +++ b/src/new.rs\n\
                    @@ -0,0 +1 @@\n\
                    +pub fn hello() {}\n";

        let files = parse_diff_output(diff);
        assert_eq!(files.len(), 2);

        assert_eq!(files[0].path, "src/lib.rs");
        assert_eq!(files[0].status, FileStatus::Modified);
        assert_eq!(files[0].additions, 1);
        assert_eq!(files[0].deletions, 1);

        assert_eq!(files[1].path, "src/new.rs");
        assert_eq!(files[1].status, FileStatus::Added);
        assert_eq!(files[1].additions, 1);
        assert_eq!(files[1].deletions, 0);
    }

    #[test]
    fn diff_output_empty() {
        assert!(parse_diff_output("").is_empty());
    }

    #[test]
    fn deleted_file_status() {
        let diff = "diff --git a/old.rs b/old.rs\n\
                    deleted file mode 100644\n\
                    --- a/old.rs\n\
                    +++ /dev/null\n\
                    @@ -1 +0,0 @@\n\
                    -pub fn gone() {}\n";
        let files = parse_diff_output(diff);
        assert_eq!(files[0].status, FileStatus::Deleted);
        assert_eq!(files[0].deletions, 1);
    }
}
