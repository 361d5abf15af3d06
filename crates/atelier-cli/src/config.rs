use atelier_core::{AtelierError, AtelierResult};
use std::path::PathBuf;

/// Server configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// LLM provider API key. Required.
    pub api_key: String,
    /// Git-hosting token. Optional; private clones and remote creation
    /// degrade without it.
    pub host_token: Option<String>,
    /// Root directory for cloned working copies.
    pub work_dir: PathBuf,
    pub port: u16,
    /// Requests-per-minute guard for the LLM client.
    pub requests_per_minute: u32,
}

impl Config {
    pub fn from_env() -> AtelierResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup so tests can avoid process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AtelierResult<Self> {
        let api_key = lookup("ANTHROPIC_API_KEY")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AtelierError::Config("ANTHROPIC_API_KEY not set".into()))?;

        let port = match lookup("ATELIER_PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| AtelierError::Config(format!("invalid ATELIER_PORT '{raw}'")))?,
            None => 8080,
        };

        let requests_per_minute = match lookup("ATELIER_LLM_RPM") {
            Some(raw) => raw
                .parse()
                .map_err(|_| AtelierError::Config(format!("invalid ATELIER_LLM_RPM '{raw}'")))?,
            None => 50,
        };

        Ok(Self {
            api_key,
            host_token: lookup("GITHUB_TOKEN").filter(|v| !v.is_empty()),
            work_dir: lookup("ATELIER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp/atelier-repos")),
            port,
            requests_per_minute,
        })
    }
}
