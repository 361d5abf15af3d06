use thiserror::Error;

pub type AtelierResult<T> = Result<T, AtelierError>;

/// Workspace-wide error type.
///
/// Variants map onto the engine's failure taxonomy: transient remote errors
/// are retried by the caller, `Refused` returns immediately, `Parse` falls
/// through to a role-specific default, `BudgetExceeded` stops new Dev work,
/// `Process` feeds the fix-and-retry loop, `Cancelled` propagates a deadline,
/// `Conflict` carries 4xx semantics (duplicate repo, cycle already running).
#[derive(Error, Debug)]
pub enum AtelierError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM refused request: {0}")]
    Refused(String),

    #[error("Git error: {0}")]
    Git(String),

    #[error("Process failed: {0}")]
    Process(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Daily budget exceeded: spent {spent_usd:.2} of {budget_usd:.2}")]
    BudgetExceeded { spent_usd: f64, budget_usd: f64 },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Hub error: {0}")]
    Hub(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AtelierError {
    /// Transient remote failures that warrant a backoff-and-retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            AtelierError::Llm(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("429")
                    || lower.contains("500")
                    || lower.contains("502")
                    || lower.contains("503")
                    || lower.contains("timeout")
            }
            _ => false,
        }
    }
}
