pub mod decision;
pub mod directive;
pub mod error;
pub mod log;
pub mod metrics;
pub mod project;
pub mod repo;
pub mod task;

pub use decision::{Decision, DecisionLevel, DecisionOption, DecisionStatus};
pub use directive::{Directive, DirectivePriority, DirectiveScope};
pub use error::{AtelierError, AtelierResult};
pub use log::{AgentLog, AgentRole, LogMetrics};
pub use metrics::{CycleDelta, DailyMetrics, MetricsKey};
pub use project::{Frequency, Project};
pub use repo::{Repo, RepoAnalysis, RepoHealth, Stack};
pub use task::{
    QaChecks, QaIssue, QaResult, QaVerdict, SourceLens, Task, TaskCommit, TaskPriority, TaskSize,
    TaskSpec, TaskStatus,
};
