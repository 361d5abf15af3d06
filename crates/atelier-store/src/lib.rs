pub mod memory;

use async_trait::async_trait;
use atelier_core::{
    AgentLog, AtelierResult, CycleDelta, DailyMetrics, Decision, Directive, MetricsKey, Project,
    Repo, Task, TaskStatus,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::MemoryStore;

/// Persistence contract for the cycle engine.
///
/// The engine only depends on this trait; the datastore behind it is an
/// integration choice. `MemoryStore` is the reference implementation and the
/// test double. Implementations must honor:
///
/// - unique `(project_id, remote_url)` per repo;
/// - rejection of repo dependency edges that would close a cycle;
/// - idempotent `apply_cycle` keyed by the delta's `cycle_id`;
/// - cascading delete of all derived records on project delete.
#[async_trait]
pub trait Store: Send + Sync {
    // -- projects --
    async fn create_project(&self, project: Project) -> AtelierResult<()>;
    async fn get_project(&self, id: Uuid) -> AtelierResult<Option<Project>>;
    async fn update_project(&self, project: Project) -> AtelierResult<()>;
    /// Cascades: repos, tasks, directives, decisions, logs and metrics go too.
    async fn delete_project(&self, id: Uuid) -> AtelierResult<()>;
    async fn list_active_projects(&self) -> AtelierResult<Vec<Project>>;

    // -- repos --
    async fn upsert_repo(&self, repo: Repo) -> AtelierResult<()>;
    async fn get_repo(&self, id: Uuid) -> AtelierResult<Option<Repo>>;
    async fn list_repos(&self, project_id: Uuid) -> AtelierResult<Vec<Repo>>;
    /// Atomic local-path swap: the working copy is either valid or absent.
    async fn set_repo_local_path(&self, id: Uuid, path: Option<String>) -> AtelierResult<()>;

    // -- directives --
    async fn create_directive(&self, directive: Directive) -> AtelierResult<()>;
    /// Active and unexpired at `now`.
    async fn active_directives(
        &self,
        project_id: Uuid,
        now: DateTime<Utc>,
    ) -> AtelierResult<Vec<Directive>>;

    // -- tasks --
    async fn create_task(&self, task: Task) -> AtelierResult<()>;
    async fn update_task(&self, task: Task) -> AtelierResult<()>;
    async fn get_task(&self, id: Uuid) -> AtelierResult<Option<Task>>;
    /// Ordered by priority desc, then created_at desc.
    async fn tasks_by_status(
        &self,
        project_id: Uuid,
        status: TaskStatus,
    ) -> AtelierResult<Vec<Task>>;

    // -- decisions --
    async fn create_decision(&self, decision: Decision) -> AtelierResult<()>;
    async fn update_decision(&self, decision: Decision) -> AtelierResult<()>;
    async fn pending_decisions(&self) -> AtelierResult<Vec<Decision>>;

    // -- agent logs --
    async fn append_log(&self, log: AgentLog) -> AtelierResult<()>;
    async fn logs_since(
        &self,
        project_id: Uuid,
        since: DateTime<Utc>,
    ) -> AtelierResult<Vec<AgentLog>>;
    /// Delete logs strictly older than `cutoff`; returns the count removed.
    async fn purge_logs_older_than(&self, cutoff: DateTime<Utc>) -> AtelierResult<usize>;

    // -- metrics --
    /// The `$inc`/`$setOnInsert`/`$set updated_at` upsert. Returns `false`
    /// (and changes nothing) when this delta's cycle_id was already applied.
    async fn apply_cycle(
        &self,
        user_id: Uuid,
        key: &MetricsKey,
        delta: &CycleDelta,
    ) -> AtelierResult<bool>;
    /// Hourly aggregation refresh: overwrite cost/token totals in place.
    async fn set_usage_totals(
        &self,
        user_id: Uuid,
        key: &MetricsKey,
        cost_usd: f64,
        tokens_used: u64,
    ) -> AtelierResult<()>;
    async fn get_metrics(&self, key: &MetricsKey) -> AtelierResult<Option<DailyMetrics>>;
    /// Today's recorded LLM spend for the budget check.
    async fn spent_today(&self, project_id: Uuid) -> AtelierResult<f64>;
}
