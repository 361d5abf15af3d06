use crate::decisions::resolve_due_timeouts;
use crate::metrics::{today_start, usage_totals};
use crate::orchestrator::{Orchestrator, CYCLE_DEADLINE};
use atelier_core::{AtelierError, AtelierResult, Frequency, Project};
use atelier_hub::Hub;
use atelier_store::Store;
use chrono::{Duration as ChronoDuration, Utc};
use cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Builds the orchestrator for a `(project, user)` pair. Injected so tests
/// can wire scripted collaborators.
pub type OrchestratorFactory = Arc<dyn Fn(Uuid, Uuid) -> Arc<Orchestrator> + Send + Sync>;

/// Agent logs older than this are purged by the daily housekeeping job.
const LOG_RETENTION_DAYS: i64 = 30;

/// Five-field cron tier for a project frequency.
fn tier_expression(frequency: Frequency) -> &'static str {
    match frequency {
        // 6am, 12pm, 6pm, 11pm
        Frequency::Normal => "0 6,12,18,23 * * *",
        // every 3 hours
        Frequency::High => "0 */3 * * *",
        // 9am and 9pm
        Frequency::Low => "0 9,21 * * *",
    }
}

/// Deterministic minute offset for a project, stable across restarts.
/// FNV-1a over the raw id bytes, reduced mod 60.
pub fn jitter_minute(project_id: Uuid) -> u32 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in project_id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    (hash % 60) as u32
}

/// The project's firing expression: its tier with the minute field replaced
/// by the jitter offset, in the six-field (with seconds) form the cron
/// parser wants.
fn jittered_expression(frequency: Frequency, project_id: Uuid) -> String {
    let tier = tier_expression(frequency);
    let rest = tier
        .split_once(' ')
        .map(|(_, rest)| rest)
        .unwrap_or(tier);
    format!("0 {} {}", jitter_minute(project_id), rest)
}

struct ScheduleEntry {
    cron_expr: String,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerInner {
    running: bool,
    entries: HashMap<Uuid, ScheduleEntry>,
    orchestrators: HashMap<Uuid, Arc<Orchestrator>>,
    housekeeping: Vec<JoinHandle<()>>,
}

struct Core {
    store: Arc<dyn Store>,
    hub: Arc<Hub>,
    factory: OrchestratorFactory,
    inner: Mutex<SchedulerInner>,
}

impl Core {
    async fn orchestrator_for(&self, project_id: Uuid, user_id: Uuid) -> Arc<Orchestrator> {
        let mut inner = self.inner.lock().await;
        inner
            .orchestrators
            .entry(project_id)
            .or_insert_with(|| (self.factory)(project_id, user_id))
            .clone()
    }

    async fn run_project_cycle(&self, project_id: Uuid, user_id: Uuid) {
        let orchestrator = self.orchestrator_for(project_id, user_id).await;
        match orchestrator.run_cycle(CYCLE_DEADLINE).await {
            Ok(result) => info!(
                project_id = %project_id,
                tasks_created = result.tasks_created,
                tasks_completed = result.tasks_completed,
                cost_usd = result.cost_usd,
                "cycle result"
            ),
            Err(e) => error!(project_id = %project_id, error = %e, "cycle error"),
        }
    }

    /// Daily at 03:00: delete agent logs older than the retention window.
    async fn purge_old_logs(&self) {
        let cutoff = Utc::now() - ChronoDuration::days(LOG_RETENTION_DAYS);
        match self.store.purge_logs_older_than(cutoff).await {
            Ok(0) => {}
            Ok(deleted) => info!(deleted, "old agent logs purged"),
            Err(e) => error!(error = %e, "log purge failed"),
        }
    }

    /// Hourly: refresh each active project's cost/token totals from today's
    /// logs, then resolve any decision timeouts that came due. Both run on
    /// this single worker so the purge can never race the aggregation.
    async fn aggregate_usage(&self) {
        let projects = match self.store.list_active_projects().await {
            Ok(projects) => projects,
            Err(e) => {
                error!(error = %e, "aggregation could not list projects");
                return;
            }
        };

        let since = today_start();
        for project in projects {
            let logs = match self.store.logs_since(project.id, since).await {
                Ok(logs) => logs,
                Err(e) => {
                    warn!(project_id = %project.id, error = %e, "aggregation skipped project");
                    continue;
                }
            };
            let (cost_usd, tokens_used) = usage_totals(&logs);
            let key = atelier_core::MetricsKey::today(project.id);
            if let Err(e) = self
                .store
                .set_usage_totals(project.user_id, &key, cost_usd, tokens_used)
                .await
            {
                warn!(project_id = %project.id, error = %e, "usage totals not written");
            }
        }

        if let Err(e) = resolve_due_timeouts(&self.store, &self.hub, Utc::now()).await {
            warn!(error = %e, "decision timeout resolution failed");
        }
    }
}

/// Process-wide cycle dispatcher.
///
/// One firing loop per scheduled project, plus two fixed housekeeping jobs:
/// log purge daily at 03:00 and usage aggregation (with decision-timeout
/// resolution) hourly at :00. The `project -> entry` map makes next-fire
/// lookups reliable and re-scheduling idempotent.
#[derive(Clone)]
pub struct Scheduler {
    core: Arc<Core>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>, hub: Arc<Hub>, factory: OrchestratorFactory) -> Self {
        Self {
            core: Arc::new(Core {
                store,
                hub,
                factory,
                inner: Mutex::new(SchedulerInner::default()),
            }),
        }
    }

    /// Load all active projects, schedule them, and start housekeeping.
    pub async fn start(&self) -> AtelierResult<()> {
        {
            let inner = self.core.inner.lock().await;
            if inner.running {
                return Ok(());
            }
        }

        let projects = self.core.store.list_active_projects().await?;
        for project in &projects {
            if let Err(e) = self.schedule_project(project).await {
                error!(project_id = %project.id, error = %e, "failed to schedule project");
            }
        }

        let purge_core = self.core.clone();
        let purge = spawn_job("0 0 3 * * *", move |core: Arc<Core>| async move {
            core.purge_old_logs().await
        }, purge_core);

        let aggregate_core = self.core.clone();
        let aggregate = spawn_job("0 0 * * * *", move |core: Arc<Core>| async move {
            core.aggregate_usage().await
        }, aggregate_core);

        let mut inner = self.core.inner.lock().await;
        inner.housekeeping.push(purge);
        inner.housekeeping.push(aggregate);
        inner.running = true;

        info!(projects = projects.len(), "scheduler started");
        Ok(())
    }

    /// Halt all firing loops and housekeeping.
    pub async fn stop(&self) {
        let mut inner = self.core.inner.lock().await;
        if !inner.running {
            return;
        }
        for (_, entry) in inner.entries.drain() {
            entry.handle.abort();
        }
        for handle in inner.housekeeping.drain(..) {
            handle.abort();
        }
        inner.running = false;
        info!("scheduler stopped");
    }

    /// Register (or re-register) a project's firing loop. Idempotent: the
    /// previous entry, if any, is replaced, never duplicated.
    pub async fn schedule_project(&self, project: &Project) -> AtelierResult<()> {
        let cron_expr = jittered_expression(project.frequency, project.id);
        let schedule = Schedule::from_str(&cron_expr)
            .map_err(|e| AtelierError::Config(format!("invalid cron '{cron_expr}': {e}")))?;

        let core = self.core.clone();
        let project_id = project.id;
        let user_id = project.user_id;
        let handle = tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    break;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;
                core.run_project_cycle(project_id, user_id).await;
            }
        });

        let mut inner = self.core.inner.lock().await;
        if let Some(previous) = inner.entries.insert(
            project_id,
            ScheduleEntry {
                cron_expr: cron_expr.clone(),
                handle,
            },
        ) {
            previous.handle.abort();
        }

        info!(
            project_id = %project_id,
            frequency = ?project.frequency,
            cron = %cron_expr,
            "project scheduled"
        );
        Ok(())
    }

    /// Drop the project's firing loop and orchestrator.
    pub async fn unschedule_project(&self, project_id: Uuid) {
        let mut inner = self.core.inner.lock().await;
        if let Some(entry) = inner.entries.remove(&project_id) {
            entry.handle.abort();
        }
        inner.orchestrators.remove(&project_id);
        info!(project_id = %project_id, "project unscheduled");
    }

    /// Trigger a cycle immediately. Fails fast when one is already running.
    pub async fn run_now(&self, project_id: Uuid, user_id: Uuid) -> AtelierResult<()> {
        if self.is_project_running(project_id).await {
            return Err(AtelierError::Conflict("cycle already running".into()));
        }
        let core = self.core.clone();
        tokio::spawn(async move {
            core.run_project_cycle(project_id, user_id).await;
        });
        Ok(())
    }

    /// True next fire time for this specific project, from its own entry.
    pub async fn next_cycle_at(&self, project_id: Uuid) -> Option<chrono::DateTime<Utc>> {
        let inner = self.core.inner.lock().await;
        let entry = inner.entries.get(&project_id)?;
        Schedule::from_str(&entry.cron_expr)
            .ok()?
            .upcoming(Utc)
            .next()
    }

    pub async fn is_project_running(&self, project_id: Uuid) -> bool {
        let inner = self.core.inner.lock().await;
        inner
            .orchestrators
            .get(&project_id)
            .map(|o| o.is_running())
            .unwrap_or(false)
    }

    pub async fn scheduled_count(&self) -> usize {
        self.core.inner.lock().await.entries.len()
    }

    /// Run the daily log purge once (also used by tests).
    pub async fn purge_old_logs(&self) {
        self.core.purge_old_logs().await
    }

    /// Run the hourly aggregation once (also used by tests).
    pub async fn aggregate_usage(&self) {
        self.core.aggregate_usage().await
    }
}

fn spawn_job<F, Fut>(cron_expr: &'static str, job: F, core: Arc<Core>) -> JoinHandle<()>
where
    F: Fn(Arc<Core>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let schedule = match Schedule::from_str(cron_expr) {
            Ok(s) => s,
            Err(e) => {
                error!(cron = cron_expr, error = %e, "invalid housekeeping cron");
                return;
            }
        };
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            job(core.clone()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::CycleDeps;
    use async_trait::async_trait;
    use atelier_agents::{CodingCli, Toolchain, Vcs};
    use atelier_core::{AgentLog, AgentRole, AtelierResult, LogMetrics, MetricsKey, Repo};
    use atelier_git::CheckOutcome;
    use atelier_llm::{Completer, Completion, CompletionOptions};
    use atelier_store::MemoryStore;
    use std::path::{Path, PathBuf};

    struct NullCompleter;

    #[async_trait]
    impl Completer for NullCompleter {
        async fn complete(
            &self,
            _prompt: &str,
            opts: &CompletionOptions,
        ) -> AtelierResult<Completion> {
            Ok(Completion {
                text: "{}".into(),
                input_tokens: 0,
                output_tokens: 0,
                cost_usd: 0.0,
                model: opts.model.clone(),
                duration_ms: 0,
            })
        }
    }

    struct NullCli;

    #[async_trait]
    impl CodingCli for NullCli {
        async fn run(&self, _workdir: &Path, _prompt: &str) -> AtelierResult<()> {
            Ok(())
        }
    }

    struct NullVcs;

    #[async_trait]
    impl Vcs for NullVcs {
        async fn ensure_workdir(&self, _repo: &Repo) -> AtelierResult<PathBuf> {
            Ok(PathBuf::from("/tmp/null"))
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
            Ok(String::new())
        }
    }

    struct NullTools;

    #[async_trait]
    impl Toolchain for NullTools {
        async fn build(&self, _w: &Path, _l: &str) -> AtelierResult<CheckOutcome> {
            Ok(CheckOutcome {
                passed: true,
                output: String::new(),
            })
        }
        async fn test(&self, _w: &Path, _l: &str) -> AtelierResult<CheckOutcome> {
            Ok(CheckOutcome {
                passed: true,
                output: String::new(),
            })
        }
        async fn lint(&self, _w: &Path, _l: &str) -> AtelierResult<CheckOutcome> {
            Ok(CheckOutcome {
                passed: true,
                output: String::new(),
            })
        }
    }

    fn scheduler_with(store: Arc<dyn Store>) -> Scheduler {
        let hub = Hub::new();
        let factory_store = store.clone();
        let factory_hub = hub.clone();
        let factory: OrchestratorFactory = Arc::new(move |project_id, user_id| {
            Arc::new(Orchestrator::new(
                project_id,
                user_id,
                CycleDeps {
                    completer: Arc::new(NullCompleter),
                    cli: Arc::new(NullCli),
                    vcs: Arc::new(NullVcs),
                    tools: Arc::new(NullTools),
                    store: factory_store.clone(),
                    hub: factory_hub.clone(),
                    lens_picker: None,
                },
            ))
        });
        Scheduler::new(store, hub, factory)
    }

    #[test]
    fn jitter_is_deterministic_and_bounded() {
        let id = Uuid::new_v4();
        let first = jitter_minute(id);
        for _ in 0..10 {
            assert_eq!(jitter_minute(id), first);
        }
        assert!(first < 60);

        // Re-parsed ids hash identically (restart stability).
        let reparsed = Uuid::parse_str(&id.to_string()).unwrap();
        assert_eq!(jitter_minute(reparsed), first);
    }

    #[test]
    fn jitter_spreads_projects() {
        let minutes: std::collections::HashSet<u32> =
            (0..100).map(|_| jitter_minute(Uuid::new_v4())).collect();
        // 100 random projects land on a good spread of minutes.
        assert!(minutes.len() > 20);
    }

    #[test]
    fn jittered_expressions_parse_for_all_tiers() {
        let id = Uuid::new_v4();
        for frequency in [Frequency::Low, Frequency::Normal, Frequency::High] {
            let expr = jittered_expression(frequency, id);
            assert!(
                Schedule::from_str(&expr).is_ok(),
                "expression '{expr}' did not parse"
            );
            // The minute field carries the jitter.
            let minute_field = expr.split_whitespace().nth(1).unwrap();
            assert_eq!(minute_field, jitter_minute(id).to_string());
        }
    }

    #[test]
    fn tier_expressions() {
        assert_eq!(tier_expression(Frequency::Normal), "0 6,12,18,23 * * *");
        assert_eq!(tier_expression(Frequency::High), "0 */3 * * *");
        assert_eq!(tier_expression(Frequency::Low), "0 9,21 * * *");
    }

    #[tokio::test]
    async fn scheduling_twice_keeps_one_entry() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(store.clone());

        let project = Project::new(Uuid::new_v4(), "shopfront", 5.0);
        store.create_project(project.clone()).await.unwrap();

        scheduler.schedule_project(&project).await.unwrap();
        scheduler.schedule_project(&project).await.unwrap();

        assert_eq!(scheduler.scheduled_count().await, 1);
    }

    #[tokio::test]
    async fn next_cycle_at_uses_the_project_entry() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(store.clone());

        let project = Project::new(Uuid::new_v4(), "shopfront", 5.0);
        scheduler.schedule_project(&project).await.unwrap();

        let next = scheduler.next_cycle_at(project.id).await.unwrap();
        assert!(next > Utc::now());

        assert!(scheduler.next_cycle_at(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn unschedule_drops_entry_and_orchestrator() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(store.clone());

        let project = Project::new(Uuid::new_v4(), "shopfront", 5.0);
        scheduler.schedule_project(&project).await.unwrap();
        assert_eq!(scheduler.scheduled_count().await, 1);

        scheduler.unschedule_project(project.id).await;
        assert_eq!(scheduler.scheduled_count().await, 0);
        assert!(!scheduler.is_project_running(project.id).await);
    }

    #[tokio::test]
    async fn start_schedules_only_active_projects() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(store.clone());

        let active = Project::new(Uuid::new_v4(), "active", 5.0);
        let mut dormant = Project::new(Uuid::new_v4(), "dormant", 5.0);
        dormant.is_active = false;
        store.create_project(active.clone()).await.unwrap();
        store.create_project(dormant.clone()).await.unwrap();

        scheduler.start().await.unwrap();
        assert_eq!(scheduler.scheduled_count().await, 1);
        assert!(scheduler.next_cycle_at(active.id).await.is_some());
        assert!(scheduler.next_cycle_at(dormant.id).await.is_none());

        scheduler.stop().await;
        assert_eq!(scheduler.scheduled_count().await, 0);
    }

    #[tokio::test]
    async fn purge_respects_retention_boundary() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(store.clone());
        let project = Project::new(Uuid::new_v4(), "shopfront", 5.0);
        store.create_project(project.clone()).await.unwrap();

        let mut old = AgentLog::success(project.user_id, project.id, AgentRole::Dev, "run", "old");
        old.created_at = Utc::now() - ChronoDuration::days(31);
        let recent = AgentLog::success(project.user_id, project.id, AgentRole::Dev, "run", "new");
        store.append_log(old).await.unwrap();
        store.append_log(recent).await.unwrap();

        scheduler.purge_old_logs().await;

        let remaining = store
            .logs_since(project.id, Utc::now() - ChronoDuration::days(365))
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].output_summary, "new");
    }

    #[tokio::test]
    async fn aggregation_writes_today_totals() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(store.clone());
        let project = Project::new(Uuid::new_v4(), "shopfront", 5.0);
        store.create_project(project.clone()).await.unwrap();

        let log = AgentLog::success(project.user_id, project.id, AgentRole::Pm, "run", "ok")
            .with_metrics(LogMetrics {
                cost_usd: 0.25,
                tokens_input: 900,
                tokens_output: 100,
                ..Default::default()
            });
        store.append_log(log).await.unwrap();

        scheduler.aggregate_usage().await;

        let row = store
            .get_metrics(&MetricsKey::today(project.id))
            .await
            .unwrap()
            .unwrap();
        assert!((row.cost_usd - 0.25).abs() < 1e-9);
        assert_eq!(row.tokens_used, 1000);
    }
}
