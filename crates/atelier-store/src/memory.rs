use crate::Store;
use async_trait::async_trait;
use atelier_core::{
    AgentLog, AtelierError, AtelierResult, CycleDelta, DailyMetrics, Decision, DecisionStatus,
    Directive, MetricsKey, Project, Repo, Task, TaskStatus,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    projects: HashMap<Uuid, Project>,
    repos: HashMap<Uuid, Repo>,
    directives: HashMap<Uuid, Directive>,
    tasks: HashMap<Uuid, Task>,
    decisions: HashMap<Uuid, Decision>,
    logs: Vec<AgentLog>,
    metrics: HashMap<MetricsKey, DailyMetrics>,
    /// Cycle ids already folded into each metrics row (replay guard).
    applied_cycles: HashMap<MetricsKey, HashSet<Uuid>>,
}

/// In-memory reference store. Single `RwLock` over all maps: writes are rare
/// relative to the cycle's work, and one lock keeps the cascade semantics
/// trivially consistent.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Would adding `candidate` (with its declared dependencies) close a cycle in
/// the project's repo dependency graph?
fn closes_cycle(repos: &HashMap<Uuid, Repo>, candidate: &Repo) -> bool {
    // Follow edges out of the candidate; if we can reach the candidate again
    // the new edges close a loop.
    let mut stack: Vec<Uuid> = candidate.dependencies.clone();
    let mut seen = HashSet::new();

    while let Some(id) = stack.pop() {
        if id == candidate.id {
            return true;
        }
        if !seen.insert(id) {
            continue;
        }
        if let Some(repo) = repos.get(&id) {
            stack.extend(repo.dependencies.iter().copied());
        }
    }
    false
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_project(&self, project: Project) -> AtelierResult<()> {
        let mut inner = self.inner.write().await;
        if inner.projects.contains_key(&project.id) {
            return Err(AtelierError::Conflict(format!(
                "project {} already exists",
                project.id
            )));
        }
        inner.projects.insert(project.id, project);
        Ok(())
    }

    async fn get_project(&self, id: Uuid) -> AtelierResult<Option<Project>> {
        Ok(self.inner.read().await.projects.get(&id).cloned())
    }

    async fn update_project(&self, mut project: Project) -> AtelierResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.projects.contains_key(&project.id) {
            return Err(AtelierError::NotFound(format!("project {}", project.id)));
        }
        project.updated_at = Utc::now();
        inner.projects.insert(project.id, project);
        Ok(())
    }

    async fn delete_project(&self, id: Uuid) -> AtelierResult<()> {
        let mut inner = self.inner.write().await;
        if inner.projects.remove(&id).is_none() {
            return Err(AtelierError::NotFound(format!("project {id}")));
        }
        inner.repos.retain(|_, r| r.project_id != id);
        inner.directives.retain(|_, d| d.project_id != id);
        inner.tasks.retain(|_, t| t.project_id != id);
        inner.decisions.retain(|_, d| d.project_id != id);
        inner.logs.retain(|l| l.project_id != id);
        inner.metrics.retain(|k, _| k.project_id != id);
        inner.applied_cycles.retain(|k, _| k.project_id != id);
        Ok(())
    }

    async fn list_active_projects(&self) -> AtelierResult<Vec<Project>> {
        let inner = self.inner.read().await;
        let mut projects: Vec<Project> = inner
            .projects
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        projects.sort_by_key(|p| p.created_at);
        Ok(projects)
    }

    async fn upsert_repo(&self, mut repo: Repo) -> AtelierResult<()> {
        let mut inner = self.inner.write().await;

        let duplicate_url = inner.repos.values().any(|r| {
            r.project_id == repo.project_id && r.remote_url == repo.remote_url && r.id != repo.id
        });
        if duplicate_url {
            return Err(AtelierError::Conflict(format!(
                "repo with url {} already registered in project",
                repo.remote_url
            )));
        }

        let foreign_dep = repo.dependencies.iter().any(|dep| {
            inner
                .repos
                .get(dep)
                .map_or(true, |d| d.project_id != repo.project_id)
        });
        if foreign_dep {
            return Err(AtelierError::Conflict(
                "repo dependencies must reference repos in the same project".into(),
            ));
        }

        if closes_cycle(&inner.repos, &repo) {
            return Err(AtelierError::Conflict(format!(
                "dependency edge would close a cycle for repo {}",
                repo.name
            )));
        }

        repo.updated_at = Utc::now();
        inner.repos.insert(repo.id, repo);
        Ok(())
    }

    async fn get_repo(&self, id: Uuid) -> AtelierResult<Option<Repo>> {
        Ok(self.inner.read().await.repos.get(&id).cloned())
    }

    async fn list_repos(&self, project_id: Uuid) -> AtelierResult<Vec<Repo>> {
        let inner = self.inner.read().await;
        let mut repos: Vec<Repo> = inner
            .repos
            .values()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect();
        repos.sort_by_key(|r| r.created_at);
        Ok(repos)
    }

    async fn set_repo_local_path(&self, id: Uuid, path: Option<String>) -> AtelierResult<()> {
        let mut inner = self.inner.write().await;
        let repo = inner
            .repos
            .get_mut(&id)
            .ok_or_else(|| AtelierError::NotFound(format!("repo {id}")))?;
        repo.local_path = path;
        repo.updated_at = Utc::now();
        Ok(())
    }

    async fn create_directive(&self, directive: Directive) -> AtelierResult<()> {
        let mut inner = self.inner.write().await;
        inner.directives.insert(directive.id, directive);
        Ok(())
    }

    async fn active_directives(
        &self,
        project_id: Uuid,
        now: DateTime<Utc>,
    ) -> AtelierResult<Vec<Directive>> {
        let inner = self.inner.read().await;
        let mut directives: Vec<Directive> = inner
            .directives
            .values()
            .filter(|d| d.project_id == project_id && d.is_in_force(now))
            .cloned()
            .collect();
        directives.sort_by_key(|d| d.created_at);
        Ok(directives)
    }

    async fn create_task(&self, task: Task) -> AtelierResult<()> {
        let mut inner = self.inner.write().await;
        if inner.tasks.contains_key(&task.id) {
            return Err(AtelierError::Conflict(format!("task {} exists", task.id)));
        }
        inner.tasks.insert(task.id, task);
        Ok(())
    }

    async fn update_task(&self, mut task: Task) -> AtelierResult<()> {
        let mut inner = self.inner.write().await;
        match inner.tasks.get(&task.id) {
            None => return Err(AtelierError::NotFound(format!("task {}", task.id))),
            Some(existing) => {
                // Status moves only along the lifecycle graph.
                if existing.status != task.status
                    && !existing.status.can_transition_to(task.status)
                {
                    return Err(AtelierError::Conflict(format!(
                        "illegal task transition {:?} -> {:?}",
                        existing.status, task.status
                    )));
                }
            }
        }
        task.updated_at = Utc::now();
        inner.tasks.insert(task.id, task);
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> AtelierResult<Option<Task>> {
        Ok(self.inner.read().await.tasks.get(&id).cloned())
    }

    async fn tasks_by_status(
        &self,
        project_id: Uuid,
        status: TaskStatus,
    ) -> AtelierResult<Vec<Task>> {
        let inner = self.inner.read().await;
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.project_id == project_id && t.status == status)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(tasks)
    }

    async fn create_decision(&self, decision: Decision) -> AtelierResult<()> {
        let mut inner = self.inner.write().await;
        inner.decisions.insert(decision.id, decision);
        Ok(())
    }

    async fn update_decision(&self, decision: Decision) -> AtelierResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.decisions.contains_key(&decision.id) {
            return Err(AtelierError::NotFound(format!("decision {}", decision.id)));
        }
        inner.decisions.insert(decision.id, decision);
        Ok(())
    }

    async fn pending_decisions(&self) -> AtelierResult<Vec<Decision>> {
        let inner = self.inner.read().await;
        let mut decisions: Vec<Decision> = inner
            .decisions
            .values()
            .filter(|d| d.status == DecisionStatus::Pending)
            .cloned()
            .collect();
        decisions.sort_by_key(|d| d.created_at);
        Ok(decisions)
    }

    async fn append_log(&self, log: AgentLog) -> AtelierResult<()> {
        self.inner.write().await.logs.push(log);
        Ok(())
    }

    async fn logs_since(
        &self,
        project_id: Uuid,
        since: DateTime<Utc>,
    ) -> AtelierResult<Vec<AgentLog>> {
        let inner = self.inner.read().await;
        Ok(inner
            .logs
            .iter()
            .filter(|l| l.project_id == project_id && l.created_at >= since)
            .cloned()
            .collect())
    }

    async fn purge_logs_older_than(&self, cutoff: DateTime<Utc>) -> AtelierResult<usize> {
        let mut inner = self.inner.write().await;
        let before = inner.logs.len();
        inner.logs.retain(|l| l.created_at >= cutoff);
        Ok(before - inner.logs.len())
    }

    async fn apply_cycle(
        &self,
        user_id: Uuid,
        key: &MetricsKey,
        delta: &CycleDelta,
    ) -> AtelierResult<bool> {
        let mut inner = self.inner.write().await;

        let applied = inner.applied_cycles.entry(key.clone()).or_default();
        if !applied.insert(delta.cycle_id) {
            return Ok(false);
        }

        let row = inner
            .metrics
            .entry(key.clone())
            .or_insert_with(|| DailyMetrics::fresh(user_id, key));
        row.apply(delta);
        Ok(true)
    }

    async fn set_usage_totals(
        &self,
        user_id: Uuid,
        key: &MetricsKey,
        cost_usd: f64,
        tokens_used: u64,
    ) -> AtelierResult<()> {
        let mut inner = self.inner.write().await;
        let row = inner
            .metrics
            .entry(key.clone())
            .or_insert_with(|| DailyMetrics::fresh(user_id, key));
        row.cost_usd = cost_usd;
        row.tokens_used = tokens_used;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn get_metrics(&self, key: &MetricsKey) -> AtelierResult<Option<DailyMetrics>> {
        Ok(self.inner.read().await.metrics.get(key).cloned())
    }

    async fn spent_today(&self, project_id: Uuid) -> AtelierResult<f64> {
        let key = MetricsKey::today(project_id);
        Ok(self
            .inner
            .read()
            .await
            .metrics
            .get(&key)
            .map(|m| m.cost_usd)
            .unwrap_or(0.0))
    }
}
