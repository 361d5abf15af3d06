use crate::decisions::escalation_decision;
use atelier_agents::{
    BoardAgent, CodingCli, DevAgent, IntegrationAgent, LensPicker, PmAgent, QaAgent, Toolchain,
    Vcs,
};
use atelier_core::{
    AgentLog, AgentRole, AtelierError, AtelierResult, CycleDelta, LogMetrics, MetricsKey, Project,
    QaResult, QaVerdict, Repo, SourceLens, Task, TaskPriority, TaskStatus,
};
use atelier_hub::Hub;
use atelier_llm::Completer;
use atelier_store::Store;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Hard ceiling for one cycle; everything in flight is cancelled past it.
pub const CYCLE_DEADLINE: Duration = Duration::from_secs(30 * 60);

/// Outcome summary of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleResult {
    pub project_id: Uuid,
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub tasks_created: u32,
    pub tasks_completed: u32,
    pub tasks_rejected: u32,
    pub commits: u32,
    pub cost_usd: f64,
    pub tokens_used: u64,
    pub errors: Vec<String>,
}

struct CycleState {
    result: CycleResult,
    delta: CycleDelta,
}

impl CycleState {
    fn new(project_id: Uuid) -> Self {
        let cycle_id = Uuid::new_v4();
        Self {
            result: CycleResult {
                project_id,
                cycle_id,
                started_at: Utc::now(),
                ended_at: None,
                tasks_created: 0,
                tasks_completed: 0,
                tasks_rejected: 0,
                commits: 0,
                cost_usd: 0.0,
                tokens_used: 0,
                errors: Vec::new(),
            },
            delta: CycleDelta::for_cycle(cycle_id),
        }
    }
}

/// Collaborators the orchestrator drives. Production wires the real client,
/// CLI, git driver and toolchain; tests wire scripted doubles.
pub struct CycleDeps {
    pub completer: Arc<dyn Completer>,
    pub cli: Arc<dyn CodingCli>,
    pub vcs: Arc<dyn Vcs>,
    pub tools: Arc<dyn Toolchain>,
    pub store: Arc<dyn Store>,
    pub hub: Arc<Hub>,
    /// Seeded picker for deterministic tests; None draws from entropy.
    pub lens_picker: Option<LensPicker>,
}

/// The per-project cycle state machine.
///
/// Exactly one orchestrator per (project, user) exists while scheduled; the
/// internal mutex enforces the singleton cycle. Role errors are logged and
/// accumulated without aborting the cycle. Budget exhaustion stops new Dev
/// work but lets QA finish. The final metrics upsert runs on every exit path
/// that accumulated spend.
pub struct Orchestrator {
    project_id: Uuid,
    user_id: Uuid,
    store: Arc<dyn Store>,
    hub: Arc<Hub>,
    board: BoardAgent,
    pm: PmAgent,
    dev: DevAgent,
    qa: QaAgent,
    integration: IntegrationAgent,
    running: Mutex<()>,
}

impl Orchestrator {
    pub fn new(project_id: Uuid, user_id: Uuid, deps: CycleDeps) -> Self {
        let CycleDeps {
            completer,
            cli,
            vcs,
            tools,
            store,
            hub,
            lens_picker,
        } = deps;

        let pm = match lens_picker {
            Some(picker) => PmAgent::with_lens_picker(completer.clone(), picker),
            None => PmAgent::new(completer.clone()),
        };

        Self {
            project_id,
            user_id,
            board: BoardAgent::new(completer.clone()),
            pm,
            dev: DevAgent::new(cli, vcs.clone(), tools.clone()),
            qa: QaAgent::new(completer.clone(), vcs, tools),
            integration: IntegrationAgent::new(completer),
            store,
            hub,
            running: Mutex::new(()),
        }
    }

    /// Whether a cycle currently holds the singleton lock.
    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Execute one full cycle under the given deadline.
    ///
    /// Fails fast with `Conflict` when a cycle is already running. On
    /// deadline, in-flight work is cancelled and whatever was accumulated is
    /// still rolled into the daily metrics.
    pub async fn run_cycle(&self, deadline: Duration) -> AtelierResult<CycleResult> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| AtelierError::Conflict("cycle already running".into()))?;

        let state = StdMutex::new(CycleState::new(self.project_id));
        info!(project_id = %self.project_id, "cycle started");

        let timed_out = tokio::time::timeout(deadline, self.run_steps(&state))
            .await
            .is_err();

        let CycleState { mut result, delta } = state
            .into_inner()
            .map_err(|_| AtelierError::Cancelled("cycle state poisoned".into()))?;

        if timed_out {
            warn!(project_id = %self.project_id, "cycle deadline exceeded, cancelling");
            result.errors.push("cycle deadline exceeded".into());
        }
        result.ended_at = Some(Utc::now());

        // Step 8: the metrics upsert runs even on abort paths.
        let key = MetricsKey::today(self.project_id);
        if let Err(e) = self.store.apply_cycle(self.user_id, &key, &delta).await {
            warn!(error = %e, "metrics upsert failed");
            result.errors.push(format!("metrics upsert: {e}"));
        } else {
            self.hub
                .metrics(
                    self.project_id,
                    serde_json::to_value(&result).unwrap_or_default(),
                )
                .await;
        }

        info!(
            project_id = %self.project_id,
            cycle_id = %result.cycle_id,
            tasks_created = result.tasks_created,
            tasks_completed = result.tasks_completed,
            tasks_rejected = result.tasks_rejected,
            cost_usd = result.cost_usd,
            errors = result.errors.len(),
            "cycle completed"
        );

        Ok(result)
    }

    async fn run_steps(&self, state: &StdMutex<CycleState>) {
        // Step 1: load project, repos and directives.
        let (project, repos, directives) = match self.load_project_data().await {
            Ok(data) => data,
            Err(e) => {
                state.lock().unwrap().result.errors.push(e.to_string());
                return;
            }
        };

        // Step 2: budget pre-check — a stop, not an error.
        let spent = self.store.spent_today(self.project_id).await.unwrap_or(0.0);
        if spent >= project.daily_budget_usd {
            warn!(
                project_id = %self.project_id,
                spent_usd = spent,
                budget_usd = project.daily_budget_usd,
                "daily budget already spent, skipping cycle"
            );
            return;
        }

        // Step 3: Board decides the plan.
        let plan = self.step_board(state, &project, &repos, &directives).await;

        // Step 4: PM drafts one task for the target repo.
        if let Some(plan) = &plan {
            if let Some(target) = repos.iter().find(|r| r.name == plan.target_repo) {
                self.step_pm(state, &project, target, plan.work_type, &directives)
                    .await;
            }
        }

        // Step 5: Dev implements ready tasks until the budget line.
        self.step_dev_loop(state, &project, spent).await;

        // Step 6: QA reviews everything in review, budget or not.
        self.step_qa_loop(state).await;

        // Step 7: Integration proposes cross-repo follow-ups.
        let completed = state.lock().unwrap().result.tasks_completed;
        if completed > 0 {
            self.step_integration(state, &project).await;
        }
    }

    async fn load_project_data(&self) -> AtelierResult<(Project, Vec<Repo>, Vec<atelier_core::Directive>)> {
        let project = self
            .store
            .get_project(self.project_id)
            .await?
            .filter(|p| p.user_id == self.user_id)
            .ok_or_else(|| AtelierError::NotFound(format!("project {}", self.project_id)))?;
        let repos = self.store.list_repos(self.project_id).await?;
        let directives = self
            .store
            .active_directives(self.project_id, Utc::now())
            .await?;
        Ok((project, repos, directives))
    }

    async fn step_board(
        &self,
        state: &StdMutex<CycleState>,
        project: &Project,
        repos: &[Repo],
        directives: &[atelier_core::Directive],
    ) -> Option<atelier_agents::BoardPlan> {
        info!(project_id = %self.project_id, step = "board", "cycle step");
        state.lock().unwrap().delta.record_agent_run(AgentRole::Board);

        match self.board.run(project, repos, directives).await {
            Ok(plan) => {
                self.accrue(state, plan.cost_usd);
                self.log_success(
                    AgentRole::Board,
                    "run",
                    format!("target={} work_type={}", plan.target_repo, plan.work_type),
                    plan.cost_usd,
                )
                .await;

                if let Some(escalation) = &plan.escalate_to_cio {
                    let decision = escalation_decision(
                        self.user_id,
                        self.project_id,
                        escalation,
                        Utc::now(),
                    );
                    if self.store.create_decision(decision.clone()).await.is_ok() {
                        self.hub.decision(&decision).await;
                    }
                }

                Some(plan)
            }
            Err(e) => {
                self.log_failure(AgentRole::Board, "run", &e).await;
                state
                    .lock()
                    .unwrap()
                    .result
                    .errors
                    .push(format!("board agent: {e}"));
                None
            }
        }
    }

    async fn step_pm(
        &self,
        state: &StdMutex<CycleState>,
        project: &Project,
        repo: &Repo,
        work_type: atelier_agents::WorkType,
        directives: &[atelier_core::Directive],
    ) {
        info!(project_id = %self.project_id, step = "pm", target_repo = %repo.name, "cycle step");
        state.lock().unwrap().delta.record_agent_run(AgentRole::Pm);

        match self.pm.run(project, repo, work_type, directives).await {
            Ok(outcome) => {
                self.accrue(state, outcome.cost_usd);
                {
                    let mut s = state.lock().unwrap();
                    s.result.tasks_created += 1;
                    s.result.tokens_used += outcome.task.tokens_used;
                    s.delta.tasks_created += 1;
                    s.delta.tokens_used += outcome.task.tokens_used;
                }
                self.log_success(
                    AgentRole::Pm,
                    "generate_task",
                    format!("task \"{}\" via {} lens", outcome.task.title, outcome.task.source_lens),
                    outcome.cost_usd,
                )
                .await;

                if self.store.create_task(outcome.task.clone()).await.is_ok() {
                    self.hub.task_update(&outcome.task).await;
                }
            }
            Err(e) => {
                self.log_failure(AgentRole::Pm, "generate_task", &e).await;
                state
                    .lock()
                    .unwrap()
                    .result
                    .errors
                    .push(format!("pm agent: {e}"));
            }
        }
    }

    async fn step_dev_loop(&self, state: &StdMutex<CycleState>, project: &Project, spent_before: f64) {
        let ready = match self
            .store
            .tasks_by_status(self.project_id, TaskStatus::Ready)
            .await
        {
            Ok(tasks) => tasks,
            Err(e) => {
                state
                    .lock()
                    .unwrap()
                    .result
                    .errors
                    .push(format!("loading ready tasks: {e}"));
                return;
            }
        };

        for task in ready {
            // Budget is a stop for new Dev work, never an error.
            let cycle_cost = state.lock().unwrap().result.cost_usd;
            if spent_before + cycle_cost >= project.daily_budget_usd {
                warn!(
                    project_id = %self.project_id,
                    spent_usd = spent_before + cycle_cost,
                    "budget reached, stopping dev loop"
                );
                break;
            }

            self.run_dev_task(state, task).await;
        }
    }

    async fn run_dev_task(&self, state: &StdMutex<CycleState>, mut task: Task) {
        info!(project_id = %self.project_id, step = "dev", task_id = %task.id, "cycle step");
        state.lock().unwrap().delta.record_agent_run(AgentRole::Dev);

        let repo = match self.store.get_repo(task.repo_id).await {
            Ok(Some(repo)) => repo,
            _ => {
                self.log_failure(
                    AgentRole::Dev,
                    "implement",
                    &AtelierError::NotFound(format!("repo {}", task.repo_id)),
                )
                .await;
                return;
            }
        };

        task.status = TaskStatus::InDev;
        task.started_at = Some(Utc::now());
        if self.store.update_task(task.clone()).await.is_ok() {
            self.hub.task_update(&task).await;
        }

        match self.dev.run(&task, &repo).await {
            Ok(outcome) => {
                {
                    let mut s = state.lock().unwrap();
                    s.result.commits += outcome.commits.len() as u32;
                    s.delta.commits += outcome.commits.len() as u32;
                    if outcome.success {
                        s.delta.build_success += 1;
                    } else {
                        s.delta.build_failed += 1;
                    }
                }

                let _ = self
                    .store
                    .set_repo_local_path(
                        repo.id,
                        Some(outcome.local_path.to_string_lossy().into_owned()),
                    )
                    .await;

                self.log_success(
                    AgentRole::Dev,
                    "implement",
                    format!(
                        "success={} attempts={} commits={}",
                        outcome.success,
                        outcome.attempts,
                        outcome.commits.len()
                    ),
                    0.0,
                )
                .await;

                task.dev_attempts = outcome.attempts;
                task.branch_name = Some(outcome.branch_name);
                task.commits = outcome.commits;
                // Green or exhausted, the working copy goes to review; QA's
                // automated checks route a red one back or out.
                task.status = TaskStatus::InReview;
                if self.store.update_task(task.clone()).await.is_ok() {
                    self.hub.task_update(&task).await;
                }
            }
            Err(e) => {
                self.log_failure(AgentRole::Dev, "implement", &e).await;
                state
                    .lock()
                    .unwrap()
                    .result
                    .errors
                    .push(format!("dev agent: {e}"));

                // The working copy never materialized; hand the task to QA's
                // branchless guard rather than leaving it in dev limbo.
                task.dev_attempts = task.dev_attempts.max(1);
                task.status = TaskStatus::InReview;
                if self.store.update_task(task.clone()).await.is_ok() {
                    self.hub.task_update(&task).await;
                }
            }
        }
    }

    async fn step_qa_loop(&self, state: &StdMutex<CycleState>) {
        let in_review = match self
            .store
            .tasks_by_status(self.project_id, TaskStatus::InReview)
            .await
        {
            Ok(tasks) => tasks,
            Err(e) => {
                state
                    .lock()
                    .unwrap()
                    .result
                    .errors
                    .push(format!("loading review tasks: {e}"));
                return;
            }
        };

        for mut task in in_review {
            info!(project_id = %self.project_id, step = "qa", task_id = %task.id, "cycle step");
            state.lock().unwrap().delta.record_agent_run(AgentRole::Qa);

            // A task that never got a branch has nothing to review.
            if task.branch_name.is_none() {
                task.status = TaskStatus::Rejected;
                task.qa_result = Some(QaResult {
                    checks: Default::default(),
                    verdict: QaVerdict::Rejected,
                    feedback: "No working branch was produced by the dev run.".into(),
                    issues: Vec::new(),
                });
                {
                    let mut s = state.lock().unwrap();
                    s.result.tasks_rejected += 1;
                    s.delta.tasks_rejected += 1;
                }
                if self.store.update_task(task.clone()).await.is_ok() {
                    self.hub.task_update(&task).await;
                }
                continue;
            }

            let repo = match self.store.get_repo(task.repo_id).await {
                Ok(Some(repo)) => repo,
                _ => continue,
            };

            match self.qa.run(&task, &repo).await {
                Ok(outcome) => {
                    self.accrue(state, outcome.cost_usd);
                    self.log_success(
                        AgentRole::Qa,
                        "review",
                        format!("verdict={:?}", outcome.result.verdict),
                        outcome.cost_usd,
                    )
                    .await;

                    task.qa_result = Some(outcome.result);
                    if outcome.approved {
                        task.status = TaskStatus::Done;
                        task.completed_at = Some(Utc::now());
                        let mut s = state.lock().unwrap();
                        s.result.tasks_completed += 1;
                        s.delta.tasks_completed += 1;
                    } else if task.attempts_exhausted() {
                        task.status = TaskStatus::Rejected;
                        let mut s = state.lock().unwrap();
                        s.result.tasks_rejected += 1;
                        s.delta.tasks_rejected += 1;
                    } else {
                        // NEEDS_FIX: back to the dev queue for a later cycle.
                        task.status = TaskStatus::Ready;
                    }

                    if self.store.update_task(task.clone()).await.is_ok() {
                        self.hub.task_update(&task).await;
                    }
                }
                Err(e) => {
                    self.log_failure(AgentRole::Qa, "review", &e).await;
                    state
                        .lock()
                        .unwrap()
                        .result
                        .errors
                        .push(format!("qa agent: {e}"));
                }
            }
        }
    }

    async fn step_integration(&self, state: &StdMutex<CycleState>, project: &Project) {
        info!(project_id = %self.project_id, step = "integration", "cycle step");
        state
            .lock()
            .unwrap()
            .delta
            .record_agent_run(AgentRole::Integration);

        let repos = match self.store.list_repos(self.project_id).await {
            Ok(repos) => repos,
            Err(_) => return,
        };

        match self.integration.run(project, &repos).await {
            Ok(outcome) => {
                self.accrue(state, outcome.cost_usd);
                self.log_success(
                    AgentRole::Integration,
                    "run",
                    format!("{} repo updates proposed", outcome.updates.len()),
                    outcome.cost_usd,
                )
                .await;

                for update in outcome.updates {
                    let Some(target) = repos.iter().find(|r| r.name == update.target_repo) else {
                        continue;
                    };
                    for brief in update.tasks {
                        let mut task = Task::new(
                            self.user_id,
                            self.project_id,
                            target.id,
                            brief.title,
                            SourceLens::Expansion,
                        );
                        task.description = brief.description;
                        task.priority = match brief.priority.as_str() {
                            "high" => TaskPriority::High,
                            "low" => TaskPriority::Low,
                            _ => TaskPriority::Normal,
                        };
                        {
                            let mut s = state.lock().unwrap();
                            s.result.tasks_created += 1;
                            s.delta.tasks_created += 1;
                        }
                        if self.store.create_task(task.clone()).await.is_ok() {
                            self.hub.task_update(&task).await;
                        }
                    }
                }
            }
            Err(e) => {
                self.log_failure(AgentRole::Integration, "run", &e).await;
                state
                    .lock()
                    .unwrap()
                    .result
                    .errors
                    .push(format!("integration agent: {e}"));
            }
        }
    }

    fn accrue(&self, state: &StdMutex<CycleState>, cost_usd: f64) {
        let mut s = state.lock().unwrap();
        s.result.cost_usd += cost_usd;
        s.delta.cost_usd += cost_usd;
    }

    async fn log_success(&self, role: AgentRole, action: &str, summary: String, cost_usd: f64) {
        let log = AgentLog::success(self.user_id, self.project_id, role, action, summary)
            .with_metrics(LogMetrics {
                cost_usd,
                ..Default::default()
            });
        let _ = self.store.append_log(log.clone()).await;
        self.hub.agent_log(&log).await;
    }

    async fn log_failure(&self, role: AgentRole, action: &str, error: &AtelierError) {
        let log = AgentLog::failure(self.user_id, self.project_id, role, action, error.to_string());
        let _ = self.store.append_log(log.clone()).await;
        self.hub.agent_log(&log).await;
    }
}
