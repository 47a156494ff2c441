//! Orchestrator - turns requests into plans and runs plans against the registry
//!
//! Steps run strictly in plan order. A sequential step invokes its agents one
//! after another and stops at the first failure; a parallel step dispatches
//! every agent at once and waits for all of them before looking at outcomes.
//! Every invocation races its step's timeout. On expiry the task's cancellation
//! token is triggered and the spawned call is detached, not aborted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::{MaestroConfig, OrchestratorConfig},
    decision::DecisionEngine,
    events::{EventBroadcaster, WorkflowEvent},
    history::{ExecutionHistoryStore, ExecutionRecord},
    intent::IntentExtractor,
    registry::{AgentCapability, AgentRegistry, AgentTask},
    workflow::{StepMode, WorkflowPlan, WorkflowPlanner, WorkflowStep},
    MaestroError, Result,
};

/// Why a single task did not succeed
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TaskFailure {
    #[error("{message}")]
    Execution { message: String },

    #[error("timed out after {timeout_ms}ms")]
    #[serde(rename_all = "camelCase")]
    Timeout { timeout_ms: u64 },
}

impl TaskFailure {
    fn into_error(self, step_id: &str, agent_name: &str) -> MaestroError {
        match self {
            Self::Execution { message } => MaestroError::AgentExecution {
                step_id: step_id.to_string(),
                agent_name: agent_name.to_string(),
                message,
            },
            Self::Timeout { timeout_ms } => MaestroError::TaskTimeout {
                step_id: step_id.to_string(),
                agent_name: agent_name.to_string(),
                timeout_ms,
            },
        }
    }
}

/// Outcome of one agent invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub agent_name: String,
    pub success: bool,
    pub output: Option<serde_json::Value>,
    pub failure: Option<TaskFailure>,
    pub duration_ms: u64,
}

/// Results of a completed run, keyed by step name in plan order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResults {
    pub run_id: Uuid,
    pub plan_id: Uuid,
    pub steps: IndexMap<String, Vec<TaskResult>>,
    pub duration_ms: u64,
}

impl WorkflowResults {
    pub fn step(&self, step_name: &str) -> Option<&[TaskResult]> {
        self.steps.get(step_name).map(Vec::as_slice)
    }

    pub fn task_count(&self) -> usize {
        self.steps.values().map(Vec::len).sum()
    }
}

/// State of one run: `Created -> Started -> Running(step)* -> Completed | Failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum WorkflowState {
    Created,
    Started,
    #[serde(rename_all = "camelCase")]
    Running { step_index: usize, step_id: String },
    Completed,
    #[serde(rename_all = "camelCase")]
    Failed { step_id: String, error: String },
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }

    pub fn can_transition_to(&self, next: &WorkflowState) -> bool {
        match (self, next) {
            (Self::Created, Self::Started) => true,
            (Self::Started, Self::Running { .. }) => true,
            (Self::Running { step_index: current, .. }, Self::Running { step_index: next, .. }) => {
                next > current
            }
            (Self::Running { .. }, Self::Completed | Self::Failed { .. }) => true,
            _ => false,
        }
    }

    fn label(&self) -> String {
        match self {
            Self::Created => "created".to_string(),
            Self::Started => "started".to_string(),
            Self::Running { step_id, .. } => format!("running({step_id})"),
            Self::Completed => "completed".to_string(),
            Self::Failed { step_id, .. } => format!("failed({step_id})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRunStatus {
    pub run_id: Uuid,
    pub plan_id: Uuid,
    pub state: WorkflowState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRunStatus {
    fn new(run_id: Uuid, plan_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            plan_id,
            state: WorkflowState::Created,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Central orchestrator: request analysis, plan execution and agent registration
pub struct Orchestrator {
    config: OrchestratorConfig,
    extractor: Arc<dyn IntentExtractor>,
    engine: Arc<DecisionEngine>,
    planner: WorkflowPlanner,
    registry: AgentRegistry,
    history: Arc<ExecutionHistoryStore>,
    events: Arc<EventBroadcaster>,
    task_slots: Option<Arc<Semaphore>>,
    runs: RwLock<IndexMap<Uuid, WorkflowRunStatus>>,
}

impl Orchestrator {
    /// Wire a decision engine, planner and history store from one configuration.
    /// The engine reads the orchestrator's execution history.
    pub fn new(config: MaestroConfig, extractor: Arc<dyn IntentExtractor>) -> Result<Self> {
        config.validate()?;

        let history = Arc::new(ExecutionHistoryStore::new());
        let engine = Arc::new(DecisionEngine::new(config.decision).with_execution_history(history.clone()));
        let planner = WorkflowPlanner::new(config.planner)?;

        Ok(Self::with_components(
            config.orchestrator,
            extractor,
            engine,
            planner,
            history,
        ))
    }

    /// Assemble from existing components, e.g. a shared engine or a persisted history
    pub fn with_components(
        config: OrchestratorConfig,
        extractor: Arc<dyn IntentExtractor>,
        engine: Arc<DecisionEngine>,
        planner: WorkflowPlanner,
        history: Arc<ExecutionHistoryStore>,
    ) -> Self {
        let task_slots = config
            .max_concurrent_tasks
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        let events = Arc::new(EventBroadcaster::new(config.event_capacity));

        Self {
            config,
            extractor,
            engine,
            planner,
            registry: AgentRegistry::new(),
            history,
            events,
            task_slots,
            runs: RwLock::new(IndexMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<DecisionEngine> {
        &self.engine
    }

    pub fn planner(&self) -> &WorkflowPlanner {
        &self.planner
    }

    pub fn history(&self) -> &Arc<ExecutionHistoryStore> {
        &self.history
    }

    pub fn events(&self) -> &Arc<EventBroadcaster> {
        &self.events
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    /// Extract the intent, rank agents and compile a plan
    pub async fn analyze_request(&self, request: &str) -> Result<WorkflowPlan> {
        let intent = self.extractor.extract_intent(request).await?;
        let decisions = self.engine.determine_agents(&intent).await?;

        if self.config.record_decisions {
            self.engine.record_decision(&intent, &decisions).await;
        }

        let plan = self.planner.create_workflow(&intent, &decisions).await?;

        tracing::info!(
            "[ORCHESTRATOR] Planned {} for {}: {:?}",
            plan.id(),
            intent.key(),
            plan.agent_names()
        );
        self.events.workflow_created(
            plan.id(),
            &intent.intent_type,
            intent.priority,
            plan.steps().len(),
        );

        Ok(plan)
    }

    /// Run every step of `plan`; the first failing task ends the run with its error
    pub async fn execute_workflow(&self, plan: &WorkflowPlan) -> Result<WorkflowResults> {
        let agents = self.resolve_agents(plan).await?;

        let run_id = Uuid::new_v4();
        let started = Instant::now();

        self.track_run(WorkflowRunStatus::new(run_id, plan.id())).await;
        self.transition(run_id, WorkflowState::Started).await?;
        self.events.workflow_started(run_id, plan.id(), plan.steps().len());

        tracing::info!(
            "[ORCHESTRATOR] Run {} started for plan {} ({} steps)",
            run_id,
            plan.id(),
            plan.steps().len()
        );

        let mut steps = IndexMap::new();

        for (step_index, step) in plan.steps().iter().enumerate() {
            self.transition(
                run_id,
                WorkflowState::Running {
                    step_index,
                    step_id: step.id.clone(),
                },
            )
            .await?;

            let step_started = Instant::now();
            let results = match step.mode {
                StepMode::Sequential => self.run_sequential(run_id, plan, step, &agents).await,
                StepMode::Parallel => self.run_parallel(run_id, plan, step, &agents).await,
            };
            let first_failure = results
                .iter()
                .find_map(|result| result.failure.clone().map(|failure| (result.agent_name.clone(), failure)));

            self.events.step_completed(
                run_id,
                &step.id,
                &step.name,
                first_failure.is_none(),
                elapsed_ms(step_started),
            );

            if let Some((agent_name, failure)) = first_failure {
                let error = failure.into_error(&step.id, &agent_name);
                let message = error.to_string();

                tracing::warn!("[ORCHESTRATOR] Run {} failed: {}", run_id, message);
                self.transition(
                    run_id,
                    WorkflowState::Failed {
                        step_id: step.id.clone(),
                        error: message.clone(),
                    },
                )
                .await?;
                self.events
                    .workflow_failed(run_id, plan.id(), &step.id, &agent_name, &message);

                return Err(error);
            }

            steps.insert(step.name.clone(), results);
        }

        let duration_ms = elapsed_ms(started);
        self.transition(run_id, WorkflowState::Completed).await?;
        self.events.workflow_completed(run_id, plan.id(), duration_ms);

        tracing::info!("[ORCHESTRATOR] Run {} completed in {}ms", run_id, duration_ms);

        Ok(WorkflowResults {
            run_id,
            plan_id: plan.id(),
            steps,
            duration_ms,
        })
    }

    /// Register (or replace) an agent; later runs use the new capability
    pub async fn register_agent(&self, name: &str, capability: Arc<dyn AgentCapability>) -> bool {
        let replaced = self.registry.register(name, capability).await;

        tracing::info!("[ORCHESTRATOR] Agent '{}' registered (replaced: {})", name, replaced);
        self.events.agent_registered(name, replaced);
        replaced
    }

    pub async fn unregister_agent(&self, name: &str) -> bool {
        self.registry.unregister(name).await
    }

    pub async fn registered_agents(&self) -> Vec<String> {
        self.registry.names().await
    }

    /// Read-only snapshot of every execution record, in append order
    pub async fn get_execution_history(&self) -> Vec<ExecutionRecord> {
        self.history.snapshot().await
    }

    pub async fn get_workflow_status(&self, run_id: Uuid) -> Option<WorkflowRunStatus> {
        self.runs.read().await.get(&run_id).cloned()
    }

    /// Forget a finished run; active runs are kept and `None` is returned
    pub async fn remove_run(&self, run_id: Uuid) -> Option<WorkflowRunStatus> {
        let mut runs = self.runs.write().await;
        if !runs.get(&run_id)?.state.is_terminal() {
            return None;
        }
        runs.shift_remove(&run_id)
    }

    /// Insert a new run, evicting the oldest finished runs beyond `max_retained_runs`
    async fn track_run(&self, status: WorkflowRunStatus) {
        let mut runs = self.runs.write().await;
        runs.insert(status.run_id, status);

        let excess = runs.len().saturating_sub(self.config.max_retained_runs);
        if excess == 0 {
            return;
        }

        let evicted: Vec<Uuid> = runs
            .values()
            .filter(|run| run.state.is_terminal())
            .take(excess)
            .map(|run| run.run_id)
            .collect();
        for run_id in &evicted {
            runs.shift_remove(run_id);
        }
        tracing::debug!("[ORCHESTRATOR] Evicted {} finished run statuses", evicted.len());
    }

    /// Look up every agent up front so a missing one fails before anything runs
    async fn resolve_agents(&self, plan: &WorkflowPlan) -> Result<HashMap<String, Arc<dyn AgentCapability>>> {
        let mut resolved: HashMap<String, Arc<dyn AgentCapability>> = HashMap::new();

        for step in plan.steps() {
            for agent_name in &step.agent_names {
                if resolved.contains_key(agent_name) {
                    continue;
                }
                let capability = self.registry.get(agent_name).await.ok_or_else(|| {
                    MaestroError::AgentNotFound {
                        agent_name: agent_name.clone(),
                        step_id: step.id.clone(),
                    }
                })?;
                resolved.insert(agent_name.clone(), capability);
            }
        }

        Ok(resolved)
    }

    async fn run_sequential(
        &self,
        run_id: Uuid,
        plan: &WorkflowPlan,
        step: &WorkflowStep,
        agents: &HashMap<String, Arc<dyn AgentCapability>>,
    ) -> Vec<TaskResult> {
        let mut results = Vec::with_capacity(step.agent_names.len());

        for agent_name in &step.agent_names {
            let result = self.run_task(run_id, plan, step, agent_name, agents).await;
            let failed = !result.success;
            results.push(result);
            if failed {
                break;
            }
        }

        results
    }

    async fn run_parallel(
        &self,
        run_id: Uuid,
        plan: &WorkflowPlan,
        step: &WorkflowStep,
        agents: &HashMap<String, Arc<dyn AgentCapability>>,
    ) -> Vec<TaskResult> {
        // join_all keeps results in agent-list order
        join_all(
            step.agent_names
                .iter()
                .map(|agent_name| self.run_task(run_id, plan, step, agent_name, agents)),
        )
        .await
    }

    async fn run_task(
        &self,
        run_id: Uuid,
        plan: &WorkflowPlan,
        step: &WorkflowStep,
        agent_name: &str,
        agents: &HashMap<String, Arc<dyn AgentCapability>>,
    ) -> TaskResult {
        let task_id = format!("{}:{}:{}", run_id, step.id, agent_name);

        // The semaphore is never closed, so acquisition only waits
        let _permit = match &self.task_slots {
            Some(slots) => slots.clone().acquire_owned().await.ok(),
            None => None,
        };

        let started = Instant::now();
        let (output, failure) = match agents.get(agent_name) {
            Some(capability) => {
                let cancellation = CancellationToken::new();
                let task = AgentTask {
                    task_id: task_id.clone(),
                    run_id,
                    step_id: step.id.clone(),
                    agent_name: agent_name.to_string(),
                    payload: step.task.clone(),
                    timeout_ms: step.timeout_ms,
                    cancellation: cancellation.clone(),
                };
                invoke(capability.clone(), task, step.timeout_ms, cancellation).await
            }
            None => (
                None,
                Some(TaskFailure::Execution {
                    message: format!("agent '{agent_name}' was not resolved"),
                }),
            ),
        };
        let duration_ms = elapsed_ms(started);

        let success = failure.is_none();
        let error_message = failure.as_ref().map(ToString::to_string);

        let record = ExecutionRecord::new(task_id.clone(), agent_name, duration_ms, success, error_message.clone())
            .with_run(run_id, plan.id(), step.id.clone())
            .with_intent_key(plan.intent_key().cloned());
        if let Err(e) = self.history.append(record).await {
            tracing::error!("[ORCHESTRATOR] Could not record task {}: {}", task_id, e);
        }

        tracing::debug!(
            "[ORCHESTRATOR] Task {} finished in {}ms (success: {})",
            task_id,
            duration_ms,
            success
        );
        self.events.task_executed(
            run_id,
            &task_id,
            &step.id,
            agent_name,
            success,
            duration_ms,
            error_message,
        );

        TaskResult {
            task_id,
            agent_name: agent_name.to_string(),
            success,
            output,
            failure,
            duration_ms,
        }
    }

    async fn transition(&self, run_id: Uuid, next: WorkflowState) -> Result<()> {
        let mut runs = self.runs.write().await;
        let status = runs.get_mut(&run_id).ok_or_else(|| MaestroError::InvalidStateTransition {
            from: "unknown run".to_string(),
            to: next.label(),
        })?;

        if !status.state.can_transition_to(&next) {
            return Err(MaestroError::InvalidStateTransition {
                from: status.state.label(),
                to: next.label(),
            });
        }

        let now = Utc::now();
        if next.is_terminal() {
            status.completed_at = Some(now);
        }
        status.state = next;
        status.updated_at = now;
        Ok(())
    }
}

/// Spawn the capability call and race it against the timeout
async fn invoke(
    capability: Arc<dyn AgentCapability>,
    task: AgentTask,
    timeout_ms: u64,
    cancellation: CancellationToken,
) -> (Option<serde_json::Value>, Option<TaskFailure>) {
    let handle = tokio::spawn(async move { capability.execute(task).await });

    match tokio::time::timeout(Duration::from_millis(timeout_ms), handle).await {
        Ok(Ok(Ok(output))) => (Some(output), None),
        Ok(Ok(Err(e))) => (None, Some(TaskFailure::Execution { message: e.message })),
        Ok(Err(join_error)) => {
            let message = if join_error.is_panic() {
                "agent panicked".to_string()
            } else {
                format!("agent task aborted: {join_error}")
            };
            (None, Some(TaskFailure::Execution { message }))
        }
        Err(_) => {
            // Dropping the handle detaches the call; the token asks it to stop
            cancellation.cancel();
            (None, Some(TaskFailure::Timeout { timeout_ms }))
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
