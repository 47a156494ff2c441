//! Event Broadcaster - lifecycle events for plans, runs and agents
//!
//! Events go to every `subscribe()` receiver and to every registered
//! observer. Nothing in the core waits on, or is affected by, a subscriber.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted during planning and execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum WorkflowEvent {
    /// A plan was produced by `analyze_request`
    WorkflowCreated {
        plan_id: Uuid,
        intent_type: String,
        priority: i32,
        step_count: usize,
        timestamp: DateTime<Utc>,
    },

    WorkflowStarted {
        run_id: Uuid,
        plan_id: Uuid,
        step_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Fired once for every step that ran, failed or not
    StepCompleted {
        run_id: Uuid,
        step_id: String,
        step_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    TaskExecuted {
        run_id: Uuid,
        task_id: String,
        step_id: String,
        agent_name: String,
        success: bool,
        duration_ms: u64,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    WorkflowCompleted {
        run_id: Uuid,
        plan_id: Uuid,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    WorkflowFailed {
        run_id: Uuid,
        plan_id: Uuid,
        step_id: String,
        agent_name: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    AgentRegistered {
        agent_name: String,
        replaced: bool,
        timestamp: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    /// Event name as it appears in the serialized `type` tag
    pub fn name(&self) -> &'static str {
        match self {
            Self::WorkflowCreated { .. } => "workflow-created",
            Self::WorkflowStarted { .. } => "workflow-started",
            Self::StepCompleted { .. } => "step-completed",
            Self::TaskExecuted { .. } => "task-executed",
            Self::WorkflowCompleted { .. } => "workflow-completed",
            Self::WorkflowFailed { .. } => "workflow-failed",
            Self::AgentRegistered { .. } => "agent-registered",
        }
    }

    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            Self::WorkflowStarted { run_id, .. }
            | Self::StepCompleted { run_id, .. }
            | Self::TaskExecuted { run_id, .. }
            | Self::WorkflowCompleted { run_id, .. }
            | Self::WorkflowFailed { run_id, .. } => Some(*run_id),
            Self::WorkflowCreated { .. } | Self::AgentRegistered { .. } => None,
        }
    }
}

/// Synchronous callback registered on an [`EventBroadcaster`]
pub trait WorkflowObserver: Send + Sync {
    fn on_event(&self, event: &WorkflowEvent);
}

impl<F> WorkflowObserver for F
where
    F: Fn(&WorkflowEvent) + Send + Sync,
{
    fn on_event(&self, event: &WorkflowEvent) {
        self(event)
    }
}

/// Returned by [`EventBroadcaster::add_observer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(u64);

/// Broadcasts events to all subscribers and observers
pub struct EventBroadcaster {
    sender: broadcast::Sender<WorkflowEvent>,
    observers: RwLock<Vec<(ObserverHandle, Arc<dyn WorkflowObserver>)>>,
    next_observer: AtomicU64,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            observers: RwLock::new(Vec::new()),
            next_observer: AtomicU64::new(1),
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    pub fn add_observer(&self, observer: Arc<dyn WorkflowObserver>) -> ObserverHandle {
        let handle = ObserverHandle(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((handle, observer));
        handle
    }

    /// Returns false when the handle was already removed
    pub fn remove_observer(&self, handle: ObserverHandle) -> bool {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = observers.len();
        observers.retain(|(id, _)| *id != handle);
        observers.len() != before
    }

    /// Broadcast an event to all subscribers and observers
    pub fn emit(&self, event: WorkflowEvent) {
        let observers: Vec<(ObserverHandle, Arc<dyn WorkflowObserver>)> = self
            .observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for (handle, observer) in observers {
            let delivered = catch_unwind(AssertUnwindSafe(|| observer.on_event(&event)));
            if delivered.is_err() {
                tracing::warn!(
                    "[EVENTS] Observer {:?} panicked while handling {}",
                    handle,
                    event.name()
                );
            }
        }

        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    // Convenience methods for common events

    pub fn workflow_created(&self, plan_id: Uuid, intent_type: &str, priority: i32, step_count: usize) {
        self.emit(WorkflowEvent::WorkflowCreated {
            plan_id,
            intent_type: intent_type.to_string(),
            priority,
            step_count,
            timestamp: Utc::now(),
        });
    }

    pub fn workflow_started(&self, run_id: Uuid, plan_id: Uuid, step_count: usize) {
        self.emit(WorkflowEvent::WorkflowStarted {
            run_id,
            plan_id,
            step_count,
            timestamp: Utc::now(),
        });
    }

    pub fn step_completed(&self, run_id: Uuid, step_id: &str, step_name: &str, success: bool, duration_ms: u64) {
        self.emit(WorkflowEvent::StepCompleted {
            run_id,
            step_id: step_id.to_string(),
            step_name: step_name.to_string(),
            success,
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn task_executed(
        &self,
        run_id: Uuid,
        task_id: &str,
        step_id: &str,
        agent_name: &str,
        success: bool,
        duration_ms: u64,
        error: Option<String>,
    ) {
        self.emit(WorkflowEvent::TaskExecuted {
            run_id,
            task_id: task_id.to_string(),
            step_id: step_id.to_string(),
            agent_name: agent_name.to_string(),
            success,
            duration_ms,
            error,
            timestamp: Utc::now(),
        });
    }

    pub fn workflow_completed(&self, run_id: Uuid, plan_id: Uuid, duration_ms: u64) {
        self.emit(WorkflowEvent::WorkflowCompleted {
            run_id,
            plan_id,
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    pub fn workflow_failed(&self, run_id: Uuid, plan_id: Uuid, step_id: &str, agent_name: &str, error: &str) {
        self.emit(WorkflowEvent::WorkflowFailed {
            run_id,
            plan_id,
            step_id: step_id.to_string(),
            agent_name: agent_name.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn agent_registered(&self, agent_name: &str, replaced: bool) {
        self.emit(WorkflowEvent::AgentRegistered {
            agent_name: agent_name.to_string(),
            replaced,
            timestamp: Utc::now(),
        });
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(1000)
    }
}
