//! # Maestro - Agent Decision & Workflow Orchestration
//!
//! Selects the agents that should handle a normalized request by fusing
//! rule-based, predictive and historical signals, compiles the selection into a
//! dependency-ordered plan, and runs that plan with per-task timeouts, bounded
//! parallelism and an append-only execution history.

pub mod config;
pub mod decision;
pub mod events;
pub mod history;
pub mod intent;
pub mod orchestrator;
pub mod registry;
pub mod workflow;


pub use config::{DecisionConfig, FusionWeights, MaestroConfig, OrchestratorConfig, PlannerConfig};
pub use decision::{
    Decision, DecisionEngine, DecisionSource, HistoricalPattern, IntentFeatures, LinearScorer,
    PredictiveScorer,
};
pub use events::{EventBroadcaster, ObserverHandle, WorkflowEvent, WorkflowObserver};
pub use history::{ExecutionHistoryStore, ExecutionRecord, HistorySink, JsonLinesSink};
pub use intent::{Intent, IntentExtractor, IntentKey};
pub use orchestrator::{
    Orchestrator, TaskFailure, TaskResult, WorkflowResults, WorkflowRunStatus, WorkflowState,
};
pub use registry::{AgentCapability, AgentExecutionError, AgentRegistry, AgentTask, FnAgent};
pub use workflow::{
    AgentSlice, StepMode, TemplateStage, WorkflowPlan, WorkflowPlanner, WorkflowStep,
    WorkflowTemplate,
};

/// Main error types for Maestro operations
#[derive(Debug, thiserror::Error)]
pub enum MaestroError {
    #[error("Agent not found: '{agent_name}' (step {step_id})")]
    AgentNotFound { agent_name: String, step_id: String },

    #[error("Agent '{agent_name}' failed in step {step_id}: {message}")]
    AgentExecution {
        step_id: String,
        agent_name: String,
        message: String,
    },

    #[error("Agent '{agent_name}' timed out after {timeout_ms}ms in step {step_id}")]
    TaskTimeout {
        step_id: String,
        agent_name: String,
        timeout_ms: u64,
    },

    #[error("Invalid workflow plan: {0}")]
    InvalidPlan(String),

    #[error("Decision fusion invariant violated: {0}")]
    DecisionFusion(String),

    #[error("Intent extraction failed: {0}")]
    IntentExtraction(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid workflow state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Duplicate execution record: {0}")]
    DuplicateRecord(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl MaestroError {
    /// Step id carried by execution-time errors
    pub fn step_id(&self) -> Option<&str> {
        match self {
            Self::AgentNotFound { step_id, .. }
            | Self::AgentExecution { step_id, .. }
            | Self::TaskTimeout { step_id, .. } => Some(step_id),
            _ => None,
        }
    }

    /// Agent name carried by execution-time errors
    pub fn agent_name(&self) -> Option<&str> {
        match self {
            Self::AgentNotFound { agent_name, .. }
            | Self::AgentExecution { agent_name, .. }
            | Self::TaskTimeout { agent_name, .. } => Some(agent_name),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MaestroError>;
