//! Agent Registry - name to capability lookup
//!
//! Agents are opaque to the core: anything implementing [`AgentCapability`]
//! can be registered under a name and invoked by the orchestrator.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

pub use tokio_util::sync::CancellationToken;

/// Error returned by a capability; recorded as the task's failure message
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct AgentExecutionError {
    pub message: String,
}

impl AgentExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&str> for AgentExecutionError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for AgentExecutionError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// One invocation of one agent within a run
#[derive(Debug, Clone)]
pub struct AgentTask {
    /// `{run_id}:{step_id}:{agent_name}`
    pub task_id: String,
    pub run_id: Uuid,
    pub step_id: String,
    pub agent_name: String,
    pub payload: serde_json::Value,
    pub timeout_ms: u64,
    /// Triggered when the orchestrator stops waiting on this task.
    /// Capabilities should check it periodically and stop early.
    pub cancellation: CancellationToken,
}

impl AgentTask {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Something the orchestrator can invoke by name
#[async_trait]
pub trait AgentCapability: Send + Sync {
    async fn execute(&self, task: AgentTask) -> Result<serde_json::Value, AgentExecutionError>;
}

/// Adapts an async closure into an [`AgentCapability`]
pub struct FnAgent<F> {
    handler: F,
}

impl<F, Fut> FnAgent<F>
where
    F: Fn(AgentTask) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, AgentExecutionError>> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F, Fut> AgentCapability for FnAgent<F>
where
    F: Fn(AgentTask) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, AgentExecutionError>> + Send + 'static,
{
    async fn execute(&self, task: AgentTask) -> Result<serde_json::Value, AgentExecutionError> {
        (self.handler)(task).await
    }
}

#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<dyn AgentCapability>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `capability` under `name`, replacing any previous one.
    /// Returns true when an existing registration was replaced.
    pub async fn register(&self, name: impl Into<String>, capability: Arc<dyn AgentCapability>) -> bool {
        let name = name.into();
        let replaced = self.agents.write().await.insert(name.clone(), capability).is_some();

        tracing::debug!("[REGISTRY] Registered agent '{}' (replaced: {})", name, replaced);
        replaced
    }

    pub async fn unregister(&self, name: &str) -> bool {
        self.agents.write().await.remove(name).is_some()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn AgentCapability>> {
        self.agents.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.agents.read().await.contains_key(name)
    }

    /// Registered names, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(agent_name: &str) -> AgentTask {
        AgentTask {
            task_id: format!("run:step_1:{agent_name}"),
            run_id: Uuid::nil(),
            step_id: "step_1".to_string(),
            agent_name: agent_name.to_string(),
            payload: json!({ "description": "hello" }),
            timeout_ms: 1000,
            cancellation: CancellationToken::new(),
        }
    }

    fn echo(tag: &'static str) -> Arc<dyn AgentCapability> {
        Arc::new(FnAgent::new(move |task: AgentTask| async move {
            Ok(json!({ "tag": tag, "payload": task.payload }))
        }))
    }

    #[tokio::test]
    async fn test_register_and_execute() {
        let registry = AgentRegistry::new();
        assert!(!registry.contains("EchoAgent").await);
        assert!(!registry.register("EchoAgent", echo("v1")).await);
        assert!(registry.contains("EchoAgent").await);

        let agent = registry.get("EchoAgent").await.unwrap();
        let output = agent.execute(task("EchoAgent")).await.unwrap();

        assert_eq!(output["tag"], "v1");
        assert_eq!(output["payload"]["description"], "hello");
    }

    #[tokio::test]
    async fn test_reregistration_replaces() {
        let registry = AgentRegistry::new();
        registry.register("EchoAgent", echo("v1")).await;
        assert!(registry.register("EchoAgent", echo("v2")).await);

        let output = registry
            .get("EchoAgent")
            .await
            .unwrap()
            .execute(task("EchoAgent"))
            .await
            .unwrap();
        assert_eq!(output["tag"], "v2");
        assert_eq!(registry.names().await, vec!["EchoAgent".to_string()]);
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = AgentRegistry::new();
        registry.register("EchoAgent", echo("v1")).await;

        assert!(registry.unregister("EchoAgent").await);
        assert!(!registry.unregister("EchoAgent").await);
        assert!(registry.get("EchoAgent").await.is_none());
        assert!(!registry.contains("EchoAgent").await);
    }

    #[tokio::test]
    async fn test_capability_error() {
        let failing = FnAgent::new(|_task: AgentTask| async { Err(AgentExecutionError::from("boom")) });
        let error = failing.execute(task("Failing")).await.unwrap_err();

        assert_eq!(error.to_string(), "boom");
    }
}
