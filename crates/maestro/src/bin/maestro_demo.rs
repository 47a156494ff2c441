//! End-to-end walk through the orchestrator with in-process echo agents
//!
//! Usage: `maestro-demo [request...]`. Configuration is read from the file named
//! by `MAESTRO_CONFIG` (default `maestro.toml`), then `MAESTRO_*` overrides.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use maestro::{
    AgentCapability, AgentTask, FnAgent, Intent, IntentExtractor, MaestroConfig, Orchestrator,
    WorkflowEvent,
};
use serde_json::json;
use tracing_subscriber::{prelude::*, EnvFilter};

const DEFAULT_REQUEST: &str = "implement and test a login API";

const DEMO_AGENTS: [&str; 7] = [
    "CodeAgent",
    "DebugAgent",
    "TestAgent",
    "RefactorAgent",
    "SecurityAgent",
    "DocAgent",
    "DeployAgent",
];

/// Classifies requests by a few leading keywords
struct KeywordExtractor;

#[async_trait]
impl IntentExtractor for KeywordExtractor {
    async fn extract_intent(&self, request: &str) -> maestro::Result<Intent> {
        let text = request.trim();
        if text.is_empty() {
            return Err(maestro::MaestroError::IntentExtraction(
                "request is empty".to_string(),
            ));
        }

        let lower = text.to_lowercase();
        let intent_type = if ["bug", "fix", "crash"].iter().any(|k| lower.contains(k)) {
            "bugfix"
        } else if ["deploy", "release"].iter().any(|k| lower.contains(k)) {
            "deployment"
        } else {
            "feature"
        };
        let priority = if lower.contains("urgent") { 5 } else { 3 };

        Ok(Intent::new(text, intent_type, priority))
    }
}

fn echo_agent() -> Arc<dyn AgentCapability> {
    Arc::new(FnAgent::new(|task: AgentTask| async move {
        tokio::time::sleep(Duration::from_millis(25)).await;
        Ok(json!({
            "agent": task.agent_name,
            "step": task.step_id,
            "handled": task.payload.get("step").cloned().unwrap_or_default(),
        }))
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    let config_path = std::env::var("MAESTRO_CONFIG").unwrap_or_else(|_| "maestro.toml".to_string());
    let config = MaestroConfig::load_with_env(&config_path)
        .with_context(|| format!("failed to load configuration from {config_path}"))?;

    let orchestrator = Orchestrator::new(config, Arc::new(KeywordExtractor))?;
    orchestrator
        .events()
        .add_observer(Arc::new(|event: &WorkflowEvent| {
            tracing::info!("[DEMO] event {}", event.name());
        }));

    for name in DEMO_AGENTS {
        orchestrator.register_agent(name, echo_agent()).await;
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let request = if args.is_empty() {
        DEFAULT_REQUEST.to_string()
    } else {
        args.join(" ")
    };

    let plan = orchestrator.analyze_request(&request).await?;
    println!("{}", serde_json::to_string_pretty(&plan)?);

    let results = orchestrator.execute_workflow(&plan).await?;
    for task in results.steps.values().flatten() {
        orchestrator
            .engine()
            .record_performance(&task.agent_name, if task.success { 1.0 } else { 0.0 })
            .await;
    }
    println!("{}", serde_json::to_string_pretty(&results)?);

    tracing::info!(
        "[DEMO] {} execution records after run {}",
        orchestrator.get_execution_history().await.len(),
        results.run_id
    );

    Ok(())
}
