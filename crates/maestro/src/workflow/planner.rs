//! Workflow Planner - compiles ranked decisions into a validated plan
//!
//! A template registered for the intent type slices the ranked agents into
//! stages. Without a template, every agent gets its own sequential step in rank
//! order (the dynamic chain).

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;

use super::types::{StepMode, WorkflowPlan, WorkflowStep};
use crate::{config::PlannerConfig, decision::Decision, intent::Intent, MaestroError, Result};

/// How many of the remaining ranked agents a stage takes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentSlice {
    /// The next `n` agents in one step
    Count(usize),
    /// Every remaining agent in one step
    Remaining,
    /// One step per remaining agent
    EachRemaining,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateStage {
    pub name: String,
    pub mode: StepMode,
    pub agents: AgentSlice,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl TemplateStage {
    pub fn new(name: &str, mode: StepMode, agents: AgentSlice) -> Self {
        Self {
            name: name.to_string(),
            mode,
            agents,
            timeout_ms: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Named stage layout applied to intents of one type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub name: String,
    pub intent_type: String,
    pub stages: Vec<TemplateStage>,
}

impl WorkflowTemplate {
    pub fn new(name: &str, intent_type: &str, stages: Vec<TemplateStage>) -> Self {
        Self {
            name: name.to_string(),
            intent_type: intent_type.to_string(),
            stages,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| {
            Err(MaestroError::Config(format!("template '{}': {reason}", self.name)))
        };

        if self.name.trim().is_empty() {
            return Err(MaestroError::Config("template name must not be empty".to_string()));
        }
        if self.intent_type.trim().is_empty() {
            return invalid("intent_type must not be empty".to_string());
        }
        if self.stages.is_empty() {
            return invalid("at least one stage is required".to_string());
        }

        let mut names = HashSet::new();
        for stage in &self.stages {
            if !names.insert(stage.name.as_str()) {
                return invalid(format!("duplicate stage '{}'", stage.name));
            }
            if stage.agents == AgentSlice::Count(0) {
                return invalid(format!("stage '{}' takes zero agents", stage.name));
            }
            if stage.timeout_ms == Some(0) {
                return invalid(format!("stage '{}' has a zero timeout", stage.name));
            }
        }

        Ok(())
    }

    /// `feature` and `bugfix` layouts registered by default
    pub fn builtin() -> Vec<Self> {
        vec![
            Self::new(
                "feature",
                "feature",
                vec![
                    TemplateStage::new("implementation", StepMode::Sequential, AgentSlice::Count(1)),
                    TemplateStage::new("verification", StepMode::Parallel, AgentSlice::Remaining),
                ],
            ),
            Self::new(
                "bugfix",
                "bugfix",
                vec![
                    TemplateStage::new("diagnosis", StepMode::Sequential, AgentSlice::Count(1)),
                    TemplateStage::new("remediation", StepMode::Sequential, AgentSlice::EachRemaining),
                ],
            ),
        ]
    }
}

pub struct WorkflowPlanner {
    config: PlannerConfig,
    templates: RwLock<HashMap<String, WorkflowTemplate>>,
}

impl WorkflowPlanner {
    pub fn new(config: PlannerConfig) -> Result<Self> {
        let mut templates = HashMap::new();

        let builtin = if config.builtin_templates {
            WorkflowTemplate::builtin()
        } else {
            Vec::new()
        };
        for template in builtin.into_iter().chain(config.templates.iter().cloned()) {
            template.validate()?;
            templates.insert(template.intent_type.clone(), template);
        }

        Ok(Self {
            config,
            templates: RwLock::new(templates),
        })
    }

    /// Register (or replace) the template for its intent type
    pub async fn register_template(&self, template: WorkflowTemplate) -> Result<()> {
        template.validate()?;

        tracing::info!(
            "[PLANNER] Registered template '{}' for intent type '{}'",
            template.name,
            template.intent_type
        );
        self.templates
            .write()
            .await
            .insert(template.intent_type.clone(), template);
        Ok(())
    }

    pub async fn template_for(&self, intent_type: &str) -> Option<WorkflowTemplate> {
        self.templates.read().await.get(intent_type).cloned()
    }

    /// Build a validated plan for `intent` from decisions in rank order
    pub async fn create_workflow(&self, intent: &Intent, decisions: &[Decision]) -> Result<WorkflowPlan> {
        let mut seen = HashSet::new();
        let agents: Vec<String> = decisions
            .iter()
            .filter(|decision| seen.insert(decision.agent_name.as_str()))
            .map(|decision| decision.agent_name.clone())
            .collect();

        if agents.is_empty() {
            return Err(MaestroError::InvalidPlan(format!(
                "no agents selected for intent '{}'",
                intent.key()
            )));
        }

        let template = self.template_for(&intent.intent_type).await;
        let mut builder = StepBuilder::new(intent, self.config.default_timeout_ms);

        let strategy = match &template {
            Some(template) => {
                let leftover = builder.apply_template(template, agents);
                builder.chain(leftover, |agent| format!("follow-up ({agent})"));
                format!("template:{}", template.name)
            }
            None => {
                builder.chain(agents, |agent| agent.to_string());
                "dynamic".to_string()
            }
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("intentType".to_string(), intent.intent_type.clone());
        metadata.insert("priority".to_string(), intent.priority.to_string());
        metadata.insert("strategy".to_string(), strategy.clone());

        let plan = WorkflowPlan::with_details(builder.steps, metadata, Some(intent.key()))?;

        tracing::info!(
            "[PLANNER] Created plan {} with {} steps ({})",
            plan.id(),
            plan.steps().len(),
            strategy
        );

        Ok(plan)
    }
}

/// Accumulates steps, each depending on the one before it
struct StepBuilder<'a> {
    intent: &'a Intent,
    default_timeout_ms: u64,
    steps: Vec<WorkflowStep>,
}

impl<'a> StepBuilder<'a> {
    fn new(intent: &'a Intent, default_timeout_ms: u64) -> Self {
        Self {
            intent,
            default_timeout_ms,
            steps: Vec::new(),
        }
    }

    /// Apply the template's stages, returning agents no stage claimed
    fn apply_template(&mut self, template: &WorkflowTemplate, mut agents: Vec<String>) -> Vec<String> {
        for stage in &template.stages {
            let timeout_ms = stage.timeout_ms.unwrap_or(self.default_timeout_ms);

            match stage.agents {
                AgentSlice::Count(n) => {
                    let taken: Vec<String> = agents.drain(..n.min(agents.len())).collect();
                    self.push(stage.name.clone(), taken, stage.mode, timeout_ms);
                }
                AgentSlice::Remaining => {
                    let taken = std::mem::take(&mut agents);
                    self.push(stage.name.clone(), taken, stage.mode, timeout_ms);
                }
                AgentSlice::EachRemaining => {
                    for agent in std::mem::take(&mut agents) {
                        let name = format!("{} ({})", stage.name, agent);
                        self.push(name, vec![agent], stage.mode, timeout_ms);
                    }
                }
            }
        }

        agents
    }

    /// One sequential step per agent, in rank order
    fn chain(&mut self, agents: Vec<String>, step_name: impl Fn(&str) -> String) {
        for agent in agents {
            let name = step_name(&agent);
            self.push(name, vec![agent], StepMode::Sequential, self.default_timeout_ms);
        }
    }

    /// `name`, or `name #2`, `name #3`... if an earlier step already took it
    fn unique_name(&self, name: String) -> String {
        let taken = |candidate: &str| self.steps.iter().any(|step| step.name == candidate);
        if !taken(&name) {
            return name;
        }

        let mut n = 2;
        loop {
            let candidate = format!("{name} #{n}");
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn push(&mut self, name: String, agents: Vec<String>, mode: StepMode, timeout_ms: u64) {
        if agents.is_empty() {
            return;
        }

        let name = self.unique_name(name);
        let id = format!("step_{}", self.steps.len() + 1);
        let task = json!({
            "description": self.intent.description,
            "type": self.intent.intent_type,
            "priority": self.intent.priority,
            "requirements": self.intent.requirements,
            "step": name,
        });

        let mut step = match mode {
            StepMode::Sequential => WorkflowStep::sequential(id, name, &[]),
            StepMode::Parallel => WorkflowStep::parallel(id, name, &[]),
        }
        .with_agents(agents)
        .with_timeout_ms(timeout_ms)
        .with_task(task);

        if let Some(previous) = self.steps.last() {
            step = step.depends_on(previous.id.clone());
        }
        self.steps.push(step);
    }
}
