//! Plan types for workflow orchestration

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{intent::IntentKey, MaestroError, Result};

/// How the agents of one step are run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepMode {
    /// One agent at a time, in list order
    Sequential,
    /// All agents at once; the step finishes when every agent has finished
    Parallel,
}

/// A unit of the plan: one or more agents working on the same payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub id: String,
    pub name: String,
    pub agent_names: Vec<String>,
    pub mode: StepMode,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    pub timeout_ms: u64,
    #[serde(default)]
    pub task: serde_json::Value,
}

impl WorkflowStep {
    fn new(id: impl Into<String>, name: impl Into<String>, agents: &[&str], mode: StepMode) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            agent_names: agents.iter().map(|agent| agent.to_string()).collect(),
            mode,
            dependencies: BTreeSet::new(),
            timeout_ms: crate::config::PlannerConfig::default().default_timeout_ms,
            task: serde_json::Value::Null,
        }
    }

    pub fn sequential(id: impl Into<String>, name: impl Into<String>, agents: &[&str]) -> Self {
        Self::new(id, name, agents, StepMode::Sequential)
    }

    pub fn parallel(id: impl Into<String>, name: impl Into<String>, agents: &[&str]) -> Self {
        Self::new(id, name, agents, StepMode::Parallel)
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.dependencies.insert(step_id.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_task(mut self, task: serde_json::Value) -> Self {
        self.task = task;
        self
    }

    pub(crate) fn with_agents(mut self, agents: Vec<String>) -> Self {
        self.agent_names = agents;
        self
    }
}

/// A validated, dependency-ordered list of steps
///
/// Plans can only be built through [`WorkflowPlan::new`], which rejects empty
/// plans, duplicate ids or names, dangling or cyclic dependencies, and step lists that
/// are not already in topological order. Once built a plan is read-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowPlan {
    id: Uuid,
    steps: Vec<WorkflowStep>,
    metadata: BTreeMap<String, String>,
    intent_key: Option<IntentKey>,
}

impl WorkflowPlan {
    pub fn new(steps: Vec<WorkflowStep>) -> Result<Self> {
        Self::with_details(steps, BTreeMap::new(), None)
    }

    pub fn with_details(
        steps: Vec<WorkflowStep>,
        metadata: BTreeMap<String, String>,
        intent_key: Option<IntentKey>,
    ) -> Result<Self> {
        validate_steps(&steps)?;

        Ok(Self {
            id: Uuid::new_v4(),
            steps,
            metadata,
            intent_key,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|step| step.id == step_id)
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn intent_key(&self) -> Option<&IntentKey> {
        self.intent_key.as_ref()
    }

    /// Every agent named in the plan, first occurrence order
    pub fn agent_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.steps
            .iter()
            .flat_map(|step| step.agent_names.iter())
            .filter(|name| seen.insert(name.as_str()))
            .map(String::as_str)
            .collect()
    }
}

fn validate_steps(steps: &[WorkflowStep]) -> Result<()> {
    if steps.is_empty() {
        return Err(MaestroError::InvalidPlan("plan has no steps".to_string()));
    }

    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut names: HashSet<&str> = HashSet::new();
    for (index, step) in steps.iter().enumerate() {
        if positions.insert(step.id.as_str(), index).is_some() {
            return Err(MaestroError::InvalidPlan(format!("duplicate step id '{}'", step.id)));
        }
        // Results are keyed by step name
        if !names.insert(step.name.as_str()) {
            return Err(MaestroError::InvalidPlan(format!("duplicate step name '{}'", step.name)));
        }
        if step.agent_names.is_empty() {
            return Err(MaestroError::InvalidPlan(format!("step '{}' has no agents", step.id)));
        }
        let mut agents = HashSet::new();
        if let Some(agent) = step.agent_names.iter().find(|name| !agents.insert(name.as_str())) {
            return Err(MaestroError::InvalidPlan(format!(
                "step '{}' lists agent '{}' more than once",
                step.id, agent
            )));
        }
        if step.timeout_ms == 0 {
            return Err(MaestroError::InvalidPlan(format!("step '{}' has a zero timeout", step.id)));
        }
    }

    for step in steps {
        for dependency in &step.dependencies {
            if !positions.contains_key(dependency.as_str()) {
                return Err(MaestroError::InvalidPlan(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dependency
                )));
            }
        }
    }

    // Kahn's algorithm over the dependency graph
    let mut in_degree: Vec<usize> = steps.iter().map(|step| step.dependencies.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (index, step) in steps.iter().enumerate() {
        for dependency in &step.dependencies {
            dependents[positions[dependency.as_str()]].push(index);
        }
    }

    let mut ready: VecDeque<usize> = (0..steps.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut visited = 0;
    while let Some(index) = ready.pop_front() {
        visited += 1;
        for &dependent in &dependents[index] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push_back(dependent);
            }
        }
    }

    if visited != steps.len() {
        let cyclic: Vec<&str> = steps
            .iter()
            .zip(&in_degree)
            .filter(|(_, degree)| **degree > 0)
            .map(|(step, _)| step.id.as_str())
            .collect();
        return Err(MaestroError::InvalidPlan(format!(
            "cyclic dependencies between steps {cyclic:?}"
        )));
    }

    // Execution walks the list in order, so it must already be topological
    for (index, step) in steps.iter().enumerate() {
        for dependency in &step.dependencies {
            if positions[dependency.as_str()] > index {
                return Err(MaestroError::InvalidPlan(format!(
                    "step '{}' is listed before its dependency '{}'",
                    step.id, dependency
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invalid(steps: Vec<WorkflowStep>, needle: &str) {
        match WorkflowPlan::new(steps) {
            Err(MaestroError::InvalidPlan(message)) => {
                assert!(message.contains(needle), "unexpected message: {message}")
            }
            other => panic!("expected InvalidPlan, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_chain() {
        let plan = WorkflowPlan::new(vec![
            WorkflowStep::sequential("a", "A", &["CodeAgent"]),
            WorkflowStep::sequential("b", "B", &["TestAgent"]).depends_on("a"),
            WorkflowStep::parallel("c", "C", &["DocAgent", "CodeAgent"]).depends_on("b"),
        ])
        .unwrap();

        assert_eq!(plan.steps().len(), 3);
        assert_eq!(plan.agent_names(), vec!["CodeAgent", "TestAgent", "DocAgent"]);
        assert_eq!(plan.step("c").map(|s| s.mode), Some(StepMode::Parallel));
    }

    #[test]
    fn test_empty_plan_rejected() {
        assert_invalid(Vec::new(), "no steps");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        assert_invalid(
            vec![
                WorkflowStep::sequential("a", "A", &["X"]),
                WorkflowStep::sequential("a", "A again", &["Y"]),
            ],
            "duplicate",
        );
    }

    #[test]
    fn test_duplicate_names_rejected() {
        assert_invalid(
            vec![
                WorkflowStep::sequential("a", "Build", &["X"]),
                WorkflowStep::sequential("b", "Build", &["Y"]).depends_on("a"),
            ],
            "duplicate step name",
        );
    }

    #[test]
    fn test_missing_dependency_rejected() {
        assert_invalid(
            vec![WorkflowStep::sequential("a", "A", &["X"]).depends_on("ghost")],
            "unknown step 'ghost'",
        );
    }

    #[test]
    fn test_cycle_rejected() {
        assert_invalid(
            vec![
                WorkflowStep::sequential("a", "A", &["X"]).depends_on("c"),
                WorkflowStep::sequential("b", "B", &["X"]).depends_on("a"),
                WorkflowStep::sequential("c", "C", &["X"]).depends_on("b"),
            ],
            "cyclic",
        );
    }

    #[test]
    fn test_self_dependency_rejected() {
        assert_invalid(vec![WorkflowStep::sequential("a", "A", &["X"]).depends_on("a")], "cyclic");
    }

    #[test]
    fn test_out_of_order_rejected() {
        assert_invalid(
            vec![
                WorkflowStep::sequential("b", "B", &["X"]).depends_on("a"),
                WorkflowStep::sequential("a", "A", &["X"]),
            ],
            "listed before",
        );
    }

    #[test]
    fn test_step_without_agents_rejected() {
        assert_invalid(vec![WorkflowStep::parallel("a", "A", &[])], "no agents");
    }

    #[test]
    fn test_repeated_agent_in_step_rejected() {
        assert_invalid(
            vec![WorkflowStep::parallel("a", "A", &["X", "Y", "X"])],
            "more than once",
        );
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert_invalid(
            vec![WorkflowStep::sequential("a", "A", &["X"]).with_timeout_ms(0)],
            "zero timeout",
        );
    }

    #[test]
    fn test_step_mode_serializes_lowercase() {
        let step = WorkflowStep::parallel("a", "A", &["X"]);
        let json = serde_json::to_value(&step).unwrap();

        assert_eq!(json["mode"], "parallel");
        assert_eq!(json["agentNames"][0], "X");
        assert_eq!(json["timeoutMs"], 300_000);
    }
}
