//! Configuration management for Maestro
//!
//! Loaded from a TOML file (every field defaulted) with a handful of
//! environment overrides for deployment tuning.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{workflow::WorkflowTemplate, MaestroError, Result};

/// Upper bound every fused confidence must respect
pub const MAX_CONFIDENCE: f64 = 0.95;

/// Top-level configuration for Maestro
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MaestroConfig {
    #[serde(default)]
    pub decision: DecisionConfig,

    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// Weights used when fusing strategy outputs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    /// Share of the existing (rule) confidence kept when a prediction agrees
    #[serde(default = "default_rule_weight")]
    pub rule_weight: f64,

    /// Share of the discounted prediction blended into an existing entry
    #[serde(default = "default_predictive_weight")]
    pub predictive_weight: f64,

    /// Multiplier applied to predictive confidence before fusion
    #[serde(default = "default_predictive_discount")]
    pub predictive_discount: f64,

    /// Scale of the historical success-rate boost
    #[serde(default = "default_historical_boost")]
    pub historical_boost: f64,

    /// Ceiling for any fused confidence
    #[serde(default = "default_confidence_ceiling")]
    pub confidence_ceiling: f64,
}

fn default_rule_weight() -> f64 {
    0.6
}

fn default_predictive_weight() -> f64 {
    0.4
}

fn default_predictive_discount() -> f64 {
    0.7
}

fn default_historical_boost() -> f64 {
    0.2
}

fn default_confidence_ceiling() -> f64 {
    MAX_CONFIDENCE
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            rule_weight: default_rule_weight(),
            predictive_weight: default_predictive_weight(),
            predictive_discount: default_predictive_discount(),
            historical_boost: default_historical_boost(),
            confidence_ceiling: default_confidence_ceiling(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default)]
    pub fusion: FusionWeights,

    /// A historical sample counts as a success only above this value
    #[serde(default = "default_success_threshold")]
    pub success_threshold: f64,

    #[serde(default = "default_min_historical_samples")]
    pub min_historical_samples: usize,

    #[serde(default = "default_max_history_per_key")]
    pub max_history_per_key: usize,
}

fn default_top_k() -> usize {
    3
}

fn default_success_threshold() -> f64 {
    0.8
}

fn default_min_historical_samples() -> usize {
    2
}

fn default_max_history_per_key() -> usize {
    100
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            fusion: FusionWeights::default(),
            success_threshold: default_success_threshold(),
            min_historical_samples: default_min_historical_samples(),
            max_history_per_key: default_max_history_per_key(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Register the built-in `feature` and `bugfix` templates
    #[serde(default = "default_true")]
    pub builtin_templates: bool,

    #[serde(default)]
    pub templates: Vec<WorkflowTemplate>,
}

fn default_timeout_ms() -> u64 {
    300_000
}

fn default_true() -> bool {
    true
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            builtin_templates: true,
            templates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Cap on simultaneously running agent tasks; `None` leaves parallel steps unbounded
    #[serde(default)]
    pub max_concurrent_tasks: Option<usize>,

    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Feed decisions made by `analyze_request` back into the decision history
    #[serde(default = "default_true")]
    pub record_decisions: bool,

    /// Finished run statuses kept for `get_workflow_status`; oldest are evicted first
    #[serde(default = "default_max_retained_runs")]
    pub max_retained_runs: usize,
}

fn default_event_capacity() -> usize {
    1000
}

fn default_max_retained_runs() -> usize {
    1000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: None,
            event_capacity: default_event_capacity(),
            record_decisions: true,
            max_retained_runs: default_max_retained_runs(),
        }
    }
}

impl MaestroConfig {
    /// Parse configuration from a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: MaestroConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file, or return defaults if not found
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml_str(&content)
        } else {
            tracing::debug!("[CONFIG] {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load from file, then apply `MAESTRO_*` environment overrides
    pub fn load_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `MAESTRO_TOP_K`, `MAESTRO_DEFAULT_TIMEOUT_MS`,
    /// `MAESTRO_MAX_CONCURRENT_TASKS` and `MAESTRO_EVENT_CAPACITY`
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(value) = env_parse::<usize>("MAESTRO_TOP_K")? {
            self.decision.top_k = value;
        }
        if let Some(value) = env_parse::<u64>("MAESTRO_DEFAULT_TIMEOUT_MS")? {
            self.planner.default_timeout_ms = value;
        }
        if let Some(value) = env_parse::<usize>("MAESTRO_MAX_CONCURRENT_TASKS")? {
            self.orchestrator.max_concurrent_tasks = (value > 0).then_some(value);
        }
        if let Some(value) = env_parse::<usize>("MAESTRO_EVENT_CAPACITY")? {
            self.orchestrator.event_capacity = value;
        }
        Ok(())
    }

    /// Reject settings that would break decision or scheduling invariants
    pub fn validate(&self) -> Result<()> {
        let fusion = &self.decision.fusion;

        for (name, value) in [
            ("rule_weight", fusion.rule_weight),
            ("predictive_weight", fusion.predictive_weight),
            ("predictive_discount", fusion.predictive_discount),
            ("historical_boost", fusion.historical_boost),
            ("success_threshold", self.decision.success_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MaestroError::Config(format!(
                    "{name} must be in [0.0, 1.0], got {value}"
                )));
            }
        }

        if !(fusion.confidence_ceiling > 0.0 && fusion.confidence_ceiling <= MAX_CONFIDENCE) {
            return Err(MaestroError::Config(format!(
                "confidence_ceiling must be in (0.0, {MAX_CONFIDENCE}], got {}",
                fusion.confidence_ceiling
            )));
        }
        if self.decision.top_k == 0 {
            return Err(MaestroError::Config("top_k must be at least 1".to_string()));
        }
        if self.decision.max_history_per_key == 0 {
            return Err(MaestroError::Config(
                "max_history_per_key must be at least 1".to_string(),
            ));
        }
        if self.planner.default_timeout_ms == 0 {
            return Err(MaestroError::Config(
                "default_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.orchestrator.max_concurrent_tasks == Some(0) {
            return Err(MaestroError::Config(
                "max_concurrent_tasks must be at least 1 when set".to_string(),
            ));
        }
        if self.orchestrator.max_retained_runs == 0 {
            return Err(MaestroError::Config(
                "max_retained_runs must be at least 1".to_string(),
            ));
        }
        if self.orchestrator.event_capacity == 0 {
            return Err(MaestroError::Config(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        for template in &self.planner.templates {
            template.validate()?;
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| MaestroError::Config(format!("{key} has an invalid value: '{raw}'"))),
        Err(_) => Ok(None),
    }
}
