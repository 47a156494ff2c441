//! Decision output types

use serde::{Deserialize, Serialize};

/// Strategy that introduced an agent into the ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DecisionSource {
    RuleBased,
    Predictive,
}

impl DecisionSource {
    /// Lower ranks first when confidences tie
    pub fn precedence(self) -> u8 {
        match self {
            Self::RuleBased => 0,
            Self::Predictive => 1,
        }
    }
}

/// A scored recommendation of which agent should handle an intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub agent_name: String,
    pub confidence: f64,
    pub reasoning: String,
    pub alternative_agents: Vec<String>,
    pub source: DecisionSource,
}

impl Decision {
    pub fn new(
        agent_name: impl Into<String>,
        confidence: f64,
        reasoning: impl Into<String>,
        source: DecisionSource,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            confidence,
            reasoning: reasoning.into(),
            alternative_agents: Vec::new(),
            source,
        }
    }

    pub fn with_alternatives(mut self, alternatives: Vec<String>) -> Self {
        self.alternative_agents = alternatives;
        self
    }
}

/// Observed track record of one agent for one `(type, priority)` key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalPattern {
    pub agent_name: String,
    /// Samples whose performance exceeded the success threshold
    pub frequency: usize,
    pub samples: usize,
    pub success_rate: f64,
}
