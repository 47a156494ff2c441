//! Normalized requests handed to the decision engine and planner

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Result;

/// A normalized request: what kind of work, how urgent, and any constraints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub description: String,
    #[serde(rename = "type")]
    pub intent_type: String,
    pub priority: i32,
    #[serde(default)]
    pub requirements: BTreeSet<String>,
}

impl Intent {
    pub fn new(description: impl Into<String>, intent_type: impl Into<String>, priority: i32) -> Self {
        Self {
            description: description.into(),
            intent_type: intent_type.into(),
            priority,
            requirements: BTreeSet::new(),
        }
    }

    pub fn with_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.requirements.insert(requirement.into());
        self
    }

    /// History lookup key for this intent
    pub fn key(&self) -> IntentKey {
        IntentKey::new(self.intent_type.clone(), self.priority)
    }
}

/// `(type, priority)` pair that decision and execution history are grouped by
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentKey {
    #[serde(rename = "type")]
    pub intent_type: String,
    pub priority: i32,
}

impl IntentKey {
    pub fn new(intent_type: impl Into<String>, priority: i32) -> Self {
        Self {
            intent_type: intent_type.into(),
            priority,
        }
    }
}

impl fmt::Display for IntentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.intent_type, self.priority)
    }
}

/// Turns a raw request into an [`Intent`]; implemented outside this crate
#[async_trait::async_trait]
pub trait IntentExtractor: Send + Sync {
    async fn extract_intent(&self, request: &str) -> Result<Intent>;
}
