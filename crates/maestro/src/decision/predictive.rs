//! Predictive strategy - deterministic features fed through a pluggable scorer

use serde::{Deserialize, Serialize};

use super::rules::tokenize;
use crate::intent::Intent;

/// Description length at which the length half of the complexity heuristic saturates
const COMPLEXITY_LENGTH_SCALE: f64 = 200.0;

/// Features extracted from an intent; identical intents always yield identical features
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentFeatures {
    pub tokens: Vec<String>,
    /// 0.0..=1.0, half from description length and half from priority
    pub complexity: f64,
    pub priority: i32,
    pub requirement_count: usize,
}

impl IntentFeatures {
    pub fn extract(intent: &Intent) -> Self {
        let length_factor =
            (intent.description.chars().count() as f64 / COMPLEXITY_LENGTH_SCALE).min(1.0);
        let priority_factor = f64::from(intent.priority.clamp(1, 5) - 1) / 4.0;

        Self {
            tokens: tokenize(intent),
            complexity: 0.5 * length_factor + 0.5 * priority_factor,
            priority: intent.priority,
            requirement_count: intent.requirements.len(),
        }
    }

    /// True when some token starts with `keyword`
    pub fn has_keyword(&self, keyword: &str) -> bool {
        self.tokens.iter().any(|token| token.starts_with(keyword))
    }
}

/// A raw (undiscounted) prediction for one agent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub agent_name: String,
    /// 0.0..=1.0
    pub score: f64,
    pub signals: Vec<String>,
}

/// Maps features to per-agent scores; implementations must be deterministic
pub trait PredictiveScorer: Send + Sync {
    fn score(&self, features: &IntentFeatures) -> Vec<Prediction>;
}

/// Per-agent weights used by [`LinearScorer`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringProfile {
    pub agent_name: String,
    pub bias: f64,
    pub keyword_weights: Vec<(String, f64)>,
    pub complexity_weight: f64,
}

impl ScoringProfile {
    pub fn new(agent_name: &str, bias: f64, keyword_weights: &[(&str, f64)], complexity_weight: f64) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            bias,
            keyword_weights: keyword_weights
                .iter()
                .map(|(keyword, weight)| (keyword.to_string(), *weight))
                .collect(),
            complexity_weight,
        }
    }
}

/// Bias + keyword weights + complexity, clamped to `[0, 1]`
#[derive(Debug, Clone)]
pub struct LinearScorer {
    profiles: Vec<ScoringProfile>,
    min_score: f64,
}

impl LinearScorer {
    pub fn new(profiles: Vec<ScoringProfile>, min_score: f64) -> Self {
        Self { profiles, min_score }
    }
}

impl PredictiveScorer for LinearScorer {
    fn score(&self, features: &IntentFeatures) -> Vec<Prediction> {
        self.profiles
            .iter()
            .filter_map(|profile| {
                let mut score = profile.bias + features.complexity * profile.complexity_weight;
                let mut signals = Vec::new();

                for (keyword, weight) in &profile.keyword_weights {
                    if features.has_keyword(keyword) {
                        score += weight;
                        signals.push(keyword.clone());
                    }
                }

                let score = score.clamp(0.0, 1.0);
                (score >= self.min_score).then(|| Prediction {
                    agent_name: profile.agent_name.clone(),
                    score,
                    signals,
                })
            })
            .collect()
    }
}

impl Default for LinearScorer {
    fn default() -> Self {
        Self::new(
            vec![
                ScoringProfile::new(
                    "CodeAgent",
                    0.1,
                    &[("implement", 0.35), ("build", 0.3), ("create", 0.25), ("feature", 0.2), ("api", 0.2), ("endpoint", 0.2)],
                    0.2,
                ),
                ScoringProfile::new(
                    "TestAgent",
                    0.05,
                    &[("test", 0.45), ("coverage", 0.3), ("verify", 0.25), ("api", 0.1), ("bug", 0.1)],
                    0.15,
                ),
                ScoringProfile::new(
                    "DebugAgent",
                    0.05,
                    &[("bug", 0.4), ("fix", 0.35), ("error", 0.3), ("crash", 0.3), ("fail", 0.2)],
                    0.1,
                ),
                ScoringProfile::new(
                    "RefactorAgent",
                    0.05,
                    &[("refactor", 0.45), ("cleanup", 0.3), ("optimiz", 0.3), ("legacy", 0.2)],
                    0.2,
                ),
                ScoringProfile::new(
                    "SecurityAgent",
                    0.05,
                    &[("security", 0.45), ("vulnerab", 0.35), ("auth", 0.3), ("login", 0.15), ("token", 0.15)],
                    0.15,
                ),
                ScoringProfile::new(
                    "DocAgent",
                    0.05,
                    &[("document", 0.45), ("readme", 0.35), ("docs", 0.35), ("api", 0.1)],
                    0.05,
                ),
                ScoringProfile::new(
                    "DeployAgent",
                    0.05,
                    &[("deploy", 0.45), ("release", 0.3), ("docker", 0.3), ("pipeline", 0.25)],
                    0.1,
                ),
            ],
            0.35,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complexity_heuristic() {
        let short_low = IntentFeatures::extract(&Intent::new("fix", "bugfix", 1));
        let long_high = IntentFeatures::extract(&Intent::new("x".repeat(400), "bugfix", 5));

        assert!(short_low.complexity < 0.01);
        assert!((long_high.complexity - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_priority_is_clamped() {
        let features = IntentFeatures::extract(&Intent::new("", "x", 42));
        assert!((features.complexity - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_linear_scorer_scenario_scores() {
        let intent = Intent::new("implement and test a login API", "feature", 3);
        let predictions = LinearScorer::default().score(&IntentFeatures::extract(&intent));

        let names: Vec<&str> = predictions.iter().map(|p| p.agent_name.as_str()).collect();
        assert_eq!(names, vec!["CodeAgent", "TestAgent"]);

        // complexity = 0.5 * 30/200 + 0.5 * 2/4 = 0.325
        assert!((predictions[0].score - 0.715).abs() < 1e-9);
        assert_eq!(predictions[0].signals, vec!["implement".to_string(), "api".to_string()]);
        assert!((predictions[1].score - 0.64875).abs() < 1e-9);
    }

    #[test]
    fn test_below_min_score_is_dropped() {
        let intent = Intent::new("hello", "chat", 1);
        let predictions = LinearScorer::default().score(&IntentFeatures::extract(&intent));

        assert!(predictions.is_empty());
    }
}
