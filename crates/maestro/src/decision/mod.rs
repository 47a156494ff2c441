//! Decision Engine - ranks agents for an intent
//!
//! Three strategies feed one fusion step:
//! 1. Rules: fixed keyword rules with fixed confidences
//! 2. Prediction: feature scoring, discounted before fusion
//! 3. History: success rates for the same `(type, priority)`, boosting known agents only

pub mod historical;
pub mod predictive;
pub mod rules;
pub mod types;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use tokio::sync::RwLock;

use crate::{
    config::{DecisionConfig, MAX_CONFIDENCE},
    history::ExecutionHistoryStore,
    intent::{Intent, IntentKey},
    MaestroError, Result,
};

pub use historical::{AgentPerformance, DecisionSample};
pub use predictive::{IntentFeatures, LinearScorer, Prediction, PredictiveScorer, ScoringProfile};
pub use rules::{KeywordRule, RuleSet};
pub use types::{Decision, DecisionSource, HistoricalPattern};

#[derive(Debug, Default)]
struct EngineState {
    decisions: HashMap<IntentKey, VecDeque<DecisionSample>>,
    performance: HashMap<String, AgentPerformance>,
}

/// Fuses rule, predictive and historical signals into a ranked decision list
pub struct DecisionEngine {
    config: DecisionConfig,
    rules: RuleSet,
    scorer: Arc<dyn PredictiveScorer>,
    state: RwLock<EngineState>,
    execution_history: Option<Arc<ExecutionHistoryStore>>,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig) -> Self {
        Self {
            config,
            rules: RuleSet::default(),
            scorer: Arc::new(LinearScorer::default()),
            state: RwLock::new(EngineState::default()),
            execution_history: None,
        }
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn PredictiveScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Read execution records for the intent's key as additional historical samples
    pub fn with_execution_history(mut self, store: Arc<ExecutionHistoryStore>) -> Self {
        self.execution_history = Some(store);
        self
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// Rank agents for an intent, best first, at most `top_k` entries
    pub async fn determine_agents(&self, intent: &Intent) -> Result<Vec<Decision>> {
        let rule_decisions = self.rule_decisions(intent);
        let predictive_decisions = self.predictive_decisions(intent);
        let patterns = self.historical_patterns(intent).await;

        let decisions = self.fuse(rule_decisions, predictive_decisions, &patterns)?;

        tracing::debug!(
            "[DECISION_ENGINE] {} -> {:?}",
            intent.key(),
            decisions
                .iter()
                .map(|d| (d.agent_name.as_str(), d.confidence))
                .collect::<Vec<_>>()
        );

        Ok(decisions)
    }

    /// Rule strategy output, before fusion
    pub fn rule_decisions(&self, intent: &Intent) -> Vec<Decision> {
        self.rules.evaluate(intent)
    }

    /// Predictive strategy output, already discounted
    pub fn predictive_decisions(&self, intent: &Intent) -> Vec<Decision> {
        let features = IntentFeatures::extract(intent);
        let discount = self.config.fusion.predictive_discount;

        self.scorer
            .score(&features)
            .into_iter()
            .map(|prediction| {
                let reasoning = if prediction.signals.is_empty() {
                    format!(
                        "Predicted score {:.3} from complexity {:.3}",
                        prediction.score, features.complexity
                    )
                } else {
                    format!(
                        "Predicted score {:.3} from signals [{}]",
                        prediction.score,
                        prediction.signals.join(", ")
                    )
                };

                Decision::new(
                    prediction.agent_name,
                    prediction.score * discount,
                    reasoning,
                    DecisionSource::Predictive,
                )
            })
            .collect()
    }

    /// Historical patterns for the intent's `(type, priority)` key
    pub async fn historical_patterns(&self, intent: &Intent) -> Vec<HistoricalPattern> {
        let key = intent.key();

        let mut samples: Vec<(String, f64)> = {
            let state = self.state.read().await;
            state
                .decisions
                .get(&key)
                .map(|entries| {
                    entries
                        .iter()
                        .map(|entry| {
                            let performance = state
                                .performance
                                .get(&entry.agent_name)
                                .map(|p| p.score)
                                .unwrap_or(entry.confidence);
                            (entry.agent_name.clone(), performance)
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        if let Some(store) = &self.execution_history {
            samples.extend(
                store
                    .by_intent(&key)
                    .await
                    .into_iter()
                    .map(|record| (record.agent_name, if record.success { 1.0 } else { 0.0 })),
            );
        }

        historical::analyze(
            samples,
            self.config.success_threshold,
            self.config.min_historical_samples,
        )
    }

    /// Append decisions to the history for the intent's key
    pub async fn record_decision(&self, intent: &Intent, decisions: &[Decision]) {
        let key = intent.key();
        let limit = self.config.max_history_per_key;
        let recorded_at = Utc::now();

        let mut state = self.state.write().await;
        let entries = state.decisions.entry(key.clone()).or_default();
        for decision in decisions {
            entries.push_back(DecisionSample {
                agent_name: decision.agent_name.clone(),
                confidence: decision.confidence,
                recorded_at,
            });
        }
        while entries.len() > limit {
            entries.pop_front();
        }

        tracing::debug!(
            "[DECISION_ENGINE] Recorded {} decisions for {} ({} retained)",
            decisions.len(),
            key,
            entries.len()
        );
    }

    /// Fold a performance score (clamped to `[0, 1]`) into an agent's running mean
    pub async fn record_performance(&self, agent_name: &str, score: f64) {
        let mut state = self.state.write().await;
        state
            .performance
            .entry(agent_name.to_string())
            .or_default()
            .record(score);
    }

    pub async fn performance(&self, agent_name: &str) -> Option<AgentPerformance> {
        self.state.read().await.performance.get(agent_name).copied()
    }

    fn fuse(
        &self,
        rule_decisions: Vec<Decision>,
        predictive_decisions: Vec<Decision>,
        patterns: &[HistoricalPattern],
    ) -> Result<Vec<Decision>> {
        let weights = &self.config.fusion;
        let mut fused: IndexMap<String, Decision> = IndexMap::new();

        for decision in rule_decisions {
            fused.entry(decision.agent_name.clone()).or_insert(decision);
        }

        for predicted in predictive_decisions {
            match fused.get_mut(&predicted.agent_name) {
                Some(existing) => {
                    existing.confidence = existing.confidence * weights.rule_weight
                        + predicted.confidence * weights.predictive_weight;
                    existing.reasoning = format!("{}; {}", existing.reasoning, predicted.reasoning);
                }
                None => {
                    fused.insert(predicted.agent_name.clone(), predicted);
                }
            }
        }

        for pattern in patterns {
            if let Some(existing) = fused.get_mut(&pattern.agent_name) {
                existing.confidence = (existing.confidence
                    + pattern.success_rate * weights.historical_boost)
                    .min(weights.confidence_ceiling);
                existing.reasoning = format!(
                    "{}; historical success {}/{}",
                    existing.reasoning, pattern.frequency, pattern.samples
                );
            }
        }

        let mut ranked: Vec<Decision> = fused
            .into_values()
            .map(|mut decision| {
                decision.confidence = decision.confidence.clamp(0.0, weights.confidence_ceiling);
                decision
            })
            .collect();

        for decision in &ranked {
            if !(0.0..=MAX_CONFIDENCE).contains(&decision.confidence) {
                return Err(MaestroError::DecisionFusion(format!(
                    "confidence {} for '{}' is outside [0, {MAX_CONFIDENCE}]",
                    decision.confidence, decision.agent_name
                )));
            }
        }

        // Stable sort keeps insertion order for full ties
        ranked.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.source.precedence().cmp(&b.source.precedence()))
        });
        ranked.truncate(self.config.top_k);

        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ExecutionRecord;

    fn engine() -> DecisionEngine {
        DecisionEngine::new(DecisionConfig::default())
    }

    fn scenario_intent() -> Intent {
        Intent::new("implement and test a login API", "feature", 3)
    }

    #[tokio::test]
    async fn test_scenario_both_rule_agents_in_top_three() {
        let engine = engine();
        let intent = scenario_intent();

        let rules = engine.rule_decisions(&intent);
        assert_eq!(rules[0].agent_name, "CodeAgent");
        assert_eq!(rules[0].confidence, 0.9);
        assert_eq!(rules[1].agent_name, "TestAgent");
        assert_eq!(rules[1].confidence, 0.85);

        let decisions = engine.determine_agents(&intent).await.unwrap();
        assert!(decisions.len() <= 3);
        assert!(decisions.iter().any(|d| d.agent_name == "CodeAgent"));
        assert!(decisions.iter().any(|d| d.agent_name == "TestAgent"));
    }

    #[tokio::test]
    async fn test_blend_of_rule_and_prediction() {
        let engine = engine();
        let decisions = engine.determine_agents(&scenario_intent()).await.unwrap();

        // 0.9 * 0.6 + (0.715 * 0.7) * 0.4
        let code = &decisions[0];
        assert_eq!(code.agent_name, "CodeAgent");
        assert!((code.confidence - 0.7402).abs() < 1e-9);
        assert_eq!(code.source, DecisionSource::RuleBased);
    }

    #[tokio::test]
    async fn test_determinism() {
        let engine = engine();
        let intent = scenario_intent().with_requirement("oauth").with_requirement("docs");

        engine.record_decision(&intent, &engine.determine_agents(&intent).await.unwrap()).await;
        engine.record_decision(&intent, &engine.determine_agents(&intent).await.unwrap()).await;

        let first = engine.determine_agents(&intent).await.unwrap();
        let second = engine.determine_agents(&intent.clone()).await.unwrap();

        assert_eq!(first, second);
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.confidence.to_bits(), b.confidence.to_bits());
        }
    }

    #[tokio::test]
    async fn test_confidence_bound_under_heavy_history() {
        let engine = engine();
        let intents = [
            scenario_intent(),
            Intent::new("fix crash bug, add regression test and deploy a release", "bugfix", 5),
            Intent::new("security audit of the auth token flow", "review", 4),
            Intent::new("", "empty", -3),
        ];

        for intent in &intents {
            for _ in 0..10 {
                let boosted: Vec<Decision> = engine
                    .rule_decisions(intent)
                    .into_iter()
                    .map(|mut d| {
                        d.confidence = 0.95;
                        d
                    })
                    .collect();
                engine.record_decision(intent, &boosted).await;
            }

            for decision in engine.determine_agents(intent).await.unwrap() {
                assert!((0.0..=0.95).contains(&decision.confidence), "{decision:?}");
            }
        }
    }

    #[tokio::test]
    async fn test_scenario_historical_frequency() {
        let engine = engine();
        let intent = scenario_intent();
        let recorded = vec![Decision::new("CodeAgent", 0.85, "prior run", DecisionSource::RuleBased)];

        engine.record_decision(&intent, &recorded).await;
        engine.record_decision(&intent, &recorded).await;

        let patterns = engine.historical_patterns(&intent).await;
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].agent_name, "CodeAgent");
        assert_eq!(patterns[0].frequency, 2);
        assert_eq!(patterns[0].success_rate, 1.0);

        // 0.7402 + 1.0 * 0.2
        let decisions = engine.determine_agents(&intent).await.unwrap();
        assert!((decisions[0].confidence - 0.9402).abs() < 1e-9);
        assert!(decisions[0].reasoning.contains("historical success 2/2"));
    }

    #[tokio::test]
    async fn test_history_is_keyed_by_type_and_priority() {
        let engine = engine();
        let recorded = vec![Decision::new("CodeAgent", 0.9, "prior", DecisionSource::RuleBased)];
        let intent = scenario_intent();

        engine.record_decision(&intent, &recorded).await;
        engine.record_decision(&intent, &recorded).await;

        let other_priority = Intent::new("implement and test a login API", "feature", 4);
        assert!(engine.historical_patterns(&other_priority).await.is_empty());
    }

    #[tokio::test]
    async fn test_history_never_introduces_new_agents() {
        let engine = engine();
        let intent = scenario_intent();
        let recorded = vec![Decision::new("DeployAgent", 0.9, "prior", DecisionSource::RuleBased)];

        engine.record_decision(&intent, &recorded).await;
        engine.record_decision(&intent, &recorded).await;

        assert_eq!(engine.historical_patterns(&intent).await.len(), 1);
        let decisions = engine.determine_agents(&intent).await.unwrap();
        assert!(decisions.iter().all(|d| d.agent_name != "DeployAgent"));
    }

    #[tokio::test]
    async fn test_recorded_performance_overrides_confidence() {
        let engine = engine();
        let intent = scenario_intent();
        let recorded = vec![Decision::new("CodeAgent", 0.9, "prior", DecisionSource::RuleBased)];

        engine.record_decision(&intent, &recorded).await;
        engine.record_decision(&intent, &recorded).await;
        engine.record_performance("CodeAgent", 0.4).await;

        assert!(engine.historical_patterns(&intent).await.is_empty());
        assert_eq!(engine.performance("CodeAgent").await.map(|p| p.samples), Some(1));
    }

    #[tokio::test]
    async fn test_execution_records_feed_history() {
        let store = Arc::new(ExecutionHistoryStore::new());
        let engine = DecisionEngine::new(DecisionConfig::default()).with_execution_history(store.clone());
        let intent = scenario_intent();

        for (index, success) in [true, true, false].into_iter().enumerate() {
            let mut record = ExecutionRecord::new(
                format!("run:step_{index}:TestAgent"),
                "TestAgent",
                10,
                success,
                None,
            );
            record.intent_key = Some(intent.key());
            store.append(record).await.unwrap();
        }

        let patterns = engine.historical_patterns(&intent).await;
        assert_eq!(patterns[0].agent_name, "TestAgent");
        assert_eq!(patterns[0].frequency, 2);
        assert_eq!(patterns[0].samples, 3);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let config = DecisionConfig {
            max_history_per_key: 3,
            ..DecisionConfig::default()
        };
        let engine = DecisionEngine::new(config);
        let intent = scenario_intent();

        for agent in ["A", "B", "C", "D", "D"] {
            engine
                .record_decision(&intent, &[Decision::new(agent, 0.9, "", DecisionSource::RuleBased)])
                .await;
        }

        let patterns = engine.historical_patterns(&intent).await;
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].agent_name, "D");
    }

    #[tokio::test]
    async fn test_ties_prefer_rule_based_then_insertion() {
        let engine = engine();
        let fused = engine
            .fuse(
                vec![
                    Decision::new("Beta", 0.5, "", DecisionSource::RuleBased),
                    Decision::new("Alpha", 0.5, "", DecisionSource::RuleBased),
                ],
                vec![Decision::new("Gamma", 0.5, "", DecisionSource::Predictive)],
                &[],
            )
            .unwrap();

        let names: Vec<&str> = fused.iter().map(|d| d.agent_name.as_str()).collect();
        assert_eq!(names, vec!["Beta", "Alpha", "Gamma"]);
    }

    #[tokio::test]
    async fn test_predicted_only_agent_is_inserted_discounted() {
        let engine = engine();
        let fused = engine
            .fuse(
                Vec::new(),
                vec![Decision::new("DocAgent", 0.5 * 0.7, "", DecisionSource::Predictive)],
                &[],
            )
            .unwrap();

        assert_eq!(fused.len(), 1);
        assert!((fused[0].confidence - 0.35).abs() < 1e-9);
    }

    struct FixedScorer(Vec<(&'static str, f64)>);

    impl PredictiveScorer for FixedScorer {
        fn score(&self, _features: &IntentFeatures) -> Vec<Prediction> {
            self.0
                .iter()
                .map(|(agent_name, score)| Prediction {
                    agent_name: agent_name.to_string(),
                    score: *score,
                    signals: vec!["fixed".to_string()],
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn test_custom_rules_and_scorer_replace_defaults() {
        let engine = engine()
            .with_rules(RuleSet::new(vec![KeywordRule::new(
                "billing",
                "BillingAgent",
                &["invoice"],
                0.8,
                &["DocAgent"],
            )]))
            .with_scorer(Arc::new(FixedScorer(vec![("BillingAgent", 0.5), ("NotifyAgent", 0.6)])));
        let intent = Intent::new("implement and test an invoice reminder", "feature", 3);

        let rules = engine.rule_decisions(&intent);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].agent_name, "BillingAgent");

        let decisions = engine.determine_agents(&intent).await.unwrap();
        let names: Vec<&str> = decisions.iter().map(|d| d.agent_name.as_str()).collect();
        assert_eq!(names, vec!["BillingAgent", "NotifyAgent"]);

        // 0.8 * 0.6 + (0.5 * 0.7) * 0.4
        assert!((decisions[0].confidence - 0.62).abs() < 1e-9);
        assert_eq!(decisions[0].source, DecisionSource::RuleBased);
        assert_eq!(decisions[0].alternative_agents, vec!["DocAgent".to_string()]);

        // 0.6 * 0.7
        assert!((decisions[1].confidence - 0.42).abs() < 1e-9);
        assert_eq!(decisions[1].source, DecisionSource::Predictive);
        assert!(decisions[1].reasoning.contains("fixed"));
    }

    #[tokio::test]
    async fn test_non_finite_confidence_is_a_fusion_error() {
        let engine = engine();
        let result = engine.fuse(
            vec![Decision::new("Broken", f64::NAN, "", DecisionSource::RuleBased)],
            Vec::new(),
            &[],
        );

        assert!(matches!(result, Err(MaestroError::DecisionFusion(_))));
    }

    #[tokio::test]
    async fn test_top_k_truncation() {
        let config = DecisionConfig {
            top_k: 1,
            ..DecisionConfig::default()
        };
        let engine = DecisionEngine::new(config);

        let decisions = engine.determine_agents(&scenario_intent()).await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].agent_name, "CodeAgent");
    }
}
