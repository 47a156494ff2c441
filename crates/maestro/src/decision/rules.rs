//! Rule strategy - matches intents against fixed keyword rules
//!
//! Each rule carries its own confidence. Rules are evaluated in order and the
//! first rule to claim an agent wins, so the output order is stable.

use serde::{Deserialize, Serialize};

use super::types::{Decision, DecisionSource};
use crate::intent::Intent;

/// Keyword rule that maps matching intents to one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordRule {
    pub name: String,
    pub agent_name: String,
    pub keywords: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub alternatives: Vec<String>,
}

impl KeywordRule {
    pub fn new(
        name: &str,
        agent_name: &str,
        keywords: &[&str],
        confidence: f64,
        alternatives: &[&str],
    ) -> Self {
        Self {
            name: name.to_string(),
            agent_name: agent_name.to_string(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            confidence,
            alternatives: alternatives.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// First keyword (in rule order) that prefixes any token
    fn matched_keyword(&self, tokens: &[String]) -> Option<&str> {
        self.keywords
            .iter()
            .find(|keyword| tokens.iter().any(|token| token.starts_with(keyword.as_str())))
            .map(String::as_str)
    }
}

/// Ordered set of keyword rules
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<KeywordRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<KeywordRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[KeywordRule] {
        &self.rules
    }

    /// Produce one decision per matching rule, at the rule's fixed confidence
    pub fn evaluate(&self, intent: &Intent) -> Vec<Decision> {
        let tokens = tokenize(intent);
        let mut decisions: Vec<Decision> = Vec::new();

        for rule in &self.rules {
            if decisions.iter().any(|d| d.agent_name == rule.agent_name) {
                continue;
            }

            if let Some(keyword) = rule.matched_keyword(&tokens) {
                decisions.push(
                    Decision::new(
                        rule.agent_name.clone(),
                        rule.confidence,
                        format!("Rule '{}' matched keyword '{}'", rule.name, keyword),
                        DecisionSource::RuleBased,
                    )
                    .with_alternatives(rule.alternatives.clone()),
                );
            }
        }

        decisions
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new(vec![
            KeywordRule::new(
                "implementation",
                "CodeAgent",
                &["implement", "build", "create", "develop", "code"],
                0.9,
                &["RefactorAgent"],
            ),
            KeywordRule::new(
                "debugging",
                "DebugAgent",
                &["bug", "fix", "debug", "crash", "error"],
                0.9,
                &["TestAgent"],
            ),
            KeywordRule::new(
                "testing",
                "TestAgent",
                &["test", "verify", "validat", "coverage"],
                0.85,
                &["DebugAgent"],
            ),
            KeywordRule::new(
                "refactoring",
                "RefactorAgent",
                &["refactor", "cleanup", "restructur", "simplif", "optimiz"],
                0.85,
                &["CodeAgent"],
            ),
            KeywordRule::new(
                "security",
                "SecurityAgent",
                &["security", "secure", "vulnerab", "audit", "encrypt"],
                0.85,
                &["CodeAgent"],
            ),
            KeywordRule::new(
                "documentation",
                "DocAgent",
                &["document", "docs", "readme", "tutorial"],
                0.8,
                &["CodeAgent"],
            ),
            KeywordRule::new(
                "deployment",
                "DeployAgent",
                &["deploy", "release", "ship", "rollout", "docker"],
                0.8,
                &["DebugAgent"],
            ),
        ])
    }
}

/// Lower-cased alphanumeric tokens from the description, then the requirements
pub(crate) fn tokenize(intent: &Intent) -> Vec<String> {
    std::iter::once(intent.description.as_str())
        .chain(intent.requirements.iter().map(String::as_str))
        .flat_map(|text| text.split(|c: char| !c.is_alphanumeric()))
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_rule_confidences() {
        let intent = Intent::new("implement and test a login API", "feature", 3);
        let decisions = RuleSet::default().evaluate(&intent);

        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].agent_name, "CodeAgent");
        assert_eq!(decisions[0].confidence, 0.9);
        assert_eq!(decisions[1].agent_name, "TestAgent");
        assert_eq!(decisions[1].confidence, 0.85);
        assert!(decisions[0].reasoning.contains("implement"));
    }

    #[test]
    fn test_keyword_prefix_matches_inflections() {
        let intent = Intent::new("Refactoring the billing module", "chore", 1);
        let decisions = RuleSet::default().evaluate(&intent);

        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].agent_name, "RefactorAgent");
        assert_eq!(decisions[0].alternative_agents, vec!["CodeAgent".to_string()]);
    }

    #[test]
    fn test_requirements_are_matched() {
        let intent = Intent::new("update the pricing page", "chore", 1).with_requirement("documentation");
        let decisions = RuleSet::default().evaluate(&intent);

        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].agent_name, "DocAgent");
    }

    #[test]
    fn test_first_rule_claims_agent() {
        let rules = RuleSet::new(vec![
            KeywordRule::new("primary", "CodeAgent", &["api"], 0.9, &[]),
            KeywordRule::new("secondary", "CodeAgent", &["api"], 0.8, &[]),
        ]);
        let decisions = rules.evaluate(&Intent::new("new api", "feature", 1));

        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].confidence, 0.9);
    }

    #[test]
    fn test_no_match() {
        let decisions = RuleSet::default().evaluate(&Intent::new("hello there", "chat", 1));
        assert!(decisions.is_empty());
    }
}
