//! Historical strategy - success rates of agents previously chosen for the same key

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::types::HistoricalPattern;

/// One recorded decision for a `(type, priority)` key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionSample {
    pub agent_name: String,
    pub confidence: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Running mean of the performance scores reported for an agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPerformance {
    pub score: f64,
    pub samples: u32,
}

impl AgentPerformance {
    pub fn record(&mut self, score: f64) {
        let score = score.clamp(0.0, 1.0);
        self.samples += 1;
        self.score += (score - self.score) / f64::from(self.samples);
    }
}

/// Group `(agent, performance)` samples by agent, in first-seen order
pub(crate) fn analyze<I>(samples: I, success_threshold: f64, min_samples: usize) -> Vec<HistoricalPattern>
where
    I: IntoIterator<Item = (String, f64)>,
{
    let mut tallies: IndexMap<String, (usize, usize)> = IndexMap::new();

    for (agent_name, performance) in samples {
        let (successes, total) = tallies.entry(agent_name).or_insert((0, 0));
        *total += 1;
        if performance > success_threshold {
            *successes += 1;
        }
    }

    tallies
        .into_iter()
        .filter(|(_, (successes, total))| *total >= min_samples && *successes > 0)
        .map(|(agent_name, (successes, total))| HistoricalPattern {
            agent_name,
            frequency: successes,
            samples: total,
            success_rate: successes as f64 / total as f64,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(entries: &[(&str, f64)]) -> Vec<(String, f64)> {
        entries.iter().map(|(a, p)| (a.to_string(), *p)).collect()
    }

    #[test]
    fn test_single_sample_is_not_enough() {
        let patterns = analyze(samples(&[("CodeAgent", 0.9)]), 0.8, 2);
        assert!(patterns.is_empty());
    }

    #[test]
    fn test_success_rate() {
        let patterns = analyze(
            samples(&[("CodeAgent", 0.9), ("TestAgent", 0.85), ("CodeAgent", 0.5), ("CodeAgent", 0.95)]),
            0.8,
            2,
        );

        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].agent_name, "CodeAgent");
        assert_eq!(patterns[0].frequency, 2);
        assert_eq!(patterns[0].samples, 3);
        assert!((patterns[0].success_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let patterns = analyze(samples(&[("DocAgent", 0.8), ("DocAgent", 0.8)]), 0.8, 2);
        assert!(patterns.is_empty());
    }

    #[test]
    fn test_running_mean() {
        let mut performance = AgentPerformance::default();
        performance.record(1.0);
        performance.record(0.5);
        performance.record(3.0);

        assert_eq!(performance.samples, 3);
        assert!((performance.score - 2.5 / 3.0).abs() < 1e-9);
    }
}
