//! Suggestion ranking over a subject's interpretation history.

use chrono::{DateTime, Utc};
use copanel_config::MatcherConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::tokens::{normalize, similarity};

/// One past `(input, interpretation)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalRecord {
    pub input: String,
    pub interpretation: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
}

impl HistoricalRecord {
    pub fn new(input: impl Into<String>, interpretation: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            interpretation: interpretation.into(),
            timestamp: None,
            subject_id: None,
        }
    }

    pub fn for_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }
}

/// A reusable interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub interpretation: String,

    /// Always within [0, 1]
    pub confidence: f64,

    /// Number of history records sharing the pattern
    pub frequency: usize,

    /// Normalized tokens joined by single spaces
    pub pattern: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchOutcome {
    pub suggestions: Vec<Suggestion>,

    /// Number of distinct patterns that scored above zero
    pub patterns_considered: usize,
}

struct PatternGroup<'a> {
    pattern: String,
    best_score: f64,
    count: usize,
    interpretation: &'a str,
}

/// Ranks history records against new input.
#[derive(Debug, Clone, Default)]
pub struct PatternMatcher {
    config: MatcherConfig,
}

impl PatternMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Rank `history` against `input`.
    ///
    /// The representative interpretation of each pattern is taken from the
    /// first matching record in `history` order. Callers that want the most
    /// recent interpretation should pass history newest first.
    pub fn suggest(&self, input: &str, history: &[HistoricalRecord]) -> MatchOutcome {
        if history.is_empty() {
            return MatchOutcome::default();
        }

        let query = normalize(input);
        let mut groups: Vec<PatternGroup<'_>> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for record in history {
            let tokens = normalize(&record.input);
            let score = similarity(&query, &tokens, self.config.positional_bonus);
            if score <= 0.0 {
                continue;
            }

            let pattern = tokens.join(" ");
            match index.get(&pattern) {
                Some(&i) => {
                    let group = &mut groups[i];
                    group.count += 1;
                    group.best_score = group.best_score.max(score);
                }
                None => {
                    index.insert(pattern.clone(), groups.len());
                    groups.push(PatternGroup {
                        pattern,
                        best_score: score,
                        count: 1,
                        interpretation: &record.interpretation,
                    });
                }
            }
        }

        let patterns_considered = groups.len();
        let total = history.len();

        let mut suggestions: Vec<Suggestion> = groups
            .into_iter()
            .map(|g| Suggestion {
                confidence: self.confidence(g.best_score, g.count, total),
                interpretation: g.interpretation.to_string(),
                frequency: g.count,
                pattern: g.pattern,
            })
            .collect();

        // Stable: equal confidences keep first-seen order
        suggestions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        suggestions.truncate(self.config.max_suggestions);

        debug!(
            records = total,
            patterns = patterns_considered,
            suggestions = suggestions.len(),
            "Pattern match complete"
        );

        MatchOutcome {
            suggestions,
            patterns_considered,
        }
    }

    /// Like [`suggest`](Self::suggest), over only the records of one subject.
    pub fn suggest_for_subject(
        &self,
        input: &str,
        subject_id: &str,
        history: &[HistoricalRecord],
    ) -> MatchOutcome {
        let subject_history: Vec<HistoricalRecord> = history
            .iter()
            .filter(|r| r.subject_id.as_deref() == Some(subject_id))
            .cloned()
            .collect();
        self.suggest(input, &subject_history)
    }

    /// Blend a pattern's best similarity with its relative frequency.
    pub fn confidence(&self, score: f64, frequency: usize, total: usize) -> f64 {
        let share = if total == 0 {
            0.0
        } else {
            (frequency as f64 / total as f64).min(1.0)
        };
        (score * self.config.similarity_weight + share * self.config.frequency_weight).clamp(0.0, 1.0)
    }
}
