//! `copanel suggest` — Rank past interpretations for a new input.

use std::path::PathBuf;

use copanel_config::AppConfig;
use copanel_matcher::{HistoricalRecord, PatternMatcher, normalize};

/// Inputs shorter than this many tokens are not worth matching.
const MIN_TOKENS: usize = 2;

pub async fn run(
    history: PathBuf,
    subject: Option<String>,
    input: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if normalize(&input).len() < MIN_TOKENS {
        return Err(format!("Input needs at least {MIN_TOKENS} words to match against history").into());
    }

    let content = std::fs::read_to_string(&history)
        .map_err(|e| format!("Failed to read {}: {e}", history.display()))?;
    let records: Vec<HistoricalRecord> = serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse {}: {e}", history.display()))?;

    let matcher = PatternMatcher::new(config.matcher);
    let outcome = match &subject {
        Some(subject) => matcher.suggest_for_subject(&input, subject, &records),
        None => matcher.suggest(&input, &records),
    };

    println!(
        "  {} records, {} matching patterns",
        records.len(),
        outcome.patterns_considered
    );
    if outcome.suggestions.is_empty() {
        println!("  No suggestions");
        return Ok(());
    }

    println!();
    for (rank, s) in outcome.suggestions.iter().enumerate() {
        println!(
            "  {}. {:<40} {:>5.1}%  x{}  \"{}\"",
            rank + 1,
            s.interpretation,
            s.confidence * 100.0,
            s.frequency,
            s.pattern
        );
    }
    println!();

    Ok(())
}
