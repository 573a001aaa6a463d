//! Historical pattern matcher.
//!
//! Given a new input and the past `(input, interpretation)` records for one
//! subject, ranks previously used interpretations by a blend of token
//! similarity and how often the same pattern recurs.
//!
//! ```
//! use copanel_matcher::{HistoricalRecord, PatternMatcher};
//!
//! let history = vec![HistoricalRecord::new("I want juice", "requesting a drink")];
//! let outcome = PatternMatcher::default().suggest("I want juice", &history);
//! assert_eq!(outcome.suggestions[0].pattern, "i want juice");
//! ```

pub mod matcher;
pub mod tokens;

pub use matcher::{HistoricalRecord, MatchOutcome, PatternMatcher, Suggestion};
pub use tokens::{normalize, similarity};
