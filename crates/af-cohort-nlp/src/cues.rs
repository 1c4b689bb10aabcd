//! Context cues for the dictionary tagger.
//!
//! Cue lists follow the NegEx convention: pre-cues precede the concept,
//! post-cues follow it, and termination cues close a cue's scope early.
//! Every cue is matched as a lowercase token sequence.

/// Cues that negate a concept appearing after them.
pub const PRE_NEGATION_CUES: &[&str] = &[
    "no",
    "not",
    "denies",
    "denied",
    "without",
    "negative for",
    "no evidence of",
    "no history of",
    "no signs of",
    "absence of",
    "free of",
    "ruled out for",
];

/// Cues that negate a concept appearing before them.
pub const POST_NEGATION_CUES: &[&str] = &["ruled out", "was ruled out", "unlikely", "excluded"];

/// Cues that make a mention uncertain rather than affirmed.
pub const UNCERTAINTY_CUES: &[&str] = &[
    "possible",
    "possibly",
    "query",
    "suspected",
    "likely",
    "probable",
    "?",
];

/// Cues that end the scope of a preceding negation or uncertainty cue.
pub const TERMINATION_CUES: &[&str] = &["but", "however", "although", "except", "aside from"];

/// Maximum number of tokens between a cue and the concept it modifies.
pub const CUE_WINDOW: usize = 5;

/// Minimum Jaro-Winkler similarity for a fuzzy single-token match.
pub const FUZZY_MIN_SIMILARITY: f64 = 0.94;

/// Tokens shorter than this are only matched exactly.
pub const FUZZY_MIN_TOKEN_LEN: usize = 6;

/// Split a cue phrase into its token sequence.
pub fn cue_tokens(cue: &str) -> Vec<&str> {
    cue.split_whitespace().collect()
}
