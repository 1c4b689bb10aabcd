//! Dictionary tagger with NegEx-style context detection.
//!
//! Stands in for the external annotation engine when no engine output is
//! available. Terms are matched case-insensitively on whole tokens, the
//! longest term wins, and a single-token term may also match a misspelled
//! token by Jaro-Winkler similarity.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strsim::jaro_winkler;

use crate::cues::{
    cue_tokens, CUE_WINDOW, FUZZY_MIN_SIMILARITY, FUZZY_MIN_TOKEN_LEN, POST_NEGATION_CUES,
    PRE_NEGATION_CUES, TERMINATION_CUES, UNCERTAINTY_CUES,
};
use crate::extraction::{Entity, MetaAnnotation, MetaAnnotations, NEGATED_NO, NEGATED_YES};

/// Negation value emitted for hedged mentions.
const UNCERTAIN: &str = "Unknown";

/// A term → concept code pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LexiconEntry {
    pub cui: String,
    pub term: String,
}

impl LexiconEntry {
    pub fn new(cui: impl Into<String>, term: impl Into<String>) -> Self {
        Self {
            cui: cui.into(),
            term: term.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    text: String,
    start: usize,
    end: usize,
    sentence: usize,
}

#[derive(Debug, Clone)]
struct CompiledTerm {
    cui: String,
    term: String,
    tokens: Vec<String>,
}

/// Tags lexicon terms in free text.
#[derive(Debug, Clone)]
pub struct DictionaryTagger {
    /// Sorted by token count, longest first
    terms: Vec<CompiledTerm>,
    fuzzy: bool,
}

impl DictionaryTagger {
    /// Build a tagger from lexicon entries. Duplicate entries are collapsed.
    pub fn new(entries: impl IntoIterator<Item = LexiconEntry>) -> Self {
        let mut seen = HashSet::new();
        let mut terms: Vec<CompiledTerm> = entries
            .into_iter()
            .filter(|e| !e.cui.trim().is_empty())
            .filter(|e| seen.insert((e.cui.clone(), e.term.to_lowercase())))
            .filter_map(|e| {
                let tokens: Vec<String> = tokenize(&e.term).into_iter().map(|t| t.text).collect();
                if tokens.is_empty() {
                    return None;
                }
                Some(CompiledTerm {
                    cui: e.cui,
                    term: e.term,
                    tokens,
                })
            })
            .collect();

        terms.sort_by(|a, b| b.tokens.len().cmp(&a.tokens.len()));

        Self { terms, fuzzy: true }
    }

    /// Enable or disable fuzzy single-token matching.
    pub fn with_fuzzy(mut self, enabled: bool) -> Self {
        self.fuzzy = enabled;
        self
    }

    /// Number of distinct terms.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Tag a document, returning one entity per matched concept mention.
    pub fn tag(&self, text: &str) -> Vec<Entity> {
        let tokens = tokenize(text);
        let mut entities = Vec::new();
        let mut i = 0;

        while i < tokens.len() {
            let Some((matches, width, similarity)) = self.match_at(&tokens, i) else {
                i += 1;
                continue;
            };

            let value = context_value(&tokens, i, width);
            let start = tokens[i].start;
            let end = tokens[i + width - 1].end;

            for term in matches {
                entities.push(Entity {
                    cui: term.cui.clone(),
                    pretty_name: Some(term.term.clone()),
                    start: Some(start),
                    end: Some(end),
                    acc: Some(similarity),
                    meta_anns: MetaAnnotations {
                        negated: Some(MetaAnnotation {
                            value: value.to_string(),
                            confidence: None,
                        }),
                    },
                });
            }
            i += width;
        }

        entities
    }

    /// Find the terms matching at token `i`: (terms, token width, similarity).
    fn match_at(&self, tokens: &[Token], i: usize) -> Option<(Vec<&CompiledTerm>, usize, f64)> {
        let sentence = tokens[i].sentence;

        for term in &self.terms {
            let n = term.tokens.len();
            if i + n > tokens.len() {
                continue;
            }
            let window = &tokens[i..i + n];
            if window.iter().any(|t| t.sentence != sentence) {
                continue;
            }
            if window.iter().zip(&term.tokens).all(|(t, w)| t.text == *w) {
                // Every term spelled the same way shares the match.
                let same: Vec<&CompiledTerm> = self
                    .terms
                    .iter()
                    .filter(|other| other.tokens == term.tokens)
                    .collect();
                return Some((unique_cuis(same), n, 1.0));
            }
        }

        if !self.fuzzy || tokens[i].text.chars().count() < FUZZY_MIN_TOKEN_LEN {
            return None;
        }

        let token = &tokens[i].text;
        let best = self
            .terms
            .iter()
            .filter(|t| t.tokens.len() == 1 && t.tokens[0].chars().count() >= FUZZY_MIN_TOKEN_LEN)
            .map(|t| (t, jaro_winkler(token, &t.tokens[0])))
            .filter(|(_, score)| *score >= FUZZY_MIN_SIMILARITY)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;

        Some((vec![best.0], 1, best.1))
    }
}

fn unique_cuis(terms: Vec<&CompiledTerm>) -> Vec<&CompiledTerm> {
    let mut seen = HashSet::new();
    terms
        .into_iter()
        .filter(|t| seen.insert(t.cui.as_str()))
        .collect()
}

/// Classify the mention spanning `tokens[i..i + width]` from its context.
fn context_value(tokens: &[Token], i: usize, width: usize) -> &'static str {
    let sentence = tokens[i].sentence;

    let mut lo = i;
    while lo > 0 && i - lo < CUE_WINDOW && tokens[lo - 1].sentence == sentence {
        lo -= 1;
    }
    let mut pre: Vec<&str> = tokens[lo..i].iter().map(|t| t.text.as_str()).collect();
    if let Some(cut) = find_cues(&pre, TERMINATION_CUES).iter().map(|(_, e)| *e).max() {
        pre.drain(..cut);
    }

    let end = i + width;
    let mut hi = end;
    while hi < tokens.len() && hi - end < CUE_WINDOW && tokens[hi].sentence == sentence {
        hi += 1;
    }
    let mut post: Vec<&str> = tokens[end..hi].iter().map(|t| t.text.as_str()).collect();
    if let Some(cut) = find_cues(&post, TERMINATION_CUES).iter().map(|(s, _)| *s).min() {
        post.truncate(cut);
    }

    if !find_cues(&pre, PRE_NEGATION_CUES).is_empty()
        || !find_cues(&post, POST_NEGATION_CUES).is_empty()
    {
        NEGATED_YES
    } else if !find_cues(&pre, UNCERTAINTY_CUES).is_empty() || post.first() == Some(&"?") {
        UNCERTAIN
    } else {
        NEGATED_NO
    }
}

/// Locate every occurrence of any cue in `window` as (start, end) token indices.
fn find_cues(window: &[&str], cues: &[&str]) -> Vec<(usize, usize)> {
    let mut found = Vec::new();
    for cue in cues {
        let seq = cue_tokens(cue);
        if seq.len() > window.len() {
            continue;
        }
        for s in 0..=window.len() - seq.len() {
            if window[s..s + seq.len()] == seq[..] {
                found.push((s, s + seq.len()));
            }
        }
    }
    found
}

/// Split text into lowercase word tokens, tracking sentence membership.
///
/// `?` is kept as its own token since clinicians write `?AF` for a query.
/// A `.` ends a sentence only before whitespace or the end of the text, so
/// doses like `2.5mg` stay inside one sentence.
fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut sentence = 0;
    let mut word_start: Option<usize> = None;

    let push = |tokens: &mut Vec<Token>, start: usize, end: usize, sentence: usize| {
        tokens.push(Token {
            text: text[start..end].to_lowercase(),
            start,
            end,
            sentence,
        });
    };

    for (idx, ch) in text.char_indices() {
        if ch.is_alphanumeric() || ch == '-' || ch == '\'' {
            if word_start.is_none() {
                word_start = Some(idx);
            }
            continue;
        }

        if let Some(start) = word_start.take() {
            push(&mut tokens, start, idx, sentence);
        }

        match ch {
            '?' => push(&mut tokens, idx, idx + 1, sentence),
            '.' => {
                if text[idx + 1..].chars().next().map_or(true, char::is_whitespace) {
                    sentence += 1;
                }
            }
            '!' | ';' | '\n' => sentence += 1,
            _ => {}
        }
    }

    if let Some(start) = word_start {
        push(&mut tokens, start, text.len(), sentence);
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tagger() -> DictionaryTagger {
        DictionaryTagger::new(vec![
            LexiconEntry::new("S-230690007", "stroke"),
            LexiconEntry::new("S-49436004", "atrial fibrillation"),
            LexiconEntry::new("S-49436004", "AF"),
            LexiconEntry::new("S-372756006", "warfarin"),
            LexiconEntry::new("S-38341003", "hypertension"),
        ])
    }

    fn values(entities: &[Entity]) -> Vec<(&str, &str)> {
        entities
            .iter()
            .map(|e| (e.cui.as_str(), e.negated_value().unwrap_or("")))
            .collect()
    }

    #[test]
    fn test_exact_and_multi_word_terms() {
        let text = "Known Atrial Fibrillation, on warfarin.";
        let entities = tagger().tag(text);

        assert_eq!(
            values(&entities),
            vec![("S-49436004", "No"), ("S-372756006", "No")]
        );
        let af = &entities[0];
        assert_eq!(&text[af.start.unwrap()..af.end.unwrap()], "Atrial Fibrillation");
        assert_eq!(af.acc, Some(1.0));
    }

    #[test]
    fn test_pre_negation() {
        let entities = tagger().tag("No history of stroke. Denies hypertension");
        assert_eq!(
            values(&entities),
            vec![("S-230690007", "Yes"), ("S-38341003", "Yes")]
        );
    }

    #[test]
    fn test_negation_does_not_cross_sentences() {
        let entities = tagger().tag("No chest pain. Stroke in 2015.");
        assert_eq!(values(&entities), vec![("S-230690007", "No")]);
    }

    #[test]
    fn test_decimal_point_keeps_sentence() {
        let entities = tagger().tag("Denies 2.5mg warfarin");
        assert_eq!(values(&entities), vec![("S-372756006", "Yes")]);

        let entities = tagger().tag("No warfarin 2.5mg. Stroke in 2015.");
        assert_eq!(
            values(&entities),
            vec![("S-372756006", "Yes"), ("S-230690007", "No")]
        );
    }

    #[test]
    fn test_termination_cue_closes_scope() {
        let entities = tagger().tag("no fever but stroke noted");
        assert_eq!(values(&entities), vec![("S-230690007", "No")]);
    }

    #[test]
    fn test_negation_window() {
        let entities = tagger().tag("no one two three four five six stroke");
        assert_eq!(values(&entities), vec![("S-230690007", "No")]);
    }

    #[test]
    fn test_post_negation() {
        let entities = tagger().tag("stroke was ruled out on imaging");
        assert_eq!(values(&entities), vec![("S-230690007", "Yes")]);
    }

    #[test]
    fn test_uncertainty() {
        let entities = tagger().tag("?AF on monitoring. Possible stroke");
        assert_eq!(
            values(&entities),
            vec![("S-49436004", "Unknown"), ("S-230690007", "Unknown")]
        );
    }

    #[test]
    fn test_fuzzy_match_misspelling() {
        let entities = tagger().tag("started on warfarine last week");
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].cui, "S-372756006");
        assert!(entities[0].acc.unwrap() < 1.0);

        let strict = tagger().with_fuzzy(false).tag("started on warfarine last week");
        assert!(strict.is_empty());
    }

    #[test]
    fn test_shared_term_emits_every_cui() {
        let tagger = DictionaryTagger::new(vec![
            LexiconEntry::new("A", "stroke"),
            LexiconEntry::new("B", "Stroke"),
            LexiconEntry::new("A", "stroke"),
        ]);
        assert_eq!(tagger.len(), 2);

        let cuis: Vec<String> = tagger.tag("stroke").into_iter().map(|e| e.cui).collect();
        assert_eq!(cuis, vec!["A", "B"]);
    }

    #[test]
    fn test_whole_token_only() {
        assert!(tagger().with_fuzzy(false).tag("strokes of luck").is_empty());
        assert!(tagger().with_fuzzy(false).tag("hypertensive").is_empty());
    }

    proptest! {
        #[test]
        fn prop_offsets_are_valid_slices(text in "\\PC{0,200}") {
            for entity in tagger().tag(&text) {
                let (start, end) = (entity.start.unwrap(), entity.end.unwrap());
                prop_assert!(start < end && end <= text.len());
                prop_assert!(text.get(start..end).is_some());
            }
        }
    }
}
