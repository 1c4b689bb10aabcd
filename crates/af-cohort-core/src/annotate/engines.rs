//! Annotator implementations.

use af_cohort_nlp::{parse_engine_output, DictionaryTagger, LexiconEntry};
use std::collections::HashMap;
use std::path::Path;

use super::{AnnotationFailure, Annotator, CorpusError, CorpusResult};
use crate::models::{Annotation, EligibleDocument, MedicationList, ScoreDefinition};

/// Replays engine output captured ahead of time, keyed by document id.
///
/// A document with no captured output, or output that does not parse, fails.
#[derive(Debug, Clone, Default)]
pub struct PrecomputedAnnotator {
    outputs: HashMap<String, String>,
}

impl PrecomputedAnnotator {
    pub fn new(outputs: HashMap<String, String>) -> Self {
        Self { outputs }
    }

    /// Load a JSON object mapping document id to that document's engine output.
    pub fn load<P: AsRef<Path>>(path: P) -> CorpusResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CorpusError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let raw: HashMap<String, serde_json::Value> = serde_json::from_str(&text)?;
        Ok(Self::new(
            raw.into_iter().map(|(id, v)| (id, v.to_string())).collect(),
        ))
    }

    pub fn insert(&mut self, document_id: impl Into<String>, output: impl Into<String>) {
        self.outputs.insert(document_id.into(), output.into());
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

impl Annotator for PrecomputedAnnotator {
    fn annotate(&self, document: &EligibleDocument) -> Result<Vec<Annotation>, AnnotationFailure> {
        let output = self
            .outputs
            .get(&document.document_id)
            .ok_or_else(|| AnnotationFailure::new(document, "no engine output"))?;

        let entities = parse_engine_output(output)
            .map_err(|e| AnnotationFailure::new(document, e.to_string()))?;
        Ok(entities.iter().map(Annotation::from).collect())
    }
}

/// Runs the dictionary tagger over note text.
pub struct TaggerAnnotator {
    tagger: DictionaryTagger,
}

impl TaggerAnnotator {
    pub fn new(tagger: DictionaryTagger) -> Self {
        Self { tagger }
    }

    /// Build a tagger from the terms carried by the loaded definitions.
    pub fn from_definitions(scores: &[ScoreDefinition], medications: Option<&MedicationList>) -> Self {
        let mut entries: Vec<LexiconEntry> = scores
            .iter()
            .flat_map(|s| s.codes.lexicon().iter().cloned())
            .collect();
        if let Some(meds) = medications {
            entries.extend(meds.codes.lexicon().iter().cloned());
        }
        Self::new(DictionaryTagger::new(entries))
    }

    pub fn tagger(&self) -> &DictionaryTagger {
        &self.tagger
    }
}

impl Annotator for TaggerAnnotator {
    fn annotate(&self, document: &EligibleDocument) -> Result<Vec<Annotation>, AnnotationFailure> {
        if self.tagger.is_empty() {
            return Err(AnnotationFailure::new(document, "tagger lexicon is empty"));
        }
        Ok(self
            .tagger
            .tag(&document.note_text)
            .iter()
            .map(Annotation::from)
            .collect())
    }
}
