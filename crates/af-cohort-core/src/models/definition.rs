//! Score and medication definition models.

use af_cohort_nlp::LexiconEntry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Which risk score a definition encodes, resolved once at load time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScoreKind {
    /// CHA2DS2-VASc stroke risk
    ChaDsVasc,
    /// HAS-BLED bleeding risk
    HasBled,
    /// Any other score; carries no metadata-derived components
    Other(String),
}

impl ScoreKind {
    /// Resolve a kind from the `score` column value.
    pub fn from_name(name: &str) -> Self {
        let normalized: String = name
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();

        match normalized.as_str() {
            "chadsvasc" | "cha2ds2vasc" => Self::ChaDsVasc,
            "hasbled" => Self::HasBled,
            _ => Self::Other(name.trim().to_string()),
        }
    }
}

/// A named clinical risk factor and the codes that evidence it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    /// Points contributed when present (0 for medication lists)
    pub points: f64,
    /// Member concept codes; empty for metadata-derived components
    pub codes: BTreeSet<String>,
}

/// Component → codes mapping with the reverse code → component lookup.
///
/// Components keep the order in which they first appear in the source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeList {
    components: Vec<Component>,
    index: HashMap<String, usize>,
    code_to_component: HashMap<String, String>,
    /// Surface terms by code, for building a dictionary tagger
    lexicon: Vec<LexiconEntry>,
}

impl CodeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component if not already present. Returns its previous points.
    pub(crate) fn upsert_component(&mut self, name: &str, points: f64) -> Option<f64> {
        match self.index.get(name) {
            Some(&i) => {
                let previous = self.components[i].points;
                self.components[i].points = points;
                Some(previous)
            }
            None => {
                self.index.insert(name.to_string(), self.components.len());
                self.components.push(Component {
                    name: name.to_string(),
                    points,
                    codes: BTreeSet::new(),
                });
                None
            }
        }
    }

    /// Map a code to a component. Returns the component it was previously
    /// mapped to, if different; the code is moved, never shared.
    pub(crate) fn assign_code(&mut self, code: &str, component: &str) -> Option<String> {
        let previous = self
            .code_to_component
            .insert(code.to_string(), component.to_string())
            .filter(|prev| prev != component);

        if let Some(prev) = &previous {
            if let Some(&i) = self.index.get(prev) {
                self.components[i].codes.remove(code);
            }
        }
        if let Some(&i) = self.index.get(component) {
            self.components[i].codes.insert(code.to_string());
        }

        previous
    }

    pub(crate) fn add_term(&mut self, code: &str, term: &str) {
        if !term.trim().is_empty() {
            self.lexicon.push(LexiconEntry::new(code, term.trim()));
        }
    }

    /// Components in source order.
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.index.get(name).map(|&i| &self.components[i])
    }

    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(|c| c.name.as_str())
    }

    /// The component a code maps to.
    pub fn component_for_code(&self, code: &str) -> Option<&str> {
        self.code_to_component.get(code).map(String::as_str)
    }

    /// Every code mapped to some component.
    pub fn member_codes(&self) -> HashSet<&str> {
        self.code_to_component.keys().map(String::as_str).collect()
    }

    pub fn lexicon(&self) -> &[LexiconEntry] {
        &self.lexicon
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// A data-quality finding recorded while loading a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DefinitionWarning {
    /// Rows for one component disagree on points; the last row won.
    ConflictingPoints {
        component: String,
        previous: f64,
        kept: f64,
    },
    /// A code was listed under two components; the last one won.
    CodeReassigned {
        code: String,
        from: String,
        to: String,
    },
}

impl std::fmt::Display for DefinitionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConflictingPoints {
                component,
                previous,
                kept,
            } => write!(
                f,
                "component '{}' has conflicting points ({} then {}); keeping {}",
                component, previous, kept, kept
            ),
            Self::CodeReassigned { code, from, to } => write!(
                f,
                "code '{}' listed under '{}' and '{}'; keeping '{}'",
                code, from, to, to
            ),
        }
    }
}

/// A loaded risk score definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDefinition {
    /// Value of the `score` column, used to suffix output columns
    pub name: String,
    pub kind: ScoreKind,
    pub codes: CodeList,
    pub warnings: Vec<DefinitionWarning>,
    /// SHA-256 of the source bytes
    pub fingerprint: String,
}

impl ScoreDefinition {
    /// Output column holding a component's points.
    pub fn points_column(&self, component: &str) -> String {
        format!("{}_{}", component, self.name)
    }

    /// Output column holding the total score.
    pub fn total_column(&self) -> String {
        format!("total_{}", self.name)
    }
}

/// A loaded medication code list (no points).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationList {
    pub codes: CodeList,
    pub warnings: Vec<DefinitionWarning>,
    pub fingerprint: String,
}
