//! Components derived from patient metadata rather than coded mentions.

use crate::models::{ComponentCounts, DocumentKey, ScoreKind};

/// A component computed from age or sex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedComponent {
    /// 65 ≤ age < 75
    Age65To74,
    /// age ≥ 75
    AgeGte75,
    /// age > 65
    AgeGt65,
    Female,
}

impl DerivedComponent {
    /// Column name the component is stored under.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Age65To74 => "age_65_74",
            Self::AgeGte75 => "age_gte75",
            Self::AgeGt65 => "age_gt65",
            Self::Female => "female",
        }
    }

    pub fn holds(&self, key: &DocumentKey) -> bool {
        match self {
            Self::Age65To74 => key.age >= 65.0 && key.age < 75.0,
            Self::AgeGte75 => key.age >= 75.0,
            Self::AgeGt65 => key.age > 65.0,
            Self::Female => key.is_female,
        }
    }
}

impl ScoreKind {
    /// Metadata-derived components this score uses.
    pub fn derived_components(&self) -> &'static [DerivedComponent] {
        match self {
            Self::ChaDsVasc => &[
                DerivedComponent::Age65To74,
                DerivedComponent::AgeGte75,
                DerivedComponent::Female,
            ],
            Self::HasBled => &[DerivedComponent::AgeGt65],
            Self::Other(_) => &[],
        }
    }
}

/// Set derived components to 1 or 0, replacing any aggregated count.
pub fn augment(rows: Vec<ComponentCounts>, kind: &ScoreKind) -> Vec<ComponentCounts> {
    let derived = kind.derived_components();
    rows.into_iter()
        .map(|mut row| {
            for component in derived {
                let value = u32::from(component.holds(&row.key));
                row.counts.insert(component.name().to_string(), value);
            }
            row
        })
        .collect()
}
