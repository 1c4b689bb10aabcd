//! Site-specific note exclusions.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::CohortError;

const STROKE_PAD_PREFIX: &str = "Please";
const EMERGENCY_DS_PREFIX: &str = "Discharge Summary (Emergency Department)";
const CRITICAL_CARE_MARKER: &str = "UCH Critical Care Discharge Summary";

/// Which site's exclusion rules to apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SiteFilter {
    #[default]
    None,
    /// University College London Hospitals discharge summary rules
    Uclh,
}

/// Why a note was excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exclusion {
    StrokePadSummary,
    EmergencyDepartmentSummary,
    CriticalCareSummary,
}

impl SiteFilter {
    /// The exclusion that applies to a note, if any.
    pub fn exclusion(&self, note_text: &str) -> Option<Exclusion> {
        match self {
            Self::None => None,
            Self::Uclh => {
                if leading(note_text, STROKE_PAD_PREFIX.chars().count() + 1) == STROKE_PAD_PREFIX {
                    Some(Exclusion::StrokePadSummary)
                } else if leading(note_text, EMERGENCY_DS_PREFIX.chars().count() + 1)
                    == EMERGENCY_DS_PREFIX
                {
                    Some(Exclusion::EmergencyDepartmentSummary)
                } else if note_text.contains(CRITICAL_CARE_MARKER) {
                    Some(Exclusion::CriticalCareSummary)
                } else {
                    None
                }
            }
        }
    }
}

impl FromStr for SiteFilter {
    type Err = CohortError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "uclh" => Ok(Self::Uclh),
            other => Err(CohortError::UnknownSite(other.to_string())),
        }
    }
}

/// First `n` characters, whitespace-trimmed.
fn leading(text: &str, n: usize) -> String {
    text.chars().take(n).collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uclh_exclusions() {
        let site = SiteFilter::Uclh;
        assert_eq!(
            site.exclusion("Please see attached stroke pathway"),
            Some(Exclusion::StrokePadSummary)
        );
        assert_eq!(
            site.exclusion(" Please review"),
            Some(Exclusion::StrokePadSummary)
        );
        assert_eq!(
            site.exclusion("Discharge Summary (Emergency Department) seen and discharged"),
            Some(Exclusion::EmergencyDepartmentSummary)
        );
        assert_eq!(
            site.exclusion("Ward 3. UCH Critical Care Discharge Summary follows"),
            Some(Exclusion::CriticalCareSummary)
        );
        assert_eq!(site.exclusion("Pleased to see this patient"), None);
        assert_eq!(site.exclusion("Discharge summary: AF"), None);
    }

    #[test]
    fn test_no_site_keeps_everything() {
        assert_eq!(SiteFilter::None.exclusion("Please see"), None);
    }

    #[test]
    fn test_parse_site() {
        assert_eq!("UCLH".parse::<SiteFilter>().unwrap(), SiteFilter::Uclh);
        assert_eq!("".parse::<SiteFilter>().unwrap(), SiteFilter::None);
        assert!("guys".parse::<SiteFilter>().is_err());
    }
}
