//! Patient demographics joined onto the cohort by record number.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::debug;

use super::{CohortError, CohortResult};
use crate::models::parse_encounter_date;

const DAYS_PER_YEAR: f64 = 365.2425;

/// Date of birth and gender for one patient. Either may be missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demographic {
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
}

impl Demographic {
    pub fn is_female(&self) -> bool {
        self.gender.as_deref() == Some("Female")
    }

    /// Age in fractional years at `reference`.
    pub fn age_at(&self, reference: NaiveDate) -> Option<f64> {
        self.date_of_birth.map(|dob| age_in_years(dob, reference))
    }
}

/// Demographics by primary record number.
#[derive(Debug, Clone, Default)]
pub struct Demographics {
    by_mrn: HashMap<String, Demographic>,
}

impl Demographics {
    /// Load from a CSV with header `primary_mrn, date_of_birth, gender`.
    pub fn load<P: AsRef<Path>>(path: P) -> CohortResult<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| CohortError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> CohortResult<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut by_mrn = HashMap::new();
        for record in csv_reader.deserialize::<DemographicRow>() {
            let row = record?;
            let demographic = Demographic {
                date_of_birth: row.date_of_birth.as_deref().and_then(parse_encounter_date),
                gender: row.gender,
            };
            if by_mrn.insert(row.primary_mrn.clone(), demographic).is_some() {
                debug!("Duplicate demographics for {}; keeping the last row", row.primary_mrn);
            }
        }

        Ok(Self { by_mrn })
    }

    pub fn insert(&mut self, mrn: impl Into<String>, demographic: Demographic) {
        self.by_mrn.insert(mrn.into(), demographic);
    }

    pub fn get(&self, mrn: &str) -> Option<&Demographic> {
        self.by_mrn.get(mrn)
    }

    pub fn len(&self) -> usize {
        self.by_mrn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_mrn.is_empty()
    }
}

/// Fractional years between two dates.
pub fn age_in_years(date_of_birth: NaiveDate, reference: NaiveDate) -> f64 {
    (reference - date_of_birth).num_days() as f64 / DAYS_PER_YEAR
}

#[derive(Debug, Deserialize)]
struct DemographicRow {
    primary_mrn: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    date_of_birth: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    gender: Option<String>,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_demographics() {
        let csv = "\
primary_mrn,date_of_birth,gender
M1,1940-06-15,Female
M2,1950-01-01,Male
M3,,Female
M4,1960-02-02,
";
        let demographics = Demographics::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(demographics.len(), 4);

        let m1 = demographics.get("M1").unwrap();
        assert!(m1.is_female());
        assert_eq!(m1.date_of_birth, NaiveDate::from_ymd_opt(1940, 6, 15));

        assert!(!demographics.get("M2").unwrap().is_female());
        assert_eq!(demographics.get("M3").unwrap().date_of_birth, None);
        assert_eq!(demographics.get("M4").unwrap().gender, None);
    }

    #[test]
    fn test_gender_match_is_exact() {
        let d = Demographic {
            date_of_birth: None,
            gender: Some("female".into()),
        };
        assert!(!d.is_female());
    }

    #[test]
    fn test_age_in_years() {
        let dob = NaiveDate::from_ymd_opt(1950, 1, 1).unwrap();
        let reference = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let age = age_in_years(dob, reference);
        assert!((age - 70.0).abs() < 0.01, "age was {}", age);

        let day_before = NaiveDate::from_ymd_opt(2019, 12, 31).unwrap();
        assert!(age_in_years(dob, day_before) < 70.0);
    }

    #[test]
    fn test_missing_column_is_error() {
        let result = Demographics::from_reader("mrn,dob\nM1,1950-01-01\n".as_bytes());
        assert!(matches!(result, Err(CohortError::Csv(_))));
    }
}
