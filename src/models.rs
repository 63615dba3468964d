use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Program years carrying a phase column, oldest first.
pub const TRACKED_YEARS: [u16; 4] = [2022, 2023, 2024, 2025];

/// Trimmed value, or "" for blanks and the "none"/"nan" placeholders.
pub fn blank_placeholder(value: &str) -> &str {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("none") || trimmed.eq_ignore_ascii_case("nan") {
        ""
    } else {
        trimmed
    }
}

/// A program candidate. Absent values are stored as empty strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub id: String,
    pub name: String,
    pub division: String,
    pub specialty: String,
    pub mentor: String,
    /// Phase per tracked year; a missing key and an empty value mean the same.
    pub phases: BTreeMap<u16, String>,
    pub promotion: String,
    pub degree: String,
    pub nationality: String,
    pub email: String,
    pub remarks: String,
    /// Stamped by the store on every write.
    pub updated_at: DateTime<Utc>,
}

impl Candidate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            division: String::new(),
            specialty: String::new(),
            mentor: String::new(),
            phases: BTreeMap::new(),
            promotion: String::new(),
            degree: String::new(),
            nationality: String::new(),
            email: String::new(),
            remarks: String::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn phase(&self, year: u16) -> &str {
        self.phases.get(&year).map(String::as_str).unwrap_or("")
    }

    pub fn set_phase(&mut self, year: u16, value: impl Into<String>) {
        let value = value.into();
        let value = blank_placeholder(&value);
        if value.is_empty() {
            self.phases.remove(&year);
        } else {
            self.phases.insert(year, value.to_string());
        }
    }

    /// Clears placeholder text from every descriptive field.
    pub fn scrub_placeholders(&mut self) {
        for field in [
            &mut self.name,
            &mut self.division,
            &mut self.specialty,
            &mut self.mentor,
            &mut self.promotion,
            &mut self.degree,
            &mut self.nationality,
            &mut self.email,
            &mut self.remarks,
        ] {
            *field = blank_placeholder(field).to_string();
        }
        self.phases.retain(|_, value| !blank_placeholder(value).is_empty());
        for value in self.phases.values_mut() {
            *value = blank_placeholder(value).to_string();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiScore {
    pub id: i64,
    pub candidate_id: String,
    pub category: String,
    pub score: f64,
    pub reference: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySummary {
    pub category: String,
    pub total: f64,
    pub entries: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraduationRecord {
    pub candidate_id: String,
    pub novelty: f64,
    pub value_musd: f64,
    pub roi: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryProgress {
    pub category: String,
    pub total: f64,
    pub cap: f64,
    pub fraction: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    pub skipped_existing: usize,
    pub skipped_malformed: usize,
}

impl ImportSummary {
    pub fn skipped(&self) -> usize {
        self.skipped_existing + self.skipped_malformed
    }
}

/// Everything the profile view and the analytics report show for one candidate.
#[derive(Debug, Clone, Serialize)]
pub struct Scorecard {
    pub candidate_id: String,
    pub name: String,
    pub division: String,
    pub last_known_phase: String,
    pub categories: Vec<CategorySummary>,
    pub progress: Vec<CategoryProgress>,
    pub graduation_bonus: Option<f64>,
    pub total_score: f64,
    pub gate: f64,
    pub eligible: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_become_empty() {
        assert_eq!(blank_placeholder("None"), "");
        assert_eq!(blank_placeholder(" NaN "), "");
        assert_eq!(blank_placeholder("  "), "");
        assert_eq!(blank_placeholder(" 2.5 "), "2.5");
        assert_eq!(blank_placeholder("Nancy"), "Nancy");
    }

    #[test]
    fn scrub_clears_placeholder_fields() {
        let mut candidate = Candidate::new("1001");
        candidate.mentor = "None".to_string();
        candidate.remarks = "nan".to_string();
        candidate.name = " Huda ".to_string();
        candidate.phases.insert(2024, "none".to_string());
        candidate.phases.insert(2025, "3".to_string());

        candidate.scrub_placeholders();
        assert_eq!(candidate.mentor, "");
        assert_eq!(candidate.remarks, "");
        assert_eq!(candidate.name, "Huda");
        assert_eq!(candidate.phase(2024), "");
        assert_eq!(candidate.phase(2025), "3");
    }
}
