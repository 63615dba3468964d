use std::fmt;

use crate::models::Candidate;

pub const NOT_ASSIGNED: &str = "Not Assigned";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPhase {
    pub year: u16,
    pub value: String,
}

impl ResolvedPhase {
    /// The phase value without a leading "Phase " label, e.g. "3" for "Phase 3".
    pub fn stage(&self) -> &str {
        strip_label(&self.value)
    }

    pub fn is_terminal(&self, terminal_phases: &[String]) -> bool {
        let stage = self.stage();
        terminal_phases
            .iter()
            .any(|terminal| strip_label(terminal).eq_ignore_ascii_case(stage))
    }
}

impl fmt::Display for ResolvedPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Phase {} ({})", self.stage(), self.year)
    }
}

fn strip_label(value: &str) -> &str {
    let value = value.trim();
    match value.get(..6) {
        Some(prefix) if prefix.eq_ignore_ascii_case("phase ") => value[6..].trim_start(),
        _ => value,
    }
}

/// Most recent non-empty phase, scanning years newest first.
pub fn resolve_phase(candidate: &Candidate) -> Option<ResolvedPhase> {
    candidate
        .phases
        .iter()
        .rev()
        .find(|(_, value)| !value.trim().is_empty())
        .map(|(year, value)| ResolvedPhase {
            year: *year,
            value: value.trim().to_string(),
        })
}

pub fn last_known_phase(candidate: &Candidate) -> String {
    resolve_phase(candidate)
        .map(|phase| phase.to_string())
        .unwrap_or_else(|| NOT_ASSIGNED.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate_with(phases: &[(u16, &str)]) -> Candidate {
        let mut candidate = Candidate::new("1001");
        for (year, value) in phases {
            candidate.phases.insert(*year, value.to_string());
        }
        candidate
    }

    #[test]
    fn falls_back_to_most_recent_filled_year() {
        let candidate = candidate_with(&[(2022, ""), (2023, "2"), (2024, ""), (2025, "")]);
        assert_eq!(last_known_phase(&candidate), "Phase 2 (2023)");
    }

    #[test]
    fn empty_history_is_not_assigned() {
        let candidate = candidate_with(&[(2022, ""), (2023, ""), (2024, " "), (2025, "")]);
        assert_eq!(last_known_phase(&candidate), NOT_ASSIGNED);
        assert_eq!(last_known_phase(&Candidate::new("x")), NOT_ASSIGNED);
    }

    #[test]
    fn newest_year_wins() {
        let candidate = candidate_with(&[(2022, "1"), (2024, "2"), (2025, "3")]);
        let resolved = resolve_phase(&candidate).unwrap();
        assert_eq!(resolved.year, 2025);
        assert_eq!(resolved.value, "3");
    }

    #[test]
    fn labelled_values_are_not_prefixed_twice() {
        let candidate = candidate_with(&[(2024, "Phase 3")]);
        assert_eq!(last_known_phase(&candidate), "Phase 3 (2024)");
    }

    #[test]
    fn terminal_match_ignores_case_and_label() {
        let terminal = vec!["3".to_string(), "Graduated".to_string()];
        let phase = |value: &str| ResolvedPhase {
            year: 2025,
            value: value.to_string(),
        };
        assert!(phase("3").is_terminal(&terminal));
        assert!(phase("Phase 3").is_terminal(&terminal));
        assert!(phase("graduated").is_terminal(&terminal));
        assert!(!phase("2").is_terminal(&terminal));
    }
}
