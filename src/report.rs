use std::collections::HashMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{Candidate, CategorySummary, Scorecard};
use crate::phase::{self, NOT_ASSIGNED};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCount {
    pub label: String,
    pub count: usize,
}

fn count_by<F>(candidates: &[Candidate], label: F) -> Vec<GroupCount>
where
    F: Fn(&Candidate) -> String,
{
    let mut map: HashMap<String, usize> = HashMap::new();
    for candidate in candidates {
        *map.entry(label(candidate)).or_insert(0) += 1;
    }

    let mut counts: Vec<GroupCount> = map
        .into_iter()
        .map(|(label, count)| GroupCount { label, count })
        .collect();
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    counts
}

/// Candidates per current phase, using each candidate's last known phase.
pub fn summarize_by_phase(candidates: &[Candidate]) -> Vec<GroupCount> {
    count_by(candidates, |candidate| {
        phase::resolve_phase(candidate)
            .map(|resolved| format!("Phase {}", resolved.stage()))
            .unwrap_or_else(|| NOT_ASSIGNED.to_string())
    })
}

pub fn summarize_by_division(candidates: &[Candidate]) -> Vec<GroupCount> {
    count_by(candidates, |candidate| {
        if candidate.division.is_empty() {
            "Unspecified".to_string()
        } else {
            candidate.division.clone()
        }
    })
}

pub fn build_report(
    generated_on: NaiveDate,
    candidates: &[Candidate],
    scorecards: &[Scorecard],
    category_totals: &[CategorySummary],
) -> String {
    let phases = summarize_by_phase(candidates);
    let divisions = summarize_by_division(candidates);

    let mut output = String::new();

    let _ = writeln!(output, "# RDP Analytics Report");
    let _ = writeln!(
        output,
        "Generated on {} for {} candidates",
        generated_on,
        candidates.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Candidates per Phase");

    if phases.is_empty() {
        let _ = writeln!(output, "No candidates recorded.");
    } else {
        for group in &phases {
            let _ = writeln!(output, "- {}: {}", group.label, group.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Candidates per Division");

    if divisions.is_empty() {
        let _ = writeln!(output, "No candidates recorded.");
    } else {
        for group in &divisions {
            let _ = writeln!(output, "- {}: {}", group.label, group.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top KPI Categories");

    if category_totals.is_empty() {
        let _ = writeln!(output, "No KPI scores recorded.");
    } else {
        for summary in category_totals {
            let _ = writeln!(
                output,
                "- {}: {:.1} points across {} entries",
                summary.category, summary.total, summary.entries
            );
        }
    }

    let mut ranked: Vec<&Scorecard> = scorecards.iter().collect();
    ranked.sort_by(|a, b| {
        b.total_score
            .partial_cmp(&a.total_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Scoring Candidates");

    if ranked.is_empty() {
        let _ = writeln!(output, "No candidates recorded.");
    } else {
        for card in ranked.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} ({}, {}) {}: {:.1} of {:.0}",
                card.name,
                card.candidate_id,
                card.division,
                card.last_known_phase,
                card.total_score,
                card.gate
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Graduation Eligible");

    let eligible: Vec<&&Scorecard> = ranked.iter().filter(|card| card.eligible).collect();
    if eligible.is_empty() {
        let _ = writeln!(output, "No candidates currently meet the graduation criteria.");
    } else {
        for card in eligible {
            let _ = writeln!(
                output,
                "- {} ({}) with {:.1} points",
                card.name, card.candidate_id, card.total_score
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::db::{self, memory_pool};
    use crate::scoring;

    fn candidate(id: &str, division: &str, phases: &[(u16, &str)]) -> Candidate {
        let mut candidate = Candidate::new(id);
        candidate.division = division.to_string();
        for (year, value) in phases {
            candidate.set_phase(*year, *value);
        }
        candidate
    }

    #[test]
    fn groups_by_last_known_phase() {
        let candidates = vec![
            candidate("1", "Engineering", &[(2024, "2")]),
            candidate("2", "Engineering", &[(2023, "1"), (2025, "Phase 2")]),
            candidate("3", "", &[]),
        ];

        let phases = summarize_by_phase(&candidates);
        assert_eq!(
            phases[0],
            GroupCount {
                label: "Phase 2".to_string(),
                count: 2
            }
        );
        assert_eq!(phases[1].label, NOT_ASSIGNED);

        let divisions = summarize_by_division(&candidates);
        assert_eq!(divisions[0].label, "Engineering");
        assert_eq!(divisions[1].label, "Unspecified");
    }

    #[test]
    fn empty_report_has_placeholders() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let report = build_report(date, &[], &[], &[]);
        assert!(report.starts_with("# RDP Analytics Report"));
        assert!(report.contains("No KPI scores recorded."));
        assert!(report.contains("No candidates currently meet the graduation criteria."));
    }

    #[tokio::test]
    async fn report_lists_eligible_candidates() {
        let pool = memory_pool().await;
        db::seed(&pool).await.unwrap();
        let settings = Settings::default();

        let candidates = db::find_candidates(&pool, None).await.unwrap();
        let mut cards = Vec::new();
        for candidate in &candidates {
            cards.push(scoring::scorecard(&pool, candidate, &settings).await.unwrap());
        }
        let totals = db::category_totals(&pool).await.unwrap();

        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let report = build_report(date, &candidates, &cards, &totals);
        assert!(report.contains("for 3 candidates"));
        assert!(report.contains("- Publications: 130.0 points across 3 entries"));
        assert!(report.contains("- Huda Al-Harbi (1001) with 323.0 points"));
        assert!(!report.contains("- Marco Silva (1002) with"));
    }
}
