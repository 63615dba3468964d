use std::collections::BTreeMap;

use sqlx::SqlitePool;

use crate::config::Settings;
use crate::db;
use crate::error::Result;
use crate::models::{Candidate, CategoryProgress, CategorySummary, GraduationRecord, Scorecard};
use crate::phase;

/// Cumulative score targets per division.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseThresholds {
    pub division: String,
    pub phase_1: f64,
    pub phase_2: f64,
    pub phase_3: f64,
    pub graduation: f64,
}

impl PhaseThresholds {
    pub fn defaults() -> Vec<PhaseThresholds> {
        [
            ("Engineering", 60.0, 120.0, 200.0, 250.0),
            ("Geoscience", 55.0, 110.0, 190.0, 240.0),
            ("Data Science", 50.0, 100.0, 180.0, 230.0),
        ]
        .into_iter()
        .map(|(division, phase_1, phase_2, phase_3, graduation)| PhaseThresholds {
            division: division.to_string(),
            phase_1,
            phase_2,
            phase_3,
            graduation,
        })
        .collect()
    }

    /// Target for a phase stage such as "2" or "Graduated".
    pub fn target_for(&self, stage: &str) -> Option<f64> {
        match stage.trim().to_ascii_lowercase().as_str() {
            "1" => Some(self.phase_1),
            "2" => Some(self.phase_2),
            "3" => Some(self.phase_3),
            "graduated" | "graduation" => Some(self.graduation),
            _ => None,
        }
    }
}

pub fn graduation_bonus(novelty: f64, value_musd: f64) -> f64 {
    novelty * 5.0 + value_musd * 2.0
}

pub fn graduation_record(candidate_id: &str, novelty: f64, value_musd: f64) -> GraduationRecord {
    GraduationRecord {
        candidate_id: candidate_id.to_string(),
        novelty,
        value_musd,
        roi: graduation_bonus(novelty, value_musd),
    }
}

/// Fraction of each capped category reached, clamped to 1.0. Categories without scores are left out.
pub fn progress_from_summary(
    summary: &[CategorySummary],
    limits: &BTreeMap<String, f64>,
) -> Vec<CategoryProgress> {
    summary
        .iter()
        .filter_map(|row| {
            let cap = *limits.get(&row.category)?;
            let fraction = if cap > 0.0 {
                (row.total / cap).min(1.0)
            } else {
                1.0
            };
            Some(CategoryProgress {
                category: row.category.clone(),
                total: row.total,
                cap,
                fraction,
            })
        })
        .collect()
}

pub fn total_from_summary(summary: &[CategorySummary], graduation: Option<&GraduationRecord>) -> f64 {
    let kpi: f64 = summary.iter().map(|row| row.total).sum();
    let bonus = graduation
        .map(|record| graduation_bonus(record.novelty, record.value_musd))
        .unwrap_or(0.0);
    kpi + bonus
}

/// Terminal phase, score at or above the gate, and a graduation record: all three are required.
pub fn meets_graduation_criteria(
    candidate: &Candidate,
    total: f64,
    graduation: Option<&GraduationRecord>,
    gate: f64,
    terminal_phases: &[String],
) -> bool {
    let terminal = phase::resolve_phase(candidate)
        .map(|resolved| resolved.is_terminal(terminal_phases))
        .unwrap_or(false);
    terminal && total >= gate && graduation.is_some()
}

pub async fn category_progress(
    pool: &SqlitePool,
    candidate_id: &str,
    limits: &BTreeMap<String, f64>,
) -> Result<Vec<CategoryProgress>> {
    let summary = db::score_summary_by_category(pool, candidate_id).await?;
    Ok(progress_from_summary(&summary, limits))
}

pub async fn total_score(pool: &SqlitePool, candidate_id: &str) -> Result<f64> {
    let summary = db::score_summary_by_category(pool, candidate_id).await?;
    let graduation = db::get_graduation_record(pool, candidate_id).await?;
    Ok(total_from_summary(&summary, graduation.as_ref()))
}

/// Unknown candidates are simply ineligible.
pub async fn is_graduation_eligible(
    pool: &SqlitePool,
    candidate_id: &str,
    gate: f64,
    terminal_phases: &[String],
) -> Result<bool> {
    let Some(candidate) = db::get_candidate(pool, candidate_id).await? else {
        return Ok(false);
    };
    let summary = db::score_summary_by_category(pool, candidate_id).await?;
    let graduation = db::get_graduation_record(pool, candidate_id).await?;
    let total = total_from_summary(&summary, graduation.as_ref());
    Ok(meets_graduation_criteria(
        &candidate,
        total,
        graduation.as_ref(),
        gate,
        terminal_phases,
    ))
}

pub async fn scorecard(
    pool: &SqlitePool,
    candidate: &Candidate,
    settings: &Settings,
) -> Result<Scorecard> {
    let gate = settings.gate_for(&candidate.division);
    let progress = category_progress(pool, &candidate.id, &settings.category_limits).await?;
    let total = total_score(pool, &candidate.id).await?;
    let eligible =
        is_graduation_eligible(pool, &candidate.id, gate, &settings.terminal_phases).await?;
    let categories = db::score_summary_by_category(pool, &candidate.id).await?;
    let graduation = db::get_graduation_record(pool, &candidate.id).await?;

    Ok(Scorecard {
        candidate_id: candidate.id.clone(),
        name: candidate.name.clone(),
        division: candidate.division.clone(),
        last_known_phase: phase::last_known_phase(candidate),
        progress,
        categories,
        graduation_bonus: graduation
            .as_ref()
            .map(|record| graduation_bonus(record.novelty, record.value_musd)),
        total_score: total,
        gate,
        eligible,
    })
}
