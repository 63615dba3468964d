use std::collections::BTreeMap;

use crate::scoring::PhaseThresholds;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://rdp.db";
pub const DEFAULT_GATE: f64 = 250.0;

pub const DEFAULT_TERMINAL_PHASES: [&str; 3] = ["3", "Graduated", "Graduation"];

pub const DEFAULT_CATEGORY_LIMITS: [(&str, f64); 5] = [
    ("Publications", 80.0),
    ("Innovation", 60.0),
    ("Projects & Deployment", 60.0),
    ("Knowledge Sharing", 30.0),
    ("Professional Leadership", 20.0),
];

/// Scoring knobs shared by every command of one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub terminal_phases: Vec<String>,
    pub category_limits: BTreeMap<String, f64>,
    pub default_gate: f64,
    pub thresholds: Vec<PhaseThresholds>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            terminal_phases: DEFAULT_TERMINAL_PHASES
                .iter()
                .map(|phase| phase.to_string())
                .collect(),
            category_limits: DEFAULT_CATEGORY_LIMITS
                .iter()
                .map(|(category, cap)| (category.to_string(), *cap))
                .collect(),
            default_gate: DEFAULT_GATE,
            thresholds: PhaseThresholds::defaults(),
        }
    }
}

impl Settings {
    /// Layer command-line overrides on the defaults. Empty override lists keep the defaults.
    pub fn with_overrides(
        database_url: String,
        terminal_phases: Vec<String>,
        category_limits: Vec<(String, f64)>,
        default_gate: Option<f64>,
    ) -> Self {
        let mut settings = Self {
            database_url,
            ..Self::default()
        };
        if !terminal_phases.is_empty() {
            settings.terminal_phases = terminal_phases;
        }
        settings.category_limits.extend(category_limits);
        if let Some(gate) = default_gate {
            settings.default_gate = gate;
        }
        settings
    }

    /// Graduation gate for a division, falling back to the default gate.
    pub fn gate_for(&self, division: &str) -> f64 {
        self.thresholds_for(division)
            .map(|thresholds| thresholds.graduation)
            .unwrap_or(self.default_gate)
    }

    pub fn thresholds_for(&self, division: &str) -> Option<&PhaseThresholds> {
        self.thresholds
            .iter()
            .find(|thresholds| thresholds.division.eq_ignore_ascii_case(division.trim()))
    }
}

/// Parses `NAME=CAP` as given to `--category-limit`.
pub fn parse_category_limit(raw: &str) -> Result<(String, f64), String> {
    let (name, cap) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected NAME=CAP, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing category name in `{raw}`"));
    }
    let cap: f64 = cap
        .trim()
        .parse()
        .map_err(|_| format!("invalid cap `{}` for {name}", cap.trim()))?;
    if !cap.is_finite() || cap <= 0.0 {
        return Err(format!("cap for {name} must be a positive number"));
    }
    Ok((name.to_string(), cap))
}
