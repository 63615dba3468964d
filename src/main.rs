use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

mod access;
mod config;
mod db;
mod error;
mod import;
mod models;
mod phase;
mod report;
mod scoring;

use access::{Capability, Role, Session};
use config::Settings;
use error::RdpError;
use models::{blank_placeholder, Candidate, TRACKED_YEARS};

#[derive(Parser)]
#[command(name = "rdp-tracker")]
#[command(about = "Researcher development program candidate tracker", long_about = None)]
struct Cli {
    /// SQLite database, created on first use
    #[arg(long, global = true, env = "DATABASE_URL", default_value = config::DEFAULT_DATABASE_URL)]
    database_url: String,
    #[arg(long, global = true, env = "RDP_ROLE", value_enum, default_value_t = Role::Committee)]
    role: Role,
    /// Own candidate id when acting with the candidate role
    #[arg(long, global = true, env = "RDP_CANDIDATE_ID")]
    candidate_id: Option<String>,
    /// Phase value that counts as terminal for graduation (repeatable)
    #[arg(long = "terminal-phase", global = true)]
    terminal_phases: Vec<String>,
    /// Category cap override as NAME=CAP (repeatable)
    #[arg(long = "category-limit", global = true, value_parser = config::parse_category_limit)]
    category_limits: Vec<(String, f64)>,
    /// Graduation gate for divisions without a threshold table
    #[arg(long, global = true)]
    default_gate: Option<f64>,
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    InitDb,
    /// Load sample candidates and scores
    Seed,
    /// List candidates, optionally filtered by name, id or mentor
    List {
        #[arg(long)]
        search: Option<String>,
    },
    /// Show a candidate profile with KPI progress and graduation status
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Add a new candidate
    Add {
        /// Generated when omitted
        #[arg(long)]
        id: Option<String>,
        #[command(flatten)]
        fields: CandidateFields,
    },
    /// Edit an existing candidate
    Edit {
        id: String,
        #[command(flatten)]
        fields: CandidateFields,
    },
    /// Delete a candidate (KPI scores are kept)
    Delete { id: String },
    /// Record a KPI score
    AddScore {
        id: String,
        #[arg(long)]
        category: String,
        #[arg(long)]
        score: f64,
        #[arg(long)]
        reference: Option<String>,
    },
    /// List KPI scores and category totals for a candidate
    Scores { id: String },
    /// Record the graduation project assessment
    Graduation {
        id: String,
        #[arg(long)]
        novelty: f64,
        #[arg(long)]
        value_musd: f64,
    },
    /// Import candidates from a master CSV; existing ids are skipped
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Append KPI scores from a CSV
    ImportScores {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Export all candidates as CSV
    Export {
        /// Written to stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Generate a markdown analytics report
    Report {
        #[arg(long, default_value = "rdp-report.md")]
        out: PathBuf,
    },
}

#[derive(Args)]
struct CandidateFields {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    division: Option<String>,
    #[arg(long)]
    specialty: Option<String>,
    #[arg(long)]
    mentor: Option<String>,
    /// Phase for a tracked year as YEAR=VALUE (repeatable)
    #[arg(long = "phase", value_parser = parse_phase)]
    phases: Vec<(u16, String)>,
    #[arg(long)]
    promotion: Option<String>,
    #[arg(long)]
    degree: Option<String>,
    #[arg(long)]
    nationality: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    remarks: Option<String>,
}

impl CandidateFields {
    fn apply(self, candidate: &mut Candidate) {
        let targets = [
            (self.name, &mut candidate.name),
            (self.division, &mut candidate.division),
            (self.specialty, &mut candidate.specialty),
            (self.mentor, &mut candidate.mentor),
            (self.promotion, &mut candidate.promotion),
            (self.degree, &mut candidate.degree),
            (self.nationality, &mut candidate.nationality),
            (self.email, &mut candidate.email),
            (self.remarks, &mut candidate.remarks),
        ];
        for (value, target) in targets {
            if let Some(value) = value {
                *target = blank_placeholder(&value).to_string();
            }
        }
        for (year, value) in self.phases {
            candidate.set_phase(year, value);
        }
    }
}

fn parse_phase(raw: &str) -> Result<(u16, String), String> {
    let (year, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected YEAR=VALUE, got `{raw}`"))?;
    let year: u16 = year
        .trim()
        .parse()
        .map_err(|_| format!("invalid year `{}`", year.trim()))?;
    if !TRACKED_YEARS.contains(&year) {
        return Err(format!("{year} is not a tracked year {TRACKED_YEARS:?}"));
    }
    Ok((year, value.to_string()))
}

impl Commands {
    fn capability(&self) -> Capability {
        match self {
            Commands::InitDb | Commands::Seed => Capability::Administer,
            Commands::List { .. } => Capability::ViewRoster,
            Commands::Show { .. } | Commands::Scores { .. } => Capability::ViewProfile,
            Commands::Add { .. }
            | Commands::Edit { .. }
            | Commands::Delete { .. }
            | Commands::Graduation { .. } => Capability::EditCandidates,
            Commands::AddScore { .. } => Capability::RecordScores,
            Commands::Import { .. } | Commands::ImportScores { .. } | Commands::Export { .. } => {
                Capability::ImportExport
            }
            Commands::Report { .. } => Capability::ViewAnalytics,
        }
    }
}

fn authorize(session: &Session, command: &Commands) -> error::Result<()> {
    match command {
        Commands::Show { id, .. } | Commands::Scores { id } => session.authorize_profile(id),
        other => session.authorize(other.capability()),
    }
}

fn init_tracing(cli: &Cli) {
    let filter = match cli.verbose {
        0 => "warn,rdp_tracker=info",
        1 => "info,rdp_tracker=debug",
        _ => "debug,rdp_tracker=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    if cli.log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn progress_bar(fraction: f64) -> String {
    let filled = (fraction.clamp(0.0, 1.0) * 20.0).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(20 - filled))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let session = Session::new(cli.role, cli.candidate_id.clone());
    authorize(&session, &cli.command)?;

    let settings = Settings::with_overrides(
        cli.database_url.clone(),
        cli.terminal_phases.clone(),
        cli.category_limits.clone(),
        cli.default_gate,
    );
    let pool = db::connect(&settings.database_url)
        .await
        .with_context(|| format!("failed to open {}", settings.database_url))?;
    info!(role = %session.role, database = %settings.database_url, "session opened");

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = db::seed(&pool).await?;
            println!("Seeded {inserted} candidates.");
        }
        Commands::List { search } => {
            let candidates = db::find_candidates(&pool, search.as_deref()).await?;
            if candidates.is_empty() {
                println!("No candidates found.");
                return Ok(());
            }
            for candidate in &candidates {
                println!(
                    "- {} {} ({}, mentor {}) {}",
                    candidate.id,
                    candidate.name,
                    candidate.division,
                    if candidate.mentor.is_empty() { "-" } else { candidate.mentor.as_str() },
                    phase::last_known_phase(candidate)
                );
            }
        }
        Commands::Show { id, json } => {
            let candidate = db::get_candidate(&pool, &id)
                .await?
                .ok_or_else(|| RdpError::NotFound(format!("candidate {id}")))?;
            let card = scoring::scorecard(&pool, &candidate, &settings).await?;

            if json {
                let payload = serde_json::json!({ "candidate": candidate, "scorecard": card });
                println!("{}", serde_json::to_string_pretty(&payload)?);
                return Ok(());
            }

            println!("{} ({})", candidate.name, candidate.id);
            println!("Division: {}", candidate.division);
            println!("Specialty: {}", candidate.specialty);
            println!("Mentor: {}", candidate.mentor);
            println!("Degree: {}", candidate.degree);
            println!("Nationality: {}", candidate.nationality);
            if !candidate.email.is_empty() {
                println!("Email: {}", candidate.email);
            }
            println!("Remarks: {}", candidate.remarks);
            println!("Current phase: {}", card.last_known_phase);
            let target = phase::resolve_phase(&candidate).and_then(|resolved| {
                settings
                    .thresholds_for(&candidate.division)
                    .and_then(|thresholds| thresholds.target_for(resolved.stage()))
            });
            if let Some(target) = target {
                println!("Phase target: {target:.0} points");
            }

            println!();
            println!("KPI progress:");
            if card.progress.is_empty() {
                println!("  No capped categories scored yet.");
            }
            for progress in &card.progress {
                println!(
                    "  {:<26} {} {:>5.1} / {:.0}",
                    progress.category,
                    progress_bar(progress.fraction),
                    progress.total,
                    progress.cap
                );
            }
            if let Some(bonus) = card.graduation_bonus {
                println!("Graduation project bonus: {bonus:.1}");
            }
            println!("Total score: {:.1} (gate {:.0})", card.total_score, card.gate);
            println!(
                "Graduation eligible: {}",
                if card.eligible { "yes" } else { "no" }
            );
        }
        Commands::Add { id, fields } => {
            let id = id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string()[..8].to_string());
            let mut candidate = Candidate::new(id);
            fields.apply(&mut candidate);
            db::insert_candidate(&pool, &candidate).await?;
            println!("Candidate {} added.", candidate.id);
        }
        Commands::Edit { id, fields } => {
            let mut candidate = db::get_candidate(&pool, &id)
                .await?
                .ok_or_else(|| RdpError::NotFound(format!("candidate {id}")))?;
            fields.apply(&mut candidate);
            db::upsert_candidate(&pool, &candidate).await?;
            println!("Candidate {} updated.", candidate.id);
        }
        Commands::Delete { id } => {
            db::delete_candidate(&pool, &id).await?;
            println!("Candidate {id} deleted.");
        }
        Commands::AddScore {
            id,
            category,
            score,
            reference,
        } => {
            let score_id =
                db::add_score(&pool, &id, &category, score, reference.as_deref()).await?;
            println!("Recorded {score:.1} in {category} for {id} (entry {score_id}).");
        }
        Commands::Scores { id } => {
            let scores = db::scores_by_candidate(&pool, &id).await?;
            if scores.is_empty() {
                println!("No KPI scores recorded for {id}.");
                return Ok(());
            }
            for score in &scores {
                println!(
                    "- #{} {} {:.1} {} ({})",
                    score.id,
                    score.category,
                    score.score,
                    score.reference.as_deref().unwrap_or(""),
                    score.recorded_at.date_naive()
                );
            }
            println!();
            println!("Totals by category:");
            for summary in db::score_summary_by_category(&pool, &id).await? {
                println!(
                    "- {}: {:.1} across {} entries",
                    summary.category, summary.total, summary.entries
                );
            }
        }
        Commands::Graduation {
            id,
            novelty,
            value_musd,
        } => {
            if !(novelty.is_finite() && novelty >= 0.0 && value_musd.is_finite() && value_musd >= 0.0)
            {
                return Err(RdpError::MalformedInput(
                    "novelty and value must be non-negative numbers".to_string(),
                )
                .into());
            }
            if db::get_candidate(&pool, &id).await?.is_none() {
                return Err(RdpError::NotFound(format!("candidate {id}")).into());
            }
            let record = scoring::graduation_record(&id, novelty, value_musd);
            db::upsert_graduation_record(&pool, &record).await?;
            println!("Graduation record saved for {id} (ROI {:.1}).", record.roi);
        }
        Commands::Import { csv } => {
            let summary = import::import_csv(&pool, &csv)
                .await
                .with_context(|| format!("import of {} failed", csv.display()))?;
            println!(
                "Inserted {} candidates from {}; skipped {} ({} already present, {} malformed).",
                summary.inserted,
                csv.display(),
                summary.skipped(),
                summary.skipped_existing,
                summary.skipped_malformed
            );
        }
        Commands::ImportScores { csv } => {
            let file = std::fs::File::open(&csv)
                .with_context(|| format!("failed to open {}", csv.display()))?;
            let summary = import::import_scores(&pool, file)
                .await
                .with_context(|| format!("import of {} failed", csv.display()))?;
            println!(
                "Recorded {} KPI scores from {} ({} malformed rows skipped).",
                summary.inserted,
                csv.display(),
                summary.skipped_malformed
            );
        }
        Commands::Export { out } => {
            let buffer = import::export_table(&pool).await?;
            match out {
                Some(path) => {
                    std::fs::write(&path, &buffer)?;
                    println!("Export written to {}.", path.display());
                }
                None => std::io::stdout().write_all(&buffer)?,
            }
        }
        Commands::Report { out } => {
            let candidates = db::find_candidates(&pool, None).await?;
            let mut scorecards = Vec::with_capacity(candidates.len());
            for candidate in &candidates {
                scorecards.push(scoring::scorecard(&pool, candidate, &settings).await?);
            }
            let totals = db::category_totals(&pool).await?;
            let report = report::build_report(
                Utc::now().date_naive(),
                &candidates,
                &scorecards,
                &totals,
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
