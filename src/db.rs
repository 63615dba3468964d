use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::debug;

use crate::error::{RdpError, Result};
use crate::models::{Candidate, CategorySummary, GraduationRecord, KpiScore, TRACKED_YEARS};
use crate::scoring;

const CANDIDATE_COLUMNS: &str = "candidate_id, name, division, specialty, mentor, \
     phase_2022, phase_2023, phase_2024, phase_2025, \
     promotion, degree, nationality, email, remarks, updated_at";

pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

pub async fn init_db(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn is_missing_table(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("no such table"))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Read paths treat a store without tables as empty.
fn or_empty<T: Default>(result: std::result::Result<T, sqlx::Error>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(err) if is_missing_table(&err) => {
            debug!("store not initialized, returning empty result");
            Ok(T::default())
        }
        Err(err) => Err(err.into()),
    }
}

fn candidate_from_row(row: &SqliteRow) -> std::result::Result<Candidate, sqlx::Error> {
    let mut candidate = Candidate::new(row.try_get::<String, _>("candidate_id")?);
    candidate.name = row.try_get("name")?;
    candidate.division = row.try_get("division")?;
    candidate.specialty = row.try_get("specialty")?;
    candidate.mentor = row.try_get("mentor")?;
    for year in TRACKED_YEARS {
        let value: String = row.try_get(format!("phase_{year}").as_str())?;
        candidate.set_phase(year, value);
    }
    candidate.promotion = row.try_get("promotion")?;
    candidate.degree = row.try_get("degree")?;
    candidate.nationality = row.try_get("nationality")?;
    candidate.email = row.try_get("email")?;
    candidate.remarks = row.try_get("remarks")?;
    candidate.updated_at = row.try_get::<DateTime<Utc>, _>("updated_at")?;
    Ok(candidate)
}

async fn write_candidate(pool: &SqlitePool, candidate: &Candidate, replace: bool) -> Result<()> {
    let conflict = if replace {
        " ON CONFLICT (candidate_id) DO UPDATE SET \
         name = excluded.name, division = excluded.division, \
         specialty = excluded.specialty, mentor = excluded.mentor, \
         phase_2022 = excluded.phase_2022, phase_2023 = excluded.phase_2023, \
         phase_2024 = excluded.phase_2024, phase_2025 = excluded.phase_2025, \
         promotion = excluded.promotion, degree = excluded.degree, \
         nationality = excluded.nationality, email = excluded.email, \
         remarks = excluded.remarks, updated_at = excluded.updated_at"
    } else {
        ""
    };
    let sql = format!(
        "INSERT INTO candidates ({CANDIDATE_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15){conflict}"
    );

    let mut query = sqlx::query(&sql)
        .bind(&candidate.id)
        .bind(&candidate.name)
        .bind(&candidate.division)
        .bind(&candidate.specialty)
        .bind(&candidate.mentor);
    for year in TRACKED_YEARS {
        query = query.bind(candidate.phase(year));
    }
    let result = query
        .bind(&candidate.promotion)
        .bind(&candidate.degree)
        .bind(&candidate.nationality)
        .bind(&candidate.email)
        .bind(&candidate.remarks)
        .bind(Utc::now())
        .execute(pool)
        .await;

    match result {
        Ok(_) => {
            debug!(candidate_id = %candidate.id, replace, "candidate written");
            Ok(())
        }
        Err(err) if !replace && is_unique_violation(&err) => {
            Err(RdpError::DuplicateKey(candidate.id.clone()))
        }
        Err(err) => Err(err.into()),
    }
}

/// Inserts the candidate or replaces every column of the existing row.
pub async fn upsert_candidate(pool: &SqlitePool, candidate: &Candidate) -> Result<()> {
    let mut candidate = candidate.clone();
    candidate.scrub_placeholders();
    write_candidate(pool, &candidate, true).await
}

/// Insert-only create; an existing id yields [`RdpError::DuplicateKey`].
pub async fn insert_candidate(pool: &SqlitePool, candidate: &Candidate) -> Result<()> {
    let mut candidate = candidate.clone();
    candidate.scrub_placeholders();
    write_candidate(pool, &candidate, false).await
}

pub async fn get_candidate(pool: &SqlitePool, candidate_id: &str) -> Result<Option<Candidate>> {
    let sql = format!("SELECT {CANDIDATE_COLUMNS} FROM candidates WHERE candidate_id = $1");
    let row = or_empty(
        sqlx::query(&sql)
            .bind(candidate_id)
            .fetch_optional(pool)
            .await,
    )?;
    row.as_ref()
        .map(candidate_from_row)
        .transpose()
        .map_err(RdpError::from)
}

/// All candidates, or those whose name, id or mentor contains `filter` (case-insensitive).
pub async fn find_candidates(pool: &SqlitePool, filter: Option<&str>) -> Result<Vec<Candidate>> {
    let needle = filter
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_lowercase);

    // SQLite's lower() folds ASCII only, so matching happens here.
    let sql = format!("SELECT {CANDIDATE_COLUMNS} FROM candidates ORDER BY candidate_id");
    let rows = or_empty(sqlx::query(&sql).fetch_all(pool).await)?;

    let mut candidates = Vec::with_capacity(rows.len());
    for row in &rows {
        let candidate = candidate_from_row(row)?;
        let matches = match needle.as_deref() {
            None => true,
            Some(needle) => [&candidate.name, &candidate.id, &candidate.mentor]
                .iter()
                .any(|field| field.to_lowercase().contains(needle)),
        };
        if matches {
            candidates.push(candidate);
        }
    }
    Ok(candidates)
}

/// Removes the candidate row only; KPI scores and graduation records stay behind.
pub async fn delete_candidate(pool: &SqlitePool, candidate_id: &str) -> Result<()> {
    let result = sqlx::query("DELETE FROM candidates WHERE candidate_id = $1")
        .bind(candidate_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(RdpError::NotFound(format!("candidate {candidate_id}")));
    }
    debug!(candidate_id, "candidate deleted");
    Ok(())
}

/// Appends one KPI entry and returns its id. The candidate is not required to exist.
pub async fn add_score(
    pool: &SqlitePool,
    candidate_id: &str,
    category: &str,
    score: f64,
    reference: Option<&str>,
) -> Result<i64> {
    let candidate_id = candidate_id.trim();
    let category = category.trim();
    if candidate_id.is_empty() {
        return Err(RdpError::MalformedInput("score without candidate id".to_string()));
    }
    if category.is_empty() {
        return Err(RdpError::MalformedInput(format!(
            "score for {candidate_id} without category"
        )));
    }
    if !score.is_finite() || score < 0.0 {
        return Err(RdpError::MalformedInput(format!(
            "score {score} for {candidate_id} must be a non-negative number"
        )));
    }
    let reference = reference.map(str::trim).filter(|value| !value.is_empty());

    let result = sqlx::query(
        r#"
        INSERT INTO kpi_scores (candidate_id, category, score, reference, recorded_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(candidate_id)
    .bind(category)
    .bind(score)
    .bind(reference)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    let id = result.last_insert_rowid();
    debug!(candidate_id, category, score, id, "score recorded");
    Ok(id)
}

pub async fn scores_by_candidate(pool: &SqlitePool, candidate_id: &str) -> Result<Vec<KpiScore>> {
    let rows = or_empty(
        sqlx::query(
            "SELECT id, candidate_id, category, score, reference, recorded_at \
             FROM kpi_scores WHERE candidate_id = $1 ORDER BY id",
        )
        .bind(candidate_id)
        .fetch_all(pool)
        .await,
    )?;

    let mut scores = Vec::with_capacity(rows.len());
    for row in rows {
        scores.push(KpiScore {
            id: row.try_get("id")?,
            candidate_id: row.try_get("candidate_id")?,
            category: row.try_get("category")?,
            score: row.try_get("score")?,
            reference: row.try_get("reference")?,
            recorded_at: row.try_get("recorded_at")?,
        });
    }
    Ok(scores)
}

fn summary_from_row(row: &SqliteRow) -> std::result::Result<CategorySummary, sqlx::Error> {
    Ok(CategorySummary {
        category: row.try_get("category")?,
        total: row.try_get("total")?,
        entries: row.try_get("entries")?,
    })
}

pub async fn score_summary_by_category(
    pool: &SqlitePool,
    candidate_id: &str,
) -> Result<Vec<CategorySummary>> {
    let rows = or_empty(
        sqlx::query(
            "SELECT category, TOTAL(score) AS total, COUNT(*) AS entries \
             FROM kpi_scores WHERE candidate_id = $1 \
             GROUP BY category ORDER BY category",
        )
        .bind(candidate_id)
        .fetch_all(pool)
        .await,
    )?;

    rows.iter()
        .map(summary_from_row)
        .collect::<std::result::Result<_, _>>()
        .map_err(RdpError::from)
}

/// Per-category totals across every candidate, largest first.
pub async fn category_totals(pool: &SqlitePool) -> Result<Vec<CategorySummary>> {
    let rows = or_empty(
        sqlx::query(
            "SELECT category, TOTAL(score) AS total, COUNT(*) AS entries \
             FROM kpi_scores GROUP BY category ORDER BY total DESC, category",
        )
        .fetch_all(pool)
        .await,
    )?;

    rows.iter()
        .map(summary_from_row)
        .collect::<std::result::Result<_, _>>()
        .map_err(RdpError::from)
}

pub async fn upsert_graduation_record(pool: &SqlitePool, record: &GraduationRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO graduation_records (candidate_id, novelty, value_musd, roi, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (candidate_id) DO UPDATE
        SET novelty = excluded.novelty, value_musd = excluded.value_musd,
            roi = excluded.roi, updated_at = excluded.updated_at
        "#,
    )
    .bind(&record.candidate_id)
    .bind(record.novelty)
    .bind(record.value_musd)
    .bind(record.roi)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    debug!(candidate_id = %record.candidate_id, roi = record.roi, "graduation record written");
    Ok(())
}

pub async fn get_graduation_record(
    pool: &SqlitePool,
    candidate_id: &str,
) -> Result<Option<GraduationRecord>> {
    let row = or_empty(
        sqlx::query(
            "SELECT candidate_id, novelty, value_musd, roi \
             FROM graduation_records WHERE candidate_id = $1",
        )
        .bind(candidate_id)
        .fetch_optional(pool)
        .await,
    )?;

    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(GraduationRecord {
        candidate_id: row.try_get("candidate_id")?,
        novelty: row.try_get("novelty")?,
        value_musd: row.try_get("value_musd")?,
        roi: row.try_get("roi")?,
    }))
}

pub async fn seed(pool: &SqlitePool) -> Result<usize> {
    let candidates = [
        (
            "1001",
            "Huda Al-Harbi",
            "Engineering",
            "Reservoir Simulation",
            "Dr. Omar Faris",
            [(2023, "1"), (2024, "2"), (2025, "3")],
            "PhD",
        ),
        (
            "1002",
            "Marco Silva",
            "Geoscience",
            "Seismic Imaging",
            "Dr. Lina Qasim",
            [(2023, ""), (2024, "1"), (2025, "2")],
            "MS",
        ),
        (
            "1003",
            "Aisha Rahman",
            "Data Science",
            "Production Forecasting",
            "Dr. Omar Faris",
            [(2023, ""), (2024, ""), (2025, "1")],
            "PhD",
        ),
    ];

    let mut inserted = 0usize;
    for (id, name, division, specialty, mentor, phases, degree) in candidates {
        let mut candidate = Candidate::new(id);
        candidate.name = name.to_string();
        candidate.division = division.to_string();
        candidate.specialty = specialty.to_string();
        candidate.mentor = mentor.to_string();
        candidate.degree = degree.to_string();
        for (year, value) in phases {
            candidate.set_phase(year, value);
        }

        match insert_candidate(pool, &candidate).await {
            Ok(()) => inserted += 1,
            Err(RdpError::DuplicateKey(_)) => continue,
            Err(err) => return Err(err),
        }

        // Scores only accompany a fresh insert so reseeding never double counts.
        let scores: &[(&str, f64, &str)] = match id {
            "1001" => &[
                ("Publications", 60.0, "SPE-221034"),
                ("Publications", 40.0, "JPSE-2024-118"),
                ("Innovation", 45.0, "Patent disclosure 2024-07"),
                ("Projects & Deployment", 50.0, "Field pilot"),
                ("Knowledge Sharing", 25.0, "Internal workshop"),
            ],
            "1002" => &[
                ("Publications", 30.0, "EAGE-2024"),
                ("Knowledge Sharing", 10.0, "Lunch talk"),
            ],
            _ => &[],
        };
        for &(category, score, reference) in scores {
            add_score(pool, id, category, score, Some(reference)).await?;
        }
    }

    upsert_graduation_record(pool, &scoring::graduation_record("1001", 18.0, 6.5)).await?;

    Ok(inserted)
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None::<std::time::Duration>)
        .max_lifetime(None::<std::time::Duration>)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    init_db(&pool).await.expect("schema");
    pool
}
