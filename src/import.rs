use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db;
use crate::error::{RdpError, Result};
use crate::models::{blank_placeholder, Candidate, ImportSummary, TRACKED_YEARS};

pub const LAST_MODIFIED_HEADER: &str = "Last Modified";

/// Candidate attribute a spreadsheet column feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    Name,
    Division,
    Specialty,
    Mentor,
    Phase(u16),
    Promotion,
    Degree,
    Nationality,
    Email,
    Remarks,
}

impl Field {
    fn read(self, candidate: &Candidate) -> &str {
        match self {
            Field::Id => &candidate.id,
            Field::Name => &candidate.name,
            Field::Division => &candidate.division,
            Field::Specialty => &candidate.specialty,
            Field::Mentor => &candidate.mentor,
            Field::Phase(year) => candidate.phase(year),
            Field::Promotion => &candidate.promotion,
            Field::Degree => &candidate.degree,
            Field::Nationality => &candidate.nationality,
            Field::Email => &candidate.email,
            Field::Remarks => &candidate.remarks,
        }
    }

    fn write(self, candidate: &mut Candidate, value: String) {
        match self {
            Field::Id => candidate.id = value,
            Field::Name => candidate.name = value,
            Field::Division => candidate.division = value,
            Field::Specialty => candidate.specialty = value,
            Field::Mentor => candidate.mentor = value,
            Field::Phase(year) => candidate.set_phase(year, value),
            Field::Promotion => candidate.promotion = value,
            Field::Degree => candidate.degree = value,
            Field::Nationality => candidate.nationality = value,
            Field::Email => candidate.email = value,
            Field::Remarks => candidate.remarks = value,
        }
    }
}

/// Fixed mapping from external column header to candidate field, in store field order.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    columns: Vec<(String, Field)>,
}

impl ColumnMap {
    pub fn new(columns: Vec<(String, Field)>) -> Self {
        Self { columns }
    }

    /// Column vocabulary of the program's master spreadsheet.
    pub fn master_sheet() -> Self {
        let mut columns = vec![
            ("ID#".to_string(), Field::Id),
            ("Name".to_string(), Field::Name),
            ("Division".to_string(), Field::Division),
            ("Specialty".to_string(), Field::Specialty),
            ("Mentor".to_string(), Field::Mentor),
        ];
        for year in TRACKED_YEARS {
            columns.push((format!("Phase in RDP {year}"), Field::Phase(year)));
        }
        columns.extend([
            ("Promotion".to_string(), Field::Promotion),
            ("MS/PhD".to_string(), Field::Degree),
            ("Nationality".to_string(), Field::Nationality),
            ("Email".to_string(), Field::Email),
            ("Remarks".to_string(), Field::Remarks),
        ]);
        Self::new(columns)
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(header, _)| header.as_str())
    }

    fn id_header(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|(_, field)| *field == Field::Id)
            .map(|(header, _)| header.as_str())
    }

    /// Positions of mapped columns in `headers`. The id column is mandatory; unmapped columns are ignored.
    fn resolve(&self, headers: &StringRecord) -> Result<Vec<(usize, Field)>> {
        let id_header = self
            .id_header()
            .ok_or_else(|| RdpError::MalformedInput("column map has no id column".to_string()))?;

        let mut resolved = Vec::new();
        for (position, header) in headers.iter().enumerate() {
            let header = header.trim();
            if let Some((_, field)) = self.columns.iter().find(|(name, _)| name == header) {
                resolved.push((position, *field));
            }
        }

        if !resolved.iter().any(|(_, field)| *field == Field::Id) {
            return Err(RdpError::MalformedInput(format!(
                "missing required column `{id_header}`"
            )));
        }
        Ok(resolved)
    }
}

/// Blank and placeholder cells become "", numeric renderings like "123.0" lose their fraction.
pub fn normalize_cell(value: Option<&str>) -> String {
    let Some(raw) = value else {
        return String::new();
    };
    let trimmed = blank_placeholder(raw);
    if trimmed.is_empty() {
        return String::new();
    }

    if let Some((whole, fraction)) = trimmed.split_once('.') {
        let digits = whole.strip_prefix('-').unwrap_or(whole);
        let is_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if is_digits(digits) && is_digits(fraction) {
            return whole.to_string();
        }
    }

    trimmed.to_string()
}

fn candidate_from_record(record: &StringRecord, columns: &[(usize, Field)]) -> Result<Candidate> {
    let mut candidate = Candidate::new(String::new());
    for (position, field) in columns {
        field.write(&mut candidate, normalize_cell(record.get(*position)));
    }
    if candidate.id.is_empty() {
        return Err(RdpError::MalformedInput("row without an id".to_string()));
    }
    Ok(candidate)
}

/// Insert-only bulk import: rows whose id is already stored (or seen earlier in the file) are skipped.
pub async fn import_table<R: Read>(
    pool: &SqlitePool,
    input: R,
    column_map: &ColumnMap,
) -> Result<ImportSummary> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::Headers)
        .flexible(true)
        .from_reader(input);
    let headers = reader.headers()?.clone();
    let columns = column_map.resolve(&headers)?;

    let mut existing: HashSet<String> = db::find_candidates(pool, None)
        .await?
        .into_iter()
        .map(|candidate| candidate.id)
        .collect();
    let mut summary = ImportSummary::default();

    for (index, result) in reader.records().enumerate() {
        let line = index + 2;
        let candidate = match result
            .map_err(RdpError::from)
            .and_then(|record| candidate_from_record(&record, &columns))
        {
            Ok(candidate) => candidate,
            Err(err) => {
                warn!(line, error = %err, "skipping malformed row");
                summary.skipped_malformed += 1;
                continue;
            }
        };

        if existing.contains(&candidate.id) {
            summary.skipped_existing += 1;
            continue;
        }

        match db::insert_candidate(pool, &candidate).await {
            Ok(()) => {
                existing.insert(candidate.id);
                summary.inserted += 1;
            }
            Err(RdpError::DuplicateKey(_)) => summary.skipped_existing += 1,
            Err(err) => {
                return Err(RdpError::ImportAborted {
                    inserted: summary.inserted,
                    source: Box::new(err),
                });
            }
        }
    }

    info!(
        inserted = summary.inserted,
        skipped_existing = summary.skipped_existing,
        skipped_malformed = summary.skipped_malformed,
        "candidate import finished"
    );
    Ok(summary)
}

pub async fn import_csv(pool: &SqlitePool, csv_path: &Path) -> Result<ImportSummary> {
    let file = std::fs::File::open(csv_path)?;
    import_table(pool, file, &ColumnMap::master_sheet()).await
}

/// Appends KPI rows from a table with `candidate_id`, `category`, `score` and optional `reference`.
pub async fn import_scores<R: Read>(pool: &SqlitePool, input: R) -> Result<ImportSummary> {
    #[derive(serde::Deserialize)]
    struct ScoreRow {
        candidate_id: String,
        category: String,
        score: f64,
        #[serde(default)]
        reference: Option<String>,
    }

    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(input);
    let headers = reader.headers()?.clone();
    for required in ["candidate_id", "category", "score"] {
        if !headers.iter().any(|header| header == required) {
            return Err(RdpError::MalformedInput(format!(
                "missing required column `{required}`"
            )));
        }
    }

    let mut summary = ImportSummary::default();
    for (index, result) in reader.deserialize::<ScoreRow>().enumerate() {
        let line = index + 2;
        let row = match result {
            Ok(row) => row,
            Err(err) => {
                warn!(line, error = %err, "skipping malformed score row");
                summary.skipped_malformed += 1;
                continue;
            }
        };

        let candidate_id = normalize_cell(Some(&row.candidate_id));
        match db::add_score(
            pool,
            &candidate_id,
            &row.category,
            row.score,
            row.reference.as_deref(),
        )
        .await
        {
            Ok(_) => summary.inserted += 1,
            Err(RdpError::MalformedInput(reason)) => {
                warn!(line, %reason, "skipping malformed score row");
                summary.skipped_malformed += 1;
            }
            Err(err) => {
                return Err(RdpError::ImportAborted {
                    inserted: summary.inserted,
                    source: Box::new(err),
                });
            }
        }
    }

    info!(
        inserted = summary.inserted,
        skipped_malformed = summary.skipped_malformed,
        "score import finished"
    );
    Ok(summary)
}

/// Every candidate as CSV in store field order, built in memory.
pub async fn export_table(pool: &SqlitePool) -> Result<Vec<u8>> {
    let candidates = db::find_candidates(pool, None).await?;
    let column_map = ColumnMap::master_sheet();

    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header: Vec<&str> = column_map.headers().collect();
    header.push(LAST_MODIFIED_HEADER);
    writer.write_record(&header)?;

    for candidate in &candidates {
        let mut row: Vec<String> = column_map
            .columns
            .iter()
            .map(|(_, field)| field.read(candidate).to_string())
            .collect();
        row.push(candidate.updated_at.to_rfc3339());
        writer.write_record(&row)?;
    }

    info!(rows = candidates.len(), "candidates exported");
    writer
        .into_inner()
        .map_err(|err| RdpError::Io(err.into_error()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::db::memory_pool;

    const MASTER: &str = "\
 ID# ,Name,Division,Mentor,Phase in RDP 2023,Phase in RDP 2025,MS/PhD,Badge
1001.0, Jane Doe ,Engineering,Dr. Faris,2.0,nan,PhD,x
1002,Marco Silva,Geoscience,None,1,,MS,y
1001,Jane Again,Engineering,Dr. Faris,,,PhD,z
,No Id,Engineering,,,,,
";

    #[test]
    fn normalizes_placeholders_and_numbers() {
        assert_eq!(normalize_cell(Some("123.0")), "123");
        assert_eq!(normalize_cell(None), "");
        assert_eq!(normalize_cell(Some("nan")), "");
        assert_eq!(normalize_cell(Some("NaN")), "");
        assert_eq!(normalize_cell(Some("None")), "");
        assert_eq!(normalize_cell(Some("   ")), "");
        assert_eq!(normalize_cell(Some(" Jane ")), "Jane");
        assert_eq!(normalize_cell(Some("-4.50")), "-4");
        assert_eq!(normalize_cell(Some("J. Doe")), "J. Doe");
        assert_eq!(normalize_cell(Some("v1.2.3")), "v1.2.3");
    }

    #[tokio::test]
    async fn imports_each_id_once() {
        let pool = memory_pool().await;
        let summary = import_table(&pool, MASTER.as_bytes(), &ColumnMap::master_sheet())
            .await
            .unwrap();

        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.skipped_existing, 1);
        assert_eq!(summary.skipped_malformed, 1);

        let jane = db::get_candidate(&pool, "1001").await.unwrap().unwrap();
        assert_eq!(jane.name, "Jane Doe");
        assert_eq!(jane.phase(2023), "2");
        assert_eq!(jane.phase(2025), "");
        assert_eq!(jane.degree, "PhD");

        let marco = db::get_candidate(&pool, "1002").await.unwrap().unwrap();
        assert_eq!(marco.mentor, "");
    }

    #[tokio::test]
    async fn reimport_never_overwrites() {
        let pool = memory_pool().await;
        let mut stored = Candidate::new("1002");
        stored.name = "Edited Name".to_string();
        db::upsert_candidate(&pool, &stored).await.unwrap();

        let summary = import_table(&pool, MASTER.as_bytes(), &ColumnMap::master_sheet())
            .await
            .unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.skipped_existing, 2);
        assert_eq!(
            db::get_candidate(&pool, "1002").await.unwrap().unwrap().name,
            "Edited Name"
        );
    }

    #[tokio::test]
    async fn rejects_table_without_id_column() {
        let pool = memory_pool().await;
        let input = "Name,Division\nJane,Engineering\n";
        let err = import_table(&pool, input.as_bytes(), &ColumnMap::master_sheet())
            .await
            .unwrap_err();
        assert!(matches!(err, RdpError::MalformedInput(message) if message.contains("ID#")));
        assert!(db::find_candidates(&pool, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn custom_column_map() {
        let pool = memory_pool().await;
        let column_map = ColumnMap::new(vec![
            ("Staff No".to_string(), Field::Id),
            ("Full Name".to_string(), Field::Name),
            ("Stage 2024".to_string(), Field::Phase(2024)),
        ]);
        let input = "Staff No,Full Name,Stage 2024\n77,Lina Qasim,3\n";

        let summary = import_table(&pool, input.as_bytes(), &column_map).await.unwrap();
        assert_eq!(summary.inserted, 1);
        let lina = db::get_candidate(&pool, "77").await.unwrap().unwrap();
        assert_eq!(lina.name, "Lina Qasim");
        assert_eq!(lina.phase(2024), "3");
    }

    #[tokio::test]
    async fn header_match_is_case_sensitive() {
        let pool = memory_pool().await;
        let input = "id#,Name\n1001,Jane\n";
        assert!(import_table(&pool, input.as_bytes(), &ColumnMap::master_sheet())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn imports_from_file_on_disk() {
        let pool = memory_pool().await;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MASTER.as_bytes()).unwrap();

        let summary = import_csv(&pool, file.path()).await.unwrap();
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.skipped(), 2);
    }

    #[tokio::test]
    async fn export_can_be_imported_again() {
        let pool = memory_pool().await;
        db::seed(&pool).await.unwrap();

        let buffer = export_table(&pool).await.unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        let header = text.lines().next().unwrap();
        assert!(header.starts_with("ID#,Name,Division,Specialty,Mentor,Phase in RDP 2022"));
        assert!(header.ends_with("Remarks,Last Modified"));
        assert_eq!(text.lines().count(), 4);

        let fresh = memory_pool().await;
        let summary = import_table(&fresh, buffer.as_slice(), &ColumnMap::master_sheet())
            .await
            .unwrap();
        assert_eq!(summary.inserted, 3);

        let original = db::get_candidate(&pool, "1002").await.unwrap().unwrap();
        let copy = db::get_candidate(&fresh, "1002").await.unwrap().unwrap();
        assert_eq!(original.phases, copy.phases);
        assert_eq!(original.specialty, copy.specialty);
    }

    #[tokio::test]
    async fn score_import_skips_bad_rows() {
        let pool = memory_pool().await;
        let input = "\
candidate_id,category,score,reference
1001,Publications,40,SPE-1
1001,Publications,lots,
1001.0,Innovation,12.5,
1002,,5,
1002,Innovation,-3,
";
        let summary = import_scores(&pool, input.as_bytes()).await.unwrap();
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.skipped_malformed, 3);

        let summary = db::score_summary_by_category(&pool, "1001").await.unwrap();
        let total: f64 = summary.iter().map(|row| row.total).sum();
        assert!((total - 52.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn score_import_requires_score_column() {
        let pool = memory_pool().await;
        let err = import_scores(&pool, "candidate_id,category\n1001,Publications\n".as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, RdpError::MalformedInput(_)));
    }
}
