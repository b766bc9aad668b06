use std::path::Path;

use csv::StringRecord;
use serde::Serialize;
use tracing::warn;

use crate::db::CrimeDb;

/// Leading dimension columns: Suburb, Offence, Subcategory.
pub const DIMENSION_COLUMNS: usize = 3;
/// Monthly rate columns, 1995-01 through 2018-12.
pub const MONTHLY_COLUMNS: usize = 288;

const FIRST_YEAR: i32 = 1995;

#[derive(Debug)]
pub enum LoadError {
    Csv(csv::Error),
    Sql(rusqlite::Error),
    Header(String),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Csv(err) => write!(f, "{err}"),
            Self::Sql(err) => write!(f, "{err}"),
            Self::Header(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<csv::Error> for LoadError {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value)
    }
}

impl From<rusqlite::Error> for LoadError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

#[derive(Debug, Serialize)]
pub struct RowFailure {
    pub line: u64,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub rows_read: usize,
    pub suburbs_created: usize,
    pub categories_created: usize,
    pub facts_inserted: usize,
    pub failures: Vec<RowFailure>,
}

impl LoadReport {
    pub fn status(&self) -> &'static str {
        if self.failures.is_empty() { "ok" } else { "partial" }
    }
}

#[derive(Debug)]
struct ParsedRow {
    suburb: String,
    offence: String,
    subcategory: String,
    rates: Vec<i64>,
}

/// The 288 half-open monthly intervals from 1995-01 to 2018-12, as ISO
/// date pairs. Column index 3 of the CSV pairs with the first interval.
pub fn month_intervals() -> Vec<(String, String)> {
    let mut out = Vec::with_capacity(MONTHLY_COLUMNS);
    let mut year = FIRST_YEAR;
    let mut month = 1u32;
    for _ in 0..MONTHLY_COLUMNS {
        let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        out.push((
            format!("{year:04}-{month:02}-01"),
            format!("{next_year:04}-{next_month:02}-01"),
        ));
        year = next_year;
        month = next_month;
    }
    out
}

/// Loads a crime-rate CSV into freshly created tables. The whole load
/// runs in one transaction committed at the end. Rows that fail to
/// parse or insert are recorded and skipped; the rest of the file still
/// loads.
pub fn load_csv(db: &CrimeDb, path: &Path) -> Result<LoadReport, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    check_header(reader.headers()?)?;

    let intervals = month_intervals();
    let mut report = LoadReport::default();
    let tx = db.transaction()?;

    for result in reader.records() {
        let record = result?;
        report.rows_read += 1;
        let line = record.position().map(|pos| pos.line()).unwrap_or(0);

        let parsed = match parse_row(&record) {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!(line, %error, "skipping malformed row");
                report.failures.push(RowFailure { line, error });
                continue;
            }
        };

        if let Err(err) = insert_row(db, &parsed, &intervals, &mut report) {
            warn!(line, error = %err, "skipping row after insert failure");
            report.failures.push(RowFailure {
                line,
                error: err.to_string(),
            });
        }
    }

    tx.commit()?;
    Ok(report)
}

fn check_header(headers: &StringRecord) -> Result<(), LoadError> {
    for (idx, want) in ["Suburb", "Offence", "Subcategory"].iter().enumerate() {
        let got = headers.get(idx).map(str::trim).unwrap_or("");
        if got != *want {
            return Err(LoadError::Header(format!(
                "expected header column {} to be `{want}`, found `{got}`",
                idx + 1
            )));
        }
    }
    if headers.len() < DIMENSION_COLUMNS + MONTHLY_COLUMNS {
        return Err(LoadError::Header(format!(
            "expected at least {} columns, found {}",
            DIMENSION_COLUMNS + MONTHLY_COLUMNS,
            headers.len()
        )));
    }
    Ok(())
}

fn parse_row(record: &StringRecord) -> Result<ParsedRow, String> {
    if record.len() < DIMENSION_COLUMNS + MONTHLY_COLUMNS {
        return Err(format!(
            "expected at least {} columns, found {}",
            DIMENSION_COLUMNS + MONTHLY_COLUMNS,
            record.len()
        ));
    }

    let mut rates = Vec::with_capacity(MONTHLY_COLUMNS);
    for idx in DIMENSION_COLUMNS..DIMENSION_COLUMNS + MONTHLY_COLUMNS {
        let raw = record.get(idx).unwrap_or("");
        let rate: i64 = raw
            .parse()
            .map_err(|_| format!("column {}: invalid rate `{raw}`", idx + 1))?;
        rates.push(rate);
    }

    Ok(ParsedRow {
        suburb: record[0].trim().to_string(),
        offence: record[1].trim().to_string(),
        subcategory: record[2].trim().to_string(),
        rates,
    })
}

fn insert_row(
    db: &CrimeDb,
    parsed: &ParsedRow,
    intervals: &[(String, String)],
    report: &mut LoadReport,
) -> rusqlite::Result<()> {
    let (suburb_id, suburb_created) = db.ensure_suburb(&parsed.suburb)?;
    let (category_id, category_created) =
        db.ensure_category(&parsed.offence, &parsed.subcategory)?;

    for ((start_date, end_date), rate) in intervals.iter().zip(&parsed.rates) {
        db.insert_rate(suburb_id, category_id, start_date, end_date, *rate)?;
    }

    if suburb_created {
        report.suburbs_created += 1;
    }
    if category_created {
        report.categories_created += 1;
    }
    report.facts_inserted += intervals.len();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RateFilter;
    use std::fmt::Write as _;
    use std::fs;

    fn csv_header() -> String {
        let mut header = String::from("Suburb,Offence,Subcategory");
        let intervals = month_intervals();
        for (start, _) in &intervals {
            write!(header, ",{}", &start[..7]).expect("write header");
        }
        header
    }

    fn csv_line(suburb: &str, offence: &str, subcategory: &str, base: i64) -> String {
        let mut line = format!("{suburb},{offence},{subcategory}");
        for idx in 0..MONTHLY_COLUMNS as i64 {
            write!(line, ",{}", base + idx).expect("write line");
        }
        line
    }

    fn write_csv(dir: &Path, lines: &[String]) -> std::path::PathBuf {
        let path = dir.join("crime.csv");
        let mut content = csv_header();
        for line in lines {
            content.push('\n');
            content.push_str(line);
        }
        content.push('\n');
        fs::write(&path, content).expect("write csv");
        path
    }

    fn fresh_db() -> CrimeDb {
        let db = CrimeDb::open_in_memory().expect("in-memory sqlite");
        db.recreate_schema().expect("schema");
        db
    }

    #[test]
    fn intervals_form_a_continuous_monthly_sequence() {
        let intervals = month_intervals();
        assert_eq!(intervals.len(), MONTHLY_COLUMNS);
        assert_eq!(intervals[0], ("1995-01-01".to_string(), "1995-02-01".to_string()));
        assert_eq!(
            intervals[MONTHLY_COLUMNS - 1],
            ("2018-12-01".to_string(), "2019-01-01".to_string())
        );
        for pair in intervals.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
    }

    #[test]
    fn intervals_agree_with_calendar_month_arithmetic() {
        let anchor = chrono::NaiveDate::from_ymd_opt(1995, 1, 1).expect("anchor date");
        for (idx, (start, end)) in month_intervals().iter().enumerate() {
            let want_start = anchor
                .checked_add_months(chrono::Months::new(idx as u32))
                .expect("start in range");
            let want_end = anchor
                .checked_add_months(chrono::Months::new(idx as u32 + 1))
                .expect("end in range");
            assert_eq!(start, &want_start.format("%Y-%m-%d").to_string());
            assert_eq!(end, &want_end.format("%Y-%m-%d").to_string());
        }
    }

    #[test]
    fn loads_one_row_into_288_monthly_facts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_csv(
            dir.path(),
            &[csv_line("Newtown", "Theft", "Break and enter dwelling", 10)],
        );
        let db = fresh_db();

        let report = load_csv(&db, &path).expect("load");
        assert_eq!(report.status(), "ok");
        assert_eq!(report.rows_read, 1);
        assert_eq!(report.suburbs_created, 1);
        assert_eq!(report.categories_created, 1);
        assert_eq!(report.facts_inserted, MONTHLY_COLUMNS);

        let rows = db
            .rates_for_suburb("Newtown", &RateFilter::default())
            .expect("query");
        assert_eq!(rows.len(), MONTHLY_COLUMNS);
        assert_eq!(rows[0].start_date, "1995-01-01");
        assert_eq!(rows[0].end_date, "1995-02-01");
        assert_eq!(rows[0].rate, 10);
        assert_eq!(rows[MONTHLY_COLUMNS - 1].start_date, "2018-12-01");
        assert_eq!(rows[MONTHLY_COLUMNS - 1].end_date, "2019-01-01");
        assert_eq!(rows[MONTHLY_COLUMNS - 1].rate, 10 + MONTHLY_COLUMNS as i64 - 1);
    }

    #[test]
    fn dimension_rows_dedupe_within_a_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_csv(
            dir.path(),
            &[
                csv_line("Newtown", "Theft", "Break and enter dwelling", 1),
                csv_line("Newtown", "Assault", "Domestic violence related", 2),
                csv_line("Marrickville", "Theft", "Break and enter dwelling", 3),
            ],
        );
        let db = fresh_db();

        let report = load_csv(&db, &path).expect("load");
        assert_eq!(report.rows_read, 3);
        assert_eq!(report.suburbs_created, 2);
        assert_eq!(report.categories_created, 2);
        assert_eq!(report.facts_inserted, 3 * MONTHLY_COLUMNS);

        assert_eq!(db.suburbs().expect("suburbs").len(), 2);
        assert_eq!(db.categories().expect("categories").len(), 2);
    }

    #[test]
    fn malformed_row_is_recorded_and_the_rest_still_loads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bad = csv_line("Enmore", "Theft", "Shoplifting", 1).replacen(",1,", ",not-a-number,", 1);
        let path = write_csv(
            dir.path(),
            &[bad, csv_line("Newtown", "Theft", "Shoplifting", 5)],
        );
        let db = fresh_db();

        let report = load_csv(&db, &path).expect("load");
        assert_eq!(report.status(), "partial");
        assert_eq!(report.rows_read, 2);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].error.contains("invalid rate"));
        assert_eq!(report.facts_inserted, MONTHLY_COLUMNS);

        let suburbs = db.suburbs().expect("suburbs");
        assert_eq!(suburbs.len(), 1);
        assert_eq!(suburbs[0].name, "Newtown");
    }

    #[test]
    fn short_row_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_csv(dir.path(), &["Newtown,Theft,Shoplifting,1,2,3".to_string()]);
        let db = fresh_db();

        let report = load_csv(&db, &path).expect("load");
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].error.contains("columns"));
        assert_eq!(report.facts_inserted, 0);
    }

    #[test]
    fn missing_header_fails_the_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("crime.csv");
        fs::write(&path, "Locality,Offence,Subcategory\n").expect("write csv");
        let db = fresh_db();

        let err = load_csv(&db, &path);
        assert!(matches!(err, Err(LoadError::Header(_))));
    }

    #[test]
    fn fields_are_trimmed_before_dimension_lookup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spaced = csv_line("  Newtown  ", " Theft ", " Shoplifting ", 1);
        let path = write_csv(dir.path(), &[spaced, csv_line("Newtown", "Theft", "Shoplifting", 2)]);
        let db = fresh_db();

        let report = load_csv(&db, &path).expect("load");
        assert_eq!(report.suburbs_created, 1);
        assert_eq!(report.categories_created, 1);
    }
}
