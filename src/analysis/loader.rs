//! Registry CSV Loading
//!
//! Reads the transaction and project exports, enforces the required-column
//! contract and normalizes rows. Rows that fail normalization are counted
//! and reported rather than aborting the load.

use crate::analysis::records::{
    PriceUnit, ProjectRecord, RawProjectRow, RawTransactionRow, RejectReason, TransactionRecord,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

// =============================================================================
// REQUIRED COLUMNS
// =============================================================================

/// A required column, satisfied by any of its spellings.
pub type ColumnRequirement = &'static [&'static str];

/// Columns every transaction export must carry.
pub const TRANSACTION_REQUIRED: &[ColumnRequirement] = &[
    &["備查編號"],
    &["縣市"],
    &["行政區"],
    &["交易日期"],
    &["解約情形"],
];

/// Columns every project export must carry.
pub const PROJECT_REQUIRED: &[ColumnRequirement] = &[
    &["編號"],
    &["社區名稱", "社区名稱"],
    &["縣市"],
    &["行政區"],
    &["戶數", "總戶數"],
    &["銷售起始時間", "銷售起始年季"],
];

// =============================================================================
// ERRORS
// =============================================================================

/// Failure to load an export.
#[derive(Debug)]
pub enum LoadError {
    Io { path: String, message: String },
    Csv { message: String },
    MissingColumns { dataset: &'static str, columns: Vec<String> },
    NoUsableRows { dataset: &'static str, rejected: usize },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, message } => write!(f, "Failed to read {}: {}", path, message),
            Self::Csv { message } => write!(f, "CSV error: {}", message),
            Self::MissingColumns { dataset, columns } => {
                write!(f, "{} export is missing required columns: {}", dataset, columns.join(", "))
            }
            Self::NoUsableRows { dataset, rejected } => {
                write!(f, "{} export has no usable rows ({} rejected)", dataset, rejected)
            }
        }
    }
}

impl std::error::Error for LoadError {}

impl From<csv::Error> for LoadError {
    fn from(e: csv::Error) -> Self {
        Self::Csv { message: e.to_string() }
    }
}

// =============================================================================
// LOAD REPORT
// =============================================================================

/// Row accounting for one export.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub dataset: String,
    pub rows_read: usize,
    pub rows_kept: usize,
    pub rows_rejected: usize,
    /// Rejection reason -> count
    pub reject_reasons: BTreeMap<String, usize>,
    pub columns: Vec<String>,
}

impl LoadReport {
    fn new(dataset: &str, columns: Vec<String>) -> Self {
        Self { dataset: dataset.to_string(), columns, ..Default::default() }
    }

    fn reject(&mut self, reason: &RejectReason) {
        self.rows_rejected += 1;
        *self.reject_reasons.entry(reason.to_string()).or_insert(0) += 1;
    }

    /// Share of rows kept, in percent.
    pub fn retention_pct(&self) -> f64 {
        if self.rows_read == 0 {
            0.0
        } else {
            self.rows_kept as f64 / self.rows_read as f64 * 100.0
        }
    }
}

/// A loaded export: raw rows (for exploration) and normalized records.
#[derive(Debug, Clone)]
pub struct Loaded<R, T> {
    pub raw: Vec<R>,
    pub records: Vec<T>,
    pub report: LoadReport,
}

// =============================================================================
// LOADING
// =============================================================================

/// Header names missing from `headers`, one entry per unmet requirement.
pub fn missing_columns(headers: &[String], required: &[ColumnRequirement]) -> Vec<String> {
    required
        .iter()
        .filter(|alternatives| !alternatives.iter().any(|c| headers.iter().any(|h| h == c)))
        .map(|alternatives| alternatives.join("/"))
        .collect()
}

fn read_source(path: &Path) -> Result<String, LoadError> {
    let mut file = std::fs::File::open(path).map_err(|e| LoadError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).map_err(|e| LoadError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(contents)
}

fn read_rows<R: DeserializeOwned>(
    contents: &str,
    dataset: &'static str,
    required: &[ColumnRequirement],
) -> Result<(Vec<R>, Vec<String>), LoadError> {
    let contents = contents.strip_prefix('\u{feff}').unwrap_or(contents);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(contents.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let missing = missing_columns(&headers, required);
    if !missing.is_empty() {
        return Err(LoadError::MissingColumns { dataset, columns: missing });
    }

    let mut rows = Vec::new();
    for row in reader.deserialize::<R>() {
        rows.push(row?);
    }
    debug!(dataset, rows = rows.len(), "Parsed CSV rows");
    Ok((rows, headers))
}

/// Parse a transaction export from text.
pub fn transactions_from_str(
    contents: &str,
    unit: PriceUnit,
) -> Result<Loaded<RawTransactionRow, TransactionRecord>, LoadError> {
    let (raw, headers): (Vec<RawTransactionRow>, _) =
        read_rows(contents, "transaction", TRANSACTION_REQUIRED)?;
    let mut report = LoadReport::new("transaction", headers);
    report.rows_read = raw.len();

    let mut records = Vec::with_capacity(raw.len());
    for row in &raw {
        match row.normalize(unit) {
            Ok(rec) => records.push(rec),
            Err(reason) => report.reject(&reason),
        }
    }
    report.rows_kept = records.len();

    if records.is_empty() && report.rows_read > 0 {
        return Err(LoadError::NoUsableRows { dataset: "transaction", rejected: report.rows_rejected });
    }
    if report.rows_rejected > 0 {
        warn!(
            rejected = report.rows_rejected,
            reasons = ?report.reject_reasons,
            "Transaction rows rejected during normalization"
        );
    }
    Ok(Loaded { raw, records, report })
}

/// Parse a project export from text.
pub fn projects_from_str(
    contents: &str,
) -> Result<Loaded<RawProjectRow, ProjectRecord>, LoadError> {
    let (raw, headers): (Vec<RawProjectRow>, _) = read_rows(contents, "project", PROJECT_REQUIRED)?;
    let mut report = LoadReport::new("project", headers);
    report.rows_read = raw.len();

    let mut records = Vec::with_capacity(raw.len());
    for row in &raw {
        match row.normalize() {
            Ok(rec) => records.push(rec),
            Err(reason) => report.reject(&reason),
        }
    }
    report.rows_kept = records.len();

    if records.is_empty() && report.rows_read > 0 {
        return Err(LoadError::NoUsableRows { dataset: "project", rejected: report.rows_rejected });
    }
    if report.rows_rejected > 0 {
        warn!(
            rejected = report.rows_rejected,
            reasons = ?report.reject_reasons,
            "Project rows rejected during normalization"
        );
    }
    Ok(Loaded { raw, records, report })
}

/// Load the transaction export at `path`.
pub fn load_transactions(
    path: &Path,
    unit: PriceUnit,
) -> Result<Loaded<RawTransactionRow, TransactionRecord>, LoadError> {
    let contents = read_source(path)?;
    let loaded = transactions_from_str(&contents, unit)?;
    info!(
        path = %path.display(),
        rows = loaded.report.rows_read,
        kept = loaded.report.rows_kept,
        "Loaded transaction export"
    );
    Ok(loaded)
}

/// Load the project export at `path`.
pub fn load_projects(path: &Path) -> Result<Loaded<RawProjectRow, ProjectRecord>, LoadError> {
    let contents = read_source(path)?;
    let loaded = projects_from_str(&contents)?;
    info!(
        path = %path.display(),
        rows = loaded.report.rows_read,
        kept = loaded.report.rows_kept,
        "Loaded project export"
    );
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TXN_CSV: &str = "\u{feff}備查編號,縣市,行政區,坐落街道,樓層,交易日期,交易年季,交易總價,建物單價,總面積,解約情形,主要用途
P001,台北市,大安區,復興南路,5F,20240115,113Y1S,1500,90,16.6,,住家用
P001,台北市,大安區,復興南路,6F,20240220,,1550,92,16.8,1130301全部解約,住家用
,台北市,大安區,復興南路,7F,20240220,113Y1S,1550,92,16.8,,住家用
";

    const PROJECT_CSV: &str = "編號,社區名稱,縣市,行政區,坐落街道,戶數,銷售起始時間,銷售起始年季
P001,大安之星,台北市,大安區,復興南路,80,1121001,
P002,板橋一號,新北市,板橋區,文化路,,1130105,113Y1S
";

    #[test]
    fn test_load_transactions_counts_rejects() {
        let loaded = transactions_from_str(TXN_CSV, PriceUnit::Wan).unwrap();
        assert_eq!(loaded.report.rows_read, 3);
        assert_eq!(loaded.report.rows_kept, 2);
        assert_eq!(loaded.report.rows_rejected, 1);
        assert_eq!(loaded.raw.len(), 3);
        assert_eq!(loaded.records[1].season.to_string(), "113Y1S");
        assert!(loaded.records[1].is_cancelled());
    }

    #[test]
    fn test_missing_required_columns() {
        let csv = "備查編號,縣市\nP001,台北市\n";
        match transactions_from_str(csv, PriceUnit::Wan) {
            Err(LoadError::MissingColumns { columns, .. }) => {
                assert_eq!(columns, vec!["行政區", "交易日期", "解約情形"]);
            }
            other => panic!("expected MissingColumns, got {:?}", other.map(|l| l.report)),
        }
    }

    #[test]
    fn test_load_projects_with_alternate_units_column() {
        let loaded = projects_from_str(PROJECT_CSV).unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[0].total_units, Some(80));
        assert_eq!(loaded.records[0].sales_start_season.unwrap().to_string(), "112Y4S");
        assert_eq!(loaded.records[1].total_units, None);
    }

    #[test]
    fn test_all_rows_rejected_is_an_error() {
        let csv = "備查編號,縣市,行政區,交易日期,解約情形\n,台北市,大安區,20240101,\n";
        assert!(matches!(
            transactions_from_str(csv, PriceUnit::Wan),
            Err(LoadError::NoUsableRows { rejected: 1, .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.csv");
        std::fs::write(&path, PROJECT_CSV).unwrap();
        let loaded = load_projects(&path).unwrap();
        assert_eq!(loaded.report.rows_kept, 2);

        let missing = dir.path().join("nope.csv");
        assert!(matches!(load_projects(&missing), Err(LoadError::Io { .. })));
    }
}
