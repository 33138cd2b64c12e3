// Output document boundary: cell values, the DocumentWriter contract and the
// sheet layouts shared by the monitor and setup workflows.

pub mod cell_ref;
pub mod numbers;
pub mod xlsx_workbook;

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

pub use cell_ref::CellRef;
pub use numbers::NumbersBridge;
pub use xlsx_workbook::XlsxWorkbook;

use crate::config::Backend;

// ---------------------------------------------------------------------------
// Sheet layouts
// ---------------------------------------------------------------------------

pub const DRAFT_RESULTS: &str = "Draft Results";
pub const TEAMS: &str = "Teams";
pub const LEAGUE_SETTINGS: &str = "League Settings";
pub const PRE_DRAFT_ANALYSIS: &str = "Pre-Draft Analysis";

pub const DRAFT_RESULTS_HEADERS: &[&str] = &[
    "round",
    "pick",
    "playerKey",
    "playerName",
    "position",
    "teamKey",
    "teamName",
    "manager",
    "projectedPoints",
];

/// Draft Results rows are unique by pick number.
pub const PICK_COLUMN: usize = 1;

/// "Last updated: ..." stamp, right of the Draft Results columns.
pub const LAST_UPDATED_CELL: CellRef = CellRef::new(9, 0);

pub const TEAMS_HEADERS: &[&str] = &["teamKey", "teamId", "teamName", "manager"];

pub const LEAGUE_SETTINGS_HEADERS: &[&str] = &["setting", "value"];

pub const PRE_DRAFT_ANALYSIS_HEADERS: &[&str] = &[
    "playerKey",
    "playerName",
    "team",
    "position",
    "averagePick",
    "averageRound",
    "percentDrafted",
    "projectedAuctionValue",
    "averageAuctionCost",
    "seasonRank",
    "positionRank",
    "preseasonAveragePick",
    "preseasonPercentDrafted",
];

// ---------------------------------------------------------------------------
// Cell values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Integer(i64),
}

pub type Row = Vec<CellValue>;

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Normalised form used to compare dedupe keys, so that a text cell read
    /// back from disk (`"2"`) matches the integer that was written (`2`).
    pub fn key(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                match trimmed.parse::<f64>() {
                    Ok(n) if n.is_finite() && n.fract() == 0.0 => Some(format!("{}", n as i64)),
                    _ => Some(trimmed.to_string()),
                }
            }
            CellValue::Integer(i) => Some(i.to_string()),
            CellValue::Number(n) if n.fract() == 0.0 && n.is_finite() => {
                Some(format!("{}", *n as i64))
            }
            CellValue::Number(n) => Some(n.to_string()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Integer(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<u32> for CellValue {
    fn from(n: u32) -> Self {
        CellValue::Integer(i64::from(n))
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Integer(n)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        if n.is_finite() {
            CellValue::Number(n)
        } else {
            CellValue::Empty
        }
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(CellValue::Empty, Into::into)
    }
}

/// Build a row from a header-ordered list of values.
#[macro_export]
macro_rules! row {
    ($($value:expr),* $(,)?) => {
        vec![$($crate::sheet::CellValue::from($value)),*]
    };
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WriteError {
    /// The document is busy or locked. Retried on the next tick.
    #[error("document busy: {message}")]
    Conflict { message: String },

    /// The document (or the application hosting it) is not available.
    #[error("document unavailable: {message}")]
    Unavailable { message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("workbook error on {path}: {message}")]
    Xlsx { path: PathBuf, message: String },

    #[error("script bridge failed: {message}")]
    Script { message: String },

    #[error("invalid cell reference `{cell}`")]
    InvalidCell { cell: String },
}

impl WriteError {
    /// Whether the failure is expected to clear up without intervention.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            WriteError::Conflict { .. } | WriteError::Unavailable { .. }
        )
    }
}

/// Outcome of a [`DocumentWriter::write_rows`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub appended: usize,
    pub updated: usize,
}

impl WriteSummary {
    pub fn total(&self) -> usize {
        self.appended + self.updated
    }
}

// ---------------------------------------------------------------------------
// DocumentWriter
// ---------------------------------------------------------------------------

/// A spreadsheet-like document the workflows write into.
///
/// Row 1 of every sheet holds headers; data starts at row 2. Writers must not
/// require the document to be closed and must leave the user's active sheet
/// as they found it.
#[async_trait]
pub trait DocumentWriter: Send {
    /// Create `sheet` with `headers` if it does not exist. An existing sheet
    /// is left untouched.
    async fn ensure_sheet(&mut self, sheet: &str, headers: &[&str]) -> Result<(), WriteError>;

    /// Upsert `rows` in order. A row whose `dedupe_column` value matches an
    /// existing data row overwrites that row in place; others are appended.
    /// Rows without a value in `dedupe_column` are always appended.
    async fn write_rows(
        &mut self,
        sheet: &str,
        rows: &[Row],
        dedupe_column: usize,
    ) -> Result<WriteSummary, WriteError>;

    /// Set a single cell.
    async fn write_named_cell(
        &mut self,
        sheet: &str,
        cell: CellRef,
        value: CellValue,
    ) -> Result<(), WriteError>;

    /// Replace every data row of `sheet`, keeping the header row.
    async fn replace_rows(&mut self, sheet: &str, rows: &[Row]) -> Result<(), WriteError>;
}

#[async_trait]
impl<W: DocumentWriter + ?Sized> DocumentWriter for Box<W> {
    async fn ensure_sheet(&mut self, sheet: &str, headers: &[&str]) -> Result<(), WriteError> {
        (**self).ensure_sheet(sheet, headers).await
    }

    async fn write_rows(
        &mut self,
        sheet: &str,
        rows: &[Row],
        dedupe_column: usize,
    ) -> Result<WriteSummary, WriteError> {
        (**self).write_rows(sheet, rows, dedupe_column).await
    }

    async fn write_named_cell(
        &mut self,
        sheet: &str,
        cell: CellRef,
        value: CellValue,
    ) -> Result<(), WriteError> {
        (**self).write_named_cell(sheet, cell, value).await
    }

    async fn replace_rows(&mut self, sheet: &str, rows: &[Row]) -> Result<(), WriteError> {
        (**self).replace_rows(sheet, rows).await
    }
}

/// Open the output document at `path` with the configured backend.
///
/// Numbers addresses the document by its file name, so it must already be
/// open in the application.
pub fn open_document(backend: Backend, path: &Path) -> Result<Box<dyn DocumentWriter>, WriteError> {
    match backend {
        Backend::Xlsx => Ok(Box::new(XlsxWorkbook::open(path)?)),
        Backend::Numbers => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned());
            Ok(Box::new(NumbersBridge::new(name)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_match_across_text_and_numbers() {
        assert_eq!(CellValue::from("2").key(), CellValue::Integer(2).key());
        assert_eq!(CellValue::from(" 2.0 ").key(), CellValue::Number(2.0).key());
        assert_eq!(CellValue::from("453.p.100").key().as_deref(), Some("453.p.100"));
        assert_eq!(CellValue::Number(2.5).key().as_deref(), Some("2.5"));
        assert_eq!(CellValue::from("  ").key(), None);
        assert_eq!(CellValue::Empty.key(), None);
    }

    #[test]
    fn display_renders_plain_values() {
        assert_eq!(CellValue::Number(3.0).to_string(), "3");
        assert_eq!(CellValue::Number(12.75).to_string(), "12.75");
        assert_eq!(CellValue::Integer(-4).to_string(), "-4");
        assert_eq!(CellValue::Empty.to_string(), "");
    }

    #[test]
    fn conversions() {
        assert_eq!(CellValue::from(7u32), CellValue::Integer(7));
        assert_eq!(CellValue::from(None::<f64>), CellValue::Empty);
        assert_eq!(CellValue::from(f64::NAN), CellValue::Empty);
        assert_eq!(CellValue::from(Some("x")), CellValue::Text("x".into()));

        let row: Row = crate::row!["a", 1u32, Some(2.5)];
        assert_eq!(
            row,
            vec![
                CellValue::Text("a".into()),
                CellValue::Integer(1),
                CellValue::Number(2.5)
            ]
        );
    }

    #[test]
    fn conflict_classification() {
        assert!(WriteError::Conflict { message: "locked".into() }.is_conflict());
        assert!(WriteError::Unavailable { message: "closed".into() }.is_conflict());
        assert!(!WriteError::Script { message: "syntax".into() }.is_conflict());
    }
}
