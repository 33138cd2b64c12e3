// Cell-grid document backend: a single .xlsx workbook on disk.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use umya_spreadsheet::{Spreadsheet, Worksheet};

use super::{CellRef, CellValue, DocumentWriter, Row, WriteError, WriteSummary};

/// An Excel workbook stored at `path`.
///
/// The workbook is parsed once on open. Each sheet is converted to a cell grid
/// the first time it is touched; every mutation copies the grid back into the
/// workbook and saves it through a temporary file and a rename, so a reader
/// never sees a half-written file. Sheets this process never touches are
/// written back as they were read.
pub struct XlsxWorkbook {
    path: PathBuf,
    book: Spreadsheet,
    sheets: HashMap<String, Vec<Row>>,
}

impl XlsxWorkbook {
    /// Open `path`, or start an empty workbook there if it does not exist
    /// yet. Nothing is written until the first mutation.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, WriteError> {
        let path = path.into();
        let book = if path.exists() {
            umya_spreadsheet::reader::xlsx::read(&path).map_err(|e| WriteError::Xlsx {
                path: path.clone(),
                message: e.to_string(),
            })?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|source| WriteError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            umya_spreadsheet::new_file_empty_worksheet()
        };
        Ok(Self {
            path,
            book,
            sheets: HashMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names of the sheets in the workbook, in tab order.
    pub fn sheet_names(&self) -> Vec<String> {
        self.book
            .get_sheet_collection()
            .iter()
            .map(|ws| ws.get_name().to_string())
            .collect()
    }

    /// All rows of `sheet`, header row included.
    pub fn rows(&mut self, sheet: &str) -> Result<&[Row], WriteError> {
        Ok(self.load(sheet).as_slice())
    }

    /// Data rows of `sheet` (everything below the header).
    pub fn data_rows(&mut self, sheet: &str) -> Result<&[Row], WriteError> {
        let rows = self.load(sheet);
        Ok(rows.get(1..).unwrap_or_default())
    }

    fn has_sheet(&self, sheet: &str) -> bool {
        self.book.get_sheet_by_name(sheet).is_some()
    }

    fn load(&mut self, sheet: &str) -> &mut Vec<Row> {
        if !self.sheets.contains_key(sheet) {
            let rows = self
                .book
                .get_sheet_by_name(sheet)
                .map(read_grid)
                .unwrap_or_default();
            debug!(sheet, rows = rows.len(), "loaded sheet");
            self.sheets.insert(sheet.to_string(), rows);
        }
        self.sheets.entry(sheet.to_string()).or_default()
    }

    fn flush(&mut self, sheet: &str) -> Result<(), WriteError> {
        let Some(rows) = self.sheets.get(sheet) else {
            return Ok(());
        };
        let xlsx_err = |message: String| WriteError::Xlsx {
            path: self.path.clone(),
            message,
        };

        if self.book.get_sheet_by_name(sheet).is_none() {
            self.book
                .new_sheet(sheet)
                .map_err(|e| xlsx_err(format!("cannot add sheet {sheet}: {e}")))?;
        }
        let Some(ws) = self.book.get_sheet_by_name_mut(sheet) else {
            return Err(xlsx_err(format!("sheet not found: {sheet}")));
        };
        write_grid(ws, rows);

        let tmp = self.path.with_extension("tmp.xlsx");
        umya_spreadsheet::writer::xlsx::write(&self.book, &tmp)
            .map_err(|e| xlsx_err(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|source| {
            // Excel holds an open workbook locked on Windows.
            if source.kind() == std::io::ErrorKind::PermissionDenied {
                let _ = fs::remove_file(&tmp);
                WriteError::Conflict {
                    message: format!("{} is locked: {source}", self.path.display()),
                }
            } else {
                WriteError::Io {
                    path: self.path.clone(),
                    source,
                }
            }
        })
    }
}

fn read_grid(ws: &Worksheet) -> Vec<Row> {
    let height = ws.get_highest_row();
    let width = ws.get_highest_column();
    let mut rows: Vec<Row> = (1..=height)
        .map(|r| {
            let mut row: Row = (1..=width).map(|c| read_cell(ws, c, r)).collect();
            while row.last().is_some_and(CellValue::is_empty) {
                row.pop();
            }
            row
        })
        .collect();
    while rows.last().is_some_and(Vec::is_empty) {
        rows.pop();
    }
    rows
}

fn read_cell(ws: &Worksheet, col: u32, row: u32) -> CellValue {
    let Some(cell) = ws.get_cell((col, row)) else {
        return CellValue::Empty;
    };
    if let Some(n) = cell.get_value_number() {
        return if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
            CellValue::Integer(n as i64)
        } else {
            CellValue::from(n)
        };
    }
    let text = cell.get_value();
    if text.is_empty() {
        CellValue::Empty
    } else {
        CellValue::Text(text.into_owned())
    }
}

fn write_grid(ws: &mut Worksheet, rows: &[Row]) {
    let height = ws.get_highest_row();
    let len = rows.len() as u32;
    if height > len {
        ws.remove_row(&(len + 1), &(height - len));
    }

    let width = ws.get_highest_column();
    for (r, row) in rows.iter().enumerate() {
        let r = r as u32 + 1;
        let cols = width.max(row.len() as u32);
        for c in 1..=cols {
            match row.get(c as usize - 1).unwrap_or(&CellValue::Empty) {
                CellValue::Empty => {
                    // Only clear cells that exist; absent ones stay absent.
                    if ws.get_cell((c, r)).is_some() {
                        ws.get_cell_mut((c, r)).set_value_string("");
                    }
                }
                CellValue::Text(s) => {
                    ws.get_cell_mut((c, r)).set_value_string(s.as_str());
                }
                CellValue::Number(n) => {
                    ws.get_cell_mut((c, r)).set_value_number(*n);
                }
                CellValue::Integer(i) => {
                    ws.get_cell_mut((c, r)).set_value_number(*i as f64);
                }
            }
        }
    }
}

#[async_trait]
impl DocumentWriter for XlsxWorkbook {
    async fn ensure_sheet(&mut self, sheet: &str, headers: &[&str]) -> Result<(), WriteError> {
        let exists = self.has_sheet(sheet);
        let grid = self.load(sheet);
        if !grid.is_empty() && exists {
            return Ok(());
        }
        if grid.is_empty() {
            grid.push(headers.iter().map(|h| CellValue::from(*h)).collect());
        }
        self.flush(sheet)
    }

    async fn write_rows(
        &mut self,
        sheet: &str,
        rows: &[Row],
        dedupe_column: usize,
    ) -> Result<WriteSummary, WriteError> {
        if rows.is_empty() {
            return Ok(WriteSummary::default());
        }

        let grid = self.load(sheet);
        if grid.is_empty() {
            grid.push(Vec::new());
        }

        let mut index: HashMap<String, usize> = grid
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(i, row)| row.get(dedupe_column)?.key().map(|k| (k, i)))
            .collect();

        let mut summary = WriteSummary::default();
        for row in rows {
            let key = row.get(dedupe_column).and_then(CellValue::key);
            match key.as_ref().and_then(|k| index.get(k)) {
                Some(&existing) => {
                    grid[existing] = row.clone();
                    summary.updated += 1;
                }
                None => {
                    grid.push(row.clone());
                    if let Some(key) = key {
                        index.insert(key, grid.len() - 1);
                    }
                    summary.appended += 1;
                }
            }
        }

        self.flush(sheet)?;
        debug!(
            sheet,
            appended = summary.appended,
            updated = summary.updated,
            "wrote rows"
        );
        Ok(summary)
    }

    async fn write_named_cell(
        &mut self,
        sheet: &str,
        cell: CellRef,
        value: CellValue,
    ) -> Result<(), WriteError> {
        let grid = self.load(sheet);
        if grid.len() <= cell.row {
            grid.resize_with(cell.row + 1, Vec::new);
        }
        let row = &mut grid[cell.row];
        if row.len() <= cell.col {
            row.resize(cell.col + 1, CellValue::Empty);
        }
        row[cell.col] = value;
        self.flush(sheet)
    }

    async fn replace_rows(&mut self, sheet: &str, rows: &[Row]) -> Result<(), WriteError> {
        let grid = self.load(sheet);
        if grid.is_empty() {
            grid.push(Vec::new());
        }
        grid.truncate(1);
        grid.extend(rows.iter().cloned());
        self.flush(sheet)
    }
}
