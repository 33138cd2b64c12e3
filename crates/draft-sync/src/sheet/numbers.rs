// Live-document backend: drives an open Apple Numbers document through
// `osascript`. Every script remembers the active sheet and restores it, so
// the user's view does not jump while the draft is being written.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{CellRef, CellValue, DocumentWriter, Row, WriteError, WriteSummary};

pub const OSASCRIPT_TIMEOUT: Duration = Duration::from_secs(10);

const NO_DOCUMENT: &str = "ERROR: No Numbers document is open";

/// Writes into `table 1` of named sheets of a Numbers document.
#[derive(Debug, Clone)]
pub struct NumbersBridge {
    /// Target document name; `None` means the front document.
    document: Option<String>,
    timeout: Duration,
}

impl NumbersBridge {
    pub fn new(document: Option<String>) -> Self {
        Self {
            document,
            timeout: OSASCRIPT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn target(&self) -> String {
        match &self.document {
            Some(name) => format!("document {}", quote(name)),
            None => "document 1".to_string(),
        }
    }

    async fn run(&self, script: &str) -> Result<Option<WriteSummary>, WriteError> {
        let child = Command::new("osascript")
            .arg("-e")
            .arg(script)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Err(_) => {
                return Err(WriteError::Conflict {
                    message: format!("osascript timed out after {}s", self.timeout.as_secs()),
                })
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WriteError::Unavailable {
                    message: "osascript not found; the Numbers backend needs macOS".into(),
                })
            }
            Ok(Err(e)) => {
                return Err(WriteError::Script {
                    message: format!("failed to run osascript: {e}"),
                })
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_stderr(stderr.trim()));
        }
        parse_script_output(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl DocumentWriter for NumbersBridge {
    async fn ensure_sheet(&mut self, sheet: &str, headers: &[&str]) -> Result<(), WriteError> {
        let headers: Row = headers.iter().map(|h| CellValue::from(*h)).collect();
        self.run(&ensure_sheet_script(&self.target(), sheet, &headers))
            .await
            .map(|_| ())
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
        let summary = self
            .run(&write_rows_script(&self.target(), sheet, rows, dedupe_column))
            .await?
            .unwrap_or(WriteSummary {
                appended: rows.len(),
                updated: 0,
            });
        debug!(
            sheet,
            appended = summary.appended,
            updated = summary.updated,
            "wrote rows to Numbers (active sheet restored)"
        );
        Ok(summary)
    }

    async fn write_named_cell(
        &mut self,
        sheet: &str,
        cell: CellRef,
        value: CellValue,
    ) -> Result<(), WriteError> {
        self.run(&named_cell_script(&self.target(), sheet, cell, &value))
            .await
            .map(|_| ())
    }

    async fn replace_rows(&mut self, sheet: &str, rows: &[Row]) -> Result<(), WriteError> {
        self.run(&replace_rows_script(&self.target(), sheet, rows))
            .await
            .map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

/// Interpret what a script printed: `OK`, `OK <appended> <updated>` or
/// `ERROR: ...`.
pub fn parse_script_output(stdout: &str) -> Result<Option<WriteSummary>, WriteError> {
    let out = stdout.trim();
    if out.starts_with(NO_DOCUMENT) {
        return Err(WriteError::Unavailable {
            message: "no Numbers document is open".into(),
        });
    }
    if let Some(message) = out.strip_prefix("ERROR:") {
        return Err(WriteError::Script {
            message: message.trim().to_string(),
        });
    }

    let mut parts = out.split_whitespace();
    match parts.next() {
        Some("OK") => {}
        _ => {
            return Err(WriteError::Script {
                message: format!("unexpected script output: {out}"),
            })
        }
    }
    let counts: Vec<usize> = parts.filter_map(|p| p.parse().ok()).collect();
    Ok(match counts.as_slice() {
        [appended, updated] => Some(WriteSummary {
            appended: *appended,
            updated: *updated,
        }),
        _ => None,
    })
}

/// osascript exit failures. AppleEvent timeouts (-1712) and a busy
/// application (-1708, -600) are treated as transient.
fn classify_stderr(stderr: &str) -> WriteError {
    if ["-1712", "-1708", "-600"].iter().any(|code| stderr.contains(code)) {
        WriteError::Conflict {
            message: stderr.to_string(),
        }
    } else {
        WriteError::Script {
            message: stderr.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Script generation
// ---------------------------------------------------------------------------

/// AppleScript string literal.
pub fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn literal(value: &CellValue) -> String {
    match value {
        CellValue::Empty => "\"\"".to_string(),
        CellValue::Text(s) => quote(s),
        CellValue::Integer(i) => i.to_string(),
        CellValue::Number(n) => n.to_string(),
    }
}

/// `{{1, "a"}, {2, "b"}}`
pub fn list_literal(rows: &[Row]) -> String {
    let rows: Vec<String> = rows
        .iter()
        .map(|row| {
            let cells: Vec<String> = row.iter().map(literal).collect();
            format!("{{{}}}", cells.join(", "))
        })
        .collect();
    format!("{{{}}}", rows.join(", "))
}

/// Wrap `body` (run inside `tell <sheet>` / `tell table 1`) with the checks
/// and active-sheet bookkeeping every script shares.
fn wrap(target: &str, sheet: &str, prelude: &str, body: &str, result: &str) -> String {
    let sheet_name = quote(sheet);
    format!(
        r#"on run
{prelude}
    tell application "Numbers"
        if (count of documents) is 0 then
            return "{NO_DOCUMENT}"
        end if
        tell {target}
            set priorSheetName to name of active sheet
            if not (exists sheet {sheet_name}) then
                return "ERROR: sheet not found: " & {sheet_name}
            end if
            tell sheet {sheet_name}
                tell table 1
{body}
                end tell
            end tell
            if priorSheetName is not {sheet_name} then
                set active sheet to sheet priorSheetName
            end if
        end tell
    end tell
    return {result}
end run
"#
    )
}

pub fn write_rows_script(target: &str, sheet: &str, rows: &[Row], dedupe_column: usize) -> String {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let prelude = format!(
        "    set newRows to {}\n    set keyCol to {}\n    set appendedCount to 0\n    set updatedCount to 0",
        list_literal(rows),
        dedupe_column + 1
    );
    let body = format!(
        r#"                    repeat while (column count) < {width}
                        add column after last column
                    end repeat
                    repeat with rowData in newRows
                        set keyValue to contents of item keyCol of rowData
                        set targetRow to 0
                        if keyValue is not "" then
                            repeat with i from 2 to row count
                                set cellVal to value of cell keyCol of row i
                                if cellVal is not missing value then
                                    if cellVal = keyValue or (cellVal as text) = (keyValue as text) then
                                        set targetRow to i
                                        exit repeat
                                    end if
                                end if
                            end repeat
                        end if
                        if targetRow is 0 then
                            set targetRow to (row count) + 1
                            repeat with i from 2 to row count
                                if value of cell 1 of row i is missing value then
                                    set targetRow to i
                                    exit repeat
                                end if
                            end repeat
                            if targetRow > (row count) then
                                add row below last row
                            end if
                            set appendedCount to appendedCount + 1
                        else
                            set updatedCount to updatedCount + 1
                        end if
                        set colIndex to 1
                        repeat with cellValue in rowData
                            set value of cell colIndex of row targetRow to (contents of cellValue)
                            set colIndex to colIndex + 1
                        end repeat
                    end repeat"#
    );
    wrap(
        target,
        sheet,
        &prelude,
        &body,
        r#""OK " & appendedCount & " " & updatedCount"#,
    )
}

pub fn named_cell_script(target: &str, sheet: &str, cell: CellRef, value: &CellValue) -> String {
    let body = format!(
        r#"                    repeat while (row count) < {row}
                        add row below last row
                    end repeat
                    repeat while (column count) < {col}
                        add column after last column
                    end repeat
                    set value of cell {col} of row {row} to {value}"#,
        row = cell.row_number(),
        col = cell.col_number(),
        value = literal(value),
    );
    wrap(target, sheet, "", &body, "\"OK\"")
}

pub fn replace_rows_script(target: &str, sheet: &str, rows: &[Row]) -> String {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let prelude = format!("    set newRows to {}", list_literal(rows));
    let body = format!(
        r#"                    set neededRows to (count of newRows) + 1
                    if (row count) > neededRows then
                        delete (rows (neededRows + 1) thru (row count))
                    end if
                    repeat while (row count) < neededRows
                        add row below last row
                    end repeat
                    repeat while (column count) < {width}
                        add column after last column
                    end repeat
                    set rowIndex to 2
                    repeat with rowData in newRows
                        set colIndex to 1
                        repeat with cellValue in rowData
                            set value of cell colIndex of row rowIndex to (contents of cellValue)
                            set colIndex to colIndex + 1
                        end repeat
                        set rowIndex to rowIndex + 1
                    end repeat"#
    );
    wrap(target, sheet, &prelude, &body, "\"OK\"")
}

/// Creates the sheet (with headers in row 1) when missing. Creating a sheet
/// activates it, so the prior sheet is restored here too.
pub fn ensure_sheet_script(target: &str, sheet: &str, headers: &Row) -> String {
    let sheet_name = quote(sheet);
    let headers = list_literal(std::slice::from_ref(headers));
    format!(
        r#"on run
    set headerRows to {headers}
    set headerRow to item 1 of headerRows
    tell application "Numbers"
        if (count of documents) is 0 then
            return "{NO_DOCUMENT}"
        end if
        tell {target}
            if exists sheet {sheet_name} then
                return "OK"
            end if
            set priorSheetName to name of active sheet
            set newSheet to make new sheet with properties {{name:{sheet_name}}}
            tell table 1 of newSheet
                repeat while (column count) < (count of headerRow)
                    add column after last column
                end repeat
                set colIndex to 1
                repeat with headerValue in headerRow
                    set value of cell colIndex of row 1 to (contents of headerValue)
                    set colIndex to colIndex + 1
                end repeat
            end tell
            set active sheet to sheet priorSheetName
        end tell
    end tell
    return "OK"
end run
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn quote_escapes_backslashes_and_quotes() {
        assert_eq!(quote(r#"O"Reilly \ Co"#), r#""O\"Reilly \\ Co""#);
        assert_eq!(quote("plain"), "\"plain\"");
    }

    #[test]
    fn list_literal_renders_typed_cells() {
        let rows = vec![row![1u32, "A \"B\"", None::<f64>], row![2u32, "C", Some(12.5)]];
        assert_eq!(
            list_literal(&rows),
            r#"{{1, "A \"B\"", ""}, {2, "C", 12.5}}"#
        );
    }

    #[test]
    fn parse_output_variants() {
        assert_eq!(
            parse_script_output("OK 2 1\n").unwrap(),
            Some(WriteSummary {
                appended: 2,
                updated: 1
            })
        );
        assert_eq!(parse_script_output("OK").unwrap(), None);

        let err = parse_script_output("ERROR: No Numbers document is open").unwrap_err();
        assert!(matches!(err, WriteError::Unavailable { .. }));
        assert!(err.is_conflict());

        let err = parse_script_output("ERROR: sheet not found: Teams").unwrap_err();
        match err {
            WriteError::Script { message } => assert_eq!(message, "sheet not found: Teams"),
            other => panic!("expected Script, got: {other}"),
        }

        assert!(parse_script_output("garbage").is_err());
    }

    #[test]
    fn stderr_timeouts_are_conflicts() {
        assert!(classify_stderr("execution error: Numbers got an error: AppleEvent timed out. (-1712)")
            .is_conflict());
        assert!(!classify_stderr("syntax error: Expected end of line (-2741)").is_conflict());
    }

    #[test]
    fn write_rows_script_restores_active_sheet() {
        let script = write_rows_script(
            "document 1",
            "Draft Results",
            &[row![1u32, 2u32, "453.p.101"]],
            1,
        );
        assert!(script.contains("set priorSheetName to name of active sheet"));
        assert!(script.contains("set active sheet to sheet priorSheetName"));
        assert!(script.contains("set keyCol to 2"));
        assert!(script.contains(r#"set newRows to {{1, 2, "453.p.101"}}"#));
        assert!(script.contains(r#"tell sheet "Draft Results""#));
        assert!(script.contains(NO_DOCUMENT));
    }

    #[test]
    fn named_cell_script_targets_one_based_cell() {
        let script = named_cell_script(
            "document \"draft.numbers\"",
            "Draft Results",
            CellRef::new(9, 0),
            &CellValue::from("Last updated: now"),
        );
        assert!(script.contains("set value of cell 10 of row 1 to \"Last updated: now\""));
        assert!(script.contains("tell document \"draft.numbers\""));
    }

    #[test]
    fn ensure_sheet_script_creates_with_headers() {
        let script = ensure_sheet_script("document 1", "Teams", &row!["teamKey", "teamName"]);
        assert!(script.contains(r#"make new sheet with properties {name:"Teams"}"#));
        assert!(script.contains(r#"set headerRows to {{"teamKey", "teamName"}}"#));
    }

    #[test]
    fn bridge_targets_named_or_front_document() {
        assert_eq!(NumbersBridge::new(None).target(), "document 1");
        assert_eq!(
            NumbersBridge::new(Some("draft.numbers".into())).target(),
            "document \"draft.numbers\""
        );
    }
}
