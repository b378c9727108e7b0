//! Export side effects: write query results to disk
//!
//! JSON, CSV, or Markdown. Intermediate directories are never created; the
//! caller picks a real location and failures map onto the closed code set.

use serde_json::Value;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

use crate::error::ErrorCode;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("no permission to write '{path}': {detail}")]
    PermissionDenied { path: String, detail: String },

    #[error("disk full while writing '{path}'")]
    DiskFull { path: String },

    #[error("path '{path}' does not exist (intermediate directories are not created)")]
    PathNotFound { path: String },

    #[error("unknown export format '{format}'")]
    UnknownFormat { format: String },
}

impl ExportError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ExportError::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            ExportError::DiskFull { .. } => ErrorCode::DiskFull,
            ExportError::PathNotFound { .. } => ErrorCode::PathNotFound,
            ExportError::UnknownFormat { .. } => ErrorCode::ValidationError,
        }
    }

    fn from_io(err: std::io::Error, path: &Path) -> ExportError {
        let path_s = path.display().to_string();
        // ENOSPC has no stable ErrorKind mapping everywhere
        if err.raw_os_error() == Some(28) {
            return ExportError::DiskFull { path: path_s };
        }
        match err.kind() {
            std::io::ErrorKind::NotFound => ExportError::PathNotFound { path: path_s },
            _ => ExportError::PermissionDenied {
                path: path_s,
                detail: err.to_string(),
            },
        }
    }
}

// ============================================================================
// FORMATS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Markdown,
}

impl ExportFormat {
    pub fn from_user(name: &str) -> Result<ExportFormat, ExportError> {
        Ok(match name.to_lowercase().as_str() {
            "json" => ExportFormat::Json,
            "csv" => ExportFormat::Csv,
            "markdown" | "md" => ExportFormat::Markdown,
            other => {
                return Err(ExportError::UnknownFormat {
                    format: other.to_string(),
                })
            }
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Markdown => "markdown",
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExportSummary {
    pub path: String,
    pub format: &'static str,
    pub rows: usize,
    pub bytes: usize,
}

// ============================================================================
// WRITER
// ============================================================================

/// Render rows in the requested format and write them to `path`
pub fn export_rows(
    rows: &[Value],
    format: ExportFormat,
    path: &Path,
) -> Result<ExportSummary, ExportError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(ExportError::PathNotFound {
                path: parent.display().to_string(),
            });
        }
    }

    let rendered = match format {
        ExportFormat::Json => {
            serde_json::to_string_pretty(rows).unwrap_or_else(|_| "[]".to_string())
        }
        ExportFormat::Csv => render_csv(rows),
        ExportFormat::Markdown => render_markdown(rows),
    };

    let mut file = std::fs::File::create(path).map_err(|e| ExportError::from_io(e, path))?;
    file.write_all(rendered.as_bytes())
        .map_err(|e| ExportError::from_io(e, path))?;

    Ok(ExportSummary {
        path: path.display().to_string(),
        format: format.as_str(),
        rows: rows.len(),
        bytes: rendered.len(),
    })
}

/// Column order: first row's keys, then anything new in later rows
fn columns(rows: &[Value]) -> Vec<String> {
    let mut cols: Vec<String> = Vec::new();
    for row in rows {
        if let Some(map) = row.as_object() {
            for key in map.keys() {
                if !cols.contains(key) {
                    cols.push(key.clone());
                }
            }
        }
    }
    cols
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| cell_text(Some(v)))
            .collect::<Vec<_>>()
            .join("; "),
        Some(other) => other.to_string(),
    }
}

fn render_csv(rows: &[Value]) -> String {
    let cols = columns(rows);
    let mut out = String::new();
    out.push_str(&cols.iter().map(|c| csv_escape(c)).collect::<Vec<_>>().join(","));
    out.push('\n');
    for row in rows {
        let line: Vec<String> = cols
            .iter()
            .map(|c| csv_escape(&cell_text(row.get(c))))
            .collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

fn csv_escape(cell: &str) -> String {
    if cell.contains([',', '"', '\n']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

fn render_markdown(rows: &[Value]) -> String {
    let cols = columns(rows);
    if cols.is_empty() {
        return "(no rows)\n".to_string();
    }
    let mut out = String::new();
    out.push_str(&format!("| {} |\n", cols.join(" | ")));
    out.push_str(&format!(
        "|{}|\n",
        cols.iter().map(|_| " --- ").collect::<Vec<_>>().join("|")
    ));
    for row in rows {
        let line: Vec<String> = cols
            .iter()
            .map(|c| cell_text(row.get(c)).replace('|', "\\|"))
            .collect();
        out.push_str(&format!("| {} |\n", line.join(" | ")));
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Vec<Value> {
        vec![
            json!({"id": "a", "name": "Buy milk, eggs", "tags": ["@errands"]}),
            json!({"id": "b", "name": "Say \"hi\"", "tags": []}),
        ]
    }

    #[test]
    fn json_export_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let summary = export_rows(&rows(), ExportFormat::Json, &path).unwrap();

        assert_eq!(summary.rows, 2);
        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["id"], "a");
    }

    #[test]
    fn csv_escapes_commas_and_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.csv");
        export_rows(&rows(), ExportFormat::Csv, &path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines[0], "id,name,tags");
        assert!(lines[1].contains("\"Buy milk, eggs\""));
        assert!(lines[2].contains("\"Say \"\"hi\"\"\""));
    }

    #[test]
    fn markdown_renders_a_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.md");
        export_rows(&rows(), ExportFormat::Markdown, &path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("| id | name | tags |"));
        assert!(raw.contains("| --- |"));
    }

    #[test]
    fn missing_parent_is_path_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/never/made/tasks.json");
        let err = export_rows(&rows(), ExportFormat::Json, &path).unwrap_err();
        assert_eq!(err.code(), ErrorCode::PathNotFound);
    }

    #[test]
    fn unknown_format_is_a_validation_error() {
        let err = ExportFormat::from_user("yaml").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert!(ExportFormat::from_user("md").is_ok());
    }
}
