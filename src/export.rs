//! Export utilities for the rendering layer
//!
//! Matrices go out as CSV or JSON, the progress report as pretty JSON.

use crate::error::Result;
use crate::matrix::{self, StatusMatrix};
use crate::report::ProgressReport;
use nalgebra::DMatrix;
use serde_json::{json, Value};
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Output encoding for matrix exports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixFormat {
    Csv,
    Json,
}

impl MatrixFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            MatrixFormat::Csv => "csv",
            MatrixFormat::Json => "json",
        }
    }
}

impl FromStr for MatrixFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(MatrixFormat::Csv),
            "json" => Ok(MatrixFormat::Json),
            other => Err(format!("Unknown matrix format '{}'. Use csv or json.", other)),
        }
    }
}

/// Configuration for CSV export
#[derive(Debug, Clone)]
pub struct CsvConfig {
    /// Emit a header row and a leading psalm-number column
    pub labels: bool,
    /// Fixed decimal places; `None` writes the shortest exact form
    pub precision: Option<usize>,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            labels: true,
            precision: None,
        }
    }
}

fn format_value(value: f64, precision: Option<usize>) -> String {
    match precision {
        Some(places) => format!("{:.*}", places, value),
        None => format!("{}", value),
    }
}

/// Row `i` is psalm `i + 1` as the earlier psalm, column `j` psalm `j + 1`.
pub fn matrix_to_csv(matrix: &DMatrix<f64>, config: &CsvConfig) -> String {
    let mut out = String::new();

    if config.labels {
        out.push_str("psalm");
        for col in 0..matrix.ncols() {
            let _ = write!(out, ",{}", col + 1);
        }
        out.push('\n');
    }

    for row in 0..matrix.nrows() {
        let cells: Vec<String> = (0..matrix.ncols())
            .map(|col| format_value(matrix[(row, col)], config.precision))
            .collect();
        if config.labels {
            let _ = write!(out, "{},", row + 1);
        }
        out.push_str(&cells.join(","));
        out.push('\n');
    }

    out
}

pub fn matrix_to_json(matrix: &DMatrix<f64>) -> Value {
    let rows: Vec<Vec<f64>> = (0..matrix.nrows())
        .map(|row| (0..matrix.ncols()).map(|col| matrix[(row, col)]).collect())
        .collect();
    json!({
        "size": matrix.nrows(),
        "rows": rows,
    })
}

/// Status grid plus coverage counts, for the heatmap.
pub fn status_matrix_to_json(matrix: &StatusMatrix) -> Value {
    let rows: Vec<&[_]> = matrix.rows().collect();
    json!({
        "size": matrix.size(),
        "coverage": matrix.coverage(),
        "rows": rows,
    })
}

/// Render `matrix` in `format`.
pub fn render_matrix(matrix: &DMatrix<f64>, format: MatrixFormat) -> Result<String> {
    match format {
        MatrixFormat::Csv => Ok(matrix_to_csv(matrix, &CsvConfig::default())),
        MatrixFormat::Json => Ok(serde_json::to_string_pretty(&matrix_to_json(matrix))?),
    }
}

pub fn report_to_json(report: &ProgressReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Write `contents` to `path`, creating parent directories.
pub fn write_output(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, contents)?;
    Ok(())
}

/// Write `distance_<mode>.<ext>` into `dir` for every symmetry mode.
pub fn write_distance_matrices(
    dir: &Path,
    directed: &DMatrix<f64>,
    format: MatrixFormat,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for (mode, distances) in matrix::distance_matrices(directed) {
        let path = dir.join(format!("distance_{}.{}", mode, format.extension()));
        write_output(&path, &render_matrix(&distances, format)?)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{status_matrix, PairCell};
    use crate::pair::Pair;
    use tempfile::TempDir;

    fn small() -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 2, &[0.0, 0.25, 0.25, 0.0])
    }

    #[test]
    fn test_matrix_format_from_str() {
        assert_eq!("CSV".parse::<MatrixFormat>().unwrap(), MatrixFormat::Csv);
        assert_eq!("json".parse::<MatrixFormat>().unwrap(), MatrixFormat::Json);
        assert!("xml".parse::<MatrixFormat>().is_err());
    }

    #[test]
    fn test_csv_with_labels() {
        let csv = matrix_to_csv(&small(), &CsvConfig::default());
        assert_eq!(csv, "psalm,1,2\n1,0,0.25\n2,0.25,0\n");
    }

    #[test]
    fn test_csv_plain_with_precision() {
        let config = CsvConfig {
            labels: false,
            precision: Some(2),
        };
        assert_eq!(matrix_to_csv(&small(), &config), "0.00,0.25\n0.25,0.00\n");
    }

    #[test]
    fn test_matrix_to_json() {
        let value = matrix_to_json(&small());
        assert_eq!(value["size"], 2);
        assert_eq!(value["rows"][0][1], 0.25);
    }

    #[test]
    fn test_status_matrix_json() {
        let cells = vec![PairCell {
            pair: Pair::new(1, 2).unwrap(),
            score: Some(6.0),
        }];
        let value = status_matrix_to_json(&status_matrix(&cells));
        assert_eq!(value["size"], 150);
        assert_eq!(value["coverage"]["evaluated"], 1);
        assert_eq!(value["rows"][0][1]["status"], "evaluated");
        assert_eq!(value["rows"][0][1]["score"], 6.0);
        assert_eq!(value["rows"][1][0]["status"], "not_generated");
    }

    #[test]
    fn test_write_distance_matrices() {
        let temp = TempDir::new().unwrap();
        let directed = matrix::build_directed_score_matrix(&[]);
        let written = write_distance_matrices(temp.path(), &directed, MatrixFormat::Json).unwrap();

        let names: Vec<String> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["distance_minimum.json", "distance_average.json", "distance_maximum.json"]
        );
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&written[1]).unwrap()).unwrap();
        assert_eq!(value["rows"][0][0], 0.0);
        assert_eq!(value["rows"][0][1], 0.03125);
    }

    #[test]
    fn test_write_output_creates_parents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("site").join("data").join("matrix.csv");
        write_output(&path, "a,b\n").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "a,b\n");
    }
}
