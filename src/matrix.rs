//! Dense score, distance and status matrices over the psalm universe
//!
//! Every matrix is `UNIVERSE × UNIVERSE`, indexed by `(x - 1, y - 1)`.
//! The distance matrices are what the plotting layer embeds; the status
//! matrix drives coverage reporting.

use crate::pair::{Pair, UNIVERSE};
use nalgebra::DMatrix;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Score assumed for a pair with no evaluation.
pub const DEFAULT_SCORE: f64 = 5.0;

/// Score of a psalm against itself.
pub const SELF_SCORE: f64 = 10.0;

/// A generated pair and the score of its current evaluation, if any.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairCell {
    pub pair: Pair,
    pub score: Option<f64>,
}

/// How the two directions of a pair are combined into one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymmetryMode {
    Minimum,
    Average,
    Maximum,
}

impl SymmetryMode {
    pub const ALL: [SymmetryMode; 3] = [
        SymmetryMode::Minimum,
        SymmetryMode::Average,
        SymmetryMode::Maximum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SymmetryMode::Minimum => "minimum",
            SymmetryMode::Average => "average",
            SymmetryMode::Maximum => "maximum",
        }
    }

    pub fn combine(&self, a: f64, b: f64) -> f64 {
        match self {
            SymmetryMode::Minimum => a.min(b),
            SymmetryMode::Average => 0.5 * (a + b),
            SymmetryMode::Maximum => a.max(b),
        }
    }
}

impl fmt::Display for SymmetryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SymmetryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minimum" | "min" => Ok(SymmetryMode::Minimum),
            "average" | "avg" | "mean" => Ok(SymmetryMode::Average),
            "maximum" | "max" => Ok(SymmetryMode::Maximum),
            other => Err(format!("Unsupported mode: {}", other)),
        }
    }
}

/// Directed score matrix: 5.0 where unknown, 10.0 on the diagonal,
/// the evaluation score where one exists.
pub fn build_directed_score_matrix(cells: &[PairCell]) -> DMatrix<f64> {
    let mut matrix = DMatrix::from_element(UNIVERSE, UNIVERSE, DEFAULT_SCORE);
    for cell in cells {
        if let Some(score) = cell.score {
            matrix[cell.pair.offsets()] = score;
        }
    }
    matrix.fill_diagonal(SELF_SCORE);
    matrix
}

/// Combine `m[i][j]` with `m[j][i]` for every cell.
pub fn symmetrize(matrix: &DMatrix<f64>, mode: SymmetryMode) -> DMatrix<f64> {
    let transposed = matrix.transpose();
    matrix.zip_map(&transposed, |a, b| mode.combine(a, b))
}

/// Distance `2^(-score)` with a zero diagonal, averaged with its transpose.
///
/// # Panics
///
/// Panics if `combined` is not square.
pub fn to_distance(combined: &DMatrix<f64>) -> DMatrix<f64> {
    let mut distances = combined.map(|score| 2f64.powf(-score));
    distances.fill_diagonal(0.0);
    let transposed = distances.transpose();
    (distances + transposed) * 0.5
}

/// One distance matrix per symmetry mode, in [`SymmetryMode::ALL`] order.
pub fn distance_matrices(directed: &DMatrix<f64>) -> Vec<(SymmetryMode, DMatrix<f64>)> {
    SymmetryMode::ALL
        .iter()
        .map(|&mode| (mode, to_distance(&symmetrize(directed, mode))))
        .collect()
}

/// Coverage state of one ordered pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", content = "score", rename_all = "snake_case")]
pub enum CellStatus {
    NotGenerated,
    GeneratedPendingEvaluation,
    Evaluated(f64),
}

/// Cell counts by status, diagonal excluded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Coverage {
    pub not_generated: usize,
    pub pending_evaluation: usize,
    pub evaluated: usize,
}

/// Row-major status grid. Diagonal cells are always `NotGenerated`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusMatrix {
    size: usize,
    cells: Vec<CellStatus>,
}

impl StatusMatrix {
    pub fn size(&self) -> usize {
        self.size
    }

    /// Status of the pair `(x, y)`, both one-based.
    pub fn get(&self, x: i32, y: i32) -> Option<CellStatus> {
        if x < 1 || y < 1 {
            return None;
        }
        let (row, col) = ((x - 1) as usize, (y - 1) as usize);
        if row >= self.size || col >= self.size {
            return None;
        }
        self.cells.get(row * self.size + col).copied()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[CellStatus]> {
        self.cells.chunks(self.size)
    }

    pub fn coverage(&self) -> Coverage {
        let mut coverage = Coverage::default();
        for (index, cell) in self.cells.iter().enumerate() {
            if index / self.size == index % self.size {
                continue;
            }
            match cell {
                CellStatus::NotGenerated => coverage.not_generated += 1,
                CellStatus::GeneratedPendingEvaluation => coverage.pending_evaluation += 1,
                CellStatus::Evaluated(_) => coverage.evaluated += 1,
            }
        }
        coverage
    }
}

/// Classify every ordered pair as not generated, pending, or evaluated.
pub fn status_matrix(cells: &[PairCell]) -> StatusMatrix {
    let mut grid = vec![CellStatus::NotGenerated; UNIVERSE * UNIVERSE];
    for cell in cells {
        let (row, col) = cell.pair.offsets();
        grid[row * UNIVERSE + col] = match cell.score {
            Some(score) => CellStatus::Evaluated(score),
            None => CellStatus::GeneratedPendingEvaluation,
        };
    }
    StatusMatrix {
        size: UNIVERSE,
        cells: grid,
    }
}
