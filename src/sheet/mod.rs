//! Document capability: the spreadsheet operations the pipeline needs,
//! plus the writer that lays a [`Table`](crate::types::Table) out on a sheet.

pub mod memory;
pub mod sqlite;
pub mod writer;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::CellValue;

pub use memory::MemoryWorkbook;
pub use sqlite::SqliteWorkbook;
pub use writer::{SheetWriter, WriteSummary};

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Cell encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("No sheet named {0:?}")]
    UnknownSheet(String),

    #[error("A sheet named {0:?} already exists")]
    DuplicateSheet(String),

    #[error("Workbook has no active sheet")]
    NoActiveSheet,

    #[error("Document rejected the change: {0}")]
    Rejected(String),
}

// ---------------------------------------------------------------------------
// Write batches
// ---------------------------------------------------------------------------

/// Rectangle of cells, zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub row: usize,
    pub col: usize,
    pub rows: usize,
    pub cols: usize,
}

impl CellRange {
    pub fn new(row: usize, col: usize, rows: usize, cols: usize) -> Self {
        Self { row, col, rows, cols }
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        row >= self.row && row < self.row + self.rows && col >= self.col && col < self.col + self.cols
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SheetOp {
    AddSheet { name: String },
    WriteRange { sheet: String, row: usize, col: usize, values: Vec<Vec<CellValue>> },
    SetBold { sheet: String, range: CellRange, bold: bool },
}

/// Queued document changes, applied together by [`Workbook::commit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<SheetOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sheet(&mut self, name: impl Into<String>) -> &mut Self {
        self.ops.push(SheetOp::AddSheet { name: name.into() });
        self
    }

    pub fn write_range(&mut self, sheet: &str, row: usize, col: usize, values: Vec<Vec<CellValue>>) -> &mut Self {
        self.ops.push(SheetOp::WriteRange {
            sheet: sheet.to_string(),
            row,
            col,
            values,
        });
        self
    }

    pub fn set_bold(&mut self, sheet: &str, range: CellRange, bold: bool) -> &mut Self {
        self.ops.push(SheetOp::SetBold {
            sheet: sheet.to_string(),
            range,
            bold,
        });
        self
    }

    pub fn ops(&self) -> &[SheetOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<SheetOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Sheet contents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridCell {
    pub value: CellValue,
    pub bold: bool,
}

/// Dense copy of a sheet from row 0 / column 0 to its last used cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetGrid {
    pub name: String,
    pub rows: Vec<Vec<GridCell>>,
}

impl SheetGrid {
    pub fn from_cells(name: impl Into<String>, cells: impl IntoIterator<Item = (usize, usize, GridCell)>) -> Self {
        let mut rows: Vec<Vec<GridCell>> = Vec::new();
        for (r, c, cell) in cells {
            if rows.len() <= r {
                rows.resize_with(r + 1, Vec::new);
            }
            let line = &mut rows[r];
            if line.len() <= c {
                line.resize_with(c + 1, GridCell::default);
            }
            line[c] = cell;
        }
        Self { name: name.into(), rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn col_count(&self) -> usize {
        self.rows.iter().map(|r| r.len()).max().unwrap_or(0)
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&GridCell> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// Display text of every row, padded to the widest row.
    pub fn text_rows(&self) -> Vec<Vec<String>> {
        let width = self.col_count();
        self.rows
            .iter()
            .map(|r| {
                (0..width)
                    .map(|c| r.get(c).map(|cell| cell.value.to_string()).unwrap_or_default())
                    .collect()
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// Spreadsheet document the pipeline writes into.
///
/// Reads are immediate. Changes are only visible after [`Workbook::commit`],
/// which applies a whole batch or reports an error.
#[async_trait]
pub trait Workbook: Send + Sync {
    /// Sheet names in tab order.
    async fn sheet_names(&self) -> Result<Vec<String>, DocumentError>;

    async fn active_sheet(&self) -> Result<String, DocumentError>;

    async fn activate_sheet(&self, name: &str) -> Result<(), DocumentError>;

    /// Rows from row 0 through the last row holding any cell; 0 for an
    /// untouched sheet.
    async fn used_row_count(&self, sheet: &str) -> Result<usize, DocumentError>;

    async fn read_sheet(&self, sheet: &str) -> Result<SheetGrid, DocumentError>;

    async fn commit(&self, batch: WriteBatch) -> Result<(), DocumentError>;
}
