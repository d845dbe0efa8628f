use std::sync::Arc;

use tracing::info;

use super::{CellRange, Workbook, WriteBatch};
use crate::config::NEW_SHEET_BASE_NAME;
use crate::error::Result;
use crate::types::{Destination, Table};

/// Where a `write` call put the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    pub sheet: String,
    /// True when the sheet was created by this call.
    pub created: bool,
    /// Zero-based row of the first data record.
    pub first_data_row: usize,
    pub rows_written: usize,
}

/// First name from `base`, `base 1`, `base 2`, … not already taken.
/// Sheet names compare case-insensitively.
pub fn unique_sheet_name(existing: &[String], base: &str) -> String {
    let taken = |candidate: &str| existing.iter().any(|e| e.eq_ignore_ascii_case(candidate));
    if !taken(base) {
        return base.to_string();
    }
    let mut n = 1u32;
    loop {
        let candidate = format!("{base} {n}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Data goes below everything already on the sheet, but never above row 1:
/// row 0 always holds the header.
pub fn data_start_row(used_rows: usize) -> usize {
    if used_rows > 1 {
        used_rows
    } else {
        1
    }
}

/// Lays a [`Table`] out on a sheet: bold header in row 0, plain data rows
/// appended below existing content.
///
/// On the active sheet the header is stamped over row 0 on every run while
/// data keeps appending, so repeated runs are not idempotent for row 0.
pub struct SheetWriter {
    workbook: Arc<dyn Workbook>,
}

impl SheetWriter {
    pub fn new(workbook: Arc<dyn Workbook>) -> Self {
        Self { workbook }
    }

    pub async fn write(&self, table: &Table, destination: Destination) -> Result<WriteSummary> {
        let mut batch = WriteBatch::new();

        let (sheet, created, used_rows) = match destination {
            Destination::NewSheet => {
                let existing = self.workbook.sheet_names().await?;
                let name = unique_sheet_name(&existing, NEW_SHEET_BASE_NAME);
                batch.add_sheet(name.clone());
                (name, true, 0)
            }
            Destination::ActiveSheet => {
                let name = self.workbook.active_sheet().await?;
                let used = self.workbook.used_row_count(&name).await?;
                (name, false, used)
            }
        };

        let cols = table.headers.len();
        let first_data_row = data_start_row(used_rows);

        if cols > 0 {
            batch
                .write_range(&sheet, 0, 0, vec![table.header_cells()])
                .set_bold(&sheet, CellRange::new(0, 0, 1, cols), true);

            if !table.rows.is_empty() {
                batch
                    .write_range(&sheet, first_data_row, 0, table.value_grid())
                    .set_bold(&sheet, CellRange::new(first_data_row, 0, table.rows.len(), cols), false);
            }
        }

        self.workbook.commit(batch).await?;

        let rows_written = if cols > 0 { table.rows.len() } else { 0 };
        info!(
            sheet = %sheet,
            created,
            first_data_row,
            rows = rows_written,
            "Wrote {rows_written} row(s) to '{sheet}' starting at row {}",
            first_data_row + 1,
        );

        Ok(WriteSummary {
            sheet,
            created,
            first_data_row,
            rows_written,
        })
    }
}
