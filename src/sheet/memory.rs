use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{DocumentError, GridCell, SheetGrid, SheetOp, Workbook, WriteBatch};
use crate::types::CellValue;

#[derive(Debug, Clone, Default)]
struct MemorySheet {
    name: String,
    cells: BTreeMap<(usize, usize), GridCell>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    sheets: Vec<MemorySheet>,
    active: usize,
}

impl MemoryState {
    fn position(&self, name: &str) -> Option<usize> {
        self.sheets.iter().position(|s| s.name.eq_ignore_ascii_case(name))
    }

    fn sheet(&self, name: &str) -> Result<&MemorySheet, DocumentError> {
        self.position(name)
            .map(|i| &self.sheets[i])
            .ok_or_else(|| DocumentError::UnknownSheet(name.to_string()))
    }

    fn sheet_mut(&mut self, name: &str) -> Result<&mut MemorySheet, DocumentError> {
        match self.position(name) {
            Some(i) => Ok(&mut self.sheets[i]),
            None => Err(DocumentError::UnknownSheet(name.to_string())),
        }
    }

    fn apply(&mut self, op: SheetOp) -> Result<(), DocumentError> {
        match op {
            SheetOp::AddSheet { name } => {
                if self.position(&name).is_some() {
                    return Err(DocumentError::DuplicateSheet(name));
                }
                self.sheets.push(MemorySheet {
                    name,
                    cells: BTreeMap::new(),
                });
            }
            SheetOp::WriteRange { sheet, row, col, values } => {
                let sheet = self.sheet_mut(&sheet)?;
                for (r, line) in values.into_iter().enumerate() {
                    for (c, value) in line.into_iter().enumerate() {
                        sheet.cells.entry((row + r, col + c)).or_default().value = value;
                    }
                }
            }
            SheetOp::SetBold { sheet, range, bold } => {
                let sheet = self.sheet_mut(&sheet)?;
                for (&(r, c), cell) in sheet.cells.iter_mut() {
                    if range.contains(r, c) {
                        cell.bold = bold;
                    }
                }
            }
        }
        Ok(())
    }
}

/// In-process workbook. Starts with one active sheet named `Sheet1`.
///
/// A batch is applied to a copy of the state and swapped in only when every
/// operation succeeds.
#[derive(Debug)]
pub struct MemoryWorkbook {
    state: Mutex<MemoryState>,
    reject_commits: AtomicBool,
}

impl Default for MemoryWorkbook {
    fn default() -> Self {
        Self::with_sheets(&["Sheet1"])
    }
}

impl MemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Workbook with the given sheets; the first one is active.
    pub fn with_sheets(names: &[&str]) -> Self {
        let sheets = names
            .iter()
            .map(|n| MemorySheet {
                name: n.to_string(),
                cells: BTreeMap::new(),
            })
            .collect();
        Self {
            state: Mutex::new(MemoryState { sheets, active: 0 }),
            reject_commits: AtomicBool::new(false),
        }
    }

    /// Make every following commit fail with [`DocumentError::Rejected`].
    pub fn reject_commits(&self, reject: bool) {
        self.reject_commits.store(reject, Ordering::Relaxed);
    }

    /// Put values straight into a sheet, bypassing batches.
    pub fn seed<R, S>(&self, sheet: &str, rows: &[R]) -> Result<(), DocumentError>
    where
        R: AsRef<[S]>,
        S: AsRef<str>,
    {
        let values = rows
            .iter()
            .map(|r| r.as_ref().iter().map(|v| CellValue::Text(v.as_ref().to_string())).collect())
            .collect();
        self.lock().apply(SheetOp::WriteRange {
            sheet: sheet.to_string(),
            row: 0,
            col: 0,
            values,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // a poisoned lock still holds consistent data: batches swap state whole
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Workbook for MemoryWorkbook {
    async fn sheet_names(&self) -> Result<Vec<String>, DocumentError> {
        Ok(self.lock().sheets.iter().map(|s| s.name.clone()).collect())
    }

    async fn active_sheet(&self) -> Result<String, DocumentError> {
        let state = self.lock();
        state
            .sheets
            .get(state.active)
            .map(|s| s.name.clone())
            .ok_or(DocumentError::NoActiveSheet)
    }

    async fn activate_sheet(&self, name: &str) -> Result<(), DocumentError> {
        let mut state = self.lock();
        let idx = state
            .position(name)
            .ok_or_else(|| DocumentError::UnknownSheet(name.to_string()))?;
        state.active = idx;
        Ok(())
    }

    async fn used_row_count(&self, sheet: &str) -> Result<usize, DocumentError> {
        let state = self.lock();
        Ok(state
            .sheet(sheet)?
            .cells
            .keys()
            .map(|&(r, _)| r + 1)
            .max()
            .unwrap_or(0))
    }

    async fn read_sheet(&self, sheet: &str) -> Result<SheetGrid, DocumentError> {
        let state = self.lock();
        let s = state.sheet(sheet)?;
        Ok(SheetGrid::from_cells(
            s.name.clone(),
            s.cells.iter().map(|(&(r, c), cell)| (r, c, cell.clone())),
        ))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), DocumentError> {
        if self.reject_commits.load(Ordering::Relaxed) {
            return Err(DocumentError::Rejected("workbook is read-only".to_string()));
        }
        let mut state = self.lock();
        let mut next = state.clone();
        for op in batch.into_ops() {
            next.apply(op)?;
        }
        *state = next;
        Ok(())
    }
}
