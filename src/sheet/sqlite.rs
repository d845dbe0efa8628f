use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteExecutor, SqlitePool};
use tracing::{debug, info};

use super::{DocumentError, GridCell, SheetGrid, SheetOp, Workbook, WriteBatch};
use crate::types::CellValue;

/// Name of the sheet a fresh workbook file starts with.
pub const DEFAULT_SHEET_NAME: &str = "Sheet1";

#[derive(Debug, sqlx::FromRow)]
struct CellRow {
    row_idx: i64,
    col_idx: i64,
    value: String,
    bold: i64,
}

/// Workbook stored in a SQLite file. A batch commit is one transaction.
#[derive(Debug, Clone)]
pub struct SqliteWorkbook {
    pool: SqlitePool,
}

impl SqliteWorkbook {
    /// Open (or create) the workbook file and apply migrations.
    pub async fn open(path: &str) -> Result<Self, DocumentError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        let workbook = Self { pool };
        workbook.ensure_active_sheet().await?;
        info!("Workbook ready at {path}");
        Ok(workbook)
    }

    /// Every workbook has at least one sheet and exactly one active sheet.
    async fn ensure_active_sheet(&self) -> Result<(), DocumentError> {
        let sheets = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sheets")
            .fetch_one(&self.pool)
            .await?;
        if sheets == 0 {
            sqlx::query("INSERT INTO sheets (name, position, active, created_at) VALUES (?, 0, 1, ?)")
                .bind(DEFAULT_SHEET_NAME)
                .bind(now_secs())
                .execute(&self.pool)
                .await?;
            return Ok(());
        }

        let active = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sheets WHERE active = 1")
            .fetch_one(&self.pool)
            .await?;
        if active != 1 {
            let mut tx = self.pool.begin().await?;
            sqlx::query("UPDATE sheets SET active = 0").execute(&mut *tx).await?;
            sqlx::query("UPDATE sheets SET active = 1 WHERE id = (SELECT id FROM sheets ORDER BY position LIMIT 1)")
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }
        Ok(())
    }
}

async fn sheet_id<'e, E: SqliteExecutor<'e>>(ex: E, name: &str) -> Result<i64, DocumentError> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM sheets WHERE name = ?")
        .bind(name)
        .fetch_optional(ex)
        .await?
        .ok_or_else(|| DocumentError::UnknownSheet(name.to_string()))
}

#[async_trait]
impl Workbook for SqliteWorkbook {
    async fn sheet_names(&self) -> Result<Vec<String>, DocumentError> {
        Ok(sqlx::query_scalar::<_, String>("SELECT name FROM sheets ORDER BY position")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn active_sheet(&self) -> Result<String, DocumentError> {
        sqlx::query_scalar::<_, String>("SELECT name FROM sheets WHERE active = 1 ORDER BY position LIMIT 1")
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DocumentError::NoActiveSheet)
    }

    async fn activate_sheet(&self, name: &str) -> Result<(), DocumentError> {
        let mut tx = self.pool.begin().await?;
        let id = sheet_id(&mut *tx, name).await?;
        sqlx::query("UPDATE sheets SET active = (id = ?)")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn used_row_count(&self, sheet: &str) -> Result<usize, DocumentError> {
        let id = sheet_id(&self.pool, sheet).await?;
        let rows = sqlx::query_scalar::<_, i64>("SELECT COALESCE(MAX(row_idx) + 1, 0) FROM cells WHERE sheet_id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(rows.max(0) as usize)
    }

    async fn read_sheet(&self, sheet: &str) -> Result<SheetGrid, DocumentError> {
        let id = sheet_id(&self.pool, sheet).await?;
        let rows: Vec<CellRow> = sqlx::query_as(
            "SELECT row_idx, col_idx, value, bold FROM cells WHERE sheet_id = ? ORDER BY row_idx, col_idx",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut cells = Vec::with_capacity(rows.len());
        for row in rows {
            let value: CellValue = serde_json::from_str(&row.value)?;
            cells.push((
                row.row_idx as usize,
                row.col_idx as usize,
                GridCell { value, bold: row.bold != 0 },
            ));
        }
        Ok(SheetGrid::from_cells(sheet, cells))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), DocumentError> {
        let op_count = batch.ops().len();
        // Dropping the transaction on an early return rolls the batch back.
        let mut tx = self.pool.begin().await?;

        for op in batch.into_ops() {
            match op {
                SheetOp::AddSheet { name } => {
                    let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM sheets WHERE name = ?")
                        .bind(&name)
                        .fetch_optional(&mut *tx)
                        .await?;
                    if existing.is_some() {
                        return Err(DocumentError::DuplicateSheet(name));
                    }
                    sqlx::query(
                        r#"
                        INSERT INTO sheets (name, position, active, created_at)
                        VALUES (?, (SELECT COALESCE(MAX(position), -1) + 1 FROM sheets), 0, ?)
                        "#,
                    )
                    .bind(&name)
                    .bind(now_secs())
                    .execute(&mut *tx)
                    .await?;
                }
                SheetOp::WriteRange { sheet, row, col, values } => {
                    let id = sheet_id(&mut *tx, &sheet).await?;
                    for (r, line) in values.iter().enumerate() {
                        for (c, value) in line.iter().enumerate() {
                            sqlx::query(
                                r#"
                                INSERT INTO cells (sheet_id, row_idx, col_idx, value)
                                VALUES (?, ?, ?, ?)
                                ON CONFLICT(sheet_id, row_idx, col_idx) DO UPDATE SET value = excluded.value
                                "#,
                            )
                            .bind(id)
                            .bind((row + r) as i64)
                            .bind((col + c) as i64)
                            .bind(serde_json::to_string(value)?)
                            .execute(&mut *tx)
                            .await?;
                        }
                    }
                }
                SheetOp::SetBold { sheet, range, bold } => {
                    let id = sheet_id(&mut *tx, &sheet).await?;
                    sqlx::query(
                        r#"
                        UPDATE cells SET bold = ?
                        WHERE sheet_id = ?
                          AND row_idx >= ? AND row_idx < ?
                          AND col_idx >= ? AND col_idx < ?
                        "#,
                    )
                    .bind(i64::from(bold))
                    .bind(id)
                    .bind(range.row as i64)
                    .bind((range.row + range.rows) as i64)
                    .bind(range.col as i64)
                    .bind((range.col + range.cols) as i64)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        debug!(ops = op_count, "Workbook batch committed");
        Ok(())
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
