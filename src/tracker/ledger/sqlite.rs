//! Local SQLite ledger.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use super::{LedgerError, LedgerStore, aggregate_by_month};
use crate::tracker::expense::{Category, ExpenseRecord, MonthlyAggregate};

pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Open (or create) a ledger file.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        let ledger = Self { conn: Mutex::new(conn) };
        ledger.init_schema()?;
        info!("Opened SQLite ledger at {:?}", path);
        Ok(ledger)
    }

    pub fn in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        let ledger = Self { conn: Mutex::new(conn) };
        ledger.init_schema()?;
        Ok(ledger)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock only means another request panicked mid-call; the
        // connection itself is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn init_schema(&self) -> Result<(), LedgerError> {
        let conn = self.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS expenses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT,
                month TEXT NOT NULL,
                amount REAL NOT NULL,
                category TEXT NOT NULL,
                description TEXT,
                merchant TEXT,
                logged_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS monthly_totals (
                month TEXT PRIMARY KEY,
                total REAL NOT NULL,
                food REAL NOT NULL,
                transport REAL NOT NULL,
                utilities REAL NOT NULL,
                shopping REAL NOT NULL,
                entertainment REAL NOT NULL,
                healthcare REAL NOT NULL,
                other REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_expenses_month ON expenses(month);
            "#,
        )?;
        Ok(())
    }

    fn month_rows(conn: &Connection, month: Option<&str>) -> Result<Vec<(String, Category, f64)>, LedgerError> {
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, String, f64)> {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        };
        let rows = match month {
            Some(m) => {
                let mut stmt = conn.prepare("SELECT month, category, amount FROM expenses WHERE month = ?1")?;
                let rows = stmt
                    .query_map(params![m], map_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare("SELECT month, category, amount FROM expenses")?;
                let rows = stmt
                    .query_map([], map_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(rows
            .into_iter()
            .map(|(month, category, amount)| (month, Category::parse_lenient(&category), amount))
            .collect())
    }

    fn write_totals(conn: &Connection, summary: &MonthlyAggregate) -> Result<(), LedgerError> {
        conn.execute(
            "INSERT OR REPLACE INTO monthly_totals
                (month, total, food, transport, utilities, shopping, entertainment, healthcare, other)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                summary.month,
                summary.total,
                summary.get(Category::Food),
                summary.get(Category::Transport),
                summary.get(Category::Utilities),
                summary.get(Category::Shopping),
                summary.get(Category::Entertainment),
                summary.get(Category::Healthcare),
                summary.get(Category::Other),
            ],
        )?;
        Ok(())
    }

    fn refresh_month(conn: &Connection, month: &str) -> Result<(), LedgerError> {
        let rows = Self::month_rows(conn, Some(month))?;
        let summary = aggregate_by_month(rows.iter().map(|(m, c, a)| (m.as_str(), *c, *a)))
            .pop()
            .unwrap_or_else(|| MonthlyAggregate::empty(month));
        Self::write_totals(conn, &summary)
    }
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn append(&self, record: &ExpenseRecord, month: &str) -> Result<(), LedgerError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO expenses (date, month, amount, category, description, merchant, logged_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.date,
                month,
                record.amount.unwrap_or(0.0),
                record.category_kind().as_str(),
                record.description,
                record.merchant,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Self::refresh_month(&tx, month)?;
        tx.commit()?;
        debug!("Appended expense for {month}");
        Ok(())
    }

    async fn monthly_aggregate(&self, month: &str) -> Result<MonthlyAggregate, LedgerError> {
        let conn = self.lock();
        let totals = conn
            .query_row(
                "SELECT food, transport, utilities, shopping, entertainment, healthcare, other
                 FROM monthly_totals WHERE month = ?1",
                params![month],
                |row| {
                    let mut totals = [0.0; 7];
                    for (i, slot) in totals.iter_mut().enumerate() {
                        *slot = row.get(i)?;
                    }
                    Ok(totals)
                },
            )
            .optional()?;

        Ok(match totals {
            Some(totals) => MonthlyAggregate::from_totals(month, totals),
            None => MonthlyAggregate::empty(month),
        })
    }

    async fn recompute_all(&self) -> Result<usize, LedgerError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let rows = Self::month_rows(&tx, None)?;
        let months = aggregate_by_month(rows.iter().map(|(m, c, a)| (m.as_str(), *c, *a)));

        tx.execute("DELETE FROM monthly_totals", [])?;
        for summary in &months {
            Self::write_totals(&tx, summary)?;
        }
        tx.commit()?;
        Ok(months.len())
    }

    async fn ensure_schema(&self) -> Result<(), LedgerError> {
        self.init_schema()
    }
}
