//! Expense ledger: the store interface, its backends, and the lazily built
//! per-request handle the bot talks to.

mod google_auth;
pub mod sheets;
pub mod sqlite;

use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono_tz::Tz;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::tracker::expense::{ExpenseRecord, MonthlyAggregate};

pub use sheets::SheetsLedger;
pub use sqlite::SqliteLedger;

#[derive(Debug)]
pub enum LedgerError {
    /// Credentials could not be used to build a client.
    Credentials(String),
    /// HTTP or auth failure talking to the spreadsheet API.
    Transport(String),
    /// The API answered, but not with what we expected.
    Api(String),
    Sqlite(rusqlite::Error),
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credentials(msg) => write!(f, "invalid ledger credentials: {msg}"),
            Self::Transport(msg) => write!(f, "ledger transport error: {msg}"),
            Self::Api(msg) => write!(f, "ledger API error: {msg}"),
            Self::Sqlite(e) => write!(f, "sqlite error: {e}"),
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlite(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

/// Append-only expense rows plus derived monthly totals.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Store one expense and refresh the totals for its month.
    async fn append(&self, record: &ExpenseRecord, month: &str) -> Result<(), LedgerError>;

    /// Totals for `month` (`YYYY-MM`). A month without expenses is all zeros.
    async fn monthly_aggregate(&self, month: &str) -> Result<MonthlyAggregate, LedgerError>;

    /// Rebuild every month's totals from the raw rows. Returns the number of
    /// months written.
    async fn recompute_all(&self) -> Result<usize, LedgerError>;

    /// Create whatever tables or tabs are missing. Safe to call repeatedly.
    async fn ensure_schema(&self) -> Result<(), LedgerError>;
}

/// Builds the backing store. Called at most once per [`Ledger`].
pub type LedgerFactory = Arc<dyn Fn() -> Result<Arc<dyn LedgerStore>, LedgerError> + Send + Sync>;

/// Pick the backend the configuration asks for: Google Sheets when both the
/// spreadsheet id and credentials are set, otherwise a SQLite file when a
/// path is set, otherwise nothing.
pub fn factory_from_config(config: &Config) -> Option<LedgerFactory> {
    if let (Some(creds), Some(sheet_id)) = (&config.google_credentials_json, &config.google_sheets_id) {
        let creds = creds.clone();
        let sheet_id = sheet_id.clone();
        return Some(Arc::new(move || -> Result<Arc<dyn LedgerStore>, LedgerError> {
            let store = SheetsLedger::new(&creds, sheet_id.clone())?;
            Ok(Arc::new(store) as Arc<dyn LedgerStore>)
        }));
    }

    if let Some(path) = &config.ledger_db_path {
        let path = path.clone();
        return Some(Arc::new(move || -> Result<Arc<dyn LedgerStore>, LedgerError> {
            let store = SqliteLedger::open(&path)?;
            Ok(Arc::new(store) as Arc<dyn LedgerStore>)
        }));
    }

    None
}

/// Per-request view of the ledger.
///
/// The store is built on first use. A failed build is remembered: the handle
/// stays without a store until it is dropped.
pub struct Ledger {
    factory: Option<LedgerFactory>,
    store: OnceLock<Option<Arc<dyn LedgerStore>>>,
    timezone: Tz,
}

impl Ledger {
    pub fn new(factory: Option<LedgerFactory>, timezone: Tz) -> Self {
        Self {
            factory,
            store: OnceLock::new(),
            timezone,
        }
    }

    /// The backing store, if configured and constructible.
    pub fn store(&self) -> Option<&Arc<dyn LedgerStore>> {
        self.store
            .get_or_init(|| {
                let factory = self.factory.as_ref()?;
                match factory() {
                    Ok(store) => {
                        info!("Ledger store initialized");
                        Some(store)
                    }
                    Err(e) => {
                        error!("Failed to initialize ledger store: {e}");
                        None
                    }
                }
            })
            .as_ref()
    }

    pub fn is_configured(&self) -> bool {
        self.store().is_some()
    }

    /// `YYYY-MM` for today in the bot's time zone.
    pub fn current_month(&self) -> String {
        chrono::Utc::now()
            .with_timezone(&self.timezone)
            .format("%Y-%m")
            .to_string()
    }

    /// `record` with a usable date: its own when it is `YYYY-MM-DD`, otherwise
    /// today in the bot's time zone. Returns the record and its month.
    pub fn dated(&self, record: &ExpenseRecord) -> (ExpenseRecord, String) {
        let mut record = record.clone();
        if let Some(month) = record.month() {
            return (record, month);
        }
        let today = chrono::Utc::now().with_timezone(&self.timezone).date_naive();
        record.date = Some(today.format("%Y-%m-%d").to_string());
        (record, today.format("%Y-%m").to_string())
    }

    pub async fn append(&self, record: &ExpenseRecord) -> bool {
        let Some(store) = self.store() else {
            warn!("Ledger not configured");
            return false;
        };
        let (record, month) = self.dated(record);
        match store.append(&record, &month).await {
            Ok(()) => true,
            Err(e) => {
                error!("Error logging expense: {e}");
                false
            }
        }
    }

    /// Totals for `month`, or the current month when `None`.
    pub async fn monthly_aggregate(&self, month: Option<&str>) -> Option<MonthlyAggregate> {
        let Some(store) = self.store() else {
            warn!("Ledger not configured");
            return None;
        };
        let month = month.map(str::to_string).unwrap_or_else(|| self.current_month());
        match store.monthly_aggregate(&month).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!("Error getting monthly summary: {e}");
                None
            }
        }
    }

    pub async fn recompute_all(&self) -> bool {
        let Some(store) = self.store() else {
            warn!("Ledger not configured");
            return false;
        };
        match store.recompute_all().await {
            Ok(months) => {
                info!("Recalculated totals for {months} month(s)");
                true
            }
            Err(e) => {
                error!("Error recalculating monthly totals: {e}");
                false
            }
        }
    }

    pub async fn ensure_schema(&self) -> bool {
        let Some(store) = self.store() else {
            warn!("Ledger not configured");
            return false;
        };
        match store.ensure_schema().await {
            Ok(()) => true,
            Err(e) => {
                error!("Error setting up ledger: {e}");
                false
            }
        }
    }
}

/// Fold `(month, category, amount)` rows into per-month aggregates, sorted by
/// month.
pub(crate) fn aggregate_by_month<'a>(
    rows: impl IntoIterator<Item = (&'a str, crate::tracker::expense::Category, f64)>,
) -> Vec<MonthlyAggregate> {
    let mut months: std::collections::BTreeMap<&str, MonthlyAggregate> = Default::default();
    for (month, category, amount) in rows {
        months
            .entry(month)
            .or_insert_with(|| MonthlyAggregate::empty(month))
            .add(category, amount);
    }
    months.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::expense::Category;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_factory(calls: Arc<AtomicUsize>, succeed: bool) -> LedgerFactory {
        Arc::new(move || -> Result<Arc<dyn LedgerStore>, LedgerError> {
            calls.fetch_add(1, Ordering::SeqCst);
            if succeed {
                Ok(Arc::new(SqliteLedger::in_memory()?) as Arc<dyn LedgerStore>)
            } else {
                Err(LedgerError::Credentials("bad key".to_string()))
            }
        })
    }

    #[test]
    fn test_store_built_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ledger = Ledger::new(Some(counting_factory(calls.clone(), true)), chrono_tz::UTC);

        assert!(ledger.is_configured());
        assert!(ledger.is_configured());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_build_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ledger = Ledger::new(Some(counting_factory(calls.clone(), false)), chrono_tz::UTC);

        assert!(!ledger.is_configured());
        assert!(!ledger.is_configured());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_absent_store_degrades() {
        let ledger = Ledger::new(None, chrono_tz::UTC);
        assert!(!ledger.append(&ExpenseRecord::default()).await);
        assert!(ledger.monthly_aggregate(None).await.is_none());
        assert!(!ledger.recompute_all().await);
        assert!(!ledger.ensure_schema().await);
    }

    #[tokio::test]
    async fn test_append_without_date_lands_in_current_month() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ledger = Ledger::new(Some(counting_factory(calls, true)), chrono_tz::UTC);
        let record = ExpenseRecord {
            amount: Some(9.0),
            category: Some("transport".to_string()),
            ..Default::default()
        };

        assert!(ledger.append(&record).await);
        let summary = ledger.monthly_aggregate(None).await.unwrap();
        assert_eq!(summary.month, ledger.current_month());
        assert_eq!(summary.get(Category::Transport), 9.0);
    }

    #[test]
    fn test_dated_fills_missing_or_bad_dates_with_today() {
        let ledger = Ledger::new(None, chrono_tz::UTC);
        let today = chrono::Utc::now().date_naive().format("%Y-%m-%d").to_string();

        for date in [None, Some("yesterday"), Some("2026-02-30")] {
            let record = ExpenseRecord {
                amount: Some(1.0),
                date: date.map(str::to_string),
                ..Default::default()
            };
            let (dated, month) = ledger.dated(&record);
            assert_eq!(dated.date.as_deref(), Some(today.as_str()), "{date:?}");
            assert_eq!(month, ledger.current_month());
        }

        let record = ExpenseRecord {
            date: Some("2025-12-31".to_string()),
            ..Default::default()
        };
        let (dated, month) = ledger.dated(&record);
        assert_eq!(dated, record);
        assert_eq!(month, "2025-12");
    }

    #[test]
    fn test_aggregate_by_month_groups_and_sorts() {
        let rows = vec![
            ("2026-10", Category::Food, 5.0),
            ("2026-09", Category::Other, 1.0),
            ("2026-10", Category::Food, 2.5),
        ];
        let months = aggregate_by_month(rows);
        assert_eq!(months.len(), 2);
        assert_eq!(months[0].month, "2026-09");
        assert_eq!(months[1].get(Category::Food), 7.5);
        assert_eq!(months[1].total, 7.5);
    }
}
