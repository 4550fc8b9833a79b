//! Google Sheets ledger.
//!
//! Layout:
//! - `Expenses`: Date | Amount | Category | Description | Merchant | Logged At
//! - `Monthly Totals`: Month | Total | Food | Transport | Utilities | Shopping |
//!   Entertainment | Healthcare | Other

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::google_auth::ServiceAccountAuth;
use super::{LedgerError, LedgerStore, aggregate_by_month};
use crate::tracker::expense::{Category, ExpenseRecord, MonthlyAggregate, parse_amount};

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

pub const EXPENSES_SHEET: &str = "Expenses";
pub const TOTALS_SHEET: &str = "Monthly Totals";

const EXPENSE_HEADERS: [&str; 6] = ["Date", "Amount", "Category", "Description", "Merchant", "Logged At"];
const TOTALS_HEADERS: [&str; 9] = [
    "Month",
    "Total",
    "Food",
    "Transport",
    "Utilities",
    "Shopping",
    "Entertainment",
    "Healthcare",
    "Other",
];

/// Day zero of spreadsheet serial dates.
const SERIAL_EPOCH: (i32, u32, u32) = (1899, 12, 30);

/// The slice of the Sheets API the ledger needs. Ranges are A1 notation.
#[async_trait]
pub trait SheetValues: Send + Sync {
    async fn read(&self, range: &str) -> Result<Vec<Vec<Value>>, LedgerError>;
    async fn write(&self, range: &str, rows: Vec<Vec<Value>>) -> Result<(), LedgerError>;
    /// Add rows after the last non-empty row of `sheet`.
    async fn append_rows(&self, sheet: &str, rows: Vec<Vec<Value>>) -> Result<(), LedgerError>;
    async fn clear(&self, range: &str) -> Result<(), LedgerError>;
    async fn sheet_titles(&self) -> Result<Vec<String>, LedgerError>;
    async fn add_sheets(&self, titles: &[&str]) -> Result<(), LedgerError>;
}

/// REST client for one spreadsheet.
pub struct GoogleSheetsApi {
    spreadsheet_id: String,
    auth: ServiceAccountAuth,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SheetProperties {
    title: String,
}

impl GoogleSheetsApi {
    pub fn new(credentials_json: &str, spreadsheet_id: String) -> Result<Self, LedgerError> {
        let http = reqwest::Client::new();
        let auth = ServiceAccountAuth::from_json(credentials_json, http.clone())?;
        Ok(Self {
            spreadsheet_id,
            auth,
            http,
        })
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/{}/values/{}",
            SHEETS_API_BASE,
            self.spreadsheet_id,
            urlencoding::encode(range)
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, LedgerError> {
        let token = self.auth.token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LedgerError::Transport(format!("failed to read response: {e}")))?;
        if !status.is_success() {
            return Err(LedgerError::Api(format!("{status}: {body}")));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| LedgerError::Api(format!("bad JSON: {e}")))
    }
}

// Writes are RAW so dates and months stay text instead of turning into
// serial numbers on the way back.
#[async_trait]
impl SheetValues for GoogleSheetsApi {
    async fn read(&self, range: &str) -> Result<Vec<Vec<Value>>, LedgerError> {
        let request = self
            .http
            .get(self.values_url(range))
            .query(&[("valueRenderOption", "UNFORMATTED_VALUE")]);
        let value = self.send(request).await?;
        let range: ValueRange =
            serde_json::from_value(value).map_err(|e| LedgerError::Api(format!("bad value range: {e}")))?;
        Ok(range.values)
    }

    async fn write(&self, range: &str, rows: Vec<Vec<Value>>) -> Result<(), LedgerError> {
        let request = self
            .http
            .put(self.values_url(range))
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({ "values": rows }));
        self.send(request).await?;
        Ok(())
    }

    async fn append_rows(&self, sheet: &str, rows: Vec<Vec<Value>>) -> Result<(), LedgerError> {
        let request = self
            .http
            .post(format!("{}:append", self.values_url(&format!("'{sheet}'!A1"))))
            .query(&[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")])
            .json(&json!({ "values": rows }));
        self.send(request).await?;
        Ok(())
    }

    async fn clear(&self, range: &str) -> Result<(), LedgerError> {
        let request = self
            .http
            .post(format!("{}:clear", self.values_url(range)))
            .json(&json!({}));
        self.send(request).await?;
        Ok(())
    }

    async fn sheet_titles(&self) -> Result<Vec<String>, LedgerError> {
        let request = self
            .http
            .get(format!("{}/{}", SHEETS_API_BASE, self.spreadsheet_id))
            .query(&[("fields", "sheets.properties.title")]);
        let meta: SpreadsheetMeta = serde_json::from_value(self.send(request).await?)
            .map_err(|e| LedgerError::Api(format!("bad spreadsheet metadata: {e}")))?;
        Ok(meta.sheets.into_iter().map(|s| s.properties.title).collect())
    }

    async fn add_sheets(&self, titles: &[&str]) -> Result<(), LedgerError> {
        let requests: Vec<Value> = titles
            .iter()
            .map(|title| json!({ "addSheet": { "properties": { "title": title } } }))
            .collect();
        let request = self
            .http
            .post(format!("{}/{}:batchUpdate", SHEETS_API_BASE, self.spreadsheet_id))
            .json(&json!({ "requests": requests }));
        self.send(request).await?;
        Ok(())
    }
}

pub struct SheetsLedger {
    api: Arc<dyn SheetValues>,
}

impl SheetsLedger {
    pub fn new(credentials_json: &str, spreadsheet_id: String) -> Result<Self, LedgerError> {
        Ok(Self::with_api(Arc::new(GoogleSheetsApi::new(
            credentials_json,
            spreadsheet_id,
        )?)))
    }

    pub fn with_api(api: Arc<dyn SheetValues>) -> Self {
        Self { api }
    }

    async fn expense_rows(&self) -> Result<Vec<Vec<Value>>, LedgerError> {
        self.api.read(&format!("'{EXPENSES_SHEET}'!A2:F")).await
    }

    /// Rewrite (or add) the totals row for `summary.month`.
    async fn upsert_totals(&self, summary: &MonthlyAggregate) -> Result<(), LedgerError> {
        let months = self.api.read(&format!("'{TOTALS_SHEET}'!A2:A")).await?;
        let existing = months
            .iter()
            .position(|row| row.first().and_then(cell_month).as_deref() == Some(summary.month.as_str()));

        match existing {
            Some(index) => {
                // Data starts on sheet row 2.
                let row = index + 2;
                self.api
                    .write(&format!("'{TOTALS_SHEET}'!A{row}:I{row}"), vec![totals_row(summary)])
                    .await
            }
            None => self.api.append_rows(TOTALS_SHEET, vec![totals_row(summary)]).await,
        }
    }

    async fn refresh_month(&self, month: &str) -> Result<(), LedgerError> {
        let rows = self.expense_rows().await?;
        self.upsert_totals(&month_aggregate(&rows, month)).await
    }
}

#[async_trait]
impl LedgerStore for SheetsLedger {
    /// The expense row is the record of truth. Once it is stored the append
    /// has happened; a stale totals row is fixed by the next recompute.
    async fn append(&self, record: &ExpenseRecord, month: &str) -> Result<(), LedgerError> {
        self.api.append_rows(EXPENSES_SHEET, vec![expense_row(record)]).await?;
        info!("Logged expense row to sheet");

        if let Err(e) = self.refresh_month(month).await {
            warn!("Expense stored but totals for {month} not refreshed: {e}");
        }
        Ok(())
    }

    async fn monthly_aggregate(&self, month: &str) -> Result<MonthlyAggregate, LedgerError> {
        let rows = self.api.read(&format!("'{TOTALS_SHEET}'!A2:I")).await?;
        Ok(rows
            .iter()
            .find(|row| row.first().and_then(cell_month).as_deref() == Some(month))
            .map(|row| parse_totals_row(month, row))
            .unwrap_or_else(|| MonthlyAggregate::empty(month)))
    }

    async fn recompute_all(&self) -> Result<usize, LedgerError> {
        let rows = self.expense_rows().await?;
        let parsed = parse_expense_rows(&rows);
        let months = aggregate_by_month(parsed.iter().map(|(m, c, a)| (m.as_str(), *c, *a)));

        // New rows first, then whatever is left below them. A failed write
        // leaves the old totals in place.
        if !months.is_empty() {
            let last = months.len() + 1;
            let body = months.iter().map(totals_row).collect();
            self.api.write(&format!("'{TOTALS_SHEET}'!A2:I{last}"), body).await?;
        }
        self.api
            .clear(&format!("'{TOTALS_SHEET}'!A{}:I", months.len() + 2))
            .await?;
        Ok(months.len())
    }

    async fn ensure_schema(&self) -> Result<(), LedgerError> {
        let titles = self.api.sheet_titles().await?;
        let missing: Vec<&str> = [EXPENSES_SHEET, TOTALS_SHEET]
            .into_iter()
            .filter(|name| !titles.iter().any(|t| t == name))
            .collect();

        if !missing.is_empty() {
            info!("Creating sheets: {:?}", missing);
            self.api.add_sheets(&missing).await?;
        }

        self.api
            .write(&format!("'{EXPENSES_SHEET}'!A1:F1"), vec![header_row(&EXPENSE_HEADERS)])
            .await?;
        self.api
            .write(&format!("'{TOTALS_SHEET}'!A1:I1"), vec![header_row(&TOTALS_HEADERS)])
            .await?;
        debug!("Sheet headers written");
        Ok(())
    }
}

fn header_row(headers: &[&str]) -> Vec<Value> {
    headers.iter().map(|h| Value::from(*h)).collect()
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn cell_amount(cell: Option<&Value>) -> f64 {
    match cell {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => parse_amount(s).unwrap_or(0.0),
        _ => 0.0,
    }
}

fn serial_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let (y, m, d) = SERIAL_EPOCH;
    NaiveDate::from_ymd_opt(y, m, d)?.checked_add_days(chrono::Days::new(serial.floor() as u64))
}

/// A date cell: `YYYY-MM-DD` text, or a serial number when the sheet has
/// turned the text into a real date.
fn cell_date(cell: &Value) -> Option<NaiveDate> {
    match cell {
        Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok(),
        Value::Number(n) => serial_date(n.as_f64()?),
        _ => None,
    }
}

/// A month cell as `YYYY-MM`. Accepts `YYYY-MM` text, a full date, or a
/// serial date.
fn cell_month(cell: &Value) -> Option<String> {
    if let Value::String(s) = cell
        && let Ok(first) = NaiveDate::parse_from_str(&format!("{}-01", s.trim()), "%Y-%m-%d")
    {
        return Some(first.format("%Y-%m").to_string());
    }
    cell_date(cell).map(|d| d.format("%Y-%m").to_string())
}

pub(crate) fn expense_row(record: &ExpenseRecord) -> Vec<Value> {
    vec![
        Value::from(record.date.clone().unwrap_or_default()),
        Value::from(record.amount.unwrap_or(0.0)),
        Value::from(record.category_kind().as_str()),
        Value::from(record.description.clone().unwrap_or_default()),
        Value::from(record.merchant.clone().unwrap_or_default()),
        Value::from(chrono::Utc::now().to_rfc3339()),
    ]
}

pub(crate) fn totals_row(summary: &MonthlyAggregate) -> Vec<Value> {
    let mut row = vec![Value::from(summary.month.clone()), Value::from(summary.total)];
    row.extend(summary.categories().map(|(_, amount)| Value::from(amount)));
    row
}

pub(crate) fn parse_totals_row(month: &str, row: &[Value]) -> MonthlyAggregate {
    let mut totals = [0.0; 7];
    for (i, slot) in totals.iter_mut().enumerate() {
        // Month, Total, then the categories.
        *slot = cell_amount(row.get(i + 2));
    }
    MonthlyAggregate::from_totals(month, totals)
}

/// `(month, category, amount)` for every expense row with a usable date.
/// Rows whose date is neither `YYYY-MM-DD` nor a serial date are skipped.
pub(crate) fn parse_expense_rows(rows: &[Vec<Value>]) -> Vec<(String, Category, f64)> {
    rows.iter()
        .filter_map(|row| {
            let month = cell_date(row.first()?)?.format("%Y-%m").to_string();
            let category = row
                .get(2)
                .map(cell_text)
                .map(|c| Category::parse_lenient(&c))
                .unwrap_or(Category::Other);
            Some((month, category, cell_amount(row.get(1))))
        })
        .collect()
}

fn month_aggregate(rows: &[Vec<Value>], month: &str) -> MonthlyAggregate {
    let parsed = parse_expense_rows(rows);
    aggregate_by_month(
        parsed
            .iter()
            .filter(|(m, _, _)| m == month)
            .map(|(m, c, a)| (m.as_str(), *c, *a)),
    )
    .pop()
    .unwrap_or_else(|| MonthlyAggregate::empty(month))
}
