//! Expense records and monthly aggregates.

use serde::{Deserialize, Serialize};

/// Spending category. Order here is the order used by summaries, the totals
/// sheet columns and chart wedges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Food,
    Transport,
    Utilities,
    Shopping,
    Entertainment,
    Healthcare,
    Other,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Food,
        Category::Transport,
        Category::Utilities,
        Category::Shopping,
        Category::Entertainment,
        Category::Healthcare,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Food => "food",
            Category::Transport => "transport",
            Category::Utilities => "utilities",
            Category::Shopping => "shopping",
            Category::Entertainment => "entertainment",
            Category::Healthcare => "healthcare",
            Category::Other => "other",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Category::Food => "Food",
            Category::Transport => "Transport",
            Category::Utilities => "Utilities",
            Category::Shopping => "Shopping",
            Category::Entertainment => "Entertainment",
            Category::Healthcare => "Healthcare",
            Category::Other => "Other",
        }
    }

    /// Lenient parse: case and surrounding whitespace are ignored, anything
    /// unrecognized lands in `Other`.
    pub fn parse_lenient(s: &str) -> Self {
        let s = s.trim().to_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .unwrap_or(Category::Other)
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// One expense as understood by the extraction model.
///
/// Every field is optional because the model is free to leave any of them out;
/// the confirmation message shows a placeholder for the missing ones.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExpenseRecord {
    pub amount: Option<f64>,
    /// Category as the model wrote it, e.g. "food".
    pub category: Option<String>,
    pub description: Option<String>,
    /// `YYYY-MM-DD` as emitted by the model.
    pub date: Option<String>,
    pub merchant: Option<String>,
}

impl ExpenseRecord {
    /// Build a record from the model's JSON object. Numbers given as strings
    /// ("15.50", "$15.50") are accepted.
    pub fn from_json(obj: &serde_json::Map<String, serde_json::Value>) -> Self {
        let text = |key: &str| -> Option<String> {
            match obj.get(key)? {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            }
        };

        let amount = match obj.get("amount") {
            Some(serde_json::Value::Number(n)) => n.as_f64(),
            Some(serde_json::Value::String(s)) => parse_amount(s),
            _ => None,
        };

        Self {
            amount,
            category: text("category"),
            description: text("description"),
            date: text("date"),
            merchant: text("merchant"),
        }
    }

    /// Category used for aggregation.
    pub fn category_kind(&self) -> Category {
        self.category
            .as_deref()
            .map(Category::parse_lenient)
            .unwrap_or(Category::Other)
    }

    /// `YYYY-MM` of the record's date, if the date is a valid calendar day.
    pub fn month(&self) -> Option<String> {
        let date = self.date.as_deref()?.trim();
        chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .ok()
            .map(|d| d.format("%Y-%m").to_string())
    }
}

/// Parse an amount that may carry a currency symbol or thousands separators.
pub fn parse_amount(s: &str) -> Option<f64> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse().ok()
}

/// Result of one extraction attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Expense(ExpenseRecord),
    /// The error marker, relayed to the user verbatim.
    Failed(String),
}

/// Per-category and total spending for one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyAggregate {
    /// `YYYY-MM`
    pub month: String,
    pub total: f64,
    by_category: [f64; 7],
}

impl MonthlyAggregate {
    pub fn empty(month: impl Into<String>) -> Self {
        Self {
            month: month.into(),
            total: 0.0,
            by_category: [0.0; 7],
        }
    }

    /// Build from per-category amounts in `Category::ALL` order. The total is
    /// derived, never taken from the source.
    pub fn from_totals(month: impl Into<String>, by_category: [f64; 7]) -> Self {
        Self {
            month: month.into(),
            total: by_category.iter().sum(),
            by_category,
        }
    }

    pub fn add(&mut self, category: Category, amount: f64) {
        self.by_category[category.index()] += amount;
        self.total += amount;
    }

    pub fn get(&self, category: Category) -> f64 {
        self.by_category[category.index()]
    }

    /// `(category, amount)` pairs in display order.
    pub fn categories(&self) -> impl Iterator<Item = (Category, f64)> + '_ {
        Category::ALL.into_iter().map(|c| (c, self.get(c)))
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0.0 || self.categories().all(|(_, amount)| amount <= 0.0)
    }
}
