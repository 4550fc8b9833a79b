//! User-facing reply texts (Telegram HTML).

use crate::tracker::expense::{Category, ExpenseRecord, MonthlyAggregate};

pub const WELCOME: &str = "🤖 <b>Finance Tracker Bot</b>

Send me:
📷 Receipt photos
💸 Text expenses (e.g., \"Lunch $15\")
📄 Bill screenshots

<b>Commands:</b>
/summary - Current month summary
/chart - Visual pie chart of expenses
/setup - Setup the expense sheet
/refresh - Recalculate monthly totals";

pub const NOT_CONFIGURED: &str = "❌ Expense sheet not configured";
pub const SUMMARY_FAILED: &str = "❌ Failed to get summary";
pub const SETUP_DONE: &str = "✅ Expense sheet setup completed!";
pub const SETUP_FAILED: &str = "❌ Failed to setup the expense sheet";
pub const REFRESH_DONE: &str = "✅ Monthly totals recalculated successfully!";
pub const REFRESH_FAILED: &str = "❌ Failed to recalculate monthly totals";
pub const NO_CHART_DATA: &str = "📊 No expense data found for current month";
pub const CHART_FAILED: &str = "❌ Failed to create chart";
pub const CREATING_CHART: &str = "📊 Creating your expense chart...";
pub const SEND_AN_IMAGE: &str = "📄 Please send an image file";
pub const PHOTO_DOWNLOAD_FAILED: &str = "❌ Failed to download image";
pub const PHOTO_PROCESS_FAILED: &str = "❌ Failed to process image";
pub const DOCUMENT_DOWNLOAD_FAILED: &str = "❌ Failed to download document";
pub const DOCUMENT_PROCESS_FAILED: &str = "❌ Failed to process document";
pub const LOG_FAILED: &str = "❌ Failed to log expense";
pub const COULD_NOT_PROCESS: &str = "❌ Could not process your message";

const PLACEHOLDER: &str = "N/A";

fn category_icon(category: Category) -> &'static str {
    match category {
        Category::Food => "🍔",
        Category::Transport => "🚗",
        Category::Utilities => "⚡",
        Category::Shopping => "🛍️",
        Category::Entertainment => "🎬",
        Category::Healthcare => "🏥",
        Category::Other => "📋",
    }
}

/// Minimal escaping for text placed inside Telegram HTML.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Amounts keep at least one decimal: 15 → "15.0", 15.5 → "15.5".
pub fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("{amount:.1}")
    } else {
        amount.to_string()
    }
}

/// "food" → "Food", "fast food" → "Fast Food".
pub fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn extraction_failed(message: &str) -> String {
    format!("❌ {}", escape_html(message))
}

pub fn expense_logged(record: &ExpenseRecord) -> String {
    let text = |field: &Option<String>| {
        field
            .as_deref()
            .map(escape_html)
            .unwrap_or_else(|| PLACEHOLDER.to_string())
    };
    let amount = record
        .amount
        .map(format_amount)
        .unwrap_or_else(|| PLACEHOLDER.to_string());
    let category = record
        .category
        .as_deref()
        .map(|c| escape_html(&title_case(c)))
        .unwrap_or_else(|| PLACEHOLDER.to_string());

    format!(
        "✅ <b>Expense Logged!</b>

💰 Amount: ${amount}
📂 Category: {category}
📝 Description: {}
📅 Date: {}
🏪 Merchant: {}",
        text(&record.description),
        text(&record.date),
        text(&record.merchant),
    )
}

pub fn monthly_summary(summary: &MonthlyAggregate) -> String {
    let mut msg = format!(
        "📊 <b>Monthly Summary ({})</b>\n\n💰 <b>Total:</b> ${:.2}\n\n<b>By Category:</b>",
        summary.month, summary.total
    );
    for (category, amount) in summary.categories() {
        msg.push_str(&format!(
            "\n{} {}: ${:.2}",
            category_icon(category),
            category.title(),
            amount
        ));
    }
    msg
}

/// Caption for the chart photo.
pub fn chart_caption(summary: &MonthlyAggregate) -> String {
    format!(
        "📊 <b>Expenses Chart - {}</b>\n💰 Total: ${:.2}",
        summary.month, summary.total
    )
}
