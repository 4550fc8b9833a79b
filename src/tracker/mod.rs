//! Expense tracking - receipts and text in, ledger rows and charts out.

pub mod chart;
pub mod engine;
pub mod event;
pub mod expense;
pub mod gemini;
pub mod image_prep;
pub mod ledger;
pub mod replies;
pub mod telegram;

#[cfg(test)]
mod tests;

pub use engine::{Command, ExpenseBot};
pub use event::{InboundEvent, Payload};
pub use expense::{Category, ExpenseRecord, Extraction, MonthlyAggregate};
pub use gemini::{ExpenseExtractor, GeminiClient, GenerativeModel};
pub use ledger::{Ledger, LedgerFactory, LedgerStore};
pub use telegram::{Messenger, TelegramClient};
