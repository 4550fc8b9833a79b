//! Telegram expense tracker.
//!
//! Receipt photos, image documents and free-text expenses arrive on a
//! webhook, Gemini turns them into structured records, and the records land
//! in a Google Sheets (or local SQLite) ledger with per-month totals.

pub mod config;
pub mod server;
pub mod telegram_log;
pub mod tracker;
