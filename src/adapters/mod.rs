//! Infrastructure adapters. Implement outbound ports.
//!
//! Telegram Bot API, SQLite, LLM, fallback directory, CSV reports, console UI.
//! Map errors to DomainError.

pub mod ai;
pub mod directory;
pub mod persistence;
pub mod report;
pub mod telegram;
pub mod ui;
