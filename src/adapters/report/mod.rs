//! Delivery reports. CSV export of the per-target audit trail.

pub mod csv_export;

pub use csv_export::{attempts_to_csv, write_report};
