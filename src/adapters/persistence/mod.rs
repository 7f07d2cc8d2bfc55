//! Persistence adapters. libsql-backed subscription and post stores.

pub mod sqlite_repo;

pub use sqlite_repo::SqliteRepo;
