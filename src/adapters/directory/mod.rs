//! Fallback group directory used when the platform cannot answer a search.

pub mod static_directory;

pub use static_directory::StaticGroupDirectory;
