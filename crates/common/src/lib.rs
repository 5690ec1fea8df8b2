//! Snapdiff Common Library
//!
//! Snapshot model, lineage key, the storage boundary and its SQLite
//! implementation, shared by the diff worker and the reference chain.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use db::Database;
pub use error::{Error, Result};
pub use store::SnapshotStore;
pub use types::*;

/// Snapdiff version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".snapdiff")
}

/// Database path inside a store directory
pub fn db_path(store_path: &std::path::Path) -> std::path::PathBuf {
    store_path.join("snapdiff.db")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
