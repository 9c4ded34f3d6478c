use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the shared city store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open city store at {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("city with ID {0} already exists")]
    Duplicate(i64),

    #[error("store query failed during {operation}: {source}")]
    Query {
        operation: &'static str,
        source: rusqlite::Error,
    },

    #[error("store connection lock poisoned during {0}")]
    Poisoned(&'static str),

    #[error("store task failed during {operation}: {source}")]
    Task {
        operation: &'static str,
        source: tokio::task::JoinError,
    },
}

/// Errors raised while seeding the store from the backup file.
///
/// Rows inserted before the failure stay in the store; `inserted` counts them.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to read backup file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed row at line {line}: {reason} ({inserted} rows inserted before it)")]
    Malformed {
        line: usize,
        reason: String,
        inserted: usize,
    },

    #[error("failed to insert row at line {line}: {source} ({inserted} rows inserted before it)")]
    Insert {
        line: usize,
        inserted: usize,
        source: StoreError,
    },
}

/// Errors raised while dumping the store to the backup file
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("failed to snapshot the store: {0}")]
    Snapshot(#[from] StoreError),

    #[error("failed to write backup file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("backup writer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
