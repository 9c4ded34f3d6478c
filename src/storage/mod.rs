//! Persistence layer
//!
//! Translates typed city operations into statements against the shared
//! SQLite store, and runs the two file-exchange protocols:
//! seed-on-empty at startup and full backup at graceful shutdown.

mod backup;
mod error;
mod sqlite;

pub use backup::{seed_from_file, write_backup};
pub use error::StoreError;
pub use sqlite::CityStore;
