//! Shared state for instance handlers

use crate::storage::CityStore;

/// Application state shared across all handlers
#[derive(Debug, Clone)]
pub struct AppState {
    /// Handle to the shared city table
    pub store: CityStore,
}

impl AppState {
    pub fn new(store: CityStore) -> Self {
        Self { store }
    }
}
