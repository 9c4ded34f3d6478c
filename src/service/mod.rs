//! Service instance: query engine and request router over the shared store
//!
//! One instance binds one listen port. Any number of instances may run
//! against the same store behind the dispatcher.

mod error;
mod handlers;
mod server;
mod state;

pub use server::run_instance;
