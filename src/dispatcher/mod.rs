//! Round-robin dispatcher
//!
//! Single public entrypoint in front of a fixed pool of service instances.
//! Each request is forwarded to the next backend in strict rotation and the
//! response is streamed back. Optionally launches and reaps the instances.

mod pool;
mod proxy;
mod server;
mod supervisor;

pub use server::run_dispatcher;
