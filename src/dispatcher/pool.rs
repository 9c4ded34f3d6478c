//! Backend pool with a shared round-robin cursor

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("backend pool must contain at least one address")]
    Empty,
}

/// One backend instance in the pool
#[derive(Debug)]
pub struct Backend {
    index: usize,
    addr: SocketAddr,
    healthy: AtomicBool,
}

impl Backend {
    /// 1-based position in the pool
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Outcome of the most recent forward. Never consulted for selection.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Record the outcome of a forward, logging state changes
    pub fn record(&self, ok: bool) {
        let was = self.healthy.swap(ok, Ordering::Relaxed);
        if was && !ok {
            warn!("Backend {} ({}) stopped responding", self.index, self.addr);
        } else if !was && ok {
            info!("Backend {} ({}) is responding again", self.index, self.addr);
        }
    }
}

/// Fixed, ordered set of backends selected in strict round-robin order.
///
/// Selection ignores health: a dead backend is picked as often as a live one.
#[derive(Debug)]
pub struct BackendPool {
    backends: Vec<Backend>,
    cursor: AtomicUsize,
}

impl BackendPool {
    pub fn new(addrs: Vec<SocketAddr>) -> Result<Self, PoolError> {
        if addrs.is_empty() {
            return Err(PoolError::Empty);
        }

        let backends = addrs
            .into_iter()
            .enumerate()
            .map(|(i, addr)| Backend {
                index: i + 1,
                addr,
                healthy: AtomicBool::new(true),
            })
            .collect();

        Ok(Self {
            backends,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Take the backend under the cursor and advance it, wrapping after the last one
    pub fn next(&self) -> &Backend {
        let len = self.backends.len();
        let slot = match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
        {
            Ok(prev) | Err(prev) => prev,
        };
        &self.backends[slot]
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }
}
