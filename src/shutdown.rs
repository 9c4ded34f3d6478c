//! Shutdown signal plumbing

use std::future::Future;
use std::io::Read;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};

/// Resolves on the first Ctrl+C or SIGTERM
pub async fn signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Resolves once standard input reaches end of file.
///
/// A supervising dispatcher holds the write end of the pipe; closing it (or
/// exiting) asks the instance to stop.
pub async fn stdin_closed() {
    reader_closed(std::io::stdin(), "stdin").await;
    info!("Supervisor closed stdin");
}

/// Resolves once `reader` reaches end of file or fails.
///
/// The reads happen on a detached thread rather than the runtime's blocking
/// pool, so dropping this future never holds up runtime shutdown.
pub async fn reader_closed<R>(mut reader: R, what: &'static str)
where
    R: Read + Send + 'static,
{
    let (tx, rx) = oneshot::channel::<()>();
    let spawned = std::thread::Builder::new()
        .name(format!("{}-watch", what))
        .spawn(move || {
            let mut buf = [0u8; 256];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("Failed to read {}: {}", what, e);
                        break;
                    }
                }
            }
            let _ = tx.send(());
        });

    match spawned {
        Ok(_) => {
            let _ = rx.await;
        }
        Err(e) => {
            warn!("Cannot watch {}: {}", what, e);
            std::future::pending::<()>().await;
        }
    }
}

/// One-shot shutdown trigger shared between a server and its owner
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Fire the trigger. Later calls are no-ops.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Future that resolves once the trigger has fired
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            // The sender lives as long as `self`; a closed channel also ends the wait
            let _ = rx.wait_for(|fired| *fired).await;
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for `task` to finish, giving up after `grace`.
///
/// Returns `true` when the task finished in time.
pub async fn drain<F>(task: F, grace: Duration, what: &str) -> bool
where
    F: Future<Output = ()>,
{
    match tokio::time::timeout(grace, task).await {
        Ok(()) => {
            info!("{} drained", what);
            true
        }
        Err(_) => {
            warn!(
                "{} did not drain within {:?}, abandoning in-flight requests",
                what, grace
            );
            false
        }
    }
}
