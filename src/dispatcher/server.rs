//! Dispatcher server setup and lifecycle

use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::pool::BackendPool;
use super::proxy::{self, ProxyState};
use super::supervisor::Supervisor;
use crate::cli::{DispatcherConfig, GridConfig};
use crate::shutdown::{self, Shutdown};

/// Every path and method goes to the forwarding handler
pub fn router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .fallback(proxy::forward)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A dispatcher that is accepting requests
pub struct RunningDispatcher {
    local_addr: SocketAddr,
    state: Arc<ProxyState>,
    shutdown: Shutdown,
    server: JoinHandle<()>,
    grace: std::time::Duration,
}

impl RunningDispatcher {
    /// Bind the public address and start forwarding to `addrs`
    pub async fn start(config: &DispatcherConfig, addrs: Vec<SocketAddr>) -> Result<Self> {
        let pool = BackendPool::new(addrs)?;
        info!("Forwarding to {} backends", pool.len());
        for backend in pool.backends() {
            info!("Backend {}: {}", backend.index(), backend.addr());
        }

        let state = ProxyState::new(pool, config.upstream_timeout(), config.max_body_bytes)
            .context("Failed to build the upstream client")?;

        let addr = config.listen_addr();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context(format!("Failed to bind {}", addr))?;
        let local_addr = listener.local_addr()?;

        let state = Arc::new(state);
        let app = router(Arc::clone(&state));
        let shutdown = Shutdown::new();
        let signal = shutdown.wait();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(signal)
                .await
            {
                error!("Dispatcher server error: {}", e);
            }
        });

        info!("Dispatcher listening on {}", local_addr);

        Ok(Self {
            local_addr,
            state,
            shutdown,
            server,
            grace: config.grace_period(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and drain in-flight requests up to the grace period
    pub async fn stop(self) {
        let RunningDispatcher {
            state,
            shutdown,
            mut server,
            grace,
            ..
        } = self;

        shutdown.trigger();
        let drained = shutdown::drain(
            async {
                let _ = (&mut server).await;
            },
            grace,
            "Dispatcher",
        )
        .await;
        if !drained {
            server.abort();
        }

        for backend in state.pool.backends() {
            if !backend.is_healthy() {
                warn!(
                    "Backend {} ({}) was failing when the dispatcher stopped",
                    backend.index(),
                    backend.addr()
                );
            }
        }
    }
}

/// Run the dispatcher, and the supervised pool when configured, until a shutdown signal
pub async fn run_dispatcher(config: GridConfig, config_path: &Path) -> Result<()> {
    let dispatcher_config = config.dispatcher;

    let supervisor = if dispatcher_config.spawn_backends {
        let exe = Supervisor::current_exe(dispatcher_config.instance_exe.as_ref())?;
        let ports = dispatcher_config.backend_ports();
        info!("Launching {} instances from {:?}", ports.len(), exe);
        let supervisor = Supervisor::launch(&exe, config_path, &ports)?;
        info!("Supervising {} instances", supervisor.len());
        Some(supervisor)
    } else {
        None
    };

    let dispatcher =
        RunningDispatcher::start(&dispatcher_config, dispatcher_config.backend_addrs()).await?;

    shutdown::signal().await;
    info!("Stopping dispatcher on {}", dispatcher.local_addr());
    dispatcher.stop().await;

    if let Some(supervisor) = supervisor {
        supervisor
            .shutdown(dispatcher_config.instance_stop_timeout())
            .await;
    }

    info!("Dispatcher stopped");
    Ok(())
}
