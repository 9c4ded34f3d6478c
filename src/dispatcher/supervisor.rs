//! Launches the backend instances as child processes.
//!
//! Instance `i` (1-based) listens on `base_port + i`. Instance 1 is the
//! elected backup owner; the others run with `--no-backup`. Each instance
//! reads a stdin pipe held by the supervisor and stops when it closes.
//! There is no restart on crash and no health probing.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// A running instance process
struct Instance {
    port: u16,
    child: Child,
}

/// Owner of the instance processes started by the dispatcher
pub struct Supervisor {
    instances: Vec<Instance>,
}

/// Build the command line for one instance
pub fn instance_command(exe: &Path, config_path: &Path, port: u16, backup_owner: bool) -> Command {
    let mut cmd = Command::new(exe);
    cmd.arg("--config")
        .arg(config_path)
        .arg("serve")
        .arg("--port")
        .arg(port.to_string())
        .arg(if backup_owner { "--backup" } else { "--no-backup" })
        .arg("--supervised")
        .stdin(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

impl Supervisor {
    /// Start one instance per port.
    ///
    /// If any launch fails, the instances already started are killed.
    pub fn launch(exe: &Path, config_path: &Path, ports: &[u16]) -> Result<Self> {
        let mut instances = Vec::with_capacity(ports.len());

        for (i, &port) in ports.iter().enumerate() {
            let child = instance_command(exe, config_path, port, i == 0)
                .spawn()
                .context(format!("Failed to launch instance {:?} on port {}", exe, port))?;
            info!(
                "Launched instance {} on port {} (pid {:?})",
                i + 1,
                port,
                child.id()
            );
            instances.push(Instance { port, child });
        }

        Ok(Self { instances })
    }

    /// The executable used for instances when none is configured
    pub fn current_exe(configured: Option<&PathBuf>) -> Result<PathBuf> {
        match configured {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe().context("Cannot locate the running executable"),
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Ask every instance to stop, wait up to `grace`, then kill the rest
    pub async fn shutdown(self, grace: Duration) {
        join_all(self.instances.into_iter().map(|mut instance| async move {
            drop(instance.child.stdin.take());
            match tokio::time::timeout(grace, instance.child.wait()).await {
                Ok(Ok(status)) => {
                    info!("Instance on port {} exited with {}", instance.port, status)
                }
                Ok(Err(e)) => warn!("Failed to wait for instance on port {}: {}", instance.port, e),
                Err(_) => {
                    warn!(
                        "Instance on port {} still running after {:?}, killing it",
                        instance.port, grace
                    );
                    if let Err(e) = instance.child.kill().await {
                        warn!("Failed to kill instance on port {}: {}", instance.port, e);
                    }
                }
            }
        }))
        .await;
    }
}
