use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

/// CITYGRID: replicated city directory
///
/// Runs city directory service instances against one shared store, and the
/// round-robin dispatcher that fronts them.
#[derive(Parser, Debug)]
#[command(name = "citygrid")]
#[command(version = "0.1.0")]
#[command(about = "City directory instances behind a round-robin dispatcher")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the configuration file (YAML)
    #[arg(short, long, default_value = "citygrid.yaml", global = true)]
    pub config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one service instance
    Serve(ServeArgs),

    /// Run the round-robin dispatcher
    Dispatch(DispatchArgs),

    /// Generate a sample configuration file
    Init(InitArgs),
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Override the listen address
    #[arg(long)]
    pub address: Option<IpAddr>,

    /// Override the listen port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Write the backup file on shutdown
    #[arg(long, conflicts_with = "no_backup")]
    pub backup: bool,

    /// Do not write the backup file on shutdown
    #[arg(long)]
    pub no_backup: bool,

    /// Also shut down when standard input closes (set by the dispatcher)
    #[arg(long)]
    pub supervised: bool,
}

impl ServeArgs {
    /// Backup override requested on the command line, if any
    pub fn backup_override(&self) -> Option<bool> {
        match (self.backup, self.no_backup) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[derive(Parser, Debug)]
pub struct DispatchArgs {
    /// Launch the backend instances as child processes
    #[arg(long)]
    pub spawn: bool,

    /// Override the number of backends
    #[arg(long)]
    pub pool_size: Option<u16>,
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Output path for the config file
    #[arg(short, long, default_value = "citygrid.yaml")]
    pub output: PathBuf,
}
