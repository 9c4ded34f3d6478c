mod args;
mod config;

pub use args::{Args, Command, DispatchArgs, InitArgs, ServeArgs};
pub use config::{DispatcherConfig, GridConfig};
