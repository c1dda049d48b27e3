pub mod config;
pub mod daemon;
pub mod exporter;
pub mod launcher;
pub mod logging;
pub mod reaper;

pub use config::{Config, ConfigLoader};
pub use daemon::{Daemon, DaemonExit};
pub use launcher::LaunchSpec;
