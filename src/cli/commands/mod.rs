//! CLI command implementations.

mod config;
mod start;
mod status;

pub use config::{run_config, ConfigArgs};
pub use start::{run_start_with_config, StartArgs};
pub use status::{run_status, StatusArgs};
