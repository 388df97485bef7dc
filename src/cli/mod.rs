//! Command handlers for the `coordinator` binary

mod commands;

pub use commands::{cmd_demo, cmd_inspect, cmd_list, CliResult};
