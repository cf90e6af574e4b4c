//! CLI argument parsing and command dispatch.

pub mod args;
pub mod budget;
pub mod config;
pub mod context;
pub mod output;
pub mod status;
pub mod sync;
pub mod track;

pub use args::{Cli, Commands, OutputFormat};
pub use context::CliContext;
