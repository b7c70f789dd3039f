//! Command-line interface for linkmeta.
//!
//! Provides commands for enqueueing links, running the worker pool, and
//! inspecting or recovering the queue.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
