//! CLI module for drillr - command-line interface and subcommands.
//!
//! Provides the entry point with subcommands for running the scheduler,
//! pause control and analytics views.

pub mod commands;
pub mod output;

pub use commands::Cli;
