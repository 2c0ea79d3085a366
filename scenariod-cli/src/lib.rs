//! scenariod CLI library
//!
//! Argument parsing, scenario listing, interactive switching and the run
//! loop behind the `scenariod` binary.

/// Command-line interface definitions and argument parsing
pub mod cli;
/// Exit codes used by the CLI application
pub mod exit_codes;
/// Stdin commands for interactive mode
pub mod interactive;
/// Scenario catalogue output
pub mod list;
/// Proxy setup and orchestrated runs
pub mod run;
/// Ctrl+C and SIGTERM handling
pub mod signal_handler;
