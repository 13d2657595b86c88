//! CLI module for adaptiq - command-line interface and subcommands.
//!
//! Operator entry points: run the generation worker, build daily sets,
//! recompute scores, and flip pause flags.

pub mod commands;

pub use commands::Cli;
