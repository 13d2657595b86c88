//! CLI command definitions using clap.
//!
//! - worker: run the generation loop or a single cycle
//! - assign: build (or read back) a user's daily set
//! - recalc: recompute a user's priority scores
//! - stats / failures: operator views
//! - pause / resume / hint: generation controls

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use adaptiq::domain::QuestionType;

/// adaptiq - adaptive question scheduling and generation
#[derive(Parser, Debug)]
#[command(name = "adaptiq")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generation worker
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },

    /// Build the daily question set for a user
    Assign {
        /// User ID
        #[arg(short, long)]
        user: i64,

        /// Date (YYYY-MM-DD); defaults to the user's local today
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },

    /// Recompute every priority score for a user
    Recalc {
        /// User ID
        #[arg(short, long)]
        user: i64,
    },

    /// Show configured admission limits and pause flags as JSON
    Stats,

    /// Pause generation globally or for one user
    Pause {
        /// Pause only this user
        #[arg(short, long)]
        user: Option<i64>,
    },

    /// Resume generation globally or for one user
    Resume {
        /// Resume only this user
        #[arg(short, long)]
        user: Option<i64>,
    },

    /// Ask the worker to generate for a combo soon
    Hint {
        #[arg(short, long)]
        user: i64,

        #[arg(long)]
        language: String,

        #[arg(long)]
        level: String,

        /// vocabulary, fill_blank, qa, reading_comprehension
        #[arg(short = 't', long = "type")]
        question_type: QuestionType,
    },

    /// Show recent failed generation attempts
    Failures {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

/// Worker subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum WorkerCommands {
    /// Run cycles on the configured interval until Ctrl-C
    Run,

    /// Run a single cycle and print its report
    Once,
}
