//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: start a scheduler worker until interrupted
//! - trigger: run one generation pass now
//! - status / pause / resume: inspect and control this instance
//! - pause-global, pause-subject and their resume counterparts
//! - hint: ask upcoming passes to fill one subject bucket early
//! - distribution, gaps, health, compare, summary, suggestions: analytics

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Drillr - adaptive practice-content generation scheduler
#[derive(Parser, Debug)]
#[command(name = "drillr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print JSON instead of human-readable output
    #[arg(long, global = true)]
    pub json: bool,

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
    /// Run the scheduler worker until Ctrl-C
    Run {
        /// Override the configured instance id (`auto` generates one)
        #[arg(short, long)]
        instance: Option<String>,
    },

    /// Run a single generation pass and print the result
    Trigger,

    /// Show worker status and recent runs
    Status {
        /// Number of recent runs to show
        #[arg(short = 'n', long, default_value_t = 5)]
        history: usize,
    },

    /// Pause this instance
    Pause,

    /// Resume this instance
    Resume,

    /// Pause generation for every instance
    PauseGlobal,

    /// Clear the global pause
    ResumeGlobal,

    /// Pause generation for one subject
    PauseSubject {
        /// Subject id
        subject: i64,
    },

    /// Resume generation for one subject
    ResumeSubject {
        /// Subject id
        subject: i64,
    },

    /// Ask upcoming passes to fill one of a subject's buckets early
    Hint {
        /// Subject id
        subject: i64,

        /// Item kind (vocabulary, fill_in_blank, question_answer, reading_comprehension)
        kind: String,

        /// Minutes before the hint lapses
        #[arg(short, long, default_value_t = 60)]
        ttl_minutes: i64,
    },

    /// Show the high / medium / low score distribution
    Distribution {
        /// Limit to one subject
        #[arg(short, long)]
        subject: Option<i64>,
    },

    /// Show coverage gaps
    Gaps {
        /// Limit to one subject (system-wide otherwise)
        #[arg(short, long)]
        subject: Option<i64>,
    },

    /// Show system health and worker heartbeats
    Health,

    /// Compare score distributions across subjects
    Compare {
        /// Subject ids
        #[arg(required = true, num_args = 1..)]
        subjects: Vec<i64>,
    },

    /// Show one subject's performance summary
    Summary {
        /// Subject id
        subject: i64,
    },

    /// List buckets that need more items
    Suggestions,
}

impl Commands {
    /// Commands that change pause state.
    pub fn is_pause_control(&self) -> bool {
        matches!(
            self,
            Commands::Pause
                | Commands::Resume
                | Commands::PauseGlobal
                | Commands::ResumeGlobal
                | Commands::PauseSubject { .. }
                | Commands::ResumeSubject { .. }
        )
    }
}
