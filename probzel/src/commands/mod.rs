//! Probzel command-line interface
//!
//! Probzel supports these modes of operation:
//! - `tests`: Build and post the tests of a problem
//! - `invoke`: Judge solutions against the posted tests
//! - `invocations` / `show`: Browse earlier runs
//! - `clean`: Remove generated files

use crate::config::{PROBLEM_FILE, ProblemConfig};
use crate::lock::RetryPolicy;
use crate::problem::{self, Problem, ProblemResult};
use clap::{Parser, Subcommand};
use convenient_judge::{BackendKind, Judge, JudgeResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod clean;
pub mod invocations;
pub mod invoke;
pub mod update;

pub type CommandResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Probzel - contest problem preparation and judging
#[derive(Parser)]
#[command(name = "probzel")]
#[command(about = "Prepare contest problems and judge solutions in a sandbox")]
#[command(version)]
pub struct Cli {
    /// Problem directory (default: nearest directory with problem.yml)
    #[arg(short, long, global = true)]
    pub problem: Option<PathBuf>,

    /// Sandbox backend: isolate or basic
    #[arg(long, global = true)]
    pub sandbox: Option<BackendKind>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the test script, generators, validator and model solution
    Tests,

    /// Judge solutions against all posted tests
    Invoke {
        /// Solution files under solutions/
        #[arg(required_unless_present = "all")]
        solutions: Vec<String>,

        /// Judge every file under solutions/
        #[arg(long, conflicts_with = "solutions")]
        all: bool,

        /// Progress refresh interval in milliseconds
        #[arg(long, default_value_t = 500)]
        refresh: u64,
    },

    /// List earlier invocations
    Invocations,

    /// Show the verdicts of an invocation
    Show {
        /// Invocation id
        uid: u32,
    },

    /// Remove generated files (invocations are kept)
    Clean {
        /// Remove the whole work directory
        #[arg(long)]
        mrproper: bool,
    },
}

/// Problem home and configuration resolved from the global options
#[derive(Debug, Clone)]
pub struct Workspace {
    pub home: PathBuf,
    pub config: ProblemConfig,
}

impl Workspace {
    /// Find the problem and apply command-line overrides
    pub fn resolve(problem: Option<&Path>, sandbox: Option<BackendKind>) -> ProblemResult<Self> {
        let start = match problem {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir().map_err(|e| problem::ProblemError::io(".", e))?,
        };
        let home = problem::lookup(&start)?;
        let mut config = ProblemConfig::load(home.join(PROBLEM_FILE))?;

        if let Some(backend) = sandbox {
            config.judge.backend = backend;
        }
        if config.judge.work_root.is_none() {
            config.judge.work_root = Some(home.join("work").join("_judge"));
        }
        Ok(Self { home, config })
    }

    pub fn work_dir(&self) -> PathBuf {
        self.home.join("work")
    }

    pub fn invocations_dir(&self) -> PathBuf {
        self.work_dir().join("invocations")
    }

    pub fn start_judge(&self) -> JudgeResult<Judge> {
        Judge::start(self.config.judge.clone())
    }

    pub fn open(&self, judge: &Judge) -> ProblemResult<Problem> {
        Problem::with_config(&self.home, self.config.clone(), judge.handle())
    }
}

/// Lock policy of commands that rewrite the work directory
pub fn lock_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        initial_backoff: Duration::from_millis(500),
        max_backoff: Duration::from_secs(5),
        backoff_multiplier: 2.0,
    }
}
