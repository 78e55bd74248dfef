//! Probzel - contest problem preparation and judging
//!
//! Probzel builds the tests of a programming contest problem and judges
//! solutions against them. It combines:
//! - **convenient-cache**: content-addressed job cache that skips work whose
//!   inputs did not change
//! - **convenient-judge**: sandboxed job queue (compilation, program runs)
//!
//! ## Architecture
//!
//! 1. **Problem**: [`Problem`] reads `problem.yml`, interprets the test
//!    script and registers its jobs (generation, validation, answers) with
//!    the cache
//! 2. **Tests**: [`Problem::update_tests`] rebuilds only what changed and
//!    posts inputs and answers to `work/tests`
//! 3. **Invocations**: [`InvocationManager`] runs solutions against every
//!    posted test through a per-run pipeline (compile, run, check)
//! 4. **Archive**: finished runs are read back as [`ArchivedInvocation`]
//!
//! ## Usage
//!
//! ```no_run
//! use probzel::*;
//! use convenient_judge::{Judge, JudgeConfig};
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let judge = Judge::start(JudgeConfig::default())?;
//! let problem = Problem::open("problems/aplusb", judge.handle())?;
//! problem.update_tests()?;
//!
//! let manager = InvocationManager::new(problem.invocations_dir(), judge.handle());
//! let plan = problem.invocation_plan(&problem.solutions()?)?;
//! let invocation = manager.new_invocation(plan)?;
//! invocation.wait();
//! println!("{:?}", invocation.matrix());
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod config;
pub mod invocation;
pub mod lock;
pub mod problem;

pub use config::{Millis, PROBLEM_FILE, ProblemConfig};
pub use invocation::{
    ArchivedInvocation, CellDescriptor, Invocation, InvocationError, InvocationManager,
    InvocationPlan, InvocationRef, InvocationView, TestCase, Verdict,
};
pub use lock::{DirLock, LockError, RetryPolicy};
pub use problem::{
    Problem, ProblemError, ProblemResult, ScriptInterpreter, Test, TestKind, TestSet,
    UpdateReport,
};
