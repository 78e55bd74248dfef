//! Sandboxed job execution for contest programs
//!
//! The [`Judge`] accepts jobs (a command, its files, its resource limits),
//! runs them one after another inside an external sandbox and hands back a
//! [`JobHandle`] to wait on or to read results from. Helpers in [`helpers`]
//! wrap the common shapes of job: compiling a source file, running a compiled
//! program, running an interpreted script.
//!
//! ## Architecture
//!
//! 1. **Queue**: `JudgeHandle::new_job` appends to a FIFO channel
//! 2. **Workers**: each worker owns one sandbox slot and drains the queue
//! 3. **Backend**: [`IsolateBackend`] drives the `isolate` utility;
//!    [`BasicBackend`] runs without isolation for development
//! 4. **Classification**: sandbox metadata plus limits become a
//!    [`SandboxResult`]
//!
//! ## Usage
//!
//! ```no_run
//! use convenient_judge::{Judge, JudgeConfig, JobRequest, ResourceLimits};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let judge = Judge::start(JudgeConfig::default())?;
//! let job = judge.new_job(
//!     JobRequest::new(["/bin/echo", "hello"]).limits(ResourceLimits::generator()),
//! );
//! job.wait();
//! println!("{}", job.read_stdout()?);
//! job.release();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(unused_results)]

pub mod backend;
pub mod config;
pub mod helpers;
pub mod isolate;
pub mod judge;
pub mod meta;
pub mod types;

pub use backend::{BasicBackend, RunRequest, SandboxBackend};
pub use config::{BackendKind, JudgeConfig, Toolchain};
pub use helpers::{
    CompilationJob, Interpreter, InterpretedJob, InvocationJob, JobHelper, PassthroughJob,
};
pub use isolate::IsolateBackend;
pub use judge::{CompletionCallback, JobHandle, JobRequest, JobState, Judge, JudgeHandle};
pub use meta::{MetaStatus, RunMeta, TimeoutPolicy, classify};
pub use types::{Bind, JobOutcome, ResourceLimits, SandboxEnvironment, SandboxResult, Usage};

/// Errors raised by the judge and its backends
#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    /// Filesystem error while staging or collecting a job
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The sandbox could not run the job
    #[error("Sandbox backend error: {0}")]
    Backend(String),

    /// Sandbox metadata that cannot be parsed
    #[error("Invalid sandbox metadata: {0}")]
    Metadata(String),

    /// Artifacts were discarded by `release`
    #[error("Job {0} has been released")]
    Released(u64),

    /// The job finished without leaving a working directory
    #[error("Job {0} left no sandbox artifacts")]
    NoArtifacts(u64),

    /// A helper was queried before it submitted its job
    #[error("Job has not been started")]
    NotStarted,
}

/// Result type for judge operations
pub type JudgeResult<T> = Result<T, JudgeError>;
