//! Content-addressed job cache
//!
//! Every unit of preparation work (compiling a generator, producing a test
//! input, running the model solution) is a *job* named by a textual id. When a
//! job runs it reports the files it depended on; the cache stores the SHA-256
//! digest of each one in a small JSON record. A later request for the same id
//! is skipped as long as every recorded digest still matches what is on disk.
//!
//! # Features
//!
//! - Reversible id escaping (`escape` module) so ids can embed file names,
//!   argument lists and other ids
//! - Ordered provider chain that turns ids into runnable jobs
//! - Per-process memo of completed ids and file digests
//! - Atomic record writes; unreadable records are treated as misses
//!
//! # Example
//!
//! ```no_run
//! use convenient_cache::{JobCache, JobFailure, JobStatus, RunnableJob};
//! use std::path::PathBuf;
//!
//! struct Touch;
//!
//! impl RunnableJob for Touch {
//!     fn run(&self, _cache: &JobCache) -> Result<Vec<PathBuf>, JobFailure> {
//!         std::fs::write("out.txt", "hello")?;
//!         Ok(vec![PathBuf::from("in.txt")])
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut cache = JobCache::new("work/_jobs");
//! cache.register_provider(|id: &str| {
//!     (id == "touch").then(|| Box::new(Touch) as Box<dyn RunnableJob>)
//! });
//!
//! assert_eq!(cache.run_job("touch", false)?, JobStatus::Executed);
//! assert_eq!(cache.run_job("touch", false)?, JobStatus::UpToDate);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(unused_results)]

pub mod cache;
pub mod digest;
pub mod escape;
pub mod job;

pub use cache::{CacheRecord, JobCache, JobStatus, MAX_ID_FILE_NAME, id_file_name};
pub use digest::{Digest, MISSING_FILE_DIGEST};
pub use escape::{EscapeError, escape_list, escape_str, unescape_list, unescape_str};
pub use job::{JobFailure, JobProvider, RunnableJob};

use std::path::PathBuf;

/// Error types for cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No registered provider claims the id
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The job would have to run, but the caller only asked for a check
    #[error("Job is out of date: {0}")]
    JobOutdated(String),

    /// The provider's job ran and failed
    #[error("Job {id} failed: {source}")]
    JobExecution {
        /// Id of the failed job
        id: String,
        /// Failure reported by the job
        source: JobFailure,
    },

    /// Filesystem error while digesting or writing a record
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The dependency list could not be encoded as a record
    #[error("Failed to encode cache record for {id}: {source}")]
    Record {
        /// Id of the job whose record failed
        id: String,
        /// Underlying error
        source: serde_json::Error,
    },

    /// Malformed escaped id component
    #[error(transparent)]
    Escape(#[from] EscapeError),
}

impl CacheError {
    /// True when a `check_only` request found the job stale
    pub fn is_outdated(&self) -> bool {
        matches!(self, Self::JobOutdated(_))
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
