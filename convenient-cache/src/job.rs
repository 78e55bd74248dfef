//! Job and provider interfaces

use crate::cache::JobCache;
use std::path::PathBuf;

/// Error type a job reports when it fails
pub type JobFailure = Box<dyn std::error::Error + Send + Sync>;

/// A job ready to execute
///
/// `run` performs the work and returns every file whose content determined
/// the result. The cache is handed in so a job can request the jobs it builds
/// on (for example a generator stage asking for the previous stage's output).
pub trait RunnableJob: Send {
    /// Execute the job and report its dependencies
    fn run(&self, cache: &JobCache) -> Result<Vec<PathBuf>, JobFailure>;
}

impl<F> RunnableJob for F
where
    F: Fn(&JobCache) -> Result<Vec<PathBuf>, JobFailure> + Send,
{
    fn run(&self, cache: &JobCache) -> Result<Vec<PathBuf>, JobFailure> {
        self(cache)
    }
}

/// Maps job ids to runnable jobs
///
/// Providers are consulted in registration order; the first one returning
/// `Some` owns the id.
pub trait JobProvider: Send + Sync {
    /// Claim `id`, or return `None` to let the next provider try
    fn try_handle(&self, id: &str) -> Option<Box<dyn RunnableJob>>;
}

impl<F> JobProvider for F
where
    F: Fn(&str) -> Option<Box<dyn RunnableJob>> + Send + Sync,
{
    fn try_handle(&self, id: &str) -> Option<Box<dyn RunnableJob>> {
        self(id)
    }
}
