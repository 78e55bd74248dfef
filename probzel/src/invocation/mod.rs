//! Solution invocations: every solution against every test
//!
//! A run directory under `work/invocations/<uid>/` holds:
//!
//! ```text
//! meta.json            solutions, test indices, limits
//! results/<i>_<j>      cell verdict and usage (JSON)
//! outputs/<i>_<j>      solution output
//! bin/<i>              compiled solution
//! compilation/<i>.log  compiler stderr
//! ```
//!
//! Live runs are driven by [`Invocation`]; finished ones are read back by
//! [`ArchivedInvocation`]. Both are presented through [`InvocationView`].

pub mod archive;
pub mod manager;
pub mod pipeline;
pub mod verdict;

pub use archive::ArchivedInvocation;
pub use manager::{InvocationManager, InvocationRef, MAX_INVOCATION_ID, scan};
pub use pipeline::Invocation;
pub use verdict::Verdict;

use convenient_judge::ResourceLimits;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const META_FILE: &str = "meta.json";
pub const RESULTS_DIR: &str = "results";
pub const OUTPUTS_DIR: &str = "outputs";
pub const BIN_DIR: &str = "bin";
pub const COMPILATION_DIR: &str = "compilation";

/// Errors raised while creating or driving an invocation
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No free invocation id left (maximum is {0})")]
    IdsExhausted(u32),

    #[error("Could not claim an invocation id after {0} attempts")]
    IdContention(usize),

    #[error("Nothing to invoke: {0}")]
    EmptyPlan(&'static str),

    #[error("Plan names {solutions} solutions but has {sources} source files")]
    PlanMismatch { solutions: usize, sources: usize },

    #[error("Failed to start the invocation driver: {0}")]
    Spawn(#[source] std::io::Error),
}

impl InvocationError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        InvocationError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type InvocationResult<T> = Result<T, InvocationError>;

/// One posted test of an invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    /// 1-based test number
    pub index: usize,
    pub input: PathBuf,
    pub answer: PathBuf,
}

/// Inputs of an invocation, resolved by the problem layer
#[derive(Debug, Clone)]
pub struct InvocationPlan {
    pub solutions: Vec<String>,
    /// Source file of each solution, same order as `solutions`
    pub sources: Vec<PathBuf>,
    pub tests: Vec<TestCase>,
    /// Compiled checker
    pub checker: PathBuf,
    pub limits: ResourceLimits,
}

impl InvocationPlan {
    pub fn test_indices(&self) -> Vec<usize> {
        self.tests.iter().map(|t| t.index).collect()
    }
}

/// Contents of `meta.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub solutions: Vec<String>,
    pub test_indices: Vec<usize>,
    /// Milliseconds; absent when the solutions ran without a CPU limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timelimit: Option<u64>,
    /// Kilobytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memorylimit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl RunMetadata {
    pub fn for_plan(plan: &InvocationPlan) -> Self {
        Self {
            solutions: plan.solutions.clone(),
            test_indices: plan.test_indices(),
            timelimit: plan.limits.time_ms,
            memorylimit: plan.limits.memory_kb,
            created_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }
}

/// Contents of `results/<i>_<j>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Verdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_usage: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_usage: Option<u64>,
}

/// Verdict and usage of one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellDescriptor {
    pub verdict: Verdict,
    /// CPU milliseconds
    pub time_usage: Option<u64>,
    /// Kilobytes
    pub mem_usage: Option<u64>,
}

impl CellDescriptor {
    pub fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            time_usage: None,
            mem_usage: None,
        }
    }

    pub fn is_final(&self) -> bool {
        self.verdict.is_final()
    }
}

impl From<CellDescriptor> for CellRecord {
    fn from(cell: CellDescriptor) -> Self {
        Self {
            result: Some(cell.verdict),
            time_usage: cell.time_usage,
            mem_usage: cell.mem_usage,
        }
    }
}

/// Read access shared by live and archived invocations
///
/// Cells are addressed by solution position `i` and test position `j`
/// (positions in [`solutions`](Self::solutions) and [`tests`](Self::tests),
/// not test numbers).
pub trait InvocationView {
    fn uid(&self) -> u32;

    fn solutions(&self) -> &[String];

    /// Test numbers, in column order
    fn tests(&self) -> &[usize];

    fn get_descriptor(&self, solution: usize, test: usize) -> CellDescriptor;

    fn get_result(&self, solution: usize, test: usize) -> Verdict {
        self.get_descriptor(solution, test).verdict
    }

    fn is_finished(&self) -> bool;

    /// Rows of verdicts, one per solution
    fn matrix(&self) -> Vec<Vec<Verdict>> {
        (0..self.solutions().len())
            .map(|i| {
                (0..self.tests().len())
                    .map(|j| self.get_result(i, j))
                    .collect()
            })
            .collect()
    }
}

/// `<i>_<j>` file name of a cell
pub fn cell_name(solution: usize, test: usize) -> String {
    format!("{solution}_{test}")
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> InvocationResult<()> {
    let data = serde_json::to_vec(value)?;
    fs::write(path, data).map_err(|e| InvocationError::io(path, e))
}
