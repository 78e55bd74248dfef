//! Problem directory: tests, generators, validator, checker
//!
//! ```text
//! <home>/
//!   problem.yml
//!   solutions/        contestant and model solutions
//!   source/           generators, validator, checker
//!   tests.manual/     hand-written test inputs
//!   script[.txt|.py|.sh]
//!   work/
//!     _jobs/          cache records
//!     _data/          job outputs
//!     compiled/       binaries
//!     testset         test list (JSON)
//!     tests/NNN(.a)   posted inputs and answers
//!     invocations/    solution runs
//! ```

pub mod jobs;
pub mod script;
pub mod testset;

pub use jobs::{JobId, ValidationRecord};
pub use script::ScriptInterpreter;
pub use testset::{MAX_TESTS, Test, TestKind, TestSet};

use crate::config::{PROBLEM_FILE, ProblemConfig};
use crate::invocation::{InvocationPlan, TestCase};
use convenient_cache::{CacheError, JobCache, escape_list, id_file_name};
use convenient_judge::{JudgeError, JudgeHandle, SandboxResult};
use jobs::ProblemJobs;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Test scripts, in order of preference
pub const SCRIPT_NAMES: [&str; 4] = ["script", "script.txt", "script.py", "script.sh"];

const CHECKER_NAMES: [&str; 2] = ["checker.cpp", "check.cpp"];
const VALIDATOR_NAMES: [&str; 2] = ["validator.cpp", "validate.cpp"];

/// Work directory entries removed by a plain wipe
const WIPED: [&str; 5] = ["compiled", "_data", "_jobs", "tests", "testset"];

/// Errors raised while preparing a problem
#[derive(Debug, thiserror::Error)]
pub enum ProblemError {
    #[error("No problem.yml found in {0} or any parent directory")]
    NotFound(PathBuf),

    #[error("Invalid configuration {0}: {1}")]
    Config(PathBuf, String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("There is no test script")]
    NoScript,

    #[error("Invalid test script: {0}")]
    ScriptInvalid(String),

    #[error("It is not allowed to have more than {0} tests")]
    TooManyTests(usize),

    #[error("Group {0} does not occupy a contiguous range of tests")]
    GroupNotContiguous(String),

    #[error("Invalid test set: {0}")]
    InvalidTestSet(String),

    #[error("File {0} doesn't exist")]
    MissingSource(PathBuf),

    #[error("Compilation of {file} failed ({result}, exit code {exit_code:?}):\n{stderr}")]
    CompilationFailure {
        file: PathBuf,
        result: SandboxResult,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to run {what}: {result}{}", .reason.as_ref().map(|r| format!(" ({r})")).unwrap_or_default())]
    JobFailed {
        what: String,
        result: SandboxResult,
        reason: Option<String>,
    },

    #[error("No model solution configured")]
    NoModelSolution,

    #[error("No checker found")]
    NoChecker,

    #[error("No validator found")]
    NoValidator,

    #[error("Tests are not built; run `probzel tests` first ({0})")]
    TestsNotBuilt(String),

    #[error(transparent)]
    Cache(CacheError),

    #[error(transparent)]
    Judge(#[from] JudgeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProblemError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProblemError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<CacheError> for ProblemError {
    /// A failing job reports the error it raised, not the cache wrapper
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::JobExecution { id, source } => match source.downcast::<ProblemError>() {
                Ok(inner) => {
                    debug!("Job {} failed: {}", id, inner);
                    *inner
                }
                Err(source) => ProblemError::Cache(CacheError::JobExecution { id, source }),
            },
            other => ProblemError::Cache(other),
        }
    }
}

pub type ProblemResult<T> = Result<T, ProblemError>;

/// Find the problem home containing `start`
///
/// Walks up from `start` to the first directory holding `problem.yml`.
pub fn lookup(start: &Path) -> ProblemResult<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(PROBLEM_FILE).is_file())
        .map(Path::to_path_buf)
        .ok_or_else(|| ProblemError::NotFound(start.to_path_buf()))
}

/// Remove generated state below `home/work`
///
/// A plain wipe keeps invocations; `mrproper` removes the whole directory.
pub fn wipe(home: &Path, mrproper: bool) -> ProblemResult<()> {
    let work = home.join("work");
    if mrproper {
        if work.exists() {
            fs::remove_dir_all(&work).map_err(|e| ProblemError::io(&work, e))?;
        }
        return Ok(());
    }

    for part in WIPED {
        let path = work.join(part);
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else if path.is_file() {
            fs::remove_file(&path)
        } else {
            continue;
        };
        removed.map_err(|e| ProblemError::io(&path, e))?;
        debug!("Removed {}", path.display());
    }
    Ok(())
}

/// State shared between the problem and its job provider
pub(crate) struct ProblemContext {
    pub(crate) home: PathBuf,
    pub(crate) config: ProblemConfig,
    pub(crate) judge: JudgeHandle,
    pub(crate) checker: Option<String>,
    pub(crate) validator: Option<String>,
    pub(crate) script: Option<String>,
    testset: Mutex<Option<TestSet>>,
}

impl ProblemContext {
    pub(crate) fn work_dir(&self) -> PathBuf {
        self.home.join("work")
    }

    pub(crate) fn testset_path(&self) -> PathBuf {
        self.work_dir().join("testset")
    }

    /// Output file of job `id`
    pub(crate) fn data_path(&self, id: &str) -> PathBuf {
        self.work_dir().join("_data").join(id_file_name(id))
    }

    /// Binary compiled from the source at `parts` (relative to home)
    pub(crate) fn compiled_path<S: AsRef<str>>(&self, parts: &[S]) -> PathBuf {
        self.work_dir().join("compiled").join(escape_list(parts))
    }

    pub(crate) fn remember_testset(&self, testset: TestSet) {
        if let Ok(mut slot) = self.testset.lock() {
            *slot = Some(testset);
        }
    }

    fn cached_testset(&self) -> Option<TestSet> {
        self.testset.lock().ok().and_then(|slot| slot.clone())
    }
}

/// Summary of [`Problem::update_tests`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub tests: usize,
    /// Generator sources, in order of first use
    pub generators: Vec<String>,
    /// Whether a validator ran
    pub validated: bool,
    /// Tests the validator rejected
    pub invalid_tests: Vec<usize>,
}

/// A problem opened from its home directory
pub struct Problem {
    ctx: Arc<ProblemContext>,
    cache: JobCache,
}

impl Problem {
    /// Open the problem at `home`, reading `problem.yml`
    pub fn open(home: impl Into<PathBuf>, judge: JudgeHandle) -> ProblemResult<Self> {
        let home = home.into();
        let config = ProblemConfig::load(home.join(PROBLEM_FILE))?;
        Self::with_config(home, config, judge)
    }

    /// Open with an already loaded configuration
    pub fn with_config(
        home: impl Into<PathBuf>,
        config: ProblemConfig,
        judge: JudgeHandle,
    ) -> ProblemResult<Self> {
        let home = home.into();
        let source_dir = home.join("source");
        let discover = |configured: Option<&String>, candidates: &[&str]| {
            configured.cloned().or_else(|| {
                candidates
                    .iter()
                    .find(|name| source_dir.join(name).is_file())
                    .map(ToString::to_string)
            })
        };
        let checker = discover(config.checker.as_ref(), &CHECKER_NAMES);
        let validator = discover(config.validator.as_ref(), &VALIDATOR_NAMES);
        let script = SCRIPT_NAMES
            .iter()
            .find(|name| home.join(name).is_file())
            .map(ToString::to_string);

        let work = home.join("work");
        fs::create_dir_all(&work).map_err(|e| ProblemError::io(&work, e))?;

        info!(
            "Opened problem {} (checker: {:?}, validator: {:?}, script: {:?})",
            home.display(),
            checker,
            validator,
            script
        );

        let ctx = Arc::new(ProblemContext {
            home,
            config,
            judge,
            checker,
            validator,
            script,
            testset: Mutex::new(None),
        });
        let mut cache = JobCache::new(ctx.work_dir().join("_jobs"));
        cache.register_provider(ProblemJobs::new(Arc::clone(&ctx)));

        Ok(Self { ctx, cache })
    }

    pub fn home(&self) -> &Path {
        &self.ctx.home
    }

    pub fn config(&self) -> &ProblemConfig {
        &self.ctx.config
    }

    pub fn cache(&self) -> &JobCache {
        &self.cache
    }

    pub fn checker(&self) -> Option<&str> {
        self.ctx.checker.as_deref()
    }

    pub fn validator(&self) -> Option<&str> {
        self.ctx.validator.as_deref()
    }

    pub fn script(&self) -> Option<&str> {
        self.ctx.script.as_deref()
    }

    pub fn work_dir(&self) -> PathBuf {
        self.ctx.work_dir()
    }

    /// Where solution runs are stored
    pub fn invocations_dir(&self) -> PathBuf {
        self.work_dir().join("invocations")
    }

    /// Current test set, running the test script when outdated
    ///
    /// With `check_only` an outdated script fails with
    /// [`CacheError::JobOutdated`] instead of running.
    pub fn testset(&self, check_only: bool) -> ProblemResult<TestSet> {
        if let Some(testset) = self.ctx.cached_testset() {
            return Ok(testset);
        }
        let _ = self.cache.run_job(&JobId::Tests.to_string(), check_only)?;
        if let Some(testset) = self.ctx.cached_testset() {
            return Ok(testset);
        }

        let testset = TestSet::load(&self.ctx.testset_path())?;
        self.ctx.remember_testset(testset.clone());
        Ok(testset)
    }

    /// Compile the source at `parts` (relative to home) and return the binary
    pub fn compile<S: AsRef<str>>(&self, parts: &[S], check_only: bool) -> ProblemResult<PathBuf> {
        let _ = self
            .cache
            .run_job(&JobId::compile(parts).to_string(), check_only)?;
        Ok(self.compiled_path(parts))
    }

    pub fn compiled_path<S: AsRef<str>>(&self, parts: &[S]) -> PathBuf {
        self.ctx.compiled_path(parts)
    }

    /// Source name of a generator as written in the script
    ///
    /// `gen` refers to `source/gen` if that exists, otherwise `source/gen.cpp`.
    pub fn generator_source(&self, name: &str) -> String {
        if self.ctx.home.join("source").join(name).is_file() {
            name.to_string()
        } else {
            format!("{name}.cpp")
        }
    }

    /// Jobs producing a test's input, in execution order
    pub fn input_jobs(&self, test: &Test) -> Vec<JobId> {
        match test.kind() {
            TestKind::Manual { path } => vec![JobId::ManualTest { path: path.clone() }],
            TestKind::Generated { pipeline } => {
                let mut previous = String::new();
                let mut stages = Vec::with_capacity(pipeline.len());
                for stage in pipeline {
                    let mut command = stage.clone();
                    if let Some(generator) = command.first_mut() {
                        *generator = self.generator_source(generator);
                    }
                    let job = JobId::Generate { previous, command };
                    previous = job.to_string();
                    stages.push(job);
                }
                stages
            }
        }
    }

    /// Id of the job whose output is the test's input
    pub fn input_id(&self, test: &Test) -> String {
        self.input_jobs(test)
            .last()
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    fn answer_job(&self, input_id: &str) -> ProblemResult<JobId> {
        let solution = self
            .ctx
            .config
            .model_solution
            .clone()
            .ok_or(ProblemError::NoModelSolution)?;
        Ok(JobId::Answer {
            solution,
            input: input_id.to_string(),
        })
    }

    fn validation_job(&self, test: &Test, input_id: &str) -> JobId {
        JobId::Validate {
            group: test.group().unwrap_or_default().to_string(),
            input: input_id.to_string(),
        }
    }

    /// Stored validator output for test `index`, if validated
    pub fn validation(&self, index: usize) -> ProblemResult<Option<ValidationRecord>> {
        let testset = self.testset(true)?;
        let test = testset.get(index).ok_or_else(|| {
            ProblemError::InvalidTestSet(format!("no test with index {index}"))
        })?;
        let id = self.validation_job(test, &self.input_id(test)).to_string();
        let path = self.ctx.data_path(&id);
        match fs::read(&path) {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ProblemError::io(path, e)),
        }
    }

    /// Rebuild everything the tests depend on and post them to `work/tests`
    ///
    /// Steps: test script, generators, checker, inputs, validation, model
    /// solution, answers. The first failing step aborts the update.
    pub fn update_tests(&self) -> ProblemResult<UpdateReport> {
        // Each update re-validates every job against the files on disk now.
        self.cache.reset();

        info!("Running test script");
        let testset = self.testset(false)?;
        let mut report = UpdateReport {
            tests: testset.len(),
            ..UpdateReport::default()
        };

        for test in &testset {
            if let TestKind::Generated { pipeline } = test.kind() {
                for stage in pipeline {
                    let Some(name) = stage.first() else { continue };
                    let source = self.generator_source(name);
                    if !report.generators.contains(&source) {
                        report.generators.push(source);
                    }
                }
            }
        }

        info!("Compiling {} generator(s)", report.generators.len());
        for generator in &report.generators {
            let _ = self.compile(&["source", generator.as_str()], false)?;
        }

        match self.checker() {
            Some(checker) => {
                info!("Compiling checker {}", checker);
                let _ = self.compile(&["source", checker], false)?;
            }
            None => warn!("No checker found; solutions cannot be judged"),
        }

        info!("Generating tests");
        let mut inputs = Vec::with_capacity(testset.len());
        for test in &testset {
            for job in self.input_jobs(test) {
                let _ = self.cache.run_job(&job.to_string(), false)?;
            }
            inputs.push(self.input_id(test));
            debug!("Generated test {}/{}", test.index(), testset.len());
        }

        if let Some(validator) = self.validator() {
            info!("Validating with {}", validator);
            let _ = self.compile(&["source", validator], false)?;
            for (test, input) in testset.iter().zip(&inputs) {
                let job = self.validation_job(test, input).to_string();
                let _ = self.cache.run_job(&job, false)?;
                let record: ValidationRecord = serde_json::from_slice(
                    &fs::read(self.ctx.data_path(&job))
                        .map_err(|e| ProblemError::io(self.ctx.data_path(&job), e))?,
                )?;
                if !record.is_ok() {
                    report.invalid_tests.push(test.index());
                }
            }
            report.validated = true;
            if !report.invalid_tests.is_empty() {
                let shown: Vec<String> = report
                    .invalid_tests
                    .iter()
                    .take(10)
                    .map(ToString::to_string)
                    .collect();
                warn!(
                    "Validation problems in tests {}{}",
                    shown.join(","),
                    if report.invalid_tests.len() > 10 { "..." } else { "" }
                );
            }
        } else {
            info!("Validation skipped since there is no validator");
        }

        let model = self
            .ctx
            .config
            .model_solution
            .clone()
            .ok_or(ProblemError::NoModelSolution)?;
        info!("Compiling model solution {}", model);
        let _ = self.compile(&["solutions", model.as_str()], false)?;

        info!("Generating answers");
        let mut answers = Vec::with_capacity(inputs.len());
        for input in &inputs {
            let job = self.answer_job(input)?.to_string();
            let _ = self.cache.run_job(&job, false)?;
            answers.push(job);
        }

        info!("Posting tests");
        let tests_dir = self.work_dir().join("tests");
        if tests_dir.exists() {
            fs::remove_dir_all(&tests_dir).map_err(|e| ProblemError::io(&tests_dir, e))?;
        }
        fs::create_dir_all(&tests_dir).map_err(|e| ProblemError::io(&tests_dir, e))?;
        for (position, (input, answer)) in inputs.iter().zip(&answers).enumerate() {
            let (input_dest, answer_dest) = posted_paths(&tests_dir, position + 1);
            let _ = fs::copy(self.ctx.data_path(input), &input_dest)
                .map_err(|e| ProblemError::io(&input_dest, e))?;
            let _ = fs::copy(self.ctx.data_path(answer), &answer_dest)
                .map_err(|e| ProblemError::io(&answer_dest, e))?;
        }

        info!("Done: {} tests posted", report.tests);
        Ok(report)
    }

    /// Posted input and answer of test `index`
    pub fn posted_test(&self, index: usize) -> (PathBuf, PathBuf) {
        posted_paths(&self.work_dir().join("tests"), index)
    }

    /// Solution files in `solutions/`, sorted
    pub fn solutions(&self) -> ProblemResult<Vec<String>> {
        let dir = self.ctx.home.join("solutions");
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| ProblemError::io(&dir, e))? {
            let entry = entry.map_err(|e| ProblemError::io(&dir, e))?;
            if entry.path().is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Everything an invocation of `solutions` over all posted tests needs
    pub fn invocation_plan(&self, solutions: &[String]) -> ProblemResult<InvocationPlan> {
        let testset = TestSet::load(&self.ctx.testset_path())
            .map_err(|e| ProblemError::TestsNotBuilt(e.to_string()))?;

        let mut tests = Vec::with_capacity(testset.len());
        for test in &testset {
            let (input, answer) = self.posted_test(test.index());
            if !input.is_file() || !answer.is_file() {
                return Err(ProblemError::TestsNotBuilt(format!(
                    "test {} is not posted",
                    test.index()
                )));
            }
            tests.push(TestCase {
                index: test.index(),
                input,
                answer,
            });
        }

        let checker = self.checker().ok_or(ProblemError::NoChecker)?;
        let checker = self.compiled_path(&["source", checker]);
        if !checker.is_file() {
            return Err(ProblemError::TestsNotBuilt("checker is not compiled".to_string()));
        }

        let mut sources = Vec::with_capacity(solutions.len());
        for solution in solutions {
            let source = self.ctx.home.join("solutions").join(solution);
            if !source.is_file() {
                return Err(ProblemError::MissingSource(source));
            }
            sources.push(source);
        }

        Ok(InvocationPlan {
            solutions: solutions.to_vec(),
            sources,
            tests,
            checker,
            limits: self.ctx.config.solution_limits(),
        })
    }

    /// Remove generated state; see [`wipe`]
    pub fn wipe(&self, mrproper: bool) -> ProblemResult<()> {
        wipe(&self.ctx.home, mrproper)?;
        self.cache.reset();
        if let Ok(mut slot) = self.ctx.testset.lock() {
            *slot = None;
        }
        if !mrproper {
            return Ok(());
        }
        let work = self.work_dir();
        fs::create_dir_all(&work).map_err(|e| ProblemError::io(&work, e))
    }
}

fn posted_paths(tests_dir: &Path, index: usize) -> (PathBuf, PathBuf) {
    let name = format!("{index:03}");
    (tests_dir.join(&name), tests_dir.join(format!("{name}.a")))
}

impl std::fmt::Debug for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Problem")
            .field("home", &self.ctx.home)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lookup_walks_up() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(PROBLEM_FILE), "model_solution: a.cpp\n").unwrap();
        let nested = tmp.path().join("solutions/deep");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(lookup(&nested).unwrap(), tmp.path());
        assert_eq!(lookup(tmp.path()).unwrap(), tmp.path());
    }

    #[test]
    fn test_lookup_fails_without_manifest() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(lookup(tmp.path()), Err(ProblemError::NotFound(_))));
    }

    #[test]
    fn test_wipe_keeps_invocations() {
        let tmp = TempDir::new().unwrap();
        let work = tmp.path().join("work");
        for dir in ["compiled", "_data", "_jobs", "tests", "invocations/0"] {
            fs::create_dir_all(work.join(dir)).unwrap();
        }
        fs::write(work.join("testset"), "[]").unwrap();

        wipe(tmp.path(), false).unwrap();
        assert!(!work.join("compiled").exists());
        assert!(!work.join("testset").exists());
        assert!(work.join("invocations/0").exists());

        wipe(tmp.path(), true).unwrap();
        assert!(!work.exists());
        wipe(tmp.path(), true).unwrap();
    }

    #[test]
    fn test_posted_paths() {
        let (input, answer) = posted_paths(Path::new("/p/work/tests"), 7);
        assert_eq!(input, Path::new("/p/work/tests/007"));
        assert_eq!(answer, Path::new("/p/work/tests/007.a"));
    }
}
