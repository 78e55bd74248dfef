//! Cacheable problem jobs
//!
//! Every step of test preparation is a job of the [`JobCache`], identified by
//! an id built from an operation tag and escaped arguments:
//!
//! | id                          | job                                        |
//! |-----------------------------|--------------------------------------------|
//! | `tests`                     | run the test script, store `work/testset`  |
//! | `mtest.<path>`              | copy a manual test into `work/_data`       |
//! | `mgen.<prev-id>.<argv>`     | run one generator stage                    |
//! | `comp.<path-parts>`         | compile a source into `work/compiled`      |
//! | `val.<group>.<input-id>`    | validate one test input                    |
//! | `ans.<solution>.<input-id>` | produce the expected answer                |
//!
//! Job outputs live in `work/_data/<id>`.

use super::script::ScriptInterpreter;
use super::{ProblemContext, ProblemError, ProblemResult};
use convenient_cache::{
    JobCache, JobFailure, JobProvider, RunnableJob, escape_list, escape_str, unescape_list,
    unescape_str,
};
use convenient_judge::{
    CompilationJob, InterpretedJob, Interpreter, InvocationJob, JobHelper, JudgeError,
    PassthroughJob, ResourceLimits,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Parsed job id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobId {
    Tests,
    ManualTest { path: String },
    /// `previous` is the id of the stage feeding stdin, empty for the first stage
    Generate { previous: String, command: Vec<String> },
    Compile { source: Vec<String> },
    /// `group` is empty for ungrouped tests
    Validate { group: String, input: String },
    Answer { solution: String, input: String },
}

impl JobId {
    pub fn compile<S: AsRef<str>>(parts: &[S]) -> Self {
        JobId::Compile {
            source: parts.iter().map(|p| p.as_ref().to_string()).collect(),
        }
    }

    /// Parse an id; `None` for anything this module does not produce
    pub fn parse(id: &str) -> Option<Self> {
        if id == "tests" {
            return Some(JobId::Tests);
        }

        let (tag, rest) = id.split_once('.')?;
        let job = match tag {
            "mtest" => JobId::ManualTest {
                path: unescape_str(rest).ok()?,
            },
            "mgen" => {
                let (previous, command) = rest.split_once('.')?;
                let command = unescape_list(command).ok()?;
                if command.first().is_none_or(String::is_empty) {
                    return None;
                }
                JobId::Generate {
                    previous: unescape_str(previous).ok()?,
                    command,
                }
            }
            "comp" => JobId::Compile {
                source: unescape_list(rest).ok()?,
            },
            "val" => {
                let (group, input) = rest.split_once('.')?;
                JobId::Validate {
                    group: unescape_str(group).ok()?,
                    input: unescape_str(input).ok()?,
                }
            }
            "ans" => {
                let (solution, input) = rest.split_once('.')?;
                JobId::Answer {
                    solution: unescape_str(solution).ok()?,
                    input: unescape_str(input).ok()?,
                }
            }
            _ => return None,
        };
        Some(job)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobId::Tests => f.write_str("tests"),
            JobId::ManualTest { path } => write!(f, "mtest.{}", escape_str(path)),
            JobId::Generate { previous, command } => {
                write!(f, "mgen.{}.{}", escape_str(previous), escape_list(command))
            }
            JobId::Compile { source } => write!(f, "comp.{}", escape_list(source)),
            JobId::Validate { group, input } => {
                write!(f, "val.{}.{}", escape_str(group), escape_str(input))
            }
            JobId::Answer { solution, input } => {
                write!(f, "ans.{}.{}", escape_str(solution), escape_str(input))
            }
        }
    }
}

/// Output of one validator run, stored as JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ValidationRecord {
    pub fn is_ok(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Job provider backed by a problem directory
pub(crate) struct ProblemJobs {
    ctx: Arc<ProblemContext>,
}

impl ProblemJobs {
    pub(crate) fn new(ctx: Arc<ProblemContext>) -> Self {
        Self { ctx }
    }
}

impl JobProvider for ProblemJobs {
    fn try_handle(&self, id: &str) -> Option<Box<dyn RunnableJob>> {
        let job = JobId::parse(id)?;
        if let JobId::Answer { solution, .. } = &job
            && self.ctx.config.model_solution.as_deref() != Some(solution.as_str())
        {
            debug!("Not handling {}: answers come from the model solution only", id);
            return None;
        }
        Some(Box::new(ProblemJob {
            ctx: Arc::clone(&self.ctx),
            id: job,
        }))
    }
}

struct ProblemJob {
    ctx: Arc<ProblemContext>,
    id: JobId,
}

impl RunnableJob for ProblemJob {
    fn run(&self, cache: &JobCache) -> Result<Vec<PathBuf>, JobFailure> {
        Ok(execute(&self.ctx, &self.id, cache)?)
    }
}

fn execute(ctx: &ProblemContext, id: &JobId, cache: &JobCache) -> ProblemResult<Vec<PathBuf>> {
    match id {
        JobId::Tests => run_script(ctx),
        JobId::ManualTest { path } => post_manual(ctx, id, path),
        JobId::Generate { previous, command } => generate(ctx, cache, id, previous, command),
        JobId::Compile { source } => compile(ctx, source),
        JobId::Validate { group, input } => validate(ctx, cache, id, group, input),
        JobId::Answer { solution, input } => answer(ctx, cache, id, solution, input),
    }
}

/// Fail with the job's outcome unless it is acceptable
fn require(job: &mut impl JobHelper, what: String, accept_re: bool) -> ProblemResult<()> {
    job.wait();
    let accepted = if accept_re { job.is_ok_or_re() } else { job.is_ok() };
    if accepted {
        return Ok(());
    }
    let err = ProblemError::JobFailed {
        what,
        result: job.result(),
        reason: job.failure_reason(),
    };
    job.release();
    Err(err)
}

fn ensure_parent(path: &Path) -> ProblemResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ProblemError::io(parent, e))?;
    }
    Ok(())
}

/// Copy the job's stdout to `dest`, then release it
fn save_stdout(job: &mut InvocationJob, dest: &Path) -> ProblemResult<()> {
    let saved = job
        .handle()
        .ok_or(JudgeError::NotStarted)
        .and_then(|handle| handle.stdout_path())
        .map_err(ProblemError::from)
        .and_then(|stdout| {
            ensure_parent(dest)?;
            fs::copy(&stdout, dest).map_err(|e| ProblemError::io(dest, e))
        });
    job.release();
    saved.map(|_| ())
}

fn run_script(ctx: &ProblemContext) -> ProblemResult<Vec<PathBuf>> {
    let name = ctx.script.as_deref().ok_or(ProblemError::NoScript)?;
    let path = ctx.home.join(name);
    info!("Running test script {}", path.display());

    let interpreter = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(Interpreter::from_extension);
    let mut job: Box<dyn JobHelper> = match interpreter {
        Some(interpreter) => {
            let mut job = InterpretedJob::new(&ctx.judge, interpreter, ResourceLimits::test_script());
            let _ = job.start(&path, None, &[]);
            Box::new(job)
        }
        None => Box::new(PassthroughJob::adopt(&path)?),
    };

    job.wait();
    if !job.is_ok() {
        let err = ProblemError::JobFailed {
            what: format!("test script {name}"),
            result: job.result(),
            reason: job.failure_reason(),
        };
        job.release();
        return Err(err);
    }
    let output = job.read_stdout();
    job.release();

    let testset = ScriptInterpreter::parse(&output?)?;
    info!("Test script produced {} tests", testset.len());

    let testset_path = ctx.testset_path();
    ensure_parent(&testset_path)?;
    testset.save(&testset_path)?;
    ctx.remember_testset(testset);

    Ok(vec![path])
}

fn post_manual(ctx: &ProblemContext, id: &JobId, path: &str) -> ProblemResult<Vec<PathBuf>> {
    let source = ctx.home.join("tests.manual").join(path);
    if !source.is_file() {
        return Err(ProblemError::MissingSource(source));
    }
    let dest = ctx.data_path(&id.to_string());
    ensure_parent(&dest)?;
    let _ = fs::copy(&source, &dest).map_err(|e| ProblemError::io(&dest, e))?;
    Ok(vec![source])
}

fn compile(ctx: &ProblemContext, parts: &[String]) -> ProblemResult<Vec<PathBuf>> {
    let source: PathBuf = parts.iter().fold(ctx.home.clone(), |path, part| path.join(part));
    if !source.is_file() {
        return Err(ProblemError::MissingSource(source));
    }
    info!("Compiling {}", source.display());

    let mut job = CompilationJob::new(&ctx.judge);
    let _ = job.start(&source);
    job.wait();
    if !job.is_ok() {
        let err = ProblemError::CompilationFailure {
            file: source,
            result: job.result(),
            exit_code: job.exit_code(),
            stderr: job.read_stderr().unwrap_or_default(),
        };
        job.release();
        return Err(err);
    }

    let binary = ctx.compiled_path(parts);
    let fetched = job.fetch(&binary, true);
    job.release();
    fetched?;
    Ok(vec![source])
}

fn generate(
    ctx: &ProblemContext,
    cache: &JobCache,
    id: &JobId,
    previous: &str,
    command: &[String],
) -> ProblemResult<Vec<PathBuf>> {
    let Some((generator, args)) = command.split_first() else {
        return Err(ProblemError::ScriptInvalid("empty generator command".to_string()));
    };

    let stdin = if previous.is_empty() {
        None
    } else {
        let _ = cache.run_job(previous, false)?;
        Some(ctx.data_path(previous))
    };
    let source = ["source", generator.as_str()];
    let _ = cache.run_job(&JobId::compile(&source).to_string(), false)?;
    let binary = ctx.compiled_path(&source);

    let mut job = InvocationJob::new(&ctx.judge, ResourceLimits::generator());
    let _ = job.start(&binary, stdin.as_deref(), args);
    require(&mut job, format!("generator `{}`", command.join(" ")), false)?;
    save_stdout(&mut job, &ctx.data_path(&id.to_string()))?;

    let mut deps = vec![binary];
    deps.extend(stdin);
    Ok(deps)
}

fn validate(
    ctx: &ProblemContext,
    cache: &JobCache,
    id: &JobId,
    group: &str,
    input: &str,
) -> ProblemResult<Vec<PathBuf>> {
    let validator = ctx.validator.as_deref().ok_or(ProblemError::NoValidator)?;
    let source = ["source", validator];
    let _ = cache.run_job(&JobId::compile(&source).to_string(), false)?;
    let binary = ctx.compiled_path(&source);
    let input_path = ctx.data_path(input);

    let args = if group.is_empty() {
        Vec::new()
    } else {
        vec!["--group".to_string(), group.to_string()]
    };
    let mut job = InvocationJob::new(&ctx.judge, ResourceLimits::validator());
    let _ = job.start(&binary, Some(&input_path), &args);
    require(&mut job, format!("validator on {input}"), true)?;

    let record = ValidationRecord {
        stdout: job.read_stdout().unwrap_or_default(),
        stderr: job.read_stderr().unwrap_or_default(),
        exit_code: job.exit_code(),
    };
    job.release();

    let dest = ctx.data_path(&id.to_string());
    ensure_parent(&dest)?;
    fs::write(&dest, serde_json::to_vec(&record)?).map_err(|e| ProblemError::io(&dest, e))?;
    Ok(vec![binary, input_path])
}

fn answer(
    ctx: &ProblemContext,
    cache: &JobCache,
    id: &JobId,
    solution: &str,
    input: &str,
) -> ProblemResult<Vec<PathBuf>> {
    let source = ["solutions", solution];
    let _ = cache.run_job(&JobId::compile(&source).to_string(), false)?;
    let binary = ctx.compiled_path(&source);
    let input_path = ctx.data_path(input);

    let mut job = InvocationJob::new(&ctx.judge, ResourceLimits::model_solution());
    let _ = job.start(&binary, Some(&input_path), &[]);
    require(&mut job, format!("model solution on {input}"), false)?;
    save_stdout(&mut job, &ctx.data_path(&id.to_string()))?;

    Ok(vec![binary, input_path])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_id_strings() {
        assert_eq!(JobId::Tests.to_string(), "tests");
        assert_eq!(
            JobId::ManualTest {
                path: "01.txt".to_string()
            }
            .to_string(),
            "mtest.01_btxt"
        );
        assert_eq!(
            JobId::compile(&["source", "gen.cpp"]).to_string(),
            "comp.source@gen_bcpp"
        );
        assert_eq!(
            JobId::Generate {
                previous: String::new(),
                command: strings(&["gen.cpp", "10"]),
            }
            .to_string(),
            "mgen..gen_bcpp@10"
        );
    }

    #[test]
    fn test_nested_generator_id_parses_back() {
        let first = JobId::Generate {
            previous: String::new(),
            command: strings(&["gen.cpp", "5"]),
        };
        let second = JobId::Generate {
            previous: first.to_string(),
            command: strings(&["shuffle.cpp", "--seed", "1"]),
        };
        let answer = JobId::Answer {
            solution: "main.cpp".to_string(),
            input: second.to_string(),
        };
        let validate = JobId::Validate {
            group: "g_1".to_string(),
            input: second.to_string(),
        };

        for id in [first, second, answer, validate] {
            assert_eq!(JobId::parse(&id.to_string()), Some(id));
        }
    }

    #[test]
    fn test_foreign_ids_are_not_claimed() {
        assert_eq!(JobId::parse("build"), None);
        assert_eq!(JobId::parse("link.foo"), None);
        assert_eq!(JobId::parse("mtest.bad_zescape"), None);
        assert_eq!(JobId::parse("mgen.only"), None);
        assert_eq!(JobId::parse("mgen.."), None);
        assert_eq!(JobId::parse("val.nogroup"), None);
    }

    #[test]
    fn test_validation_record() {
        let record: ValidationRecord =
            serde_json::from_str(r#"{"stdout":"","stderr":"bad n","exit_code":3}"#).unwrap();
        assert!(!record.is_ok());
        assert_eq!(record.stderr, "bad n");

        let record: ValidationRecord =
            serde_json::from_str(r#"{"stdout":"","stderr":"","exit_code":0}"#).unwrap();
        assert!(record.is_ok());
    }
}
