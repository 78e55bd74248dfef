//! Job helper adapters
//!
//! Each helper stages the files one kind of job needs, picks the limits for
//! it and submits it to the judge. All of them (and the judge-free
//! [`PassthroughJob`]) answer through the same [`JobHelper`] surface so
//! callers can hold whichever one a situation calls for.

use crate::config::Toolchain;
use crate::judge::{JobHandle, JobRequest, JudgeHandle};
use crate::types::{ResourceLimits, SandboxEnvironment, SandboxResult};
use crate::{JudgeError, JudgeResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the staged C++ source inside the sandbox
pub const SOURCE_FILE: &str = "source.cpp";
/// Name of the compiler output inside the sandbox
pub const BINARY_FILE: &str = "source";
/// Name of a staged executable inside the sandbox
pub const PROGRAM_FILE: &str = "prog";

/// Uniform view over a started job
pub trait JobHelper {
    /// The job finished (or never needed the judge)
    fn is_ready(&self) -> bool;

    /// The job is executing in a sandbox right now
    fn is_running(&self) -> bool;

    /// Block until finished
    fn wait(&self);

    /// Classified result; SystemFailure while not started
    fn result(&self) -> SandboxResult;

    /// Finished with [`SandboxResult::Ok`]
    fn is_ok(&self) -> bool {
        self.result().is_ok()
    }

    /// Finished with OK or a runtime error
    fn is_ok_or_re(&self) -> bool {
        self.result().is_ok_or_re()
    }

    /// Exit code of the program, if it exited
    fn exit_code(&self) -> Option<i32>;

    /// CPU time in milliseconds
    fn time_usage(&self) -> Option<u64>;

    /// Wall-clock time in milliseconds
    fn wall_usage(&self) -> Option<u64>;

    /// Peak memory in kilobytes
    fn mem_usage(&self) -> Option<u64>;

    /// Standard output of the program
    fn read_stdout(&self) -> JudgeResult<String>;

    /// Standard error of the program
    fn read_stderr(&self) -> JudgeResult<String>;

    /// Why the sandbox failed, when it did
    fn failure_reason(&self) -> Option<String>;

    /// Discard sandbox artifacts
    fn release(&mut self);
}

/// Staging area plus the handle once submitted
struct SandboxedJob {
    judge: JudgeHandle,
    env: SandboxEnvironment,
    limits: ResourceLimits,
    callback: Option<crate::CompletionCallback>,
    job: Option<JobHandle>,
}

impl SandboxedJob {
    fn new(judge: &JudgeHandle, limits: ResourceLimits) -> Self {
        Self {
            judge: judge.clone(),
            env: SandboxEnvironment::new(),
            limits,
            callback: None,
            job: None,
        }
    }

    fn submit(&mut self, command: Vec<String>, stdin: Option<&Path>, label: String) -> JobHandle {
        let mut request = JobRequest::new(command)
            .env(std::mem::take(&mut self.env))
            .limits(self.limits.clone())
            .label(label);
        if let Some(stdin) = stdin {
            request = request.stdin(stdin);
        }
        if let Some(callback) = self.callback.take() {
            request = request.on_complete(callback);
        }

        let handle = self.judge.new_job(request);
        self.job = Some(handle.clone());
        handle
    }

    fn job(&self) -> JudgeResult<&JobHandle> {
        self.job.as_ref().ok_or(JudgeError::NotStarted)
    }
}

impl JobHelper for SandboxedJob {
    fn is_ready(&self) -> bool {
        self.job.as_ref().is_some_and(JobHandle::is_ready)
    }

    fn is_running(&self) -> bool {
        self.job.as_ref().is_some_and(JobHandle::is_running)
    }

    fn wait(&self) {
        if let Some(job) = &self.job {
            let _ = job.wait();
        }
    }

    fn result(&self) -> SandboxResult {
        self.job
            .as_ref()
            .map_or(SandboxResult::SystemFailure, JobHandle::result)
    }

    fn exit_code(&self) -> Option<i32> {
        self.job.as_ref().and_then(JobHandle::exit_code)
    }

    fn time_usage(&self) -> Option<u64> {
        self.job.as_ref().and_then(JobHandle::time_usage)
    }

    fn wall_usage(&self) -> Option<u64> {
        self.job.as_ref().and_then(JobHandle::wall_usage)
    }

    fn mem_usage(&self) -> Option<u64> {
        self.job.as_ref().and_then(JobHandle::mem_usage)
    }

    fn read_stdout(&self) -> JudgeResult<String> {
        self.job()?.read_stdout()
    }

    fn read_stderr(&self) -> JudgeResult<String> {
        self.job()?.read_stderr()
    }

    fn failure_reason(&self) -> Option<String> {
        match &self.job {
            Some(job) => job.failure_reason(),
            None => Some("job not started".to_string()),
        }
    }

    fn release(&mut self) {
        if let Some(job) = &self.job {
            job.release();
        }
    }
}

macro_rules! delegate_job_helper {
    ($($helper:ty),* $(,)?) => {$(
        impl JobHelper for $helper {
            fn is_ready(&self) -> bool { self.inner.is_ready() }
            fn is_running(&self) -> bool { self.inner.is_running() }
            fn wait(&self) { self.inner.wait() }
            fn result(&self) -> SandboxResult { self.inner.result() }
            fn exit_code(&self) -> Option<i32> { self.inner.exit_code() }
            fn time_usage(&self) -> Option<u64> { self.inner.time_usage() }
            fn wall_usage(&self) -> Option<u64> { self.inner.wall_usage() }
            fn mem_usage(&self) -> Option<u64> { self.inner.mem_usage() }
            fn read_stdout(&self) -> JudgeResult<String> { self.inner.read_stdout() }
            fn read_stderr(&self) -> JudgeResult<String> { self.inner.read_stderr() }
            fn failure_reason(&self) -> Option<String> { self.inner.failure_reason() }
            fn release(&mut self) { self.inner.release() }
        }

        impl $helper {
            /// Stage an extra host file at `virtual_path`
            pub fn add_file(
                &mut self,
                host: impl Into<PathBuf>,
                virtual_path: impl Into<PathBuf>,
            ) -> &mut Self {
                let _ = self.inner.env.add_file(host, virtual_path);
                self
            }

            /// Run `callback` on the judge worker when the job finishes
            pub fn on_complete(
                &mut self,
                callback: impl FnOnce(&JobHandle) + Send + 'static,
            ) -> &mut Self {
                self.inner.callback = Some(Box::new(callback));
                self
            }

            /// Handle of the submitted job
            pub fn handle(&self) -> Option<&JobHandle> {
                self.inner.job.as_ref()
            }
        }
    )*};
}

delegate_job_helper!(CompilationJob, InvocationJob, InterpretedJob);

/// Compile a C++ source with the configured toolchain
pub struct CompilationJob {
    inner: SandboxedJob,
}

impl CompilationJob {
    /// Compilation under [`ResourceLimits::compilation`]
    pub fn new(judge: &JudgeHandle) -> Self {
        Self {
            inner: SandboxedJob::new(judge, ResourceLimits::compilation()),
        }
    }

    /// Override the compilation limits
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.inner.limits = limits;
        self
    }

    /// Stage `source` as `source.cpp` and submit the compiler
    pub fn start(&mut self, source: &Path) -> JobHandle {
        let _ = self.inner.env.add_file(source, SOURCE_FILE);
        let mut command = self.inner.judge.config().toolchain.cxx.clone();
        command.extend([SOURCE_FILE, "-o", BINARY_FILE].map(String::from));
        self.inner
            .submit(command, None, format!("compile {}", source.display()))
    }

    /// Copy the produced binary to `dest`
    pub fn fetch(&self, dest: &Path, executable: bool) -> JudgeResult<()> {
        let binary = self.inner.job()?.artifact_path(BINARY_FILE)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let _ = fs::copy(&binary, dest)?;
        if executable {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dest, fs::Permissions::from_mode(0o755))?;
        }
        Ok(())
    }
}

/// Run a compiled executable
pub struct InvocationJob {
    inner: SandboxedJob,
}

impl InvocationJob {
    /// Run a compiled program under `limits`
    pub fn new(judge: &JudgeHandle, limits: ResourceLimits) -> Self {
        Self {
            inner: SandboxedJob::new(judge, limits),
        }
    }

    /// Stage `executable` as `prog` and submit `./prog args`
    pub fn start(&mut self, executable: &Path, stdin: Option<&Path>, args: &[String]) -> JobHandle {
        let _ = self.inner.env.add_executable(executable, PROGRAM_FILE);
        let mut command = vec![format!("./{PROGRAM_FILE}")];
        command.extend(args.iter().cloned());
        self.inner
            .submit(command, stdin, format!("run {}", executable.display()))
    }
}

/// Script languages run through an interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpreter {
    /// Python 3 (`.py`)
    Python3,
    /// Bash (`.sh`)
    Bash,
}

impl Interpreter {
    /// Pick by file extension (`py`, `sh`)
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "py" => Some(Self::Python3),
            "sh" => Some(Self::Bash),
            _ => None,
        }
    }

    fn script_name(self) -> &'static str {
        match self {
            Self::Python3 => "prog.py",
            Self::Bash => "prog.sh",
        }
    }

    fn binary(self, toolchain: &Toolchain) -> String {
        match self {
            Self::Python3 => toolchain.python.clone(),
            Self::Bash => toolchain.bash.clone(),
        }
    }
}

/// Run a script through its interpreter
pub struct InterpretedJob {
    inner: SandboxedJob,
    interpreter: Interpreter,
}

impl InterpretedJob {
    /// Run scripts through `interpreter` under `limits`
    pub fn new(judge: &JudgeHandle, interpreter: Interpreter, limits: ResourceLimits) -> Self {
        Self {
            inner: SandboxedJob::new(judge, limits),
            interpreter,
        }
    }

    /// Stage `script` and submit the interpreter on it
    pub fn start(&mut self, script: &Path, stdin: Option<&Path>, args: &[String]) -> JobHandle {
        let name = self.interpreter.script_name();
        let _ = self.inner.env.add_file(script, name);
        let mut command = vec![
            self.interpreter.binary(&self.inner.judge.config().toolchain),
            name.to_string(),
        ];
        command.extend(args.iter().cloned());
        self.inner
            .submit(command, stdin, format!("interpret {}", script.display()))
    }
}

/// Already-finished job that never touches the judge
///
/// Used to adopt content as-is, e.g. a plain-text test script whose
/// "output" is its own text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassthroughJob {
    stdout: String,
}

impl PassthroughJob {
    /// Finished job whose stdout is `stdout`
    pub fn new(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
        }
    }

    /// Use a file's content as the job's stdout
    pub fn adopt(path: &Path) -> JudgeResult<Self> {
        Ok(Self::new(fs::read_to_string(path)?))
    }
}

impl JobHelper for PassthroughJob {
    fn is_ready(&self) -> bool {
        true
    }

    fn is_running(&self) -> bool {
        false
    }

    fn wait(&self) {}

    fn result(&self) -> SandboxResult {
        SandboxResult::Ok
    }

    fn exit_code(&self) -> Option<i32> {
        Some(0)
    }

    fn time_usage(&self) -> Option<u64> {
        None
    }

    fn wall_usage(&self) -> Option<u64> {
        None
    }

    fn mem_usage(&self) -> Option<u64> {
        None
    }

    fn read_stdout(&self) -> JudgeResult<String> {
        Ok(self.stdout.clone())
    }

    fn read_stderr(&self) -> JudgeResult<String> {
        Ok(String::new())
    }

    fn failure_reason(&self) -> Option<String> {
        None
    }

    fn release(&mut self) {}
}
