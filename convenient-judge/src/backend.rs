//! Sandboxing backends
//!
//! A backend owns numbered slots. Each job re-initialises a slot, runs one
//! command in it and reports [`RunMeta`]. Two backends ship:
//!
//! - [`IsolateBackend`](crate::IsolateBackend): the `isolate` utility
//!   (recommended; enforces CPU, memory and process limits)
//! - [`BasicBackend`]: directory isolation only, wall-clock limit enforced by
//!   polling. ⚠️ No real security, for development only

use crate::meta::{MetaStatus, RunMeta};
use crate::types::{ResourceLimits, SandboxEnvironment};
use crate::JudgeResult;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One command to run in an initialised slot
#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    /// Directory that is the sandbox's working directory
    pub box_dir: &'a Path,
    /// Program and arguments
    pub command: &'a [String],
    /// Limits to enforce
    pub limits: &'a ResourceLimits,
    /// Files and directory binds; files are already copied
    pub env: &'a SandboxEnvironment,
    /// Stdin file, relative to `box_dir`
    pub stdin: Option<&'a str>,
    /// Stdout file, relative to `box_dir`
    pub stdout: &'a str,
    /// Stderr file, relative to `box_dir`
    pub stderr: &'a str,
}

/// A process-isolation mechanism
pub trait SandboxBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Reset `slot` and return its (empty) working directory
    fn init_slot(&self, slot: u32) -> JudgeResult<PathBuf>;

    /// Run the request to completion
    ///
    /// Program failures are reported through the metadata; `Err` means the
    /// sandbox itself could not do its job.
    fn run(&self, slot: u32, request: &RunRequest<'_>) -> JudgeResult<RunMeta>;

    /// Tear down `slot`
    fn cleanup_slot(&self, slot: u32) -> JudgeResult<()>;
}

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Unisolated fallback backend
#[derive(Debug, Clone)]
pub struct BasicBackend {
    root: PathBuf,
}

impl BasicBackend {
    /// Slots live in `root/<slot>/box`
    pub fn new(root: impl Into<PathBuf>) -> JudgeResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        warn!("⚠️  Using basic sandbox - NO REAL ISOLATION");
        Ok(Self { root })
    }

    fn slot_dir(&self, slot: u32) -> PathBuf {
        self.root.join(slot.to_string())
    }
}

impl SandboxBackend for BasicBackend {
    fn name(&self) -> &'static str {
        "basic"
    }

    fn init_slot(&self, slot: u32) -> JudgeResult<PathBuf> {
        self.cleanup_slot(slot)?;
        let box_dir = self.slot_dir(slot).join("box");
        fs::create_dir_all(&box_dir)?;
        Ok(box_dir)
    }

    fn run(&self, _slot: u32, request: &RunRequest<'_>) -> JudgeResult<RunMeta> {
        let Some((program, args)) = request.command.split_first() else {
            return Ok(RunMeta {
                status: Some(MetaStatus::InternalError),
                message: Some("empty command".to_string()),
                ..RunMeta::default()
            });
        };

        for (host, virtual_path) in request.env.dirs() {
            let link = request
                .box_dir
                .join(virtual_path.strip_prefix("/").unwrap_or(virtual_path));
            if let Some(parent) = link.parent() {
                fs::create_dir_all(parent)?;
            }
            std::os::unix::fs::symlink(host, &link)?;
        }

        let stdin = match request.stdin {
            Some(name) => Stdio::from(File::open(request.box_dir.join(name))?),
            None => Stdio::null(),
        };

        let mut cmd = Command::new(resolve_program(request.box_dir, program));
        cmd.args(args)
            .current_dir(request.box_dir)
            .env_clear()
            .env("PATH", "/usr/bin:/bin")
            .env("HOME", request.box_dir)
            .stdin(stdin)
            .stdout(File::create(request.box_dir.join(request.stdout))?)
            .stderr(File::create(request.box_dir.join(request.stderr))?);

        debug!("Executing with basic sandbox: {:?}", cmd);

        let start = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Ok(RunMeta {
                    status: Some(MetaStatus::RuntimeError),
                    time_ms: Some(0),
                    wall_ms: Some(0),
                    message: Some(format!("failed to start {program}: {e}")),
                    ..RunMeta::default()
                });
            }
        };

        let deadline = request.limits.wall_time_ms.map(Duration::from_millis);
        let mut killed = false;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if deadline.is_some_and(|deadline| start.elapsed() >= deadline) {
                let _ = child.kill();
                killed = true;
                break child.wait()?;
            }
            std::thread::sleep(POLL_INTERVAL);
        };
        let elapsed = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut meta = RunMeta {
            time_ms: Some(elapsed),
            wall_ms: Some(elapsed),
            killed,
            exit_code: status.code(),
            exit_signal: std::os::unix::process::ExitStatusExt::signal(&status),
            ..RunMeta::default()
        };
        meta.status = Some(if killed {
            MetaStatus::Timeout
        } else if status.success() {
            MetaStatus::Ok
        } else if meta.exit_signal.is_some() {
            MetaStatus::Signal
        } else {
            MetaStatus::RuntimeError
        });
        Ok(meta)
    }

    fn cleanup_slot(&self, slot: u32) -> JudgeResult<()> {
        let dir = self.slot_dir(slot);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

/// Relative program paths with a separator are resolved against the box
fn resolve_program(box_dir: &Path, program: &str) -> PathBuf {
    let path = Path::new(program);
    if path.is_relative() && program.contains('/') {
        box_dir.join(path)
    } else {
        path.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn run(backend: &BasicBackend, command: &[&str], limits: &ResourceLimits, stdin: Option<&str>) -> (PathBuf, RunMeta) {
        let box_dir = backend.init_slot(0).unwrap();
        if let Some(data) = stdin {
            fs::write(box_dir.join(".stdin"), data).unwrap();
        }
        let command: Vec<String> = command.iter().map(|s| s.to_string()).collect();
        let env = SandboxEnvironment::new();
        let meta = backend
            .run(
                0,
                &RunRequest {
                    box_dir: &box_dir,
                    command: &command,
                    limits,
                    env: &env,
                    stdin: stdin.map(|_| ".stdin"),
                    stdout: ".stdout",
                    stderr: ".stderr",
                },
            )
            .unwrap();
        (box_dir, meta)
    }

    #[test]
    fn test_basic_stdin_to_stdout() {
        let tmp = TempDir::new().unwrap();
        let backend = BasicBackend::new(tmp.path()).unwrap();
        let (box_dir, meta) = run(&backend, &["/bin/cat"], &ResourceLimits::generator(), Some("1 2\n"));

        assert_eq!(meta.status, Some(MetaStatus::Ok));
        assert_eq!(meta.exit_code, Some(0));
        assert_eq!(fs::read_to_string(box_dir.join(".stdout")).unwrap(), "1 2\n");
    }

    #[test]
    fn test_basic_nonzero_exit() {
        let tmp = TempDir::new().unwrap();
        let backend = BasicBackend::new(tmp.path()).unwrap();
        let (_, meta) = run(&backend, &["/bin/sh", "-c", "exit 3"], &ResourceLimits::generator(), None);

        assert_eq!(meta.status, Some(MetaStatus::RuntimeError));
        assert_eq!(meta.exit_code, Some(3));
    }

    #[test]
    fn test_basic_wall_clock_kill() {
        let tmp = TempDir::new().unwrap();
        let backend = BasicBackend::new(tmp.path()).unwrap();
        let limits = ResourceLimits {
            wall_time_ms: Some(200),
            ..Default::default()
        };
        let (_, meta) = run(&backend, &["/bin/sleep", "5"], &limits, None);

        assert_eq!(meta.status, Some(MetaStatus::Timeout));
        assert!(meta.killed);
        assert!(meta.wall_ms.unwrap() < 5000);
    }

    #[test]
    fn test_basic_missing_program() {
        let tmp = TempDir::new().unwrap();
        let backend = BasicBackend::new(tmp.path()).unwrap();
        let (_, meta) = run(&backend, &["./does-not-exist"], &ResourceLimits::generator(), None);

        assert_eq!(meta.status, Some(MetaStatus::RuntimeError));
        assert!(meta.message.is_some());
    }

    #[test]
    fn test_init_slot_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let backend = BasicBackend::new(tmp.path()).unwrap();
        let box_dir = backend.init_slot(3).unwrap();
        fs::write(box_dir.join("leftover"), "x").unwrap();

        let box_dir = backend.init_slot(3).unwrap();
        assert!(!box_dir.join("leftover").exists());
    }
}
