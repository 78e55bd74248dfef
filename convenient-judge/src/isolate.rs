//! Backend driving the `isolate` sandbox utility
//!
//! Per slot (`--box-id`) the backend runs `--cleanup` then `--init`, which
//! prints the slot directory; the program's working directory is its `box/`
//! subdirectory. Runs write metadata to stdout (`--meta=/dev/stdout`) while
//! the program's own streams are redirected to files inside the box.

use crate::backend::{RunRequest, SandboxBackend};
use crate::meta::{MetaStatus, RunMeta};
use crate::{JudgeError, JudgeResult};
use std::path::PathBuf;
use std::process::{Command, Output};
use tracing::{debug, instrument, warn};

/// `isolate` driven through its command line
#[derive(Debug, Clone)]
pub struct IsolateBackend {
    binary: PathBuf,
    cgroups: bool,
}

impl IsolateBackend {
    /// Drive `binary`, with control groups when `cgroups` is set
    pub fn new(binary: impl Into<PathBuf>, cgroups: bool) -> Self {
        Self {
            binary: binary.into(),
            cgroups,
        }
    }

    fn slot_args(&self, slot: u32) -> Vec<String> {
        let mut args = Vec::new();
        if self.cgroups {
            args.push("--cg".to_string());
        }
        args.push(format!("--box-id={slot}"));
        args
    }

    /// Full argument vector for a run (everything after the binary name)
    pub fn run_args(&self, slot: u32, request: &RunRequest<'_>) -> Vec<String> {
        let mut args = vec![
            "--run".to_string(),
            "--meta=/dev/stdout".to_string(),
            "-s".to_string(),
        ];
        if self.cgroups {
            args.push("--cg".to_string());
            args.push("--cg-timing".to_string());
        }
        args.push(format!("--box-id={slot}"));

        if let Some(stdin) = request.stdin {
            args.push(format!("--stdin={stdin}"));
        }
        args.push(format!("--stdout={}", request.stdout));
        args.push(format!("--stderr={}", request.stderr));

        let limits = request.limits;
        if let Some(processes) = limits.processes {
            args.push(format!("--processes={processes}"));
        }
        if let Some(memory) = limits.memory_kb {
            if self.cgroups {
                args.push(format!("--cg-mem={memory}"));
            } else {
                args.push(format!("--mem={memory}"));
            }
        }
        if let Some(time) = limits.time_ms {
            args.push(format!("--time={}", format_seconds(time)));
            if let Some(hard) = limits.effective_hard_time_ms()
                && hard > time
            {
                args.push(format!("--extra-time={}", format_seconds(hard - time)));
            }
        }
        if let Some(wall) = limits.wall_time_ms {
            args.push(format!("--wall-time={}", format_seconds(wall)));
        }

        for (host, virtual_path) in request.env.dirs() {
            args.push(format!("--dir={}={}", virtual_path.display(), host.display()));
        }
        args.push("--env=PATH=/usr/bin:/bin".to_string());

        args.push("--".to_string());
        args.extend(request.command.iter().cloned());
        args
    }

    fn invoke(&self, args: &[String]) -> JudgeResult<Output> {
        debug!("Executing isolate: {} {}", self.binary.display(), args.join(" "));
        Command::new(&self.binary).args(args).output().map_err(|e| {
            JudgeError::Backend(format!("failed to execute {}: {e}", self.binary.display()))
        })
    }
}

impl SandboxBackend for IsolateBackend {
    fn name(&self) -> &'static str {
        "isolate"
    }

    #[instrument(skip(self))]
    fn init_slot(&self, slot: u32) -> JudgeResult<PathBuf> {
        if let Err(e) = self.cleanup_slot(slot) {
            warn!("Cleanup before init of slot {} failed: {}", slot, e);
        }

        let mut args = self.slot_args(slot);
        args.push("--init".to_string());
        let output = self.invoke(&args)?;
        if !output.status.success() {
            return Err(JudgeError::Backend(format!(
                "isolate --init failed for slot {slot}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if root.is_empty() {
            return Err(JudgeError::Backend(format!(
                "isolate --init printed no directory for slot {slot}"
            )));
        }
        Ok(PathBuf::from(root).join("box"))
    }

    fn run(&self, slot: u32, request: &RunRequest<'_>) -> JudgeResult<RunMeta> {
        let output = self.invoke(&self.run_args(slot, request))?;

        // 0: program succeeded, 1: program failed; anything else is isolate's own failure.
        match output.status.code() {
            Some(0 | 1) => {}
            code => {
                return Err(JudgeError::Backend(format!(
                    "isolate --run exited with {code:?}: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
        }

        let mut meta = RunMeta::parse(&String::from_utf8_lossy(&output.stdout))?;
        if meta.status.is_none() && output.status.success() {
            meta.status = Some(MetaStatus::Ok);
        }
        Ok(meta)
    }

    fn cleanup_slot(&self, slot: u32) -> JudgeResult<()> {
        let mut args = self.slot_args(slot);
        args.push("--cleanup".to_string());
        let output = self.invoke(&args)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(JudgeError::Backend(format!(
                "isolate --cleanup failed for slot {slot}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// Milliseconds as `S.mmm`
fn format_seconds(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}
