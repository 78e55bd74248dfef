//! Core types for sandboxed jobs

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_MEMORY_KB: u64 = 256_000;

/// Resource ceilings for one sandboxed run
///
/// Every field is optional; an absent field means "no limit from us" (the
/// sandbox default applies). `hard_time_ms` is the point where the process is
/// killed, `time_ms` the soft limit past which the run counts as too slow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Soft CPU time limit
    pub time_ms: Option<u64>,
    /// CPU time at which the process is killed
    pub hard_time_ms: Option<u64>,
    /// Wall-clock limit
    pub wall_time_ms: Option<u64>,
    /// Memory ceiling in kilobytes
    pub memory_kb: Option<u64>,
    /// Maximum number of processes/threads
    pub processes: Option<u32>,
}

impl ResourceLimits {
    /// No limits at all
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Compiler runs
    pub fn compilation() -> Self {
        Self {
            time_ms: Some(30_000),
            hard_time_ms: None,
            wall_time_ms: Some(45_000),
            memory_kb: Some(DEFAULT_MEMORY_KB),
            processes: Some(4),
        }
    }

    /// Test generators
    pub fn generator() -> Self {
        Self {
            time_ms: Some(5_000),
            hard_time_ms: None,
            wall_time_ms: Some(10_000),
            memory_kb: Some(DEFAULT_MEMORY_KB),
            processes: Some(1),
        }
    }

    /// Input validators
    pub fn validator() -> Self {
        Self::generator()
    }

    /// Output checkers
    pub fn checker() -> Self {
        Self::generator()
    }

    /// Model solution producing reference answers
    pub fn model_solution() -> Self {
        Self {
            time_ms: Some(15_000),
            hard_time_ms: None,
            wall_time_ms: Some(30_000),
            memory_kb: Some(DEFAULT_MEMORY_KB),
            processes: Some(1),
        }
    }

    /// Test script producing the test list
    pub fn test_script() -> Self {
        Self {
            time_ms: Some(500),
            hard_time_ms: None,
            wall_time_ms: Some(5_000),
            memory_kb: Some(64_000),
            processes: Some(4),
        }
    }

    /// Contestant solution under the problem's limits
    pub fn for_solution(
        time_limit_ms: u64,
        memory_limit_kb: u64,
        hard_multiplier: u64,
        wall_multiplier: u64,
    ) -> Self {
        Self {
            time_ms: Some(time_limit_ms),
            hard_time_ms: Some(time_limit_ms.saturating_mul(hard_multiplier.max(1))),
            wall_time_ms: Some(time_limit_ms.saturating_mul(wall_multiplier.max(1))),
            memory_kb: Some(memory_limit_kb),
            processes: Some(1),
        }
    }

    /// CPU time at which the process gets killed
    pub fn effective_hard_time_ms(&self) -> Option<u64> {
        match (self.hard_time_ms, self.time_ms) {
            (Some(hard), Some(soft)) => Some(hard.max(soft)),
            (hard, soft) => hard.or(soft),
        }
    }
}

/// Something made visible inside the sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bind {
    /// Host file copied into the sandbox working directory
    File {
        /// File on the host
        host: PathBuf,
        /// Path relative to the working directory
        virtual_path: PathBuf,
        /// Make the copy executable (0755)
        executable: bool,
    },
    /// Host directory mounted at a path inside the sandbox
    Dir {
        /// Directory on the host
        host: PathBuf,
        /// Mount point inside the sandbox
        virtual_path: PathBuf,
    },
}

/// Files and directories a job needs, in the order they were added
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxEnvironment {
    binds: Vec<Bind>,
}

impl SandboxEnvironment {
    /// Environment with nothing staged
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `host` to `virtual_path` (relative to the working directory)
    pub fn add_file(&mut self, host: impl Into<PathBuf>, virtual_path: impl Into<PathBuf>) -> &mut Self {
        self.binds.push(Bind::File {
            host: host.into(),
            virtual_path: virtual_path.into(),
            executable: false,
        });
        self
    }

    /// Like [`add_file`](Self::add_file) but marks the copy executable
    pub fn add_executable(
        &mut self,
        host: impl Into<PathBuf>,
        virtual_path: impl Into<PathBuf>,
    ) -> &mut Self {
        self.binds.push(Bind::File {
            host: host.into(),
            virtual_path: virtual_path.into(),
            executable: true,
        });
        self
    }

    /// Mount the host directory `host` at `virtual_path`
    pub fn add_dir(&mut self, host: impl Into<PathBuf>, virtual_path: impl Into<PathBuf>) -> &mut Self {
        self.binds.push(Bind::Dir {
            host: host.into(),
            virtual_path: virtual_path.into(),
        });
        self
    }

    /// Everything staged, in insertion order
    pub fn binds(&self) -> &[Bind] {
        &self.binds
    }

    /// Directory binds as `(host, virtual_path)`
    pub fn dirs(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.binds.iter().filter_map(|bind| match bind {
            Bind::Dir { host, virtual_path } => Some((host.as_path(), virtual_path.as_path())),
            Bind::File { .. } => None,
        })
    }

    /// Nothing staged
    pub fn is_empty(&self) -> bool {
        self.binds.is_empty()
    }
}

/// How a sandboxed run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SandboxResult {
    /// Exited with code 0 inside every limit
    Ok,
    /// Exceeded the soft time limit but stayed inside the hard one
    TimeLimitSoft,
    /// Killed for exceeding the hard CPU or wall-clock limit
    TimeLimitHard,
    /// Nonzero exit or fatal signal
    RuntimeError,
    /// Hit the memory ceiling
    MemoryLimitExceeded,
    /// The sandbox itself failed; says nothing about the program
    SystemFailure,
}

impl SandboxResult {
    /// Exited cleanly inside every limit
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// OK or a plain runtime error (validators signal rejection by exit code)
    pub fn is_ok_or_re(self) -> bool {
        matches!(self, Self::Ok | Self::RuntimeError)
    }

    /// The program ran to completion (possibly over the soft limit)
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Ok | Self::TimeLimitSoft)
    }

    /// Short code used in logs
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::TimeLimitSoft => "TL",
            Self::TimeLimitHard => "TL_HARD",
            Self::RuntimeError => "RE",
            Self::MemoryLimitExceeded => "ML",
            Self::SystemFailure => "FL",
        }
    }
}

impl std::fmt::Display for SandboxResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Measured resource usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// CPU time in milliseconds
    pub time_ms: Option<u64>,
    /// Wall-clock time in milliseconds
    pub wall_ms: Option<u64>,
    /// Peak memory in kilobytes
    pub memory_kb: Option<u64>,
}

/// Everything known about a finished job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    /// Classified result
    pub result: SandboxResult,
    /// Measured usage
    pub usage: Usage,
    /// Exit code, if the program exited
    pub exit_code: Option<i32>,
    /// Diagnostic text for system failures (and sandbox messages otherwise)
    pub failure_reason: Option<String>,
}

impl JobOutcome {
    /// Outcome of a job the sandbox could not run
    pub fn system_failure(reason: impl Into<String>) -> Self {
        Self {
            result: SandboxResult::SystemFailure,
            usage: Usage::default(),
            exit_code: None,
            failure_reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solution_limits_derived_from_problem() {
        let limits = ResourceLimits::for_solution(1000, 262_144, 2, 4);
        assert_eq!(limits.time_ms, Some(1000));
        assert_eq!(limits.hard_time_ms, Some(2000));
        assert_eq!(limits.wall_time_ms, Some(4000));
        assert_eq!(limits.memory_kb, Some(262_144));
        assert_eq!(limits.processes, Some(1));
    }

    #[test]
    fn test_presets() {
        let compile = ResourceLimits::compilation();
        assert_eq!(compile.time_ms, Some(30_000));
        assert_eq!(compile.wall_time_ms, Some(45_000));
        assert_eq!(compile.memory_kb, Some(256_000));
        assert_eq!(compile.processes, Some(4));

        let generator = ResourceLimits::generator();
        assert_eq!(generator.time_ms, Some(5_000));
        assert_eq!(generator.wall_time_ms, Some(10_000));
        assert_eq!(ResourceLimits::validator(), generator);

        assert_eq!(ResourceLimits::model_solution().time_ms, Some(15_000));
    }

    #[test]
    fn test_effective_hard_time() {
        assert_eq!(ResourceLimits::generator().effective_hard_time_ms(), Some(5_000));
        let limits = ResourceLimits {
            time_ms: Some(1000),
            hard_time_ms: Some(500),
            ..Default::default()
        };
        assert_eq!(limits.effective_hard_time_ms(), Some(1000));
        assert_eq!(ResourceLimits::unlimited().effective_hard_time_ms(), None);
    }

    #[test]
    fn test_result_predicates() {
        assert!(SandboxResult::RuntimeError.is_ok_or_re());
        assert!(!SandboxResult::TimeLimitSoft.is_ok_or_re());
        assert!(SandboxResult::TimeLimitSoft.is_complete());
        assert!(!SandboxResult::TimeLimitHard.is_complete());
    }

    #[test]
    fn test_environment_keeps_order() {
        let mut env = SandboxEnvironment::new();
        env.add_file("/tmp/in", "input")
            .add_dir("/usr/share/dict", "/dict")
            .add_executable("/tmp/check", "check");

        assert_eq!(env.binds().len(), 3);
        let dirs: Vec<_> = env.dirs().collect();
        assert_eq!(dirs, vec![(Path::new("/usr/share/dict"), Path::new("/dict"))]);
        assert!(matches!(env.binds()[2], Bind::File { executable: true, .. }));
    }
}
