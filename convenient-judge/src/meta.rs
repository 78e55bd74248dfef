//! Sandbox run metadata and result classification
//!
//! The sandbox reports usage as newline-separated `key:value` lines:
//!
//! ```text
//! status:TO
//! time:2.004
//! time-wall:2.113
//! cg-mem:10234
//! killed:1
//! ```
//!
//! Times are seconds (fractional) and become integer milliseconds; memory is
//! kilobytes. Unknown keys are ignored.

use crate::types::{JobOutcome, ResourceLimits, SandboxResult, Usage};
use crate::{JudgeError, JudgeResult};
use serde::{Deserialize, Serialize};

/// Two-letter status code reported by the sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaStatus {
    /// `OK`: exited normally
    Ok,
    /// `TO`: time limit exceeded
    Timeout,
    /// `RE`: nonzero exit code
    RuntimeError,
    /// `SG`: killed by a signal
    Signal,
    /// `XX`: sandbox internal error
    InternalError,
}

impl MetaStatus {
    fn parse(code: &str) -> Option<Self> {
        match code {
            "OK" => Some(Self::Ok),
            "TO" => Some(Self::Timeout),
            "RE" => Some(Self::RuntimeError),
            "SG" => Some(Self::Signal),
            "XX" => Some(Self::InternalError),
            _ => None,
        }
    }
}

/// Parsed sandbox metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunMeta {
    /// Status code; isolate omits it for successful runs
    pub status: Option<MetaStatus>,
    /// CPU time (`time`)
    pub time_ms: Option<u64>,
    /// Wall-clock time (`time-wall`)
    pub wall_ms: Option<u64>,
    /// Peak memory from the control group (`cg-mem`)
    pub memory_kb: Option<u64>,
    /// Peak resident set size (`max-rss`)
    pub max_rss_kb: Option<u64>,
    /// Exit code (`exitcode`)
    pub exit_code: Option<i32>,
    /// Fatal signal (`exitsig`)
    pub exit_signal: Option<i32>,
    /// The sandbox killed the program
    pub killed: bool,
    /// The control group's OOM killer fired
    pub oom_killed: bool,
    /// Free-text explanation from the sandbox
    pub message: Option<String>,
}

impl RunMeta {
    /// Parse `key:value` lines
    pub fn parse(text: &str) -> JudgeResult<Self> {
        let mut meta = Self::default();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| JudgeError::Metadata(format!("line without separator: '{line}'")))?;
            let value = value.trim();

            match key {
                "status" => {
                    meta.status = Some(MetaStatus::parse(value).ok_or_else(|| {
                        JudgeError::Metadata(format!("unknown status '{value}'"))
                    })?);
                }
                "time" => meta.time_ms = Some(parse_seconds(key, value)?),
                "time-wall" => meta.wall_ms = Some(parse_seconds(key, value)?),
                "cg-mem" => meta.memory_kb = Some(parse_number(key, value)?),
                "max-rss" => meta.max_rss_kb = Some(parse_number(key, value)?),
                "exitcode" => meta.exit_code = Some(parse_number(key, value)?),
                "exitsig" => meta.exit_signal = Some(parse_number(key, value)?),
                "killed" => meta.killed = value == "1",
                "cg-oom-killed" => meta.oom_killed = value == "1",
                "message" => meta.message = Some(value.to_string()),
                _ => {}
            }
        }

        Ok(meta)
    }

    /// Best available peak memory figure
    pub fn memory_usage_kb(&self) -> Option<u64> {
        self.memory_kb.or(self.max_rss_kb)
    }
}

fn parse_seconds(key: &str, value: &str) -> JudgeResult<u64> {
    let seconds: f64 = value
        .parse()
        .map_err(|_| JudgeError::Metadata(format!("{key}: not a number: '{value}'")))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(JudgeError::Metadata(format!("{key}: out of range: '{value}'")));
    }
    Ok((seconds * 1000.0).round() as u64)
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> JudgeResult<T> {
    value
        .parse()
        .map_err(|_| JudgeError::Metadata(format!("{key}: not an integer: '{value}'")))
}

/// How to read a timeout where the wall clock killed a process whose CPU time
/// was still inside the grace window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Any kill by the sandbox is a hard time limit
    #[default]
    KillIsHard,
    /// Only CPU time decides between soft and hard
    CpuTimeOnly,
}

/// Turn sandbox metadata into an outcome under the given limits
pub fn classify(meta: &RunMeta, limits: &ResourceLimits, policy: TimeoutPolicy) -> JobOutcome {
    let usage = Usage {
        time_ms: meta.time_ms,
        wall_ms: meta.wall_ms,
        memory_kb: meta.memory_usage_kb(),
    };

    let result = match meta.status {
        None => {
            return JobOutcome {
                usage,
                ..JobOutcome::system_failure("sandbox metadata has no status line")
            };
        }
        Some(MetaStatus::InternalError) => {
            let reason = meta
                .message
                .clone()
                .unwrap_or_else(|| "sandbox internal error".to_string());
            return JobOutcome {
                usage,
                ..JobOutcome::system_failure(reason)
            };
        }
        Some(MetaStatus::Ok) => {
            if exceeds(meta.time_ms, limits.time_ms) {
                SandboxResult::TimeLimitSoft
            } else {
                SandboxResult::Ok
            }
        }
        Some(MetaStatus::RuntimeError | MetaStatus::Signal) => {
            if meta.oom_killed || reaches(usage.memory_kb, limits.memory_kb) {
                SandboxResult::MemoryLimitExceeded
            } else {
                SandboxResult::RuntimeError
            }
        }
        Some(MetaStatus::Timeout) => classify_timeout(meta, limits, policy),
    };

    let exit_code = match (meta.exit_code, meta.status) {
        (Some(code), _) => Some(code),
        (None, Some(MetaStatus::Ok)) => Some(0),
        (None, _) => None,
    };

    JobOutcome {
        result,
        usage,
        exit_code,
        failure_reason: meta.message.clone(),
    }
}

fn classify_timeout(meta: &RunMeta, limits: &ResourceLimits, policy: TimeoutPolicy) -> SandboxResult {
    if reaches(meta.time_ms, limits.effective_hard_time_ms()) {
        return SandboxResult::TimeLimitHard;
    }

    let killed = meta.killed || reaches(meta.wall_ms, limits.wall_time_ms);
    match policy {
        TimeoutPolicy::KillIsHard if killed => SandboxResult::TimeLimitHard,
        TimeoutPolicy::CpuTimeOnly if meta.time_ms.is_none() => SandboxResult::TimeLimitHard,
        _ => SandboxResult::TimeLimitSoft,
    }
}

fn reaches(used: Option<u64>, limit: Option<u64>) -> bool {
    matches!((used, limit), (Some(used), Some(limit)) if used >= limit)
}

fn exceeds(used: Option<u64>, limit: Option<u64>) -> bool {
    matches!((used, limit), (Some(used), Some(limit)) if used > limit)
}
