//! Problem manifest (`problem.yml`)

use crate::problem::{ProblemError, ProblemResult};
use convenient_judge::{JudgeConfig, ResourceLimits};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// File name of the manifest in a problem's home directory
pub const PROBLEM_FILE: &str = "problem.yml";

/// A duration given in seconds with at most millisecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSeconds", into = "String")]
pub struct Millis(pub u64);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSeconds {
    Int(u64),
    Float(f64),
    Text(String),
}

impl TryFrom<RawSeconds> for Millis {
    type Error = String;

    fn try_from(raw: RawSeconds) -> Result<Self, Self::Error> {
        let text = match raw {
            RawSeconds::Int(secs) => return Ok(Millis(secs.saturating_mul(1000))),
            RawSeconds::Float(secs) => secs.to_string(),
            RawSeconds::Text(text) => text,
        };
        parse_millis(&text)
            .map(Millis)
            .ok_or_else(|| format!("bad time specification \"{text}\""))
    }
}

impl From<Millis> for String {
    fn from(value: Millis) -> Self {
        format!("{}.{:03}", value.0 / 1000, value.0 % 1000)
    }
}

/// Parse `S[.mmm]` seconds into milliseconds
///
/// More than three fractional digits, signs and empty input are rejected.
pub fn parse_millis(text: &str) -> Option<u64> {
    let text = text.trim();
    let (whole, fraction) = text.split_once('.').unwrap_or((text, ""));
    if (whole.is_empty() && fraction.is_empty()) || fraction.len() > 3 {
        return None;
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !all_digits(fraction) {
        return None;
    }

    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let padded = format!("{fraction:0<3}");
    let fraction: u64 = padded.parse().ok()?;
    whole.checked_mul(1000)?.checked_add(fraction)
}

fn default_time_limit() -> Millis {
    Millis(1000)
}

fn default_memory_limit() -> u64 {
    256
}

fn default_hard_multiplier() -> u64 {
    2
}

fn default_wall_multiplier() -> u64 {
    4
}

/// Contents of `problem.yml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemConfig {
    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Reference solution in `solutions/`, producing the expected answers
    #[serde(default)]
    pub model_solution: Option<String>,

    /// CPU time limit per test
    #[serde(default = "default_time_limit")]
    pub time_limit: Millis,

    /// Memory limit per test in megabytes
    #[serde(default = "default_memory_limit")]
    pub memory_limit: u64,

    /// Checker source in `source/`; discovered when absent
    #[serde(default)]
    pub checker: Option<String>,

    /// Validator source in `source/`; discovered when absent
    #[serde(default)]
    pub validator: Option<String>,

    /// Hard CPU limit as a multiple of the time limit
    #[serde(default = "default_hard_multiplier")]
    pub hard_time_multiplier: u64,

    /// Wall-clock limit as a multiple of the time limit
    #[serde(default = "default_wall_multiplier")]
    pub wall_time_multiplier: u64,

    #[serde(default)]
    pub judge: JudgeConfig,
}

impl ProblemConfig {
    /// Read and parse a manifest file
    pub fn load(path: impl AsRef<Path>) -> ProblemResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| ProblemError::Config(path.to_path_buf(), e.to_string()))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ProblemError::Config(path.to_path_buf(), e.to_string()))
    }

    pub fn time_limit_ms(&self) -> u64 {
        self.time_limit.0
    }

    /// Memory limit in kilobytes (1 MB = 1000 kB)
    pub fn memory_limit_kb(&self) -> u64 {
        self.memory_limit.saturating_mul(1000)
    }

    /// Limits a contestant solution runs under
    pub fn solution_limits(&self) -> ResourceLimits {
        ResourceLimits::for_solution(
            self.time_limit_ms(),
            self.memory_limit_kb(),
            self.hard_time_multiplier,
            self.wall_time_multiplier,
        )
    }
}
