//! Evaluation verdicts

use convenient_judge::SandboxResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// State or outcome of one (solution, test) cell
///
/// Serialised by short name (`OK`, `WA`, `TL_HARD`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    /// Solution not compiled yet
    #[serde(rename = "WAITING")]
    Waiting,
    #[serde(rename = "COMPILING")]
    Compiling,
    #[serde(rename = "CE")]
    CompilationError,
    #[serde(rename = "CHECKING")]
    Checking,
    /// Queued, not executing yet
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "OK")]
    Accepted,
    #[serde(rename = "RE")]
    RuntimeError,
    #[serde(rename = "WA")]
    WrongAnswer,
    #[serde(rename = "PE")]
    PresentationError,
    #[serde(rename = "ML")]
    MemoryLimit,
    #[serde(rename = "TL")]
    TimeLimit,
    /// Killed after the hard CPU limit
    #[serde(rename = "TL_HARD")]
    TimeLimitHard,
    /// Wrong answer, and too slow as well
    #[serde(rename = "WA_TL")]
    WrongAnswerTimeLimit,
    /// Sandbox or infrastructure failure
    #[serde(rename = "FL")]
    Failed,
    /// The checker itself failed
    #[serde(rename = "CF")]
    CheckFailed,
    /// No readable result in an archived run
    #[serde(rename = "INCOMPLETE")]
    Incomplete,
}

impl Verdict {
    pub const ALL: [Verdict; 17] = [
        Verdict::Waiting,
        Verdict::Compiling,
        Verdict::CompilationError,
        Verdict::Checking,
        Verdict::Pending,
        Verdict::Running,
        Verdict::Accepted,
        Verdict::RuntimeError,
        Verdict::WrongAnswer,
        Verdict::PresentationError,
        Verdict::MemoryLimit,
        Verdict::TimeLimit,
        Verdict::TimeLimitHard,
        Verdict::WrongAnswerTimeLimit,
        Verdict::Failed,
        Verdict::CheckFailed,
        Verdict::Incomplete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Waiting => "WAITING",
            Verdict::Compiling => "COMPILING",
            Verdict::CompilationError => "CE",
            Verdict::Checking => "CHECKING",
            Verdict::Pending => "PENDING",
            Verdict::Running => "RUNNING",
            Verdict::Accepted => "OK",
            Verdict::RuntimeError => "RE",
            Verdict::WrongAnswer => "WA",
            Verdict::PresentationError => "PE",
            Verdict::MemoryLimit => "ML",
            Verdict::TimeLimit => "TL",
            Verdict::TimeLimitHard => "TL_HARD",
            Verdict::WrongAnswerTimeLimit => "WA_TL",
            Verdict::Failed => "FL",
            Verdict::CheckFailed => "CF",
            Verdict::Incomplete => "INCOMPLETE",
        }
    }

    /// No further change is expected
    pub fn is_final(self) -> bool {
        !matches!(
            self,
            Verdict::Waiting
                | Verdict::Compiling
                | Verdict::Checking
                | Verdict::Pending
                | Verdict::Running
        )
    }

    /// Checker exit code to verdict
    ///
    /// testlib conventions: 0 accepted, 1 wrong answer, 2 presentation
    /// error, 3 checker failure, 4 "dirt" (reported as PE). Anything else
    /// counts as a checker failure.
    pub fn from_checker_exit(code: Option<i32>) -> Verdict {
        match code {
            Some(0) => Verdict::Accepted,
            Some(1) => Verdict::WrongAnswer,
            Some(2 | 4) => Verdict::PresentationError,
            _ => Verdict::CheckFailed,
        }
    }

    /// Verdict of a run that needs no checking
    ///
    /// `None` for results that go on to the checker (OK and RE).
    pub fn from_run(result: SandboxResult) -> Option<Verdict> {
        match result {
            SandboxResult::Ok | SandboxResult::RuntimeError => None,
            SandboxResult::TimeLimitSoft => Some(Verdict::TimeLimit),
            SandboxResult::TimeLimitHard => Some(Verdict::TimeLimitHard),
            SandboxResult::MemoryLimitExceeded => Some(Verdict::MemoryLimit),
            SandboxResult::SystemFailure => Some(Verdict::Failed),
        }
    }

    /// The same verdict for a run that used up the time limit
    pub fn make_tl(self) -> Verdict {
        match self {
            Verdict::Accepted => Verdict::TimeLimit,
            Verdict::WrongAnswer | Verdict::PresentationError => Verdict::WrongAnswerTimeLimit,
            other => other,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Verdict::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| format!("unknown verdict '{s}'"))
    }
}
