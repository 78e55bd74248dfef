//! Judge configuration

use crate::meta::TimeoutPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which sandbox runs the jobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// The `isolate` utility (control groups, namespaces)
    #[default]
    Isolate,
    /// No isolation, wall-clock limit only (development only)
    Basic,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "isolate" => Ok(Self::Isolate),
            "basic" => Ok(Self::Basic),
            other => Err(format!("unknown sandbox backend '{other}' (expected isolate or basic)")),
        }
    }
}

/// Compilers and interpreters used by the job helpers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Toolchain {
    /// C++ compiler argv; the helper appends `source.cpp -o source`
    pub cxx: Vec<String>,
    /// Python 3 interpreter
    pub python: String,
    /// Bash interpreter
    pub bash: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            cxx: ["/usr/bin/g++", "-Wall", "-Wextra", "-std=c++17", "-O2"]
                .into_iter()
                .map(String::from)
                .collect(),
            python: "/usr/bin/python3".to_string(),
            bash: "/bin/bash".to_string(),
        }
    }
}

/// Judge settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Sandbox implementation
    pub backend: BackendKind,

    /// Path or name of the isolate executable
    pub isolate_binary: PathBuf,

    /// Run isolate with control groups (`--cg`)
    pub cgroups: bool,

    /// Sandbox slot used by the first worker; worker k uses `first_box_id + k`
    pub first_box_id: u32,

    /// Number of workers draining the queue; 1 serialises all execution
    pub workers: usize,

    /// Where per-job artifacts (and basic-backend slots) live
    pub work_root: Option<PathBuf>,

    /// How a wall-clock kill inside the grace window is classified
    pub timeout_policy: TimeoutPolicy,

    /// Compilers and interpreters for the helpers
    pub toolchain: Toolchain,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            isolate_binary: PathBuf::from("isolate"),
            cgroups: true,
            first_box_id: 0,
            workers: 1,
            work_root: None,
            timeout_policy: TimeoutPolicy::default(),
            toolchain: Toolchain::default(),
        }
    }
}

impl JudgeConfig {
    /// Resolved artifact root
    pub fn work_root(&self) -> PathBuf {
        self.work_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("probzel-judge"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: JudgeConfig =
            serde_json::from_str(r#"{"backend": "basic", "workers": 2}"#).unwrap();
        assert_eq!(config.backend, BackendKind::Basic);
        assert_eq!(config.workers, 2);
        assert!(config.cgroups);
        assert_eq!(config.toolchain, Toolchain::default());
        assert_eq!(config.timeout_policy, TimeoutPolicy::KillIsHard);
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("basic".parse::<BackendKind>(), Ok(BackendKind::Basic));
        assert!("docker".parse::<BackendKind>().is_err());
    }
}
