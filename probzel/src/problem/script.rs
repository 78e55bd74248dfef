//! Test script interpreter
//!
//! A test script lists the tests of a problem, one per line:
//!
//! ```text
//! # samples first
//! :set_group samples
//! :manual 01
//! :manual 02
//! :unset_group
//! gen 10 20
//! gen 1000 | shuffle --seed 7
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. `:manual PATH` adds
//! a file from `tests.manual/`, `:set_group` / `:unset_group` tag the
//! following tests, anything else is a pipeline of generator invocations.

use super::testset::{TestKind, TestSet};
use super::{ProblemError, ProblemResult};

/// Builds a [`TestSet`] from script lines
#[derive(Debug, Default)]
pub struct ScriptInterpreter {
    testset: TestSet,
    group: Option<String>,
}

impl ScriptInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpret a whole script text
    pub fn parse(text: &str) -> ProblemResult<TestSet> {
        let mut interpreter = Self::new();
        for line in text.lines() {
            interpreter.feed_line(line)?;
        }
        Ok(interpreter.finish())
    }

    pub fn feed_line(&mut self, line: &str) -> ProblemResult<()> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(&head) = parts.first() else {
            return Ok(());
        };
        if head.starts_with('#') {
            return Ok(());
        }

        let invalid = || ProblemError::ScriptInvalid(format!("failed to parse line \"{}\"", line.trim()));
        match head {
            ":manual" => {
                let [_, path] = parts.as_slice() else {
                    return Err(invalid());
                };
                let kind = TestKind::Manual {
                    path: (*path).to_string(),
                };
                let _ = self.testset.push(kind, self.group.clone())?;
            }
            ":set_group" => {
                let [_, name] = parts.as_slice() else {
                    return Err(invalid());
                };
                self.group = Some((*name).to_string());
            }
            ":unset_group" => {
                if parts.len() != 1 {
                    return Err(invalid());
                }
                self.group = None;
            }
            directive if directive.starts_with(':') => return Err(invalid()),
            _ => {
                let pipeline = parse_pipeline(&parts).ok_or_else(|| {
                    ProblemError::ScriptInvalid(format!("bad pipes at line \"{}\"", line.trim()))
                })?;
                let _ = self
                    .testset
                    .push(TestKind::Generated { pipeline }, self.group.clone())?;
            }
        }
        Ok(())
    }

    pub fn finish(self) -> TestSet {
        self.testset
    }
}

/// Split `a b | c d` into stages; `None` if any stage is empty
fn parse_pipeline(parts: &[&str]) -> Option<Vec<Vec<String>>> {
    let mut pipeline = Vec::new();
    let mut stage = Vec::new();
    for part in parts {
        if *part == "|" {
            if stage.is_empty() {
                return None;
            }
            pipeline.push(std::mem::take(&mut stage));
        } else {
            stage.push((*part).to_string());
        }
    }
    if stage.is_empty() {
        return None;
    }
    pipeline.push(stage);
    Some(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_script() {
        let script = "\
# comment
:set_group samples
:manual 01
:manual 02

:unset_group
gen 10 20
gen 1000 | shuffle --seed 7
";
        let set = ScriptInterpreter::parse(script).unwrap();
        assert_eq!(set.len(), 4);
        assert_eq!(set.get(1).unwrap().group(), Some("samples"));
        assert_eq!(set.get(2).unwrap().display_command(), ":manual 02");
        assert_eq!(set.get(3).unwrap().group(), None);
        assert_eq!(
            set.get(4).unwrap().kind(),
            &TestKind::Generated {
                pipeline: vec![
                    vec!["gen".to_string(), "1000".to_string()],
                    vec!["shuffle".to_string(), "--seed".to_string(), "7".to_string()],
                ]
            }
        );
    }

    #[test]
    fn test_rejects_malformed_lines() {
        for bad in [
            ":manual",
            ":manual a b",
            ":set_group",
            ":unset_group now",
            ":frobnicate",
            "gen |",
            "| gen",
            "gen | | shuffle",
        ] {
            let err = ScriptInterpreter::parse(bad).unwrap_err();
            assert!(matches!(err, ProblemError::ScriptInvalid(_)), "{bad}: {err}");
        }
    }

    #[test]
    fn test_group_reopened_is_rejected() {
        let script = ":set_group a\ngen 1\n:set_group b\ngen 2\n:set_group a\ngen 3\n";
        assert!(matches!(
            ScriptInterpreter::parse(script),
            Err(ProblemError::GroupNotContiguous(g)) if g == "a"
        ));
    }

    #[test]
    fn test_comment_needs_leading_hash() {
        let set = ScriptInterpreter::parse("   # indented comment\ngen #1\n").unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(1).unwrap().display_command(), "gen #1");
    }
}
