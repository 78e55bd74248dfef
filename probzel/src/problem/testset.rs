//! Tests and the ordered test set

use super::{ProblemError, ProblemResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A problem never has more tests than this
pub const MAX_TESTS: usize = 999;

/// Where a test's input comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestKind {
    /// A file under `tests.manual/`
    Manual { path: String },
    /// Generator stages piped into each other; each stage is `[name, args...]`
    Generated { pipeline: Vec<Vec<String>> },
}

/// One test of a problem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Test {
    kind: TestKind,
    group: Option<String>,
    index: usize,
}

impl Test {
    pub fn kind(&self) -> &TestKind {
        &self.kind
    }

    pub fn is_manual(&self) -> bool {
        matches!(self.kind, TestKind::Manual { .. })
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// 1-based position in the test set
    pub fn index(&self) -> usize {
        self.index
    }

    /// The script line that produced this test
    pub fn display_command(&self) -> String {
        match &self.kind {
            TestKind::Manual { path } => format!(":manual {path}"),
            TestKind::Generated { pipeline } => pipeline
                .iter()
                .map(|stage| stage.join(" "))
                .collect::<Vec<_>>()
                .join(" | "),
        }
    }
}

/// On-disk shape of one test in `work/testset`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRecord {
    manual: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cmd: Option<Vec<Vec<String>>>,
}

impl TestRecord {
    fn into_parts(self) -> ProblemResult<(TestKind, Option<String>)> {
        let kind = if self.manual {
            match self.path {
                Some(path) if !path.is_empty() => TestKind::Manual { path },
                _ => {
                    return Err(ProblemError::InvalidTestSet(
                        "manual test without a path".to_string(),
                    ));
                }
            }
        } else {
            match self.cmd {
                Some(pipeline)
                    if !pipeline.is_empty() && pipeline.iter().all(|stage| !stage.is_empty()) =>
                {
                    TestKind::Generated { pipeline }
                }
                _ => {
                    return Err(ProblemError::InvalidTestSet(
                        "generated test with an empty command".to_string(),
                    ));
                }
            }
        };
        Ok((kind, self.group))
    }
}

impl From<&Test> for TestRecord {
    fn from(test: &Test) -> Self {
        let (path, cmd) = match &test.kind {
            TestKind::Manual { path } => (Some(path.clone()), None),
            TestKind::Generated { pipeline } => (None, Some(pipeline.clone())),
        };
        Self {
            manual: test.is_manual(),
            group: test.group.clone(),
            path,
            cmd,
        }
    }
}

/// Ordered, 1-based list of tests
///
/// Indices are contiguous and every group occupies one contiguous range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TestRecord>", into = "Vec<TestRecord>")]
pub struct TestSet {
    tests: Vec<Test>,
}

impl TestSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Append a test and return its index
    pub fn push(&mut self, kind: TestKind, group: Option<String>) -> ProblemResult<usize> {
        if self.tests.len() >= MAX_TESTS {
            return Err(ProblemError::TooManyTests(MAX_TESTS));
        }
        if let Some(name) = &group {
            let continues = self.tests.last().and_then(Test::group) == Some(name.as_str());
            if !continues && self.tests.iter().any(|t| t.group() == Some(name.as_str())) {
                return Err(ProblemError::GroupNotContiguous(name.clone()));
            }
        }

        let index = self.tests.len() + 1;
        self.tests.push(Test { kind, group, index });
        Ok(index)
    }

    /// Test at 1-based `index`
    pub fn get(&self, index: usize) -> Option<&Test> {
        index.checked_sub(1).and_then(|i| self.tests.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Test> {
        self.tests.iter()
    }

    /// Group names in order of first appearance
    pub fn groups(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = Vec::new();
        for group in self.tests.iter().filter_map(Test::group) {
            if groups.last() != Some(&group) {
                groups.push(group);
            }
        }
        groups
    }

    pub fn load(path: &Path) -> ProblemResult<Self> {
        let data = fs::read(path).map_err(|e| ProblemError::io(path, e))?;
        serde_json::from_slice(&data)
            .map_err(|e| ProblemError::InvalidTestSet(format!("{}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> ProblemResult<()> {
        let data = serde_json::to_vec(self)?;
        fs::write(path, data).map_err(|e| ProblemError::io(path, e))
    }
}

impl<'a> IntoIterator for &'a TestSet {
    type Item = &'a Test;
    type IntoIter = std::slice::Iter<'a, Test>;

    fn into_iter(self) -> Self::IntoIter {
        self.tests.iter()
    }
}

impl TryFrom<Vec<TestRecord>> for TestSet {
    type Error = ProblemError;

    fn try_from(records: Vec<TestRecord>) -> ProblemResult<Self> {
        let mut set = TestSet::new();
        for record in records {
            let (kind, group) = record.into_parts()?;
            let _ = set.push(kind, group)?;
        }
        Ok(set)
    }
}

impl From<TestSet> for Vec<TestRecord> {
    fn from(set: TestSet) -> Self {
        set.tests.iter().map(TestRecord::from).collect()
    }
}
