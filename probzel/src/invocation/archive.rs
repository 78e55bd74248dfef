//! Read-only view of a finished run directory

use super::{
    CellDescriptor, CellRecord, InvocationView, META_FILE, RESULTS_DIR, RunMetadata, Verdict,
    cell_name,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// An invocation loaded back from disk
///
/// Loading never fails: an unreadable `meta.json` yields an empty
/// invocation and an unreadable result file an `INCOMPLETE` cell.
#[derive(Debug, Clone)]
pub struct ArchivedInvocation {
    uid: u32,
    dir: PathBuf,
    meta: Option<RunMetadata>,
    solutions: Vec<String>,
    tests: Vec<usize>,
    cells: Vec<Vec<CellDescriptor>>,
}

impl ArchivedInvocation {
    pub fn load(uid: u32, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let meta = match read_meta(&dir) {
            Ok(meta) => Some(meta),
            Err(reason) => {
                warn!("Invocation {} has no usable {}: {}", uid, META_FILE, reason);
                None
            }
        };

        let (solutions, tests) = meta
            .as_ref()
            .map(|m| (m.solutions.clone(), m.test_indices.clone()))
            .unwrap_or_default();
        let timelimit = meta.as_ref().and_then(|m| m.timelimit);

        let results = dir.join(RESULTS_DIR);
        let cells = (0..solutions.len())
            .map(|i| {
                (0..tests.len())
                    .map(|j| read_cell(&results.join(cell_name(i, j)), timelimit))
                    .collect()
            })
            .collect();

        Self {
            uid,
            dir,
            meta,
            solutions,
            tests,
            cells,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `None` when `meta.json` could not be read
    pub fn metadata(&self) -> Option<&RunMetadata> {
        self.meta.as_ref()
    }
}

impl InvocationView for ArchivedInvocation {
    fn uid(&self) -> u32 {
        self.uid
    }

    fn solutions(&self) -> &[String] {
        &self.solutions
    }

    fn tests(&self) -> &[usize] {
        &self.tests
    }

    fn get_descriptor(&self, solution: usize, test: usize) -> CellDescriptor {
        self.cells
            .get(solution)
            .and_then(|row| row.get(test))
            .copied()
            .unwrap_or(CellDescriptor::new(Verdict::Incomplete))
    }

    fn is_finished(&self) -> bool {
        true
    }
}

fn read_meta(dir: &Path) -> Result<RunMetadata, String> {
    let data = fs::read(dir.join(META_FILE)).map_err(|e| e.to_string())?;
    serde_json::from_slice(&data).map_err(|e| e.to_string())
}

fn read_cell(path: &Path, timelimit: Option<u64>) -> CellDescriptor {
    let record = match fs::read(path)
        .map_err(|e| e.to_string())
        .and_then(|data| serde_json::from_slice::<CellRecord>(&data).map_err(|e| e.to_string()))
    {
        Ok(record) => record,
        Err(reason) => {
            debug!("No result in {}: {}", path.display(), reason);
            return CellDescriptor::new(Verdict::Incomplete);
        }
    };

    let mut verdict = record.result.unwrap_or(Verdict::Incomplete);
    if let (Some(used), Some(limit)) = (record.time_usage, timelimit)
        && used >= limit
    {
        verdict = verdict.make_tl();
    }
    CellDescriptor {
        verdict,
        time_usage: record.time_usage,
        mem_usage: record.mem_usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fn archive_with_meta() -> TempDir {
        let tmp = TempDir::new().unwrap();
        write(
            &tmp.path().join(META_FILE),
            r#"{"solutions":["a.cpp","b.cpp"],"test_indices":[1,2],"timelimit":1000,"memorylimit":256000}"#,
        );
        tmp
    }

    #[test]
    fn test_missing_meta_gives_empty_invocation() {
        let tmp = TempDir::new().unwrap();
        let archive = ArchivedInvocation::load(3, tmp.path());
        assert!(archive.solutions().is_empty());
        assert!(archive.tests().is_empty());
        assert!(archive.metadata().is_none());
        assert_eq!(archive.get_result(0, 0), Verdict::Incomplete);
    }

    #[test]
    fn test_garbled_meta_gives_empty_invocation() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join(META_FILE), "{not json");
        let archive = ArchivedInvocation::load(0, tmp.path());
        assert!(archive.solutions().is_empty());
        assert!(archive.is_finished());
    }

    #[test]
    fn test_cells_degrade_independently() {
        let tmp = archive_with_meta();
        let results = tmp.path().join(RESULTS_DIR);
        write(&results.join("0_0"), r#"{"result":"OK","time_usage":15,"mem_usage":900}"#);
        write(&results.join("0_1"), r#"{"result":"WA"}"#);
        write(&results.join("1_0"), "garbage");
        write(&results.join("1_1"), r#"{"time_usage":3}"#);

        let archive = ArchivedInvocation::load(7, tmp.path());
        assert_eq!(archive.uid(), 7);
        assert_eq!(archive.solutions(), ["a.cpp", "b.cpp"]);
        assert_eq!(archive.tests(), [1, 2]);

        let cell = archive.get_descriptor(0, 0);
        assert_eq!(cell.verdict, Verdict::Accepted);
        assert_eq!(cell.time_usage, Some(15));
        assert_eq!(cell.mem_usage, Some(900));
        assert_eq!(archive.get_result(0, 1), Verdict::WrongAnswer);
        assert_eq!(archive.get_result(1, 0), Verdict::Incomplete);

        let partial = archive.get_descriptor(1, 1);
        assert_eq!(partial.verdict, Verdict::Incomplete);
        assert_eq!(partial.time_usage, Some(3));

        assert_eq!(archive.get_result(2, 0), Verdict::Incomplete);
        assert_eq!(archive.get_result(0, 5), Verdict::Incomplete);
    }

    #[test]
    fn test_time_limit_adjustment() {
        let tmp = archive_with_meta();
        let results = tmp.path().join(RESULTS_DIR);
        write(&results.join("0_0"), r#"{"result":"OK","time_usage":1000}"#);
        write(&results.join("0_1"), r#"{"result":"PE","time_usage":1500}"#);
        write(&results.join("1_0"), r#"{"result":"RE","time_usage":2000}"#);
        write(&results.join("1_1"), r#"{"result":"OK","time_usage":999}"#);

        let archive = ArchivedInvocation::load(0, tmp.path());
        assert_eq!(
            archive.matrix(),
            vec![
                vec![Verdict::TimeLimit, Verdict::WrongAnswerTimeLimit],
                vec![Verdict::RuntimeError, Verdict::Accepted],
            ]
        );
    }

    #[test]
    fn test_no_time_limit_keeps_verdicts() {
        let tmp = TempDir::new().unwrap();
        write(
            &tmp.path().join(META_FILE),
            r#"{"solutions":["a.cpp"],"test_indices":[1,2]}"#,
        );
        let results = tmp.path().join(RESULTS_DIR);
        write(&results.join("0_0"), r#"{"result":"OK","time_usage":5000}"#);
        write(&results.join("0_1"), r#"{"result":"WA","time_usage":0}"#);

        let archive = ArchivedInvocation::load(0, tmp.path());
        assert_eq!(
            archive.matrix(),
            vec![vec![Verdict::Accepted, Verdict::WrongAnswer]]
        );
    }
}
