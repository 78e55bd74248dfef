//! Job cache: dependency records, digest memo and the provider chain

use crate::digest::Digest;
use crate::job::JobProvider;
use crate::{CacheError, CacheResult};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Dependencies of one completed job: `(path, digest)` pairs
///
/// Serialised as a JSON array of two-element arrays.
pub type CacheRecord = Vec<(PathBuf, Digest)>;

/// Outcome of [`JobCache::run_job`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Record matched (or already completed in this process); nothing ran
    UpToDate,
    /// The job was executed and a fresh record written
    Executed,
}

/// Ids longer than this are stored under a hashed file name
pub const MAX_ID_FILE_NAME: usize = 200;

/// Bytes of a long id kept in front of its hash
const LONG_ID_PREFIX: usize = 64;

/// File name under which data keyed by `id` is stored
///
/// Short ids are used as they are. Longer ones (nested escaped ids grow
/// quickly) keep a readable prefix followed by the SHA-256 of the whole id,
/// which keeps every name below the usual 255-byte limit.
pub fn id_file_name(id: &str) -> String {
    if id.len() <= MAX_ID_FILE_NAME {
        return id.to_string();
    }
    let mut end = LONG_ID_PREFIX;
    while !id.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}~{}", &id[..end], Digest::from_bytes(id.as_bytes()))
}

/// Write data to a file atomically: temp file, fsync, rename
fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;

    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Content-addressed job cache
///
/// Records live under `jobs_dir`, one file per job id. Completed ids and file
/// digests are memoized for the lifetime of the value; nothing is locked
/// across processes.
pub struct JobCache {
    jobs_dir: PathBuf,
    providers: Vec<Box<dyn JobProvider>>,
    completed: Mutex<HashSet<String>>,
    digests: Mutex<HashMap<PathBuf, Digest>>,
}

impl JobCache {
    /// Create a cache storing its records in `jobs_dir`
    pub fn new(jobs_dir: impl Into<PathBuf>) -> Self {
        Self {
            jobs_dir: jobs_dir.into(),
            providers: Vec::new(),
            completed: Mutex::new(HashSet::new()),
            digests: Mutex::new(HashMap::new()),
        }
    }

    /// Append a provider to the chain
    pub fn register_provider(&mut self, provider: impl JobProvider + 'static) {
        self.providers.push(Box::new(provider));
    }

    /// Directory holding the records
    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }

    /// Path of the record for `id`
    pub fn record_path(&self, id: &str) -> PathBuf {
        self.jobs_dir.join(id_file_name(id))
    }

    /// Bring job `id` up to date
    ///
    /// Returns immediately when the id already completed in this process or
    /// its record matches the current file digests. Otherwise the job runs
    /// (unless `check_only`, which fails with [`CacheError::JobOutdated`]) and
    /// its dependency record is replaced.
    pub fn run_job(&self, id: &str, check_only: bool) -> CacheResult<JobStatus> {
        if self.is_completed(id) {
            debug!("Job {} already completed in this run", id);
            return Ok(JobStatus::UpToDate);
        }

        if self.record_is_current(id)? {
            debug!("Cache HIT for job {}", id);
            self.mark_completed(id);
            return Ok(JobStatus::UpToDate);
        }

        if check_only {
            return Err(CacheError::JobOutdated(id.to_string()));
        }

        let job = self
            .providers
            .iter()
            .find_map(|provider| provider.try_handle(id))
            .ok_or_else(|| CacheError::JobNotFound(id.to_string()))?;

        info!("Running job {}", id);
        let dependencies = job.run(self).map_err(|source| CacheError::JobExecution {
            id: id.to_string(),
            source,
        })?;

        // The job may have rewritten files digested earlier in this process.
        self.flush_digests();

        let mut record = CacheRecord::with_capacity(dependencies.len());
        for path in dependencies {
            let digest = self.digest(&path)?;
            record.push((path, digest));
        }
        self.write_record(id, &record)?;
        self.mark_completed(id);

        debug!("Job {} finished with {} dependencies", id, record.len());
        Ok(JobStatus::Executed)
    }

    /// Whether `id` completed earlier in this process
    pub fn is_completed(&self, id: &str) -> bool {
        self.completed
            .lock()
            .map(|completed| completed.contains(id))
            .unwrap_or(false)
    }

    /// Drop `id` from the completed set so the next request re-validates it
    pub fn forget(&self, id: &str) {
        if let Ok(mut completed) = self.completed.lock() {
            let _ = completed.remove(id);
        }
    }

    /// Forget every completed id and memoized digest
    pub fn reset(&self) {
        if let Ok(mut completed) = self.completed.lock() {
            completed.clear();
        }
        self.flush_digests();
    }

    /// Digest of `path`, memoized for this process
    pub fn digest(&self, path: &Path) -> CacheResult<Digest> {
        if let Some(digest) = self
            .digests
            .lock()
            .ok()
            .and_then(|memo| memo.get(path).cloned())
        {
            return Ok(digest);
        }

        let digest = Digest::of_file(path).map_err(|source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if let Ok(mut memo) = self.digests.lock() {
            let _ = memo.insert(path.to_path_buf(), digest.clone());
        }
        Ok(digest)
    }

    /// Read the stored record for `id`
    ///
    /// Missing, unreadable or malformed records all yield `None`.
    pub fn load_record(&self, id: &str) -> Option<CacheRecord> {
        let path = self.record_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Unreadable cache record {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_slice::<CacheRecord>(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Corrupt cache record {}: {}", path.display(), e);
                None
            }
        }
    }

    fn record_is_current(&self, id: &str) -> CacheResult<bool> {
        let Some(record) = self.load_record(id) else {
            debug!("Cache MISS for job {}: no record", id);
            return Ok(false);
        };

        for (path, recorded) in &record {
            let current = self.digest(path)?;
            if &current != recorded {
                debug!(
                    "Cache MISS for job {}: {} changed ({} -> {})",
                    id,
                    path.display(),
                    recorded,
                    current
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn write_record(&self, id: &str, record: &CacheRecord) -> CacheResult<()> {
        let data = serde_json::to_vec(record).map_err(|source| CacheError::Record {
            id: id.to_string(),
            source,
        })?;
        let path = self.record_path(id);
        atomic_write(&path, &data).map_err(|source| CacheError::Io { path, source })
    }

    fn mark_completed(&self, id: &str) {
        if let Ok(mut completed) = self.completed.lock() {
            let _ = completed.insert(id.to_string());
        }
    }

    fn flush_digests(&self) {
        if let Ok(mut memo) = self.digests.lock() {
            memo.clear();
        }
    }
}

impl std::fmt::Debug for JobCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobCache")
            .field("jobs_dir", &self.jobs_dir)
            .field("providers", &self.providers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_replaces_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/record");

        atomic_write(&path, b"[]").unwrap();
        atomic_write(&path, b"[[\"a\",\"b\"]]").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "[[\"a\",\"b\"]]");
        assert!(!tmp.path().join("nested/.record.tmp").exists());
    }

    #[test]
    fn test_record_json_shape() {
        let record: CacheRecord = vec![(PathBuf::from("src/gen.cpp"), Digest::missing())];
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, "[[\"src/gen.cpp\",\"_no_file_\"]]");
    }

    #[test]
    fn test_corrupt_record_is_none() {
        let tmp = TempDir::new().unwrap();
        let cache = JobCache::new(tmp.path());
        fs::write(tmp.path().join("broken"), b"{not json").unwrap();
        fs::write(tmp.path().join("wrong_shape"), b"{\"a\": 1}").unwrap();

        assert!(cache.load_record("broken").is_none());
        assert!(cache.load_record("wrong_shape").is_none());
        assert!(cache.load_record("absent").is_none());
    }

    #[test]
    fn test_digest_is_memoized() {
        let tmp = TempDir::new().unwrap();
        let cache = JobCache::new(tmp.path().join("_jobs"));
        let file = tmp.path().join("data");
        fs::write(&file, b"one").unwrap();

        let first = cache.digest(&file).unwrap();
        fs::write(&file, b"two").unwrap();
        assert_eq!(cache.digest(&file).unwrap(), first);

        cache.reset();
        assert_ne!(cache.digest(&file).unwrap(), first);
    }
}
