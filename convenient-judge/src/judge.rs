//! Judge: FIFO job queue drained by sandbox workers
//!
//! Jobs are submitted through a [`JudgeHandle`] and executed strictly in
//! submission order. Each worker is a dedicated OS thread owning one sandbox
//! slot; with the default single worker no two sandboxed programs ever run at
//! the same time.
//!
//! A finished job's box contents are moved to a private artifact directory so
//! the slot can be reused immediately. The artifacts stay readable through the
//! [`JobHandle`] until [`JobHandle::release`].

use crate::backend::{BasicBackend, RunRequest, SandboxBackend};
use crate::config::{BackendKind, JudgeConfig};
use crate::isolate::IsolateBackend;
use crate::meta::classify;
use crate::types::{Bind, JobOutcome, ResourceLimits, SandboxEnvironment};
use crate::{JudgeError, JudgeResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const STDIN_FILE: &str = ".stdin";
const STDOUT_FILE: &str = ".stdout";
const STDERR_FILE: &str = ".stderr";

/// Called on the worker thread right after a job finishes
pub type CompletionCallback = Box<dyn FnOnce(&JobHandle) + Send + 'static>;

/// A command to run and everything it needs
pub struct JobRequest {
    command: Vec<String>,
    env: SandboxEnvironment,
    limits: ResourceLimits,
    stdin: Option<PathBuf>,
    label: Option<String>,
    on_complete: Option<CompletionCallback>,
}

impl JobRequest {
    /// Job running `command` with default limits and no files
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            env: SandboxEnvironment::new(),
            limits: ResourceLimits::default(),
            stdin: None,
            label: None,
            on_complete: None,
        }
    }

    /// Files and directories to stage
    pub fn env(mut self, env: SandboxEnvironment) -> Self {
        self.env = env;
        self
    }

    /// Resource limits of the run
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Host file fed to the program's standard input
    pub fn stdin(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    /// Human-readable name used in logs
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Callback run on the worker thread once the job finished
    pub fn on_complete(mut self, callback: impl FnOnce(&JobHandle) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }
}

/// Lifecycle of a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting in the FIFO
    Queued,
    /// Executing in a sandbox slot
    Running,
    /// Outcome available
    Finished,
}

#[derive(Debug)]
struct JobSlot {
    state: JobState,
    outcome: Option<JobOutcome>,
    artifacts: Option<PathBuf>,
    released: bool,
}

#[derive(Debug)]
struct JobShared {
    id: u64,
    label: String,
    slot: Mutex<JobSlot>,
    changed: Condvar,
    done: watch::Sender<bool>,
}

/// Shared view of one submitted job
#[derive(Debug, Clone)]
pub struct JobHandle {
    shared: Arc<JobShared>,
}

impl JobHandle {
    fn new(id: u64, label: String) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            shared: Arc::new(JobShared {
                id,
                label,
                slot: Mutex::new(JobSlot {
                    state: JobState::Queued,
                    outcome: None,
                    artifacts: None,
                    released: false,
                }),
                changed: Condvar::new(),
                done,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobSlot> {
        // A poisoned slot still holds consistent data: every write is a single assignment.
        self.shared
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Sequence number, unique per judge
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Name used in logs
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Current lifecycle state
    pub fn state(&self) -> JobState {
        self.lock().state
    }

    /// The outcome is available
    pub fn is_ready(&self) -> bool {
        self.state() == JobState::Finished
    }

    /// The job is executing in a sandbox right now
    pub fn is_running(&self) -> bool {
        self.state() == JobState::Running
    }

    /// Block until the job finishes
    pub fn wait(&self) -> JobOutcome {
        let mut slot = self.lock();
        loop {
            if let Some(outcome) = &slot.outcome {
                return outcome.clone();
            }
            slot = self
                .shared
                .changed
                .wait(slot)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Resolve once the job finishes
    pub async fn completed(&self) -> JobOutcome {
        let mut done = self.shared.done.subscribe();
        let _ = done.wait_for(|finished| *finished).await;
        self.wait()
    }

    /// Outcome if already finished
    pub fn outcome(&self) -> Option<JobOutcome> {
        self.lock().outcome.clone()
    }

    /// Classified result; SystemFailure while unfinished
    pub fn result(&self) -> crate::SandboxResult {
        self.wait().result
    }

    /// Exit code of the program, if it exited
    pub fn exit_code(&self) -> Option<i32> {
        self.wait().exit_code
    }

    /// CPU time in milliseconds
    pub fn time_usage(&self) -> Option<u64> {
        self.wait().usage.time_ms
    }

    /// Wall-clock time in milliseconds
    pub fn wall_usage(&self) -> Option<u64> {
        self.wait().usage.wall_ms
    }

    /// Peak memory in kilobytes
    pub fn mem_usage(&self) -> Option<u64> {
        self.wait().usage.memory_kb
    }

    /// Diagnostic for system failures
    pub fn failure_reason(&self) -> Option<String> {
        self.wait().failure_reason
    }

    /// Path of a file the job left in its working directory
    pub fn artifact_path(&self, name: impl AsRef<Path>) -> JudgeResult<PathBuf> {
        let _ = self.wait();
        let slot = self.lock();
        if slot.released {
            return Err(JudgeError::Released(self.id()));
        }
        slot.artifacts
            .as_ref()
            .map(|dir| dir.join(name))
            .ok_or(JudgeError::NoArtifacts(self.id()))
    }

    /// Saved standard output
    pub fn stdout_path(&self) -> JudgeResult<PathBuf> {
        self.artifact_path(STDOUT_FILE)
    }

    /// Saved standard error
    pub fn stderr_path(&self) -> JudgeResult<PathBuf> {
        self.artifact_path(STDERR_FILE)
    }

    /// Standard output, lossily decoded
    pub fn read_stdout(&self) -> JudgeResult<String> {
        read_lossy(&self.stdout_path()?)
    }

    /// Standard error, lossily decoded
    pub fn read_stderr(&self) -> JudgeResult<String> {
        read_lossy(&self.stderr_path()?)
    }

    /// Discard the job's artifacts; outcome fields stay available
    ///
    /// Releasing an unfinished job discards its artifacts as soon as it
    /// finishes.
    pub fn release(&self) {
        let artifacts = {
            let mut slot = self.lock();
            slot.released = true;
            slot.artifacts.take()
        };
        if let Some(dir) = artifacts {
            remove_artifacts(&dir);
        }
    }

    fn set_running(&self) {
        self.lock().state = JobState::Running;
        self.shared.changed.notify_all();
    }

    fn finish(&self, outcome: JobOutcome, artifacts: Option<PathBuf>) {
        let discard = {
            let mut slot = self.lock();
            slot.state = JobState::Finished;
            slot.outcome = Some(outcome);
            if slot.released {
                artifacts
            } else {
                slot.artifacts = artifacts;
                None
            }
        };
        if let Some(dir) = discard {
            remove_artifacts(&dir);
        }
        self.shared.changed.notify_all();
        let _ = self.shared.done.send_replace(true);
    }
}

fn read_lossy(path: &Path) -> JudgeResult<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn remove_artifacts(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Failed to remove job artifacts {}: {}", dir.display(), e);
    }
}

struct QueuedJob {
    handle: JobHandle,
    request: JobRequest,
}

enum WorkItem {
    Run(Box<QueuedJob>),
    Stop,
}

struct JudgeCore {
    config: JudgeConfig,
    backend: Arc<dyn SandboxBackend>,
    artifacts_root: PathBuf,
    next_id: AtomicU64,
    // `true` once stop sentinels were queued; guards the sender.
    queue: Mutex<(Sender<WorkItem>, bool)>,
}

impl JudgeCore {
    fn submit(&self, mut request: JobRequest) -> JobHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let label = request
            .label
            .take()
            .unwrap_or_else(|| request.command.first().cloned().unwrap_or_default());
        let handle = JobHandle::new(id, label);

        let rejected = {
            let queue = self
                .queue
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let (sender, stopped) = &*queue;
            if *stopped {
                Some(request)
            } else {
                let item = WorkItem::Run(Box::new(QueuedJob {
                    handle: handle.clone(),
                    request,
                }));
                match sender.send(item) {
                    Ok(()) => None,
                    Err(mpsc::SendError(WorkItem::Run(job))) => Some(job.request),
                    Err(mpsc::SendError(WorkItem::Stop)) => None,
                }
            }
        };

        match rejected {
            Some(mut request) => {
                warn!("Judge is shut down; rejecting job {} ({})", id, handle.label());
                handle.finish(JobOutcome::system_failure("judge is shut down"), None);
                if let Some(callback) = request.on_complete.take() {
                    run_callback(callback, &handle);
                }
            }
            None => debug!("Queued job {} ({})", id, handle.label()),
        }
        handle
    }

    /// Queue one stop sentinel per worker; returns false if already stopped
    fn stop(&self, workers: usize) -> bool {
        let mut queue = self
            .queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if queue.1 {
            return false;
        }
        queue.1 = true;
        for _ in 0..workers {
            let _ = queue.0.send(WorkItem::Stop);
        }
        true
    }

    fn execute(&self, job: QueuedJob, slot: u32) {
        let QueuedJob {
            handle,
            mut request,
        } = job;
        handle.set_running();
        info!(
            "Running job {} ({}) in slot {}",
            handle.id(),
            handle.label(),
            slot
        );

        let (outcome, artifacts) = match self.run_in_slot(&handle, &request, slot) {
            Ok(done) => done,
            Err(e) => {
                error!("Job {} failed in the sandbox: {}", handle.id(), e);
                (JobOutcome::system_failure(e.to_string()), None)
            }
        };

        debug!(
            "Job {} finished: {} (time {:?} ms, mem {:?} kb)",
            handle.id(),
            outcome.result,
            outcome.usage.time_ms,
            outcome.usage.memory_kb
        );
        handle.finish(outcome, artifacts);

        if let Some(callback) = request.on_complete.take() {
            run_callback(callback, &handle);
        }
    }

    fn run_in_slot(
        &self,
        handle: &JobHandle,
        request: &JobRequest,
        slot: u32,
    ) -> JudgeResult<(JobOutcome, Option<PathBuf>)> {
        let box_dir = self.backend.init_slot(slot)?;

        let result = self.run_prepared(handle, request, slot, &box_dir);

        if let Err(e) = self.backend.cleanup_slot(slot) {
            warn!("Failed to clean up slot {}: {}", slot, e);
        }
        result
    }

    fn run_prepared(
        &self,
        handle: &JobHandle,
        request: &JobRequest,
        slot: u32,
        box_dir: &Path,
    ) -> JudgeResult<(JobOutcome, Option<PathBuf>)> {
        materialize(box_dir, &request.env)?;
        if let Some(stdin) = &request.stdin {
            let _ = fs::copy(stdin, box_dir.join(STDIN_FILE))?;
        }

        let run = RunRequest {
            box_dir,
            command: &request.command,
            limits: &request.limits,
            env: &request.env,
            stdin: request.stdin.as_ref().map(|_| STDIN_FILE),
            stdout: STDOUT_FILE,
            stderr: STDERR_FILE,
        };
        let outcome = match self.backend.run(slot, &run) {
            Ok(meta) => classify(&meta, &request.limits, self.config.timeout_policy),
            Err(e) => {
                warn!("Sandbox run of job {} failed: {}", handle.id(), e);
                JobOutcome::system_failure(e.to_string())
            }
        };

        let artifacts = self
            .artifacts_root
            .join(format!("{}-{}", handle.id(), uuid::Uuid::new_v4()));
        preserve_box(box_dir, &artifacts)?;
        Ok((outcome, Some(artifacts)))
    }
}

fn run_callback(callback: CompletionCallback, handle: &JobHandle) {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(handle)));
    if outcome.is_err() {
        error!("Completion callback of job {} panicked", handle.id());
    }
}

/// Copy the environment's files into the box
fn materialize(box_dir: &Path, env: &SandboxEnvironment) -> JudgeResult<()> {
    for bind in env.binds() {
        let Bind::File {
            host,
            virtual_path,
            executable,
        } = bind
        else {
            continue;
        };

        let dest = box_dir.join(virtual_path.strip_prefix("/").unwrap_or(virtual_path));
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let _ = fs::copy(host, &dest).map_err(|e| {
            JudgeError::Backend(format!("cannot stage {}: {e}", host.display()))
        })?;
        if *executable {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dest, fs::Permissions::from_mode(0o755))?;
        }
    }
    Ok(())
}

/// Move everything the run left in the box into `dest`
///
/// Symlinks (directory binds of the basic backend) are not followed.
fn preserve_box(box_dir: &Path, dest: &Path) -> JudgeResult<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(box_dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            continue;
        }
        let target = dest.join(entry.file_name());
        if fs::rename(entry.path(), &target).is_err() {
            if file_type.is_dir() {
                copy_dir_recursive(&entry.path(), &target)?;
            } else {
                let _ = fs::copy(entry.path(), &target)?;
            }
        }
    }
    Ok(())
}

/// Recursively copy directory
fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            let _ = fs::copy(&src_path, &dst_path)?;
        }
    }

    Ok(())
}

fn worker_loop(core: Arc<JudgeCore>, queue: Arc<Mutex<Receiver<WorkItem>>>, slot: u32) {
    debug!("Judge worker for slot {} started", slot);
    loop {
        let item = {
            let Ok(receiver) = queue.lock() else {
                break;
            };
            receiver.recv()
        };
        match item {
            Ok(WorkItem::Run(job)) => core.execute(*job, slot),
            Ok(WorkItem::Stop) | Err(_) => break,
        }
    }
    debug!("Judge worker for slot {} stopped", slot);
}

/// Cloneable submission endpoint of a [`Judge`]
#[derive(Clone)]
pub struct JudgeHandle {
    core: Arc<JudgeCore>,
}

impl JudgeHandle {
    /// Queue a job; never blocks
    pub fn new_job(&self, request: JobRequest) -> JobHandle {
        self.core.submit(request)
    }

    /// Configuration the judge was started with
    pub fn config(&self) -> &JudgeConfig {
        &self.core.config
    }

    /// Name of the sandbox backend
    pub fn backend_name(&self) -> &'static str {
        self.core.backend.name()
    }
}

impl std::fmt::Debug for JudgeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JudgeHandle")
            .field("backend", &self.core.backend.name())
            .finish_non_exhaustive()
    }
}

/// Owner of the worker threads
///
/// Dropping the judge lets queued jobs drain, then stops and joins every
/// worker.
pub struct Judge {
    handle: JudgeHandle,
    workers: Vec<JoinHandle<()>>,
}

impl Judge {
    /// Start with the backend named by the configuration
    pub fn start(config: JudgeConfig) -> JudgeResult<Self> {
        let backend: Arc<dyn SandboxBackend> = match config.backend {
            BackendKind::Isolate => Arc::new(IsolateBackend::new(
                config.isolate_binary.clone(),
                config.cgroups,
            )),
            BackendKind::Basic => Arc::new(BasicBackend::new(config.work_root().join("boxes"))?),
        };
        Self::with_backend(config, backend)
    }

    /// Start with an explicit backend
    pub fn with_backend(config: JudgeConfig, backend: Arc<dyn SandboxBackend>) -> JudgeResult<Self> {
        let artifacts_root = config.work_root().join("jobs");
        fs::create_dir_all(&artifacts_root)?;

        let worker_count = config.workers.max(1);
        let first_slot = config.first_box_id;
        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));

        info!(
            "Starting judge with {} worker(s) on the {} backend",
            worker_count,
            backend.name()
        );

        let core = Arc::new(JudgeCore {
            config,
            backend,
            artifacts_root,
            next_id: AtomicU64::new(0),
            queue: Mutex::new((sender, false)),
        });

        let mut judge = Self {
            handle: JudgeHandle {
                core: Arc::clone(&core),
            },
            workers: Vec::with_capacity(worker_count),
        };
        for index in 0..worker_count {
            let slot = first_slot.saturating_add(u32::try_from(index).unwrap_or(u32::MAX));
            let core = Arc::clone(&core);
            let receiver = Arc::clone(&receiver);
            let worker = thread::Builder::new()
                .name(format!("judge-worker-{index}"))
                .spawn(move || worker_loop(core, receiver, slot))?;
            judge.workers.push(worker);
        }
        Ok(judge)
    }

    /// Cloneable submission endpoint
    pub fn handle(&self) -> JudgeHandle {
        self.handle.clone()
    }

    /// Queue a job; never blocks
    pub fn new_job(&self, request: JobRequest) -> JobHandle {
        self.handle.new_job(request)
    }

    /// Configuration the judge was started with
    pub fn config(&self) -> &JudgeConfig {
        self.handle.config()
    }

    /// Drain the queue, then stop and join the workers
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.handle.core.stop(self.workers.len()) {
            info!("Stopping judge");
        }
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("Judge worker panicked");
            }
        }
    }
}

impl Drop for Judge {
    fn drop(&mut self) {
        self.stop();
    }
}
