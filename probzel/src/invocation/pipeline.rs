//! Live invocation: compile, run, check
//!
//! Every solution is compiled once, then run on every test, and every
//! output that made it through the run is handed to the checker. Judge
//! completion callbacks only post a [`PipelineEvent`]; a driver thread per
//! invocation owns the helper jobs, advances the cells, persists results
//! and submits follow-up jobs.

use super::{
    BIN_DIR, COMPILATION_DIR, CellDescriptor, CellRecord, InvocationError, InvocationPlan,
    InvocationResult, InvocationView, META_FILE, OUTPUTS_DIR, RESULTS_DIR, RunMetadata, Verdict,
    cell_name, write_json,
};
use convenient_judge::{
    CompilationJob, InvocationJob, JobHandle, JobHelper, JudgeError, JudgeHandle, ResourceLimits,
    SandboxResult,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Checker file names inside its sandbox, also passed as its arguments
const CHECKER_FILES: [&str; 3] = ["input", "output", "correct"];

/// Job completions reported to the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    Compiled(usize),
    Ran(usize, usize),
    Checked(usize, usize),
}

#[derive(Debug)]
enum Compile {
    NotSubmitted,
    Submitted(JobHandle),
    Done,
}

#[derive(Debug)]
enum Cell {
    NotStarted,
    Running(JobHandle),
    Checking,
    Complete(CellDescriptor),
}

#[derive(Debug)]
struct Progress {
    compiles: Vec<Compile>,
    cells: Vec<Vec<Cell>>,
    remaining: usize,
}

#[derive(Debug)]
struct Shared {
    progress: Mutex<Progress>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A running (or finished) invocation owned by this process
pub struct Invocation {
    uid: u32,
    dir: PathBuf,
    solutions: Vec<String>,
    tests: Vec<usize>,
    shared: Arc<Shared>,
    pending: Mutex<Option<Driver>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Invocation {
    /// Prepare the run directory and write `meta.json`
    ///
    /// Nothing is submitted until [`start`](Self::start).
    pub fn create(
        judge: &JudgeHandle,
        plan: InvocationPlan,
        uid: u32,
        dir: impl Into<PathBuf>,
    ) -> InvocationResult<Self> {
        if plan.solutions.is_empty() {
            return Err(InvocationError::EmptyPlan("no solutions"));
        }
        if plan.tests.is_empty() {
            return Err(InvocationError::EmptyPlan("no tests"));
        }
        if plan.sources.len() != plan.solutions.len() {
            return Err(InvocationError::PlanMismatch {
                solutions: plan.solutions.len(),
                sources: plan.sources.len(),
            });
        }

        let dir = dir.into();
        for sub in [RESULTS_DIR, OUTPUTS_DIR, BIN_DIR, COMPILATION_DIR] {
            let path = dir.join(sub);
            fs::create_dir_all(&path).map_err(|e| InvocationError::io(&path, e))?;
        }
        write_json(&dir.join(META_FILE), &RunMetadata::for_plan(&plan))?;

        let rows = plan.solutions.len();
        let columns = plan.tests.len();
        let shared = Arc::new(Shared {
            progress: Mutex::new(Progress {
                compiles: (0..rows).map(|_| Compile::NotSubmitted).collect(),
                cells: (0..rows)
                    .map(|_| (0..columns).map(|_| Cell::NotStarted).collect())
                    .collect(),
                remaining: rows * columns,
            }),
            changed: Condvar::new(),
        });

        let solutions = plan.solutions.clone();
        let tests = plan.test_indices();
        let (events, inbox) = mpsc::channel();
        let driver = Driver {
            uid,
            dir: dir.clone(),
            judge: judge.clone(),
            shared: Arc::clone(&shared),
            events,
            inbox,
            compiles: (0..rows).map(|_| None).collect(),
            runs: HashMap::new(),
            checks: HashMap::new(),
            plan,
        };

        info!(
            "Created invocation {} ({} solutions x {} tests) in {}",
            uid,
            rows,
            columns,
            dir.display()
        );
        Ok(Self {
            uid,
            dir,
            solutions,
            tests,
            shared,
            pending: Mutex::new(Some(driver)),
            driver: Mutex::new(None),
        })
    }

    /// Submit the compilations and start the driver thread
    ///
    /// Calling it again is a no-op.
    pub fn start(&self) -> InvocationResult<()> {
        let Some(driver) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(());
        };

        let handle = std::thread::Builder::new()
            .name(format!("invocation-{}", self.uid))
            .spawn(move || driver.run())
            .map_err(InvocationError::Spawn)?;
        *self.driver.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Block until every cell is final; only returns after [`start`](Self::start)
    pub fn wait(&self) {
        let mut progress = self.shared.lock();
        while progress.remaining > 0 {
            progress = self
                .shared
                .changed
                .wait(progress)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(progress);

        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(driver) = driver
            && driver.join().is_err()
        {
            error!("Driver of invocation {} panicked", self.uid);
        }
    }
}

impl InvocationView for Invocation {
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
        let progress = self.shared.lock();
        let (Some(compile), Some(cell)) = (
            progress.compiles.get(solution),
            progress.cells.get(solution).and_then(|row| row.get(test)),
        ) else {
            return CellDescriptor::new(Verdict::Incomplete);
        };

        let verdict = match (compile, cell) {
            (_, Cell::Complete(descriptor)) => return *descriptor,
            (Compile::NotSubmitted, _) => Verdict::Waiting,
            (Compile::Submitted(job), _) if job.is_running() => Verdict::Compiling,
            (Compile::Submitted(_), _) => Verdict::Waiting,
            (Compile::Done, Cell::NotStarted) => Verdict::Pending,
            (Compile::Done, Cell::Running(job)) if job.is_running() => Verdict::Running,
            (Compile::Done, Cell::Running(_)) => Verdict::Pending,
            (Compile::Done, Cell::Checking) => Verdict::Checking,
        };
        CellDescriptor::new(verdict)
    }

    fn is_finished(&self) -> bool {
        self.shared.lock().remaining == 0
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("uid", &self.uid)
            .field("dir", &self.dir)
            .field("solutions", &self.solutions)
            .field("tests", &self.tests)
            .finish()
    }
}

/// A solution run waiting for its checker
struct PendingCheck {
    job: InvocationJob,
    run: SandboxResult,
    time_usage: Option<u64>,
    mem_usage: Option<u64>,
}

/// Owns the helper jobs of one invocation; lives on the driver thread
struct Driver {
    uid: u32,
    dir: PathBuf,
    judge: JudgeHandle,
    shared: Arc<Shared>,
    events: Sender<PipelineEvent>,
    inbox: Receiver<PipelineEvent>,
    compiles: Vec<Option<CompilationJob>>,
    runs: HashMap<(usize, usize), InvocationJob>,
    checks: HashMap<(usize, usize), PendingCheck>,
    plan: InvocationPlan,
}

impl Driver {
    fn run(mut self) {
        self.submit_compilations();

        while self.shared.lock().remaining > 0 {
            // The driver holds a sender itself, so the channel never disconnects.
            let Ok(event) = self.inbox.recv() else {
                break;
            };
            debug!("Invocation {}: {:?}", self.uid, event);
            match event {
                PipelineEvent::Compiled(i) => self.on_compiled(i),
                PipelineEvent::Ran(i, j) => self.on_ran(i, j),
                PipelineEvent::Checked(i, j) => self.on_checked(i, j),
            }
        }
        info!("Invocation {} finished", self.uid);
    }

    fn notify(&self, event: PipelineEvent) -> impl FnOnce(&JobHandle) + Send + 'static {
        let events = self.events.clone();
        move |_| {
            let _ = events.send(event);
        }
    }

    fn submit_compilations(&mut self) {
        for i in 0..self.plan.solutions.len() {
            let mut job = CompilationJob::new(&self.judge);
            let _ = job.on_complete(self.notify(PipelineEvent::Compiled(i)));
            let handle = job.start(&self.plan.sources[i]);
            self.shared.lock().compiles[i] = Compile::Submitted(handle);
            self.compiles[i] = Some(job);
        }
    }

    fn on_compiled(&mut self, i: usize) {
        let Some(mut job) = self.compiles.get_mut(i).and_then(Option::take) else {
            return;
        };

        let log = self
            .dir
            .join(COMPILATION_DIR)
            .join(format!("{i}.log"));
        if let Err(e) = fs::write(&log, job.read_stderr().unwrap_or_default()) {
            warn!("Failed to write {}: {}", log.display(), e);
        }

        let result = job.result();
        if !result.is_ok() {
            let verdict = match result {
                SandboxResult::SystemFailure => Verdict::Failed,
                _ => Verdict::CompilationError,
            };
            info!(
                "Invocation {}: {} did not compile ({})",
                self.uid, self.plan.solutions[i], result
            );
            job.release();
            self.complete_row(i, verdict);
            return;
        }

        let binary = self.dir.join(BIN_DIR).join(i.to_string());
        let fetched = job.fetch(&binary, true);
        job.release();
        if let Err(e) = fetched {
            error!(
                "Invocation {}: cannot fetch binary of {}: {}",
                self.uid, self.plan.solutions[i], e
            );
            self.complete_row(i, Verdict::Failed);
            return;
        }

        self.shared.lock().compiles[i] = Compile::Done;
        for j in 0..self.plan.tests.len() {
            self.submit_run(i, j, &binary);
        }
    }

    fn submit_run(&mut self, i: usize, j: usize, binary: &Path) {
        let input = self.plan.tests[j].input.clone();
        let mut job = InvocationJob::new(&self.judge, self.plan.limits.clone());
        let _ = job.on_complete(self.notify(PipelineEvent::Ran(i, j)));
        let handle = job.start(binary, Some(&input), &[]);
        self.set_cell(i, j, Cell::Running(handle));
        let _ = self.runs.insert((i, j), job);
    }

    fn on_ran(&mut self, i: usize, j: usize) {
        let Some(mut job) = self.runs.remove(&(i, j)) else {
            return;
        };
        let run = job.result();
        let time_usage = job.time_usage();
        let mem_usage = job.mem_usage();

        if let Some(verdict) = Verdict::from_run(run) {
            job.release();
            self.complete(
                i,
                j,
                CellDescriptor {
                    verdict,
                    time_usage,
                    mem_usage,
                },
            );
            return;
        }

        let output = self.dir.join(OUTPUTS_DIR).join(cell_name(i, j));
        let saved = job
            .handle()
            .ok_or(JudgeError::NotStarted)
            .and_then(JobHandle::stdout_path)
            .and_then(|stdout| fs::copy(stdout, &output).map_err(JudgeError::from));
        job.release();
        if let Err(e) = saved {
            warn!(
                "Invocation {}: cannot save output of cell {}: {}",
                self.uid,
                cell_name(i, j),
                e
            );
            self.complete(
                i,
                j,
                CellDescriptor {
                    verdict: Verdict::Failed,
                    time_usage,
                    mem_usage,
                },
            );
            return;
        }

        let test = &self.plan.tests[j];
        let mut checker = InvocationJob::new(&self.judge, ResourceLimits::checker());
        let _ = checker
            .add_file(&test.input, CHECKER_FILES[0])
            .add_file(&output, CHECKER_FILES[1])
            .add_file(&test.answer, CHECKER_FILES[2])
            .on_complete(self.notify(PipelineEvent::Checked(i, j)));
        let args = CHECKER_FILES.map(String::from);
        let _ = checker.start(&self.plan.checker, None, &args);

        self.set_cell(i, j, Cell::Checking);
        let _ = self.checks.insert(
            (i, j),
            PendingCheck {
                job: checker,
                run,
                time_usage,
                mem_usage,
            },
        );
    }

    fn on_checked(&mut self, i: usize, j: usize) {
        let Some(mut pending) = self.checks.remove(&(i, j)) else {
            return;
        };

        let checker = pending.job.result();
        let mut verdict = if checker.is_ok_or_re() {
            Verdict::from_checker_exit(pending.job.exit_code())
        } else {
            warn!(
                "Invocation {}: checker failed on cell {}: {}",
                self.uid,
                cell_name(i, j),
                checker
            );
            Verdict::Failed
        };
        if verdict == Verdict::CheckFailed {
            debug!(
                "Checker output for cell {}: {}",
                cell_name(i, j),
                pending.job.read_stderr().unwrap_or_default()
            );
        }
        pending.job.release();

        if pending.run == SandboxResult::RuntimeError
            && !matches!(verdict, Verdict::CheckFailed | Verdict::Failed)
        {
            verdict = Verdict::RuntimeError;
        }
        if let (Some(used), Some(limit)) = (pending.time_usage, self.plan.limits.time_ms)
            && used >= limit
        {
            verdict = verdict.make_tl();
        }

        self.complete(
            i,
            j,
            CellDescriptor {
                verdict,
                time_usage: pending.time_usage,
                mem_usage: pending.mem_usage,
            },
        );
    }

    fn set_cell(&self, i: usize, j: usize, cell: Cell) {
        let mut progress = self.shared.lock();
        // A rejected job may already have completed its cell.
        if !matches!(progress.cells[i][j], Cell::Complete(_)) {
            progress.cells[i][j] = cell;
        }
        drop(progress);
        self.shared.changed.notify_all();
    }

    fn persist(&self, i: usize, j: usize, cell: CellDescriptor) {
        let path = self.dir.join(RESULTS_DIR).join(cell_name(i, j));
        if let Err(e) = write_json(&path, &CellRecord::from(cell)) {
            error!("Failed to persist {}: {}", path.display(), e);
        }
    }

    fn complete(&self, i: usize, j: usize, cell: CellDescriptor) {
        self.persist(i, j, cell);
        let mut progress = self.shared.lock();
        if !matches!(progress.cells[i][j], Cell::Complete(_)) {
            progress.remaining -= 1;
        }
        progress.cells[i][j] = Cell::Complete(cell);
        drop(progress);
        self.shared.changed.notify_all();
    }

    /// Finish every cell of a solution that will never run
    fn complete_row(&self, i: usize, verdict: Verdict) {
        let cell = CellDescriptor::new(verdict);
        for j in 0..self.plan.tests.len() {
            self.persist(i, j, cell);
        }

        let mut progress = self.shared.lock();
        progress.compiles[i] = Compile::Done;
        let mut completed = 0;
        for slot in &mut progress.cells[i] {
            if !matches!(slot, Cell::Complete(_)) {
                completed += 1;
            }
            *slot = Cell::Complete(cell);
        }
        progress.remaining -= completed;
        drop(progress);
        self.shared.changed.notify_all();
    }
}

/// A driver leaving early (panic included) fails whatever is still open so
/// that waiters return
impl Drop for Driver {
    fn drop(&mut self) {
        let mut progress = self.shared.lock();
        if progress.remaining == 0 {
            return;
        }

        let failed = CellDescriptor::new(Verdict::Failed);
        let mut abandoned = Vec::new();
        for (i, row) in progress.cells.iter_mut().enumerate() {
            for (j, slot) in row.iter_mut().enumerate() {
                if !matches!(slot, Cell::Complete(_)) {
                    *slot = Cell::Complete(failed);
                    abandoned.push((i, j));
                }
            }
        }
        for compile in &mut progress.compiles {
            *compile = Compile::Done;
        }
        progress.remaining = 0;
        drop(progress);
        self.shared.changed.notify_all();

        error!(
            "Invocation {} stopped with {} unfinished cells",
            self.uid,
            abandoned.len()
        );
        for (i, j) in abandoned {
            self.persist(i, j, failed);
        }
    }
}
