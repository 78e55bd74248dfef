//! Registry of invocations under `work/invocations/`

use super::{
    ArchivedInvocation, CellDescriptor, Invocation, InvocationError, InvocationPlan,
    InvocationResult, InvocationView,
};
use convenient_judge::JudgeHandle;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Largest invocation id; directories with larger numbers are ignored
pub const MAX_INVOCATION_ID: u32 = 100_000;

/// Attempts at claiming a fresh id when other processes race for it
const CLAIM_ATTEMPTS: usize = 16;

/// Either a run of this process or one read back from disk
#[derive(Debug, Clone)]
pub enum InvocationRef {
    Live(Arc<Invocation>),
    Archived(ArchivedInvocation),
}

impl InvocationRef {
    pub fn is_live(&self) -> bool {
        matches!(self, InvocationRef::Live(_))
    }

    fn view(&self) -> &dyn InvocationView {
        match self {
            InvocationRef::Live(live) => live.as_ref(),
            InvocationRef::Archived(archived) => archived,
        }
    }
}

impl InvocationView for InvocationRef {
    fn uid(&self) -> u32 {
        self.view().uid()
    }

    fn solutions(&self) -> &[String] {
        self.view().solutions()
    }

    fn tests(&self) -> &[usize] {
        self.view().tests()
    }

    fn get_descriptor(&self, solution: usize, test: usize) -> CellDescriptor {
        self.view().get_descriptor(solution, test)
    }

    fn is_finished(&self) -> bool {
        self.view().is_finished()
    }
}

/// Creates, tracks and looks up invocations
pub struct InvocationManager {
    root: PathBuf,
    judge: JudgeHandle,
    active: Mutex<BTreeMap<u32, Arc<Invocation>>>,
}

impl InvocationManager {
    pub fn new(root: impl Into<PathBuf>, judge: JudgeHandle) -> Self {
        Self {
            root: root.into(),
            judge,
            active: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn active(&self) -> MutexGuard<'_, BTreeMap<u32, Arc<Invocation>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ids of every run directory, ascending
    pub fn list_invocations(&self) -> InvocationResult<Vec<u32>> {
        scan(&self.root)
    }

    /// Invocations started by this manager, by id
    pub fn list_active(&self) -> Vec<Arc<Invocation>> {
        self.active().values().cloned().collect()
    }

    /// Claim a fresh id, create the run directory and start the run
    pub fn new_invocation(&self, plan: InvocationPlan) -> InvocationResult<Arc<Invocation>> {
        fs::create_dir_all(&self.root).map_err(|e| InvocationError::io(&self.root, e))?;

        for _ in 0..CLAIM_ATTEMPTS {
            let uid = self.next_id()?;
            let dir = self.root.join(uid.to_string());
            match fs::create_dir(&dir) {
                Ok(()) => {
                    let invocation = match Invocation::create(&self.judge, plan, uid, &dir) {
                        Ok(invocation) => Arc::new(invocation),
                        Err(e) => {
                            if let Err(cleanup) = fs::remove_dir_all(&dir) {
                                warn!("Failed to remove {}: {}", dir.display(), cleanup);
                            }
                            return Err(e);
                        }
                    };
                    invocation.start()?;
                    let _ = self.active().insert(uid, Arc::clone(&invocation));
                    info!("Started invocation {}", uid);
                    return Ok(invocation);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("Invocation id {} was claimed concurrently, retrying", uid);
                }
                Err(e) => return Err(InvocationError::io(&dir, e)),
            }
        }
        Err(InvocationError::IdContention(CLAIM_ATTEMPTS))
    }

    fn next_id(&self) -> InvocationResult<u32> {
        let next = match self.list_invocations()?.last() {
            Some(last) => last + 1,
            None => 0,
        };
        if next > MAX_INVOCATION_ID {
            return Err(InvocationError::IdsExhausted(MAX_INVOCATION_ID));
        }
        Ok(next)
    }

    /// Live run if this manager started it, else the archive on disk
    pub fn get_invocation(&self, uid: u32) -> Option<InvocationRef> {
        if let Some(live) = self.active().get(&uid) {
            return Some(InvocationRef::Live(Arc::clone(live)));
        }
        let dir = self.root.join(uid.to_string());
        if uid > MAX_INVOCATION_ID || !dir.is_dir() {
            return None;
        }
        Some(InvocationRef::Archived(ArchivedInvocation::load(uid, dir)))
    }
}

/// Run directory ids below `root`, ascending; a missing `root` has none
pub fn scan(root: &Path) -> InvocationResult<Vec<u32>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(InvocationError::io(root, e)),
    };

    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| InvocationError::io(root, e))?;
        let Some(uid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };
        if uid <= MAX_INVOCATION_ID && entry.path().is_dir() {
            ids.push(uid);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

impl std::fmt::Debug for InvocationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationManager")
            .field("root", &self.root)
            .field("active", &self.active().keys().collect::<Vec<_>>())
            .finish()
    }
}
