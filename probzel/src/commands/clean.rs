//! Clean command: remove generated files

use super::{CommandResult, Workspace, lock_policy};
use crate::lock::DirLock;
use crate::problem;

pub async fn execute(workspace: &Workspace, mrproper: bool) -> CommandResult {
    let work = workspace.work_dir();
    if !work.exists() {
        println!("Nothing to clean");
        return Ok(());
    }

    {
        let _lock = DirLock::acquire(&work, "probzel clean", &lock_policy())?;
        problem::wipe(&workspace.home, mrproper)?;
    }

    if mrproper {
        println!("🧹 Removed {}", work.display());
    } else {
        println!("🧹 Cleaned {} (invocations kept)", work.display());
    }
    Ok(())
}
