//! Browse invocations: list and show

use super::{CommandResult, Workspace};
use crate::invocation::{self, ArchivedInvocation, InvocationView, Verdict};
use std::fmt::Write;

/// List run ids with a one-line summary each
pub async fn list(workspace: &Workspace) -> CommandResult {
    let root = workspace.invocations_dir();
    let ids = invocation::scan(&root)?;
    if ids.is_empty() {
        println!("No invocations yet");
        return Ok(());
    }

    println!("📋 Invocations:");
    for uid in ids {
        let archive = ArchivedInvocation::load(uid, root.join(uid.to_string()));
        let created = archive
            .metadata()
            .and_then(|meta| meta.created_at.clone())
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "  {:>6}  {}  {} solution(s) x {} test(s)",
            uid,
            created,
            archive.solutions().len(),
            archive.tests().len()
        );
    }
    Ok(())
}

/// Print the verdict matrix of one run
pub async fn show(workspace: &Workspace, uid: u32) -> CommandResult {
    let dir = workspace.invocations_dir().join(uid.to_string());
    if !dir.is_dir() {
        return Err(format!("Invocation {uid} does not exist").into());
    }
    let archive = ArchivedInvocation::load(uid, dir);
    print!("{}", render(&archive));
    Ok(())
}

/// Verdict matrix as text: one row per solution, one column per test
pub fn render(view: &dyn InvocationView) -> String {
    let width = view
        .solutions()
        .iter()
        .map(String::len)
        .max()
        .unwrap_or(0)
        .max("solution".len());
    let column = Verdict::ALL
        .iter()
        .map(|v| v.as_str().len())
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    let _ = write!(out, "{:<width$}", "solution");
    for test in view.tests() {
        let _ = write!(out, " {test:>column$}");
    }
    out.push('\n');

    for (i, solution) in view.solutions().iter().enumerate() {
        let _ = write!(out, "{solution:<width$}");
        for j in 0..view.tests().len() {
            let _ = write!(out, " {:>column$}", view.get_result(i, j).as_str());
        }
        out.push('\n');
    }
    out
}

/// `done/total` over the final cells
pub fn progress(view: &dyn InvocationView) -> (usize, usize) {
    let total = view.solutions().len() * view.tests().len();
    let done = (0..view.solutions().len())
        .flat_map(|i| (0..view.tests().len()).map(move |j| (i, j)))
        .filter(|&(i, j)| view.get_result(i, j).is_final())
        .count();
    (done, total)
}
