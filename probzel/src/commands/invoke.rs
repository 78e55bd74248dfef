//! Invoke command: judge solutions against the posted tests

use super::invocations::{progress, render};
use super::{CommandResult, Workspace};
use crate::invocation::{InvocationManager, InvocationView};
use std::time::Duration;

/// Start an invocation and report progress until every cell is final
pub async fn execute(
    workspace: &Workspace,
    solutions: Vec<String>,
    all: bool,
    refresh: Duration,
) -> CommandResult {
    let judge = workspace.start_judge()?;
    let problem = workspace.open(&judge)?;

    let solutions = if all { problem.solutions()? } else { solutions };
    if solutions.is_empty() {
        return Err("No solutions to invoke".into());
    }
    let plan = problem.invocation_plan(&solutions)?;

    let manager = InvocationManager::new(workspace.invocations_dir(), judge.handle());
    let invocation = manager.new_invocation(plan)?;
    println!(
        "⚖️  Invocation {}: {} solution(s) x {} test(s) on the {} sandbox",
        invocation.uid(),
        invocation.solutions().len(),
        invocation.tests().len(),
        judge.handle().backend_name()
    );

    let mut ticker = tokio::time::interval(refresh.max(Duration::from_millis(10)));
    let mut last = None;
    loop {
        let _ = ticker.tick().await;
        let (done, total) = progress(&*invocation);
        if last != Some(done) {
            println!("  {done}/{total} cells judged");
            last = Some(done);
        }
        if invocation.is_finished() {
            break;
        }
    }
    tokio::task::block_in_place(|| invocation.wait());

    println!();
    print!("{}", render(&*invocation));
    println!();
    println!("✅ Results stored in {}", invocation.dir().display());

    judge.shutdown();
    Ok(())
}
