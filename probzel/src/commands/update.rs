//! Update command: build and post the tests of a problem

use super::{CommandResult, Workspace, lock_policy};
use crate::lock::DirLock;
use std::fs;

/// Rebuild whatever changed and post inputs and answers
pub async fn execute(workspace: &Workspace) -> CommandResult {
    println!("🧪 Building tests for {}", workspace.home.display());

    let work = workspace.work_dir();
    fs::create_dir_all(&work)?;
    let _lock = DirLock::acquire(&work, "probzel tests", &lock_policy())?;

    let judge = workspace.start_judge()?;
    let problem = workspace.open(&judge)?;
    let report = tokio::task::block_in_place(|| problem.update_tests())?;

    println!();
    println!("  Tests:       {}", report.tests);
    println!("  Generators:  {}", report.generators.len());
    if report.validated {
        if report.invalid_tests.is_empty() {
            println!("  Validation:  ✓ all tests valid");
        } else {
            let shown: Vec<String> = report
                .invalid_tests
                .iter()
                .take(10)
                .map(ToString::to_string)
                .collect();
            println!(
                "  Validation:  ⚠️  problems in tests {}{}",
                shown.join(","),
                if report.invalid_tests.len() > 10 { "..." } else { "" }
            );
        }
    } else {
        println!("  Validation:  skipped (no validator)");
    }
    println!();
    println!("✅ Tests posted to {}", work.join("tests").display());

    judge.shutdown();
    Ok(())
}
