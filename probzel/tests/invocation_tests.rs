//! Invocation pipeline, manager and archive against the scripted sandbox

mod common;

use common::{eventually, home, read, sample_problem, start_gated_judge, start_judge, write};
use convenient_judge::ResourceLimits;
use probzel::invocation::{InvocationError, RESULTS_DIR, cell_name};
use probzel::{
    ArchivedInvocation, InvocationManager, InvocationPlan, InvocationRef, InvocationView, Problem,
    TestCase, Verdict,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Plan over hand-made files: `sources` are (name, program) pairs, tests
/// are (input, answer) pairs
fn manual_plan(dir: &Path, sources: &[(&str, &str)], tests: &[(&str, &str)]) -> InvocationPlan {
    let checker = dir.join("checker");
    write(&checker, "checker");

    let sources_dir = dir.join("solutions");
    let mut solutions = Vec::new();
    let mut paths = Vec::new();
    for (name, program) in sources {
        let path = sources_dir.join(name);
        write(&path, program);
        solutions.push(name.to_string());
        paths.push(path);
    }

    let cases = tests
        .iter()
        .enumerate()
        .map(|(position, (input, answer))| {
            let input_path = dir.join(format!("tests/{:03}", position + 1));
            let answer_path = dir.join(format!("tests/{:03}.a", position + 1));
            write(&input_path, input);
            write(&answer_path, answer);
            TestCase {
                index: position + 1,
                input: input_path,
                answer: answer_path,
            }
        })
        .collect();

    InvocationPlan {
        solutions,
        sources: paths,
        tests: cases,
        checker,
        limits: ResourceLimits::for_solution(1000, 256_000, 2, 4),
    }
}

#[test]
fn test_full_matrix_from_problem() {
    let tmp = sample_problem();
    let (judge, _) = start_judge(tmp.path());
    let problem = Problem::open(home(&tmp), judge.handle()).unwrap();
    problem.update_tests().unwrap();

    let solutions = problem.solutions().unwrap();
    assert_eq!(
        solutions,
        ["broken.cpp", "crash.cpp", "main.cpp", "slow.cpp", "wrong.cpp"]
    );
    let plan = problem.invocation_plan(&solutions).unwrap();

    let manager = InvocationManager::new(problem.invocations_dir(), judge.handle());
    let invocation = manager.new_invocation(plan).unwrap();
    invocation.wait();

    assert!(invocation.is_finished());
    assert_eq!(invocation.uid(), 0);
    assert_eq!(invocation.tests(), [1, 2, 3]);
    let expected = vec![
        vec![Verdict::CompilationError; 3],
        vec![Verdict::RuntimeError; 3],
        vec![Verdict::Accepted; 3],
        vec![Verdict::TimeLimitHard; 3],
        vec![Verdict::WrongAnswer; 3],
    ];
    assert_eq!(invocation.matrix(), expected);

    let cell = invocation.get_descriptor(2, 1);
    assert_eq!(cell.time_usage, Some(100));
    assert_eq!(cell.mem_usage, Some(2048));
    assert_eq!(invocation.get_result(9, 0), Verdict::Incomplete);

    let dir = invocation.dir();
    assert_eq!(read(&dir.join("outputs").join(cell_name(2, 1))), "7\n");
    assert!(read(&dir.join("compilation/0.log")).contains("error"));
    assert!(dir.join("bin/2").is_file());
    assert!(!dir.join("bin/0").exists());

    // A fresh manager only sees the archive, with the same verdicts
    let other = InvocationManager::new(problem.invocations_dir(), judge.handle());
    match other.get_invocation(0) {
        Some(InvocationRef::Archived(archive)) => {
            assert_eq!(archive.matrix(), expected);
            assert_eq!(archive.solutions(), solutions.as_slice());
            assert_eq!(archive.get_descriptor(2, 1).time_usage, Some(100));
        }
        other => panic!("expected an archived invocation, got {other:?}"),
    }
    assert!(manager.get_invocation(0).unwrap().is_live());
    assert!(other.get_invocation(1).is_none());
}

#[test]
fn test_ids_are_sequential_and_skip_foreign_entries() {
    let tmp = TempDir::new().unwrap();
    let (judge, _) = start_judge(tmp.path());
    let root = tmp.path().join("invocations");
    let manager = InvocationManager::new(&root, judge.handle());
    let plan = manual_plan(tmp.path(), &[("main.cpp", "sum")], &[("1 1", "2")]);

    assert!(manager.list_invocations().unwrap().is_empty());

    let first = manager.new_invocation(plan.clone()).unwrap();
    let second = manager.new_invocation(plan.clone()).unwrap();
    assert_eq!(first.uid(), 0);
    assert_eq!(second.uid(), 1);

    fs::create_dir_all(root.join("7")).unwrap();
    fs::create_dir_all(root.join("100001")).unwrap();
    fs::create_dir_all(root.join("notes")).unwrap();
    fs::write(root.join("12"), "not a directory").unwrap();

    let third = manager.new_invocation(plan).unwrap();
    assert_eq!(third.uid(), 8);
    assert_eq!(manager.list_invocations().unwrap(), vec![0, 1, 7, 8]);

    for invocation in [&first, &second, &third] {
        invocation.wait();
        assert_eq!(invocation.matrix(), vec![vec![Verdict::Accepted]]);
    }
    let active: Vec<u32> = manager.list_active().iter().map(|i| i.uid()).collect();
    assert_eq!(active, vec![0, 1, 8]);

    // Directory 7 has no meta.json: an empty archive
    let empty = manager.get_invocation(7).unwrap();
    assert!(!empty.is_live());
    assert!(empty.solutions().is_empty());
}

#[test]
fn test_archive_degrades_per_cell() {
    let tmp = TempDir::new().unwrap();
    let (judge, _) = start_judge(tmp.path());
    let manager = InvocationManager::new(tmp.path().join("invocations"), judge.handle());
    let plan = manual_plan(
        tmp.path(),
        &[("a.cpp", "sum"), ("b.cpp", "wrong")],
        &[("1 2", "3"), ("2 2", "4")],
    );

    let invocation = manager.new_invocation(plan).unwrap();
    invocation.wait();
    fs::remove_file(invocation.dir().join(RESULTS_DIR).join(cell_name(1, 1))).unwrap();

    let archive = ArchivedInvocation::load(invocation.uid(), invocation.dir());
    assert_eq!(
        archive.matrix(),
        vec![
            vec![Verdict::Accepted, Verdict::Accepted],
            vec![Verdict::WrongAnswer, Verdict::Incomplete],
        ]
    );
    let meta = archive.metadata().unwrap();
    assert_eq!(meta.timelimit, Some(1000));
    assert_eq!(meta.memorylimit, Some(256_000));
    assert!(meta.created_at.is_some());
}

#[test]
fn test_checker_failure_and_runtime_error() {
    let tmp = TempDir::new().unwrap();
    let (judge, _) = start_judge(tmp.path());
    let manager = InvocationManager::new(tmp.path().join("invocations"), judge.handle());
    let mut plan = manual_plan(tmp.path(), &[("crash.cpp", "crash")], &[("1 2", "")]);

    // Empty output matches the empty answer: the checker accepts, the run still failed
    let invocation = manager.new_invocation(plan.clone()).unwrap();
    invocation.wait();
    assert_eq!(invocation.get_result(0, 0), Verdict::RuntimeError);

    // A checker that cannot run turns every checked cell into FL
    write(&plan.checker, "not a known program");
    plan.solutions = vec!["main.cpp".to_string()];
    plan.sources = vec![tmp.path().join("solutions/main.cpp")];
    write(&plan.sources[0], "sum");
    let invocation = manager.new_invocation(plan).unwrap();
    invocation.wait();
    assert_eq!(invocation.get_result(0, 0), Verdict::Failed);
}

#[test]
fn test_judge_shut_down_fails_every_cell() {
    let tmp = TempDir::new().unwrap();
    let (judge, _) = start_judge(tmp.path());
    let handle = judge.handle();
    judge.shutdown();

    let manager = InvocationManager::new(tmp.path().join("invocations"), handle);
    let plan = manual_plan(tmp.path(), &[("main.cpp", "sum")], &[("1", "1"), ("2", "2")]);
    let invocation = manager.new_invocation(plan).unwrap();
    invocation.wait();

    assert_eq!(invocation.matrix(), vec![vec![Verdict::Failed; 2]]);
    let archive = ArchivedInvocation::load(invocation.uid(), invocation.dir());
    assert_eq!(archive.matrix(), vec![vec![Verdict::Failed; 2]]);
}

#[test]
fn test_empty_plan_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let (judge, _) = start_judge(tmp.path());
    let manager = InvocationManager::new(tmp.path().join("invocations"), judge.handle());
    let plan = manual_plan(tmp.path(), &[("main.cpp", "sum")], &[]);

    assert!(manager.new_invocation(plan).is_err());
    assert!(manager.list_invocations().unwrap().is_empty());
}

#[test]
fn test_sources_must_match_solutions() {
    let tmp = TempDir::new().unwrap();
    let (judge, _) = start_judge(tmp.path());
    let manager = InvocationManager::new(tmp.path().join("invocations"), judge.handle());
    let mut plan = manual_plan(tmp.path(), &[("main.cpp", "sum")], &[("1 2", "3")]);
    plan.solutions.push("extra.cpp".to_string());

    assert!(matches!(
        manager.new_invocation(plan),
        Err(InvocationError::PlanMismatch {
            solutions: 2,
            sources: 1
        })
    ));
    assert!(manager.list_invocations().unwrap().is_empty());
}

#[test]
fn test_live_states_follow_the_queue() {
    let tmp = TempDir::new().unwrap();
    let (judge, gate) = start_gated_judge(tmp.path());
    let manager = InvocationManager::new(tmp.path().join("invocations"), judge.handle());
    let plan = manual_plan(
        tmp.path(),
        &[("a.cpp", "sum"), ("b.cpp", "sum")],
        &[("1 2", "3")],
    );
    let invocation = manager.new_invocation(plan).unwrap();
    let states = || (invocation.get_result(0, 0), invocation.get_result(1, 0));

    // Both compilations queued, the first one in the sandbox
    assert!(gate.next().iter().any(|arg| arg == "source.cpp"));
    eventually("a compiling, b waiting", || {
        states() == (Verdict::Compiling, Verdict::Waiting)
    });
    assert!(!invocation.is_finished());

    // a compiled, its run queued behind b's compilation
    gate.open_once();
    assert!(gate.next().iter().any(|arg| arg == "source.cpp"));
    eventually("a pending, b compiling", || {
        states() == (Verdict::Pending, Verdict::Compiling)
    });

    gate.open_once();
    assert!(!gate.next().iter().any(|arg| arg == "source.cpp"));
    eventually("a running, b pending", || {
        states() == (Verdict::Running, Verdict::Pending)
    });

    // a's checker queued behind b's run
    gate.open_once();
    assert_ne!(gate.next().last().map(String::as_str), Some("correct"));
    eventually("a checking, b running", || {
        states() == (Verdict::Checking, Verdict::Running)
    });

    gate.open_once();
    assert_eq!(gate.next().last().map(String::as_str), Some("correct"));
    eventually("both checking", || {
        states() == (Verdict::Checking, Verdict::Checking)
    });
    assert!(!invocation.is_finished());

    drop(gate);
    invocation.wait();
    assert_eq!(
        invocation.matrix(),
        vec![vec![Verdict::Accepted], vec![Verdict::Accepted]]
    );
}
