//! Problem preparation against the scripted sandbox

mod common;

use common::{home, read, sample_problem, start_judge, write};
use probzel::{Problem, ProblemError, TestKind};

#[test]
fn test_update_tests_posts_inputs_and_answers() {
    let tmp = sample_problem();
    let (judge, _) = start_judge(tmp.path());
    let problem = Problem::open(home(&tmp), judge.handle()).unwrap();
    assert_eq!(problem.checker(), Some("check.cpp"));
    assert_eq!(problem.validator(), Some("validator.cpp"));
    assert_eq!(problem.script(), Some("script"));

    let report = problem.update_tests().unwrap();
    assert_eq!(report.tests, 3);
    assert_eq!(report.generators, vec!["gen.cpp".to_string()]);
    assert!(report.validated);
    assert!(report.invalid_tests.is_empty());

    let expected = [("1 2\n", "3\n"), ("3 4\n", "7\n"), ("10 20\n", "30\n")];
    for (index, (input, answer)) in expected.iter().enumerate() {
        let (input_path, answer_path) = problem.posted_test(index + 1);
        assert_eq!(read(&input_path), *input, "input of test {}", index + 1);
        assert_eq!(read(&answer_path), *answer, "answer of test {}", index + 1);
    }

    let testset = problem.testset(true).unwrap();
    assert_eq!(testset.len(), 3);
    assert!(matches!(testset.get(1).unwrap().kind(), TestKind::Manual { .. }));
    assert_eq!(testset.get(3).unwrap().display_command(), "gen 10 20");
    assert!(problem.work_dir().join("testset").is_file());

    let validation = problem.validation(2).unwrap().unwrap();
    assert!(validation.is_ok());
}

#[test]
fn test_second_update_only_redoes_what_changed() {
    let tmp = sample_problem();
    let (judge, recorder) = start_judge(tmp.path());
    let problem = Problem::open(home(&tmp), judge.handle()).unwrap();

    problem.update_tests().unwrap();
    let first = recorder.count();
    assert!(first > 0);

    problem.update_tests().unwrap();
    assert_eq!(recorder.count(), first, "nothing changed, nothing runs");

    write(&home(&tmp).join("tests.manual/01"), "5 6\n");
    problem.update_tests().unwrap();
    // Validator and model solution on the changed test only
    assert_eq!(recorder.count(), first + 2);
    let (_, answer) = problem.posted_test(1);
    assert_eq!(read(&answer), "11\n");
}

#[test]
fn test_invalid_tests_are_reported() {
    let tmp = sample_problem();
    write(&home(&tmp).join("tests.manual/01"), "bad input\n");
    let (judge, _) = start_judge(tmp.path());
    let problem = Problem::open(home(&tmp), judge.handle()).unwrap();

    let report = problem.update_tests().unwrap();
    assert_eq!(report.invalid_tests, vec![1]);
    let record = problem.validation(1).unwrap().unwrap();
    assert!(!record.is_ok());
    assert_eq!(record.exit_code, Some(1));
    assert_eq!(record.stderr, "FAIL unexpected token");
}

#[test]
fn test_generator_compilation_failure_aborts() {
    let tmp = sample_problem();
    write(&home(&tmp).join("source/gen.cpp"), "COMPILE_ERROR");
    let (judge, _) = start_judge(tmp.path());
    let problem = Problem::open(home(&tmp), judge.handle()).unwrap();

    match problem.update_tests() {
        Err(ProblemError::CompilationFailure { file, stderr, .. }) => {
            assert!(file.ends_with("gen.cpp"), "{}", file.display());
            assert!(stderr.contains("error"));
        }
        other => panic!("expected a compilation failure, got {other:?}"),
    }
    assert!(!problem.posted_test(1).0.exists());
}

#[test]
fn test_missing_script() {
    let tmp = sample_problem();
    std::fs::remove_file(home(&tmp).join("script")).unwrap();
    let (judge, _) = start_judge(tmp.path());
    let problem = Problem::open(home(&tmp), judge.handle()).unwrap();

    assert!(matches!(problem.update_tests(), Err(ProblemError::NoScript)));
}

#[test]
fn test_invocation_plan_requires_posted_tests() {
    let tmp = sample_problem();
    let (judge, _) = start_judge(tmp.path());
    let problem = Problem::open(home(&tmp), judge.handle()).unwrap();

    assert!(matches!(
        problem.invocation_plan(&["main.cpp".to_string()]),
        Err(ProblemError::TestsNotBuilt(_))
    ));

    problem.update_tests().unwrap();
    let plan = problem.invocation_plan(&["main.cpp".to_string()]).unwrap();
    assert_eq!(plan.test_indices(), vec![1, 2, 3]);
    assert_eq!(plan.limits.time_ms, Some(1000));
    assert_eq!(plan.limits.memory_kb, Some(256_000));

    assert!(matches!(
        problem.invocation_plan(&["missing.cpp".to_string()]),
        Err(ProblemError::MissingSource(_))
    ));
}
