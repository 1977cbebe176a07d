//! End-to-end renders against scripted collaborators and real git repositories.

use std::sync::Arc;

use renderer::core::error::{ErrorKind, ServiceError};
use renderer::core::frid::{Frid, FridRange};
use renderer::driver::RenderStatus;
use renderer::events::{CancelToken, RenderEvent};
use renderer::io::conformance_store::ConformanceStore;
use renderer::io::git::{CheckpointKind, Git};
use renderer::io::run_state::RunState;
use renderer::io::service::ConformanceTestFix;
use renderer::render::{RenderReport, render_module};
use renderer::test_support::{
    CONFORMANCE_SPEC, RecordingSink, ScriptedScriptRunner, ScriptedService, TestWorkspace,
    collaborators, flat_spec, spec_tree,
};

fn frid(s: &str) -> Frid {
    s.parse().expect("frid")
}

fn render(
    workspace: &TestWorkspace,
    spec_json: Option<&str>,
    service: &ScriptedService,
    scripts: &ScriptedScriptRunner,
    run_state: RunState,
    range: Option<FridRange>,
    sink: &RecordingSink,
) -> RenderReport {
    let spec = match spec_json {
        Some(json) => spec_tree(json).expect("spec"),
        None => flat_spec(&["Print hello world."]).expect("spec"),
    };
    render_module(
        workspace.config().clone(),
        range,
        run_state,
        collaborators(spec, service, scripts),
        Arc::new(sink.clone()),
        CancelToken::new(),
    )
    .expect("render")
}

fn count(calls: &[String], name: &str) -> usize {
    calls.iter().filter(|call| call.as_str() == name).count()
}

#[test]
fn single_requirement_without_conformance_tests_completes() {
    let workspace = TestWorkspace::new().expect("workspace").with_unit_tests_script();
    let service = ScriptedService::default();
    service.push_render(Ok(ScriptedService::files(&[
        ("hello.py", "print('hello world')\n"),
        ("test_hello.py", "def test_hello(): pass\n"),
    ])));
    let scripts = ScriptedScriptRunner::default();
    let sink = RecordingSink::default();

    let report = render(&workspace, None, &service, &scripts, RunState::new(None), None, &sink);

    assert_eq!(report.status, RenderStatus::Completed);
    assert_eq!(report.error, None);
    assert_eq!(
        sink.states(),
        vec![
            "RenderInitialised",
            "ImplementingFrid.ReadyForFridImplementation",
            "ImplementingFrid.ProcessingUnitTests.UnitTestsReady",
            "ImplementingFrid.ProcessingUnitTests.UnitTestsPassed",
            "ImplementingFrid.RefactoringCode.ReadyForRefactoring",
            "ImplementingFrid.FridFullyImplemented",
            "RenderCompleted",
        ]
    );

    let build = Git::new(&workspace.config().build_folder);
    assert!(
        build
            .find_checkpoint(Some(&frid("1")), Some(CheckpointKind::Finished))
            .expect("search")
            .is_some()
    );
    assert!(workspace.config().build_folder.join("hello.py").is_file());

    let events = sink.events();
    assert!(matches!(
        events.first(),
        Some(RenderEvent::RenderModuleStarted { module_name }) if module_name == "hello_module"
    ));
    assert!(events.iter().any(|event| matches!(
        event,
        RenderEvent::RenderCompleted { render_id } if *render_id == report.render_id
    )));
}

#[test]
fn failing_unit_tests_restart_once_then_fail() {
    let workspace = TestWorkspace::new().expect("workspace").with_unit_tests_script();
    let script = workspace.config().unittests_script.clone().expect("script");
    let service = ScriptedService::default();
    let scripts = ScriptedScriptRunner::default();
    scripts.push_times(&script, 1, "AssertionError: expected hello", 50);
    let sink = RecordingSink::default();

    let report = render(&workspace, None, &service, &scripts, RunState::new(None), None, &sink);

    assert_eq!(report.status, RenderStatus::Failed);
    let error = report.error.expect("error");
    assert_eq!(error.kind, ErrorKind::LimitExceeded);
    assert_eq!(error.frid, Some(frid("1")));

    let calls = service.calls();
    assert_eq!(count(&calls, "render_functional_requirement"), 2);
    assert_eq!(count(&calls, "fix_unit_tests"), 40);
    assert_eq!(scripts.runs_of(&script), 42);
    assert_eq!(sink.states().last().map(String::as_str), Some("RenderFailed"));
    assert!(
        service
            .unit_test_issues()
            .iter()
            .all(|issue| issue.contains("AssertionError"))
    );
}

#[test]
fn too_complex_requirement_fails_without_running_tests() {
    let workspace = TestWorkspace::new().expect("workspace").with_unit_tests_script();
    let service = ScriptedService::default();
    service.push_render(Err(ServiceError::TooComplex {
        message: "split the requirement".to_string(),
        proposed_breakdown: vec!["Print hello.".to_string(), "Print world.".to_string()],
    }));
    let scripts = ScriptedScriptRunner::default();
    let sink = RecordingSink::default();

    let report = render(&workspace, None, &service, &scripts, RunState::new(None), None, &sink);

    assert_eq!(report.status, RenderStatus::Failed);
    let error = report.error.expect("error");
    assert_eq!(error.kind, ErrorKind::Complexity);
    assert_eq!(error.proposed_breakdown.map(|parts| parts.len()), Some(2));
    assert!(scripts.requests().is_empty());
    assert!(
        !sink
            .states()
            .iter()
            .any(|state| state.contains("ProcessingUnitTests"))
    );
    assert!(sink.events().iter().any(|event| matches!(
        event,
        RenderEvent::RenderFailed { message } if message.contains("Print world.")
    )));
}

#[test]
fn refactoring_that_breaks_unit_tests_is_reverted() {
    let mut workspace = TestWorkspace::new().expect("workspace").with_unit_tests_script();
    workspace.config_mut().limits.max_unit_test_fix_attempts = 1;
    workspace.config_mut().limits.max_refactoring_iterations = 3;
    let script = workspace.config().unittests_script.clone().expect("script");
    let service = ScriptedService::default();
    service.push_render(Ok(ScriptedService::files(&[
        ("hello.py", "print('hello world')\n"),
        ("test_hello.py", "def test_hello(): pass\n"),
    ])));
    for _ in 0..2 {
        service.push_refactor(Ok(ScriptedService::files(&[
            ("hello.py", "from helpers import greet\ngreet()\n"),
            ("helpers.py", "def greet(): print('hello world')\n"),
        ])));
    }
    let scripts = ScriptedScriptRunner::default();
    scripts.push(&script, 0, "");
    scripts.push_times(&script, 1, "ImportError: cannot import name 'greet'", 4);
    let sink = RecordingSink::default();

    let report = render(&workspace, None, &service, &scripts, RunState::new(None), None, &sink);

    assert_eq!(report.status, RenderStatus::Completed, "{:?}", report.error);
    let calls = service.calls();
    // Iterations 1 and 2 refactor; iteration 3 reaches the limit.
    assert_eq!(count(&calls, "refactor"), 2);
    assert_eq!(count(&calls, "fix_unit_tests"), 2);
    assert_eq!(scripts.runs_of(&script), 5);
    let files_to_check = service.refactor_requests();
    assert_eq!(files_to_check.len(), 2);
    for files in &files_to_check {
        assert_eq!(files, &vec!["hello.py".to_string(), "test_hello.py".to_string()]);
    }

    let build = &workspace.config().build_folder;
    assert_eq!(
        std::fs::read_to_string(build.join("hello.py")).expect("read"),
        "print('hello world')\n"
    );
    assert!(!build.join("helpers.py").exists());
    let refactoring_iterations: Vec<u32> = sink
        .events()
        .iter()
        .filter_map(|event| match event {
            RenderEvent::RenderStateUpdated { state, snapshot, .. }
                if state == "ImplementingFrid.RefactoringCode.ReadyForRefactoring" =>
            {
                snapshot.frid_context.as_ref().map(|ctx| ctx.refactoring_iteration)
            }
            _ => None,
        })
        .collect();
    assert_eq!(refactoring_iterations, vec![1, 2]);
    assert!(
        Git::new(build)
            .find_checkpoint(Some(&frid("1")), Some(CheckpointKind::Finished))
            .expect("search")
            .is_some()
    );
}

#[test]
fn conformance_fix_budget_survives_passing_earlier_requirements() {
    let mut workspace = TestWorkspace::new()
        .expect("workspace")
        .with_conformance_tests_script();
    workspace.config_mut().limits.max_conformance_fix_attempts = 3;
    let script = workspace
        .config()
        .conformance_tests_script
        .clone()
        .expect("script");
    let spec = r#"{
      "module_name": "counter",
      "functional_requirements": [
        {"text": "Print one."},
        {"text": "Print two."}
      ]
    }"#;
    let service = ScriptedService::default();
    service.push_render(Ok(ScriptedService::files(&[("one.py", "print(1)\n")])));
    service.push_render(Ok(ScriptedService::files(&[("two.py", "print(2)\n")])));
    for attempt in 0..10 {
        let body = format!("print(2)  # {attempt}\n");
        service.push_conformance_fix(Ok(ConformanceTestFix {
            conformance_tests_fixed: false,
            files: ScriptedService::files(&[("two.py", body.as_str())]),
        }));
    }
    let scripts = ScriptedScriptRunner::default();
    scripts.fail_when_last_arg_ends_with(&script, "frid_2", 1, "expected 2, got nothing");
    let sink = RecordingSink::default();

    let report = render(&workspace, Some(spec), &service, &scripts, RunState::new(None), None, &sink);

    assert_eq!(report.status, RenderStatus::Failed);
    let error = report.error.expect("error");
    assert_eq!(error.kind, ErrorKind::LimitExceeded);
    assert_eq!(error.frid, Some(frid("2")));

    let calls = service.calls();
    // Two fixes, one regeneration, two more fixes.
    assert_eq!(count(&calls, "fix_conformance_test"), 4);
    assert_eq!(count(&calls, "render_conformance_tests"), 3);
    let runs_of_first = scripts
        .requests()
        .iter()
        .filter(|request| request.script == script)
        .filter(|request| request.args.last().is_some_and(|arg| arg.ends_with("frid_1")))
        .count();
    // Every implementation fix revalidates the first requirement, which passes.
    assert_eq!(runs_of_first, 6);
    assert_eq!(sink.states().last().map(String::as_str), Some("RenderFailed"));
}

#[test]
fn replayed_render_reuses_its_id_for_every_request() {
    let workspace = TestWorkspace::new().expect("workspace");
    let service = ScriptedService::default();
    service.push_render(Ok(ScriptedService::files(&[("hello.py", "print('hi')\n")])));
    let scripts = ScriptedScriptRunner::default();
    let sink = RecordingSink::default();

    let report = render(
        &workspace,
        None,
        &service,
        &scripts,
        RunState::new(Some("render-7".to_string())),
        None,
        &sink,
    );

    assert_eq!(report.status, RenderStatus::Completed);
    assert_eq!(report.render_id, "render-7");
    let metas = service.metas();
    assert!(!metas.is_empty());
    assert!(metas.iter().all(|meta| meta.render_id == "render-7"));
    assert!(
        metas
            .windows(2)
            .all(|pair| pair[0].call_index < pair[1].call_index)
    );
}

#[test]
fn conformance_tests_are_rendered_and_registered_per_requirement() {
    let workspace = TestWorkspace::new()
        .expect("workspace")
        .with_unit_tests_script()
        .with_conformance_tests_script();
    let conformance_script = workspace
        .config()
        .conformance_tests_script
        .clone()
        .expect("script");
    let service = ScriptedService::default();
    service.push_render(Ok(ScriptedService::files(&[("greet.py", "print('hi')\n")])));
    service.push_render(Ok(ScriptedService::files(&[(
        "greet.py",
        "import sys\nprint('hi', sys.argv[1])\n",
    )])));
    let scripts = ScriptedScriptRunner::default();
    let sink = RecordingSink::default();

    let report = render(
        &workspace,
        Some(CONFORMANCE_SPEC),
        &service,
        &scripts,
        RunState::new(None),
        None,
        &sink,
    );

    assert_eq!(report.status, RenderStatus::Completed, "{:?}", report.error);
    let calls = service.calls();
    assert_eq!(count(&calls, "render_functional_requirement"), 2);
    assert_eq!(count(&calls, "generate_folder_name"), 2);
    assert_eq!(count(&calls, "render_acceptance_test"), 2);
    // FRID 1 once, then FRID 1 again plus the block and two acceptance tests of FRID 2.
    assert_eq!(scripts.runs_of(&conformance_script), 5);

    let registry = ConformanceStore::new(&workspace.config().conformance_tests_folder)
        .load()
        .expect("registry");
    assert_eq!(registry.len(), 2);
    let second = registry.get(&frid("2")).expect("entry");
    assert_eq!(second.folder_name, "frid_2");
    assert_eq!(second.acceptance_tests.as_ref().map(Vec::len), Some(2));

    let conformance = Git::new(&workspace.config().conformance_tests_folder);
    for id in ["1", "2"] {
        assert!(
            conformance
                .find_checkpoint(Some(&frid(id)), Some(CheckpointKind::ConformanceTests))
                .expect("search")
                .is_some(),
            "no conformance checkpoint for {id}"
        );
    }
}

#[test]
fn render_from_resumes_after_the_previous_checkpoint() {
    let workspace = TestWorkspace::new().expect("workspace");
    let spec = r#"{
      "module_name": "counter",
      "functional_requirements": [
        {"text": "Print one."},
        {"text": "Print two."}
      ]
    }"#;
    let first_service = ScriptedService::default();
    first_service.push_render(Ok(ScriptedService::files(&[("one.py", "print(1)\n")])));
    first_service.push_render(Ok(ScriptedService::files(&[("two.py", "print(2)\n")])));
    let scripts = ScriptedScriptRunner::default();
    let first = render(
        &workspace,
        Some(spec),
        &first_service,
        &scripts,
        RunState::new(None),
        None,
        &RecordingSink::default(),
    );
    assert_eq!(first.status, RenderStatus::Completed);

    let resumed_service = ScriptedService::default();
    resumed_service.push_render(Ok(ScriptedService::files(&[("two.py", "print('two')\n")])));
    let report = render(
        &workspace,
        Some(spec),
        &resumed_service,
        &scripts,
        RunState::new(Some(first.render_id.clone())),
        Some(FridRange::from_start(frid("2"))),
        &RecordingSink::default(),
    );

    assert_eq!(report.status, RenderStatus::Completed);
    assert_eq!(
        count(&resumed_service.calls(), "render_functional_requirement"),
        1
    );
    let build = &workspace.config().build_folder;
    assert!(build.join("one.py").is_file());
    assert_eq!(
        std::fs::read_to_string(build.join("two.py")).expect("read"),
        "print('two')\n"
    );
}

#[test]
fn cancelled_render_fails_before_any_work() {
    let workspace = TestWorkspace::new().expect("workspace");
    let service = ScriptedService::default();
    let scripts = ScriptedScriptRunner::default();
    let sink = RecordingSink::default();
    let cancel = CancelToken::new();
    cancel.cancel();

    let report = render_module(
        workspace.config().clone(),
        None,
        RunState::new(None),
        collaborators(flat_spec(&["Print hello."]).expect("spec"), &service, &scripts),
        Arc::new(sink.clone()),
        cancel,
    )
    .expect("render");

    assert_eq!(report.status, RenderStatus::Failed);
    assert_eq!(report.error.map(|err| err.kind), Some(ErrorKind::Cancelled));
    assert_eq!(sink.states(), vec!["RenderInitialised", "RenderFailed"]);
    assert_eq!(count(&service.calls(), "render_functional_requirement"), 0);
}
