//! The render state tree and its transition table.

use anyhow::Result;

use crate::core::graph::{ActionId, GraphBuilder, Hook, StateGraph, StateId};
use crate::core::trigger::Trigger;

pub const RENDER_INITIALISED: &str = "RenderInitialised";
pub const IMPLEMENTING_FRID: &str = "ImplementingFrid";
pub const READY_FOR_FRID_IMPLEMENTATION: &str = "ImplementingFrid.ReadyForFridImplementation";
pub const IMPLEMENTATION_UNIT_TESTS: &str = "ImplementingFrid.ProcessingUnitTests";
pub const REFACTORING_CODE: &str = "ImplementingFrid.RefactoringCode";
pub const READY_FOR_REFACTORING: &str = "ImplementingFrid.RefactoringCode.ReadyForRefactoring";
pub const REFACTORING_UNIT_TESTS: &str = "ImplementingFrid.RefactoringCode.ProcessingUnitTests";
pub const PROCESSING_CONFORMANCE_TESTS: &str = "ImplementingFrid.ProcessingConformanceTests";
pub const CONFORMANCE_TESTING_INITIALISED: &str =
    "ImplementingFrid.ProcessingConformanceTests.ConformanceTestingInitialised";
pub const CONFORMANCE_TEST_GENERATED: &str =
    "ImplementingFrid.ProcessingConformanceTests.ConformanceTestGenerated";
pub const CONFORMANCE_TEST_ENVIRONMENT_PREPARED: &str =
    "ImplementingFrid.ProcessingConformanceTests.ConformanceTestEnvironmentPrepared";
pub const CONFORMANCE_TEST_FAILED: &str =
    "ImplementingFrid.ProcessingConformanceTests.ConformanceTestFailed";
pub const CONFORMANCE_UNIT_TESTS: &str =
    "ImplementingFrid.ProcessingConformanceTests.ProcessingUnitTests";
pub const POSTPROCESSING: &str =
    "ImplementingFrid.ProcessingConformanceTests.PostprocessingConformanceTests";
pub const READY_FOR_SUMMARY: &str =
    "ImplementingFrid.ProcessingConformanceTests.PostprocessingConformanceTests.ReadyForSummary";
pub const READY_FOR_COMMIT: &str =
    "ImplementingFrid.ProcessingConformanceTests.PostprocessingConformanceTests.ReadyForCommit";
pub const READY_FOR_AMBIGUITY_ANALYSIS: &str = "ImplementingFrid.ProcessingConformanceTests.PostprocessingConformanceTests.ReadyForAmbiguityAnalysis";
pub const FRID_FULLY_IMPLEMENTED: &str = "ImplementingFrid.FridFullyImplemented";
pub const RENDER_COMPLETED: &str = "RenderCompleted";
pub const RENDER_FAILED: &str = "RenderFailed";

pub const PROCESSING_UNIT_TESTS: &str = "ProcessingUnitTests";
pub const UNIT_TESTS_READY: &str = "UnitTestsReady";
pub const UNIT_TESTS_FAILED: &str = "UnitTestsFailed";
pub const UNIT_TESTS_PASSED: &str = "UnitTestsPassed";

/// Configuration for one instance of the unit-tests fragment.
#[derive(Debug, Clone, Copy)]
pub struct UnitTestsFragment {
    pub on_enter: Hook,
    pub on_exit: Hook,
    pub on_failed: Hook,
    /// Action of the `UnitTestsPassed` leaf, when the instance has one.
    pub passed_action: Option<ActionId>,
}

impl UnitTestsFragment {
    pub fn for_implementation() -> Self {
        Self {
            on_enter: Hook::StartUnitTestsProcessing,
            on_exit: Hook::FinishUnitTestsProcessing,
            on_failed: Hook::StartFixingUnitTests,
            passed_action: Some(ActionId::CommitImplementedCode),
        }
    }

    pub fn for_refactoring() -> Self {
        Self {
            on_enter: Hook::StartUnitTestsProcessing,
            on_exit: Hook::FinishUnitTestsProcessing,
            on_failed: Hook::StartFixingUnitTestsInRefactoring,
            passed_action: Some(ActionId::CommitRefactoredCode),
        }
    }

    /// Succeeds straight back into the conformance cycle.
    pub fn for_conformance() -> Self {
        Self {
            on_enter: Hook::StartUnitTestsProcessingInConformance,
            on_exit: Hook::FinishUnitTestsProcessing,
            on_failed: Hook::StartFixingUnitTestsInConformance,
            passed_action: None,
        }
    }

    /// Add `ProcessingUnitTests` under `parent` with its internal transitions.
    pub fn build(self, b: &mut GraphBuilder, parent: StateId) -> Result<StateId> {
        let fragment = b.composite(parent, PROCESSING_UNIT_TESTS)?;
        b.on_enter(fragment, self.on_enter);
        b.on_exit(fragment, self.on_exit);

        let ready = b.leaf(fragment, UNIT_TESTS_READY, ActionId::RunUnitTests)?;
        let failed = b.leaf(fragment, UNIT_TESTS_FAILED, ActionId::FixUnitTests)?;
        b.on_enter(failed, self.on_failed);
        b.transition_ids(ready, Trigger::MarkUnitTestsFailed, failed)?;
        b.transition_ids(failed, Trigger::MarkUnitTestsReady, ready)?;

        if let Some(action) = self.passed_action {
            let passed = b.leaf(fragment, UNIT_TESTS_PASSED, action)?;
            b.transition_ids(ready, Trigger::MarkUnitTestsPassed, passed)?;
        }
        Ok(fragment)
    }
}

fn child(parent: &str, name: &str) -> String {
    format!("{parent}.{name}")
}

/// Build the complete render graph.
pub fn render_graph() -> Result<StateGraph> {
    let mut b = GraphBuilder::new();
    let root = b.root();

    b.leaf(root, RENDER_INITIALISED, ActionId::PrepareRepositories)?;

    let implementing = b.composite(root, IMPLEMENTING_FRID)?;
    b.on_enter(implementing, Hook::StartImplementingFrid);
    b.on_exit(implementing, Hook::FinishImplementingFrid);

    let ready_for_frid = b.leaf(
        implementing,
        "ReadyForFridImplementation",
        ActionId::RenderFunctionalRequirement,
    )?;
    b.on_enter(ready_for_frid, Hook::CheckFridIterationLimit);

    UnitTestsFragment::for_implementation().build(&mut b, implementing)?;

    let refactoring = b.composite(implementing, "RefactoringCode")?;
    let ready_for_refactoring =
        b.leaf(refactoring, "ReadyForRefactoring", ActionId::RefactorCode)?;
    b.on_enter(ready_for_refactoring, Hook::StartRefactoringCode);
    UnitTestsFragment::for_refactoring().build(&mut b, refactoring)?;

    let conformance = b.composite(implementing, "ProcessingConformanceTests")?;
    b.on_enter(conformance, Hook::StartConformanceTestsProcessing);
    b.on_exit(conformance, Hook::FinishConformanceTestsProcessing);
    let initialised = b.leaf(
        conformance,
        "ConformanceTestingInitialised",
        ActionId::RenderConformanceTests,
    )?;
    b.on_enter(initialised, Hook::StartConformanceTestsForFrid);
    let generated = b.leaf(
        conformance,
        "ConformanceTestGenerated",
        ActionId::PrepareTestingEnvironment,
    )?;
    b.on_enter(generated, Hook::StartTestingEnvironmentPreparation);
    b.leaf(
        conformance,
        "ConformanceTestEnvironmentPrepared",
        ActionId::RunConformanceTests,
    )?;
    let failed = b.leaf(
        conformance,
        "ConformanceTestFailed",
        ActionId::FixConformanceTest,
    )?;
    b.on_enter(failed, Hook::StartFixingConformanceTests);
    b.on_exit(failed, Hook::FinishFixingConformanceTests);
    UnitTestsFragment::for_conformance().build(&mut b, conformance)?;

    let postprocessing = b.composite(conformance, "PostprocessingConformanceTests")?;
    b.leaf(
        postprocessing,
        "ReadyForSummary",
        ActionId::SummarizeConformanceTests,
    )?;
    b.leaf(
        postprocessing,
        "ReadyForCommit",
        ActionId::CommitConformanceTestsChanges,
    )?;
    b.leaf(
        postprocessing,
        "ReadyForAmbiguityAnalysis",
        ActionId::AnalyzeSpecificationAmbiguity,
    )?;

    b.leaf(
        implementing,
        "FridFullyImplemented",
        ActionId::FinishFunctionalRequirement,
    )?;

    b.terminal(root, RENDER_COMPLETED, ActionId::CreateDist)?;
    b.terminal(root, RENDER_FAILED, ActionId::ExitWithError)?;

    add_transitions(&mut b)?;
    b.build()
}

fn add_transitions(b: &mut GraphBuilder) -> Result<()> {
    let impl_failed = child(IMPLEMENTATION_UNIT_TESTS, UNIT_TESTS_FAILED);
    let impl_passed = child(IMPLEMENTATION_UNIT_TESTS, UNIT_TESTS_PASSED);
    let refactor_failed = child(REFACTORING_UNIT_TESTS, UNIT_TESTS_FAILED);
    let refactor_passed = child(REFACTORING_UNIT_TESTS, UNIT_TESTS_PASSED);
    let conformance_ready = child(CONFORMANCE_UNIT_TESTS, UNIT_TESTS_READY);
    let conformance_failed = child(CONFORMANCE_UNIT_TESTS, UNIT_TESTS_FAILED);

    let table: [(&str, Trigger, &str); 25] = [
        (RENDER_INITIALISED, Trigger::StartRender, IMPLEMENTING_FRID),
        (IMPLEMENTING_FRID, Trigger::PrepareFinalOutput, RENDER_COMPLETED),
        (
            READY_FOR_FRID_IMPLEMENTATION,
            Trigger::RenderFunctionalRequirement,
            IMPLEMENTATION_UNIT_TESTS,
        ),
        (
            impl_failed.as_str(),
            Trigger::RestartFridProcessing,
            READY_FOR_FRID_IMPLEMENTATION,
        ),
        (impl_passed.as_str(), Trigger::ProceedFridProcessing, REFACTORING_CODE),
        (
            READY_FOR_REFACTORING,
            Trigger::RefactorCode,
            REFACTORING_UNIT_TESTS,
        ),
        (
            READY_FOR_REFACTORING,
            Trigger::ProceedFridProcessing,
            PROCESSING_CONFORMANCE_TESTS,
        ),
        (
            refactor_failed.as_str(),
            Trigger::StartNewRefactoringIteration,
            READY_FOR_REFACTORING,
        ),
        (
            refactor_passed.as_str(),
            Trigger::ProceedFridProcessing,
            READY_FOR_REFACTORING,
        ),
        (
            PROCESSING_CONFORMANCE_TESTS,
            Trigger::ProceedFridProcessing,
            FRID_FULLY_IMPLEMENTED,
        ),
        (
            PROCESSING_CONFORMANCE_TESTS,
            Trigger::MarkAllConformanceTestsPassed,
            POSTPROCESSING,
        ),
        (
            CONFORMANCE_TESTING_INITIALISED,
            Trigger::MarkConformanceTestsReady,
            CONFORMANCE_TEST_GENERATED,
        ),
        (
            CONFORMANCE_TEST_GENERATED,
            Trigger::MarkTestingEnvironmentPrepared,
            CONFORMANCE_TEST_ENVIRONMENT_PREPARED,
        ),
        (
            CONFORMANCE_TEST_ENVIRONMENT_PREPARED,
            Trigger::MarkConformanceTestsFailed,
            CONFORMANCE_TEST_FAILED,
        ),
        (
            CONFORMANCE_TEST_ENVIRONMENT_PREPARED,
            Trigger::MoveToNextConformanceTest,
            CONFORMANCE_TESTING_INITIALISED,
        ),
        (
            CONFORMANCE_TEST_FAILED,
            Trigger::MarkRegenerationOfConformanceTests,
            CONFORMANCE_TESTING_INITIALISED,
        ),
        (
            CONFORMANCE_TEST_FAILED,
            Trigger::MarkConformanceTestsReady,
            CONFORMANCE_TEST_ENVIRONMENT_PREPARED,
        ),
        (
            CONFORMANCE_TEST_FAILED,
            Trigger::MarkUnitTestsReady,
            CONFORMANCE_UNIT_TESTS,
        ),
        (
            conformance_ready.as_str(),
            Trigger::MarkUnitTestsPassed,
            CONFORMANCE_TEST_GENERATED,
        ),
        (
            conformance_failed.as_str(),
            Trigger::RestartFridProcessing,
            READY_FOR_FRID_IMPLEMENTATION,
        ),
        (
            READY_FOR_SUMMARY,
            Trigger::PrepareNextPostprocessingStep,
            READY_FOR_COMMIT,
        ),
        (
            READY_FOR_COMMIT,
            Trigger::PrepareNextPostprocessingStep,
            READY_FOR_AMBIGUITY_ANALYSIS,
        ),
        (
            READY_FOR_COMMIT,
            Trigger::ProceedFridProcessing,
            FRID_FULLY_IMPLEMENTED,
        ),
        (
            READY_FOR_AMBIGUITY_ANALYSIS,
            Trigger::ProceedFridProcessing,
            FRID_FULLY_IMPLEMENTED,
        ),
        (
            FRID_FULLY_IMPLEMENTED,
            Trigger::ProceedFridProcessing,
            IMPLEMENTING_FRID,
        ),
    ];
    for (from, trigger, to) in table {
        b.transition(from, trigger, to)?;
    }
    b.wildcard(Trigger::HandleError, RENDER_FAILED)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> StateGraph {
        render_graph().expect("render graph")
    }

    #[test]
    fn every_leaf_has_an_action() {
        let g = graph();
        let leaves: Vec<StateId> = g.leaves().collect();
        assert_eq!(leaves.len(), 21);
        for leaf in leaves {
            assert!(g.action(leaf).is_some(), "{} has no action", g.name(leaf));
        }
    }

    #[test]
    fn only_conformance_fragment_lacks_passed_leaf() {
        let g = graph();
        assert!(g.state(&child(IMPLEMENTATION_UNIT_TESTS, UNIT_TESTS_PASSED)).is_some());
        assert!(g.state(&child(REFACTORING_UNIT_TESTS, UNIT_TESTS_PASSED)).is_some());
        assert!(g.state(&child(CONFORMANCE_UNIT_TESTS, UNIT_TESTS_PASSED)).is_none());
    }

    #[test]
    fn fragment_instances_carry_their_own_failure_hooks() {
        let g = graph();
        let hook = |parent: &str| {
            let state = g.state(&child(parent, UNIT_TESTS_FAILED)).expect("failed state");
            g.on_enter(state)
        };
        assert_eq!(hook(IMPLEMENTATION_UNIT_TESTS), Some(Hook::StartFixingUnitTests));
        assert_eq!(
            hook(REFACTORING_UNIT_TESTS),
            Some(Hook::StartFixingUnitTestsInRefactoring)
        );
        assert_eq!(
            hook(CONFORMANCE_UNIT_TESTS),
            Some(Hook::StartFixingUnitTestsInConformance)
        );
    }

    #[test]
    fn initial_children_follow_declaration_order() {
        let g = graph();
        let implementing = g.state(IMPLEMENTING_FRID).expect("implementing");
        assert_eq!(
            g.initial_child(implementing),
            g.state(READY_FOR_FRID_IMPLEMENTATION)
        );
        let post = g.state(POSTPROCESSING).expect("post");
        assert_eq!(g.initial_child(post), g.state(READY_FOR_SUMMARY));
        assert_eq!(g.name(g.initial_state()), RENDER_INITIALISED);
    }

    #[test]
    fn handle_error_reaches_failed_from_deep_states() {
        let g = graph();
        let deep = g.state(READY_FOR_AMBIGUITY_ANALYSIS).expect("deep");
        assert_eq!(g.resolve(deep, Trigger::HandleError), g.state(RENDER_FAILED));
    }

    #[test]
    fn conformance_completion_is_resolved_from_children() {
        let g = graph();
        let initialised = g.state(CONFORMANCE_TESTING_INITIALISED).expect("init");
        assert_eq!(
            g.resolve(initialised, Trigger::MarkAllConformanceTestsPassed),
            g.state(POSTPROCESSING)
        );
        let passed = g
            .state(&child(REFACTORING_UNIT_TESTS, UNIT_TESTS_PASSED))
            .expect("passed");
        assert_eq!(
            g.resolve(passed, Trigger::ProceedFridProcessing),
            g.state(READY_FOR_REFACTORING)
        );
    }
}
