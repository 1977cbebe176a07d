//! Triggers accepted by the render state graph.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    StartRender,
    RenderFunctionalRequirement,
    MarkUnitTestsReady,
    MarkUnitTestsFailed,
    MarkUnitTestsPassed,
    RestartFridProcessing,
    ProceedFridProcessing,
    RefactorCode,
    StartNewRefactoringIteration,
    MarkConformanceTestsReady,
    MarkTestingEnvironmentPrepared,
    MarkConformanceTestsFailed,
    MoveToNextConformanceTest,
    MarkRegenerationOfConformanceTests,
    MarkAllConformanceTestsPassed,
    PrepareNextPostprocessingStep,
    PrepareFinalOutput,
    HandleError,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::StartRender => "start_render",
            Trigger::RenderFunctionalRequirement => "render_functional_requirement",
            Trigger::MarkUnitTestsReady => "mark_unit_tests_ready",
            Trigger::MarkUnitTestsFailed => "mark_unit_tests_failed",
            Trigger::MarkUnitTestsPassed => "mark_unit_tests_passed",
            Trigger::RestartFridProcessing => "restart_frid_processing",
            Trigger::ProceedFridProcessing => "proceed_frid_processing",
            Trigger::RefactorCode => "refactor_code",
            Trigger::StartNewRefactoringIteration => "start_new_refactoring_iteration",
            Trigger::MarkConformanceTestsReady => "mark_conformance_tests_ready",
            Trigger::MarkTestingEnvironmentPrepared => "mark_testing_environment_prepared",
            Trigger::MarkConformanceTestsFailed => "mark_conformance_tests_failed",
            Trigger::MoveToNextConformanceTest => "move_to_next_conformance_test",
            Trigger::MarkRegenerationOfConformanceTests => {
                "mark_regeneration_of_conformance_tests"
            }
            Trigger::MarkAllConformanceTestsPassed => "mark_all_conformance_tests_passed",
            Trigger::PrepareNextPostprocessingStep => "prepare_next_postprocessing_step",
            Trigger::PrepareFinalOutput => "prepare_final_output",
            Trigger::HandleError => "handle_error",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
