//! Action outcomes and the global outcome-to-trigger table.

use std::collections::HashMap;

use anyhow::{Result, bail};

use crate::core::trigger::Trigger;

/// Declares the outcome enum together with its stable names and `ALL`, so a
/// variant cannot exist without being listed.
macro_rules! outcomes {
    ($($variant:ident => $name:literal),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Outcome {
            $($variant),*
        }

        impl Outcome {
            pub const ALL: &'static [Outcome] = &[$(Outcome::$variant),*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Outcome::$variant => $name),*
                }
            }
        }
    };
}

outcomes! {
    RepositoriesPrepared => "repositories_prepared",
    CodeAndUnitTestsGenerated => "code_and_unit_tests_generated",
    FunctionalRequirementTooComplex => "functional_requirement_too_complex",
    UnitTestsSucceeded => "unit_tests_succeeded",
    UnitTestsFailed => "unit_tests_failed",
    UnitTestsUnrecoverableError => "unit_tests_unrecoverable_error",
    UnitTestsFixGenerated => "unit_tests_fix_generated",
    ImplementationCodeChangesCommitted => "implementation_code_changes_committed",
    RefactoringSuccessful => "refactoring_successful",
    NoFilesRefactored => "no_files_refactored",
    ConformanceTestRendered => "conformance_test_rendered",
    TestingEnvironmentPrepared => "testing_environment_prepared",
    TestingEnvironmentPreparationFailed => "testing_environment_preparation_failed",
    ConformanceTestsPassed => "conformance_tests_passed",
    ConformanceTestsFailed => "conformance_tests_failed",
    ConformanceTestsUnrecoverableError => "conformance_tests_unrecoverable_error",
    ImplementationCodeNotUpdated => "implementation_code_not_updated",
    ImplementationCodeUpdated => "implementation_code_updated",
    ConformanceTestsSummarized => "conformance_tests_summarized",
    ConformanceTestsCommittedImplementationUpdated =>
        "conformance_tests_changes_committed_implementation_updated",
    ConformanceTestsCommittedImplementationNotUpdated =>
        "conformance_tests_changes_committed_implementation_not_updated",
    ConformanceTestsPostanalyzed => "conformance_tests_postanalyzed",
    FunctionalRequirementFinished => "functional_requirement_finished",
    DistCreated => "dist_created",
    ErrorHandled => "error_handled",
}

impl Outcome {
    /// Trigger for non-terminal outcomes. Terminal actions report `None`.
    fn trigger(self) -> Option<Trigger> {
        let trigger = match self {
            Outcome::RepositoriesPrepared => Trigger::StartRender,
            Outcome::CodeAndUnitTestsGenerated => Trigger::RenderFunctionalRequirement,
            Outcome::UnitTestsSucceeded => Trigger::MarkUnitTestsPassed,
            Outcome::UnitTestsFailed => Trigger::MarkUnitTestsFailed,
            Outcome::UnitTestsFixGenerated => Trigger::MarkUnitTestsReady,
            Outcome::ImplementationCodeChangesCommitted => Trigger::ProceedFridProcessing,
            Outcome::RefactoringSuccessful => Trigger::RefactorCode,
            Outcome::NoFilesRefactored => Trigger::ProceedFridProcessing,
            Outcome::ConformanceTestRendered => Trigger::MarkConformanceTestsReady,
            Outcome::TestingEnvironmentPrepared => Trigger::MarkTestingEnvironmentPrepared,
            Outcome::ConformanceTestsPassed => Trigger::MoveToNextConformanceTest,
            Outcome::ConformanceTestsFailed => Trigger::MarkConformanceTestsFailed,
            Outcome::ImplementationCodeNotUpdated => Trigger::MarkConformanceTestsReady,
            Outcome::ImplementationCodeUpdated => Trigger::MarkUnitTestsReady,
            Outcome::ConformanceTestsSummarized => Trigger::PrepareNextPostprocessingStep,
            Outcome::ConformanceTestsCommittedImplementationUpdated => {
                Trigger::PrepareNextPostprocessingStep
            }
            Outcome::ConformanceTestsCommittedImplementationNotUpdated => {
                Trigger::ProceedFridProcessing
            }
            Outcome::ConformanceTestsPostanalyzed => Trigger::ProceedFridProcessing,
            Outcome::FunctionalRequirementFinished => Trigger::ProceedFridProcessing,
            Outcome::FunctionalRequirementTooComplex
            | Outcome::UnitTestsUnrecoverableError
            | Outcome::TestingEnvironmentPreparationFailed
            | Outcome::ConformanceTestsUnrecoverableError => Trigger::HandleError,
            Outcome::DistCreated | Outcome::ErrorHandled => return None,
        };
        Some(trigger)
    }
}

/// Outcome name to trigger lookup, built once per render.
#[derive(Debug)]
pub struct OutcomeTable {
    triggers: HashMap<&'static str, Option<Trigger>>,
}

impl OutcomeTable {
    /// Build the table, failing if two outcomes share a name.
    pub fn build() -> Result<Self> {
        Self::from_outcomes(Outcome::ALL)
    }

    fn from_outcomes(outcomes: &[Outcome]) -> Result<Self> {
        let mut triggers = HashMap::new();
        for outcome in outcomes {
            if triggers
                .insert(outcome.name(), outcome.trigger())
                .is_some()
            {
                bail!("outcome name '{}' is used more than once", outcome.name());
            }
        }
        Ok(Self { triggers })
    }

    pub fn trigger_for(&self, outcome: Outcome) -> Result<Option<Trigger>> {
        match self.triggers.get(outcome.name()) {
            Some(trigger) => Ok(*trigger),
            None => bail!("outcome '{}' has no trigger mapping", outcome.name()),
        }
    }
}
