//! Leaf-state actions.
//!
//! An action does the work of one leaf state and reports an [`Outcome`]; the
//! driver turns the outcome into a trigger. Actions never move the machine.

use std::collections::HashMap;

use anyhow::{Result, anyhow};

use crate::context::RenderContext;
use crate::core::error::RenderError;
use crate::core::graph::{ActionId, StateGraph, StateId};
use crate::core::outcome::Outcome;
use crate::io::git::CheckpointKind;

mod conformance;
mod implementation;
mod postprocessing;
mod terminal;

pub use conformance::{
    FixConformanceTest, PrepareTestingEnvironment, RenderConformanceTests, RunConformanceTests,
};
pub use implementation::{
    CommitImplementationCodeChanges, FixUnitTests, PrepareRepositories, RefactorCode,
    RenderFunctionalRequirement, RunUnitTests,
};
pub use postprocessing::{
    AnalyzeSpecificationAmbiguity, CommitConformanceTestsChanges, FinishFunctionalRequirement,
    SummarizeConformanceTests,
};
pub use terminal::{CreateDist, ExitWithError};

/// Data handed from one action to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    UnitTestsIssue(String),
    ConformanceTestsIssue(String),
    Error(RenderError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    pub outcome: Outcome,
    pub payload: Option<Payload>,
}

impl ActionResult {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            payload: None,
        }
    }

    pub fn with_payload(outcome: Outcome, payload: Payload) -> Self {
        Self {
            outcome,
            payload: Some(payload),
        }
    }

    pub fn failed(outcome: Outcome, err: RenderError) -> Self {
        Self::with_payload(outcome, Payload::Error(err))
    }
}

pub trait Action {
    fn execute(&self, ctx: &mut RenderContext, payload: Option<Payload>) -> Result<ActionResult>;
}

fn action_for(id: ActionId) -> Box<dyn Action> {
    match id {
        ActionId::PrepareRepositories => Box::new(PrepareRepositories),
        ActionId::RenderFunctionalRequirement => Box::new(RenderFunctionalRequirement),
        ActionId::RunUnitTests => Box::new(RunUnitTests),
        ActionId::FixUnitTests => Box::new(FixUnitTests),
        ActionId::CommitImplementedCode => Box::new(CommitImplementationCodeChanges {
            kind: CheckpointKind::Implemented,
        }),
        ActionId::RefactorCode => Box::new(RefactorCode),
        ActionId::CommitRefactoredCode => Box::new(CommitImplementationCodeChanges {
            kind: CheckpointKind::Refactored,
        }),
        ActionId::RenderConformanceTests => Box::new(RenderConformanceTests),
        ActionId::PrepareTestingEnvironment => Box::new(PrepareTestingEnvironment),
        ActionId::RunConformanceTests => Box::new(RunConformanceTests),
        ActionId::FixConformanceTest => Box::new(FixConformanceTest),
        ActionId::SummarizeConformanceTests => Box::new(SummarizeConformanceTests),
        ActionId::CommitConformanceTestsChanges => Box::new(CommitConformanceTestsChanges),
        ActionId::AnalyzeSpecificationAmbiguity => Box::new(AnalyzeSpecificationAmbiguity),
        ActionId::FinishFunctionalRequirement => Box::new(FinishFunctionalRequirement),
        ActionId::CreateDist => Box::new(CreateDist),
        ActionId::ExitWithError => Box::new(ExitWithError),
    }
}

/// Leaf state to action, built once per render.
pub struct ActionMap {
    actions: HashMap<StateId, Box<dyn Action>>,
}

impl ActionMap {
    pub fn build(graph: &StateGraph) -> Result<Self> {
        let mut actions = HashMap::new();
        for leaf in graph.leaves() {
            let id = graph
                .action(leaf)
                .ok_or_else(|| anyhow!("leaf state {} has no action", graph.name(leaf)))?;
            actions.insert(leaf, action_for(id));
        }
        Ok(Self { actions })
    }

    pub fn get(&self, state: StateId) -> Option<&dyn Action> {
        self.actions.get(&state).map(Box::as_ref)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Issue text carried by the previous action, or an error naming the gap.
fn unit_tests_issue(payload: Option<Payload>) -> Result<String> {
    match payload {
        Some(Payload::UnitTestsIssue(issue)) => Ok(issue),
        other => Err(anyhow!("expected unit tests output, got {other:?}")),
    }
}

fn conformance_tests_issue(payload: Option<Payload>) -> Result<String> {
    match payload {
        Some(Payload::ConformanceTestsIssue(issue)) => Ok(issue),
        other => Err(anyhow!("expected conformance tests output, got {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::render_graph::render_graph;

    #[test]
    fn every_leaf_gets_an_action() {
        let graph = render_graph().expect("graph");
        let map = ActionMap::build(&graph).expect("map");
        assert_eq!(map.len(), graph.leaves().count());
        for leaf in graph.leaves() {
            assert!(map.get(leaf).is_some(), "{}", graph.name(leaf));
        }
    }

    #[test]
    fn issue_payloads_are_not_interchangeable() {
        let err = conformance_tests_issue(Some(Payload::UnitTestsIssue("x".into())))
            .expect_err("wrong payload");
        assert!(err.to_string().contains("conformance tests output"));
        assert_eq!(
            unit_tests_issue(Some(Payload::UnitTestsIssue("boom".into()))).expect("issue"),
            "boom"
        );
    }
}
