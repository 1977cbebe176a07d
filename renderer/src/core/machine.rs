//! Runtime for the state graph: current state, trigger dispatch, hooks.
//!
//! Hooks are reported through [`HookHost`] and may return an override trigger.
//! An override interrupts the entry chain at the state reached so far and is
//! dispatched from there before control returns to the caller.

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::core::graph::{Hook, StateGraph, StateId};
use crate::core::trigger::Trigger;

/// Upper bound on override triggers chained from a single dispatch.
pub const MAX_FORCED_TRANSITIONS: usize = 64;

/// Receiver of entry/exit hooks.
pub trait HookHost {
    fn run_hook(&mut self, hook: Hook) -> Result<Option<Trigger>>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("state {state} is terminal and accepts no trigger (got {trigger})")]
    Terminal { state: String, trigger: Trigger },
    #[error("no transition from {state} on {trigger}")]
    NoTransition { state: String, trigger: Trigger },
    #[error("too many forced transitions starting at {state}")]
    ForcedChainTooLong { state: String },
}

#[derive(Debug)]
pub struct Machine {
    graph: StateGraph,
    current: StateId,
}

impl Machine {
    pub fn new(graph: StateGraph) -> Self {
        let current = graph.initial_state();
        Self { graph, current }
    }

    pub fn graph(&self) -> &StateGraph {
        &self.graph
    }

    pub fn current(&self) -> StateId {
        self.current
    }

    pub fn current_name(&self) -> &str {
        self.graph.name(self.current)
    }

    pub fn is_terminal(&self) -> bool {
        self.graph.is_terminal(self.current)
    }

    /// Apply `trigger`, then any override triggers returned by hooks.
    pub fn dispatch(&mut self, host: &mut impl HookHost, trigger: Trigger) -> Result<()> {
        let origin = self.current_name().to_string();
        let mut pending = Some(trigger);
        let mut applied = 0usize;
        while let Some(trigger) = pending.take() {
            if applied > MAX_FORCED_TRANSITIONS {
                return Err(TransitionError::ForcedChainTooLong { state: origin }.into());
            }
            applied += 1;

            if self.is_terminal() {
                return Err(TransitionError::Terminal {
                    state: self.current_name().to_string(),
                    trigger,
                }
                .into());
            }
            let dest = self.graph.resolve(self.current, trigger).ok_or_else(|| {
                TransitionError::NoTransition {
                    state: self.current_name().to_string(),
                    trigger,
                }
            })?;
            debug!(
                from = self.current_name(),
                to = self.graph.name(dest),
                %trigger,
                "transition"
            );
            pending = self.transition(host, dest)?;
        }
        Ok(())
    }

    /// Jump to `state` without running any hook.
    pub fn abort_to(&mut self, state: StateId) {
        self.current = state;
    }

    fn transition(&mut self, host: &mut impl HookHost, dest: StateId) -> Result<Option<Trigger>> {
        let scope = self.graph.scope(self.current, dest);

        while self.current != scope {
            if let Some(hook) = self.graph.on_exit(self.current) {
                trace!(state = self.current_name(), ?hook, "exit hook");
                if let Some(ignored) = host.run_hook(hook)? {
                    warn!(
                        state = self.current_name(),
                        ?hook,
                        %ignored,
                        "exit hook returned a trigger; exit hooks cannot redirect a transition"
                    );
                }
            }
            match self.graph.parent(self.current) {
                Some(parent) => self.current = parent,
                None => break,
            }
        }

        for state in self.graph.path_from(scope, dest) {
            if let Some(forced) = self.enter(host, state)? {
                return Ok(Some(forced));
            }
        }

        let mut cursor = dest;
        while let Some(child) = self.graph.initial_child(cursor) {
            if let Some(forced) = self.enter(host, child)? {
                return Ok(Some(forced));
            }
            cursor = child;
        }
        Ok(None)
    }

    fn enter(&mut self, host: &mut impl HookHost, state: StateId) -> Result<Option<Trigger>> {
        self.current = state;
        match self.graph.on_enter(state) {
            Some(hook) => {
                trace!(state = self.current_name(), ?hook, "enter hook");
                let forced = host.run_hook(hook)?;
                if let Some(trigger) = forced {
                    debug!(state = self.current_name(), %trigger, "hook forced transition");
                }
                Ok(forced)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::core::render_graph::{
        CONFORMANCE_TEST_FAILED, FRID_FULLY_IMPLEMENTED, READY_FOR_FRID_IMPLEMENTATION,
        READY_FOR_REFACTORING, RENDER_COMPLETED, RENDER_FAILED, render_graph,
    };

    /// Records hooks and replies with scripted overrides.
    #[derive(Default)]
    struct Recorder {
        calls: Vec<Hook>,
        overrides: HashMap<Hook, Vec<Trigger>>,
    }

    impl Recorder {
        fn force(&mut self, hook: Hook, trigger: Trigger) {
            self.overrides.entry(hook).or_default().push(trigger);
        }
    }

    impl HookHost for Recorder {
        fn run_hook(&mut self, hook: Hook) -> Result<Option<Trigger>> {
            self.calls.push(hook);
            Ok(self.overrides.get_mut(&hook).and_then(|queue| {
                if queue.is_empty() {
                    None
                } else {
                    Some(queue.remove(0))
                }
            }))
        }
    }

    fn machine() -> Machine {
        Machine::new(render_graph().expect("graph"))
    }

    #[test]
    fn start_render_enters_composite_then_initial_child() {
        let mut m = machine();
        let mut host = Recorder::default();
        m.dispatch(&mut host, Trigger::StartRender).expect("dispatch");
        assert_eq!(m.current_name(), READY_FOR_FRID_IMPLEMENTATION);
        assert_eq!(
            host.calls,
            vec![Hook::StartImplementingFrid, Hook::CheckFridIterationLimit]
        );
    }

    #[test]
    fn override_from_composite_entry_skips_initial_child() {
        let mut m = machine();
        let mut host = Recorder::default();
        host.force(Hook::StartImplementingFrid, Trigger::PrepareFinalOutput);
        m.dispatch(&mut host, Trigger::StartRender).expect("dispatch");
        assert_eq!(m.current_name(), RENDER_COMPLETED);
        assert_eq!(
            host.calls,
            vec![Hook::StartImplementingFrid, Hook::FinishImplementingFrid]
        );
    }

    #[test]
    fn restart_exits_sub_loop_and_reenters_ready_state() {
        let mut m = machine();
        let mut host = Recorder::default();
        m.dispatch(&mut host, Trigger::StartRender).expect("start");
        m.dispatch(&mut host, Trigger::RenderFunctionalRequirement)
            .expect("render");
        host.force(Hook::StartFixingUnitTests, Trigger::RestartFridProcessing);
        host.calls.clear();
        m.dispatch(&mut host, Trigger::MarkUnitTestsFailed)
            .expect("failed");
        assert_eq!(m.current_name(), READY_FOR_FRID_IMPLEMENTATION);
        assert_eq!(
            host.calls,
            vec![
                Hook::StartFixingUnitTests,
                Hook::FinishUnitTestsProcessing,
                Hook::CheckFridIterationLimit
            ]
        );
    }

    #[test]
    fn loop_back_to_ancestor_reenters_it() {
        let mut m = machine();
        let mut host = Recorder::default();
        let done = m.graph().state(FRID_FULLY_IMPLEMENTED).expect("done");
        m.abort_to(done);
        m.dispatch(&mut host, Trigger::ProceedFridProcessing)
            .expect("proceed");
        assert_eq!(m.current_name(), READY_FOR_FRID_IMPLEMENTATION);
        assert_eq!(
            host.calls,
            vec![
                Hook::FinishImplementingFrid,
                Hook::StartImplementingFrid,
                Hook::CheckFridIterationLimit
            ]
        );
    }

    #[test]
    fn handle_error_runs_exit_hooks_up_to_root() {
        let mut m = machine();
        let mut host = Recorder::default();
        let failed = m.graph().state(CONFORMANCE_TEST_FAILED).expect("failed");
        m.abort_to(failed);
        m.dispatch(&mut host, Trigger::HandleError).expect("error");
        assert_eq!(m.current_name(), RENDER_FAILED);
        assert_eq!(
            host.calls,
            vec![
                Hook::FinishFixingConformanceTests,
                Hook::FinishConformanceTestsProcessing,
                Hook::FinishImplementingFrid
            ]
        );
    }

    #[test]
    fn trigger_from_exit_hook_does_not_redirect() {
        let mut m = machine();
        let mut host = Recorder::default();
        let done = m.graph().state(FRID_FULLY_IMPLEMENTED).expect("done");
        m.abort_to(done);
        host.force(Hook::FinishImplementingFrid, Trigger::HandleError);
        m.dispatch(&mut host, Trigger::ProceedFridProcessing)
            .expect("proceed");
        assert_eq!(m.current_name(), READY_FOR_FRID_IMPLEMENTATION);
        assert_eq!(
            host.calls,
            vec![
                Hook::FinishImplementingFrid,
                Hook::StartImplementingFrid,
                Hook::CheckFridIterationLimit
            ]
        );
    }

    #[test]
    fn terminal_states_reject_every_trigger() {
        let triggers = [
            Trigger::StartRender,
            Trigger::HandleError,
            Trigger::ProceedFridProcessing,
            Trigger::PrepareFinalOutput,
            Trigger::RestartFridProcessing,
        ];
        for terminal in [RENDER_COMPLETED, RENDER_FAILED] {
            let mut m = machine();
            let mut host = Recorder::default();
            let id = m.graph().state(terminal).expect("terminal");
            m.abort_to(id);
            for trigger in triggers {
                let err = m.dispatch(&mut host, trigger).expect_err("rejected");
                assert!(matches!(
                    err.downcast_ref::<TransitionError>(),
                    Some(TransitionError::Terminal { .. })
                ));
                assert_eq!(m.current_name(), terminal);
            }
            assert!(host.calls.is_empty());
        }
    }

    #[test]
    fn unknown_trigger_is_reported_without_moving() {
        let mut m = machine();
        let mut host = Recorder::default();
        let err = m
            .dispatch(&mut host, Trigger::MarkUnitTestsPassed)
            .expect_err("no transition");
        assert!(matches!(
            err.downcast_ref::<TransitionError>(),
            Some(TransitionError::NoTransition { .. })
        ));
        assert_eq!(m.current(), m.graph().initial_state());
    }

    #[test]
    fn endless_override_chain_is_cut_off() {
        let mut m = machine();
        let mut host = Recorder::default();
        let ready = m.graph().state(READY_FOR_REFACTORING).expect("state");
        m.abort_to(ready);
        for _ in 0..MAX_FORCED_TRANSITIONS {
            host.force(Hook::StartUnitTestsProcessing, Trigger::MarkUnitTestsFailed);
            host.force(
                Hook::StartFixingUnitTestsInRefactoring,
                Trigger::StartNewRefactoringIteration,
            );
            host.force(Hook::StartRefactoringCode, Trigger::RefactorCode);
        }
        let err = m
            .dispatch(&mut host, Trigger::RefactorCode)
            .expect_err("cut off");
        assert!(matches!(
            err.downcast_ref::<TransitionError>(),
            Some(TransitionError::ForcedChainTooLong { .. })
        ));
    }
}
