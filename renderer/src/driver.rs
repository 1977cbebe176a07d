//! The render loop: run the current state's action, map its outcome to a
//! trigger, transition, repeat until a terminal state ran.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use tracing::{debug, error, warn};

use crate::actions::{ActionMap, Payload};
use crate::context::RenderContext;
use crate::core::error::{ErrorKind, RenderError};
use crate::core::graph::StateId;
use crate::core::machine::Machine;
use crate::core::outcome::OutcomeTable;
use crate::core::render_graph::{RENDER_FAILED, render_graph};
use crate::core::trigger::Trigger;
use crate::events::{CancelToken, EventSink, RenderEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    Completed,
    Failed,
}

pub struct CodeRenderer {
    machine: Machine,
    actions: ActionMap,
    outcomes: OutcomeTable,
    events: Arc<dyn EventSink>,
    cancel: CancelToken,
    failed_state: StateId,
}

impl CodeRenderer {
    pub fn new(events: Arc<dyn EventSink>, cancel: CancelToken) -> Result<Self> {
        let graph = render_graph()?;
        let actions = ActionMap::build(&graph)?;
        let outcomes = OutcomeTable::build()?;
        let failed_state = graph
            .state(RENDER_FAILED)
            .ok_or_else(|| anyhow!("render graph has no {RENDER_FAILED} state"))?;
        Ok(Self {
            machine: Machine::new(graph),
            actions,
            outcomes,
            events,
            cancel,
            failed_state,
        })
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Drive the machine to a terminal state and return how the render ended.
    ///
    /// Errors raised by non-terminal actions fail the render through the
    /// regular failure path; only a failing terminal action is returned as `Err`.
    pub fn run(&mut self, ctx: &mut RenderContext) -> Result<(RenderStatus, Option<RenderError>)> {
        let module_name = ctx.spec.module_name().to_string();
        self.events.publish(RenderEvent::RenderModuleStarted {
            module_name: module_name.clone(),
        });

        let mut previous_state: Option<String> = None;
        let mut payload: Option<Payload> = None;
        loop {
            let state = self.machine.current();
            let name = self.machine.current_name().to_string();
            self.events.publish(RenderEvent::RenderStateUpdated {
                state: name.clone(),
                previous_state: previous_state.replace(name.clone()),
                snapshot: Box::new(ctx.snapshot()),
            });
            ctx.script_history.updated = false;

            let terminal = self.machine.is_terminal();
            if !terminal && self.cancel.is_cancelled() {
                warn!(state = %name, "render cancelled");
                ctx.set_pending_error(RenderError::new(ErrorKind::Cancelled, "Render cancelled"));
                self.transition(ctx, Trigger::HandleError);
                continue;
            }

            let mut reported = None;
            if terminal {
                if let Some(err) = ctx.take_pending_error() {
                    payload = Some(Payload::Error(err));
                }
                if let Some(Payload::Error(err)) = &payload {
                    reported = Some(err.clone());
                }
            }

            let action = self
                .actions
                .get(state)
                .ok_or_else(|| anyhow!("state {name} has no action"))?;
            let result = match action.execute(ctx, payload.take()) {
                Ok(result) => result,
                Err(err) if !terminal => {
                    error!(state = %name, error = %format!("{err:#}"), "action failed");
                    ctx.set_pending_error(RenderError::from_failure(&err));
                    self.transition(ctx, Trigger::HandleError);
                    continue;
                }
                Err(err) => return Err(err),
            };

            if terminal {
                self.events
                    .publish(RenderEvent::RenderModuleCompleted { module_name });
                let status = if state == self.failed_state {
                    RenderStatus::Failed
                } else {
                    RenderStatus::Completed
                };
                return Ok((status, reported));
            }

            debug!(state = %name, outcome = result.outcome.name(), "action finished");
            let trigger = self.outcomes.trigger_for(result.outcome)?.ok_or_else(|| {
                anyhow!(
                    "outcome {} of state {name} does not lead anywhere",
                    result.outcome.name()
                )
            })?;
            payload = result.payload;
            self.transition(ctx, trigger);
        }
    }

    /// A transition that fails lands in the failed state without further hooks.
    fn transition(&mut self, ctx: &mut RenderContext, trigger: Trigger) {
        if let Err(err) = self.machine.dispatch(ctx, trigger) {
            error!(
                state = self.machine.current_name(),
                %trigger,
                error = %format!("{err:#}"),
                "transition failed"
            );
            let pending = ctx
                .take_pending_error()
                .unwrap_or_else(|| RenderError::from_failure(&err));
            ctx.set_pending_error(pending);
            self.machine.abort_to(self.failed_state);
        }
    }
}
