//! Progress events published by the render engine.
//!
//! The engine runs on a worker thread. Observers receive events over a single
//! channel; events published before the observer attaches are buffered and
//! delivered first, in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, bail};
use serde::Serialize;

use crate::core::types::{
    ConformanceTestsRunningContext, FridContext, ScriptExecutionHistory, UnitTestsRunningContext,
};

/// Copy of the render context records at one state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderContextSnapshot {
    pub module_name: String,
    pub frid_context: Option<FridContext>,
    pub unit_tests_context: Option<UnitTestsRunningContext>,
    pub conformance_context: Option<ConformanceTestsRunningContext>,
    pub script_history: ScriptExecutionHistory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RenderEvent {
    RenderStateUpdated {
        state: String,
        previous_state: Option<String>,
        snapshot: Box<RenderContextSnapshot>,
    },
    RenderModuleStarted {
        module_name: String,
    },
    RenderModuleCompleted {
        module_name: String,
    },
    RenderCompleted {
        render_id: String,
    },
    RenderFailed {
        message: String,
    },
    LogMessageEmitted {
        logger: String,
        level: String,
        message: String,
        timestamp: String,
    },
}

pub trait EventSink: Send + Sync {
    fn publish(&self, event: RenderEvent);
}

#[derive(Debug, Default)]
struct BusState {
    sender: Option<Sender<RenderEvent>>,
    buffer: Vec<RenderEvent>,
    attached: bool,
}

/// One-way event channel with a replay buffer for early events.
#[derive(Debug, Default)]
pub struct EventBus {
    state: Mutex<BusState>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the single consumer. Buffered events are delivered first.
    pub fn attach(&self) -> Result<Receiver<RenderEvent>> {
        let mut state = self.lock();
        if state.attached {
            bail!("event bus already has a consumer");
        }
        let (sender, receiver) = mpsc::channel();
        for event in state.buffer.drain(..) {
            // The receiver is alive: it is returned below.
            let _ = sender.send(event);
        }
        state.sender = Some(sender);
        state.attached = true;
        Ok(receiver)
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: RenderEvent) {
        let mut state = self.lock();
        match &state.sender {
            Some(sender) => {
                if sender.send(event).is_err() {
                    // Consumer hung up; later events go nowhere.
                    state.sender = None;
                }
            }
            None if !state.attached => state.buffer.push(event),
            None => {}
        }
    }
}

/// Cooperative cancellation flag shared between the observer and the worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
