//! Entry point rendering one module from a validated configuration.

use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::{info, instrument};

use crate::context::{Collaborators, RenderContext};
use crate::core::error::{RenderError, display_message};
use crate::core::frid::FridRange;
use crate::driver::{CodeRenderer, RenderStatus};
use crate::events::{CancelToken, EventSink, RenderEvent};
use crate::io::config::RenderConfig;
use crate::io::run_state::RunState;
use crate::io::spec_tree::SpecificationProvider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderReport {
    pub render_id: String,
    pub status: RenderStatus,
    pub error: Option<RenderError>,
}

fn check_range(spec: &dyn SpecificationProvider, range: &FridRange) -> Result<()> {
    if !spec.contains(&range.start) {
        bail!("functional requirement {} does not exist", range.start);
    }
    if let Some(end) = &range.end {
        if !spec.contains(end) {
            bail!("functional requirement {end} does not exist");
        }
        if end < &range.start {
            bail!("render range {}..{end} is empty", range.start);
        }
    }
    Ok(())
}

/// Render the module described by `collaborators.spec`.
///
/// Invalid configuration or an unknown render range fails before anything
/// is touched. Starting anywhere but the first FRID resumes from the last
/// checkpoint before it.
#[instrument(skip_all, fields(render_id = %run_state.render_id()))]
pub fn render_module(
    config: RenderConfig,
    range: Option<FridRange>,
    run_state: RunState,
    collaborators: Collaborators,
    events: Arc<dyn EventSink>,
    cancel: CancelToken,
) -> Result<RenderReport> {
    config.validate()?;
    let starting_frid = match &range {
        Some(range) => {
            check_range(collaborators.spec.as_ref(), range)?;
            let first = collaborators.spec.first_frid();
            (first.as_ref() != Some(&range.start)).then(|| range.start.clone())
        }
        None => None,
    };

    let render_id = run_state.render_id().to_string();
    let mut ctx = RenderContext::new(config, collaborators, run_state, range);
    ctx.starting_frid = starting_frid;
    info!(module = %ctx.spec.module_name(), "rendering module");

    let mut renderer = CodeRenderer::new(events.clone(), cancel)?;
    let (status, error) = renderer.run(&mut ctx)?;
    match status {
        RenderStatus::Completed => events.publish(RenderEvent::RenderCompleted {
            render_id: render_id.clone(),
        }),
        RenderStatus::Failed => events.publish(RenderEvent::RenderFailed {
            message: display_message(error.as_ref()),
        }),
    }
    Ok(RenderReport {
        render_id,
        status,
        error,
    })
}
