//! Actions of the two terminal states.

use anyhow::Result;
use tracing::{error, info, warn};

use super::{Action, ActionResult, Payload};
use crate::context::RenderContext;
use crate::core::error::display_message;
use crate::core::outcome::Outcome;
use crate::io::files;
use crate::io::service::FrStatusRequest;

pub struct CreateDist;

impl Action for CreateDist {
    fn execute(&self, ctx: &mut RenderContext, _payload: Option<Payload>) -> Result<ActionResult> {
        if let Some(dest) = &ctx.config.build_dest {
            files::replace_dir_with_copy(&ctx.config.build_folder, dest)?;
            info!(dest = %dest.display(), "build folder copied");
        }
        if ctx.config.renders_conformance_tests()
            && let Some(dest) = &ctx.config.conformance_tests_dest
        {
            files::replace_dir_with_copy(&ctx.config.conformance_tests_folder, dest)?;
            info!(dest = %dest.display(), "conformance tests folder copied");
        }
        info!(render_id = %ctx.run_state.render_id(), "render completed");
        Ok(ActionResult::new(Outcome::DistCreated))
    }
}

pub struct ExitWithError;

impl Action for ExitWithError {
    fn execute(&self, ctx: &mut RenderContext, payload: Option<Payload>) -> Result<ActionResult> {
        let err = match payload {
            Some(Payload::Error(err)) => Some(err),
            _ => None,
        };
        error!("{}", display_message(err.as_ref()));

        let render_id = ctx.run_state.render_id().to_string();
        let Some(frid) = ctx.frid_context.as_ref().map(|f| f.frid.clone()) else {
            info!(render_id = %render_id, "render failed before any functional requirement was started");
            return Ok(ActionResult::new(Outcome::ErrorHandled));
        };
        info!(
            "To continue rendering from functional requirement {frid}, run again with --render-from {frid} --replay-with {render_id}"
        );

        let meta = ctx.next_request_meta();
        if let Err(err) = ctx
            .service
            .fail_functional_requirement(&meta, &FrStatusRequest { frid: frid.clone() })
        {
            warn!(frid = %frid, error = %err, "could not report the failed functional requirement");
        }
        Ok(ActionResult::new(Outcome::ErrorHandled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::RenderError;
    use crate::core::graph::Hook;
    use crate::core::machine::HookHost;
    use crate::core::error::ServiceError;
    use crate::test_support::{ScriptedScriptRunner, ScriptedService, TestWorkspace, flat_spec};

    #[test]
    fn dist_replaces_destination_without_git_metadata() {
        let mut workspace = TestWorkspace::new().expect("workspace");
        let dest = workspace.path().join("dist");
        std::fs::create_dir_all(&dest).expect("dest");
        std::fs::write(dest.join("stale.txt"), "old").expect("stale");
        workspace.config_mut().build_dest = Some(dest.clone());
        let spec = flat_spec(&["print hello"]).expect("spec");
        let mut ctx = workspace.context(
            spec,
            &ScriptedService::default(),
            &ScriptedScriptRunner::default(),
        );
        super::super::PrepareRepositories
            .execute(&mut ctx, None)
            .expect("prepare");
        std::fs::write(ctx.config.build_folder.join("main.py"), "print(1)\n").expect("write");

        let result = CreateDist.execute(&mut ctx, None).expect("dist");
        assert_eq!(result.outcome, Outcome::DistCreated);
        assert!(dest.join("main.py").is_file());
        assert!(!dest.join("stale.txt").exists());
        assert!(!dest.join(".git").exists());
    }

    #[test]
    fn failure_is_reported_to_service_best_effort() {
        let workspace = TestWorkspace::new().expect("workspace");
        let service = ScriptedService::default();
        service.fail_next_status(ServiceError::Transport("offline".to_string()));
        let spec = flat_spec(&["print hello"]).expect("spec");
        let mut ctx = workspace.context(spec, &service, &ScriptedScriptRunner::default());
        ctx.run_hook(Hook::StartImplementingFrid).expect("frid");

        let result = ExitWithError
            .execute(
                &mut ctx,
                Some(Payload::Error(RenderError::environment("broken"))),
            )
            .expect("exit");
        assert_eq!(result.outcome, Outcome::ErrorHandled);
        assert!(service.calls().contains(&"fail_functional_requirement".to_string()));
    }
}
