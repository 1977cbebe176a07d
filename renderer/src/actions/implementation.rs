//! Actions of the implementation and refactoring phases.

use std::collections::BTreeSet;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::{debug, info, instrument};

use super::{Action, ActionResult, Payload, unit_tests_issue};
use crate::context::{RenderContext, ScriptKind, path_arg};
use crate::core::error::{RenderError, ServiceError};
use crate::core::frid::Frid;
use crate::core::outcome::Outcome;
use crate::core::types::{reconcile_changed_files, truncate_issue};
use crate::io::files;
use crate::io::git::{CheckpointKind, Git};
use crate::io::service::{FixUnitTestsRequest, FunctionalRequirementRequest, RefactorRequest};

/// Fold files written to the build folder into the FRID's changed set.
pub(super) fn record_build_changes(ctx: &mut RenderContext, touched: &BTreeSet<String>) -> Result<()> {
    let build_folder = ctx.config.build_folder.clone();
    let exists = |path: &str| build_folder.join(path).is_file();
    match ctx.unit_tests_context.as_mut() {
        Some(unit) => reconcile_changed_files(&mut unit.changed_files, touched, exists),
        None => reconcile_changed_files(&mut ctx.frid_mut()?.changed_files, touched, exists),
    }
    Ok(())
}

pub struct PrepareRepositories;

impl PrepareRepositories {
    fn resume(ctx: &RenderContext, frid: &Frid) -> Result<()> {
        info!(frid = %frid, "resuming render");
        let rev = ctx.previous_checkpoint(frid)?.ok_or_else(|| {
            anyhow!("no build checkpoint to resume from before functional requirement {frid}")
        })?;
        ctx.build_repo.revert_to(&rev)?;

        if ctx.config.renders_conformance_tests() {
            let rev = conformance_resume_point(ctx, frid)?.ok_or_else(|| {
                anyhow!(
                    "no conformance tests checkpoint to resume from before functional requirement {frid}"
                )
            })?;
            ctx.conformance_repo.revert_to(&rev)?;
        }
        Ok(())
    }

    fn fresh(ctx: &RenderContext) -> Result<()> {
        let build_folder = &ctx.config.build_folder;
        files::delete_dir(build_folder)?;
        match &ctx.config.prerequisite_build_folder {
            Some(prerequisite) => {
                info!(prerequisite = %prerequisite.display(), "building on top of the prerequisite module");
                Git::clone_into(prerequisite, build_folder)?;
            }
            None => {
                Git::init_repo(build_folder)?;
                if let Some(base) = &ctx.config.base_folder {
                    files::copy_dir(base, build_folder)?;
                }
            }
        }
        ctx.build_repo.commit_checkpoint(&ctx.checkpoint(
            CheckpointKind::Base,
            "Initial module commit".to_string(),
            None,
        ))?;

        if ctx.config.renders_conformance_tests() {
            let folder = &ctx.config.conformance_tests_folder;
            files::delete_dir(folder)?;
            Git::init_repo(folder)?;
            ctx.conformance_repo.commit_checkpoint(&ctx.checkpoint(
                CheckpointKind::Base,
                "Initial conformance tests commit".to_string(),
                None,
            ))?;
        }
        Ok(())
    }
}

/// Latest conformance checkpoint of any FRID before `frid`, else the base.
fn conformance_resume_point(ctx: &RenderContext, frid: &Frid) -> Result<Option<String>> {
    let mut cursor = ctx.spec.previous_frid(frid);
    while let Some(previous) = cursor {
        if let Some(rev) = ctx
            .conformance_repo
            .find_checkpoint(Some(&previous), Some(CheckpointKind::ConformanceTests))?
        {
            return Ok(Some(rev));
        }
        cursor = ctx.spec.previous_frid(&previous);
    }
    ctx.conformance_repo
        .find_checkpoint(None, Some(CheckpointKind::Base))
}

impl Action for PrepareRepositories {
    #[instrument(skip_all, name = "prepare_repositories")]
    fn execute(&self, ctx: &mut RenderContext, _payload: Option<Payload>) -> Result<ActionResult> {
        match ctx.starting_frid.clone() {
            Some(frid) => Self::resume(ctx, &frid)?,
            None => Self::fresh(ctx)?,
        }
        Ok(ActionResult::new(Outcome::RepositoriesPrepared))
    }
}

pub struct RenderFunctionalRequirement;

impl Action for RenderFunctionalRequirement {
    fn execute(&self, ctx: &mut RenderContext, _payload: Option<Payload>) -> Result<ActionResult> {
        ctx.build_repo.revert_uncommitted()?;
        let frid_ctx = ctx.frid()?;
        let frid = frid_ctx.frid.clone();
        let render_attempts = frid_ctx.render_attempts;
        let request = FunctionalRequirementRequest {
            frid: frid.clone(),
            specifications: frid_ctx.specifications.clone(),
            linked_resources: frid_ctx.linked_resources.clone(),
            existing_files: ctx.build_files()?,
        };
        info!(frid = %frid, attempt = render_attempts, "rendering functional requirement");

        let meta = ctx.next_request_meta();
        let changes = match ctx.service.render_functional_requirement(&meta, &request) {
            Ok(changes) => changes,
            Err(err @ ServiceError::TooComplex { .. }) => {
                return Ok(ActionResult::failed(
                    Outcome::FunctionalRequirementTooComplex,
                    RenderError::from(&err).with_frid(frid),
                ));
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("render functional requirement {frid}"));
            }
        };

        if render_attempts > 1 {
            // Files from the abandoned attempt were reverted above.
            ctx.frid_mut()?.changed_files.clear();
        }
        let touched = files::apply_file_changes(&ctx.config.build_folder, &changes)?;
        debug!(files = touched.len(), "generated files written");
        record_build_changes(ctx, &touched)?;
        Ok(ActionResult::new(Outcome::CodeAndUnitTestsGenerated))
    }
}

pub struct RunUnitTests;

impl Action for RunUnitTests {
    fn execute(&self, ctx: &mut RenderContext, _payload: Option<Payload>) -> Result<ActionResult> {
        let Some(script) = ctx.config.unittests_script.clone() else {
            debug!("no unit tests script configured");
            return Ok(ActionResult::new(Outcome::UnitTestsSucceeded));
        };
        let args = vec![path_arg(&ctx.config.build_folder)];
        let output = ctx.run_script(ScriptKind::UnitTests, &script, args)?;

        if output.success() {
            info!("unit tests passed");
            return Ok(ActionResult::new(Outcome::UnitTestsSucceeded));
        }
        if ctx.is_unrecoverable(output.exit_code) {
            let err = RenderError::environment(
                "Unit tests script failed due to problems in the environment setup. Please check your environment or update the script.",
            )
            .with_exit_code(output.exit_code)
            .with_script(script.display().to_string());
            return Ok(ActionResult::failed(Outcome::UnitTestsUnrecoverableError, err));
        }
        info!(exit_code = output.exit_code, timed_out = output.timed_out, "unit tests failed");
        Ok(ActionResult::with_payload(
            Outcome::UnitTestsFailed,
            Payload::UnitTestsIssue(output.output),
        ))
    }
}

pub struct FixUnitTests;

impl Action for FixUnitTests {
    fn execute(&self, ctx: &mut RenderContext, payload: Option<Payload>) -> Result<ActionResult> {
        let issue = unit_tests_issue(payload)?;
        let frid_ctx = ctx.frid()?;
        let frid = frid_ctx.frid.clone();
        let request = FixUnitTestsRequest {
            frid: frid.clone(),
            specifications: frid_ctx.specifications.clone(),
            linked_resources: frid_ctx.linked_resources.clone(),
            existing_files: ctx.build_files()?,
            unit_tests_issue: truncate_issue(&issue, ctx.config.limits.max_issue_length),
        };
        let attempt = ctx
            .unit_tests_context
            .as_ref()
            .map_or(0, |unit| unit.fix_attempts);
        info!(frid = %frid, attempt, "fixing unit tests");

        let meta = ctx.next_request_meta();
        let changes = ctx
            .service
            .fix_unit_tests(&meta, &request)
            .with_context(|| format!("fix unit tests of functional requirement {frid}"))?;
        let touched = files::apply_file_changes(&ctx.config.build_folder, &changes)?;
        record_build_changes(ctx, &touched)?;
        Ok(ActionResult::new(Outcome::UnitTestsFixGenerated))
    }
}

/// Checkpoint after the unit tests pass, for implemented or refactored code.
pub struct CommitImplementationCodeChanges {
    pub kind: CheckpointKind,
}

impl Action for CommitImplementationCodeChanges {
    fn execute(&self, ctx: &mut RenderContext, _payload: Option<Payload>) -> Result<ActionResult> {
        let frid = ctx.frid()?.frid.clone();
        let summary = match self.kind {
            CheckpointKind::Refactored => {
                format!("Refactored code after implementing functional requirement {frid}")
            }
            _ => format!("Implemented functional requirement {frid}"),
        };
        let checkpoint = ctx.checkpoint(self.kind, summary, Some(frid));
        ctx.build_repo.commit_checkpoint(&checkpoint)?;
        Ok(ActionResult::new(Outcome::ImplementationCodeChangesCommitted))
    }
}

pub struct RefactorCode;

impl RefactorCode {
    /// Copy of the build folder as it was before this refactoring iteration.
    fn keep_iteration_copy(ctx: &RenderContext, frid: &Frid, iteration: u32) -> Result<()> {
        let name = format!(
            "{frid}-{iteration}-{}",
            Utc::now().format("%Y%m%dT%H%M%S")
        );
        let dest = ctx
            .config
            .logs_folder
            .join(ctx.run_state.render_id())
            .join("refactoring")
            .join(name);
        files::copy_dir(&ctx.config.build_folder, &dest)?;
        debug!(dest = %dest.display(), "kept build folder before refactoring");
        Ok(())
    }
}

impl Action for RefactorCode {
    fn execute(&self, ctx: &mut RenderContext, _payload: Option<Payload>) -> Result<ActionResult> {
        let frid_ctx = ctx.frid()?;
        let frid = frid_ctx.frid.clone();
        let iteration = frid_ctx.refactoring_iteration;
        let files_to_check: Vec<String> = frid_ctx.changed_files.iter().cloned().collect();
        if files_to_check.is_empty() {
            debug!(frid = %frid, "no changed files to refactor");
            return Ok(ActionResult::new(Outcome::NoFilesRefactored));
        }

        let request = RefactorRequest {
            frid: frid.clone(),
            files_to_check,
            existing_files: ctx.build_files()?,
        };
        let meta = ctx.next_request_meta();
        let changes = ctx
            .service
            .refactor(&meta, &request)
            .with_context(|| format!("refactor code of functional requirement {frid}"))?;
        if changes.is_empty() {
            info!(frid = %frid, iteration, "nothing left to refactor");
            return Ok(ActionResult::new(Outcome::NoFilesRefactored));
        }

        Self::keep_iteration_copy(ctx, &frid, iteration)?;
        let touched = files::apply_file_changes(&ctx.config.build_folder, &changes)?;
        info!(frid = %frid, iteration, files = touched.len(), "code refactored");
        record_build_changes(ctx, &touched)?;
        Ok(ActionResult::new(Outcome::RefactoringSuccessful))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::machine::HookHost;
    use crate::core::graph::Hook;
    use crate::test_support::{ScriptedScriptRunner, ScriptedService, TestWorkspace, flat_spec};

    fn is_git_metadata(path: &str) -> bool {
        path.split('/').any(|part| part == ".git")
    }

    fn prepared(
        workspace: &TestWorkspace,
        service: &ScriptedService,
        scripts: &ScriptedScriptRunner,
    ) -> RenderContext {
        let spec = flat_spec(&["print hello"]).expect("spec");
        let mut ctx = workspace.context(spec, service, scripts);
        PrepareRepositories.execute(&mut ctx, None).expect("prepare");
        ctx.run_hook(Hook::StartImplementingFrid).expect("start");
        ctx.run_hook(Hook::CheckFridIterationLimit).expect("attempt");
        ctx
    }

    #[test]
    fn fresh_render_seeds_build_folder_from_base() {
        let mut workspace = TestWorkspace::new().expect("workspace");
        let base = workspace.path().join("base");
        std::fs::create_dir_all(&base).expect("base");
        std::fs::write(base.join("README.md"), "base\n").expect("write");
        workspace.config_mut().base_folder = Some(base);

        let ctx = prepared(
            &workspace,
            &ScriptedService::default(),
            &ScriptedScriptRunner::default(),
        );
        let build = &ctx.config.build_folder;
        assert!(build.join("README.md").is_file());
        assert!(!ctx.build_repo.is_dirty().expect("status"));
        assert!(
            ctx.build_repo
                .find_checkpoint(None, Some(CheckpointKind::Base))
                .expect("find")
                .is_some()
        );
    }

    #[test]
    fn too_complex_response_reports_breakdown() {
        let workspace = TestWorkspace::new().expect("workspace");
        let service = ScriptedService::default();
        service.push_render(Err(ServiceError::TooComplex {
            message: "split it".to_string(),
            proposed_breakdown: vec!["part one".to_string(), "part two".to_string()],
        }));
        let mut ctx = prepared(&workspace, &service, &ScriptedScriptRunner::default());

        let result = RenderFunctionalRequirement
            .execute(&mut ctx, None)
            .expect("execute");
        assert_eq!(result.outcome, Outcome::FunctionalRequirementTooComplex);
        match result.payload {
            Some(Payload::Error(err)) => {
                assert_eq!(err.proposed_breakdown.map(|b| b.len()), Some(2));
                assert_eq!(err.frid, Some("1".parse().expect("frid")));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn generated_files_land_in_build_folder_and_changed_set() {
        let workspace = TestWorkspace::new().expect("workspace");
        let service = ScriptedService::default();
        service.push_render(Ok(ScriptedService::files(&[("src/main.py", "print('hi')\n")])));
        let mut ctx = prepared(&workspace, &service, &ScriptedScriptRunner::default());

        let result = RenderFunctionalRequirement
            .execute(&mut ctx, None)
            .expect("execute");
        assert_eq!(result.outcome, Outcome::CodeAndUnitTestsGenerated);
        assert!(ctx.config.build_folder.join("src/main.py").is_file());
        assert!(ctx.frid().expect("frid").changed_files.contains("src/main.py"));
    }

    #[test]
    fn unit_test_exit_codes_are_classified() {
        let workspace = TestWorkspace::new()
            .expect("workspace")
            .with_unit_tests_script();
        let scripts = ScriptedScriptRunner::default();
        let script = workspace.config().unittests_script.clone().expect("script");
        scripts.push(&script, 1, "1 failed");
        scripts.push(&script, 69, "no interpreter");
        let mut ctx = prepared(&workspace, &ScriptedService::default(), &scripts);

        let failed = RunUnitTests.execute(&mut ctx, None).expect("first run");
        assert_eq!(failed.outcome, Outcome::UnitTestsFailed);
        assert_eq!(failed.payload, Some(Payload::UnitTestsIssue("1 failed".to_string())));

        let broken = RunUnitTests.execute(&mut ctx, None).expect("second run");
        assert_eq!(broken.outcome, Outcome::UnitTestsUnrecoverableError);
        match broken.payload {
            Some(Payload::Error(err)) => assert_eq!(err.exit_code, Some(69)),
            other => panic!("unexpected payload {other:?}"),
        }
        let request = &scripts.requests()[0];
        assert_eq!(request.args, vec![path_arg(&ctx.config.build_folder)]);
    }

    #[test]
    fn fix_request_truncates_long_issues() {
        let workspace = TestWorkspace::new().expect("workspace");
        let service = ScriptedService::default();
        let mut ctx = prepared(&workspace, &service, &ScriptedScriptRunner::default());
        ctx.config.limits.max_issue_length = 10;
        ctx.run_hook(Hook::StartUnitTestsProcessing).expect("unit");

        let result = FixUnitTests
            .execute(&mut ctx, Some(Payload::UnitTestsIssue("x".repeat(100))))
            .expect("fix");
        assert_eq!(result.outcome, Outcome::UnitTestsFixGenerated);
        let issues = service.unit_test_issues();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("90 characters truncated"));
    }

    #[test]
    fn refactoring_keeps_a_copy_of_the_previous_build() {
        let workspace = TestWorkspace::new().expect("workspace");
        let service = ScriptedService::default();
        service.push_render(Ok(ScriptedService::files(&[("app.py", "x = 1\n")])));
        service.push_refactor(Ok(ScriptedService::files(&[("app.py", "X = 1\n")])));
        let mut ctx = prepared(&workspace, &service, &ScriptedScriptRunner::default());
        RenderFunctionalRequirement.execute(&mut ctx, None).expect("render");
        ctx.run_hook(Hook::StartRefactoringCode).expect("refactor hook");

        let result = RefactorCode.execute(&mut ctx, None).expect("refactor");
        assert_eq!(result.outcome, Outcome::RefactoringSuccessful);
        let copies = ctx
            .config
            .logs_folder
            .join(ctx.run_state.render_id())
            .join("refactoring");
        let kept = files::list_subfolders(&copies).expect("copies");
        assert_eq!(kept.len(), 1);
        assert!(kept[0].starts_with("1-1-"));
        let copied = files::list_text_files(&copies.join(&kept[0])).expect("files");
        assert!(copied.iter().all(|f| !is_git_metadata(f)));
        assert_eq!(
            std::fs::read_to_string(copies.join(&kept[0]).join("app.py")).expect("read"),
            "x = 1\n"
        );
    }
}
